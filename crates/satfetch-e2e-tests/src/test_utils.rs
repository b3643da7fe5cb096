use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use futures::StreamExt;
use md5::{Digest, Md5};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use satfetch_lib::catalog::{Catalog, Checksum, ChecksumAlgorithm, Endpoints, Item, ItemId, OnlineStatus};
use satfetch_lib::transport::{
    ByteRange, CAUSE_MESSAGE_HEADER, Method, Transport, TransportError, TransportRequest,
    TransportResponse,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const API_URL: &str = "https://catalog.test/";

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn setup_test_environment() -> Result<TempDir> {
    Ok(tempfile::tempdir()?)
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Availability {
    Online,
    /// Comes online once triggered and then probed this many times.
    OfflineUntilProbed(usize),
    NeverOnline,
}

/// A product served by [`StubCatalog`].
#[derive(Clone, Debug)]
pub struct StubProduct {
    pub id: String,
    pub title: String,
    pub content: Bytes,
    checksum_hex: String,
    availability: Availability,
    fail_once_at: Option<usize>,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    unauthorized: bool,
    ignore_range: bool,
    trigger_answers: Vec<(StatusCode, String)>,
    download_rejection: Option<(StatusCode, String)>,
}

impl StubProduct {
    pub fn new(id: &str, content: Bytes) -> Self {
        Self {
            id: id.to_string(),
            title: format!("S2A_MSIL1C_{id}"),
            checksum_hex: md5_hex(&content),
            content,
            availability: Availability::Online,
            fail_once_at: None,
            chunk_size: 1024,
            chunk_delay: None,
            unauthorized: false,
            ignore_range: false,
            trigger_answers: Vec::new(),
            download_rejection: None,
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Archived until a retrieval trigger arrives and `probes` probes followed it.
    pub fn offline_until_probed(mut self, probes: usize) -> Self {
        self.availability = Availability::OfflineUntilProbed(probes);
        self
    }

    pub fn never_online(mut self) -> Self {
        self.availability = Availability::NeverOnline;
        self
    }

    /// Metadata advertises a checksum the content does not have.
    pub fn with_wrong_checksum(mut self) -> Self {
        self.checksum_hex = "0".repeat(32);
        self
    }

    /// The first transfer breaks off with a network error after `offset` bytes.
    pub fn fail_once_at(mut self, offset: usize) -> Self {
        self.fail_once_at = Some(offset);
        self
    }

    pub fn with_chunks(mut self, chunk_size: usize, delay: Duration) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_delay = Some(delay);
        self
    }

    pub fn unauthorized(mut self) -> Self {
        self.unauthorized = true;
        self
    }

    /// Answers ranged downloads with the whole content and 200.
    pub fn ignoring_range(mut self) -> Self {
        self.ignore_range = true;
        self
    }

    /// The first retrieval triggers get these answers, in order, before the archive behaves normally.
    pub fn answering_triggers_with<'a>(
        mut self,
        answers: impl IntoIterator<Item = (StatusCode, &'a str)>,
    ) -> Self {
        self.trigger_answers = answers
            .into_iter()
            .map(|(status, cause)| (status, cause.to_string()))
            .collect();
        self
    }

    /// Content transfers fail with `status` and a `cause-message` header; probes still succeed.
    pub fn rejecting_downloads(mut self, status: StatusCode, cause: &str) -> Self {
        self.download_rejection = Some((status, cause.to_string()));
        self
    }

    pub fn checksum_hex(&self) -> &str {
        &self.checksum_hex
    }

    pub fn download_url(&self) -> String {
        format!("{API_URL}odata/v1/Products('{}')/$value", self.id)
    }

    pub fn metadata_json(&self) -> serde_json::Value {
        serde_json::json!({
            "d": {
                "__metadata": {
                    "id": format!("{API_URL}odata/v1/Products('{}')", self.id),
                    "media_src": self.download_url(),
                    "content_type": "application/octet-stream",
                },
                "Id": self.id,
                "Name": self.title,
                "ContentType": "application/octet-stream",
                "ContentLength": self.content.len().to_string(),
                "Checksum": {
                    "Algorithm": "MD5",
                    "Value": self.checksum_hex.to_uppercase(),
                },
                "Online": self.availability == Availability::Online,
            }
        })
    }

    pub fn item(&self) -> Item {
        let online = match self.availability {
            Availability::Online => OnlineStatus::Online,
            _ => OnlineStatus::Offline,
        };
        Item {
            id: ItemId::from(self.id.as_str()),
            title: self.title.clone(),
            size: self.content.len() as u64,
            checksum: Checksum {
                algorithm: ChecksumAlgorithm::Md5,
                digest: hex::decode(&self.checksum_hex).unwrap_or_default(),
            },
            online,
            download_url: self.download_url(),
        }
    }

    pub fn filename(&self) -> String {
        format!("{}.zip", self.title)
    }
}

#[derive(Debug)]
struct ProductState {
    product: StubProduct,
    triggered: bool,
    probes_since_trigger: usize,
    failed_once: bool,
    trigger_answers: VecDeque<(StatusCode, String)>,
}

impl ProductState {
    fn is_online(&self) -> bool {
        match self.product.availability {
            Availability::Online => true,
            Availability::OfflineUntilProbed(probes) => {
                self.triggered && self.probes_since_trigger >= probes
            }
            Availability::NeverOnline => false,
        }
    }
}

enum Endpoint {
    Metadata(String),
    Download(String),
}

fn parse_endpoint(url: &str) -> Option<Endpoint> {
    let rest = url.strip_prefix(API_URL)?.strip_prefix("odata/v1/Products('")?;
    let (id, suffix) = rest.split_once("')")?;
    if suffix.starts_with("/$value") {
        Some(Endpoint::Download(id.to_string()))
    } else if suffix.starts_with("?$format=json") {
        Some(Endpoint::Metadata(id.to_string()))
    } else {
        None
    }
}

#[derive(Debug, Default)]
struct TransferCounter {
    active: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
}

/// Counts a transfer as active until the response body is dropped.
struct TransferGuard {
    counter: Arc<TransferCounter>,
}

impl TransferGuard {
    fn start(counter: Arc<TransferCounter>) -> Self {
        let active = counter.active.fetch_add(1, Ordering::SeqCst) + 1;
        counter.peak.fetch_max(active, Ordering::SeqCst);
        counter.started.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.counter.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory catalog speaking the OData product endpoints. Records every request it receives.
#[derive(Clone, Default)]
pub struct StubCatalog {
    products: Arc<Mutex<HashMap<String, ProductState>>>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
    transfers: Arc<TransferCounter>,
}

impl StubCatalog {
    pub fn new(products: impl IntoIterator<Item = StubProduct>) -> Self {
        let stub = Self::default();
        for product in products {
            stub.add(product);
        }
        stub
    }

    pub fn add(&self, product: StubProduct) {
        self.products.lock().unwrap().insert(
            product.id.clone(),
            ProductState {
                trigger_answers: product.trigger_answers.iter().cloned().collect(),
                product,
                triggered: false,
                probes_since_trigger: 0,
                failed_once: false,
            },
        );
    }

    pub fn catalog(&self) -> Catalog {
        let endpoints = Endpoints::new(API_URL).unwrap();
        Catalog::new(Arc::new(self.clone()), endpoints)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn requests_for(&self, id: &str, filter: impl Fn(&TransportRequest) -> bool) -> Vec<TransportRequest> {
        let download_url = format!("{API_URL}odata/v1/Products('{id}')/$value");
        self.requests()
            .into_iter()
            .filter(|request| request.url == download_url && filter(request))
            .collect()
    }

    /// Content transfers, i.e. GETs that are not two-byte retrieval triggers.
    pub fn downloads(&self, id: &str) -> Vec<TransportRequest> {
        self.requests_for(id, |request| {
            request.method == Method::Get && request.range != Some(ByteRange::bounded(0, 1))
        })
    }

    pub fn triggers(&self, id: &str) -> usize {
        self.requests_for(id, |request| {
            request.method == Method::Get && request.range == Some(ByteRange::bounded(0, 1))
        })
        .len()
    }

    pub fn probes(&self, id: &str) -> usize {
        self.requests_for(id, |request| request.method == Method::Head)
            .len()
    }

    pub fn peak_transfers(&self) -> usize {
        self.transfers.peak.load(Ordering::SeqCst)
    }

    pub fn active_transfers(&self) -> usize {
        self.transfers.active.load(Ordering::SeqCst)
    }

    pub fn started_transfers(&self) -> usize {
        self.transfers.started.load(Ordering::SeqCst)
    }

    fn respond(&self, request: &TransportRequest) -> TransportResponse {
        let Some(endpoint) = parse_endpoint(&request.url) else {
            return TransportResponse::empty(StatusCode::NOT_FOUND);
        };
        let mut products = self.products.lock().unwrap();

        match endpoint {
            Endpoint::Metadata(id) => match products.get(&id) {
                None => TransportResponse::empty(StatusCode::NOT_FOUND),
                Some(state) if state.product.unauthorized => {
                    TransportResponse::empty(StatusCode::UNAUTHORIZED)
                }
                Some(state) => {
                    let body = state.product.metadata_json().to_string();
                    full_body(StatusCode::OK, Bytes::from(body))
                }
            },
            Endpoint::Download(id) => {
                let Some(state) = products.get_mut(&id) else {
                    return TransportResponse::empty(StatusCode::NOT_FOUND);
                };
                if state.product.unauthorized {
                    return TransportResponse::empty(StatusCode::UNAUTHORIZED);
                }
                match (request.method, request.range) {
                    (Method::Head, _) => {
                        if state.triggered {
                            state.probes_since_trigger += 1;
                        }
                        if state.is_online() {
                            TransportResponse::empty(StatusCode::OK)
                        } else {
                            TransportResponse::empty(StatusCode::ACCEPTED)
                        }
                    }
                    (Method::Get, Some(range)) if range == ByteRange::bounded(0, 1) => {
                        if let Some((status, cause)) = state.trigger_answers.pop_front() {
                            response_with_cause(status, &cause)
                        } else if state.is_online() {
                            let head = state.product.content.slice(..2.min(state.product.content.len()));
                            full_body(StatusCode::PARTIAL_CONTENT, head)
                        } else {
                            state.triggered = true;
                            TransportResponse::empty(StatusCode::ACCEPTED)
                        }
                    }
                    (Method::Get, range) => {
                        if !state.is_online() {
                            return TransportResponse::empty(StatusCode::ACCEPTED);
                        }
                        if let Some((status, cause)) = &state.product.download_rejection {
                            return response_with_cause(*status, cause);
                        }
                        self.transfer(state, range)
                    }
                }
            }
        }
    }

    fn transfer(&self, state: &mut ProductState, range: Option<ByteRange>) -> TransportResponse {
        let (status, start) = match range {
            Some(range) if !state.product.ignore_range => {
                (StatusCode::PARTIAL_CONTENT, range.start as usize)
            }
            _ => (StatusCode::OK, 0),
        };
        let fail_after = match state.product.fail_once_at {
            Some(offset) if !state.failed_once && offset > start => {
                state.failed_once = true;
                Some(offset - start)
            }
            _ => None,
        };

        let product = &state.product;
        let content = product.content.slice(start.min(product.content.len())..);

        let guard = TransferGuard::start(self.transfers.clone());
        let chunk_size = product.chunk_size.max(1);
        let delay = product.chunk_delay;
        let url = product.download_url();

        let body = futures::stream::unfold(
            (content, 0usize, Some(guard)),
            move |(content, sent, guard)| {
                let url = url.clone();
                async move {
                    let guard = guard?;
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    if fail_after.is_some_and(|limit| sent >= limit) {
                        drop(guard);
                        let err = TransportError::Body {
                            url,
                            reason: "connection reset by peer".to_string(),
                        };
                        return Some((Err(err), (content, sent, None)));
                    }
                    if sent >= content.len() {
                        return None;
                    }
                    let mut end = (sent + chunk_size).min(content.len());
                    if let Some(limit) = fail_after {
                        end = end.min(limit);
                    }
                    let chunk = content.slice(sent..end);
                    Some((Ok(chunk), (content, end, Some(guard))))
                }
            },
        )
        .boxed();

        TransportResponse::new(status, HeaderMap::new(), body)
    }
}

fn full_body(status: StatusCode, body: Bytes) -> TransportResponse {
    TransportResponse::new(
        status,
        HeaderMap::new(),
        futures::stream::iter([Ok(body)]).boxed(),
    )
}

/// A response carrying a `cause-message` header, as the catalog sends with errors.
pub fn response_with_cause(status: StatusCode, cause: &str) -> TransportResponse {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(cause) {
        headers.insert(CAUSE_MESSAGE_HEADER, value);
    }
    TransportResponse::new(status, headers, futures::stream::empty().boxed())
}

#[async_trait]
impl Transport for StubCatalog {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.respond(&request))
    }
}
