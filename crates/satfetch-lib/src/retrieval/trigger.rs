use super::ledger::RetrievalLedger;
use crate::catalog::Item;
use crate::transport::{ByteRange, Transport, TransportRequest, is_concurrent_flow_limit};
use reqwest::StatusCode;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The archive accepted the staging request.
    Accepted,
    /// The item turned out to be retrievable already.
    AlreadyOnline,
    /// A trigger for this item was sent less than the minimum interval ago; nothing was sent.
    AlreadyTriggered,
    Rejected(RejectReason),
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    #[error("user quota exceeded: {cause}")]
    QuotaExceeded { cause: String },

    #[error("invalid credentials")]
    Unauthorized,

    #[error("request not accepted: {cause}")]
    NotAccepted { cause: String },

    #[error("network error: {reason}")]
    Network { reason: String },

    #[error("unexpected response {status}: {cause}")]
    Unexpected { status: u16, cause: String },
}

impl RejectReason {
    /// Rejections worth another attempt at the next polling round.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RejectReason::NotAccepted { .. } | RejectReason::Network { .. }
        )
    }
}

/// Requests staging of archived items, at most once per ledger interval per item.
pub struct OfflineTrigger {
    transport: Arc<dyn Transport>,
    ledger: Arc<RetrievalLedger>,
}

impl OfflineTrigger {
    pub fn new(transport: Arc<dyn Transport>, ledger: Arc<RetrievalLedger>) -> Self {
        Self { transport, ledger }
    }

    pub async fn trigger(&self, item: &Item) -> TriggerOutcome {
        let Some(attempt) = self.ledger.try_begin(&item.id, Instant::now()) else {
            tracing::trace!(id = %item.id, "Retrieval triggered recently, not sending another request");
            return TriggerOutcome::AlreadyTriggered;
        };

        // Requesting zero bytes makes the server fail, so ask for two.
        let request =
            TransportRequest::get(&item.download_url).with_range(ByteRange::bounded(0, 1));
        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(err) => {
                let outcome = TriggerOutcome::Rejected(RejectReason::Network {
                    reason: err.to_string(),
                });
                self.release_if_transient(item, &outcome);
                return outcome;
            }
        };

        let cause = response.cause_message().unwrap_or_default().to_string();
        let outcome = match response.status {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => TriggerOutcome::AlreadyOnline,
            StatusCode::ACCEPTED => TriggerOutcome::Accepted,
            StatusCode::FORBIDDEN if is_concurrent_flow_limit(Some(&cause)) => {
                TriggerOutcome::AlreadyOnline
            }
            StatusCode::FORBIDDEN => {
                TriggerOutcome::Rejected(RejectReason::QuotaExceeded { cause })
            }
            StatusCode::UNAUTHORIZED => TriggerOutcome::Rejected(RejectReason::Unauthorized),
            StatusCode::SERVICE_UNAVAILABLE => {
                TriggerOutcome::Rejected(RejectReason::NotAccepted { cause })
            }
            status => TriggerOutcome::Rejected(RejectReason::Unexpected {
                status: status.as_u16(),
                cause,
            }),
        };

        tracing::debug!(id = %item.id, attempt, status = %response.status, ?outcome, "Triggered offline retrieval");
        self.release_if_transient(item, &outcome);
        outcome
    }

    /// A request the archive did not take does not count against the trigger interval.
    fn release_if_transient(&self, item: &Item, outcome: &TriggerOutcome) {
        if matches!(outcome, TriggerOutcome::Rejected(reason) if reason.is_transient()) {
            self.ledger.release(&item.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Checksum, ChecksumAlgorithm, ItemId, OnlineStatus};
    use crate::transport::{CAUSE_MESSAGE_HEADER, TransportError, TransportResponse};
    use async_trait::async_trait;
    use futures::StreamExt;
    use reqwest::header::{HeaderMap, HeaderValue};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers every request with the same status and cause, counting requests.
    struct Scripted {
        status: StatusCode,
        cause: Option<&'static str>,
        sent: Mutex<Vec<TransportRequest>>,
    }

    impl Scripted {
        fn new(status: StatusCode, cause: Option<&'static str>) -> Self {
            Self {
                status,
                cause,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<TransportRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.sent.lock().unwrap().push(request);
            let mut headers = HeaderMap::new();
            if let Some(cause) = self.cause {
                headers.insert(CAUSE_MESSAGE_HEADER, HeaderValue::from_static(cause));
            }
            Ok(TransportResponse::new(
                self.status,
                headers,
                futures::stream::empty().boxed(),
            ))
        }
    }

    fn item() -> Item {
        Item {
            id: ItemId::from("p1"),
            title: "p1".to_string(),
            size: 10,
            checksum: Checksum::from_hex(ChecksumAlgorithm::Md5, "00").unwrap(),
            online: OnlineStatus::Offline,
            download_url: "https://catalog.test/p1/$value".to_string(),
        }
    }

    fn trigger(transport: Arc<Scripted>) -> OfflineTrigger {
        OfflineTrigger::new(
            transport,
            Arc::new(RetrievalLedger::new(Duration::from_secs(600))),
        )
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let quota = "User 'alice' offline products retrieval quota exceeded";
        for (status, cause, expected) in [
            (StatusCode::ACCEPTED, None, TriggerOutcome::Accepted),
            (StatusCode::OK, None, TriggerOutcome::AlreadyOnline),
            (StatusCode::PARTIAL_CONTENT, None, TriggerOutcome::AlreadyOnline),
            (
                StatusCode::FORBIDDEN,
                Some("Maximum number of 4 concurrent flows achieved by the user \"alice\""),
                TriggerOutcome::AlreadyOnline,
            ),
            (
                StatusCode::FORBIDDEN,
                Some(quota),
                TriggerOutcome::Rejected(RejectReason::QuotaExceeded {
                    cause: quota.to_string(),
                }),
            ),
            (
                StatusCode::UNAUTHORIZED,
                None,
                TriggerOutcome::Rejected(RejectReason::Unauthorized),
            ),
            (
                StatusCode::SERVICE_UNAVAILABLE,
                None,
                TriggerOutcome::Rejected(RejectReason::NotAccepted {
                    cause: String::new(),
                }),
            ),
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("boom"),
                TriggerOutcome::Rejected(RejectReason::Unexpected {
                    status: 500,
                    cause: "boom".to_string(),
                }),
            ),
        ] {
            let transport = Arc::new(Scripted::new(status, cause));
            assert_eq!(trigger(transport.clone()).trigger(&item()).await, expected, "{status}");
            assert_eq!(
                transport.sent()[0].range,
                Some(ByteRange::bounded(0, 1)),
                "{status}"
            );
        }
    }

    #[tokio::test]
    async fn test_accepted_trigger_blocks_until_interval() {
        let transport = Arc::new(Scripted::new(StatusCode::ACCEPTED, None));
        let trigger = trigger(transport.clone());

        assert_eq!(trigger.trigger(&item()).await, TriggerOutcome::Accepted);
        assert_eq!(trigger.trigger(&item()).await, TriggerOutcome::AlreadyTriggered);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_archive_can_be_asked_again() {
        let transport = Arc::new(Scripted::new(StatusCode::SERVICE_UNAVAILABLE, None));
        let trigger = trigger(transport.clone());

        for _ in 0..2 {
            let outcome = trigger.trigger(&item()).await;
            assert!(
                matches!(&outcome, TriggerOutcome::Rejected(reason) if reason.is_transient()),
                "{outcome:?}"
            );
        }
        assert_eq!(transport.sent().len(), 2);
    }

    #[test]
    fn test_only_unavailability_is_transient() {
        assert!(RejectReason::Network { reason: "reset".into() }.is_transient());
        assert!(RejectReason::NotAccepted { cause: String::new() }.is_transient());
        assert!(!RejectReason::QuotaExceeded { cause: String::new() }.is_transient());
        assert!(!RejectReason::Unauthorized.is_transient());
    }
}
