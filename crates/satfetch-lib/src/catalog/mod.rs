mod odata;
mod probe;
mod types;

pub use probe::Availability;
pub use types::{
    Checksum, ChecksumAlgorithm, Item, ItemId, OnlineStatus, UnsupportedAlgorithm,
    sanitize_filename,
};

use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};
use reqwest::StatusCode;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Invalid credentials for {url}")]
    Unauthorized { url: String },

    #[error("Product {id} not found")]
    NotFound { id: ItemId },

    #[error("HTTP status {status} from {url}: {message}")]
    Server {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Invalid metadata for product {id}: {reason}")]
    InvalidMetadata { id: ItemId, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CatalogError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CatalogError::Unauthorized { .. })
    }
}

/// URL layout of an OData product catalog rooted at `api_url`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    api_url: Url,
}

impl Endpoints {
    pub fn new(api_url: &str) -> Result<Self, url::ParseError> {
        let normalized = if api_url.ends_with('/') {
            api_url.to_string()
        } else {
            format!("{api_url}/")
        };
        Ok(Self {
            api_url: Url::parse(&normalized)?,
        })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn product_url(&self, id: &ItemId) -> String {
        self.join(&format!("odata/v1/Products('{id}')?$format=json"))
    }

    pub fn download_url(&self, id: &ItemId) -> String {
        self.join(&format!("odata/v1/Products('{id}')/$value"))
    }

    fn join(&self, path: &str) -> String {
        match self.api_url.join(path) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.api_url, path),
        }
    }
}

/// Metadata access to the catalog. Cheap to clone.
#[derive(Clone)]
pub struct Catalog {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
}

impl Catalog {
    pub fn new(transport: Arc<dyn Transport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Fetches size, checksum, title, download URL and the catalog's online flag.
    pub async fn resolve(&self, id: &ItemId) -> Result<Item, CatalogError> {
        let url = self.endpoints.product_url(id);
        tracing::debug!(id = %id, url = %url, "Fetching product metadata");
        let response = self.transport.send(TransportRequest::get(&url)).await?;

        match response.status {
            status if status.is_success() => {
                let body = response.bytes().await?;
                odata::parse_product(&body, self.endpoints.download_url(id)).map_err(|reason| {
                    CatalogError::InvalidMetadata {
                        id: id.clone(),
                        reason,
                    }
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(CatalogError::Unauthorized { url })
            }
            StatusCode::NOT_FOUND => Err(CatalogError::NotFound { id: id.clone() }),
            status => Err(server_error(url, status, response).await),
        }
    }
}

async fn server_error(url: String, status: StatusCode, response: TransportResponse) -> CatalogError {
    let cause = response.cause_message().map(str::to_string);
    let message = match cause {
        Some(cause) => cause,
        None => response
            .bytes()
            .await
            .ok()
            .and_then(|body| odata::parse_error_message(&body))
            .unwrap_or_else(|| "Invalid API response.".to_string()),
    };
    CatalogError::Server {
        url,
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_add_trailing_slash() {
        let endpoints = Endpoints::new("https://catalog.test/apihub").unwrap();
        let id = ItemId::from("abc");
        assert_eq!(
            endpoints.product_url(&id),
            "https://catalog.test/apihub/odata/v1/Products('abc')?$format=json"
        );
        assert_eq!(
            endpoints.download_url(&id),
            "https://catalog.test/apihub/odata/v1/Products('abc')/$value"
        );
    }

    #[test]
    fn test_endpoints_reject_invalid_url() {
        assert!(Endpoints::new("not a url").is_err());
    }
}
