use super::{Catalog, CatalogError, Item};
use crate::transport::{ByteRange, TransportRequest, is_concurrent_flow_limit};
use reqwest::StatusCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    Online,
    Offline,
}

impl Catalog {
    /// Asks the download endpoint whether the item can be retrieved right now.
    ///
    /// The catalog's own online flag is occasionally wrong, so the live status code is treated
    /// as authoritative. Transport failures count as offline for this round; only invalid
    /// credentials are reported as an error.
    pub async fn probe(&self, item: &Item) -> Result<Availability, CatalogError> {
        let url = &item.download_url;
        let response = match self.transport.send(TransportRequest::head(url)).await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(id = %item.id, error = %err, "Probe failed, assuming offline");
                return Ok(Availability::Offline);
            }
        };

        let response = if matches!(
            response.status,
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
        ) {
            let request = TransportRequest::get(url).with_range(ByteRange::bounded(0, 0));
            match self.transport.send(request).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::debug!(id = %item.id, error = %err, "Ranged probe failed, assuming offline");
                    return Ok(Availability::Offline);
                }
            }
        } else {
            response
        };

        let availability = classify_probe(response.status, response.cause_message(), url)?;
        tracing::debug!(id = %item.id, status = %response.status, ?availability, "Probed product");
        Ok(availability)
    }
}

fn classify_probe(
    status: StatusCode,
    cause: Option<&str>,
    url: &str,
) -> Result<Availability, CatalogError> {
    match status {
        StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(Availability::Online),
        StatusCode::UNAUTHORIZED => Err(CatalogError::Unauthorized {
            url: url.to_string(),
        }),
        StatusCode::FORBIDDEN if is_concurrent_flow_limit(cause) => Ok(Availability::Online),
        // 202 means retrieval from the archive is pending; 404-class and
        // server errors mean the content is not retrievable right now.
        _ => Ok(Availability::Offline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_statuses_are_online() {
        for status in [StatusCode::OK, StatusCode::PARTIAL_CONTENT] {
            assert_eq!(classify_probe(status, None, "u"), Ok(Availability::Online));
        }
    }

    #[test]
    fn test_pending_and_missing_content_is_offline() {
        for status in [
            StatusCode::ACCEPTED,
            StatusCode::NOT_FOUND,
            StatusCode::GONE,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::FORBIDDEN,
        ] {
            assert_eq!(classify_probe(status, None, "u"), Ok(Availability::Offline));
        }
    }

    #[test]
    fn test_concurrent_flow_limit_is_online() {
        let cause = "Maximum number of 4 concurrent flows achieved by the user \"alice\"";
        assert_eq!(
            classify_probe(StatusCode::FORBIDDEN, Some(cause), "u"),
            Ok(Availability::Online)
        );
    }

    #[test]
    fn test_unauthorized_is_an_error() {
        assert!(
            classify_probe(StatusCode::UNAUTHORIZED, None, "u")
                .unwrap_err()
                .is_unauthorized()
        );
    }
}
