use crate::catalog::{Catalog, Endpoints};
use crate::config::CatalogConfig;
use crate::error::SatFetchError;
use crate::transport::{ReqwestTransport, TransportSettings};
use std::sync::Arc;
use std::time::Duration;

/// Builds an authenticated catalog client from the `catalog` config section.
pub fn build_catalog(config: &CatalogConfig) -> Result<Catalog, SatFetchError> {
    let endpoints =
        Endpoints::new(&config.api_url).map_err(|e| SatFetchError::InvalidApiUrl {
            url: config.api_url.clone(),
            reason: e.to_string(),
        })?;

    let mut settings = TransportSettings {
        user: config.user.clone(),
        password: config.password.clone(),
        timeout: config.timeout_secs.map(Duration::from_secs),
        ..Default::default()
    };
    if let Some(user_agent) = &config.user_agent {
        settings.user_agent = user_agent.clone();
    }
    if settings.user.is_none() {
        tracing::warn!(api_url = %config.api_url, "No catalog credentials configured");
    }

    let transport = ReqwestTransport::new(settings)?;
    Ok(Catalog::new(Arc::new(transport), endpoints))
}
