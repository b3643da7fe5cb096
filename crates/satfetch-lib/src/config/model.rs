use crate::download::DownloadOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://scihub.copernicus.eu/apihub/";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub download: DownloadSettings,
    pub output: OutputConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct CatalogConfig {
    pub api_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            user: None,
            password: None,
            timeout_secs: None,
            user_agent: None,
        }
    }
}

/// File representation of [`DownloadOptions`], durations in seconds.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct DownloadSettings {
    pub concurrency: usize,
    pub catalog_concurrency: usize,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub poll_interval_secs: u64,
    pub trigger_interval_secs: u64,
    pub offline_timeout_secs: Option<u64>,
    pub batch_timeout_secs: Option<u64>,
    pub verify_checksum: bool,
    pub file_extension: String,
    pub fail_fast: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        let defaults = DownloadOptions::default();
        Self {
            concurrency: defaults.concurrency,
            catalog_concurrency: defaults.catalog_concurrency,
            max_attempts: defaults.max_attempts,
            retry_delay_secs: defaults.retry_delay.as_secs(),
            poll_interval_secs: defaults.poll_interval.as_secs(),
            trigger_interval_secs: defaults.trigger_interval.as_secs(),
            offline_timeout_secs: defaults.offline_timeout.map(|t| t.as_secs()),
            batch_timeout_secs: defaults.batch_timeout.map(|t| t.as_secs()),
            verify_checksum: defaults.verify_checksum,
            file_extension: defaults.file_extension,
            fail_fast: defaults.fail_fast,
        }
    }
}

impl DownloadSettings {
    pub fn into_options(self) -> DownloadOptions {
        DownloadOptions {
            concurrency: self.concurrency,
            catalog_concurrency: self.catalog_concurrency,
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            trigger_interval: Duration::from_secs(self.trigger_interval_secs),
            offline_timeout: self.offline_timeout_secs.map(Duration::from_secs),
            batch_timeout: self.batch_timeout_secs.map(Duration::from_secs),
            verify_checksum: self.verify_checksum,
            file_extension: self.file_extension,
            fail_fast: self.fail_fast,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutputConfig {
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_match_default_options() {
        assert_eq!(
            DownloadSettings::default().into_options(),
            DownloadOptions::default()
        );
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"catalog": {"user": "alice"}, "download": {"concurrency": 2, "batch_timeout_secs": 30, "fail_fast": true}}"#,
        )
        .unwrap();
        assert_eq!(config.catalog.api_url, DEFAULT_API_URL);
        assert_eq!(config.catalog.user.as_deref(), Some("alice"));

        let options = config.download.into_options();
        assert_eq!(options.concurrency, 2);
        assert_eq!(options.max_attempts, 10);
        assert_eq!(options.batch_timeout, Some(Duration::from_secs(30)));
        assert!(options.fail_fast);
        assert!(config.output.path.is_none());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let parsed: Result<Config, _> =
            serde_json::from_str(r#"{"download": {"paralel": 3}}"#);
        assert!(parsed.is_err());
    }
}
