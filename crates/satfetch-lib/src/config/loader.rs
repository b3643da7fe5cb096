use super::Config;
use crate::error::SatFetchError;
use config::Config as ConfigBuilder;

pub const ENV_PREFIX: &str = "SATFETCH";

/// Reads `config_path` (YAML or TOML, by extension) when given, then applies
/// `SATFETCH__SECTION__KEY` environment overrides. Missing settings take their defaults.
pub fn load_config(config_path: Option<&str>) -> Result<Config, SatFetchError> {
    let mut config_builder = ConfigBuilder::builder();
    if let Some(config_path) = config_path {
        config_builder = config_builder.add_source(config::File::with_name(config_path));
    }
    let config_builder = config_builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    config_builder.try_deserialize().map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "catalog:\n  api_url: https://catalog.test/\n  user: alice\ndownload:\n  concurrency: 2\n  offline_timeout_secs: 600\noutput:\n  path: ./downloads"
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.catalog.api_url, "https://catalog.test/");
        assert_eq!(config.catalog.user.as_deref(), Some("alice"));
        assert_eq!(config.download.concurrency, 2);
        assert_eq!(config.download.offline_timeout_secs, Some(600));
        assert_eq!(config.download.max_attempts, 10);
        assert_eq!(
            config.output.path.as_deref(),
            Some(std::path::Path::new("./downloads"))
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(
            load_config(Some("/nonexistent/satfetch.yaml")),
            Err(SatFetchError::Config(_))
        ));
    }
}
