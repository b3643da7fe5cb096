use crate::catalog::ItemId;
use crate::cli::args::Command;
use crate::cli::params::{CheckParams, DownloadParams};
use crate::config::load_config;
use crate::error::SatFetchError;
use itertools::Itertools;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum ResolvedCommand {
    Download(DownloadParams),
    Check(CheckParams),
}

pub fn resolve_command(command: Command) -> Result<ResolvedCommand, SatFetchError> {
    match command {
        Command::Download {
            config_path,
            output_dir,
            concurrency,
            max_attempts,
            offline_timeout_secs,
            batch_timeout_secs,
            fail_fast,
            ids,
        } => {
            if concurrency == Some(0) {
                return Err(SatFetchError::CliArgumentValidation {
                    details: "concurrency must be greater than 0.".to_string(),
                });
            }
            if max_attempts == Some(0) {
                return Err(SatFetchError::CliArgumentValidation {
                    details: "max-attempts must be greater than 0.".to_string(),
                });
            }

            let app_config = load_config(config_path.as_deref())?;
            let output_dir = output_dir
                .map(PathBuf::from)
                .or_else(|| app_config.output.path.clone())
                .ok_or_else(|| SatFetchError::CliArgumentValidation {
                    details: "No output directory provided. Configure output.path or pass --output-dir."
                        .to_string(),
                })?;

            let mut options = app_config.download.into_options();
            if let Some(concurrency) = concurrency {
                options.concurrency = concurrency;
            }
            if let Some(max_attempts) = max_attempts {
                options.max_attempts = max_attempts;
            }
            if let Some(secs) = offline_timeout_secs {
                options.offline_timeout = Some(Duration::from_secs(secs));
            }
            if let Some(secs) = batch_timeout_secs {
                options.batch_timeout = Some(Duration::from_secs(secs));
            }
            // The flag can only switch fail-fast on; a config that enables it stays enabled.
            options.fail_fast |= fail_fast;
            let problems = options.validate();
            if !problems.is_empty() {
                return Err(SatFetchError::CliArgumentValidation {
                    details: problems.join(", "),
                });
            }

            Ok(ResolvedCommand::Download(DownloadParams {
                catalog: app_config.catalog,
                ids: parse_ids(ids)?,
                output_dir,
                options,
            }))
        }
        Command::Check {
            config_path,
            directory,
            delete,
            ids,
        } => {
            let app_config = load_config(config_path.as_deref())?;
            Ok(ResolvedCommand::Check(CheckParams {
                catalog: app_config.catalog,
                ids: parse_ids(ids)?,
                directory: PathBuf::from(directory),
                file_extension: app_config.download.file_extension,
                delete,
            }))
        }
    }
}

fn parse_ids(ids: Vec<String>) -> Result<Vec<ItemId>, SatFetchError> {
    let ids = ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unique()
        .map(ItemId::from)
        .collect::<Vec<_>>();
    if ids.is_empty() {
        return Err(SatFetchError::CliArgumentValidation {
            details: "No product ids provided.".to_string(),
        });
    }
    Ok(ids)
}
