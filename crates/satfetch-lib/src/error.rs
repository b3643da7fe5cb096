use crate::catalog::CatalogError;
use crate::orchestrator::{BatchStatus, OrchestrationError, Summary};
use crate::transport::TransportError;
use crate::verification::VerificationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SatFetchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error("Verification error: {0}")]
    Verification(#[from] VerificationError),

    #[error("Invalid catalog URL {url}: {reason}")]
    InvalidApiUrl { url: String, reason: String },

    #[error("Invalid arguments: {details}")]
    CliArgumentValidation { details: String },

    #[error(
        "Batch {status:?}: {} of {} products downloaded ({} failed, {} given up, {} cancelled, {} skipped)",
        .summary.succeeded,
        .summary.total(),
        .summary.failed,
        .summary.given_up,
        .summary.cancelled,
        .summary.skipped
    )]
    IncompleteBatch { status: BatchStatus, summary: Summary },

    #[error("{count} corrupt or missing product files")]
    CorruptFiles { count: usize },

    #[error("Unexpected error: {0}")]
    Unexpected(#[from] eyre::Report),
}
