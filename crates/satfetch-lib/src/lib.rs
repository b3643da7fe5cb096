pub mod catalog;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod orchestrator;
pub mod retrieval;
pub mod transport;
pub mod verification;

pub use catalog::{Catalog, Endpoints, Item, ItemId};
pub use config::Config;
pub use download::{DownloadOptions, DownloadOutcome, FailureReason};
pub use error::SatFetchError;
pub use orchestrator::{AggregateResult, CancelHandle, Orchestrator};
