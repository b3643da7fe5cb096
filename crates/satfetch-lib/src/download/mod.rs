pub mod download;
pub mod partial;
pub mod types;

pub use download::Downloader;
pub use partial::{PARTIAL_SUFFIX, partial_path};
pub use types::{DownloadOptions, DownloadOutcome, FailureReason, SkipReason};
