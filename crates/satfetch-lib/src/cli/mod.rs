mod args;
mod check;
mod commands;
mod download;
mod params;
mod resolved_command;

pub use args::{Args, Command, parse_args};
pub use check::run_check;
pub use commands::build_catalog;
pub use download::run_download;
pub use params::{CheckParams, DownloadParams};
pub use resolved_command::{ResolvedCommand, resolve_command};
