mod loader;
mod model;

pub use loader::{ENV_PREFIX, load_config};
pub use model::{CatalogConfig, Config, DEFAULT_API_URL, DownloadSettings, OutputConfig};
