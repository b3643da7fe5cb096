use crate::catalog::ItemId;
use crate::config::CatalogConfig;
use crate::download::DownloadOptions;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DownloadParams {
    pub catalog: CatalogConfig,
    pub ids: Vec<ItemId>,
    pub output_dir: PathBuf,
    pub options: DownloadOptions,
}

#[derive(Debug, Clone)]
pub struct CheckParams {
    pub catalog: CatalogConfig,
    pub ids: Vec<ItemId>,
    pub directory: PathBuf,
    pub file_extension: String,
    pub delete: bool,
}
