use crate::cli::CheckParams;
use crate::cli::commands::build_catalog;
use crate::error::SatFetchError;
use crate::verification::check_files;

pub async fn run_check(params: CheckParams) -> Result<(), SatFetchError> {
    let CheckParams {
        catalog,
        ids,
        directory,
        file_extension,
        delete,
    } = params;

    let catalog = build_catalog(&catalog)?;
    tracing::info!(
        "Checking {} products in {}",
        ids.len(),
        directory.display()
    );
    let corrupt = check_files(&catalog, &ids, &directory, &file_extension, delete).await?;

    for file in &corrupt {
        tracing::warn!(id = %file.item.id, path = %file.path.display(), "Corrupt: {}", file.problem);
    }
    if !corrupt.is_empty() {
        return Err(SatFetchError::CorruptFiles {
            count: corrupt.len(),
        });
    }
    tracing::info!("All {} product files are intact", ids.len());
    Ok(())
}
