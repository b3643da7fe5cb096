use crate::cli::DownloadParams;
use crate::cli::commands::build_catalog;
use crate::download::DownloadOutcome;
use crate::error::SatFetchError;
use crate::orchestrator::{AggregateResult, Orchestrator};
use itertools::Itertools;
use tracing;

pub async fn run_download(params: DownloadParams) -> Result<AggregateResult, SatFetchError> {
    let DownloadParams {
        catalog,
        ids,
        output_dir,
        options,
    } = params;

    let catalog = build_catalog(&catalog)?;
    let orchestrator = Orchestrator::new(catalog, options)?;

    let cancel = orchestrator.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping downloads. Partial files are kept for resuming.");
            cancel.cancel();
        }
    });

    tracing::info!(
        "Downloading {} products to {}",
        ids.len(),
        output_dir.display()
    );
    let result = orchestrator.download_ids(ids, &output_dir).await;
    interrupt.abort();
    let result = result?;

    for (id, report) in result.items.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        match &report.outcome {
            DownloadOutcome::Succeeded { path, .. } => {
                tracing::info!(id = %id, path = %path.display(), "Downloaded");
            }
            DownloadOutcome::Failed(reason) => {
                tracing::warn!(id = %id, terminal = ?report.terminal, attempts = report.attempts, "Failed: {reason}");
            }
            DownloadOutcome::Skipped(reason) => {
                tracing::warn!(id = %id, "Skipped: {reason}");
            }
        }
    }

    if !result.is_complete() {
        return Err(SatFetchError::IncompleteBatch {
            status: result.status,
            summary: result.summary,
        });
    }
    tracing::info!("All {} products downloaded", result.summary.succeeded);
    Ok(result)
}
