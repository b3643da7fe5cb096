use satfetch_lib::cli::{ResolvedCommand, parse_args, resolve_command, run_check, run_download};
use satfetch_lib::error::SatFetchError;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), SatFetchError> {
    color_eyre::install()?;

    let args = parse_args();
    let command = resolve_command(args.command)?;

    match command {
        ResolvedCommand::Download(params) => {
            run_download(params).await?;
        }
        ResolvedCommand::Check(params) => run_check(params).await?,
    }

    Ok(())
}
