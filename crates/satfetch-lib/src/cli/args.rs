use clap::{ArgAction, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Download {
        config_path: Option<String>,
        output_dir: Option<String>,
        concurrency: Option<usize>,
        max_attempts: Option<u32>,
        offline_timeout_secs: Option<u64>,
        batch_timeout_secs: Option<u64>,
        fail_fast: bool,
        ids: Vec<String>,
    },
    Check {
        config_path: Option<String>,
        directory: String,
        delete: bool,
        ids: Vec<String>,
    },
}

pub struct Args {
    pub command: Command,
    pub log_level: Level,
}

#[derive(Debug, Parser)]
#[command(
    name = "satfetch",
    version,
    about = "Download satellite imagery products from an OData catalog, including products that have to be retrieved from the long term archive first"
)]
struct Cli {
    #[arg(
        short = 'v',
        long = "verbose",
        help = "Sets the level of verbosity",
        action = ArgAction::Count,
        global = true
    )]
    verbose: u8,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Download products, requesting retrieval of archived ones
    Download {
        #[arg(
            short = 'c',
            long = "config",
            value_name = "FILE",
            help = "Sets a custom config file (YAML or TOML)"
        )]
        config: Option<String>,

        #[arg(
            short = 'o',
            long = "output-dir",
            value_name = "DIR",
            help = "Overrides the download directory from output.path"
        )]
        output_dir: Option<String>,

        #[arg(
            long = "concurrency",
            value_name = "N",
            help = "Maximum number of simultaneous downloads"
        )]
        concurrency: Option<usize>,

        #[arg(
            long = "max-attempts",
            value_name = "N",
            help = "Maximum download attempts per product"
        )]
        max_attempts: Option<u32>,

        #[arg(
            long = "offline-timeout",
            value_name = "SECS",
            help = "Give up on a product that stays offline for this long"
        )]
        offline_timeout: Option<u64>,

        #[arg(
            long = "batch-timeout",
            value_name = "SECS",
            help = "Stop the whole batch after this long"
        )]
        batch_timeout: Option<u64>,

        #[arg(
            long = "fail-fast",
            help = "Cancel the remaining downloads when one product fails"
        )]
        fail_fast: bool,

        #[arg(value_name = "ID", required = true, help = "Product ids")]
        ids: Vec<String>,
    },

    /// Verify size and checksum of previously downloaded products
    Check {
        #[arg(
            short = 'c',
            long = "config",
            value_name = "FILE",
            help = "Sets a custom config file (YAML or TOML)"
        )]
        config: Option<String>,

        #[arg(
            short = 'd',
            long = "directory",
            value_name = "DIR",
            help = "Directory containing the product files"
        )]
        directory: String,

        #[arg(long = "delete", help = "Delete corrupt product files")]
        delete: bool,

        #[arg(value_name = "ID", required = true, help = "Product ids")]
        ids: Vec<String>,
    },
}

impl From<CliCommand> for Command {
    fn from(command: CliCommand) -> Self {
        match command {
            CliCommand::Download {
                config,
                output_dir,
                concurrency,
                max_attempts,
                offline_timeout,
                batch_timeout,
                fail_fast,
                ids,
            } => Command::Download {
                config_path: config,
                output_dir,
                concurrency,
                max_attempts,
                offline_timeout_secs: offline_timeout,
                batch_timeout_secs: batch_timeout,
                fail_fast,
                ids,
            },
            CliCommand::Check {
                config,
                directory,
                delete,
                ids,
            } => Command::Check {
                config_path: config,
                directory,
                delete,
                ids,
            },
        }
    }
}

pub fn parse_args() -> Args {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let mut env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    if let Ok(directive) = "hyper_util=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_env_filter(env_filter)
        .init();

    Args {
        command: cli.command.into(),
        log_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(args).unwrap().command.into()
    }

    #[test]
    fn test_parse_download() {
        assert_eq!(
            parse(&[
                "satfetch",
                "download",
                "-o",
                "out",
                "--concurrency",
                "2",
                "--offline-timeout",
                "3600",
                "--fail-fast",
                "a",
                "b"
            ]),
            Command::Download {
                config_path: None,
                output_dir: Some("out".to_string()),
                concurrency: Some(2),
                max_attempts: None,
                offline_timeout_secs: Some(3600),
                batch_timeout_secs: None,
                fail_fast: true,
                ids: vec!["a".to_string(), "b".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_check() {
        assert_eq!(
            parse(&["satfetch", "-v", "check", "-d", "out", "--delete", "a"]),
            Command::Check {
                config_path: None,
                directory: "out".to_string(),
                delete: true,
                ids: vec!["a".to_string()],
            }
        );
    }

    #[test]
    fn test_ids_are_required() {
        assert!(Cli::try_parse_from(["satfetch", "download"]).is_err());
    }
}
