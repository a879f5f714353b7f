use civic_auth::cli::{parse_args, run_diagnostics, version_line, CliCommand, USAGE};

use color_eyre::Result;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CIVIC_AUTH_LOG";
const DEFAULT_LOG: &str = "civic_auth=info";

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    match parse_args(std::env::args()) {
        CliCommand::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        CliCommand::Version => {
            println!("{}", version_line());
            Ok(())
        }
        CliCommand::Invalid(arg) => {
            eprintln!("Unknown argument: {}\n\n{}", arg, USAGE);
            std::process::exit(2);
        }
        CliCommand::Diagnose { json } => {
            init_tracing();
            if !run_diagnostics(json).await? {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
