//! CLI module for civic-auth-doctor.
//!
//! Argument parsing and the diagnostics run behind the binary:
//!
//! ```ignore
//! use civic_auth::cli::{parse_args, run_diagnostics, CliCommand};
//!
//! if let CliCommand::Diagnose { json } = parse_args(std::env::args()) {
//!     let passed = run_diagnostics(json).await?;
//!     std::process::exit(if passed { 0 } else { 1 });
//! }
//! ```

pub mod args;
pub mod version;

pub use args::{parse_args, CliCommand, USAGE};
pub use version::{version_line, VERSION};

use color_eyre::Result;
use tracing::{info, warn};

use crate::auth::AuthSessionController;
use crate::config::AuthConfig;
use crate::diagnostics::{
    probe_environment, DiagnosticReport, DiagnosticsHarness, ProbeResult, PROBE_ENV,
};

/// Run every probe and print the report. Returns whether all checks passed.
pub async fn run_diagnostics(json: bool) -> Result<bool> {
    let report = match AuthConfig::from_env() {
        Ok(config) => {
            info!(provider = %config.provider_url, "Running diagnostics");
            let controller = AuthSessionController::from_config(config)?;
            DiagnosticsHarness::for_controller(&controller).run().await
        }
        Err(e) => {
            warn!("Configuration unusable, skipping remote probes: {}", e);
            let env = probe_environment();
            let probe = if env.passed() {
                ProbeResult::fail(PROBE_ENV, e.to_string(), None)
            } else {
                env
            };
            DiagnosticReport::from_probes(vec![probe])
        }
    };
    print_report(&report, json)?;
    Ok(report.passed)
}

fn print_report(report: &DiagnosticReport, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        println!();
        print!("{}", report.render_text());
    }
    Ok(())
}
