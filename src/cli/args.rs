//! Command-line argument parsing for civic-auth-doctor.

/// Parsed CLI command to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Show usage
    Help,
    /// Show version information
    Version,
    /// Run the diagnostics (default)
    Diagnose { json: bool },
    /// An argument we do not understand
    Invalid(String),
}

pub const USAGE: &str = "\
Usage: civic-auth-doctor [--json] [--help]

Checks the auth configuration and the reachability of the identity
provider, token-exchange service and profile store.

Options:
  --json         Print the report as JSON
  -h, --help     Show this help
  -V, --version  Show version

Environment:
  CIVIC_AUTH_PROVIDER_URL   Identity provider base URL (required)
  CIVIC_AUTH_ANON_KEY       Public API key (required)
  CIVIC_AUTH_EXCHANGE_URL   Functions root for the token exchange
  CIVIC_AUTH_REDIRECT_URL   Redirect target for sign-in links
  CIVIC_AUTH_STORAGE_DIR    Session storage directory
  CIVIC_AUTH_LOG            Log filter (default civic_auth=info)";

/// Parse command-line arguments and return the appropriate command.
///
/// # Examples
///
/// ```
/// use civic_auth::cli::args::{parse_args, CliCommand};
///
/// let args = vec!["civic-auth-doctor".to_string(), "--json".to_string()];
/// assert_eq!(parse_args(args.into_iter()), CliCommand::Diagnose { json: true });
/// ```
pub fn parse_args<I>(args: I) -> CliCommand
where
    I: Iterator<Item = String>,
{
    let mut json = false;
    // Skip the program name
    for arg in args.skip(1) {
        match arg.as_str() {
            "--help" | "-h" => return CliCommand::Help,
            "--version" | "-V" => return CliCommand::Version,
            "--json" => json = true,
            _ => return CliCommand::Invalid(arg),
        }
    }
    CliCommand::Diagnose { json }
}
