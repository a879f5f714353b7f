//! Version string for civic-auth-doctor.

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version_line() -> String {
    format!("civic-auth-doctor {}", VERSION)
}
