//! Auth core configuration.
//!
//! Built from environment variables with [`AuthConfig::from_env`] or in code
//! with [`AuthConfig::new`] and the `with_*` setters.

use std::path::PathBuf;

use crate::error::{AuthError, AuthResult};
use crate::recovery::DEFAULT_HISTORY_LIMIT;

pub const ENV_PROVIDER_URL: &str = "CIVIC_AUTH_PROVIDER_URL";
pub const ENV_ANON_KEY: &str = "CIVIC_AUTH_ANON_KEY";
pub const ENV_EXCHANGE_URL: &str = "CIVIC_AUTH_EXCHANGE_URL";
pub const ENV_REDIRECT_URL: &str = "CIVIC_AUTH_REDIRECT_URL";
pub const ENV_STORAGE_DIR: &str = "CIVIC_AUTH_STORAGE_DIR";

/// Variables that must be set for [`AuthConfig::from_env`] to succeed.
pub const REQUIRED_ENV: [&str; 2] = [ENV_PROVIDER_URL, ENV_ANON_KEY];

/// Configuration for the auth core.
///
/// # Example
///
/// ```ignore
/// use civic_auth::config::AuthConfig;
///
/// let config = AuthConfig::new("https://abc.supabase.co", "anon-key")
///     .with_redirect_url("https://app.example.org/auth/callback")
///     .with_refresh_threshold_secs(120);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
    /// Identity provider / data API base URL
    pub provider_url: String,
    /// Public API key sent as `apikey`
    pub anon_key: String,
    /// Functions root hosting the exchange function (default `{provider_url}/functions/v1`)
    pub exchange_url: Option<String>,
    /// Exchange function name
    pub exchange_function: String,
    /// Profile table name
    pub profile_table: String,
    /// Where passwordless and reset links send the user back to
    pub redirect_url: Option<String>,
    /// Prefix for every persisted key
    pub storage_namespace: String,
    /// Directory for file storage (default `~/.civic-auth`)
    pub storage_dir: Option<PathBuf>,
    /// Re-check a restored session with the provider in the background
    pub revalidate_on_restore: bool,
    /// Refresh the enhanced token when it expires within this many seconds
    pub refresh_threshold_secs: u64,
    /// Size of the rolling error history
    pub history_limit: usize,
}

impl AuthConfig {
    pub fn new(provider_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            provider_url: provider_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            exchange_url: None,
            exchange_function: "jwt-exchange".to_string(),
            profile_table: "profiles".to_string(),
            redirect_url: None,
            storage_namespace: "civic.auth".to_string(),
            storage_dir: None,
            revalidate_on_restore: true,
            refresh_threshold_secs: 300,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Read configuration from `CIVIC_AUTH_*` variables.
    pub fn from_env() -> AuthResult<Self> {
        let missing = Self::missing_env();
        if !missing.is_empty() {
            return Err(AuthError::Config(format!(
                "missing environment variables: {}",
                missing.join(", ")
            )));
        }

        let mut config = Self::new(
            env_value(ENV_PROVIDER_URL).unwrap_or_default(),
            env_value(ENV_ANON_KEY).unwrap_or_default(),
        );
        config.exchange_url = env_value(ENV_EXCHANGE_URL);
        config.redirect_url = env_value(ENV_REDIRECT_URL);
        config.storage_dir = env_value(ENV_STORAGE_DIR).map(PathBuf::from);
        config.validate()?;
        Ok(config)
    }

    /// Required variables that are unset or blank.
    pub fn missing_env() -> Vec<&'static str> {
        REQUIRED_ENV
            .iter()
            .copied()
            .filter(|name| env_value(name).is_none())
            .collect()
    }

    pub fn validate(&self) -> AuthResult<()> {
        for (name, url) in [
            ("provider_url", Some(self.provider_url.as_str())),
            ("exchange_url", self.exchange_url.as_deref()),
        ] {
            if let Some(url) = url {
                if !(url.starts_with("https://") || url.starts_with("http://")) {
                    return Err(AuthError::Config(format!(
                        "{} must be an http(s) URL, got {:?}",
                        name, url
                    )));
                }
            }
        }
        if self.anon_key.trim().is_empty() {
            return Err(AuthError::Config("anon_key must not be empty".to_string()));
        }
        if self.storage_namespace.is_empty() || self.storage_namespace.starts_with('.') {
            return Err(AuthError::Config(format!(
                "invalid storage namespace {:?}",
                self.storage_namespace
            )));
        }
        Ok(())
    }

    /// Functions root for the exchange service.
    pub fn exchange_base_url(&self) -> String {
        match self.exchange_url {
            Some(ref url) => url.trim_end_matches('/').to_string(),
            None => format!("{}/functions/v1", self.provider_url),
        }
    }

    pub fn with_exchange_url(mut self, url: impl Into<String>) -> Self {
        self.exchange_url = Some(url.into());
        self
    }

    pub fn with_exchange_function(mut self, name: impl Into<String>) -> Self {
        self.exchange_function = name.into();
        self
    }

    pub fn with_profile_table(mut self, table: impl Into<String>) -> Self {
        self.profile_table = table.into();
        self
    }

    pub fn with_redirect_url(mut self, url: impl Into<String>) -> Self {
        self.redirect_url = Some(url.into());
        self
    }

    pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = namespace.into();
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn with_revalidate_on_restore(mut self, revalidate: bool) -> Self {
        self.revalidate_on_restore = revalidate;
        self
    }

    pub fn with_refresh_threshold_secs(mut self, secs: u64) -> Self {
        self.refresh_threshold_secs = secs;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            ENV_PROVIDER_URL,
            ENV_ANON_KEY,
            ENV_EXCHANGE_URL,
            ENV_REDIRECT_URL,
            ENV_STORAGE_DIR,
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_defaults() {
        let config = AuthConfig::new("https://abc.example.org/", "anon");
        assert_eq!(config.provider_url, "https://abc.example.org");
        assert_eq!(
            config.exchange_base_url(),
            "https://abc.example.org/functions/v1"
        );
        assert_eq!(config.exchange_function, "jwt-exchange");
        assert_eq!(config.profile_table, "profiles");
        assert_eq!(config.storage_namespace, "civic.auth");
        assert_eq!(config.refresh_threshold_secs, 300);
        assert_eq!(config.history_limit, 50);
        assert!(config.revalidate_on_restore);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_validation() {
        let config = AuthConfig::new("https://abc.example.org", "anon")
            .with_exchange_url("https://fn.example.org/v1/")
            .with_storage_namespace(".hidden");
        assert_eq!(config.exchange_base_url(), "https://fn.example.org/v1");
        assert!(config.validate().is_err());

        let config = AuthConfig::new("ftp://abc.example.org", "anon");
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_reports_missing_variables() {
        clear_env();
        std::env::set_var(ENV_ANON_KEY, "anon");
        assert_eq!(AuthConfig::missing_env(), vec![ENV_PROVIDER_URL]);

        let err = AuthConfig::from_env().unwrap_err();
        assert!(err.to_string().contains(ENV_PROVIDER_URL));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_reads_optional_variables() {
        clear_env();
        std::env::set_var(ENV_PROVIDER_URL, "https://abc.example.org");
        std::env::set_var(ENV_ANON_KEY, "anon");
        std::env::set_var(ENV_REDIRECT_URL, "https://app.example.org/cb");
        std::env::set_var(ENV_STORAGE_DIR, "/tmp/civic-auth-test");
        std::env::set_var(ENV_EXCHANGE_URL, "   ");

        let config = AuthConfig::from_env().unwrap();
        assert_eq!(config.redirect_url.as_deref(), Some("https://app.example.org/cb"));
        assert_eq!(config.storage_dir, Some(PathBuf::from("/tmp/civic-auth-test")));
        assert!(config.exchange_url.is_none());
        assert!(AuthConfig::missing_env().is_empty());
        clear_env();
    }
}
