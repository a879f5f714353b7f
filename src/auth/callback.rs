//! Redirect callback handling for the passwordless-link flow.
//!
//! The provider redirects back with either `?code=...` or
//! `?error=...&error_description=...`, in the query or the fragment.
//! Parsing never fails: missing or garbled fields are simply absent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use url::{form_urlencoded, Url};

/// Parameters found on a redirect URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// What a callback URL asks us to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Exchange(String),
    Reject {
        error: String,
        description: Option<String>,
    },
    Nothing,
}

impl CallbackParams {
    /// Parse the query and fragment of `url`. Fragment values win.
    ///
    /// Relative URLs are resolved against a placeholder origin; anything
    /// that still fails to parse yields no parameters.
    pub fn parse(url: &str) -> Self {
        let parsed = Url::parse(url).or_else(|_| Url::parse(PLACEHOLDER_ORIGIN)?.join(url));
        let Ok(parsed) = parsed else {
            return Self::default();
        };

        let mut params = Self::default();
        let fragment = parsed.fragment().map(|f| form_urlencoded::parse(f.as_bytes()));
        for (key, value) in parsed.query_pairs().chain(fragment.into_iter().flatten()) {
            let Some(value) = clean(&value) else {
                continue;
            };
            match &*key {
                "code" => params.code = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }
        params
    }

    /// An error wins over a code.
    pub fn action(&self) -> CallbackAction {
        if let Some(ref error) = self.error {
            return CallbackAction::Reject {
                error: error.clone(),
                description: self.error_description.clone(),
            };
        }
        match self.code {
            Some(ref code) => CallbackAction::Exchange(code.clone()),
            None => CallbackAction::Nothing,
        }
    }
}

const PLACEHOLDER_ORIGIN: &str = "http://localhost/";

/// Trimmed value, or `None` when empty or not valid UTF-8 once decoded.
fn clean(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.contains(char::REPLACEMENT_CHARACTER) {
        return None;
    }
    Some(value.to_string())
}

/// Liveness flag for an in-flight callback.
///
/// The view that starts the flow holds a clone and calls [`cancel`] when it
/// goes away; the controller drops the network result if the flag is down.
///
/// [`cancel`]: CallbackLiveness::cancel
#[derive(Debug, Clone)]
pub struct CallbackLiveness(Arc<AtomicBool>);

impl CallbackLiveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CallbackLiveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_code_from_query() {
        let params = CallbackParams::parse("https://app.example.org/auth/callback?code=abc-123&state=x");
        assert_eq!(params.code.as_deref(), Some("abc-123"));
        assert_eq!(params.action(), CallbackAction::Exchange("abc-123".to_string()));
    }

    #[test]
    fn test_parse_error_from_fragment() {
        let params = CallbackParams::parse(
            "https://app.example.org/auth/callback#error=access_denied&error_code=otp_expired&error_description=Email+link+is+invalid+or+has+expired",
        );
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(
            params.error_description.as_deref(),
            Some("Email link is invalid or has expired")
        );
        assert!(matches!(params.action(), CallbackAction::Reject { .. }));
    }

    #[test]
    fn test_fragment_overrides_query() {
        let params = CallbackParams::parse(
            "https://app.example.org/auth/callback?code=from-query#code=from%20fragment",
        );
        assert_eq!(params.code.as_deref(), Some("from fragment"));
    }

    #[test]
    fn test_relative_callback_path() {
        let params = CallbackParams::parse("/auth/callback?code=xyz");
        assert_eq!(params.action(), CallbackAction::Exchange("xyz".to_string()));
    }

    #[test]
    fn test_error_takes_precedence_over_code() {
        let params = CallbackParams::parse("/cb?code=abc&error=access_denied");
        assert_eq!(
            params.action(),
            CallbackAction::Reject {
                error: "access_denied".to_string(),
                description: None
            }
        );
    }

    #[test]
    fn test_garbage_is_treated_as_absent() {
        for url in ["", "/cb", "/cb?", "/cb?code=", "/cb?code", "/cb?&&=&", "/cb?code=%E0%A4%A", "#", "http://[::1"] {
            let params = CallbackParams::parse(url);
            assert_eq!(params, CallbackParams::default(), "url: {:?}", url);
            assert_eq!(params.action(), CallbackAction::Nothing);
        }
    }

    #[test]
    fn test_liveness_is_shared_between_clones() {
        let liveness = CallbackLiveness::new();
        let view = liveness.clone();
        assert!(liveness.is_alive());
        view.cancel();
        assert!(!liveness.is_alive());
    }
}
