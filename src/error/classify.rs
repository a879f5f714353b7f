//! Error classification.
//!
//! [`classify`] is total: every [`AuthError`] maps to exactly one
//! [`ErrorKind`]. Message rules are checked in a fixed priority order, with
//! refresh-token rules ahead of generic authentication rules, followed by
//! status-code fallbacks and finally `Unknown`.

use once_cell::sync::Lazy;
use regex::Regex;

use super::auth::AuthError;
use super::kind::ErrorKind;
use crate::traits::HttpError;

struct Rule {
    kind: ErrorKind,
    pattern: Regex,
}

fn rule(kind: ErrorKind, pattern: &str) -> Rule {
    Rule {
        kind,
        pattern: Regex::new(pattern).expect("Invalid classifier rule pattern"),
    }
}

/// Message rules in priority order. First match wins.
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            ErrorKind::RefreshTokenInvalid,
            r"(?i)invalid refresh token|refresh[_ ]token[_ ](not[_ ]found|already[_ ]used|revoked|expired|invalid)|refresh token is (invalid|expired|revoked)",
        ),
        rule(
            ErrorKind::Network,
            r"(?i)network|fetch failed|failed to fetch|timed? ?out|connection (refused|reset|closed|failed)|econnrefused|econnreset|enotfound|dns|unreachable|service unavailable|bad gateway|offline",
        ),
        rule(
            ErrorKind::Authentication,
            r"(?i)invalid login credentials|invalid credentials|not authenticated|unauthori[sz]ed|invalid_grant|email not confirmed|email_not_confirmed|auth session missing|session (not found|missing|expired)|session_not_found|user not found|user_not_found",
        ),
        rule(
            ErrorKind::Token,
            r"(?i)\bjwt\b|bad_jwt|token (is )?(expired|malformed|invalid)|invalid token|malformed token|signature|invalid claims?",
        ),
        rule(
            ErrorKind::Permission,
            r"(?i)permission denied|forbidden|not allowed|insufficient (privileges|permissions|tier)|row-level security|access denied|requires (an )?(upgrade|elevated)",
        ),
        rule(
            ErrorKind::Database,
            r"(?i)database|relation .+ does not exist|postgres|pgrst|duplicate key|violates .*constraint|could not serialize|deadlock",
        ),
        rule(
            ErrorKind::Validation,
            r"(?i)weak_password|password should|password must|already registered|already exists|user_already_exists|email_exists|invalid email|email_address_invalid|invalid format|is required|must be|too short|validation",
        ),
    ]
});

/// Classify an auth-core error.
pub fn classify(error: &AuthError) -> ErrorKind {
    classify_inner(error, false)
}

fn classify_inner(error: &AuthError, refresh_involved: bool) -> ErrorKind {
    match error {
        AuthError::WithContext { error, context } => {
            classify_inner(error, refresh_involved || context.refresh_token_involved)
        }
        AuthError::Provider {
            source,
            refresh_token_involved,
            ..
        } => {
            let text = match source.code {
                Some(ref code) => format!("{} {}", source.message, code),
                None => source.message.clone(),
            };
            classify_message(&text, source.status, refresh_involved || *refresh_token_involved)
        }
        AuthError::ExchangeService {
            status, message, ..
        } => match *status {
            0 | 500..=599 => ErrorKind::Network,
            // The exchange service rejecting the provider token is a token
            // problem, not a sign-out condition.
            401 => ErrorKind::Token,
            403 => ErrorKind::Permission,
            _ => classify_message(message, Some(*status), false),
        },
        AuthError::ExchangeUnavailable(_) => ErrorKind::Network,
        AuthError::Profile(err) => match classify_message(&err.message, None, false) {
            kind @ (ErrorKind::Permission | ErrorKind::Network) => kind,
            _ => match err.status {
                Some(401) | Some(403) => ErrorKind::Permission,
                Some(0) | Some(408) | Some(429) | Some(502..=504) => ErrorKind::Network,
                _ => ErrorKind::Database,
            },
        },
        AuthError::Http(err) => classify_http(err, refresh_involved),
        AuthError::InvalidToken(_) => ErrorKind::Token,
        AuthError::OperationInProgress
        | AuthError::CodeAlreadyUsed
        | AuthError::MissingCodeVerifier => ErrorKind::Validation,
        AuthError::NotAuthenticated | AuthError::LinkRejected { .. } => {
            ErrorKind::Authentication
        }
        AuthError::Failed(outcome) => outcome.kind,
        AuthError::Storage(_)
        | AuthError::InvalidResponse(_)
        | AuthError::Superseded
        | AuthError::Abandoned
        | AuthError::Config(_) => ErrorKind::Unknown,
    }
}

fn classify_http(error: &HttpError, refresh_involved: bool) -> ErrorKind {
    if error.is_unreachable() {
        return ErrorKind::Network;
    }
    match error {
        HttpError::ServerError { status, message } => {
            classify_message(message, Some(*status), refresh_involved)
        }
        HttpError::Other(message) => classify_message(message, None, refresh_involved),
        _ => ErrorKind::Unknown,
    }
}

/// Classify a raw message with optional status code.
///
/// `refresh_involved` marks failures of a call that presented a refresh
/// token; a 400/401 from such a call means the refresh token itself is bad.
pub fn classify_message(message: &str, status: Option<u16>, refresh_involved: bool) -> ErrorKind {
    if refresh_involved && matches!(status, Some(400) | Some(401)) {
        return ErrorKind::RefreshTokenInvalid;
    }

    if let Some(rule) = RULES.iter().find(|r| r.pattern.is_match(message)) {
        return rule.kind;
    }

    match status {
        Some(0) | Some(408) | Some(429) | Some(500..=599) => ErrorKind::Network,
        Some(401) => ErrorKind::Authentication,
        Some(403) => ErrorKind::Permission,
        Some(400) | Some(409) | Some(422) => ErrorKind::Validation,
        _ => ErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorContext;
    use crate::traits::{ProfileStoreError, ProviderError, StorageError};

    #[test]
    fn test_refresh_patterns_precede_authentication() {
        // Matches both the refresh and the generic auth rules.
        let msg = "Invalid Refresh Token: Refresh Token Not Found (unauthorized)";
        assert_eq!(
            classify_message(msg, Some(401), false),
            ErrorKind::RefreshTokenInvalid
        );
        assert_eq!(
            classify_message("unauthorized", Some(401), false),
            ErrorKind::Authentication
        );
    }

    #[test]
    fn test_refresh_context_upgrades_auth_status() {
        assert_eq!(
            classify_message("Bad request", Some(400), true),
            ErrorKind::RefreshTokenInvalid
        );
        assert_eq!(
            classify_message("Bad request", Some(400), false),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_message_rules() {
        let cases = [
            ("Failed to fetch", ErrorKind::Network),
            ("request timed out", ErrorKind::Network),
            ("Invalid login credentials", ErrorKind::Authentication),
            ("Email not confirmed", ErrorKind::Authentication),
            ("invalid JWT: token is expired", ErrorKind::Token),
            ("permission denied for table profiles", ErrorKind::Permission),
            ("new row violates row-level security policy", ErrorKind::Permission),
            ("relation \"profiles\" does not exist", ErrorKind::Database),
            ("Password should be at least 6 characters", ErrorKind::Validation),
            ("User already registered", ErrorKind::Validation),
            ("something odd happened", ErrorKind::Unknown),
        ];
        for (msg, expected) in cases {
            assert_eq!(classify_message(msg, None, false), expected, "{msg}");
        }
    }

    #[test]
    fn test_status_fallbacks() {
        assert_eq!(classify_message("", Some(503), false), ErrorKind::Network);
        assert_eq!(classify_message("", Some(429), false), ErrorKind::Network);
        assert_eq!(classify_message("", Some(401), false), ErrorKind::Authentication);
        assert_eq!(classify_message("", Some(403), false), ErrorKind::Permission);
        assert_eq!(classify_message("", Some(422), false), ErrorKind::Validation);
        assert_eq!(classify_message("", Some(418), false), ErrorKind::Unknown);
        assert_eq!(classify_message("", None, false), ErrorKind::Unknown);
    }

    #[test]
    fn test_provider_code_participates() {
        let err = AuthError::provider(
            "sign_up",
            ProviderError::new("Unable to process request")
                .with_status(422)
                .with_code("user_already_exists"),
        );
        assert_eq!(classify(&err), ErrorKind::Validation);
    }

    #[test]
    fn test_provider_refresh_flag() {
        let err = AuthError::provider_refresh(
            "refresh_session",
            ProviderError::new("Bad Request").with_status(400),
        );
        assert_eq!(classify(&err), ErrorKind::RefreshTokenInvalid);
    }

    #[test]
    fn test_context_refresh_flag_propagates() {
        let err = AuthError::Http(HttpError::ServerError {
            status: 401,
            message: "Unauthorized".to_string(),
        })
        .with_context(ErrorContext::new("refresh_session").with_refresh_token());
        assert_eq!(classify(&err), ErrorKind::RefreshTokenInvalid);
    }

    #[test]
    fn test_exchange_errors_never_authentication() {
        let unavailable = AuthError::ExchangeUnavailable("connection refused".to_string());
        assert_eq!(classify(&unavailable), ErrorKind::Network);

        let rejected = AuthError::ExchangeService {
            action: "exchange".to_string(),
            status: 401,
            message: "Unauthorized".to_string(),
        };
        assert_eq!(classify(&rejected), ErrorKind::Token);

        let down = AuthError::ExchangeService {
            action: "refresh".to_string(),
            status: 502,
            message: "Bad gateway".to_string(),
        };
        assert_eq!(classify(&down), ErrorKind::Network);
    }

    #[test]
    fn test_profile_errors_default_to_database() {
        let err: AuthError = ProfileStoreError::new("unexpected response", Some(500)).into();
        assert_eq!(classify(&err), ErrorKind::Database);

        let err: AuthError =
            ProfileStoreError::new("permission denied for table profiles", Some(403)).into();
        assert_eq!(classify(&err), ErrorKind::Permission);

        let err: AuthError = ProfileStoreError::new("connection reset", None).into();
        assert_eq!(classify(&err), ErrorKind::Network);
    }

    #[test]
    fn test_total_over_variants() {
        let errors = vec![
            AuthError::Storage(StorageError::Other("x".to_string())),
            AuthError::InvalidResponse("x".to_string()),
            AuthError::InvalidToken("x".to_string()),
            AuthError::OperationInProgress,
            AuthError::Superseded,
            AuthError::Abandoned,
            AuthError::NotAuthenticated,
            AuthError::CodeAlreadyUsed,
            AuthError::MissingCodeVerifier,
            AuthError::Config("x".to_string()),
            AuthError::Http(HttpError::Cancelled),
            AuthError::Http(HttpError::ConnectionFailed("x".to_string())),
        ];
        for err in errors {
            let kind = classify(&err);
            assert!(ErrorKind::ALL.contains(&kind), "{err:?}");
        }
        assert_eq!(
            classify(&AuthError::Http(HttpError::ConnectionFailed("x".to_string()))),
            ErrorKind::Network
        );
    }
}
