//! Custom claim assembly for the token exchange.
//!
//! Claims come from three layers, later layers winning:
//! provider identity, then the cached profile, then explicit overrides.

use serde_json::Value;

use super::types::{ClaimSet, Tier, User, UserProfile};

/// Claims every enhanced token must carry.
pub const REQUIRED_CLAIMS: [&str; 2] = ["tier", "email_verified"];

/// Claims derived from the provider identity.
pub fn provider_claims(user: &User) -> ClaimSet {
    let mut claims = ClaimSet::new();
    claims.insert("sub".to_string(), Value::String(user.id.clone()));
    if let Some(ref email) = user.email {
        claims.insert("email".to_string(), Value::String(email.clone()));
    }
    claims.insert("email_verified".to_string(), Value::Bool(user.email_verified));
    claims.insert("role".to_string(), Value::String(user.role.clone()));
    claims
}

/// Claims derived from the profile. Without a profile only `tier` (free) and
/// `profile_complete` (false) are set.
pub fn profile_claims(profile: Option<&UserProfile>) -> ClaimSet {
    let mut claims = ClaimSet::new();
    let Some(profile) = profile else {
        claims.insert("tier".to_string(), Value::String(Tier::Free.as_str().to_string()));
        claims.insert("profile_complete".to_string(), Value::Bool(false));
        return claims;
    };

    claims.insert(
        "tier".to_string(),
        Value::String(profile.tier.as_str().to_string()),
    );
    let optional = [
        ("display_name", &profile.display_name),
        ("phone", &profile.phone),
        ("postal_code", &profile.postal_code),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            claims.insert(name.to_string(), Value::String(value.clone()));
        }
    }
    claims.insert("notify_email".to_string(), Value::Bool(profile.notify_email));
    claims.insert("notify_sms".to_string(), Value::Bool(profile.notify_sms));
    claims.insert(
        "profile_complete".to_string(),
        Value::Bool(profile.is_complete()),
    );
    claims
}

/// Merge `override > profile > provider`.
pub fn merge_claims(
    user: &User,
    profile: Option<&UserProfile>,
    overrides: Option<&ClaimSet>,
) -> ClaimSet {
    let mut claims = provider_claims(user);
    claims.extend(profile_claims(profile));
    if let Some(overrides) = overrides {
        claims.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    claims
}

/// Fill required claims missing from `claims` with the values in `requested`.
pub fn fill_required(claims: &mut ClaimSet, requested: &ClaimSet) {
    for name in REQUIRED_CLAIMS {
        if !claims.contains_key(name) {
            let value = requested.get(name).cloned().unwrap_or_else(|| match name {
                "tier" => Value::String(Tier::Free.as_str().to_string()),
                _ => Value::Bool(false),
            });
            claims.insert(name.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> User {
        User {
            id: "u-1".to_string(),
            email: Some("ada@example.org".to_string()),
            email_verified: true,
            role: "authenticated".to_string(),
            metadata: Value::Null,
        }
    }

    fn profile() -> UserProfile {
        UserProfile {
            id: "u-1".to_string(),
            display_name: Some("Ada".to_string()),
            tier: Tier::Elevated,
            phone: Some("555-0100".to_string()),
            postal_code: Some("94110".to_string()),
            notify_email: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_without_profile_defaults_to_free() {
        let claims = merge_claims(&user(), None, None);
        assert_eq!(claims["sub"], "u-1");
        assert_eq!(claims["tier"], "free");
        assert_eq!(claims["email_verified"], true);
        assert_eq!(claims["profile_complete"], false);
    }

    #[test]
    fn test_profile_claims_are_merged() {
        let claims = merge_claims(&user(), Some(&profile()), None);
        assert_eq!(claims["tier"], "elevated");
        assert_eq!(claims["display_name"], "Ada");
        assert_eq!(claims["notify_email"], true);
        assert_eq!(claims["notify_sms"], false);
        assert_eq!(claims["profile_complete"], true);
    }

    #[test]
    fn test_override_beats_profile_beats_provider() {
        let mut overrides = ClaimSet::new();
        overrides.insert("tier".to_string(), json!("free"));
        overrides.insert("role".to_string(), json!("moderator"));

        let mut p = profile();
        p.display_name = None;
        let claims = merge_claims(&user(), Some(&p), Some(&overrides));
        assert_eq!(claims["tier"], "free");
        assert_eq!(claims["role"], "moderator");
        assert_eq!(claims["profile_complete"], false);
        assert!(!claims.contains_key("display_name"));
    }

    #[test]
    fn test_fill_required() {
        let mut requested = ClaimSet::new();
        requested.insert("tier".to_string(), json!("elevated"));

        let mut claims = ClaimSet::new();
        claims.insert("sub".to_string(), json!("u-1"));
        fill_required(&mut claims, &requested);
        assert_eq!(claims["tier"], "elevated");
        assert_eq!(claims["email_verified"], false);

        let mut claims = ClaimSet::new();
        claims.insert("tier".to_string(), json!("free"));
        fill_required(&mut claims, &requested);
        assert_eq!(claims["tier"], "free");
    }
}
