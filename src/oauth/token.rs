//! OAuth 2.0 token representation, as stored and as sent over the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Tokens are considered expired slightly before their deadline, to
/// account for clock skew and request latency.
const EXPIRY_LEEWAY_SECS: i64 = 10;

/// One OAuth 2.0 token, together with extra per-link secrets.
///
/// The `expiry` field is an RFC-3339 UTC timestamp with second
/// precision; an empty string means the access token never expires.
/// The `raw` map carries extra secrets (e.g. a webhook signing secret)
/// that must survive token refreshes and re-exchanges.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expiry: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub raw: BTreeMap<String, String>,
}

impl OAuthToken {
    /// Parses the expiry timestamp. `None` means non-expiring
    /// (or an unparseable value, which is treated the same way).
    pub fn expiry_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.expiry)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Pure validity predicate: a non-empty access token that has not
    /// expired yet. The caller decides whether to refresh.
    pub fn is_valid(&self) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expiry_time() {
            None => true,
            Some(t) => t > Utc::now() + Duration::seconds(EXPIRY_LEEWAY_SECS),
        }
    }

    /// Fills in an absolute expiry from a relative `expires_in` value,
    /// as returned by token endpoints that omit absolute timestamps.
    pub fn set_expiry_from_relative(&mut self, expires_in: i64) {
        if self.expiry.is_empty() && expires_in > 0 {
            self.expiry = format_expiry(Utc::now() + Duration::seconds(expires_in));
        }
    }

    /// Attempts to reinterpret a stored credentials document as a
    /// token. Generic credential maps (no `access_token` key) yield
    /// `None`.
    pub fn from_stored_map(map: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        let token: OAuthToken =
            serde_json::from_value(serde_json::Value::Object(map.clone())).ok()?;
        if token.access_token.is_empty() {
            return None;
        }
        Some(token)
    }
}

/// Normalizes a timestamp to UTC RFC-3339 with second precision.
pub fn format_expiry(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Strips sub-second digits from an RFC-3339 timestamp string, e.g.
/// `2025-12-21T20:19:18.123Z` becomes `2025-12-21T20:19:18Z`.
pub fn strip_subseconds(t: &str) -> String {
    match (t.find('.'), t.ends_with('Z')) {
        (Some(dot), true) if t[dot + 1..t.len() - 1].bytes().all(|b| b.is_ascii_digit()) => {
            format!("{}Z", &t[..dot])
        }
        _ => t.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_without_expiry() {
        let token = OAuthToken {
            access_token: "a".into(),
            ..Default::default()
        };
        assert!(token.is_valid());
    }

    #[test]
    fn test_invalid_without_access_token() {
        let token = OAuthToken {
            expiry: format_expiry(Utc::now() + Duration::hours(1)),
            ..Default::default()
        };
        assert!(!token.is_valid());
    }

    #[test]
    fn test_expired_token_is_invalid() {
        let token = OAuthToken {
            access_token: "a".into(),
            expiry: "2020-01-01T00:00:00Z".into(),
            ..Default::default()
        };
        assert!(!token.is_valid());
    }

    #[test]
    fn test_future_expiry_is_valid() {
        let token = OAuthToken {
            access_token: "a".into(),
            expiry: format_expiry(Utc::now() + Duration::hours(1)),
            ..Default::default()
        };
        assert!(token.is_valid());
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let token = OAuthToken {
            access_token: "a".into(),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&token).unwrap(),
            r#"{"access_token":"a"}"#
        );
    }

    #[test]
    fn test_round_trip_preserves_expiry_exactly() {
        let token = OAuthToken {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expiry: "2025-05-17T10:11:12Z".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&token).unwrap();
        let back: OAuthToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
        assert_eq!(back.expiry, "2025-05-17T10:11:12Z");
    }

    #[test]
    fn test_from_stored_map_rejects_generic_creds() {
        let map = serde_json::from_str(r#"{"email":"a@b.c","api_token":"t"}"#).unwrap();
        assert!(OAuthToken::from_stored_map(&map).is_none());

        let map = serde_json::from_str(r#"{"access_token":"a","token_type":"Bearer"}"#).unwrap();
        let token = OAuthToken::from_stored_map(&map).unwrap();
        assert_eq!(token.access_token, "a");
        assert_eq!(token.token_type, "Bearer");
    }

    #[test]
    fn test_strip_subseconds() {
        assert_eq!(strip_subseconds("2025-12-21T20:19:18Z"), "2025-12-21T20:19:18Z");
        assert_eq!(strip_subseconds("2025-12-21T20:19:18.123Z"), "2025-12-21T20:19:18Z");
        assert_eq!(strip_subseconds("not-a-timestamp"), "not-a-timestamp");
    }
}
