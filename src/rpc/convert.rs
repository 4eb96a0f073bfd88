//! Conversions between wire-protocol messages and native types.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use super::proto;
use crate::oauth::{format_expiry, OAuthConfig, OAuthToken};
use crate::templates::CredField;

pub fn oauth_config_from_proto(p: proto::OAuthConfig) -> OAuthConfig {
    OAuthConfig {
        auth_url: p.auth_url,
        token_url: p.token_url,
        auth_style: p.auth_style,
        client_id: p.client_id,
        client_secret: p.client_secret,
        scopes: p.scopes,
        auth_codes: sorted(p.auth_codes),
        params: sorted(p.params),
        nonce: p.nonce,
        redirect_url: String::new(),
    }
}

pub fn oauth_config_to_proto(c: &OAuthConfig) -> proto::OAuthConfig {
    proto::OAuthConfig {
        auth_url: c.auth_url.clone(),
        token_url: c.token_url.clone(),
        auth_style: c.auth_style,
        client_id: c.client_id.clone(),
        client_secret: c.client_secret.clone(),
        scopes: c.scopes.clone(),
        auth_codes: c.auth_codes.clone().into_iter().collect(),
        params: c.params.clone().into_iter().collect(),
        nonce: c.nonce.clone(),
    }
}

/// Converts a wire token into the native type, normalizing the expiry
/// timestamp to UTC RFC-3339 with second precision.
pub fn oauth_token_from_proto(p: proto::OAuthToken) -> OAuthToken {
    let expiry = match DateTime::parse_from_rfc3339(&p.expiry) {
        Ok(t) => format_expiry(t.with_timezone(&Utc)),
        Err(_) => String::new(),
    };

    OAuthToken {
        access_token: p.access_token,
        token_type: p.token_type,
        refresh_token: p.refresh_token,
        expiry,
        raw: sorted(p.raw),
    }
}

pub fn oauth_token_to_proto(t: &OAuthToken) -> proto::OAuthToken {
    proto::OAuthToken {
        access_token: t.access_token.clone(),
        token_type: t.token_type.clone(),
        refresh_token: t.refresh_token.clone(),
        expiry: t.expiry.clone(),
        raw: t.raw.clone().into_iter().collect(),
    }
}

pub fn cred_fields_to_proto(fields: Vec<CredField>) -> Vec<proto::CredentialField> {
    fields
        .into_iter()
        .map(|f| proto::CredentialField {
            name: f.name,
            manual: f.manual,
            optional: f.optional,
        })
        .collect()
}

fn sorted(m: HashMap<String, String>) -> BTreeMap<String, String> {
    m.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_config_round_trip() {
        let p = proto::OAuthConfig {
            auth_url: "a".into(),
            token_url: "t".into(),
            auth_style: 2,
            client_id: "i".into(),
            client_secret: "s".into(),
            scopes: vec!["x".into(), "y".into()],
            auth_codes: HashMap::from([("access_type".to_string(), "offline".to_string())]),
            params: HashMap::from([("base_url".to_string(), "https://ghes".to_string())]),
            nonce: "n".into(),
        };

        let native = oauth_config_from_proto(p.clone());
        assert_eq!(native.auth_url, "a");
        assert_eq!(native.params["base_url"], "https://ghes");

        let back = oauth_config_to_proto(&native);
        assert_eq!(back, p);
    }

    #[test]
    fn test_token_expiry_is_normalized_to_utc() {
        let p = proto::OAuthToken {
            access_token: "a".into(),
            expiry: "2025-05-17T12:11:12+02:00".into(),
            ..Default::default()
        };
        let token = oauth_token_from_proto(p);
        assert_eq!(token.expiry, "2025-05-17T10:11:12Z");
    }

    #[test]
    fn test_token_bad_expiry_becomes_empty() {
        let p = proto::OAuthToken {
            access_token: "a".into(),
            expiry: "yesterday".into(),
            ..Default::default()
        };
        assert_eq!(oauth_token_from_proto(p).expiry, "");
    }
}
