//! `ThrippyService` trait implementation — all gRPC request handlers.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tonic::{Request, Response, Status};
use tracing::{debug, error, warn};

use super::convert::{
    cred_fields_to_proto, oauth_config_from_proto, oauth_config_to_proto, oauth_token_from_proto,
};
use super::{proto, ThrippyGrpc};
use crate::id;
use crate::links::{RECORD_CREDS, RECORD_META, RECORD_OAUTH, RECORD_TEMPLATE};
use crate::oauth::{OAuthConfig, OAuthToken};
use crate::templates::{self, ValidatorContext};

/// The only `raw` keys promoted into the top-level credentials map, so
/// that extra secrets can never shadow standard OAuth token fields.
const PROMOTED_RAW_KEYS: &[&str] = &["signing_secret", "webhook_secret"];

#[tonic::async_trait]
impl proto::thrippy_service_server::ThrippyService for ThrippyGrpc {
    async fn create_link(
        &self,
        request: Request<proto::CreateLinkRequest>,
    ) -> Result<Response<proto::CreateLinkResponse>, Status> {
        let req = request.into_inner();
        let link_id = id::new_id();
        debug!(grpc_handler = "CreateLink", link_id = %link_id, "received gRPC request");

        let template_id = req.template;
        let Some(template) = templates::get(&template_id) else {
            warn!(template = %template_id, "invalid template");
            return Err(Status::invalid_argument("invalid template"));
        };

        let mut oauth = req.oauth_config.map(oauth_config_from_proto);
        if let Some(o) = oauth.as_mut() {
            templates::modify_oauth_by_template(o, &template_id);
            if !o.auth_url.is_empty() && o.client_id.is_empty() {
                warn!("missing OAuth client ID");
                return Err(Status::invalid_argument("missing OAuth client ID"));
            }
        }

        self.links
            .write(&link_id, RECORD_TEMPLATE, &template_id)
            .await
            .map_err(|e| {
                error!(error = %e, "secrets manager write error");
                Status::internal("secrets manager write error")
            })?;

        // Save the parsed OAuth configuration, if there is one.
        if let Some(mut o) = oauth.filter(OAuthConfig::is_usable) {
            o.rotate_nonce();
            self.write_oauth_record(&link_id, &o).await?;
        }

        Ok(Response::new(proto::CreateLinkResponse {
            link_id,
            credential_fields: cred_fields_to_proto(template.cred_fields()),
        }))
    }

    async fn get_link(
        &self,
        request: Request<proto::GetLinkRequest>,
    ) -> Result<Response<proto::GetLinkResponse>, Status> {
        let link_id = request.into_inner().link_id;
        debug!(grpc_handler = "GetLink", link_id = %link_id, "received gRPC request");
        validate_id(&link_id)?;

        let (template_id, oauth) = self.template_and_oauth(&link_id).await?;
        let credential_fields = templates::get(&template_id)
            .map(|t| cred_fields_to_proto(t.cred_fields()))
            .unwrap_or_default();

        Ok(Response::new(proto::GetLinkResponse {
            template: template_id,
            oauth_config: oauth.as_ref().map(oauth_config_to_proto),
            credential_fields,
        }))
    }

    async fn delete_link(
        &self,
        request: Request<proto::DeleteLinkRequest>,
    ) -> Result<Response<proto::DeleteLinkResponse>, Status> {
        let req = request.into_inner();
        let link_id = req.link_id;
        debug!(grpc_handler = "DeleteLink", link_id = %link_id, "received gRPC request");
        validate_id(&link_id)?;

        let template_id = self
            .links
            .read(&link_id, RECORD_TEMPLATE)
            .await
            .map_err(|e| {
                error!(error = %e, "secrets manager read error");
                Status::internal("secrets manager read error")
            })?;

        if template_id.is_empty() {
            if req.allow_missing {
                return Ok(Response::new(proto::DeleteLinkResponse {}));
            }
            warn!("link not found");
            return Err(Status::not_found("link not found"));
        }

        self.links.delete(&link_id).await.map_err(|e| {
            error!(error = %e, "secrets manager delete error");
            Status::internal("secrets manager delete error")
        })?;

        Ok(Response::new(proto::DeleteLinkResponse {}))
    }

    async fn set_credentials(
        &self,
        request: Request<proto::SetCredentialsRequest>,
    ) -> Result<Response<proto::SetCredentialsResponse>, Status> {
        let req = request.into_inner();
        let link_id = req.link_id;
        debug!(grpc_handler = "SetCredentials", link_id = %link_id, "received gRPC request");
        validate_id(&link_id)?;

        let (template_id, oauth) = self.template_and_oauth(&link_id).await?;

        // OAuth-based links: rotate the nonce, now that the old one was
        // used successfully. This invalidates any in-flight consent
        // redirect that embedded it.
        let oauth = match oauth {
            Some(mut o) if o.is_usable() => {
                o.rotate_nonce();
                self.write_oauth_record(&link_id, &o).await?;
                Some(o)
            }
            other => other,
        };

        // Credentials to store: either an OAuth token or a generic
        // string map. For OAuth tokens, carry over extra secrets that
        // were stored before this (re-)exchange.
        let generic: BTreeMap<String, String> = req.generic_creds.into_iter().collect();
        let mut token = req.token.map(oauth_token_from_proto);
        if template_id.contains("oauth") {
            match token.as_mut() {
                None => {
                    token = Some(OAuthToken {
                        raw: generic.clone(),
                        ..Default::default()
                    });
                }
                Some(t) => {
                    if let Some(stored) = self.stored_raw(&link_id).await {
                        t.raw.extend(stored);
                    }
                }
            }
        }

        let creds_json = serialize_creds(&token, &generic).map_err(|e| {
            error!(error = %e, "failed to serialize credentials");
            Status::internal("secrets manager parse error")
        })?;

        // Check the usability of the provided credentials and retrieve
        // their metadata before anything is persisted.
        let template = templates::get(&template_id).ok_or_else(|| {
            error!(template = %template_id, "stored template is not in the registry");
            Status::internal("invalid template")
        })?;
        let metadata = template
            .validate(ValidatorContext {
                creds: generic,
                oauth,
                token,
            })
            .await
            .map_err(|e| {
                error!(error = %e, "failed to check credentials / extract metadata");
                Status::internal(format!("credentials check error: {e}"))
            })?;

        self.links
            .write(&link_id, RECORD_CREDS, &creds_json)
            .await
            .map_err(|e| {
                error!(error = %e, "secrets manager write error");
                Status::internal("secrets manager write error")
            })?;

        if !metadata.is_empty() {
            self.links
                .write(&link_id, RECORD_META, &metadata)
                .await
                .map_err(|e| {
                    error!(error = %e, "secrets manager write error");
                    Status::internal("secrets manager write error")
                })?;
        }

        Ok(Response::new(proto::SetCredentialsResponse {}))
    }

    async fn get_credentials(
        &self,
        request: Request<proto::GetCredentialsRequest>,
    ) -> Result<Response<proto::GetCredentialsResponse>, Status> {
        let link_id = request.into_inner().link_id;
        debug!(grpc_handler = "GetCredentials", link_id = %link_id, "received gRPC request");

        let mut stored = self.secrets_map(&link_id, RECORD_CREDS).await?;

        // Refresh the OAuth token, if needed. A failed refresh is
        // logged and the stale credentials are returned unchanged; the
        // caller can always start a fresh flow.
        if let Some(token) = OAuthToken::from_stored_map(&stored) {
            if !token.is_valid() {
                match self.refresh_oauth_token(&link_id, &token).await {
                    Ok(updated) => stored = updated,
                    Err(e) => warn!(error = %e, link_id = %link_id, "failed to refresh OAuth token"),
                }
            }
        }

        let mut credentials = BTreeMap::new();
        for (key, value) in &stored {
            if key != "raw" {
                credentials.insert(key.clone(), stringify(value));
                continue;
            }

            // Flatten extra secrets from an OAuth token's "raw" map,
            // but only whitelisted keys, to prevent overwriting.
            let Value::Object(raw) = value else { continue };
            for promoted in PROMOTED_RAW_KEYS {
                if let Some(Value::String(s)) = raw.get(*promoted) {
                    credentials.insert((*promoted).to_string(), s.clone());
                }
            }
        }

        Ok(Response::new(proto::GetCredentialsResponse {
            credentials: credentials.into_iter().collect(),
        }))
    }

    async fn get_metadata(
        &self,
        request: Request<proto::GetMetadataRequest>,
    ) -> Result<Response<proto::GetMetadataResponse>, Status> {
        let link_id = request.into_inner().link_id;
        debug!(grpc_handler = "GetMetadata", link_id = %link_id, "received gRPC request");

        let stored = self.secrets_map(&link_id, RECORD_META).await?;
        let metadata = stored
            .iter()
            .map(|(k, v)| (k.clone(), stringify(v)))
            .collect();

        Ok(Response::new(proto::GetMetadataResponse { metadata }))
    }
}

impl ThrippyGrpc {
    /// Reads the `template` and `oauth` records of a link. An empty
    /// `template` record means the link does not exist.
    async fn template_and_oauth(
        &self,
        link_id: &str,
    ) -> Result<(String, Option<OAuthConfig>), Status> {
        let template_id = self
            .links
            .read(link_id, RECORD_TEMPLATE)
            .await
            .map_err(|e| {
                error!(error = %e, "secrets manager read error");
                Status::internal("secrets manager read error")
            })?;
        if template_id.is_empty() {
            warn!(link_id = %link_id, "link not found");
            return Err(Status::not_found("link not found"));
        }

        let oauth_json = self.links.read(link_id, RECORD_OAUTH).await.map_err(|e| {
            error!(error = %e, "secrets manager read error");
            Status::internal("secrets manager read error")
        })?;

        let oauth = if oauth_json.is_empty() {
            None
        } else {
            Some(OAuthConfig::from_json(&oauth_json).map_err(|e| {
                error!(error = %e, "failed to parse stored OAuth config");
                Status::internal("secrets manager parse error")
            })?)
        };

        Ok((template_id, oauth))
    }

    async fn write_oauth_record(&self, link_id: &str, oauth: &OAuthConfig) -> Result<(), Status> {
        let json = oauth.to_json().map_err(|e| {
            error!(error = %e, "failed to serialize OAuth config");
            Status::internal("secrets manager parse error")
        })?;
        self.links
            .write(link_id, RECORD_OAUTH, &json)
            .await
            .map_err(|e| {
                error!(error = %e, "secrets manager write error");
                Status::internal("secrets manager write error")
            })
    }

    /// Retrieves the `raw` map from an OAuth token stored in the
    /// secrets manager, to preserve extra secrets alongside new tokens.
    /// Returns `None` on any error, or if there are no extra secrets.
    async fn stored_raw(&self, link_id: &str) -> Option<BTreeMap<String, String>> {
        let json = self.links.read(link_id, RECORD_CREDS).await.ok()?;
        let stored: Map<String, Value> = serde_json::from_str(&json).ok()?;

        let Value::Object(raw) = stored.get("raw")? else {
            return None;
        };
        Some(
            raw.iter()
                .map(|(k, v)| (k.clone(), stringify(v)))
                .collect(),
        )
    }

    /// Validates the link ID, then reads and parses one of its records
    /// as a JSON object. An empty record parses as an empty object.
    async fn secrets_map(&self, link_id: &str, record: &str) -> Result<Map<String, Value>, Status> {
        validate_id(link_id)?;

        let json = self.links.read(link_id, record).await.map_err(|e| {
            error!(error = %e, "secrets manager read error");
            Status::internal("secrets manager read error")
        })?;
        if json.is_empty() {
            return Ok(Map::new());
        }

        serde_json::from_str(&json).map_err(|e| {
            error!(error = %e, "failed to parse stored record as JSON");
            Status::internal("secrets manager parse error")
        })
    }

    /// Exchanges an expired token's refresh token for a new access
    /// token, re-inlines the preserved `raw` map, and rewrites the
    /// stored credentials.
    async fn refresh_oauth_token(
        &self,
        link_id: &str,
        token: &OAuthToken,
    ) -> Result<Map<String, Value>, Status> {
        let oauth_json = self.links.read(link_id, RECORD_OAUTH).await.map_err(|e| {
            error!(error = %e, "secrets manager read error");
            Status::internal("secrets manager read error")
        })?;
        let oauth = OAuthConfig::from_json(&oauth_json).map_err(|e| {
            error!(error = %e, "failed to parse stored OAuth config");
            Status::internal("secrets manager parse error")
        })?;

        let mut refreshed = oauth.refresh_token(token, false).await.map_err(|e| {
            warn!(error = %e, "failed to refresh OAuth token");
            Status::internal("OAuth token refresh error")
        })?;

        if let Some(raw) = self.stored_raw(link_id).await {
            refreshed.raw = raw;
        }

        let json = serde_json::to_string(&refreshed).map_err(|e| {
            error!(error = %e, "failed to serialize refreshed token");
            Status::internal("secrets manager parse error")
        })?;
        self.links
            .write(link_id, RECORD_CREDS, &json)
            .await
            .map_err(|e| {
                error!(error = %e, "secrets manager write error");
                Status::internal("secrets manager write error")
            })?;

        match serde_json::from_str(&json) {
            Ok(map) => Ok(map),
            Err(e) => {
                error!(error = %e, "failed to reparse refreshed token");
                Err(Status::internal("secrets manager parse error"))
            }
        }
    }
}

fn validate_id(link_id: &str) -> Result<(), Status> {
    if link_id.is_empty() {
        warn!("missing ID");
        return Err(Status::invalid_argument("missing ID"));
    }
    if let Err(e) = id::validate(link_id) {
        warn!(error = %e, "invalid ID");
        return Err(Status::invalid_argument("invalid ID"));
    }
    Ok(())
}

/// Serializes the credentials payload: the token if it carries
/// anything, the generic map otherwise.
fn serialize_creds(
    token: &Option<OAuthToken>,
    generic: &BTreeMap<String, String>,
) -> serde_json::Result<String> {
    if let Some(token) = token {
        let json = serde_json::to_string(token)?;
        if json.len() > 2 {
            return Ok(json);
        }
    }
    serde_json::to_string(generic)
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
