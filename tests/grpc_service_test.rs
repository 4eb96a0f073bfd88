//! gRPC integration tests using a tonic client against an in-process
//! server backed by the in-memory secrets provider.

use std::collections::HashMap;

use thrippy::links::LinkStore;
use thrippy::rpc::client::{self, ThrippyClient};
use thrippy::rpc::proto;
use thrippy::secrets::SecretsManager;
use tonic::Code;

async fn spawn_server() -> anyhow::Result<ThrippyClient> {
    let links = LinkStore::new(SecretsManager::for_testing());
    let addr = thrippy::rpc::start_server("127.0.0.1:0", links, None).await?;
    client::connect(&addr.to_string(), None).await
}

fn generic_oauth_link(auth_url: &str, client_id: &str, client_secret: &str) -> proto::CreateLinkRequest {
    proto::CreateLinkRequest {
        template: "generic-oauth".to_string(),
        oauth_config: Some(proto::OAuthConfig {
            auth_url: auth_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            ..Default::default()
        }),
    }
}

#[tokio::test]
async fn grpc_create_and_get_link() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let resp = client
        .create_link(generic_oauth_link("A", "I", "S"))
        .await?
        .into_inner();
    assert_eq!(resp.link_id.len(), 22);
    assert!(resp.credential_fields.is_empty()); // generic-oauth declares none

    let resp = client
        .get_link(proto::GetLinkRequest {
            link_id: resp.link_id,
        })
        .await?
        .into_inner();
    assert_eq!(resp.template, "generic-oauth");

    let oauth = resp.oauth_config.unwrap();
    assert_eq!(oauth.auth_url, "A");
    assert_eq!(oauth.client_id, "I");
    assert_eq!(oauth.client_secret, "S");
    assert_eq!(oauth.nonce.len(), 22);

    Ok(())
}

#[tokio::test]
async fn grpc_create_link_rejects_unknown_template() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let status = client
        .create_link(proto::CreateLinkRequest {
            template: "no-such-template".to_string(),
            oauth_config: None,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "invalid template");

    Ok(())
}

#[tokio::test]
async fn grpc_create_link_rejects_oauth_without_client_id() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let status = client
        .create_link(generic_oauth_link("A", "", "S"))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "missing OAuth client ID");

    Ok(())
}

#[tokio::test]
async fn grpc_create_link_sorts_and_dedups_scopes() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let resp = client
        .create_link(proto::CreateLinkRequest {
            template: "generic-oauth".to_string(),
            oauth_config: Some(proto::OAuthConfig {
                auth_url: "A".to_string(),
                client_id: "I".to_string(),
                scopes: vec!["b".into(), "a".into(), "b".into()],
                ..Default::default()
            }),
        })
        .await?
        .into_inner();

    let resp = client
        .get_link(proto::GetLinkRequest {
            link_id: resp.link_id,
        })
        .await?
        .into_inner();
    assert_eq!(resp.oauth_config.unwrap().scopes, vec!["a", "b"]);

    Ok(())
}

#[tokio::test]
async fn grpc_invalid_and_missing_ids() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    // Malformed IDs are rejected before any storage access.
    for bad_id in ["", "111", "!@#$%^&*()!@#$%^&*()!@"] {
        let status = client
            .get_link(proto::GetLinkRequest {
                link_id: bad_id.to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument, "id: {bad_id:?}");
    }

    // A well-formed ID with no records is a missing link.
    let status = client
        .get_link(proto::GetLinkRequest {
            link_id: "AQYywDkK3hiH9FEERA3aU5".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), "link not found");

    Ok(())
}

#[tokio::test]
async fn grpc_delete_link_allow_missing() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;
    let missing_id = "AQYywDkK3hiH9FEERA3aU5".to_string();

    let status = client
        .delete_link(proto::DeleteLinkRequest {
            link_id: missing_id.clone(),
            allow_missing: false,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    client
        .delete_link(proto::DeleteLinkRequest {
            link_id: missing_id,
            allow_missing: true,
        })
        .await?;

    Ok(())
}

#[tokio::test]
async fn grpc_delete_link_removes_everything() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let link_id = client
        .create_link(generic_oauth_link("A", "I", "S"))
        .await?
        .into_inner()
        .link_id;

    client
        .delete_link(proto::DeleteLinkRequest {
            link_id: link_id.clone(),
            allow_missing: false,
        })
        .await?;

    let status = client
        .get_link(proto::GetLinkRequest {
            link_id: link_id.clone(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    // The creds record is gone too: nothing left to return.
    let creds = client
        .get_credentials(proto::GetCredentialsRequest { link_id })
        .await?
        .into_inner()
        .credentials;
    assert!(creds.is_empty());

    Ok(())
}

#[tokio::test]
async fn grpc_set_and_get_credentials_round_trip() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let link_id = client
        .create_link(generic_oauth_link("A", "I", "S"))
        .await?
        .into_inner()
        .link_id;

    client
        .set_credentials(proto::SetCredentialsRequest {
            link_id: link_id.clone(),
            generic_creds: HashMap::new(),
            token: Some(proto::OAuthToken {
                access_token: "a".to_string(),
                expiry: "2025-05-17T10:11:12Z".to_string(),
                refresh_token: "r".to_string(),
                ..Default::default()
            }),
        })
        .await?;

    // The token is expired and the refresh attempt cannot succeed (no
    // reachable token endpoint), so the stored values come back as-is.
    let creds = client
        .get_credentials(proto::GetCredentialsRequest { link_id })
        .await?
        .into_inner()
        .credentials;

    assert_eq!(creds.len(), 3);
    assert_eq!(creds["access_token"], "a");
    assert_eq!(creds["expiry"], "2025-05-17T10:11:12Z");
    assert_eq!(creds["refresh_token"], "r");

    Ok(())
}

#[tokio::test]
async fn grpc_set_credentials_rotates_nonce() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let link_id = client
        .create_link(generic_oauth_link("A", "I", "S"))
        .await?
        .into_inner()
        .link_id;

    let nonce_before = client
        .get_link(proto::GetLinkRequest {
            link_id: link_id.clone(),
        })
        .await?
        .into_inner()
        .oauth_config
        .unwrap()
        .nonce;

    client
        .set_credentials(proto::SetCredentialsRequest {
            link_id: link_id.clone(),
            generic_creds: HashMap::new(),
            token: Some(proto::OAuthToken {
                access_token: "a".to_string(),
                ..Default::default()
            }),
        })
        .await?;

    let nonce_after = client
        .get_link(proto::GetLinkRequest { link_id })
        .await?
        .into_inner()
        .oauth_config
        .unwrap()
        .nonce;

    assert_eq!(nonce_before.len(), 22);
    assert_eq!(nonce_after.len(), 22);
    assert_ne!(nonce_before, nonce_after);

    Ok(())
}

#[tokio::test]
async fn grpc_extra_secrets_survive_token_write() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let link_id = client
        .create_link(generic_oauth_link("A", "I", "S"))
        .await?
        .into_inner()
        .link_id;

    // Extra secrets are set first, as a generic map.
    client
        .set_credentials(proto::SetCredentialsRequest {
            link_id: link_id.clone(),
            generic_creds: HashMap::from([(
                "signing_secret".to_string(),
                "hush".to_string(),
            )]),
            token: None,
        })
        .await?;

    // A token write later (e.g. after the OAuth callback) must keep them.
    client
        .set_credentials(proto::SetCredentialsRequest {
            link_id: link_id.clone(),
            generic_creds: HashMap::new(),
            token: Some(proto::OAuthToken {
                access_token: "a".to_string(),
                ..Default::default()
            }),
        })
        .await?;

    let creds = client
        .get_credentials(proto::GetCredentialsRequest { link_id })
        .await?
        .into_inner()
        .credentials;
    assert_eq!(creds["access_token"], "a");
    assert_eq!(creds["signing_secret"], "hush");

    Ok(())
}

#[tokio::test]
async fn grpc_only_whitelisted_raw_keys_are_promoted() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let link_id = client
        .create_link(generic_oauth_link("A", "I", "S"))
        .await?
        .into_inner()
        .link_id;

    client
        .set_credentials(proto::SetCredentialsRequest {
            link_id: link_id.clone(),
            generic_creds: HashMap::new(),
            token: Some(proto::OAuthToken {
                access_token: "a".to_string(),
                raw: HashMap::from([
                    ("webhook_secret".to_string(), "w".to_string()),
                    ("internal_note".to_string(), "n".to_string()),
                    // Raw keys can never shadow standard fields.
                    ("access_token".to_string(), "evil".to_string()),
                ]),
                ..Default::default()
            }),
        })
        .await?;

    let creds = client
        .get_credentials(proto::GetCredentialsRequest { link_id })
        .await?
        .into_inner()
        .credentials;
    assert_eq!(creds["access_token"], "a");
    assert_eq!(creds["webhook_secret"], "w");
    assert!(!creds.contains_key("internal_note"));

    Ok(())
}

#[tokio::test]
async fn grpc_validator_errors_are_reported() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let link_id = client
        .create_link(proto::CreateLinkRequest {
            template: "slack-bot-token".to_string(),
            oauth_config: None,
        })
        .await?
        .into_inner()
        .link_id;

    // The Slack checker rejects an empty bot token before any network
    // access, and its message is surfaced to the caller.
    let status = client
        .set_credentials(proto::SetCredentialsRequest {
            link_id,
            generic_creds: HashMap::new(),
            token: None,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("credentials check error"));
    assert!(status.message().contains("missing bot token"));

    Ok(())
}

#[tokio::test]
async fn grpc_cred_fields_report_flags() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let resp = client
        .create_link(proto::CreateLinkRequest {
            template: "jira-user-token".to_string(),
            oauth_config: None,
        })
        .await?
        .into_inner();

    let names: Vec<_> = resp
        .credential_fields
        .iter()
        .map(|f| (f.name.as_str(), f.manual, f.optional))
        .collect();
    assert_eq!(
        names,
        vec![
            ("base_url", true, false),
            ("email", true, false),
            ("api_token", true, false),
        ]
    );

    let resp = client
        .create_link(proto::CreateLinkRequest {
            template: "slack-bot-token".to_string(),
            oauth_config: None,
        })
        .await?
        .into_inner();
    let names: Vec<_> = resp
        .credential_fields
        .iter()
        .map(|f| (f.name.as_str(), f.manual, f.optional))
        .collect();
    assert_eq!(
        names,
        vec![("bot_token", false, false), ("app_token", false, true)]
    );

    Ok(())
}

#[tokio::test]
async fn grpc_get_metadata_empty_by_default() -> anyhow::Result<()> {
    let mut client = spawn_server().await?;

    let link_id = client
        .create_link(generic_oauth_link("A", "I", "S"))
        .await?
        .into_inner()
        .link_id;

    let metadata = client
        .get_metadata(proto::GetMetadataRequest { link_id })
        .await?
        .into_inner()
        .metadata;
    assert!(metadata.is_empty());

    Ok(())
}
