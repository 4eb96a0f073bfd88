//! The gRPC service over the file-backed secrets provider: records
//! land in the nested TOML document and survive a provider reopen.

use std::collections::HashMap;
use std::sync::Arc;

use thrippy::links::LinkStore;
use thrippy::rpc::client::{self, ThrippyClient};
use thrippy::rpc::proto;
use thrippy::secrets::{FileStore, SecretsManager};

async fn spawn_server(path: std::path::PathBuf) -> anyhow::Result<ThrippyClient> {
    let store = FileStore::at_path(path)?;
    let sm = SecretsManager::new(Arc::new(store), "test");
    let addr = thrippy::rpc::start_server("127.0.0.1:0", LinkStore::new(sm), None).await?;
    client::connect(&addr.to_string(), None).await
}

#[tokio::test]
async fn link_records_are_nested_under_the_namespace() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("secrets.toml");
    let mut client = spawn_server(path.clone()).await?;

    let link_id = client
        .create_link(proto::CreateLinkRequest {
            template: "github-webhook".to_string(),
            oauth_config: None,
        })
        .await?
        .into_inner()
        .link_id;

    client
        .set_credentials(proto::SetCredentialsRequest {
            link_id: link_id.clone(),
            generic_creds: HashMap::from([("webhook_secret".to_string(), "hush".to_string())]),
            token: None,
        })
        .await?;

    let contents = std::fs::read_to_string(&path)?;
    let doc: toml::Table = contents.parse()?;
    let link = doc["thrippy"]["test"][link_id.as_str()].as_table().unwrap();
    assert_eq!(link["template"].as_str(), Some("github-webhook"));
    assert_eq!(link["creds"].as_str(), Some(r#"{"webhook_secret":"hush"}"#));

    Ok(())
}

#[tokio::test]
async fn links_survive_a_server_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("secrets.toml");

    let link_id = {
        let mut client = spawn_server(path.clone()).await?;
        client
            .create_link(proto::CreateLinkRequest {
                template: "gemini".to_string(),
                oauth_config: None,
            })
            .await?
            .into_inner()
            .link_id
    };

    // A second server over the same file sees the link.
    let mut client = spawn_server(path).await?;
    let resp = client
        .get_link(proto::GetLinkRequest {
            link_id: link_id.clone(),
        })
        .await?
        .into_inner();
    assert_eq!(resp.template, "gemini");

    client
        .delete_link(proto::DeleteLinkRequest {
            link_id: link_id.clone(),
            allow_missing: false,
        })
        .await?;
    let status = client
        .get_link(proto::GetLinkRequest { link_id })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::NotFound);

    Ok(())
}
