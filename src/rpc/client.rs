//! Minimal gRPC client wrappers used by the OAuth webhook server to
//! talk to the link service. These facilitate code reuse, not a
//! complete native layer on top of the service.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tonic::transport::{Channel, ClientTlsConfig};
use tonic::Code;

use super::convert::{oauth_config_from_proto, oauth_token_to_proto};
use super::proto;
use crate::oauth::{OAuthConfig, OAuthToken};

const TIMEOUT: Duration = Duration::from_secs(3);

pub type ThrippyClient = proto::thrippy_service_client::ThrippyServiceClient<Channel>;

/// Creates a gRPC client connection to the given address. It supports
/// both secure and insecure connections, based on the given
/// credentials.
pub async fn connect(addr: &str, tls: Option<ClientTlsConfig>) -> Result<ThrippyClient> {
    let scheme = if tls.is_some() { "https" } else { "http" };
    let mut endpoint = Channel::from_shared(format!("{scheme}://{addr}"))
        .context("invalid gRPC address")?
        .timeout(TIMEOUT)
        .connect_timeout(TIMEOUT);

    if let Some(tls) = tls {
        endpoint = endpoint
            .tls_config(tls)
            .context("failed to configure gRPC client TLS")?;
    }

    let channel = endpoint
        .connect()
        .await
        .context("failed to connect to gRPC server")?;
    Ok(ThrippyClient::new(channel))
}

/// Returns the OAuth configuration for a given link ID. gRPC errors and
/// invalid OAuth configurations are reported, but a missing link or a
/// link without an OAuth configuration yields `None`.
pub async fn link_oauth_config(
    client: &mut ThrippyClient,
    link_id: &str,
) -> Result<Option<OAuthConfig>> {
    let resp = match client
        .get_link(proto::GetLinkRequest {
            link_id: link_id.to_string(),
        })
        .await
    {
        Ok(resp) => resp.into_inner(),
        Err(status) if status.code() == Code::NotFound => return Ok(None),
        Err(status) => return Err(anyhow!("GetLink error: {status}")),
    };

    let Some(config) = resp.oauth_config.map(oauth_config_from_proto) else {
        return Ok(None);
    };
    if config.client_id.is_empty() || config.client_secret.is_empty() {
        return Err(anyhow!("empty OAuth client ID and/or secret"));
    }

    Ok(Some(config))
}

/// Persists an exchanged OAuth token via the link service, which also
/// runs the template's credential check and rotates the nonce.
pub async fn set_oauth_creds(
    client: &mut ThrippyClient,
    link_id: &str,
    token: &OAuthToken,
) -> Result<()> {
    client
        .set_credentials(proto::SetCredentialsRequest {
            link_id: link_id.to_string(),
            generic_creds: HashMap::new(),
            token: Some(oauth_token_to_proto(token)),
        })
        .await
        .map_err(|status| anyhow!("SetCredentials error: {status}"))?;
    Ok(())
}

/// Records a GitHub app installation on a link: merges the installation
/// ID and API base URL into the link's existing credentials, then
/// writes them back (which re-runs the JWT check with the install ID).
pub async fn add_github_creds(
    client: &mut ThrippyClient,
    link_id: &str,
    install_id: &str,
    api_base_url: &str,
) -> Result<()> {
    let resp = client
        .get_credentials(proto::GetCredentialsRequest {
            link_id: link_id.to_string(),
        })
        .await
        .map_err(|status| anyhow!("GetCredentials error: {status}"))?;

    let mut creds = resp.into_inner().credentials;
    creds.insert("install_id".to_string(), install_id.to_string());
    creds.insert("api_base_url".to_string(), api_base_url.to_string());

    client
        .set_credentials(proto::SetCredentialsRequest {
            link_id: link_id.to_string(),
            generic_creds: creds,
            token: None,
        })
        .await
        .map_err(|status| anyhow!("SetCredentials error: {status}"))?;
    Ok(())
}
