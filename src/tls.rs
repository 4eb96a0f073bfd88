//! Transport credentials for the gRPC server and client.
//!
//! Three modes, selected by which PEM files are configured:
//!
//! | Mode     | Server side               | Client side               |
//! |----------|---------------------------|---------------------------|
//! | insecure | nothing (`--dev` only)    | nothing (`--dev` only)    |
//! | TLS      | server cert + key         | server CA cert            |
//! | mTLS     | + client CA cert          | + client cert + key       |
//!
//! Missing required files abort process start with a logged error.

use std::fs;

use anyhow::{bail, Context, Result};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};
use tracing::info;

use crate::config::Config;

/// Builds the gRPC server's transport credentials. `None` means an
/// insecure server, which is allowed only in dev mode.
pub fn server_credentials(config: &Config) -> Result<Option<ServerTlsConfig>> {
    if config.dev {
        return Ok(None);
    }

    // The server's X.509 PEM-encoded public cert and private key are
    // required for both TLS and mTLS.
    let Some(cert_path) = &config.grpc_server_cert else {
        bail!("missing server public cert file for gRPC server with m/TLS");
    };
    let Some(key_path) = &config.grpc_server_key else {
        bail!("missing server private key file for gRPC server with m/TLS");
    };

    let cert = read_pem(cert_path, "server public cert")?;
    let key = read_pem(key_path, "server private key")?;
    let mut tls = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));

    // A client CA cert upgrades the server from TLS to mTLS: client
    // certificates are then required and verified.
    match &config.grpc_client_ca_cert {
        Some(ca_path) => {
            let ca = read_pem(ca_path, "client CA cert")?;
            tls = tls.client_ca_root(Certificate::from_pem(ca));
            info!(cert = %cert_path, key = %key_path, client_ca = %ca_path, "using gRPC server with mTLS");
        }
        None => {
            info!(cert = %cert_path, key = %key_path, "using gRPC server with TLS");
        }
    }

    Ok(Some(tls))
}

/// Builds the transport credentials for gRPC clients (the OAuth
/// webhook server talking back to the service). `None` means an
/// insecure connection, which is allowed only in dev mode.
pub fn client_credentials(config: &Config) -> Result<Option<ClientTlsConfig>> {
    if config.dev {
        return Ok(None);
    }

    // The server's CA cert is required either way (on many Linux
    // systems, "/etc/ssl/cert.pem" contains the system-wide root CAs).
    let Some(ca_path) = &config.grpc_server_ca_cert else {
        bail!("missing server CA cert file for gRPC client with m/TLS");
    };

    // Using mTLS requires the client's PEM-encoded public cert and
    // private key. If only one of them is set it's an error; if both
    // are missing, plain TLS is used.
    let pair = match (&config.grpc_client_cert, &config.grpc_client_key) {
        (Some(cert), Some(key)) => Some((cert, key)),
        (Some(_), None) => bail!("missing client private key file for gRPC client with mTLS"),
        (None, Some(_)) => bail!("missing client public cert file for gRPC client with mTLS"),
        (None, None) => None,
    };

    let ca = read_pem(ca_path, "server CA cert")?;
    let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca));

    if let Some(name) = &config.grpc_server_name_override {
        tls = tls.domain_name(name.clone());
    }

    let Some((cert_path, key_path)) = pair else {
        info!(server_ca = %ca_path, "using gRPC client with TLS");
        return Ok(Some(tls));
    };

    let cert = read_pem(cert_path, "client public cert")?;
    let key = read_pem(key_path, "client private key")?;
    tls = tls.identity(Identity::from_pem(cert, key));

    info!(server_ca = %ca_path, cert = %cert_path, key = %key_path, "using gRPC client with mTLS");
    Ok(Some(tls))
}

fn read_pem(path: &str, what: &str) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {what} file {path}"))
}
