//! gRPC transport implementing the `ThrippyService` defined in
//! `thrippy.v1`.

pub mod client;
pub mod convert;
mod service;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;
use tonic::transport::{Server, ServerTlsConfig};
use tracing::{error, info};

use crate::links::LinkStore;

/// Generated protobuf types for the `thrippy.v1` package.
pub mod proto {
    tonic::include_proto!("thrippy.v1");
}

/// gRPC implementation of the `thrippy.v1.ThrippyService` service.
pub struct ThrippyGrpc {
    pub(crate) links: LinkStore,
}

impl ThrippyGrpc {
    /// Creates a new gRPC service backed by the given link store.
    pub fn new(links: LinkStore) -> Self {
        Self { links }
    }

    /// Builds a [`tonic`] router for this service, with optional
    /// TLS/mTLS transport credentials.
    pub fn into_router(self, tls: Option<ServerTlsConfig>) -> Result<Router> {
        let mut builder = Server::builder();
        if let Some(tls) = tls {
            builder = builder
                .tls_config(tls)
                .context("failed to configure gRPC server TLS")?;
        }
        Ok(builder.add_service(proto::thrippy_service_server::ThrippyServiceServer::new(self)))
    }
}

/// Starts the gRPC server on the given address and returns the bound
/// address. Non-blocking: serving continues on a background task so
/// that the OAuth webhook server can run alongside it.
pub async fn start_server(
    addr: &str,
    links: LinkStore,
    tls: Option<ServerTlsConfig>,
) -> Result<SocketAddr> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to listen on gRPC address {addr}"))?;
    let bound = listener.local_addr()?;

    let router = ThrippyGrpc::new(links).into_router(tls)?;
    tokio::spawn(async move {
        if let Err(e) = router
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
        {
            error!(error = %e, "gRPC serving error");
        }
    });

    info!(address = %bound, "gRPC server listening");
    Ok(bound)
}
