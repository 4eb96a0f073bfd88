//! Thrippy manages authentication configurations and secret tokens for
//! third-party (3P) services. It supports both static and OAuth 2.0
//! credentials, and is designed to be both simple and secure.

use anyhow::Result;
use clap::Parser;
use thrippy::config::{Cli, Config};
use thrippy::links::LinkStore;
use thrippy::secrets::SecretsManager;
use thrippy::{http, rpc, tls};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.dev);

    if cli.dev {
        warn!("********** DEV MODE - UNSAFE IN PRODUCTION! **********");
    }

    let config = Config::resolve(cli)?;

    // Fatal startup checks: storage selection and TLS material.
    let sm = SecretsManager::from_config(&config).await?;
    let server_tls = tls::server_credentials(&config)?;
    let client_tls = tls::client_credentials(&config)?;

    let links = LinkStore::new(sm);
    rpc::start_server(&config.grpc_addr, links, server_tls).await?;

    http::run(&config, client_tls).await
}

fn init_tracing(dev: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| if dev { "thrippy=debug" } else { "thrippy=info" }.into());

    if dev {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    }
}
