//! Runtime configuration.
//!
//! Settings are layered, highest precedence first: command-line flags,
//! environment variables (`THRIPPY_*`, `AWS_*`, `VAULT_*`), a TOML
//! config file at `<config dir>/thrippy/config.toml`, and built-in
//! defaults.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use serde::Deserialize;

const DEFAULT_GRPC_ADDR: &str = "127.0.0.1:14460";
const DEFAULT_WEBHOOK_PORT: u16 = 14470;
const DEFAULT_SECRETS_PROVIDER: &str = "in-memory";
const DEFAULT_SECRETS_NAMESPACE: &str = "default";
const DEFAULT_VAULT_ADDRESS: &str = "https://127.0.0.1:8200";

/// Command-line flags. Every setting can also come from an environment
/// variable or the config file; flags win.
#[derive(Debug, Parser)]
#[command(name = "thrippy", version, about = "Manage third-party auth configs and tokens")]
pub struct Cli {
    /// Simple setup, but unsafe for production
    #[arg(long)]
    pub dev: bool,

    /// gRPC server address and port
    #[arg(long, short = 'a', env = "THRIPPY_GRPC_ADDRESS")]
    pub grpc_addr: Option<String>,

    /// Public hostname used in the OAuth callback URL
    #[arg(long, env = "THRIPPY_WEBHOOK_ADDRESS")]
    pub webhook_addr: Option<String>,

    /// Listening port of the OAuth webhook server
    #[arg(long, env = "THRIPPY_WEBHOOK_PORT")]
    pub webhook_port: Option<u16>,

    /// Where to send OAuth callbacks that carry no state parameter
    #[arg(long, env = "THRIPPY_FALLBACK_URL")]
    pub fallback_url: Option<String>,

    /// Secrets provider: in-memory, file, aws, or vault
    #[arg(long, env = "THRIPPY_SECRETS_PROVIDER")]
    pub secrets_provider: Option<String>,

    /// Namespace prefix for all stored secrets (e.g. dev, staging, prod)
    #[arg(long, env = "THRIPPY_SECRETS_NAMESPACE")]
    pub secrets_namespace: Option<String>,

    #[arg(long, env = "AWS_REGION", hide = true)]
    pub secrets_aws_region: Option<String>,

    #[arg(long, env = "AWS_KMS_KEY_ID", hide = true)]
    pub secrets_aws_kms_key_id: Option<String>,

    #[arg(long, env = "VAULT_ADDR", hide = true)]
    pub secrets_vault_address: Option<String>,

    #[arg(long, env = "VAULT_CACERT", hide = true)]
    pub secrets_vault_cacert: Option<String>,

    #[arg(long, env = "VAULT_TOKEN", hide = true)]
    pub secrets_vault_token: Option<String>,

    // gRPC server transport credentials (PEM files).
    #[arg(long, env = "THRIPPY_GRPC_SERVER_CERT", hide = true)]
    pub grpc_server_cert: Option<String>,

    #[arg(long, env = "THRIPPY_GRPC_SERVER_KEY", hide = true)]
    pub grpc_server_key: Option<String>,

    #[arg(long, env = "THRIPPY_GRPC_CLIENT_CA_CERT", hide = true)]
    pub grpc_client_ca_cert: Option<String>,

    // gRPC client transport credentials (PEM files).
    #[arg(long, env = "THRIPPY_GRPC_SERVER_CA_CERT", hide = true)]
    pub grpc_server_ca_cert: Option<String>,

    #[arg(long, env = "THRIPPY_GRPC_CLIENT_CERT", hide = true)]
    pub grpc_client_cert: Option<String>,

    #[arg(long, env = "THRIPPY_GRPC_CLIENT_KEY", hide = true)]
    pub grpc_client_key: Option<String>,

    /// Expected server name, instead of the one in the server's cert
    /// (for testing only)
    #[arg(long, env = "THRIPPY_GRPC_SERVER_NAME_OVERRIDE", hide = true)]
    pub grpc_server_name_override: Option<String>,

    /// Path to the TOML config file
    #[arg(long, env = "THRIPPY_CONFIG")]
    pub config_file: Option<PathBuf>,
}

/// Config-file schema. Missing sections and fields fall through to the
/// defaults.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub grpc: GrpcFileConfig,
    #[serde(default)]
    pub webhook: WebhookFileConfig,
    #[serde(default)]
    pub secrets: SecretsFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct GrpcFileConfig {
    pub address: Option<String>,
    #[serde(default)]
    pub server: GrpcServerFileConfig,
    #[serde(default)]
    pub client: GrpcClientFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct GrpcServerFileConfig {
    pub server_cert: Option<String>,
    pub server_key: Option<String>,
    pub client_ca_cert: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GrpcClientFileConfig {
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub server_ca_cert: Option<String>,
    pub server_name_override: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookFileConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub fallback_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SecretsFileConfig {
    pub provider: Option<String>,
    pub namespace: Option<String>,
    #[serde(default)]
    pub aws: AwsFileConfig,
    #[serde(default)]
    pub vault: VaultFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct AwsFileConfig {
    pub region: Option<String>,
    pub kms_key_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VaultFileConfig {
    pub address: Option<String>,
    pub cacert: Option<String>,
    pub token: Option<String>,
}

/// Fully resolved runtime configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub dev: bool,

    pub grpc_addr: String,
    pub webhook_addr: String,
    pub webhook_port: u16,
    pub fallback_url: Option<String>,

    pub secrets_provider: String,
    pub secrets_namespace: String,

    pub aws_region: Option<String>,
    pub aws_kms_key_id: Option<String>,

    pub vault_address: String,
    pub vault_cacert: Option<String>,
    pub vault_token: Option<String>,

    pub grpc_server_cert: Option<String>,
    pub grpc_server_key: Option<String>,
    pub grpc_client_ca_cert: Option<String>,

    pub grpc_server_ca_cert: Option<String>,
    pub grpc_client_cert: Option<String>,
    pub grpc_client_key: Option<String>,
    pub grpc_server_name_override: Option<String>,
}

impl Config {
    /// Resolves the layered configuration. A missing config file is
    /// fine (defaults apply); an unparseable one is a startup error.
    pub fn resolve(cli: Cli) -> Result<Self> {
        let file = match config_file_path(&cli) {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            _ => FileConfig::default(),
        };

        let webhook_port = cli
            .webhook_port
            .or(file.webhook.port)
            .unwrap_or(DEFAULT_WEBHOOK_PORT);
        let webhook_addr = cli
            .webhook_addr
            .or(file.webhook.address)
            .unwrap_or_else(|| format!("localhost:{webhook_port}"));

        Ok(Self {
            dev: cli.dev,

            grpc_addr: cli
                .grpc_addr
                .or(file.grpc.address)
                .unwrap_or_else(|| DEFAULT_GRPC_ADDR.to_string()),
            webhook_addr,
            webhook_port,
            fallback_url: cli.fallback_url.or(file.webhook.fallback_url),

            secrets_provider: cli
                .secrets_provider
                .or(file.secrets.provider)
                .unwrap_or_else(|| DEFAULT_SECRETS_PROVIDER.to_string()),
            secrets_namespace: cli
                .secrets_namespace
                .or(file.secrets.namespace)
                .unwrap_or_else(|| DEFAULT_SECRETS_NAMESPACE.to_string()),

            aws_region: cli.secrets_aws_region.or(file.secrets.aws.region),
            aws_kms_key_id: cli.secrets_aws_kms_key_id.or(file.secrets.aws.kms_key_id),

            vault_address: cli
                .secrets_vault_address
                .or(file.secrets.vault.address)
                .unwrap_or_else(|| DEFAULT_VAULT_ADDRESS.to_string()),
            vault_cacert: cli.secrets_vault_cacert.or(file.secrets.vault.cacert),
            vault_token: cli.secrets_vault_token.or(file.secrets.vault.token),

            grpc_server_cert: cli.grpc_server_cert.or(file.grpc.server.server_cert),
            grpc_server_key: cli.grpc_server_key.or(file.grpc.server.server_key),
            grpc_client_ca_cert: cli.grpc_client_ca_cert.or(file.grpc.server.client_ca_cert),

            grpc_server_ca_cert: cli.grpc_server_ca_cert.or(file.grpc.client.server_ca_cert),
            grpc_client_cert: cli.grpc_client_cert.or(file.grpc.client.client_cert),
            grpc_client_key: cli.grpc_client_key.or(file.grpc.client.client_key),
            grpc_server_name_override: cli
                .grpc_server_name_override
                .or(file.grpc.client.server_name_override),
        })
    }

    /// A dev-mode configuration with the in-memory store, for tests.
    pub fn for_testing() -> Self {
        Self {
            dev: true,
            grpc_addr: "127.0.0.1:0".to_string(),
            webhook_addr: "localhost:14470".to_string(),
            webhook_port: 0,
            fallback_url: None,
            secrets_provider: "in-memory".to_string(),
            secrets_namespace: "test".to_string(),
            aws_region: None,
            aws_kms_key_id: None,
            vault_address: DEFAULT_VAULT_ADDRESS.to_string(),
            vault_cacert: None,
            vault_token: None,
            grpc_server_cert: None,
            grpc_server_key: None,
            grpc_client_ca_cert: None,
            grpc_server_ca_cert: None,
            grpc_client_cert: None,
            grpc_client_key: None,
            grpc_server_name_override: None,
        }
    }

    /// The server's own OAuth callback URL, as registered with 3Ps.
    pub fn redirect_url(&self) -> String {
        format!("https://{}/callback", self.webhook_addr)
    }
}

fn config_file_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = &cli.config_file {
        return Some(path.clone());
    }
    ProjectDirs::from("", "", "thrippy").map(|dirs| dirs.config_dir().join("config.toml"))
}
