// Configuration
pub mod config;

// Link identifiers
pub mod id;

// Secret storage providers
pub mod secrets;

// Per-link record storage
pub mod links;

// OAuth 2.0 configs, tokens, and flows
pub mod oauth;

// Per-3P authentication templates
pub mod templates;

// gRPC service, client wrappers, and generated types
pub mod rpc;

// OAuth webhook server
pub mod http;

// TLS/mTLS transport credentials
pub mod tls;
