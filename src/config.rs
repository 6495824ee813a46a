//! Application configuration
//!
//! Service settings come from `config.toml`, embedded at build time. The API
//! token is deliberately not part of the embedded config; it is read from the
//! environment (optionally via a `.env` file) so binaries stay secret-free.

use serde::Deserialize;

/// Environment variable holding the bearer token for the inspection service
pub(crate) const API_TOKEN_ENV: &str = "SNAGSCRIBE_API_TOKEN";

/// Top-level application configuration
#[derive(Debug, Deserialize)]
pub(crate) struct AppConfig {
    pub(crate) service: ServiceConfig,
}

/// Inspection service connection settings
#[derive(Debug, Deserialize)]
pub(crate) struct ServiceConfig {
    /// Base URL of the inspection service
    pub(crate) base_url: String,
    /// Per-request timeout; long AI calls resolve or fail within this window
    pub(crate) request_timeout_secs: u64,
    /// Run the two-stage preview/confirm workflow instead of single-call
    pub(crate) two_stage: bool,
}

/// Load configuration from the embedded config.toml
pub(crate) fn load() -> Result<AppConfig, toml::de::Error> {
    const CONFIG_TOML: &str = include_str!("../config.toml");
    toml::from_str(CONFIG_TOML)
}

/// Read the API token from the environment, if set
pub(crate) fn api_token() -> Option<String> {
    std::env::var(API_TOKEN_ENV).ok().filter(|t| !t.is_empty())
}
