//! Configuration management for Threatlens
//!
//! Configuration is loaded from environment variables. The upstream credential
//! is held here for the lifetime of the process and is never serialized or
//! logged.

use anyhow::{Context, Result};
use std::env;
use std::fmt;

/// Default upstream provider base URL (NVIDIA NIM, OpenAI-compatible)
pub const DEFAULT_NIM_API_URL: &str = "https://integrate.api.nvidia.com/v1";

/// Environment variables consulted for the upstream credential, in order
const CREDENTIAL_VARS: [&str; 2] = ["NIM_API_KEY", "NVIDIA_NIM_API_KEY"];

/// Relay server configuration
#[derive(Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Upstream provider base URL (without the `/chat/completions` suffix)
    pub nim_api_url: String,
    /// Upstream bearer credential; `None` makes every relay call fail fast
    pub nim_api_key: Option<String>,

    /// Total timeout for one upstream exchange, including the streamed body.
    /// Zero disables the timeout.
    pub upstream_timeout_seconds: u64,

    /// Emit logs as JSON lines instead of the human-readable format
    pub log_json: bool,

    /// Browser origins allowed to call the relay cross-origin. Empty means
    /// same-origin only: no CORS headers are sent at all.
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            host: lookup("THREATLENS_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: lookup("THREATLENS_PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("Invalid THREATLENS_PORT")?,

            nim_api_url: lookup("NIM_API_URL").unwrap_or_else(|| DEFAULT_NIM_API_URL.to_string()),
            nim_api_key: select_credential(CREDENTIAL_VARS.iter().map(|name| lookup(name))),

            upstream_timeout_seconds: lookup("UPSTREAM_TIMEOUT_SECONDS")
                .unwrap_or_else(|| "300".to_string())
                .parse()
                .context("Invalid UPSTREAM_TIMEOUT_SECONDS")?,

            log_json: lookup("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),

            allowed_origins: lookup("THREATLENS_ALLOWED_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
        })
    }

    /// Whether an upstream credential is available
    pub fn has_credential(&self) -> bool {
        self.nim_api_key.is_some()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("nim_api_url", &self.nim_api_url)
            .field("nim_api_key", &self.nim_api_key.as_ref().map(|_| "<redacted>"))
            .field("upstream_timeout_seconds", &self.upstream_timeout_seconds)
            .field("log_json", &self.log_json)
            .field("allowed_origins", &self.allowed_origins)
            .finish()
    }
}

/// Split a comma-separated origin list, dropping blanks
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pick the first non-blank credential candidate.
///
/// Blank values count as absent so that an exported-but-empty variable
/// still produces a configuration error instead of an empty bearer token.
fn select_credential<I>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
