//! Configuration module for the Callbridge server.
//!
//! Configuration comes from environment variables (with `.env` support via
//! `dotenvy` in `main`). Required keys are validated at startup; the same
//! probe backs the `/ready` endpoint so an operator can see exactly which
//! keys are unset.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::realtime::openai::config::{DEFAULT_MODEL, DEFAULT_VOICE};

/// Default HTTP bind host.
const DEFAULT_HOST: &str = "0.0.0.0";

/// Default HTTP bind port.
const DEFAULT_PORT: u16 = 8080;

/// Default tool-call RPC listener port.
const DEFAULT_TOOLS_RPC_PORT: u16 = 9090;

/// Default bound on realtime session negotiation + socket connect.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default number of negotiation retries before a call is failed.
const DEFAULT_NEGOTIATION_MAX_RETRIES: u32 = 3;

/// Environment keys that must be set for the process to be ready.
pub const REQUIRED_KEYS: &[&str] = &[
    "OPENAI_API_KEY",
    "TWILIO_ACCOUNT_SID",
    "TWILIO_AUTH_TOKEN",
    "PUBLIC_BASE_URL",
    "VOICE_ENABLED",
    "TOOLS_RPC_ENABLED",
];

/// Configuration loading/validation errors. Fatal at startup, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration keys: {}", .0.join(", "))]
    MissingRequired(Vec<String>),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains everything needed to run the voice bridge: server settings,
/// telephony provider credentials, realtime speech provider settings, the
/// tool-call RPC listener, and feature flags.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// Externally reachable base URL of this process (used to build the
    /// media-socket URL handed to the telephony provider).
    pub public_base_url: Option<String>,

    // Feature flags
    pub voice_enabled: Option<bool>,
    pub tools_rpc_enabled: Option<bool>,

    /// Port the tool-call RPC server listens on.
    pub tools_rpc_port: u16,

    // Realtime speech provider
    pub openai_api_key: Option<String>,
    /// REST base for session negotiation.
    pub realtime_api_base: String,
    /// WebSocket base for the session socket.
    pub realtime_ws_base: String,
    pub realtime_model: String,
    pub realtime_voice: String,
    pub realtime_instructions: Option<String>,
    pub realtime_temperature: Option<f32>,
    pub realtime_max_output_tokens: Option<i32>,

    // Telephony provider
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,
    pub twilio_api_base: String,

    // Session setup
    pub connect_timeout_secs: u64,
    pub negotiation_max_retries: u32,

    // Security
    pub cors_allowed_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            public_base_url: None,
            voice_enabled: None,
            tools_rpc_enabled: None,
            tools_rpc_port: DEFAULT_TOOLS_RPC_PORT,
            openai_api_key: None,
            realtime_api_base: "https://api.openai.com/v1".to_string(),
            realtime_ws_base: "wss://api.openai.com/v1".to_string(),
            realtime_model: DEFAULT_MODEL.to_string(),
            realtime_voice: DEFAULT_VOICE.to_string(),
            realtime_instructions: None,
            realtime_temperature: None,
            realtime_max_output_tokens: None,
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_from_number: None,
            twilio_api_base: "https://api.twilio.com".to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            negotiation_max_retries: DEFAULT_NEGOTIATION_MAX_RETRIES,
            cors_allowed_origins: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let tls = match (var("TLS_CERT_PATH"), var("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            _ => None,
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT")?.unwrap_or(defaults.port),
            tls,
            public_base_url: var("PUBLIC_BASE_URL"),
            voice_enabled: bool_var("VOICE_ENABLED")?,
            tools_rpc_enabled: bool_var("TOOLS_RPC_ENABLED")?,
            tools_rpc_port: parse_var("TOOLS_RPC_PORT")?.unwrap_or(defaults.tools_rpc_port),
            openai_api_key: var("OPENAI_API_KEY"),
            realtime_api_base: var("REALTIME_API_BASE").unwrap_or(defaults.realtime_api_base),
            realtime_ws_base: var("REALTIME_WS_BASE").unwrap_or(defaults.realtime_ws_base),
            realtime_model: var("REALTIME_MODEL").unwrap_or(defaults.realtime_model),
            realtime_voice: var("REALTIME_VOICE").unwrap_or(defaults.realtime_voice),
            realtime_instructions: var("REALTIME_INSTRUCTIONS"),
            realtime_temperature: parse_var("REALTIME_TEMPERATURE")?,
            realtime_max_output_tokens: parse_var("REALTIME_MAX_OUTPUT_TOKENS")?,
            twilio_account_sid: var("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: var("TWILIO_AUTH_TOKEN"),
            twilio_from_number: var("TWILIO_FROM_NUMBER"),
            twilio_api_base: var("TWILIO_API_BASE").unwrap_or(defaults.twilio_api_base),
            connect_timeout_secs: parse_var("CONNECT_TIMEOUT_SECS")?
                .unwrap_or(defaults.connect_timeout_secs),
            negotiation_max_retries: parse_var("NEGOTIATION_MAX_RETRIES")?
                .unwrap_or(defaults.negotiation_max_retries),
            cors_allowed_origins: var("CORS_ALLOWED_ORIGINS"),
        })
    }

    /// Required keys that are currently unset. Empty means ready.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.openai_api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if self.twilio_account_sid.is_none() {
            missing.push("TWILIO_ACCOUNT_SID");
        }
        if self.twilio_auth_token.is_none() {
            missing.push("TWILIO_AUTH_TOKEN");
        }
        if self.public_base_url.is_none() {
            missing.push("PUBLIC_BASE_URL");
        }
        if self.voice_enabled.is_none() {
            missing.push("VOICE_ENABLED");
        }
        if self.tools_rpc_enabled.is_none() {
            missing.push("TOOLS_RPC_ENABLED");
        }
        missing
    }

    /// Fail-fast validation for startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing = self.missing_required();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingRequired(
                missing.into_iter().map(String::from).collect(),
            ))
        }
    }

    /// Socket address string for the HTTP listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn is_voice_enabled(&self) -> bool {
        self.voice_enabled.unwrap_or(false)
    }

    pub fn is_tools_rpc_enabled(&self) -> bool {
        self.tools_rpc_enabled.unwrap_or(false)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Media-socket URL handed to the telephony provider in the answer TwiML.
    pub fn media_socket_url(&self) -> Option<String> {
        let base = self.public_base_url.as_deref()?;
        let base = base
            .replace("https://", "wss://")
            .replace("http://", "ws://");
        Some(format!("{}/ws/media", base.trim_end_matches('/')))
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|e| ConfigError::Invalid {
            key,
            reason: format!("{e}"),
        }),
    }
}

fn bool_var(key: &'static str) -> Result<Option<bool>, ConfigError> {
    match var(key) {
        None => Ok(None),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(ConfigError::Invalid {
                key,
                reason: format!("expected a boolean, got {other:?}"),
            }),
        },
    }
}
