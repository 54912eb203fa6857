// src/config.rs
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use thiserror::Error;

pub const DEFAULT_MODEL_ID: &str = "Qwen/Qwen2-0.5B-Instruct";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_SEED: u64 = 299_792_458;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelConfig {
    pub model_id: String,
    pub revision: String,
    pub system_prompt: String,
    pub seed: u64,
    pub force_cpu: bool,
    pub hf_token: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: "main".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            seed: DEFAULT_SEED,
            force_cpu: false,
            hf_token: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    /// `/` serves the chat page when set, a JSON liveness message otherwise.
    pub serve_ui: bool,
    pub model: ModelConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            serve_ui: true,
            model: ModelConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = AppConfig::default();

        let host = match get("CHAT_HOST") {
            Some(v) => v.trim().parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "CHAT_HOST",
                value: v.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.host,
        };

        let port = match get("CHAT_PORT") {
            Some(v) => parse_number("CHAT_PORT", &v)?,
            None => defaults.port,
        };

        let serve_ui = match get("CHAT_SERVE_UI") {
            Some(v) => parse_bool("CHAT_SERVE_UI", &v)?,
            None => defaults.serve_ui,
        };

        let mut model = defaults.model;
        if let Some(v) = get("CHAT_MODEL_ID") {
            model.model_id = v.trim().to_string();
        }
        if let Some(v) = get("CHAT_MODEL_REVISION") {
            model.revision = v.trim().to_string();
        }
        if let Some(v) = get("CHAT_SYSTEM_PROMPT") {
            model.system_prompt = v;
        }
        if let Some(v) = get("CHAT_SEED") {
            model.seed = parse_number("CHAT_SEED", &v)?;
        }
        if let Some(v) = get("CHAT_FORCE_CPU") {
            model.force_cpu = parse_bool("CHAT_FORCE_CPU", &v)?;
        }
        model.hf_token = get("HF_TOKEN");

        Ok(Self { host, port, serve_ui, model })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
