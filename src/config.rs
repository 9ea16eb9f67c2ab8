//! Configuration types.
//!
//! Everything comes from environment variables. Optional values fall back
//! to defaults; missing required values are a `ConfigError`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::capability::DEFAULT_LINK_TTL_SECS;
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::notify::telegram::DEFAULT_API_BASE;
use crate::pipeline::SweepConfig;
use crate::pipeline::worker::{DEFAULT_DELIVERY_DEADLINE_SECS, DEFAULT_SWEEP_INTERVAL_SECS};
use crate::summarizer::SummarizerConfig;

/// Telegram bot settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub api_base: String,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` on webhook calls.
    pub webhook_secret: Option<SecretString>,
}

/// Download link settings.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Public base URL that download links point at.
    pub public_base_url: String,
    pub secret: SecretString,
    pub ttl: chrono::Duration,
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub telegram: TelegramConfig,
    /// Domain of generated addresses.
    pub mail_domain: String,
    pub links: LinkConfig,
    pub db_path: PathBuf,
    pub raw_dir: PathBuf,
    pub bind_addr: SocketAddr,
    /// `None` runs the summarizer in fallback-only mode.
    pub llm: Option<LlmConfig>,
    pub summarizer: SummarizerConfig,
    pub sweep: SweepConfig,
}

impl RelayConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));

        let webhook_secret = get("TELEGRAM_WEBHOOK_SECRET");
        if let Some(secret) = &webhook_secret {
            // Telegram's own limits for `secret_token`.
            let valid = secret.len() <= 256
                && secret
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(ConfigError::InvalidValue {
                    key: "TELEGRAM_WEBHOOK_SECRET".into(),
                    message: "1-256 characters of A-Z, a-z, 0-9, _ and -".into(),
                });
            }
        }
        let telegram = TelegramConfig {
            bot_token: SecretString::from(required("TELEGRAM_BOT_TOKEN")?),
            api_base: get("TELEGRAM_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            webhook_secret: webhook_secret.map(SecretString::from),
        };

        let mail_domain = required("RELAY_MAIL_DOMAIN")?.trim().to_lowercase();

        let ttl_secs: i64 = parse_or(&get, "RELAY_LINK_TTL_SECS", DEFAULT_LINK_TTL_SECS)?;
        if ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_LINK_TTL_SECS".into(),
                message: "must be positive".into(),
            });
        }
        let links = LinkConfig {
            public_base_url: required("RELAY_PUBLIC_BASE_URL")?,
            secret: SecretString::from(required("RELAY_LINK_SECRET")?),
            ttl: chrono::Duration::seconds(ttl_secs),
        };

        let db_path = get("RELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/inbox-relay.db"));
        let raw_dir = get("RELAY_RAW_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/raw"));
        let bind_addr: SocketAddr = parse_or(
            &get,
            "RELAY_BIND_ADDR",
            SocketAddr::from(([0, 0, 0, 0], 8080)),
        )?;

        let backend = match get("RELAY_LLM_BACKEND") {
            Some(raw) => raw
                .parse::<LlmBackend>()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "RELAY_LLM_BACKEND".into(),
                    message,
                })?,
            None => LlmBackend::Anthropic,
        };
        let llm = get("RELAY_LLM_API_KEY").map(|key| LlmConfig {
            backend,
            api_key: SecretString::from(key),
            model: get("RELAY_LLM_MODEL").unwrap_or_else(|| backend.default_model().to_string()),
        });

        let summarizer = SummarizerConfig {
            timeout: Duration::from_secs(parse_or(&get, "RELAY_SUMMARY_TIMEOUT_SECS", 20)?),
            ..SummarizerConfig::default()
        };

        let sweep = SweepConfig {
            interval: Duration::from_secs(parse_or(
                &get,
                "RELAY_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )?),
            delivery_deadline: Duration::from_secs(parse_or(
                &get,
                "RELAY_DELIVERY_DEADLINE_SECS",
                DEFAULT_DELIVERY_DEADLINE_SECS,
            )?),
        };
        if sweep.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_SWEEP_INTERVAL_SECS".into(),
                message: "must be positive".into(),
            });
        }

        Ok(Self {
            telegram,
            mail_domain,
            links,
            db_path,
            raw_dir,
            bind_addr,
            llm,
            summarizer,
            sweep,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.into(),
                message: e.to_string(),
            }),
        None => Ok(default),
    }
}
