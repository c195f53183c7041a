//! Configuration types, read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::routing::{DEFAULT_ROUTES, RoutingTable};

/// Default welcome text. `{name}` is replaced with the contact's name.
pub const DEFAULT_WELCOME_TEMPLATE: &str =
    "{name}, здравствуйте!\n\nЭто ваше приветственное сообщение.";

/// Which half of the relay this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Talks to the chat channel and the status store.
    Leaf,
    /// Forwards tagged responses to leaves by routing key.
    Central,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Leaf => "leaf",
            Role::Central => "central",
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            Role::Leaf => 5001,
            Role::Central => 5000,
        }
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leaf" => Ok(Role::Leaf),
            "central" => Ok(Role::Central),
            other => Err(ConfigError::InvalidValue {
                key: "CHAT_RELAY_ROLE".into(),
                message: format!("expected 'leaf' or 'central', got '{other}'"),
            }),
        }
    }
}

/// Settings shared by both roles.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub role: Role,
    /// Port the response receiver listens on.
    pub port: u16,
    /// Relay worker polling cadence.
    pub poll_interval: Duration,
    /// Upper bound on any outgoing HTTP request.
    pub http_timeout: Duration,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    pub fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let role = match get("CHAT_RELAY_ROLE") {
            Some(raw) => raw.parse()?,
            None => Role::Leaf,
        };
        Ok(Self {
            role,
            port: parse_or(&get, "CHAT_RELAY_PORT", role.default_port())?,
            poll_interval: Duration::from_millis(nonzero_or(
                &get,
                "CHAT_RELAY_POLL_INTERVAL_MS",
                1000,
            )?),
            http_timeout: Duration::from_secs(nonzero_or(
                &get,
                "CHAT_RELAY_HTTP_TIMEOUT_SECS",
                30,
            )?),
        })
    }
}

/// Leaf service settings.
#[derive(Debug, Clone)]
pub struct LeafConfig {
    /// Routing key this leaf tags its dispatches with.
    pub routing_key: String,
    /// Automation backend webhook that receives aggregated messages.
    pub backend_url: String,
    /// Sender inactivity before buffered messages are flushed.
    pub quiet_period: Duration,
    pub bot_token: SecretString,
    pub db_path: PathBuf,
    /// Optional JSON contacts file for the welcome seeder.
    pub contacts_path: Option<PathBuf>,
    pub welcome_template: String,
}

impl LeafConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    pub fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend_url = require(&get, "CHAT_RELAY_BACKEND_URL")?;
        let bot_token = require(&get, "TELEGRAM_BOT_TOKEN")?;

        let routing_key = get("CHAT_RELAY_ROUTING_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| "script1".to_string());

        Ok(Self {
            routing_key,
            backend_url,
            quiet_period: Duration::from_secs(parse_or(&get, "CHAT_RELAY_QUIET_PERIOD_SECS", 15)?),
            bot_token: SecretString::from(bot_token),
            db_path: get("CHAT_RELAY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/chat-relay.db")),
            contacts_path: get("CHAT_RELAY_CONTACTS").map(PathBuf::from),
            welcome_template: get("CHAT_RELAY_WELCOME_TEMPLATE")
                .unwrap_or_else(|| DEFAULT_WELCOME_TEMPLATE.to_string()),
        })
    }
}

/// Central dispatcher settings.
#[derive(Debug, Clone)]
pub struct CentralConfig {
    pub routes: RoutingTable,
}

impl CentralConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    pub fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let routes = match get("CHAT_RELAY_ROUTES") {
            Some(spec) => RoutingTable::parse(&spec)?,
            None => RoutingTable::from_pairs(DEFAULT_ROUTES.iter().copied()),
        };
        Ok(Self { routes })
    }
}

fn require(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    get(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Like `parse_or`, but zero is rejected.
fn nonzero_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match parse_or(get, key, default)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        }),
        value => Ok(value),
    }
}
