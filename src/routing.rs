//! Static routing table: routing key → destination receiver URL.

use std::collections::HashMap;

use crate::error::{ConfigError, RoutingError};

/// Destinations used when no routes are configured.
pub const DEFAULT_ROUTES: &[(&str, &str)] = &[
    ("script1", "http://127.0.0.1:5001/process-response"),
    ("script2", "http://127.0.0.1:5002/process-response"),
];

/// Immutable mapping from routing key to destination URL.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<String, String>,
}

impl RoutingTable {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            routes: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse `key=url,key=url`. Whitespace around entries is ignored.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut routes = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((key, url)) = entry.split_once('=') else {
                return Err(invalid(format!("expected key=url, got '{entry}'")));
            };
            let (key, url) = (key.trim(), url.trim());
            if key.is_empty() || url.is_empty() {
                return Err(invalid(format!("empty key or url in '{entry}'")));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(invalid(format!("route {key} is not an http(s) URL: {url}")));
            }
            if routes.insert(key.to_string(), url.to_string()).is_some() {
                return Err(invalid(format!("duplicate routing key '{key}'")));
            }
        }
        Ok(Self { routes })
    }

    /// Resolve the destination for `routing_key`.
    pub fn resolve(&self, routing_key: &str) -> Result<&str, RoutingError> {
        self.routes
            .get(routing_key)
            .map(String::as_str)
            .ok_or_else(|| RoutingError::UnknownKey(routing_key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routing keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: "CHAT_RELAY_ROUTES".into(),
        message,
    }
}
