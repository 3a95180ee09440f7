use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// How message payloads are encoded on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationMode {
    /// Opaque bytes, no decoding
    Raw,
    /// JSON payloads
    #[default]
    Json,
    /// JSON payloads validated against registered record schemas
    Schema,
}

impl SerializationMode {
    /// Whether payloads must be decoded before dispatch
    pub fn is_structured(&self) -> bool {
        !matches!(self, SerializationMode::Raw)
    }
}

impl FromStr for SerializationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "bytes" => Ok(SerializationMode::Raw),
            "json" => Ok(SerializationMode::Json),
            "schema" | "avro" => Ok(SerializationMode::Schema),
            other => Err(Error::ValidationError(format!(
                "Unknown serialization mode '{}'",
                other
            ))),
        }
    }
}

/// Connection settings shared by every broker-facing client
///
/// Clients copy what they need at construction, so changing a config value
/// never affects a client that already exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConnectionConfig {
    /// Broker endpoints as `host:port`
    pub bootstrap_servers: Vec<String>,

    /// Consumer group identifier (consumers default to `{pattern}-CONSUMER`)
    pub group_id: Option<String>,

    /// Payload encoding
    pub serialization: SerializationMode,

    /// Schema registry endpoint, only used with `SerializationMode::Schema`
    pub schema_registry_url: Option<String>,

    /// Commit consumed offsets automatically
    pub enable_auto_commit: bool,

    /// Auto-commit period in milliseconds
    pub auto_commit_interval_ms: u64,

    /// Timeout for metadata and admin requests in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for BrokerConnectionConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: (9092..9095).map(|port| format!("localhost:{}", port)).collect(),
            group_id: None,
            serialization: SerializationMode::default(),
            schema_registry_url: Some("http://localhost:8081".to_string()),
            enable_auto_commit: true,
            auto_commit_interval_ms: 5000,
            request_timeout_ms: 5000,
        }
    }
}

impl BrokerConnectionConfig {
    /// Create a configuration for the given endpoint list
    ///
    /// # Example
    ///
    /// ```
    /// use topic_relay::config::BrokerConnectionConfig;
    ///
    /// let config = BrokerConnectionConfig::new(
    ///     "PLAINTEXT://localhost:9092,PLAINTEXT://localhost:9093"
    /// ).unwrap();
    /// assert_eq!(config.bootstrap_servers.len(), 2);
    /// ```
    pub fn new(endpoints: &str) -> Result<Self> {
        Ok(Self {
            bootstrap_servers: Self::parse_endpoints(endpoints)?,
            ..Default::default()
        })
    }

    /// Parse a comma separated endpoint list, stripping any `SCHEME://` prefix
    pub fn parse_endpoints(endpoints: &str) -> Result<Vec<String>> {
        let mut parsed = Vec::new();

        for raw in endpoints.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }

            let endpoint = match raw.split_once("://") {
                Some((_, rest)) => rest,
                None => raw,
            };

            let (host, port) = endpoint.rsplit_once(':').ok_or_else(|| {
                Error::ValidationError(format!("Endpoint '{}' has no port", raw))
            })?;
            if host.is_empty() {
                return Err(Error::ValidationError(format!(
                    "Endpoint '{}' has no host",
                    raw
                )));
            }
            port.parse::<u16>().map_err(|_| {
                Error::ValidationError(format!("Invalid port number in '{}'", raw))
            })?;

            parsed.push(endpoint.to_string());
        }

        if parsed.is_empty() {
            return Err(Error::ValidationError(
                "Endpoint list is empty".to_string(),
            ));
        }

        Ok(parsed)
    }

    /// Build a configuration from environment variables
    ///
    /// Reads `BROKER_URLS`, `BROKER_GROUP_ID`, `BROKER_SERIALIZATION` and
    /// `SCHEMA_REGISTRY_URL`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(urls) = std::env::var("BROKER_URLS") {
            config.bootstrap_servers = Self::parse_endpoints(&urls)?;
        }
        if let Ok(group) = std::env::var("BROKER_GROUP_ID") {
            config.group_id = Some(group);
        }
        if let Ok(mode) = std::env::var("BROKER_SERIALIZATION") {
            config.serialization = mode.parse()?;
        }
        if let Ok(url) = std::env::var("SCHEMA_REGISTRY_URL") {
            config.schema_registry_url = Some(url);
        }

        Ok(config)
    }

    /// Set the consumer group (builder pattern)
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the serialization mode (builder pattern)
    pub fn with_serialization(mut self, mode: SerializationMode) -> Self {
        self.serialization = mode;
        self
    }

    /// Set the schema registry endpoint (builder pattern)
    pub fn with_schema_registry(mut self, url: impl Into<String>) -> Self {
        self.schema_registry_url = Some(url.into());
        self
    }

    /// Configure offset auto-commit (builder pattern)
    pub fn with_auto_commit(mut self, enabled: bool, interval_ms: u64) -> Self {
        self.enable_auto_commit = enabled;
        self.auto_commit_interval_ms = interval_ms;
        self
    }

    /// Endpoints joined the way broker clients expect them
    pub fn bootstrap_servers_string(&self) -> String {
        self.bootstrap_servers.join(",")
    }
}
