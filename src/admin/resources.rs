use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Connector registration body for a connector-management service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub name: String,
    pub config: BTreeMap<String, String>,
}

impl ConnectorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BTreeMap::new(),
        }
    }

    /// Set one config entry (builder pattern)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// JDBC source connector loading `table` incrementally into `{topic_prefix}{table}`
    ///
    /// # Example
    ///
    /// ```
    /// use topic_relay::admin::ConnectorConfig;
    ///
    /// let connector = ConnectorConfig::jdbc_source(
    ///     "stations",
    ///     "jdbc:postgresql://postgres/cta",
    ///     "stations",
    ///     "stop_id",
    ///     "pg_",
    /// );
    /// assert_eq!(connector.config["mode"], "incrementing");
    /// ```
    pub fn jdbc_source(
        name: impl Into<String>,
        connection_url: impl Into<String>,
        table: impl Into<String>,
        incrementing_column: impl Into<String>,
        topic_prefix: impl Into<String>,
    ) -> Self {
        Self::new(name)
            .with("connector.class", "io.confluent.connect.jdbc.JdbcSourceConnector")
            .with("key.converter", "org.apache.kafka.connect.json.JsonConverter")
            .with("key.converter.schemas.enable", "false")
            .with("value.converter", "org.apache.kafka.connect.json.JsonConverter")
            .with("value.converter.schemas.enable", "false")
            .with("batch.max.rows", "500")
            .with("connection.url", connection_url)
            .with("table.whitelist", table)
            .with("mode", "incrementing")
            .with("incrementing.column.name", incrementing_column)
            .with("topic.prefix", topic_prefix)
            .with("poll.interval.ms", "3600000")
    }
}

/// Statement for the query-engine service; the text is passed through untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStatement {
    pub ksql: String,

    #[serde(rename = "streamsProperties")]
    pub streams_properties: BTreeMap<String, String>,
}

impl QueryStatement {
    pub const CONTENT_TYPE: &'static str = "application/vnd.ksql.v1+json";

    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            ksql: statement.into(),
            streams_properties: BTreeMap::new(),
        }
    }

    /// Set one stream property (builder pattern)
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.streams_properties.insert(key.into(), value.into());
        self
    }

    /// Have the statement's queries read their inputs from the beginning
    pub fn from_earliest(self) -> Self {
        self.with_property("ksql.streams.auto.offset.reset", "earliest")
    }
}
