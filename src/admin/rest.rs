use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::admin::{ConnectorConfig, QueryStatement};
use crate::broker::AdminClient;
use crate::error::{Error, Result};

/// What a status probe said about a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCheck {
    Present,
    Absent,
    Unexpected(u16),
}

impl StatusCheck {
    /// Interpret the status code of a `GET` on the resource
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => StatusCheck::Present,
            404 => StatusCheck::Absent,
            other => StatusCheck::Unexpected(other),
        }
    }
}

/// What `ensure` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Already there; nothing was posted
    Present,
    /// Created by this call
    Created,
}

/// Idempotent check-then-create calls against REST collaborators
///
/// # Example
///
/// ```no_run
/// use topic_relay::admin::{ConnectorConfig, RestProvisioner};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let rest = RestProvisioner::new();
///     let connector = ConnectorConfig::new("stations")
///         .with("connector.class", "io.confluent.connect.jdbc.JdbcSourceConnector")
///         .with("table.whitelist", "stations");
///
///     rest.ensure_connector("http://localhost:8083/connectors", &connector).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RestProvisioner {
    client: reqwest::Client,
}

impl RestProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (builder pattern)
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// `GET status_url`; when absent, `POST body` to `create_url`
    pub async fn ensure<B: Serialize + ?Sized>(
        &self,
        status_url: &str,
        create_url: &str,
        body: &B,
    ) -> Result<ResourceStatus> {
        let probe = self.client.get(status_url).send().await?;
        match StatusCheck::from_status(probe.status().as_u16()) {
            StatusCheck::Present => {
                debug!(status_url, "resource already present, skipping creation");
                return Ok(ResourceStatus::Present);
            }
            StatusCheck::Absent => {}
            StatusCheck::Unexpected(status) => {
                let body = probe.text().await.unwrap_or_default();
                error!(status_url, status, "unexpected status probe response");
                return Err(Error::HttpError { status, body });
            }
        }

        let response = self.client.post(create_url).json(body).send().await?;
        check_success(response, create_url).await?;

        info!(create_url, "resource created");
        Ok(ResourceStatus::Created)
    }

    /// Create a connector unless `{connect_url}/{name}` already answers
    pub async fn ensure_connector(
        &self,
        connect_url: &str,
        connector: &ConnectorConfig,
    ) -> Result<ResourceStatus> {
        let connect_url = connect_url.trim_end_matches('/');
        let status_url = format!("{}/{}", connect_url, connector.name);
        self.ensure(&status_url, connect_url, connector).await
    }

    /// Run a query-engine statement unless its output topic already exists
    pub async fn ensure_statement(
        &self,
        admin: &dyn AdminClient,
        output_topic: &str,
        query_url: &str,
        statement: &QueryStatement,
    ) -> Result<ResourceStatus> {
        if admin.topic_exists(output_topic).await? {
            debug!(output_topic, "statement output exists, skipping");
            return Ok(ResourceStatus::Present);
        }

        let url = format!("{}/ksql", query_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, QueryStatement::CONTENT_TYPE)
            .body(serde_json::to_vec(statement)?)
            .send()
            .await?;
        check_success(response, &url).await?;

        info!(output_topic, "statement executed");
        Ok(ResourceStatus::Created)
    }
}

async fn check_success(response: reqwest::Response, url: &str) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    error!(url, status = status.as_u16(), %body, "request rejected");
    Err(Error::HttpError {
        status: status.as_u16(),
        body,
    })
}
