use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::schema::RecordSchema;

/// Subject under which a topic's key schema is registered
pub fn key_subject(topic: &str) -> String {
    format!("{}-key", topic)
}

/// Subject under which a topic's value schema is registered
pub fn value_subject(topic: &str) -> String {
    format!("{}-value", topic)
}

/// Schema registry collaborator
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Register a schema, returning its id; re-registering an identical schema returns the same id
    async fn register(&self, subject: &str, schema: &RecordSchema) -> Result<u32>;

    /// Latest schema for a subject
    async fn resolve(&self, subject: &str) -> Result<Option<RecordSchema>>;
}

/// In-process registry
#[derive(Default)]
pub struct StaticSchemaRegistry {
    subjects: RwLock<HashMap<String, (u32, RecordSchema)>>,
    next_id: RwLock<u32>,
}

impl StaticSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn register(&self, subject: &str, schema: &RecordSchema) -> Result<u32> {
        let mut subjects = self
            .subjects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some((id, existing)) = subjects.get(subject) {
            if existing == schema {
                return Ok(*id);
            }
        }

        let mut next_id = self
            .next_id
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *next_id += 1;
        subjects.insert(subject.to_string(), (*next_id, schema.clone()));
        Ok(*next_id)
    }

    async fn resolve(&self, subject: &str) -> Result<Option<RecordSchema>> {
        let subjects = self
            .subjects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(subjects.get(subject).map(|(_, schema)| schema.clone()))
    }
}

/// Registry reached over the schema registry REST API
///
/// Resolved schemas are cached per subject; a missing subject is looked up
/// again on the next call.
pub struct HttpSchemaRegistry {
    client: reqwest::Client,
    base_url: String,
    resolved: RwLock<HashMap<String, RecordSchema>>,
}

#[derive(Serialize)]
struct RegisterRequest {
    schema: String,
}

#[derive(Deserialize)]
struct RegisterResponse {
    id: u32,
}

#[derive(Deserialize)]
struct SubjectVersion {
    schema: String,
}

impl HttpSchemaRegistry {
    pub const CONTENT_TYPE: &'static str = "application/vnd.schemaregistry.v1+json";

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Use a preconfigured HTTP client (builder pattern)
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn versions_url(&self, subject: &str) -> String {
        format!("{}/subjects/{}/versions", self.base_url, subject)
    }
}

async fn rejected(response: reqwest::Response, url: &str) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    error!(url, status, %body, "schema registry request rejected");
    Error::HttpError { status, body }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn register(&self, subject: &str, schema: &RecordSchema) -> Result<u32> {
        let url = self.versions_url(subject);
        let request = RegisterRequest {
            schema: serde_json::to_string(schema)?,
        };
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, Self::CONTENT_TYPE)
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejected(response, &url).await);
        }

        let registered: RegisterResponse = response.json().await?;
        info!(subject, id = registered.id, "schema registered");
        Ok(registered.id)
    }

    async fn resolve(&self, subject: &str) -> Result<Option<RecordSchema>> {
        if let Some(schema) = self
            .resolved
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(subject)
        {
            return Ok(Some(schema.clone()));
        }

        let url = format!("{}/latest", self.versions_url(subject));
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(subject, "no schema registered");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(rejected(response, &url).await);
        }

        let latest: SubjectVersion = response.json().await?;
        let schema = RecordSchema::parse(&latest.schema)?;
        self.resolved
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(subject.to_string(), schema.clone());
        Ok(Some(schema))
    }
}
