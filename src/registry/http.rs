//! Confluent-compatible schema registry REST client

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{RegistryError, SchemaRegistry};
use crate::config::RegistryConfig;
use crate::schema::Schema;

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Serialize)]
struct RegisterRequest<'a> {
    schema: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    id: u32,
}

#[derive(Deserialize)]
struct SchemaResponse {
    schema: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: String,
}

/// REST client for a schema registry.
///
/// Each request goes to the configured URLs in order until one answers.
/// Connection failures and server errors move on to the next URL; client
/// errors (4xx) are returned immediately.
pub struct HttpRegistry {
    client: Client,
    urls: Vec<Url>,
}

impl HttpRegistry {
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        if config.urls.is_empty() {
            return Err(RegistryError::NoEndpoints);
        }
        let urls = config
            .urls
            .iter()
            .map(|url| parse_base(url))
            .collect::<Result<Vec<_>, _>>()?;
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self { client, urls })
    }

    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    /// Send a request to `segments` under each base URL in turn and return
    /// the first successful response.
    async fn send<F>(&self, segments: &[&str], build: F) -> Result<Response, RegistryError>
    where
        F: Fn(Url) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut last_error = RegistryError::NoEndpoints;
        for url in &self.urls {
            let request = build(endpoint(url, segments)?);
            let response = match request.header("Accept", CONTENT_TYPE).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Schema registry {} unreachable: {}", url, e);
                    last_error = RegistryError::Http(e);
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let message = response
                .json::<ErrorResponse>()
                .await
                .map(|body| body.message)
                .unwrap_or_default();
            let error = RegistryError::Status {
                status: status.as_u16(),
                message,
            };
            if status.is_client_error() {
                return Err(error);
            }
            warn!("Schema registry {} failed: {}", url, error);
            last_error = error;
        }
        Err(last_error)
    }
}

#[async_trait]
impl SchemaRegistry for HttpRegistry {
    async fn register_schema(&self, subject: &str, schema: &Schema) -> Result<u32, RegistryError> {
        let body = RegisterRequest {
            schema: schema.canonical_text(),
        };
        let response = self
            .send(&["subjects", subject, "versions"], |url| {
                self.client
                    .post(url)
                    .header("Content-Type", CONTENT_TYPE)
                    .json(&body)
            })
            .await?;
        let registered: RegisterResponse = response.json().await?;
        debug!("Subject {} registered as schema id {}", subject, registered.id);
        Ok(registered.id)
    }

    async fn schema_by_id(&self, id: u32) -> Result<Schema, RegistryError> {
        let id_segment = id.to_string();
        let result = self
            .send(&["schemas", "ids", id_segment.as_str()], |url| self.client.get(url))
            .await;
        let response = match result {
            Err(RegistryError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Err(RegistryError::SchemaNotFound(id));
            }
            other => other?,
        };
        let fetched: SchemaResponse = response.json().await?;
        Ok(Schema::parse(&fetched.schema)?)
    }
}

fn parse_base(url: &str) -> Result<Url, RegistryError> {
    let parsed = Url::parse(url).map_err(|e| RegistryError::InvalidUrl(format!("{}: {}", url, e)))?;
    if parsed.cannot_be_a_base() {
        return Err(RegistryError::InvalidUrl(format!("{}: not a base URL", url)));
    }
    Ok(parsed)
}

/// `base` with each of `segments` appended as one percent-encoded path
/// segment.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, RegistryError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| RegistryError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
