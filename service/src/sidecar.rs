//! HTTP client for the sidecar's actor-invocation and publish APIs.

use async_trait::async_trait;
use dicesim_env::{EntityAddress, EnvError, EventBus, InvocationTransport, LIFECYCLE_PUBSUB};
use reqwest::StatusCode;
use tracing::{debug, warn};

/// Error code the sidecar reports when no host serves an actor type.
const ACTOR_INSTANCE_MISSING: &str = "ERR_ACTOR_INSTANCE_MISSING";

/// Placement failure text reported for unregistered actor types.
const NO_ADDRESS: &str = "did not find address";

/// Talks to the local sidecar over HTTP.
///
/// Invocations go to `/v1.0/actors/{type}/{id}/method/{operation}` and
/// publishes to `/v1.0/publish/{pubsub}/{topic}`. Deadlines are enforced by
/// the caller (`EntityClient`), not here.
#[derive(Debug, Clone)]
pub struct SidecarClient {
    http: reqwest::Client,
    base_url: String,
    pubsub_name: String,
}

impl SidecarClient {
    /// Creates a client for the sidecar at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pubsub_name: LIFECYCLE_PUBSUB.to_string(),
        }
    }

    /// Publishes through `pubsub_name` instead of the default component.
    pub fn with_pubsub(mut self, pubsub_name: impl Into<String>) -> Self {
        self.pubsub_name = pubsub_name.into();
        self
    }

    /// Base URL of the sidecar.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn invoke_url(&self, address: &EntityAddress, operation: &str) -> String {
        format!(
            "{}/v1.0/actors/{}/{}/method/{}",
            self.base_url, address.entity_type, address.entity_id, operation
        )
    }

    fn publish_url(&self, topic: &str) -> String {
        format!("{}/v1.0/publish/{}/{}", self.base_url, self.pubsub_name, topic)
    }
}

/// Maps a non-success sidecar response onto the transport error taxonomy.
pub fn classify_failure(
    address: &EntityAddress,
    operation: &str,
    status: StatusCode,
    body: &str,
) -> EnvError {
    if status == StatusCode::NOT_IMPLEMENTED {
        return EnvError::unsupported(&address.entity_type, operation);
    }
    if status == StatusCode::NOT_FOUND
        || body.contains(ACTOR_INSTANCE_MISSING)
        || body.contains(NO_ADDRESS)
    {
        return EnvError::unroutable(address);
    }
    EnvError::invocation(format!("{}: HTTP {}: {}", address, status.as_u16(), body.trim()))
}

#[async_trait]
impl InvocationTransport for SidecarClient {
    async fn invoke(
        &self,
        address: &EntityAddress,
        operation: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, EnvError> {
        let url = self.invoke_url(address, operation);
        debug!(url = %url, "Invoking entity through sidecar");

        let resp = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| EnvError::invocation(format!("{}: {}", address, e)))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| EnvError::invocation(format!("{}: reading response: {}", address, e)))?;

        if status.is_success() {
            Ok(body.to_vec())
        } else {
            let text = String::from_utf8_lossy(&body);
            warn!(address = %address, status = status.as_u16(), "Sidecar rejected invocation");
            Err(classify_failure(address, operation, status, &text))
        }
    }
}

#[async_trait]
impl EventBus for SidecarClient {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), EnvError> {
        let url = self.publish_url(topic);
        debug!(url = %url, bytes = data.len(), "Publishing through sidecar");

        let resp = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(data)
            .send()
            .await
            .map_err(|e| EnvError::publish(topic, e))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(EnvError::publish(
                topic,
                format!("HTTP {}: {}", status.as_u16(), text.trim()),
            ))
        }
    }
}
