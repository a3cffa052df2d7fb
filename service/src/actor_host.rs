//! App-side routes of an entity-hosting service.
//!
//! The sidecar drives these: it discovers hosted entity types and topic
//! subscriptions, forwards entity invocations and deactivations, and
//! delivers lifecycle events wrapped in CloudEvent envelopes.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use crate::config::ServiceConfig;
use crate::sidecar::SidecarClient;
use dicesim_core::{
    diagnostic_sampler, EntityDirectory, EntityError, EntityFactory, LifecycleHandler,
};
use dicesim_env::{
    EntityAddress, EnvError, EventBus, Subscription, TokioEnvironment, TopicHandler,
    TopicResponse, LIFECYCLE_ROUTE,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state for entity-host handlers.
pub struct HostState<B: EventBus> {
    /// Entities served by this host
    pub directory: Arc<EntityDirectory<TokioEnvironment>>,

    /// Lifecycle subscriber for this host
    pub lifecycle: Arc<LifecycleHandler<B>>,
}

impl<B: EventBus> HostState<B> {
    pub fn new(
        directory: Arc<EntityDirectory<TokioEnvironment>>,
        lifecycle: Arc<LifecycleHandler<B>>,
    ) -> Self {
        Self {
            directory,
            lifecycle,
        }
    }
}

impl<B: EventBus> Clone for HostState<B> {
    fn clone(&self) -> Self {
        Self {
            directory: self.directory.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

/// Wires a production host: seeded directory, lifecycle handler publishing
/// through the sidecar, and the router serving both.
pub fn build_host(
    config: &ServiceConfig,
    factory: impl EntityFactory,
) -> Result<Router, EntityError> {
    let host = config.role.host_name();
    let env = TokioEnvironment::shared(config.seed);
    let directory = Arc::new(EntityDirectory::new(host, env.clone()).with_factory(factory));

    let sidecar = Arc::new(SidecarClient::new(config.sidecar_base_url()));
    let sampler = diagnostic_sampler(env.as_ref(), host)?;
    let lifecycle = Arc::new(LifecycleHandler::new(host, sidecar, sampler));

    info!(
        host = %host,
        entities = ?directory.entity_types(),
        sidecar = %config.sidecar_base_url(),
        "Entity host ready"
    );
    Ok(create_router(HostState::new(directory, lifecycle)))
}

/// Actor runtime configuration reported to the sidecar.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActorRuntimeConfig {
    entities: Vec<String>,
    actor_idle_timeout: &'static str,
    drain_ongoing_call_timeout: &'static str,
    drain_rebalanced_actors: bool,
}

/// Lifecycle delivery status returned to the sidecar.
#[derive(Debug, Serialize)]
struct DeliveryStatus {
    status: TopicResponse,
}

/// Create the router for an entity-hosting service.
pub fn create_router<B: EventBus>(state: HostState<B>) -> Router {
    Router::new()
        .route("/dapr/config", get(config_handler::<B>))
        .route("/dapr/subscribe", get(subscribe_handler))
        .route(
            "/actors/{entity_type}/{entity_id}/method/{method}",
            put(invoke_handler::<B>),
        )
        .route(
            "/actors/{entity_type}/{entity_id}",
            delete(deactivate_handler::<B>),
        )
        .route(LIFECYCLE_ROUTE, post(event_handler::<B>))
        .route("/healthz", get(health_handler))
        .with_state(state)
}

async fn config_handler<B: EventBus>(State(state): State<HostState<B>>) -> impl IntoResponse {
    Json(ActorRuntimeConfig {
        entities: state.directory.entity_types(),
        actor_idle_timeout: "1h",
        drain_ongoing_call_timeout: "30s",
        drain_rebalanced_actors: true,
    })
}

async fn subscribe_handler() -> impl IntoResponse {
    Json(vec![Subscription::lifecycle()])
}

async fn invoke_handler<B: EventBus>(
    State(state): State<HostState<B>>,
    Path((entity_type, entity_id, method)): Path<(String, String, String)>,
    body: Bytes,
) -> impl IntoResponse {
    let address = EntityAddress::new(entity_type, entity_id);
    match state.directory.invoke(&address, &method, &body).await {
        Ok(result) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            result,
        )
            .into_response(),
        Err(err) => {
            warn!(address = %address, method = %method, error = %err, "Entity invocation failed");
            (invocation_status(&err), err.to_string()).into_response()
        }
    }
}

/// HTTP status reported to the sidecar for a failed invocation.
fn invocation_status(err: &EnvError) -> StatusCode {
    match err {
        EnvError::AddressNotRoutable(_) => StatusCode::NOT_FOUND,
        EnvError::OperationNotSupported { .. } => StatusCode::NOT_IMPLEMENTED,
        EnvError::SerializationError(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn deactivate_handler<B: EventBus>(
    State(state): State<HostState<B>>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> StatusCode {
    let address = EntityAddress::new(entity_type, entity_id);
    if state.directory.deactivate(&address) || !state.directory.is_active(&address) {
        StatusCode::OK
    } else {
        debug!(address = %address, "Deactivation refused while a call is in flight");
        StatusCode::CONFLICT
    }
}

async fn event_handler<B: EventBus>(
    State(state): State<HostState<B>>,
    body: Bytes,
) -> impl IntoResponse {
    let data = event_data(&body);
    let status = state.lifecycle.on_event(state.lifecycle.topic(), &data).await;
    Json(DeliveryStatus { status })
}

/// Unwraps the `data` member of a CloudEvent envelope.
///
/// Bodies that are not CloudEvents are passed through unchanged so a raw
/// lifecycle event posted directly is handled the same way.
pub fn event_data(body: &[u8]) -> Vec<u8> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(mut envelope)) if envelope.contains_key("specversion") => {
            match envelope.remove("data") {
                Some(Value::String(text)) => text.into_bytes(),
                Some(Value::Null) | None => Vec::new(),
                Some(other) => serde_json::to_vec(&other).unwrap_or_default(),
            }
        }
        _ => body.to_vec(),
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use dicesim_core::{diagnostic_sampler, DieFactory, StepValue, DIE_ENTITY_TYPE};
    use dicesim_env::{LifecycleAction, LifecycleEvent};
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<LifecycleEvent>>,
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish(&self, _topic: &str, data: Vec<u8>) -> Result<(), EnvError> {
            let event = LifecycleEvent::from_bytes(&data)?;
            self.published.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn state() -> (HostState<RecordingBus>, Arc<RecordingBus>) {
        let env = TokioEnvironment::shared(99);
        let directory = Arc::new(
            EntityDirectory::new("dice-host", env.clone()).with_factory(DieFactory::new(6).unwrap()),
        );
        let bus = Arc::new(RecordingBus::default());
        let sampler = diagnostic_sampler(env.as_ref(), "dice-host").unwrap();
        let lifecycle = Arc::new(LifecycleHandler::new("dice-host", bus.clone(), sampler));
        (HostState::new(directory, lifecycle), bus)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn request(method: Method, uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn test_config_lists_entity_types() {
        let (state, _) = state();
        let response = create_router(state)
            .oneshot(request(Method::GET, "/dapr/config", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["entities"], serde_json::json!([DIE_ENTITY_TYPE]));
        assert_eq!(json["drainRebalancedActors"], true);
    }

    #[tokio::test]
    async fn test_build_host_for_coins() {
        let config = ServiceConfig::defaults(crate::config::Role::Coin);
        let router = build_host(&config, dicesim_core::CoinFactory).unwrap();
        let response = router
            .oneshot(request(Method::GET, "/dapr/config", Body::empty()))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["entities"], serde_json::json!(["coinActorType"]));
    }

    #[tokio::test]
    async fn test_subscribe_advertises_lifecycle_topic() {
        let (state, _) = state();
        let response = create_router(state)
            .oneshot(request(Method::GET, "/dapr/subscribe", Body::empty()))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(
            json,
            serde_json::json!([{ "pubsubname": "simulation", "topic": "core", "route": "/endpoint" }])
        );
    }

    #[tokio::test]
    async fn test_invoke_steps_entity() {
        let (state, _) = state();
        let directory = state.directory.clone();
        let response = create_router(state)
            .oneshot(request(
                Method::PUT,
                "/actors/diceActorType/die0/method/step",
                Body::empty(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: StepValue = serde_json::from_slice(&body).unwrap();
        assert!(matches!(value, StepValue::Number(1..=6)));
        assert!(directory.is_active(&EntityAddress::new(DIE_ENTITY_TYPE, "die0")));
    }

    #[tokio::test]
    async fn test_invoke_errors_map_to_status() {
        let (state, _) = state();
        let router = create_router(state);

        let unroutable = router
            .clone()
            .oneshot(request(
                Method::PUT,
                "/actors/coinActorType/coin0/method/step",
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(unroutable.status(), StatusCode::NOT_FOUND);

        let unsupported = router
            .oneshot(request(
                Method::PUT,
                "/actors/diceActorType/die0/method/roll",
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(unsupported.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_deactivate() {
        let (state, _) = state();
        let directory = state.directory.clone();
        let address = EntityAddress::new(DIE_ENTITY_TYPE, "die3");
        directory.invoke(&address, "step", &[]).await.unwrap();

        let response = create_router(state)
            .oneshot(request(
                Method::DELETE,
                "/actors/diceActorType/die3",
                Body::empty(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!directory.is_active(&address));
        assert_eq!(directory.stats().parked, 1);
    }

    #[tokio::test]
    async fn test_cloud_event_is_acknowledged() {
        let (state, bus) = state();
        let envelope = serde_json::json!({
            "specversion": "1.0",
            "type": "com.dapr.event.sent",
            "topic": "core",
            "pubsubname": "simulation",
            "datacontenttype": "application/json",
            "data": { "action": "start" },
        });

        let response = create_router(state)
            .oneshot(request(Method::POST, "/endpoint", envelope.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "status": "SUCCESS" }));

        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].action, LifecycleAction::StartDone);
        assert_eq!(published[0].target, "dice-host");
    }

    #[tokio::test]
    async fn test_malformed_event_is_dropped() {
        let (state, bus) = state();
        let response = create_router(state)
            .oneshot(request(Method::POST, "/endpoint", "not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "status": "DROP" }));
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[test]
    fn test_event_data() {
        let raw = br#"{"action":"stop"}"#;
        assert_eq!(event_data(raw), raw.to_vec());

        let wrapped = br#"{"specversion":"1.0","data":"{\"action\":\"step\"}"}"#;
        assert_eq!(event_data(wrapped), br#"{"action":"step"}"#.to_vec());

        let empty = br#"{"specversion":"1.0"}"#;
        assert!(event_data(empty).is_empty());
    }
}
