//! Lifecycle event handling for entity-hosting services.
//!
//! Every hosting service subscribes to the lifecycle topic and answers each
//! inbound `start`, `step` and `stop` with exactly one acknowledgement on the
//! same topic. This path runs independently of orchestrator stepping: the
//! `step` diagnostic sample comes from a host-owned entity, never from the
//! entities the orchestrator drives.

use crate::entity::{Die, Entity, StepContext};
use crate::error::{EntityError, LifecycleError};
use async_trait::async_trait;
use dicesim_env::{
    EntityAddress, EventBus, LifecycleAction, LifecycleEvent, SimEnvironment, TopicHandler,
    TopicResponse, LIFECYCLE_TOPIC,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Reason attached to `startdone`.
pub const START_DONE_REASON: &str = "Actor finished initialisation";

/// Reason attached to `stepdone`.
pub const STEP_DONE_REASON: &str = "Actor finished step of simulation";

/// Reason attached to `stopdone`.
pub const STOP_DONE_REASON: &str = "Actor finished simulation";

/// Faces of the die drawing the `step` diagnostic sample.
pub const DIAGNOSTIC_SAMPLE_SIDES: u32 = 5;

/// Builds the diagnostic sampler for `host`, seeded from the environment.
///
/// The seed is derived from the host name, so the sample stream never
/// overlaps with any stepped entity's stream.
pub fn diagnostic_sampler<E: SimEnvironment>(
    env: &E,
    host: &str,
) -> Result<Box<dyn Entity>, EntityError> {
    let seed_extension = EntityAddress::new("diagnostic", host).fingerprint();
    let die = Die::new(DIAGNOSTIC_SAMPLE_SIDES, env.derive_rng(seed_extension))?;
    Ok(Box::new(die))
}

/// What to do with actions the handler does not recognise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownActionPolicy {
    /// Drop silently
    Ignore,
    /// Drop with a warning
    #[default]
    Warn,
}

/// How one event was disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Acknowledged(LifecycleAction),
    Ignored,
    Dropped,
}

/// Answers lifecycle events for one hosting service.
pub struct LifecycleHandler<B: EventBus> {
    /// Host name, published as the ack target
    host: String,

    /// Topic acknowledgements are published on
    topic: String,

    /// Bus acknowledgements are published to
    bus: Arc<B>,

    /// Host-owned entity drawing the `step` diagnostic sample
    sampler: Mutex<Box<dyn Entity>>,

    unknown_policy: UnknownActionPolicy,
}

impl<B: EventBus> LifecycleHandler<B> {
    /// Creates a handler publishing acks on the lifecycle topic.
    pub fn new(host: impl Into<String>, bus: Arc<B>, sampler: Box<dyn Entity>) -> Self {
        Self {
            host: host.into(),
            topic: LIFECYCLE_TOPIC.to_string(),
            bus,
            sampler: Mutex::new(sampler),
            unknown_policy: UnknownActionPolicy::default(),
        }
    }

    /// Publishes acks on `topic` instead of the lifecycle topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Sets the policy for unrecognised actions.
    pub fn with_unknown_policy(mut self, policy: UnknownActionPolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Handles one raw lifecycle event.
    ///
    /// Returns whether the event should be redelivered, which is always
    /// `false`: malformed and unrecognised events are dropped. Only a failed
    /// acknowledgement publish is an error.
    pub async fn handle_event(&self, raw: &[u8]) -> Result<bool, LifecycleError> {
        self.dispose(raw).await?;
        Ok(false)
    }

    async fn dispose(&self, raw: &[u8]) -> Result<Disposition, LifecycleError> {
        let event = match LifecycleEvent::from_bytes(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(host = %self.host, error = %err, "Dropping malformed lifecycle event");
                return Ok(Disposition::Dropped);
            }
        };

        let ack = match event.action {
            LifecycleAction::Start => {
                info!(host = %self.host, action = %event.action, "Starting simulation");
                LifecycleEvent::new(LifecycleAction::StartDone).with_reason(START_DONE_REASON)
            }
            LifecycleAction::Step => {
                let sample = self.sample().await?;
                info!(host = %self.host, action = %event.action, sample, "Diagnostic sample");
                LifecycleEvent::new(LifecycleAction::StepDone)
                    .with_reason(STEP_DONE_REASON)
                    .with_value(sample)
            }
            LifecycleAction::Stop => {
                info!(host = %self.host, action = %event.action, "Stopping simulation");
                LifecycleEvent::new(LifecycleAction::StopDone).with_reason(STOP_DONE_REASON)
            }
            action if action.is_ack() => {
                // Hosts share the topic and see every acknowledgement
                debug!(host = %self.host, action = %action, from = %event.target, "Ignoring acknowledgement");
                return Ok(Disposition::Ignored);
            }
            action => {
                if self.unknown_policy == UnknownActionPolicy::Warn {
                    warn!(host = %self.host, action = %action, reason = %event.reason, "Ignoring unrecognised lifecycle action");
                }
                return Ok(Disposition::Ignored);
            }
        };

        let ack = ack.with_target(&self.host);
        let data = ack.to_bytes()?;
        self.bus.publish(&self.topic, data).await?;
        debug!(host = %self.host, action = %ack.action, "Published acknowledgement");

        Ok(Disposition::Acknowledged(ack.action))
    }

    async fn sample(&self) -> Result<i64, LifecycleError> {
        let mut sampler = self.sampler.lock().await;
        let value = sampler.step(&StepContext::default())?;
        Ok(value.as_i64())
    }
}

#[async_trait]
impl<B: EventBus> TopicHandler for LifecycleHandler<B> {
    async fn on_event(&self, _topic: &str, data: &[u8]) -> TopicResponse {
        match self.dispose(data).await {
            Ok(Disposition::Dropped) => TopicResponse::Drop,
            Ok(_) => TopicResponse::Success,
            Err(err) => {
                warn!(host = %self.host, error = %err, "Lifecycle event handling failed");
                TopicResponse::Drop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicesim_env::{EnvError, TokioEnvironment};
    use std::sync::Mutex as StdMutex;

    /// Records every publish; optionally rejects them.
    #[derive(Default)]
    struct RecordingBus {
        published: StdMutex<Vec<(String, LifecycleEvent)>>,
        reject: bool,
    }

    impl RecordingBus {
        fn events(&self) -> Vec<LifecycleEvent> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(_, e)| e.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), EnvError> {
            if self.reject {
                return Err(EnvError::publish(topic, "broker unavailable"));
            }
            let event = LifecycleEvent::from_bytes(&data)?;
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), event));
            Ok(())
        }
    }

    fn handler(bus: Arc<RecordingBus>) -> LifecycleHandler<RecordingBus> {
        let sampler = Box::new(Die::with_seed(DIAGNOSTIC_SAMPLE_SIDES, 99).unwrap());
        LifecycleHandler::new("coin-host", bus, sampler)
    }

    fn raw(action: LifecycleAction) -> Vec<u8> {
        LifecycleEvent::new(action).to_bytes().unwrap()
    }

    #[tokio::test]
    async fn test_acknowledges_each_inbound_action() {
        let bus = Arc::new(RecordingBus::default());
        let handler = handler(bus.clone());

        for action in [LifecycleAction::Start, LifecycleAction::Step, LifecycleAction::Stop] {
            assert!(!handler.handle_event(&raw(action)).await.unwrap());
        }

        let events = bus.events();
        let actions: Vec<LifecycleAction> = events.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                LifecycleAction::StartDone,
                LifecycleAction::StepDone,
                LifecycleAction::StopDone
            ]
        );
        assert!(events.iter().all(|e| e.target == "coin-host"));
        assert_eq!(events[0].reason, START_DONE_REASON);
        assert!((1..=5).contains(&events[1].payload.value));
    }

    #[tokio::test]
    async fn test_acks_publish_on_lifecycle_topic() {
        let bus = Arc::new(RecordingBus::default());
        handler(bus.clone())
            .handle_event(&raw(LifecycleAction::Start))
            .await
            .unwrap();

        let published = bus.published.lock().unwrap();
        assert_eq!(published[0].0, LIFECYCLE_TOPIC);
    }

    #[tokio::test]
    async fn test_acknowledgements_are_not_answered() {
        let bus = Arc::new(RecordingBus::default());
        let handler = handler(bus.clone());

        handler.handle_event(&raw(LifecycleAction::StepDone)).await.unwrap();
        handler.handle_event(&raw(LifecycleAction::StopDone)).await.unwrap();
        assert!(bus.events().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action_is_ignored() {
        let bus = Arc::new(RecordingBus::default());
        let handler = handler(bus.clone()).with_unknown_policy(UnknownActionPolicy::Ignore);

        let retry = handler
            .handle_event(br#"{"action":"explode"}"#)
            .await
            .unwrap();
        assert!(!retry);
        assert!(bus.events().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_event_is_dropped() {
        let bus = Arc::new(RecordingBus::default());
        let handler = handler(bus.clone());

        assert!(!handler.handle_event(b"{not json").await.unwrap());
        assert_eq!(
            handler.on_event(LIFECYCLE_TOPIC, b"{not json").await,
            TopicResponse::Drop
        );
        assert!(bus.events().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_returned() {
        let bus = Arc::new(RecordingBus {
            reject: true,
            ..Default::default()
        });
        let handler = handler(bus);

        let err = handler
            .handle_event(&raw(LifecycleAction::Start))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Publish(EnvError::PublishFailed { .. })));
        assert_eq!(
            handler.on_event(LIFECYCLE_TOPIC, &raw(LifecycleAction::Stop)).await,
            TopicResponse::Drop
        );
    }

    #[tokio::test]
    async fn test_empty_object_is_unknown_action() {
        let bus = Arc::new(RecordingBus::default());
        let handler = handler(bus.clone());

        assert_eq!(handler.on_event(LIFECYCLE_TOPIC, b"{}").await, TopicResponse::Success);
        assert!(bus.events().is_empty());
    }

    #[test]
    fn test_diagnostic_sampler_is_seeded_per_host() {
        let env = TokioEnvironment::new(99);
        let mut a = diagnostic_sampler(&env, "coin-host").unwrap();
        let mut b = diagnostic_sampler(&env, "coin-host").unwrap();
        let ctx = StepContext::default();

        for _ in 0..20 {
            let value = a.step(&ctx).unwrap();
            assert_eq!(value, b.step(&ctx).unwrap());
            assert!((1..=5).contains(&value.as_i64()));
        }
    }
}
