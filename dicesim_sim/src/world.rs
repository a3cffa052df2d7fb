//! SimWorld - the simulation harness container.

use crate::bus::MemoryBus;
use crate::context::SimContext;
use crate::network::{FaultController, SimTransport};

use dicesim_core::{
    diagnostic_sampler, CoinFactory, DieFactory, EntityDirectory, EntityError, FanOut,
    LifecycleHandler, LocalRouter, Orchestrator, OrchestratorConfig, OrchestratorError,
    RetryPolicy, DEFAULT_DIE_SIDES,
};
use dicesim_env::{EnvError, EventBus, LifecycleAction, LifecycleEvent, LIFECYCLE_TOPIC};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Host serving dice.
pub const DICE_HOST: &str = "dice-host";

/// Host serving coins.
pub const COIN_HOST: &str = "coin-host";

/// Name the orchestrator publishes lifecycle events under.
pub const ORCHESTRATOR_HOST: &str = "orchestrator";

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Entities per pool
    pub entity_count: usize,

    /// Rounds until completion
    pub end_steps: u64,

    /// Run rounds on a background loop after `start`
    pub auto_step: bool,

    /// Faces per die
    pub die_sides: u32,

    /// Round fan-out strategy
    pub fan_out: FanOut,

    /// Retry budget for transient failures
    pub retry: RetryPolicy,

    /// Per-invocation deadline
    pub invoke_timeout: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 99,
            entity_count: 10,
            end_steps: 100,
            auto_step: true,
            die_sides: DEFAULT_DIE_SIDES,
            fan_out: FanOut::Sequential,
            retry: RetryPolicy::none(),
            invoke_timeout: Duration::from_secs(5),
        }
    }
}

impl SimConfig {
    /// Orchestrator configuration for this run.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            auto_step: self.auto_step,
            entity_count: self.entity_count,
            end_steps: self.end_steps,
            fan_out: self.fan_out,
            invoke_timeout: self.invoke_timeout,
            retry: self.retry,
            ..Default::default()
        }
    }
}

/// Errors building a world.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("Invalid entity configuration: {0}")]
    Entity(#[from] EntityError),

    #[error("Invalid orchestrator configuration: {0}")]
    Orchestrator(#[from] OrchestratorError),
}

/// Orchestrator as wired inside the harness.
pub type SimOrchestrator = Orchestrator<SimTransport, SimContext>;

/// The SimWorld - container for the entire simulation.
///
/// One process hosts everything: a dice host and a coin host (each an
/// entity directory plus a lifecycle handler on the shared bus), the
/// simulated transport between them and the orchestrator.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Directory of the dice host
    pub dice_host: Arc<EntityDirectory<SimContext>>,

    /// Directory of the coin host
    pub coin_host: Arc<EntityDirectory<SimContext>>,

    /// Transport the orchestrator invokes through
    pub transport: Arc<SimTransport>,

    /// Fault injection for the transport
    pub faults: Arc<FaultController>,

    /// Lifecycle event bus
    pub bus: Arc<MemoryBus>,

    /// The orchestrator under test
    pub orchestrator: Arc<SimOrchestrator>,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Result<Self, WorldError> {
        let context = SimContext::shared(config.seed);

        let dice_host = Arc::new(
            EntityDirectory::new(DICE_HOST, context.clone())
                .with_factory(DieFactory::new(config.die_sides)?),
        );
        let coin_host =
            Arc::new(EntityDirectory::new(COIN_HOST, context.clone()).with_factory(CoinFactory));

        let router = LocalRouter::new()
            .with_directory(dice_host.clone())
            .with_directory(coin_host.clone());
        let transport = Arc::new(SimTransport::new(router, context.clone()));
        let faults = transport.controller();

        let bus = MemoryBus::shared();
        for host in Self::hosts() {
            let sampler = diagnostic_sampler(context.as_ref(), host)?;
            let handler = LifecycleHandler::new(host, bus.clone(), sampler);
            bus.subscribe(LIFECYCLE_TOPIC, Arc::new(handler));
        }

        let orchestrator = Arc::new(Orchestrator::new(
            config.orchestrator_config(),
            transport.clone(),
            context.clone(),
        )?);

        Ok(Self {
            config,
            context,
            dice_host,
            coin_host,
            transport,
            faults,
            bus,
            orchestrator,
        })
    }

    /// Names of the entity-hosting services.
    pub fn hosts() -> [&'static str; 2] {
        [DICE_HOST, COIN_HOST]
    }

    /// Publishes a lifecycle action on the lifecycle topic.
    pub async fn broadcast(&self, action: LifecycleAction) -> Result<(), EnvError> {
        let event = LifecycleEvent::new(action).with_target(ORCHESTRATOR_HOST);
        self.bus.publish(LIFECYCLE_TOPIC, event.to_bytes()?).await
    }

    /// Acknowledgements of `action` published so far.
    pub fn acks(&self, action: LifecycleAction) -> Vec<LifecycleEvent> {
        let Some(ack) = action.ack() else {
            return Vec::new();
        };
        self.bus
            .published_events(LIFECYCLE_TOPIC)
            .into_iter()
            .filter(|event| event.action == ack)
            .collect()
    }

    /// Waits until every host acknowledged `action` at least once.
    pub async fn wait_for_acks(&self, action: LifecycleAction, timeout: Duration) -> bool {
        let Some(ack) = action.ack() else {
            return false;
        };
        let hosts = Self::hosts().len();
        self.bus
            .wait_for(timeout, |log| {
                log.iter()
                    .filter(|msg| msg.topic == LIFECYCLE_TOPIC)
                    .filter_map(|msg| LifecycleEvent::from_bytes(&msg.data).ok())
                    .filter(|event| event.action == ack)
                    .count()
                    >= hosts
            })
            .await
    }

    /// Number of entities the orchestrator steps per round.
    pub fn entity_count(&self) -> usize {
        self.orchestrator.addresses().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicesim_core::{RunState, Trigger};

    #[test]
    fn test_sim_world_creation() {
        let world = SimWorld::new(SimConfig {
            entity_count: 3,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(world.entity_count(), 6);
        assert_eq!(world.bus.subscriber_count(LIFECYCLE_TOPIC), 2);
        assert_eq!(world.orchestrator.status().state, RunState::Idle);
    }

    #[test]
    fn test_invalid_die_sides() {
        let result = SimWorld::new(SimConfig {
            die_sides: 1,
            ..Default::default()
        });
        assert!(matches!(result, Err(WorldError::Entity(EntityError::InvalidSides(1)))));
    }

    #[tokio::test]
    async fn test_sim_world_run() {
        let world = SimWorld::new(SimConfig {
            entity_count: 2,
            end_steps: 4,
            ..Default::default()
        })
        .unwrap();

        let status = world
            .orchestrator
            .run(Some(Trigger::new("test")))
            .await
            .unwrap();
        assert_eq!(status.state, RunState::Complete);
        assert_eq!(status.steps_taken, 4);
        assert_eq!(world.dice_host.stats().activations, 2);
        assert_eq!(world.coin_host.stats().invocations, 8);
    }
}
