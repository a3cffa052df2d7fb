//! Scenario runner - executes harness scenarios against a fresh SimWorld.

use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use dicesim_core::{
    CoinFace, FanOut, OrchestratorError, RetryPolicy, RoundRecord, RunState, StartOutcome,
    StepOutcome, StepValue, Trigger, COIN_ENTITY_TYPE, DIE_ENTITY_TYPE,
};
use dicesim_env::{EntityAddress, EnvError, EventBus, LifecycleAction, LIFECYCLE_TOPIC};
use std::time::Duration;
use tracing::{debug, info};

/// Bound on how long lifecycle acknowledgements may take.
const ACK_WINDOW: Duration = Duration::from_secs(2);

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Rounds completed by the primary run
    pub steps_taken: u64,

    /// Bound of the primary run
    pub end_steps: u64,

    /// Final state of the primary run
    pub final_state: Option<RunState>,

    /// Invocations attempted through the transport
    pub invocations: u64,

    /// Invocations answered by an injected fault
    pub injected_faults: u64,

    /// Entities activated across both hosts
    pub activations: u64,

    /// Messages published on the event bus
    pub events_published: u64,
}

type Check = Result<(), String>;

fn ensure(condition: bool, reason: impl FnOnce() -> String) -> Check {
    if condition {
        Ok(())
    } else {
        Err(reason())
    }
}

fn trigger(origin: &str) -> Option<Trigger> {
    Some(Trigger::new(origin))
}

/// Checks a round holds one in-range value per address, dice before coins.
fn check_round(record: &RoundRecord, die_sides: u32) -> Check {
    for result in &record.results {
        let valid = match (result.address.entity_type.as_str(), result.value) {
            (DIE_ENTITY_TYPE, StepValue::Number(n)) => (1..=die_sides).contains(&n),
            (COIN_ENTITY_TYPE, StepValue::Face(CoinFace::Heads | CoinFace::Tails)) => true,
            _ => false,
        };
        ensure(valid, || {
            format!(
                "round {}: {} produced {}",
                record.round, result.address, result.value
            )
        })?;
    }
    Ok(())
}

/// Runs harness scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Entities per pool
    entity_count: usize,

    /// Rounds per run
    end_steps: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            entity_count: 10,
            end_steps: 100,
        }
    }

    /// Sets the entities per pool.
    pub fn with_entity_count(mut self, entity_count: usize) -> Self {
        self.entity_count = entity_count;
        self
    }

    /// Sets the rounds per run.
    pub fn with_end_steps(mut self, end_steps: u64) -> Self {
        self.end_steps = end_steps;
        self
    }

    fn config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            entity_count: self.entity_count,
            end_steps: self.end_steps,
            ..Default::default()
        }
    }

    fn world(&self, config: SimConfig) -> Result<SimWorld, String> {
        SimWorld::new(config).map_err(|e| e.to_string())
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let mut metrics = ScenarioMetrics::default();
        let outcome = match scenario {
            ScenarioId::Baseline => self.run_baseline(&mut metrics).await,
            ScenarioId::ManualStepping => self.run_manual_stepping(&mut metrics).await,
            ScenarioId::TerminalIdempotence => self.run_terminal_idempotence(&mut metrics).await,
            ScenarioId::LifecycleRoundTrip => self.run_lifecycle_round_trip(&mut metrics).await,
            ScenarioId::MalformedEvent => self.run_malformed_event(&mut metrics).await,
            ScenarioId::RoutingFailure => self.run_routing_failure(&mut metrics).await,
            ScenarioId::TransientFailure => self.run_transient_failure(&mut metrics).await,
            ScenarioId::StopRequest => self.run_stop_request(&mut metrics).await,
            ScenarioId::ConcurrentFanOut => self.run_concurrent_fan_out(&mut metrics).await,
            ScenarioId::Determinism => self.run_determinism(&mut metrics).await,
        };

        let (passed, failure_reason) = match outcome {
            Ok(()) => (true, None),
            Err(reason) => (false, Some(reason)),
        };

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            failure_reason,
            metrics,
        }
    }

    fn collect(world: &SimWorld, metrics: &mut ScenarioMetrics) {
        let status = world.orchestrator.status();
        let transport = world.faults.stats();
        metrics.steps_taken = status.steps_taken;
        metrics.end_steps = status.end_steps;
        metrics.final_state = Some(status.state);
        metrics.invocations = transport.invocations;
        metrics.injected_faults = transport.injected_faults;
        metrics.activations =
            world.dice_host.stats().activations + world.coin_host.stats().activations;
        metrics.events_published = world.bus.stats().published;
    }

    /// SIM-001: Baseline - one die and one coin for three rounds.
    ///
    /// **Assertion**: exactly three rounds, each with a die value in 1..=6
    /// and a coin face, and the run ends `Complete`.
    async fn run_baseline(&self, metrics: &mut ScenarioMetrics) -> Check {
        let world = self.world(SimConfig {
            seed: self.seed,
            entity_count: 1,
            end_steps: 3,
            ..Default::default()
        })?;

        let status = world
            .orchestrator
            .run(trigger("baseline"))
            .await
            .map_err(|e| e.to_string())?;
        Self::collect(&world, metrics);

        ensure(status.state == RunState::Complete, || {
            format!("run ended {:?}", status.state)
        })?;
        ensure(status.steps_taken == 3, || {
            format!("steps_taken = {}", status.steps_taken)
        })?;

        let history = world.orchestrator.history().await;
        ensure(history.len() == 3, || format!("{} rounds recorded", history.len()))?;
        for record in &history {
            ensure(record.results.len() == 2, || {
                format!("round {} has {} results", record.round, record.results.len())
            })?;
            check_round(record, world.config.die_sides)?;
        }

        info!("✓ Baseline complete: {} rounds", history.len());
        Ok(())
    }

    /// SIM-002: ManualStepping - rounds only run on external `step` calls.
    async fn run_manual_stepping(&self, metrics: &mut ScenarioMetrics) -> Check {
        let world = self.world(SimConfig {
            auto_step: false,
            ..self.config()
        })?;
        let orchestrator = &world.orchestrator;

        let started = orchestrator
            .start(trigger("manual"))
            .await
            .map_err(|e| e.to_string())?;
        ensure(matches!(started, StartOutcome::AwaitingStep { .. }), || {
            format!("start returned {:?}", started)
        })?;
        ensure(orchestrator.status().steps_taken == 0, || {
            "start ran a round on its own".to_string()
        })?;

        let mut rounds = 0u64;
        loop {
            match orchestrator.step(trigger("manual")).await {
                Ok(StepOutcome::Advanced { .. }) => rounds += 1,
                Ok(StepOutcome::Completed { .. }) => {
                    rounds += 1;
                    break;
                }
                Ok(StepOutcome::AlreadyComplete) => break,
                Err(err) => return Err(err.to_string()),
            }
            ensure(rounds <= self.end_steps, || {
                format!("{} rounds exceed end_steps {}", rounds, self.end_steps)
            })?;
        }
        Self::collect(&world, metrics);

        ensure(rounds == self.end_steps, || {
            format!("{} rounds for end_steps {}", rounds, self.end_steps)
        })?;
        ensure(metrics.final_state == Some(RunState::Complete), || {
            format!("run ended {:?}", metrics.final_state)
        })?;

        info!("✓ ManualStepping complete: {} external steps", rounds);
        Ok(())
    }

    /// SIM-003: TerminalIdempotence - `step` after `Complete` is a no-op.
    async fn run_terminal_idempotence(&self, metrics: &mut ScenarioMetrics) -> Check {
        let world = self.world(self.config())?;
        world
            .orchestrator
            .run(trigger("terminal"))
            .await
            .map_err(|e| e.to_string())?;

        let before = world.faults.stats().invocations;
        for _ in 0..3 {
            let outcome = world
                .orchestrator
                .step(trigger("terminal"))
                .await
                .map_err(|e| e.to_string())?;
            ensure(outcome == StepOutcome::AlreadyComplete, || {
                format!("step after completion returned {:?}", outcome)
            })?;
        }
        Self::collect(&world, metrics);

        ensure(metrics.invocations == before, || {
            format!("{} invocations after completion", metrics.invocations - before)
        })?;
        ensure(metrics.steps_taken == self.end_steps, || {
            format!("steps_taken moved to {}", metrics.steps_taken)
        })?;

        info!("✓ TerminalIdempotence complete");
        Ok(())
    }

    /// SIM-004: LifecycleRoundTrip - one ack per host per inbound action.
    async fn run_lifecycle_round_trip(&self, metrics: &mut ScenarioMetrics) -> Check {
        let world = self.world(self.config())?;
        let hosts = SimWorld::hosts();

        for action in [LifecycleAction::Start, LifecycleAction::Step, LifecycleAction::Stop] {
            world.broadcast(action).await.map_err(|e| e.to_string())?;
            let acked = world.wait_for_acks(action, ACK_WINDOW).await;
            ensure(acked, || format!("{} not acknowledged within {:?}", action, ACK_WINDOW))?;
        }

        // Let stray duplicates surface before counting
        tokio::task::yield_now().await;
        Self::collect(&world, metrics);

        for action in [LifecycleAction::Start, LifecycleAction::Step, LifecycleAction::Stop] {
            let acks = world.acks(action);
            for host in hosts {
                let count = acks.iter().filter(|ack| ack.target == host).count();
                ensure(count == 1, || {
                    format!("{} acknowledged {} {} times", host, action, count)
                })?;
            }
        }

        for ack in world.acks(LifecycleAction::Step) {
            ensure((1..=5).contains(&ack.payload.value), || {
                format!("stepdone sample {} out of range", ack.payload.value)
            })?;
        }

        info!("✓ LifecycleRoundTrip complete: {} hosts", hosts.len());
        Ok(())
    }

    /// SIM-005: MalformedEvent - garbage is dropped, stepping unaffected.
    async fn run_malformed_event(&self, metrics: &mut ScenarioMetrics) -> Check {
        let world = self.world(SimConfig {
            seed: self.seed,
            entity_count: 1,
            end_steps: 3,
            ..Default::default()
        })?;

        world
            .bus
            .publish(LIFECYCLE_TOPIC, b"{\"action\": ".to_vec())
            .await
            .map_err(|e| e.to_string())?;

        let status = world
            .orchestrator
            .run(trigger("malformed"))
            .await
            .map_err(|e| e.to_string())?;

        // A valid event behind the garbage still gets answered
        world
            .broadcast(LifecycleAction::Start)
            .await
            .map_err(|e| e.to_string())?;
        let acked = world.wait_for_acks(LifecycleAction::Start, ACK_WINDOW).await;
        Self::collect(&world, metrics);

        ensure(acked, || "start not acknowledged after malformed event".to_string())?;
        ensure(status.state == RunState::Complete && status.steps_taken == 3, || {
            format!("run ended {:?} after {} steps", status.state, status.steps_taken)
        })?;

        let acks = world
            .bus
            .published_events(LIFECYCLE_TOPIC)
            .into_iter()
            .filter(|event| event.action.is_ack())
            .count();
        ensure(acks == SimWorld::hosts().len(), || {
            format!("{} acknowledgements published, malformed event was answered", acks)
        })?;

        info!("✓ MalformedEvent complete: event dropped, {} rounds", status.steps_taken);
        Ok(())
    }

    /// SIM-006: RoutingFailure - an unroutable coin aborts the round.
    ///
    /// **Assertion**: the die in the same round was stepped, `steps_taken`
    /// stays 0 and the auto-step loop does not run another round.
    async fn run_routing_failure(&self, metrics: &mut ScenarioMetrics) -> Check {
        let world = self.world(SimConfig {
            seed: self.seed,
            entity_count: 1,
            end_steps: 3,
            auto_step: true,
            ..Default::default()
        })?;
        world.faults.make_unroutable(COIN_ENTITY_TYPE);

        world
            .orchestrator
            .start(trigger("routing"))
            .await
            .map_err(|e| e.to_string())?;
        let status = world
            .orchestrator
            .wait_for(|s| !s.auto_stepping && s.state != RunState::Idle)
            .await;
        Self::collect(&world, metrics);

        ensure(status.state == RunState::Running, || {
            format!("run ended {:?}", status.state)
        })?;
        ensure(status.steps_taken == 0, || {
            format!("steps_taken = {} after an aborted round", status.steps_taken)
        })?;
        ensure(world.dice_host.stats().invocations == 1, || {
            format!("dice stepped {} times", world.dice_host.stats().invocations)
        })?;
        ensure(world.coin_host.stats().invocations == 0, || {
            "unroutable coin reached its host".to_string()
        })?;
        let last_error = status.last_error.unwrap_or_default();
        ensure(last_error.contains("routing failed"), || {
            format!("unexpected failure: {}", last_error)
        })?;

        // Stepping again fails the same way without advancing
        let err = world.orchestrator.step(trigger("routing")).await.err();
        ensure(matches!(err, Some(OrchestratorError::Routing { round: 1, .. })), || {
            format!("second attempt returned {:?}", err)
        })?;

        info!("✓ RoutingFailure complete: round aborted, run halted");
        Ok(())
    }

    /// SIM-007: TransientFailure - resets absorbed by the retry budget.
    async fn run_transient_failure(&self, metrics: &mut ScenarioMetrics) -> Check {
        let world = self.world(SimConfig {
            retry: RetryPolicy::bounded(2, Duration::from_millis(1)),
            ..self.config()
        })?;
        let die = EntityAddress::new(DIE_ENTITY_TYPE, "die0");
        world
            .faults
            .fail_address(die, EnvError::invocation("connection reset"), Some(2));

        let status = world
            .orchestrator
            .run(trigger("transient"))
            .await
            .map_err(|e| e.to_string())?;
        Self::collect(&world, metrics);

        ensure(status.state == RunState::Complete, || {
            format!("run ended {:?}", status.state)
        })?;
        ensure(metrics.injected_faults == 2, || {
            format!("{} faults injected", metrics.injected_faults)
        })?;

        info!("✓ TransientFailure complete: {} faults absorbed", metrics.injected_faults);
        Ok(())
    }

    /// SIM-008: StopRequest - the auto-step loop halts between rounds.
    async fn run_stop_request(&self, metrics: &mut ScenarioMetrics) -> Check {
        let world = self.world(SimConfig {
            end_steps: self.end_steps.max(1000),
            auto_step: true,
            ..self.config()
        })?;

        world
            .orchestrator
            .start(trigger("stop"))
            .await
            .map_err(|e| e.to_string())?;
        world.orchestrator.request_stop();
        let status = world.orchestrator.wait_for(|s| !s.auto_stepping).await;
        Self::collect(&world, metrics);

        ensure(status.state == RunState::Running, || {
            format!("run ended {:?} despite stop", status.state)
        })?;
        ensure(status.steps_taken < status.end_steps, || {
            "loop ran to completion despite stop".to_string()
        })?;

        info!("✓ StopRequest complete: halted after {} rounds", status.steps_taken);
        Ok(())
    }

    /// SIM-009: ConcurrentFanOut - same values, same order as sequential.
    async fn run_concurrent_fan_out(&self, metrics: &mut ScenarioMetrics) -> Check {
        let sequential = self.world(self.config())?;
        let concurrent = self.world(SimConfig {
            fan_out: FanOut::Concurrent,
            ..self.config()
        })?;

        sequential
            .orchestrator
            .run(trigger("sequential"))
            .await
            .map_err(|e| e.to_string())?;
        concurrent
            .orchestrator
            .run(trigger("concurrent"))
            .await
            .map_err(|e| e.to_string())?;
        Self::collect(&concurrent, metrics);

        let a = sequential.orchestrator.history().await;
        let b = concurrent.orchestrator.history().await;
        ensure(a.len() == b.len(), || {
            format!("{} sequential rounds vs {} concurrent", a.len(), b.len())
        })?;
        for (x, y) in a.iter().zip(&b) {
            ensure(x.results == y.results, || {
                format!("round {} differs between fan-out modes", x.round)
            })?;
        }

        info!("✓ ConcurrentFanOut complete: {} rounds match", a.len());
        Ok(())
    }

    /// SIM-010: Determinism - one seed, one history.
    async fn run_determinism(&self, metrics: &mut ScenarioMetrics) -> Check {
        let first = self.world(self.config())?;
        let second = self.world(self.config())?;

        first
            .orchestrator
            .run(trigger("determinism"))
            .await
            .map_err(|e| e.to_string())?;
        second
            .orchestrator
            .run(trigger("determinism"))
            .await
            .map_err(|e| e.to_string())?;
        Self::collect(&first, metrics);

        let a = first.orchestrator.history().await;
        let b = second.orchestrator.history().await;
        ensure(a == b, || "same seed produced different rounds".to_string())?;

        info!("✓ Determinism complete: {} identical rounds", a.len());
        Ok(())
    }
}
