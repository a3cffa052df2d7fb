//! Orchestrator - owns simulated time and drives synchronized rounds.
//!
//! # Run State Machine
//!
//! ```text
//!            start                  step (steps_taken < end_steps)
//!   Idle ───────────► Running ◄──────────────┐
//!                        │  └────────────────┘
//!                        │ step reaching end_steps
//!                        ▼
//!                     Complete   (step is a no-op; only start begins a new run)
//! ```
//!
//! A round steps every configured entity once, in pool order then index
//! order. Any entity failure aborts the round: `steps_taken` and the
//! simulated clock stay where they were and the failure is returned.
//!
//! Auto-stepping runs rounds in an explicit loop on a background task
//! instead of re-invoking itself, so a stop request can halt the run
//! between two rounds.

use crate::client::{EntityClient, RetryPolicy};
use crate::clock::{default_start_time, SimulationClock};
use crate::entity::{StepContext, StepValue, COIN_ENTITY_TYPE, DIE_ENTITY_TYPE};
use crate::error::OrchestratorError;
use dicesim_env::{EntityAddress, InvocationTransport, SimEnvironment};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};
use uuid::Uuid;

/// A family of entities of one type, addressed `{id_prefix}{index}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPool {
    pub entity_type: String,
    pub id_prefix: String,
}

impl EntityPool {
    pub fn new(entity_type: impl Into<String>, id_prefix: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id_prefix: id_prefix.into(),
        }
    }

    /// Dice addressed `die0`, `die1`, ...
    pub fn dice() -> Self {
        Self::new(DIE_ENTITY_TYPE, "die")
    }

    /// Coins addressed `coin0`, `coin1`, ...
    pub fn coins() -> Self {
        Self::new(COIN_ENTITY_TYPE, "coin")
    }

    /// The first `count` addresses of this pool.
    pub fn addresses(&self, count: usize) -> Vec<EntityAddress> {
        (0..count)
            .map(|i| EntityAddress::new(&self.entity_type, format!("{}{}", self.id_prefix, i)))
            .collect()
    }
}

/// How a round fans out to its entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FanOut {
    /// One invocation at a time, in address order
    #[default]
    Sequential,
    /// All invocations in flight together; results kept in address order
    Concurrent,
}

/// Configuration for the orchestrator. Fixed for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Run rounds back to back without external triggers
    pub auto_step: bool,

    /// Entities per pool
    pub entity_count: usize,

    /// Rounds until the run is complete
    pub end_steps: u64,

    /// Entity pools stepped each round, in order
    pub entity_pools: Vec<EntityPool>,

    /// Simulated epoch
    pub start_time: SystemTime,

    /// Simulated time advanced per round
    pub step_duration: Duration,

    /// Round fan-out strategy
    pub fan_out: FanOut,

    /// Deadline for each entity invocation
    pub invoke_timeout: Duration,

    /// Retry budget for transient transport failures
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_step: true,
            entity_count: 10,
            end_steps: 100,
            entity_pools: vec![EntityPool::dice(), EntityPool::coins()],
            start_time: default_start_time(),
            step_duration: Duration::from_secs(3600),
            fan_out: FanOut::Sequential,
            invoke_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Checks the configuration can drive a run.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.end_steps == 0 {
            return Err(OrchestratorError::Configuration(
                "end_steps must be at least 1".into(),
            ));
        }
        if self.entity_count == 0 || self.entity_pools.is_empty() {
            return Err(OrchestratorError::Configuration(
                "at least one entity must be configured".into(),
            ));
        }

        let addresses = self.addresses();
        let unique: HashSet<&EntityAddress> = addresses.iter().collect();
        if unique.len() != addresses.len() {
            return Err(OrchestratorError::Configuration(
                "entity pools produce duplicate addresses".into(),
            ));
        }
        Ok(())
    }

    /// Every address stepped per round, in round order.
    pub fn addresses(&self) -> Vec<EntityAddress> {
        self.entity_pools
            .iter()
            .flat_map(|pool| pool.addresses(self.entity_count))
            .collect()
    }
}

/// External trigger for `start`/`step` (the invocation that requested it).
#[derive(Debug, Clone, Default)]
pub struct Trigger {
    /// Where the trigger came from (route, CLI, harness)
    pub origin: String,

    /// Raw request payload
    pub data: Vec<u8>,
}

impl Trigger {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Complete,
}

/// Result of `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// Rounds are running on a background task
    AutoStepping { run_id: Uuid },
    /// Armed; rounds run on external `step` calls
    AwaitingStep { run_id: Uuid },
}

/// Result of `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Round completed below the bound
    Advanced { round: u64 },
    /// Round completed and reached the bound
    Completed { round: u64 },
    /// Run was already complete; nothing happened
    AlreadyComplete,
}

/// Value produced by one entity in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityResult {
    pub address: EntityAddress,
    pub value: StepValue,
}

/// Everything one completed round produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundRecord {
    /// 1-based round number
    pub round: u64,

    /// Simulated time the round ran at
    pub simulated_time: SystemTime,

    /// Results in address order
    pub results: Vec<EntityResult>,
}

/// Point-in-time view of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub run_id: Option<Uuid>,
    pub state: RunState,
    pub steps_taken: u64,
    pub end_steps: u64,
    pub simulated_time: SystemTime,
    pub actual_start: Option<SystemTime>,
    pub actual_finish: Option<SystemTime>,
    pub last_error: Option<String>,
    pub auto_stepping: bool,
}

struct RunInner {
    run_id: Option<Uuid>,
    state: RunState,
    clock: SimulationClock,
    actual_start: Option<SystemTime>,
    actual_finish: Option<SystemTime>,
    last_error: Option<String>,
    history: Vec<RoundRecord>,
}

impl RunInner {
    fn snapshot(&self, auto_stepping: bool) -> RunStatus {
        RunStatus {
            run_id: self.run_id,
            state: self.state,
            steps_taken: self.clock.steps_taken(),
            end_steps: self.clock.end_steps(),
            simulated_time: self.clock.current_time(),
            actual_start: self.actual_start,
            actual_finish: self.actual_finish,
            last_error: self.last_error.clone(),
            auto_stepping,
        }
    }
}

/// Clears the round-loop flag when a loop ends, even if its future is dropped.
struct DrivingGuard<'a> {
    flag: &'a AtomicBool,
    status_tx: &'a watch::Sender<RunStatus>,
}

impl<'a> DrivingGuard<'a> {
    fn new(flag: &'a AtomicBool, status_tx: &'a watch::Sender<RunStatus>) -> Self {
        Self { flag, status_tx }
    }
}

impl Drop for DrivingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.status_tx.send_modify(|status| status.auto_stepping = false);
    }
}

/// Coordinator owning simulated time and the round loop.
pub struct Orchestrator<T: InvocationTransport, E: SimEnvironment> {
    config: OrchestratorConfig,
    addresses: Vec<EntityAddress>,
    client: EntityClient<T>,
    env: Arc<E>,

    /// Step critical section: every mutation of the run happens under it
    run: Mutex<RunInner>,

    stop_requested: AtomicBool,
    auto_stepping: AtomicBool,
    status_tx: watch::Sender<RunStatus>,
}

impl<T: InvocationTransport, E: SimEnvironment> Orchestrator<T, E> {
    /// Creates an idle orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        transport: Arc<T>,
        env: Arc<E>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let addresses = config.addresses();
        let client = EntityClient::new(transport)
            .with_timeout(config.invoke_timeout)
            .with_retry(config.retry);

        let inner = RunInner {
            run_id: None,
            state: RunState::Idle,
            clock: SimulationClock::new(config.start_time, config.step_duration, config.end_steps),
            actual_start: None,
            actual_finish: None,
            last_error: None,
            history: Vec::new(),
        };
        let (status_tx, _) = watch::channel(inner.snapshot(false));

        Ok(Self {
            config,
            addresses,
            client,
            env,
            run: Mutex::new(inner),
            stop_requested: AtomicBool::new(false),
            auto_stepping: AtomicBool::new(false),
            status_tx,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Addresses stepped each round, in round order.
    pub fn addresses(&self) -> &[EntityAddress] {
        &self.addresses
    }

    /// Starts a new run.
    ///
    /// With `auto_step` the rounds are scheduled on a background task and
    /// this returns without waiting for them.
    pub async fn start(
        self: &Arc<Self>,
        trigger: Option<Trigger>,
    ) -> Result<StartOutcome, OrchestratorError> {
        let trigger = trigger.ok_or(OrchestratorError::InvalidTrigger)?;

        if !self.config.auto_step {
            self.ensure_not_auto_stepping()?;
            let run_id = self.begin_run(&trigger).await;
            info!(
                run_id = %run_id,
                "Simulation started and paused, invoke step to run the next round"
            );
            return Ok(StartOutcome::AwaitingStep { run_id });
        }

        if self.auto_stepping.swap(true, Ordering::SeqCst) {
            return Err(self.already_running());
        }
        let run_id = self.begin_run(&trigger).await;

        let this = Arc::clone(self);
        self.env.spawn("orchestrator-rounds", async move {
            let _driving = DrivingGuard::new(&this.auto_stepping, &this.status_tx);
            // Failures are logged and recorded in the run status
            let _ = this.drive_rounds().await;
        });

        Ok(StartOutcome::AutoStepping { run_id })
    }

    /// Runs one round.
    ///
    /// After completion this is a no-op returning `AlreadyComplete`.
    pub async fn step(&self, trigger: Option<Trigger>) -> Result<StepOutcome, OrchestratorError> {
        trigger.ok_or(OrchestratorError::InvalidTrigger)?;
        self.step_round().await
    }

    /// Starts a new run and drives it inline until it completes, fails or
    /// is asked to stop. Ignores `auto_step`.
    ///
    /// Holds the same guard as an auto-step loop, so `start` is rejected
    /// until this returns.
    pub async fn run(&self, trigger: Option<Trigger>) -> Result<RunStatus, OrchestratorError> {
        let trigger = trigger.ok_or(OrchestratorError::InvalidTrigger)?;
        if self.auto_stepping.swap(true, Ordering::SeqCst) {
            return Err(self.already_running());
        }

        let result = {
            let _driving = DrivingGuard::new(&self.auto_stepping, &self.status_tx);
            self.begin_run(&trigger).await;
            self.drive_rounds().await
        };
        result.map(|()| self.status())
    }

    /// Asks the round loop to halt before its next round.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        info!("Stop requested");
    }

    /// Latest run status (never blocks on an in-flight round).
    pub fn status(&self) -> RunStatus {
        self.status_tx.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status_tx.subscribe()
    }

    /// Waits until the status satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&RunStatus) -> bool) -> RunStatus {
        let mut rx = self.status_tx.subscribe();
        let result = rx.wait_for(predicate).await.map(|status| status.clone());
        match result {
            Ok(status) => status,
            Err(_) => self.status(),
        }
    }

    /// Records of all completed rounds of the current run.
    pub async fn history(&self) -> Vec<RoundRecord> {
        self.run.lock().await.history.clone()
    }

    fn ensure_not_auto_stepping(&self) -> Result<(), OrchestratorError> {
        if self.auto_stepping.load(Ordering::SeqCst) {
            return Err(self.already_running());
        }
        Ok(())
    }

    fn already_running(&self) -> OrchestratorError {
        let run_id = self
            .status()
            .run_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        OrchestratorError::AlreadyRunning(run_id)
    }

    fn publish_status(&self, run: &RunInner) {
        self.status_tx
            .send_replace(run.snapshot(self.auto_stepping.load(Ordering::SeqCst)));
    }

    async fn begin_run(&self, trigger: &Trigger) -> Uuid {
        let mut run = self.run.lock().await;
        let run_id = Uuid::new_v4();

        run.run_id = Some(run_id);
        run.state = RunState::Running;
        run.clock.reset();
        run.actual_start = Some(self.env.system_time());
        run.actual_finish = None;
        run.last_error = None;
        run.history.clear();
        self.stop_requested.store(false, Ordering::SeqCst);

        info!(
            run_id = %run_id,
            origin = %trigger.origin,
            trigger_bytes = trigger.data.len(),
            auto_step = self.config.auto_step,
            end_steps = self.config.end_steps,
            entities = self.addresses.len(),
            "Simulation started"
        );
        self.publish_status(&run);
        run_id
    }

    async fn drive_rounds(&self) -> Result<(), OrchestratorError> {
        loop {
            if self.stop_requested.swap(false, Ordering::SeqCst) {
                info!("Halting between rounds on stop request");
                return Ok(());
            }

            match self.step_round().await {
                Ok(StepOutcome::Advanced { .. }) => tokio::task::yield_now().await,
                Ok(_) => return Ok(()),
                Err(err) => {
                    error!(round = ?err.round(), error = %err, "Simulation halted");
                    return Err(err);
                }
            }
        }
    }

    async fn step_round(&self) -> Result<StepOutcome, OrchestratorError> {
        let mut run = self.run.lock().await;

        match run.state {
            RunState::Idle => return Err(OrchestratorError::NotStarted),
            RunState::Complete => {
                debug!("Simulation already complete, ignoring step");
                return Ok(StepOutcome::AlreadyComplete);
            }
            RunState::Running => {}
        }

        let round = run.clock.next_round();
        let simulated_time = run.clock.current_time();
        let ctx = StepContext {
            round,
            simulated_time: run.clock.current_secs(),
        };

        let results = match self.fan_out(&ctx).await {
            Ok(results) => results,
            Err(err) => {
                run.last_error = Some(err.to_string());
                self.publish_status(&run);
                return Err(err);
            }
        };

        run.clock.advance();
        run.history.push(RoundRecord {
            round,
            simulated_time,
            results,
        });

        let outcome = if run.clock.is_terminal() {
            run.state = RunState::Complete;
            let finish = self.env.system_time();
            run.actual_finish = Some(finish);
            let run_time = run
                .actual_start
                .and_then(|start| finish.duration_since(start).ok())
                .unwrap_or_default();
            info!(
                rounds = run.clock.steps_taken(),
                simulated_end = ?run.clock.current_time(),
                run_time_ms = run_time.as_millis() as u64,
                "Simulation complete"
            );
            StepOutcome::Completed { round }
        } else {
            if !self.config.auto_step {
                info!(
                    "{} steps taken of {} - invoke step for the next round",
                    run.clock.steps_taken(),
                    run.clock.end_steps()
                );
            }
            StepOutcome::Advanced { round }
        };

        self.publish_status(&run);
        Ok(outcome)
    }

    async fn fan_out(&self, ctx: &StepContext) -> Result<Vec<EntityResult>, OrchestratorError> {
        match self.config.fan_out {
            FanOut::Sequential => {
                let mut results = Vec::with_capacity(self.addresses.len());
                for address in &self.addresses {
                    results.push(self.step_entity(address, ctx).await?);
                }
                Ok(results)
            }
            FanOut::Concurrent => {
                try_join_all(self.addresses.iter().map(|address| self.step_entity(address, ctx)))
                    .await
            }
        }
    }

    async fn step_entity(
        &self,
        address: &EntityAddress,
        ctx: &StepContext,
    ) -> Result<EntityResult, OrchestratorError> {
        match self.client.step(address, ctx).await {
            Ok(value) => {
                info!(round = ctx.round, address = %address, result = %value, "Entity result");
                Ok(EntityResult {
                    address: address.clone(),
                    value,
                })
            }
            Err(err) => {
                error!(round = ctx.round, address = %address, error = %err, "Entity invocation failed");
                Err(OrchestratorError::entity_failure(ctx.round, address.clone(), err))
            }
        }
    }
}
