//! Simulated invocation transport with fault injection.

use crate::context::SimContext;
use async_trait::async_trait;
use dicesim_core::LocalRouter;
use dicesim_env::{EntityAddress, EnvError, InvocationTransport, SimEnvironment};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A scripted failure for one address.
#[derive(Debug, Clone)]
struct InjectedFailure {
    error: EnvError,

    /// Calls left to fail; `None` fails forever
    remaining: Option<u32>,
}

/// Counters exposed by the fault controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Invocations attempted through the transport
    pub invocations: u64,

    /// Invocations answered by an injected fault
    pub injected_faults: u64,
}

/// Fault injection controls for the simulated transport.
pub struct FaultController {
    /// Entity types with no serving host
    unroutable: Mutex<HashSet<String>>,

    /// Scripted failures per address
    failures: Mutex<HashMap<EntityAddress, InjectedFailure>>,

    /// Per-entity-type latency on the virtual clock
    latency: Mutex<HashMap<String, Duration>>,

    invocations: AtomicU64,
    injected_faults: AtomicU64,
}

impl FaultController {
    /// Creates a controller with no faults.
    pub fn new() -> Self {
        Self {
            unroutable: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            latency: Mutex::new(HashMap::new()),
            invocations: AtomicU64::new(0),
            injected_faults: AtomicU64::new(0),
        }
    }

    /// Makes every address of `entity_type` unroutable.
    pub fn make_unroutable(&self, entity_type: impl Into<String>) {
        self.unroutable.lock().unwrap().insert(entity_type.into());
    }

    /// Fails the next `times` calls to `address` with `error` (`None` = forever).
    pub fn fail_address(&self, address: EntityAddress, error: EnvError, times: Option<u32>) {
        self.failures.lock().unwrap().insert(
            address,
            InjectedFailure {
                error,
                remaining: times,
            },
        );
    }

    /// Sets virtual latency for calls to `entity_type`.
    pub fn set_latency(&self, entity_type: impl Into<String>, latency: Duration) {
        self.latency.lock().unwrap().insert(entity_type.into(), latency);
    }

    /// Gets the latency for an entity type (default zero).
    pub fn get_latency(&self, entity_type: &str) -> Duration {
        self.latency
            .lock()
            .unwrap()
            .get(entity_type)
            .copied()
            .unwrap_or_default()
    }

    /// Clears every injected fault and latency.
    pub fn heal_all(&self) {
        self.unroutable.lock().unwrap().clear();
        self.failures.lock().unwrap().clear();
        self.latency.lock().unwrap().clear();
    }

    /// Returns the current counters.
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            invocations: self.invocations.load(Ordering::Relaxed),
            injected_faults: self.injected_faults.load(Ordering::Relaxed),
        }
    }

    /// Decides whether a call to `address` fails, consuming failure budget.
    fn intercept(&self, address: &EntityAddress) -> Option<EnvError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let fault = if self.unroutable.lock().unwrap().contains(&address.entity_type) {
            Some(EnvError::unroutable(address))
        } else {
            let mut failures = self.failures.lock().unwrap();
            let (error, exhausted) = match failures.get_mut(address) {
                None => (None, false),
                Some(failure) => match &mut failure.remaining {
                    None => (Some(failure.error.clone()), false),
                    Some(0) => (None, true),
                    Some(n) => {
                        *n -= 1;
                        (Some(failure.error.clone()), false)
                    }
                },
            };
            if exhausted {
                failures.remove(address);
            }
            error
        };

        if fault.is_some() {
            self.injected_faults.fetch_add(1, Ordering::Relaxed);
        }
        fault
    }
}

impl Default for FaultController {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process transport routing to simulated hosts through a fault layer.
pub struct SimTransport {
    router: LocalRouter<SimContext>,
    ctx: Arc<SimContext>,
    controller: Arc<FaultController>,
}

impl SimTransport {
    pub fn new(router: LocalRouter<SimContext>, ctx: Arc<SimContext>) -> Self {
        Self {
            router,
            ctx,
            controller: Arc::new(FaultController::new()),
        }
    }

    /// Fault controller shared with the transport.
    pub fn controller(&self) -> Arc<FaultController> {
        Arc::clone(&self.controller)
    }
}

#[async_trait]
impl InvocationTransport for SimTransport {
    async fn invoke(
        &self,
        address: &EntityAddress,
        operation: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, EnvError> {
        let latency = self.controller.get_latency(&address.entity_type);
        if !latency.is_zero() {
            self.ctx.sleep(latency).await;
        }

        if let Some(err) = self.controller.intercept(address) {
            tracing::debug!(address = %address, error = %err, "Injected fault");
            return Err(err);
        }

        self.router.invoke(address, operation, payload).await
    }
}
