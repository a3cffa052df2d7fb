//! Entity directory: address → live instance, activated on first use.
//!
//! A directory belongs to one hosting service and serves every entity type
//! it has a factory for. Instances are created the first time an address is
//! invoked. Each instance sits behind its own async mutex, so calls against
//! one address run one at a time while different addresses proceed
//! independently.
//!
//! Deactivation parks an idle instance instead of dropping it. The next call
//! revives the parked instance, so its generator continues where it left off
//! and a deactivate/reactivate cycle never replays draws.

use crate::entity::{Entity, EntityFactory, Operation, StepContext};
use dicesim_env::{EntityAddress, EnvError, SimEnvironment};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

type Instance = Arc<tokio::sync::Mutex<Box<dyn Entity>>>;

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    /// Instances created so far
    pub activations: u64,

    /// Operations dispatched so far
    pub invocations: u64,

    /// Instances currently live
    pub active: usize,

    /// Deactivated instances awaiting their next call
    pub parked: usize,
}

/// Live and parked instances, guarded together.
#[derive(Default)]
struct Registry {
    live: HashMap<EntityAddress, Instance>,
    parked: HashMap<EntityAddress, Box<dyn Entity>>,
}

/// Registry of entity instances for one hosting service.
pub struct EntityDirectory<E: SimEnvironment> {
    /// Host name (for logging)
    host: String,

    /// Environment providing seeded generators
    env: Arc<E>,

    /// Factories by entity type
    factories: HashMap<String, Arc<dyn EntityFactory>>,

    /// Live and parked instances
    registry: Mutex<Registry>,

    activations: AtomicU64,
    invocations: AtomicU64,
}

impl<E: SimEnvironment> EntityDirectory<E> {
    /// Creates an empty directory.
    pub fn new(host: impl Into<String>, env: Arc<E>) -> Self {
        Self {
            host: host.into(),
            env,
            factories: HashMap::new(),
            registry: Mutex::new(Registry::default()),
            activations: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
        }
    }

    /// Registers a factory for its entity type.
    pub fn with_factory(mut self, factory: impl EntityFactory) -> Self {
        self.factories
            .insert(factory.entity_type().to_string(), Arc::new(factory));
        self
    }

    /// Host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Entity types this directory can activate, sorted.
    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Returns true if this directory serves `entity_type`.
    pub fn serves(&self, entity_type: &str) -> bool {
        self.factories.contains_key(entity_type)
    }

    /// Dispatches `operation` to the entity at `address`, activating it if needed.
    ///
    /// `payload` is a JSON `StepContext`; an empty payload means the default
    /// context.
    pub async fn invoke(
        &self,
        address: &EntityAddress,
        operation: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, EnvError> {
        let factory = self
            .factories
            .get(&address.entity_type)
            .ok_or_else(|| EnvError::unroutable(address))?;

        let op = Operation::parse(operation)
            .ok_or_else(|| EnvError::unsupported(&address.entity_type, operation))?;

        let ctx: StepContext = if payload.is_empty() {
            StepContext::default()
        } else {
            serde_json::from_slice(payload)?
        };

        let instance = self.get_or_activate(address, factory.as_ref());
        let mut entity = instance.lock().await;
        self.invocations.fetch_add(1, Ordering::Relaxed);

        match op {
            Operation::Step => {
                let value = entity
                    .step(&ctx)
                    .map_err(|e| EnvError::invocation(format!("{}: {}", address, e)))?;
                debug!(host = %self.host, address = %address, round = ctx.round, value = %value, "Entity stepped");
                Ok(serde_json::to_vec(&value)?)
            }
        }
    }

    /// Parks the instance at `address` if it is idle.
    ///
    /// Returns false when the address has no live instance or a call is
    /// still holding it; busy instances are never moved underneath a caller.
    pub fn deactivate(&self, address: &EntityAddress) -> bool {
        let mut registry = self.lock_registry();
        let idle = registry
            .live
            .get(address)
            .map(|instance| Arc::strong_count(instance) == 1)
            .unwrap_or(false);
        if !idle {
            return false;
        }

        let Some(instance) = registry.live.remove(address) else {
            return false;
        };
        // Clones are only handed out under the registry lock, so the count
        // checked above still holds.
        match Arc::try_unwrap(instance) {
            Ok(entity) => {
                registry.parked.insert(address.clone(), entity.into_inner());
                info!(host = %self.host, address = %address, "Entity deactivated");
                true
            }
            Err(instance) => {
                registry.live.insert(address.clone(), instance);
                false
            }
        }
    }

    /// Returns true if `address` has a live instance.
    pub fn is_active(&self, address: &EntityAddress) -> bool {
        self.lock_registry().live.contains_key(address)
    }

    /// Returns current counters.
    pub fn stats(&self) -> DirectoryStats {
        let registry = self.lock_registry();
        DirectoryStats {
            activations: self.activations.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            active: registry.live.len(),
            parked: registry.parked.len(),
        }
    }

    fn get_or_activate(&self, address: &EntityAddress, factory: &dyn EntityFactory) -> Instance {
        let mut registry = self.lock_registry();
        if let Some(instance) = registry.live.get(address) {
            return Arc::clone(instance);
        }

        let entity = match registry.parked.remove(address) {
            Some(entity) => {
                info!(host = %self.host, address = %address, "Entity reactivated");
                entity
            }
            None => {
                let rng = self.env.derive_rng(address.fingerprint());
                self.activations.fetch_add(1, Ordering::Relaxed);
                info!(host = %self.host, address = %address, "Entity activated");
                factory.activate(rng)
            }
        };

        let instance: Instance = Arc::new(tokio::sync::Mutex::new(entity));
        registry.live.insert(address.clone(), Arc::clone(&instance));
        instance
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        // A poisoned map is still structurally valid; keep serving.
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CoinFactory, DieFactory, StepValue, COIN_ENTITY_TYPE, DIE_ENTITY_TYPE};
    use dicesim_env::{mix_seed, TokioEnvironment};
    use futures::future::join_all;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn dice_directory(seed: u64) -> EntityDirectory<TokioEnvironment> {
        EntityDirectory::new("dice-host", TokioEnvironment::shared(seed))
            .with_factory(DieFactory::default())
    }

    async fn roll(dir: &EntityDirectory<TokioEnvironment>, id: &str) -> StepValue {
        let addr = EntityAddress::new(DIE_ENTITY_TYPE, id);
        let bytes = dir.invoke(&addr, "Step", b"").await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_activate_on_first_use() {
        let dir = dice_directory(99);
        let addr = EntityAddress::new(DIE_ENTITY_TYPE, "die0");

        assert!(!dir.is_active(&addr));
        let value = roll(&dir, "die0").await;
        assert!(matches!(value, StepValue::Number(1..=6)));
        assert!(dir.is_active(&addr));

        roll(&dir, "die0").await;
        let stats = dir.stats();
        assert_eq!(stats.activations, 1);
        assert_eq!(stats.invocations, 2);
        assert_eq!(stats.active, 1);
    }

    #[tokio::test]
    async fn test_unknown_type_is_unroutable() {
        let dir = dice_directory(99);
        let addr = EntityAddress::new(COIN_ENTITY_TYPE, "coin0");

        let err = dir.invoke(&addr, "Step", b"").await.unwrap_err();
        assert!(matches!(err, EnvError::AddressNotRoutable(_)));
        assert_eq!(dir.stats().activations, 0);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_unsupported() {
        let dir = dice_directory(99);
        let addr = EntityAddress::new(DIE_ENTITY_TYPE, "die0");

        let err = dir.invoke(&addr, "Explode", b"").await.unwrap_err();
        assert!(matches!(err, EnvError::OperationNotSupported { .. }));
    }

    #[tokio::test]
    async fn test_malformed_context_is_rejected() {
        let dir = dice_directory(99);
        let addr = EntityAddress::new(DIE_ENTITY_TYPE, "die0");

        let err = dir.invoke(&addr, "Step", b"{not json").await.unwrap_err();
        assert!(matches!(err, EnvError::SerializationError(_)));
    }

    #[tokio::test]
    async fn test_same_seed_same_values_per_address() {
        let a = dice_directory(99);
        let b = dice_directory(99);

        for id in ["die0", "die1", "die2"] {
            for _ in 0..5 {
                assert_eq!(roll(&a, id).await, roll(&b, id).await);
            }
        }
    }

    #[tokio::test]
    async fn test_addresses_own_their_generators() {
        // Interleaving calls to die1 must not change die0's stream
        let a = dice_directory(7);
        let b = dice_directory(7);

        let mut solo = Vec::new();
        let mut mixed = Vec::new();
        for _ in 0..10 {
            solo.push(roll(&a, "die0").await);
            mixed.push(roll(&b, "die0").await);
            roll(&b, "die1").await;
        }
        assert_eq!(solo, mixed);
    }

    #[tokio::test]
    async fn test_deactivate() {
        let dir = EntityDirectory::new("coin-host", TokioEnvironment::shared(1))
            .with_factory(CoinFactory);
        let addr = EntityAddress::new(COIN_ENTITY_TYPE, "coin0");

        assert!(!dir.deactivate(&addr));
        dir.invoke(&addr, "Step", b"").await.unwrap();
        assert!(dir.deactivate(&addr));
        assert!(!dir.is_active(&addr));
        assert!(!dir.deactivate(&addr));
        assert_eq!(dir.stats().parked, 1);
        assert_eq!(dir.entity_types(), vec![COIN_ENTITY_TYPE.to_string()]);

        dir.invoke(&addr, "Step", b"").await.unwrap();
        let stats = dir.stats();
        assert_eq!(stats.activations, 1);
        assert_eq!((stats.active, stats.parked), (1, 0));
    }

    #[tokio::test]
    async fn test_deactivation_resumes_generator() {
        let reference = dice_directory(99);
        let mut uninterrupted = Vec::new();
        for _ in 0..16 {
            uninterrupted.push(roll(&reference, "die0").await);
        }

        let dir = dice_directory(99);
        let addr = EntityAddress::new(DIE_ENTITY_TYPE, "die0");
        let mut draws = Vec::new();
        for _ in 0..8 {
            draws.push(roll(&dir, "die0").await);
        }
        assert!(dir.deactivate(&addr));
        for _ in 0..8 {
            draws.push(roll(&dir, "die0").await);
        }

        assert_eq!(draws, uninterrupted);
        assert_eq!(dir.stats().activations, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_to_one_address_are_serialized() {
        const CALLS: usize = 64;
        let seed = 1234;
        let dir = Arc::new(dice_directory(seed));
        let addr = EntityAddress::new(DIE_ENTITY_TYPE, "die0");

        let calls = (0..CALLS).map(|_| {
            let dir = Arc::clone(&dir);
            tokio::spawn(async move { roll(&dir, "die0").await })
        });
        let mut got: Vec<u32> = join_all(calls)
            .await
            .into_iter()
            .map(|joined| match joined.unwrap() {
                StepValue::Number(n) => n,
                other => panic!("unexpected value {other}"),
            })
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(mix_seed(seed, addr.fingerprint()));
        let mut expected: Vec<u32> = (0..CALLS).map(|_| rng.gen_range(1..=6)).collect();

        got.sort_unstable();
        expected.sort_unstable();
        assert_eq!(got, expected);

        let stats = dir.stats();
        assert_eq!(stats.activations, 1);
        assert_eq!(stats.invocations, CALLS as u64);
    }
}
