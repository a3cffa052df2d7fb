//! Core environment context trait for dicesim services.

use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the orchestrator and the
/// entity hosts can run both as networked services (tokio) and inside the
/// deterministic harness (virtual clock).
///
/// # Implementations
///
/// - **Production**: `TokioEnvironment` - wraps `tokio::time`, configured seed
/// - **Simulation**: `SimContext` (in `dicesim_sim`) - virtual clock, seed
///
/// # Determinism
///
/// Every entity generator is derived from `seed()` through
/// `derive_rng()`, so a run is reproducible from its seed even in production.
#[async_trait]
pub trait SimEnvironment: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for run start/finish stamps.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Derives a deterministic generator from the master seed.
    ///
    /// The implementation combines the master seed with `seed_extension`
    /// so every entity gets a unique but reproducible stream.
    fn derive_rng(&self, seed_extension: u64) -> ChaCha8Rng;

    /// Returns the master seed (for logging/debugging).
    fn seed(&self) -> u64;
}

/// Mixes a master seed with an extension.
///
/// Shared by every `SimEnvironment` so production and simulation derive
/// identical entity streams from the same seed.
pub fn mix_seed(master_seed: u64, seed_extension: u64) -> u64 {
    master_seed
        .wrapping_mul(0x9e3779b97f4a7c15) // Golden ratio prime
        .wrapping_add(seed_extension.wrapping_mul(0x517cc1b727220a95))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_seed_separates_extensions() {
        assert_eq!(mix_seed(99, 1), mix_seed(99, 1));
        assert_ne!(mix_seed(99, 1), mix_seed(99, 2));
        assert_ne!(mix_seed(98, 1), mix_seed(99, 1));
    }
}
