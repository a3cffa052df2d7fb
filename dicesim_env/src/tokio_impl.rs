//! Production implementation of SimEnvironment using Tokio.

use crate::context::{mix_seed, SimEnvironment};
use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production environment backed by Tokio and the system clock.
///
/// Unlike a typical production context the generators stay seeded: a
/// service started with the same seed reproduces the same entity values.
pub struct TokioEnvironment {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Master seed for entity generators
    seed: u64,
}

impl TokioEnvironment {
    /// Creates a new TokioEnvironment with the given master seed.
    pub fn new(seed: u64) -> Self {
        Self {
            start: Instant::now(),
            seed,
        }
    }

    /// Creates an Arc-wrapped environment for sharing across tasks.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }
}

#[async_trait]
impl SimEnvironment for TokioEnvironment {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(task = %name, "Spawning task");
        tokio::spawn(future);
    }

    fn derive_rng(&self, seed_extension: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(mix_seed(self.seed, seed_extension))
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
