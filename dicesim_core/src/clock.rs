//! Simulated time owned by the orchestrator.

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default simulated epoch: 2000-01-01T00:00:00Z.
pub fn default_start_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(946_684_800)
}

/// Simulated clock and step counter for one run.
///
/// `steps_taken` grows by exactly one per completed round and the run is
/// terminal once it reaches `end_steps`.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationClock {
    start_time: SystemTime,
    current_time: SystemTime,
    step_duration: Duration,
    steps_taken: u64,
    end_steps: u64,
}

impl SimulationClock {
    /// Creates a clock at `start_time`.
    pub fn new(start_time: SystemTime, step_duration: Duration, end_steps: u64) -> Self {
        Self {
            start_time,
            current_time: start_time,
            step_duration,
            steps_taken: 0,
            end_steps,
        }
    }

    /// Rewinds to the simulated epoch with no steps taken.
    pub fn reset(&mut self) {
        self.current_time = self.start_time;
        self.steps_taken = 0;
    }

    /// Records one completed round and returns its number.
    pub fn advance(&mut self) -> u64 {
        debug_assert!(!self.is_terminal(), "advance() past end_steps");
        self.steps_taken += 1;
        self.current_time += self.step_duration;
        self.steps_taken
    }

    /// Number of the round that would run next.
    pub fn next_round(&self) -> u64 {
        self.steps_taken + 1
    }

    pub fn is_terminal(&self) -> bool {
        self.steps_taken >= self.end_steps
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    pub fn end_steps(&self) -> u64 {
        self.end_steps
    }

    pub fn current_time(&self) -> SystemTime {
        self.current_time
    }

    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// Current simulated time as seconds since the UNIX epoch.
    pub fn current_secs(&self) -> u64 {
        self.current_time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
