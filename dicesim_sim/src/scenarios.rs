//! Named harness scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: one die, one coin, three rounds
    Baseline,

    /// SIM-002: rounds driven by external step calls
    ManualStepping,

    /// SIM-003: stepping a complete run changes nothing
    TerminalIdempotence,

    /// SIM-004: every host acknowledges start/step/stop
    LifecycleRoundTrip,

    /// SIM-005: a malformed event is dropped without disturbing stepping
    MalformedEvent,

    /// SIM-006: an unroutable entity aborts the round and the run
    RoutingFailure,

    /// SIM-007: transient invocation failures absorbed by the retry budget
    TransientFailure,

    /// SIM-008: a stop request halts the auto-step loop
    StopRequest,

    /// SIM-009: concurrent fan-out matches sequential fan-out
    ConcurrentFanOut,

    /// SIM-010: the same seed reproduces the same run
    Determinism,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::ManualStepping,
            ScenarioId::TerminalIdempotence,
            ScenarioId::LifecycleRoundTrip,
            ScenarioId::MalformedEvent,
            ScenarioId::RoutingFailure,
            ScenarioId::TransientFailure,
            ScenarioId::StopRequest,
            ScenarioId::ConcurrentFanOut,
            ScenarioId::Determinism,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::ManualStepping => "manual_stepping",
            ScenarioId::TerminalIdempotence => "terminal_idempotence",
            ScenarioId::LifecycleRoundTrip => "lifecycle_round_trip",
            ScenarioId::MalformedEvent => "malformed_event",
            ScenarioId::RoutingFailure => "routing_failure",
            ScenarioId::TransientFailure => "transient_failure",
            ScenarioId::StopRequest => "stop_request",
            ScenarioId::ConcurrentFanOut => "concurrent_fan_out",
            ScenarioId::Determinism => "determinism",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "end_steps=3 with one die and one coin, ends Complete",
            ScenarioId::ManualStepping => "auto_step=false, exactly end_steps external steps",
            ScenarioId::TerminalIdempotence => "step after Complete invokes no entity",
            ScenarioId::LifecycleRoundTrip => "start/step/stop answered once per host",
            ScenarioId::MalformedEvent => "garbage on the lifecycle topic, no ack, run unaffected",
            ScenarioId::RoutingFailure => "coin type unroutable, round aborts, run halts",
            ScenarioId::TransientFailure => "two injected resets absorbed by two retries",
            ScenarioId::StopRequest => "stop requested right after start halts the loop",
            ScenarioId::ConcurrentFanOut => "concurrent rounds keep address order and values",
            ScenarioId::Determinism => "two runs with one seed record identical rounds",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" | "a" | "sim-001" => Ok(ScenarioId::Baseline),
            "manual_stepping" | "manual" | "sim-002" => Ok(ScenarioId::ManualStepping),
            "terminal_idempotence" | "terminal" | "sim-003" => Ok(ScenarioId::TerminalIdempotence),
            "lifecycle_round_trip" | "lifecycle" | "sim-004" => Ok(ScenarioId::LifecycleRoundTrip),
            "malformed_event" | "malformed" | "b" | "sim-005" => Ok(ScenarioId::MalformedEvent),
            "routing_failure" | "routing" | "c" | "sim-006" => Ok(ScenarioId::RoutingFailure),
            "transient_failure" | "transient" | "sim-007" => Ok(ScenarioId::TransientFailure),
            "stop_request" | "stop" | "sim-008" => Ok(ScenarioId::StopRequest),
            "concurrent_fan_out" | "concurrent" | "sim-009" => Ok(ScenarioId::ConcurrentFanOut),
            "determinism" | "sim-010" => Ok(ScenarioId::Determinism),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("A".parse::<ScenarioId>(), Ok(ScenarioId::Baseline));
        assert_eq!("b".parse::<ScenarioId>(), Ok(ScenarioId::MalformedEvent));
        assert_eq!("SIM-006".parse::<ScenarioId>(), Ok(ScenarioId::RoutingFailure));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
