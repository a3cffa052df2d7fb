//! Environment-variable configuration for the HTTP services.

use dicesim_core::{OrchestratorConfig, RetryPolicy, DEFAULT_DIE_SIDES};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Which process this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Orchestrator,
    Dice,
    Coin,
}

impl Role {
    /// Port used when `APP_PORT` is unset.
    pub fn default_port(&self) -> u16 {
        match self {
            Role::Orchestrator => 6001,
            Role::Dice => 7001,
            Role::Coin => 7002,
        }
    }

    /// Host name used in logs and lifecycle acknowledgements.
    pub fn host_name(&self) -> &'static str {
        match self {
            Role::Orchestrator => "orchestrator",
            Role::Dice => "dice-host",
            Role::Coin => "coin-host",
        }
    }
}

/// Errors reading service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration of one service process.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Process role
    pub role: Role,

    /// Port the app listens on (`APP_PORT`)
    pub port: u16,

    /// Sidecar host (`DAPR_HOST`)
    pub sidecar_host: String,

    /// Sidecar HTTP port (`DAPR_HTTP_PORT`)
    pub sidecar_port: u16,

    /// Master seed (`SIM_SEED`)
    pub seed: u64,

    /// Rounds per run (`SIM_END_STEPS`)
    pub end_steps: u64,

    /// Entities per pool (`SIM_ENTITY_COUNT`)
    pub entity_count: usize,

    /// Drive rounds automatically after start (`SIM_AUTO_STEP`)
    pub auto_step: bool,

    /// Faces per die (`DIE_SIDES`)
    pub die_sides: u32,

    /// Per-invocation deadline (`SIM_INVOKE_TIMEOUT_MS`)
    pub invoke_timeout: Duration,

    /// Retries for transient invocation failures (`SIM_MAX_RETRIES`)
    pub max_retries: u32,
}

impl ServiceConfig {
    /// Defaults for `role` with no environment applied.
    pub fn defaults(role: Role) -> Self {
        Self {
            role,
            port: role.default_port(),
            sidecar_host: "127.0.0.1".to_string(),
            sidecar_port: 3500,
            seed: 99,
            end_steps: 100,
            entity_count: 10,
            auto_step: true,
            die_sides: DEFAULT_DIE_SIDES,
            invoke_timeout: Duration::from_millis(5000),
            max_retries: 0,
        }
    }

    /// Reads configuration from the process environment.
    pub fn from_env(role: Role) -> Result<Self, ConfigError> {
        Self::from_lookup(role, |var| std::env::var(var).ok())
    }

    /// Reads configuration through `lookup`, falling back to defaults for
    /// unset or empty variables.
    pub fn from_lookup(
        role: Role,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::defaults(role);
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("APP_PORT") {
            config.port = parse("APP_PORT", &v)?;
        }
        if let Some(v) = get("DAPR_HOST") {
            config.sidecar_host = v;
        }
        if let Some(v) = get("DAPR_HTTP_PORT") {
            config.sidecar_port = parse("DAPR_HTTP_PORT", &v)?;
        }
        if let Some(v) = get("SIM_SEED") {
            config.seed = parse("SIM_SEED", &v)?;
        }
        if let Some(v) = get("SIM_END_STEPS") {
            config.end_steps = parse("SIM_END_STEPS", &v)?;
            if config.end_steps == 0 {
                return Err(invalid("SIM_END_STEPS", &v, "must be at least 1"));
            }
        }
        if let Some(v) = get("SIM_ENTITY_COUNT") {
            config.entity_count = parse("SIM_ENTITY_COUNT", &v)?;
            if config.entity_count == 0 {
                return Err(invalid("SIM_ENTITY_COUNT", &v, "must be at least 1"));
            }
        }
        if let Some(v) = get("SIM_AUTO_STEP") {
            config.auto_step = parse_bool("SIM_AUTO_STEP", &v)?;
        }
        if let Some(v) = get("DIE_SIDES") {
            config.die_sides = parse("DIE_SIDES", &v)?;
            if config.die_sides < 2 {
                return Err(invalid("DIE_SIDES", &v, "a die needs at least 2 sides"));
            }
        }
        if let Some(v) = get("SIM_INVOKE_TIMEOUT_MS") {
            let ms: u64 = parse("SIM_INVOKE_TIMEOUT_MS", &v)?;
            if ms == 0 {
                return Err(invalid("SIM_INVOKE_TIMEOUT_MS", &v, "must be positive"));
            }
            config.invoke_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = get("SIM_MAX_RETRIES") {
            config.max_retries = parse("SIM_MAX_RETRIES", &v)?;
        }

        Ok(config)
    }

    /// Address the app server binds.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Base URL of the sidecar HTTP API.
    pub fn sidecar_base_url(&self) -> String {
        format!("http://{}:{}", self.sidecar_host, self.sidecar_port)
    }

    /// Orchestrator configuration derived from this service configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let retry = if self.max_retries == 0 {
            RetryPolicy::none()
        } else {
            RetryPolicy::bounded(self.max_retries, Duration::from_millis(100))
        };
        OrchestratorConfig {
            auto_step: self.auto_step,
            entity_count: self.entity_count,
            end_steps: self.end_steps,
            invoke_timeout: self.invoke_timeout,
            retry,
            ..Default::default()
        }
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(var, value, e.to_string()))
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_per_role() {
        let orch = ServiceConfig::from_lookup(Role::Orchestrator, lookup(&[])).unwrap();
        assert_eq!(orch.port, 6001);
        assert_eq!(orch.seed, 99);
        assert_eq!(orch.end_steps, 100);
        assert_eq!(orch.entity_count, 10);
        assert!(orch.auto_step);
        assert_eq!(orch.sidecar_base_url(), "http://127.0.0.1:3500");

        let dice = ServiceConfig::from_lookup(Role::Dice, lookup(&[])).unwrap();
        assert_eq!(dice.port, 7001);
        assert_eq!(dice.die_sides, 6);

        let coin = ServiceConfig::from_lookup(Role::Coin, lookup(&[])).unwrap();
        assert_eq!(coin.port, 7002);
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(
            Role::Orchestrator,
            lookup(&[
                ("APP_PORT", "6101"),
                ("DAPR_HTTP_PORT", "3601"),
                ("DAPR_HOST", "sidecar"),
                ("SIM_SEED", "7"),
                ("SIM_END_STEPS", "3"),
                ("SIM_ENTITY_COUNT", "1"),
                ("SIM_AUTO_STEP", "false"),
                ("SIM_INVOKE_TIMEOUT_MS", "250"),
                ("SIM_MAX_RETRIES", "2"),
            ]),
        )
        .unwrap();

        assert_eq!(config.port, 6101);
        assert_eq!(config.sidecar_base_url(), "http://sidecar:3601");
        assert_eq!(config.seed, 7);
        assert!(!config.auto_step);

        let orch = config.orchestrator_config();
        assert_eq!(orch.end_steps, 3);
        assert_eq!(orch.entity_count, 1);
        assert_eq!(orch.invoke_timeout, Duration::from_millis(250));
        assert_eq!(orch.retry.max_retries, 2);
        assert!(orch.validate().is_ok());
    }

    #[test]
    fn test_empty_values_use_defaults() {
        let config =
            ServiceConfig::from_lookup(Role::Dice, lookup(&[("APP_PORT", ""), ("DIE_SIDES", " ")]))
                .unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.die_sides, 6);
    }

    #[test]
    fn test_invalid_values() {
        let err = ServiceConfig::from_lookup(Role::Dice, lookup(&[("APP_PORT", "seventy")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "APP_PORT", .. }));

        assert!(
            ServiceConfig::from_lookup(Role::Dice, lookup(&[("DIE_SIDES", "1")])).is_err()
        );
        assert!(ServiceConfig::from_lookup(
            Role::Orchestrator,
            lookup(&[("SIM_END_STEPS", "0")])
        )
        .is_err());
        assert!(ServiceConfig::from_lookup(
            Role::Orchestrator,
            lookup(&[("SIM_AUTO_STEP", "maybe")])
        )
        .is_err());
    }
}
