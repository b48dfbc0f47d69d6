use std::env;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_MAX_PUBLISH_COMMANDS: usize = 10;
pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 100;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Multiplexer settings. Deserializable so it can sit inside a host application's config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryWsConfig {
    /// Upper bound on commands per published batch.
    pub max_publish_commands: usize,
    /// How often the pump drains pending commands.
    pub publish_interval_ms: u64,
    /// Live buffer of each subscriber channel.
    pub channel_capacity: usize,
}

impl Default for TelemetryWsConfig {
    fn default() -> Self {
        Self {
            max_publish_commands: DEFAULT_MAX_PUBLISH_COMMANDS,
            publish_interval_ms: DEFAULT_PUBLISH_INTERVAL_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl TelemetryWsConfig {
    /// Overrides defaults from `TELEMETRY_WS_*` variables; invalid or zero values are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_publish_commands: env_positive("TELEMETRY_WS_MAX_PUBLISH_COMMANDS")
                .unwrap_or(defaults.max_publish_commands),
            publish_interval_ms: env_positive("TELEMETRY_WS_PUBLISH_INTERVAL_MS")
                .unwrap_or(defaults.publish_interval_ms),
            channel_capacity: env_positive("TELEMETRY_WS_CHANNEL_CAPACITY")
                .unwrap_or(defaults.channel_capacity),
        }
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms.max(1))
    }
}

fn env_positive<T>(var: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    env::var(var)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // env vars are process-global
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: [&str; 3] = [
        "TELEMETRY_WS_MAX_PUBLISH_COMMANDS",
        "TELEMETRY_WS_PUBLISH_INTERVAL_MS",
        "TELEMETRY_WS_CHANNEL_CAPACITY",
    ];

    fn clear_vars() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults() {
        let config = TelemetryWsConfig::default();
        assert_eq!(config.max_publish_commands, 10);
        assert_eq!(config.publish_interval(), Duration::from_millis(100));
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn from_env_overrides_and_ignores_garbage() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        env::set_var("TELEMETRY_WS_MAX_PUBLISH_COMMANDS", "25");
        env::set_var("TELEMETRY_WS_PUBLISH_INTERVAL_MS", "not-a-number");
        env::set_var("TELEMETRY_WS_CHANNEL_CAPACITY", "0");

        let config = TelemetryWsConfig::from_env();
        assert_eq!(config.max_publish_commands, 25);
        assert_eq!(config.publish_interval_ms, DEFAULT_PUBLISH_INTERVAL_MS);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        clear_vars();
    }

    #[test]
    fn deserializes_partial_tables() {
        let config: TelemetryWsConfig =
            serde_json::from_str(r#"{ "max_publish_commands": 3 }"#).expect("decode");
        assert_eq!(config.max_publish_commands, 3);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }
}
