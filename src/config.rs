use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub retry_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mqtt: MqttConfig,
    /// No URL means an in-memory store.
    pub redis_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let username = var("MQTT_USERNAME");
        let password = var("MQTT_PASSWORD");
        if username.is_some() != password.is_some() {
            log::warn!("MQTT_USERNAME and MQTT_PASSWORD must both be set; connecting without credentials");
        }

        let mqtt = MqttConfig {
            host: var("MQTT_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parse_or(&var, "MQTT_PORT", 1883)?,
            client_id: var("MQTT_CLIENT_ID").unwrap_or_else(|| "telemetry-ingest".to_string()),
            credentials: username.zip(password),
            keep_alive: Duration::from_secs(parse_or(&var, "MQTT_KEEP_ALIVE_SECS", 20)?),
            connect_timeout: Duration::from_secs(parse_or(&var, "MQTT_CONNECT_TIMEOUT_SECS", 20)?),
            retry_interval: Duration::from_secs(parse_or(&var, "MQTT_RETRY_INTERVAL_SECS", 3)?),
        };

        Ok(Self {
            mqtt,
            redis_url: var("REDIS_URL"),
        })
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.client_id, "telemetry-ingest");
        assert_eq!(config.mqtt.credentials, None);
        assert_eq!(config.mqtt.keep_alive, Duration::from_secs(20));
        assert_eq!(config.mqtt.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.mqtt.retry_interval, Duration::from_secs(3));
        assert_eq!(config.redis_url, None);
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", " 8883 "),
            ("MQTT_USERNAME", "ingest"),
            ("MQTT_PASSWORD", "secret"),
            ("MQTT_KEEP_ALIVE_SECS", "45"),
            ("REDIS_URL", "redis://cache:6379"),
        ])
        .unwrap();

        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(
            config.mqtt.credentials,
            Some(("ingest".to_string(), "secret".to_string()))
        );
        assert_eq!(config.mqtt.keep_alive, Duration::from_secs(45));
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[test]
    fn half_credentials_are_dropped() {
        let config = config(&[("MQTT_USERNAME", "ingest")]).unwrap();

        assert_eq!(config.mqtt.credentials, None);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config(&[("MQTT_HOST", "  "), ("REDIS_URL", "")]).unwrap();

        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.redis_url, None);
    }

    #[test]
    fn invalid_number_is_an_error() {
        assert_eq!(
            config(&[("MQTT_PORT", "eighty")]),
            Err(ConfigError::Invalid {
                name: "MQTT_PORT",
                value: "eighty".to_string()
            })
        );
    }
}
