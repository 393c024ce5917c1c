//! Connection configuration shared across roles.

use rumqttc::QoS;
use std::time::Duration;

/// Broker connection settings, immutable after role construction and shared
/// by reference across all roles created from one context.
#[derive(Debug, Clone)]
pub struct Globals {
    /// Broker URL, `tcp://host:port` or `host:port`.
    pub mqtt_broker: String,

    /// Broker username; empty disables authentication.
    pub mqtt_username: String,

    /// Broker password.
    pub mqtt_password: String,

    /// Quality-of-service level (0, 1 or 2).
    pub mqtt_qos: u8,

    /// Retain flag applied to event/value publications.
    pub mqtt_retained: bool,

    /// Keepalive interval.
    pub mqtt_keep_alive: Duration,

    /// Upper bound for a single connect attempt.
    pub mqtt_connect_timeout: Duration,

    /// Base wait between connect attempts; grows linearly with the attempt
    /// index.
    pub mqtt_reconnect_interval: Duration,

    /// Whether an established connection is re-dialed after a transport
    /// error.
    pub mqtt_auto_reconnect: bool,

    /// Clean-session flag.
    pub mqtt_clean_session: bool,

    /// Connect attempts before the initial connection is declared fatal.
    pub mqtt_max_retry: u32,

    /// Grace period between the disconnect request and tearing the
    /// connection down.
    pub mqtt_quit_grace: Duration,

    /// Non-matching deliveries a pending call survives before eviction.
    pub router_miss_threshold: u32,

    /// Interval between driver self-statistics publications.
    pub statistics_interval: Duration,
}

impl Default for Globals {
    fn default() -> Self {
        Self {
            mqtt_broker: "tcp://localhost:1883".to_string(),
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            mqtt_qos: 0,
            mqtt_retained: false,
            mqtt_keep_alive: Duration::from_secs(3),
            mqtt_connect_timeout: Duration::from_secs(5),
            mqtt_reconnect_interval: Duration::from_secs(1),
            mqtt_auto_reconnect: true,
            mqtt_clean_session: true,
            mqtt_max_retry: 120,
            mqtt_quit_grace: Duration::from_millis(500),
            router_miss_threshold: 10,
            statistics_interval: Duration::from_secs(60),
        }
    }
}

impl Globals {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EDGEBUS_MQTT_BROKER`: broker URL
    /// - `EDGEBUS_MQTT_USERNAME` / `EDGEBUS_MQTT_PASSWORD`: credentials
    /// - `EDGEBUS_MQTT_QOS`: quality-of-service level (0, 1 or 2)
    /// - `EDGEBUS_MQTT_RETAINED`: retain flag for event publications
    /// - `EDGEBUS_MQTT_CLEAN_SESSION`: clean-session flag
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if a set variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut globals = Self::default();

        if let Ok(broker) = std::env::var("EDGEBUS_MQTT_BROKER") {
            globals.mqtt_broker = broker;
        }

        if let Ok(username) = std::env::var("EDGEBUS_MQTT_USERNAME") {
            globals.mqtt_username = username;
        }

        if let Ok(password) = std::env::var("EDGEBUS_MQTT_PASSWORD") {
            globals.mqtt_password = password;
        }

        if let Ok(qos) = std::env::var("EDGEBUS_MQTT_QOS") {
            globals.mqtt_qos = match qos.as_str() {
                "0" => 0,
                "1" => 1,
                "2" => 2,
                _ => return Err(ConfigError::InvalidQos(qos)),
            };
        }

        if let Ok(retained) = std::env::var("EDGEBUS_MQTT_RETAINED") {
            globals.mqtt_retained = parse_flag("EDGEBUS_MQTT_RETAINED", &retained)?;
        }

        if let Ok(clean) = std::env::var("EDGEBUS_MQTT_CLEAN_SESSION") {
            globals.mqtt_clean_session = parse_flag("EDGEBUS_MQTT_CLEAN_SESSION", &clean)?;
        }

        Ok(globals)
    }

    /// The configured quality-of-service level as the broker client type.
    #[must_use]
    pub fn qos(&self) -> QoS {
        match self.mqtt_qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            key,
            value: value.to_string(),
        }),
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// QoS level out of range
    #[error("invalid QoS level (expected 0, 1 or 2): {0:?}")]
    InvalidQos(String),
    /// Boolean flag failed to parse
    #[error("invalid boolean for {key}: {value:?}")]
    InvalidFlag {
        /// Environment variable name
        key: &'static str,
        /// Observed value
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_baseline() {
        let globals = Globals::default();
        assert_eq!(globals.mqtt_max_retry, 120);
        assert_eq!(globals.router_miss_threshold, 10);
        assert_eq!(globals.mqtt_keep_alive, Duration::from_secs(3));
        assert_eq!(globals.qos(), QoS::AtMostOnce);
    }

    #[test]
    fn qos_mapping() {
        let mut globals = Globals::default();
        globals.mqtt_qos = 1;
        assert_eq!(globals.qos(), QoS::AtLeastOnce);
        globals.mqtt_qos = 2;
        assert_eq!(globals.qos(), QoS::ExactlyOnce);
    }

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("K", "true").unwrap());
        assert!(!parse_flag("K", "0").unwrap());
        assert!(parse_flag("K", "yes").is_err());
    }
}
