use crate::alarm::AlarmNames;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SERIAL_PORT: &str = "/dev/serial/by-id/usb-FTDI_FT232R_USB_UART_A104OWRY-if00-port0";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8090";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    pub poll_period_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub heartbeat_grace_ms: u64,
    pub verify_control_ack: bool,
    pub verify_ping_ack: bool,
    pub disconnect_threshold: u32,
    pub query_on_startup: bool,
    pub node_name: String,
    pub hw_kill_alarm: String,
    pub disconnect_alarm: String,
    pub computer_kill_alarm: String,
    pub listen_addr: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial_port: DEFAULT_SERIAL_PORT.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 250,
            ack_timeout_ms: 250,
            poll_period_ms: 500,
            heartbeat_timeout_ms: 1000,
            heartbeat_grace_ms: 0,
            verify_control_ack: true,
            verify_ping_ack: false,
            disconnect_threshold: 3,
            query_on_startup: false,
            node_name: "kill_interface".into(),
            hw_kill_alarm: "hw_kill".into(),
            disconnect_alarm: "kill_system_disconnect".into(),
            computer_kill_alarm: "kill".into(),
            listen_addr: DEFAULT_LISTEN_ADDR.into(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial_port.is_empty() {
            return Err(ConfigError::Invalid { field: "serial_port", reason: "must not be empty" });
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid { field: "baud_rate", reason: "must be positive" });
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid { field: "read_timeout_ms", reason: "must be positive" });
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid { field: "ack_timeout_ms", reason: "must be positive" });
        }
        if self.poll_period_ms == 0 {
            return Err(ConfigError::Invalid { field: "poll_period_ms", reason: "must be positive" });
        }
        if self.disconnect_threshold == 0 {
            return Err(ConfigError::Invalid { field: "disconnect_threshold", reason: "must be at least 1" });
        }
        if self.node_name.is_empty() {
            return Err(ConfigError::Invalid { field: "node_name", reason: "must not be empty" });
        }
        if self.hw_kill_alarm.is_empty() || self.disconnect_alarm.is_empty() || self.computer_kill_alarm.is_empty() {
            return Err(ConfigError::Invalid { field: "alarm names", reason: "must not be empty" });
        }
        if self.computer_kill_alarm == self.hw_kill_alarm {
            return Err(ConfigError::Invalid {
                field: "computer_kill_alarm",
                reason: "must differ from hw_kill_alarm",
            });
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn alarm_names(&self) -> AlarmNames {
        AlarmNames {
            hw_kill: self.hw_kill_alarm.clone(),
            disconnect: self.disconnect_alarm.clone(),
            computer_kill: self.computer_kill_alarm.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = BridgeConfig::from_json_str(r#"{"baud_rate":115200,"verify_ping_ack":true}"#).unwrap();
        assert_eq!(config.baud_rate, 115200);
        assert!(config.verify_ping_ack);
        assert_eq!(config.poll_period_ms, 500);
        assert_eq!(config.node_name, "kill_interface");
    }

    #[test]
    fn test_zero_poll_period_rejected() {
        let result = BridgeConfig::from_json_str(r#"{"poll_period_ms":0}"#);
        assert!(matches!(result, Err(ConfigError::Invalid { field: "poll_period_ms", .. })));
    }

    #[test]
    fn test_alarm_loop_rejected() {
        let result = BridgeConfig::from_json_str(r#"{"computer_kill_alarm":"hw_kill"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_json_rejected() {
        let result = BridgeConfig::from_json_str("{\"baud_rate\":");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
