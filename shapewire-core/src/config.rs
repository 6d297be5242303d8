// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict validation.
//!
//! Any invalid field results in a HardValidationError before a device or
//! session is created from it.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HardValidationError, ShapeError, ShapeResult};
use crate::record::{ActionRecord, EventRecord};
use crate::transport::PADDING_HEADER_LEN;
use crate::types::Capacity;

/// Raw session section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSessionConfig {
    #[serde(default = "default_capacity")]
    event_capacity: usize,
    #[serde(default = "default_capacity")]
    action_capacity: usize,
}

fn default_capacity() -> usize {
    1024
}

impl Default for RawSessionConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_capacity(),
            action_capacity: default_capacity(),
        }
    }
}

/// Raw device section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDeviceConfig {
    #[serde(default = "default_mtu")]
    mtu4: u16,
    #[serde(default = "default_mtu")]
    mtu6: u16,
    #[serde(default)]
    constant_packet_size: bool,
}

fn default_mtu() -> u16 {
    1420
}

impl Default for RawDeviceConfig {
    fn default() -> Self {
        Self {
            mtu4: default_mtu(),
            mtu6: default_mtu(),
            constant_packet_size: false,
        }
    }
}

/// Raw logging section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLoggingConfig {
    #[serde(default = "default_drop_log_interval_ms")]
    drop_log_interval_ms: u64,
}

fn default_drop_log_interval_ms() -> u64 {
    1000
}

impl Default for RawLoggingConfig {
    fn default() -> Self {
        Self {
            drop_log_interval_ms: default_drop_log_interval_ms(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    session: RawSessionConfig,
    #[serde(default)]
    device: RawDeviceConfig,
    #[serde(default)]
    logging: RawLoggingConfig,
}

/// Validated ring capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub event_capacity: usize,
    pub action_capacity: usize,
}

/// Validated device settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub mtu4: u16,
    pub mtu6: u16,
    /// Pad every synthetic packet to the MTU.
    pub constant_packet_size: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mtu4: default_mtu(),
            mtu6: default_mtu(),
            constant_packet_size: false,
        }
    }
}

/// Validated logging settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingConfig {
    pub drop_log_interval: Duration,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            drop_log_interval: Duration::from_millis(default_drop_log_interval_ms()),
        }
    }
}

/// Complete validated configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapingConfig {
    pub session: SessionConfig,
    pub device: DeviceConfig,
    pub logging: LoggingConfig,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        // The raw defaults always validate.
        Self {
            session: SessionConfig {
                event_capacity: default_capacity(),
                action_capacity: default_capacity(),
            },
            device: DeviceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> ShapeResult<ShapingConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ShapeError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ShapeError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> ShapeResult<ShapingConfig> {
        let raw: RawConfig = if content.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| ShapeError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?
        };

        Ok(Self::validate(raw)?)
    }

    fn validate(raw: RawConfig) -> Result<ShapingConfig, HardValidationError> {
        Self::validate_capacity::<EventRecord>("event_capacity", raw.session.event_capacity)?;
        Self::validate_capacity::<ActionRecord>("action_capacity", raw.session.action_capacity)?;
        Self::validate_mtu("mtu4", raw.device.mtu4)?;
        Self::validate_mtu("mtu6", raw.device.mtu6)?;

        Ok(ShapingConfig {
            session: SessionConfig {
                event_capacity: raw.session.event_capacity,
                action_capacity: raw.session.action_capacity,
            },
            device: DeviceConfig {
                mtu4: raw.device.mtu4,
                mtu6: raw.device.mtu6,
                constant_packet_size: raw.device.constant_packet_size,
            },
            logging: LoggingConfig {
                drop_log_interval: Duration::from_millis(raw.logging.drop_log_interval_ms),
            },
        })
    }

    fn validate_capacity<T>(field: &'static str, capacity: usize) -> Result<(), HardValidationError> {
        Capacity::of::<T>(capacity)
            .map(|_| ())
            .map_err(|e| HardValidationError::InvalidFieldValue {
                field,
                value: capacity.to_string(),
                reason: e.to_string(),
            })
    }

    fn validate_mtu(field: &'static str, mtu: u16) -> Result<(), HardValidationError> {
        if (mtu as usize) < PADDING_HEADER_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field,
                value: mtu.to_string(),
                reason: format!("MTU must be at least {} bytes", PADDING_HEADER_LEN),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConfigLoader::load_string("").unwrap();
        assert_eq!(config, ShapingConfig::default());
        assert_eq!(config.session.event_capacity, 1024);
        assert_eq!(config.device.mtu4, 1420);
        assert_eq!(config.logging.drop_log_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_valid_config() {
        let yaml = r#"
session:
  event_capacity: 256
  action_capacity: 64
device:
  mtu4: 1280
  mtu6: 1380
  constant_packet_size: true
logging:
  drop_log_interval_ms: 250
"#;
        let config = ConfigLoader::load_string(yaml).unwrap();
        assert_eq!(config.session.event_capacity, 256);
        assert_eq!(config.session.action_capacity, 64);
        assert_eq!(config.device.mtu6, 1380);
        assert!(config.device.constant_packet_size);
        assert_eq!(config.logging.drop_log_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let yaml = "session:\n  event_capacity: 0\n";
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(matches!(err, ShapeError::HardValidation(_)));
        assert!(err.to_string().contains("event_capacity"));
    }

    #[test]
    fn test_tiny_mtu_rejected() {
        let yaml = "device:\n  mtu4: 3\n";
        assert!(matches!(
            ConfigLoader::load_string(yaml),
            Err(ShapeError::HardValidation(_))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "session:\n  event_capacity: 8\n  bogus: 1\n";
        assert!(matches!(
            ConfigLoader::load_string(yaml),
            Err(ShapeError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ConfigLoader::load_file("/nonexistent/shapewire.yaml"),
            Err(ShapeError::ConfigNotFound { .. })
        ));
    }
}
