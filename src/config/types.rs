use std::str::FromStr;
use std::time::Duration;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{CONNECT_DEADLINE, DEFAULT_BAUD_RATE, DEFAULT_PERIPHERAL_NAME, SERIAL_PORT_SERVICE};
use crate::device::types::MacAddress;
use crate::error::ConfigError;
use crate::relay::RelayOptions;

pub const DEFAULT_RELAY_ENDPOINT: &str = "https://aurdino-control-backend.vercel.app/data";

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// A paired peripheral and the serial device its RFCOMM channel is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeripheralConfig {
    pub address: String,
    pub name: String,
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    pub endpoint: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub request_timeout_ms: u64,
}

impl RelayConfig {
    pub fn options(&self) -> RelayOptions {
        RelayOptions { workers: self.workers, queue_capacity: self.queue_capacity }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        let options = RelayOptions::default();
        RelayConfig {
            endpoint: DEFAULT_RELAY_ENDPOINT.to_string(),
            workers: options.workers,
            queue_capacity: options.queue_capacity,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub peripherals: Vec<PeripheralConfig>,
    pub preferred_name: String,
    pub service_uuid: String,
    pub connect_timeout_ms: u64,
    pub event_capacity: usize,
    pub relay: RelayConfig,
    pub log_level: String,
}

impl Config {
    pub fn service_uuid(&self) -> Result<Uuid, ConfigError> {
        Ok(Uuid::parse_str(&self.service_uuid)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Unparseable levels fall back to info.
    pub fn log_level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    /// An explicit address must be configured; without one the peripheral named like
    /// `preferred_name` wins, then a lone configured peripheral.
    pub fn select_peripheral(&self, address: Option<MacAddress>) -> Result<&PeripheralConfig, ConfigError> {
        if let Some(address) = address {
            return self.peripherals.iter()
                .find(|peripheral| peripheral.address.parse::<MacAddress>().ok() == Some(address))
                .ok_or_else(|| ConfigError::UnknownPeripheral { address: address.to_string() });
        }

        if let Some(preferred) = self.peripherals.iter().find(|peripheral| peripheral.name == self.preferred_name) {
            return Ok(preferred);
        }

        match self.peripherals.as_slice() {
            [only] => Ok(only),
            _ => Err(ConfigError::NoPeripheral),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            peripherals: Vec::new(),
            preferred_name: DEFAULT_PERIPHERAL_NAME.to_string(),
            service_uuid: SERIAL_PORT_SERVICE.to_string(),
            connect_timeout_ms: CONNECT_DEADLINE,
            event_capacity: 128,
            relay: RelayConfig::default(),
            log_level: "info".to_string(),
        }
    }
}
