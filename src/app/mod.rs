use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use log::{info, warn, LevelFilter};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;

pub mod cli;
pub mod terminal;

use crate::app::cli::{Cli, CliCommand};
use crate::app::terminal::{run_terminal, Target};
use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::constants::DEFAULT_BAUD_RATE;
use crate::device::serial::{SerialBinding, SerialRadio};
use crate::device::types::{MacAddress, PeripheralAddress};
use crate::error::{AppRunError, ConfigError};
use crate::relay::http::HttpDispatch;
use crate::relay::start_relay;
use crate::session::Session;

/** How long queued status updates may take to reach the server before exiting. */
pub const RELAY_DRAIN_DEADLINE: u64 = 5_000; // ms

/// The peripheral to dial and the serial device that reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPeripheral {
    pub address: PeripheralAddress,
    pub binding: SerialBinding,
}

/// Command line options override the config file. `--address` together with `--port` needs no
/// config entry at all.
pub fn resolve_peripheral(cli: &Cli, config: &Config) -> Result<ResolvedPeripheral, AppRunError> {
    let address = match &cli.address {
        Some(address) => Some(address.parse::<MacAddress>()?),
        None => None,
    };

    if let (Some(mac), Some(port)) = (address, &cli.port) {
        let known = config.select_peripheral(Some(mac)).ok();
        let name = known.map(|peripheral| peripheral.name.clone()).unwrap_or_else(|| config.preferred_name.clone());
        let baud_rate = cli.baud.or(known.map(|peripheral| peripheral.baud_rate)).unwrap_or(DEFAULT_BAUD_RATE);

        return Ok(ResolvedPeripheral {
            address: PeripheralAddress::new(mac, name),
            binding: SerialBinding { path: port.clone(), baud_rate },
        });
    }

    let peripheral = config.select_peripheral(address)?;
    Ok(ResolvedPeripheral {
        address: PeripheralAddress::parse(&peripheral.address, peripheral.name.clone())?,
        binding: SerialBinding {
            path: cli.port.clone().unwrap_or_else(|| peripheral.port.clone()),
            baud_rate: cli.baud.unwrap_or(peripheral.baud_rate),
        },
    })
}

async fn read_config(config_io: &ConfigIO) -> Result<Config, ConfigError> {
    match config_io.read().await {
        Ok(config) => Ok(config),
        Err(err) if err.is_file_not_found_error() => {
            info!("Config file not found, using defaults");
            Ok(Config::default())
        },
        Err(err) => Err(err),
    }
}

async fn print_config(cli: &Cli, config_io: &ConfigIO, write: bool) -> Result<(), AppRunError> {
    let mut config = read_config(config_io).await?;
    if let Some(endpoint) = &cli.endpoint {
        config.relay.endpoint = endpoint.clone();
    }

    println!("{}", config_io.path().to_string_lossy());
    println!("{}", serde_json::to_string_pretty(&config).map_err(ConfigError::from)?);

    if write {
        config_io.save(&config).await?;
    }
    Ok(())
}

async fn run_session(cli: &Cli, config_io: &ConfigIO) -> Result<(), AppRunError> {
    let config = read_config(config_io).await?;

    if cli.log_level.is_none() {
        log::set_max_level(config.log_level());
    }

    let resolved = resolve_peripheral(cli, &config)?;
    let target = Target {
        peripheral: resolved.address.clone(),
        service: config.service_uuid()?,
        timeout: config.connect_timeout(),
    };

    let endpoint = cli.endpoint.clone().unwrap_or_else(|| config.relay.endpoint.clone());
    let dispatch = HttpDispatch::new(endpoint, config.relay.request_timeout())?;
    info!("Relaying status to {}", dispatch.endpoint());

    let cancel = CancellationToken::new();
    let (relay, relay_handle) = start_relay(dispatch, config.relay.options(), cancel);

    let bindings = HashMap::from([(resolved.address.mac(), resolved.binding.clone())]);
    let radio = Arc::new(SerialRadio::new(bindings));
    let (session, mut events) = Session::new(radio, relay, config.event_capacity);

    let result = match cli.action() {
        CliCommand::Send { command } => {
            match session.connect(&target.peripheral, target.service, target.timeout).await {
                Ok(_) => session.send(command)
                    .map(|event| println!("{}", event.status_line()))
                    .map_err(AppRunError::from),
                Err(err) => Err(err.into()),
            }
        },
        _ => {
            terminal::connect(&session, &target).await;
            run_terminal(&session, &mut events, &target).await
        },
    };

    // nothing reads events from here on
    drop(events);
    let exits = session.disconnect().await;
    for exit in exits {
        info!("Reader of connection {} read {} messages ({})", exit.connection_id, exit.messages, exit.reason);
    }

    if !relay_handle.flush(Duration::from_millis(RELAY_DRAIN_DEADLINE)).await {
        warn!("Some status updates were not sent before exiting");
    }
    relay_handle.shutdown().await;

    result
}

pub fn run_application(cli: Cli) -> Result<(), AppRunError> {
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("btcontrol")
        .build()?;

    let config_io = ConfigIO::new_sync(cli.config.clone())?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    runtime.block_on(async {
        match cli.action() {
            CliCommand::Config { write } => print_config(&cli, &config_io, write).await,
            _ => run_session(&cli, &config_io).await,
        }
    })
}

/// The level logging starts with, before the config file has been read.
pub fn initial_log_level(cli: &Cli) -> LevelFilter {
    cli.log_level.unwrap_or(LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use crate::config::types::PeripheralConfig;

    fn config() -> Config {
        Config {
            peripherals: vec![PeripheralConfig {
                address: "AA:BB:CC:11:22:33".to_string(),
                name: "HC-05".to_string(),
                port: "/dev/rfcomm0".to_string(),
                baud_rate: 38400,
            }],
            ..Config::default()
        }
    }

    #[test]
    fn resolves_from_config() {
        let cli = Cli::try_parse_from(["btcontrol"]).unwrap();
        let resolved = resolve_peripheral(&cli, &config()).unwrap();

        assert_eq!(resolved.address.name(), "HC-05");
        assert_eq!(resolved.binding, SerialBinding { path: "/dev/rfcomm0".to_string(), baud_rate: 38400 });
    }

    #[test]
    fn command_line_overrides_config() {
        let cli = Cli::try_parse_from(["btcontrol", "--port", "/dev/rfcomm1", "--baud", "9600"]).unwrap();
        let resolved = resolve_peripheral(&cli, &config()).unwrap();
        assert_eq!(resolved.binding, SerialBinding { path: "/dev/rfcomm1".to_string(), baud_rate: 9600 });
    }

    #[test]
    fn address_and_port_need_no_config() {
        let cli = Cli::try_parse_from(["btcontrol", "--address", "aa:bb:cc:44:55:66", "--port", "COM5"]).unwrap();
        let resolved = resolve_peripheral(&cli, &Config::default()).unwrap();

        assert_eq!(resolved.address.mac().to_string(), "AA:BB:CC:44:55:66");
        assert_eq!(resolved.address.name(), "HC-05");
        assert_eq!(resolved.binding.baud_rate, 9600);
    }

    #[test]
    fn unknown_address_without_port_fails() {
        let cli = Cli::try_parse_from(["btcontrol", "--address", "AA:BB:CC:44:55:66"]).unwrap();
        assert!(matches!(
            resolve_peripheral(&cli, &config()),
            Err(AppRunError::ConfigError { source: ConfigError::UnknownPeripheral { .. } })
        ));

        let cli = Cli::try_parse_from(["btcontrol", "--address", "nonsense"]).unwrap();
        assert!(matches!(resolve_peripheral(&cli, &config()), Err(AppRunError::AddressError { .. })));
    }
}
