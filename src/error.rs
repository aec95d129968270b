use std::any::Any;
use std::io;
use std::str::Utf8Error;
use std::time::Duration;
use thiserror::Error;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Invalid service uuid in config file: {source}")]
    ServiceUuid { #[from] source: uuid::Error },

    #[error("No peripheral configured; pass --address or add one to the config file")]
    NoPeripheral,

    #[error("Peripheral {address} is not in the config file and no --port was given")]
    UnknownPeripheral { address: String },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
    #[error("Peripheral address must have 6 octets separated by ':', got {0:?}")]
    Malformed(String),

    #[error("Peripheral address contains an invalid octet {octet:?}")]
    InvalidOctet { octet: String },
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("A connection attempt is already in progress")]
    AlreadyInProgress,

    #[error("Peripheral {address} is unreachable: {source}")]
    PeripheralUnreachable { address: String, source: io::Error },

    #[error("Permission denied while connecting to {address}")]
    PermissionDenied { address: String },

    #[error("Connecting to peripheral timed out after {}", humantime::format_duration(*after))]
    Timeout { after: Duration },
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Not connected to a peripheral")]
    NotConnected,

    #[error("Failed to write to peripheral: {source}")]
    IOError { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to send status to server: {source}")]
    Http { #[from] source: reqwest::Error },

    #[error("Server rejected status with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to encode status body: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (connection): {source}")]
    ConnectionError { #[from] source: ConnectionError },

    #[error("Failed to send command: {source}")]
    WriteError { #[from] source: WriteError },

    #[error("Failed to start application (address): {source}")]
    AddressError { #[from] source: AddressError },

    #[error("Failed to start application (logging): {source}")]
    Logging { #[from] source: log::SetLoggerError },

    #[error("Failed to start application (io): {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to start application (relay): {source}")]
    RelayError { #[from] source: RelayError },
}

pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }
    let type_id = error.type_id();

    format!("panic from thread: [{:?}]: [{}]", type_id, stringified)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payload_is_rendered() {
        let payload: Box<dyn Any + Send + 'static> = Box::new("reader exploded");
        let message = readable_thread_panic_error(&payload);
        assert!(message.contains("reader exploded"), "{}", message);

        let payload: Box<dyn Any + Send + 'static> = Box::new(String::from("owned message"));
        assert!(readable_thread_panic_error(&payload).contains("owned message"));

        let payload: Box<dyn Any + Send + 'static> = Box::new(42_u8);
        assert!(readable_thread_panic_error(&payload).contains("???"));
    }

    #[test]
    fn config_not_found_is_detected() {
        let err = ConfigError::from(io::Error::new(io::ErrorKind::NotFound, "nope"));
        assert!(err.is_file_not_found_error());
        assert!(!ConfigError::NoConfigPath.is_file_not_found_error());
    }

    #[test]
    fn timeout_message_is_human_readable() {
        let err = ConnectionError::Timeout { after: Duration::from_secs(10) };
        assert_eq!(err.to_string(), "Connecting to peripheral timed out after 10s");
    }
}
