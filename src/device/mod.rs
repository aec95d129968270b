pub mod connection;
pub mod constants;
pub mod memory;
pub mod serial;
pub mod transport;
pub mod types;
