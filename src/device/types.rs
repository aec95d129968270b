use std::fmt;
use std::str::FromStr;

use crate::device::constants::{COMMAND_OFF, COMMAND_ON};
use crate::error::AddressError;

/// A MAC-style Bluetooth address, always stored upper-case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(AddressError::Malformed(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(AddressError::InvalidOctet { octet: part.to_string() });
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| AddressError::InvalidOctet { octet: part.to_string() })?;
        }

        Ok(MacAddress(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

/// Identifies the peripheral to dial. Handed over by whatever discovered it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralAddress {
    mac: MacAddress,
    name: String,
}

impl PeripheralAddress {
    pub fn new(mac: MacAddress, name: impl Into<String>) -> Self {
        PeripheralAddress { mac, name: name.into() }
    }

    pub fn parse(address: &str, name: impl Into<String>) -> Result<Self, AddressError> {
        Ok(PeripheralAddress::new(address.parse()?, name))
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.mac)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    On,
    Off,
}

impl Command {
    pub fn wire_byte(self) -> u8 {
        match self {
            Command::On => COMMAND_ON,
            Command::Off => COMMAND_OFF,
        }
    }

    pub fn from_wire_byte(byte: u8) -> Option<Command> {
        match byte {
            COMMAND_ON => Some(Command::On),
            COMMAND_OFF => Some(Command::Off),
            _ => None,
        }
    }

    /// The status label relayed to the server after this command was written.
    pub fn label(self) -> &'static str {
        match self {
            Command::On => "ON",
            Command::Off => "OFF",
        }
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "a" => Ok(Command::On),
            "off" | "b" => Ok(Command::Off),
            other => Err(format!("unknown command {:?}, expected \"on\" or \"off\"", other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}
