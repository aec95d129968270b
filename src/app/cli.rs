use std::path::PathBuf;
use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::device::types::Command;

#[derive(Parser, Debug)]
#[command(name = "btcontrol", version, about = "Switch an HC-05 serial peripheral on and off and mirror its status to a server")]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Peripheral address, e.g. AA:BB:CC:11:22:33
    #[arg(long, global = true)]
    pub address: Option<String>,

    /// Serial device bound to the peripheral's RFCOMM channel, e.g. /dev/rfcomm0 or COM5
    #[arg(long, global = true)]
    pub port: Option<String>,

    #[arg(long, global = true)]
    pub baud: Option<u32>,

    /// Where status updates are POSTed
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    #[arg(long, global = true)]
    pub log_level: Option<LevelFilter>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Interactive terminal (the default)
    Run,

    /// Connect, send one command and exit
    Send {
        command: Command,
    },

    /// Print the config file location and the effective config
    Config {
        /// Write the effective config back to the file
        #[arg(long)]
        write: bool,
    },
}

impl Cli {
    pub fn action(&self) -> CliCommand {
        self.command.clone().unwrap_or(CliCommand::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_is_the_default() {
        let cli = Cli::try_parse_from(["btcontrol"]).unwrap();
        assert_eq!(cli.action(), CliCommand::Run);
    }

    #[test]
    fn parses_send_with_global_options() {
        let cli = Cli::try_parse_from([
            "btcontrol", "send", "on", "--address", "AA:BB:CC:11:22:33", "--port", "/dev/rfcomm0", "--log-level", "debug",
        ]).unwrap();

        assert_eq!(cli.action(), CliCommand::Send { command: Command::On });
        assert_eq!(cli.address.as_deref(), Some("AA:BB:CC:11:22:33"));
        assert_eq!(cli.port.as_deref(), Some("/dev/rfcomm0"));
        assert_eq!(cli.log_level, Some(LevelFilter::Debug));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Cli::try_parse_from(["btcontrol", "send", "toggle"]).is_err());
    }
}
