use std::env;
use std::process::ExitCode;
use btcontrol::run;
use btcontrol::error::{AppRunError, ConfigError};

fn main() -> ExitCode {
    match run(env::args_os()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("btcontrol is already running");
            ExitCode::FAILURE
        },
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        },
    }
}
