use std::env;
use std::ffi::OsString;
use clap::Parser;
use log::{info, LevelFilter};
use crate::app::cli::Cli;
use crate::app::{initial_log_level, run_application};
use crate::error::AppRunError;

pub mod app;
pub mod config;
pub mod device;
pub mod error;
pub mod relay;
pub mod session;

pub fn init_logging(level: LevelFilter) -> Result<(), AppRunError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        // the effective level is the global max level, which the config file may change later
        .level(LevelFilter::Trace)
        .level_for("hyper", LevelFilter::Info)
        .level_for("hyper_util", LevelFilter::Info)
        .level_for("rustls", LevelFilter::Info)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(fern::log_file(log_file)?);
    }

    dispatch.apply()?;
    log::set_max_level(level);
    Ok(())
}

pub fn run<I, T>(args: I) -> Result<(), AppRunError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    init_logging(initial_log_level(&cli))?;
    info!(concat!("btcontrol ", env!("CARGO_PKG_VERSION")));

    run_application(cli)
}
