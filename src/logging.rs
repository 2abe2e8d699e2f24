//! Logger initialization.

use clap::ValueEnum;
use env_logger::Env;
use log::LevelFilter;

/// Log level accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Sets up `env_logger`. `RUST_LOG` is honoured (defaulting to `info`);
/// an explicit `level` overrides it.
///
/// Uses `try_init`, so a second call (as in tests) is an error rather than a
/// panic.
pub fn init_logger(level: Option<LogLevel>) -> Result<(), log::SetLoggerError> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.filter_level(level.into());
    }
    builder.try_init()
}
