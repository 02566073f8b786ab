use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use tracing::{Subscriber, level_filters::LevelFilter};

#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Mirror secrets from a source namespace into target namespaces",
    long_about = None
)]
pub struct Cli {
    /// Details log level.
    #[arg(long = "log_level", env = "LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Format log output.
    #[arg(long = "log_formatter", env = "LOG_FORMATTER", value_enum, default_value_t = LogFormat::Json)]
    pub log_formatter: LogFormat,

    /// Secrets config path.
    #[arg(long = "config_path", env = "CONFIG_PATH", default_value = "secrets.yaml")]
    pub config_path: PathBuf,

    /// Seconds to wait for a watch to list the source secret before giving up on it.
    #[arg(long = "sync_timeout", env = "SYNC_TIMEOUT", default_value_t = 60)]
    pub sync_timeout: u64,
}

impl Cli {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// Builds the stdout subscriber described by the flags. The caller decides
/// where to install it.
pub fn subscriber(level: LogLevel, format: LogFormat) -> Box<dyn Subscriber + Send + Sync> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(level))
        .with_writer(std::io::stdout);

    match format {
        LogFormat::Json => Box::new(builder.json().finish()),
        LogFormat::Text => Box::new(builder.finish()),
    }
}
