//! Command line surface.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{ProxySettings, DEFAULT_DATABASE};
use crate::logging::LogLevel;

/// Reverse proxy that admits or rejects requests by the client's country.
#[derive(Debug, Parser)]
#[command(name = "geofilter", version, about)]
pub struct Cli {
    /// Port to listen on (all interfaces)
    #[arg(short, long, env = "GEOFILTER_PORT", default_value_t = 80)]
    pub port: u16,

    /// Path to the MaxMind country database
    #[arg(short, long, env = "GEOFILTER_DATABASE", default_value = DEFAULT_DATABASE)]
    pub database: PathBuf,

    /// Upstream URL requests are forwarded to, e.g. http://localhost:4001
    #[arg(short, long, env = "GEOFILTER_TARGET")]
    pub target: String,

    /// Comma-separated country codes to admit; everyone else is denied
    #[arg(short, long, env = "GEOFILTER_ALLOW")]
    pub allow: Option<String>,

    /// Comma-separated country codes to deny; everyone else is admitted
    #[arg(short, long, env = "GEOFILTER_BLOCK")]
    pub block: Option<String>,

    /// Answer denied requests with this text in an HTML page
    #[arg(short, long, env = "GEOFILTER_MESSAGE")]
    pub message: Option<String>,

    /// Redirect denied requests to this URL
    #[arg(short, long, env = "GEOFILTER_REDIRECT")]
    pub redirect: Option<String>,

    /// Answer denied requests with the contents of this file
    #[arg(short, long, env = "GEOFILTER_FILE")]
    pub file: Option<PathBuf>,

    /// Reload the database when the file changes on disk
    #[arg(short = 'w', long, env = "GEOFILTER_AUTO_RELOAD")]
    pub auto_reload: bool,

    /// Upstream connect/read timeout in seconds, 0 disables it
    #[arg(long, env = "GEOFILTER_UPSTREAM_TIMEOUT", default_value_t = 30)]
    pub upstream_timeout: u64,

    /// Overrides RUST_LOG
    #[arg(long, env = "GEOFILTER_LOG_LEVEL", value_enum)]
    pub log_level: Option<LogLevel>,
}

impl Cli {
    pub fn into_settings(self) -> ProxySettings {
        ProxySettings {
            port: self.port,
            database: self.database,
            target: self.target,
            allow: split_list(self.allow),
            block: split_list(self.block),
            message: self.message,
            redirect: self.redirect,
            file: self.file,
            auto_reload: self.auto_reload,
            upstream_timeout: Some(Duration::from_secs(self.upstream_timeout)),
        }
    }
}

// An empty flag value means the list was not given at all.
fn split_list(raw: Option<String>) -> Option<Vec<String>> {
    let raw = raw?;
    if raw.trim().is_empty() {
        return None;
    }
    Some(raw.split(',').map(|s| s.trim().to_string()).collect())
}
