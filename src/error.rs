//! Error types for configuration, the geolocation database and the watcher.
//!
//! Only configuration and startup errors are fatal. Request-time failures are
//! turned into responses by the pipeline and never surface as these types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while validating the proxy configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--allow and --block options are mutually exclusive")]
    ConflictingPolicy,

    /// More than one denial action was selected.
    #[error("denial actions are mutually exclusive, got {}", .0.join(", "))]
    ConflictingActions(Vec<&'static str>),

    /// An allow/block list was supplied but nothing usable was left in it.
    #[error("{0} countries are not specified")]
    EmptyCountryList(&'static str),

    #[error("'{0}' is not an ISO 3166-1 alpha-2 country code")]
    InvalidCountry(String),

    #[error("invalid target URL '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid redirect URL '{0}'")]
    InvalidRedirect(String),
}

/// Errors raised by a geolocation database handle.
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("can not load GeoLite database, file '{}' does not exist", .0.display())]
    Missing(PathBuf),

    #[error("can not load GeoLite database, failed to open '{}': {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("country lookup failed: {0}")]
    Lookup(String),

    #[error("failed to close Geo DB: {0}")]
    Close(String),
}

/// Errors raised while attaching the database file watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to watch Geo DB directory: {0}")]
    Subscribe(#[from] notify::Error),

    #[error("failed to resolve Geo DB directory '{}': {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
