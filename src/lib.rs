//! Geo-filtering reverse proxy.
//!
//! Requests are admitted or rejected by the country of the client address,
//! looked up in a MaxMind database that can be replaced on disk while the
//! proxy runs. Admitted requests go to a single upstream with the country in
//! the `X-Geo-Country` header.

pub mod action;
pub mod cli;
pub mod client;
pub mod config;
pub mod country;
pub mod error;
pub mod forward;
pub mod geo;
pub mod logging;
pub mod pipeline;
pub mod policy;
pub mod proxy;
pub mod watcher;

pub use config::{ProxyConfig, ProxySettings};
pub use error::{ConfigError, GeoError, WatchError};
pub use proxy::{GeoFilter, GeoProxy};
