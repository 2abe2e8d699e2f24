//! Geolocation database capability and the hot-swappable resolver around it.
//!
//! The database format is opaque to the proxy: everything goes through
//! [`GeoDatabase`] (lookup + close) and [`DatabaseOpener`] (open by path).

mod maxmind;
mod resolver;
#[cfg(test)]
pub(crate) mod testing;

pub use maxmind::{MaxMindDatabase, MaxMindOpener};
pub use resolver::GeoResolver;

use std::net::IpAddr;
use std::path::Path;

use crate::country::CountryCode;
use crate::error::GeoError;

/// An opened geolocation database.
pub trait GeoDatabase: Send + Sync {
    /// Returns `Ok(None)` when the database has no country for `ip`.
    fn country(&self, ip: IpAddr) -> Result<Option<CountryCode>, GeoError>;

    /// Releases the handle. Called once, after the handle stopped being reachable.
    fn close(self: Box<Self>) -> Result<(), GeoError> {
        Ok(())
    }
}

/// Opens database handles from a file path, at startup and on every reload.
pub trait DatabaseOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn GeoDatabase>, GeoError>;
}
