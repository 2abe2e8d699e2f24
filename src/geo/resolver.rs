use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use super::{DatabaseOpener, GeoDatabase};
use crate::country::CountryCode;
use crate::error::GeoError;

/// Owns the active database handle and lets it be replaced while lookups run.
///
/// Lookups hold the read lock for the duration of the lookup, so once
/// [`GeoResolver::swap`] has taken the write lock no lookup can still be using
/// the previous handle, and it can be closed safely after the lock is released.
pub struct GeoResolver {
    database: RwLock<Box<dyn GeoDatabase>>,
    generation: AtomicU64,
}

impl GeoResolver {
    pub fn new(database: Box<dyn GeoDatabase>) -> Self {
        Self {
            database: RwLock::new(database),
            generation: AtomicU64::new(1),
        }
    }

    /// Opens the initial database. Failing here must stop the process from serving.
    pub fn open(opener: &dyn DatabaseOpener, path: &Path) -> Result<Self, GeoError> {
        Ok(Self::new(opener.open(path)?))
    }

    /// `Ok(None)` means the database has no country for `ip`.
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<CountryCode>, GeoError> {
        let database = self.database.read().unwrap_or_else(PoisonError::into_inner);
        database.country(ip)
    }

    /// Installs `next` as the active handle, then closes the previous one.
    ///
    /// The write lock is held only for the pointer replacement. A close error
    /// is returned, but `next` is live either way.
    pub fn swap(&self, next: Box<dyn GeoDatabase>) -> Result<(), GeoError> {
        let previous = {
            let mut database = self.database.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *database, next)
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        previous.close()
    }

    /// Starts at 1 and grows by one on every swap.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
