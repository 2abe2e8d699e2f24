//! Table-backed database used by tests in place of a MaxMind file.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{DatabaseOpener, GeoDatabase};
use crate::country::CountryCode;
use crate::error::GeoError;

/// In-memory database: `ip country` pairs, one per line.
pub struct TableDatabase {
    pub entries: HashMap<IpAddr, CountryCode>,
    pub closed: Option<Arc<AtomicUsize>>,
    pub fail_close: bool,
}

impl TableDatabase {
    pub fn parse(text: &str) -> Result<Self, GeoError> {
        let mut entries = HashMap::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let invalid = || GeoError::Lookup(format!("bad line '{line}'"));
            let (ip, country) = line.split_once(' ').ok_or_else(invalid)?;
            let ip = ip.parse().map_err(|_| invalid())?;
            let country = CountryCode::parse(country).map_err(|_| invalid())?;
            entries.insert(ip, country);
        }
        if entries.is_empty() {
            return Err(GeoError::Lookup("empty table".into()));
        }
        Ok(Self {
            entries,
            closed: None,
            fail_close: false,
        })
    }

    pub fn boxed(text: &str) -> Box<dyn GeoDatabase> {
        Box::new(Self::parse(text).unwrap())
    }
}

impl GeoDatabase for TableDatabase {
    fn country(&self, ip: IpAddr) -> Result<Option<CountryCode>, GeoError> {
        Ok(self.entries.get(&ip).cloned())
    }

    fn close(self: Box<Self>) -> Result<(), GeoError> {
        if let Some(counter) = &self.closed {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail_close {
            return Err(GeoError::Close("table is stuck".into()));
        }
        Ok(())
    }
}

/// Opens table files, rejecting empty or malformed ones.
pub struct TableOpener;

impl DatabaseOpener for TableOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn GeoDatabase>, GeoError> {
        let text = std::fs::read_to_string(path).map_err(|e| GeoError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let table = TableDatabase::parse(&text).map_err(|e| GeoError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(table))
    }
}
