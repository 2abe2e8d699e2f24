use std::net::IpAddr;
use std::path::Path;

use log::debug;
use maxminddb::{geoip2, Reader};

use super::{DatabaseOpener, GeoDatabase};
use crate::country::CountryCode;
use crate::error::GeoError;

/// MaxMind GeoLite2/GeoIP2 country database, fully read into memory so that
/// replacing the file on disk never affects an open handle.
pub struct MaxMindDatabase {
    reader: Reader<Vec<u8>>,
}

impl MaxMindDatabase {
    pub fn open(path: &Path) -> Result<Self, GeoError> {
        if !path.exists() {
            return Err(GeoError::Missing(path.to_path_buf()));
        }
        let reader = Reader::open_readfile(path).map_err(|e| GeoError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(
            "opened {} database built at {}",
            reader.metadata.database_type, reader.metadata.build_epoch
        );
        Ok(Self { reader })
    }
}

impl GeoDatabase for MaxMindDatabase {
    fn country(&self, ip: IpAddr) -> Result<Option<CountryCode>, GeoError> {
        let record: Option<geoip2::Country> = self
            .reader
            .lookup(ip)
            .map_err(|e| GeoError::Lookup(e.to_string()))?;

        Ok(record
            .and_then(|r| r.country)
            .and_then(|c| c.iso_code)
            .and_then(|code| CountryCode::parse(code).ok()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MaxMindOpener;

impl DatabaseOpener for MaxMindOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn GeoDatabase>, GeoError> {
        Ok(Box::new(MaxMindDatabase::open(path)?))
    }
}
