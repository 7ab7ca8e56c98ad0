//! Tariff deserialization pipeline
//!
//! A [`TariffLoader`] is a single-use pipeline: bytes in, validated
//! [`Tariff`] out. Any failure along the way (byte order, magic, version,
//! payload shape, tariff validity) yields
//! [`InvalidTariff`](crate::TariffError::InvalidTariff) and no partial
//! state.

use std::path::Path;

use tracing::debug;

use crate::error::{TariffError, TariffResult};
use crate::tariff::Tariff;
use crate::wire::{self, WireReader};

/// Single-use tariff deserializer
#[derive(Debug, Default)]
pub struct TariffLoader {
    _private: (),
}

impl TariffLoader {
    /// Create a loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a tariff from its byte form
    pub fn load_from_bytes(self, bytes: &[u8]) -> TariffResult<Tariff> {
        let (mut reader, version) = WireReader::new(bytes)?;
        if version == wire::FORMAT_VERSION_LEGACY {
            return Err(TariffError::invalid_tariff(
                "version 1 tariffs are not supported",
            ));
        }

        let name = reader.read_string()?.to_owned();
        let n_periods = reader.read_u32()?;
        let mut periods = Vec::with_capacity(n_periods.min(1024) as usize);
        for _ in 0..n_periods {
            periods.push(wire::read_period(&mut reader)?);
        }
        reader.finish()?;

        Tariff::validate(&name, &periods)?;
        debug!(name = %name, periods = periods.len(), "loaded tariff");
        Ok(Tariff::new(name, periods))
    }

    /// Load and validate a tariff from a file
    pub fn load_from_file(self, path: &Path) -> TariffResult<Tariff> {
        let bytes = std::fs::read(path).map_err(|err| {
            TariffError::invalid_tariff(format!("reading {}: {}", path.display(), err))
        })?;
        self.load_from_bytes(&bytes)
    }
}
