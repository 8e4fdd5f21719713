//! Data access collaborators
//!
//! The context never talks to a data store directly. It asks a
//! [`DataAccess`] implementation for [`RawSamples`] and hands them to a
//! [`Translator`] that fills the signal's buffers.

use crate::buffer::Buffer;
use crate::signal::{Signal, SignalParams};
use crate::types::{ProcessingError, Result};
use sha2::{Digest, Sha256};

/// Samples as delivered by a data source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSamples {
    pub time: Buffer,
    pub data: Buffer,
    pub data_secondary: Option<Buffer>,
}

impl RawSamples {
    pub fn new(time: Buffer, time_unit: &str, data: Buffer, data_unit: &str) -> Self {
        Self {
            time: time.with_unit(time_unit),
            data: data.with_unit(data_unit),
            data_secondary: None,
        }
    }

    /// Builder method: attach secondary data
    pub fn with_secondary(mut self, data: Buffer, unit: &str) -> Self {
        self.data_secondary = Some(data.with_unit(unit));
        self
    }
}

/// Fetches raw samples for a signal description
pub trait DataAccess {
    fn fetch(&mut self, source: &str, name: &str, params: &SignalParams) -> Result<RawSamples>;
}

impl<F> DataAccess for F
where
    F: FnMut(&str, &str, &SignalParams) -> Result<RawSamples>,
{
    fn fetch(&mut self, source: &str, name: &str, params: &SignalParams) -> Result<RawSamples> {
        self(source, name, params)
    }
}

/// Converts a source-specific raw object into signal buffers
pub trait Translator<T> {
    fn translate(&self, raw: T, signal: &mut Signal) -> Result<()>;
}

/// Translator for [`RawSamples`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SamplesTranslator;

impl Translator<RawSamples> for SamplesTranslator {
    fn translate(&self, raw: RawSamples, signal: &mut Signal) -> Result<()> {
        let RawSamples {
            time,
            data,
            data_secondary,
        } = raw;

        if !time.is_empty() && time.ndim() == 1 && !data.is_empty() && data.shape().first() != Some(&time.len()) {
            return Err(ProcessingError::InvalidData(format!(
                "{}: {} time stamps but data of shape {:?}",
                signal.name,
                time.len(),
                data.shape()
            )));
        }

        signal.set_time(time);
        signal.set_data_primary(data);
        signal.set_data_secondary(data_secondary.unwrap_or_default());
        Ok(())
    }
}

/// Offset added to every emulated seed
pub const DEFAULT_SECRET: i64 = 1_000_000;

/// Number of samples each emulated signal carries
pub const EMULATED_SAMPLES: i64 = 16;

/// Deterministic stand-in for a real data source
///
/// Every `(source, name)` pair hashes to a seed; time holds the 16 integers
/// below the seed (ms), primary data the 16 from the seed on (C) and
/// secondary data the 16 after those (A).
#[derive(Debug, Clone)]
pub struct EmulatedDataAccess {
    secret: i64,
    fetches: usize,
}

impl Default for EmulatedDataAccess {
    fn default() -> Self {
        Self {
            secret: DEFAULT_SECRET,
            fetches: 0,
        }
    }
}

impl EmulatedDataAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the seed offset
    pub fn with_secret(mut self, secret: i64) -> Self {
        self.secret = secret;
        self
    }

    /// Number of fetches served so far
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    /// Seed of a `(source, name)` pair
    pub fn seed(&self, source: &str, name: &str) -> i64 {
        let digest = Sha256::digest(format!("{}{}", source, name).as_bytes());
        let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        i64::from(head >> 4) + self.secret
    }
}

impl DataAccess for EmulatedDataAccess {
    fn fetch(&mut self, source: &str, name: &str, _params: &SignalParams) -> Result<RawSamples> {
        log::info!("Fetching data: DS={}, var_name={}", source, name);
        self.fetches += 1;
        let seed = self.seed(source, name);
        let range = |start: i64| Buffer::from_i64((start..start + EMULATED_SAMPLES).collect());
        Ok(
            RawSamples::new(range(seed - EMULATED_SAMPLES), "ms", range(seed), "C")
                .with_secondary(range(seed + EMULATED_SAMPLES), "A"),
        )
    }
}
