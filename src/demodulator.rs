//! Reference-locked demodulation of HPI coil signals.
//!
//! Each coil is driven at its own frequency and has an excitation-locked
//! reference channel. Correlating an inner sensor against coil `j`'s reference
//! over one localization window isolates that coil's contribution, giving the
//! `[inner × coils]` amplitude matrix the dipole fit works on.

use crate::{geometry::SensorGeometry, utils::safe_cast::samples_per_cycle, Error, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// How the sign of a correlation amplitude is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignPolicy {
    /// Multiply by the amplitude's own sign, i.e. keep the magnitude
    Absolute,
    /// Keep the in-phase sign of the correlation
    Signed,
}

impl SignPolicy {
    /// Apply the policy to one correlation value
    pub fn apply(self, amplitude: f64) -> f64 {
        match self {
            // A zero correlation has zero magnitude; never divide by it
            Self::Absolute if amplitude == 0.0 => 0.0,
            Self::Absolute => amplitude * amplitude.signum(),
            Self::Signed => amplitude,
        }
    }
}

/// Splits accumulated data into localization windows and correlates them
#[derive(Debug, Clone)]
pub struct Demodulator {
    samples_per_cycle: usize,
    sign_policy: SignPolicy,
}

impl Demodulator {
    /// Create a demodulator working on windows of `samples_per_cycle` samples
    ///
    /// # Errors
    ///
    /// Returns an error if the window length is zero
    pub fn new(samples_per_cycle: usize, sign_policy: SignPolicy) -> Result<Self> {
        if samples_per_cycle == 0 {
            return Err(Error::InvalidInput("Localization window must hold at least one sample".to_string()));
        }
        Ok(Self {
            samples_per_cycle,
            sign_policy,
        })
    }

    /// Create a demodulator for `sample_rate / localizations_per_second` sample windows
    ///
    /// # Errors
    ///
    /// Returns an error if either rate is not positive
    pub fn from_rates(sample_rate: f64, localizations_per_second: f64, sign_policy: SignPolicy) -> Result<Self> {
        Self::new(samples_per_cycle(sample_rate, localizations_per_second)?, sign_policy)
    }

    /// Samples in one localization window
    pub fn samples_per_cycle(&self) -> usize {
        self.samples_per_cycle
    }

    /// Sign handling in use
    pub fn sign_policy(&self) -> SignPolicy {
        self.sign_policy
    }

    /// Number of complete windows in `total_samples`
    pub fn num_sub_windows(&self, total_samples: usize) -> usize {
        total_samples / self.samples_per_cycle
    }

    /// Correlate sub-window `index` of `data` into `amplitudes`
    ///
    /// `amplitudes` is reshaped to `[inner × coils]` if needed and fully
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` does not have one row per channel or the
    /// sub-window lies beyond the data
    pub fn demodulate_into(
        &self,
        data: &DMatrix<f64>,
        index: usize,
        geometry: &SensorGeometry,
        amplitudes: &mut DMatrix<f64>,
    ) -> Result<()> {
        if data.nrows() != geometry.num_channels() {
            return Err(Error::InvalidInput(format!(
                "Data has {} rows, geometry expects {} channels",
                data.nrows(),
                geometry.num_channels()
            )));
        }
        let start = index * self.samples_per_cycle;
        if start + self.samples_per_cycle > data.ncols() {
            return Err(Error::InvalidInput(format!(
                "Sub-window {index} needs {} samples, data has {}",
                start + self.samples_per_cycle,
                data.ncols()
            )));
        }

        let shape = (geometry.num_inner(), geometry.num_coils());
        if amplitudes.shape() != shape {
            *amplitudes = DMatrix::zeros(shape.0, shape.1);
        }

        for (j, &reference) in geometry.reference_channels().iter().enumerate() {
            let reference_row = data.row(reference);
            let reference_window = reference_row.columns(start, self.samples_per_cycle);
            for (k, &inner) in geometry.inner_channels().iter().enumerate() {
                let sensor_row = data.row(inner);
                let correlation = sensor_row
                    .columns(start, self.samples_per_cycle)
                    .dot(&reference_window);
                amplitudes[(k, j)] = self.sign_policy.apply(correlation);
            }
        }

        Ok(())
    }

    /// Amplitude matrices for every complete sub-window of `data`
    ///
    /// # Errors
    ///
    /// Returns an error if `data` does not have one row per channel
    pub fn demodulate(&self, data: &DMatrix<f64>, geometry: &SensorGeometry) -> Result<Vec<DMatrix<f64>>> {
        (0..self.num_sub_windows(data.ncols()))
            .map(|index| {
                let mut amplitudes = DMatrix::zeros(geometry.num_inner(), geometry.num_coils());
                self.demodulate_into(data, index, geometry, &mut amplitudes)?;
                Ok(amplitudes)
            })
            .collect()
    }
}
