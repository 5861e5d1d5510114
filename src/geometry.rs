//! Sensor geometry and digitization data.
//!
//! [`MeasurementInfo`] is the boundary handed over by the acquisition side:
//! every channel with its coil-type tag, location and orientation, the bad
//! channel list, the sample rate and the digitized head points. The
//! localization stages only ever see the reduced [`SensorGeometry`] built
//! from it, which fixes the inner-sensor ordering for the whole session.

use crate::{config::GeometryConfig, Error, Result};
use log::{debug, info};
use nalgebra::{DMatrix, Vector3};
use serde::{Deserialize, Serialize};

/// One acquisition channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel name, e.g. `MEG0111` or `TRG013`
    pub name: String,
    /// Sensor coil-type tag
    pub coil_type: i32,
    /// Sensor location in device coordinates (metres)
    pub position: Vector3<f64>,
    /// Sensor normal in device coordinates
    pub orientation: Vector3<f64>,
}

impl ChannelInfo {
    /// Create a channel description
    pub fn new(name: impl Into<String>, coil_type: i32, position: Vector3<f64>, orientation: Vector3<f64>) -> Self {
        Self {
            name: name.into(),
            coil_type,
            position,
            orientation,
        }
    }
}

/// Kind of a digitized point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigPointKind {
    /// Nasion and preauricular landmarks
    Cardinal,
    /// HPI coil location
    Hpi,
    /// EEG electrode
    Eeg,
    /// Additional head-shape point
    Extra,
}

/// A digitized point in head coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigPoint {
    /// What was digitized
    pub kind: DigPointKind,
    /// Identifier within its kind; HPI coils are ordered by it
    pub ident: u32,
    /// Position in head coordinates (metres)
    pub position: Vector3<f64>,
}

/// Measurement metadata supplied once by the acquisition side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementInfo {
    /// All channels in block row order
    pub channels: Vec<ChannelInfo>,
    /// Names of channels to exclude
    pub bads: Vec<String>,
    /// Sampling frequency in Hz
    pub sample_rate: f64,
    /// Digitized head points
    pub dig: Vec<DigPoint>,
}

impl MeasurementInfo {
    /// Number of channels in every data block
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Index of a channel by name
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|ch| ch.name == name)
    }

    /// Head-space HPI coil positions ordered by digitizer ident
    pub fn hpi_head_positions(&self) -> Vec<Vector3<f64>> {
        let mut hpi: Vec<&DigPoint> = self.dig.iter().filter(|p| p.kind == DigPointKind::Hpi).collect();
        hpi.sort_by_key(|p| p.ident);
        hpi.into_iter().map(|p| p.position).collect()
    }
}

/// A sensor used for localization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensor {
    /// Location in device coordinates
    pub position: Vector3<f64>,
    /// Unit normal of the pickup coil
    pub orientation: Vector3<f64>,
}

/// Localization geometry derived from [`MeasurementInfo`]
///
/// `inner_channels[k]` is the block row feeding row `k` of every leadfield and
/// amplitude matrix; `reference_channels[j]` is the excitation-locked channel
/// of coil `j`.
#[derive(Debug, Clone)]
pub struct SensorGeometry {
    sensors: Vec<Sensor>,
    inner_channels: Vec<usize>,
    reference_channels: Vec<usize>,
    head_positions: Vec<Vector3<f64>>,
    calibration: DMatrix<f64>,
    num_channels: usize,
    sample_rate: f64,
}

impl SensorGeometry {
    /// Select inner and reference channels from measurement info
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No channel matches the inner coil type after removing bad channels
    /// - A configured reference channel is missing
    /// - The number of reference channels differs from the number of digitized HPI coils
    /// - The sample rate is not positive
    pub fn from_info(info: &MeasurementInfo, config: &GeometryConfig) -> Result<Self> {
        if !(info.sample_rate > 0.0) {
            return Err(Error::GeometryError(format!("Invalid sample rate: {}", info.sample_rate)));
        }

        let inner_channels: Vec<usize> = info
            .channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.coil_type == config.inner_coil_type && !info.bads.contains(&ch.name))
            .map(|(idx, _)| idx)
            .collect();

        if inner_channels.is_empty() {
            return Err(Error::GeometryError(format!(
                "No good channels with coil type {}",
                config.inner_coil_type
            )));
        }

        let reference_channels = config
            .reference_channels
            .iter()
            .map(|name| {
                info.channel_index(name)
                    .ok_or_else(|| Error::GeometryError(format!("Reference channel {name} not found")))
            })
            .collect::<Result<Vec<_>>>()?;

        let head_positions = info.hpi_head_positions();
        if head_positions.len() != reference_channels.len() {
            return Err(Error::GeometryError(format!(
                "{} reference channels but {} digitized HPI coils",
                reference_channels.len(),
                head_positions.len()
            )));
        }

        let sensors = inner_channels
            .iter()
            .map(|&idx| {
                let ch = &info.channels[idx];
                Sensor {
                    position: ch.position,
                    orientation: ch.orientation,
                }
            })
            .collect::<Vec<_>>();

        let excluded = info.bads.len();
        info!(
            "Sensor geometry: {} inner sensors ({} bad channels listed), {} HPI coils",
            sensors.len(),
            excluded,
            head_positions.len()
        );
        debug!("Reference channel rows: {:?}", reference_channels);

        let n = sensors.len();
        Ok(Self {
            sensors,
            inner_channels,
            reference_channels,
            head_positions,
            calibration: DMatrix::identity(n, n),
            num_channels: info.num_channels(),
            sample_rate: info.sample_rate,
        })
    }

    /// Replace the identity calibration with a sensor compensation matrix
    ///
    /// # Errors
    ///
    /// Returns an error unless the matrix is `[inner × inner]`
    pub fn with_calibration(mut self, calibration: DMatrix<f64>) -> Result<Self> {
        let n = self.sensors.len();
        if calibration.shape() != (n, n) {
            return Err(Error::GeometryError(format!(
                "Calibration must be {n}x{n}, got {}x{}",
                calibration.nrows(),
                calibration.ncols()
            )));
        }
        self.calibration = calibration;
        Ok(self)
    }

    /// Inner sensors in leadfield row order
    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    /// Number of inner sensors
    pub fn num_inner(&self) -> usize {
        self.sensors.len()
    }

    /// Number of HPI coils
    pub fn num_coils(&self) -> usize {
        self.head_positions.len()
    }

    /// Block rows of the inner sensors
    pub fn inner_channels(&self) -> &[usize] {
        &self.inner_channels
    }

    /// Block rows of the reference channels, one per coil
    pub fn reference_channels(&self) -> &[usize] {
        &self.reference_channels
    }

    /// Digitized head-space coil positions
    pub fn head_positions(&self) -> &[Vector3<f64>] {
        &self.head_positions
    }

    /// Calibration applied to the physical leadfield
    pub fn calibration(&self) -> &DMatrix<f64> {
        &self.calibration
    }

    /// Total channels per block
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Sampling frequency in Hz
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, coil_type: i32, x: f64) -> ChannelInfo {
        ChannelInfo::new(name, coil_type, Vector3::new(x, 0.0, 0.1), Vector3::z())
    }

    fn info() -> MeasurementInfo {
        let mut channels = vec![
            channel("MEG0111", 7002, 0.00),
            channel("MEG0112", 3012, 0.01),
            channel("MEG0121", 7002, 0.02),
            channel("MEG0131", 7002, 0.03),
        ];
        for name in ["TRG013", "TRG014", "TRG015", "TRG016"] {
            channels.push(channel(name, 3, 0.0));
        }
        let dig = (0..4)
            .rev()
            .map(|i| DigPoint {
                kind: DigPointKind::Hpi,
                ident: i + 1,
                position: Vector3::new(f64::from(i), 0.0, 0.0),
            })
            .chain(std::iter::once(DigPoint {
                kind: DigPointKind::Cardinal,
                ident: 1,
                position: Vector3::new(9.0, 9.0, 9.0),
            }))
            .collect();

        MeasurementInfo {
            channels,
            bads: vec!["MEG0121".to_string()],
            sample_rate: 1000.0,
            dig,
        }
    }

    #[test]
    fn test_inner_selection_skips_bads_and_other_types() {
        let geometry = SensorGeometry::from_info(&info(), &GeometryConfig::default()).unwrap();
        assert_eq!(geometry.inner_channels(), &[0, 3]);
        assert_eq!(geometry.num_inner(), 2);
        assert_eq!(geometry.sensors()[1].position.x, 0.03);
        assert_eq!(geometry.calibration().shape(), (2, 2));
    }

    #[test]
    fn test_reference_channels_follow_config_order() {
        let geometry = SensorGeometry::from_info(&info(), &GeometryConfig::default()).unwrap();
        assert_eq!(geometry.reference_channels(), &[4, 5, 6, 7]);
        assert_eq!(geometry.num_channels(), 8);
    }

    #[test]
    fn test_hpi_positions_sorted_by_ident() {
        let positions = info().hpi_head_positions();
        assert_eq!(positions.len(), 4);
        for (i, p) in positions.iter().enumerate() {
            assert_eq!(p.x, i as f64);
        }
    }

    #[test]
    fn test_missing_reference_channel() {
        let mut info = info();
        info.channels.retain(|ch| ch.name != "TRG015");
        let result = SensorGeometry::from_info(&info, &GeometryConfig::default());
        assert!(matches!(result, Err(Error::GeometryError(msg)) if msg.contains("TRG015")));
    }

    #[test]
    fn test_coil_count_mismatch() {
        let mut info = info();
        info.dig.retain(|p| p.ident != 2);
        assert!(SensorGeometry::from_info(&info, &GeometryConfig::default()).is_err());
    }

    #[test]
    fn test_calibration_shape_checked() {
        let geometry = SensorGeometry::from_info(&info(), &GeometryConfig::default()).unwrap();
        assert!(geometry.clone().with_calibration(DMatrix::identity(3, 3)).is_err());
        let scaled = geometry.with_calibration(DMatrix::identity(2, 2) * 2.0).unwrap();
        assert_eq!(scaled.calibration()[(1, 1)], 2.0);
    }
}
