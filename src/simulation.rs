//! Synthetic acquisition source.
//!
//! Builds a helmet-shaped magnetometer array around a head carrying four HPI
//! coils, then streams blocks in which every coil drives the sensors at its
//! own excitation frequency. Alongside the magnetometers the measurement
//! holds gradiometer channels of another coil type, one bad magnetometer
//! carrying a strong artefact and the excitation-locked reference channels.
//! The device-to-head transform is known, so localizations can be checked
//! against it.

use crate::{
    config::{GeometryConfig, SimulationConfig},
    constants::{DEFAULT_INNER_COIL_TYPE, DEFAULT_REFERENCE_CHANNELS},
    geometry::{ChannelInfo, DigPoint, DigPointKind, MeasurementInfo, Sensor, SensorGeometry},
    lead_field::dipole_response,
    stream_buffer::DataBlock,
    transform::{apply_transform, rigid_inverse},
    utils::safe_cast::usize_to_f64,
    Error, Result,
};
use log::debug;
use nalgebra::{DMatrix, Matrix4, Rotation3, Unit, Vector3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f64::consts::PI;

/// Radius of the simulated sensor helmet in metres
pub const HELMET_RADIUS: f64 = 0.12;

/// Coil type of the simulated planar gradiometers
pub const GRADIOMETER_COIL_TYPE: i32 = 3012;

/// Coil type of the stimulus/reference channels
pub const REFERENCE_COIL_TYPE: i32 = 3;

/// Name of the magnetometer listed as bad
pub const BAD_CHANNEL: &str = "MEG0007";

/// Polar angle in degrees and sensor count of each helmet ring
const HELMET_RINGS: [(f64, usize); 7] = [(0.0, 1), (15.0, 6), (30.0, 12), (45.0, 16), (60.0, 20), (75.0, 24), (90.0, 24)];

/// Gradiometers share the location of every n-th magnetometer
const GRADIOMETER_STRIDE: usize = 4;

/// Artefact on the bad channel relative to the strongest coil signal
const BAD_CHANNEL_ARTEFACT: f64 = 50.0;

/// Magnetometers and gradiometers on a hemisphere, in device coordinates
pub fn helmet_channels() -> Vec<ChannelInfo> {
    let mut magnetometers = Vec::new();
    for (ring, &(theta_deg, count)) in HELMET_RINGS.iter().enumerate() {
        let theta = theta_deg.to_radians();
        for k in 0..count {
            let phi = 2.0 * PI * usize_to_f64(k) / usize_to_f64(count) + 0.1 * usize_to_f64(ring);
            let normal = Vector3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos());
            magnetometers.push(normal);
        }
    }

    let mut channels: Vec<ChannelInfo> = magnetometers
        .iter()
        .enumerate()
        .map(|(i, normal)| ChannelInfo::new(format!("MEG{:04}", i + 1), DEFAULT_INNER_COIL_TYPE, normal * HELMET_RADIUS, *normal))
        .collect();

    let gradiometers: Vec<ChannelInfo> = magnetometers
        .iter()
        .step_by(GRADIOMETER_STRIDE)
        .enumerate()
        .map(|(i, normal)| {
            let tangent = normal.cross(&Vector3::x());
            let orientation = if tangent.norm() > 1e-6 { tangent.normalize() } else { Vector3::y() };
            ChannelInfo::new(format!("GRD{:03}", i + 1), GRADIOMETER_COIL_TYPE, normal * HELMET_RADIUS, orientation)
        })
        .collect();
    channels.extend(gradiometers);
    channels
}

/// HPI coil positions in head coordinates: front, left, right, back
pub fn default_head_positions() -> Vec<Vector3<f64>> {
    vec![
        Vector3::new(0.004, 0.08, 0.02),
        Vector3::new(-0.07, 0.002, 0.03),
        Vector3::new(0.07, 0.005, 0.03),
        Vector3::new(-0.003, -0.07, 0.05),
    ]
}

/// A head pose a few degrees and millimetres away from the helmet frame
pub fn default_true_transform() -> Matrix4<f64> {
    let axis = Unit::new_normalize(Vector3::new(0.2, 1.0, 0.3));
    let mut transform = Rotation3::from_axis_angle(&axis, 6f64.to_radians()).to_homogeneous();
    transform
        .fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&Vector3::new(0.003, -0.004, 0.01));
    transform
}

/// Measurement info for the simulated helmet with the given HPI coils
pub fn measurement_info(head_positions: &[Vector3<f64>], sample_rate: f64) -> MeasurementInfo {
    let mut channels = helmet_channels();
    for name in DEFAULT_REFERENCE_CHANNELS {
        channels.push(ChannelInfo::new(name, REFERENCE_COIL_TYPE, Vector3::zeros(), Vector3::z()));
    }

    let cardinals = [
        Vector3::new(0.0, 0.1, 0.0),
        Vector3::new(-0.08, 0.0, 0.0),
        Vector3::new(0.08, 0.0, 0.0),
    ];
    let mut dig: Vec<DigPoint> = cardinals
        .iter()
        .zip(1..)
        .map(|(position, ident)| DigPoint {
            kind: DigPointKind::Cardinal,
            ident,
            position: *position,
        })
        .collect();
    dig.extend(head_positions.iter().zip(1..).map(|(position, ident)| DigPoint {
        kind: DigPointKind::Hpi,
        ident,
        position: *position,
    }));
    dig.push(DigPoint {
        kind: DigPointKind::Extra,
        ident: 1,
        position: Vector3::new(0.0, 0.0, 0.09),
    });

    MeasurementInfo {
        channels,
        bads: vec![BAD_CHANNEL.to_string()],
        sample_rate,
        dig,
    }
}

/// Localization geometry of the simulated helmet with the default coils
///
/// # Errors
///
/// Propagates channel selection errors
pub fn helmet_geometry() -> Result<SensorGeometry> {
    let info = measurement_info(&default_head_positions(), SimulationConfig::default().sample_rate);
    SensorGeometry::from_info(&info, &GeometryConfig::default())
}

/// Block generator for a head held at a fixed pose
pub struct SyntheticSource {
    info: MeasurementInfo,
    true_transform: Matrix4<f64>,
    device_positions: Vec<Vector3<f64>>,
    frequencies: Vec<f64>,
    /// Per-channel amplitude of each coil's excitation
    field: DMatrix<f64>,
    reference_rows: Vec<usize>,
    bad_row: Option<usize>,
    artefact_amplitude: f64,
    noise_amplitude: f64,
    sample_rate: f64,
    samples_per_block: usize,
    next_sample: usize,
    rng: StdRng,
}

impl SyntheticSource {
    /// Source for the default coils seen through `true_transform`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration has no samples per block, a
    /// non-positive sample rate or a coil frequency count other than four
    pub fn new(config: &SimulationConfig, true_transform: Matrix4<f64>) -> Result<Self> {
        Self::with_head_positions(config, true_transform, &default_head_positions())
    }

    /// Source for arbitrary head-space coil positions
    ///
    /// # Errors
    ///
    /// See [`SyntheticSource::new`]
    pub fn with_head_positions(
        config: &SimulationConfig,
        true_transform: Matrix4<f64>,
        head_positions: &[Vector3<f64>],
    ) -> Result<Self> {
        if config.samples_per_block == 0 || !(config.sample_rate > 0.0) {
            return Err(Error::InvalidInput(format!(
                "Simulation needs a positive sample rate and block size, got {} Hz / {} samples",
                config.sample_rate, config.samples_per_block
            )));
        }
        if config.coil_frequencies.len() != head_positions.len()
            || head_positions.len() != DEFAULT_REFERENCE_CHANNELS.len()
        {
            return Err(Error::InvalidInput(format!(
                "{} coil frequencies for {} coils and {} reference channels",
                config.coil_frequencies.len(),
                head_positions.len(),
                DEFAULT_REFERENCE_CHANNELS.len()
            )));
        }

        let info = measurement_info(head_positions, config.sample_rate);
        let device_from_head = rigid_inverse(&true_transform);
        let device_positions: Vec<Vector3<f64>> =
            head_positions.iter().map(|h| apply_transform(&device_from_head, h)).collect();

        let mut field = DMatrix::zeros(info.num_channels(), device_positions.len());
        for (i, channel) in info.channels.iter().enumerate() {
            if channel.coil_type == REFERENCE_COIL_TYPE {
                continue;
            }
            let sensor = Sensor {
                position: channel.position,
                orientation: channel.orientation,
            };
            for (j, position) in device_positions.iter().enumerate() {
                // Coil normals point away from the head centre
                let moment = position.normalize();
                field[(i, j)] = dipole_response(&sensor, position).dot(&moment);
            }
        }

        let peak = field
            .row_iter()
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max);

        let reference_rows = DEFAULT_REFERENCE_CHANNELS
            .iter()
            .filter_map(|name| info.channel_index(name))
            .collect();
        let bad_row = info.channel_index(BAD_CHANNEL);

        debug!(
            "Synthetic source: {} channels, peak field {:.3e}, noise {:.3e}",
            info.num_channels(),
            peak,
            config.noise_level * peak
        );

        Ok(Self {
            info,
            true_transform,
            device_positions,
            frequencies: config.coil_frequencies.clone(),
            field,
            reference_rows,
            bad_row,
            artefact_amplitude: BAD_CHANNEL_ARTEFACT * peak,
            noise_amplitude: config.noise_level * peak,
            sample_rate: config.sample_rate,
            samples_per_block: config.samples_per_block,
            next_sample: 0,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    /// Measurement info describing the generated blocks
    pub fn measurement_info(&self) -> &MeasurementInfo {
        &self.info
    }

    /// Device-to-head transform the data was generated with
    pub fn true_transform(&self) -> Matrix4<f64> {
        self.true_transform
    }

    /// Coil positions in device coordinates
    pub fn device_positions(&self) -> &[Vector3<f64>] {
        &self.device_positions
    }

    /// Generate the next block, continuing the excitation phase
    pub fn next_block(&mut self) -> DataBlock {
        let channels = self.info.num_channels();
        let mut data = DMatrix::zeros(channels, self.samples_per_block);

        for s in 0..self.samples_per_block {
            let t = usize_to_f64(self.next_sample + s) / self.sample_rate;
            let excitation: Vec<f64> = self.frequencies.iter().map(|f| (2.0 * PI * f * t).sin()).collect();

            for i in 0..channels {
                let signal: f64 = excitation
                    .iter()
                    .enumerate()
                    .map(|(j, e)| self.field[(i, j)] * e)
                    .sum();
                let noise = if self.noise_amplitude > 0.0 {
                    self.rng.gen_range(-self.noise_amplitude..self.noise_amplitude)
                } else {
                    0.0
                };
                data[(i, s)] = signal + noise;
            }

            for (&row, e) in self.reference_rows.iter().zip(&excitation) {
                data[(row, s)] = *e;
            }
            if let (Some(row), Some(first)) = (self.bad_row, excitation.first()) {
                data[(row, s)] += self.artefact_amplitude * first;
            }
        }

        self.next_sample += self.samples_per_block;
        DataBlock::new(data)
    }
}
