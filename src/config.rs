//! Configuration management for the HPI localization pipeline

use crate::{
    constants::{
        DEFAULT_ALIGNMENT_ITERATIONS, DEFAULT_BUFFER_BLOCKS, DEFAULT_GEOMETRY_POLL_MS, DEFAULT_INNER_COIL_TYPE,
        DEFAULT_LOCALIZATIONS_PER_SECOND, DEFAULT_MAX_EVALUATIONS, DEFAULT_MAX_ITERATIONS, DEFAULT_REFERENCE_CHANNELS,
        DEFAULT_TOL_F, DEFAULT_TOL_X, DEFAULT_USUAL_DELTA, DEFAULT_ZERO_TERM_DELTA,
    },
    demodulator::SignPolicy,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Localization cadence and demodulation
    pub localization: LocalizationConfig,

    /// Channel selection
    pub geometry: GeometryConfig,

    /// Stream buffer sizing
    pub buffer: BufferConfig,

    /// Nelder-Mead parameters for the coil fit
    pub optimizer: OptimizerConfig,

    /// Device-to-head alignment
    pub alignment: AlignmentConfig,

    /// Synthetic source used by the `hpi-track` binary
    pub simulation: SimulationConfig,
}

/// Localization cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
    /// Number of localizations per second of data
    pub localizations_per_second: f64,

    /// Poll interval while waiting for measurement info (milliseconds)
    pub geometry_poll_interval_ms: u64,

    /// Sign handling of demodulated amplitudes
    pub sign_policy: SignPolicy,

    /// Start each coil fit from the previous fitted position
    pub warm_start: bool,
}

/// Channel selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Coil-type tag of the localization sensors
    pub inner_coil_type: i32,

    /// Reference channel names in coil order
    pub reference_channels: Vec<String>,
}

/// Stream buffer sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Number of blocks held before the producer blocks
    pub capacity_blocks: usize,
}

/// Nelder-Mead parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum simplex iterations
    pub max_iterations: usize,

    /// Maximum objective evaluations
    pub max_evaluations: usize,

    /// Termination tolerance on vertex coordinates
    pub tol_x: f64,

    /// Termination tolerance on objective values
    pub tol_f: f64,

    /// Relative perturbation of non-zero coordinates in the initial simplex
    pub usual_delta: f64,

    /// Absolute value given to zero coordinates in the initial simplex
    pub zero_term_delta: f64,
}

/// Device-to-head alignment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Number of Procrustes iterations
    pub iterations: usize,

    /// Stop early once the residual improves by less than this (disabled when unset)
    pub early_exit_tolerance: Option<f64>,
}

/// Synthetic acquisition source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Sampling frequency in Hz
    pub sample_rate: f64,

    /// Samples per generated block
    pub samples_per_block: usize,

    /// Excitation frequency of each coil in Hz
    pub coil_frequencies: Vec<f64>,

    /// Additive noise amplitude relative to the strongest sensor signal
    pub noise_level: f64,

    /// Seconds of data to stream
    pub duration_secs: f64,

    /// Pace blocks at the acquisition rate instead of as fast as possible
    pub realtime: bool,

    /// Noise generator seed
    pub seed: u64,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            localizations_per_second: DEFAULT_LOCALIZATIONS_PER_SECOND,
            geometry_poll_interval_ms: DEFAULT_GEOMETRY_POLL_MS,
            sign_policy: SignPolicy::Absolute,
            warm_start: true,
        }
    }
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            inner_coil_type: DEFAULT_INNER_COIL_TYPE,
            reference_channels: DEFAULT_REFERENCE_CHANNELS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity_blocks: DEFAULT_BUFFER_BLOCKS,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_evaluations: DEFAULT_MAX_EVALUATIONS,
            tol_x: DEFAULT_TOL_X,
            tol_f: DEFAULT_TOL_F,
            usual_delta: DEFAULT_USUAL_DELTA,
            zero_term_delta: DEFAULT_ZERO_TERM_DELTA,
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ALIGNMENT_ITERATIONS,
            early_exit_tolerance: None,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1000.0,
            samples_per_block: 100,
            coil_frequencies: vec![154.0, 158.0, 162.0, 166.0],
            noise_level: 0.01,
            duration_secs: 10.0,
            realtime: false,
            seed: 42,
        }
    }
}

impl LocalizationConfig {
    /// Geometry poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.geometry_poll_interval_ms)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a YAML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Localization cadence
        if !(self.localization.localizations_per_second > 0.0) {
            return Err(Error::ConfigError(
                "Localizations per second must be greater than 0".to_string(),
            ));
        }
        if self.localization.geometry_poll_interval_ms == 0 {
            return Err(Error::ConfigError(
                "Geometry poll interval must be greater than 0".to_string(),
            ));
        }

        // Channel selection
        if self.geometry.reference_channels.len() < 3 {
            return Err(Error::ConfigError(
                "At least 3 reference channels are needed to align the head".to_string(),
            ));
        }

        if self.buffer.capacity_blocks == 0 {
            return Err(Error::ConfigError(
                "Buffer capacity must be at least one block".to_string(),
            ));
        }

        // Optimizer
        if self.optimizer.max_iterations == 0 || self.optimizer.max_evaluations == 0 {
            return Err(Error::ConfigError(
                "Optimizer iteration and evaluation budgets must be greater than 0".to_string(),
            ));
        }
        if !(self.optimizer.tol_x > 0.0) || !(self.optimizer.tol_f > 0.0) {
            return Err(Error::ConfigError("Optimizer tolerances must be positive".to_string()));
        }
        if !(self.optimizer.usual_delta > 0.0) || !(self.optimizer.zero_term_delta > 0.0) {
            return Err(Error::ConfigError(
                "Initial simplex deltas must be positive".to_string(),
            ));
        }

        // Alignment
        if self.alignment.iterations == 0 {
            return Err(Error::ConfigError(
                "Alignment needs at least one iteration".to_string(),
            ));
        }
        if let Some(tol) = self.alignment.early_exit_tolerance {
            if !(tol > 0.0) {
                return Err(Error::ConfigError(
                    "Alignment early-exit tolerance must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl SimulationConfig {
    /// Validate the synthetic source settings
    ///
    /// Not part of [`Config::validate`]; the controller never reads this section.
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate > 0.0) || self.samples_per_block == 0 {
            return Err(Error::ConfigError(
                "Simulation sample rate and block size must be greater than 0".to_string(),
            ));
        }
        if self.coil_frequencies.len() != DEFAULT_REFERENCE_CHANNELS.len() {
            return Err(Error::ConfigError(format!(
                "{} coil frequencies for {} simulated coils",
                self.coil_frequencies.len(),
                DEFAULT_REFERENCE_CHANNELS.len()
            )));
        }
        if self.noise_level < 0.0 {
            return Err(Error::ConfigError("Noise level must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# HPI Localization Configuration

# Localization cadence
localization:
  localizations_per_second: 1.0
  geometry_poll_interval_ms: 10
  sign_policy: absolute      # absolute | signed (signed keeps the dipole sign needed to recover coil positions)
  warm_start: true

# Channel selection
geometry:
  inner_coil_type: 7002
  reference_channels: ["TRG013", "TRG014", "TRG015", "TRG016"]

# Stream buffer
buffer:
  capacity_blocks: 8

# Coil fit (Nelder-Mead)
optimizer:
  max_iterations: 100
  max_evaluations: 600
  tol_x: 0.0001
  tol_f: 0.0001
  usual_delta: 0.05
  zero_term_delta: 0.00025

# Device-to-head alignment
alignment:
  iterations: 15
  # early_exit_tolerance: 1.0e-9

# Synthetic source for hpi-track
simulation:
  sample_rate: 1000.0
  samples_per_block: 100
  coil_frequencies: [154.0, 158.0, 162.0, 166.0]
  noise_level: 0.01
  duration_secs: 10.0
  realtime: false
  seed: 42
"#;
