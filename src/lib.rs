//! Real-time localization of HPI coils for MEG head tracking.
//!
//! Small coils fixed to the subject's head are driven at distinct
//! frequencies. This library turns the raw sensor stream into an updated
//! device-to-head rigid transform:
//!
//! 1. Raw `[channels × samples]` blocks are queued in a bounded, cancellable
//!    [`stream_buffer::StreamBuffer`]
//! 2. Each localization cycle correlates the inner sensors against every
//!    coil's reference channel ([`demodulator`])
//! 3. A Nelder-Mead search over a magnetic dipole forward model fits each
//!    coil's device position ([`dipole_fit`], [`lead_field`], [`optimizer`])
//! 4. Iterative Procrustes alignment maps the fitted positions onto the
//!    digitized head positions ([`alignment`])
//! 5. The transform is published as an immutable snapshot ([`transform`])
//!
//! # Examples
//!
//! ## Streaming Controller
//!
//! ```no_run
//! use hpi_localization::{
//!     config::{Config, SimulationConfig},
//!     controller::{ControllerState, HpiController},
//!     simulation::{default_true_transform, SyntheticSource},
//! };
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut source = SyntheticSource::new(&SimulationConfig::default(), default_true_transform())?;
//!
//! let controller = HpiController::new(Config::default())?;
//! controller.set_measurement_info(source.measurement_info().clone())?;
//! controller.start()?;
//! controller.wait_for_state(ControllerState::Streaming, Duration::from_secs(1));
//!
//! // One second of data at 1 kHz in blocks of 100 samples
//! for _ in 0..10 {
//!     controller.push_block(source.next_block())?;
//! }
//!
//! if let Some(localization) = controller.wait_for_version(1, Duration::from_secs(5)) {
//!     println!("Device to head:\n{}", localization.transform);
//! }
//! controller.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Single Cycle
//!
//! ```no_run
//! use hpi_localization::{
//!     config::{Config, SimulationConfig},
//!     geometry::SensorGeometry,
//!     pipeline::LocalizationPipeline,
//!     simulation::{default_true_transform, SyntheticSource},
//!     transform::TransformPublisher,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let sim = SimulationConfig { samples_per_block: 1000, ..SimulationConfig::default() };
//! let mut source = SyntheticSource::new(&sim, default_true_transform())?;
//!
//! let geometry = SensorGeometry::from_info(source.measurement_info(), &config.geometry)?;
//! let mut pipeline = LocalizationPipeline::new(geometry, &config)?;
//! let publisher = TransformPublisher::default();
//!
//! let block = source.next_block();
//! pipeline.process_window(block.data(), &publisher)?;
//! for coil in pipeline.coils() {
//!     println!("Coil {}: residual {:.2e}", coil.id, coil.residual);
//! }
//! # Ok(())
//! # }
//! ```

/// Rigid device-to-head alignment
pub mod alignment;

/// Configuration management
pub mod config;

/// Constants used throughout the library
pub mod constants;

/// Streaming worker and its state machine
pub mod controller;

/// Reference-locked amplitude extraction
pub mod demodulator;

/// Coil position fitting
pub mod dipole_fit;

/// Error types and result handling
pub mod error;

/// Sensor geometry and digitization data
pub mod geometry;

/// Magnetic dipole forward model
pub mod lead_field;

/// Nelder-Mead simplex minimization
pub mod optimizer;

/// Per-cycle localization pipeline
pub mod pipeline;

/// Synthetic acquisition source for tests, benchmarks and the demo binary
pub mod simulation;

/// Bounded producer/consumer block queue
pub mod stream_buffer;

/// Transform helpers and snapshot publication
pub mod transform;

/// Numeric helpers
pub mod utils;

pub use error::{Error, Result};
