//! Constants used throughout the library

/// Permeability term of the dipole model; the 1/(4π) factor is applied separately
pub const MU0: f64 = 1e-7;

/// Coil-type tag of the magnetometers used for localization
pub const DEFAULT_INNER_COIL_TYPE: i32 = 7002;

/// Names of the excitation-locked reference channels, one per HPI coil
pub const DEFAULT_REFERENCE_CHANNELS: [&str; 4] = ["TRG013", "TRG014", "TRG015", "TRG016"];

/// Localizations per second
pub const DEFAULT_LOCALIZATIONS_PER_SECOND: f64 = 1.0;

/// Poll interval while waiting for measurement info
pub const DEFAULT_GEOMETRY_POLL_MS: u64 = 10;

/// Number of blocks the stream buffer holds
pub const DEFAULT_BUFFER_BLOCKS: usize = 8;

/// Nelder-Mead reflection coefficient
pub const SIMPLEX_RHO: f64 = 1.0;
/// Nelder-Mead expansion coefficient
pub const SIMPLEX_CHI: f64 = 2.0;
/// Nelder-Mead contraction coefficient
pub const SIMPLEX_PSI: f64 = 0.5;
/// Nelder-Mead shrink coefficient
pub const SIMPLEX_SIGMA: f64 = 0.5;

/// Default optimizer budget
pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_MAX_EVALUATIONS: usize = 600;

/// Default simplex termination tolerances
pub const DEFAULT_TOL_X: f64 = 1e-4;
pub const DEFAULT_TOL_F: f64 = 1e-4;

/// Initial simplex perturbations: relative for non-zero terms, absolute for zero terms
pub const DEFAULT_USUAL_DELTA: f64 = 0.05;
pub const DEFAULT_ZERO_TERM_DELTA: f64 = 0.000_25;

/// Fixed number of Procrustes iterations
pub const DEFAULT_ALIGNMENT_ITERATIONS: usize = 15;

/// Residual reported for degenerate (zero-norm) data
pub const WORST_RESIDUAL: f64 = 1.0;

/// Metres to millimetres
pub const M_TO_MM: f64 = 1000.0;
