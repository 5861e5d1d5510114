//! Magnetic dipole fitting of HPI coil positions.
//!
//! For a trial position the moment enters the model linearly, so it is solved
//! in closed form with a pseudo-inverse and only the three position
//! coordinates are left to the Nelder-Mead search.

use crate::{
    config::OptimizerConfig,
    constants::WORST_RESIDUAL,
    geometry::SensorGeometry,
    lead_field::lead_field,
    optimizer::{NelderMead, Termination},
    utils::linalg::pseudo_inverse,
};
use log::debug;
use nalgebra::{DMatrix, DVector, Vector3};

/// Residual and best moment of a dipole at a fixed position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DipoleResidual {
    /// `‖data − L·m‖² / ‖data‖²`: 0 is a perfect fit, 1 explains nothing
    pub error: f64,
    /// Least-squares moment `pinv(L)·data`
    pub moment: Vector3<f64>,
}

/// Normalized residual of a dipole at `position` explaining `data`
///
/// Zero-norm data and non-finite model output, such as a trial position on
/// top of a sensor, both yield the worst residual rather than NaN.
pub fn dipfit_error(position: &Vector3<f64>, data: &DVector<f64>, geometry: &SensorGeometry) -> DipoleResidual {
    let lf = lead_field(position, geometry);
    if lf.iter().any(|v| !v.is_finite()) {
        return DipoleResidual {
            error: WORST_RESIDUAL,
            moment: Vector3::zeros(),
        };
    }

    let solved = pseudo_inverse(&lf) * data;
    let moment = Vector3::new(solved[0], solved[1], solved[2]);

    let data_power = data.norm_squared();
    if data_power == 0.0 {
        return DipoleResidual {
            error: WORST_RESIDUAL,
            moment,
        };
    }

    let residual = data - &lf * &solved;
    let error = residual.norm_squared() / data_power;
    DipoleResidual {
        error: if error.is_finite() { error } else { WORST_RESIDUAL },
        moment,
    }
}

/// Result of fitting one coil
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoilFit {
    /// Fitted device-space position
    pub position: Vector3<f64>,
    /// Moment at the fitted position
    pub moment: Vector3<f64>,
    /// Normalized residual at the fitted position
    pub residual: f64,
    /// Optimizer iterations used
    pub iterations: usize,
    /// Objective evaluations used
    pub evaluations: usize,
    /// Why the optimizer stopped
    pub termination: Termination,
}

/// An HPI coil: fixed digitized head position plus its latest fit
#[derive(Debug, Clone, PartialEq)]
pub struct Coil {
    /// Index in reference-channel and digitization order
    pub id: usize,
    /// Digitized position in head coordinates, fixed for the session
    pub head_position: Vector3<f64>,
    /// Fitted position in device coordinates
    pub device_position: Vector3<f64>,
    /// Fitted dipole moment
    pub moment: Vector3<f64>,
    /// Residual of the latest fit
    pub residual: f64,
    /// Diagnostics of the latest fit, `None` before the first fit
    pub last_fit: Option<CoilFit>,
}

impl Coil {
    /// A coil that has not been fitted yet
    #[must_use]
    pub fn new(id: usize, head_position: Vector3<f64>) -> Self {
        Self {
            id,
            head_position,
            device_position: Vector3::zeros(),
            moment: Vector3::zeros(),
            residual: WORST_RESIDUAL,
            last_fit: None,
        }
    }

    /// Whether the coil has been fitted at least once
    pub fn is_fitted(&self) -> bool {
        self.last_fit.is_some()
    }

    fn apply(&mut self, fit: CoilFit) {
        self.device_position = fit.position;
        self.moment = fit.moment;
        self.residual = fit.residual;
        self.last_fit = Some(fit);
    }
}

/// Fits coil positions to demodulated amplitudes
#[derive(Debug, Clone, Default)]
pub struct DipoleFitter {
    optimizer: NelderMead,
}

impl DipoleFitter {
    /// Create a fitter with the given optimizer settings
    #[must_use]
    pub fn new(config: &OptimizerConfig) -> Self {
        Self {
            optimizer: NelderMead::new(config),
        }
    }

    /// Fit one coil's amplitude column starting at `initial`
    pub fn fit_coil(&self, initial: &Vector3<f64>, amplitudes: &DVector<f64>, geometry: &SensorGeometry) -> CoilFit {
        let start = DVector::from_column_slice(initial.as_slice());
        let minimum = self.optimizer.minimize(&start, |x| {
            let position = Vector3::new(x[0], x[1], x[2]);
            dipfit_error(&position, amplitudes, geometry).error
        });

        let position = Vector3::new(minimum.point[0], minimum.point[1], minimum.point[2]);
        let final_residual = dipfit_error(&position, amplitudes, geometry);

        CoilFit {
            position,
            moment: final_residual.moment,
            residual: final_residual.error,
            iterations: minimum.iterations,
            evaluations: minimum.evaluations,
            termination: minimum.termination,
        }
    }

    /// Fit every coil in turn against its column of `amplitudes`
    ///
    /// Each coil starts from its current `device_position`, which callers set
    /// to the previous fit or an initial guess.
    pub fn fit_coils(&self, coils: &mut [Coil], amplitudes: &DMatrix<f64>, geometry: &SensorGeometry) {
        for coil in coils.iter_mut() {
            let column = amplitudes.column(coil.id).into_owned();
            let fit = self.fit_coil(&coil.device_position, &column, geometry);
            debug!(
                "Coil {}: pos [{:.4}, {:.4}, {:.4}] residual {:.3e} ({} iterations, {:?})",
                coil.id, fit.position.x, fit.position.y, fit.position.z, fit.residual, fit.iterations, fit.termination
            );
            coil.apply(fit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::helmet_geometry;

    fn synthetic_data(position: &Vector3<f64>, moment: &Vector3<f64>, geometry: &SensorGeometry) -> DVector<f64> {
        lead_field(position, geometry) * moment
    }

    #[test]
    fn test_error_zero_at_true_position() {
        let geometry = helmet_geometry().unwrap();
        let position = Vector3::new(0.01, 0.06, 0.03);
        let moment = Vector3::new(0.2, -0.5, 1.0);
        let data = synthetic_data(&position, &moment, &geometry);

        let residual = dipfit_error(&position, &data, &geometry);
        assert!(residual.error < 1e-12, "error = {}", residual.error);
        assert!((residual.moment - moment).norm() < 1e-6 * moment.norm());
    }

    #[test]
    fn test_error_grows_away_from_true_position() {
        let geometry = helmet_geometry().unwrap();
        let position = Vector3::new(-0.02, 0.0, 0.05);
        let data = synthetic_data(&position, &Vector3::new(0.0, 0.0, 1.0), &geometry);

        let near = dipfit_error(&(position + Vector3::new(0.002, 0.0, 0.0)), &data, &geometry).error;
        let far = dipfit_error(&(position + Vector3::new(0.02, 0.0, 0.0)), &data, &geometry).error;
        assert!(near > 0.0);
        assert!(far > near);
        assert!(far <= 1.0);
    }

    #[test]
    fn test_zero_data_is_worst_not_nan() {
        let geometry = helmet_geometry().unwrap();
        let data = DVector::zeros(geometry.num_inner());
        let residual = dipfit_error(&Vector3::new(0.0, 0.0, 0.05), &data, &geometry);
        assert_eq!(residual.error, 1.0);
        assert!(residual.moment.iter().all(|m| m.is_finite()));
    }

    #[test]
    fn test_fit_recovers_position_from_perturbed_start() {
        let geometry = helmet_geometry().unwrap();
        let truth = Vector3::new(0.03, -0.04, 0.04);
        let moment = Vector3::new(0.3, 0.1, 0.9);
        let data = synthetic_data(&truth, &moment, &geometry);

        let fitter = DipoleFitter::default();
        let fit = fitter.fit_coil(&(truth + Vector3::new(0.004, -0.003, 0.002)), &data, &geometry);

        assert!((fit.position - truth).norm() < 1e-3, "fit off by {}", (fit.position - truth).norm());
        assert!(fit.residual < 1e-3);
        assert!((fit.moment - moment).norm() < 0.1 * moment.norm());
    }

    #[test]
    fn test_fit_coils_updates_each_coil_independently() {
        let geometry = helmet_geometry().unwrap();
        let truths = [Vector3::new(0.05, 0.0, 0.03), Vector3::new(-0.05, 0.01, 0.03)];
        let moments = [Vector3::new(1.0, 0.0, 0.2), Vector3::new(0.0, 1.0, 0.3)];

        let mut amplitudes = DMatrix::zeros(geometry.num_inner(), 2);
        for j in 0..2 {
            amplitudes.set_column(j, &synthetic_data(&truths[j], &moments[j], &geometry));
        }

        let mut coils: Vec<Coil> = (0..2)
            .map(|j| {
                let mut coil = Coil::new(j, Vector3::zeros());
                coil.device_position = truths[j] + Vector3::new(0.003, 0.003, -0.003);
                coil
            })
            .collect();
        assert!(!coils[0].is_fitted());

        DipoleFitter::default().fit_coils(&mut coils, &amplitudes, &geometry);

        for (coil, truth) in coils.iter().zip(truths.iter()) {
            assert!(coil.is_fitted());
            assert!((coil.device_position - truth).norm() < 1e-3);
        }
        assert_ne!(coils[0].moment, coils[1].moment);
    }
}
