//! Iterative Procrustes alignment of fitted coil positions onto their
//! digitized head positions.

use crate::{config::AlignmentConfig, constants::DEFAULT_ALIGNMENT_ITERATIONS, utils::safe_cast::usize_to_f64, Error, Result};
use log::trace;
use nalgebra::{Matrix3, Matrix4, Vector3};

/// Outcome of an alignment
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentResult {
    /// Homogeneous transform taking device coordinates to head coordinates
    pub transform: Matrix4<f64>,
    /// Frobenius distance between the moved device set and the head set after each iteration
    pub residuals: Vec<f64>,
}

impl AlignmentResult {
    /// Residual after the last iteration
    pub fn residual(&self) -> f64 {
        self.residuals.last().copied().unwrap_or(f64::NAN)
    }

    /// Iterations actually run
    pub fn iterations(&self) -> usize {
        self.residuals.len()
    }
}

/// Rigid device-to-head aligner
///
/// Every iteration moves the device set by its mean offset to the head set,
/// then rotates it about the origin by the orthogonal Procrustes solution of
/// the cross-covariance. It runs a fixed iteration count unless
/// `early_exit_tolerance` is set.
#[derive(Debug, Clone)]
pub struct RigidAligner {
    iterations: usize,
    early_exit_tolerance: Option<f64>,
}

impl Default for RigidAligner {
    fn default() -> Self {
        Self::with_iterations(DEFAULT_ALIGNMENT_ITERATIONS)
    }
}

impl RigidAligner {
    /// Create an aligner from configuration
    #[must_use]
    pub fn new(config: &AlignmentConfig) -> Self {
        Self {
            iterations: config.iterations,
            early_exit_tolerance: config.early_exit_tolerance,
        }
    }

    /// Fixed-count aligner without early exit
    pub fn with_iterations(iterations: usize) -> Self {
        Self {
            iterations,
            early_exit_tolerance: None,
        }
    }

    /// Align `device` onto `head`, point `i` corresponding to point `i`
    ///
    /// # Errors
    ///
    /// Returns an error if the sets differ in length, hold fewer than three
    /// points, or the aligner was built with zero iterations
    pub fn align(&self, device: &[Vector3<f64>], head: &[Vector3<f64>]) -> Result<AlignmentResult> {
        if device.len() != head.len() {
            return Err(Error::InvalidInput(format!(
                "Cannot align {} device points to {} head points",
                device.len(),
                head.len()
            )));
        }
        if self.iterations == 0 {
            return Err(Error::InvalidInput("Alignment needs at least one iteration".to_string()));
        }
        if device.len() < 3 {
            return Err(Error::InvalidInput(format!(
                "Alignment needs at least 3 points, got {}",
                device.len()
            )));
        }

        let count = usize_to_f64(device.len());
        let mut moving = device.to_vec();
        let mut transform = Matrix4::identity();
        let mut residuals = Vec::with_capacity(self.iterations);

        for iteration in 0..self.iterations {
            let offset = head
                .iter()
                .zip(&moving)
                .fold(Vector3::zeros(), |acc, (h, d)| acc + (h - d))
                / count;
            for point in &mut moving {
                *point += offset;
            }

            let cross_covariance = moving
                .iter()
                .zip(head)
                .fold(Matrix3::zeros(), |acc, (d, h)| acc + d * h.transpose());

            let svd = cross_covariance.svd(true, true);
            let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
                break;
            };
            let q = u * v_t;
            let rotation = q.transpose();

            for point in &mut moving {
                *point = rotation * *point;
            }

            transform = rotation.to_homogeneous() * Matrix4::new_translation(&offset) * transform;

            let residual = moving
                .iter()
                .zip(head)
                .map(|(d, h)| (h - d).norm_squared())
                .sum::<f64>()
                .sqrt();
            trace!("alignment iteration {}: residual {:.3e}", iteration, residual);

            let previous = residuals.last().copied();
            residuals.push(residual);

            if let (Some(tolerance), Some(previous)) = (self.early_exit_tolerance, previous) {
                if previous - residual < tolerance {
                    break;
                }
            }
        }

        Ok(AlignmentResult { transform, residuals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{apply_transform, rotation_part, translation_part};
    use nalgebra::{Rotation3, Unit};

    /// Head-space coil layout with a realistic off-origin centroid
    fn head_points() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.09, 0.01),
            Vector3::new(-0.075, 0.0, 0.0),
            Vector3::new(0.075, 0.0, 0.01),
            Vector3::new(0.0, -0.08, 0.07),
        ]
    }

    fn known_motion() -> (Matrix3<f64>, Vector3<f64>) {
        let axis = Unit::new_normalize(Vector3::new(1.0, -2.0, 0.5));
        let rotation = Rotation3::from_axis_angle(&axis, 12f64.to_radians()).into_inner();
        (rotation, Vector3::new(0.004, -0.012, 0.035))
    }

    #[test]
    fn test_identical_sets_give_identity() {
        let head = head_points();
        let result = RigidAligner::default().align(&head, &head).unwrap();
        assert!((result.transform - Matrix4::identity()).norm() < 1e-12);
        assert!(result.residual() < 1e-12);
        assert_eq!(result.iterations(), 15);
    }

    #[test]
    fn test_recovers_known_device_to_head_motion() {
        let (rotation, translation) = known_motion();
        let head = head_points();
        let device: Vec<_> = head.iter().map(|h| rotation.transpose() * (h - translation)).collect();

        let result = RigidAligner::default().align(&device, &head).unwrap();
        assert!((rotation_part(&result.transform) - rotation).norm() < 1e-6);
        assert!((translation_part(&result.transform) - translation).norm() < 1e-6);

        for (d, h) in device.iter().zip(&head) {
            assert!((apply_transform(&result.transform, d) - h).norm() < 1e-6);
        }
    }

    #[test]
    fn test_recovers_head_to_device_motion_as_inverse() {
        // device = R·head + t, so the device-to-head transform is its inverse
        let (rotation, translation) = known_motion();
        let head = head_points();
        let device: Vec<_> = head.iter().map(|h| rotation * h + translation).collect();

        let result = RigidAligner::default().align(&device, &head).unwrap();
        let mut forward = rotation.to_homogeneous();
        forward.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);

        assert!((result.transform * forward - Matrix4::identity()).norm() < 1e-6);
    }

    #[test]
    fn test_residual_decreases_monotonically() {
        let (rotation, translation) = known_motion();
        let head = head_points();
        let device: Vec<_> = head.iter().map(|h| rotation * h + translation).collect();

        let result = RigidAligner::default().align(&device, &head).unwrap();
        for pair in result.residuals.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12, "residual rose: {:?}", pair);
        }
        assert!(result.residual() < 1e-8);
    }

    #[test]
    fn test_iteration_count_configurable() {
        let head = head_points();
        let (rotation, translation) = known_motion();
        let device: Vec<_> = head.iter().map(|h| rotation * h + translation).collect();

        let one = RigidAligner::with_iterations(1).align(&device, &head).unwrap();
        assert_eq!(one.iterations(), 1);

        let early = RigidAligner::new(&AlignmentConfig {
            iterations: 15,
            early_exit_tolerance: Some(1e-6),
        })
        .align(&device, &head)
        .unwrap();
        assert!(early.iterations() < 15);
        assert!(early.residual() < 1e-5);
    }

    #[test]
    fn test_rejects_zero_iterations() {
        let head = head_points();
        let result = RigidAligner::with_iterations(0).align(&head, &head);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_mismatched_sets() {
        let head = head_points();
        assert!(RigidAligner::default().align(&head[..3], &head).is_err());
        assert!(RigidAligner::default().align(&head[..2], &head[..2]).is_err());
    }
}
