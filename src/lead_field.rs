//! Forward model of a magnetic dipole in an infinite homogeneous medium.

use crate::{
    constants::MU0,
    geometry::{Sensor, SensorGeometry},
};
use nalgebra::{DMatrix, Vector3};
use std::f64::consts::PI;

/// Calibrated leadfield `[inner × 3]` for a dipole at `position`
///
/// Column `a` is the calibrated channel response to a unit moment along axis
/// `a`. The model is singular when `position` coincides with a sensor.
pub fn lead_field(position: &Vector3<f64>, geometry: &SensorGeometry) -> DMatrix<f64> {
    let physical = magnetic_dipole(position, geometry);
    geometry.calibration() * physical
}

/// Uncalibrated magnetic dipole leadfield
pub fn magnetic_dipole(position: &Vector3<f64>, geometry: &SensorGeometry) -> DMatrix<f64> {
    let sensors = geometry.sensors();
    let mut lf = DMatrix::zeros(sensors.len(), 3);

    for (i, sensor) in sensors.iter().enumerate() {
        let response = dipole_response(sensor, position);
        for axis in 0..3 {
            lf[(i, axis)] = response[axis];
        }
    }

    lf
}

/// Field picked up by one sensor per unit moment along each axis
pub fn dipole_response(sensor: &Sensor, position: &Vector3<f64>) -> Vector3<f64> {
    let r = sensor.position - position;
    let r2 = r.norm_squared();
    let r5 = r2 * r2 * r2.sqrt();
    let scale = MU0 / (4.0 * PI * r5);

    Vector3::from_fn(|axis, _| {
        // T_a = 3·r_a·r − e_a·|r|²
        let mut t = 3.0 * r[axis] * r;
        t[axis] -= r2;
        scale * t.dot(&sensor.orientation)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::GeometryConfig,
        geometry::{ChannelInfo, DigPoint, DigPointKind, MeasurementInfo},
    };

    fn single_sensor(position: Vector3<f64>, orientation: Vector3<f64>) -> SensorGeometry {
        let mut channels = vec![ChannelInfo::new("MEG0111", 7002, position, orientation)];
        let mut dig = Vec::new();
        for (i, name) in ["TRG013", "TRG014", "TRG015", "TRG016"].iter().enumerate() {
            channels.push(ChannelInfo::new(*name, 3, Vector3::zeros(), Vector3::z()));
            dig.push(DigPoint {
                kind: DigPointKind::Hpi,
                ident: i as u32,
                position: Vector3::zeros(),
            });
        }
        let info = MeasurementInfo {
            channels,
            bads: Vec::new(),
            sample_rate: 1000.0,
            dig,
        };
        SensorGeometry::from_info(&info, &GeometryConfig::default()).unwrap()
    }

    #[test]
    fn test_on_axis_field() {
        // Sensor 0.1 m above the dipole, pointing up: B_z of a z-dipole is 2·μ0/(4π r³)
        let geometry = single_sensor(Vector3::new(0.0, 0.0, 0.1), Vector3::z());
        let lf = lead_field(&Vector3::zeros(), &geometry);

        let expected = 2.0 * MU0 / (4.0 * PI * 0.1_f64.powi(3));
        assert!((lf[(0, 2)] - expected).abs() < 1e-12 * expected.abs().max(1.0));
        assert!(lf[(0, 0)].abs() < 1e-15);
        assert!(lf[(0, 1)].abs() < 1e-15);
    }

    #[test]
    fn test_equatorial_field() {
        // Sensor on the x axis: a z-dipole gives B_z = −μ0/(4π r³)
        let geometry = single_sensor(Vector3::new(0.1, 0.0, 0.0), Vector3::z());
        let lf = lead_field(&Vector3::zeros(), &geometry);

        let expected = -MU0 / (4.0 * PI * 0.1_f64.powi(3));
        assert!((lf[(0, 2)] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_translation_invariance() {
        let shift = Vector3::new(0.01, -0.02, 0.03);
        let a = single_sensor(Vector3::new(0.02, 0.05, 0.1), Vector3::new(0.0, 0.6, 0.8));
        let b = single_sensor(Vector3::new(0.02, 0.05, 0.1) + shift, Vector3::new(0.0, 0.6, 0.8));

        let lf_a = lead_field(&Vector3::new(0.0, 0.01, 0.0), &a);
        let lf_b = lead_field(&(Vector3::new(0.0, 0.01, 0.0) + shift), &b);
        assert!((lf_a - lf_b).norm() < 1e-15);
    }

    #[test]
    fn test_calibration_applied() {
        let geometry = single_sensor(Vector3::new(0.0, 0.0, 0.1), Vector3::z())
            .with_calibration(DMatrix::from_element(1, 1, 3.0))
            .unwrap();
        let raw = magnetic_dipole(&Vector3::zeros(), &geometry);
        let calibrated = lead_field(&Vector3::zeros(), &geometry);
        assert!((calibrated - raw * 3.0).norm() < 1e-15);
    }
}
