//! Helper functions and utilities for tests
#![allow(dead_code)]

use hpi_localization::{
    config::{Config, SimulationConfig},
    demodulator::SignPolicy,
    simulation::{default_true_transform, SyntheticSource},
    transform::{rotation_angle_between, translation_part},
    Result,
};
use nalgebra::Matrix4;

/// Default configuration with signed demodulation
pub fn signed_config() -> Config {
    let mut config = Config::default();
    config.localization.sign_policy = SignPolicy::Signed;
    config
}

/// Simulation settings with the given noise level
pub fn simulation(noise_level: f64) -> SimulationConfig {
    SimulationConfig {
        noise_level,
        ..SimulationConfig::default()
    }
}

/// Synthetic source at the default head pose
pub fn create_test_source(noise_level: f64) -> Result<SyntheticSource> {
    SyntheticSource::new(&simulation(noise_level), default_true_transform())
}

/// Rotation error in degrees and translation error in millimetres
pub fn transform_error(estimate: &Matrix4<f64>, truth: &Matrix4<f64>) -> (f64, f64) {
    let degrees = rotation_angle_between(estimate, truth).to_degrees();
    let millimetres = (translation_part(estimate) - translation_part(truth)).norm() * 1000.0;
    (degrees, millimetres)
}

/// Assert that a transform is finite with an orthonormal rotation block
pub fn assert_rigid(transform: &Matrix4<f64>) {
    assert!(transform.iter().all(|v| v.is_finite()), "non-finite transform {transform}");
    let rotation = transform.fixed_view::<3, 3>(0, 0).into_owned();
    let gram = rotation.transpose() * rotation;
    assert!((gram - nalgebra::Matrix3::identity()).norm() < 1e-9);
    assert!((rotation.determinant().abs() - 1.0).abs() < 1e-9);
    assert_eq!(transform[(3, 3)], 1.0);
}
