//! Device-to-head transform and its lock-protected snapshot publication.

use crate::dipole_fit::Coil;
use log::debug;
use nalgebra::{Matrix3, Matrix4, Vector3};
use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Rotation block of a homogeneous transform
pub fn rotation_part(transform: &Matrix4<f64>) -> Matrix3<f64> {
    transform.fixed_view::<3, 3>(0, 0).into_owned()
}

/// Translation column of a homogeneous transform
pub fn translation_part(transform: &Matrix4<f64>) -> Vector3<f64> {
    transform.fixed_view::<3, 1>(0, 3).into_owned()
}

/// Map a point through a rigid transform
pub fn apply_transform(transform: &Matrix4<f64>, point: &Vector3<f64>) -> Vector3<f64> {
    rotation_part(transform) * point + translation_part(transform)
}

/// Inverse of a rigid transform, using the transpose of its rotation
pub fn rigid_inverse(transform: &Matrix4<f64>) -> Matrix4<f64> {
    let rotation_t = rotation_part(transform).transpose();
    let translation = -(rotation_t * translation_part(transform));

    let mut inverse = rotation_t.to_homogeneous();
    inverse.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
    inverse
}

/// Angle in radians of the rotation taking `a`'s rotation block to `b`'s
pub fn rotation_angle_between(a: &Matrix4<f64>, b: &Matrix4<f64>) -> f64 {
    let relative = rotation_part(a).transpose() * rotation_part(b);
    ((relative.trace() - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
}

/// Rotation angle of a transform relative to identity, in radians
pub fn rotation_angle(transform: &Matrix4<f64>) -> f64 {
    rotation_angle_between(&Matrix4::identity(), transform)
}

/// One published localization result
#[derive(Debug, Clone, PartialEq)]
pub struct Localization {
    /// Monotonic publication counter; 0 is the initial transform
    pub version: u64,
    /// Device-to-head rigid transform
    pub transform: Matrix4<f64>,
    /// Coils as fitted for this result, empty for the initial transform
    pub coils: Vec<Coil>,
    /// Final alignment residual in metres
    pub alignment_residual: f64,
}

impl Localization {
    fn initial(transform: Matrix4<f64>) -> Self {
        Self {
            version: 0,
            transform,
            coils: Vec::new(),
            alignment_residual: 0.0,
        }
    }
}

/// Shared holder of the latest [`Localization`]
///
/// Writers build a complete snapshot and swap it in under a single write
/// lock; readers clone the `Arc`, so they always see a whole transform.
#[derive(Debug)]
pub struct TransformPublisher {
    current: RwLock<Arc<Localization>>,
    version: AtomicU64,
}

impl Default for TransformPublisher {
    fn default() -> Self {
        Self::new(Matrix4::identity())
    }
}

impl TransformPublisher {
    /// Publisher seeded with `initial` as version 0
    #[must_use]
    pub fn new(initial: Matrix4<f64>) -> Self {
        Self {
            current: RwLock::new(Arc::new(Localization::initial(initial))),
            version: AtomicU64::new(0),
        }
    }

    /// Publish a new transform, returning its version
    pub fn publish(&self, transform: Matrix4<f64>, coils: Vec<Coil>, alignment_residual: f64) -> u64 {
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        let snapshot = Arc::new(Localization {
            version,
            transform,
            coils,
            alignment_residual,
        });

        let mut current = self.current.write();
        // Concurrent publishers may race; never let an older snapshot win
        if current.version < version {
            *current = snapshot;
        }
        drop(current);

        debug!("Published transform version {}", version);
        version
    }

    /// Replace the current transform with `initial`, returning its version
    ///
    /// Before anything is published the seed stays version 0. Afterwards it
    /// takes the next version, so versions never go backwards.
    pub fn reset(&self, initial: Matrix4<f64>) -> u64 {
        let mut current = self.current.write();
        let version = if self.version.load(Ordering::Acquire) == 0 {
            0
        } else {
            self.version.fetch_add(1, Ordering::AcqRel) + 1
        };
        if current.version <= version {
            *current = Arc::new(Localization {
                version,
                ..Localization::initial(initial)
            });
        }
        version
    }

    /// Latest snapshot
    pub fn latest(&self) -> Arc<Localization> {
        Arc::clone(&self.current.read())
    }

    /// Latest transform
    pub fn transform(&self) -> Matrix4<f64> {
        self.current.read().transform
    }

    /// Version of the latest snapshot
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
