use nalgebra::{Matrix3, Matrix4};

use super::Pose;

/// Overall tolerance under which a transform is treated as the identity.
pub const IDENTITY_TOLERANCE: f64 = 1e-8;

/// Tolerance under which the rotation block of a transform is treated as the identity.
pub const ROTATION_TOLERANCE: f64 = 1e-6;

pub fn is_identity(matrix: &Matrix4<f64>, tolerance: f64) -> bool {
    matrix
        .iter()
        .zip(Matrix4::<f64>::identity().iter())
        .all(|(a, b)| (a - b).abs() <= tolerance)
}

pub fn has_rotation(matrix: &Matrix4<f64>) -> bool {
    let rotation = matrix.fixed_view::<3, 3>(0, 0);
    !rotation
        .iter()
        .zip(Matrix3::<f64>::identity().iter())
        .all(|(a, b)| (a - b).abs() <= ROTATION_TOLERANCE)
}

/// What changed when a new transform was applied to a [`TransformCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformUpdate {
    /// Within [`IDENTITY_TOLERANCE`] of the cached transform; nothing to recompute.
    Unchanged,
    /// Only the translation moved, so directions (normals) stay valid.
    Translated,
    /// The rotation changed, so directions must be recomputed as well.
    Rotated,
}

/// Caches a rigid transform and its inverse so placed geometry is only recomputed when the
/// transform actually moves.
#[derive(Clone, Debug)]
pub struct TransformCache {
    matrix: Matrix4<f64>,
    inverse: Matrix4<f64>,
}

impl Default for TransformCache {
    fn default() -> Self {
        Self {
            matrix: Matrix4::identity(),
            inverse: Matrix4::identity(),
        }
    }
}

impl TransformCache {
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    pub fn inverse(&self) -> &Matrix4<f64> {
        &self.inverse
    }

    pub fn apply(&mut self, pose: &Pose) -> TransformUpdate {
        let matrix = pose.to_matrix();
        let delta = matrix * self.inverse;
        if is_identity(&delta, IDENTITY_TOLERANCE) {
            return TransformUpdate::Unchanged;
        }

        self.matrix = matrix;
        self.inverse = pose.isometry().inverse().to_homogeneous();
        if has_rotation(&delta) {
            TransformUpdate::Rotated
        } else {
            TransformUpdate::Translated
        }
    }
}
