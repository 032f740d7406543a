use nalgebra::{
    Isometry3, Matrix3, Matrix4, Quaternion, Rotation3, Translation3, UnitQuaternion, Vector3,
};
use serde::{Deserialize, Serialize};

/// Position and orientation of a tracked entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }

    pub fn from_position(x: f64, y: f64, z: f64) -> Self {
        Self::new(Vector3::new(x, y, z), UnitQuaternion::identity())
    }

    /// Builds a pose from a translation and a quaternion in `[qx, qy, qz, qw]` order.
    ///
    /// The quaternion is renormalized.
    pub fn from_translation_quaternion(translation: [f64; 3], quaternion: [f64; 4]) -> Self {
        let [qx, qy, qz, qw] = quaternion;
        Self::new(
            Vector3::from(translation),
            UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz)),
        )
    }

    /// Builds a pose from XYZ Euler angles (roll, pitch, yaw) in radians.
    pub fn from_euler(position: Vector3<f64>, euler: Vector3<f64>) -> Self {
        Self::new(
            position,
            UnitQuaternion::from_euler_angles(euler.x, euler.y, euler.z),
        )
    }

    /// Extracts the rigid part of a homogeneous transform.
    pub fn from_matrix(matrix: &Matrix4<f64>) -> Self {
        let rotation: Matrix3<f64> = matrix.fixed_view::<3, 3>(0, 0).into_owned();
        let position = Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);
        let rotation = Rotation3::from_matrix(&rotation);
        Self::new(position, UnitQuaternion::from_rotation_matrix(&rotation))
    }

    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.position), self.orientation)
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        self.isometry().to_homogeneous()
    }

    /// Orientation as XYZ Euler angles (roll, pitch, yaw).
    pub fn euler(&self) -> Vector3<f64> {
        let (roll, pitch, yaw) = self.orientation.euler_angles();
        Vector3::new(roll, pitch, yaw)
    }

    /// Quaternion components in `[qx, qy, qz, qw]` order.
    pub fn quaternion_xyzw(&self) -> [f64; 4] {
        let q = self.orientation.coords;
        [q.x, q.y, q.z, q.w]
    }

    /// `[x, y, z, qx, qy, qz, qw]`, the pose columns of the trajectory table.
    pub fn as_row(&self) -> [f64; 7] {
        let [qx, qy, qz, qw] = self.quaternion_xyzw();
        [
            self.position.x,
            self.position.y,
            self.position.z,
            qx,
            qy,
            qz,
            qw,
        ]
    }

    pub fn distance_to(&self, other: &Pose) -> f64 {
        (self.position - other.position).norm()
    }

    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.orientation.coords.iter().all(|v| v.is_finite())
    }
}

/// Coordinate convention applied once to raw detector output.
///
/// Pose estimators report metres in a camera frame whose Y axis points down; the scene works in
/// millimetres with Y up.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ingestion {
    pub position_scale: f64,
    pub orientation_scale: f64,
    pub flip_y: bool,
}

impl Default for Ingestion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Ingestion {
    pub const IDENTITY: Ingestion = Ingestion {
        position_scale: 1.0,
        orientation_scale: 1.0,
        flip_y: false,
    };

    /// Metres to millimetres with a mirrored Y axis.
    pub const CAMERA_MILLIMETRES: Ingestion = Ingestion {
        position_scale: 1000.0,
        orientation_scale: 1.0,
        flip_y: true,
    };

    pub fn apply(&self, pose: &Pose) -> Pose {
        let mut position = pose.position * self.position_scale;
        if self.flip_y {
            position.y = -position.y;
        }

        let orientation = if self.orientation_scale == 1.0 {
            pose.orientation
        } else {
            let euler = pose.euler() * self.orientation_scale;
            UnitQuaternion::from_euler_angles(euler.x, euler.y, euler.z)
        };

        Pose::new(position, orientation)
    }
}
