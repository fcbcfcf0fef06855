use nalgebra::{Matrix3, Matrix4, Quaternion, UnitQuaternion, Vector3};

use crate::{
    document::vrm::VrmVersion,
    settings::{CoordinateSettings, Handedness, UpAxis},
};

/// Fixed change of basis from glTF space (Y-up, right-handed, meters) into
/// the host's target space.
///
/// `basis` is a signed permutation, so the conversion preserves lengths and
/// angles. For an affine `A = [s·C 0; 0 1]` transforms convert as
/// `A · M · A⁻¹`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateConversion {
    basis: Matrix3<f32>,
    unit_scale: f32,
    determinant: f32,
}

impl Default for CoordinateConversion {
    fn default() -> Self {
        Self::identity()
    }
}

impl CoordinateConversion {
    pub fn identity() -> Self {
        Self {
            basis: Matrix3::identity(),
            unit_scale: 1.0,
            determinant: 1.0,
        }
    }

    pub fn new(settings: &CoordinateSettings, version: VrmVersion) -> Self {
        let axes = match (settings.up_axis, settings.handedness) {
            (UpAxis::Y, Handedness::Right) => Matrix3::identity(),
            (UpAxis::Y, Handedness::Left) => Matrix3::new(
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                0.0, 0.0, -1.0,
            ),
            (UpAxis::Z, Handedness::Right) => Matrix3::new(
                1.0, 0.0, 0.0, //
                0.0, 0.0, -1.0, //
                0.0, 1.0, 0.0,
            ),
            (UpAxis::Z, Handedness::Left) => Matrix3::new(
                1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, //
                0.0, 1.0, 0.0,
            ),
        };
        // VRM 0.x avatars face -Z; a half turn about Y makes them face +Z.
        let facing = if settings.face_forward_vrm0 && version == VrmVersion::V0 {
            Matrix3::from_diagonal(&Vector3::new(-1.0, 1.0, -1.0))
        } else {
            Matrix3::identity()
        };
        let unit_scale = if settings.unit_scale.is_finite() && settings.unit_scale > 0.0 {
            settings.unit_scale
        } else {
            log::warn!(
                "unit scale {} is not a positive number; using 1.0",
                settings.unit_scale
            );
            1.0
        };
        let basis = axes * facing;
        Self {
            basis,
            unit_scale,
            determinant: basis.determinant(),
        }
    }

    pub fn basis(&self) -> &Matrix3<f32> {
        &self.basis
    }

    pub fn unit_scale(&self) -> f32 {
        self.unit_scale
    }

    /// True when the conversion flips handedness.
    pub fn mirrors(&self) -> bool {
        self.determinant < 0.0
    }

    /// Target-space up axis.
    pub fn up(&self) -> Vector3<f32> {
        self.basis * Vector3::y()
    }

    pub fn point(&self, point: [f32; 3]) -> [f32; 3] {
        let converted = self.basis * Vector3::from(point) * self.unit_scale;
        converted.into()
    }

    pub fn vector(&self, vector: Vector3<f32>) -> Vector3<f32> {
        self.basis * vector
    }

    pub fn normal(&self, normal: [f32; 3]) -> [f32; 3] {
        (self.basis * Vector3::from(normal)).into()
    }

    /// Tangent xyz rotates with the basis; the bitangent sign flips when the
    /// conversion mirrors.
    pub fn tangent(&self, tangent: [f32; 4]) -> [f32; 4] {
        let xyz = self.basis * Vector3::new(tangent[0], tangent[1], tangent[2]);
        [xyz.x, xyz.y, xyz.z, tangent[3] * self.determinant]
    }

    /// Per-axis scale factors; a signed permutation only reorders them.
    pub fn scale(&self, scale: [f32; 3]) -> [f32; 3] {
        (self.basis.abs() * Vector3::from(scale)).into()
    }

    /// Convert raw quaternion components `[x, y, z, w]`.
    ///
    /// The map `v ↦ det(C)·C·v` is linear, so it also converts cubic-spline
    /// tangents, which are not unit quaternions.
    pub fn quaternion(&self, q: [f32; 4]) -> [f32; 4] {
        let v = self.basis * Vector3::new(q[0], q[1], q[2]) * self.determinant;
        [v.x, v.y, v.z, q[3]]
    }

    pub fn rotation(&self, rotation: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
        let q = rotation.coords;
        let [x, y, z, w] = self.quaternion([q.x, q.y, q.z, q.w]);
        UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z))
    }

    /// `A · M · A⁻¹`; used for local transforms and inverse-bind matrices.
    pub fn matrix(&self, matrix: &Matrix4<f32>) -> Matrix4<f32> {
        let mut forward = Matrix4::identity();
        let mut inverse = Matrix4::identity();
        forward
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(self.basis * self.unit_scale));
        inverse
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(self.basis.transpose() / self.unit_scale));
        forward * matrix * inverse
    }
}
