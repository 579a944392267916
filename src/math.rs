//! Rigid transforms and small math helpers shared by the engine.

use glam::{Mat3, Mat4, Quat, Vec3};

/// Rigid transform: position plus unit orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Create a transform from a position.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
        }
    }

    /// Convert to a 4x4 matrix (translation * rotation).
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position)
    }

    /// Decompose a rigid 4x4 matrix. Scale is discarded.
    pub fn from_matrix(mat: Mat4) -> Self {
        let (_, orientation, position) = mat.to_scale_rotation_translation();
        Self {
            position,
            orientation: orientation.normalize(),
        }
    }

    #[inline]
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.orientation * local
    }

    #[inline]
    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.orientation.inverse() * (world - self.position)
    }

    #[inline]
    pub fn rotate(&self, local: Vec3) -> Vec3 {
        self.orientation * local
    }

    #[inline]
    pub fn inverse_rotate(&self, world: Vec3) -> Vec3 {
        self.orientation.inverse() * world
    }

    /// Rotation part as a 3x3 matrix (columns are the local axes in world space).
    #[inline]
    pub fn basis(&self) -> Mat3 {
        Mat3::from_quat(self.orientation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Motion of a body's center of mass across one step.
///
/// `c0`/`q0` hold the state at the beginning of the step, `c`/`q` the state
/// at the end. The body origin is recovered through `local_center`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sweep {
    pub local_center: Vec3,
    pub c0: Vec3,
    pub c: Vec3,
    pub q0: Quat,
    pub q: Quat,
}

impl Sweep {
    pub fn from_transform(transform: &Transform, local_center: Vec3) -> Self {
        let c = transform.transform_point(local_center);
        Self {
            local_center,
            c0: c,
            c,
            q0: transform.orientation,
            q: transform.orientation,
        }
    }

    /// Body transform at the end of the step.
    pub fn transform(&self) -> Transform {
        Transform {
            position: self.c - self.q * self.local_center,
            orientation: self.q,
        }
    }

    /// Body transform at the beginning of the step.
    pub fn transform0(&self) -> Transform {
        Transform {
            position: self.c0 - self.q0 * self.local_center,
            orientation: self.q0,
        }
    }

    /// Make the end state the new starting state.
    pub fn advance(&mut self) {
        self.c0 = self.c;
        self.q0 = self.q;
    }
}

/// Integrate an orientation by an angular velocity: q' = q + 0.5 * dt * (omega * q).
///
/// The result is renormalized.
#[inline]
pub fn integrate_rotation(q: Quat, omega: Vec3, dt: f32) -> Quat {
    if omega.length_squared() < 1e-12 {
        return q;
    }
    let omega_quat = Quat::from_xyzw(omega.x, omega.y, omega.z, 0.0);
    let q_dot = omega_quat * q * 0.5;
    Quat::from_xyzw(
        q.x + q_dot.x * dt,
        q.y + q_dot.y * dt,
        q.z + q_dot.z * dt,
        q.w + q_dot.w * dt,
    )
    .normalize()
}

/// Rotate a body-space inertia tensor into world space: R * I * R^T.
#[inline]
pub fn rotate_inertia(q: Quat, local: Mat3) -> Mat3 {
    let r = Mat3::from_quat(q);
    r * local * r.transpose()
}

/// Inverse of a symmetric inertia tensor, zero when singular.
#[inline]
pub fn inverse_or_zero(m: Mat3) -> Mat3 {
    let det = m.determinant();
    if det.abs() > f32::EPSILON {
        m.inverse()
    } else {
        Mat3::ZERO
    }
}

/// Two unit vectors spanning the plane orthogonal to `normal`.
#[inline]
pub fn tangent_basis(normal: Vec3) -> (Vec3, Vec3) {
    normal.any_orthonormal_pair()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_transform_point_roundtrip() {
        let t = Transform::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(0.7));
        let p = Vec3::new(-0.5, 4.0, 2.0);
        let world = t.transform_point(p);
        let back = t.inverse_transform_point(world);
        assert!((back - p).length() < 1e-5);
    }

    #[test]
    fn test_to_matrix_matches_transform_point() {
        let t = Transform::new(Vec3::new(3.0, 0.0, -1.0), Quat::from_rotation_z(FRAC_PI_2));
        let p = Vec3::X;
        let a = t.to_matrix().transform_point3(p);
        let b = t.transform_point(p);
        assert!((a - b).length() < 1e-5);
        assert!((b - Vec3::new(3.0, 1.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn test_integrate_rotation_stays_normalized() {
        let mut q = Quat::IDENTITY;
        for _ in 0..100 {
            q = integrate_rotation(q, Vec3::new(3.0, -1.0, 2.0), 1.0 / 60.0);
        }
        assert!((q.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_sweep_transform_with_offset_center() {
        let t = Transform::new(Vec3::new(0.0, 1.0, 0.0), Quat::from_rotation_y(FRAC_PI_2));
        let sweep = Sweep::from_transform(&t, Vec3::new(1.0, 0.0, 0.0));
        let recovered = sweep.transform();
        assert!((recovered.position - t.position).length() < 1e-5);
    }

    #[test]
    fn test_rotate_inertia_identity_invariant() {
        let i = Mat3::from_diagonal(Vec3::splat(2.0));
        let r = rotate_inertia(Quat::from_rotation_x(0.3), i);
        assert!(r.abs_diff_eq(i, 1e-5));
    }
}
