//! Collision shapes and their mass properties.

use std::f32::consts::PI;

use glam::{Mat3, Vec3};

use crate::collider::{aabb_from_extents, Aabb, ConvexInfo};
use crate::error::{PhysicsError, Result};
use crate::math::{rotate_inertia, Transform};

/// Shape discriminant. Each variant is a distinct bit so that `a | b`
/// identifies an unordered pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ShapeType {
    Sphere = 1,
    Box = 2,
    Capsule = 4,
    Cylinder = 8,
}

impl ShapeType {
    #[inline]
    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// Local geometry of a shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShapeKind {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    /// Capsule along the local Y axis.
    Capsule { radius: f32, half_height: f32 },
    /// Cylinder along the local Y axis.
    Cylinder { radius: f32, half_height: f32 },
}

/// A convex collision shape placed in its body's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shape {
    pub kind: ShapeKind,
    /// Placement of the shape relative to the body origin.
    pub offset: Transform,
}

/// Mass, center of mass and inertia of a shape, expressed in body space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassData {
    pub mass: f32,
    pub center: Vec3,
    /// Inertia tensor about `center`.
    pub inertia: Mat3,
}

impl MassData {
    pub const ZERO: Self = Self {
        mass: 0.0,
        center: Vec3::ZERO,
        inertia: Mat3::ZERO,
    };
}

impl Shape {
    pub fn new(kind: ShapeKind) -> Self {
        Self {
            kind,
            offset: Transform::IDENTITY,
        }
    }

    pub fn sphere(radius: f32) -> Self {
        Self::new(ShapeKind::Sphere { radius })
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::new(ShapeKind::Box { half_extents })
    }

    pub fn capsule(radius: f32, half_height: f32) -> Self {
        Self::new(ShapeKind::Capsule {
            radius,
            half_height,
        })
    }

    pub fn cylinder(radius: f32, half_height: f32) -> Self {
        Self::new(ShapeKind::Cylinder {
            radius,
            half_height,
        })
    }

    /// Place the shape away from the body origin.
    pub fn with_offset(mut self, offset: Transform) -> Self {
        self.offset = offset;
        self
    }

    pub fn shape_type(&self) -> ShapeType {
        match self.kind {
            ShapeKind::Sphere { .. } => ShapeType::Sphere,
            ShapeKind::Box { .. } => ShapeType::Box,
            ShapeKind::Capsule { .. } => ShapeType::Capsule,
            ShapeKind::Cylinder { .. } => ShapeType::Cylinder,
        }
    }

    /// Number of convex children. Every supported shape is a single convex piece.
    #[inline]
    pub fn child_count(&self) -> usize {
        1
    }

    /// Reject non-positive or non-finite dimensions.
    pub fn validate(&self) -> Result<()> {
        fn positive(value: f32) -> bool {
            value.is_finite() && value > 0.0
        }

        match self.kind {
            ShapeKind::Sphere { radius } if !positive(radius) => Err(
                PhysicsError::InvalidShape("sphere radius must be positive"),
            ),
            ShapeKind::Box { half_extents }
                if !half_extents.is_finite() || half_extents.min_element() <= 0.0 =>
            {
                Err(PhysicsError::InvalidShape(
                    "box half extents must be positive",
                ))
            }
            ShapeKind::Capsule {
                radius,
                half_height,
            } if !positive(radius) || !half_height.is_finite() || half_height < 0.0 => Err(
                PhysicsError::InvalidShape("capsule radius must be positive"),
            ),
            ShapeKind::Cylinder {
                radius,
                half_height,
            } if !positive(radius) || !positive(half_height) => Err(
                PhysicsError::InvalidShape("cylinder dimensions must be positive"),
            ),
            _ if !self.offset.position.is_finite() || !self.offset.orientation.is_finite() => Err(
                PhysicsError::InvalidShape("shape offset must be finite"),
            ),
            _ => Ok(()),
        }
    }

    /// World placement of the shape for a body at `body`.
    #[inline]
    pub fn world_transform(&self, body: &Transform) -> Transform {
        Transform {
            position: body.transform_point(self.offset.position),
            orientation: body.orientation * self.offset.orientation,
        }
    }

    /// World-space support data for a body at `body`.
    pub fn shape_info(&self, body: &Transform) -> ConvexInfo {
        let world = self.world_transform(body);
        let (half_extents, radius, half_height) = match self.kind {
            ShapeKind::Sphere { radius } => (Vec3::splat(radius), radius, 0.0),
            ShapeKind::Box { half_extents } => (half_extents, 0.0, 0.0),
            ShapeKind::Capsule {
                radius,
                half_height,
            } => (
                Vec3::new(radius, half_height + radius, radius),
                radius,
                half_height,
            ),
            ShapeKind::Cylinder {
                radius,
                half_height,
            } => (Vec3::new(radius, half_height, radius), radius, half_height),
        };
        ConvexInfo {
            shape_type: self.shape_type(),
            center: world.position,
            axes: world.basis(),
            half_extents,
            radius,
            half_height,
        }
    }

    /// Tight world-space AABB for a body at `body`.
    pub fn compute_aabb(&self, body: &Transform) -> Aabb {
        let world = self.world_transform(body);
        match self.kind {
            ShapeKind::Sphere { radius } => {
                Aabb::from_center_extents(world.position, Vec3::splat(radius))
            }
            ShapeKind::Box { half_extents } => {
                aabb_from_extents(world.position, world.basis(), half_extents)
            }
            ShapeKind::Capsule {
                radius,
                half_height,
            } => {
                let axis = world.rotate(Vec3::Y);
                let extent = axis.abs() * half_height + Vec3::splat(radius);
                Aabb::from_center_extents(world.position, extent)
            }
            ShapeKind::Cylinder {
                radius,
                half_height,
            } => {
                // Disc extent along world axis i is r * sqrt(1 - axis_i^2),
                // taken from the other two components to stay exact near 0.
                let axis = world.rotate(Vec3::Y);
                let sq = axis * axis;
                let disc = Vec3::new(
                    (sq.y + sq.z).sqrt(),
                    (sq.x + sq.z).sqrt(),
                    (sq.x + sq.y).sqrt(),
                );
                let extent = axis.abs() * half_height + disc * radius;
                Aabb::from_center_extents(world.position, extent)
            }
        }
    }

    /// Volume of the shape.
    pub fn volume(&self) -> f32 {
        match self.kind {
            ShapeKind::Sphere { radius } => (4.0 / 3.0) * PI * radius.powi(3),
            ShapeKind::Box { half_extents } => 8.0 * half_extents.x * half_extents.y * half_extents.z,
            ShapeKind::Capsule {
                radius,
                half_height,
            } => PI * radius * radius * 2.0 * half_height + (4.0 / 3.0) * PI * radius.powi(3),
            ShapeKind::Cylinder {
                radius,
                half_height,
            } => PI * radius * radius * 2.0 * half_height,
        }
    }

    /// Mass properties for a uniform `density`, in body space.
    pub fn mass_data(&self, density: f32) -> MassData {
        let mass = density * self.volume();
        let local = match self.kind {
            ShapeKind::Sphere { radius } => Vec3::splat(0.4 * mass * radius * radius),
            ShapeKind::Box { half_extents } => {
                let d = half_extents * 2.0;
                let (x2, y2, z2) = (d.x * d.x, d.y * d.y, d.z * d.z);
                Vec3::new(y2 + z2, x2 + z2, x2 + y2) * (mass / 12.0)
            }
            ShapeKind::Capsule {
                radius,
                half_height,
            } => {
                let h = half_height * 2.0;
                let side = 0.25 * mass * radius * radius + mass * h * h / 12.0;
                Vec3::new(side, 0.5 * mass * radius * radius, side)
            }
            ShapeKind::Cylinder {
                radius,
                half_height,
            } => {
                let h = half_height * 2.0;
                let side = mass * (3.0 * radius * radius + h * h) / 12.0;
                Vec3::new(side, 0.5 * mass * radius * radius, side)
            }
        };
        MassData {
            mass,
            center: self.offset.position,
            inertia: rotate_inertia(self.offset.orientation, Mat3::from_diagonal(local)),
        }
    }
}
