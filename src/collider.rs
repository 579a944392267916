//! Bounding volumes and world-space support geometry for convex shapes.

use glam::{Mat3, Vec3};

use crate::math::tangent_basis;
use crate::shape::ShapeType;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box of the given half-size around `center`.
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Smallest box enclosing both.
    #[inline]
    pub fn combine(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Whether `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    /// Test whether two AABBs overlap.
    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Surface area, the tree's cost metric.
    #[inline]
    pub fn surface_area(&self) -> f32 {
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Grow by `margin` on every side.
    #[inline]
    pub fn fatten(&self, margin: f32) -> Aabb {
        let m = Vec3::splat(margin);
        Aabb {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Extend the box in the direction of `displacement`.
    #[inline]
    pub fn extend_along(&self, displacement: Vec3) -> Aabb {
        Aabb {
            min: self.min + displacement.min(Vec3::ZERO),
            max: self.max + displacement.max(Vec3::ZERO),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min.cmple(self.max).all()
    }
}

/// World-space AABB of an oriented box with the given half-size.
#[inline]
pub fn aabb_from_extents(center: Vec3, basis: Mat3, half_extents: Vec3) -> Aabb {
    let extent = basis.x_axis.abs() * half_extents.x
        + basis.y_axis.abs() * half_extents.y
        + basis.z_axis.abs() * half_extents.z;
    Aabb::from_center_extents(center, extent)
}

/// Number of rim samples used to describe a cylinder cap face.
pub const CAP_SAMPLES: usize = 8;

/// Maximum number of vertices a [`Polygon`] holds. Clipping an eight-sided cap
/// against four side planes stays well under this.
pub const MAX_POLYGON_POINTS: usize = 16;

/// `|dir . axis|` above which a cylinder presents its cap.
const CAP_FACE_COS: f32 = 0.99;
/// `|dir . axis|` below which a capsule or cylinder presents its side.
const SIDE_FACE_COS: f32 = 0.05;

/// Small fixed-capacity convex polygon in world space.
#[derive(Debug, Clone, Copy)]
pub struct Polygon {
    points: [Vec3; MAX_POLYGON_POINTS],
    len: usize,
}

impl Default for Polygon {
    fn default() -> Self {
        Self {
            points: [Vec3::ZERO; MAX_POLYGON_POINTS],
            len: 0,
        }
    }
}

impl Polygon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a vertex. Points beyond capacity are dropped.
    #[inline]
    pub fn push(&mut self, point: Vec3) {
        if self.len < MAX_POLYGON_POINTS {
            self.points[self.len] = point;
            self.len += 1;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn points(&self) -> &[Vec3] {
        &self.points[..self.len]
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn centroid(&self) -> Vec3 {
        if self.len == 0 {
            return Vec3::ZERO;
        }
        self.points().iter().copied().sum::<Vec3>() / self.len as f32
    }
}

/// World-space support data for one convex shape at one transform.
///
/// Produced by [`Shape::shape_info`](crate::Shape::shape_info); consumed by
/// GJK, EPA and manifold construction.
#[derive(Debug, Clone, Copy)]
pub struct ConvexInfo {
    pub shape_type: ShapeType,
    /// World-space center of the shape.
    pub center: Vec3,
    /// Columns are the shape's local X/Y/Z axes in world space. Capsules and
    /// cylinders run along the Y column.
    pub axes: Mat3,
    /// Box half-size.
    pub half_extents: Vec3,
    pub radius: f32,
    /// Half the length of a capsule's core segment or a cylinder's height.
    pub half_height: f32,
}

impl ConvexInfo {
    #[inline]
    pub fn axis(&self) -> Vec3 {
        self.axes.y_axis
    }

    /// Farthest point of the shape along `dir`.
    pub fn support(&self, dir: Vec3) -> Vec3 {
        let support: SupportFn = match self.shape_type {
            ShapeType::Sphere => sphere_support,
            ShapeType::Box => box_support,
            ShapeType::Capsule => capsule_support,
            ShapeType::Cylinder => cylinder_support,
        };
        support(self, dir)
    }

    /// The face, edge or vertex of the shape that best faces `dir` (unit).
    ///
    /// Boxes always return a quad; cylinders return a sampled cap, a side
    /// segment, or a rim point; capsules a side segment or a single point;
    /// spheres a single point. Faces are wound consistently around their
    /// centroid.
    pub fn feature(&self, dir: Vec3) -> Polygon {
        let mut polygon = Polygon::new();
        match self.shape_type {
            ShapeType::Sphere => polygon.push(self.support(dir)),
            ShapeType::Box => {
                let axes = [self.axes.x_axis, self.axes.y_axis, self.axes.z_axis];
                let h = self.half_extents.to_array();
                let mut best = 0;
                let mut best_dot = f32::MIN;
                for (i, axis) in axes.iter().enumerate() {
                    let d = axis.dot(dir).abs();
                    if d > best_dot {
                        best_dot = d;
                        best = i;
                    }
                }
                let sign = if axes[best].dot(dir) >= 0.0 { 1.0 } else { -1.0 };
                let face_center = self.center + axes[best] * (h[best] * sign);
                let u = axes[(best + 1) % 3] * h[(best + 1) % 3];
                let v = axes[(best + 2) % 3] * h[(best + 2) % 3];
                polygon.push(face_center + u + v);
                polygon.push(face_center - u + v);
                polygon.push(face_center - u - v);
                polygon.push(face_center + u - v);
            }
            ShapeType::Capsule => {
                let axis = self.axis();
                let along = axis.dot(dir);
                if along.abs() < SIDE_FACE_COS {
                    let radial = (dir - axis * along).normalize_or_zero() * self.radius;
                    polygon.push(self.center + axis * self.half_height + radial);
                    polygon.push(self.center - axis * self.half_height + radial);
                } else {
                    polygon.push(self.support(dir));
                }
            }
            ShapeType::Cylinder => {
                let axis = self.axis();
                let along = axis.dot(dir);
                if along.abs() > CAP_FACE_COS {
                    let cap = self.center + axis * (self.half_height * along.signum());
                    for p in self.cap_points(cap) {
                        polygon.push(p);
                    }
                } else if along.abs() < SIDE_FACE_COS {
                    let radial = (dir - axis * along).normalize_or_zero() * self.radius;
                    polygon.push(self.center + axis * self.half_height + radial);
                    polygon.push(self.center - axis * self.half_height + radial);
                } else {
                    polygon.push(self.support(dir));
                }
            }
        }
        polygon
    }

    /// Rim samples of a cylinder cap centered at `cap`.
    pub fn cap_points(&self, cap: Vec3) -> [Vec3; CAP_SAMPLES] {
        let (u, v) = tangent_basis(self.axis());
        std::array::from_fn(|i| {
            let angle = std::f32::consts::TAU * i as f32 / CAP_SAMPLES as f32;
            cap + (u * angle.cos() + v * angle.sin()) * self.radius
        })
    }
}

/// Support mapping: farthest point of a shape along a direction.
pub type SupportFn = fn(&ConvexInfo, Vec3) -> Vec3;

pub fn sphere_support(info: &ConvexInfo, dir: Vec3) -> Vec3 {
    info.center + dir.normalize_or_zero() * info.radius
}

/// Extreme vertex: per local axis, the half extent signed by the direction.
pub fn box_support(info: &ConvexInfo, dir: Vec3) -> Vec3 {
    let mut p = info.center;
    let h = info.half_extents;
    for (axis, extent) in [
        (info.axes.x_axis, h.x),
        (info.axes.y_axis, h.y),
        (info.axes.z_axis, h.z),
    ] {
        p += if axis.dot(dir) >= 0.0 {
            axis * extent
        } else {
            -axis * extent
        };
    }
    p
}

/// Nearest cap center along the axis, pushed out by the radius.
pub fn capsule_support(info: &ConvexInfo, dir: Vec3) -> Vec3 {
    let axis = info.axis();
    let cap = if axis.dot(dir) >= 0.0 {
        info.center + axis * info.half_height
    } else {
        info.center - axis * info.half_height
    };
    cap + dir.normalize_or_zero() * info.radius
}

/// Point on the rim of the cap facing `dir`.
pub fn cylinder_support(info: &ConvexInfo, dir: Vec3) -> Vec3 {
    let axis = info.axis();
    let along = axis.dot(dir);
    let cap = if along >= 0.0 {
        info.center + axis * info.half_height
    } else {
        info.center - axis * info.half_height
    };
    let radial = dir - axis * along;
    let len = radial.length();
    if len > 1e-6 {
        cap + radial * (info.radius / len)
    } else {
        cap
    }
}
