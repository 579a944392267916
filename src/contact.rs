//! Persistent contacts between two fixtures.

use glam::Vec3;

use crate::fixture::Fixture;
use crate::math::Transform;
use crate::memory::BlockAllocator;
use crate::narrowphase::{CollisionPoints, ContactKind, MAX_MANIFOLD_POINTS};
use crate::rigid_body::BodyHandle;
use crate::shape::Shape;

/// New points closer than this to an old point inherit its impulses.
const WARM_START_DISTANCE: f32 = 0.02;

/// A contact point of a manifold.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ManifoldPoint {
    /// Deepest point of shape A, in body A's frame.
    pub local_point_a: Vec3,
    /// Deepest point of shape B, in body B's frame.
    pub local_point_b: Vec3,
    /// World-space midpoint at the time of evaluation.
    pub position: Vec3,
    /// Penetration depth, non-negative.
    pub separation: f32,
    pub normal_impulse: f32,
    pub tangent_impulse: [f32; 2],
}

/// Contact points of one fixture pair sharing a normal.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Manifold {
    /// World-space unit normal from A to B.
    pub normal: Vec3,
    /// `normal` in body A's frame.
    pub local_normal: Vec3,
    points: [ManifoldPoint; MAX_MANIFOLD_POINTS],
    point_count: usize,
}

impl Manifold {
    /// Express world-space collision points in both bodies' frames.
    pub fn from_collision(points: &CollisionPoints, xf_a: &Transform, xf_b: &Transform) -> Self {
        let mut manifold = Manifold {
            normal: points.normal,
            local_normal: xf_a.inverse_rotate(points.normal),
            ..Default::default()
        };
        for (slot, pair) in manifold.points.iter_mut().zip(points.points()) {
            *slot = ManifoldPoint {
                local_point_a: xf_a.inverse_transform_point(pair.point_a),
                local_point_b: xf_b.inverse_transform_point(pair.point_b),
                position: (pair.point_a + pair.point_b) * 0.5,
                separation: pair.depth,
                normal_impulse: 0.0,
                tangent_impulse: [0.0; 2],
            };
        }
        manifold.point_count = points.len().min(MAX_MANIFOLD_POINTS);
        manifold
    }

    #[inline]
    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points[..self.point_count]
    }

    #[inline]
    pub(crate) fn points_mut(&mut self) -> &mut [ManifoldPoint] {
        &mut self.points[..self.point_count]
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }
}

/// Combined friction: geometric mean.
#[inline]
pub fn mix_friction(a: f32, b: f32) -> f32 {
    (a * b).sqrt()
}

/// Combined restitution: the bouncier of the two.
#[inline]
pub fn mix_restitution(a: f32, b: f32) -> f32 {
    a.max(b)
}

/// Contact between two fixture children. Created and destroyed by the
/// [`ContactManager`](crate::contact_manager::ContactManager).
#[derive(Debug, Clone)]
pub struct Contact {
    pub(crate) kind: ContactKind,
    pub(crate) fixture_a: u32,
    pub(crate) child_a: u32,
    pub(crate) fixture_b: u32,
    pub(crate) child_b: u32,
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) friction: f32,
    pub(crate) restitution: f32,
    pub(crate) manifold: Manifold,
    pub(crate) touching: bool,
    pub(crate) in_island: bool,
}

impl Contact {
    /// Pair two fixture children. Sides are swapped when needed so that A
    /// has the lower shape type.
    pub(crate) fn new(
        (index_a, fixture_a, child_a): (u32, &Fixture, u32),
        (index_b, fixture_b, child_b): (u32, &Fixture, u32),
    ) -> Self {
        let ((index_a, fixture_a, child_a), (index_b, fixture_b, child_b)) =
            if fixture_a.shape.shape_type() > fixture_b.shape.shape_type() {
                ((index_b, fixture_b, child_b), (index_a, fixture_a, child_a))
            } else {
                ((index_a, fixture_a, child_a), (index_b, fixture_b, child_b))
            };

        Self {
            kind: ContactKind::from_types(fixture_a.shape.shape_type(), fixture_b.shape.shape_type()),
            fixture_a: index_a,
            child_a,
            fixture_b: index_b,
            child_b,
            body_a: fixture_a.body,
            body_b: fixture_b.body,
            friction: mix_friction(fixture_a.friction, fixture_b.friction),
            restitution: mix_restitution(fixture_a.restitution, fixture_b.restitution),
            manifold: Manifold::default(),
            touching: false,
            in_island: false,
        }
    }

    #[inline]
    pub fn kind(&self) -> ContactKind {
        self.kind
    }

    #[inline]
    pub fn fixture_a(&self) -> u32 {
        self.fixture_a
    }

    #[inline]
    pub fn fixture_b(&self) -> u32 {
        self.fixture_b
    }

    #[inline]
    pub fn child_a(&self) -> u32 {
        self.child_a
    }

    #[inline]
    pub fn child_b(&self) -> u32 {
        self.child_b
    }

    #[inline]
    pub fn body_a(&self) -> BodyHandle {
        self.body_a
    }

    #[inline]
    pub fn body_b(&self) -> BodyHandle {
        self.body_b
    }

    #[inline]
    pub fn friction(&self) -> f32 {
        self.friction
    }

    #[inline]
    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    #[inline]
    pub fn manifold(&self) -> &Manifold {
        &self.manifold
    }

    #[inline]
    pub fn is_touching(&self) -> bool {
        self.touching
    }

    /// Whether this contact links the given fixture children, in either order.
    pub fn links(&self, fixture_a: u32, child_a: u32, fixture_b: u32, child_b: u32) -> bool {
        (self.fixture_a == fixture_a
            && self.child_a == child_a
            && self.fixture_b == fixture_b
            && self.child_b == child_b)
            || (self.fixture_a == fixture_b
                && self.child_a == child_b
                && self.fixture_b == fixture_a
                && self.child_b == child_a)
    }

    /// Re-evaluate the manifold at the bodies' current transforms.
    ///
    /// Impulses of old points are carried over to new points that lie close
    /// to them. Returns the previous touching state.
    pub(crate) fn update(
        &mut self,
        shape_a: &Shape,
        xf_a: &Transform,
        shape_b: &Shape,
        xf_b: &Transform,
        blocks: &mut BlockAllocator,
    ) -> bool {
        let was_touching = self.touching;
        let old = self.manifold;

        let info_a = shape_a.shape_info(xf_a);
        let info_b = shape_b.shape_info(xf_b);
        self.manifold = match self.kind.evaluate(&info_a, &info_b, blocks) {
            Some(points) => Manifold::from_collision(&points, xf_a, xf_b),
            None => Manifold::default(),
        };
        self.touching = !self.manifold.is_empty();

        let threshold = WARM_START_DISTANCE * WARM_START_DISTANCE;
        for point in self.manifold.points_mut() {
            let matched = old.points().iter().find(|o| {
                o.local_point_a.distance_squared(point.local_point_a) < threshold
                    && o.local_point_b.distance_squared(point.local_point_b) < threshold
            });
            if let Some(o) = matched {
                point.normal_impulse = o.normal_impulse;
                point.tangent_impulse = o.tangent_impulse;
            }
        }

        was_touching
    }
}
