//! Narrow phase: exact tests between two convex shapes.
//!
//! Every unordered pair of shape types maps to one [`ContactKind`]. A kind
//! selects the support mappings fed to [`gjk`](gjk::gjk) and
//! [`epa`](epa::epa) and the routine that turns the penetration into contact
//! points.

pub mod clip;
pub mod epa;
pub mod gjk;

use crate::collider::{
    box_support, capsule_support, cylinder_support, sphere_support, ConvexInfo, SupportFn,
};
use crate::memory::BlockAllocator;
use crate::shape::ShapeType;

pub use clip::{CollisionPoints, ContactPair, MAX_MANIFOLD_POINTS};
pub use epa::Penetration;
pub use gjk::{MinkowskiPair, Simplex, SupportPoint};

/// The ten supported shape pairs, with the lower type bit on side A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactKind {
    SphereSphere,
    SphereBox,
    SphereCapsule,
    SphereCylinder,
    BoxBox,
    BoxCapsule,
    BoxCylinder,
    CapsuleCapsule,
    CapsuleCylinder,
    CylinderCylinder,
}

/// Pair kinds indexed by `type_a.bits() | type_b.bits()`.
const DISPATCH: [Option<ContactKind>; 16] = {
    let mut table = [None; 16];
    table[1] = Some(ContactKind::SphereSphere);
    table[1 | 2] = Some(ContactKind::SphereBox);
    table[1 | 4] = Some(ContactKind::SphereCapsule);
    table[1 | 8] = Some(ContactKind::SphereCylinder);
    table[2] = Some(ContactKind::BoxBox);
    table[2 | 4] = Some(ContactKind::BoxCapsule);
    table[2 | 8] = Some(ContactKind::BoxCylinder);
    table[4] = Some(ContactKind::CapsuleCapsule);
    table[4 | 8] = Some(ContactKind::CapsuleCylinder);
    table[8] = Some(ContactKind::CylinderCylinder);
    table
};

impl ContactKind {
    /// Kind for an unordered pair of shape types.
    pub fn from_types(a: ShapeType, b: ShapeType) -> Self {
        match DISPATCH[(a.bits() | b.bits()) as usize] {
            Some(kind) => kind,
            None => unreachable!("no contact kind registered for {a:?} and {b:?}"),
        }
    }

    /// Shape types of side A and side B.
    pub fn shape_types(self) -> (ShapeType, ShapeType) {
        use ShapeType::*;
        match self {
            Self::SphereSphere => (Sphere, Sphere),
            Self::SphereBox => (Sphere, Box),
            Self::SphereCapsule => (Sphere, Capsule),
            Self::SphereCylinder => (Sphere, Cylinder),
            Self::BoxBox => (Box, Box),
            Self::BoxCapsule => (Box, Capsule),
            Self::BoxCylinder => (Box, Cylinder),
            Self::CapsuleCapsule => (Capsule, Capsule),
            Self::CapsuleCylinder => (Capsule, Cylinder),
            Self::CylinderCylinder => (Cylinder, Cylinder),
        }
    }

    /// Whether side A is a sphere, which always yields a single contact.
    #[inline]
    pub fn involves_sphere(self) -> bool {
        self.shape_types().0 == ShapeType::Sphere
    }

    pub fn support_fns(self) -> (SupportFn, SupportFn) {
        let (a, b) = self.shape_types();
        (support_fn(a), support_fn(b))
    }

    /// Run GJK, EPA and manifold construction for two shapes in world space.
    ///
    /// `a` and `b` must match [`shape_types`](Self::shape_types). Returns
    /// `None` when the shapes do not overlap or EPA could not converge.
    pub fn evaluate(
        self,
        a: &ConvexInfo,
        b: &ConvexInfo,
        blocks: &mut BlockAllocator,
    ) -> Option<CollisionPoints> {
        debug_assert_eq!((a.shape_type, b.shape_type), self.shape_types());

        let (support_a, support_b) = self.support_fns();
        let pair = MinkowskiPair::new(a, b, support_a, support_b);
        let simplex = gjk::gjk(&pair)?;
        let penetration = epa::epa(&pair, &simplex, blocks)?;
        Some(self.find_collision_points(a, b, &penetration))
    }

    /// Contact points for a known penetration.
    pub fn find_collision_points(
        self,
        a: &ConvexInfo,
        b: &ConvexInfo,
        penetration: &Penetration,
    ) -> CollisionPoints {
        if self.involves_sphere() {
            let surface = a.center + penetration.normal * a.radius;
            return clip::point_on_a(surface, penetration);
        }
        clip::find_collision_points(a, b, penetration)
    }
}

fn support_fn(shape_type: ShapeType) -> SupportFn {
    match shape_type {
        ShapeType::Sphere => sphere_support,
        ShapeType::Box => box_support,
        ShapeType::Capsule => capsule_support,
        ShapeType::Cylinder => cylinder_support,
    }
}
