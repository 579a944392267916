//! Fixtures bind a shape and material to a body.

use crate::collider::Aabb;
use crate::math::Transform;
use crate::rigid_body::BodyHandle;
use crate::shape::{MassData, Shape};

/// What the broad phase stores per proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProxyRef {
    pub fixture: u32,
    pub child: u32,
}

/// Construction parameters for a fixture.
#[derive(Debug, Clone)]
pub struct FixtureDef {
    pub shape: Shape,
    /// Friction coefficient (default: 0.5).
    pub friction: f32,
    /// Coefficient of restitution (default: 0.3).
    pub restitution: f32,
    /// Mass per unit volume (default: 1.0).
    pub density: f32,
}

impl FixtureDef {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            friction: 0.5,
            restitution: 0.3,
            density: 1.0,
        }
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }
}

/// Broad-phase registration of one convex child of a fixture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixtureProxy {
    /// Tight AABB at the last synchronization.
    pub aabb: Aabb,
    pub proxy_id: u32,
    pub child: u32,
}

/// A shape attached to a body.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub(crate) body: BodyHandle,
    pub(crate) shape: Shape,
    pub(crate) friction: f32,
    pub(crate) restitution: f32,
    pub(crate) density: f32,
    pub(crate) proxies: Vec<FixtureProxy>,
}

impl Fixture {
    pub(crate) fn new(body: BodyHandle, def: &FixtureDef) -> Self {
        Self {
            body,
            shape: def.shape,
            friction: def.friction,
            restitution: def.restitution,
            density: def.density,
            proxies: Vec::with_capacity(def.shape.child_count()),
        }
    }

    #[inline]
    pub fn body(&self) -> BodyHandle {
        self.body
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
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
    pub fn density(&self) -> f32 {
        self.density
    }

    #[inline]
    pub fn proxies(&self) -> &[FixtureProxy] {
        &self.proxies
    }

    pub fn mass_data(&self) -> MassData {
        self.shape.mass_data(self.density)
    }

    /// Tight AABB of the swept shape between two transforms. Every child of
    /// a convex shape shares it.
    pub(crate) fn swept_aabb(&self, xf0: &Transform, xf1: &Transform) -> Aabb {
        self.shape
            .compute_aabb(xf0)
            .combine(&self.shape.compute_aabb(xf1))
    }
}

/// Slot storage for fixtures, addressed by index.
#[derive(Debug, Clone, Default)]
pub(crate) struct FixtureSet {
    slots: Vec<Option<Fixture>>,
    free: Vec<u32>,
}

impl FixtureSet {
    pub fn insert(&mut self, fixture: Fixture) -> u32 {
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(fixture);
                index
            }
            None => {
                self.slots.push(Some(fixture));
                (self.slots.len() - 1) as u32
            }
        }
    }

    pub fn remove(&mut self, index: u32) -> Option<Fixture> {
        let fixture = self.slots.get_mut(index as usize)?.take()?;
        self.free.push(index);
        Some(fixture)
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<&Fixture> {
        self.slots.get(index as usize)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, index: u32) -> Option<&mut Fixture> {
        self.slots.get_mut(index as usize)?.as_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_fixture_def_defaults() {
        let def = FixtureDef::new(Shape::sphere(1.0));
        assert_eq!(def.friction, 0.5);
        assert_eq!(def.restitution, 0.3);
        assert_eq!(def.density, 1.0);
    }

    #[test]
    fn test_fixture_set_reuses_slots() {
        let mut set = FixtureSet::default();
        let body = crate::rigid_body::BodySet::default()
            .insert(crate::rigid_body::Rigidbody::new(&crate::BodyDef::new_dynamic()));
        let def = FixtureDef::new(Shape::cuboid(Vec3::ONE));
        let a = set.insert(Fixture::new(body, &def));
        let b = set.insert(Fixture::new(body, &def));
        assert_eq!(set.len(), 2);

        assert!(set.remove(a).is_some());
        assert!(set.get(a).is_none());
        assert!(set.remove(a).is_none());
        let c = set.insert(Fixture::new(body, &def));
        assert_eq!(c, a);
        assert!(set.get(b).is_some());
    }

    #[test]
    fn test_swept_aabb_covers_both_transforms() {
        let body = crate::rigid_body::BodySet::default()
            .insert(crate::rigid_body::Rigidbody::new(&crate::BodyDef::new_dynamic()));
        let fixture = Fixture::new(body, &FixtureDef::new(Shape::sphere(0.5)));
        let aabb = fixture.swept_aabb(
            &Transform::IDENTITY,
            &Transform::from_position(Vec3::new(2.0, 0.0, 0.0)),
        );
        assert!((aabb.min - Vec3::splat(-0.5)).length() < 1e-6);
        assert!((aabb.max - Vec3::new(2.5, 0.5, 0.5)).length() < 1e-6);
    }
}
