//! Rigid bodies and the generational store that owns them.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Quat, Vec3};

use crate::math::{inverse_or_zero, rotate_inertia, Sweep, Transform};
use crate::shape::MassData;

/// Rigid body type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyType {
    /// Never moves; infinite mass.
    Static,
    /// Moved by its velocity only; infinite mass, pushes dynamic bodies.
    Kinematic,
    /// Affected by forces and collisions.
    Dynamic,
}

/// Stable reference to a body in a [`World`](crate::World).
///
/// Handles of destroyed bodies never resolve again, even if the slot is reused.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct BodyHandle {
    index: u32,
    generation: u32,
}

impl BodyHandle {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Construction parameters for a body.
#[derive(Debug, Clone)]
pub struct BodyDef {
    pub body_type: BodyType,
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Fraction of linear velocity removed per step (default: 0.01).
    pub linear_damping: f32,
    /// Fraction of angular velocity removed per step (default: 0.01).
    pub angular_damping: f32,
    /// Gravity scale (default: 1.0).
    pub gravity_scale: f32,
    pub awake: bool,
    pub allow_sleep: bool,
}

impl BodyDef {
    /// A dynamic body at the origin.
    pub fn new_dynamic() -> Self {
        Self {
            body_type: BodyType::Dynamic,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            linear_damping: 0.01,
            angular_damping: 0.01,
            gravity_scale: 1.0,
            awake: true,
            allow_sleep: true,
        }
    }

    /// A static body at the origin.
    pub fn new_static() -> Self {
        Self {
            body_type: BodyType::Static,
            linear_damping: 0.0,
            angular_damping: 0.0,
            gravity_scale: 0.0,
            ..Self::new_dynamic()
        }
    }

    /// A kinematic body at the origin.
    pub fn new_kinematic() -> Self {
        Self {
            body_type: BodyType::Kinematic,
            ..Self::new_static()
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_orientation(mut self, orientation: Quat) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_linear_velocity(mut self, velocity: Vec3) -> Self {
        self.linear_velocity = velocity;
        self
    }

    pub fn with_angular_velocity(mut self, velocity: Vec3) -> Self {
        self.angular_velocity = velocity;
        self
    }
}

impl Default for BodyDef {
    fn default() -> Self {
        Self::new_dynamic()
    }
}

/// One entry of a body's contact adjacency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactEdge {
    pub other: BodyHandle,
    /// Index of the contact in the contact manager.
    pub contact: u32,
}

/// A simulated rigid body.
#[derive(Debug, Clone)]
pub struct Rigidbody {
    pub(crate) body_type: BodyType,
    pub(crate) transform: Transform,
    pub(crate) sweep: Sweep,

    pub(crate) linear_velocity: Vec3,
    pub(crate) angular_velocity: Vec3,
    pub(crate) force: Vec3,
    pub(crate) torque: Vec3,

    pub(crate) mass: f32,
    pub(crate) inv_mass: f32,
    /// Inertia about the center of mass in body space.
    pub(crate) local_inertia: Mat3,
    pub(crate) inv_inertia_local: Mat3,
    pub(crate) inv_inertia_world: Mat3,

    pub(crate) linear_damping: f32,
    pub(crate) angular_damping: f32,
    pub(crate) gravity_scale: f32,

    pub(crate) awake: bool,
    pub(crate) allow_sleep: bool,
    pub(crate) sleep_time: f32,

    pub(crate) island_index: usize,
    pub(crate) in_island: bool,

    pub(crate) fixtures: Vec<u32>,
    pub(crate) contacts: Vec<ContactEdge>,
}

impl Rigidbody {
    pub(crate) fn new(def: &BodyDef) -> Self {
        let transform = Transform::new(def.position, def.orientation.normalize());
        let dynamic = def.body_type == BodyType::Dynamic;
        let moving = def.body_type != BodyType::Static;
        let (mass, inv_mass) = if dynamic { (1.0, 1.0) } else { (0.0, 0.0) };

        let mut body = Self {
            body_type: def.body_type,
            transform,
            sweep: Sweep::from_transform(&transform, Vec3::ZERO),
            linear_velocity: if moving { def.linear_velocity } else { Vec3::ZERO },
            angular_velocity: if moving { def.angular_velocity } else { Vec3::ZERO },
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            mass,
            inv_mass,
            local_inertia: Mat3::ZERO,
            inv_inertia_local: Mat3::ZERO,
            inv_inertia_world: Mat3::ZERO,
            linear_damping: def.linear_damping,
            angular_damping: def.angular_damping,
            gravity_scale: def.gravity_scale,
            awake: def.awake && moving,
            allow_sleep: def.allow_sleep,
            sleep_time: 0.0,
            island_index: 0,
            in_island: false,
            fixtures: Vec::new(),
            contacts: Vec::new(),
        };
        body.update_world_inertia();
        body
    }

    #[inline]
    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.body_type == BodyType::Dynamic
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.body_type == BodyType::Static
    }

    /// Transform of the body origin.
    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    #[inline]
    pub fn orientation(&self) -> Quat {
        self.transform.orientation
    }

    /// Center of mass in world space.
    #[inline]
    pub fn world_center(&self) -> Vec3 {
        self.sweep.c
    }

    /// Center of mass in body space.
    #[inline]
    pub fn local_center(&self) -> Vec3 {
        self.sweep.local_center
    }

    #[inline]
    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    #[inline]
    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    pub fn set_linear_velocity(&mut self, velocity: Vec3) {
        if self.is_static() {
            return;
        }
        if velocity.length_squared() > 0.0 {
            self.set_awake(true);
        }
        self.linear_velocity = velocity;
    }

    pub fn set_angular_velocity(&mut self, velocity: Vec3) {
        if self.is_static() {
            return;
        }
        if velocity.length_squared() > 0.0 {
            self.set_awake(true);
        }
        self.angular_velocity = velocity;
    }

    #[inline]
    pub fn mass(&self) -> f32 {
        self.mass
    }

    #[inline]
    pub fn inv_mass(&self) -> f32 {
        self.inv_mass
    }

    /// Inverse inertia tensor in world space.
    #[inline]
    pub fn inv_inertia(&self) -> Mat3 {
        self.inv_inertia_world
    }

    #[inline]
    pub fn force(&self) -> Vec3 {
        self.force
    }

    #[inline]
    pub fn torque(&self) -> Vec3 {
        self.torque
    }

    /// Accumulate a force through the center of mass. Wakes the body.
    pub fn apply_force(&mut self, force: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.set_awake(true);
        self.force += force;
    }

    /// Accumulate a force at a world point. Wakes the body.
    pub fn apply_force_at_point(&mut self, force: Vec3, point: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.set_awake(true);
        self.force += force;
        self.torque += (point - self.sweep.c).cross(force);
    }

    pub fn apply_torque(&mut self, torque: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.set_awake(true);
        self.torque += torque;
    }

    /// Change velocity immediately by `impulse / mass`.
    pub fn apply_linear_impulse(&mut self, impulse: Vec3, point: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.set_awake(true);
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_inertia_world * (point - self.sweep.c).cross(impulse);
    }

    #[inline]
    pub fn is_awake(&self) -> bool {
        self.awake
    }

    /// Wake the body or put it to sleep. Sleeping clears velocities and forces.
    pub fn set_awake(&mut self, awake: bool) {
        if self.is_static() {
            return;
        }
        if awake {
            if !self.awake {
                self.awake = true;
                self.sleep_time = 0.0;
            }
        } else {
            self.awake = false;
            self.sleep_time = 0.0;
            self.linear_velocity = Vec3::ZERO;
            self.angular_velocity = Vec3::ZERO;
            self.force = Vec3::ZERO;
            self.torque = Vec3::ZERO;
        }
    }

    #[inline]
    pub fn is_sleeping_allowed(&self) -> bool {
        self.allow_sleep
    }

    pub fn set_sleeping_allowed(&mut self, allow: bool) {
        self.allow_sleep = allow;
        if !allow {
            self.set_awake(true);
        }
    }

    /// Fixtures attached to this body.
    #[inline]
    pub fn fixtures(&self) -> &[u32] {
        &self.fixtures
    }

    /// Contacts touching or potentially touching this body.
    #[inline]
    pub fn contact_edges(&self) -> &[ContactEdge] {
        &self.contacts
    }

    /// Install aggregated mass properties. Dynamic bodies without mass fall
    /// back to unit mass about the origin.
    pub(crate) fn set_mass_data(&mut self, data: &MassData) {
        self.mass = 0.0;
        self.inv_mass = 0.0;
        self.local_inertia = Mat3::ZERO;
        self.inv_inertia_local = Mat3::ZERO;

        if !self.is_dynamic() {
            self.sweep = Sweep::from_transform(&self.transform, Vec3::ZERO);
            self.update_world_inertia();
            return;
        }

        let local_center = if data.mass > 0.0 {
            self.mass = data.mass;
            self.inv_mass = 1.0 / data.mass;
            self.local_inertia = data.inertia;
            self.inv_inertia_local = inverse_or_zero(data.inertia);
            data.center
        } else {
            self.mass = 1.0;
            self.inv_mass = 1.0;
            Vec3::ZERO
        };

        // Keep the velocity of the new center consistent with the old one.
        let old_center = self.sweep.c;
        self.sweep = Sweep::from_transform(&self.transform, local_center);
        self.linear_velocity += self.angular_velocity.cross(self.sweep.c - old_center);
        self.update_world_inertia();
    }

    pub(crate) fn update_world_inertia(&mut self) {
        self.inv_inertia_world = rotate_inertia(self.sweep.q, self.inv_inertia_local);
    }

    /// Recompute the origin transform from the end of the sweep.
    pub(crate) fn synchronize_transform(&mut self) {
        self.transform = self.sweep.transform();
    }

    /// Teleport the body. Resets its sweep.
    pub(crate) fn set_transform(&mut self, position: Vec3, orientation: Quat) {
        self.transform = Transform::new(position, orientation.normalize());
        self.sweep = Sweep::from_transform(&self.transform, self.sweep.local_center);
        self.update_world_inertia();
    }

    /// Integrate standing forces and gravity into velocity, with damping.
    pub(crate) fn integrate_velocity(&mut self, gravity: Vec3, dt: f32) {
        if !self.is_dynamic() {
            return;
        }
        self.linear_velocity += (gravity * self.gravity_scale + self.force * self.inv_mass) * dt;
        self.angular_velocity += self.inv_inertia_world * self.torque * dt;
        self.linear_velocity *= (1.0 - self.linear_damping).max(0.0);
        self.angular_velocity *= (1.0 - self.angular_damping).max(0.0);
    }

    /// Remove the edge for `contact`.
    pub(crate) fn remove_contact_edge(&mut self, contact: u32) {
        self.contacts.retain(|edge| edge.contact != contact);
    }

    pub(crate) fn clear_forces(&mut self) {
        self.force = Vec3::ZERO;
        self.torque = Vec3::ZERO;
    }
}

#[derive(Debug, Clone)]
struct BodySlot {
    generation: u32,
    body: Option<Rigidbody>,
}

/// Generational arena of bodies.
#[derive(Debug, Clone, Default)]
pub(crate) struct BodySet {
    slots: Vec<BodySlot>,
    free: Vec<u32>,
    len: usize,
}

impl BodySet {
    pub fn insert(&mut self, body: Rigidbody) -> BodyHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.body = Some(body);
            return BodyHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(BodySlot {
            generation: 0,
            body: Some(body),
        });
        BodyHandle {
            index,
            generation: 0,
        }
    }

    pub fn remove(&mut self, handle: BodyHandle) -> Option<Rigidbody> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let body = slot.body.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(body)
    }

    pub fn get(&self, handle: BodyHandle) -> Option<&Rigidbody> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.body.as_ref())
    }

    pub fn get_mut(&mut self, handle: BodyHandle) -> Option<&mut Rigidbody> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.body.as_mut())
    }

    /// Two distinct bodies at once.
    pub fn get2_mut(
        &mut self,
        a: BodyHandle,
        b: BodyHandle,
    ) -> Option<(&mut Rigidbody, &mut Rigidbody)> {
        if a.index == b.index {
            return None;
        }
        let (lo, hi, swapped) = if a.index < b.index {
            (a, b, false)
        } else {
            (b, a, true)
        };
        let (head, tail) = self.slots.split_at_mut(hi.index as usize);
        let first = head
            .get_mut(lo.index as usize)
            .filter(|slot| slot.generation == lo.generation)?
            .body
            .as_mut()?;
        let second = tail
            .first_mut()
            .filter(|slot| slot.generation == hi.generation)?
            .body
            .as_mut()?;
        Some(if swapped {
            (second, first)
        } else {
            (first, second)
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of slots, live or free.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Handle of the live body in slot `index`.
    pub fn handle_at(&self, index: usize) -> Option<BodyHandle> {
        let slot = self.slots.get(index)?;
        slot.body.as_ref().map(|_| BodyHandle {
            index: index as u32,
            generation: slot.generation,
        })
    }

    /// Live bodies in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (BodyHandle, &Rigidbody)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.body.as_ref().map(|body| {
                (
                    BodyHandle {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    body,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (BodyHandle, &mut Rigidbody)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let generation = slot.generation;
            slot.body.as_mut().map(|body| {
                (
                    BodyHandle {
                        index: i as u32,
                        generation,
                    },
                    body,
                )
            })
        })
    }

    pub fn handles(&self) -> Vec<BodyHandle> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_body_has_no_mass() {
        let body = Rigidbody::new(&BodyDef::new_static().with_linear_velocity(Vec3::X));
        assert_eq!(body.inv_mass(), 0.0);
        assert_eq!(body.linear_velocity(), Vec3::ZERO);
        assert!(!body.is_awake());
    }

    #[test]
    fn test_dynamic_unit_mass_fallback() {
        let mut body = Rigidbody::new(&BodyDef::new_dynamic());
        body.set_mass_data(&MassData::ZERO);
        assert_eq!(body.mass(), 1.0);
        assert_eq!(body.inv_mass(), 1.0);
    }

    #[test]
    fn test_mass_data_offsets_center() {
        let mut body = Rigidbody::new(&BodyDef::new_dynamic().with_position(Vec3::new(0.0, 2.0, 0.0)));
        body.set_mass_data(&MassData {
            mass: 2.0,
            center: Vec3::new(1.0, 0.0, 0.0),
            inertia: Mat3::from_diagonal(Vec3::splat(0.5)),
        });
        assert!((body.world_center() - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6);
        assert!((body.inv_mass() - 0.5).abs() < 1e-6);
        assert!(body.inv_inertia().abs_diff_eq(Mat3::from_diagonal(Vec3::splat(2.0)), 1e-5));
    }

    #[test]
    fn test_sleep_clears_motion() {
        let mut body = Rigidbody::new(&BodyDef::new_dynamic().with_linear_velocity(Vec3::X));
        body.apply_force(Vec3::Y);
        body.set_awake(false);
        assert!(!body.is_awake());
        assert_eq!(body.linear_velocity(), Vec3::ZERO);
        assert_eq!(body.force(), Vec3::ZERO);

        body.apply_force(Vec3::Y);
        assert!(body.is_awake());
    }

    #[test]
    fn test_integrate_velocity_applies_gravity_and_damping() {
        let mut body = Rigidbody::new(&BodyDef::new_dynamic());
        body.integrate_velocity(Vec3::new(0.0, -10.0, 0.0), 0.1);
        assert!((body.linear_velocity().y + 0.99).abs() < 1e-5);
    }

    #[test]
    fn test_body_set_generations() {
        let mut set = BodySet::default();
        let a = set.insert(Rigidbody::new(&BodyDef::new_dynamic()));
        let b = set.insert(Rigidbody::new(&BodyDef::new_static()));
        assert_eq!(set.len(), 2);

        assert!(set.remove(a).is_some());
        assert!(set.get(a).is_none());
        let c = set.insert(Rigidbody::new(&BodyDef::new_dynamic()));
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert!(set.get(a).is_none());
        assert!(set.get(c).is_some());

        let (bc, bb) = set.get2_mut(c, b).unwrap();
        assert!(bc.is_dynamic());
        assert!(bb.is_static());
        assert!(set.get2_mut(c, c).is_none());
    }
}
