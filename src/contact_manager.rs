//! Contact bookkeeping: pair discovery, narrow phase and destruction.

use crate::broadphase::{BroadPhase, DynamicTree};
use crate::contact::Contact;
use crate::fixture::{FixtureSet, ProxyRef};
use crate::memory::BlockAllocator;
use crate::rigid_body::{BodySet, ContactEdge, Rigidbody};

/// Owns the broad phase and every live contact.
///
/// Contacts live in index-addressed slots; [`collide`](Self::collide) visits
/// them in slot order, so evaluation order only depends on the sequence of
/// creations and destructions.
#[derive(Debug, Clone)]
pub struct ContactManager {
    pub(crate) broad_phase: BroadPhase<ProxyRef>,
    contacts: Vec<Option<Contact>>,
    free: Vec<u32>,
    pair_buffer: Vec<(ProxyRef, ProxyRef)>,
}

impl Default for ContactManager {
    fn default() -> Self {
        Self::new(BroadPhase::new())
    }
}

/// Only pairs with at least one dynamic body generate contacts.
fn should_collide(a: &Rigidbody, b: &Rigidbody) -> bool {
    a.is_dynamic() || b.is_dynamic()
}

impl ContactManager {
    pub fn new(broad_phase: BroadPhase<ProxyRef>) -> Self {
        Self {
            broad_phase,
            contacts: Vec::new(),
            free: Vec::new(),
            pair_buffer: Vec::new(),
        }
    }

    /// Manager whose tree uses the given AABB margin and displacement multiplier.
    pub fn with_margin(margin: f32, multiplier: f32) -> Self {
        Self::new(BroadPhase::with_tree(DynamicTree::with_margin(margin, multiplier)))
    }

    #[inline]
    pub fn broad_phase(&self) -> &BroadPhase<ProxyRef> {
        &self.broad_phase
    }

    /// Number of live contacts.
    pub fn contact_count(&self) -> usize {
        self.contacts.len() - self.free.len()
    }

    pub fn touching_count(&self) -> usize {
        self.iter().filter(|(_, c)| c.is_touching()).count()
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&Contact> {
        self.contacts.get(id as usize)?.as_ref()
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut Contact> {
        self.contacts.get_mut(id as usize)?.as_mut()
    }

    /// Live contacts in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Contact)> {
        self.contacts
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (i as u32, c)))
    }

    /// Turn new broad-phase pairs into contacts.
    pub(crate) fn find_new_contacts(&mut self, fixtures: &FixtureSet, bodies: &mut BodySet) {
        let mut pairs = std::mem::take(&mut self.pair_buffer);
        pairs.clear();
        self.broad_phase.update_pairs(|a, b| pairs.push((a, b)));
        for &(a, b) in &pairs {
            self.add_pair(a, b, fixtures, bodies);
        }
        self.pair_buffer = pairs;
    }

    /// Create a contact for two proxies unless one already links them.
    ///
    /// Pairs on the same body, or between two bodies that cannot both be
    /// moved by the solver, are skipped.
    pub(crate) fn add_pair(
        &mut self,
        proxy_a: ProxyRef,
        proxy_b: ProxyRef,
        fixtures: &FixtureSet,
        bodies: &mut BodySet,
    ) -> Option<u32> {
        if proxy_a.fixture == proxy_b.fixture {
            return None;
        }
        let fixture_a = fixtures.get(proxy_a.fixture)?;
        let fixture_b = fixtures.get(proxy_b.fixture)?;
        if fixture_a.body == fixture_b.body {
            return None;
        }

        {
            let body_a = bodies.get(fixture_a.body)?;
            let body_b = bodies.get(fixture_b.body)?;
            if !should_collide(body_a, body_b) {
                return None;
            }

            let exists = body_b
                .contact_edges()
                .iter()
                .filter(|edge| edge.other == fixture_a.body)
                .filter_map(|edge| self.get(edge.contact))
                .any(|c| c.links(proxy_a.fixture, proxy_a.child, proxy_b.fixture, proxy_b.child));
            if exists {
                return None;
            }
        }

        let contact = Contact::new(
            (proxy_a.fixture, fixture_a, proxy_a.child),
            (proxy_b.fixture, fixture_b, proxy_b.child),
        );
        let (body_a, body_b) = (contact.body_a, contact.body_b);
        let kind = contact.kind;

        let id = match self.free.pop() {
            Some(id) => {
                self.contacts[id as usize] = Some(contact);
                id
            }
            None => {
                self.contacts.push(Some(contact));
                (self.contacts.len() - 1) as u32
            }
        };

        if let Some(body) = bodies.get_mut(body_a) {
            body.contacts.push(ContactEdge {
                other: body_b,
                contact: id,
            });
        }
        if let Some(body) = bodies.get_mut(body_b) {
            body.contacts.push(ContactEdge {
                other: body_a,
                contact: id,
            });
        }

        tracing::trace!(id, ?kind, "contact created");
        Some(id)
    }

    /// Update every contact whose bodies are not both asleep or static.
    ///
    /// Contacts whose fat AABBs stopped overlapping are destroyed. Bodies are
    /// woken when their contact starts or stops touching.
    pub(crate) fn collide(
        &mut self,
        fixtures: &FixtureSet,
        bodies: &mut BodySet,
        blocks: &mut BlockAllocator,
    ) {
        for id in 0..self.contacts.len() as u32 {
            let Some(contact) = self.get(id) else {
                continue;
            };
            let (handle_a, handle_b) = (contact.body_a, contact.body_b);
            let (child_a, child_b) = (contact.child_a as usize, contact.child_b as usize);

            let (Some(body_a), Some(body_b)) = (bodies.get(handle_a), bodies.get(handle_b)) else {
                self.destroy(id, bodies);
                continue;
            };
            let active_a = body_a.is_awake() && !body_a.is_static();
            let active_b = body_b.is_awake() && !body_b.is_static();
            if !active_a && !active_b {
                continue;
            }
            let (xf_a, xf_b) = (body_a.transform, body_b.transform);

            let (Some(fixture_a), Some(fixture_b)) =
                (fixtures.get(contact.fixture_a), fixtures.get(contact.fixture_b))
            else {
                self.destroy(id, bodies);
                continue;
            };

            let overlap = match (fixture_a.proxies.get(child_a), fixture_b.proxies.get(child_b)) {
                (Some(pa), Some(pb)) => self.broad_phase.test_overlap(pa.proxy_id, pb.proxy_id),
                _ => false,
            };
            if !overlap {
                self.destroy(id, bodies);
                continue;
            }

            let Some(contact) = self.get_mut(id) else {
                continue;
            };
            let was_touching =
                contact.update(&fixture_a.shape, &xf_a, &fixture_b.shape, &xf_b, blocks);
            if was_touching != contact.touching {
                if let Some((a, b)) = bodies.get2_mut(handle_a, handle_b) {
                    a.set_awake(true);
                    b.set_awake(true);
                }
            }
        }
    }

    /// Remove a contact and unlink it from both bodies. Touching contacts
    /// wake their bodies.
    pub(crate) fn destroy(&mut self, id: u32, bodies: &mut BodySet) {
        let Some(contact) = self.contacts.get_mut(id as usize).and_then(Option::take) else {
            return;
        };
        self.free.push(id);

        for handle in [contact.body_a, contact.body_b] {
            if let Some(body) = bodies.get_mut(handle) {
                body.remove_contact_edge(id);
                if contact.touching {
                    body.set_awake(true);
                }
            }
        }
        tracing::trace!(id, "contact destroyed");
    }

    /// Reset island flags before island construction.
    pub(crate) fn clear_island_flags(&mut self) {
        for contact in self.contacts.iter_mut().flatten() {
            contact.in_island = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{Fixture, FixtureDef, FixtureProxy};
    use crate::math::Transform;
    use crate::rigid_body::{BodyDef, BodyHandle};
    use crate::shape::Shape;
    use glam::Vec3;

    struct Scene {
        manager: ContactManager,
        fixtures: FixtureSet,
        bodies: BodySet,
    }

    impl Scene {
        fn new() -> Self {
            Self {
                manager: ContactManager::default(),
                fixtures: FixtureSet::default(),
                bodies: BodySet::default(),
            }
        }

        fn add(&mut self, def: BodyDef, shape: Shape) -> (BodyHandle, u32) {
            let body = self.bodies.insert(Rigidbody::new(&def));
            let index = self.fixtures.insert(Fixture::new(body, &FixtureDef::new(shape)));
            let xf = *self.bodies.get(body).unwrap().transform();
            let aabb = shape.compute_aabb(&xf);
            let proxy_id = self.manager.broad_phase.create_proxy(
                &aabb,
                ProxyRef {
                    fixture: index,
                    child: 0,
                },
            );
            self.fixtures.get_mut(index).unwrap().proxies.push(FixtureProxy {
                aabb,
                proxy_id,
                child: 0,
            });
            self.bodies.get_mut(body).unwrap().fixtures.push(index);
            (body, index)
        }
    }

    #[test]
    fn test_pairs_become_contacts_once() {
        let mut scene = Scene::new();
        let (ground, _) = scene.add(BodyDef::new_static(), Shape::cuboid(Vec3::new(5.0, 0.5, 5.0)));
        let (ball, _) = scene.add(
            BodyDef::new_dynamic().with_position(Vec3::new(0.0, 0.95, 0.0)),
            Shape::sphere(0.5),
        );

        scene.manager.find_new_contacts(&scene.fixtures, &mut scene.bodies);
        assert_eq!(scene.manager.contact_count(), 1);
        assert_eq!(scene.bodies.get(ground).unwrap().contact_edges().len(), 1);
        assert_eq!(scene.bodies.get(ball).unwrap().contact_edges()[0].other, ground);

        // Re-reporting the same pair does not duplicate the contact.
        let proxy = scene.fixtures.get(1).unwrap().proxies[0].proxy_id;
        scene.manager.broad_phase.touch_proxy(proxy);
        scene.manager.find_new_contacts(&scene.fixtures, &mut scene.bodies);
        assert_eq!(scene.manager.contact_count(), 1);
    }

    #[test]
    fn test_static_pairs_and_same_body_skipped() {
        let mut scene = Scene::new();
        scene.add(BodyDef::new_static(), Shape::cuboid(Vec3::ONE));
        scene.add(BodyDef::new_static(), Shape::sphere(1.0));
        scene.manager.find_new_contacts(&scene.fixtures, &mut scene.bodies);
        assert_eq!(scene.manager.contact_count(), 0);

        let same = ProxyRef {
            fixture: 0,
            child: 0,
        };
        assert!(scene
            .manager
            .add_pair(same, same, &scene.fixtures, &mut scene.bodies)
            .is_none());
    }

    #[test]
    fn test_collide_touches_and_destroys() {
        let mut scene = Scene::new();
        let mut blocks = BlockAllocator::new();
        scene.add(BodyDef::new_static(), Shape::cuboid(Vec3::new(5.0, 0.5, 5.0)));
        let (ball, _) = scene.add(
            BodyDef::new_dynamic().with_position(Vec3::new(0.0, 0.95, 0.0)),
            Shape::sphere(0.5),
        );
        scene.manager.find_new_contacts(&scene.fixtures, &mut scene.bodies);
        scene.manager.collide(&scene.fixtures, &mut scene.bodies, &mut blocks);
        assert_eq!(scene.manager.touching_count(), 1);

        // Teleport the ball far away and move its proxy.
        let far = Transform::from_position(Vec3::new(0.0, 20.0, 0.0));
        scene.bodies.get_mut(ball).unwrap().set_transform(far.position, far.orientation);
        let proxy = scene.fixtures.get(1).unwrap().proxies[0].proxy_id;
        scene
            .manager
            .broad_phase
            .move_proxy(proxy, &Shape::sphere(0.5).compute_aabb(&far), Vec3::ZERO);
        scene.manager.collide(&scene.fixtures, &mut scene.bodies, &mut blocks);
        assert_eq!(scene.manager.contact_count(), 0);
        assert!(scene.bodies.get(ball).unwrap().contact_edges().is_empty());
    }
}
