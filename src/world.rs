//! The physics world: owns bodies, fixtures, contacts and scratch memory.
//!
//! # Pipeline
//!
//! Each call to [`World::run_physics`] performs:
//!
//! 1. Pair discovery for freshly created fixtures
//! 2. Narrow phase over every live contact
//! 3. Island construction and solving (velocities, positions, sleep)
//! 4. Broad-phase proxy synchronization
//! 5. Pair discovery for moved proxies
//! 6. Clearing force accumulators

use glam::{Mat3, Mat4, Quat, Vec3};

use crate::collider::Aabb;
use crate::contact::Contact;
use crate::contact_manager::ContactManager;
use crate::error::{PhysicsError, Result};
use crate::fixture::{Fixture, FixtureDef, FixtureProxy, FixtureSet, ProxyRef};
use crate::island::{solve_islands, IslandStats};
use crate::math::Transform;
use crate::memory::PhysicsContext;
use crate::rigid_body::{BodyDef, BodyHandle, BodySet, Rigidbody};
use crate::settings::{PhysicsSettings, TimeStep};
use crate::shape::MassData;

/// The main physics world managing simulation state.
pub struct World {
    settings: PhysicsSettings,
    bodies: BodySet,
    fixtures: FixtureSet,
    contact_manager: ContactManager,
    context: PhysicsContext,
    accumulator: f64,
    /// Inverse of the previous positive time step.
    inv_dt0: f32,
    new_fixture: bool,
    last_stats: IslandStats,
}

impl Default for World {
    fn default() -> Self {
        Self::new(PhysicsSettings::default())
    }
}

impl World {
    /// Create a new physics world with the given settings.
    pub fn new(settings: PhysicsSettings) -> Self {
        tracing::debug!(?settings, "creating physics world");
        Self {
            contact_manager: ContactManager::with_margin(
                settings.aabb_margin,
                settings.aabb_multiplier,
            ),
            settings,
            bodies: BodySet::default(),
            fixtures: FixtureSet::default(),
            context: PhysicsContext::new(),
            accumulator: 0.0,
            inv_dt0: 0.0,
            new_fixture: false,
            last_stats: IslandStats::default(),
        }
    }

    #[inline]
    pub fn settings(&self) -> &PhysicsSettings {
        &self.settings
    }

    /// Scratch memory, for allocator statistics.
    #[inline]
    pub fn context(&self) -> &PhysicsContext {
        &self.context
    }

    /// Island statistics of the last solved step.
    #[inline]
    pub fn last_step_stats(&self) -> IslandStats {
        self.last_stats
    }

    #[inline]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    #[inline]
    pub fn fixture_count(&self) -> usize {
        self.fixtures.len()
    }

    #[inline]
    pub fn contact_count(&self) -> usize {
        self.contact_manager.contact_count()
    }

    #[inline]
    pub fn contact_manager(&self) -> &ContactManager {
        &self.contact_manager
    }

    /// Live contacts in evaluation order.
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contact_manager.iter().map(|(_, contact)| contact)
    }

    /// Create a body without fixtures. Dynamic bodies get unit mass until a
    /// fixture with density is attached.
    pub fn create_body(&mut self, def: &BodyDef) -> BodyHandle {
        let handle = self.bodies.insert(Rigidbody::new(def));
        tracing::trace!(?handle, body_type = ?def.body_type, "body created");
        handle
    }

    /// Attach a shape to a body and recompute the body's mass.
    pub fn create_fixture(&mut self, handle: BodyHandle, def: &FixtureDef) -> Result<u32> {
        def.shape.validate()?;
        let transform = *self.body(handle)?.transform();

        let index = self.fixtures.insert(Fixture::new(handle, def));
        if let Some(fixture) = self.fixtures.get_mut(index) {
            let aabb = fixture.shape.compute_aabb(&transform);
            for child in 0..fixture.shape.child_count() as u32 {
                let proxy_id = self
                    .contact_manager
                    .broad_phase
                    .create_proxy(&aabb, ProxyRef { fixture: index, child });
                fixture.proxies.push(FixtureProxy {
                    aabb,
                    proxy_id,
                    child,
                });
            }
        }

        if let Some(body) = self.bodies.get_mut(handle) {
            body.fixtures.push(index);
        }
        self.reset_mass_data(handle)?;
        self.new_fixture = true;
        Ok(index)
    }

    #[inline]
    pub fn fixture(&self, index: u32) -> Option<&Fixture> {
        self.fixtures.get(index)
    }

    /// Destroy a body with its fixtures, proxies and contacts.
    pub fn destroy_body(&mut self, handle: BodyHandle) -> Result<()> {
        let body = self.body(handle)?;
        let edges: Vec<u32> = body.contacts.iter().map(|edge| edge.contact).collect();
        let fixtures = body.fixtures.clone();

        for id in edges {
            self.contact_manager.destroy(id, &mut self.bodies);
        }
        for index in fixtures {
            if let Some(fixture) = self.fixtures.remove(index) {
                for proxy in &fixture.proxies {
                    self.contact_manager.broad_phase.destroy_proxy(proxy.proxy_id);
                }
            }
        }
        self.bodies.remove(handle);
        tracing::trace!(?handle, "body destroyed");
        Ok(())
    }

    pub fn body(&self, handle: BodyHandle) -> Result<&Rigidbody> {
        self.bodies.get(handle).ok_or(PhysicsError::InvalidBody(handle))
    }

    pub fn body_mut(&mut self, handle: BodyHandle) -> Result<&mut Rigidbody> {
        self.bodies.get_mut(handle).ok_or(PhysicsError::InvalidBody(handle))
    }

    /// Live bodies in slot order.
    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &Rigidbody)> {
        self.bodies.iter()
    }

    pub fn body_transform(&self, handle: BodyHandle) -> Result<Transform> {
        Ok(*self.body(handle)?.transform())
    }

    /// Body origin transform as a column-major matrix.
    pub fn body_matrix(&self, handle: BodyHandle) -> Result<Mat4> {
        Ok(self.body(handle)?.transform().to_matrix())
    }

    pub fn set_awake(&mut self, handle: BodyHandle, awake: bool) -> Result<()> {
        self.body_mut(handle)?.set_awake(awake);
        Ok(())
    }

    /// Accumulate an external force through the body's center of mass for the
    /// next step. Wakes the body.
    pub fn register_body_force(&mut self, handle: BodyHandle, force: Vec3) -> Result<()> {
        self.body_mut(handle)?.apply_force(force);
        Ok(())
    }

    /// Teleport a body. Its proxies follow immediately.
    pub fn set_body_transform(
        &mut self,
        handle: BodyHandle,
        position: Vec3,
        orientation: Quat,
    ) -> Result<()> {
        let body = self.bodies.get_mut(handle).ok_or(PhysicsError::InvalidBody(handle))?;
        body.set_transform(position, orientation);
        let transform = body.transform;
        let fixtures = body.fixtures.clone();

        for index in fixtures {
            let Some(fixture) = self.fixtures.get_mut(index) else {
                continue;
            };
            let aabb = fixture.shape.compute_aabb(&transform);
            for proxy in fixture.proxies.iter_mut() {
                proxy.aabb = aabb;
                self.contact_manager
                    .broad_phase
                    .move_proxy(proxy.proxy_id, &aabb, Vec3::ZERO);
            }
        }
        Ok(())
    }

    /// Report every fixture whose fat AABB overlaps `aabb`. The callback
    /// returns false to stop the query.
    pub fn query_aabb<F: FnMut(u32) -> bool>(&self, aabb: &Aabb, mut callback: F) {
        let broad_phase = self.contact_manager.broad_phase();
        broad_phase.query(aabb, |proxy_id| match broad_phase.user_data(proxy_id) {
            Some(proxy) => callback(proxy.fixture),
            None => true,
        });
    }

    /// Clear force accumulators and refresh transforms derived from the sweep.
    pub fn start_frame(&mut self) {
        for (_, body) in self.bodies.iter_mut() {
            body.clear_forces();
            body.synchronize_transform();
            body.update_world_inertia();
        }
    }

    /// Advance the simulation by exactly `dt` seconds.
    pub fn run_physics(&mut self, dt: f32) -> Result<()> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(PhysicsError::InvalidTimeStep(dt));
        }

        if self.new_fixture {
            self.contact_manager
                .find_new_contacts(&self.fixtures, &mut self.bodies);
            self.new_fixture = false;
        }

        self.contact_manager
            .collide(&self.fixtures, &mut self.bodies, &mut self.context.blocks);

        let step = TimeStep {
            dt,
            inv_dt: if dt > 0.0 { 1.0 / dt } else { 0.0 },
            dt_ratio: self.inv_dt0 * dt,
            velocity_iterations: self.settings.velocity_iterations,
            position_iterations: self.settings.position_iterations,
            warm_starting: self.settings.warm_starting,
        };

        if dt > 0.0 {
            self.last_stats = solve_islands(
                &mut self.bodies,
                &mut self.contact_manager,
                &mut self.context.stack,
                &self.settings,
                &step,
            )?;
            self.inv_dt0 = step.inv_dt;
            self.synchronize_fixtures();
            self.contact_manager
                .find_new_contacts(&self.fixtures, &mut self.bodies);
        }

        for (_, body) in self.bodies.iter_mut() {
            body.clear_forces();
        }

        tracing::trace!(
            bodies = self.bodies.len(),
            contacts = self.contact_manager.contact_count(),
            islands = self.last_stats.islands,
            "physics step"
        );
        Ok(())
    }

    /// Step the physics simulation forward by `delta_time` seconds.
    ///
    /// Uses a fixed timestep accumulator to ensure deterministic simulation.
    /// Returns the number of sub-steps taken.
    pub fn step(&mut self, delta_time: f64) -> Result<u32> {
        let fixed = self.settings.fixed_timestep;
        self.accumulator += delta_time;
        let mut substeps = 0u32;
        while self.accumulator >= fixed && substeps < self.settings.max_substeps {
            self.run_physics(fixed as f32)?;
            self.accumulator -= fixed;
            substeps += 1;
        }
        // Clamp accumulator to avoid spiral of death
        if self.accumulator > fixed * self.settings.max_substeps as f64 {
            self.accumulator = 0.0;
        }
        Ok(substeps)
    }

    /// Aggregate fixture mass properties into the body.
    fn reset_mass_data(&mut self, handle: BodyHandle) -> Result<()> {
        let body = self.body(handle)?;
        let parts: Vec<MassData> = body
            .fixtures
            .iter()
            .filter_map(|&index| self.fixtures.get(index))
            .filter(|fixture| fixture.density > 0.0)
            .map(Fixture::mass_data)
            .collect();

        let mass: f32 = parts.iter().map(|p| p.mass).sum();
        let data = if mass > 0.0 {
            let center = parts.iter().map(|p| p.center * p.mass).sum::<Vec3>() / mass;
            // Parallel axis theorem about the combined center.
            let inertia = parts.iter().fold(Mat3::ZERO, |acc, p| {
                let d = p.center - center;
                let shift = Mat3::from_diagonal(Vec3::splat(d.length_squared()))
                    - Mat3::from_cols(d * d.x, d * d.y, d * d.z);
                acc + p.inertia + shift * p.mass
            });
            MassData {
                mass,
                center,
                inertia,
            }
        } else {
            MassData::ZERO
        };

        self.body_mut(handle)?.set_mass_data(&data);
        Ok(())
    }

    /// Move the proxies of every awake body to cover its swept motion.
    fn synchronize_fixtures(&mut self) {
        let Self {
            bodies,
            fixtures,
            contact_manager,
            ..
        } = self;

        for (_, body) in bodies.iter() {
            // Bodies put to sleep during this solve still moved this step.
            if !body.in_island || body.is_static() {
                continue;
            }
            let xf0 = body.sweep.transform0();
            let xf1 = body.transform;
            let displacement = xf1.position - xf0.position;

            for &index in &body.fixtures {
                let Some(fixture) = fixtures.get_mut(index) else {
                    continue;
                };
                let aabb = fixture.swept_aabb(&xf0, &xf1);
                for proxy in fixture.proxies.iter_mut() {
                    proxy.aabb = aabb;
                    contact_manager
                        .broad_phase
                        .move_proxy(proxy.proxy_id, &aabb, displacement);
                }
            }
        }
    }
}
