//! Island construction and per-island solving.
//!
//! Awake bodies are flood-filled over touching contacts. Static bodies join
//! every island they touch but never propagate the search, so two piles on
//! the same ground stay separate islands.

use crate::contact_manager::ContactManager;
use crate::error::Result;
use crate::memory::StackAllocator;
use crate::rigid_body::{BodyHandle, BodySet};
use crate::settings::{PhysicsSettings, TimeStep};
use crate::solver::{
    ContactPositionConstraint, ContactSolver, ContactVelocityConstraint, Position, SolverTuning,
    Velocity,
};

/// Largest distance a body may travel in one step.
const MAX_TRANSLATION: f32 = 2.0;
/// Largest angle a body may turn in one step.
const MAX_ROTATION: f32 = 0.5 * std::f32::consts::PI;

/// Summary of one [`solve_islands`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IslandStats {
    pub islands: usize,
    pub bodies: usize,
    pub contacts: usize,
    /// Islands whose position iterations converged.
    pub converged: usize,
    /// Islands that fell asleep this step.
    pub slept: usize,
}

/// Scratch arrays for one island, carved from the stack allocator.
struct IslandArrays<'a> {
    bodies: &'a mut [BodyHandle],
    contacts: &'a mut [u32],
    positions: &'a mut [Position],
    velocities: &'a mut [Velocity],
    velocity_constraints: &'a mut [ContactVelocityConstraint],
    position_constraints: &'a mut [ContactPositionConstraint],
}

/// Build every island and solve it.
///
/// Stack blocks are allocated as DFS stack, island bodies, island contacts,
/// positions, velocities, velocity constraints, position constraints, and
/// freed in the reverse order.
pub(crate) fn solve_islands(
    bodies: &mut BodySet,
    contacts: &mut ContactManager,
    stack: &mut StackAllocator,
    settings: &PhysicsSettings,
    step: &TimeStep,
) -> Result<IslandStats> {
    let body_capacity = bodies.len();
    let contact_capacity = contacts.contact_count();

    for (_, body) in bodies.iter_mut() {
        body.in_island = false;
    }
    contacts.clear_island_flags();

    let dfs_block = stack.allocate::<BodyHandle>(body_capacity);
    let bodies_block = stack.allocate::<BodyHandle>(body_capacity);
    let contacts_block = stack.allocate::<u32>(contact_capacity);
    let positions_block = stack.allocate::<Position>(body_capacity);
    let velocities_block = stack.allocate::<Velocity>(body_capacity);
    let vc_block = stack.allocate::<ContactVelocityConstraint>(contact_capacity);
    let pc_block = stack.allocate::<ContactPositionConstraint>(contact_capacity);

    let stats = {
        let mut view = stack.view();
        let dfs = view.take::<BodyHandle>(&dfs_block)?;
        let mut arrays = IslandArrays {
            bodies: view.take(&bodies_block)?,
            contacts: view.take(&contacts_block)?,
            positions: view.take(&positions_block)?,
            velocities: view.take(&velocities_block)?,
            velocity_constraints: view.take(&vc_block)?,
            position_constraints: view.take(&pc_block)?,
        };
        flood_fill(bodies, contacts, dfs, &mut arrays, settings, step)
    };

    stack.free(&pc_block)?;
    stack.free(&vc_block)?;
    stack.free(&velocities_block)?;
    stack.free(&positions_block)?;
    stack.free(&contacts_block)?;
    stack.free(&bodies_block)?;
    stack.free(&dfs_block)?;

    Ok(stats)
}

fn flood_fill(
    bodies: &mut BodySet,
    contacts: &mut ContactManager,
    dfs: &mut [BodyHandle],
    arrays: &mut IslandArrays<'_>,
    settings: &PhysicsSettings,
    step: &TimeStep,
) -> IslandStats {
    let mut stats = IslandStats::default();

    for slot in 0..bodies.slot_count() {
        let Some(seed) = bodies.handle_at(slot) else {
            continue;
        };
        match bodies.get(seed) {
            Some(body) if !body.in_island && body.is_awake() && !body.is_static() => {}
            _ => continue,
        }

        let mut body_count = 0;
        let mut contact_count = 0;
        let mut stack_count = 1;
        dfs[0] = seed;
        if let Some(body) = bodies.get_mut(seed) {
            body.in_island = true;
        }

        while stack_count > 0 {
            stack_count -= 1;
            let handle = dfs[stack_count];
            let Some(body) = bodies.get_mut(handle) else {
                continue;
            };
            body.island_index = body_count;
            arrays.bodies[body_count] = handle;
            body_count += 1;

            // Static bodies anchor the island without connecting it to others.
            if body.is_static() {
                continue;
            }
            body.set_awake(true);

            for e in 0..body.contacts.len() {
                let Some(edge) = bodies.get(handle).and_then(|b| b.contacts.get(e).copied()) else {
                    break;
                };
                let Some(contact) = contacts.get_mut(edge.contact) else {
                    continue;
                };
                if contact.in_island || !contact.touching {
                    continue;
                }
                contact.in_island = true;
                arrays.contacts[contact_count] = edge.contact;
                contact_count += 1;

                let Some(other) = bodies.get_mut(edge.other) else {
                    continue;
                };
                if other.in_island {
                    continue;
                }
                other.in_island = true;
                dfs[stack_count] = edge.other;
                stack_count += 1;
            }
        }

        let outcome = solve_island(
            bodies,
            contacts,
            body_count,
            contact_count,
            arrays,
            settings,
            step,
        );

        stats.islands += 1;
        stats.bodies += body_count;
        stats.contacts += contact_count;
        stats.converged += usize::from(outcome.converged);
        stats.slept += usize::from(outcome.slept);

        // Static bodies may join other islands.
        for &handle in arrays.bodies[..body_count].iter() {
            if let Some(body) = bodies.get_mut(handle) {
                if body.is_static() {
                    body.in_island = false;
                }
            }
        }
    }

    stats
}

struct IslandOutcome {
    converged: bool,
    slept: bool,
}

fn solve_island(
    bodies: &mut BodySet,
    contacts: &mut ContactManager,
    body_count: usize,
    contact_count: usize,
    arrays: &mut IslandArrays<'_>,
    settings: &PhysicsSettings,
    step: &TimeStep,
) -> IslandOutcome {
    let dt = step.dt;
    let island_bodies = &arrays.bodies[..body_count];
    let island_contacts = &arrays.contacts[..contact_count];
    let positions = &mut arrays.positions[..body_count];
    let velocities = &mut arrays.velocities[..body_count];

    // Integrate velocities and snapshot state.
    for (i, &handle) in island_bodies.iter().enumerate() {
        let Some(body) = bodies.get_mut(handle) else {
            continue;
        };
        body.sweep.advance();
        body.integrate_velocity(settings.gravity, dt);
        positions[i] = Position::new(body.sweep.c, body.sweep.q);
        velocities[i] = Velocity {
            v: body.linear_velocity,
            w: body.angular_velocity,
        };
    }

    let mut solver = ContactSolver::new(
        *step,
        SolverTuning::from(settings),
        positions,
        velocities,
        &mut arrays.velocity_constraints[..contact_count],
        &mut arrays.position_constraints[..contact_count],
    );

    for (i, &id) in island_contacts.iter().enumerate() {
        let Some(contact) = contacts.get(id) else {
            continue;
        };
        if let (Some(a), Some(b)) = (bodies.get(contact.body_a), bodies.get(contact.body_b)) {
            solver.set_constraint(i, id, contact, a, b);
        }
    }

    solver.initialize_velocity_constraints();
    if step.warm_starting {
        solver.warm_start();
    }
    for _ in 0..step.velocity_iterations {
        solver.solve_velocity_constraints();
    }
    solver.store_impulses(contacts);

    solver.integrate_positions(MAX_TRANSLATION, MAX_ROTATION);

    let mut converged = false;
    for _ in 0..step.position_iterations {
        if solver.solve_position_constraints() {
            converged = true;
            break;
        }
    }

    // Write back. Static bodies are never touched.
    for (i, &handle) in island_bodies.iter().enumerate() {
        let Some(body) = bodies.get_mut(handle) else {
            continue;
        };
        if body.is_static() {
            continue;
        }
        body.sweep.c = arrays.positions[i].c;
        body.sweep.q = arrays.positions[i].rotation();
        body.linear_velocity = arrays.velocities[i].v;
        body.angular_velocity = arrays.velocities[i].w;
        body.synchronize_transform();
        body.update_world_inertia();
    }

    let slept = settings.allow_sleep && update_sleep(bodies, island_bodies, settings, dt);
    IslandOutcome { converged, slept }
}

/// Advance sleep timers and put the whole island to sleep once every body has
/// stayed below both thresholds for `time_to_sleep` (a single step when it
/// is zero).
fn update_sleep(
    bodies: &mut BodySet,
    island_bodies: &[BodyHandle],
    settings: &PhysicsSettings,
    dt: f32,
) -> bool {
    let linear_tol_sq = settings.linear_sleep_threshold * settings.linear_sleep_threshold;
    let angular_tol_sq = settings.angular_sleep_threshold * settings.angular_sleep_threshold;
    let mut all_slow = true;
    let mut min_sleep_time = f32::MAX;

    for &handle in island_bodies {
        let Some(body) = bodies.get_mut(handle) else {
            continue;
        };
        if body.is_static() {
            continue;
        }
        if !body.allow_sleep
            || body.angular_velocity.length_squared() > angular_tol_sq
            || body.linear_velocity.length_squared() > linear_tol_sq
        {
            body.sleep_time = 0.0;
            all_slow = false;
        } else {
            body.sleep_time += dt;
            min_sleep_time = min_sleep_time.min(body.sleep_time);
        }
    }

    if !all_slow || min_sleep_time < settings.time_to_sleep {
        return false;
    }
    for &handle in island_bodies {
        if let Some(body) = bodies.get_mut(handle) {
            body.set_awake(false);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use crate::rigid_body::{BodyDef, Rigidbody};

    fn step() -> TimeStep {
        TimeStep {
            dt: 1.0 / 60.0,
            inv_dt: 60.0,
            dt_ratio: 1.0,
            velocity_iterations: 8,
            position_iterations: 4,
            warm_starting: true,
        }
    }

    #[test]
    fn test_lone_bodies_form_separate_islands() {
        let mut bodies = BodySet::default();
        let mut contacts = ContactManager::default();
        let mut stack = StackAllocator::with_capacity(64 * 1024);
        bodies.insert(Rigidbody::new(&BodyDef::new_dynamic()));
        bodies.insert(Rigidbody::new(&BodyDef::new_dynamic().with_position(Vec3::X * 10.0)));
        bodies.insert(Rigidbody::new(&BodyDef::new_static()));

        let stats = solve_islands(
            &mut bodies,
            &mut contacts,
            &mut stack,
            &PhysicsSettings::default(),
            &step(),
        )
        .unwrap();
        assert_eq!(stats.islands, 2);
        assert_eq!(stats.bodies, 2);
        assert_eq!(stack.entry_count(), 0);
        assert_eq!(stack.allocation(), 0);
    }

    #[test]
    fn test_sleeping_bodies_are_skipped() {
        let mut bodies = BodySet::default();
        let mut contacts = ContactManager::default();
        let mut stack = StackAllocator::with_capacity(64 * 1024);
        let h = bodies.insert(Rigidbody::new(&BodyDef::new_dynamic()));
        bodies.get_mut(h).unwrap().set_awake(false);

        let stats = solve_islands(
            &mut bodies,
            &mut contacts,
            &mut stack,
            &PhysicsSettings::default(),
            &step(),
        )
        .unwrap();
        assert_eq!(stats.islands, 0);
        assert_eq!(bodies.get(h).unwrap().position(), Vec3::ZERO);
    }

    #[test]
    fn test_slow_body_falls_asleep() {
        let mut bodies = BodySet::default();
        let mut contacts = ContactManager::default();
        let mut stack = StackAllocator::with_capacity(64 * 1024);
        let h = bodies.insert(Rigidbody::new(&BodyDef {
            gravity_scale: 0.0,
            ..BodyDef::new_dynamic().with_linear_velocity(Vec3::X * 0.01)
        }));
        let settings = PhysicsSettings::default();

        let stats = solve_islands(&mut bodies, &mut contacts, &mut stack, &settings, &step()).unwrap();
        assert_eq!(stats.slept, 1);
        let body = bodies.get(h).unwrap();
        assert!(!body.is_awake());
        assert_eq!(body.linear_velocity(), Vec3::ZERO);
    }

    #[test]
    fn test_one_fast_body_keeps_island_awake() {
        let mut bodies = BodySet::default();
        let mut contacts = ContactManager::default();
        let mut stack = StackAllocator::with_capacity(64 * 1024);
        let h = bodies.insert(Rigidbody::new(&BodyDef {
            gravity_scale: 0.0,
            ..BodyDef::new_dynamic().with_linear_velocity(Vec3::X)
        }));

        let stats = solve_islands(
            &mut bodies,
            &mut contacts,
            &mut stack,
            &PhysicsSettings::default(),
            &step(),
        )
        .unwrap();
        assert_eq!(stats.slept, 0);
        assert!(bodies.get(h).unwrap().is_awake());
    }

    #[test]
    fn test_sleep_timer_delays_sleep() {
        let mut bodies = BodySet::default();
        let mut contacts = ContactManager::default();
        let mut stack = StackAllocator::with_capacity(64 * 1024);
        let h = bodies.insert(Rigidbody::new(&BodyDef {
            gravity_scale: 0.0,
            ..BodyDef::new_dynamic().with_linear_velocity(Vec3::X * 0.01)
        }));
        let settings = PhysicsSettings {
            time_to_sleep: 0.04,
            ..Default::default()
        };

        // Two steps of 1/60 s stay below the timer, the third passes it.
        for _ in 0..2 {
            solve_islands(&mut bodies, &mut contacts, &mut stack, &settings, &step()).unwrap();
            assert!(bodies.get(h).unwrap().is_awake());
        }
        solve_islands(&mut bodies, &mut contacts, &mut stack, &settings, &step()).unwrap();
        assert!(!bodies.get(h).unwrap().is_awake());
    }

    #[test]
    fn test_free_body_integrates() {
        let mut bodies = BodySet::default();
        let mut contacts = ContactManager::default();
        let mut stack = StackAllocator::with_capacity(64 * 1024);
        let h = bodies.insert(Rigidbody::new(&BodyDef::new_dynamic().with_position(Vec3::Y * 10.0)));

        for _ in 0..60 {
            solve_islands(
                &mut bodies,
                &mut contacts,
                &mut stack,
                &PhysicsSettings::default(),
                &step(),
            )
            .unwrap();
        }
        let body = bodies.get(h).unwrap();
        assert!(body.position().y < 10.0 && body.position().y > 0.0);
        assert!(body.linear_velocity().y < -5.0);
        assert!(body.position().x.abs() < 1e-5);
    }
}
