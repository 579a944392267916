//! Sequential impulse contact solver.
//!
//! Operates on one island at a time. Body state is snapshotted into flat
//! [`Position`]/[`Velocity`] arrays addressed by island index, and all
//! constraint records are plain [`Pod`] data carved from the stack
//! allocator.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Quat, Vec3};

use crate::contact::Contact;
use crate::contact_manager::ContactManager;
use crate::math::{integrate_rotation, rotate_inertia, tangent_basis, Transform};
use crate::narrowphase::MAX_MANIFOLD_POINTS;
use crate::rigid_body::Rigidbody;
use crate::settings::{PhysicsSettings, TimeStep};

/// Center of mass and orientation of an island body.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Position {
    pub c: Vec3,
    /// Orientation as `[x, y, z, w]`.
    pub q: [f32; 4],
}

impl Position {
    pub fn new(c: Vec3, q: Quat) -> Self {
        Self { c, q: q.to_array() }
    }

    #[inline]
    pub fn rotation(&self) -> Quat {
        Quat::from_array(self.q)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Velocity {
    pub v: Vec3,
    pub w: Vec3,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct VelocityConstraintPoint {
    pub r_a: Vec3,
    pub r_b: Vec3,
    pub normal_impulse: f32,
    pub tangent_impulse: [f32; 2],
    pub normal_mass: f32,
    pub tangent_mass: [f32; 2],
    pub velocity_bias: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ContactVelocityConstraint {
    pub points: [VelocityConstraintPoint; MAX_MANIFOLD_POINTS],
    pub normal: Vec3,
    pub tangent1: Vec3,
    pub tangent2: Vec3,
    pub inv_i_a: Mat3,
    pub inv_i_b: Mat3,
    pub inv_mass_a: f32,
    pub inv_mass_b: f32,
    pub friction: f32,
    pub restitution: f32,
    pub index_a: u32,
    pub index_b: u32,
    pub point_count: u32,
    pub contact_index: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ContactPositionConstraint {
    pub local_points_a: [Vec3; MAX_MANIFOLD_POINTS],
    pub local_points_b: [Vec3; MAX_MANIFOLD_POINTS],
    /// Contact normal in body A's frame.
    pub local_normal: Vec3,
    pub local_center_a: Vec3,
    pub local_center_b: Vec3,
    pub inv_i_local_a: Mat3,
    pub inv_i_local_b: Mat3,
    pub inv_mass_a: f32,
    pub inv_mass_b: f32,
    pub index_a: u32,
    pub index_b: u32,
    pub point_count: u32,
}

/// Position-solver tuning copied out of [`PhysicsSettings`].
#[derive(Debug, Clone, Copy)]
pub struct SolverTuning {
    pub linear_slop: f32,
    pub baumgarte: f32,
    pub max_linear_correction: f32,
    pub velocity_threshold: f32,
}

impl From<&PhysicsSettings> for SolverTuning {
    fn from(settings: &PhysicsSettings) -> Self {
        Self {
            linear_slop: settings.linear_slop,
            baumgarte: settings.baumgarte,
            max_linear_correction: settings.max_linear_correction,
            velocity_threshold: settings.velocity_threshold,
        }
    }
}

/// Contact solver over borrowed island arrays.
pub struct ContactSolver<'a> {
    step: TimeStep,
    tuning: SolverTuning,
    positions: &'a mut [Position],
    velocities: &'a mut [Velocity],
    velocity_constraints: &'a mut [ContactVelocityConstraint],
    position_constraints: &'a mut [ContactPositionConstraint],
}

impl<'a> ContactSolver<'a> {
    /// `velocity_constraints` and `position_constraints` must have one entry
    /// per island contact; fill them with [`set_constraint`](Self::set_constraint).
    pub fn new(
        step: TimeStep,
        tuning: SolverTuning,
        positions: &'a mut [Position],
        velocities: &'a mut [Velocity],
        velocity_constraints: &'a mut [ContactVelocityConstraint],
        position_constraints: &'a mut [ContactPositionConstraint],
    ) -> Self {
        debug_assert_eq!(velocity_constraints.len(), position_constraints.len());
        Self {
            step,
            tuning,
            positions,
            velocities,
            velocity_constraints,
            position_constraints,
        }
    }

    /// Record the position-independent part of constraint `i`. Warm-started
    /// impulses are scaled by the step ratio.
    pub fn set_constraint(
        &mut self,
        i: usize,
        contact_index: u32,
        contact: &Contact,
        body_a: &Rigidbody,
        body_b: &Rigidbody,
    ) {
        let manifold = contact.manifold();
        let point_count = manifold.point_count();

        let mut vc = ContactVelocityConstraint::zeroed();
        let mut pc = ContactPositionConstraint::zeroed();

        for (j, mp) in manifold.points().iter().enumerate() {
            if self.step.warm_starting {
                vc.points[j].normal_impulse = self.step.dt_ratio * mp.normal_impulse;
                vc.points[j].tangent_impulse = [
                    self.step.dt_ratio * mp.tangent_impulse[0],
                    self.step.dt_ratio * mp.tangent_impulse[1],
                ];
            }
            pc.local_points_a[j] = mp.local_point_a;
            pc.local_points_b[j] = mp.local_point_b;
        }

        vc.inv_i_a = body_a.inv_inertia_world;
        vc.inv_i_b = body_b.inv_inertia_world;
        vc.inv_mass_a = body_a.inv_mass;
        vc.inv_mass_b = body_b.inv_mass;
        vc.friction = contact.friction();
        vc.restitution = contact.restitution();
        vc.index_a = body_a.island_index as u32;
        vc.index_b = body_b.island_index as u32;
        vc.point_count = point_count as u32;
        vc.contact_index = contact_index;

        pc.local_normal = manifold.local_normal;
        pc.local_center_a = body_a.sweep.local_center;
        pc.local_center_b = body_b.sweep.local_center;
        pc.inv_i_local_a = body_a.inv_inertia_local;
        pc.inv_i_local_b = body_b.inv_inertia_local;
        pc.inv_mass_a = body_a.inv_mass;
        pc.inv_mass_b = body_b.inv_mass;
        pc.index_a = vc.index_a;
        pc.index_b = vc.index_b;
        pc.point_count = vc.point_count;

        self.velocity_constraints[i] = vc;
        self.position_constraints[i] = pc;
    }

    /// Compute anchors, effective masses and restitution bias from the
    /// current positions and velocities.
    pub fn initialize_velocity_constraints(&mut self) {
        for (vc, pc) in self
            .velocity_constraints
            .iter_mut()
            .zip(self.position_constraints.iter())
        {
            let (ia, ib) = (vc.index_a as usize, vc.index_b as usize);
            let (pos_a, pos_b) = (self.positions[ia], self.positions[ib]);
            let (vel_a, vel_b) = (self.velocities[ia], self.velocities[ib]);

            let xf_a = body_transform(&pos_a, pc.local_center_a);
            let xf_b = body_transform(&pos_b, pc.local_center_b);
            let normal = xf_a.rotate(pc.local_normal);
            let (t1, t2) = tangent_basis(normal);
            vc.normal = normal;
            vc.tangent1 = t1;
            vc.tangent2 = t2;

            let (ma, mb) = (vc.inv_mass_a, vc.inv_mass_b);
            let (i_a, i_b) = (vc.inv_i_a, vc.inv_i_b);
            let effective_mass = |ra: Vec3, rb: Vec3, axis: Vec3| {
                let rna = ra.cross(axis);
                let rnb = rb.cross(axis);
                let k = ma + mb + rna.dot(i_a * rna) + rnb.dot(i_b * rnb);
                if k > 0.0 {
                    1.0 / k
                } else {
                    0.0
                }
            };

            for j in 0..vc.point_count as usize {
                let point_a = xf_a.transform_point(pc.local_points_a[j]);
                let point_b = xf_b.transform_point(pc.local_points_b[j]);
                let point = (point_a + point_b) * 0.5;

                let vcp = &mut vc.points[j];
                vcp.r_a = point - pos_a.c;
                vcp.r_b = point - pos_b.c;
                vcp.normal_mass = effective_mass(vcp.r_a, vcp.r_b, normal);
                vcp.tangent_mass = [
                    effective_mass(vcp.r_a, vcp.r_b, t1),
                    effective_mass(vcp.r_a, vcp.r_b, t2),
                ];

                let dv = vel_b.v + vel_b.w.cross(vcp.r_b) - vel_a.v - vel_a.w.cross(vcp.r_a);
                let v_rel = normal.dot(dv);
                vcp.velocity_bias = if v_rel < -self.tuning.velocity_threshold {
                    -vc.restitution * v_rel
                } else {
                    0.0
                };
            }
        }
    }

    /// Apply the accumulated impulses from the previous step.
    pub fn warm_start(&mut self) {
        for vc in self.velocity_constraints.iter() {
            let (ia, ib) = (vc.index_a as usize, vc.index_b as usize);
            let mut a = self.velocities[ia];
            let mut b = self.velocities[ib];

            for vcp in &vc.points[..vc.point_count as usize] {
                let p = vc.normal * vcp.normal_impulse
                    + vc.tangent1 * vcp.tangent_impulse[0]
                    + vc.tangent2 * vcp.tangent_impulse[1];
                a.v -= p * vc.inv_mass_a;
                a.w -= vc.inv_i_a * vcp.r_a.cross(p);
                b.v += p * vc.inv_mass_b;
                b.w += vc.inv_i_b * vcp.r_b.cross(p);
            }

            self.velocities[ia] = a;
            self.velocities[ib] = b;
        }
    }

    /// One velocity iteration over every contact in array order.
    pub fn solve_velocity_constraints(&mut self) {
        for vc in self.velocity_constraints.iter_mut() {
            let (ia, ib) = (vc.index_a as usize, vc.index_b as usize);
            let mut a = self.velocities[ia];
            let mut b = self.velocities[ib];
            let (ma, mb) = (vc.inv_mass_a, vc.inv_mass_b);
            let (i_a, i_b) = (vc.inv_i_a, vc.inv_i_b);

            let apply = |a: &mut Velocity, b: &mut Velocity, ra: Vec3, rb: Vec3, p: Vec3| {
                a.v -= p * ma;
                a.w -= i_a * ra.cross(p);
                b.v += p * mb;
                b.w += i_b * rb.cross(p);
            };

            for vcp in vc.points[..vc.point_count as usize].iter_mut() {
                // Normal: non-penetration with restitution.
                let dv = b.v + b.w.cross(vcp.r_b) - a.v - a.w.cross(vcp.r_a);
                let vn = dv.dot(vc.normal);
                let lambda = -vcp.normal_mass * (vn - vcp.velocity_bias);
                let new_impulse = (vcp.normal_impulse + lambda).max(0.0);
                let lambda = new_impulse - vcp.normal_impulse;
                vcp.normal_impulse = new_impulse;
                apply(&mut a, &mut b, vcp.r_a, vcp.r_b, vc.normal * lambda);

                // Friction inside the Coulomb cone.
                let max_friction = vc.friction * vcp.normal_impulse;
                for (k, tangent) in [vc.tangent1, vc.tangent2].into_iter().enumerate() {
                    let dv = b.v + b.w.cross(vcp.r_b) - a.v - a.w.cross(vcp.r_a);
                    let vt = dv.dot(tangent);
                    let lambda = -vcp.tangent_mass[k] * vt;
                    let new_impulse =
                        (vcp.tangent_impulse[k] + lambda).clamp(-max_friction, max_friction);
                    let lambda = new_impulse - vcp.tangent_impulse[k];
                    vcp.tangent_impulse[k] = new_impulse;
                    apply(&mut a, &mut b, vcp.r_a, vcp.r_b, tangent * lambda);
                }
            }

            self.velocities[ia] = a;
            self.velocities[ib] = b;
        }
    }

    /// Copy accumulated impulses back into the contacts' manifolds.
    pub fn store_impulses(&self, contacts: &mut ContactManager) {
        for vc in self.velocity_constraints.iter() {
            let Some(contact) = contacts.get_mut(vc.contact_index) else {
                continue;
            };
            for (mp, vcp) in contact
                .manifold
                .points_mut()
                .iter_mut()
                .zip(&vc.points[..vc.point_count as usize])
            {
                mp.normal_impulse = vcp.normal_impulse;
                mp.tangent_impulse = vcp.tangent_impulse;
            }
        }
    }

    /// One position iteration. Returns true once the deepest penetration
    /// measured during the pass is within the slop.
    pub fn solve_position_constraints(&mut self) -> bool {
        let mut max_depth = 0.0f32;
        let slop = self.tuning.linear_slop;

        for pc in self.position_constraints.iter() {
            let (ia, ib) = (pc.index_a as usize, pc.index_b as usize);
            let mut pos_a = self.positions[ia];
            let mut pos_b = self.positions[ib];
            let (ma, mb) = (pc.inv_mass_a, pc.inv_mass_b);

            for j in 0..pc.point_count as usize {
                let qa = pos_a.rotation();
                let qb = pos_b.rotation();
                let xf_a = body_transform(&pos_a, pc.local_center_a);
                let xf_b = body_transform(&pos_b, pc.local_center_b);
                let normal = xf_a.rotate(pc.local_normal);

                let point_a = xf_a.transform_point(pc.local_points_a[j]);
                let point_b = xf_b.transform_point(pc.local_points_b[j]);
                let depth = (point_a - point_b).dot(normal);
                let point = (point_a + point_b) * 0.5;
                max_depth = max_depth.max(depth);

                let correction = (self.tuning.baumgarte * (depth - slop))
                    .clamp(0.0, self.tuning.max_linear_correction);

                let i_a = rotate_inertia(qa, pc.inv_i_local_a);
                let i_b = rotate_inertia(qb, pc.inv_i_local_b);
                let ra = point - pos_a.c;
                let rb = point - pos_b.c;
                let rna = ra.cross(normal);
                let rnb = rb.cross(normal);
                let k = ma + mb + rna.dot(i_a * rna) + rnb.dot(i_b * rnb);
                let impulse = if k > 0.0 { correction / k } else { 0.0 };
                let p = normal * impulse;

                pos_a.c -= p * ma;
                pos_a.q = integrate_rotation(qa, -(i_a * ra.cross(p)), 1.0).to_array();
                pos_b.c += p * mb;
                pos_b.q = integrate_rotation(qb, i_b * rb.cross(p), 1.0).to_array();
            }

            self.positions[ia] = pos_a;
            self.positions[ib] = pos_b;
        }

        max_depth <= slop
    }

    /// Advance positions by the solved velocities. Motions above the given
    /// limits are clamped by scaling the velocity down.
    pub fn integrate_positions(&mut self, max_translation: f32, max_rotation: f32) {
        let dt = self.step.dt;
        for (position, velocity) in self.positions.iter_mut().zip(self.velocities.iter_mut()) {
            let translation = velocity.v * dt;
            if translation.length_squared() > max_translation * max_translation {
                velocity.v *= max_translation / translation.length();
            }
            let rotation = velocity.w.length() * dt;
            if rotation > max_rotation {
                velocity.w *= max_rotation / rotation;
            }
            position.c += velocity.v * dt;
            position.q = integrate_rotation(position.rotation(), velocity.w, dt).to_array();
        }
    }

    /// Deepest penetration over all constraints at the current positions.
    pub fn max_penetration(&self) -> f32 {
        let mut max_depth = 0.0f32;
        for pc in self.position_constraints.iter() {
            let pos_a = self.positions[pc.index_a as usize];
            let pos_b = self.positions[pc.index_b as usize];
            let xf_a = body_transform(&pos_a, pc.local_center_a);
            let xf_b = body_transform(&pos_b, pc.local_center_b);
            let normal = xf_a.rotate(pc.local_normal);
            for j in 0..pc.point_count as usize {
                let depth = (xf_a.transform_point(pc.local_points_a[j])
                    - xf_b.transform_point(pc.local_points_b[j]))
                .dot(normal);
                max_depth = max_depth.max(depth);
            }
        }
        max_depth
    }
}

/// Body origin transform from a center-of-mass position.
#[inline]
fn body_transform(position: &Position, local_center: Vec3) -> Transform {
    let q = position.rotation();
    Transform::new(position.c - q * local_center, q)
}
