//! hecs integration: mirror body transforms onto entities.

use glam::Mat4;

use crate::rigid_body::BodyHandle;
use crate::world::World;

/// Links an entity to a body in a physics [`World`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicsBody(pub BodyHandle);

/// World-space matrix of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalTransform(pub Mat4);

impl Default for GlobalTransform {
    fn default() -> Self {
        Self(Mat4::IDENTITY)
    }
}

/// Copy every linked body's transform into its entity's [`GlobalTransform`].
///
/// Entities whose body no longer exists are left untouched. Returns the
/// number of entities updated.
pub fn sync_transforms(physics: &World, world: &mut hecs::World) -> usize {
    let mut updated = 0;
    for (_, (body, global)) in world.query_mut::<(&PhysicsBody, &mut GlobalTransform)>() {
        if let Ok(matrix) = physics.body_matrix(body.0) {
            global.0 = matrix;
            updated += 1;
        }
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureDef;
    use crate::rigid_body::BodyDef;
    use crate::shape::Shape;
    use glam::Vec3;

    #[test]
    fn test_sync_copies_body_matrix() {
        let mut physics = World::default();
        let body = physics.create_body(&BodyDef::new_dynamic().with_position(Vec3::new(0.0, 5.0, 0.0)));
        physics
            .create_fixture(body, &FixtureDef::new(Shape::sphere(0.5)))
            .unwrap();

        let mut world = hecs::World::new();
        let entity = world.spawn((PhysicsBody(body), GlobalTransform::default()));
        physics.run_physics(1.0 / 60.0).unwrap();

        assert_eq!(sync_transforms(&physics, &mut world), 1);
        let global = world.get::<&GlobalTransform>(entity).unwrap();
        let y = global.0.w_axis.y;
        assert!(y < 5.0 && y > 4.9, "y = {y}");
    }

    #[test]
    fn test_sync_skips_destroyed_bodies() {
        let mut physics = World::default();
        let body = physics.create_body(&BodyDef::new_static());
        physics.destroy_body(body).unwrap();

        let mut world = hecs::World::new();
        world.spawn((PhysicsBody(body), GlobalTransform::default()));
        assert_eq!(sync_transforms(&physics, &mut world), 0);
    }
}
