//! Rein rigid-body physics
//!
//! A real-time 3D rigid-body engine for boxes, spheres, capsules and
//! cylinders.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **memory** - Block and stack allocators owned by the world
//! 2. **shape / collider** - Shapes, AABBs and support geometry
//! 3. **broadphase** - Dynamic AABB tree and pair discovery
//! 4. **narrowphase** - GJK, EPA, manifold clipping and pair dispatch
//! 5. **contact / contact_manager** - Persistent contacts and their lifecycle
//! 6. **solver / island** - Sequential-impulse contact solver over islands
//! 7. **world** - Bodies, fixtures and the per-frame pipeline
//! 8. **ecs** - hecs transform readback (feature = "ecs")
//!
//! # Example
//!
//! ```
//! use glam::Vec3;
//! use rein_physics::{BodyDef, FixtureDef, PhysicsSettings, Shape, World};
//!
//! let mut world = World::new(PhysicsSettings::default());
//! let ground = world.create_body(&BodyDef::new_static());
//! world
//!     .create_fixture(ground, &FixtureDef::new(Shape::cuboid(Vec3::new(10.0, 0.5, 10.0))))
//!     .unwrap();
//! let ball = world.create_body(&BodyDef::new_dynamic().with_position(Vec3::new(0.0, 3.0, 0.0)));
//! world.create_fixture(ball, &FixtureDef::new(Shape::sphere(0.5))).unwrap();
//!
//! for _ in 0..60 {
//!     world.start_frame();
//!     world.run_physics(1.0 / 60.0).unwrap();
//! }
//! assert!(world.body_transform(ball).unwrap().position.y < 3.0);
//! ```

pub mod broadphase;
pub mod collider;
pub mod contact;
pub mod contact_manager;
pub mod error;
pub mod fixture;
pub mod island;
pub mod math;
pub mod memory;
pub mod narrowphase;
pub mod rigid_body;
pub mod settings;
pub mod shape;
pub mod solver;
pub mod world;

#[cfg(feature = "ecs")]
pub mod ecs;

// Re-export commonly used types
pub use broadphase::{BroadPhase, DynamicTree};
pub use collider::{Aabb, ConvexInfo};
pub use contact::{Contact, Manifold, ManifoldPoint};
pub use contact_manager::ContactManager;
pub use error::{PhysicsError, Result};
pub use fixture::{Fixture, FixtureDef};
pub use island::IslandStats;
pub use math::Transform;
pub use memory::{BlockAllocator, PhysicsContext, StackAllocator};
pub use narrowphase::{ContactKind, Penetration};
pub use rigid_body::{BodyDef, BodyHandle, BodyType, Rigidbody};
pub use settings::PhysicsSettings;
pub use shape::{MassData, Shape, ShapeKind, ShapeType};
pub use world::World;
