//! Physics engine benchmarks (criterion - wall-clock time).
//!
//! Run all:    cargo bench --manifest-path benchmarks/Cargo.toml --bench physics
//! Filter:     cargo bench --manifest-path benchmarks/Cargo.toml --bench physics -- broadphase

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use glam::{Quat, Vec3};
use rein_physics::{
    Aabb, BlockAllocator, BodyDef, BroadPhase, ContactKind, FixtureDef, PhysicsSettings, Shape,
    Transform, World,
};

/// Deterministic pseudo-random positions in a cube of side `extent`.
fn scatter(n: usize, extent: f32) -> Vec<Vec3> {
    let mut state = 0x9E37_79B9u32;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state as f32 / u32::MAX as f32) * extent
    };
    (0..n).map(|_| Vec3::new(next(), next(), next())).collect()
}

fn pile_world(n: usize) -> World {
    let mut world = World::new(PhysicsSettings::default());
    let ground = world.create_body(&BodyDef::new_static());
    world
        .create_fixture(ground, &FixtureDef::new(Shape::cuboid(Vec3::new(50.0, 0.5, 50.0))))
        .unwrap();

    let side = (n as f32).sqrt().ceil() as usize;
    for i in 0..n {
        let position = Vec3::new(
            (i % side) as f32 * 1.1 - side as f32 * 0.55,
            1.0 + (i / side) as f32 * 1.1,
            0.0,
        );
        let body = world.create_body(&BodyDef::new_dynamic().with_position(position));
        let shape = match i % 4 {
            0 => Shape::cuboid(Vec3::splat(0.5)),
            1 => Shape::sphere(0.5),
            2 => Shape::capsule(0.3, 0.2),
            _ => Shape::cylinder(0.5, 0.5),
        };
        world.create_fixture(body, &FixtureDef::new(shape)).unwrap();
    }
    world
}

// ---------------------------------------------------------------------------
// Broadphase
// ---------------------------------------------------------------------------

fn bench_broadphase(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("broadphase/create_proxies");
        for &n in &[100, 500, 1000, 2000] {
            let points = scatter(n, 50.0);
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
                b.iter(|| {
                    let mut bp = BroadPhase::new();
                    for (i, p) in points.iter().enumerate() {
                        bp.create_proxy(&Aabb::from_center_extents(*p, Vec3::splat(0.5)), i);
                    }
                    black_box(bp.proxy_count())
                });
            });
        }
        group.finish();
    }

    {
        let mut group = c.benchmark_group("broadphase/move_and_pair");
        for &n in &[100, 500, 1000, 2000] {
            let points = scatter(n, 30.0);
            let mut bp = BroadPhase::new();
            let ids: Vec<u32> = points
                .iter()
                .enumerate()
                .map(|(i, p)| bp.create_proxy(&Aabb::from_center_extents(*p, Vec3::splat(0.5)), i))
                .collect();
            bp.update_pairs(|_, _| {});

            let mut offset = 0.0f32;
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
                b.iter(|| {
                    offset = if offset > 0.0 { -0.3 } else { 0.3 };
                    let displacement = Vec3::new(offset, 0.0, 0.0);
                    for (&id, p) in ids.iter().zip(&points) {
                        let aabb = Aabb::from_center_extents(*p + displacement, Vec3::splat(0.5));
                        bp.move_proxy(id, &aabb, displacement);
                    }
                    let mut pairs = 0usize;
                    bp.update_pairs(|_, _| pairs += 1);
                    black_box(pairs)
                });
            });
        }
        group.finish();
    }
}

// ---------------------------------------------------------------------------
// Narrowphase
// ---------------------------------------------------------------------------

fn bench_narrowphase(c: &mut Criterion) {
    let cases = [
        ("sphere_sphere", Shape::sphere(0.5), Shape::sphere(0.5)),
        ("box_box", Shape::cuboid(Vec3::splat(0.5)), Shape::cuboid(Vec3::splat(0.5))),
        ("box_capsule", Shape::cuboid(Vec3::splat(0.5)), Shape::capsule(0.3, 0.5)),
        ("cylinder_cylinder", Shape::cylinder(0.5, 0.5), Shape::cylinder(0.5, 0.5)),
    ];
    let ta = Transform::IDENTITY;
    let tb_hit = Transform::new(Vec3::new(0.0, 0.9, 0.0), Quat::from_rotation_y(0.3));
    let tb_miss = Transform::from_position(Vec3::new(5.0, 0.0, 0.0));

    for (name, a, b) in cases {
        let mut group = c.benchmark_group(format!("narrowphase/{name}"));
        let kind = ContactKind::from_types(a.shape_type(), b.shape_type());
        let info_a = a.shape_info(&ta);
        let mut blocks = BlockAllocator::new();

        let info_hit = b.shape_info(&tb_hit);
        group.bench_function("intersecting", |bench| {
            bench.iter(|| black_box(kind.evaluate(&info_a, &info_hit, &mut blocks)));
        });

        let info_miss = b.shape_info(&tb_miss);
        group.bench_function("separated", |bench| {
            bench.iter(|| black_box(kind.evaluate(&info_a, &info_miss, &mut blocks)));
        });
        group.finish();
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

fn bench_world(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("world/step");
        group.sample_size(30);
        for &n in &[10, 100, 500] {
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
                b.iter_with_setup(
                    || pile_world(n),
                    |mut world| {
                        for _ in 0..10 {
                            world.start_frame();
                            world.run_physics(1.0 / 60.0).unwrap();
                        }
                        world
                    },
                );
            });
        }
        group.finish();
    }

    {
        let mut group = c.benchmark_group("world/settled");
        group.sample_size(30);
        for &n in &[100, 500] {
            let mut world = pile_world(n);
            for _ in 0..120 {
                world.start_frame();
                world.run_physics(1.0 / 60.0).unwrap();
            }
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
                b.iter(|| {
                    world.start_frame();
                    world.run_physics(1.0 / 60.0).unwrap();
                });
            });
        }
        group.finish();
    }
}

criterion_group!(benches, bench_broadphase, bench_narrowphase, bench_world);
criterion_main!(benches);
