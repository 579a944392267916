//! EPA (Expanding Polytope Algorithm) for penetration depth and normal.
//!
//! Vertices, faces and horizon edges live in blocks from the
//! [`BlockAllocator`] and grow geometrically as the polytope expands.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::memory::{Block, BlockAllocator};

use super::gjk::{MinkowskiPair, Simplex, SupportPoint};

/// Absolute distance below which a new support point no longer improves the
/// closest face.
pub const EPA_TOLERANCE: f32 = 1e-4;
pub const MAX_EPA_ITERATIONS: usize = 128;

const INITIAL_VERTICES: usize = 16;
const INITIAL_FACES: usize = 20;
const INITIAL_EDGES: usize = 16;

/// Faces whose cross product is shorter than this are dropped.
const AREA_EPSILON: f32 = 1e-10;
const DUPLICATE_EPSILON_SQ: f32 = 1e-12;
/// New faces further than this behind the origin get their winding flipped.
const FLIP_TOLERANCE: f32 = 1e-6;

const REFINE_ITERATIONS: usize = 8;
/// Angle in radians used to sample the depth curvature.
const REFINE_STEP: f32 = 1e-3;
/// Tangential support offset below which the normal is already optimal.
const REFINE_SLOPE: f32 = 1e-6;
const MAX_REFINE_ANGLE: f32 = 0.1;

/// Minimum translation that separates two overlapping shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Penetration {
    /// Unit normal pointing from shape A towards shape B.
    pub normal: Vec3,
    /// Overlap along `normal`, non-negative.
    pub depth: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Face {
    indices: [u32; 3],
    normal: Vec3,
    distance: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
struct Edge {
    a: u32,
    b: u32,
}

/// Growable typed array over a block.
struct BlockVec<T: Pod> {
    block: Block,
    len: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Pod> BlockVec<T> {
    fn with_capacity(blocks: &mut BlockAllocator, capacity: usize) -> Self {
        Self {
            block: blocks.allocate_slice::<T>(capacity),
            len: 0,
            _marker: std::marker::PhantomData,
        }
    }

    fn push(&mut self, blocks: &mut BlockAllocator, value: T) {
        let capacity = self.block.capacity::<T>();
        if self.len == capacity {
            blocks.grow::<T>(&mut self.block, self.len, (capacity * 2).max(4));
        }
        self.block.as_mut_slice::<T>()[self.len] = value;
        self.len += 1;
    }

    fn swap_remove(&mut self, index: usize) -> T {
        let slice = self.block.as_mut_slice::<T>();
        let value = slice[index];
        slice[index] = slice[self.len - 1];
        self.len -= 1;
        value
    }

    #[inline]
    fn as_slice(&self) -> &[T] {
        &self.block.as_slice::<T>()[..self.len]
    }

    #[inline]
    fn clear(&mut self) {
        self.len = 0;
    }

    fn release(self, blocks: &mut BlockAllocator) {
        blocks.free(self.block);
    }
}

struct Polytope {
    vertices: BlockVec<SupportPoint>,
    faces: BlockVec<Face>,
    edges: BlockVec<Edge>,
}

impl Polytope {
    fn new(blocks: &mut BlockAllocator) -> Self {
        Self {
            vertices: BlockVec::with_capacity(blocks, INITIAL_VERTICES),
            faces: BlockVec::with_capacity(blocks, INITIAL_FACES),
            edges: BlockVec::with_capacity(blocks, INITIAL_EDGES),
        }
    }

    fn release(self, blocks: &mut BlockAllocator) {
        self.edges.release(blocks);
        self.faces.release(blocks);
        self.vertices.release(blocks);
    }

    #[inline]
    fn vertex(&self, index: u32) -> Vec3 {
        self.vertices.as_slice()[index as usize].v
    }

    /// Face through three vertices with the given winding. `None` for
    /// zero-area triangles.
    fn make_face(&self, i: u32, j: u32, k: u32) -> Option<Face> {
        let (a, b, c) = (self.vertex(i), self.vertex(j), self.vertex(k));
        let normal = (b - a).cross(c - a);
        let len = normal.length();
        if len < AREA_EPSILON {
            return None;
        }
        let normal = normal / len;
        Some(Face {
            indices: [i, j, k],
            normal,
            distance: normal.dot(a),
        })
    }

    fn centroid(&self, face: &Face) -> Vec3 {
        let [i, j, k] = face.indices;
        (self.vertex(i) + self.vertex(j) + self.vertex(k)) / 3.0
    }

    /// Add `a -> b` to the horizon, cancelling it against `b -> a`.
    fn add_edge(&mut self, blocks: &mut BlockAllocator, a: u32, b: u32) {
        let reverse = Edge { a: b, b: a };
        match self.edges.as_slice().iter().position(|e| *e == reverse) {
            Some(pos) => {
                self.edges.swap_remove(pos);
            }
            None => self.edges.push(blocks, Edge { a, b }),
        }
    }

    fn closest_face(&self) -> Option<Face> {
        self.faces
            .as_slice()
            .iter()
            .copied()
            .min_by(|x, y| x.distance.total_cmp(&y.distance))
    }
}

/// Expand the GJK tetrahedron until the closest face stops moving.
///
/// Returns `None` for a degenerate polytope or when the iteration cap is hit;
/// callers treat that as "not colliding".
pub fn epa(pair: &MinkowskiPair, simplex: &Simplex, blocks: &mut BlockAllocator) -> Option<Penetration> {
    if simplex.len() < 4 {
        return None;
    }

    let mut polytope = Polytope::new(blocks);
    let result = expand(pair, simplex, &mut polytope, blocks);
    polytope.release(blocks);

    result.map(|face| {
        let (normal, depth) = refine(pair, face.normal, face.distance);
        Penetration {
            normal,
            depth: depth.max(0.0),
        }
    })
}

/// Polish the EPA normal on curved Minkowski surfaces.
///
/// The depth along a unit direction `n` is the support height
/// `h(n) = support(n) . n`, and the penetration normal minimises it. EPA
/// stops once a new support point no longer moves the closest face, which
/// fixes the depth well before the normal on round shapes. Each round takes
/// a Newton step along the tangential support offset, with the curvature
/// sampled a small angle away. A step is kept only if it lowers `h`, so flat
/// faces keep the EPA result untouched.
fn refine(pair: &MinkowskiPair, normal: Vec3, distance: f32) -> (Vec3, f32) {
    let mut n = normal;
    let mut depth = distance;
    let mut height = pair.support(n).v.dot(n);

    for _ in 0..REFINE_ITERATIONS {
        let s = pair.support(n).v;
        let tangent = s - n * s.dot(n);
        let slope = tangent.length();
        if slope < REFINE_SLOPE {
            break;
        }
        let t = -tangent / slope;

        let (sin, cos) = REFINE_STEP.sin_cos();
        let sample = n * cos + t * sin;
        let sample_tangent = t * cos - n * sin;
        let sample_slope = pair.support(sample).v.dot(sample_tangent);
        let curvature = (sample_slope + slope) / REFINE_STEP;
        if curvature <= 0.0 {
            break;
        }

        let angle = (slope / curvature).min(MAX_REFINE_ANGLE);
        let (sin, cos) = angle.sin_cos();
        let candidate = (n * cos + t * sin).normalize_or_zero();
        if candidate == Vec3::ZERO {
            break;
        }
        let candidate_height = pair.support(candidate).v.dot(candidate);
        if candidate_height >= height {
            break;
        }
        n = candidate;
        height = candidate_height;
        depth = candidate_height;
    }

    (n, depth)
}

fn expand(
    pair: &MinkowskiPair,
    simplex: &Simplex,
    polytope: &mut Polytope,
    blocks: &mut BlockAllocator,
) -> Option<Face> {
    for point in simplex.points() {
        polytope.vertices.push(blocks, *point);
    }

    // Seed faces, wound so their normals point away from the opposite vertex.
    for (face, opposite) in [([0, 1, 2], 3), ([0, 3, 1], 2), ([0, 2, 3], 1), ([1, 3, 2], 0)] {
        let Some(mut seed) = polytope.make_face(face[0], face[1], face[2]) else {
            continue;
        };
        let a = polytope.vertex(face[0]);
        if seed.normal.dot(polytope.vertex(opposite) - a) > 0.0 {
            seed.indices.swap(1, 2);
            seed.normal = -seed.normal;
            seed.distance = -seed.distance;
        }
        polytope.faces.push(blocks, seed);
    }

    for _ in 0..MAX_EPA_ITERATIONS {
        let closest = polytope.closest_face()?;

        let point = pair.support(closest.normal);
        let improvement = point.v.dot(closest.normal) - closest.distance;
        let duplicate = polytope
            .vertices
            .as_slice()
            .iter()
            .any(|p| p.v.distance_squared(point.v) < DUPLICATE_EPSILON_SQ);
        if improvement < EPA_TOLERANCE || duplicate {
            return Some(closest);
        }

        let new_index = polytope.vertices.len as u32;
        polytope.vertices.push(blocks, point);

        // Remove every face that can see the new point.
        polytope.edges.clear();
        let mut i = 0;
        while i < polytope.faces.len {
            let face = polytope.faces.as_slice()[i];
            if face.normal.dot(point.v - polytope.centroid(&face)) > 0.0 {
                let [a, b, c] = face.indices;
                polytope.add_edge(blocks, a, b);
                polytope.add_edge(blocks, b, c);
                polytope.add_edge(blocks, c, a);
                polytope.faces.swap_remove(i);
            } else {
                i += 1;
            }
        }

        // Fan the horizon to the new vertex.
        for e in 0..polytope.edges.len {
            let edge = polytope.edges.as_slice()[e];
            let Some(mut face) = polytope.make_face(edge.a, edge.b, new_index) else {
                continue;
            };
            if face.distance < -FLIP_TOLERANCE {
                face.indices.swap(0, 1);
                face.normal = -face.normal;
                face.distance = -face.distance;
            }
            polytope.faces.push(blocks, face);
        }

        if polytope.faces.len == 0 {
            tracing::trace!("epa polytope collapsed");
            return None;
        }
    }

    tracing::trace!("epa iteration cap reached");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::ConvexInfo;
    use crate::math::Transform;
    use crate::narrowphase::gjk::gjk;
    use crate::shape::Shape;

    fn penetration(a: &Shape, xa: Vec3, b: &Shape, xb: Vec3) -> Option<Penetration> {
        let mut blocks = BlockAllocator::new();
        let ia = a.shape_info(&Transform::from_position(xa));
        let ib = b.shape_info(&Transform::from_position(xb));
        let pair = MinkowskiPair::new(&ia, &ib, ConvexInfo::support, ConvexInfo::support);
        let simplex = gjk(&pair)?;
        epa(&pair, &simplex, &mut blocks)
    }

    #[test]
    fn test_epa_overlapping_spheres() {
        let s = Shape::sphere(0.5);
        let p = penetration(&s, Vec3::ZERO, &s, Vec3::new(0.8, 0.0, 0.0)).unwrap();
        assert!((p.normal - Vec3::X).length() < 1e-3, "normal = {:?}", p.normal);
        assert!((p.depth - 0.2).abs() < 1e-3, "depth = {}", p.depth);
        assert!((p.normal.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_epa_off_axis_spheres() {
        let s = Shape::sphere(0.5);
        let d = Vec3::new(0.5, 0.3, 0.1);
        let p = penetration(&s, Vec3::ZERO, &s, d).unwrap();
        assert!((p.normal - d.normalize()).length() < 1e-3, "normal = {:?}", p.normal);
        assert!((p.depth - (1.0 - d.length())).abs() < 1e-3, "depth = {}", p.depth);
    }

    #[test]
    fn test_epa_sphere_against_box_face() {
        let ground = Shape::cuboid(Vec3::new(5.0, 0.5, 5.0));
        let ball = Shape::sphere(0.5);
        let p = penetration(&ground, Vec3::ZERO, &ball, Vec3::new(0.3, 0.9, -0.2)).unwrap();
        assert!((p.normal - Vec3::Y).length() < 1e-3, "normal = {:?}", p.normal);
        assert!((p.depth - 0.1).abs() < 1e-3, "depth = {}", p.depth);
    }

    #[test]
    fn test_epa_box_on_box() {
        let ground = Shape::cuboid(Vec3::new(5.0, 0.5, 5.0));
        let b = Shape::cuboid(Vec3::splat(0.5));
        let p = penetration(&ground, Vec3::ZERO, &b, Vec3::new(0.0, 0.95, 0.0)).unwrap();
        assert!((p.normal - Vec3::Y).length() < 1e-3, "normal = {:?}", p.normal);
        assert!((p.depth - 0.05).abs() < 1e-3, "depth = {}", p.depth);
    }

    #[test]
    fn test_epa_releases_blocks() {
        let mut blocks = BlockAllocator::new();
        let s = Shape::sphere(0.5);
        let ia = s.shape_info(&Transform::IDENTITY);
        let ib = s.shape_info(&Transform::from_position(Vec3::new(0.5, 0.1, 0.0)));
        let pair = MinkowskiPair::new(&ia, &ib, ConvexInfo::support, ConvexInfo::support);
        let simplex = gjk(&pair).unwrap();
        epa(&pair, &simplex, &mut blocks).unwrap();
        assert_eq!(blocks.large_count(), 0);
        let chunks = blocks.chunk_count();
        epa(&pair, &simplex, &mut blocks).unwrap();
        assert_eq!(blocks.chunk_count(), chunks);
    }
}
