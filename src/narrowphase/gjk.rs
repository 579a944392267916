//! GJK intersection test on the Minkowski difference of two convex shapes.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::collider::{ConvexInfo, SupportFn};

/// Iteration cap; running out means "no collision".
pub const MAX_GJK_ITERATIONS: usize = 64;

/// Squared distance under which two support points count as the same vertex.
const DUPLICATE_EPSILON_SQ: f32 = 1e-12;
/// Squared length under which a search direction is degenerate.
const DIRECTION_EPSILON_SQ: f32 = 1e-12;

/// A vertex of the Minkowski difference with the shape points that made it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SupportPoint {
    /// Support point on shape A.
    pub a: Vec3,
    /// Support point on shape B.
    pub b: Vec3,
    /// `a - b`.
    pub v: Vec3,
}

/// Two shapes plus the support mappings selected for their pair kind.
#[derive(Clone, Copy)]
pub struct MinkowskiPair<'a> {
    pub a: &'a ConvexInfo,
    pub b: &'a ConvexInfo,
    support_a: SupportFn,
    support_b: SupportFn,
}

impl<'a> MinkowskiPair<'a> {
    pub fn new(
        a: &'a ConvexInfo,
        b: &'a ConvexInfo,
        support_a: SupportFn,
        support_b: SupportFn,
    ) -> Self {
        Self {
            a,
            b,
            support_a,
            support_b,
        }
    }

    /// Farthest point of `A - B` along `dir`.
    #[inline]
    pub fn support(&self, dir: Vec3) -> SupportPoint {
        let a = (self.support_a)(self.a, dir);
        let b = (self.support_b)(self.b, -dir);
        SupportPoint { a, b, v: a - b }
    }
}

/// A simplex of up to four support points. The newest point is last.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simplex {
    points: [SupportPoint; 4],
    len: usize,
}

impl Simplex {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn points(&self) -> &[SupportPoint] {
        &self.points[..self.len]
    }

    #[inline]
    fn push(&mut self, point: SupportPoint) {
        self.points[self.len] = point;
        self.len += 1;
    }

    #[inline]
    fn set(&mut self, points: &[SupportPoint]) {
        self.points[..points.len()].copy_from_slice(points);
        self.len = points.len();
    }

    fn contains(&self, v: Vec3) -> bool {
        self.points()
            .iter()
            .any(|p| p.v.distance_squared(v) < DUPLICATE_EPSILON_SQ)
    }
}

/// Run GJK. Returns the enclosing tetrahedron when the shapes overlap.
///
/// Touching contacts (origin on the boundary of the difference) and
/// iteration exhaustion report no collision.
pub fn gjk(pair: &MinkowskiPair) -> Option<Simplex> {
    let mut direction = pair.b.center - pair.a.center;
    if direction.length_squared() < DIRECTION_EPSILON_SQ {
        direction = Vec3::X;
    }

    let mut simplex = Simplex::default();
    let first = pair.support(direction);
    simplex.push(first);
    direction = -first.v;

    for _ in 0..MAX_GJK_ITERATIONS {
        if direction.length_squared() < DIRECTION_EPSILON_SQ {
            direction = recover_direction(&simplex)?;
        }

        let point = pair.support(direction);
        if point.v.dot(direction) < 0.0 || simplex.contains(point.v) {
            return None;
        }
        simplex.push(point);

        if do_simplex(&mut simplex, &mut direction) {
            return Some(simplex);
        }
    }

    tracing::trace!("gjk iteration cap reached");
    None
}

/// Search direction for a simplex that passes through the origin.
fn recover_direction(simplex: &Simplex) -> Option<Vec3> {
    let p = simplex.points();
    match p.len() {
        2 => Some((p[1].v - p[0].v).any_orthonormal_vector()),
        3 => {
            let normal = (p[1].v - p[0].v).cross(p[2].v - p[0].v);
            if normal.length_squared() > DIRECTION_EPSILON_SQ {
                Some(normal)
            } else {
                Some((p[1].v - p[0].v).any_orthonormal_vector())
            }
        }
        // A lone vertex at the origin: the shapes only touch.
        _ => None,
    }
}

/// Triple cross product: (a x b) x c
#[inline]
fn triple_cross_product(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    a.cross(b).cross(c)
}

/// Reduce the simplex to the feature nearest the origin and update the search
/// direction. Returns true if the origin is enclosed.
fn do_simplex(simplex: &mut Simplex, direction: &mut Vec3) -> bool {
    match simplex.len() {
        2 => do_simplex_line(simplex, direction),
        3 => do_simplex_triangle(simplex, direction),
        4 => do_simplex_tetrahedron(simplex, direction),
        _ => false,
    }
}

fn do_simplex_line(simplex: &mut Simplex, direction: &mut Vec3) -> bool {
    let a = simplex.points[1];
    let b = simplex.points[0];
    let ab = b.v - a.v;
    let ao = -a.v;

    if ab.dot(ao) > 0.0 {
        *direction = triple_cross_product(ab, ao, ab);
    } else {
        simplex.set(&[a]);
        *direction = ao;
    }
    false
}

fn do_simplex_triangle(simplex: &mut Simplex, direction: &mut Vec3) -> bool {
    let a = simplex.points[2];
    let b = simplex.points[1];
    let c = simplex.points[0];
    let ab = b.v - a.v;
    let ac = c.v - a.v;
    let ao = -a.v;
    let abc = ab.cross(ac);

    if abc.cross(ac).dot(ao) > 0.0 {
        if ac.dot(ao) > 0.0 {
            simplex.set(&[c, a]);
            *direction = triple_cross_product(ac, ao, ac);
        } else {
            simplex.set(&[b, a]);
            return do_simplex_line(simplex, direction);
        }
    } else if ab.cross(abc).dot(ao) > 0.0 {
        simplex.set(&[b, a]);
        return do_simplex_line(simplex, direction);
    } else if abc.dot(ao) > 0.0 {
        *direction = abc;
    } else {
        // Keep the winding so the origin is on the positive side.
        simplex.set(&[b, c, a]);
        *direction = -abc;
    }
    false
}

fn do_simplex_tetrahedron(simplex: &mut Simplex, direction: &mut Vec3) -> bool {
    let a = simplex.points[3];
    let b = simplex.points[2];
    let c = simplex.points[1];
    let d = simplex.points[0];
    let ab = b.v - a.v;
    let ac = c.v - a.v;
    let ad = d.v - a.v;
    let ao = -a.v;

    let abc = ab.cross(ac);
    let acd = ac.cross(ad);
    let adb = ad.cross(ab);

    if abc.dot(ao) > 0.0 {
        simplex.set(&[c, b, a]);
        *direction = abc;
        return do_simplex_triangle(simplex, direction);
    }
    if acd.dot(ao) > 0.0 {
        simplex.set(&[d, c, a]);
        *direction = acd;
        return do_simplex_triangle(simplex, direction);
    }
    if adb.dot(ao) > 0.0 {
        simplex.set(&[b, d, a]);
        *direction = adb;
        return do_simplex_triangle(simplex, direction);
    }

    // Origin is inside the tetrahedron
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;
    use crate::shape::Shape;
    use glam::Quat;

    fn collide(a: &Shape, xa: Vec3, b: &Shape, xb: Vec3) -> Option<Simplex> {
        let ia = a.shape_info(&Transform::from_position(xa));
        let ib = b.shape_info(&Transform::from_position(xb));
        let pair = MinkowskiPair::new(&ia, &ib, ConvexInfo::support, ConvexInfo::support);
        gjk(&pair)
    }

    #[test]
    fn test_gjk_spheres_intersecting() {
        let s = Shape::sphere(0.5);
        let simplex = collide(&s, Vec3::ZERO, &s, Vec3::new(0.8, 0.0, 0.0));
        assert_eq!(simplex.map(|s| s.len()), Some(4));
    }

    #[test]
    fn test_gjk_spheres_not_intersecting() {
        let s = Shape::sphere(1.0);
        assert!(collide(&s, Vec3::ZERO, &s, Vec3::new(5.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_gjk_separated_boxes() {
        let b = Shape::cuboid(Vec3::splat(0.5));
        assert!(collide(&b, Vec3::ZERO, &b, Vec3::new(5.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_gjk_concentric_shapes() {
        let b = Shape::cuboid(Vec3::splat(0.5));
        let s = Shape::sphere(0.25);
        assert!(collide(&b, Vec3::ZERO, &s, Vec3::ZERO).is_some());
    }

    #[test]
    fn test_gjk_rotated_capsule_against_box() {
        let b = Shape::cuboid(Vec3::new(2.0, 0.5, 2.0));
        let capsule = Shape::capsule(0.3, 0.5);
        let ia = b.shape_info(&Transform::IDENTITY);
        let ib = capsule.shape_info(&Transform::new(
            Vec3::new(0.0, 0.75, 0.0),
            Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
        ));
        let pair = MinkowskiPair::new(&ia, &ib, ConvexInfo::support, ConvexInfo::support);
        assert!(gjk(&pair).is_some());
    }
}
