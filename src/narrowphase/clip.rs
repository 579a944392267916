//! Contact point generation from a penetration normal.
//!
//! Single-point features (sphere surfaces, capsule caps, cylinder rims) give
//! one contact. Faces and segments are clipped against each other
//! Sutherland–Hodgman style: the feature with more vertices is the
//! reference, the other the incident, and incident vertices that survive the
//! reference's side planes and lie beneath its plane become contacts.

use glam::Vec3;

use crate::collider::{ConvexInfo, Polygon};
use crate::math::tangent_basis;

use super::epa::Penetration;

/// Most contact points kept per manifold.
pub const MAX_MANIFOLD_POINTS: usize = 4;

/// Segments whose directions are closer than this (|cos|) are treated as parallel.
const PARALLEL_COS: f32 = 0.99;

/// A world-space contact: the deepest point of each shape inside the other.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContactPair {
    pub point_a: Vec3,
    pub point_b: Vec3,
    /// Penetration depth, non-negative. `point_a - point_b = normal * depth`.
    pub depth: f32,
}

/// Up to [`MAX_MANIFOLD_POINTS`] contacts sharing one normal.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollisionPoints {
    /// Unit normal from shape A towards shape B.
    pub normal: Vec3,
    points: [ContactPair; MAX_MANIFOLD_POINTS],
    count: usize,
}

impl CollisionPoints {
    pub fn new(normal: Vec3) -> Self {
        Self {
            normal,
            ..Default::default()
        }
    }

    #[inline]
    pub fn points(&self) -> &[ContactPair] {
        &self.points[..self.count]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn push(&mut self, pair: ContactPair) {
        if self.count < MAX_MANIFOLD_POINTS {
            self.points[self.count] = pair;
            self.count += 1;
        }
    }
}

/// One contact at `p`, a point of shape A.
pub fn point_on_a(p: Vec3, pen: &Penetration) -> CollisionPoints {
    let mut out = CollisionPoints::new(pen.normal);
    out.push(ContactPair {
        point_a: p,
        point_b: p - pen.normal * pen.depth,
        depth: pen.depth,
    });
    out
}

/// One contact at `q`, a point of shape B.
pub fn point_on_b(q: Vec3, pen: &Penetration) -> CollisionPoints {
    let mut out = CollisionPoints::new(pen.normal);
    out.push(ContactPair {
        point_a: q + pen.normal * pen.depth,
        point_b: q,
        depth: pen.depth,
    });
    out
}

/// Contact points for two features facing each other along the normal.
pub fn find_collision_points(a: &ConvexInfo, b: &ConvexInfo, pen: &Penetration) -> CollisionPoints {
    let n = pen.normal;
    let feature_a = a.feature(n);
    let feature_b = b.feature(-n);

    if feature_a.len() == 1 {
        return point_on_a(feature_a.points()[0], pen);
    }
    if feature_b.len() == 1 {
        return point_on_b(feature_b.points()[0], pen);
    }
    if feature_a.len() == 2 && feature_b.len() == 2 {
        let (pa, qa) = (feature_a.points()[0], feature_a.points()[1]);
        let (pb, qb) = (feature_b.points()[0], feature_b.points()[1]);
        let da = (qa - pa).normalize_or_zero();
        let db = (qb - pb).normalize_or_zero();
        if da.dot(db).abs() < PARALLEL_COS {
            let (_, on_b) = closest_points_on_segments(pa, qa, pb, qb);
            return point_on_b(on_b, pen);
        }
    }

    let flip = feature_a.len() < feature_b.len();
    let (reference, incident, ref_normal) = if flip {
        (&feature_b, &feature_a, -n)
    } else {
        (&feature_a, &feature_b, n)
    };

    let clipped = clip_polygon(incident, reference, ref_normal);
    let origin = reference.points()[0];

    let mut candidates = [ContactPair::default(); crate::collider::MAX_POLYGON_POINTS];
    let mut count = 0;
    for &x in clipped.points() {
        let depth = -(x - origin).dot(ref_normal);
        if depth < 0.0 {
            continue;
        }
        candidates[count] = if flip {
            ContactPair {
                point_a: x,
                point_b: x - n * depth,
                depth,
            }
        } else {
            ContactPair {
                point_a: x + n * depth,
                point_b: x,
                depth,
            }
        };
        count += 1;
    }

    if count == 0 {
        return point_on_a(a.support(n), pen);
    }

    let mut out = reduce(&candidates[..count], n);
    sort_clockwise(&mut out.points[..out.count], n);
    out
}

/// Clip `incident` against the side planes of `reference`.
pub fn clip_polygon(incident: &Polygon, reference: &Polygon, normal: Vec3) -> Polygon {
    let mut output = *incident;
    let r = reference.points();
    match r.len() {
        0 | 1 => {}
        2 => {
            let dir = (r[1] - r[0]).normalize_or_zero();
            output = clip_plane(&output, r[0], -dir);
            output = clip_plane(&output, r[1], dir);
        }
        m => {
            let centroid = reference.centroid();
            for i in 0..m {
                let p = r[i];
                let q = r[(i + 1) % m];
                let mut side = (q - p).cross(normal).normalize_or_zero();
                if side.dot(centroid - p) > 0.0 {
                    side = -side;
                }
                output = clip_plane(&output, p, side);
                if output.is_empty() {
                    break;
                }
            }
        }
    }
    output
}

/// Keep the part of `polygon` with `(x - origin) . plane_normal <= 0`.
fn clip_plane(polygon: &Polygon, origin: Vec3, plane_normal: Vec3) -> Polygon {
    let distance = |x: Vec3| (x - origin).dot(plane_normal);
    let points = polygon.points();
    let mut out = Polygon::new();

    match points.len() {
        0 => {}
        1 => {
            if distance(points[0]) <= 0.0 {
                out.push(points[0]);
            }
        }
        2 => {
            let (p, q) = (points[0], points[1]);
            let (dp, dq) = (distance(p), distance(q));
            if dp <= 0.0 {
                out.push(p);
            }
            if (dp < 0.0 && dq > 0.0) || (dp > 0.0 && dq < 0.0) {
                out.push(p + (q - p) * (dp / (dp - dq)));
            }
            if dq <= 0.0 {
                out.push(q);
            }
        }
        len => {
            for i in 0..len {
                let current = points[i];
                let previous = points[(i + len - 1) % len];
                let (dc, dp) = (distance(current), distance(previous));
                if dc <= 0.0 {
                    if dp > 0.0 {
                        out.push(previous + (current - previous) * (dp / (dp - dc)));
                    }
                    out.push(current);
                } else if dp <= 0.0 {
                    out.push(previous + (current - previous) * (dp / (dp - dc)));
                }
            }
        }
    }
    out
}

/// Keep at most four contacts: the deepest, the one farthest from it, the
/// one spanning the largest triangle, and the one farthest outside that
/// triangle.
fn reduce(candidates: &[ContactPair], normal: Vec3) -> CollisionPoints {
    let mut out = CollisionPoints::new(normal);
    if candidates.len() <= MAX_MANIFOLD_POINTS {
        for &pair in candidates {
            out.push(pair);
        }
        return out;
    }

    let position = |i: usize| candidates[i].point_b;
    let argmax = |score: &dyn Fn(usize) -> f32, taken: &[usize]| {
        (0..candidates.len())
            .filter(|i| !taken.contains(i))
            .max_by(|&x, &y| score(x).total_cmp(&score(y)))
    };

    let deepest = argmax(&|i| candidates[i].depth, &[]).unwrap_or(0);
    let mut chosen = [deepest; MAX_MANIFOLD_POINTS];
    let mut count = 1;

    let p1 = position(deepest);
    if let Some(i) = argmax(&|i| position(i).distance_squared(p1), &chosen[..count]) {
        chosen[count] = i;
        count += 1;
    }

    if count == 2 {
        let p2 = position(chosen[1]);
        let area = |i: usize| (p2 - p1).cross(position(i) - p1).dot(normal);
        if let Some(i) = argmax(&|i| area(i).abs(), &chosen[..count]) {
            chosen[count] = i;
            count += 1;

            let p3 = position(i);
            let winding = area(i).signum();
            let triangle = [p1, p2, p3];
            // Most negative edge function means farthest outside.
            let outside = |k: usize| {
                let x = position(k);
                let inside = (0..3)
                    .map(|e| {
                        let s = triangle[e];
                        let t = triangle[(e + 1) % 3];
                        winding * (t - s).cross(x - s).dot(normal)
                    })
                    .fold(f32::MAX, f32::min);
                -inside
            };
            if let Some(k) = argmax(&outside, &chosen[..count]) {
                if outside(k) > 0.0 {
                    chosen[count] = k;
                    count += 1;
                }
            }
        }
    }

    for &i in &chosen[..count] {
        out.push(candidates[i]);
    }
    out
}

/// Order contacts clockwise around their centroid as seen from `+normal`.
pub fn sort_clockwise(points: &mut [ContactPair], normal: Vec3) {
    if points.len() < 3 {
        return;
    }
    let centroid = points.iter().map(|p| p.point_b).sum::<Vec3>() / points.len() as f32;
    let (u, v) = tangent_basis(normal);
    let angle = |p: &ContactPair| {
        let d = p.point_b - centroid;
        d.dot(v).atan2(d.dot(u))
    };
    points.sort_by(|x, y| angle(y).total_cmp(&angle(x)));
}

/// Closest points between segments `p1q1` and `p2q2`.
pub fn closest_points_on_segments(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (Vec3, Vec3) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    if a <= f32::EPSILON && e <= f32::EPSILON {
        return (p1, p2);
    }

    let (s, t) = if a <= f32::EPSILON {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= f32::EPSILON {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom > f32::EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };

    (p1 + d1 * s, p2 + d2 * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;
    use crate::shape::Shape;
    use glam::Quat;

    fn resting_box_points(offset: Vec3, rotation: Quat) -> CollisionPoints {
        let ground = Shape::cuboid(Vec3::new(5.0, 0.5, 5.0)).shape_info(&Transform::IDENTITY);
        let b = Shape::cuboid(Vec3::splat(0.5))
            .shape_info(&Transform::new(Vec3::new(0.0, 0.95, 0.0) + offset, rotation));
        let pen = Penetration {
            normal: Vec3::Y,
            depth: 0.05,
        };
        find_collision_points(&ground, &b, &pen)
    }

    #[test]
    fn test_box_on_ground_has_four_points() {
        let points = resting_box_points(Vec3::ZERO, Quat::IDENTITY);
        assert_eq!(points.len(), 4);
        for p in points.points() {
            assert!(p.depth >= 0.0);
            assert!((p.depth - 0.05).abs() < 1e-4);
            assert!((p.point_a.y - 0.5).abs() < 1e-4);
            assert!((p.point_b.y - 0.45).abs() < 1e-4);
        }
        assert!((points.normal.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_points_sorted_clockwise() {
        let points = resting_box_points(Vec3::ZERO, Quat::from_rotation_y(0.3));
        let (u, v) = tangent_basis(Vec3::Y);
        let c = points.points().iter().map(|p| p.point_b).sum::<Vec3>() / 4.0;
        let angles: Vec<f32> = points
            .points()
            .iter()
            .map(|p| (p.point_b - c).dot(v).atan2((p.point_b - c).dot(u)))
            .collect();
        for w in angles.windows(2) {
            assert!(w[0] >= w[1]);
        }
    }

    #[test]
    fn test_sphere_feature_gives_single_point() {
        let sphere = Shape::sphere(0.5).shape_info(&Transform::IDENTITY);
        let b = Shape::cuboid(Vec3::splat(0.5))
            .shape_info(&Transform::from_position(Vec3::new(0.9, 0.0, 0.0)));
        let pen = Penetration {
            normal: Vec3::X,
            depth: 0.1,
        };
        let points = find_collision_points(&sphere, &b, &pen);
        assert_eq!(points.len(), 1);
        let p = points.points()[0];
        assert!((p.point_a - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-5);
        assert!((p.point_b - Vec3::new(0.4, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_crossed_capsules_single_point() {
        let a = Shape::capsule(0.25, 1.0).shape_info(&Transform::new(
            Vec3::ZERO,
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        ));
        let b = Shape::capsule(0.25, 1.0).shape_info(&Transform::new(
            Vec3::new(0.0, 0.45, 0.0),
            Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
        ));
        let pen = Penetration {
            normal: Vec3::Y,
            depth: 0.05,
        };
        let points = find_collision_points(&a, &b, &pen);
        assert_eq!(points.len(), 1);
        assert!(points.points()[0].point_b.length() < 0.25);
    }

    #[test]
    fn test_reduce_keeps_corners() {
        let mut candidates = Vec::new();
        for i in 0..8 {
            let angle = std::f32::consts::TAU * i as f32 / 8.0;
            let p = Vec3::new(angle.cos(), 0.0, angle.sin());
            candidates.push(ContactPair {
                point_a: p,
                point_b: p,
                depth: if i == 0 { 0.2 } else { 0.1 },
            });
        }
        let kept = reduce(&candidates, Vec3::Y);
        assert_eq!(kept.len(), 4);
        assert_eq!(kept.points()[0].depth, 0.2);
    }

    #[test]
    fn test_segment_closest_points() {
        let (a, b) = closest_points_on_segments(
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, -1.0),
            Vec3::new(0.0, 1.0, 1.0),
        );
        assert!(a.length() < 1e-5);
        assert!((b - Vec3::Y).length() < 1e-5);
    }
}
