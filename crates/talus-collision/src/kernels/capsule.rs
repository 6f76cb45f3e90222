//! Capsule kernels: capsule-box and capsule-capsule.

use nalgebra::{Point3, Vector3};

use super::sphere::project_on_segment;
use super::{CollisionResult, PairContext};

const EPSILON: f64 = 1e-10;
/// Segment directions this aligned are treated as parallel and produce a
/// two-point contact.
const PARALLEL_DOT: f64 = 0.999;

/// Capsule A against box B.
///
/// The capsule is reduced to spheres at its two cap centers plus, when the
/// segment's interior comes closest to the box, a sphere at that interior
/// point. Near-duplicate candidates collapse in manifold persistence.
pub(super) fn capsule_box(
    ctx: &PairContext,
    half_length: f64,
    radius: f64,
    half_extents: Vector3<f64>,
) -> CollisionResult {
    let mut result = CollisionResult::none();
    let axis = ctx.orn_a * Vector3::new(0.0, half_length, 0.0);
    let ends = [ctx.pos_a - axis, ctx.pos_a + axis];

    let mut centers: Vec<Point3<f64>> = ends.to_vec();

    // Closest interior point of the segment to the box center.
    let t = project_on_segment(ctx.pos_b, ends[0], ends[1]);
    if t > 0.05 && t < 0.95 {
        centers.push(ends[0] + (ends[1] - ends[0]) * t);
    }

    for center in centers {
        sphere_against_box(ctx, center, radius, half_extents, &mut result);
    }
    result
}

fn sphere_against_box(
    ctx: &PairContext,
    center_world: Point3<f64>,
    radius: f64,
    half_extents: Vector3<f64>,
    result: &mut CollisionResult,
) {
    let center = ctx.orn_b.inverse() * (center_world - ctx.pos_b);
    let clamped = Vector3::new(
        center.x.clamp(-half_extents.x, half_extents.x),
        center.y.clamp(-half_extents.y, half_extents.y),
        center.z.clamp(-half_extents.z, half_extents.z),
    );
    let delta = center - clamped;
    let outside = delta.norm();

    let (local_normal, distance, local_on_box) = if outside > EPSILON {
        (delta / outside, outside - radius, clamped)
    } else {
        let mut best_axis = 0;
        let mut best_depth = f64::INFINITY;
        for axis in 0..3 {
            let depth = half_extents[axis] - center[axis].abs();
            if depth < best_depth {
                best_depth = depth;
                best_axis = axis;
            }
        }
        let mut normal = Vector3::zeros();
        normal[best_axis] = center[best_axis].signum();
        let mut on_face = center;
        on_face[best_axis] = half_extents[best_axis] * normal[best_axis];
        (normal, -(best_depth + radius), on_face)
    };

    if distance > ctx.threshold {
        return;
    }

    let normal = ctx.orn_b * local_normal;
    let point_on_b = ctx.pos_b + ctx.orn_b * local_on_box;
    let point_on_a = center_world - normal * radius;
    result.push_world(ctx, point_on_a, point_on_b, normal, distance);
}

/// Capsule A against capsule B.
pub(super) fn capsule_capsule(
    ctx: &PairContext,
    half_length_a: f64,
    radius_a: f64,
    half_length_b: f64,
    radius_b: f64,
) -> CollisionResult {
    let mut result = CollisionResult::none();

    let axis_a = ctx.orn_a * Vector3::new(0.0, half_length_a, 0.0);
    let axis_b = ctx.orn_b * Vector3::new(0.0, half_length_b, 0.0);
    let (a0, a1) = (ctx.pos_a - axis_a, ctx.pos_a + axis_a);
    let (b0, b1) = (ctx.pos_b - axis_b, ctx.pos_b + axis_b);

    let dir_a = axis_a.normalize();
    let dir_b = axis_b.normalize();

    if dir_a.dot(&dir_b).abs() > PARALLEL_DOT {
        // Parallel capsules: contact along the overlapping interval. Project
        // B's endpoints onto A's segment and emit a point per endpoint.
        for endpoint in [b0, b1] {
            let t = project_on_segment(endpoint, a0, a1);
            let on_a = a0 + (a1 - a0) * t;
            let on_b_t = project_on_segment(on_a, b0, b1);
            let on_b = b0 + (b1 - b0) * on_b_t;
            push_capsule_point(ctx, on_a, on_b, radius_a, radius_b, &mut result);
        }
    } else {
        let (on_a, on_b) = closest_points(a0, a1, b0, b1);
        push_capsule_point(ctx, on_a, on_b, radius_a, radius_b, &mut result);
    }
    result
}

fn push_capsule_point(
    ctx: &PairContext,
    on_a: Point3<f64>,
    on_b: Point3<f64>,
    radius_a: f64,
    radius_b: f64,
    result: &mut CollisionResult,
) {
    let d = on_a - on_b;
    let center_dist = d.norm();
    let distance = center_dist - (radius_a + radius_b);
    if distance > ctx.threshold {
        return;
    }
    let normal = if center_dist > EPSILON {
        d / center_dist
    } else {
        Vector3::y()
    };
    let point_on_a = on_a - normal * radius_a;
    let point_on_b = on_b + normal * radius_b;
    result.push_world(ctx, point_on_a, point_on_b, normal, distance);
}

/// Closest points between two segments.
fn closest_points(
    p1: Point3<f64>,
    q1: Point3<f64>,
    p2: Point3<f64>,
    q2: Point3<f64>,
) -> (Point3<f64>, Point3<f64>) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.norm_squared();
    let e = d2.norm_squared();
    let b = d1.dot(&d2);
    let c = d1.dot(&r);
    let f = d2.dot(&r);

    let denom = a * e - b * b;
    let s = if denom > EPSILON {
        ((b * f - c * e) / denom).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let t_unclamped = (b * s + f) / e;
    let (s, t) = if t_unclamped < 0.0 {
        ((-c / a).clamp(0.0, 1.0), 0.0)
    } else if t_unclamped > 1.0 {
        (((b - c) / a).clamp(0.0, 1.0), 1.0)
    } else {
        (s, t_unclamped)
    };

    (p1 + d1 * s, p2 + d2 * t)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    #[test]
    fn test_capsule_lying_on_box_gets_two_points() {
        // Capsule rotated to lie along X, resting on a box top at y = 0.5.
        let orn = UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let ctx = PairContext {
            pos_a: Point3::new(0.0, 0.74, 0.0),
            orn_a: orn,
            pos_b: Point3::origin(),
            orn_b: UnitQuaternion::identity(),
            threshold: 0.04,
        };
        let result = capsule_box(&ctx, 1.0, 0.25, Vector3::new(2.0, 0.5, 2.0));

        assert!(result.points.len() >= 2);
        for p in &result.points {
            assert_relative_eq!(p.normal, Vector3::y(), epsilon = 1e-9);
            assert_relative_eq!(p.distance, -0.01, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_parallel_capsules_touch_along_length() {
        let ctx = PairContext {
            pos_a: Point3::new(0.45, 0.0, 0.0),
            orn_a: UnitQuaternion::identity(),
            pos_b: Point3::origin(),
            orn_b: UnitQuaternion::identity(),
            threshold: 0.04,
        };
        let result = capsule_capsule(&ctx, 1.0, 0.25, 1.0, 0.25);

        assert_eq!(result.points.len(), 2);
        for p in &result.points {
            assert_relative_eq!(p.normal, Vector3::x(), epsilon = 1e-9);
            assert_relative_eq!(p.distance, -0.05, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_crossed_capsules_single_point() {
        let orn = UnitQuaternion::from_euler_angles(std::f64::consts::FRAC_PI_2, 0.0, 0.0);
        let ctx = PairContext {
            pos_a: Point3::new(0.0, 0.45, 0.0),
            orn_a: UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            pos_b: Point3::origin(),
            orn_b: orn,
            threshold: 0.04,
        };
        let result = capsule_capsule(&ctx, 1.0, 0.25, 1.0, 0.25);

        assert_eq!(result.points.len(), 1);
        assert!(result.points[0].normal.y > 0.99);
    }
}
