//! Sphere kernels: sphere-sphere, sphere-box, sphere-capsule.

use nalgebra::{Point3, Vector3};

use super::{CollisionResult, PairContext};

const EPSILON: f64 = 1e-12;

/// Sphere A against sphere B.
pub(super) fn sphere_sphere(ctx: &PairContext, radius_a: f64, radius_b: f64) -> CollisionResult {
    let mut result = CollisionResult::none();
    let d = ctx.pos_a - ctx.pos_b;
    let center_dist = d.norm();
    let distance = center_dist - (radius_a + radius_b);
    if distance > ctx.threshold {
        return result;
    }

    // Coincident centers have no preferred direction; pick one.
    let normal = if center_dist > EPSILON {
        d / center_dist
    } else {
        Vector3::y()
    };

    let point_on_a = ctx.pos_a - normal * radius_a;
    let point_on_b = ctx.pos_b + normal * radius_b;
    result.push_world(ctx, point_on_a, point_on_b, normal, distance);
    result
}

/// Sphere A against box B.
pub(super) fn sphere_box(
    ctx: &PairContext,
    radius: f64,
    half_extents: Vector3<f64>,
) -> CollisionResult {
    let mut result = CollisionResult::none();

    // Work in the box's local frame.
    let center = ctx.orn_b.inverse() * (ctx.pos_a - ctx.pos_b);
    let clamped = Vector3::new(
        center.x.clamp(-half_extents.x, half_extents.x),
        center.y.clamp(-half_extents.y, half_extents.y),
        center.z.clamp(-half_extents.z, half_extents.z),
    );

    let delta = center - clamped;
    let outside_dist = delta.norm();

    let (local_normal, distance, local_on_box) = if outside_dist > EPSILON {
        // Center outside the box: closest point is the clamp.
        (delta / outside_dist, outside_dist - radius, clamped)
    } else {
        // Center inside the box: push out through the nearest face.
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
        return result;
    }

    let normal = ctx.orn_b * local_normal;
    let point_on_b = ctx.pos_b + ctx.orn_b * local_on_box;
    let point_on_a = ctx.pos_a - normal * radius;
    result.push_world(ctx, point_on_a, point_on_b, normal, distance);
    result
}

/// Sphere A against capsule B.
pub(super) fn sphere_capsule(
    ctx: &PairContext,
    radius: f64,
    half_length: f64,
    capsule_radius: f64,
) -> CollisionResult {
    let mut result = CollisionResult::none();

    // Closest point on the capsule's segment to the sphere center.
    let axis = ctx.orn_b * Vector3::new(0.0, half_length, 0.0);
    let t = project_on_segment(ctx.pos_a, ctx.pos_b - axis, ctx.pos_b + axis);
    let on_segment = ctx.pos_b - axis + (axis * 2.0) * t;

    let d = ctx.pos_a - on_segment;
    let center_dist = d.norm();
    let distance = center_dist - (radius + capsule_radius);
    if distance > ctx.threshold {
        return result;
    }

    let normal = if center_dist > EPSILON {
        d / center_dist
    } else {
        Vector3::y()
    };
    let point_on_a = ctx.pos_a - normal * radius;
    let point_on_b = on_segment + normal * capsule_radius;
    result.push_world(ctx, point_on_a, point_on_b, normal, distance);
    result
}

/// Parameter of the point on segment `[a, b]` closest to `p`, in `[0, 1]`.
pub(super) fn project_on_segment(p: Point3<f64>, a: Point3<f64>, b: Point3<f64>) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq < EPSILON {
        return 0.5;
    }
    ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn ctx(pos_a: Point3<f64>, pos_b: Point3<f64>) -> PairContext {
        PairContext {
            pos_a,
            orn_a: UnitQuaternion::identity(),
            pos_b,
            orn_b: UnitQuaternion::identity(),
            threshold: 0.04,
        }
    }

    #[test]
    fn test_sphere_sphere_overlap() {
        let c = ctx(Point3::new(0.0, 1.8, 0.0), Point3::origin());
        let result = sphere_sphere(&c, 1.0, 1.0);

        assert_eq!(result.points.len(), 1);
        let p = &result.points[0];
        assert_relative_eq!(p.normal, Vector3::y(), epsilon = 1e-9);
        assert_relative_eq!(p.distance, -0.2, epsilon = 1e-9);
        // Pivot on A's surface, pointing down towards B in A's frame.
        assert_relative_eq!(p.pivot_a, Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_sphere_sphere_within_threshold() {
        // Separated by 0.02, under the 0.04 threshold: still reported.
        let c = ctx(Point3::new(0.0, 2.02, 0.0), Point3::origin());
        let result = sphere_sphere(&c, 1.0, 1.0);
        assert_eq!(result.points.len(), 1);
        assert_relative_eq!(result.points[0].distance, 0.02, epsilon = 1e-9);
    }

    #[test]
    fn test_sphere_box_face_contact() {
        // Sphere resting on top of a unit cube.
        let c = ctx(Point3::new(0.0, 1.45, 0.0), Point3::origin());
        let result = sphere_box(&c, 0.5, Vector3::new(1.0, 1.0, 1.0));

        assert_eq!(result.points.len(), 1);
        let p = &result.points[0];
        assert_relative_eq!(p.normal, Vector3::y(), epsilon = 1e-9);
        assert_relative_eq!(p.distance, -0.05, epsilon = 1e-9);
        assert_relative_eq!(p.pivot_b, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_sphere_deep_inside_box_pushes_out_nearest_face() {
        let c = ctx(Point3::new(0.0, 0.8, 0.0), Point3::origin());
        let result = sphere_box(&c, 0.1, Vector3::new(1.0, 1.0, 1.0));

        assert_eq!(result.points.len(), 1);
        let p = &result.points[0];
        assert_relative_eq!(p.normal, Vector3::y(), epsilon = 1e-9);
        assert!(p.distance < 0.0);
    }

    #[test]
    fn test_sphere_capsule_side_contact() {
        let c = ctx(Point3::new(0.7, 0.5, 0.0), Point3::origin());
        let result = sphere_capsule(&c, 0.25, 1.0, 0.5);

        assert_eq!(result.points.len(), 1);
        let p = &result.points[0];
        assert_relative_eq!(p.normal, Vector3::x(), epsilon = 1e-9);
        assert_relative_eq!(p.distance, -0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_project_on_segment_clamps() {
        let a = Point3::new(0.0, -1.0, 0.0);
        let b = Point3::new(0.0, 1.0, 0.0);
        assert_relative_eq!(
            project_on_segment(Point3::new(0.0, 5.0, 0.0), a, b),
            1.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            project_on_segment(Point3::new(1.0, 0.0, 0.0), a, b),
            0.5,
            epsilon = 1e-12
        );
    }
}
