//! Box-box collision via the separating axis test.
//!
//! The deepest axis among the six face normals and nine edge cross products
//! selects the contact feature. Face contacts clip the incident face against
//! the reference face's side planes, producing up to four points; edge
//! contacts yield the closest point pair of the two supporting edges.

use nalgebra::{Point3, Vector3};

use super::{CollisionResult, PairContext};

const EPSILON: f64 = 1e-10;
/// Edge axes must beat face axes by this margin to win, which keeps face
/// contacts stable when the two are nearly tied.
const EDGE_BIAS: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Feature {
    FaceA(usize),
    FaceB(usize),
    Edge(usize, usize),
}

struct OrientedBox {
    center: Point3<f64>,
    axes: [Vector3<f64>; 3],
    extents: Vector3<f64>,
}

impl OrientedBox {
    fn project(&self, axis: &Vector3<f64>) -> f64 {
        self.extents.x * self.axes[0].dot(axis).abs()
            + self.extents.y * self.axes[1].dot(axis).abs()
            + self.extents.z * self.axes[2].dot(axis).abs()
    }

    /// Corners of the face whose outward normal is `sign * axes[i]`.
    fn face_corners(&self, i: usize, sign: f64) -> [Point3<f64>; 4] {
        let u = (i + 1) % 3;
        let v = (i + 2) % 3;
        let c = self.center + self.axes[i] * (sign * self.extents[i]);
        let du = self.axes[u] * self.extents[u];
        let dv = self.axes[v] * self.extents[v];
        [c + du + dv, c - du + dv, c - du - dv, c + du - dv]
    }
}

/// Box A against box B.
pub(super) fn box_box(
    ctx: &PairContext,
    extents_a: Vector3<f64>,
    extents_b: Vector3<f64>,
) -> CollisionResult {
    let box_a = OrientedBox {
        center: ctx.pos_a,
        axes: [
            ctx.orn_a * Vector3::x(),
            ctx.orn_a * Vector3::y(),
            ctx.orn_a * Vector3::z(),
        ],
        extents: extents_a,
    };
    let box_b = OrientedBox {
        center: ctx.pos_b,
        axes: [
            ctx.orn_b * Vector3::x(),
            ctx.orn_b * Vector3::y(),
            ctx.orn_b * Vector3::z(),
        ],
        extents: extents_b,
    };

    let d = ctx.pos_a - ctx.pos_b;

    let mut best_sep = f64::NEG_INFINITY;
    let mut best_feature = Feature::FaceA(0);
    let mut best_axis = Vector3::y();

    let consider = |axis: Vector3<f64>, feature: Feature, best_sep: &mut f64,
                        best_feature: &mut Feature, best_axis: &mut Vector3<f64>|
     -> bool {
        // Orient the axis from B towards A.
        let axis = if d.dot(&axis) < 0.0 { -axis } else { axis };
        let sep = d.dot(&axis) - (box_a.project(&axis) + box_b.project(&axis));
        if sep > ctx.threshold {
            return false; // Separated beyond interest.
        }
        let bias = if matches!(feature, Feature::Edge(_, _)) {
            EDGE_BIAS
        } else {
            0.0
        };
        if sep > *best_sep + bias {
            *best_sep = sep;
            *best_feature = feature;
            *best_axis = axis;
        }
        true
    };

    for i in 0..3 {
        if !consider(
            box_a.axes[i],
            Feature::FaceA(i),
            &mut best_sep,
            &mut best_feature,
            &mut best_axis,
        ) {
            return CollisionResult::none();
        }
        if !consider(
            box_b.axes[i],
            Feature::FaceB(i),
            &mut best_sep,
            &mut best_feature,
            &mut best_axis,
        ) {
            return CollisionResult::none();
        }
    }

    for i in 0..3 {
        for j in 0..3 {
            let cross = box_a.axes[i].cross(&box_b.axes[j]);
            let len = cross.norm();
            if len < EPSILON {
                continue; // Parallel edges; the face axes cover this case.
            }
            if !consider(
                cross / len,
                Feature::Edge(i, j),
                &mut best_sep,
                &mut best_feature,
                &mut best_axis,
            ) {
                return CollisionResult::none();
            }
        }
    }

    match best_feature {
        Feature::FaceA(i) => face_contact(ctx, &box_a, &box_b, i, best_axis, true),
        Feature::FaceB(i) => face_contact(ctx, &box_b, &box_a, i, best_axis, false),
        Feature::Edge(i, j) => edge_contact(ctx, &box_a, &box_b, i, j, best_axis),
    }
}

/// Clip the incident face against the reference face's side planes.
///
/// `normal` points from B towards A and is the final contact normal.
fn face_contact(
    ctx: &PairContext,
    reference: &OrientedBox,
    incident: &OrientedBox,
    ref_axis: usize,
    normal: Vector3<f64>,
    reference_is_a: bool,
) -> CollisionResult {
    let mut result = CollisionResult::none();

    // Outward normal of the reference face, towards the incident box.
    let ref_out = if reference_is_a { -normal } else { normal };

    // Incident face: outward normal most anti-parallel to `ref_out`.
    let mut inc_axis = 0;
    let mut inc_align = -1.0;
    for (i, axis) in incident.axes.iter().enumerate() {
        let align = axis.dot(&ref_out).abs();
        if align > inc_align {
            inc_align = align;
            inc_axis = i;
        }
    }
    let inc_sign = if incident.axes[inc_axis].dot(&ref_out) < 0.0 {
        1.0
    } else {
        -1.0
    };

    let mut polygon: Vec<Point3<f64>> = incident.face_corners(inc_axis, inc_sign).to_vec();

    // Clip against the four side planes of the reference face.
    let u = (ref_axis + 1) % 3;
    let v = (ref_axis + 2) % 3;
    for &(axis, extent) in &[(u, reference.extents[u]), (v, reference.extents[v])] {
        for sign in [1.0, -1.0] {
            let plane_normal = reference.axes[axis] * sign;
            let offset = plane_normal.dot(&reference.center.coords) + extent;
            polygon = clip_polygon(&polygon, &plane_normal, offset);
            if polygon.is_empty() {
                return result;
            }
        }
    }

    // Keep clipped points near or below the reference face plane.
    for q in polygon {
        let separation =
            ref_out.dot(&(q - reference.center)) - reference.extents[ref_axis];
        if separation > ctx.threshold {
            continue;
        }
        let on_reference = q - ref_out * separation;
        let (point_on_a, point_on_b) = if reference_is_a {
            (on_reference, q)
        } else {
            (q, on_reference)
        };
        result.push_world(ctx, point_on_a, point_on_b, normal, separation);
    }

    result
}

/// Closest points of the two supporting edges.
fn edge_contact(
    ctx: &PairContext,
    box_a: &OrientedBox,
    box_b: &OrientedBox,
    edge_a: usize,
    edge_b: usize,
    normal: Vector3<f64>,
) -> CollisionResult {
    let mut result = CollisionResult::none();

    // Supporting edge of A in the -normal direction (towards B).
    let mut mid_a = box_a.center;
    for k in 0..3 {
        if k != edge_a {
            let sign = if box_a.axes[k].dot(&normal) > 0.0 { -1.0 } else { 1.0 };
            mid_a += box_a.axes[k] * (sign * box_a.extents[k]);
        }
    }
    // Supporting edge of B in the +normal direction (towards A).
    let mut mid_b = box_b.center;
    for k in 0..3 {
        if k != edge_b {
            let sign = if box_b.axes[k].dot(&normal) > 0.0 { 1.0 } else { -1.0 };
            mid_b += box_b.axes[k] * (sign * box_b.extents[k]);
        }
    }

    let half_a = box_a.axes[edge_a] * box_a.extents[edge_a];
    let half_b = box_b.axes[edge_b] * box_b.extents[edge_b];
    let (on_a, on_b) = closest_points_on_segments(
        mid_a - half_a,
        mid_a + half_a,
        mid_b - half_b,
        mid_b + half_b,
    );

    let separation = normal.dot(&(on_a - on_b));
    if separation <= ctx.threshold {
        result.push_world(ctx, on_a, on_b, normal, separation);
    }
    result
}

/// Sutherland-Hodgman clip of a polygon against `dot(p, normal) <= offset`.
fn clip_polygon(
    polygon: &[Point3<f64>],
    normal: &Vector3<f64>,
    offset: f64,
) -> Vec<Point3<f64>> {
    let mut out = Vec::with_capacity(polygon.len() + 1);
    for (i, &current) in polygon.iter().enumerate() {
        let next = polygon[(i + 1) % polygon.len()];
        let d_current = normal.dot(&current.coords) - offset;
        let d_next = normal.dot(&next.coords) - offset;

        if d_current <= 0.0 {
            out.push(current);
        }
        if (d_current < 0.0) != (d_next < 0.0) && (d_current - d_next).abs() > EPSILON {
            let t = d_current / (d_current - d_next);
            out.push(current + (next - current) * t);
        }
    }
    out
}

/// Closest points between segments `[p1, q1]` and `[p2, q2]`.
fn closest_points_on_segments(
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
    let f = d2.dot(&r);

    let (s, t);
    if a <= EPSILON && e <= EPSILON {
        (s, t) = (0.0, 0.0);
    } else if a <= EPSILON {
        s = 0.0;
        t = (f / e).clamp(0.0, 1.0);
    } else {
        let c = d1.dot(&r);
        if e <= EPSILON {
            t = 0.0;
            s = (-c / a).clamp(0.0, 1.0);
        } else {
            let b = d1.dot(&d2);
            let denom = a * e - b * b;
            let s_unclamped = if denom > EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let t_unclamped = (b * s_unclamped + f) / e;
            if t_unclamped < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t_unclamped > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            } else {
                t = t_unclamped;
                s = s_unclamped;
            }
        }
    }

    (p1 + d1 * s, p2 + d2 * t)
}
