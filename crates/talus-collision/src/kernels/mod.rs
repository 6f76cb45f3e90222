//! Shape-pair collision kernels and their dispatch table.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use smallvec::SmallVec;
use talus_types::Shape;

mod boxes;
mod capsule;
mod sphere;

/// A candidate contact produced by a kernel.
///
/// Pivots are in each body's local frame; the normal is in world space and
/// points from body B towards body A.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePoint {
    /// Contact pivot in A's local frame.
    pub pivot_a: Vector3<f64>,
    /// Contact pivot in B's local frame.
    pub pivot_b: Vector3<f64>,
    /// World-space contact normal, from B towards A, unit length.
    pub normal: Vector3<f64>,
    /// Signed distance along the normal; negative means penetrating.
    pub distance: f64,
}

/// The set of candidate points for one shape pair.
#[derive(Debug, Clone, Default)]
pub struct CollisionResult {
    /// Candidate points, at most a handful per pair.
    pub points: SmallVec<[CandidatePoint; 8]>,
}

impl CollisionResult {
    /// A result with no contact.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Add a candidate point from world-space data.
    pub(crate) fn push_world(
        &mut self,
        ctx: &PairContext,
        point_on_a: Point3<f64>,
        point_on_b: Point3<f64>,
        normal: Vector3<f64>,
        distance: f64,
    ) {
        self.points.push(CandidatePoint {
            pivot_a: ctx.orn_a.inverse() * (point_on_a - ctx.pos_a),
            pivot_b: ctx.orn_b.inverse() * (point_on_b - ctx.pos_b),
            normal,
            distance,
        });
    }

    /// Swap the roles of A and B in every point.
    #[must_use]
    fn swapped(mut self) -> Self {
        for point in &mut self.points {
            std::mem::swap(&mut point.pivot_a, &mut point.pivot_b);
            point.normal = -point.normal;
        }
        self
    }
}

/// World-space configuration of a shape pair during one kernel run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PairContext {
    pub pos_a: Point3<f64>,
    pub orn_a: UnitQuaternion<f64>,
    pub pos_b: Point3<f64>,
    pub orn_b: UnitQuaternion<f64>,
    /// Candidates farther apart than this are discarded.
    pub threshold: f64,
}

impl PairContext {
    fn swapped(&self) -> Self {
        Self {
            pos_a: self.pos_b,
            orn_a: self.orn_b,
            pos_b: self.pos_a,
            orn_b: self.orn_a,
            threshold: self.threshold,
        }
    }
}

/// Compute contact candidates between two posed shapes.
///
/// Dispatches on the `(Shape, Shape)` tag pair. Swap-symmetric pairs run the
/// canonical kernel with the arguments exchanged and flip the result's
/// pivots and normal.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn collide(
    shape_a: &Shape,
    pos_a: Point3<f64>,
    orn_a: UnitQuaternion<f64>,
    shape_b: &Shape,
    pos_b: Point3<f64>,
    orn_b: UnitQuaternion<f64>,
    threshold: f64,
) -> CollisionResult {
    let ctx = PairContext {
        pos_a,
        orn_a,
        pos_b,
        orn_b,
        threshold,
    };

    match (shape_a, shape_b) {
        (Shape::Sphere { radius: ra }, Shape::Sphere { radius: rb }) => {
            sphere::sphere_sphere(&ctx, *ra, *rb)
        }
        (Shape::Sphere { radius }, Shape::Box { half_extents }) => {
            sphere::sphere_box(&ctx, *radius, *half_extents)
        }
        (Shape::Box { half_extents }, Shape::Sphere { radius }) => {
            sphere::sphere_box(&ctx.swapped(), *radius, *half_extents).swapped()
        }
        (Shape::Box { half_extents: ea }, Shape::Box { half_extents: eb }) => {
            boxes::box_box(&ctx, *ea, *eb)
        }
        (
            Shape::Sphere { radius },
            Shape::Capsule {
                half_length,
                radius: cr,
            },
        ) => sphere::sphere_capsule(&ctx, *radius, *half_length, *cr),
        (
            Shape::Capsule {
                half_length,
                radius: cr,
            },
            Shape::Sphere { radius },
        ) => sphere::sphere_capsule(&ctx.swapped(), *radius, *half_length, *cr).swapped(),
        (
            Shape::Capsule {
                half_length,
                radius,
            },
            Shape::Box { half_extents },
        ) => capsule::capsule_box(&ctx, *half_length, *radius, *half_extents),
        (
            Shape::Box { half_extents },
            Shape::Capsule {
                half_length,
                radius,
            },
        ) => capsule::capsule_box(&ctx.swapped(), *half_length, *radius, *half_extents).swapped(),
        (
            Shape::Capsule {
                half_length: la,
                radius: ra,
            },
            Shape::Capsule {
                half_length: lb,
                radius: rb,
            },
        ) => capsule::capsule_capsule(&ctx, *la, *ra, *lb, *rb),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_swap_wrapper_flips_result() {
        // Box below, sphere above: run both orderings and compare.
        let sphere = Shape::sphere(0.5);
        let cube = Shape::box_shape(Vector3::new(1.0, 1.0, 1.0));
        let sphere_pos = Point3::new(0.0, 1.4, 0.0);
        let box_pos = Point3::origin();
        let id = UnitQuaternion::identity();

        let direct = collide(&sphere, sphere_pos, id, &cube, box_pos, id, 0.04);
        let flipped = collide(&cube, box_pos, id, &sphere, sphere_pos, id, 0.04);

        assert_eq!(direct.points.len(), 1);
        assert_eq!(flipped.points.len(), 1);

        let d = &direct.points[0];
        let f = &flipped.points[0];
        assert_relative_eq!(d.normal, -f.normal, epsilon = 1e-9);
        assert_relative_eq!(d.pivot_a, f.pivot_b, epsilon = 1e-9);
        assert_relative_eq!(d.pivot_b, f.pivot_a, epsilon = 1e-9);
        assert_relative_eq!(d.distance, f.distance, epsilon = 1e-9);
    }

    #[test]
    fn test_separated_pair_yields_no_points() {
        let a = Shape::sphere(0.5);
        let b = Shape::sphere(0.5);
        let id = UnitQuaternion::identity();
        let result = collide(
            &a,
            Point3::new(0.0, 5.0, 0.0),
            id,
            &b,
            Point3::origin(),
            id,
            0.04,
        );
        assert!(result.points.is_empty());
    }
}
