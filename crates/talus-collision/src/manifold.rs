//! Contact point persistence.
//!
//! Candidate points from the kernels are folded into the manifold's stable
//! point set: candidates landing near an existing pivot refresh that point
//! (keeping its accumulated impulses for warm-starting), new candidates
//! insert while the manifold has room, and a full manifold replaces the
//! point whose removal maximizes the contact area while never dropping the
//! deepest point.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use talus_types::{ContactManifold, ContactPoint, Material};

use crate::kernels::{CandidatePoint, CollisionResult};

/// Counts of point lifecycle events from one persistence pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointEvents {
    /// Points newly inserted.
    pub created: u32,
    /// Existing points refreshed by a near candidate.
    pub merged: u32,
    /// Points evicted to make room for a better configuration.
    pub replaced: u32,
    /// Points pruned for separation or drift.
    pub destroyed: u32,
}

/// Fold a kernel result into the manifold's persistent point set.
///
/// `caching_distance` is the pivot radius within which a candidate refreshes
/// an existing point instead of inserting.
pub fn merge_result_into_manifold(
    manifold: &mut ContactManifold,
    result: &CollisionResult,
    orn_b: &UnitQuaternion<f64>,
    material: &Material,
    caching_distance: f64,
) -> PointEvents {
    let mut events = PointEvents::default();

    for candidate in &result.points {
        match find_nearest_point(manifold, candidate, caching_distance) {
            Some(index) => {
                let point = &mut manifold.points[index];
                point.pivot_a = candidate.pivot_a;
                point.pivot_b = candidate.pivot_b;
                point.normal = candidate.normal;
                point.local_normal = orn_b.inverse() * candidate.normal;
                point.distance = candidate.distance;
                point.lifetime = point.lifetime.saturating_add(1);
                events.merged += 1;
            }
            None => {
                let point = ContactPoint {
                    pivot_a: candidate.pivot_a,
                    pivot_b: candidate.pivot_b,
                    normal: candidate.normal,
                    local_normal: orn_b.inverse() * candidate.normal,
                    distance: candidate.distance,
                    restitution: material.restitution,
                    friction: material.friction,
                    lifetime: 0,
                    normal_impulse: 0.0,
                    friction_impulse: 0.0,
                };

                if manifold.is_full() {
                    let index = replacement_index(manifold, candidate);
                    manifold.points[index] = point;
                    events.replaced += 1;
                } else {
                    manifold.points.push(point);
                    events.created += 1;
                }
            }
        }
    }

    events
}

/// Refresh world-space data from the current transforms and prune points
/// that separated or drifted.
///
/// A point survives while its normal separation stays below
/// `breaking_distance` and its pivots have not slid laterally farther than
/// that on the contact plane.
#[allow(clippy::too_many_arguments)]
pub fn prune_manifold(
    manifold: &mut ContactManifold,
    pos_a: &Point3<f64>,
    orn_a: &UnitQuaternion<f64>,
    pos_b: &Point3<f64>,
    orn_b: &UnitQuaternion<f64>,
    breaking_distance: f64,
) -> PointEvents {
    let mut events = PointEvents::default();
    let breaking_sq = breaking_distance * breaking_distance;

    let mut index = 0;
    while index < manifold.points.len() {
        let point = &mut manifold.points[index];
        let world_a = pos_a + orn_a * point.pivot_a;
        let world_b = pos_b + orn_b * point.pivot_b;
        let normal = orn_b * point.local_normal;
        let d = world_a - world_b;
        let normal_dist = d.dot(&normal);
        let tangential = d - normal * normal_dist;

        point.normal = normal;
        point.distance = normal_dist;

        if normal_dist < breaking_distance && tangential.norm_squared() < breaking_sq {
            index += 1;
        } else {
            manifold.points.swap_remove(index);
            events.destroyed += 1;
        }
    }

    events
}

/// The existing point nearest to the candidate's pivots, within the caching
/// radius on either body.
fn find_nearest_point(
    manifold: &ContactManifold,
    candidate: &CandidatePoint,
    caching_distance: f64,
) -> Option<usize> {
    let mut shortest_sq = caching_distance * caching_distance;
    let mut nearest = None;

    for (index, point) in manifold.points.iter().enumerate() {
        let da = (candidate.pivot_a - point.pivot_a).norm_squared();
        let db = (candidate.pivot_b - point.pivot_b).norm_squared();
        if da < shortest_sq {
            shortest_sq = da;
            nearest = Some(index);
        }
        if db < shortest_sq {
            shortest_sq = db;
            nearest = Some(index);
        }
    }

    nearest
}

/// Pick which of the four points the candidate should replace.
///
/// Evaluates the four configurations that substitute the candidate for one
/// existing point and keeps the one with the largest contact area in the
/// tangent plane, never evicting the deepest point.
fn replacement_index(manifold: &ContactManifold, candidate: &CandidatePoint) -> usize {
    let deepest = manifold
        .points
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map_or(0, |(i, _)| i);
    let keep_deepest = manifold.points[deepest].distance < candidate.distance;

    let mut best_index = if keep_deepest { (deepest + 1) % 4 } else { 0 };
    let mut best_area = f64::NEG_INFINITY;

    for replace in 0..manifold.points.len() {
        if keep_deepest && replace == deepest {
            continue;
        }
        let mut quad = [Vector3::zeros(); 4];
        for (slot, point) in manifold.points.iter().enumerate() {
            quad[slot] = if slot == replace {
                candidate.pivot_a
            } else {
                point.pivot_a
            };
        }
        let area = quad_area(&quad, &candidate.normal);
        if area > best_area {
            best_area = area;
            best_index = replace;
        }
    }

    best_index
}

/// Area of the quadrilateral spanned by four points, measured in the plane
/// orthogonal to `normal`. The points are unordered, so take the best of
/// the three diagonal pairings.
fn quad_area(points: &[Vector3<f64>; 4], normal: &Vector3<f64>) -> f64 {
    let pairings = [
        (points[1] - points[0]).cross(&(points[3] - points[2])),
        (points[2] - points[0]).cross(&(points[3] - points[1])),
        (points[3] - points[0]).cross(&(points[2] - points[1])),
    ];
    pairings
        .iter()
        .map(|c| c.dot(normal).abs() * 0.5)
        .fold(0.0, f64::max)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use smallvec::smallvec;
    use talus_types::Entity;

    fn manifold() -> ContactManifold {
        ContactManifold::new(Entity::new(0, 0), Entity::new(1, 0), 0.08)
    }

    fn candidate(x: f64, z: f64, distance: f64) -> CandidatePoint {
        CandidatePoint {
            pivot_a: Vector3::new(x, -0.5, z),
            pivot_b: Vector3::new(x, 0.5, z),
            normal: Vector3::y(),
            distance,
        }
    }

    fn result_of(points: &[CandidatePoint]) -> CollisionResult {
        CollisionResult {
            points: points.iter().copied().collect(),
        }
    }

    #[test]
    fn test_insert_up_to_capacity() {
        let mut m = manifold();
        let result = result_of(&[
            candidate(0.0, 0.0, -0.01),
            candidate(1.0, 0.0, -0.01),
            candidate(0.0, 1.0, -0.01),
            candidate(1.0, 1.0, -0.01),
        ]);
        let events = merge_result_into_manifold(
            &mut m,
            &result,
            &UnitQuaternion::identity(),
            &Material::default(),
            0.04,
        );

        assert_eq!(events.created, 4);
        assert_eq!(m.num_points(), 4);
    }

    #[test]
    fn test_near_candidate_merges_and_keeps_impulse() {
        let mut m = manifold();
        let first = result_of(&[candidate(0.0, 0.0, -0.01)]);
        merge_result_into_manifold(
            &mut m,
            &first,
            &UnitQuaternion::identity(),
            &Material::default(),
            0.04,
        );
        m.points[0].normal_impulse = 3.0;

        // A candidate 1 cm away merges rather than inserting.
        let second = result_of(&[candidate(0.01, 0.0, -0.02)]);
        let events = merge_result_into_manifold(
            &mut m,
            &second,
            &UnitQuaternion::identity(),
            &Material::default(),
            0.04,
        );

        assert_eq!(events.merged, 1);
        assert_eq!(m.num_points(), 1);
        assert_relative_eq!(m.points[0].normal_impulse, 3.0);
        assert_relative_eq!(m.points[0].distance, -0.02);
        assert_eq!(m.points[0].lifetime, 1);
    }

    #[test]
    fn test_full_manifold_replaces_not_grows() {
        let mut m = manifold();
        let result = result_of(&[
            candidate(0.0, 0.0, -0.01),
            candidate(1.0, 0.0, -0.01),
            candidate(0.0, 1.0, -0.01),
            candidate(1.0, 1.0, -0.01),
        ]);
        merge_result_into_manifold(
            &mut m,
            &result,
            &UnitQuaternion::identity(),
            &Material::default(),
            0.04,
        );

        let extra = result_of(&[candidate(0.5, 0.5, -0.05)]);
        let events = merge_result_into_manifold(
            &mut m,
            &extra,
            &UnitQuaternion::identity(),
            &Material::default(),
            0.04,
        );

        assert_eq!(events.replaced, 1);
        assert_eq!(m.num_points(), 4);
    }

    #[test]
    fn test_deepest_point_survives_replacement() {
        let mut m = manifold();
        let result = result_of(&[
            candidate(0.0, 0.0, -0.09), // deepest
            candidate(1.0, 0.0, -0.01),
            candidate(0.0, 1.0, -0.01),
            candidate(1.0, 1.0, -0.01),
        ]);
        merge_result_into_manifold(
            &mut m,
            &result,
            &UnitQuaternion::identity(),
            &Material::default(),
            0.04,
        );

        // Shallow newcomer far from the others.
        let extra = result_of(&[candidate(2.0, 2.0, -0.005)]);
        merge_result_into_manifold(
            &mut m,
            &extra,
            &UnitQuaternion::identity(),
            &Material::default(),
            0.04,
        );

        assert!(m
            .points
            .iter()
            .any(|p| (p.distance + 0.09).abs() < 1e-12));
    }

    #[test]
    fn test_prune_removes_separated_points() {
        let mut m = manifold();
        m.points = smallvec![ContactPoint {
            pivot_a: Vector3::new(0.0, -0.5, 0.0),
            pivot_b: Vector3::new(0.0, 0.5, 0.0),
            normal: Vector3::y(),
            local_normal: Vector3::y(),
            distance: 0.0,
            restitution: 0.0,
            friction: 0.5,
            lifetime: 4,
            normal_impulse: 0.0,
            friction_impulse: 0.0,
        }];

        // Bodies moved apart by 0.2 along Y: separation beyond breaking.
        let events = prune_manifold(
            &mut m,
            &Point3::new(0.0, 1.2, 0.0),
            &UnitQuaternion::identity(),
            &Point3::origin(),
            &UnitQuaternion::identity(),
            0.04,
        );

        assert_eq!(events.destroyed, 1);
        assert_eq!(m.num_points(), 0);
    }

    #[test]
    fn test_prune_removes_lateral_drift() {
        let mut m = manifold();
        m.points = smallvec![ContactPoint {
            pivot_a: Vector3::new(0.0, -0.5, 0.0),
            pivot_b: Vector3::new(0.0, 0.5, 0.0),
            normal: Vector3::y(),
            local_normal: Vector3::y(),
            distance: 0.0,
            restitution: 0.0,
            friction: 0.5,
            lifetime: 4,
            normal_impulse: 0.0,
            friction_impulse: 0.0,
        }];

        // Body A slid 10 cm sideways: pivots no longer line up.
        let events = prune_manifold(
            &mut m,
            &Point3::new(0.1, 1.0, 0.0),
            &UnitQuaternion::identity(),
            &Point3::origin(),
            &UnitQuaternion::identity(),
            0.04,
        );

        assert_eq!(events.destroyed, 1);
    }

    #[test]
    fn test_prune_keeps_resting_points_and_refreshes_distance() {
        let mut m = manifold();
        m.points = smallvec![ContactPoint {
            pivot_a: Vector3::new(0.0, -0.5, 0.0),
            pivot_b: Vector3::new(0.0, 0.5, 0.0),
            normal: Vector3::y(),
            local_normal: Vector3::y(),
            distance: -0.5,
            restitution: 0.0,
            friction: 0.5,
            lifetime: 4,
            normal_impulse: 0.0,
            friction_impulse: 0.0,
        }];

        let events = prune_manifold(
            &mut m,
            &Point3::new(0.0, 0.99, 0.0),
            &UnitQuaternion::identity(),
            &Point3::origin(),
            &UnitQuaternion::identity(),
            0.04,
        );

        assert_eq!(events.destroyed, 0);
        assert_relative_eq!(m.points[0].distance, -0.01, epsilon = 1e-12);
    }
}
