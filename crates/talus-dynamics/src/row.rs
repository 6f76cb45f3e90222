//! Constraint rows, the solver's currency.

use nalgebra::{Matrix3, Vector3};

const EFF_MASS_EPSILON: f64 = 1e-12;

/// One scalar constraint equation.
///
/// The four Jacobian columns pair with body A's linear/angular and body B's
/// linear/angular velocities. `slot_a`/`slot_b` index the solve's
/// delta-velocity table.
#[derive(Debug, Clone)]
pub struct ConstraintRow {
    /// Jacobian columns: `[J_lin_A, J_ang_A, J_lin_B, J_ang_B]`.
    pub j: [Vector3<f64>; 4],
    /// Inverse mass of body A.
    pub inv_m_a: f64,
    /// Inverse mass of body B.
    pub inv_m_b: f64,
    /// World-frame inverse inertia of body A.
    pub inv_i_a: Matrix3<f64>,
    /// World-frame inverse inertia of body B.
    pub inv_i_b: Matrix3<f64>,
    /// Delta-velocity slot of body A.
    pub slot_a: usize,
    /// Delta-velocity slot of body B.
    pub slot_b: usize,
    /// Effective mass `1 / (J M⁻¹ Jᵀ)`; zero for degenerate rows, which
    /// then contribute nothing.
    pub eff_mass: f64,
    /// Right-hand side of the velocity constraint.
    pub rhs: f64,
    /// Accumulated impulse, clamped to the limits.
    pub impulse: f64,
    /// Lower impulse clamp.
    pub lower_limit: f64,
    /// Upper impulse clamp.
    pub upper_limit: f64,
}

/// Optional terms mixed into a row's right-hand side.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowOptions {
    /// Baumgarte-style positional error term (already divided by dt).
    pub error: f64,
    /// Restitution applied to the relative velocity.
    pub restitution: f64,
}

impl ConstraintRow {
    /// A row between two body slots, with limits wide open.
    #[must_use]
    pub fn new(
        j: [Vector3<f64>; 4],
        (slot_a, inv_m_a, inv_i_a): (usize, f64, Matrix3<f64>),
        (slot_b, inv_m_b, inv_i_b): (usize, f64, Matrix3<f64>),
    ) -> Self {
        Self {
            j,
            inv_m_a,
            inv_m_b,
            inv_i_a,
            inv_i_b,
            slot_a,
            slot_b,
            eff_mass: 0.0,
            rhs: 0.0,
            impulse: 0.0,
            lower_limit: f64::NEG_INFINITY,
            upper_limit: f64::INFINITY,
        }
    }

    /// Finalize the row: compute the effective mass and the right-hand side
    /// from the bodies' current velocities.
    pub fn prepare(
        &mut self,
        options: &RowOptions,
        linvel_a: &Vector3<f64>,
        angvel_a: &Vector3<f64>,
        linvel_b: &Vector3<f64>,
        angvel_b: &Vector3<f64>,
    ) {
        let j_invm_jt = self.inv_m_a * self.j[0].norm_squared()
            + (self.inv_i_a * self.j[1]).dot(&self.j[1])
            + self.inv_m_b * self.j[2].norm_squared()
            + (self.inv_i_b * self.j[3]).dot(&self.j[3]);
        self.eff_mass = if j_invm_jt > EFF_MASS_EPSILON {
            1.0 / j_invm_jt
        } else {
            0.0
        };

        let relvel = self.j[0].dot(linvel_a)
            + self.j[1].dot(angvel_a)
            + self.j[2].dot(linvel_b)
            + self.j[3].dot(angvel_b);
        self.rhs = -(options.error + relvel * (1.0 + options.restitution));
    }
}

/// Flat store of rows in emission order plus the per-constraint row counts.
#[derive(Debug, Default)]
pub struct RowCache {
    /// Rows in emission order.
    pub rows: Vec<ConstraintRow>,
    /// Number of rows each constraint emitted, in the same order the
    /// constraints were prepared.
    pub con_num_rows: Vec<usize>,
}

impl RowCache {
    /// Drop all rows.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.con_num_rows.clear();
    }
}

/// Per-body velocity deltas accumulated during iterations.
#[derive(Debug, Default)]
pub struct DeltaVelocities {
    /// `(Δv, Δω)` per slot.
    pub slots: Vec<(Vector3<f64>, Vector3<f64>)>,
}

impl DeltaVelocities {
    pub(crate) fn push(&mut self) -> usize {
        self.slots.push((Vector3::zeros(), Vector3::zeros()));
        self.slots.len() - 1
    }
}

/// One Gauss-Seidel update of a single row.
///
/// Computes the impulse correction from the row's right-hand side and the
/// current delta velocities, clamps the accumulated impulse to the row's
/// limits, and returns the applied correction.
pub(crate) fn solve_row(row: &mut ConstraintRow, deltas: &DeltaVelocities) -> f64 {
    let (dv_a, dw_a) = deltas.slots[row.slot_a];
    let (dv_b, dw_b) = deltas.slots[row.slot_b];

    let delta_relvel =
        row.j[0].dot(&dv_a) + row.j[1].dot(&dw_a) + row.j[2].dot(&dv_b) + row.j[3].dot(&dw_b);
    let mut delta_impulse = (row.rhs - delta_relvel) * row.eff_mass;
    let impulse = row.impulse + delta_impulse;

    if impulse < row.lower_limit {
        delta_impulse = row.lower_limit - row.impulse;
        row.impulse = row.lower_limit;
    } else if impulse > row.upper_limit {
        delta_impulse = row.upper_limit - row.impulse;
        row.impulse = row.upper_limit;
    } else {
        row.impulse = impulse;
    }

    delta_impulse
}

/// Apply `M⁻¹ Jᵀ Δλ` to the two bodies' delta velocities.
pub(crate) fn apply_impulse(delta_impulse: f64, row: &ConstraintRow, deltas: &mut DeltaVelocities) {
    let (dv_a, dw_a) = &mut deltas.slots[row.slot_a];
    *dv_a += row.j[0] * (row.inv_m_a * delta_impulse);
    *dw_a += row.inv_i_a * row.j[1] * delta_impulse;

    let (dv_b, dw_b) = &mut deltas.slots[row.slot_b];
    *dv_b += row.j[2] * (row.inv_m_b * delta_impulse);
    *dw_b += row.inv_i_b * row.j[3] * delta_impulse;
}

/// Re-apply the accumulated impulse from the previous step as the initial
/// guess.
pub(crate) fn warm_start(row: &ConstraintRow, deltas: &mut DeltaVelocities) {
    apply_impulse(row.impulse, row, deltas);
}
