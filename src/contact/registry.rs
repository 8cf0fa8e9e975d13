//! Arena-backed contact registry.

use glam::DVec3;

use super::{
    ContactConstraint, ContactContainer, ContactKind, ContactPair, ContactReport, JacobianRow,
    ReportStatus, DEGENERATE_LENGTH_SQ,
};
use crate::body::BodyTable;
use crate::error::SolverError;
use crate::par;

/// Persistent store of contact constraint records.
///
/// Plain and rolling contacts live in two arenas. During a cycle the active
/// count of each arena is the reuse cursor: `add_contact` overwrites the record
/// under the cursor in place, or appends when the arena is exhausted.
/// `end_cycle` truncates the arena to the cursor, so a steady or shrinking
/// contact count never reallocates.
#[derive(Debug, Default)]
pub struct ContactRegistry {
    plain: Vec<ContactConstraint>,
    rolling: Vec<ContactConstraint>,
    active_plain: usize,
    active_rolling: usize,
    cycle_open: bool,
    skipped: usize,
}

impl ContactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(plain: usize, rolling: usize) -> Self {
        Self {
            plain: Vec::with_capacity(plain),
            rolling: Vec::with_capacity(rolling),
            ..Self::default()
        }
    }

    /// Active plain contacts.
    pub fn contacts(&self) -> &[ContactConstraint] {
        &self.plain[..self.active_plain]
    }

    /// Active rolling contacts.
    pub fn rolling_contacts(&self) -> &[ContactConstraint] {
        &self.rolling[..self.active_rolling]
    }

    /// All active records, plain first.
    pub fn iter(&self) -> impl Iterator<Item = &ContactConstraint> {
        self.contacts().iter().chain(self.rolling_contacts())
    }

    pub(crate) fn records_mut(&mut self) -> (&mut [ContactConstraint], &mut [ContactConstraint]) {
        (
            &mut self.plain[..self.active_plain],
            &mut self.rolling[..self.active_rolling],
        )
    }

    pub fn active_contacts(&self) -> usize {
        self.active_plain
    }

    pub fn active_rolling(&self) -> usize {
        self.active_rolling
    }

    pub fn is_empty(&self) -> bool {
        self.active_plain == 0 && self.active_rolling == 0
    }

    /// Degenerate pairs rejected since the last `begin_cycle`.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Records the arenas can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.plain.capacity() + self.rolling.capacity()
    }

    pub fn is_cycle_open(&self) -> bool {
        self.cycle_open
    }

    /// Re-orthonormalize the tangent basis around a unit normal.
    fn tangent_basis(normal: DVec3, tangents: [DVec3; 2]) -> [DVec3; 2] {
        let u = tangents[0] - normal * normal.dot(tangents[0]);
        if !u.is_finite() || u.length_squared() < DEGENERATE_LENGTH_SQ {
            let (u, v) = normal.any_orthonormal_pair();
            return [u, v];
        }
        let u = u.normalize();
        let mut v = normal.cross(u);
        if v.dot(tangents[1]) < 0.0 {
            v = -v;
        }
        [u, v]
    }

    fn compute_jacobians(record: &mut ContactConstraint, bodies: &BodyTable) -> Result<(), SolverError> {
        let ia = bodies
            .index_of(record.body_a)
            .ok_or(SolverError::UnknownBody(record.body_a))?;
        let ib = bodies
            .index_of(record.body_b)
            .ok_or(SolverError::UnknownBody(record.body_b))?;
        let a = bodies.get(ia);
        let b = bodies.get(ib);

        let r_a = record.point - a.position;
        let r_b = record.point - b.position;
        let axes = [record.normal, record.tangents[0], record.tangents[1]];

        for (row, axis) in axes.iter().enumerate() {
            record.jacobian[row] =
                JacobianRow::from_parts(-*axis, -r_a.cross(*axis), *axis, r_b.cross(*axis));
        }
        if record.kind == ContactKind::Rolling {
            // spin about the normal, roll about the tangents
            for (row, axis) in axes.iter().enumerate() {
                record.jacobian[3 + row] =
                    JacobianRow::from_parts(DVec3::ZERO, -*axis, DVec3::ZERO, *axis);
            }
        }

        record.bodies = [ia, ib];
        record.violation = -record.penetration;
        record.approach_speed = record.jacobian[0].velocity(a, b);
        Ok(())
    }
}

impl ContactContainer for ContactRegistry {
    fn begin_cycle(&mut self) {
        if self.cycle_open {
            return;
        }
        self.cycle_open = true;
        self.active_plain = 0;
        self.active_rolling = 0;
        self.skipped = 0;
    }

    fn add_contact(&mut self, pair: &ContactPair) -> bool {
        assert!(self.cycle_open, "add_contact called outside begin_cycle/end_cycle");

        if let Some(defect) = pair.defect() {
            self.skipped += 1;
            tracing::debug!(
                "skipping contact {:?}-{:?}: {} ({:?})",
                pair.body_a,
                pair.body_b,
                defect,
                pair
            );
            return false;
        }

        let normal = pair.normal.normalize();
        let tangents = Self::tangent_basis(normal, pair.tangents);

        let (arena, cursor) = if pair.rolling {
            (&mut self.rolling, &mut self.active_rolling)
        } else {
            (&mut self.plain, &mut self.active_plain)
        };

        let fresh = ContactConstraint::from_pair(pair, normal, tangents);
        if let Some(slot) = arena.get_mut(*cursor) {
            let same_pair = slot.body_a == pair.body_a && slot.body_b == pair.body_b;
            let seed = if same_pair { slot.impulse } else { [0.0; 6] };
            *slot = fresh;
            slot.impulse = seed;
        } else {
            arena.push(fresh);
        }
        *cursor += 1;
        true
    }

    fn end_cycle(&mut self) {
        assert!(self.cycle_open, "end_cycle called without begin_cycle");
        self.plain.truncate(self.active_plain);
        self.rolling.truncate(self.active_rolling);
        self.cycle_open = false;
    }

    fn count(&self) -> usize {
        ContactKind::Plain.rows() * self.active_plain
            + ContactKind::Rolling.rows() * self.active_rolling
    }

    fn update(&mut self, time: f64, bodies: &BodyTable) -> Result<(), SolverError> {
        let (plain, rolling) = self.records_mut();
        for arena in [plain, rolling] {
            par::try_for_each_mut(arena, |record| {
                Self::compute_jacobians(record, bodies)?;
                record.updated_at = time;
                Ok::<(), SolverError>(())
            })?;
        }
        Ok(())
    }

    fn report_all(&self, visitor: &mut dyn FnMut(&ContactReport<'_>) -> bool) -> ReportStatus {
        let mut visited = 0;
        for record in self.iter() {
            visited += 1;
            if !visitor(&record.report()) {
                break;
            }
        }
        ReportStatus::Complete { visited }
    }

    fn remove_all(&mut self) {
        self.plain.clear();
        self.rolling.clear();
        self.active_plain = 0;
        self.active_rolling = 0;
        self.skipped = 0;
    }
}
