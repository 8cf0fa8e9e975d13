use super::{ContactContainer, ContactPair, ContactReport, ReportStatus};
use crate::body::BodyTable;
use crate::error::SolverError;

/// Container that only keeps totals.
///
/// A standalone statistics sink: the solver never reads it. Feed it the same
/// pairs the registry gets, through [`crate::world::feed_contacts`] or the
/// cycle protocol by hand, to watch contact counts and penetration without
/// building solver rows. It cannot enumerate what it received.
#[derive(Debug, Default, Clone)]
pub struct AggregateContacts {
    plain: usize,
    rolling: usize,
    total_penetration: f64,
    max_penetration: f64,
    cycle_open: bool,
    skipped: usize,
}

impl AggregateContacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_penetration(&self) -> f64 {
        self.total_penetration
    }

    pub fn max_penetration(&self) -> f64 {
        self.max_penetration
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl ContactContainer for AggregateContacts {
    fn begin_cycle(&mut self) {
        if self.cycle_open {
            return;
        }
        *self = Self {
            cycle_open: true,
            ..Self::default()
        };
    }

    fn add_contact(&mut self, pair: &ContactPair) -> bool {
        assert!(self.cycle_open, "add_contact called outside begin_cycle/end_cycle");
        if let Some(defect) = pair.defect() {
            self.skipped += 1;
            tracing::debug!("skipping contact: {} ({:?})", defect, pair);
            return false;
        }
        if pair.rolling {
            self.rolling += 1;
        } else {
            self.plain += 1;
        }
        self.total_penetration += pair.penetration;
        self.max_penetration = self.max_penetration.max(pair.penetration);
        true
    }

    fn end_cycle(&mut self) {
        assert!(self.cycle_open, "end_cycle called without begin_cycle");
        self.cycle_open = false;
    }

    fn count(&self) -> usize {
        3 * self.plain + 6 * self.rolling
    }

    fn update(&mut self, _time: f64, _bodies: &BodyTable) -> Result<(), SolverError> {
        Ok(())
    }

    fn report_all(&self, _visitor: &mut dyn FnMut(&ContactReport<'_>) -> bool) -> ReportStatus {
        ReportStatus::Partial { visited: 0 }
    }

    fn remove_all(&mut self) {
        *self = Self::default();
    }
}
