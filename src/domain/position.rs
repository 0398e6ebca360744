//! Per-account position state and snapshot diffing.

use crate::domain::{AccountId, Direction, InstrumentId};
use std::collections::BTreeMap;

/// A stored position for one account × instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionState {
    pub account_id: AccountId,
    pub instrument_id: InstrumentId,
    pub direction: Direction,
    /// Signed lot count as reported by the venue.
    pub lots: i64,
    /// ATR-based sizing hint, filled when indicators exist.
    pub unit_size: Option<i64>,
}

/// Result of diffing a fresh portfolio snapshot against stored state.
/// Transient: computed, applied and discarded within one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortfolioDiff {
    pub added: Vec<PositionState>,
    pub removed: Vec<PositionState>,
    pub changed: Vec<(PositionState, PositionState)>,
}

impl PortfolioDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Diff two position maps keyed by instrument id.
    ///
    /// Output order is the sorted instrument-id order in every bucket, so a
    /// given pair of inputs always produces the identical diff. A position
    /// counts as changed when direction or lots differ; unit_size alone does
    /// not trigger a change.
    pub fn between(
        old: &BTreeMap<InstrumentId, PositionState>,
        new: &BTreeMap<InstrumentId, PositionState>,
    ) -> Self {
        let added = new
            .iter()
            .filter(|(id, _)| !old.contains_key(*id))
            .map(|(_, p)| p.clone())
            .collect();

        let removed = old
            .iter()
            .filter(|(id, _)| !new.contains_key(*id))
            .map(|(_, p)| p.clone())
            .collect();

        let changed = old
            .iter()
            .filter_map(|(id, o)| new.get(id).map(|n| (o, n)))
            .filter(|(o, n)| o.direction != n.direction || o.lots != n.lots)
            .map(|(o, n)| (o.clone(), n.clone()))
            .collect();

        PortfolioDiff {
            added,
            removed,
            changed,
        }
    }
}
