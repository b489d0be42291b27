//! Dirty-flag bookkeeping shared by modules and module contexts.

use std::sync::Arc;

use crate::engine::{SnippetEngine, UnitId, WorkUnit};

struct InFlight {
    unit: Arc<WorkUnit>,
    /// Generation the node was at when the unit was queued.
    generation: u64,
}

/// Memoization state of a node.
///
/// Every `mark_dirty` bumps the generation. A result only makes the node
/// clean if no invalidation happened while its job was in flight.
pub(crate) struct Memo {
    dirty: bool,
    generation: u64,
    in_flight: Option<InFlight>,
    last_error: Option<String>,
}

impl Default for Memo {
    fn default() -> Self {
        Self {
            dirty: true,
            generation: 0,
            in_flight: None,
            last_error: None,
        }
    }
}

impl Memo {
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
        self.generation += 1;
    }

    pub(crate) fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The unit of an unfinished job that still computes the current
    /// generation.
    pub(crate) fn outstanding(&self, engine: &SnippetEngine) -> Option<Arc<WorkUnit>> {
        self.in_flight
            .as_ref()
            .filter(|flight| flight.generation == self.generation)
            .filter(|flight| !engine.is_unit_done(&flight.unit))
            .map(|flight| flight.unit.clone())
    }

    /// The unit of an unfinished job queued before the last `mark_dirty`.
    /// Its result can no longer make the node clean.
    pub(crate) fn superseded(&self, engine: &SnippetEngine) -> Option<Arc<WorkUnit>> {
        self.in_flight
            .as_ref()
            .filter(|flight| flight.generation != self.generation)
            .filter(|flight| !engine.is_unit_done(&flight.unit))
            .map(|flight| flight.unit.clone())
    }

    pub(crate) fn begin(&mut self, unit: Arc<WorkUnit>) {
        self.in_flight = Some(InFlight {
            unit,
            generation: self.generation,
        });
    }

    fn take(&mut self, id: UnitId) -> Option<InFlight> {
        match self.in_flight {
            Some(ref flight) if flight.unit.id() == id => self.in_flight.take(),
            _ => None,
        }
    }

    /// A result for `id` was applied. Returns `false` if `id` is not the
    /// unit this node is waiting for.
    pub(crate) fn settle(&mut self, id: UnitId) -> bool {
        let Some(flight) = self.take(id) else {
            return false;
        };
        self.dirty = flight.generation != self.generation;
        self.last_error = None;
        true
    }

    /// The job for `id` failed; the node stays dirty.
    pub(crate) fn fail(&mut self, id: UnitId, error: String) -> bool {
        if self.take(id).is_none() {
            return false;
        }
        self.dirty = true;
        self.last_error = Some(error);
        true
    }
}
