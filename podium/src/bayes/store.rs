//! Shared, per-entrant belief state.
//!
//! The store is constructed once and handed to every component that reads or amends beliefs. The
//! outer lock guards membership only; each entrant's state sits behind its own lock, so updates of
//! one entrant never block reads of another.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bayes::belief::ConjugatePriorState;
use crate::entrant::EntrantId;

pub type SharedState = Arc<RwLock<ConjugatePriorState>>;

#[derive(Debug, Default)]
pub struct PriorStore {
    entrants: RwLock<FxHashMap<EntrantId, SharedState>>,
    resolved_events: Mutex<FxHashSet<String>>,
}

/// A serialisable copy of a [PriorStore].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorSnapshot {
    pub entrants: BTreeMap<EntrantId, ConjugatePriorState>,
    #[serde(default)]
    pub resolved_events: BTreeSet<String>,
}

impl PriorStore {
    pub fn get(&self, entrant: &EntrantId) -> Option<SharedState> {
        self.entrants.read().get(entrant).cloned()
    }

    /// A copy of the entrant's current state.
    pub fn read(&self, entrant: &EntrantId) -> Option<ConjugatePriorState> {
        self.get(entrant).map(|state| state.read().clone())
    }

    /// Returns the entrant's state, creating it with `init` if absent. The flag is `true` if the
    /// state was created by this call.
    pub fn get_or_insert_with(
        &self,
        entrant: &EntrantId,
        init: impl FnOnce() -> ConjugatePriorState,
    ) -> (SharedState, bool) {
        if let Some(state) = self.get(entrant) {
            return (state, false);
        }
        let mut entrants = self.entrants.write();
        if let Some(state) = entrants.get(entrant) {
            return (state.clone(), false);
        }
        let state = Arc::new(RwLock::new(init()));
        entrants.insert(entrant.clone(), state.clone());
        (state, true)
    }

    /// Replaces (or creates) the entrant's state.
    pub fn insert(&self, entrant: EntrantId, state: ConjugatePriorState) {
        let existing = self.get(&entrant);
        match existing {
            Some(existing) => *existing.write() = state,
            None => {
                self.entrants
                    .write()
                    .insert(entrant, Arc::new(RwLock::new(state)));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entrants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entrants.read().is_empty()
    }

    /// Marks `event_id` as resolved. Returns `false` if it had been resolved before.
    pub fn mark_resolved(&self, event_id: &str) -> bool {
        self.resolved_events.lock().insert(event_id.to_string())
    }

    pub fn is_resolved(&self, event_id: &str) -> bool {
        self.resolved_events.lock().contains(event_id)
    }

    pub fn snapshot(&self) -> PriorSnapshot {
        let entrants = self
            .entrants
            .read()
            .iter()
            .map(|(entrant, state)| (entrant.clone(), state.read().clone()))
            .collect();
        let resolved_events = self.resolved_events.lock().iter().cloned().collect();
        PriorSnapshot {
            entrants,
            resolved_events,
        }
    }

    pub fn restore(snapshot: PriorSnapshot) -> Self {
        debug!(
            "restoring {} priors and {} resolved events",
            snapshot.entrants.len(),
            snapshot.resolved_events.len()
        );
        let entrants = snapshot
            .entrants
            .into_iter()
            .map(|(entrant, state)| (entrant, Arc::new(RwLock::new(state))))
            .collect();
        Self {
            entrants: RwLock::new(entrants),
            resolved_events: Mutex::new(snapshot.resolved_events.into_iter().collect()),
        }
    }
}

impl From<PriorSnapshot> for PriorStore {
    fn from(snapshot: PriorSnapshot) -> Self {
        Self::restore(snapshot)
    }
}
