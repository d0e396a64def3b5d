/// Post-run consistency checks over a finished narrative state.
///
/// Checks never fail a run; they produce notes for the caller to inspect.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::entity::{Entity, Lifecycle};
use crate::schema::event::{Event, EventId};
use crate::schema::state::NarrativeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteKind {
    /// A stage response contained no usable structure.
    EmptyStage,
    /// A line or reference in a response could not be used.
    Ingest,
    /// An event follows a predecessor that does not come before it.
    Causality,
    /// An event or relation points at an entity that does not exist.
    MissingEntity,
    /// A character takes part in events after their death and before any
    /// revival.
    Deceased,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoherenceNote {
    pub kind: NoteKind,
    pub message: String,
}

impl CoherenceNote {
    pub fn new(kind: NoteKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for CoherenceNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Run every check against `state`, in event order.
pub fn check_coherence(state: &NarrativeState) -> Vec<CoherenceNote> {
    let mut notes = Vec::new();

    for entity in state.entities() {
        for relation in &entity.relations {
            if state.entity(relation.target).is_none() {
                notes.push(CoherenceNote::new(
                    NoteKind::MissingEntity,
                    format!(
                        "{} ({}) is {} unknown entity {}",
                        entity.display_name, entity.id, relation.kind, relation.target
                    ),
                ));
            }
        }
    }

    for event in state.events() {
        for pred in &event.causal_predecessors {
            match state.event(*pred) {
                Some(earlier) if earlier.sequence_index < event.sequence_index => {}
                Some(earlier) => notes.push(CoherenceNote::new(
                    NoteKind::Causality,
                    format!(
                        "{} (sequence {}) follows {} which is not earlier (sequence {})",
                        event.id, event.sequence_index, pred, earlier.sequence_index
                    ),
                )),
                None => notes.push(CoherenceNote::new(
                    NoteKind::Causality,
                    format!("{} follows unknown event {}", event.id, pred),
                )),
            }
        }

        for id in &event.participants {
            let Some(entity) = state.entity(*id) else {
                notes.push(CoherenceNote::new(
                    NoteKind::MissingEntity,
                    format!("{} involves unknown entity {}", event.id, id),
                ));
                continue;
            };
            if let Some(death) = dead_before(state, entity, event) {
                notes.push(CoherenceNote::new(
                    NoteKind::Deceased,
                    format!(
                        "{} takes part in {} after dying in {}",
                        entity.display_name, event.id, death
                    ),
                ));
            }
        }
    }

    notes
}

/// The death `entity` is still under when `event` happens, if any. The
/// event that revives a character does not count against them.
fn dead_before(state: &NarrativeState, entity: &Entity, event: &Event) -> Option<EventId> {
    if entity.revived_at(event.id) {
        return None;
    }
    let latest = entity
        .lifecycle
        .iter()
        .filter(|change| {
            state
                .event(change.event())
                .is_some_and(|at| at.sequence_index < event.sequence_index)
        })
        .last()?;
    match latest {
        Lifecycle::Died(id) => Some(*id),
        Lifecycle::Revived(_) => None,
    }
}
