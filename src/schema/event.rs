use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::entity::EntityId;

/// Newtype wrapper for event IDs. Rendered as `E<n>` in prompts so the
/// model can cite earlier events as causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl EventId {
    /// Parse the `E<n>` form shown to the model.
    pub fn parse_label(label: &str) -> Option<Self> {
        let rest = label.trim().strip_prefix(['E', 'e'])?;
        rest.parse().ok().map(EventId)
    }

    /// Parse only the exact uppercase `E<n>` form used for run ids.
    pub fn parse_run_id(token: &str) -> Option<Self> {
        let rest = token.trim().strip_prefix('E')?;
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rest.parse().ok().map(EventId)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// A discrete narrative occurrence.
///
/// Events are immutable once recorded. `sequence_index` is the only
/// ordering consumers may rely on; it keeps counting across stages.
/// Participants are weak references: an event never owns its entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub sequence_index: u64,
    pub summary: String,
    pub participants: BTreeSet<EntityId>,
    pub causal_predecessors: BTreeSet<EventId>,
    /// Stage that produced this event (1 or 2).
    pub stage: u8,
}

impl Event {
    pub fn involves(&self, entity: EntityId) -> bool {
        self.participants.contains(&entity)
    }
}
