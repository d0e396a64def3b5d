use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::entity::{normalize_name, Entity, EntityId};
use super::event::{Event, EventId};

/// Everything discovered so far in one run: entities by id, events in
/// chronological order, and the counter that mints new ids.
///
/// Entity ids are minted in increasing order, so iterating `entities`
/// yields insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarrativeState {
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    pub(crate) events: Vec<Event>,
    pub(crate) next_id: u64,
    #[serde(skip)]
    pub(crate) name_index: FxHashMap<String, EntityId>,
}

impl NarrativeState {
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Look up an entity by display name, ignoring case and spacing.
    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        let key = normalize_name(name);
        match self.name_index.get(&key) {
            Some(id) => self.entities.get(id),
            // Deserialized states have no index; fall back to a scan.
            None => self
                .entities
                .values()
                .find(|e| normalize_name(&e.display_name) == key),
        }
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Events ordered by `sequence_index`.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.events.is_empty()
    }

    /// The `sequence_index` the next recorded event will receive.
    pub fn next_sequence_index(&self) -> u64 {
        self.events.last().map_or(0, |e| e.sequence_index + 1)
    }

    /// Up to `n` most recently introduced entities, ordered by
    /// `first_mentioned_stage` then insertion order, oldest first.
    pub fn recent_entities(&self, n: usize) -> Vec<&Entity> {
        let mut ordered: Vec<&Entity> = self.entities.values().collect();
        // Stable sort keeps id (insertion) order within a stage.
        ordered.sort_by_key(|e| e.first_mentioned_stage);
        let skip = ordered.len().saturating_sub(n);
        ordered.into_iter().skip(skip).collect()
    }

    /// Up to `m` latest events, newest first.
    pub fn recent_events(&self, m: usize) -> Vec<&Event> {
        self.events.iter().rev().take(m).collect()
    }

    /// Find the first reference in the state that does not resolve.
    ///
    /// Returns a description of the dangling reference, if any.
    pub fn find_dangling_reference(&self) -> Option<String> {
        for entity in self.entities.values() {
            for relation in &entity.relations {
                if !self.entities.contains_key(&relation.target) {
                    return Some(format!(
                        "entity {} relation '{}' points at missing {}",
                        entity.id, relation.kind, relation.target
                    ));
                }
            }
        }
        for event in &self.events {
            if let Some(missing) = event
                .participants
                .iter()
                .find(|id| !self.entities.contains_key(id))
            {
                return Some(format!(
                    "event {} participant {} does not exist",
                    event.id, missing
                ));
            }
            if let Some(missing) = event
                .causal_predecessors
                .iter()
                .find(|id| self.event(**id).is_none())
            {
                return Some(format!(
                    "event {} cites missing predecessor {}",
                    event.id, missing
                ));
            }
        }
        None
    }

    /// Rebuild the name index, e.g. after deserializing.
    pub fn reindex(&mut self) {
        self.name_index = self
            .entities
            .values()
            .map(|e| (normalize_name(&e.display_name), e.id))
            .collect();
    }
}
