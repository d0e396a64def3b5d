/// Narrative state tracker: turns raw stage output into entities and
/// events, merging repeated mentions and numbering events across stages.
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::parser::{parse_output, EventRecord, ParsedOutput};
use crate::schema::entity::{normalize_name, Entity, EntityId};
use crate::schema::event::{Event, EventId};
use crate::schema::state::NarrativeState;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("dangling reference after ingest: {0}")]
    DanglingReference(String),
}

/// Something an ingest call created.
#[derive(Debug, Clone)]
pub enum Ingested {
    Entity(Entity),
    Event(Event),
}

/// Outcome of one ingest call.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Newly created entities followed by newly recorded events.
    pub added: Vec<Ingested>,
    /// Entities that were mentioned again and merged into existing ones.
    pub merged: Vec<EntityId>,
    /// Relations that were not already recorded.
    pub relations_added: usize,
    /// Lines or references that could not be used.
    pub warnings: Vec<String>,
}

impl IngestReport {
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.added.iter().filter_map(|i| match i {
            Ingested::Entity(e) => Some(e),
            Ingested::Event(_) => None,
        })
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.added.iter().filter_map(|i| match i {
            Ingested::Event(e) => Some(e),
            Ingested::Entity(_) => None,
        })
    }

    /// True if the response contributed no structure at all.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.merged.is_empty() && self.relations_added == 0
    }
}

/// Owns the narrative state of a single run.
#[derive(Debug, Default)]
pub struct NarrativeTracker {
    state: NarrativeState,
}

impl NarrativeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `raw_text` from the given stage and fold it into the state.
    ///
    /// Re-mentions of a known name (case and spacing ignored) merge into the
    /// existing entity. Unresolvable names and labels are reported as
    /// warnings and skipped. The state is only updated if the result has no
    /// dangling references.
    pub fn ingest(&mut self, raw_text: &str, stage: u8) -> Result<IngestReport, TrackerError> {
        let parsed = parse_output(raw_text);
        let mut next = self.state.clone();
        let report = apply(&mut next, parsed, stage);

        if let Some(problem) = next.find_dangling_reference() {
            return Err(TrackerError::DanglingReference(problem));
        }

        debug!(
            stage,
            added = report.added.len(),
            merged = report.merged.len(),
            warnings = report.warnings.len(),
            "ingested stage output"
        );
        for warning in &report.warnings {
            warn!(stage, "{}", warning);
        }

        self.state = next;
        Ok(report)
    }

    pub fn get_entity(&self, id: EntityId) -> Result<&Entity, TrackerError> {
        self.state.entity(id).ok_or(TrackerError::UnknownEntity(id))
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> NarrativeState {
        self.state.clone()
    }

    pub fn state(&self) -> &NarrativeState {
        &self.state
    }

    pub fn into_state(self) -> NarrativeState {
        self.state
    }
}

fn mint(state: &mut NarrativeState) -> u64 {
    let id = state.next_id;
    state.next_id += 1;
    id
}

fn resolve_name(state: &NarrativeState, name: &str) -> Option<EntityId> {
    state.name_index.get(&normalize_name(name)).copied()
}

fn apply(state: &mut NarrativeState, parsed: ParsedOutput, stage: u8) -> IngestReport {
    let mut report = IngestReport {
        warnings: parsed.warnings,
        ..Default::default()
    };
    if state.name_index.len() != state.entities.len() {
        state.reindex();
    }

    let mut new_entities = Vec::new();
    for record in parsed.entities {
        let key = normalize_name(&record.name);
        let id = match state.name_index.get(&key) {
            Some(&id) => {
                if !report.merged.contains(&id) && !new_entities.contains(&id) {
                    report.merged.push(id);
                }
                id
            }
            None => {
                let id = EntityId(mint(state));
                state
                    .entities
                    .insert(id, Entity::new(id, record.kind, &record.name, stage));
                state.name_index.insert(key, id);
                new_entities.push(id);
                id
            }
        };
        if let Some(entity) = state.entities.get_mut(&id) {
            if entity.kind != record.kind {
                report.warnings.push(format!(
                    "'{}' was declared as a {} but is already a {}",
                    record.name,
                    record.kind.keyword(),
                    entity.kind.keyword()
                ));
            }
            for (key, value) in &record.attributes {
                entity.add_attribute(key, value);
            }
        }
    }

    for relation in parsed.relations {
        let subject = resolve_name(state, &relation.subject);
        let object = resolve_name(state, &relation.object);
        match (subject, object) {
            (Some(subject), Some(object)) => {
                if let Some(entity) = state.entities.get_mut(&subject) {
                    if entity.add_relation(&relation.kind, object) {
                        report.relations_added += 1;
                    }
                }
            }
            _ => report.warnings.push(format!(
                "relation '{} {} {}' names an undeclared entity",
                relation.subject, relation.kind, relation.object
            )),
        }
    }

    let new_events = record_events(state, parsed.events, stage, &mut report.warnings);

    report.added = new_entities
        .iter()
        .filter_map(|id| state.entities.get(id).cloned())
        .map(Ingested::Entity)
        .chain(
            new_events
                .iter()
                .filter_map(|id| state.event(*id).cloned())
                .map(Ingested::Event),
        )
        .collect();
    report
}

/// Mint ids for every event first so `after=` may point at any label in the
/// same response, then resolve references and append in order.
fn record_events(
    state: &mut NarrativeState,
    records: Vec<EventRecord>,
    stage: u8,
    warnings: &mut Vec<String>,
) -> Vec<EventId> {
    let earlier = state.events.len();
    let ids: Vec<EventId> = records.iter().map(|_| EventId(mint(state))).collect();
    let mut labels: FxHashMap<String, EventId> = FxHashMap::default();
    for (record, id) in records.iter().zip(&ids) {
        if let Some(label) = &record.label {
            if labels.insert(label.clone(), *id).is_some() {
                warnings.push(format!("event label '{}' is used more than once", label));
            }
        }
    }

    for (record, &id) in records.into_iter().zip(&ids) {
        let mut participants = BTreeSet::new();
        for name in record.with.iter().chain(&record.deaths).chain(&record.revived) {
            match resolve_name(state, name) {
                Some(entity) => {
                    participants.insert(entity);
                }
                None => warnings.push(format!(
                    "event '{}' names unknown participant '{}'",
                    record.summary, name
                )),
            }
        }

        let mut causal_predecessors = BTreeSet::new();
        for reference in &record.after {
            match resolve_predecessor(&state.events[..earlier], &labels, reference) {
                Some(pred) => {
                    causal_predecessors.insert(pred);
                }
                None => warnings.push(format!(
                    "event '{}' follows unknown event '{}'",
                    record.summary, reference
                )),
            }
        }

        for name in &record.deaths {
            let Some(entity) = resolve_name(state, name).and_then(|e| state.entities.get_mut(&e))
            else {
                continue;
            };
            if !entity.die(id) {
                warnings.push(format!("'{}' dies in {} but is already dead", name, id));
            }
        }
        for name in &record.revived {
            let Some(entity) = resolve_name(state, name).and_then(|e| state.entities.get_mut(&e))
            else {
                continue;
            };
            if !entity.revive(id) {
                warnings.push(format!("'{}' is revived in {} but is not dead", name, id));
            }
        }

        let sequence_index = state.next_sequence_index();
        state.events.push(Event {
            id,
            sequence_index,
            summary: record.summary,
            participants,
            causal_predecessors,
            stage,
        });
    }

    ids
}

/// Resolve one `after=` reference.
///
/// An uppercase `E<n>` names an event from an earlier response, falling back
/// to a local label. Anything else names a local label, falling back to a run
/// id. Run ids only cover `earlier`, the events the model was shown.
fn resolve_predecessor(
    earlier: &[Event],
    labels: &FxHashMap<String, EventId>,
    reference: &str,
) -> Option<EventId> {
    let known = |id: EventId| earlier.iter().any(|e| e.id == id).then_some(id);
    let local = || labels.get(&reference.to_lowercase()).copied();

    match EventId::parse_run_id(reference) {
        Some(run_id) => known(run_id).or_else(local),
        None => local().or_else(|| EventId::parse_label(reference).and_then(known)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::entity::{EntityKind, Lifecycle};

    const STAGE1: &str = "\
In the last years of the Republic, grain decided everything.

ENTITY: character | Marcus the Trader | role=merchant
ENTITY: character | Livia | role=priestess
RELATION: Marcus the Trader | ally_of | Livia
EVENT: e1 | Marcus corners the grain market | with=Marcus the Trader; Livia
";

    #[test]
    fn ingest_creates_entities_and_events() {
        let mut tracker = NarrativeTracker::new();
        let report = tracker.ingest(STAGE1, 1).unwrap();
        assert_eq!(report.entities().count(), 2);
        assert_eq!(report.events().count(), 1);
        assert!(report.warnings.is_empty());

        let state = tracker.snapshot();
        let marcus = state.entity_by_name("marcus the trader").unwrap();
        assert_eq!(marcus.id, EntityId(0));
        assert_eq!(marcus.attribute("role"), Some("merchant"));
        assert_eq!(marcus.relations[0].target, EntityId(1));

        let event = &state.events()[0];
        assert_eq!(event.id, EventId(2));
        assert_eq!(event.sequence_index, 0);
        assert_eq!(event.stage, 1);
        assert!(event.involves(EntityId(0)) && event.involves(EntityId(1)));
    }

    #[test]
    fn repeated_mention_in_one_call_is_one_entity() {
        let mut tracker = NarrativeTracker::new();
        let text = "ENTITY: character | Marcus the Trader | role=merchant\n\
                    ENTITY: character | marcus  the trader | role=senator; age=40";
        let report = tracker.ingest(text, 1).unwrap();
        assert_eq!(report.entities().count(), 1);
        assert_eq!(tracker.state().entity_count(), 1);

        let marcus = tracker.get_entity(EntityId(0)).unwrap();
        assert_eq!(marcus.display_name, "Marcus the Trader");
        assert_eq!(marcus.attribute("role"), Some("merchant"));
        assert_eq!(marcus.attribute("age"), Some("40"));
    }

    #[test]
    fn later_stage_merges_and_keeps_first_stage() {
        let mut tracker = NarrativeTracker::new();
        tracker.ingest(STAGE1, 1).unwrap();
        let stage2 = "ENTITY: character | MARCUS THE TRADER | home=Ostia\n\
                      ENTITY: place | Ostia\n\
                      EVENT: e1 | A storm sinks the grain fleet | with=Marcus the Trader | after=E2";
        let report = tracker.ingest(stage2, 2).unwrap();
        assert_eq!(report.merged, vec![EntityId(0)]);

        let state = tracker.snapshot();
        assert_eq!(state.entity_count(), 3);
        let marcus = state.entity(EntityId(0)).unwrap();
        assert_eq!(marcus.first_mentioned_stage, 1);
        assert_eq!(marcus.attribute("home"), Some("Ostia"));

        let ostia = state.entity_by_name("ostia").unwrap();
        assert_eq!(ostia.id, EntityId(3));
        assert_eq!(ostia.kind, EntityKind::Place);

        let storm = &state.events()[1];
        assert_eq!(storm.id, EventId(4));
        assert_eq!(storm.sequence_index, 1);
        assert_eq!(storm.stage, 2);
        assert!(storm.causal_predecessors.contains(&EventId(2)));
    }

    #[test]
    fn sequence_indices_are_contiguous() {
        let mut tracker = NarrativeTracker::new();
        tracker
            .ingest("EVENT: a | one\nEVENT: b | two | after=a", 1)
            .unwrap();
        tracker.ingest("EVENT: a | three | after=b", 2).unwrap();
        let seq: Vec<u64> = tracker
            .state()
            .events()
            .iter()
            .map(|e| e.sequence_index)
            .collect();
        assert_eq!(seq, vec![0, 1, 2]);
        // `b` is not a label in the second response and not a run id.
        assert!(tracker.state().events()[2].causal_predecessors.is_empty());
    }

    #[test]
    fn forward_reference_within_response_resolves() {
        let mut tracker = NarrativeTracker::new();
        tracker
            .ingest("EVENT: e1 | effect | after=e2\nEVENT: e2 | cause", 1)
            .unwrap();
        let events = tracker.state().events();
        assert!(events[0].causal_predecessors.contains(&events[1].id));
    }

    #[test]
    fn unknown_names_become_warnings() {
        let mut tracker = NarrativeTracker::new();
        let report = tracker
            .ingest(
                "ENTITY: character | Cato\n\
                 RELATION: Cato | rival_of | Pompey\n\
                 EVENT: e1 | Cato speaks | with=Cato; Pompey | after=E99",
                1,
            )
            .unwrap();
        assert_eq!(report.warnings.len(), 3);
        let event = &tracker.state().events()[0];
        assert_eq!(event.participants.len(), 1);
        assert!(event.causal_predecessors.is_empty());
        assert!(tracker.state().find_dangling_reference().is_none());
    }

    #[test]
    fn deaths_mark_the_character() {
        let mut tracker = NarrativeTracker::new();
        tracker
            .ingest(
                "ENTITY: character | Livia\nEVENT: e1 | Livia dies in the riots | deaths=Livia",
                1,
            )
            .unwrap();
        let livia = tracker.get_entity(EntityId(0)).unwrap();
        assert!(livia.is_deceased());
        assert_eq!(livia.lifecycle, vec![Lifecycle::Died(EventId(1))]);
        assert!(tracker.state().events()[0].involves(EntityId(0)));
    }

    #[test]
    fn revival_restores_the_character() {
        let mut tracker = NarrativeTracker::new();
        tracker
            .ingest(
                "ENTITY: character | Livia
EVENT: e1 | Livia dies in the riots | deaths=Livia",
                1,
            )
            .unwrap();
        let report = tracker
            .ingest(
                "EVENT: e1 | The oracle of Ceres restores Livia | after=E1 | revived=Livia
                 EVENT: e2 | Livia is revived again | revived=Livia",
                2,
            )
            .unwrap();
        // The second revival finds her alive.
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("is not dead"));

        let livia = tracker.get_entity(EntityId(0)).unwrap();
        assert!(!livia.is_deceased());
        assert_eq!(
            livia.lifecycle,
            vec![Lifecycle::Died(EventId(1)), Lifecycle::Revived(EventId(2))]
        );
        assert!(tracker.state().events()[1].involves(EntityId(0)));
    }

    #[test]
    fn run_id_and_local_label_do_not_collide() {
        let mut tracker = NarrativeTracker::new();
        tracker
            .ingest("ENTITY: character | Cato
EVENT: e1 | Cato speaks | with=Cato", 1)
            .unwrap();
        tracker
            .ingest(
                "EVENT: e1 | The Senate answers | with=Cato | after=E1
                 EVENT: e2 | Cato withdraws | after=e1",
                2,
            )
            .unwrap();
        let events = tracker.state().events();
        assert_eq!(events[1].id, EventId(2));
        assert_eq!(
            events[1].causal_predecessors,
            [EventId(1)].into_iter().collect()
        );
        assert_eq!(
            events[2].causal_predecessors,
            [EventId(2)].into_iter().collect()
        );
    }

    #[test]
    fn run_id_only_names_events_from_earlier_responses() {
        let mut tracker = NarrativeTracker::new();
        let report = tracker
            .ingest("EVENT: e1 | one
EVENT: e2 | two | after=E0", 1)
            .unwrap();
        // E0 is this response's own first event, which the model never saw.
        assert_eq!(report.warnings.len(), 1);
        assert!(tracker.state().events()[1].causal_predecessors.is_empty());

        // Uppercase labels still resolve when no run id matches.
        tracker
            .ingest("EVENT: E7 | three
EVENT: E8 | four | after=E7", 2)
            .unwrap();
        let events = tracker.state().events();
        assert_eq!(events[3].causal_predecessors, [events[2].id].into_iter().collect());
    }

    #[test]
    fn relation_only_response_is_not_empty() {
        let mut tracker = NarrativeTracker::new();
        tracker.ingest(STAGE1, 1).unwrap();
        let report = tracker
            .ingest("RELATION: Livia | rival_of | Marcus the Trader", 2)
            .unwrap();
        assert_eq!(report.relations_added, 1);
        assert!(!report.is_empty());

        let repeat = tracker
            .ingest("RELATION: Livia | rival_of | Marcus the Trader", 2)
            .unwrap();
        assert!(repeat.is_empty());
    }

    #[test]
    fn dangling_reference_rejects_ingest_and_keeps_state() {
        let mut tracker = NarrativeTracker::new();
        tracker.ingest(STAGE1, 1).unwrap();
        if let Some(marcus) = tracker.state.entities.get_mut(&EntityId(0)) {
            marcus.add_relation("patron_of", EntityId(99));
        }
        let before = tracker.snapshot();

        let err = tracker
            .ingest("ENTITY: item | Bronze Eagle
EVENT: e1 | The eagle is cast", 2)
            .unwrap_err();
        assert!(matches!(err, TrackerError::DanglingReference(ref msg) if msg.contains("#99")));
        assert_eq!(tracker.state().entity_count(), before.entity_count());
        assert_eq!(tracker.state().event_count(), before.event_count());
        assert_eq!(tracker.state().next_id, before.next_id);
        assert!(tracker.state().entity_by_name("bronze eagle").is_none());
    }

    #[test]
    fn prose_only_yields_empty_report() {
        let mut tracker = NarrativeTracker::new();
        let report = tracker.ingest("Just a story with no records.", 1).unwrap();
        assert!(report.is_empty());
        assert!(tracker.state().is_empty());
    }

    #[test]
    fn unknown_entity_lookup_fails() {
        let tracker = NarrativeTracker::new();
        assert!(matches!(
            tracker.get_entity(EntityId(7)),
            Err(TrackerError::UnknownEntity(EntityId(7)))
        ));
    }

    #[test]
    fn snapshot_is_detached() {
        let mut tracker = NarrativeTracker::new();
        tracker.ingest(STAGE1, 1).unwrap();
        let before = tracker.snapshot();
        tracker.ingest("ENTITY: item | Bronze Eagle", 2).unwrap();
        assert_eq!(before.entity_count(), 2);
        assert_eq!(tracker.state().entity_count(), 3);
    }
}
