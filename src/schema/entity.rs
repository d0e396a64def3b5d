use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::event::EventId;

/// Newtype wrapper for entity IDs. Stable within a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What sort of thing an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Character,
    Place,
    Item,
}

impl EntityKind {
    /// Parse the kind keyword used in model output (`character`, `place`, `item`).
    ///
    /// A few common synonyms are accepted since models paraphrase.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.trim().to_lowercase().as_str() {
            "character" | "person" | "figure" => Some(Self::Character),
            "place" | "location" | "site" => Some(Self::Place),
            "item" | "object" | "artifact" | "artefact" => Some(Self::Item),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Place => "place",
            Self::Item => "item",
        }
    }

    /// Capitalised label used in prompt digests.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Character => "Character",
            Self::Place => "Place",
            Self::Item => "Item",
        }
    }
}

/// A typed back-reference from one entity to another. Never ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub kind: String,
    pub target: EntityId,
}

/// A change of a character's life status, recorded at an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Died(EventId),
    Revived(EventId),
}

impl Lifecycle {
    pub fn event(&self) -> EventId {
        match self {
            Self::Died(id) | Self::Revived(id) => *id,
        }
    }
}

/// A character, place, or item introduced during generation.
///
/// Entities only ever grow: later stages may add attributes and relations
/// but never remove or overwrite them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub display_name: String,
    pub attributes: BTreeMap<String, String>,
    pub first_mentioned_stage: u8,
    pub relations: Vec<Relation>,
    /// Deaths and revivals in event order. Append-only.
    #[serde(default)]
    pub lifecycle: Vec<Lifecycle>,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind, display_name: &str, stage: u8) -> Self {
        Self {
            id,
            kind,
            display_name: display_name.trim().to_string(),
            attributes: BTreeMap::new(),
            first_mentioned_stage: stage,
            relations: Vec::new(),
            lifecycle: Vec::new(),
        }
    }

    /// Add an attribute unless the key is already set. First-stated wins.
    ///
    /// Returns true if the attribute was added.
    pub fn add_attribute(&mut self, key: &str, value: &str) -> bool {
        let key = key.trim().to_lowercase();
        if key.is_empty() || self.attributes.contains_key(&key) {
            return false;
        }
        self.attributes.insert(key, value.trim().to_string());
        true
    }

    /// Add a relation, collapsing exact duplicates.
    ///
    /// Returns true if the relation was new.
    pub fn add_relation(&mut self, kind: &str, target: EntityId) -> bool {
        let relation = Relation {
            kind: kind.trim().to_lowercase(),
            target,
        };
        if self.relations.contains(&relation) {
            return false;
        }
        self.relations.push(relation);
        true
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// True if the latest lifecycle change is a death.
    pub fn is_deceased(&self) -> bool {
        matches!(self.lifecycle.last(), Some(Lifecycle::Died(_)))
    }

    /// Record a death. Returns false if the character is already dead.
    pub fn die(&mut self, event: EventId) -> bool {
        if self.is_deceased() {
            return false;
        }
        self.lifecycle.push(Lifecycle::Died(event));
        true
    }

    /// Record a revival. Only a dead character can be revived.
    pub fn revive(&mut self, event: EventId) -> bool {
        if !self.is_deceased() {
            return false;
        }
        self.lifecycle.push(Lifecycle::Revived(event));
        true
    }

    pub fn revived_at(&self, event: EventId) -> bool {
        self.lifecycle.contains(&Lifecycle::Revived(event))
    }
}

/// Normalise a display name for identity matching: trimmed, lowercased,
/// internal whitespace collapsed.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
