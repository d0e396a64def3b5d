/// Theme domain registry: immutable per-theme vocabulary tables.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("unknown theme '{0}'")]
    UnknownTheme(String),
    #[error("theme '{0}' is defined more than once")]
    DuplicateTheme(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

const BUILTIN_THEMES: &str = include_str!("../../theme_data/themes.ron");

/// Number of themes shipped in the built-in registry.
pub const BUILTIN_THEME_COUNT: usize = 9;

/// Which pool a suggested name is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameRole {
    Person,
    Place,
    Faction,
    Item,
}

impl NameRole {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "person" => Some(Self::Person),
            "place" => Some(Self::Place),
            "faction" => Some(Self::Faction),
            "item" => Some(Self::Item),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Place => "place",
            Self::Faction => "faction",
            Self::Item => "item",
        }
    }
}

/// Candidate names for each role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamePool {
    #[serde(default)]
    pub person: Vec<String>,
    #[serde(default)]
    pub place: Vec<String>,
    #[serde(default)]
    pub faction: Vec<String>,
    #[serde(default)]
    pub item: Vec<String>,
}

impl NamePool {
    pub fn get(&self, role: NameRole) -> &[String] {
        match role {
            NameRole::Person => &self.person,
            NameRole::Place => &self.place,
            NameRole::Faction => &self.faction,
            NameRole::Item => &self.item,
        }
    }
}

/// Static vocabulary and tone bundle for one narrative setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeDomain {
    pub theme_id: String,
    /// Human-readable theme name used inside prompts.
    pub name: String,
    #[serde(default)]
    pub name_pool: NamePool,
    /// Semantic slot → ordered candidate phrases.
    #[serde(default)]
    pub vocabulary: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tone_descriptors: Vec<String>,
}

impl ThemeDomain {
    /// Candidate phrases for a slot, if the domain defines any.
    pub fn candidates(&self, slot: &str) -> Option<&[String]> {
        self.vocabulary
            .get(slot)
            .map(Vec::as_slice)
            .filter(|c| !c.is_empty())
    }
}

/// Read-only registry of theme domains, built once and shared by every run.
#[derive(Debug, Clone, Default)]
pub struct ThemeRegistry {
    domains: BTreeMap<String, ThemeDomain>,
}

impl ThemeRegistry {
    /// The registry compiled into the crate.
    pub fn builtin() -> Result<Self, ThemeError> {
        Self::parse_ron(BUILTIN_THEMES)
    }

    /// Load a registry from a RON file holding a list of theme domains.
    pub fn load_from_ron(path: &Path) -> Result<Self, ThemeError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a registry from a RON string holding a list of theme domains.
    pub fn parse_ron(input: &str) -> Result<Self, ThemeError> {
        let raw: Vec<ThemeDomain> = ron::from_str(input)?;
        let mut domains = BTreeMap::new();
        for domain in raw {
            let id = domain.theme_id.clone();
            if domains.insert(id.clone(), domain).is_some() {
                return Err(ThemeError::DuplicateTheme(id));
            }
        }
        Ok(Self { domains })
    }

    pub fn get_domain(&self, theme_id: &str) -> Result<&ThemeDomain, ThemeError> {
        self.domains
            .get(theme_id.trim())
            .ok_or_else(|| ThemeError::UnknownTheme(theme_id.to_string()))
    }

    pub fn theme_ids(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    pub fn domains(&self) -> impl Iterator<Item = &ThemeDomain> {
        self.domains.values()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_exactly_nine_themes() {
        let registry = ThemeRegistry::builtin().unwrap();
        assert_eq!(registry.len(), BUILTIN_THEME_COUNT);
        assert!(registry.theme_ids().any(|id| id == "ancient_rome"));
    }

    #[test]
    fn get_known_domain() {
        let registry = ThemeRegistry::builtin().unwrap();
        let rome = registry.get_domain("ancient_rome").unwrap();
        assert_eq!(rome.name, "Ancient Rome");
        assert!(!rome.name_pool.get(NameRole::Person).is_empty());
        assert!(rome.candidates("conflict").is_some());
        assert!(rome.candidates("no_such_slot").is_none());
    }

    #[test]
    fn unknown_theme_fails() {
        let registry = ThemeRegistry::builtin().unwrap();
        let err = registry.get_domain("atlantis").unwrap_err();
        assert!(matches!(err, ThemeError::UnknownTheme(ref id) if id == "atlantis"));
    }

    #[test]
    fn duplicate_theme_rejected() {
        let input = r#"[
            (theme_id: "twice", name: "One"),
            (theme_id: "twice", name: "Two"),
        ]"#;
        assert!(matches!(
            ThemeRegistry::parse_ron(input),
            Err(ThemeError::DuplicateTheme(_))
        ));
    }

    #[test]
    fn minimal_domain_defaults() {
        let registry = ThemeRegistry::parse_ron(r#"[(theme_id: "bare", name: "Bare")]"#).unwrap();
        let bare = registry.get_domain("bare").unwrap();
        assert!(bare.vocabulary.is_empty());
        assert!(bare.name_pool.get(NameRole::Item).is_empty());
        assert!(bare.tone_descriptors.is_empty());
    }

    #[test]
    fn every_builtin_theme_has_names_for_every_role() {
        let registry = ThemeRegistry::builtin().unwrap();
        for domain in registry.domains() {
            for role in [NameRole::Person, NameRole::Place, NameRole::Faction, NameRole::Item] {
                assert!(
                    !domain.name_pool.get(role).is_empty(),
                    "{} has no {} names",
                    domain.theme_id,
                    role.keyword()
                );
            }
        }
    }
}
