/// Generation settings: token limits, temperatures, retries and digest bounds.
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::core::grammar::DigestLimits;
use crate::schema::params::Persona;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Knobs passed to the text generator and the prompt digest.
///
/// Every field has a default, so a RON file only needs the fields it
/// changes: `(retry_limit: 2, stage2_max_tokens: 2000)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub stage1_max_tokens: u32,
    pub stage2_max_tokens: u32,
    /// Overrides the persona temperature when set.
    pub temperature: Option<f32>,
    /// Subtracted from the stage-1 temperature for refinement.
    pub stage2_cooling: f32,
    /// Extra attempts after a failed generator call.
    pub retry_limit: u32,
    pub digest_entities: usize,
    pub digest_events: usize,
    pub max_source_chars: usize,
    pub min_words: usize,
    pub max_words: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        let digest = DigestLimits::default();
        Self {
            stage1_max_tokens: 1200,
            stage2_max_tokens: 1500,
            temperature: None,
            stage2_cooling: 0.1,
            retry_limit: 1,
            digest_entities: digest.entities,
            digest_events: digest.events,
            max_source_chars: digest.source_chars,
            min_words: 500,
            max_words: 1000,
        }
    }
}

impl GeneratorConfig {
    pub fn load_from_ron(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<Self, ConfigError> {
        let config: GeneratorConfig = ron::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stage1_max_tokens == 0 || self.stage2_max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be positive".into()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::Invalid(format!(
                    "temperature {} outside 0.0..=2.0",
                    t
                )));
            }
        }
        if self.min_words > self.max_words {
            return Err(ConfigError::Invalid(format!(
                "min_words {} exceeds max_words {}",
                self.min_words, self.max_words
            )));
        }
        Ok(())
    }

    pub fn digest_limits(&self) -> DigestLimits {
        DigestLimits {
            entities: self.digest_entities,
            events: self.digest_events,
            source_chars: self.max_source_chars,
        }
    }

    pub fn stage1_temperature(&self, persona: Persona) -> f32 {
        self.temperature.unwrap_or_else(|| persona.temperature())
    }

    pub fn stage2_temperature(&self, persona: Persona) -> f32 {
        (self.stage1_temperature(persona) - self.stage2_cooling).max(0.0)
    }

    /// Total generator calls allowed per stage.
    pub fn attempts(&self) -> u32 {
        self.retry_limit + 1
    }
}
