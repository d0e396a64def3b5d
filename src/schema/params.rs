use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("unknown {field} value '{value}'")]
    UnknownValue { field: &'static str, value: String },
    #[error("custom details too short ({0} chars, minimum 10)")]
    CustomTooShort(usize),
    #[error("custom details too long ({0} chars, maximum 500)")]
    CustomTooLong(usize),
    #[error("custom details contain a disallowed instruction: '{0}'")]
    ForbiddenContent(String),
}

pub const MIN_CUSTOM_CHARS: usize = 10;
pub const MAX_CUSTOM_CHARS: usize = 500;

/// Phrases that try to steer the model away from the prompt it was given.
const FORBIDDEN_PHRASES: &[&str] = &[
    "ignore previous",
    "ignore all",
    "ignore above",
    "disregard instructions",
    "disregard rules",
    "new instructions",
    "system:",
    "assistant:",
    "you are now",
    "forget everything",
    "forget all",
    "<script",
    "<iframe",
    "javascript:",
];

macro_rules! keyword_enum {
    ($name:ident, $field:literal, { $($variant:ident => $kw:literal => $directive:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn keyword(&self) -> &'static str {
                match self {
                    $(Self::$variant => $kw),+
                }
            }

            /// Fixed directive phrase injected into prompt templates.
            pub fn directive(&self) -> &'static str {
                match self {
                    $(Self::$variant => $directive),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParamsError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($kw => Ok(Self::$variant),)+
                    other => Err(ParamsError::UnknownValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

keyword_enum!(TimeSpan, "time_span", {
    Brief => "brief" => "spanning 50-100 years, within a single lifetime or two",
    Moderate => "moderate" => "spanning 200-500 years across several generations",
    Epic => "epic" => "spanning 1000+ years across many generations, dynasties and eras",
});

keyword_enum!(EventDensity, "event_density", {
    Sparse => "sparse" => "3-5 major events",
    Moderate => "moderate" => "6-8 significant events",
    Rich => "rich" => "10-12 detailed events",
});

keyword_enum!(NarrativeFocus, "narrative_focus", {
    Political => "political" => "political power, governance, wars, alliances",
    Cultural => "cultural" => "cultural evolution, traditions, art, religion",
    Military => "military" => "conquests, battles, strategies, heroes",
    Economic => "economic" => "trade, resources, wealth, technology",
    Personal => "personal" => "individual lives, relationships, personal journeys",
});

keyword_enum!(Persona, "persona", {
    SmoothStoryteller => "smooth_storyteller" =>
        "Write as a smooth storyteller: connect events with clear transitions, show reactions and consequences, keep the pacing even.",
    EpicChronicler => "epic_chronicler" =>
        "Write as an epic chronicler: favour sweeping, high-stakes events with lasting consequences and evocative imagery.",
    IntimateHistorian => "intimate_historian" =>
        "Write as an intimate historian: follow individual characters, their relationships, motives and private conflicts.",
    AnalyticalArchivist => "analytical_archivist" =>
        "Write as an analytical archivist: precise, objective, with explicit cause and effect between every event.",
});

impl Persona {
    /// Sampling temperature this persona is written for.
    pub fn temperature(&self) -> f32 {
        match self {
            Self::SmoothStoryteller => 0.7,
            Self::EpicChronicler => 0.8,
            Self::IntimateHistorian => 0.6,
            Self::AnalyticalArchivist => 0.5,
        }
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::SmoothStoryteller
    }
}

/// Snapshot of the user's choices for one run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub theme_id: String,
    #[serde(default)]
    pub custom_details: Option<String>,
    pub time_span: TimeSpan,
    pub event_density: EventDensity,
    pub narrative_focus: NarrativeFocus,
    #[serde(default)]
    pub persona: Persona,
    pub multi_stage_enabled: bool,
}

impl GenerationParameters {
    /// Parameters for `theme_id` with moderate defaults and multi-stage on.
    pub fn new(theme_id: &str) -> Self {
        Self {
            theme_id: theme_id.to_string(),
            custom_details: None,
            time_span: TimeSpan::Moderate,
            event_density: EventDensity::Moderate,
            narrative_focus: NarrativeFocus::Political,
            persona: Persona::default(),
            multi_stage_enabled: true,
        }
    }

    /// Set custom details. Whitespace is collapsed and blank input is
    /// treated as absent.
    pub fn with_custom_details(mut self, details: &str) -> Self {
        let collapsed = details.split_whitespace().collect::<Vec<_>>().join(" ");
        self.custom_details = if collapsed.is_empty() {
            None
        } else {
            Some(collapsed)
        };
        self
    }

    pub fn with_time_span(mut self, time_span: TimeSpan) -> Self {
        self.time_span = time_span;
        self
    }

    pub fn with_event_density(mut self, density: EventDensity) -> Self {
        self.event_density = density;
        self
    }

    pub fn with_narrative_focus(mut self, focus: NarrativeFocus) -> Self {
        self.narrative_focus = focus;
        self
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_multi_stage(mut self, enabled: bool) -> Self {
        self.multi_stage_enabled = enabled;
        self
    }

    /// Check the free-text field. Absent custom details are always valid.
    pub fn validate(&self) -> Result<(), ParamsError> {
        let Some(details) = &self.custom_details else {
            return Ok(());
        };
        let len = details.chars().count();
        if len < MIN_CUSTOM_CHARS {
            return Err(ParamsError::CustomTooShort(len));
        }
        if len > MAX_CUSTOM_CHARS {
            return Err(ParamsError::CustomTooLong(len));
        }
        let folded = details.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if let Some(phrase) = FORBIDDEN_PHRASES.iter().find(|p| folded.contains(*p)) {
            return Err(ParamsError::ForbiddenContent(phrase.to_string()));
        }
        Ok(())
    }
}
