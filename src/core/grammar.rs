/// Prompt grammar: template parsing, slot filling and prompt assembly.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::Path;
use thiserror::Error;

use crate::core::format::OUTPUT_INSTRUCTIONS;
use crate::core::theme::{NameRole, ThemeDomain};
use crate::schema::params::GenerationParameters;
use crate::schema::state::NarrativeState;

#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("template parse error: {0}")]
    TemplateParse(String),
    #[error("refinement prompt requested before any entity or event was recorded")]
    EmptyState,
    #[error("template field '{0}' needs narrative state, which stage 1 does not have")]
    MissingStageContext(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

const BUILTIN_TEMPLATES: &str = include_str!("../../theme_data/templates.ron");

/// Number of names suggested per `{names:role}` segment.
const NAMES_PER_ROLE: usize = 3;

/// Parameter-driven directive tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectiveKind {
    TimeSpan,
    EventDensity,
    NarrativeFocus,
    Persona,
}

/// Theme-level fields: `{theme.name}`, `{theme.tone}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThemeField {
    Name,
    Tone,
}

/// Narrative-state fields, only available to refinement prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateField {
    Entities,
    Events,
    Source,
}

impl StateField {
    fn name(&self) -> &'static str {
        match self {
            Self::Entities => "state.entities",
            Self::Events => "state.events",
            Self::Source => "state.source",
        }
    }
}

/// A segment of a parsed template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateSegment {
    /// Literal text, emitted as-is.
    Literal(String),
    /// Vocabulary slot: `{slot}`, or `{open:slot}` when custom details may fill it.
    Slot { name: String, accepts_custom: bool },
    /// Suggested names from the domain's pool: `{names:person}`.
    Names(NameRole),
    /// Fixed directive phrase: `{directive:time_span}`.
    Directive(DirectiveKind),
    /// `{theme.name}` / `{theme.tone}`.
    Theme(ThemeField),
    /// `{state.entities}` / `{state.events}` / `{state.source}`.
    State(StateField),
    /// The output contract: `{format}`.
    Format,
}

/// A parsed template: a sequence of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub segments: Vec<TemplateSegment>,
}

impl Template {
    /// Parse a template string into a sequence of segments.
    ///
    /// Syntax:
    /// - `{slot}` → `Slot`
    /// - `{open:slot}` → `Slot` that accepts custom details
    /// - `{names:role}` → `Names`
    /// - `{directive:kind}` → `Directive`
    /// - `{theme.field}` / `{state.field}` → `Theme` / `State`
    /// - `{format}` → `Format`
    /// - `{{` / `}}` → literal braces
    pub fn parse(input: &str) -> Result<Template, GrammarError> {
        let mut segments = Vec::new();
        let mut literal_buf = String::new();
        let chars: Vec<char> = input.chars().collect();
        let len = chars.len();
        let mut i = 0;

        while i < len {
            if chars[i] == '{' {
                if i + 1 < len && chars[i + 1] == '{' {
                    literal_buf.push('{');
                    i += 2;
                    continue;
                }

                if !literal_buf.is_empty() {
                    segments.push(TemplateSegment::Literal(std::mem::take(&mut literal_buf)));
                }

                let start = i + 1;
                let mut end = start;
                while end < len && chars[end] != '}' {
                    if chars[end] == '{' {
                        return Err(GrammarError::TemplateParse(
                            "nested braces are not allowed".to_string(),
                        ));
                    }
                    end += 1;
                }
                if end == len {
                    return Err(GrammarError::TemplateParse("unclosed brace".to_string()));
                }

                let content: String = chars[start..end].iter().collect();
                let content = content.trim();
                if content.is_empty() {
                    return Err(GrammarError::TemplateParse("empty braces".to_string()));
                }

                segments.push(Self::parse_segment(content)?);
                i = end + 1;
            } else if chars[i] == '}' {
                if i + 1 < len && chars[i + 1] == '}' {
                    literal_buf.push('}');
                    i += 2;
                    continue;
                }
                return Err(GrammarError::TemplateParse(
                    "unmatched closing brace".to_string(),
                ));
            } else {
                literal_buf.push(chars[i]);
                i += 1;
            }
        }

        if !literal_buf.is_empty() {
            segments.push(TemplateSegment::Literal(literal_buf));
        }

        Ok(Template { segments })
    }

    fn parse_segment(content: &str) -> Result<TemplateSegment, GrammarError> {
        if content == "format" {
            return Ok(TemplateSegment::Format);
        }

        if let Some(slot) = content.strip_prefix("open:") {
            return Ok(TemplateSegment::Slot {
                name: Self::slot_name(slot)?,
                accepts_custom: true,
            });
        }

        if let Some(role) = content.strip_prefix("names:") {
            return NameRole::from_keyword(role)
                .map(TemplateSegment::Names)
                .ok_or_else(|| {
                    GrammarError::TemplateParse(format!("unknown name role '{}'", role))
                });
        }

        if let Some(kind) = content.strip_prefix("directive:") {
            let kind = match kind {
                "time_span" => DirectiveKind::TimeSpan,
                "event_density" => DirectiveKind::EventDensity,
                "narrative_focus" => DirectiveKind::NarrativeFocus,
                "persona" => DirectiveKind::Persona,
                other => {
                    return Err(GrammarError::TemplateParse(format!(
                        "unknown directive '{}'",
                        other
                    )))
                }
            };
            return Ok(TemplateSegment::Directive(kind));
        }

        if let Some(field) = content.strip_prefix("theme.") {
            let field = match field {
                "name" => ThemeField::Name,
                "tone" => ThemeField::Tone,
                other => {
                    return Err(GrammarError::TemplateParse(format!(
                        "unknown theme field '{}'",
                        other
                    )))
                }
            };
            return Ok(TemplateSegment::Theme(field));
        }

        if let Some(field) = content.strip_prefix("state.") {
            let field = match field {
                "entities" => StateField::Entities,
                "events" => StateField::Events,
                "source" => StateField::Source,
                other => {
                    return Err(GrammarError::TemplateParse(format!(
                        "unknown state field '{}'",
                        other
                    )))
                }
            };
            return Ok(TemplateSegment::State(field));
        }

        Ok(TemplateSegment::Slot {
            name: Self::slot_name(content)?,
            accepts_custom: false,
        })
    }

    fn slot_name(raw: &str) -> Result<String, GrammarError> {
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(GrammarError::TemplateParse(format!(
                "invalid slot name '{}'",
                raw
            )));
        }
        Ok(raw.to_string())
    }

    /// Names of every vocabulary slot the template refers to.
    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            TemplateSegment::Slot { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    fn state_field(&self) -> Option<StateField> {
        self.segments.iter().find_map(|s| match s {
            TemplateSegment::State(field) => Some(*field),
            _ => None,
        })
    }
}

/// Bounds on how much narrative state a refinement prompt carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestLimits {
    /// Most recently introduced entities to list (N).
    pub entities: usize,
    /// Latest events to list (M).
    pub events: usize,
    /// Maximum characters of stage-1 text quoted back to the model.
    pub source_chars: usize,
}

impl Default for DigestLimits {
    fn default() -> Self {
        Self {
            entities: 8,
            events: 6,
            source_chars: 6000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RonTemplates {
    stage1: String,
    stage2: String,
}

/// Builds stage prompts from templates, a theme domain and user parameters.
#[derive(Debug, Clone)]
pub struct PromptGrammar {
    stage1: Template,
    stage2: Template,
    limits: DigestLimits,
}

/// Everything a template may draw on while rendering.
struct RenderContext<'a> {
    params: &'a GenerationParameters,
    domain: &'a ThemeDomain,
    state: Option<(&'a NarrativeState, &'a str)>,
}

impl PromptGrammar {
    /// The templates compiled into the crate.
    pub fn builtin() -> Result<Self, GrammarError> {
        Self::parse_ron(BUILTIN_TEMPLATES)
    }

    /// Load stage templates from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<Self, GrammarError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse stage templates from a RON string of the form
    /// `(stage1: "...", stage2: "...")`.
    pub fn parse_ron(input: &str) -> Result<Self, GrammarError> {
        let raw: RonTemplates = ron::from_str(input)?;
        Self::from_templates(&raw.stage1, &raw.stage2)
    }

    pub fn from_templates(stage1: &str, stage2: &str) -> Result<Self, GrammarError> {
        let stage1 = Template::parse(stage1)?;
        if let Some(field) = stage1.state_field() {
            return Err(GrammarError::MissingStageContext(field.name().to_string()));
        }
        Ok(Self {
            stage1,
            stage2: Template::parse(stage2)?,
            limits: DigestLimits::default(),
        })
    }

    pub fn with_digest_limits(mut self, limits: DigestLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn digest_limits(&self) -> DigestLimits {
        self.limits
    }

    pub fn stage1_template(&self) -> &Template {
        &self.stage1
    }

    pub fn stage2_template(&self) -> &Template {
        &self.stage2
    }

    /// Build the skeleton prompt for stage 1.
    pub fn build_stage1_prompt(
        &self,
        params: &GenerationParameters,
        domain: &ThemeDomain,
    ) -> Result<String, GrammarError> {
        let ctx = RenderContext {
            params,
            domain,
            state: None,
        };
        self.render(&self.stage1, &ctx)
    }

    /// Build the refinement prompt for stage 2 from a state snapshot.
    ///
    /// Fails with `EmptyState` if nothing has been ingested yet.
    pub fn build_stage2_prompt(
        &self,
        params: &GenerationParameters,
        domain: &ThemeDomain,
        state: &NarrativeState,
        stage1_text: &str,
    ) -> Result<String, GrammarError> {
        if state.is_empty() {
            return Err(GrammarError::EmptyState);
        }
        let ctx = RenderContext {
            params,
            domain,
            state: Some((state, stage1_text)),
        };
        self.render(&self.stage2, &ctx)
    }

    fn render(&self, template: &Template, ctx: &RenderContext<'_>) -> Result<String, GrammarError> {
        let mut out = String::new();
        for segment in &template.segments {
            match segment {
                TemplateSegment::Literal(text) => out.push_str(text),
                TemplateSegment::Slot {
                    name,
                    accepts_custom,
                } => out.push_str(&fill_slot(name, *accepts_custom, ctx.params, ctx.domain)),
                TemplateSegment::Names(role) => out.push_str(&suggest_names(ctx.domain, *role)),
                TemplateSegment::Directive(kind) => out.push_str(match kind {
                    DirectiveKind::TimeSpan => ctx.params.time_span.directive(),
                    DirectiveKind::EventDensity => ctx.params.event_density.directive(),
                    DirectiveKind::NarrativeFocus => ctx.params.narrative_focus.directive(),
                    DirectiveKind::Persona => ctx.params.persona.directive(),
                }),
                TemplateSegment::Theme(ThemeField::Name) => out.push_str(&ctx.domain.name),
                TemplateSegment::Theme(ThemeField::Tone) => {
                    if ctx.domain.tone_descriptors.is_empty() {
                        out.push_str("evocative and internally consistent");
                    } else {
                        out.push_str(&ctx.domain.tone_descriptors.join(", "));
                    }
                }
                TemplateSegment::State(field) => {
                    let (state, source) = ctx
                        .state
                        .ok_or_else(|| GrammarError::MissingStageContext(field.name().to_string()))?;
                    match field {
                        StateField::Entities => {
                            out.push_str(&render_entity_digest(state, self.limits.entities))
                        }
                        StateField::Events => {
                            out.push_str(&render_event_digest(state, self.limits.events))
                        }
                        StateField::Source => {
                            out.push_str(&truncate_chars(source, self.limits.source_chars))
                        }
                    }
                }
                TemplateSegment::Format => out.push_str(OUTPUT_INSTRUCTIONS),
            }
        }
        Ok(out)
    }
}

/// Stable RNG for a `(theme, slot)` pair. FxHasher has no random state, so
/// the same pair always yields the same selection.
fn slot_rng(theme_id: &str, slot: &str) -> StdRng {
    let mut hasher = FxHasher::default();
    theme_id.hash(&mut hasher);
    slot.hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}

/// Resolve a slot: custom details (if accepted), then the domain's
/// vocabulary, then a generic fallback.
fn fill_slot(
    slot: &str,
    accepts_custom: bool,
    params: &GenerationParameters,
    domain: &ThemeDomain,
) -> String {
    if accepts_custom {
        if let Some(details) = &params.custom_details {
            return details.clone();
        }
    }
    if let Some(candidates) = domain.candidates(slot) {
        let mut rng = slot_rng(&domain.theme_id, slot);
        if let Some(choice) = candidates.choose(&mut rng) {
            return choice.clone();
        }
    }
    fallback_phrase(slot).to_string()
}

fn fallback_phrase(slot: &str) -> &'static str {
    match slot {
        "subject" => "a people and the forces that shaped them",
        "premise" => "Invent a creative and original chronology.",
        "setting" => "places that feel lived-in and specific",
        "conflict" => "competing ambitions that drive events forward",
        "imagery" => "concrete sensory details",
        _ => "details appropriate to the setting",
    }
}

fn suggest_names(domain: &ThemeDomain, role: NameRole) -> String {
    let pool = domain.name_pool.get(role);
    if pool.is_empty() {
        return "names of your own invention".to_string();
    }
    let mut rng = slot_rng(&domain.theme_id, role.keyword());
    pool.choose_multiple(&mut rng, NAMES_PER_ROLE)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Short reference lines for the most recently introduced entities.
fn render_entity_digest(state: &NarrativeState, limit: usize) -> String {
    let lines: Vec<String> = state
        .recent_entities(limit)
        .into_iter()
        .map(|entity| {
            let mut line = format!(
                "- {} {} [{}]",
                entity.kind.label(),
                entity.display_name,
                entity.id
            );
            if let Some(role) = entity.attribute("role") {
                line.push_str(&format!(", introduced as {}", role));
            }
            for (key, value) in &entity.attributes {
                if key != "role" {
                    line.push_str(&format!(", {}: {}", key, value));
                }
            }
            for relation in &entity.relations {
                // Only cite entities that exist in this snapshot.
                if let Some(target) = state.entity(relation.target) {
                    line.push_str(&format!(
                        ", {} {} [{}]",
                        relation.kind, target.display_name, target.id
                    ));
                }
            }
            line
        })
        .collect();
    lines.join("\n")
}

/// Short reference lines for the latest events, newest first.
fn render_event_digest(state: &NarrativeState, limit: usize) -> String {
    let events = state.recent_events(limit);
    if events.is_empty() {
        return "- none yet".to_string();
    }
    events
        .into_iter()
        .map(|event| {
            let mut line = format!("- {}: {}", event.id, event.summary);
            let names: Vec<&str> = event
                .participants
                .iter()
                .filter_map(|id| state.entity(*id))
                .map(|e| e.display_name.as_str())
                .collect();
            if !names.is_empty() {
                line.push_str(&format!(" (involving {})", names.join(", ")));
            }
            let causes: Vec<String> = event
                .causal_predecessors
                .iter()
                .filter(|id| state.event(**id).is_some())
                .map(|id| id.to_string())
                .collect();
            if !causes.is_empty() {
                line.push_str(&format!(" (follows {})", causes.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: &str, max: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{} [...]", &text[..cut]),
        None => text.to_string(),
    }
}
