/// The chronicle pipeline: skeleton → refinement orchestration.
///
/// Wires together theme lookup, prompt building, the text generator,
/// state tracking and the coherence pass for one run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::coherence::{check_coherence, CoherenceNote, NoteKind};
use crate::core::config::{ConfigError, GeneratorConfig};
use crate::core::generator::{GenerationError, TextGenerator};
use crate::core::grammar::{GrammarError, PromptGrammar};
use crate::core::parser::prose_lines;
use crate::core::theme::{ThemeError, ThemeRegistry};
use crate::core::tracker::{IngestReport, NarrativeTracker, TrackerError};
use crate::schema::params::{GenerationParameters, ParamsError};
use crate::schema::state::NarrativeState;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("theme error: {0}")]
    Theme(#[from] ThemeError),
    #[error("grammar error: {0}")]
    Grammar(#[from] GrammarError),
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid parameters: {0}")]
    InvalidParameters(#[from] ParamsError),
    #[error("stage {stage} generation unavailable after {attempts} attempts: {last}")]
    GenerationUnavailable {
        stage: u8,
        attempts: u32,
        last: GenerationError,
    },
}

/// States a run passes through. The two stage-2 states are skipped when
/// multi-stage generation is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Init,
    Stage1Prompted,
    Stage1Parsed,
    Stage2Prompted,
    Stage2Parsed,
    CoherenceChecked,
    Done,
}

impl PipelineStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Stage1Prompted => "stage1_prompted",
            Self::Stage1Parsed => "stage1_parsed",
            Self::Stage2Prompted => "stage2_prompted",
            Self::Stage2Parsed => "stage2_parsed",
            Self::CoherenceChecked => "coherence_checked",
            Self::Done => "done",
        }
    }

    /// Whether a run may move from `self` straight to `next`.
    pub fn can_advance_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        matches!(
            (self, next),
            (Init, Stage1Prompted)
                | (Stage1Prompted, Stage1Parsed)
                | (Stage1Parsed, Stage2Prompted)
                | (Stage1Parsed, CoherenceChecked)
                | (Stage2Prompted, Stage2Parsed)
                | (Stage2Parsed, CoherenceChecked)
                | (CoherenceChecked, Done)
        )
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub parameters: GenerationParameters,
    pub stage1_text: String,
    /// Empty when multi-stage generation was disabled or skipped.
    pub stage2_text: String,
    pub final_state: NarrativeState,
    pub coherence_notes: Vec<CoherenceNote>,
    /// States visited, in order.
    pub stages: Vec<PipelineStage>,
}

impl RunResult {
    /// The refined text if there is one, otherwise the skeleton.
    pub fn final_text(&self) -> &str {
        if self.stage2_text.trim().is_empty() {
            &self.stage1_text
        } else {
            &self.stage2_text
        }
    }

    /// Words of prose in the final text, not counting record lines.
    pub fn word_count(&self) -> usize {
        prose_lines(self.final_text())
            .map(|line| line.split_whitespace().count())
            .sum()
    }

    pub fn meets_word_target(&self, config: &GeneratorConfig) -> bool {
        (config.min_words..=config.max_words).contains(&self.word_count())
    }

    pub fn notes_of(&self, kind: NoteKind) -> impl Iterator<Item = &CoherenceNote> {
        self.coherence_notes.iter().filter(move |n| n.kind == kind)
    }
}

/// The top-level chronicle engine. Built via `ChronicleEngine::builder()`.
///
/// The engine holds only read-only data, so one instance can serve any
/// number of concurrent runs; each run owns its own tracker.
#[derive(Debug, Clone)]
pub struct ChronicleEngine {
    registry: Arc<ThemeRegistry>,
    grammar: PromptGrammar,
    config: GeneratorConfig,
}

/// Builder for constructing a `ChronicleEngine`.
#[derive(Debug, Default)]
pub struct ChronicleEngineBuilder {
    themes_path: Option<PathBuf>,
    templates_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    /// Directly provided registry (shared between engines).
    registry: Option<Arc<ThemeRegistry>>,
    /// Directly provided templates (for testing without files).
    grammar: Option<PromptGrammar>,
    /// Directly provided config (for testing without files).
    config: Option<GeneratorConfig>,
}

/// Per-run bookkeeping: the trace of visited states and collected notes.
struct RunLog {
    stages: Vec<PipelineStage>,
    notes: Vec<CoherenceNote>,
}

impl RunLog {
    fn new() -> Self {
        Self {
            stages: vec![PipelineStage::Init],
            notes: Vec::new(),
        }
    }

    fn enter(&mut self, next: PipelineStage) {
        let current = self.stages.last().copied().unwrap_or(PipelineStage::Init);
        debug_assert!(
            current.can_advance_to(next),
            "illegal transition {} -> {}",
            current.name(),
            next.name()
        );
        debug!(from = current.name(), to = next.name(), "pipeline transition");
        self.stages.push(next);
    }

    fn note(&mut self, kind: NoteKind, message: String) {
        warn!(?kind, "{}", message);
        self.notes.push(CoherenceNote::new(kind, message));
    }

    /// Turn ingest warnings into notes and flag a stage with no structure.
    fn absorb(&mut self, report: &IngestReport, stage: u8) {
        for warning in &report.warnings {
            self.notes.push(CoherenceNote::new(
                NoteKind::Ingest,
                format!("stage {}: {}", stage, warning),
            ));
        }
        if report.is_empty() {
            self.note(
                NoteKind::EmptyStage,
                format!("stage {} produced no extractable structure", stage),
            );
        }
    }
}

impl ChronicleEngine {
    pub fn builder() -> ChronicleEngineBuilder {
        ChronicleEngineBuilder::default()
    }

    pub fn registry(&self) -> &ThemeRegistry {
        &self.registry
    }

    pub fn grammar(&self) -> &PromptGrammar {
        &self.grammar
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Run the full pipeline for one parameter set.
    pub fn run<G>(
        &self,
        params: GenerationParameters,
        generator: &G,
    ) -> Result<RunResult, PipelineError>
    where
        G: TextGenerator + ?Sized,
    {
        params.validate()?;
        let domain = self.registry.get_domain(&params.theme_id)?;
        let mut log = RunLog::new();
        let mut tracker = NarrativeTracker::new();
        info!(
            theme = %params.theme_id,
            multi_stage = params.multi_stage_enabled,
            "starting chronicle run"
        );

        // Stage 1: skeleton.
        let prompt = self.grammar.build_stage1_prompt(&params, domain)?;
        let stage1_text = self.generate(
            generator,
            1,
            &prompt,
            self.config.stage1_max_tokens,
            self.config.stage1_temperature(params.persona),
        )?;
        log.enter(PipelineStage::Stage1Prompted);

        let report = tracker.ingest(&stage1_text, 1)?;
        log.absorb(&report, 1);
        log.enter(PipelineStage::Stage1Parsed);

        // Stage 2: refinement over a snapshot of stage-1 state.
        let mut stage2_text = String::new();
        if params.multi_stage_enabled {
            let snapshot = tracker.snapshot();
            if snapshot.is_empty() {
                log.note(
                    NoteKind::EmptyStage,
                    "stage 2 skipped: nothing from stage 1 to refine".to_string(),
                );
            } else {
                let prompt =
                    self.grammar
                        .build_stage2_prompt(&params, domain, &snapshot, &stage1_text)?;
                stage2_text = self.generate(
                    generator,
                    2,
                    &prompt,
                    self.config.stage2_max_tokens,
                    self.config.stage2_temperature(params.persona),
                )?;
                log.enter(PipelineStage::Stage2Prompted);

                let report = tracker.ingest(&stage2_text, 2)?;
                log.absorb(&report, 2);
                log.enter(PipelineStage::Stage2Parsed);
            }
        }

        let final_state = tracker.into_state();
        for note in check_coherence(&final_state) {
            log.note(note.kind, note.message);
        }
        log.enter(PipelineStage::CoherenceChecked);
        log.enter(PipelineStage::Done);

        info!(
            entities = final_state.entity_count(),
            events = final_state.event_count(),
            notes = log.notes.len(),
            "chronicle run complete"
        );

        Ok(RunResult {
            parameters: params,
            stage1_text,
            stage2_text,
            final_state,
            coherence_notes: log.notes,
            stages: log.stages,
        })
    }

    /// Call the generator, retrying on failure or an empty response.
    fn generate<G>(
        &self,
        generator: &G,
        stage: u8,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, PipelineError>
    where
        G: TextGenerator + ?Sized,
    {
        let attempts = self.config.attempts();
        let mut last = GenerationError::EmptyResponse;

        for attempt in 1..=attempts {
            debug!(
                stage,
                attempt,
                prompt_chars = prompt.len(),
                max_tokens,
                temperature,
                "calling text generator"
            );
            match generator.generate(prompt, max_tokens, temperature) {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => last = GenerationError::EmptyResponse,
                Err(e) => last = e,
            }
            warn!(stage, attempt, error = %last, "generation attempt failed");
        }

        Err(PipelineError::GenerationUnavailable {
            stage,
            attempts,
            last,
        })
    }
}

impl ChronicleEngineBuilder {
    /// Load the theme registry from a RON file instead of the built-in set.
    pub fn themes_path(mut self, path: impl AsRef<Path>) -> Self {
        self.themes_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load stage templates from a RON file instead of the built-in pair.
    pub fn templates_path(mut self, path: impl AsRef<Path>) -> Self {
        self.templates_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Share an existing registry.
    pub fn with_registry(mut self, registry: Arc<ThemeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Provide templates directly (for testing without files).
    pub fn with_grammar(mut self, grammar: PromptGrammar) -> Self {
        self.grammar = Some(grammar);
        self
    }

    /// Provide config directly (for testing without files).
    pub fn with_config(mut self, config: GeneratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<ChronicleEngine, PipelineError> {
        let registry = match (self.registry, self.themes_path) {
            (Some(registry), _) => registry,
            (None, Some(path)) => Arc::new(ThemeRegistry::load_from_ron(&path)?),
            (None, None) => Arc::new(ThemeRegistry::builtin()?),
        };

        let grammar = match (self.grammar, self.templates_path) {
            (Some(grammar), _) => grammar,
            (None, Some(path)) => PromptGrammar::load_from_ron(&path)?,
            (None, None) => PromptGrammar::builtin()?,
        };

        let config = match (self.config, self.config_path) {
            (Some(config), _) => {
                config.validate()?;
                config
            }
            (None, Some(path)) => GeneratorConfig::load_from_ron(&path)?,
            (None, None) => GeneratorConfig::default(),
        };

        debug!(themes = registry.len(), "chronicle engine built");

        Ok(ChronicleEngine {
            registry,
            grammar: grammar.with_digest_limits(config.digest_limits()),
            config,
        })
    }
}
