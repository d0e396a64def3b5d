/// Batch harness: many independent runs against one engine.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::core::generator::TextGenerator;
use crate::core::pipeline::{ChronicleEngine, PipelineError, RunResult};
use crate::schema::params::GenerationParameters;

impl ChronicleEngine {
    /// Run every parameter set on its own scoped thread.
    ///
    /// Results come back in input order. Each run owns its tracker; the
    /// engine and generator are shared read-only.
    pub fn run_batch<G>(
        &self,
        cases: &[GenerationParameters],
        generator: &G,
    ) -> Vec<Result<RunResult, PipelineError>>
    where
        G: TextGenerator + ?Sized,
    {
        info!(cases = cases.len(), "starting batch");
        std::thread::scope(|scope| {
            let handles: Vec<_> = cases
                .iter()
                .map(|params| scope.spawn(move || self.run(params.clone(), generator)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

/// Aggregate figures over a batch of runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Mean prose words over successful runs.
    pub average_words: f64,
    pub within_word_target: usize,
    pub coherence_notes: usize,
    pub by_theme: BTreeMap<String, usize>,
    pub by_time_span: BTreeMap<String, usize>,
    pub by_event_density: BTreeMap<String, usize>,
    pub by_narrative_focus: BTreeMap<String, usize>,
    pub failures: Vec<String>,
}

impl BatchSummary {
    pub fn from_results(
        results: &[Result<RunResult, PipelineError>],
        min_words: usize,
        max_words: usize,
    ) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..Default::default()
        };
        let mut words = 0usize;

        for result in results {
            match result {
                Ok(run) => {
                    summary.succeeded += 1;
                    let count = run.word_count();
                    words += count;
                    if (min_words..=max_words).contains(&count) {
                        summary.within_word_target += 1;
                    }
                    summary.coherence_notes += run.coherence_notes.len();

                    let p = &run.parameters;
                    *summary.by_theme.entry(p.theme_id.clone()).or_default() += 1;
                    *summary
                        .by_time_span
                        .entry(p.time_span.keyword().to_string())
                        .or_default() += 1;
                    *summary
                        .by_event_density
                        .entry(p.event_density.keyword().to_string())
                        .or_default() += 1;
                    *summary
                        .by_narrative_focus
                        .entry(p.narrative_focus.keyword().to_string())
                        .or_default() += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    summary.failures.push(e.to_string());
                }
            }
        }

        if summary.succeeded > 0 {
            summary.average_words = words as f64 / summary.succeeded as f64;
        }
        summary
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }
}
