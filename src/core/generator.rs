/// The text-generation seam: prompt in, text out.
///
/// The pipeline never talks to a model provider directly. Callers supply
/// anything implementing `TextGenerator`; tests use `ScriptedGenerator`.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("quota exceeded: {0}")]
    Quota(String),
    #[error("generation timed out")]
    Timeout,
    #[error("generator returned an empty response")]
    EmptyResponse,
}

/// Produces text for a prompt.
///
/// Implementations must be shareable across threads so batch runs can use
/// one generator for every case.
pub trait TextGenerator: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, GenerationError>;
}

impl<F> TextGenerator for F
where
    F: Fn(&str, u32, f32) -> Result<String, GenerationError> + Send + Sync,
{
    fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, GenerationError> {
        self(prompt, max_tokens, temperature)
    }
}

/// One generator call as observed by `ScriptedGenerator`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Replays canned responses in order. Once the script runs out every call
/// fails with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn respond(self, text: &str) -> Self {
        self.push(Ok(text.to_string()))
    }

    /// Queue a failure.
    pub fn fail(self, error: GenerationError) -> Self {
        self.push(Err(error))
    }

    fn push(self, entry: Result<String, GenerationError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, GenerationError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                prompt: prompt.to_string(),
                max_tokens,
                temperature,
            });
        }
        self.script
            .lock()
            .map_err(|_| GenerationError::Transport("script lock poisoned".to_string()))?
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Transport("script exhausted".to_string())))
    }
}
