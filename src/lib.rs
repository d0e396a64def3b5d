//! Chronicle Engine: staged, state-aware prompting for historical fiction.
//!
//! Drives an external text generator through a skeleton pass and a
//! refinement pass. Prompts are built from theme vocabulary and templates;
//! entities and events parsed from each response are tracked across stages
//! so the refinement prompt can build on what already exists, and a
//! coherence pass reports inconsistencies in the finished chronicle.

pub mod core;
pub mod schema;

pub use crate::core::generator::{GenerationError, ScriptedGenerator, TextGenerator};
pub use crate::core::pipeline::{ChronicleEngine, PipelineError, PipelineStage, RunResult};
pub use crate::schema::params::GenerationParameters;
