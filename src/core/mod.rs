pub mod batch;
pub mod coherence;
pub mod config;
pub mod format;
pub mod generator;
pub mod grammar;
pub mod parser;
pub mod pipeline;
pub mod theme;
pub mod tracker;
