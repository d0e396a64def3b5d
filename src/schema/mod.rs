//! Plain data shared by every stage of a run.

pub mod entity;
pub mod event;
pub mod params;
pub mod state;
