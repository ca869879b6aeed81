//! Deterministic check registry and scoring engine.

pub mod checks;
pub mod config;
pub mod engine;

pub use checks::{CheckDefinition, CheckInput};
pub use config::{Aggregation, ScoringConfig};
pub use engine::{evaluate, ScoreCard};
