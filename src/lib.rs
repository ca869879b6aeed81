//! floweval: batch evaluator for candidate data-pipeline repositories.
//!
//! This library clones each candidate repository, runs its pipeline inside a
//! time-bounded Docker sandbox, collects a bounded evidence snapshot, and
//! scores the repository with a fixed registry of deterministic checks.

// Core modules
pub mod acquire;
pub mod batch;
pub mod cli;
pub mod error;
pub mod evidence;
pub mod report;
pub mod roster;
pub mod sandbox;
pub mod scoring;

// Re-export commonly used error types
pub use error::{AcquisitionError, ConfigError, RosterError};
