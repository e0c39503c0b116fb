//! Generation pipeline orchestration.
//!
//! Drives a [`shotchain_core::plan::GenerationPlan`] against a generation
//! backend one segment at a time: resolves chained seed frames, fills the
//! workflow template, polls submitted jobs to a terminal state, persists
//! the plan after every transition, and emits a lazy stream of progress
//! events. Collaborators are injected through the [`backend`],
//! [`extractor`], and [`state`] seams; no process-wide state.

pub mod backend;
pub mod events;
pub mod extractor;
pub mod orchestrator;
pub mod settings;
pub mod state;
