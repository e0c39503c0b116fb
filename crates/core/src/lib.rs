//! Domain types and pure logic for the shot-chain generation pipeline.
//!
//! Everything here is free of internal dependencies so it can be used by
//! the backend client, the orchestration layer, and any future CLI tooling
//! alike: shot/plan data model, plan building and reconciliation, workflow
//! template slot filling, deterministic output naming, and the shared
//! ffmpeg/ffprobe command utilities.

pub mod error;
pub mod ffmpeg;
pub mod hashing;
pub mod naming;
pub mod plan;
pub mod plan_builder;
pub mod types;
pub mod workflow;
