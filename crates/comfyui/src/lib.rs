//! REST client for ComfyUI-style generation servers.
//!
//! Provides HTTP API wrappers (workflow submission, queue inspection,
//! history retrieval) and typed parsing of the queue/history documents
//! used to classify a submitted prompt's execution state.

pub mod api;
pub mod poll;
