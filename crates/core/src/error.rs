/// Errors produced by the domain layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Caller-supplied inputs failed validation (bad shot fields,
    /// duplicate ids, out-of-range settings).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The workflow template or run configuration is unusable. Surfaced
    /// before any job is submitted.
    #[error("Configuration error: {0}")]
    Configuration(String),
}
