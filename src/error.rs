//! Typed errors for integration-level contract violations.
//!
//! Malformed model output and flaky environment state never surface here:
//! those are recovered locally and reported as validity flags or diagnostic
//! strings. The variants below indicate a caller bug (mismatched record
//! schema, wrong batch size, ...) and are meant to halt the training loop.

/// Result alias for operations that can only fail on contract violations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Contract violations raised by the history store and the batch layer.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A `store()` call used a different field set than the first call.
    #[error("record schema mismatch: expected fields {expected:?}, got {found:?}")]
    SchemaMismatch {
        /// Field names locked in by the first `store()` call.
        expected: Vec<String>,
        /// Field names supplied by the offending call.
        found: Vec<String>,
    },

    /// A record column did not carry exactly one value per instance.
    #[error("field '{field}' has {found} values, expected {expected}")]
    ColumnLength {
        field: String,
        expected: usize,
        found: usize,
    },

    /// A read referenced a field that is not part of the record schema.
    #[error("unknown record field '{field}'")]
    UnknownField { field: String },

    /// An instance index outside `0..len`.
    #[error("instance index {index} out of range for batch of {len}")]
    InstanceOutOfRange { index: usize, len: usize },

    /// `step` was called with the wrong number of actions.
    #[error("expected {expected} actions, got {found}")]
    BatchSize { expected: usize, found: usize },

    /// `reset` asked for more distinct tasks than the task set holds.
    #[error("cannot sample {requested} distinct tasks from a set of {available}")]
    NotEnoughTasks { requested: usize, available: usize },

    /// The batch was used after `close()`.
    #[error("environment batch is closed")]
    Closed,
}
