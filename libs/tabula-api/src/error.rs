/// Unified error type for the store adapter.
///
/// Variants split along the recovery boundary: schema-level errors abort the
/// operation that triggered plan resolution, per-row errors reject only the
/// offending write and leave the open batch usable.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Invalid or unrecognized open option — permanent, fail at open.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed or inconsistent scheme annotations — fatal at plan build.
    #[error("schema error: {0}")]
    Schema(String),

    /// Existing backing structure conflicts with the resolved plan.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Uniqueness or primary-key collision under non-replace mode.
    /// Rejects only the offending write; batch and store remain usable.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Posted message does not match its declared type.
    #[error("validation error: {0}")]
    Validation(String),

    /// Declared key path does not resolve within the message structure.
    #[error("key path error: {0}")]
    KeyPath(String),

    /// Underlying storage engine failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Add context to the error, preserving the variant.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            StoreError::Config(m) => StoreError::Config(format!("{ctx}: {m}")),
            StoreError::Schema(m) => StoreError::Schema(format!("{ctx}: {m}")),
            StoreError::SchemaMismatch(m) => StoreError::SchemaMismatch(format!("{ctx}: {m}")),
            StoreError::ConstraintViolation(m) => {
                StoreError::ConstraintViolation(format!("{ctx}: {m}"))
            }
            StoreError::Validation(m) => StoreError::Validation(format!("{ctx}: {m}")),
            StoreError::KeyPath(m) => StoreError::KeyPath(format!("{ctx}: {m}")),
            StoreError::Storage(m) => StoreError::Storage(format!("{ctx}: {m}")),
            other => other,
        }
    }
}
