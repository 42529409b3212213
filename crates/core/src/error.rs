//! Service-level error taxonomy.
//!
//! Every domain operation returns [`ServiceResult`]. Store failures are logged
//! through `tracing` and replaced with a fixed per-operation message so no
//! driver detail crosses the service boundary.

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Missing or malformed input: required fields, an invalid lifecycle
    /// state, or an empty search query.
    #[error("{0}")]
    Validation(String),
    /// A referenced entity does not exist.
    #[error("{0}")]
    NotFound(&'static str),
    /// The notifier failed to deliver the rendered document.
    #[error("{0}")]
    Delivery(&'static str),
    /// Underlying record-store failure, surfaced with a fixed message only.
    #[error("{0}")]
    Store(&'static str),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    /// Logs the underlying store error and replaces it with `message`.
    pub(crate) fn store(message: &'static str, err: rusqlite::Error) -> Self {
        tracing::error!(error = %err, "{message}");
        ServiceError::Store(message)
    }
}
