/// Result alias that carries the custom [`MetronomeError`] type.
pub type Result<T> = std::result::Result<T, MetronomeError>;

/// Common error type for the core crate.
///
/// The per-sample and per-tap paths never fail; errors only surface while
/// building components from configuration or while the host does I/O.
#[derive(Debug, thiserror::Error)]
pub enum MetronomeError {
    /// A configuration value is outside the range the algorithms accept.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    /// Free-form error raised by the host application.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration files that fail to parse.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl MetronomeError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

impl From<&str> for MetronomeError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MetronomeError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
