use thiserror::Error;

/// Error taxonomy for the Widely integration layer.
///
/// Every variant carries the HTTP status the outer API surface should
/// answer with; see [`WidelyError::status_code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WidelyError {
    /// Caller-supplied parameters missing or blank. Raised before any network call.
    #[error("Missing required parameters: {}", .missing.join(", "))]
    Validation { missing: Vec<String> },

    /// Caller-supplied parameter present but not acceptable.
    #[error("Invalid parameter {field}: {reason}")]
    InvalidParam { field: String, reason: String },

    /// Upstream reported failure, or the transport call itself failed.
    #[error("{message}")]
    Upstream { status: u16, message: String },

    /// Upstream reported success without the data the operation needs.
    #[error("{0}")]
    NotFound(String),
}

impl WidelyError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            status: 500,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::InvalidParam { .. } => 400,
            Self::Upstream { status, .. } => *status,
            Self::NotFound(_) => 404,
        }
    }

    /// Re-wrap a transport failure, keeping the HTTP status when there is one.
    pub fn from_transport(err: &reqwest::Error, func_name: &str) -> Self {
        let status = err.status().map_or(500, |s| s.as_u16());
        let kind = if err.is_timeout() {
            "timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Self::Upstream {
            status,
            message: format!("Widely {func_name} {kind}: {err}"),
        }
    }
}
