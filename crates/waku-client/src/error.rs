use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by the client runtime.
///
/// Cloneable so a single failed request can be observed by every consumer of
/// a shared elements future.
#[derive(Clone, Debug, Error)]
pub enum RscError {
    /// A non-2xx RSC response. The message is the response body, or the
    /// status text when the body is empty.
    #[error("{message}")]
    Status {
        status: u16,
        location: Option<String>,
        message: String,
    },
    #[error("Invalid element: {0}")]
    InvalidElement(String),
    #[error("Element cannot be undefined, use null instead: {0}")]
    UndefinedElement(String),
    #[error("Missing Root component")]
    MissingRoot,
    #[error("Invalid RSC path: {0}")]
    InvalidRscPath(String),
    #[error("Invalid function id: {0}")]
    InvalidFuncId(String),
    #[error("Failed to fetch RSC payload: {0:#}")]
    Transport(Arc<anyhow::Error>),
    #[error("Failed to decode RSC payload: {0}")]
    Decode(String),
}

impl RscError {
    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        RscError::Transport(Arc::new(err.into()))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RscError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Redirect target carried by a status error.
    pub fn location(&self) -> Option<&str> {
        match self {
            RscError::Status { location, .. } => location.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RscError {
    fn from(err: serde_json::Error) -> Self {
        RscError::Decode(err.to_string())
    }
}
