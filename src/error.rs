use std::time::Duration;

use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// The first six variants are the protocol-visible kinds; callers branch on
/// them (`NotFound` vs `Expired` lets a client distinguish "never existed"
/// from "timed out"). The remaining variants are ambient plumbing failures.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session expired: {0}")]
    Expired(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Agent unreachable: {target} (attempt {attempts})")]
    Unreachable { target: String, attempts: u32 },

    #[error("Timed out waiting for {target} after {waited:?} (attempt {attempts})")]
    Timeout {
        target: String,
        attempts: u32,
        waited: Duration,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MeshError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{}: {}", what, id))
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True for failures a caller may meaningfully retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Timeout { .. })
    }

    /// HTTP-style status code for the transport-agnostic API surface.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Expired(_) => 410,
            Self::Unreachable { .. } => 502,
            Self::Timeout { .. } => 504,
            Self::Config(_) | Self::Internal(_) | Self::Io(_) | Self::Json(_) | Self::Toml(_) => {
                500
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(MeshError::invalid("bad card").status_code(), 400);
        assert_eq!(MeshError::not_found("agent", "a1").status_code(), 404);
        assert_eq!(MeshError::Conflict("closed".into()).status_code(), 409);
        assert_eq!(MeshError::Expired("s1".into()).status_code(), 410);
        assert_eq!(
            MeshError::Unreachable {
                target: "a1".into(),
                attempts: 1
            }
            .status_code(),
            502
        );
        assert_eq!(
            MeshError::Timeout {
                target: "a1".into(),
                attempts: 1,
                waited: Duration::from_secs(30)
            }
            .status_code(),
            504
        );
    }

    #[test]
    fn test_retryable() {
        assert!(
            MeshError::Unreachable {
                target: "a1".into(),
                attempts: 1
            }
            .is_retryable()
        );
        assert!(!MeshError::Conflict("closed".into()).is_retryable());
        assert!(!MeshError::invalid("x").is_retryable());
    }

    #[test]
    fn test_display_carries_retry_detail() {
        let err = MeshError::Timeout {
            target: "office".into(),
            attempts: 2,
            waited: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("office"));
        assert!(msg.contains("attempt 2"));
    }
}
