use russh_sftp::protocol::StatusCode;
use thiserror::Error;

use crate::storage::StoreError;

/// Domain error taxonomy. Every variant has a fixed SFTP wire status; the
/// detail stays server-side (events and logs), the client sees the code only.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("permission denied: {0}")]
    PolicyViolation(String),

    #[error("no such file: {0}")]
    NotFound(String),

    #[error("upload rejected: {0}")]
    UploadValidation(String),

    #[error("object store failure: {0}")]
    Store(#[from] StoreError),

    #[error("protocol misuse: {0}")]
    Protocol(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PolicyViolation(_) => StatusCode::PermissionDenied,
            Self::NotFound(_) => StatusCode::NoSuchFile,
            Self::UploadValidation(_) => StatusCode::Failure,
            Self::Store(StoreError::NotFound(_)) => StatusCode::NoSuchFile,
            Self::Store(_) => StatusCode::Failure,
            Self::Protocol(_) => StatusCode::Failure,
            Self::Unsupported(_) => StatusCode::OpUnsupported,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            GatewayError::PolicyViolation("x".into()).status_code(),
            StatusCode::PermissionDenied
        );
        assert_eq!(
            GatewayError::NotFound("x".into()).status_code(),
            StatusCode::NoSuchFile
        );
        assert_eq!(
            GatewayError::UploadValidation("empty".into()).status_code(),
            StatusCode::Failure
        );
        assert_eq!(
            GatewayError::Store(StoreError::NotFound("k".into())).status_code(),
            StatusCode::NoSuchFile
        );
        assert_eq!(
            GatewayError::Store(StoreError::Backend {
                op: "put",
                key: "k".into(),
                message: "timeout".into(),
            })
            .status_code(),
            StatusCode::Failure
        );
        assert_eq!(
            GatewayError::Unsupported("append".into()).status_code(),
            StatusCode::OpUnsupported
        );
    }
}
