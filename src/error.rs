use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatahubError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Malformed result: {0}")]
    MalformedResult(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A producer failed; carries the signal and the identities it was fetching.
    #[error("Fetch {source_name} for {target} failed: {error}")]
    Fetch {
        source_name: String,
        target: String,
        error: Box<DatahubError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DatahubError {
    pub fn fetch(source_name: impl Into<String>, target: impl Into<String>, error: DatahubError) -> Self {
        DatahubError::Fetch {
            source_name: source_name.into(),
            target: target.into(),
            error: Box::new(error),
        }
    }

    /// Unwraps `Fetch` layers down to the error raised by the backend.
    pub fn root_cause(&self) -> &DatahubError {
        match self {
            DatahubError::Fetch { error, .. } => error.root_cause(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for DatahubError {
    fn from(err: reqwest::Error) -> Self {
        DatahubError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for DatahubError {
    fn from(err: serde_json::Error) -> Self {
        DatahubError::MalformedResult(err.to_string())
    }
}

impl IntoResponse for DatahubError {
    fn into_response(self) -> Response {
        let status = match self.root_cause() {
            DatahubError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            DatahubError::Backend(_) | DatahubError::MalformedResult(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DatahubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_keeps_root_cause() {
        let err = DatahubError::fetch(
            "node_cpu",
            "n1",
            DatahubError::fetch("inner", "n1", DatahubError::Unsupported("write".into())),
        );

        assert!(matches!(err.root_cause(), DatahubError::Unsupported(_)));
        assert!(err.to_string().starts_with("Fetch node_cpu for n1 failed"));
    }

    #[test]
    fn test_status_mapping() {
        let resp = DatahubError::Unsupported("write".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);

        let resp = DatahubError::fetch("pod_cpu", "ns/p", DatahubError::Backend("down".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = DatahubError::Metadata("dao".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
