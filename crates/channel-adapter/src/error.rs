use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Server-side failure details decoded from a Mattermost error body.
///
/// Mattermost answers failed calls with a JSON `AppError`; when the body is
/// missing or undecodable the fields fall back to the HTTP status line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApiFailure {
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub detailed_error: String,
    #[serde(default)]
    pub request_id: String,
}

impl ApiFailure {
    /// Decode an error body, keeping `status` when the body omits it.
    pub fn from_body(status: u16, body: &str) -> Self {
        let mut failure: ApiFailure = serde_json::from_str(body).unwrap_or_default();
        if failure.status_code == 0 {
            failure.status_code = status;
        }
        if failure.message.is_empty() {
            failure.message = if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.trim().to_string()
            };
        }
        failure
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (HTTP {}", self.message, self.status_code)?;
        if !self.id.is_empty() {
            write!(f, ", id {}", self.id)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Error)]
pub enum ChannelAdapterError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Auth(ApiFailure),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("not found: {0}")]
    NotFound(ApiFailure),

    #[error("already exists: {0}")]
    Conflict(ApiFailure),

    #[error("request rejected: {0}")]
    Api(ApiFailure),

    #[error("message parse error: {0}")]
    ParseError(String),

    #[error("not logged in")]
    NotLoggedIn,

    #[error("event stream not connected")]
    NotConnected,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChannelAdapterError {
    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let failure = ApiFailure::from_body(status, body);
        match status {
            401 | 403 => ChannelAdapterError::Auth(failure),
            404 => ChannelAdapterError::NotFound(failure),
            409 => ChannelAdapterError::Conflict(failure),
            _ => ChannelAdapterError::Api(failure),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ChannelAdapterError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ChannelAdapterError::Conflict(_))
    }

    /// Server failure details, when the error came from an HTTP response.
    pub fn api_failure(&self) -> Option<&ApiFailure> {
        match self {
            ChannelAdapterError::Auth(f)
            | ChannelAdapterError::NotFound(f)
            | ChannelAdapterError::Conflict(f)
            | ChannelAdapterError::Api(f) => Some(f),
            _ => None,
        }
    }

    /// Stable identifier for diagnostics output.
    pub fn error_id(&self) -> String {
        match self.api_failure() {
            Some(f) if !f.id.is_empty() => f.id.clone(),
            _ => match self {
                ChannelAdapterError::Config(_) => "adapter.config",
                ChannelAdapterError::Auth(_) => "adapter.auth",
                ChannelAdapterError::Connection(_) => "adapter.connection",
                ChannelAdapterError::NotFound(_) => "adapter.not_found",
                ChannelAdapterError::Conflict(_) => "adapter.conflict",
                ChannelAdapterError::Api(_) => "adapter.api",
                ChannelAdapterError::ParseError(_) => "adapter.parse",
                ChannelAdapterError::NotLoggedIn => "adapter.not_logged_in",
                ChannelAdapterError::NotConnected => "adapter.not_connected",
                ChannelAdapterError::Internal(_) => "adapter.internal",
            }
            .to_string(),
        }
    }

    /// Longer description: the server's detailed error when it sent one.
    pub fn detail(&self) -> String {
        match self.api_failure() {
            Some(f) if !f.detailed_error.is_empty() => f.detailed_error.clone(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            ChannelAdapterError::from_status(401, ""),
            ChannelAdapterError::Auth(_)
        ));
        assert!(ChannelAdapterError::from_status(404, "").is_not_found());
        assert!(ChannelAdapterError::from_status(409, "").is_conflict());
        assert!(matches!(
            ChannelAdapterError::from_status(500, "boom"),
            ChannelAdapterError::Api(_)
        ));
    }

    #[test]
    fn app_error_body_is_decoded() {
        let body = r#"{"id":"store.sql_team.get_by_name.app_error","message":"Unable to find the existing team","detailed_error":"sql: no rows","request_id":"r1","status_code":404}"#;
        let err = ChannelAdapterError::from_status(404, body);
        assert_eq!(err.error_id(), "store.sql_team.get_by_name.app_error");
        assert_eq!(err.detail(), "sql: no rows");
        assert!(err.to_string().contains("Unable to find the existing team"));
    }

    #[test]
    fn plain_body_falls_back_to_status() {
        let failure = ApiFailure::from_body(502, "");
        assert_eq!(failure.status_code, 502);
        assert_eq!(failure.message, "HTTP 502");

        let err = ChannelAdapterError::Connection("refused".to_string());
        assert_eq!(err.error_id(), "adapter.connection");
        assert_eq!(err.detail(), "connection error: refused");
    }
}
