//! HTTP error mapping.
//!
//! Service errors are classified into a coarse [`HttpStatus`]. Handlers
//! that own a codec registry answer with a negotiated [`ErrorResponse`];
//! plain axum handlers can return [`HttpError`], which renders the compact
//! `{token, status, detail}` [`ErrorBody`].

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use courier_service::error::{BoxError, MultiError, ServiceError, as_service_error, new_error_id};
use serde::{Deserialize, Serialize};

/// Coarse HTTP error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Invalid,
    Unauthorized,
    Timeout,
    Bug,
    Other(u16),
}

impl HttpStatus {
    /// Classifies a service error: `unauthorized` by name, then fault,
    /// then timeout; everything else is an invalid request.
    pub fn for_error(err: &ServiceError) -> Self {
        if err.name == "unauthorized" {
            Self::Unauthorized
        } else if err.fault {
            Self::Bug
        } else if err.timeout {
            Self::Timeout
        } else {
            Self::Invalid
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Invalid => 400,
            Self::Unauthorized => 401,
            Self::Timeout => 408,
            Self::Bug => 500,
            Self::Other(code) => code,
        }
    }

    /// Codes outside the valid HTTP range are answered as 500.
    pub fn status_code(self) -> StatusCode {
        StatusCode::from_u16(self.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Unauthorized => "unauthorized",
            Self::Timeout => "timeout",
            Self::Bug => "bug",
            Self::Other(_) => "error",
        }
    }
}

/// Compact HTTP error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Coarse error class (e.g. "invalid", "bug").
    pub token: String,
    /// HTTP status code.
    pub status: u16,
    /// Human-readable error detail.
    pub detail: String,
}

impl ErrorBody {
    pub fn new(status: HttpStatus, detail: impl Into<String>) -> Self {
        Self {
            token: status.token().to_owned(),
            status: status.code(),
            detail: detail.into(),
        }
    }
}

impl From<&ServiceError> for ErrorBody {
    fn from(err: &ServiceError) -> Self {
        Self::new(HttpStatus::for_error(err), err.message.clone())
    }
}

impl IntoResponse for ErrorBody {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self)).into_response()
    }
}

/// Serialized form of a [`ServiceError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    pub timeout: bool,
    pub temporary: bool,
    pub fault: bool,
}

impl From<&ServiceError> for ErrorResponse {
    fn from(err: &ServiceError) -> Self {
        Self {
            name: err.name.clone(),
            id: err.id.clone(),
            field: err.field.clone(),
            message: err.message.clone(),
            timeout: err.timeout,
            temporary: err.temporary,
            fault: err.fault,
        }
    }
}

impl From<ErrorResponse> for ServiceError {
    fn from(resp: ErrorResponse) -> Self {
        let err = ServiceError::classified(
            resp.name,
            resp.message,
            resp.timeout,
            resp.temporary,
            resp.fault,
        )
        .with_id(resp.id);
        match resp.field {
            Some(field) => err.with_field(field),
            None => err,
        }
    }
}

/// Endpoint failure returned from an axum handler.
#[derive(Debug)]
pub struct HttpError(pub BoxError);

impl From<BoxError> for HttpError {
    fn from(err: BoxError) -> Self {
        Self(err)
    }
}

impl From<ServiceError> for HttpError {
    fn from(err: ServiceError) -> Self {
        Self(Box::new(err))
    }
}

impl From<MultiError> for HttpError {
    fn from(err: MultiError) -> Self {
        Self(Box::new(err))
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match service_error(self.0) {
            Ok(err) => {
                log_service_error(&err);
                ErrorBody::from(&err).into_response()
            }
            Err(other) => internal_error(other.as_ref()),
        }
    }
}

/// Splits service errors (including merged [`MultiError`]s) from
/// unexpected failures.
pub(crate) fn service_error(err: BoxError) -> Result<ServiceError, BoxError> {
    if err.is::<ServiceError>() || err.is::<MultiError>() {
        Ok(as_service_error(err))
    } else {
        Err(err)
    }
}

pub(crate) fn log_service_error(err: &ServiceError) {
    if err.fault {
        tracing::error!(error_id = %err.id, name = %err.name, error = %err, "request failed");
    } else {
        tracing::debug!(error_id = %err.id, name = %err.name, error = %err, "request rejected");
    }
}

/// Answers an unexpected failure with a 500 plain text body naming a fresh
/// error ID, and logs the error under the same ID.
pub(crate) fn internal_error(err: &(dyn std::error::Error + Send + Sync)) -> Response {
    let id = new_error_id();
    tracing::error!(error_id = %id, error = %err, "unexpected error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(CONTENT_TYPE, "text/plain")],
        format!("{id}: {err}"),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn status_codes() {
        assert_eq!(HttpStatus::Invalid.code(), 400);
        assert_eq!(HttpStatus::Unauthorized.code(), 401);
        assert_eq!(HttpStatus::Timeout.code(), 408);
        assert_eq!(HttpStatus::Bug.code(), 500);
        assert_eq!(HttpStatus::Other(429).code(), 429);
        assert_eq!(HttpStatus::Other(42).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn classification() {
        let cases = [
            (ServiceError::permanent("unauthorized", "no token"), HttpStatus::Unauthorized),
            (ServiceError::fault("boom"), HttpStatus::Bug),
            (ServiceError::temporary_timeout("slow", "slow"), HttpStatus::Timeout),
            (ServiceError::temporary("busy", "busy"), HttpStatus::Invalid),
            (ServiceError::missing_field("a", "body"), HttpStatus::Invalid),
        ];
        for (err, expected) in cases {
            assert_eq!(HttpStatus::for_error(&err), expected, "{}", err.name);
        }
    }

    #[test]
    fn error_response_round_trip() {
        let err = ServiceError::missing_field("name", "body");
        let back = ServiceError::from(ErrorResponse::from(&err));
        assert_eq!(back.id, err.id);
        assert_eq!(back.name, "missing_field");
        assert_eq!(back.field.as_deref(), Some("name"));
        assert_eq!(back.message, err.message);
    }

    #[tokio::test]
    async fn service_error_renders_error_body() {
        let response = HttpError::from(ServiceError::permanent_timeout("slow", "took too long"))
            .into_response();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        let body: ErrorBody = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            body,
            ErrorBody {
                token: "timeout".into(),
                status: 408,
                detail: "took too long".into(),
            }
        );
    }

    #[tokio::test]
    async fn other_errors_are_plain_text_500() {
        let err: BoxError = "socket closed".into();
        let response = HttpError(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        let body = body_string(response).await;
        let (id, message) = body.split_once(": ").unwrap();
        assert_eq!(id.len(), 8);
        assert_eq!(message, "socket closed");
    }
}
