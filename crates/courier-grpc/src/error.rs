//! gRPC error mapping.
//!
//! Service errors travel as a status code derived from their flags plus a
//! `google.rpc.Status` detail carrying the full [`ErrorResponse`], so
//! clients can rebuild the original error.

use bytes::Bytes;
use courier_service::error::{BoxError, ServiceError, as_service_error};
use prost::Message;
use tonic::{Code, Status};

/// Wire form of a [`ServiceError`] attached to statuses.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ErrorResponse {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(string, tag = "3")]
    pub msg: String,
    #[prost(bool, tag = "4")]
    pub temporary: bool,
    #[prost(bool, tag = "5")]
    pub timeout: bool,
    #[prost(bool, tag = "6")]
    pub fault: bool,
}

impl prost::Name for ErrorResponse {
    const NAME: &'static str = "ErrorResponse";
    const PACKAGE: &'static str = "courier.error";
}

impl From<&ServiceError> for ErrorResponse {
    fn from(err: &ServiceError) -> Self {
        Self {
            name: err.name.clone(),
            id: err.id.clone(),
            msg: err.message.clone(),
            temporary: err.temporary,
            timeout: err.timeout,
            fault: err.fault,
        }
    }
}

impl From<ErrorResponse> for ServiceError {
    fn from(resp: ErrorResponse) -> Self {
        ServiceError::classified(resp.name, resp.msg, resp.timeout, resp.temporary, resp.fault)
            .with_id(resp.id)
    }
}

/// `google.rpc.Status`, the envelope of status details.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<prost_types::Any>,
}

/// Status code for a service error.
///
/// Every rule is applied in order so later flags win: fault gives
/// `Internal`, timeout `DeadlineExceeded`, temporary `Unavailable`. An
/// error with no flag set is `Unknown`.
pub fn status_code(err: &ServiceError) -> Code {
    let mut code = Code::Unknown;
    if err.fault {
        code = Code::Internal;
    }
    if err.timeout {
        code = Code::DeadlineExceeded;
    }
    if err.temporary {
        code = Code::Unavailable;
    }
    code
}

/// Converts an endpoint failure into a status.
///
/// Statuses pass through untouched. Service errors (and merged
/// multi-errors) map through [`status_code`]. Anything else is reported as
/// `Unknown` with a fault detail.
pub fn encode_error(err: BoxError) -> Status {
    let err = match err.downcast::<Status>() {
        Ok(status) => return *status,
        Err(err) => err,
    };
    let known = err.is::<ServiceError>() || err.is::<courier_service::MultiError>();
    let err = as_service_error(err);
    let code = if known { status_code(&err) } else { Code::Unknown };
    encode_service_error(&err, code)
}

/// Builds a status with `code` and the error attached as detail.
///
/// Failing to encode the detail yields the bare status.
pub fn encode_service_error(err: &ServiceError, code: Code) -> Status {
    let detail = match prost_types::Any::from_msg(&ErrorResponse::from(err)) {
        Ok(detail) => detail,
        Err(e) => {
            tracing::warn!(error_id = %err.id, error = %e, "failed to encode error detail");
            return Status::new(code, err.message.clone());
        }
    };
    let envelope = RpcStatus {
        code: code as i32,
        message: err.message.clone(),
        details: vec![detail],
    };
    Status::with_details(code, err.message.clone(), Bytes::from(envelope.encode_to_vec()))
}

/// Rebuilds the service error carried by a status.
///
/// Without an attached [`ErrorResponse`] the status message becomes a
/// fault.
pub fn decode_error(status: &Status) -> ServiceError {
    attached_error(status).map_or_else(
        || ServiceError::fault(status.message()).with_cause(status.clone()),
        ServiceError::from,
    )
}

fn attached_error(status: &Status) -> Option<ErrorResponse> {
    if status.details().is_empty() {
        return None;
    }
    let envelope = RpcStatus::decode(status.details()).ok()?;
    envelope
        .details
        .iter()
        .find(|any| any.type_url == <ErrorResponse as prost::Name>::type_url())
        .and_then(|any| any.to_msg::<ErrorResponse>().ok())
}
