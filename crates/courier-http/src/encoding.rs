//! Request decoding and response encoding through the codec registry.

use axum::body::Body;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Buf, Bytes};
use courier_service::codec::{CodecError, CodecRegistry, Document, Encoded, response_content_type};
use courier_service::error::{BoxError, ServiceError};

use crate::error::{ErrorResponse, HttpStatus, internal_error, log_service_error, service_error};

fn header<'a>(headers: &'a HeaderMap, name: &axum::http::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Decodes a request body. An empty body decodes to `null`.
pub fn decode_request(
    codecs: &CodecRegistry,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Document, ServiceError> {
    if body.is_empty() {
        return Ok(Document::Null);
    }
    codecs
        .decode_request(header(headers, &CONTENT_TYPE), body.reader())
        .map_err(ServiceError::from)
}

/// Sets the response content type, keeping a vendor type already present
/// and giving it the codec's structured syntax suffix.
pub fn set_content_type(headers: &mut HeaderMap, media_type: &str) {
    let content_type = response_content_type(header(headers, &CONTENT_TYPE), media_type);
    match HeaderValue::from_str(&content_type) {
        Ok(value) => {
            headers.insert(CONTENT_TYPE, value);
        }
        Err(e) => tracing::warn!(%content_type, error = %e, "invalid content type"),
    }
}

fn encoded_response(status: StatusCode, encoded: Encoded) -> Response {
    let mut response = (status, Body::from(encoded.body)).into_response();
    set_content_type(response.headers_mut(), &encoded.media_type);
    response
}

/// Encodes a response document negotiated against the request `Accept`
/// header.
pub fn encode_response(
    codecs: &CodecRegistry,
    request_headers: &HeaderMap,
    status: StatusCode,
    value: &Document,
) -> Result<Response, CodecError> {
    let encoded = codecs.encode_response(header(request_headers, &ACCEPT), value)?;
    Ok(encoded_response(status, encoded))
}

/// Renders an endpoint failure.
///
/// Service errors are encoded as an [`ErrorResponse`] with the status of
/// their [`HttpStatus`] class, falling back to JSON when negotiation fails.
/// Any other error becomes a plain text 500.
pub fn encode_error(codecs: &CodecRegistry, request_headers: &HeaderMap, err: BoxError) -> Response {
    let err = match service_error(err) {
        Ok(err) => err,
        Err(other) => return internal_error(other.as_ref()),
    };
    log_service_error(&err);

    let status = HttpStatus::for_error(&err).status_code();
    let body = ErrorResponse::from(&err);
    match codecs.encode_response_as(header(request_headers, &ACCEPT), &body) {
        Ok(encoded) => encoded_response(status, encoded),
        Err(e) => {
            tracing::warn!(error = %e, "error response negotiation failed, using JSON");
            (status, axum::Json(body)).into_response()
        }
    }
}
