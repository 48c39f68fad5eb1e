//! Courier HTTP: axum transport adapter for the Courier RPC runtime.
//!
//! Provides:
//! - HTTP status mapping for service errors
//! - Request decoding and negotiated response encoding
//! - An endpoint-to-axum handler bridge

pub mod encoding;
pub mod error;
pub mod handler;

pub use error::{ErrorBody, ErrorResponse, HttpError, HttpStatus};
pub use handler::{HttpEndpoint, REQUEST_ID_HEADER};
