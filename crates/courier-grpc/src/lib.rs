//! Courier gRPC: tonic transport adapter for the Courier RPC runtime.
//!
//! Provides:
//! - Status mapping for service errors, with the full error attached as a
//!   status detail
//! - Unary, server, client and bidirectional stream handlers wrapping
//!   endpoints
//! - A unary invoker exposing remote methods as endpoints
//! - Context extraction from request metadata (`x-request-id`,
//!   `grpc-timeout`)

pub mod error;
pub mod handler;
pub mod invoker;
pub mod metadata;
pub mod stream;

pub use error::{decode_error, encode_error, status_code};
pub use handler::{
    BidiStreamRequest, ClientStreamRequest, ServerStreamRequest, StreamHandler, UnaryHandler,
};
pub use invoker::UnaryInvoker;
pub use metadata::OutgoingMetadata;
pub use stream::{ClientStream, ServerStream};
