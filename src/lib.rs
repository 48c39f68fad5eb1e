//! Courier: transport-agnostic RPC invocation runtime.
//!
//! The core (endpoints, middleware, service errors, codecs) is always
//! compiled. Transport adapters are feature-gated:
//! - `http`: axum handlers and HTTP error mapping
//! - `grpc`: tonic handlers, invoker and gRPC status mapping

pub mod config;
pub mod telemetry;

pub use courier_service as service;
pub use courier_service::codec::CodecRegistry;
pub use courier_service::{
    BoxError, Context, Endpoint, Endpoints, Middleware, MultiError, Payload, RuntimeConfig,
    ServiceError, ServiceRuntime,
};

#[cfg(feature = "grpc")]
pub use courier_grpc as grpc;
#[cfg(feature = "http")]
pub use courier_http as http;

pub use config::{Config, ConfigError};
