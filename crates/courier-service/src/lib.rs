//! Courier Service: transport-agnostic core of the Courier RPC runtime.
//!
//! This crate contains everything a service method needs independent of
//! the wire protocol: endpoints and middleware, the structured
//! [`ServiceError`] model, validation helpers and the codec registry.
//!
//! Transport crates (`courier-http`, `courier-grpc`) depend on this crate
//! and adapt endpoints to their protocol.
//!
//! **Zero transport dependencies**: no axum, no tonic, no wire-protocol code.

pub mod codec;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod middleware;
pub mod validation;

use std::sync::Arc;

use codec::CodecRegistry;
use middleware::RequestIdGenerator;
use validation::PatternCache;

pub use context::Context;
pub use endpoint::{Endpoint, Endpoints, Middleware, Payload};
pub use error::{BoxError, MultiError, ServiceError};

/// Configuration subset relevant to the service layer.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Log payload details in the request logging middleware.
    pub verbose_logging: bool,
}

/// Shared runtime state, cloneable across all transport handlers.
///
/// Owns the codec registry, the compiled pattern cache and the request ID
/// generator. Build it once at wiring time and hand clones to transports.
#[derive(Clone)]
pub struct ServiceRuntime {
    inner: Arc<Inner>,
}

struct Inner {
    codecs: CodecRegistry,
    patterns: PatternCache,
    request_ids: Arc<RequestIdGenerator>,
    verbose_logging: bool,
}

impl Default for ServiceRuntime {
    fn default() -> Self {
        Self::new(CodecRegistry::with_defaults(), &RuntimeConfig::default())
    }
}

impl ServiceRuntime {
    pub fn new(codecs: CodecRegistry, config: &RuntimeConfig) -> Self {
        tracing::debug!(?codecs, "service runtime created");
        Self {
            inner: Arc::new(Inner {
                codecs,
                patterns: PatternCache::new(),
                request_ids: Arc::new(RequestIdGenerator::new()),
                verbose_logging: config.verbose_logging,
            }),
        }
    }

    // --- Accessors ---

    pub fn codecs(&self) -> &CodecRegistry {
        &self.inner.codecs
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.inner.patterns
    }

    pub fn request_ids(&self) -> &Arc<RequestIdGenerator> {
        &self.inner.request_ids
    }

    pub fn verbose_logging(&self) -> bool {
        self.inner.verbose_logging
    }

    /// The standard middleware stack configured for this runtime.
    pub fn middleware(&self) -> Middleware {
        middleware::standard(Arc::clone(&self.inner.request_ids), self.inner.verbose_logging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{downcast, payload, typed_endpoint};

    #[tokio::test]
    async fn standard_stack_assigns_request_ids() {
        let runtime = ServiceRuntime::default();
        let mut endpoints = Endpoints::new();
        endpoints.add(
            "whoami",
            typed_endpoint(|ctx: Context, (): ()| async move {
                Ok::<_, ServiceError>(ctx.request_id().map(str::to_owned))
            }),
        );
        endpoints.use_middleware(&runtime.middleware());

        let ep = endpoints.get("whoami").unwrap();
        let id = downcast::<Option<String>>(ep(Context::new(), payload(())).await.unwrap())
            .unwrap()
            .unwrap();
        assert!(id.starts_with(runtime.request_ids().prefix()));
    }

    #[test]
    fn clones_share_state() {
        let runtime = ServiceRuntime::default();
        let clone = runtime.clone();
        runtime.patterns().validate("code", "ab", "^[a-z]+$").unwrap();
        assert_eq!(clone.patterns().len(), 1);
        assert!(clone.codecs().can_decode(None));
    }
}
