//! Request logging middleware.

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use crate::endpoint::{Endpoint, Middleware, endpoint, middleware};
use crate::error::ServiceError;

/// Logs the start and the outcome of every invocation inside a span
/// carrying the request ID. When `verbose` is set, the request and response
/// payload `TypeId`s are logged at debug level. Payloads are opaque, so
/// their type names are not available here.
pub fn log_request(verbose: bool) -> Middleware {
    middleware(move |next: Endpoint| {
        endpoint(move |ctx, request| {
            let next = Arc::clone(&next);
            let span = tracing::info_span!(
                "endpoint",
                request_id = ctx.request_id().unwrap_or("-"),
            );
            async move {
                let started = Instant::now();
                tracing::info!("started");
                if verbose {
                    tracing::debug!(payload = ?(*request).type_id(), "request payload");
                }

                let result = next(ctx, request).await;
                let elapsed_us = started.elapsed().as_micros() as u64;

                match &result {
                    Ok(response) => {
                        if verbose {
                            tracing::debug!(payload = ?(**response).type_id(), "response payload");
                        }
                        tracing::info!(elapsed_us, "completed");
                    }
                    Err(err) => match err.downcast_ref::<ServiceError>() {
                        Some(service) if service.fault => tracing::error!(
                            elapsed_us,
                            error_id = %service.id,
                            name = %service.name,
                            error = %service,
                            "failed",
                        ),
                        Some(service) => tracing::warn!(
                            elapsed_us,
                            error_id = %service.id,
                            name = %service.name,
                            temporary = service.temporary,
                            timeout = service.timeout,
                            error = %service,
                            "failed",
                        ),
                        None => tracing::error!(elapsed_us, error = %err, "failed"),
                    },
                }
                result
            }
            .instrument(span)
        })
    })
}
