//! Rejects requests whose context is already cancelled or expired.

use futures_util::FutureExt;
use futures_util::future;

use crate::endpoint::{Endpoint, Middleware, endpoint, middleware};
use crate::error::{BoxError, ServiceError};

/// Fails fast, before invoking the wrapped endpoint, when the caller
/// already gave up. Both a cancelled context and an expired deadline yield
/// a temporary timeout, named `cancelled` and `deadline_exceeded`.
pub fn cancellation() -> Middleware {
    middleware(|next: Endpoint| {
        endpoint(move |ctx, request| {
            if ctx.is_cancelled() {
                let err: BoxError = Box::new(ServiceError::temporary_timeout(
                    "cancelled",
                    "request cancelled before invocation",
                ));
                return future::ready(Err(err)).boxed();
            }
            if ctx.is_expired() {
                let err: BoxError = Box::new(ServiceError::temporary_timeout(
                    "deadline_exceeded",
                    "request deadline exceeded before invocation",
                ));
                return future::ready(Err(err)).boxed();
            }
            next(ctx, request)
        })
    })
}
