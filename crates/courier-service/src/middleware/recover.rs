//! Panic recovery middleware.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::endpoint::{Endpoint, Middleware, endpoint, middleware};
use crate::error::{BoxError, ServiceError};

/// Turns a panic inside the wrapped endpoint into a fault named `panic`.
pub fn recover() -> Middleware {
    middleware(|next: Endpoint| {
        endpoint(move |ctx, request| {
            let next = Arc::clone(&next);
            async move {
                let call = std::panic::catch_unwind(AssertUnwindSafe(|| next(ctx, request)));
                let outcome = match call {
                    Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                    Err(panic) => Err(panic),
                };
                outcome.unwrap_or_else(|panic| Err(panic_error(panic.as_ref())))
            }
        })
    })
}

fn panic_error(panic: &(dyn Any + Send)) -> BoxError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned());

    let mut err = ServiceError::fault(format!("panic: {message}"));
    err.name = "panic".to_owned();
    tracing::error!(error_id = %err.id, %message, "endpoint panicked");
    Box::new(err)
}
