//! Built-in endpoint middleware: request IDs, request logging, panic
//! recovery and cancellation checks.

mod cancellation;
mod log;
mod recover;
mod request_id;

use std::sync::Arc;

pub use cancellation::cancellation;
pub use log::log_request;
pub use recover::recover;
pub use request_id::{RequestIdGenerator, request_id};

use crate::endpoint::{Middleware, chain};

/// The standard stack, outermost first: request ID, logging, panic
/// recovery, cancellation check.
pub fn standard(ids: Arc<RequestIdGenerator>, verbose: bool) -> Middleware {
    chain([
        request_id(ids),
        log_request(verbose),
        recover(),
        cancellation(),
    ])
}
