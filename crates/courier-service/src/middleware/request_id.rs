//! Request ID middleware: keeps the transport-provided ID or generates one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

use crate::endpoint::{Endpoint, Middleware, endpoint, middleware};

/// Produces request IDs of the form `<prefix>-<counter>`.
///
/// The prefix is 10 random characters chosen once per generator, the
/// counter is incremented for every ID.
#[derive(Debug)]
pub struct RequestIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        let mut prefix = String::new();
        while prefix.len() < 10 {
            let mut buf = [0u8; 12];
            rand::rng().fill_bytes(&mut buf);
            prefix = STANDARD
                .encode(buf)
                .chars()
                .filter(|c| *c != '+' && *c != '/')
                .collect();
        }
        prefix.truncate(10);
        Self {
            prefix,
            counter: AtomicU64::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n}", self.prefix)
    }
}

/// Ensures every request context carries a request ID.
///
/// An ID already set by the transport (e.g. from an `X-Request-Id` header)
/// is preserved.
pub fn request_id(ids: Arc<RequestIdGenerator>) -> Middleware {
    middleware(move |next: Endpoint| {
        let ids = Arc::clone(&ids);
        endpoint(move |ctx, request| {
            let ctx = if ctx.request_id().is_some() {
                ctx
            } else {
                ctx.with_request_id(ids.next_id())
            };
            next(ctx, request)
        })
    })
}
