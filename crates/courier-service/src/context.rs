//! Per-request context passed to every endpoint.
//!
//! The context carries cancellation, an optional deadline, the request ID
//! and typed extensions. Transports build it from the incoming request; the
//! runtime itself never creates deadlines or cancels requests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::Extensions;
use tokio_util::sync::CancellationToken;

/// Cancellation-aware request context.
///
/// Cloning is cheap and clones observe the same cancellation.
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    request_id: Option<Arc<str>>,
    extensions: Extensions,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the point in time after which the caller gives up.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Sets the deadline relative to now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Derives a context whose cancellation follows this one but can also
    /// be cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
            request_id: self.request_id.clone(),
            extensions: self.extensions.clone(),
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `Some(ZERO)` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Stores a typed value, returning the previous one.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }
}
