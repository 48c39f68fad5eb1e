//! Request metadata: context extraction and outgoing headers/trailers.

use std::str::FromStr;
use std::time::Duration;

use courier_service::Context;
use tonic::Status;
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};

/// Metadata key carrying the request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// Metadata key carrying the caller's timeout.
pub const TIMEOUT_KEY: &str = "grpc-timeout";

/// Parses a `grpc-timeout` value: up to eight digits followed by one of
/// `H`, `M`, `S`, `m`, `u`, `n`.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "H" => Duration::from_secs(amount * 3600),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}

/// Builds the endpoint context from incoming metadata: the request ID and
/// a deadline derived from `grpc-timeout`.
pub fn context_from_metadata(metadata: &MetadataMap) -> Context {
    let mut ctx = Context::new();
    if let Some(id) = metadata
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        ctx = ctx.with_request_id(id);
    }
    if let Some(raw) = metadata.get(TIMEOUT_KEY).and_then(|v| v.to_str().ok()) {
        match parse_grpc_timeout(raw) {
            Some(timeout) => ctx = ctx.with_timeout(timeout),
            None => tracing::debug!(value = raw, "ignoring malformed grpc-timeout"),
        }
    }
    ctx
}

/// Headers and trailers produced while encoding a response.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMetadata {
    headers: Vec<(String, String)>,
    trailers: Vec<(String, String)>,
}

impl OutgoingMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.push((key.into(), value.into()));
    }

    pub fn insert_trailer(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.trailers.push((key.into(), value.into()));
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn trailers(&self) -> &[(String, String)] {
        &self.trailers
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.trailers.is_empty()
    }

    /// Writes headers, then trailers, into response metadata.
    ///
    /// An invalid key or value fails with `Unknown`.
    pub fn apply(&self, target: &mut MetadataMap) -> Result<(), Status> {
        for (key, value) in self.headers.iter().chain(&self.trailers) {
            let name = MetadataKey::<Ascii>::from_str(key).map_err(|e| {
                tracing::warn!(%key, error = %e, "invalid response metadata key");
                Status::unknown(format!("failed to send metadata {key:?}: {e}"))
            })?;
            let value = MetadataValue::<Ascii>::try_from(value.as_str()).map_err(|e| {
                tracing::warn!(%key, error = %e, "invalid response metadata value");
                Status::unknown(format!("failed to send metadata {key:?}: {e}"))
            })?;
            target.append(name, value);
        }
        Ok(())
    }
}
