//! Structured service errors.
//!
//! `ServiceError` is transport-agnostic. Transport crates map it to their
//! own wire format (HTTP status codes, gRPC status codes and details).
//!
//! Failures are classified by three independent flags rather than a closed
//! set of kinds:
//! - `timeout`: the operation ran out of time,
//! - `temporary`: retrying may succeed,
//! - `fault`: the server is at fault (a bug or an unexpected condition).
//!
//! Errors can be merged. A merged error keeps a flat history of the
//! original errors and every underlying cause, so callers can still ask
//! whether a failure was caused by a given error type.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

/// Boxed error crossing endpoint and transport boundaries.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared handle on an underlying cause.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Name given to errors that were not created as a `ServiceError`.
pub const GENERIC_ERROR_NAME: &str = "error";

/// Service error shared across all transports.
#[derive(Debug, Clone)]
pub struct ServiceError {
    /// Name of the class of errors (e.g. `missing_field`).
    pub name: String,
    /// Unique value for each occurrence of the error.
    pub id: String,
    /// Offending attribute for field validation errors.
    pub field: Option<String>,
    /// Specific error details.
    pub message: String,
    /// Is the error a timeout?
    pub timeout: bool,
    /// Is the error temporary?
    pub temporary: bool,
    /// Is the error a server-side fault?
    pub fault: bool,
    history: Vec<ServiceError>,
    causes: Vec<Cause>,
}

impl ServiceError {
    /// Creates an error with an explicit classification.
    pub fn classified(
        name: impl Into<String>,
        message: impl Into<String>,
        timeout: bool,
        temporary: bool,
        fault: bool,
    ) -> Self {
        Self {
            name: name.into(),
            id: new_error_id(),
            field: None,
            message: message.into(),
            timeout,
            temporary,
            fault,
            history: Vec::new(),
            causes: Vec::new(),
        }
    }

    /// Server-side fault.
    pub fn fault(message: impl Into<String>) -> Self {
        Self::classified("fault", message, false, false, true)
    }

    /// Definitive error: retrying the request is not needed.
    pub fn permanent(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::classified(name, message, false, false, false)
    }

    /// Retrying the request may succeed.
    pub fn temporary(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::classified(name, message, false, true, false)
    }

    /// Timeout that will not go away on retry.
    pub fn permanent_timeout(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::classified(name, message, true, false, false)
    }

    /// Timeout after which retrying may succeed.
    pub fn temporary_timeout(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::classified(name, message, true, true, false)
    }

    /// A request is missing its required payload.
    pub fn missing_payload() -> Self {
        Self::permanent("missing_payload", "missing required payload")
    }

    /// A request body could not be decoded.
    pub fn decode_payload(message: impl Into<String>) -> Self {
        Self::permanent("decode_payload", message)
    }

    /// The type of a payload field does not match the declared type.
    pub fn invalid_field_type(field: &str, value: impl fmt::Debug, expected: &str) -> Self {
        Self::permanent(
            "invalid_field_type",
            format!("invalid value {value:?} for {field:?}, must be a {expected}"),
        )
        .with_field(field)
    }

    /// A payload is missing a required field.
    pub fn missing_field(field: &str, context: &str) -> Self {
        Self::permanent("missing_field", format!("{field:?} is missing from {context}"))
            .with_field(field)
    }

    /// A payload field is not one of the allowed enum values.
    pub fn invalid_enum_value<V: fmt::Debug>(field: &str, value: V, allowed: &[V]) -> Self {
        let allowed = allowed
            .iter()
            .map(|a| format!("{a:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        Self::permanent(
            "invalid_enum_value",
            format!("value of {field} must be one of {allowed} but got value {value:?}"),
        )
        .with_field(field)
    }

    /// A payload field does not match its declared format.
    pub fn invalid_format(
        field: &str,
        value: &str,
        format: impl fmt::Display,
        reason: impl fmt::Display,
    ) -> Self {
        Self::permanent(
            "invalid_format",
            format!("{field} must be formatted as a {format} but got value {value:?}, {reason}"),
        )
        .with_field(field)
    }

    /// A payload field does not match its declared pattern.
    pub fn invalid_pattern(field: &str, value: &str, pattern: &str) -> Self {
        Self::permanent(
            "invalid_pattern",
            format!("{field} must match the regexp {pattern:?} but got value {value:?}"),
        )
        .with_field(field)
    }

    /// A payload field is outside its declared range. `is_min` tells whether
    /// `bound` is the lower bound.
    pub fn invalid_range(
        field: &str,
        value: impl fmt::Debug,
        bound: impl fmt::Display,
        is_min: bool,
    ) -> Self {
        Self::permanent(
            "invalid_range",
            format!(
                "{field} must be {} than {bound} but got value {value:?}",
                comparison(is_min)
            ),
        )
        .with_field(field)
    }

    /// A payload field length is outside its declared bounds.
    pub fn invalid_length(
        field: &str,
        value: impl fmt::Debug,
        len: usize,
        bound: usize,
        is_min: bool,
    ) -> Self {
        Self::permanent(
            "invalid_length",
            format!(
                "length of {field} must be {} than {bound} but got value {value:?} (len={len})",
                comparison(is_min)
            ),
        )
        .with_field(field)
    }

    /// Stamps the offending field name.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Overrides the generated occurrence ID, e.g. when rebuilding an error
    /// received from a remote peer.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.causes.push(Arc::new(cause));
        self
    }

    /// Merges `other` into this error.
    ///
    /// The name is kept unless it is the generic placeholder, messages are
    /// joined with `"; "`, and each classification flag is the logical AND
    /// of both sides. The history is the flat list of pre-merge originals.
    #[must_use]
    pub fn merge(self, other: ServiceError) -> ServiceError {
        let name = if self.name == GENERIC_ERROR_NAME {
            other.name.clone()
        } else {
            self.name.clone()
        };
        let message = format!("{}; {}", self.message, other.message);
        let timeout = self.timeout && other.timeout;
        let temporary = self.temporary && other.temporary;
        let fault = self.fault && other.fault;
        let id = self.id.clone();
        let field = self.field.clone();

        let mut causes = self.causes.clone();
        causes.extend(other.causes.iter().cloned());

        let mut history = self.into_lineage();
        history.extend(other.into_lineage());

        ServiceError {
            name,
            id,
            field,
            message,
            timeout,
            temporary,
            fault,
            history,
            causes,
        }
    }

    /// Original errors that were merged into this one, in merge order.
    /// Empty when the error is not the result of a merge.
    pub fn history(&self) -> &[ServiceError] {
        &self.history
    }

    /// Whether this error is the result of a merge.
    pub fn is_merged(&self) -> bool {
        !self.history.is_empty()
    }

    /// Underlying causes aggregated across merges.
    pub fn causes(&self) -> &[Cause] {
        &self.causes
    }

    /// Whether any aggregated cause, or any error in its source chain, is
    /// an `E`.
    pub fn is_caused_by<E: StdError + 'static>(&self) -> bool {
        self.find_cause::<E>().is_some()
    }

    /// First aggregated cause (or source of a cause) of type `E`.
    pub fn find_cause<E: StdError + 'static>(&self) -> Option<&E> {
        self.causes.iter().find_map(|cause| {
            let mut current = Some(cause.as_ref() as &(dyn StdError + 'static));
            while let Some(err) = current {
                if let Some(found) = err.downcast_ref::<E>() {
                    return Some(found);
                }
                current = err.source();
            }
            None
        })
    }

    fn into_lineage(self) -> Vec<ServiceError> {
        if self.history.is_empty() {
            vec![self]
        } else {
            self.history
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for ServiceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.causes
            .first()
            .map(|cause| cause.as_ref() as &(dyn StdError + 'static))
    }
}

fn comparison(is_min: bool) -> &'static str {
    if is_min {
        "greater or equal"
    } else {
        "lesser or equal"
    }
}

/// Returns `err` as a `ServiceError`.
///
/// A non-empty [`MultiError`] becomes the merge of its errors. Any other
/// error that is not already a `ServiceError` becomes a fault named
/// `"error"`; the original error is kept as the cause.
pub fn as_service_error(err: BoxError) -> ServiceError {
    let err = match err.downcast::<ServiceError>() {
        Ok(service) => return *service,
        Err(other) => other,
    };
    let err: BoxError = match err.downcast::<MultiError>() {
        Ok(multi) if !multi.is_empty() => {
            return multi
                .into_service_error()
                .unwrap_or_else(|| ServiceError::fault("no error collected"));
        }
        Ok(multi) => multi as BoxError,
        Err(other) => other,
    };
    let mut service =
        ServiceError::classified(GENERIC_ERROR_NAME, err.to_string(), false, false, true);
    service.causes.push(Arc::from(err));
    service
}

/// Merges two optional errors.
///
/// Either side being `None` returns the other side unchanged. Otherwise
/// both sides are converted with [`as_service_error`] and merged.
pub fn merge_errors(err: Option<BoxError>, other: Option<BoxError>) -> Option<BoxError> {
    match (err, other) {
        (None, None) => None,
        (Some(err), None) => Some(err),
        (None, Some(other)) => Some(other),
        (Some(err), Some(other)) => {
            let merged = as_service_error(err).merge(as_service_error(other));
            Some(Box::new(merged))
        }
    }
}

/// Creates an 8 character ID suited for identifying an error occurrence.
///
/// Six random bytes give a collision probability of about n^2 / 2^49 for
/// n IDs. Clashes are not catastrophic.
pub fn new_error_id() -> String {
    let mut bytes = [0u8; 6];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Several independent errors reported together.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<BoxError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: impl Into<BoxError>) {
        self.errors.push(err.into());
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoxError> {
        self.errors.iter()
    }

    /// `Ok(())` when no error was collected.
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }

    /// Merges every collected error, left to right.
    pub fn into_service_error(self) -> Option<ServiceError> {
        self.errors
            .into_iter()
            .map(as_service_error)
            .reduce(ServiceError::merge)
    }
}

impl From<Vec<BoxError>> for MultiError {
    fn from(errors: Vec<BoxError>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl StdError for MultiError {}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    #[derive(Debug, thiserror::Error)]
    #[error("io failed")]
    struct IoFailed(#[source] DiskFull);

    #[test]
    fn constructors_set_flags() {
        let f = ServiceError::fault("boom");
        assert_eq!(f.name, "fault");
        assert!(f.fault && !f.timeout && !f.temporary);

        let p = ServiceError::permanent("bad", "nope");
        assert!(!p.fault && !p.timeout && !p.temporary);

        let t = ServiceError::temporary("busy", "later");
        assert!(t.temporary && !t.timeout && !t.fault);

        let pt = ServiceError::permanent_timeout("slow", "too slow");
        assert!(pt.timeout && !pt.temporary && !pt.fault);

        let tt = ServiceError::temporary_timeout("slow", "too slow");
        assert!(tt.timeout && tt.temporary && !tt.fault);
    }

    #[test]
    fn field_errors_are_permanent_with_field() {
        let errs = [
            ServiceError::invalid_field_type("age", "x", "int"),
            ServiceError::missing_field("age", "body"),
            ServiceError::invalid_enum_value("color", "green", &["red", "blue"]),
            ServiceError::invalid_format("when", "x", "date", "bad date"),
            ServiceError::invalid_pattern("code", "x", "^[0-9]+$"),
            ServiceError::invalid_range("age", 0, 1, true),
            ServiceError::invalid_length("name", "ab", 2, 3, true),
        ];
        for err in &errs {
            assert!(!err.fault && !err.timeout && !err.temporary, "{}", err.name);
            assert!(err.field.is_some(), "{}", err.name);
        }
        assert_eq!(errs[1].message, "\"age\" is missing from body");
        assert_eq!(
            errs[2].message,
            "value of color must be one of \"red\", \"blue\" but got value \"green\""
        );
        assert_eq!(
            errs[5].message,
            "age must be greater or equal than 1 but got value 0"
        );
        assert_eq!(
            errs[6].message,
            "length of name must be greater or equal than 3 but got value \"ab\" (len=2)"
        );
    }

    #[test]
    fn merge_permanent_and_temporary() {
        let merged = ServiceError::permanent("a", "msg1").merge(ServiceError::temporary("b", "msg2"));
        assert_eq!(merged.name, "a");
        assert_eq!(merged.message, "msg1; msg2");
        assert!(!merged.temporary);
        assert!(!merged.fault);
        assert!(!merged.timeout);
    }

    #[test]
    fn merge_flags_are_anded() {
        let flags = [false, true];
        for &t1 in &flags {
            for &tmp1 in &flags {
                for &f1 in &flags {
                    for &t2 in &flags {
                        for &tmp2 in &flags {
                            for &f2 in &flags {
                                let a = ServiceError::classified("a", "a", t1, tmp1, f1);
                                let b = ServiceError::classified("b", "b", t2, tmp2, f2);
                                let m = a.merge(b);
                                assert_eq!(m.timeout, t1 && t2);
                                assert_eq!(m.temporary, tmp1 && tmp2);
                                assert_eq!(m.fault, f1 && f2);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn merge_with_none_returns_other_unchanged() {
        let err: BoxError = Box::new(ServiceError::permanent("a", "only"));
        let merged = merge_errors(None, Some(err)).unwrap();
        let merged = merged.downcast::<ServiceError>().unwrap();
        assert_eq!(merged.name, "a");

        let err: BoxError = Box::new(DiskFull);
        let merged = merge_errors(Some(err), None).unwrap();
        assert!(merged.downcast_ref::<DiskFull>().is_some());

        assert!(merge_errors(None, None).is_none());
    }

    #[test]
    fn merge_coerces_unknown_errors_to_fault() {
        let merged = merge_errors(Some(Box::new(DiskFull)), Some(Box::new(DiskFull)))
            .unwrap()
            .downcast::<ServiceError>()
            .unwrap();
        assert_eq!(merged.name, GENERIC_ERROR_NAME);
        assert!(merged.fault);
        assert_eq!(merged.message, "disk full; disk full");
    }

    #[test]
    fn generic_name_adopts_other_name() {
        let generic = as_service_error(Box::new(DiskFull));
        let merged = generic.merge(ServiceError::fault("boom"));
        assert_eq!(merged.name, "fault");
    }

    #[test]
    fn history_lists_originals() {
        let e1 = ServiceError::permanent("a", "1");
        let e2 = ServiceError::permanent("b", "2");
        let (id1, id2) = (e1.id.clone(), e2.id.clone());
        let merged = e1.merge(e2);
        let ids: Vec<_> = merged.history().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![id1.clone(), id2.clone()]);
        assert_eq!(merged.id, id1);
        assert!(merged.is_merged());

        let e3 = ServiceError::permanent("c", "3");
        let id3 = e3.id.clone();
        let e4 = ServiceError::permanent("d", "4");
        let id4 = e4.id.clone();
        let all = merged.merge(e3.merge(e4));
        let ids: Vec<_> = all.history().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![id1, id2, id3, id4]);
        assert!(all.history().iter().all(|e| !e.is_merged()));
    }

    #[test]
    fn causes_survive_merges() {
        let io = as_service_error(Box::new(IoFailed(DiskFull)));
        let merged = ServiceError::permanent("a", "x").merge(io);
        assert!(merged.is_caused_by::<IoFailed>());
        assert!(merged.is_caused_by::<DiskFull>());
        assert!(!merged.is_caused_by::<std::fmt::Error>());
        assert_eq!(merged.causes().len(), 1);
    }

    #[test]
    fn as_service_error_keeps_service_errors() {
        let original = ServiceError::temporary("busy", "later");
        let id = original.id.clone();
        let back = as_service_error(Box::new(original));
        assert_eq!(back.id, id);
        assert!(back.temporary);
    }

    #[test]
    fn error_ids_are_unique() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_error_id()).collect();
        assert_eq!(ids.len(), 10_000);
        assert!(ids.iter().all(|id| id.len() == 8));
    }

    #[test]
    fn multi_error_merges_members() {
        let mut errs = MultiError::new();
        assert!(errs.into_service_error().is_none());

        errs = MultiError::new();
        errs.push(ServiceError::missing_field("a", "body"));
        errs.push(ServiceError::missing_field("b", "body"));
        assert_eq!(errs.len(), 2);
        assert_eq!(errs.to_string(), "\"a\" is missing from body; \"b\" is missing from body");
        let merged = errs.into_service_error().unwrap();
        assert_eq!(merged.name, "missing_field");
        assert_eq!(merged.history().len(), 2);
    }

    #[test]
    fn empty_multi_error_is_ok() {
        assert!(MultiError::new().into_result().is_ok());
    }

    #[test]
    fn boxed_multi_error_coerces_to_merge() {
        let mut errs = MultiError::new();
        errs.push(ServiceError::temporary("busy", "one"));
        errs.push(ServiceError::temporary_timeout("slow", "two"));
        let err = as_service_error(Box::new(errs));
        assert_eq!(err.message, "one; two");
        assert!(err.temporary);
        assert!(!err.timeout);

        let empty = as_service_error(Box::new(MultiError::new()));
        assert!(empty.fault);
        assert_eq!(empty.name, GENERIC_ERROR_NAME);
    }
}
