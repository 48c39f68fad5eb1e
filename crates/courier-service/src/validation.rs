//! Payload validation helpers used by generated request decoders.
//!
//! Format checks follow the JSON schema `format` vocabulary. Pattern checks
//! go through [`PatternCache`], which compiles each regular expression once
//! and shares it between concurrent requests.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use parking_lot::RwLock;
use regex::Regex;

use crate::error::ServiceError;

static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([[:alnum:]]([[:alnum:]\-]{0,61}[[:alnum:]])?)(\.[[:alnum:]]([[:alnum:]\-]{0,61}[[:alnum:]])?)*$")
        .unwrap_or_else(|e| unreachable!("static hostname pattern: {e}"))
});

/// Validation format names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// RFC 3339 date.
    Date,
    /// RFC 3339 date time.
    DateTime,
    /// RFC 4122 UUID.
    Uuid,
    /// RFC 5322 email address.
    Email,
    /// RFC 1035 internet host name.
    Hostname,
    Ipv4,
    Ipv6,
    /// IPv4 or IPv6 address.
    Ip,
    /// RFC 3986 URI.
    Uri,
    /// IEEE 802 MAC-48, EUI-48 or EUI-64 address.
    Mac,
    /// RFC 4632 / RFC 4291 CIDR notation.
    Cidr,
    /// Regular expression syntax.
    Regexp,
    /// JSON text.
    Json,
    /// RFC 1123 date time.
    Rfc1123,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::DateTime => "date-time",
            Self::Uuid => "uuid",
            Self::Email => "email",
            Self::Hostname => "hostname",
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
            Self::Ip => "ip",
            Self::Uri => "uri",
            Self::Mac => "mac",
            Self::Cidr => "cidr",
            Self::Regexp => "regexp",
            Self::Json => "json",
            Self::Rfc1123 => "rfc1123",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown format name.
#[derive(Debug, thiserror::Error)]
#[error("unknown format {0:?}")]
pub struct UnknownFormat(String);

impl FromStr for Format {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "date" => Self::Date,
            "date-time" => Self::DateTime,
            "uuid" => Self::Uuid,
            "email" => Self::Email,
            "hostname" => Self::Hostname,
            "ipv4" => Self::Ipv4,
            "ipv6" => Self::Ipv6,
            "ip" => Self::Ip,
            "uri" => Self::Uri,
            "mac" => Self::Mac,
            "cidr" => Self::Cidr,
            "regexp" => Self::Regexp,
            "json" => Self::Json,
            "rfc1123" => Self::Rfc1123,
            other => return Err(UnknownFormat(other.to_owned())),
        })
    }
}

/// Validates `value` against `format`. `field` names the attribute in the
/// returned `invalid_format` error.
pub fn validate_format(field: &str, value: &str, format: Format) -> Result<(), ServiceError> {
    check_format(value, format)
        .map_err(|reason| ServiceError::invalid_format(field, value, format, reason))
}

fn check_format(value: &str, format: Format) -> Result<(), String> {
    match format {
        Format::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(drop)
            .map_err(|e| e.to_string()),
        Format::DateTime => DateTime::parse_from_rfc3339(value)
            .map(drop)
            .map_err(|e| e.to_string()),
        Format::Uuid => uuid::Uuid::parse_str(value)
            .map(drop)
            .map_err(|e| e.to_string()),
        Format::Email => check_email(value),
        Format::Hostname => {
            if value.len() <= 253 && HOSTNAME.is_match(value) {
                Ok(())
            } else {
                Err(format!("hostname value '{value}' is not a valid host name"))
            }
        }
        Format::Ipv4 => value
            .parse::<Ipv4Addr>()
            .map(drop)
            .map_err(|_| format!("{value:?} is an invalid ipv4 value")),
        Format::Ipv6 => value
            .parse::<Ipv6Addr>()
            .map(drop)
            .map_err(|_| format!("{value:?} is an invalid ipv6 value")),
        Format::Ip => value
            .parse::<IpAddr>()
            .map(drop)
            .map_err(|_| format!("{value:?} is an invalid ip value")),
        Format::Uri => check_request_uri(value),
        Format::Mac => check_mac(value),
        Format::Cidr => check_cidr(value),
        Format::Regexp => Regex::new(value).map(drop).map_err(|e| e.to_string()),
        Format::Json => serde_json::from_str::<serde::de::IgnoredAny>(value)
            .map(drop)
            .map_err(|_| "invalid JSON".to_owned()),
        Format::Rfc1123 => DateTime::parse_from_rfc2822(value)
            .map(drop)
            .map_err(|e| e.to_string()),
    }
}

fn check_email(value: &str) -> Result<(), String> {
    let (local, domain) = value
        .rsplit_once('@')
        .ok_or_else(|| "missing '@' sign".to_owned())?;
    if local.is_empty() || domain.is_empty() {
        return Err("empty local part or domain".to_owned());
    }
    if value.chars().any(char::is_whitespace) {
        return Err("unexpected whitespace".to_owned());
    }
    Ok(())
}

/// Accepts what an HTTP request line may carry: an absolute URI or an
/// absolute path.
fn check_request_uri(value: &str) -> Result<(), String> {
    let parsed = if value.starts_with('/') {
        url::Url::parse("http://localhost/").and_then(|base| base.join(value))
    } else {
        url::Url::parse(value)
    };
    parsed.map(drop).map_err(|e| e.to_string())
}

fn check_mac(value: &str) -> Result<(), String> {
    let invalid = || format!("invalid MAC address {value:?}");

    // Dotted form: 0123.4567.89ab
    if value.contains('.') {
        let groups: Vec<_> = value.split('.').collect();
        let ok = matches!(groups.len(), 3 | 4)
            && groups
                .iter()
                .all(|g| g.len() == 4 && g.chars().all(|c| c.is_ascii_hexdigit()));
        return if ok { Ok(()) } else { Err(invalid()) };
    }

    let separator = if value.contains(':') { ':' } else { '-' };
    let groups: Vec<_> = value.split(separator).collect();
    let ok = matches!(groups.len(), 6 | 8)
        && groups
            .iter()
            .all(|g| g.len() == 2 && g.chars().all(|c| c.is_ascii_hexdigit()));
    if ok { Ok(()) } else { Err(invalid()) }
}

fn check_cidr(value: &str) -> Result<(), String> {
    let invalid = || format!("invalid CIDR address {value:?}");
    let (addr, prefix) = value.split_once('/').ok_or_else(invalid)?;
    let addr = addr.parse::<IpAddr>().map_err(|_| invalid())?;
    let prefix = prefix.parse::<u8>().map_err(|_| invalid())?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix <= max { Ok(()) } else { Err(invalid()) }
}

/// Compiled regular expressions keyed by pattern source.
///
/// Lookups take the read lock. A miss compiles the pattern without holding
/// any lock and takes the write lock only to insert it; a concurrent insert
/// of the same pattern wins and the local copy is dropped.
#[derive(Default)]
pub struct PatternCache {
    patterns: RwLock<HashMap<String, Regex>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an `invalid_pattern` error if `value` does not match
    /// `pattern`. An unparsable pattern is reported as a fault.
    pub fn validate(&self, field: &str, value: &str, pattern: &str) -> Result<(), ServiceError> {
        let regex = self.compiled(pattern)?;
        if regex.is_match(value) {
            Ok(())
        } else {
            Err(ServiceError::invalid_pattern(field, value, pattern))
        }
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }

    fn compiled(&self, pattern: &str) -> Result<Regex, ServiceError> {
        if let Some(regex) = self.patterns.read().get(pattern) {
            return Ok(regex.clone());
        }

        let regex = Regex::new(pattern)
            .map_err(|e| ServiceError::fault(format!("invalid pattern {pattern:?}: {e}")))?;
        tracing::debug!(pattern, "compiled validation pattern");

        let mut patterns = self.patterns.write();
        Ok(patterns
            .entry(pattern.to_owned())
            .or_insert(regex)
            .clone())
    }
}
