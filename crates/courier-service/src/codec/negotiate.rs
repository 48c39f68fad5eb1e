//! Media type parsing and `Accept` negotiation.

/// Strips parameters and lowercases a media type.
///
/// `"Application/JSON; charset=utf-8"` becomes `"application/json"`.
pub fn normalize_media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// One entry of an `Accept` header.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange {
    pub value: String,
    pub q: f32,
}

/// Parses an `Accept` header into media ranges, in header order.
///
/// Malformed quality values count as `q=0`; empty entries are skipped.
pub fn parse_accept(header: &str) -> Vec<MediaRange> {
    header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let value = pieces.next()?.trim().to_ascii_lowercase();
            if value.is_empty() {
                return None;
            }
            let q = pieces
                .filter_map(|param| param.split_once('='))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("q"))
                .map_or(1.0, |(_, q)| q.trim().parse::<f32>().unwrap_or(0.0));
            Some(MediaRange { value, q })
        })
        .collect()
}

/// Picks the best offer for an `Accept` header.
///
/// Higher quality wins; for equal quality an exact match beats `type/*`,
/// which beats `*/*`; remaining ties go to the earliest offer. Returns
/// `default_offer` when the header is absent or nothing matches.
pub fn negotiate_content_type<'a>(
    accept: Option<&str>,
    offers: &'a [String],
    default_offer: &'a str,
) -> &'a str {
    let Some(accept) = accept else {
        return default_offer;
    };
    let ranges = parse_accept(accept);

    let mut best = default_offer;
    let mut best_q = -1.0_f32;
    // 0 exact, 1 type wildcard, 2 full wildcard, 3 none
    let mut best_wild = 3;

    for offer in offers {
        for range in &ranges {
            if range.q <= 0.0 || range.q < best_q {
                continue;
            }
            let wild = if range.value == "*/*" {
                2
            } else if let Some(prefix) = range.value.strip_suffix('*') {
                if !offer.starts_with(prefix) {
                    continue;
                }
                1
            } else if range.value == *offer {
                0
            } else {
                continue;
            };
            if range.q > best_q || wild < best_wild {
                best = offer.as_str();
                best_q = range.q;
                best_wild = wild;
            }
        }
    }
    best
}

/// Content type to send given one already set on the response.
///
/// A vendor type already on the response keeps its identity and gains the
/// RFC 6839 `+json` or `+xml` suffix of the chosen codec.
pub fn response_content_type(existing: Option<&str>, chosen: &str) -> String {
    let Some(existing) = existing.filter(|e| !e.is_empty()) else {
        return chosen.to_owned();
    };
    let suffix = match chosen {
        "application/json" => "+json",
        "application/xml" => "+xml",
        _ => return chosen.to_owned(),
    };
    if existing.contains('+') {
        existing.to_owned()
    } else {
        format!("{existing}{suffix}")
    }
}
