//! Conversion of live HTTP values into captured, redacted text

use std::collections::btree_map::Entry as MapEntry;
use std::collections::BTreeMap;

use hyper::header::{HeaderMap, CONTENT_LENGTH};
use hyper::Uri;
use serde_json::Value;
use tracing::debug;

use crate::config::CapturePolicy;

/// Replacement for masked values
pub const REDACTED: &str = "***";

/// Placeholder recorded instead of a body above the ceiling
#[must_use]
pub fn too_large_placeholder(len: u64) -> String {
    format!("[content too large: {len} bytes]")
}

/// Placeholder recorded when a body is not text
#[must_use]
pub fn binary_placeholder(len: usize) -> String {
    format!("[binary content: {len} bytes]")
}

/// Declared `Content-Length`, if present and well formed
#[must_use]
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Capture a body subject to the payload ceiling
///
/// A declared length above the ceiling short-circuits to the placeholder
/// without looking at the bytes. Without a declared length, at most the
/// ceiling is inspected. Non-text bodies become a placeholder; JSON bodies
/// have sensitive fields masked.
#[must_use]
pub fn capture_body(body: &[u8], declared: Option<u64>, policy: &CapturePolicy) -> Option<String> {
    let ceiling = policy.max_payload_size();

    if let Some(len) = declared {
        if len > ceiling as u64 {
            return Some(too_large_placeholder(len));
        }
    }

    if body.is_empty() {
        return None;
    }

    if body.len() > ceiling {
        return Some(too_large_placeholder(body.len() as u64));
    }

    let Ok(text) = std::str::from_utf8(body) else {
        debug!("Body is not UTF-8, recording placeholder");
        return Some(binary_placeholder(body.len()));
    };

    Some(redact_text(text, policy))
}

/// Mask sensitive fields of a JSON or form-encoded body
///
/// Other text is returned as is.
#[must_use]
pub fn redact_text(text: &str, policy: &CapturePolicy) -> String {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return redact_form(text, policy);
    }

    match serde_json::from_str::<Value>(text) {
        Ok(mut value) => {
            if redact_json(&mut value, policy) {
                serde_json::to_string(&value).unwrap_or_else(|_| text.to_string())
            } else {
                text.to_string()
            }
        }
        Err(_) => text.to_string(),
    }
}

fn redact_form(text: &str, policy: &CapturePolicy) -> String {
    if !text.contains('=') || text.chars().any(char::is_whitespace) {
        return text.to_string();
    }

    text.split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if policy.is_sensitive(&decode_component(key)) => {
                format!("{key}={REDACTED}")
            }
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Mask values of sensitive keys in place; returns whether anything changed
pub fn redact_json(value: &mut Value, policy: &CapturePolicy) -> bool {
    match value {
        Value::Object(map) => {
            let mut changed = false;
            for (key, field) in map.iter_mut() {
                if policy.is_sensitive(key) {
                    *field = Value::String(REDACTED.to_string());
                    changed = true;
                } else {
                    changed |= redact_json(field, policy);
                }
            }
            changed
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| redact_json(item, policy) | changed),
        _ => false,
    }
}

/// Capture headers, masking sensitive ones
///
/// Repeated headers are joined with `, `. The map may be empty but is never
/// absent for a call that produced a header block.
#[must_use]
pub fn capture_headers(headers: &HeaderMap, policy: &CapturePolicy) -> BTreeMap<String, String> {
    let mut captured: BTreeMap<String, String> = BTreeMap::new();

    for (name, value) in headers {
        let name = name.as_str().to_string();
        let value = if policy.is_sensitive(&name) {
            REDACTED.to_string()
        } else {
            value.to_str().unwrap_or("<binary>").to_string()
        };

        match captured.entry(name) {
            MapEntry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                if existing.as_str() != REDACTED {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(value);
            }
        }
    }

    captured
}

/// Decode query parameters, masking sensitive ones
#[must_use]
pub fn parse_query(uri: &Uri, policy: &CapturePolicy) -> BTreeMap<String, String> {
    let Some(query) = uri.query() else {
        return BTreeMap::new();
    };

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(key);
            let value = if policy.is_sensitive(&key) {
                REDACTED.to_string()
            } else {
                decode_component(value)
            };
            (key, value)
        })
        .collect()
}

/// URL text with the values of sensitive query parameters masked
///
/// Everything else, including parameter order and encoding, is kept as sent.
#[must_use]
pub fn redact_url(uri: &Uri, policy: &CapturePolicy) -> String {
    let url = uri.to_string();
    let Some((base, query)) = url.split_once('?') else {
        return url;
    };

    let query = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if policy.is_sensitive(&decode_component(key)) => {
                format!("{key}={REDACTED}")
            }
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&");

    format!("{base}?{query}")
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).map_or_else(|_| spaced.clone(), |s| s.into_owned())
}
