// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Payload sanitization.
//!
//! Three blunt pattern passes, applied in order: markup tags are removed,
//! `http(s)://` URLs are removed, and control bytes become spaces. This is a
//! denylist, not an HTML parser; obfuscated or malformed markup that does
//! not match the tag pattern passes through untouched.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

lazy_static! {
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref URL: Regex = Regex::new(r"https?://\S+").unwrap();
    static ref CONTROL: Regex = Regex::new(r"[\x00-\x09\x0B\x0C\x0E-\x1F]").unwrap();
}

/// Sanitized form fields in order of their submitted names.
///
/// Entries are keyed by the raw name so names that only differ once
/// escaped stay distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedPayload {
    fields: BTreeMap<String, SanitizedField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SanitizedField {
    /// Entity-escaped name, safe to place in markup
    name: String,
    value: String,
}

impl SanitizedPayload {
    /// Sanitized value of the field submitted as `raw_name`.
    pub fn get(&self, raw_name: &str) -> Option<&str> {
        self.fields.get(raw_name).map(|f| f.value.as_str())
    }

    /// `(escaped name, value)` pairs, ordered by the raw names.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .values()
            .map(|f| (f.name.as_str(), f.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Sanitize every field of a submitted payload.
pub fn sanitize_payload(payload: &Map<String, Value>) -> SanitizedPayload {
    let fields = payload
        .iter()
        .map(|(name, value)| {
            let field = SanitizedField {
                name: escape_field_name(name),
                value: sanitize_value(value),
            };
            (name.clone(), field)
        })
        .collect();
    SanitizedPayload { fields }
}

/// Render a value to text and strip markup, URLs and control bytes.
///
/// Strings are taken as-is; every other value is pretty-printed as JSON
/// with sorted object keys first.
pub fn sanitize_value(value: &Value) -> String {
    match value {
        Value::String(s) => sanitize_text(s),
        other => {
            let rendered =
                serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string());
            sanitize_text(&rendered)
        }
    }
}

/// Apply the three replacement passes and trim the result.
pub fn sanitize_text(input: &str) -> String {
    let text = HTML_TAG.replace_all(input, "");
    let text = URL.replace_all(&text, "");
    let text = CONTROL.replace_all(&text, " ");
    text.trim().to_string()
}

/// Entity-escape angle brackets in a field name.
///
/// Names are written into the mail markup verbatim, so this is their only
/// protection.
pub fn escape_field_name(name: &str) -> String {
    name.replace('<', "&lt;").replace('>', "&gt;")
}
