// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed points handed from the translator to the delivery pipeline.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::SendError;

/// A single field value. Captured text is coerced into exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
}

impl FieldValue {
    /// Coerces raw captured text: integer first, then a finite float, otherwise the text itself.
    ///
    /// Integers accept an optional sign and the `0x`, `0o` and `0b` prefixes.
    ///
    /// ```
    /// use logpoint::point::FieldValue;
    ///
    /// assert_eq!(FieldValue::coerce("42"), FieldValue::Integer(42));
    /// assert_eq!(FieldValue::coerce("0x10"), FieldValue::Integer(16));
    /// assert_eq!(FieldValue::coerce("1.5"), FieldValue::Float(1.5));
    /// assert_eq!(FieldValue::coerce("GET"), FieldValue::String("GET".to_string()));
    /// ```
    pub fn coerce(raw: &str) -> Self {
        if let Some(i) = parse_integer(raw) {
            return FieldValue::Integer(i);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => FieldValue::Float(f),
            _ => FieldValue::String(raw.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::String(v) => write!(f, "{v}"),
        }
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    let (negative, digits) = match raw.as_bytes().first()? {
        b'-' => (true, &raw[1..]),
        b'+' => (false, &raw[1..]),
        _ => (false, raw),
    };
    let (radix, digits) = match digits.get(..2) {
        Some("0x") | Some("0X") => (16, &digits[2..]),
        Some("0o") | Some("0O") => (8, &digits[2..]),
        Some("0b") | Some("0B") => (2, &digits[2..]),
        _ => (10, digits),
    };
    // from_str_radix would accept a second sign after the prefix
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = u64::from_str_radix(digits, radix).ok()?;
    if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        i64::try_from(magnitude).ok()
    }
}

/// One metric/event destined for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub key: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    /// Builds a point. The key must be non-empty; an empty field set is allowed and left
    /// for the store to judge.
    pub fn new(
        key: impl Into<String>,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, FieldValue>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, SendError> {
        let key = key.into();
        if key.is_empty() {
            return Err(SendError::EmptyKey);
        }
        Ok(Point {
            key,
            tags,
            fields,
            timestamp,
        })
    }
}
