// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Filter chain and translator.
//!
//! A matched [`Record`] first runs through an ordered list of [`FilterSpec`] rules. Each rule can
//! validate captured values, re-match one field with a secondary pattern (merging the captures
//! back into the record) and promote more fields to tags or values. The translator then turns
//! the refined record into a [`Point`].
//!
//! Field-list growth is applied to a per-line [`FieldLists`] copy, the configured
//! [`TranslationSpec`] is never modified.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::trace;

use crate::errors::{MatchError, ParseError};
use crate::grok::{PatternMatcher, Record};
use crate::point::{FieldValue, Point};
use crate::util::strip_quotes;

/// How a line's captures become a point.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TranslationSpec {
    /// Primary pattern applied to every line.
    pub pattern: String,
    /// Field whose captured value names the point. When it was not captured the key itself is
    /// used as the name.
    pub key: String,
    #[serde(default)]
    pub timestamp_field: Option<String>,
    /// chrono `strftime` layout, or one of `rfc3339`, `rfc2822`, `unix`, `unix_ms`, `unix_ns`.
    #[serde(default)]
    pub timestamp_layout: Option<String>,
    #[serde(default)]
    pub tag_fields: Vec<String>,
    #[serde(default)]
    pub value_fields: Vec<String>,
}

/// A secondary refinement rule.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct FilterSpec {
    /// Secondary pattern. When absent the rule only validates and promotes fields.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Field whose value the secondary pattern is matched against.
    #[serde(default)]
    pub source_field: String,
    #[serde(default)]
    pub value_fields: Vec<String>,
    #[serde(default)]
    pub tag_fields: Vec<String>,
    /// Required values. Any mismatch makes the rule a no-match.
    #[serde(default)]
    pub valid: Option<BTreeMap<String, String>>,
}

/// What a validation no-match means for the line.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoMatchPolicy {
    /// Drop the line, no point is emitted.
    #[default]
    Skip,
    /// Ignore the failing rule and carry on with the next one.
    Ignore,
}

/// Tag and value field names for one line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldLists {
    pub tags: Vec<String>,
    pub values: Vec<String>,
}

impl From<&TranslationSpec> for FieldLists {
    fn from(spec: &TranslationSpec) -> Self {
        FieldLists {
            tags: spec.tag_fields.clone(),
            values: spec.value_fields.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Applied,
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Translate the record with these field lists.
    Emit(FieldLists),
    /// The rule at this index did not validate.
    Skip { rule: usize },
}

/// Applies one rule to `record`, growing `fields` when the rule validates.
///
/// Secondary captures overwrite existing record entries of the same name, with one pair of
/// wrapping double quotes removed. A secondary pattern that does not match adds nothing but the
/// rule still counts as applied.
pub fn refine(
    matcher: &dyn PatternMatcher,
    record: &mut Record,
    fields: &mut FieldLists,
    filter: &FilterSpec,
) -> Result<RuleOutcome, MatchError> {
    if let Some(valid) = &filter.valid {
        for (name, required) in valid {
            let current = record.get(name).map_or("", String::as_str);
            if current != required {
                trace!("Field {} is {:?}, rule requires {:?}", name, current, required);
                return Ok(RuleOutcome::NoMatch);
            }
        }
    }

    if let Some(pattern) = filter.pattern.as_deref().filter(|p| !p.is_empty()) {
        let source = record
            .get(&filter.source_field)
            .map_or("", String::as_str);
        if let Some(matched) = matcher.parse(pattern, source)? {
            for (name, value) in matched {
                let value = strip_quotes(&value).to_string();
                record.insert(name, value);
            }
        }
    }

    fields.values.extend(filter.value_fields.iter().cloned());
    fields.tags.extend(filter.tag_fields.iter().cloned());
    Ok(RuleOutcome::Applied)
}

/// Runs every rule in order against `record`.
pub fn apply_filters(
    matcher: &dyn PatternMatcher,
    record: &mut Record,
    spec: &TranslationSpec,
    filters: &[FilterSpec],
    policy: NoMatchPolicy,
) -> Result<ChainOutcome, MatchError> {
    let mut fields = FieldLists::from(spec);
    for (rule, filter) in filters.iter().enumerate() {
        if refine(matcher, record, &mut fields, filter)? == RuleOutcome::NoMatch {
            match policy {
                NoMatchPolicy::Skip => return Ok(ChainOutcome::Skip { rule }),
                NoMatchPolicy::Ignore => trace!("Ignoring rule {} that did not validate", rule),
            }
        }
    }
    Ok(ChainOutcome::Emit(fields))
}

/// Builds the point for a refined record.
///
/// `base_tags` are applied first, field-derived tags win on conflicts. Tag and value fields
/// that were not captured are left out.
pub fn build_point(
    record: &Record,
    spec: &TranslationSpec,
    fields: &FieldLists,
    base_tags: &BTreeMap<String, String>,
) -> Result<Point, ParseError> {
    let key = record
        .get(&spec.key)
        .filter(|k| !k.is_empty())
        .unwrap_or(&spec.key)
        .clone();

    let mut tags = base_tags.clone();
    for name in &fields.tags {
        if let Some(value) = record.get(name) {
            tags.insert(name.clone(), value.clone());
        }
    }

    let values = fields
        .values
        .iter()
        .filter_map(|name| {
            record
                .get(name)
                .map(|raw| (name.clone(), FieldValue::coerce(raw)))
        })
        .collect();

    let timestamp = match (spec.timestamp_field.as_deref(), spec.timestamp_layout.as_deref()) {
        (Some(field), Some(layout)) if !field.is_empty() && !layout.is_empty() => {
            let raw = record.get(field).map_or("", String::as_str);
            parse_timestamp(raw, layout)?
        }
        _ => Utc::now(),
    };

    Ok(Point::new(key, tags, values, timestamp)?)
}

/// Parses `value` with a chrono `strftime` layout or one of the named layouts.
///
/// Layouts without an offset are read as UTC, date-only layouts as midnight UTC.
pub fn parse_timestamp(value: &str, layout: &str) -> Result<DateTime<Utc>, ParseError> {
    let error = || ParseError::Timestamp {
        value: value.to_string(),
        layout: layout.to_string(),
    };

    let parsed = match layout {
        "rfc3339" => DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        "rfc2822" => DateTime::parse_from_rfc2822(value)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        "unix" => value
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        "unix_ms" => value
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        "unix_ns" => value
            .parse::<i64>()
            .ok()
            .map(|ns| Utc.timestamp_nanos(ns)),
        _ => DateTime::parse_from_str(value, layout)
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(value, layout)
                    .ok()
                    .map(|naive| Utc.from_utc_datetime(&naive))
            })
            .or_else(|| {
                NaiveDate::parse_from_str(value, layout)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
                    .map(|naive| Utc.from_utc_datetime(&naive))
            }),
    };
    parsed.ok_or_else(error)
}
