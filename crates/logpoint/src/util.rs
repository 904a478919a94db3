// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Small string helpers shared by configuration and the filter chain.

use std::collections::BTreeMap;

/// Parses `key:value` tags separated by commas or whitespace.
///
/// Entries without exactly one `:` are ignored with an error log, so a typo in one tag does not
/// discard the others.
///
/// # Examples
///
/// ```
/// use logpoint::util::parse_tags;
///
/// let tags = parse_tags("env:prod, host:web-1");
/// assert_eq!(tags.get("env").map(String::as_str), Some("prod"));
/// assert_eq!(tags.get("host").map(String::as_str), Some("web-1"));
/// ```
pub fn parse_tags(raw: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();

    // Space-separated key:value tags are the common form, comma-separated ones are accepted too.
    let normalized = raw.replace(',', " ");

    for kv in normalized.split_whitespace() {
        match kv.split_once(':') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() && !value.contains(':') => {
                tags.insert(key.to_string(), value.to_string());
            }
            _ => tracing::error!("Ignoring malformed tag '{}', expected key:value", kv),
        }
    }
    tags
}

/// Removes one leading and one trailing double quote when the value is wrapped in them.
///
/// Interior quotes are kept: `"a"b"` becomes `a"b`.
pub fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
