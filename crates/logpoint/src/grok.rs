// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Grok-style named pattern matching.
//!
//! A pattern is a regular expression that may reference other patterns with `%{NAME}`. A
//! reference written `%{NAME:field}` also captures the matched text under `field`, and an
//! optional third part (`%{NUMBER:bytes:int}`) is accepted and ignored. References are expanded
//! recursively into plain regex groups and the result is compiled once and cached.
//!
//! Capture names are mapped to generated group names, so fields may contain characters regex
//! group names do not allow (`http.method`, `user-agent`).

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

use crate::constants::MAX_PATTERN_DEPTH;
use crate::errors::MatchError;

/// Captured fields of one matched line. A missing key means the field was not captured.
pub type Record = HashMap<String, String>;

/// Matches text against a named pattern (or a pattern expression).
pub trait PatternMatcher: Send + Sync {
    /// Returns `Ok(None)` when the text does not match; errors are reserved for patterns that
    /// cannot be used at all.
    fn parse(&self, pattern: &str, text: &str) -> Result<Option<Record>, MatchError>;
}

const BASE_PATTERNS: &[(&str, &str)] = &[
    ("USERNAME", r"[a-zA-Z0-9._-]+"),
    ("USER", r"%{USERNAME}"),
    ("INT", r"(?:[+-]?(?:[0-9]+))"),
    ("BASE10NUM", r"[+-]?(?:[0-9]+(?:\.[0-9]+)?|\.[0-9]+)"),
    ("NUMBER", r"(?:%{BASE10NUM})"),
    ("BASE16NUM", r"[+-]?(?:0x)?(?:[0-9A-Fa-f]+)"),
    ("POSINT", r"\b(?:[1-9][0-9]*)\b"),
    ("NONNEGINT", r"\b(?:[0-9]+)\b"),
    ("WORD", r"\b\w+\b"),
    ("NOTSPACE", r"\S+"),
    ("SPACE", r"\s*"),
    ("DATA", r".*?"),
    ("GREEDYDATA", r".*"),
    (
        "QUOTEDSTRING",
        r#"(?:"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')"#,
    ),
    ("QS", r"%{QUOTEDSTRING}"),
    (
        "UUID",
        r"[A-Fa-f0-9]{8}-(?:[A-Fa-f0-9]{4}-){3}[A-Fa-f0-9]{12}",
    ),
    (
        "IPV4",
        r"(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)",
    ),
    ("IP", r"%{IPV4}"),
    (
        "HOSTNAME",
        r"\b(?:[0-9A-Za-z][0-9A-Za-z-]{0,62})(?:\.(?:[0-9A-Za-z][0-9A-Za-z-]{0,62}))*\.?",
    ),
    ("HOST", r"%{HOSTNAME}"),
    ("IPORHOST", r"(?:%{IP}|%{HOSTNAME})"),
    ("HOSTPORT", r"%{IPORHOST}:%{POSINT}"),
    ("PATH", r"(?:/[^\s?#]*)+"),
    (
        "LOGLEVEL",
        r"(?:[Aa]lert|ALERT|[Tt]race|TRACE|[Dd]ebug|DEBUG|[Nn]otice|NOTICE|[Ii]nfo|INFO|[Ww]arn?(?:ing)?|WARN?(?:ING)?|[Ee]rr?(?:or)?|ERR?(?:OR)?|[Cc]rit?(?:ical)?|CRIT?(?:ICAL)?|[Ff]atal|FATAL|[Ss]evere|SEVERE|EMERG(?:ENCY)?|[Ee]merg(?:ency)?)",
    ),
    ("YEAR", r"(?:\d\d){1,2}"),
    ("MONTHNUM", r"(?:0?[1-9]|1[0-2])"),
    ("MONTHDAY", r"(?:(?:0[1-9])|(?:[12][0-9])|(?:3[01])|[1-9])"),
    ("HOUR", r"(?:2[0123]|[01]?[0-9])"),
    ("MINUTE", r"(?:[0-5][0-9])"),
    ("SECOND", r"(?:(?:[0-5]?[0-9]|60)(?:[:.,][0-9]+)?)"),
    ("ISO8601_TIMEZONE", r"(?:Z|[+-]%{HOUR}(?::?%{MINUTE}))"),
    (
        "TIMESTAMP_ISO8601",
        r"%{YEAR}-%{MONTHNUM}-%{MONTHDAY}[T ]%{HOUR}:?%{MINUTE}(?::?%{SECOND})?%{ISO8601_TIMEZONE}?",
    ),
];

fn reference_regex() -> &'static Regex {
    static REFERENCE: OnceLock<Regex> = OnceLock::new();
    REFERENCE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"%\{(\w+)(?::([^:}]+))?(?::\w+)?\}").expect("reference regex is valid")
    })
}

#[derive(Debug)]
struct CompiledPattern {
    regex: Regex,
    // (regex group name, record field name)
    captures: Vec<(String, String)>,
}

/// Regex-backed grok matcher preloaded with a base pattern set.
#[derive(Debug)]
pub struct Grok {
    definitions: HashMap<String, String>,
    compiled: Mutex<HashMap<String, Arc<CompiledPattern>>>,
}

impl Default for Grok {
    fn default() -> Self {
        Self::new()
    }
}

impl Grok {
    #[must_use]
    pub fn new() -> Self {
        let definitions = BASE_PATTERNS
            .iter()
            .map(|(name, definition)| ((*name).to_string(), (*definition).to_string()))
            .collect();
        Grok {
            definitions,
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) a named pattern definition.
    pub fn add_pattern(&mut self, name: impl Into<String>, definition: impl Into<String>) {
        self.definitions.insert(name.into(), definition.into());
        // Any cached expansion may have referenced the old definition.
        #[allow(clippy::expect_used)]
        self.compiled.get_mut().expect("lock poisoned").clear();
    }

    pub fn add_patterns<I, K, V>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, definition) in patterns {
            self.add_pattern(name, definition);
        }
    }

    fn compile(&self, pattern: &str) -> Result<Arc<CompiledPattern>, MatchError> {
        #[allow(clippy::expect_used)]
        let mut cache = self.compiled.lock().expect("lock poisoned");
        if let Some(compiled) = cache.get(pattern) {
            return Ok(Arc::clone(compiled));
        }

        let expression = self
            .definitions
            .get(pattern)
            .map_or(pattern, String::as_str);
        let mut fields = Vec::new();
        let expanded = self.expand(pattern, expression, 0, &mut fields)?;
        debug!("Compiled pattern {} into {}", pattern, expanded);

        let regex = Regex::new(&expanded).map_err(|source| MatchError::Compile {
            pattern: pattern.to_string(),
            source,
        })?;
        let captures = fields
            .into_iter()
            .enumerate()
            .map(|(index, field)| (group_name(index), field))
            .collect();

        let compiled = Arc::new(CompiledPattern { regex, captures });
        cache.insert(pattern.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    fn expand(
        &self,
        name: &str,
        expression: &str,
        depth: usize,
        fields: &mut Vec<String>,
    ) -> Result<String, MatchError> {
        if depth > MAX_PATTERN_DEPTH {
            return Err(MatchError::RecursionLimit(name.to_string()));
        }

        let mut expanded = String::with_capacity(expression.len());
        let mut last = 0;
        for caps in reference_regex().captures_iter(expression) {
            let Some(reference) = caps.get(0) else {
                continue;
            };
            let Some(referenced) = caps.get(1).map(|m| m.as_str()) else {
                continue;
            };
            expanded.push_str(&expression[last..reference.start()]);

            let definition = self
                .definitions
                .get(referenced)
                .ok_or_else(|| MatchError::UnknownPattern(referenced.to_string()))?;
            let inner = self.expand(referenced, definition, depth + 1, fields)?;

            match caps.get(2) {
                Some(field) => {
                    expanded.push_str(&format!("(?P<{}>{})", group_name(fields.len()), inner));
                    fields.push(field.as_str().to_string());
                }
                None => {
                    expanded.push_str("(?:");
                    expanded.push_str(&inner);
                    expanded.push(')');
                }
            }
            last = reference.end();
        }
        expanded.push_str(&expression[last..]);
        Ok(expanded)
    }
}

fn group_name(index: usize) -> String {
    format!("grok{index}")
}

impl PatternMatcher for Grok {
    fn parse(&self, pattern: &str, text: &str) -> Result<Option<Record>, MatchError> {
        let compiled = self.compile(pattern)?;
        let Some(caps) = compiled.regex.captures(text) else {
            return Ok(None);
        };

        let mut record = Record::with_capacity(compiled.captures.len());
        for (group, field) in &compiled.captures {
            if let Some(value) = caps.name(group) {
                record.insert(field.clone(), value.as_str().to_string());
            }
        }
        Ok(Some(record))
    }
}
