// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Points accumulated for a single write.

use crate::point::Point;

/// Ordered points awaiting one store write.
///
/// The delivery worker owns exactly one batch. It is only cleared after the store accepted it,
/// a failed write retries the very same points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    points: Vec<Point>,
}

impl Batch {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Batch {
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn is_full(&self, threshold: usize) -> bool {
        self.points.len() >= threshold
    }

    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Drops every point, keeping the allocation for the next batch.
    pub fn clear(&mut self) {
        self.points.clear();
    }
}

impl FromIterator<Point> for Batch {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Batch {
            points: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn point(key: &str) -> Point {
        Point::new(key, BTreeMap::new(), BTreeMap::new(), Utc::now()).unwrap()
    }

    #[test]
    fn test_batch_keeps_order() {
        let mut batch = Batch::with_capacity(3);
        batch.push(point("a"));
        batch.push(point("b"));
        batch.push(point("c"));

        let keys: Vec<_> = batch.points().iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_batch_full_at_threshold() {
        let mut batch = Batch::with_capacity(2);
        assert!(!batch.is_full(2));
        batch.push(point("a"));
        assert!(!batch.is_full(2));
        batch.push(point("b"));
        assert!(batch.is_full(2));
    }

    #[test]
    fn test_batch_clear() {
        let mut batch: Batch = vec![point("a"), point("b")].into_iter().collect();
        assert_eq!(batch.len(), 2);
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
