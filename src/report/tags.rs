//! Tag sets attached to report nodes
//!
//! Tags are named groups of values, e.g. `{"simple": {"slow"}, "color": {"red"}}`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Key used for plain, unnamed tags
pub const SIMPLE_TAG: &str = "simple";

/// Mapping of tag name to tag values
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, BTreeSet<String>>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from plain tag values
    pub fn simple<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tags = Self::new();
        for value in values {
            tags.insert(SIMPLE_TAG, value);
        }
        tags
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().insert(value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }

    pub fn contains(&self, name: &str, value: &str) -> bool {
        self.0.get(name).is_some_and(|values| values.contains(value))
    }

    /// Union `other` into `self`
    pub fn merge(&mut self, other: &Tags) {
        for (name, values) in &other.0 {
            self.0
                .entry(name.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    pub fn merged(&self, other: &Tags) -> Tags {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// True if any tag of `wanted` is present
    pub fn matches_any(&self, wanted: &Tags) -> bool {
        wanted
            .iter()
            .any(|(name, value)| self.contains(name, value))
    }

    /// True if every tag of `wanted` is present
    pub fn matches_all(&self, wanted: &Tags) -> bool {
        wanted
            .iter()
            .all(|(name, value)| self.contains(name, value))
    }

    /// Iterate over `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Parse `slow,color=red` style filters
    pub fn parse(input: &str) -> Tags {
        let mut tags = Tags::new();
        for item in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.split_once('=') {
                Some((name, value)) => tags.insert(name.trim(), value.trim()),
                None => tags.insert(SIMPLE_TAG, item),
            }
        }
        tags
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(name, value)| {
                if name == SIMPLE_TAG {
                    value.to_string()
                } else {
                    format!("{name}={value}")
                }
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_unions_values() {
        let mut a = Tags::simple(["fast"]).with("color", "red");
        let b = Tags::simple(["slow"]).with("color", "blue");
        a.merge(&b);
        assert!(a.contains(SIMPLE_TAG, "fast"));
        assert!(a.contains(SIMPLE_TAG, "slow"));
        assert!(a.contains("color", "blue"));
        assert_eq!(a.iter().count(), 4);
    }

    #[test]
    fn test_parse_and_match() {
        let filter = Tags::parse("slow, color=red");
        let node = Tags::simple(["slow"]);
        assert!(node.matches_any(&filter));
        assert!(!node.matches_all(&filter));
        assert_eq!(filter.to_string(), "color=red,slow");
    }
}
