//! Timer utilities
//!
//! Records named wall-clock intervals (`run`, `setup`, ...) on report nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A start/end pair, `end` is unset while the interval is open
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl Interval {
    pub fn duration(&self) -> Option<Duration> {
        self.end
            .and_then(|end| (end - self.start).to_std().ok())
    }

    /// Smallest interval covering both
    pub fn union(&self, other: &Interval) -> Interval {
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        Interval {
            start: self.start.min(other.start),
            end,
        }
    }
}

/// Named intervals of a report node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timer(BTreeMap<String, Interval>);

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the interval `key`
    pub fn start(&mut self, key: &str) {
        self.0.insert(
            key.to_string(),
            Interval {
                start: Utc::now(),
                end: None,
            },
        );
    }

    /// Close the interval `key`, opening it first if needed
    pub fn end(&mut self, key: &str) {
        let now = Utc::now();
        self.0
            .entry(key.to_string())
            .or_insert(Interval {
                start: now,
                end: None,
            })
            .end = Some(now);
    }

    pub fn get(&self, key: &str) -> Option<&Interval> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: &str, interval: Interval) {
        self.0.insert(key.to_string(), interval);
    }

    /// Elapsed time of the `run` interval
    pub fn run_duration(&self) -> Option<Duration> {
        self.get("run").and_then(Interval::duration)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Union intervals key by key
    pub fn merge(&mut self, other: &Timer) {
        for (key, interval) in &other.0 {
            let merged = match self.0.get(key) {
                Some(existing) => existing.union(interval),
                None => *interval,
            };
            self.0.insert(key.clone(), merged);
        }
    }
}
