//! Report tree nodes
//!
//! A `ReportNode` is either a group (plan, test, suite, parametrization)
//! or a leaf (testcase). Status, runtime status and tag indices of groups
//! are derived from their children.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use xxhash_rust::xxh3::Xxh3;

use super::merge::MergeError;
use super::status::{RuntimeStatus, Status};
use super::tags::Tags;
use crate::error::RunnerError;
use crate::utils::Timer;

/// Node category
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Plan,
    Test,
    TaskRerun,
    Error,
    Suite,
    Parametrization,
    SynthesizedSuite,
    Case,
    SynthesizedCase,
}

impl Category {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Category::Case | Category::SynthesizedCase)
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(self, Category::SynthesizedSuite | Category::SynthesizedCase)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Plan => "plan",
            Category::Test => "test",
            Category::TaskRerun => "task_rerun",
            Category::Error => "error",
            Category::Suite => "suite",
            Category::Parametrization => "parametrization",
            Category::SynthesizedSuite => "synthesized_suite",
            Category::Case => "case",
            Category::SynthesizedCase => "synthesized_case",
        };
        f.write_str(name)
    }
}

/// Part `index` of `total` of a split test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawPart")]
pub struct Part {
    pub index: u32,
    pub total: u32,
}

/// Unchecked wire form of [`Part`]
#[derive(Deserialize)]
struct RawPart {
    index: u32,
    total: u32,
}

impl TryFrom<RawPart> for Part {
    type Error = RunnerError;

    fn try_from(raw: RawPart) -> Result<Self, Self::Error> {
        Part::new(raw.index, raw.total)
    }
}

impl Part {
    pub fn new(index: u32, total: u32) -> Result<Self, RunnerError> {
        if total == 0 || index >= total {
            return Err(RunnerError::InvalidPart { index, total });
        }
        Ok(Self { index, total })
    }

    /// Whether the testcase with global `ordinal` belongs to this part
    pub fn owns(&self, ordinal: usize) -> bool {
        ordinal
            .checked_rem(self.total as usize)
            .is_some_and(|rest| rest == self.index as usize)
    }

    /// `" - part(m/n)"`
    pub fn suffix(&self) -> String {
        format!(" - {self}")
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "part({}/{})", self.index, self.total)
    }
}

impl FromStr for Part {
    type Err = anyhow::Error;

    /// Parse `m/n`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (m, n) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("expected <index>/<total>, got {s}"))?;
        let part = Part::new(m.trim().parse()?, n.trim().parse()?)?;
        Ok(part)
    }
}

/// Coarse placement of a node among its siblings
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lead,
    Body,
    Trail,
}

/// Declaration-order key assigned at discovery time
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub phase: Phase,
    pub index: u64,
}

impl Position {
    pub fn lead(index: u64) -> Self {
        Self {
            phase: Phase::Lead,
            index,
        }
    }

    pub fn body(index: u64) -> Self {
        Self {
            phase: Phase::Body,
            index,
        }
    }

    pub fn trail(index: u64) -> Self {
        Self {
            phase: Phase::Trail,
            index,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// A log line kept on a report node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub level: Severity,
    pub message: String,
    pub created: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(level: Severity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            message: message.into(),
            created: Utc::now(),
        }
    }
}

/// Outcome of a single check made by a testcase
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub description: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-status testcase counts of a subtree
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counter {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub error: usize,
    pub unstable: usize,
    pub unknown: usize,
}

impl Counter {
    fn add(&mut self, status: Status) {
        use super::status::StatusCategory;

        self.total += 1;
        match status.category() {
            StatusCategory::Error => self.error += 1,
            StatusCategory::Failed => self.failed += 1,
            StatusCategory::Unknown => self.unknown += 1,
            StatusCategory::Passed => self.passed += 1,
            StatusCategory::Unstable => self.unstable += 1,
        }
    }
}

/// A node of the report tree
#[derive(Clone, Debug, Deserialize)]
#[serde(from = "NodeRepr")]
pub struct ReportNode {
    pub uid: String,
    pub name: String,
    pub description: Option<String>,
    pub definition_name: String,
    pub category: Category,
    pub assertions: Vec<Assertion>,
    pub logs: Vec<LogRecord>,
    pub status_override: Option<Status>,
    pub tags: Tags,
    pub timer: Timer,
    pub part: Option<Part>,
    pub position: Option<Position>,
    pub host: Option<String>,
    pub(super) entries: Vec<ReportNode>,
    pub(super) index: HashMap<String, usize>,
    pub(super) base_status: Status,
    pub(super) runtime_status: RuntimeStatus,
    pub(super) tags_index: Tags,
}

impl ReportNode {
    pub fn new(uid: impl Into<String>, name: impl Into<String>, category: Category) -> Self {
        let name = name.into();
        Self {
            uid: uid.into(),
            definition_name: name.clone(),
            name,
            description: None,
            category,
            assertions: Vec::new(),
            logs: Vec::new(),
            status_override: None,
            tags: Tags::new(),
            timer: Timer::new(),
            part: None,
            position: None,
            host: None,
            entries: Vec::new(),
            index: HashMap::new(),
            base_status: Status::Unknown,
            runtime_status: RuntimeStatus::Ready,
            tags_index: Tags::new(),
        }
    }

    /// Node whose uid equals its name
    pub fn named(name: impl Into<String>, category: Category) -> Self {
        let name = name.into();
        Self::new(name.clone(), name, category)
    }

    /// Placeholder node standing in for a test that produced no usable report
    pub fn error_placeholder(
        uid: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut node = Self::new(uid, name, Category::Error);
        node.status_override = Some(Status::Error);
        node.runtime_status = RuntimeStatus::Finished;
        node.log(Severity::Error, message);
        node
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_definition_name(mut self, definition_name: impl Into<String>) -> Self {
        self.definition_name = definition_name.into();
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self.propagate_tags();
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.part = Some(part);
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.category.is_leaf()
    }

    pub fn is_synthesized(&self) -> bool {
        self.category.is_synthesized()
    }

    pub fn entries(&self) -> &[ReportNode] {
        &self.entries
    }

    pub fn child(&self, uid: &str) -> Option<&ReportNode> {
        self.index.get(uid).map(|&i| &self.entries[i])
    }

    /// Mutable access to a child. Call [`ReportNode::propagate_tags`]
    /// afterwards if its tags changed.
    pub fn child_mut(&mut self, uid: &str) -> Option<&mut ReportNode> {
        match self.index.get(uid) {
            Some(&i) => Some(&mut self.entries[i]),
            None => None,
        }
    }

    pub fn has_child(&self, uid: &str) -> bool {
        self.index.contains_key(uid)
    }

    /// Append a child, uids must be unique among siblings
    pub fn append(&mut self, child: ReportNode) -> Result<(), MergeError> {
        if self.is_leaf() {
            return Err(MergeError::Mismatch {
                uid: self.uid.clone(),
                reason: "cannot append to a testcase".into(),
            });
        }
        if self.has_child(&child.uid) {
            return Err(MergeError::DuplicateChild {
                parent: self.uid.clone(),
                uid: child.uid,
            });
        }
        self.tags_index.merge(&child.tags_index);
        self.index.insert(child.uid.clone(), self.entries.len());
        self.entries.push(child);
        Ok(())
    }

    /// Insert a child by `(position, uid)`; unpositioned children go last.
    ///
    /// The caller keeps sibling uids unique.
    pub fn insert_ordered(&mut self, child: ReportNode) {
        let at = match child.position {
            None => self.entries.len(),
            Some(position) => self
                .entries
                .iter()
                .position(|existing| match existing.position {
                    Some(other) => (other, existing.uid.as_str()) > (position, child.uid.as_str()),
                    None => false,
                })
                .unwrap_or(self.entries.len()),
        };
        self.tags_index.merge(&child.tags_index);
        self.entries.insert(at, child);
        self.reindex();
    }

    /// Drop all children
    pub fn clear_entries(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.propagate_tags();
    }

    /// Remove and return all children
    pub fn take_entries(&mut self) -> Vec<ReportNode> {
        self.index.clear();
        let entries = std::mem::take(&mut self.entries);
        self.propagate_tags();
        entries
    }

    pub(super) fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.uid.clone(), i))
            .collect();
    }

    /// Effective status: override, children, assertions, stored status
    pub fn status(&self) -> Status {
        if let Some(status) = self.status_override {
            return status;
        }
        if let Some(status) = Status::precedent(self.entries.iter().map(ReportNode::status)) {
            return status;
        }
        if self.is_leaf() && !self.assertions.is_empty() {
            return if self.assertions.iter().any(|a| !a.passed) {
                Status::Failed
            } else {
                Status::Passed
            };
        }
        self.base_status
    }

    /// Set the stored status, used when no override or children apply
    pub fn set_status(&mut self, status: Status) {
        self.base_status = status;
    }

    pub fn passed(&self) -> bool {
        self.status().is_passed()
    }

    pub fn runtime_status(&self) -> RuntimeStatus {
        RuntimeStatus::precedent(self.entries.iter().map(ReportNode::runtime_status))
            .unwrap_or(self.runtime_status)
    }

    /// Set the runtime status of this node and its whole subtree
    pub fn set_runtime_status(&mut self, runtime_status: RuntimeStatus) {
        self.runtime_status = runtime_status;
        for entry in &mut self.entries {
            entry.set_runtime_status(runtime_status);
        }
    }

    pub fn log(&mut self, level: Severity, message: impl Into<String>) {
        self.logs.push(LogRecord::new(level, message));
    }

    /// Record an error log and force the node to ERROR
    pub fn fail_with_error(&mut self, message: impl Into<String>) {
        self.log(Severity::Error, message);
        self.status_override = Some(Status::Error);
    }

    pub fn tags_index(&self) -> &Tags {
        &self.tags_index
    }

    /// Recompute `tags_index` bottom-up for the whole subtree
    pub fn propagate_tags(&mut self) {
        let mut index = self.tags.clone();
        for entry in &mut self.entries {
            entry.propagate_tags();
            index.merge(&entry.tags_index);
        }
        self.tags_index = index;
    }

    /// 64-bit change hash over uid, status, runtime status and children
    pub fn hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(self.uid.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.status().label().as_bytes());
        hasher.update(&[0, self.runtime_status() as u8]);
        for entry in &self.entries {
            hasher.update(&entry.hash().to_le_bytes());
        }
        hasher.digest()
    }

    /// Testcase counts, excluding synthesized and rerun subtrees
    pub fn counter(&self) -> Counter {
        let mut counter = Counter::default();
        self.count_into(&mut counter);
        counter
    }

    fn count_into(&self, counter: &mut Counter) {
        match self.category {
            Category::Case => counter.add(self.status()),
            Category::SynthesizedCase | Category::SynthesizedSuite | Category::TaskRerun => {}
            Category::Error if self.entries.is_empty() => counter.add(self.status()),
            _ => {
                for entry in &self.entries {
                    entry.count_into(counter);
                }
            }
        }
    }

    /// Depth-first `(depth, node)` listing, root at depth 0
    pub fn flatten(&self) -> Vec<(usize, &ReportNode)> {
        let mut out = Vec::new();
        self.flatten_into(0, &mut out);
        out
    }

    fn flatten_into<'a>(&'a self, depth: usize, out: &mut Vec<(usize, &'a ReportNode)>) {
        out.push((depth, self));
        for entry in &self.entries {
            entry.flatten_into(depth + 1, out);
        }
    }

    /// Follow a path of child uids from this node
    pub fn get_by_uids(&self, uids: &[&str]) -> Option<&ReportNode> {
        uids.iter()
            .try_fold(self, |node, uid| node.child(uid))
    }

    /// Mark the subtree as produced by `part`, suffixing synthesized testcases
    pub fn annotate_part(&mut self, part: Part) {
        self.part = Some(part);
        if self.category == Category::SynthesizedCase {
            let suffix = part.suffix();
            if !self.uid.ends_with(&suffix) {
                self.uid.push_str(&suffix);
                self.name.push_str(&suffix);
            }
        }
        for entry in &mut self.entries {
            entry.annotate_part(part);
        }
        self.reindex();
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl fmt::Display for ReportNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.name, self.category, self.status())
    }
}

/// Borrowed wire shape used for serialization
#[derive(Serialize)]
struct NodeView<'a> {
    uid: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    definition_name: &'a str,
    category: Category,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_override: Option<Status>,
    runtime_status: RuntimeStatus,
    tags: &'a Tags,
    tags_index: &'a Tags,
    part: Option<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a str>,
    timer: &'a Timer,
    logs: &'a [LogRecord],
    #[serde(skip_serializing_if = "<[Assertion]>::is_empty")]
    assertions: &'a [Assertion],
    entries: &'a [ReportNode],
}

impl Serialize for ReportNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        NodeView {
            uid: &self.uid,
            name: &self.name,
            description: self.description.as_deref(),
            definition_name: &self.definition_name,
            category: self.category,
            status: self.status(),
            status_override: self.status_override,
            runtime_status: self.runtime_status(),
            tags: &self.tags,
            tags_index: &self.tags_index,
            part: self.part,
            position: self.position,
            host: self.host.as_deref(),
            timer: &self.timer,
            logs: &self.logs,
            assertions: &self.assertions,
            entries: &self.entries,
        }
        .serialize(serializer)
    }
}

/// Owned wire shape used for deserialization
#[derive(Deserialize)]
struct NodeRepr {
    uid: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    definition_name: Option<String>,
    category: Category,
    #[serde(default = "unknown_status")]
    status: Status,
    #[serde(default)]
    status_override: Option<Status>,
    #[serde(default)]
    runtime_status: RuntimeStatus,
    #[serde(default)]
    tags: Tags,
    #[serde(default)]
    part: Option<Part>,
    #[serde(default)]
    position: Option<Position>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    timer: Timer,
    #[serde(default)]
    logs: Vec<LogRecord>,
    #[serde(default)]
    assertions: Vec<Assertion>,
    #[serde(default)]
    entries: Vec<ReportNode>,
}

fn unknown_status() -> Status {
    Status::Unknown
}

impl From<NodeRepr> for ReportNode {
    fn from(repr: NodeRepr) -> Self {
        let mut node = ReportNode::new(repr.uid, repr.name, repr.category);
        node.description = repr.description;
        if let Some(definition_name) = repr.definition_name {
            node.definition_name = definition_name;
        }
        node.status_override = repr.status_override;
        node.base_status = repr.status;
        node.runtime_status = repr.runtime_status;
        node.tags = repr.tags;
        node.part = repr.part;
        node.position = repr.position;
        node.host = repr.host;
        node.timer = repr.timer;
        node.logs = repr.logs;
        node.assertions = repr.assertions;
        node.entries = repr.entries;
        node.reindex();
        node.propagate_tags();
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn case(name: &str, status: Status) -> ReportNode {
        let mut node = ReportNode::named(name, Category::Case);
        node.set_status(status);
        node
    }

    fn sample_tree() -> ReportNode {
        let mut suite = ReportNode::named("Suite", Category::Suite)
            .with_tags(Tags::simple(["suite-tag"]));
        suite.append(case("a", Status::Passed)).unwrap();
        suite
            .append(case("b", Status::Failed).with_tags(Tags::new().with("color", "red")))
            .unwrap();
        let mut test = ReportNode::named("Test", Category::Test);
        test.append(suite).unwrap();
        test
    }

    #[test]
    fn test_status_from_children() {
        let tree = sample_tree();
        assert_eq!(tree.status(), Status::Failed);
        assert_eq!(tree.get_by_uids(&["Suite", "a"]).unwrap().status(), Status::Passed);
    }

    #[test]
    fn test_override_always_wins() {
        let mut tree = sample_tree();
        tree.status_override = Some(Status::Passed);
        assert_eq!(tree.status(), Status::Passed);
    }

    #[test]
    fn test_assertions_drive_case_status() {
        let mut node = ReportNode::named("c", Category::Case);
        assert_eq!(node.status(), Status::Unknown);
        node.assertions.push(Assertion {
            description: "ok".into(),
            passed: true,
            detail: None,
        });
        assert_eq!(node.status(), Status::Passed);
        node.assertions.push(Assertion {
            description: "bad".into(),
            passed: false,
            detail: None,
        });
        assert_eq!(node.status(), Status::Failed);
    }

    #[test]
    fn test_tags_index_includes_descendants() {
        let tree = sample_tree();
        assert!(tree.tags_index().contains("color", "red"));
        assert!(tree.tags_index().contains("simple", "suite-tag"));
        assert!(tree.tags.is_empty());
    }

    #[test]
    fn test_duplicate_append_rejected() {
        let mut suite = ReportNode::named("Suite", Category::Suite);
        suite.append(case("a", Status::Passed)).unwrap();
        let err = suite.append(case("a", Status::Failed)).unwrap_err();
        assert!(matches!(err, MergeError::DuplicateChild { .. }));
        assert_eq!(suite.entries().len(), 1);
    }

    #[test]
    fn test_hash_tracks_status_changes() {
        let tree = sample_tree();
        let before = tree.hash();
        assert_eq!(before, sample_tree().hash());

        let mut changed = sample_tree();
        changed
            .child_mut("Suite")
            .and_then(|s| s.child_mut("b"))
            .unwrap()
            .set_status(Status::Passed);
        assert_ne!(before, changed.hash());
    }

    #[test]
    fn test_runtime_status_is_minimum() {
        let mut tree = sample_tree();
        tree.set_runtime_status(RuntimeStatus::Finished);
        assert_eq!(tree.runtime_status(), RuntimeStatus::Finished);
        tree.child_mut("Suite")
            .and_then(|s| s.child_mut("a"))
            .unwrap()
            .set_runtime_status(RuntimeStatus::Running);
        assert_eq!(tree.runtime_status(), RuntimeStatus::Running);
    }

    #[test]
    fn test_json_round_trip_is_idempotent() {
        let tree = sample_tree();
        let first = tree.to_json().unwrap();
        let back = ReportNode::from_json(&first).unwrap();
        assert_eq!(back.status(), Status::Failed);
        assert_eq!(back.hash(), tree.hash());
        assert_eq!(back.to_json().unwrap(), first);
    }

    #[test]
    fn test_json_shape() {
        let value: serde_json::Value = serde_json::from_str(&sample_tree().to_json().unwrap()).unwrap();
        assert_eq!(value["uid"], "Test");
        assert_eq!(value["category"], "test");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["entries"][0]["entries"][1]["uid"], "b");
        assert!(value["tags_index"]["color"].is_array());
    }

    #[test]
    fn test_counter_skips_synthesized() {
        let mut tree = sample_tree();
        let mut env = ReportNode::named("Environment Start", Category::SynthesizedSuite);
        env.append(case("Starting", Status::Passed)).unwrap();
        tree.append(env).unwrap();
        let counter = tree.counter();
        assert_eq!(counter.total, 2);
        assert_eq!(counter.passed, 1);
        assert_eq!(counter.failed, 1);
    }

    #[test]
    fn test_flatten_depths() {
        let tree = sample_tree();
        let flat: Vec<(usize, &str)> = tree
            .flatten()
            .into_iter()
            .map(|(depth, node)| (depth, node.uid.as_str()))
            .collect();
        assert_eq!(flat, vec![(0, "Test"), (1, "Suite"), (2, "a"), (2, "b")]);
    }

    #[test]
    fn test_annotate_part_suffixes_synthesized_cases() {
        let mut suite = ReportNode::named("Suite", Category::Suite);
        suite
            .append(ReportNode::named("setup", Category::SynthesizedCase))
            .unwrap();
        suite.append(case("a", Status::Passed)).unwrap();
        let part = Part::new(1, 3).unwrap();
        suite.annotate_part(part);
        suite.annotate_part(part);
        assert!(suite.has_child("setup - part(1/3)"));
        assert!(suite.has_child("a"));
        assert_eq!(suite.part, Some(part));
    }

    #[test]
    fn test_part_parse() {
        let part: Part = "2/4".parse().unwrap();
        assert_eq!(part, Part { index: 2, total: 4 });
        assert!("4/4".parse::<Part>().is_err());
        assert!(Part::new(0, 0).is_err());
        assert!(part.owns(6));
        assert!(!part.owns(7));
    }

    #[test]
    fn test_part_deserialize_validates() {
        let part: Part = serde_json::from_str(r#"{"index":1,"total":3}"#).unwrap();
        assert_eq!(part, Part::new(1, 3).unwrap());
        let err = serde_json::from_str::<Part>(r#"{"index":3,"total":0}"#).unwrap_err();
        assert!(err.to_string().contains("invalid part 3/0"));
        assert!(serde_json::from_str::<Part>(r#"{"index":2,"total":2}"#).is_err());

        let loaded = serde_json::from_str::<ReportNode>(
            &serde_json::to_string(&ReportNode::named("T", Category::Test))
                .unwrap()
                .replace(r#""part":null"#, r#""part":{"index":5,"total":0}"#),
        );
        assert!(loaded.is_err());

        let unchecked = Part { index: 0, total: 0 };
        assert!(!unchecked.owns(4));
    }

    #[test]
    fn test_insert_ordered_by_position() {
        let mut group = ReportNode::named("Group", Category::Suite);
        group.insert_ordered(case("c3", Status::Passed).with_position(Position::body(3)));
        group.insert_ordered(case("c1", Status::Passed).with_position(Position::body(1)));
        group.insert_ordered(case("teardown", Status::Passed).with_position(Position::trail(0)));
        group.insert_ordered(case("setup", Status::Passed).with_position(Position::lead(0)));
        group.insert_ordered(case("c2", Status::Passed).with_position(Position::body(2)));
        let order: Vec<&str> = group.entries().iter().map(|e| e.uid.as_str()).collect();
        assert_eq!(order, vec!["setup", "c1", "c2", "c3", "teardown"]);
        assert_eq!(group.child("c2").unwrap().uid, "c2");
    }
}
