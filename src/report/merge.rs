//! Structural merge of report trees
//!
//! Used to fold rerun attempts and split-test parts into one report.

use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

use super::node::ReportNode;
use super::status::Status;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("cannot merge into {uid}: {reason}")]
    Mismatch { uid: String, reason: String },

    #[error("{parent} has no child {uid}")]
    MissingChild { parent: String, uid: String },

    #[error("{parent} already has a child {uid}")]
    DuplicateChild { parent: String, uid: String },
}

/// Strict and non-strict tree merge.
///
/// Strict mode requires every child of the incoming tree to already exist
/// in the target. Both modes validate the whole tree before mutating it.
pub struct MergeEngine;

impl MergeEngine {
    pub fn merge(
        target: &mut ReportNode,
        other: ReportNode,
        strict: bool,
    ) -> Result<(), MergeError> {
        Self::check(target, &other, strict)?;
        debug!("Merging {} into {} (strict: {})", other.uid, target.uid, strict);
        Self::apply(target, other);
        target.propagate_tags();
        Ok(())
    }

    fn check(target: &ReportNode, other: &ReportNode, strict: bool) -> Result<(), MergeError> {
        if target.definition_name != other.definition_name {
            return Err(MergeError::Mismatch {
                uid: target.uid.clone(),
                reason: format!(
                    "definition name {} differs from {}",
                    target.definition_name, other.definition_name
                ),
            });
        }
        if target.is_leaf() != other.is_leaf() {
            return Err(MergeError::Mismatch {
                uid: target.uid.clone(),
                reason: format!("{} and {} differ in kind", target.category, other.category),
            });
        }
        for child in other.entries() {
            match target.child(&child.uid) {
                Some(existing) => Self::check(existing, child, strict)?,
                None if strict => {
                    return Err(MergeError::MissingChild {
                        parent: target.uid.clone(),
                        uid: child.uid.clone(),
                    })
                }
                None => {}
            }
        }
        Ok(())
    }

    fn apply(target: &mut ReportNode, other: ReportNode) {
        if target.is_leaf() {
            Self::apply_leaf(target, other);
        } else {
            Self::apply_group(target, other);
        }
    }

    fn apply_leaf(target: &mut ReportNode, other: ReportNode) {
        if target.is_synthesized() && target.status().precedes(&other.status()) {
            return;
        }
        let status_override = Status::precedent_opt(target.status_override, other.status_override);
        let position = target.position.or(other.position);

        target.name = other.name;
        target.description = other.description;
        target.assertions = other.assertions;
        target.logs = other.logs;
        target.timer = other.timer;
        target.tags = other.tags;
        target.host = other.host;
        target.base_status = other.base_status;
        target.runtime_status = other.runtime_status;
        target.status_override = status_override;
        target.position = position;
    }

    fn apply_group(target: &mut ReportNode, mut other: ReportNode) {
        for child in other.take_entries() {
            match target.index.get(&child.uid).copied() {
                Some(i) => Self::apply(&mut target.entries[i], child),
                None => target.insert_ordered(child),
            }
        }

        let seen: HashSet<_> = target.logs.iter().map(|log| log.id).collect();
        let fresh: Vec<_> = other
            .logs
            .into_iter()
            .filter(|log| !seen.contains(&log.id))
            .collect();
        target.logs.extend(fresh);
        target.logs.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));

        target.timer.merge(&other.timer);
        target.tags.merge(&other.tags);
        target.status_override = Status::precedent_opt(target.status_override, other.status_override);
        target.runtime_status = target.runtime_status.min(other.runtime_status);
        if target.entries.is_empty() {
            target.base_status = target.base_status.combine(other.base_status);
        }
        if target.position.is_none() {
            target.position = other.position;
        }
    }
}

impl ReportNode {
    /// Merge `other` into `self`, see [`MergeEngine`]
    pub fn merge(&mut self, other: ReportNode, strict: bool) -> Result<(), MergeError> {
        MergeEngine::merge(self, other, strict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Category, Part, Position, Severity, Tags};
    use pretty_assertions::assert_eq;

    fn case(name: &str, status: Status, ordinal: u64) -> ReportNode {
        let mut node = ReportNode::named(name, Category::Case).with_position(Position::body(ordinal));
        node.set_status(status);
        node
    }

    fn suite_with(cases: &[(&str, Status, u64)]) -> ReportNode {
        let mut suite = ReportNode::named("Suite", Category::Suite).with_position(Position::body(0));
        for (name, status, ordinal) in cases {
            suite.append(case(name, *status, *ordinal)).unwrap();
        }
        suite
    }

    fn test_with(suite: ReportNode) -> ReportNode {
        let mut test = ReportNode::named("Test", Category::Test);
        test.append(suite).unwrap();
        test
    }

    fn uids(node: &ReportNode) -> Vec<String> {
        node.flatten().into_iter().map(|(_, n)| n.uid.clone()).collect()
    }

    #[test]
    fn test_merge_with_itself_is_identity() {
        let mut tree = test_with(suite_with(&[
            ("a", Status::Passed, 0),
            ("b", Status::Failed, 1),
        ]));
        tree.log(Severity::Info, "hello");
        let original = tree.clone();
        tree.merge(original.clone(), true).unwrap();
        assert_eq!(uids(&tree), uids(&original));
        assert_eq!(tree.status(), original.status());
        assert_eq!(tree.hash(), original.hash());
        assert_eq!(tree.logs.len(), 1);
    }

    #[test]
    fn test_strict_merge_rejects_missing_child_without_mutating() {
        let mut target = test_with(suite_with(&[("a", Status::Passed, 0)]));
        let other = test_with(suite_with(&[
            ("a", Status::Failed, 0),
            ("b", Status::Passed, 1),
        ]));
        let before = target.hash();
        let err = target.merge(other, true).unwrap_err();
        assert_eq!(
            err,
            MergeError::MissingChild {
                parent: "Suite".into(),
                uid: "b".into()
            }
        );
        assert_eq!(target.hash(), before);
    }

    #[test]
    fn test_non_strict_merge_inserts_in_declaration_order() {
        let mut target = test_with(suite_with(&[("c2", Status::Passed, 2)]));
        let other = test_with(suite_with(&[
            ("c0", Status::Passed, 0),
            ("c3", Status::Failed, 3),
        ]));
        target.merge(other, false).unwrap();
        let suite = target.child("Suite").unwrap();
        let order: Vec<&str> = suite.entries().iter().map(|e| e.uid.as_str()).collect();
        assert_eq!(order, vec!["c0", "c2", "c3"]);
        assert_eq!(target.status(), Status::Failed);
    }

    #[test]
    fn test_mismatched_definition_rejected() {
        let mut target = ReportNode::named("A", Category::Test);
        let other = ReportNode::named("B", Category::Test);
        assert!(matches!(
            target.merge(other, false),
            Err(MergeError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_synthesized_leaf_keeps_worse_status() {
        let mut failing = ReportNode::named("setup", Category::SynthesizedCase);
        failing.fail_with_error("boom");
        let mut passing = ReportNode::named("setup", Category::SynthesizedCase);
        passing.set_status(Status::Passed);

        let mut target = failing.clone();
        target.merge(passing.clone(), true).unwrap();
        assert_eq!(target.status(), Status::Error);
        assert_eq!(target.logs.len(), 1);

        let mut target = passing;
        target.merge(failing, true).unwrap();
        assert_eq!(target.status(), Status::Error);
    }

    #[test]
    fn test_group_override_takes_precedent() {
        let mut target = ReportNode::named("Test", Category::Test);
        target.status_override = Some(Status::Passed);
        let mut other = ReportNode::named("Test", Category::Test);
        other.status_override = Some(Status::Error);
        target.merge(other, false).unwrap();
        assert_eq!(target.status_override, Some(Status::Error));
    }

    #[test]
    fn test_tags_recomputed_after_merge() {
        let mut target = test_with(suite_with(&[("a", Status::Passed, 0)]));
        let other = test_with(suite_with(&[]).with_tags(Tags::simple(["slow"])));
        target.merge(other, false).unwrap();
        assert!(target.tags_index().contains("simple", "slow"));
    }

    #[test]
    fn test_part_merge_is_arrival_independent() {
        let parts: Vec<ReportNode> = (0..3u32)
            .map(|m| {
                let part = Part::new(m, 3).unwrap();
                let cases: Vec<(String, u64)> = (0..10u64)
                    .filter(|i| part.owns(*i as usize))
                    .map(|i| (format!("case {i}"), i))
                    .collect();
                let mut suite = ReportNode::named("Suite", Category::Suite)
                    .with_position(Position::body(0));
                suite
                    .append(
                        ReportNode::named("setup", Category::SynthesizedCase)
                            .with_position(Position::lead(0)),
                    )
                    .unwrap();
                for (name, ordinal) in cases {
                    suite.append(case(&name, Status::Passed, ordinal)).unwrap();
                }
                let mut test = test_with(suite);
                test.annotate_part(part);
                test
            })
            .collect();

        let orders = [[0, 1, 2], [2, 1, 0], [1, 2, 0], [2, 0, 1]];
        let merged: Vec<ReportNode> = orders
            .iter()
            .map(|order| {
                let mut acc = parts[order[0]].clone();
                for &i in &order[1..] {
                    acc.merge(parts[i].clone(), false).unwrap();
                }
                acc
            })
            .collect();

        for tree in &merged[1..] {
            assert_eq!(uids(tree), uids(&merged[0]));
            assert_eq!(tree.hash(), merged[0].hash());
            assert_eq!(tree.status(), Status::Passed);
        }
        let suite = merged[0].child("Suite").unwrap();
        assert_eq!(suite.entries().len(), 13);
        assert_eq!(suite.entries()[0].uid, "setup - part(0/3)");
        assert_eq!(suite.entries()[3].uid, "case 0");
        assert_eq!(suite.entries()[12].uid, "case 9");
    }
}
