//! Part coordination
//!
//! Tracks which parts of each logical test were scheduled, merges the
//! fragments that come back and finalises one report per logical test.

use indexmap::IndexMap;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::error::{RunnerError, RunnerResult};
use crate::models::{TaskResult, TaskStatus};
use crate::report::{Category, Part, ReportNode, Severity, Status};

/// Bookkeeping of one logical test
#[derive(Clone, Debug, Default)]
struct LogicalTest {
    /// `None` for an unsplit test
    total: Option<u32>,
    scheduled: usize,
    parts: Vec<u32>,
    merged: Option<ReportNode>,
    /// Done part reports, kept apart for inspection
    fragments: BTreeMap<u32, ReportNode>,
    failures: Vec<String>,
    conflict: Option<String>,
    reruns: Vec<ReportNode>,
}

impl LogicalTest {
    fn is_split(&self) -> bool {
        self.total.is_some()
    }
}

/// Reassembles part fragments into one report per logical test
#[derive(Clone, Debug)]
pub struct PartCoordinator {
    tests: IndexMap<String, LogicalTest>,
    merge_parts: bool,
}

impl Default for PartCoordinator {
    fn default() -> Self {
        Self {
            tests: IndexMap::new(),
            merge_parts: true,
        }
    }
}

impl PartCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every part as its own entry instead of merging
    pub fn with_part_merging(mut self, enabled: bool) -> Self {
        self.merge_parts = enabled;
        self
    }

    /// Record that `name` (or one part of it) was scheduled
    pub fn register(&mut self, name: &str, part: Option<Part>) -> RunnerResult<()> {
        let test = self.tests.entry(name.to_string()).or_default();
        let conflict = match part {
            None if test.scheduled > 0 => Some(if test.is_split() {
                "scheduled both whole and split".to_string()
            } else {
                "scheduled twice".to_string()
            }),
            None => None,
            Some(part) => match test.total {
                _ if test.scheduled > 0 && !test.is_split() => {
                    Some("scheduled both whole and split".to_string())
                }
                Some(total) if total != part.total => Some(format!(
                    "{part} does not match earlier parts of {total}"
                )),
                _ if test.parts.contains(&part.index) => Some(format!("{part} scheduled twice")),
                _ => None,
            },
        };

        if let Some(reason) = conflict {
            error!("Scheduling conflict for {}: {}", name, reason);
            test.conflict.get_or_insert_with(|| reason.clone());
            return Err(RunnerError::SchedulingConflict {
                test: name.to_string(),
                reason,
            });
        }

        test.scheduled += 1;
        if let Some(part) = part {
            test.total = Some(part.total);
            test.parts.push(part.index);
        }
        debug!("Registered {} {:?}", name, part);
        Ok(())
    }

    /// Undo a [`register`](Self::register) whose task never got queued
    pub fn unregister(&mut self, name: &str, part: Option<Part>) {
        let Some(test) = self.tests.get_mut(name) else {
            return;
        };
        test.scheduled = test.scheduled.saturating_sub(1);
        if let Some(part) = part {
            if let Some(pos) = test.parts.iter().position(|i| *i == part.index) {
                test.parts.remove(pos);
            }
            if test.parts.is_empty() {
                test.total = None;
            }
        }
        if test.scheduled == 0 && test.conflict.is_none() {
            self.tests.shift_remove(name);
        }
        debug!("Unregistered {} {:?}", name, part);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tests.contains_key(name)
    }

    /// Take in a terminal task result
    pub fn accept(&mut self, result: TaskResult) {
        let name = result.task.test_name().to_string();
        let test = self.tests.entry(name.clone()).or_default();

        for (i, previous) in result.previous_attempts.iter().enumerate() {
            test.reruns.push(rerun_node(previous, i + 1));
        }

        if result.status != TaskStatus::Done {
            let reason = result
                .reason
                .clone()
                .unwrap_or_else(|| result.status.to_string());
            let failure = match result.task.part {
                Some(part) => format!("{part} ended {}: {reason}", result.status),
                None => format!("ended {}: {reason}", result.status),
            };
            warn!("{} {}", name, failure);
            test.failures.push(failure);
            if !test.is_split() {
                test.merged = Some(result.report);
            }
            return;
        }

        let Some(part) = result.task.part else {
            test.merged = Some(result.report);
            return;
        };

        test.fragments.insert(part.index, result.report.clone());
        match test.merged.as_mut() {
            None => {
                let mut root = result.report;
                root.uid = name.clone();
                root.name = name.clone();
                root.part = None;
                test.merged = Some(root);
            }
            Some(root) => {
                if let Err(e) = root.merge(result.report, false) {
                    let err = RunnerError::MergeInconsistent {
                        test: name.clone(),
                        reason: e.to_string(),
                    };
                    warn!("{}", err);
                    test.failures.push(err.to_string());
                }
            }
        }
        info!("Merged {} of {}", part, name);
    }

    /// Final reports in registration order, rerun history after each test
    pub fn reports(&self) -> Vec<ReportNode> {
        let mut out = Vec::new();
        for (name, test) in &self.tests {
            if self.merge_parts || !test.is_split() || test.conflict.is_some() {
                out.extend(finalise(name, test));
            } else {
                out.extend(unmerged(name, test));
            }
            out.extend(test.reruns.iter().cloned());
        }
        out
    }
}

fn finalise(name: &str, test: &LogicalTest) -> Vec<ReportNode> {
    if let Some(conflict) = &test.conflict {
        let err = RunnerError::SchedulingConflict {
            test: name.to_string(),
            reason: conflict.clone(),
        };
        return vec![ReportNode::error_placeholder(name, name, err.to_string()).with_definition_name(name)];
    }

    if !test.is_split() {
        return match &test.merged {
            Some(report) => vec![report.clone()],
            None => vec![missing(name)],
        };
    }

    if !test.failures.is_empty() {
        let mut placeholder = ReportNode::error_placeholder(
            name,
            name,
            format!("{} of {} parts failed", test.failures.len(), test.parts.len()),
        )
        .with_definition_name(name);
        for failure in &test.failures {
            placeholder.log(Severity::Error, failure.clone());
        }
        let mut nodes = vec![placeholder];
        nodes.extend(test.fragments.values().cloned());
        return nodes;
    }

    match &test.merged {
        Some(merged) => {
            let total = test.total.unwrap_or_default() as usize;
            if test.fragments.len() < total {
                let absent: Vec<u32> = (0..total as u32)
                    .filter(|i| !test.fragments.contains_key(i))
                    .collect();
                warn!(
                    "{} is missing parts {:?} of {}, merging what arrived",
                    name, absent, total
                );
                let mut merged = merged.clone();
                merged.log(
                    Severity::Warning,
                    format!("Missing parts {absent:?} of {total}"),
                );
                vec![merged]
            } else {
                vec![merged.clone()]
            }
        }
        None => vec![missing(name)],
    }
}

/// Fragments in part order, failed parts summed up in one placeholder
fn unmerged(name: &str, test: &LogicalTest) -> Vec<ReportNode> {
    let mut nodes: Vec<ReportNode> = test.fragments.values().cloned().collect();
    if !test.failures.is_empty() {
        nodes.push(
            ReportNode::error_placeholder(name, name, test.failures.join("; "))
                .with_definition_name(name),
        );
    }
    nodes
}

fn missing(name: &str) -> ReportNode {
    ReportNode::error_placeholder(name, name, "no result arrived").with_definition_name(name)
}

/// Superseded attempt, shown without failing the plan
fn rerun_node(previous: &ReportNode, run: usize) -> ReportNode {
    let mut node = previous.clone();
    node.uid = format!("{} => Run {}", previous.uid, run);
    node.name = format!("{} => Run {}", previous.name, run);
    node.category = Category::TaskRerun;
    node.status_override = Some(Status::Xfail);
    node
}
