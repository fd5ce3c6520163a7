//! Report filtering

use super::node::ReportNode;
use super::tags::Tags;

impl ReportNode {
    /// Pruned deep copy keeping children for which `predicate` holds.
    ///
    /// The root is always kept; a rejected group drops its whole subtree.
    pub fn filter<F>(&self, predicate: F) -> ReportNode
    where
        F: Fn(&ReportNode) -> bool,
    {
        self.filter_inherited(&|node: &ReportNode, _: &Tags| predicate(node))
    }

    /// Keep nodes whose tags, together with those inherited from their
    /// ancestors, match `wanted` (any tag, or all of them when `all`)
    pub fn filter_by_tags(&self, wanted: &Tags, all: bool) -> ReportNode {
        self.filter_inherited(&|node: &ReportNode, inherited: &Tags| {
            let effective = node.tags_index().merged(inherited);
            if all {
                effective.matches_all(wanted)
            } else {
                effective.matches_any(wanted)
            }
        })
    }

    fn filter_inherited(&self, predicate: &dyn Fn(&ReportNode, &Tags) -> bool) -> ReportNode {
        let mut copy = self.shallow_copy();
        prune_into(&mut copy, self, &self.tags, predicate);
        copy.propagate_tags();
        copy
    }

    /// Copy of this node without its children
    fn shallow_copy(&self) -> ReportNode {
        ReportNode {
            uid: self.uid.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            definition_name: self.definition_name.clone(),
            category: self.category,
            assertions: self.assertions.clone(),
            logs: self.logs.clone(),
            status_override: self.status_override,
            tags: self.tags.clone(),
            timer: self.timer.clone(),
            part: self.part,
            position: self.position,
            host: self.host.clone(),
            entries: Vec::new(),
            index: Default::default(),
            base_status: self.base_status,
            runtime_status: self.runtime_status,
            tags_index: self.tags_index.clone(),
        }
    }
}

fn prune_into(
    copy: &mut ReportNode,
    source: &ReportNode,
    inherited: &Tags,
    predicate: &dyn Fn(&ReportNode, &Tags) -> bool,
) {
    for entry in source.entries() {
        if !predicate(entry, inherited) {
            continue;
        }
        let mut child = entry.shallow_copy();
        let child_inherited = inherited.merged(&entry.tags);
        prune_into(&mut child, entry, &child_inherited, predicate);
        copy.entries.push(child);
    }
    copy.reindex();
}

#[cfg(test)]
mod tests {
    use crate::report::{Category, ReportNode, Status, Tags};
    use pretty_assertions::assert_eq;

    fn case(name: &str, status: Status, tags: Tags) -> ReportNode {
        let mut node = ReportNode::named(name, Category::Case).with_tags(tags);
        node.set_status(status);
        node
    }

    fn tree() -> ReportNode {
        let mut fast = ReportNode::named("Fast", Category::Suite);
        fast.append(case("f1", Status::Passed, Tags::new())).unwrap();
        fast.append(case("f2", Status::Failed, Tags::simple(["flaky"])))
            .unwrap();

        let mut slow = ReportNode::named("Slow", Category::Suite).with_tags(Tags::simple(["slow"]));
        slow.append(case("s1", Status::Passed, Tags::new())).unwrap();

        let mut test = ReportNode::named("Test", Category::Test);
        test.append(fast).unwrap();
        test.append(slow).unwrap();
        test
    }

    fn leaf_uids(node: &ReportNode) -> Vec<String> {
        node.flatten()
            .into_iter()
            .filter(|(_, n)| n.is_leaf())
            .map(|(_, n)| n.uid.clone())
            .collect()
    }

    #[test]
    fn test_filter_prunes_copy_only() {
        let original = tree();
        let filtered = original.filter(|node| !node.is_leaf() || node.passed());
        assert_eq!(leaf_uids(&filtered), vec!["f1", "s1"]);
        assert_eq!(filtered.status(), Status::Passed);
        assert_eq!(leaf_uids(&original).len(), 3);
        assert!(original.tags_index().contains("simple", "flaky"));
        assert!(!filtered.tags_index().contains("simple", "flaky"));
    }

    #[test]
    fn test_root_always_kept() {
        let filtered = tree().filter(|_| false);
        assert_eq!(filtered.uid, "Test");
        assert!(filtered.entries().is_empty());
    }

    #[test]
    fn test_filter_by_tags_uses_inherited_tags() {
        let filtered = tree().filter_by_tags(&Tags::simple(["slow"]), false);
        assert_eq!(leaf_uids(&filtered), vec!["s1"]);

        let filtered = tree().filter_by_tags(&Tags::simple(["flaky"]), false);
        assert_eq!(leaf_uids(&filtered), vec!["f2"]);

        let filtered = tree().filter_by_tags(&Tags::simple(["slow", "flaky"]), true);
        assert!(leaf_uids(&filtered).is_empty());
    }
}
