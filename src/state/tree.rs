use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One node of the category hierarchy
///
/// JSON objects become branches; any other JSON value is kept as an opaque
/// leaf so trees written by older tools survive a load/save cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Branch(BTreeMap<String, TreeNode>),
    Leaf(serde_json::Value),
}

impl TreeNode {
    fn empty_branch() -> Self {
        TreeNode::Branch(BTreeMap::new())
    }

    fn count(&self) -> usize {
        match self {
            TreeNode::Branch(children) => 1 + children.values().map(TreeNode::count).sum::<usize>(),
            TreeNode::Leaf(_) => 1,
        }
    }
}

/// Hierarchy of breadcrumb labels discovered during the crawl
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryTree {
    roots: BTreeMap<String, TreeNode>,
}

impl CategoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a breadcrumb path, creating missing branches
    ///
    /// A leaf found along the path is replaced by a branch.
    pub fn insert_path(&mut self, labels: &[String]) {
        insert_level(&mut self.roots, labels);
    }

    /// Merges `other` into `self`
    ///
    /// Keys missing from `self` are copied over, branches present on both
    /// sides are merged recursively, and on any other conflict `other` wins.
    pub fn merge_from(&mut self, other: CategoryTree) {
        merge_level(&mut self.roots, other.roots);
    }

    /// Returns true if the breadcrumb path exists as a chain of nodes
    pub fn contains_path(&self, labels: &[String]) -> bool {
        let mut level = &self.roots;

        for (i, label) in labels.iter().enumerate() {
            match level.get(label) {
                Some(TreeNode::Branch(children)) => level = children,
                Some(TreeNode::Leaf(_)) => return i + 1 == labels.len(),
                None => return false,
            }
        }

        true
    }

    /// Total number of nodes at every depth
    pub fn node_count(&self) -> usize {
        self.roots.values().map(TreeNode::count).sum()
    }

    /// Labels at the top of the hierarchy, in sorted order
    pub fn top_labels(&self) -> Vec<String> {
        self.roots.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

fn insert_level(level: &mut BTreeMap<String, TreeNode>, labels: &[String]) {
    let Some((label, rest)) = labels.split_first() else {
        return;
    };

    let node = level
        .entry(label.clone())
        .or_insert_with(TreeNode::empty_branch);

    match node {
        TreeNode::Branch(children) => insert_level(children, rest),
        TreeNode::Leaf(_) => {
            let mut children = BTreeMap::new();
            insert_level(&mut children, rest);
            *node = TreeNode::Branch(children);
        }
    }
}

fn merge_level(ours: &mut BTreeMap<String, TreeNode>, theirs: BTreeMap<String, TreeNode>) {
    for (label, their_node) in theirs {
        match (ours.get_mut(&label), their_node) {
            (Some(TreeNode::Branch(our_children)), TreeNode::Branch(their_children)) => {
                merge_level(our_children, their_children);
            }
            (_, their_node) => {
                ours.insert(label, their_node);
            }
        }
    }
}
