//! Output data model: the point-estimate tree and its per-node reports.
//!
//! Unlike the input side, the estimate is strictly binary, so internal nodes
//! carry exactly two boxed children. Every node has a stable node number
//! assigned in post-order; the numbers are what callers use to refer to
//! nodes when conditioning or requesting details.

use serde::{Deserialize, Serialize};

use crate::histogram::HeightSummary;

/// One node of the point-estimate tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DrawNode {
    Leaf {
        nr: usize,
        height: f64,
        label: String,
    },
    #[serde(rename_all = "camelCase")]
    Internal {
        nr: usize,
        height: f64,
        left: Box<DrawNode>,
        right: Box<DrawNode>,
        /// Weighted summary of the node's sampled heights, filled in after
        /// resampling.
        height_distribution: Option<HeightSummary>,
    },
}

impl DrawNode {
    pub fn nr(&self) -> usize {
        match self {
            DrawNode::Leaf { nr, .. } | DrawNode::Internal { nr, .. } => *nr,
        }
    }

    pub fn height(&self) -> f64 {
        match self {
            DrawNode::Leaf { height, .. } | DrawNode::Internal { height, .. } => *height,
        }
    }

    pub fn set_height(&mut self, value: f64) {
        match self {
            DrawNode::Leaf { height, .. } | DrawNode::Internal { height, .. } => *height = value,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, DrawNode::Leaf { .. })
    }

    pub fn num_leaves(&self) -> usize {
        match self {
            DrawNode::Leaf { .. } => 1,
            DrawNode::Internal { left, right, .. } => left.num_leaves() + right.num_leaves(),
        }
    }
}

/// The point-estimate tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawTree {
    pub root: DrawNode,
}

impl DrawTree {
    pub fn tree_height(&self) -> f64 {
        self.root.height()
    }

    /// Serializes the tree as a rooted Newick string with branch lengths.
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        write_newick(&self.root, self.root.height(), &mut out);
        out.push(';');
        out
    }
}

fn write_newick(node: &DrawNode, parent_height: f64, out: &mut String) {
    match node {
        DrawNode::Leaf { height, label, .. } => {
            out.push_str(label);
            out.push(':');
            out.push_str(&format_branch(parent_height - height));
        }
        DrawNode::Internal { height, left, right, .. } => {
            out.push('(');
            write_newick(left, *height, out);
            out.push(',');
            write_newick(right, *height, out);
            out.push_str("):");
            out.push_str(&format_branch(parent_height - height));
        }
    }
}

fn format_branch(length: f64) -> String {
    // trim trailing zeros but keep at least one decimal
    let mut s = format!("{length:.8}");
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.push('0');
    }
    s
}

/// How a split compares to the alternatives at the same node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitSummary {
    pub split_fingerprint: u64,
    /// Sorted tip labels of the first child clade.
    pub left_labels: Vec<String>,
    /// Sorted tip labels of the second child clade.
    pub right_labels: Vec<String>,
    pub log_density: f64,
}

/// Why the chosen split of a node is the chosen one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SplitChoiceReason {
    /// Highest subtree density among the clade's observed splits.
    BestSplit,
    /// Pinned by an explicit conditioning.
    ConditionedOn,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChosenSplit {
    pub summary: SplitSummary,
    pub reason: SplitChoiceReason,
}

/// Everything reported about one node of the point estimate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    pub node_nr: usize,
    /// `None` for leaves, which have no split to choose.
    pub chosen: Option<ChosenSplit>,
    pub height_distribution: Option<HeightSummary>,
    /// Competing splits of the node's clade, best first, chosen one
    /// excluded, at most 4.
    pub alternatives: Vec<SplitSummary>,
}

/// An active split conditioning, keyed by the clade it pins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionedSplit {
    pub clade_fingerprint: u64,
    /// Node number of the clade in the current point estimate.
    pub node_nr: usize,
    pub split_fingerprint: u64,
}

/// An active height conditioning, keyed by the clade it pins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionedHeight {
    pub clade_fingerprint: u64,
    /// Node number of the clade in the current point estimate.
    pub node_nr: usize,
    pub height: f64,
}
