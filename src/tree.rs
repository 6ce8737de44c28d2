//! Input data model: posterior trees as delivered by the parsing layer.
//!
//! Nodes are deliberately n-ary even though the model only supports binary
//! trees: rejecting unary/multifurcating nodes is the model builder's job,
//! so the input type must be able to represent them.
//!
//! Heights are in time units, measured as time since the most recent tip
//! (leaves of an ultrametric tree sit at height 0, the root at the tree
//! height).

use serde::{Deserialize, Serialize};

/// One node of a posterior tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputNode {
    /// Tip label; `None` for internal nodes.
    pub label: Option<String>,
    /// Time since the most recent tip.
    pub height: f64,
    pub children: Vec<InputNode>,
}

impl InputNode {
    pub fn leaf(label: impl Into<String>, height: f64) -> Self {
        InputNode { label: Some(label.into()), height, children: Vec::new() }
    }

    pub fn internal(height: f64, children: Vec<InputNode>) -> Self {
        InputNode { label: None, height, children }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A rooted posterior tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputTree {
    pub root: InputNode,
}

impl InputTree {
    /// The tree height, i.e. the root's time since the most recent tip.
    pub fn tree_height(&self) -> f64 {
        self.root.height
    }

    /// All tip labels in post-order. Unlabeled leaves are skipped.
    pub fn leaf_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        collect_leaf_labels(&self.root, &mut labels);
        labels
    }
}

fn collect_leaf_labels(node: &InputNode, out: &mut Vec<String>) {
    if node.is_leaf() {
        if let Some(label) = &node.label {
            out.push(label.clone());
        }
        return;
    }
    for child in &node.children {
        collect_leaf_labels(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_labels_in_post_order() {
        let tree = InputTree {
            root: InputNode::internal(
                2.0,
                vec![
                    InputNode::internal(
                        1.0,
                        vec![InputNode::leaf("A", 0.0), InputNode::leaf("B", 0.0)],
                    ),
                    InputNode::leaf("C", 0.0),
                ],
            ),
        };

        assert_eq!(tree.leaf_labels(), vec!["A", "B", "C"]);
        assert_eq!(tree.tree_height(), 2.0);
    }
}
