//! Non-layered Reingold-Tilford layout for the point-estimate tree.
//!
//! Coordinates are normalized to `[0, 1]`: x runs from the root (0) to the
//! most recent tips (1), proportional to node height; y spreads the leaves
//! apart without overlap and centers every parent between its children.
//! Because nodes sit at arbitrary heights rather than discrete layers, the
//! subtree contours are walked by height: at each step the pointer at the
//! strictly greater height advances, and equal heights advance both.

use std::collections::HashMap;

use crate::draw::{DrawNode, DrawTree};

const SIBLING_DISTANCE: f64 = 1.0;

/// One point on a subtree's left or right contour.
struct ContourPoint {
    height: f64,
    y: f64,
}

/// Computes drawing coordinates for a tree, keyed by node number.
pub struct TreeLayout<'a> {
    tree: &'a DrawTree,
    tree_height: f64,
}

impl<'a> TreeLayout<'a> {
    pub fn new(tree: &'a DrawTree) -> Self {
        TreeLayout { tree, tree_height: tree.tree_height() }
    }

    /// X per node: `(tree_height - node_height) / tree_height`.
    pub fn x_coordinates(&self) -> HashMap<usize, f64> {
        let mut coordinates = HashMap::new();
        self.collect_x(&self.tree.root, &mut coordinates);
        coordinates
    }

    fn collect_x(&self, node: &DrawNode, out: &mut HashMap<usize, f64>) {
        let x = if self.tree_height > 0.0 {
            (self.tree_height - node.height()) / self.tree_height
        } else {
            0.0
        };
        out.insert(node.nr(), x);

        if let DrawNode::Internal { left, right, .. } = node {
            self.collect_x(left, out);
            self.collect_x(right, out);
        }
    }

    /// Y per node, normalized to `[0, 1]`.
    pub fn y_coordinates(&self) -> HashMap<usize, f64> {
        let mut walk = YWalk::default();
        walk.first_walk(&self.tree.root);

        let mut coordinates = HashMap::new();
        let mut min_y = 0.0f64;
        walk.second_walk(&self.tree.root, 0.0, &mut coordinates, &mut min_y);

        normalize(&mut coordinates, min_y);
        coordinates
    }
}

#[derive(Default)]
struct YWalk {
    preliminary: HashMap<usize, f64>,
    modifiers: HashMap<usize, f64>,
}

impl YWalk {
    /// Post-order: assign preliminary positions and push overlapping right
    /// subtrees away via modifiers.
    fn first_walk(&mut self, node: &DrawNode) {
        self.modifiers.insert(node.nr(), 0.0);

        let DrawNode::Internal { left, right, .. } = node else {
            // leaves all start at 0; spacing comes from the conflict shifts
            self.preliminary.insert(node.nr(), 0.0);
            return;
        };

        self.first_walk(left);
        self.first_walk(right);

        let shift = self.check_conflicts(left, right);
        if shift > 0.0 {
            *self.modifiers.entry(right.nr()).or_insert(0.0) += shift;
        }

        let center = (self.placed_y(left) + self.placed_y(right)) / 2.0;
        self.preliminary.insert(node.nr(), center);
    }

    fn placed_y(&self, node: &DrawNode) -> f64 {
        self.preliminary.get(&node.nr()).copied().unwrap_or(0.0)
            + self.modifiers.get(&node.nr()).copied().unwrap_or(0.0)
    }

    /// Walks the facing contours of the two subtrees and returns the shift
    /// needed to keep them at least `SIBLING_DISTANCE` apart.
    fn check_conflicts(&self, left: &DrawNode, right: &DrawNode) -> f64 {
        let left_contour =
            self.contour(left, self.modifiers.get(&left.nr()).copied().unwrap_or(0.0), Side::Right);
        let right_contour =
            self.contour(right, self.modifiers.get(&right.nr()).copied().unwrap_or(0.0), Side::Left);

        let mut max_shift = 0.0f64;
        let mut li = 0;
        let mut ri = 0;

        while li < left_contour.len() || ri < right_contour.len() {
            let lp = &left_contour[li.min(left_contour.len() - 1)];
            let rp = &right_contour[ri.min(right_contour.len() - 1)];

            let gap = rp.y - lp.y;
            max_shift = max_shift.max(SIBLING_DISTANCE - gap);

            let l_last = li == left_contour.len() - 1;
            let r_last = ri == right_contour.len() - 1;
            if l_last && r_last {
                break;
            } else if l_last {
                ri += 1;
            } else if r_last {
                li += 1;
            } else if lp.height > rp.height {
                li += 1;
            } else if rp.height > lp.height {
                ri += 1;
            } else {
                li += 1;
                ri += 1;
            }
        }

        max_shift.max(0.0)
    }

    /// The spine of a subtree on one side, with modifier sums applied.
    fn contour(&self, node: &DrawNode, mod_sum: f64, side: Side) -> Vec<ContourPoint> {
        let mut points = Vec::new();
        self.collect_contour(node, mod_sum, side, &mut points);
        points
    }

    fn collect_contour(&self, node: &DrawNode, mod_sum: f64, side: Side, out: &mut Vec<ContourPoint>) {
        let y = self.preliminary.get(&node.nr()).copied().unwrap_or(0.0) + mod_sum;
        out.push(ContourPoint { height: node.height(), y });

        if let DrawNode::Internal { left, right, .. } = node {
            let next = match side {
                Side::Left => left,
                Side::Right => right,
            };
            let next_mod = self.modifiers.get(&next.nr()).copied().unwrap_or(0.0);
            self.collect_contour(next, mod_sum + next_mod, side, out);
        }
    }

    /// Pre-order: apply accumulated modifiers to get the final positions.
    fn second_walk(
        &self,
        node: &DrawNode,
        mod_sum: f64,
        out: &mut HashMap<usize, f64>,
        min_y: &mut f64,
    ) {
        let modifier = self.modifiers.get(&node.nr()).copied().unwrap_or(0.0);
        let y = self.preliminary.get(&node.nr()).copied().unwrap_or(0.0) + modifier + mod_sum;
        out.insert(node.nr(), y);
        *min_y = min_y.min(y);

        if let DrawNode::Internal { left, right, .. } = node {
            self.second_walk(left, mod_sum + modifier, out, min_y);
            self.second_walk(right, mod_sum + modifier, out, min_y);
        }
    }
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

fn normalize(coordinates: &mut HashMap<usize, f64>, min_y: f64) {
    if min_y < 0.0 {
        for y in coordinates.values_mut() {
            *y -= min_y;
        }
    }

    let max_y = coordinates.values().fold(0.0f64, |acc, &y| acc.max(y));
    if max_y > 0.0 {
        for y in coordinates.values_mut() {
            *y /= max_y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn leaf(nr: usize, height: f64, label: &str) -> DrawNode {
        DrawNode::Leaf { nr, height, label: label.to_string() }
    }

    fn internal(nr: usize, height: f64, left: DrawNode, right: DrawNode) -> DrawNode {
        DrawNode::Internal {
            nr,
            height,
            left: Box::new(left),
            right: Box::new(right),
            height_distribution: None,
        }
    }

    /// Seven leaves at mixed depths; one leaf (A) sits above height 0.
    fn mixed_depth_tree() -> DrawTree {
        DrawTree {
            root: internal(
                0,
                3.0,
                internal(
                    1,
                    2.0,
                    leaf(2, 1.0, "A"),
                    internal(3, 1.0, leaf(4, 0.0, "B"), leaf(5, 0.0, "C")),
                ),
                internal(
                    6,
                    2.0,
                    internal(7, 1.0, leaf(8, 0.0, "D"), leaf(9, 0.0, "E")),
                    internal(10, 1.0, leaf(11, 0.0, "F"), leaf(12, 0.0, "G")),
                ),
            ),
        }
    }

    #[test]
    fn x_runs_from_root_to_tips() {
        let tree = mixed_depth_tree();
        let xs = TreeLayout::new(&tree).x_coordinates();

        assert_eq!(xs.len(), 13);
        for &x in xs.values() {
            assert!((0.0..=1.0).contains(&x));
        }
        assert_eq!(xs[&0], 0.0);
        assert_eq!(xs[&4], 1.0);
        assert_eq!(xs[&5], 1.0);
        // leaf A at height 1 of 3
        assert_abs_diff_eq!(xs[&2], 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn y_is_normalized_and_complete() {
        let tree = mixed_depth_tree();
        let ys = TreeLayout::new(&tree).y_coordinates();

        assert_eq!(ys.len(), 13);
        for &y in ys.values() {
            assert!((0.0..=1.0).contains(&y));
        }
    }

    #[test]
    fn leaves_do_not_overlap() {
        let tree = mixed_depth_tree();
        let ys = TreeLayout::new(&tree).y_coordinates();

        let mut leaf_ys: Vec<f64> = [2, 4, 5, 8, 9, 11, 12].iter().map(|nr| ys[nr]).collect();
        leaf_ys.sort_by(f64::total_cmp);
        for pair in leaf_ys.windows(2) {
            assert!(pair[1] > pair[0], "leaves at {} and {} overlap", pair[0], pair[1]);
        }
    }

    #[test]
    fn parents_sit_between_their_children() {
        let tree = mixed_depth_tree();
        let ys = TreeLayout::new(&tree).y_coordinates();

        for (parent, left, right) in [(3, 4, 5), (7, 8, 9), (10, 11, 12)] {
            let low = ys[&left].min(ys[&right]);
            let high = ys[&left].max(ys[&right]);
            assert!(ys[&parent] >= low && ys[&parent] <= high);
        }
    }

    #[test]
    fn single_leaf_sits_at_origin() {
        let tree = DrawTree { root: leaf(0, 0.0, "A") };
        let layout = TreeLayout::new(&tree);

        assert_eq!(layout.x_coordinates()[&0], 0.0);
        assert_eq!(layout.y_coordinates()[&0], 0.0);
    }

    #[test]
    fn two_leaf_tree_centers_the_root() {
        let tree = DrawTree { root: internal(0, 1.0, leaf(1, 0.0, "A"), leaf(2, 0.0, "B")) };
        let ys = TreeLayout::new(&tree).y_coordinates();

        assert_ne!(ys[&1], ys[&2]);
        assert_abs_diff_eq!(ys[&0], (ys[&1] + ys[&2]) / 2.0, epsilon = 1e-9);
    }
}
