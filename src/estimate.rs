//! Point-estimate construction on top of a fitted [`Bccd`].
//!
//! # Overview
//! The estimator finds, for every clade, the split whose subtree has the
//! highest log density under the model, by dynamic programming over the
//! clade DAG: clades are shared between trees, so each clade and split is
//! evaluated once and memoized by fingerprint ([`DensityCache`]). The point
//! estimate is then assembled top-down from the best (or conditioned)
//! splits, with heights placed at the fitted ratio point estimates and the
//! log-normal tree height point estimate.
//!
//! Height uncertainty is quantified by drawing [`NUM_HEIGHT_SAMPLES`] trees
//! with sampled heights over the fixed point-estimate topology. When heights
//! are pinned by conditioning, each sampled tree is reconciled against the
//! pins (descendants of a pinned node are rescaled by the pin's factor and
//! clamped below their parent) and reweighted by the exponential of the
//! accumulated log scaling factors, so the per-node summaries remain
//! faithful to the model.
//!
//! # Node heights
//! Within the density computation heights are relative, with the root at 1;
//! the built trees carry absolute heights. A split's parent height derives
//! from its ratio: `older + ratio * (root - older)`, where `older` is the
//! higher of the two child heights.

use std::collections::HashMap;

use itertools::Itertools;
use rand::rngs::StdRng;

use crate::clade::CladeSplit;
use crate::distribution::Beta;
use crate::draw::{
    ChosenSplit, ConditionedHeight, ConditionedSplit, DrawNode, DrawTree, NodeDetails,
    SplitChoiceReason, SplitSummary,
};
use crate::error::{BccdError, Result};
use crate::histogram::{summarize, HeightSummary};
use crate::model::Bccd;

/// Number of trees drawn to summarize per-node height uncertainty.
pub const NUM_HEIGHT_SAMPLES: usize = 10_000;

/// Maximum number of competing splits reported per node.
pub const MAX_ALTERNATIVE_SPLITS: usize = 4;

/// Memoized subtree log densities and relative heights, keyed by fingerprint.
///
/// Valid for the lifetime of the model it was collected from; conditioning
/// does not invalidate it because conditioning overrides choices without
/// changing any subtree density.
#[derive(Clone, Debug, Default)]
struct DensityCache {
    best_splits: HashMap<u64, u64>,
    clade_log_densities: HashMap<u64, f64>,
    clade_heights: HashMap<u64, f64>,
    split_log_densities: HashMap<u64, f64>,
    split_heights: HashMap<u64, f64>,
}

impl DensityCache {
    fn collect(bccd: &Bccd) -> Result<Self> {
        let mut cache = DensityCache::default();
        cache.clade_density(bccd, bccd.root_clade.fingerprint)?;
        Ok(cache)
    }

    /// Log density and relative height of the best subtree rooted at a clade.
    fn clade_density(&mut self, bccd: &Bccd, clade_fingerprint: u64) -> Result<(f64, f64)> {
        if let Some(&density) = self.clade_log_densities.get(&clade_fingerprint) {
            return Ok((density, self.clade_heights[&clade_fingerprint]));
        }

        let clade = bccd.clade(clade_fingerprint).ok_or_else(|| {
            BccdError::ModelCorruption(format!("unknown clade {clade_fingerprint:#x}"))
        })?;
        if clade.is_leaf() {
            self.clade_log_densities.insert(clade_fingerprint, 0.0);
            self.clade_heights.insert(clade_fingerprint, 0.0);
            return Ok((0.0, 0.0));
        }

        let split_fingerprints = bccd
            .splits_of(clade_fingerprint)
            .ok_or(BccdError::CladeWithoutSplits(clade_fingerprint))?
            .clone();

        // splits iterate in fingerprint order; on ties the first one wins
        let mut best: Option<(u64, f64, f64)> = None;
        for split_fingerprint in split_fingerprints {
            let (density, height) = self.split_density(bccd, split_fingerprint)?;
            match best {
                Some((_, best_density, _)) if density <= best_density => {}
                _ => best = Some((split_fingerprint, density, height)),
            }
        }
        let (best_fingerprint, density, height) =
            best.ok_or(BccdError::CladeWithoutSplits(clade_fingerprint))?;

        self.best_splits.insert(clade_fingerprint, best_fingerprint);
        self.clade_log_densities.insert(clade_fingerprint, density);
        self.clade_heights.insert(clade_fingerprint, height);
        Ok((density, height))
    }

    /// Log density of the subtree below a split, including the split itself.
    ///
    /// The split contributes its conditional clade probability plus, for
    /// non-root splits, the fitted ratio density at its point estimate with
    /// the change-of-variable term `-ln(1 - older)`.
    fn split_density(&mut self, bccd: &Bccd, split_fingerprint: u64) -> Result<(f64, f64)> {
        if let Some(&density) = self.split_log_densities.get(&split_fingerprint) {
            return Ok((density, self.split_heights[&split_fingerprint]));
        }

        let split = *bccd.split(split_fingerprint).ok_or_else(|| {
            BccdError::ModelCorruption(format!("unknown split {split_fingerprint:#x}"))
        })?;
        let (density1, height1) = self.clade_density(bccd, split.clade1.fingerprint)?;
        let (density2, height2) = self.clade_density(bccd, split.clade2.fingerprint)?;

        let ccp = (bccd.num_split_occurrences(split_fingerprint) as f64).ln()
            - (bccd.num_clade_occurrences(split.parent.fingerprint) as f64).ln();

        let (embedding, height) = if split.parent.is_root() {
            (0.0, 1.0)
        } else {
            let beta = bccd.ratio_distribution(split_fingerprint)?;
            let ratio = beta.point_estimate();
            let older = height1.max(height2);
            (beta.log_density(ratio) - (1.0 - older).ln(), older + ratio * (1.0 - older))
        };

        let density = density1 + density2 + ccp + embedding;
        self.split_log_densities.insert(split_fingerprint, density);
        self.split_heights.insert(split_fingerprint, height);
        Ok((density, height))
    }
}

/// Builds one tree over the chosen splits, assigning post-order node numbers.
struct TreeBuilder<'a> {
    bccd: &'a Bccd,
    cache: &'a DensityCache,
    conditioned_splits: &'a HashMap<u64, u64>,
    counter: usize,
    node_to_clade: HashMap<usize, u64>,
}

impl<'a> TreeBuilder<'a> {
    fn new(
        bccd: &'a Bccd,
        cache: &'a DensityCache,
        conditioned_splits: &'a HashMap<u64, u64>,
    ) -> Self {
        TreeBuilder { bccd, cache, conditioned_splits, counter: 0, node_to_clade: HashMap::new() }
    }

    fn chosen_split(&self, clade_fingerprint: u64) -> Result<u64> {
        if let Some(&fingerprint) = self.conditioned_splits.get(&clade_fingerprint) {
            return Ok(fingerprint);
        }
        self.cache
            .best_splits
            .get(&clade_fingerprint)
            .copied()
            .ok_or(BccdError::CladeWithoutSplits(clade_fingerprint))
    }

    fn next_nr(&mut self, clade_fingerprint: u64) -> usize {
        let nr = self.counter;
        self.counter += 1;
        self.node_to_clade.insert(nr, clade_fingerprint);
        nr
    }

    /// Builds the subtree of a clade bottom-up. `draw_ratio` supplies either
    /// the ratio point estimate or a sampled ratio.
    fn build(
        &mut self,
        clade_fingerprint: u64,
        tree_height: f64,
        draw_ratio: &mut dyn FnMut(&Beta) -> Result<f64>,
    ) -> Result<DrawNode> {
        let clade = *self.bccd.clade(clade_fingerprint).ok_or_else(|| {
            BccdError::ModelCorruption(format!("unknown clade {clade_fingerprint:#x}"))
        })?;

        if clade.is_leaf() {
            let label = self.bccd.leaf_label(clade_fingerprint).unwrap_or_default().to_string();
            let nr = self.next_nr(clade_fingerprint);
            return Ok(DrawNode::Leaf { nr, height: 0.0, label });
        }

        let split_fingerprint = self.chosen_split(clade_fingerprint)?;
        let split: CladeSplit = *self.bccd.split(split_fingerprint).ok_or_else(|| {
            BccdError::ModelCorruption(format!("unknown split {split_fingerprint:#x}"))
        })?;

        let left = self.build(split.clade1.fingerprint, tree_height, draw_ratio)?;
        let right = self.build(split.clade2.fingerprint, tree_height, draw_ratio)?;

        let height = if clade.is_root() {
            tree_height
        } else {
            let beta = self.bccd.ratio_distribution(split_fingerprint)?;
            let ratio = draw_ratio(beta)?;
            let older = left.height().max(right.height());
            older + ratio * (tree_height - older)
        };

        let nr = self.next_nr(clade_fingerprint);
        Ok(DrawNode::Internal {
            nr,
            height,
            left: Box::new(left),
            right: Box::new(right),
            height_distribution: None,
        })
    }
}

/// Reconciles a built tree against pinned heights, top-down.
///
/// `anchor` is the `(sampled, final)` height pair of the nearest conditioned
/// ancestor; unconditioned nodes scale by its factor and are clamped below
/// their parent's final height. Log scaling factors accumulate in `log_jac`.
fn reconcile(
    node: &mut DrawNode,
    anchor: (f64, f64),
    parent_final: f64,
    node_to_clade: &HashMap<usize, u64>,
    pinned: &HashMap<u64, f64>,
    log_jac: &mut f64,
) {
    if node.is_leaf() {
        return;
    }

    let clade_fingerprint = node_to_clade[&node.nr()];
    let sampled = node.height();

    let (anchor, final_height) = match pinned.get(&clade_fingerprint) {
        Some(&pin) => {
            let height = pin.min(parent_final);
            ((sampled, height), height)
        }
        None => {
            let factor = anchor.1 / anchor.0;
            if factor != 1.0 {
                *log_jac += factor.ln();
            }
            (anchor, (sampled * factor).min(parent_final))
        }
    };

    node.set_height(final_height);
    if let DrawNode::Internal { left, right, .. } = node {
        reconcile(left, anchor, final_height, node_to_clade, pinned, log_jac);
        reconcile(right, anchor, final_height, node_to_clade, pinned, log_jac);
    }
}

fn collect_internal_heights(
    node: &DrawNode,
    weight: f64,
    out: &mut HashMap<usize, Vec<(f64, f64)>>,
) {
    if let DrawNode::Internal { nr, height, left, right, .. } = node {
        out.entry(*nr).or_default().push((*height, weight));
        collect_internal_heights(left, weight, out);
        collect_internal_heights(right, weight, out);
    }
}

fn embed_summaries(node: &mut DrawNode, summaries: &HashMap<usize, HeightSummary>) {
    if let DrawNode::Internal { nr, left, right, height_distribution, .. } = node {
        *height_distribution = summaries.get(nr).cloned();
        embed_summaries(left, summaries);
        embed_summaries(right, summaries);
    }
}

/// The point estimate of a fitted model, with interactive conditioning.
pub struct PointEstimator {
    bccd: Bccd,
    rng: StdRng,
    num_samples: usize,
    cache: DensityCache,
    /// Pinned split per clade fingerprint.
    conditioned_splits: HashMap<u64, u64>,
    /// Pinned absolute height per clade fingerprint.
    conditioned_heights: HashMap<u64, f64>,
    point_estimate: DrawTree,
    node_to_clade: HashMap<usize, u64>,
    clade_to_node: HashMap<u64, usize>,
    height_summaries: HashMap<usize, HeightSummary>,
}

impl PointEstimator {
    pub fn new(bccd: Bccd, rng: StdRng) -> Result<Self> {
        Self::with_num_samples(bccd, rng, NUM_HEIGHT_SAMPLES)
    }

    pub fn with_num_samples(bccd: Bccd, rng: StdRng, num_samples: usize) -> Result<Self> {
        let cache = DensityCache::collect(&bccd)?;
        let mut estimator = PointEstimator {
            bccd,
            rng,
            num_samples,
            cache,
            conditioned_splits: HashMap::new(),
            conditioned_heights: HashMap::new(),
            point_estimate: DrawTree {
                root: DrawNode::Leaf { nr: 0, height: 0.0, label: String::new() },
            },
            node_to_clade: HashMap::new(),
            clade_to_node: HashMap::new(),
            height_summaries: HashMap::new(),
        };
        estimator.rebuild()?;
        Ok(estimator)
    }

    pub fn bccd(&self) -> &Bccd {
        &self.bccd
    }

    pub fn point_estimate(&self) -> &DrawTree {
        &self.point_estimate
    }

    /// Rebuilds the point estimate and resamples heights from scratch.
    fn rebuild(&mut self) -> Result<()> {
        let tree_height = self.bccd.tree_height_distribution.point_estimate();
        let mut builder = TreeBuilder::new(&self.bccd, &self.cache, &self.conditioned_splits);
        let mut root = builder.build(
            self.bccd.root_clade.fingerprint,
            tree_height,
            &mut |beta| Ok(beta.point_estimate()),
        )?;
        let node_to_clade = builder.node_to_clade;

        if !self.conditioned_heights.is_empty() {
            let mut log_jac = 0.0;
            let anchor = (root.height(), root.height());
            reconcile(
                &mut root,
                anchor,
                f64::INFINITY,
                &node_to_clade,
                &self.conditioned_heights,
                &mut log_jac,
            );
        }

        self.clade_to_node =
            node_to_clade.iter().map(|(&nr, &clade)| (clade, nr)).collect();
        self.node_to_clade = node_to_clade;
        self.point_estimate = DrawTree { root };
        self.resample_heights()
    }

    /// Draws `num_samples` height-sampled trees over the fixed topology and
    /// summarizes the (weighted) heights per node.
    fn resample_heights(&mut self) -> Result<()> {
        let mut per_node: HashMap<usize, Vec<(f64, f64)>> = HashMap::new();
        let height_dist = self.bccd.tree_height_distribution;
        let has_pins = !self.conditioned_heights.is_empty();

        for _ in 0..self.num_samples {
            let tree_height = height_dist.sample(&mut self.rng)?;
            let mut builder = TreeBuilder::new(&self.bccd, &self.cache, &self.conditioned_splits);
            let mut root = builder.build(
                self.bccd.root_clade.fingerprint,
                tree_height,
                &mut |beta| beta.sample(&mut self.rng),
            )?;

            let mut log_jac = 0.0;
            if has_pins {
                let anchor = (root.height(), root.height());
                reconcile(
                    &mut root,
                    anchor,
                    f64::INFINITY,
                    &builder.node_to_clade,
                    &self.conditioned_heights,
                    &mut log_jac,
                );
            }

            collect_internal_heights(&root, log_jac.exp(), &mut per_node);
        }

        self.height_summaries =
            per_node.into_iter().map(|(nr, samples)| (nr, summarize(&samples))).collect();
        embed_summaries(&mut self.point_estimate.root, &self.height_summaries);
        Ok(())
    }

    /// Pins the split of the clade currently shown at `node_nr`.
    pub fn condition_on_split(&mut self, node_nr: usize, split_fingerprint: u64) -> Result<()> {
        let clade_fingerprint =
            *self.node_to_clade.get(&node_nr).ok_or(BccdError::UnknownNode(node_nr))?;
        let observed = self
            .bccd
            .splits_of(clade_fingerprint)
            .is_some_and(|splits| splits.contains(&split_fingerprint));
        if !observed {
            return Err(BccdError::SplitNotObserved {
                clade: clade_fingerprint,
                split: split_fingerprint,
            });
        }
        self.conditioned_splits.insert(clade_fingerprint, split_fingerprint);
        self.rebuild()
    }

    /// Removes a split conditioning. A no-op for clades that are not pinned.
    pub fn remove_split_conditioning(&mut self, clade_fingerprint: u64) -> Result<()> {
        if self.conditioned_splits.remove(&clade_fingerprint).is_some() {
            self.rebuild()
        } else {
            Ok(())
        }
    }

    /// Pins the height of the clade currently shown at `node_nr`.
    pub fn condition_on_height(&mut self, node_nr: usize, height: f64) -> Result<()> {
        let clade_fingerprint =
            *self.node_to_clade.get(&node_nr).ok_or(BccdError::UnknownNode(node_nr))?;
        let clade = self.bccd.clade(clade_fingerprint).ok_or_else(|| {
            BccdError::ModelCorruption(format!("unknown clade {clade_fingerprint:#x}"))
        })?;
        if clade.is_leaf() || !height.is_finite() || height <= 0.0 {
            return Err(BccdError::InvalidHeight { node: node_nr, height });
        }
        self.conditioned_heights.insert(clade_fingerprint, height);
        self.rebuild()
    }

    /// Removes a height conditioning. A no-op for clades that are not pinned.
    pub fn remove_height_conditioning(&mut self, clade_fingerprint: u64) -> Result<()> {
        if self.conditioned_heights.remove(&clade_fingerprint).is_some() {
            self.rebuild()
        } else {
            Ok(())
        }
    }

    /// The chosen split, height summary and competing splits at one node.
    pub fn node_details(&self, node_nr: usize) -> Result<NodeDetails> {
        let clade_fingerprint =
            *self.node_to_clade.get(&node_nr).ok_or(BccdError::UnknownNode(node_nr))?;
        let clade = self.bccd.clade(clade_fingerprint).ok_or_else(|| {
            BccdError::ModelCorruption(format!("unknown clade {clade_fingerprint:#x}"))
        })?;
        if clade.is_leaf() {
            return Ok(NodeDetails {
                node_nr,
                chosen: None,
                height_distribution: None,
                alternatives: Vec::new(),
            });
        }

        let split_fingerprints = self
            .bccd
            .splits_of(clade_fingerprint)
            .ok_or(BccdError::CladeWithoutSplits(clade_fingerprint))?;
        let mut summaries = Vec::with_capacity(split_fingerprints.len());
        for &fingerprint in split_fingerprints {
            summaries.push(self.split_summary(fingerprint)?);
        }
        // stable sort: ties stay in fingerprint order
        summaries.sort_by(|a, b| b.log_density.total_cmp(&a.log_density));

        let (chosen_fingerprint, reason) = match self.conditioned_splits.get(&clade_fingerprint) {
            Some(&fingerprint) => (fingerprint, SplitChoiceReason::ConditionedOn),
            None => (
                *self
                    .cache
                    .best_splits
                    .get(&clade_fingerprint)
                    .ok_or(BccdError::CladeWithoutSplits(clade_fingerprint))?,
                SplitChoiceReason::BestSplit,
            ),
        };
        let chosen_summary = summaries
            .iter()
            .find(|s| s.split_fingerprint == chosen_fingerprint)
            .cloned()
            .ok_or(BccdError::SplitNotObserved {
                clade: clade_fingerprint,
                split: chosen_fingerprint,
            })?;

        summaries.retain(|s| s.split_fingerprint != chosen_fingerprint);
        summaries.truncate(MAX_ALTERNATIVE_SPLITS);

        Ok(NodeDetails {
            node_nr,
            chosen: Some(ChosenSplit { summary: chosen_summary, reason }),
            height_distribution: self.height_summaries.get(&node_nr).cloned(),
            alternatives: summaries,
        })
    }

    /// Ranks a split by its local contribution: the conditional clade
    /// probability plus the ratio density at its point estimate.
    fn split_summary(&self, split_fingerprint: u64) -> Result<SplitSummary> {
        let split = self.bccd.split(split_fingerprint).ok_or_else(|| {
            BccdError::ModelCorruption(format!("unknown split {split_fingerprint:#x}"))
        })?;

        let ccp = (self.bccd.num_split_occurrences(split_fingerprint) as f64).ln()
            - (self.bccd.num_clade_occurrences(split.parent.fingerprint) as f64).ln();
        let embedding = if split.parent.is_root() {
            0.0
        } else {
            let beta = self.bccd.ratio_distribution(split_fingerprint)?;
            beta.log_density(beta.point_estimate())
        };

        Ok(SplitSummary {
            split_fingerprint,
            left_labels: self.bccd.clade_tip_labels(split.clade1.fingerprint),
            right_labels: self.bccd.clade_tip_labels(split.clade2.fingerprint),
            log_density: ccp + embedding,
        })
    }

    /// Split conditionings whose clade appears in the current point
    /// estimate, sorted by node number. Pins on clades displaced by other
    /// conditionings stay stored but are not listed.
    pub fn active_split_conditionings(&self) -> Vec<ConditionedSplit> {
        self.conditioned_splits
            .iter()
            .filter_map(|(&clade_fingerprint, &split_fingerprint)| {
                self.clade_to_node.get(&clade_fingerprint).map(|&node_nr| ConditionedSplit {
                    clade_fingerprint,
                    node_nr,
                    split_fingerprint,
                })
            })
            .sorted_by_key(|c| c.node_nr)
            .collect()
    }

    /// Height conditionings whose clade appears in the current point
    /// estimate, sorted by node number.
    pub fn active_height_conditionings(&self) -> Vec<ConditionedHeight> {
        self.conditioned_heights
            .iter()
            .filter_map(|(&clade_fingerprint, &height)| {
                self.clade_to_node.get(&clade_fingerprint).map(|&node_nr| ConditionedHeight {
                    clade_fingerprint,
                    node_nr,
                    height,
                })
            })
            .sorted_by_key(|c| c.node_nr)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bccd;
    use crate::tree::{InputNode, InputTree};
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn cherry(a: &str, b: &str, height: f64) -> InputNode {
        InputNode::internal(height, vec![InputNode::leaf(a, 0.0), InputNode::leaf(b, 0.0)])
    }

    fn balanced_tree() -> InputTree {
        InputTree {
            root: InputNode::internal(2.0, vec![cherry("A", "B", 1.0), cherry("C", "D", 1.2)]),
        }
    }

    fn caterpillar_tree() -> InputTree {
        InputTree {
            root: InputNode::internal(
                2.0,
                vec![
                    InputNode::internal(1.5, vec![cherry("A", "B", 1.0), InputNode::leaf("C", 0.0)]),
                    InputNode::leaf("D", 0.0),
                ],
            ),
        }
    }

    /// Balanced trees with jittered heights, so every ratio beta is fitted
    /// from a sample with real spread.
    fn noisy_balanced_forest() -> Vec<InputTree> {
        let heights = [
            (2.0, 1.0, 1.2),
            (2.2, 1.1, 1.3),
            (1.8, 0.9, 1.1),
            (2.1, 1.05, 1.25),
            (1.9, 0.95, 1.15),
            (2.05, 1.0, 1.2),
            (2.15, 1.08, 1.28),
            (1.95, 0.92, 1.18),
        ];
        heights
            .iter()
            .map(|&(root, ab, cd)| InputTree {
                root: InputNode::internal(root, vec![cherry("A", "B", ab), cherry("C", "D", cd)]),
            })
            .collect()
    }

    fn find_internal_nr(node: &DrawNode, signature: &str) -> Option<usize> {
        match node {
            DrawNode::Leaf { .. } => None,
            DrawNode::Internal { nr, left, right, .. } => {
                if topology_signature(node) == signature {
                    Some(*nr)
                } else {
                    find_internal_nr(left, signature).or_else(|| find_internal_nr(right, signature))
                }
            }
        }
    }

    fn assert_heights_descend(node: &DrawNode, parent_height: f64) {
        assert!(
            node.height() <= parent_height + 1e-9,
            "node {} at height {} above its parent at {}",
            node.nr(),
            node.height(),
            parent_height
        );
        if let DrawNode::Internal { left, right, .. } = node {
            assert_heights_descend(left, node.height());
            assert_heights_descend(right, node.height());
        }
    }

    fn estimator_for(trees: Vec<InputTree>, seed: u64) -> PointEstimator {
        let mut rng = StdRng::seed_from_u64(seed);
        let bccd = Bccd::from_forest(&trees, &mut rng).unwrap();
        PointEstimator::with_num_samples(bccd, StdRng::seed_from_u64(seed + 1), 200).unwrap()
    }

    /// Nested sorted-label signature, independent of heights and numbering.
    fn topology_signature(node: &DrawNode) -> String {
        match node {
            DrawNode::Leaf { label, .. } => label.clone(),
            DrawNode::Internal { left, right, .. } => {
                let mut parts = [topology_signature(left), topology_signature(right)];
                parts.sort();
                format!("({},{})", parts[0], parts[1])
            }
        }
    }

    /// Heights of internal nodes keyed by the sorted labels below them.
    fn internal_heights(node: &DrawNode, out: &mut HashMap<String, f64>) {
        if let DrawNode::Internal { height, left, right, .. } = node {
            out.insert(topology_signature(node), *height);
            internal_heights(left, out);
            internal_heights(right, out);
        }
    }

    #[test]
    fn identical_forest_reproduces_its_tree_exactly() {
        let estimator = estimator_for(vec![balanced_tree(); 6], 11);
        let tree = estimator.point_estimate();

        assert_eq!(topology_signature(&tree.root), "((A,B),(C,D))");

        let mut heights = HashMap::new();
        internal_heights(&tree.root, &mut heights);
        assert_abs_diff_eq!(heights["((A,B),(C,D))"], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(heights["(A,B)"], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(heights["(C,D)"], 1.2, epsilon = 1e-6);
    }

    #[test]
    fn node_numbers_are_post_order() {
        let estimator = estimator_for(vec![balanced_tree(); 6], 5);
        let root = &estimator.point_estimate().root;

        // 7 nodes for 4 taxa, root numbered last
        assert_eq!(root.nr(), 6);
        assert_eq!(root.num_leaves(), 4);
    }

    #[test]
    fn split_conditioning_changes_and_restores_the_topology() {
        let mut trees = vec![balanced_tree(); 6];
        trees.extend(vec![caterpillar_tree(); 2]);
        let mut estimator = estimator_for(trees, 3);

        let original = topology_signature(&estimator.point_estimate().root);
        assert_eq!(original, "((A,B),(C,D))");

        let root_nr = estimator.point_estimate().root.nr();
        let details = estimator.node_details(root_nr).unwrap();
        let chosen = details.chosen.unwrap();
        assert_eq!(chosen.reason, SplitChoiceReason::BestSplit);

        // the chosen split is excluded, leaving the one competing split
        assert_eq!(details.alternatives.len(), 1);
        let alternative = details.alternatives[0].split_fingerprint;
        assert_ne!(alternative, chosen.summary.split_fingerprint);
        estimator.condition_on_split(root_nr, alternative).unwrap();

        let conditioned = topology_signature(&estimator.point_estimate().root);
        assert_eq!(conditioned, "(((A,B),C),D)");

        let root_nr = estimator.point_estimate().root.nr();
        let details = estimator.node_details(root_nr).unwrap();
        assert_eq!(details.chosen.unwrap().reason, SplitChoiceReason::ConditionedOn);
        assert_eq!(estimator.active_split_conditionings().len(), 1);

        let clade_fingerprint = estimator.active_split_conditionings()[0].clade_fingerprint;
        estimator.remove_split_conditioning(clade_fingerprint).unwrap();
        assert_eq!(topology_signature(&estimator.point_estimate().root), original);
        assert!(estimator.active_split_conditionings().is_empty());
    }

    #[test]
    fn conditioning_on_an_unobserved_split_is_rejected() {
        let mut estimator = estimator_for(vec![balanced_tree(); 6], 3);
        let root_nr = estimator.point_estimate().root.nr();

        let result = estimator.condition_on_split(root_nr, 0xdead_beef);
        assert!(matches!(result, Err(BccdError::SplitNotObserved { .. })));

        let result = estimator.condition_on_split(999, 0);
        assert!(matches!(result, Err(BccdError::UnknownNode(999))));
    }

    #[test]
    fn height_conditioning_pins_the_root() {
        let mut estimator = estimator_for(vec![balanced_tree(); 6], 9);
        let root_nr = estimator.point_estimate().root.nr();

        estimator.condition_on_height(root_nr, 1.5).unwrap();
        assert_abs_diff_eq!(estimator.point_estimate().tree_height(), 1.5);
        // descendants scaled by 1.5 / 2.0
        let mut heights = HashMap::new();
        internal_heights(&estimator.point_estimate().root, &mut heights);
        assert_abs_diff_eq!(heights["(A,B)"], 0.75, epsilon = 1e-6);

        assert_eq!(estimator.active_height_conditionings().len(), 1);
        let clade_fingerprint = estimator.active_height_conditionings()[0].clade_fingerprint;
        estimator.remove_height_conditioning(clade_fingerprint).unwrap();
        assert_abs_diff_eq!(estimator.point_estimate().tree_height(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn nested_height_pins_reweight_samples_and_stay_ordered() {
        let mut estimator = estimator_for(noisy_balanced_forest(), 17);
        let root_nr = estimator.point_estimate().root.nr();

        estimator.condition_on_height(root_nr, 1.0).unwrap();
        let ab_nr = find_internal_nr(&estimator.point_estimate().root, "(A,B)").unwrap();
        // a pin older than the pinned root gets clamped below it
        estimator.condition_on_height(ab_nr, 5.0).unwrap();

        assert_eq!(estimator.active_height_conditionings().len(), 2);
        assert_heights_descend(&estimator.point_estimate().root, f64::INFINITY);

        let mut heights = HashMap::new();
        internal_heights(&estimator.point_estimate().root, &mut heights);
        assert_abs_diff_eq!(heights["((A,B),(C,D))"], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(heights["(A,B)"], 1.0, epsilon = 1e-9);

        // every draw pins the root exactly, so its summary collapses there
        let root_summary = estimator
            .node_details(root_nr)
            .unwrap()
            .height_distribution
            .unwrap();
        assert_abs_diff_eq!(root_summary.mean, 1.0, epsilon = 1e-9);

        // rescaled draws carry importance weights, so the total weight is
        // no longer the raw draw count
        assert!((root_summary.total_weight - 200.0).abs() > 1.0);
        assert!(root_summary.total_weight > 0.0);

        // the clamped child never rises above the root pin
        let cd_nr = find_internal_nr(&estimator.point_estimate().root, "(C,D)").unwrap();
        let cd_summary =
            estimator.node_details(cd_nr).unwrap().height_distribution.unwrap();
        assert!(cd_summary.mean < 1.0);
    }

    #[test]
    fn height_conditioning_rejects_leaves_and_bad_values() {
        let mut estimator = estimator_for(vec![balanced_tree(); 6], 9);
        let leaf_nr = 0;

        assert!(matches!(
            estimator.condition_on_height(leaf_nr, 1.0),
            Err(BccdError::InvalidHeight { .. })
        ));
        let root_nr = estimator.point_estimate().root.nr();
        assert!(matches!(
            estimator.condition_on_height(root_nr, f64::NAN),
            Err(BccdError::InvalidHeight { .. })
        ));
    }

    #[test]
    fn height_summaries_are_attached_to_internal_nodes() {
        let estimator = estimator_for(vec![balanced_tree(); 6], 21);
        let root = &estimator.point_estimate().root;

        let DrawNode::Internal { height_distribution, .. } = root else {
            panic!("root must be internal");
        };
        let summary = height_distribution.as_ref().unwrap();
        assert_abs_diff_eq!(summary.total_weight, 200.0, epsilon = 1e-6);
        // identical forest: sampled tree heights concentrate at 2.0
        assert_abs_diff_eq!(summary.mean, 2.0, epsilon = 0.05);
    }

    #[test]
    fn leaf_details_have_no_chosen_split() {
        let estimator = estimator_for(vec![balanced_tree(); 6], 2);
        let details = estimator.node_details(0).unwrap();

        assert!(details.chosen.is_none());
        assert!(details.alternatives.is_empty());
        assert!(details.height_distribution.is_none());
    }
}
