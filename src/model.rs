//! The conditional clade distribution model.
//!
//! # Overview
//! A [`Bccd`] is built from a posterior forest: every tree is decomposed
//! bottom-up into clades and clade splits, identified by fingerprint
//! ([`crate::clade`]), and the model counts how often each clade and each
//! split occurs across the forest. Alongside the counts it records the
//! continuous observations needed for branch lengths:
//! - the tree height of every sampled tree, and
//! - for every non-root split, the ratio describing where the split's parent
//!   sits between its older child and the root.
//!
//! After counting, maximum-likelihood distributions are fitted: a log-normal
//! over tree heights, and a beta over the ratios of each split. Splits with
//! fewer than [`MIN_SPLIT_OBSERVATIONS`] observations share a single beta
//! fitted to all ratios pooled across every split.
//!
//! # Invariants
//! - All trees share one tip set and are strictly binary; violations are
//!   rejected while counting.
//! - A fingerprint maps to exactly one clade (or split) structure. Repeated
//!   observations are checked against the stored structure, and a mismatch
//!   is reported as model corruption.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clade::{build_split, union, Clade, CladeSplit};
use crate::distribution::{Beta, LogNormal};
use crate::error::{BccdError, Result};
use crate::tree::{InputNode, InputTree};

/// Splits observed fewer times than this use the pooled ratio distribution.
pub const MIN_SPLIT_OBSERVATIONS: usize = 5;

/// A fitted Bayesian conditional clade distribution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bccd {
    pub num_taxa: usize,
    pub num_trees: usize,
    /// Tip names in the order of the first tree's post-order traversal.
    pub tip_names: Vec<String>,
    pub leaf_fingerprints: HashMap<String, u64>,
    pub leaf_labels: HashMap<u64, String>,
    pub root_clade: Clade,
    pub clades: HashMap<u64, Clade>,
    pub splits: HashMap<u64, CladeSplit>,
    /// Split fingerprints observed per parent clade, in fingerprint order.
    pub splits_per_clade: HashMap<u64, BTreeSet<u64>>,
    pub num_clade_occurrences: HashMap<u64, usize>,
    pub num_split_occurrences: HashMap<u64, usize>,
    pub observed_tree_heights: Vec<f64>,
    pub observed_split_ratios: BTreeMap<u64, Vec<f64>>,
    pub tree_height_distribution: LogNormal,
    pub split_ratio_distributions: BTreeMap<u64, Beta>,
    /// Pooled fallback; `None` only for forests without any non-root split
    /// (two-tip trees).
    pub global_split_ratio_distribution: Option<Beta>,
}

impl Bccd {
    /// Builds the model from a posterior forest.
    ///
    /// The supplied RNG assigns the per-tip fingerprints; seeding it makes
    /// the fingerprints (not the model semantics) reproducible.
    pub fn from_forest<R: Rng + ?Sized>(trees: &[InputTree], rng: &mut R) -> Result<Self> {
        if trees.is_empty() {
            return Err(BccdError::EmptyForest);
        }

        let tip_names = trees[0].leaf_labels();
        let num_taxa = tip_names.len();

        let mut reference: Vec<&str> = tip_names.iter().map(String::as_str).collect();
        reference.sort_unstable();
        for (index, tree) in trees.iter().enumerate().skip(1) {
            let labels = tree.leaf_labels();
            let mut sorted: Vec<&str> = labels.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            if sorted != reference {
                return Err(BccdError::MismatchedTipSets { index });
            }
        }

        let mut leaf_fingerprints = HashMap::with_capacity(num_taxa);
        let mut leaf_labels = HashMap::with_capacity(num_taxa);
        for name in &tip_names {
            let fingerprint: u64 = rng.random();
            leaf_fingerprints.insert(name.clone(), fingerprint);
            leaf_labels.insert(fingerprint, name.clone());
        }

        let mut accumulator = Accumulator {
            num_taxa,
            leaf_fingerprints: &leaf_fingerprints,
            clades: HashMap::new(),
            splits: HashMap::new(),
            splits_per_clade: HashMap::new(),
            num_clade_occurrences: HashMap::new(),
            num_split_occurrences: HashMap::new(),
            observed_tree_heights: Vec::with_capacity(trees.len()),
            observed_split_ratios: BTreeMap::new(),
        };

        let mut root_clade = None;
        for tree in trees {
            let (clade, _) = accumulator.cladify(&tree.root, tree.tree_height())?;
            root_clade = Some(clade);
        }
        let root_clade = root_clade.expect("forest is non-empty");

        // release the accumulator's borrow of the fingerprint map
        let Accumulator {
            clades,
            splits,
            splits_per_clade,
            num_clade_occurrences,
            num_split_occurrences,
            observed_tree_heights,
            observed_split_ratios,
            ..
        } = accumulator;

        let tree_height_distribution = LogNormal::fit(&observed_tree_heights)?;

        let pooled: Vec<f64> = observed_split_ratios.values().flatten().copied().collect();
        let global_split_ratio_distribution =
            if pooled.is_empty() { None } else { Some(Beta::fit(&pooled)?) };

        let mut split_ratio_distributions = BTreeMap::new();
        for (&fingerprint, ratios) in &observed_split_ratios {
            let dist = if ratios.len() >= MIN_SPLIT_OBSERVATIONS {
                Beta::fit(ratios)?
            } else {
                global_split_ratio_distribution
                    .ok_or(BccdError::MissingDistribution(fingerprint))?
            };
            split_ratio_distributions.insert(fingerprint, dist);
        }

        Ok(Bccd {
            num_taxa,
            num_trees: trees.len(),
            tip_names,
            leaf_fingerprints,
            leaf_labels,
            root_clade,
            clades,
            splits,
            splits_per_clade,
            num_clade_occurrences,
            num_split_occurrences,
            observed_tree_heights,
            observed_split_ratios,
            tree_height_distribution,
            split_ratio_distributions,
            global_split_ratio_distribution,
        })
    }

    pub fn clade(&self, fingerprint: u64) -> Option<&Clade> {
        self.clades.get(&fingerprint)
    }

    pub fn split(&self, fingerprint: u64) -> Option<&CladeSplit> {
        self.splits.get(&fingerprint)
    }

    /// The splits observed for a clade, in fingerprint order.
    pub fn splits_of(&self, clade_fingerprint: u64) -> Option<&BTreeSet<u64>> {
        self.splits_per_clade.get(&clade_fingerprint)
    }

    pub fn num_clade_occurrences(&self, fingerprint: u64) -> usize {
        self.num_clade_occurrences.get(&fingerprint).copied().unwrap_or(0)
    }

    pub fn num_split_occurrences(&self, fingerprint: u64) -> usize {
        self.num_split_occurrences.get(&fingerprint).copied().unwrap_or(0)
    }

    /// The fitted ratio distribution of a non-root split.
    pub fn ratio_distribution(&self, split_fingerprint: u64) -> Result<&Beta> {
        self.split_ratio_distributions
            .get(&split_fingerprint)
            .ok_or(BccdError::MissingDistribution(split_fingerprint))
    }

    pub fn leaf_label(&self, fingerprint: u64) -> Option<&str> {
        self.leaf_labels.get(&fingerprint).map(String::as_str)
    }

    /// The sorted tip labels contained in a clade, resolved by descending
    /// through the clade's first observed split at every level.
    pub fn clade_tip_labels(&self, fingerprint: u64) -> Vec<String> {
        let mut labels = Vec::new();
        self.collect_tip_labels(fingerprint, &mut labels);
        labels.sort_unstable();
        labels
    }

    fn collect_tip_labels(&self, fingerprint: u64, out: &mut Vec<String>) {
        if let Some(label) = self.leaf_labels.get(&fingerprint) {
            out.push(label.clone());
            return;
        }
        let Some(split_fingerprints) = self.splits_per_clade.get(&fingerprint) else {
            return;
        };
        let Some(&first) = split_fingerprints.iter().next() else {
            return;
        };
        if let Some(split) = self.splits.get(&first) {
            self.collect_tip_labels(split.clade1.fingerprint, out);
            self.collect_tip_labels(split.clade2.fingerprint, out);
        }
    }
}

/// Per-build counting state, borrowed over the fingerprint assignment.
struct Accumulator<'a> {
    num_taxa: usize,
    leaf_fingerprints: &'a HashMap<String, u64>,
    clades: HashMap<u64, Clade>,
    splits: HashMap<u64, CladeSplit>,
    splits_per_clade: HashMap<u64, BTreeSet<u64>>,
    num_clade_occurrences: HashMap<u64, usize>,
    num_split_occurrences: HashMap<u64, usize>,
    observed_tree_heights: Vec<f64>,
    observed_split_ratios: BTreeMap<u64, Vec<f64>>,
}

impl Accumulator<'_> {
    /// Decomposes the subtree rooted at `node` bottom-up, recording every
    /// clade and split. Returns the node's clade and its absolute height.
    fn cladify(&mut self, node: &InputNode, tree_height: f64) -> Result<(Clade, f64)> {
        if node.is_leaf() {
            let label = node.label.as_deref().unwrap_or("");
            let fingerprint = *self
                .leaf_fingerprints
                .get(label)
                .ok_or_else(|| BccdError::UnknownTipLabel(label.to_string()))?;
            let clade = Clade::leaf(fingerprint, self.num_taxa);
            self.observe_clade(clade)?;
            return Ok((clade, node.height));
        }

        if node.children.len() != 2 {
            return Err(BccdError::NonBinaryNode(node.children.len()));
        }

        let (clade1, height1) = self.cladify(&node.children[0], tree_height)?;
        let (clade2, height2) = self.cladify(&node.children[1], tree_height)?;

        let parent = union(&clade1, &clade2);
        self.observe_clade(parent)?;

        let split = build_split(parent, clade1, clade2);
        self.observe_split(split)?;

        if parent.is_root() {
            self.observed_tree_heights.push(tree_height);
        } else {
            let older_child_height = height1.max(height2);
            let ratio =
                (node.height - older_child_height) / (tree_height - older_child_height);
            if ratio.is_finite() {
                self.observed_split_ratios.entry(split.fingerprint).or_default().push(ratio);
            }
        }

        Ok((parent, node.height))
    }

    fn observe_clade(&mut self, clade: Clade) -> Result<()> {
        if let Some(existing) = self.clades.get(&clade.fingerprint) {
            if existing.size != clade.size {
                return Err(BccdError::ModelCorruption(format!(
                    "clade {:#x} observed with sizes {} and {}",
                    clade.fingerprint, existing.size, clade.size
                )));
            }
        } else {
            self.clades.insert(clade.fingerprint, clade);
        }
        *self.num_clade_occurrences.entry(clade.fingerprint).or_insert(0) += 1;
        Ok(())
    }

    fn observe_split(&mut self, split: CladeSplit) -> Result<()> {
        if let Some(existing) = self.splits.get(&split.fingerprint) {
            let same_parent = existing.parent.fingerprint == split.parent.fingerprint;
            let same_children = (existing.clade1.fingerprint == split.clade1.fingerprint
                && existing.clade2.fingerprint == split.clade2.fingerprint)
                || (existing.clade1.fingerprint == split.clade2.fingerprint
                    && existing.clade2.fingerprint == split.clade1.fingerprint);
            if !same_parent || !same_children {
                return Err(BccdError::ModelCorruption(format!(
                    "split {:#x} observed with two different structures",
                    split.fingerprint
                )));
            }
        } else {
            self.splits.insert(split.fingerprint, split);
            self.splits_per_clade
                .entry(split.parent.fingerprint)
                .or_default()
                .insert(split.fingerprint);
        }
        *self.num_split_occurrences.entry(split.fingerprint).or_insert(0) += 1;
        Ok(())
    }
}
