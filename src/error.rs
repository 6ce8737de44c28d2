//! Crate-wide error type.
//!
//! Failures fall into four categories, all of which abort the current
//! operation and surface to the caller unchanged:
//! - input-structural: the posterior forest itself is unusable,
//! - model-corruption: fingerprint identities became inconsistent,
//! - statistical-fit: a distribution cannot be estimated from its sample,
//! - invariant violations: a query or conditioning call referenced
//!   something the model does not contain.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BccdError>;

#[derive(Debug, Error)]
pub enum BccdError {
    // --- input-structural ---
    #[error("no trees to construct the BCCD from")]
    EmptyForest,

    #[error("node with {0} children found; only strictly binary rooted trees are supported")]
    NonBinaryNode(usize),

    #[error("tree {index} has a different tip set than tree 0; all trees must share one tip set")]
    MismatchedTipSets { index: usize },

    #[error("unknown tip label `{0}`")]
    UnknownTipLabel(String),

    // --- model-corruption ---
    #[error("fingerprint collision detected: {0}")]
    ModelCorruption(String),

    // --- statistical-fit ---
    #[error(
        "beta parameters could not be estimated: sample variance {variance} \
         is incompatible with mean {mean}"
    )]
    BetaVarianceTooLarge { mean: f64, variance: f64 },

    #[error("beta parameters could not be estimated: method-of-moments estimate is non-positive")]
    BetaMomentNonPositive,

    #[error("cannot fit a distribution to an empty sample set")]
    EmptySample,

    #[error("cannot sample from the fitted distribution: {0}")]
    InvalidSampler(String),

    // --- invariant violations ---
    #[error("clade {0:#x} has no observed splits")]
    CladeWithoutSplits(u64),

    #[error("no fitted ratio distribution for split {0:#x}")]
    MissingDistribution(u64),

    #[error("unknown node number {0}")]
    UnknownNode(usize),

    #[error("split {split:#x} was never observed for clade {clade:#x}")]
    SplitNotObserved { clade: u64, split: u64 },

    #[error("cannot pin height {height} at node {node}")]
    InvalidHeight { node: usize, height: f64 },

    // --- boundary ---
    #[error("failed to read trees: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse tree: {0}")]
    Parse(String),

    #[error("{0}")]
    NotReady(&'static str),
}
