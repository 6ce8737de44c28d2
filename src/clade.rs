//! Canonical identity for clades and clade splits.
//!
//! # Overview
//! A clade is one side of a bipartition of the tip set. Instead of carrying
//! the tip set around, each clade is identified by a fingerprint: the XOR of
//! a random `u64` assigned to every tip it contains. XOR is commutative and
//! associative, so the fingerprint is independent of the order in which a
//! clade was assembled, and the same tip set always yields the same
//! fingerprint no matter which sampled tree it came from.
//!
//! # Collision risk
//! Two different tip sets can in principle XOR to the same fingerprint. With
//! uniform 64-bit tip fingerprints this is astronomically unlikely; the model
//! builder verifies structural consistency on every repeated observation and
//! treats a detected mismatch as fatal corruption rather than merging.

use serde::{Deserialize, Serialize};

/// One side of a bipartition of the tip set, identified by fingerprint.
///
/// A clade of size 1 is a leaf; a clade whose size equals `total_num_tips`
/// is the root clade of the dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clade {
    pub fingerprint: u64,
    pub size: usize,
    pub total_num_tips: usize,
}

impl Clade {
    /// Creates the clade of a single tip from its per-tip fingerprint.
    pub fn leaf(fingerprint: u64, total_num_tips: usize) -> Self {
        Clade { fingerprint, size: 1, total_num_tips }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.size == 1
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.size == self.total_num_tips
    }
}

/// Combines two disjoint sibling clades into their parent clade.
///
/// Fingerprints XOR, sizes add. Commutative: `union(a, b) == union(b, a)`.
pub fn union(clade1: &Clade, clade2: &Clade) -> Clade {
    Clade {
        fingerprint: clade1.fingerprint ^ clade2.fingerprint,
        size: clade1.size + clade2.size,
        total_num_tips: clade1.total_num_tips,
    }
}

/// The decomposition of a parent clade into two sibling child clades.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CladeSplit {
    pub fingerprint: u64,
    pub parent: Clade,
    pub clade1: Clade,
    pub clade2: Clade,
}

/// 64-bit golden-ratio multiplier used to mix the two child fingerprints.
const SPLIT_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Derives a split from a parent clade and its two children.
///
/// The split fingerprint is symmetric in the children: the smaller child
/// fingerprint is XORed with a multiplicative mix of the larger one, so the
/// same bipartition-of-a-bipartition gets the same identity regardless of
/// left/right order in the sampled tree.
pub fn build_split(parent: Clade, clade1: Clade, clade2: Clade) -> CladeSplit {
    let lo = clade1.fingerprint.min(clade2.fingerprint);
    let hi = clade1.fingerprint.max(clade2.fingerprint);
    let fingerprint = lo ^ hi.wrapping_mul(SPLIT_MIX);

    CladeSplit { fingerprint, parent, clade1, clade2 }
}
