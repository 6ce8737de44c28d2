//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `clade`: fingerprint-based clade and clade-split identity.
//! - `tree`: parsed posterior trees (input side).
//! - `io`: reading and parsing BEAST/NEXUS posterior tree files.
//! - `distribution`: LogNormal and Beta maximum-likelihood fitting.
//! - `histogram`: weighted height summaries and credible intervals.
//! - `model`: the Bayesian conditional clade distribution.
//! - `estimate`: point-estimate construction, resampling, conditioning.
//! - `draw`: the point-estimate tree and per-node reports (output side).
//! - `layout`: non-layered Reingold-Tilford drawing coordinates.
//! - `session`: request/response boundary owning all model state.
//! - `error`: the crate-wide error type.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).
//!
//! Public API kept stable by re-exporting key items from the modules.

pub mod clade;
pub mod distribution;
pub mod draw;
pub mod error;
pub mod estimate;
pub mod histogram;
pub mod io;
pub mod layout;
pub mod model;
pub mod session;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use clade::{build_split, union, Clade, CladeSplit};
pub use draw::{DrawNode, DrawTree, NodeDetails};
pub use error::{BccdError, Result};
pub use estimate::PointEstimator;
pub use io::{parse_posterior_trees, read_posterior_trees};
pub use layout::TreeLayout;
pub use model::Bccd;
pub use session::{Request, Response, Session};
pub use tree::{InputNode, InputTree};
