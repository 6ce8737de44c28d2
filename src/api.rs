//! Python binding layer for the BCCD estimator.
//!
//! Exposes a session class mirroring the request/response operations:
//! load trees, build the model, condition, and query the point estimate.
//! Structured results cross the boundary as JSON strings.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::draw::NodeDetails;
use crate::error::BccdError;
use crate::io::read_posterior_trees;
use crate::session::{Request, Response, Session};

fn to_py_err(e: BccdError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// One BCCD session: posterior forest, fitted model, point estimator.
///
/// Args:
///     seed: Optional RNG seed; seeded sessions are fully deterministic.
///     samples: Number of sampled trees for per-node height distributions
///         (default: 10000).
#[pyclass]
pub struct BccdSession {
    session: Session,
}

#[pymethods]
impl BccdSession {
    #[new]
    #[pyo3(signature = (seed=None, samples=None))]
    fn new(seed: Option<u64>, samples: Option<usize>) -> Self {
        let mut session = match seed {
            Some(seed) => Session::with_seed(seed),
            None => Session::new(),
        };
        if let Some(samples) = samples {
            session = session.with_num_samples(samples);
        }
        BccdSession { session }
    }

    /// Load posterior trees from a BEAST/NEXUS file (optionally gzipped).
    ///
    /// Returns:
    ///     The number of trees retained after burn-in removal.
    ///
    /// Raises:
    ///     ValueError: If the file cannot be read or parsed.
    #[pyo3(signature = (path, burnin_trees=0, burnin_states=0, use_real_taxa=true))]
    fn load_trees(
        &mut self,
        path: String,
        burnin_trees: usize,
        burnin_states: usize,
        use_real_taxa: bool,
    ) -> PyResult<usize> {
        let (_, trees) = read_posterior_trees(&path, burnin_trees, burnin_states, use_real_taxa)
            .map_err(to_py_err)?;
        if trees.is_empty() {
            return Err(PyValueError::new_err(format!(
                "No trees found in file '{}' after burnin removal",
                path
            )));
        }
        self.session.ingest_trees(trees);
        Ok(self.session.num_trees())
    }

    /// Build the model and the initial point estimate from the loaded trees.
    fn build(&mut self) -> PyResult<()> {
        self.session.build_model().map_err(to_py_err)
    }

    /// Pin the split of the clade shown at `node_nr`.
    fn condition_on_split(&mut self, node_nr: usize, split_fingerprint: u64) -> PyResult<()> {
        self.expect_ok(Request::ConditionOnSplit { node_nr, split_fingerprint })
    }

    fn remove_split_conditioning(&mut self, clade_fingerprint: u64) -> PyResult<()> {
        self.expect_ok(Request::RemoveSplitConditioning { clade_fingerprint })
    }

    /// Pin the height of the clade shown at `node_nr`.
    fn condition_on_height(&mut self, node_nr: usize, height: f64) -> PyResult<()> {
        self.expect_ok(Request::ConditionOnHeight { node_nr, height })
    }

    fn remove_height_conditioning(&mut self, clade_fingerprint: u64) -> PyResult<()> {
        self.expect_ok(Request::RemoveHeightConditioning { clade_fingerprint })
    }

    /// The point estimate as a Newick string with branch lengths.
    fn point_estimate_newick(&self) -> PyResult<String> {
        let estimator = self
            .session
            .estimator()
            .ok_or_else(|| PyValueError::new_err("build the model before querying"))?;
        Ok(estimator.point_estimate().to_newick())
    }

    /// Full state as JSON: point estimate, active conditionings and,
    /// optionally, one node's details.
    #[pyo3(signature = (selected_node_nr=None))]
    fn global_state(&mut self, selected_node_nr: Option<usize>) -> PyResult<String> {
        match self.session.handle(Request::GetGlobalState { selected_node_nr }) {
            Response::Failure { reason } => Err(PyValueError::new_err(reason)),
            response => serde_json::to_string(&response)
                .map_err(|e| PyValueError::new_err(e.to_string())),
        }
    }

    /// One node's details (chosen split, height histogram, alternatives)
    /// as JSON.
    fn node_details(&self, node_nr: usize) -> PyResult<String> {
        let estimator = self
            .session
            .estimator()
            .ok_or_else(|| PyValueError::new_err("build the model before querying"))?;
        let details: NodeDetails = estimator.node_details(node_nr).map_err(to_py_err)?;
        serde_json::to_string(&details).map_err(|e| PyValueError::new_err(e.to_string()))
    }
}

impl BccdSession {
    fn expect_ok(&mut self, request: Request) -> PyResult<()> {
        match self.session.handle(request) {
            Response::Failure { reason } => Err(PyValueError::new_err(reason)),
            _ => Ok(()),
        }
    }
}

/// Python module definition
#[pymodule]
fn bccd_estimator(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<BccdSession>()?;
    Ok(())
}
