//! Request/response boundary around one model session.
//!
//! A [`Session`] is the single owner of everything stateful: the parsed
//! posterior forest, the fitted model, and the estimator with its
//! conditionings. Callers drive it through serializable [`Request`]s and
//! get tagged [`Response`]s back; every error becomes a failure response
//! with a human-readable reason, and a failed operation leaves the prior
//! state usable.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::draw::{ConditionedHeight, ConditionedSplit, DrawTree, NodeDetails};
use crate::error::{BccdError, Result};
use crate::estimate::{PointEstimator, NUM_HEIGHT_SAMPLES};
use crate::io;
use crate::model::Bccd;
use crate::tree::InputTree;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Parse NEXUS content into the session's posterior forest.
    #[serde(rename_all = "camelCase")]
    ParsePosteriorTrees { content: String },
    /// Build the model and the initial point estimate from the forest.
    BuildModel,
    #[serde(rename_all = "camelCase")]
    ConditionOnSplit { node_nr: usize, split_fingerprint: u64 },
    #[serde(rename_all = "camelCase")]
    RemoveSplitConditioning { clade_fingerprint: u64 },
    #[serde(rename_all = "camelCase")]
    ConditionOnHeight { node_nr: usize, height: f64 },
    #[serde(rename_all = "camelCase")]
    RemoveHeightConditioning { clade_fingerprint: u64 },
    /// Fetch the point estimate, active conditionings and optionally one
    /// node's details.
    #[serde(rename_all = "camelCase")]
    GetGlobalState { selected_node_nr: Option<usize> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    Ok,
    #[serde(rename_all = "camelCase")]
    Failure { reason: String },
    #[serde(rename_all = "camelCase")]
    GlobalState {
        /// `None` until the model has been built.
        point_estimate: Option<DrawTree>,
        conditioned_splits: Vec<ConditionedSplit>,
        conditioned_heights: Vec<ConditionedHeight>,
        selected_node_details: Option<NodeDetails>,
    },
}

/// One model session: parsed forest, fitted model, estimator.
pub struct Session {
    posterior_trees: Option<Vec<InputTree>>,
    estimator: Option<PointEstimator>,
    rng: StdRng,
    num_samples: usize,
}

impl Session {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// A fully deterministic session: fingerprints, sampling, everything.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Session { posterior_trees: None, estimator: None, rng, num_samples: NUM_HEIGHT_SAMPLES }
    }

    pub fn with_num_samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }

    pub fn handle(&mut self, request: Request) -> Response {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => Response::Failure { reason: e.to_string() },
        }
    }

    fn dispatch(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::ParsePosteriorTrees { content } => {
                let (_, trees) = io::parse_posterior_trees(&content, 0, 0, true)?;
                self.ingest_trees(trees);
                Ok(Response::Ok)
            }
            Request::BuildModel => {
                self.build_model()?;
                Ok(Response::Ok)
            }
            Request::ConditionOnSplit { node_nr, split_fingerprint } => {
                self.estimator_mut()?.condition_on_split(node_nr, split_fingerprint)?;
                Ok(Response::Ok)
            }
            Request::RemoveSplitConditioning { clade_fingerprint } => {
                self.estimator_mut()?.remove_split_conditioning(clade_fingerprint)?;
                Ok(Response::Ok)
            }
            Request::ConditionOnHeight { node_nr, height } => {
                self.estimator_mut()?.condition_on_height(node_nr, height)?;
                Ok(Response::Ok)
            }
            Request::RemoveHeightConditioning { clade_fingerprint } => {
                self.estimator_mut()?.remove_height_conditioning(clade_fingerprint)?;
                Ok(Response::Ok)
            }
            Request::GetGlobalState { selected_node_nr } => self.global_state(selected_node_nr),
        }
    }

    /// Stores an already-parsed forest, discarding any previous model.
    pub fn ingest_trees(&mut self, trees: Vec<InputTree>) {
        self.posterior_trees = Some(trees);
        self.estimator = None;
    }

    /// Fits the model and builds the initial point estimate.
    pub fn build_model(&mut self) -> Result<()> {
        let trees = self
            .posterior_trees
            .as_ref()
            .ok_or(BccdError::NotReady("parse the posterior trees before building the model"))?;
        let bccd = Bccd::from_forest(trees, &mut self.rng)?;
        let sampling_rng = StdRng::seed_from_u64(self.rng.random());
        self.estimator = Some(PointEstimator::with_num_samples(bccd, sampling_rng, self.num_samples)?);
        Ok(())
    }

    pub fn estimator(&self) -> Option<&PointEstimator> {
        self.estimator.as_ref()
    }

    pub fn num_trees(&self) -> usize {
        self.posterior_trees.as_ref().map_or(0, Vec::len)
    }

    fn estimator_mut(&mut self) -> Result<&mut PointEstimator> {
        self.estimator
            .as_mut()
            .ok_or(BccdError::NotReady("build the model before conditioning"))
    }

    fn global_state(&self, selected_node_nr: Option<usize>) -> Result<Response> {
        let Some(estimator) = &self.estimator else {
            return Ok(Response::GlobalState {
                point_estimate: None,
                conditioned_splits: Vec::new(),
                conditioned_heights: Vec::new(),
                selected_node_details: None,
            });
        };

        let selected_node_details = match selected_node_nr {
            Some(node_nr) => Some(estimator.node_details(node_nr)?),
            None => None,
        };

        Ok(Response::GlobalState {
            point_estimate: Some(estimator.point_estimate().clone()),
            conditioned_splits: estimator.active_split_conditionings(),
            conditioned_heights: estimator.active_height_conditionings(),
            selected_node_details,
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEXUS: &str = "#NEXUS\n\
        BEGIN TREES;\n\
        TREE STATE_0 = ((A:1.0,B:1.0):1.0,C:2.0);\n\
        TREE STATE_100 = ((A:1.0,B:1.0):1.0,C:2.0);\n\
        END;\n";

    fn parse_request(session: &mut Session) -> Response {
        session.handle(Request::ParsePosteriorTrees { content: NEXUS.to_string() })
    }

    #[test]
    fn conditioning_before_build_fails_gracefully() {
        let mut session = Session::with_seed(1).with_num_samples(50);
        let response =
            session.handle(Request::ConditionOnSplit { node_nr: 0, split_fingerprint: 1 });
        assert!(matches!(response, Response::Failure { .. }));

        // global state is still answerable, just empty
        let response = session.handle(Request::GetGlobalState { selected_node_nr: None });
        let Response::GlobalState { point_estimate, .. } = response else {
            panic!("expected global state");
        };
        assert!(point_estimate.is_none());
    }

    #[test]
    fn build_without_trees_fails_gracefully() {
        let mut session = Session::with_seed(1).with_num_samples(50);
        assert!(matches!(session.handle(Request::BuildModel), Response::Failure { .. }));
    }

    #[test]
    fn full_lifecycle_produces_a_point_estimate() {
        let mut session = Session::with_seed(7).with_num_samples(50);
        assert_eq!(parse_request(&mut session), Response::Ok);
        assert_eq!(session.num_trees(), 2);
        assert_eq!(session.handle(Request::BuildModel), Response::Ok);

        let root_nr = session.estimator().unwrap().point_estimate().root.nr();
        let response = session.handle(Request::GetGlobalState { selected_node_nr: Some(root_nr) });
        let Response::GlobalState { point_estimate, selected_node_details, .. } = response else {
            panic!("expected global state");
        };
        let tree = point_estimate.unwrap();
        assert_eq!(tree.root.num_leaves(), 3);
        assert!(selected_node_details.unwrap().chosen.is_some());
    }

    #[test]
    fn failed_conditioning_keeps_the_previous_estimate() {
        let mut session = Session::with_seed(7).with_num_samples(50);
        parse_request(&mut session);
        session.handle(Request::BuildModel);
        let before = session.estimator().unwrap().point_estimate().to_newick();

        let response =
            session.handle(Request::ConditionOnSplit { node_nr: 999, split_fingerprint: 1 });
        assert!(matches!(response, Response::Failure { .. }));
        assert_eq!(session.estimator().unwrap().point_estimate().to_newick(), before);
    }

    #[test]
    fn seeded_sessions_are_deterministic() {
        let newick_for = |seed: u64| {
            let mut session = Session::with_seed(seed).with_num_samples(50);
            parse_request(&mut session);
            session.handle(Request::BuildModel);
            session.estimator().unwrap().point_estimate().to_newick()
        };

        assert_eq!(newick_for(13), newick_for(13));
    }

    #[test]
    fn requests_use_a_tagged_wire_format() {
        let request = Request::ConditionOnSplit { node_nr: 6, split_fingerprint: 123 };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"conditionOnSplit","nodeNr":6,"splitFingerprint":123}"#);

        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }
}
