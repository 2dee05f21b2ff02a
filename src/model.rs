pub mod config;
pub mod feature_map;
pub mod params;

pub use config::FeatureMapConfig;
pub use feature_map::FeatureMap;
pub use params::ParamStore;

use crate::error::{Error, Result};

/// Topology a state node is built for, derived from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// One state per label, frame-synchronous transitions.
    Frame,
    /// Chained sub-states per label, frame-synchronous transitions.
    MultiState,
    /// Duration-aware segment scoring.
    Segment,
}

/// A trained (or in-training) model: the feature-map layout plus the
/// parameter store it addresses.
#[derive(Debug, Clone)]
pub struct CrfModel {
    feature_map: FeatureMap,
    params: ParamStore,
}

impl CrfModel {
    /// Wraps a feature map with zero-initialized weights.
    pub fn new(feature_map: FeatureMap) -> Self {
        let params = ParamStore::new(feature_map.num_ftr_funcs());
        CrfModel {
            feature_map,
            params,
        }
    }

    /// Wraps a feature map with caller-supplied weights.
    ///
    /// # Errors
    /// `Error::Config` when the weight count does not match the layout.
    pub fn with_weights(feature_map: FeatureMap, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != feature_map.num_ftr_funcs() {
            return Err(Error::config(format!(
                "{} weights supplied for a layout of {}",
                weights.len(),
                feature_map.num_ftr_funcs()
            )));
        }
        Ok(CrfModel {
            feature_map,
            params: ParamStore::from_weights(weights),
        })
    }

    pub fn feature_map(&self) -> &FeatureMap {
        &self.feature_map
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    /// Optimizer boundary: the only mutable access to the weights.
    pub fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    pub fn lambda(&self) -> &[f64] {
        self.params.lambda()
    }

    pub fn num_labs(&self) -> usize {
        self.feature_map.num_labs()
    }

    pub fn num_actual_labs(&self) -> usize {
        self.feature_map.num_actual_labs()
    }

    pub fn num_states(&self) -> usize {
        self.feature_map.num_states()
    }

    pub fn max_dur(&self) -> usize {
        self.feature_map.max_dur()
    }

    /// Node variant the factory will build for this model.
    pub fn node_kind(&self) -> NodeKind {
        if self.max_dur() > 1 {
            NodeKind::Segment
        } else if self.num_states() > 1 {
            NodeKind::MultiState
        } else {
            NodeKind::Frame
        }
    }
}
