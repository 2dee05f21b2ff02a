use std::ops::Range;

use crate::error::{Error, Result};

/// Immutable description of a model's label topology and feature wiring.
///
/// Built once with [`FeatureMapConfig::new`] plus the `with_*` methods and
/// then handed to [`FeatureMap::new`](crate::model::FeatureMap::new), which
/// validates it. Label counts are over the full label set; for multi-state
/// topologies every label owns `num_states` chained sub-states and
/// `num_labs` counts the sub-states.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMapConfig {
    /// Total number of labels (sub-states included).
    pub num_labs: usize,
    /// Width of one feature row.
    pub num_ftrs: usize,
    /// Sub-states per label; 1 for a plain chain.
    pub num_states: usize,
    /// Feature indices scored against state weights.
    pub state_ftr_range: Range<usize>,
    /// Whether transitions are scored against feature values.
    pub use_trans_ftrs: bool,
    /// Feature indices scored against transition weights.
    pub trans_ftr_range: Range<usize>,
    pub use_state_bias: bool,
    pub use_trans_bias: bool,
    /// Value fed to the state bias weight (conventionally 1.0).
    pub state_bias_value: f64,
    pub trans_bias_value: f64,
    /// Longest admissible segment duration; 1 for frame-synchronous models.
    pub max_dur: usize,
    /// First index of the one-hot duration block inside a feature row.
    pub dur_ftr_start: usize,
    /// Distinct segment labels before duration expansion.
    pub num_actual_labs: usize,
}

impl FeatureMapConfig {
    /// Creates a frame-synchronous configuration: one state per label,
    /// every feature scored against state weights, biases enabled with
    /// value 1.0, no transition features, no duration model.
    pub fn new(num_labs: usize, num_ftrs: usize) -> Self {
        Self {
            num_labs,
            num_ftrs,
            num_states: 1,
            state_ftr_range: 0..num_ftrs,
            use_trans_ftrs: false,
            trans_ftr_range: 0..num_ftrs,
            use_state_bias: true,
            use_trans_bias: true,
            state_bias_value: 1.0,
            trans_bias_value: 1.0,
            max_dur: 1,
            dur_ftr_start: 0,
            num_actual_labs: num_labs,
        }
    }

    /// Customize the number of chained sub-states per label.
    pub fn with_num_states(mut self, num_states: usize) -> Self {
        self.num_states = num_states;
        self
    }

    /// Restrict the feature indices scored against state weights.
    pub fn with_state_ftr_range(mut self, range: Range<usize>) -> Self {
        self.state_ftr_range = range;
        self
    }

    /// Enable transition features over the given feature indices.
    pub fn with_trans_ftr_range(mut self, range: Range<usize>) -> Self {
        self.use_trans_ftrs = true;
        self.trans_ftr_range = range;
        self
    }

    pub fn with_state_bias(mut self, enabled: bool) -> Self {
        self.use_state_bias = enabled;
        self
    }

    pub fn with_trans_bias(mut self, enabled: bool) -> Self {
        self.use_trans_bias = enabled;
        self
    }

    pub fn with_state_bias_value(mut self, value: f64) -> Self {
        self.state_bias_value = value;
        self
    }

    pub fn with_trans_bias_value(mut self, value: f64) -> Self {
        self.trans_bias_value = value;
        self
    }

    /// Enable the segmental duration model with the given duration cap.
    pub fn with_max_dur(mut self, max_dur: usize) -> Self {
        self.max_dur = max_dur;
        self
    }

    pub fn with_dur_ftr_start(mut self, dur_ftr_start: usize) -> Self {
        self.dur_ftr_start = dur_ftr_start;
        self
    }

    pub fn with_num_actual_labs(mut self, num_actual_labs: usize) -> Self {
        self.num_actual_labs = num_actual_labs;
        self
    }

    /// Checks the configuration for fatal inconsistencies.
    ///
    /// # Errors
    /// `Error::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.num_labs == 0 {
            return Err(Error::config("label count must be positive"));
        }
        if self.num_ftrs == 0 {
            return Err(Error::config("feature width must be positive"));
        }
        if self.num_states == 0 {
            return Err(Error::config("state count per label must be positive"));
        }
        if self.num_labs % self.num_states != 0 {
            return Err(Error::config(format!(
                "label count {} is not divisible by {} states per label",
                self.num_labs, self.num_states
            )));
        }
        if self.state_ftr_range.is_empty() || self.state_ftr_range.end > self.num_ftrs {
            return Err(Error::config(format!(
                "state feature range {:?} is empty or exceeds the feature width {}",
                self.state_ftr_range, self.num_ftrs
            )));
        }
        if self.use_trans_ftrs
            && (self.trans_ftr_range.is_empty() || self.trans_ftr_range.end > self.num_ftrs)
        {
            return Err(Error::config(format!(
                "transition feature range {:?} is empty or exceeds the feature width {}",
                self.trans_ftr_range, self.num_ftrs
            )));
        }
        if self.max_dur == 0 {
            return Err(Error::config("maximum label duration must be positive"));
        }
        if self.num_actual_labs != self.num_labs {
            return Err(Error::config(format!(
                "weights are shared across durations; expected {} actual labels, found {}",
                self.num_labs, self.num_actual_labs
            )));
        }
        if self.max_dur > 1 && self.dur_ftr_start + self.max_dur > self.num_ftrs {
            return Err(Error::config(format!(
                "duration features [{}, {}) exceed the feature width {}",
                self.dur_ftr_start,
                self.dur_ftr_start + self.max_dur,
                self.num_ftrs
            )));
        }
        Ok(())
    }
}
