use crate::error::Result;
use crate::model::config::FeatureMapConfig;

/// Maps (feature row, label pair) onto weight-vector indices and scores.
///
/// The weight vector is laid out in per-label blocks: for current label `c`
/// the block starts at `c * block_len` with the state feature weights, then
/// the state bias slot, then one transition sub-block per previous label
/// (transition feature weights followed by the transition bias slot).
/// The layout is fixed by the configuration; the map itself never touches
/// the weights, it only computes indices and dot products.
#[derive(Debug, Clone)]
pub struct FeatureMap {
    cfg: FeatureMapConfig,
    num_state_funcs: usize,
    num_trans_funcs: usize,
    block_len: usize,
    num_ftr_funcs: usize,
}

impl FeatureMap {
    /// Validates the configuration and freezes the weight layout.
    ///
    /// # Errors
    /// Propagates `Error::Config` from
    /// [`FeatureMapConfig::validate`](crate::model::FeatureMapConfig::validate).
    pub fn new(cfg: FeatureMapConfig) -> Result<Self> {
        cfg.validate()?;
        let num_state_funcs = cfg.state_ftr_range.len() + usize::from(cfg.use_state_bias);
        let trans_ftr_len = if cfg.use_trans_ftrs {
            cfg.trans_ftr_range.len()
        } else {
            0
        };
        let num_trans_funcs = trans_ftr_len + usize::from(cfg.use_trans_bias);
        let block_len = num_state_funcs + cfg.num_labs * num_trans_funcs;
        let num_ftr_funcs = cfg.num_labs * block_len;
        Ok(FeatureMap {
            cfg,
            num_state_funcs,
            num_trans_funcs,
            block_len,
            num_ftr_funcs,
        })
    }

    pub fn config(&self) -> &FeatureMapConfig {
        &self.cfg
    }

    /// Length of the weight vector this layout addresses.
    pub fn num_ftr_funcs(&self) -> usize {
        self.num_ftr_funcs
    }

    pub fn num_labs(&self) -> usize {
        self.cfg.num_labs
    }

    pub fn num_ftrs(&self) -> usize {
        self.cfg.num_ftrs
    }

    pub fn num_states(&self) -> usize {
        self.cfg.num_states
    }

    pub fn max_dur(&self) -> usize {
        self.cfg.max_dur
    }

    pub fn num_actual_labs(&self) -> usize {
        self.cfg.num_actual_labs
    }

    /// Weight index of the first state feature for label `c`.
    ///
    /// # Panics
    /// If `c` is out of range.
    pub fn state_base(&self, c: usize) -> usize {
        assert!(c < self.cfg.num_labs, "label {c} out of range");
        c * self.block_len
    }

    /// Weight index of the first transition feature for the pair `(p, c)`.
    ///
    /// # Panics
    /// If either label is out of range.
    pub fn trans_base(&self, p: usize, c: usize) -> usize {
        assert!(p < self.cfg.num_labs, "previous label {p} out of range");
        self.state_base(c) + self.num_state_funcs + p * self.num_trans_funcs
    }

    /// Dot product of the state weights for label `c` with one feature row.
    pub fn state_score(&self, lambda: &[f64], ftrs: &[f32], c: usize) -> f64 {
        let mut idx = self.state_base(c);
        let mut score = 0.0;
        for k in self.cfg.state_ftr_range.clone() {
            score += lambda[idx] * ftrs[k] as f64;
            idx += 1;
        }
        if self.cfg.use_state_bias {
            score += lambda[idx] * self.cfg.state_bias_value;
        }
        score
    }

    /// Transition score for the label pair `(p, c)` against one feature row.
    pub fn trans_score(&self, lambda: &[f64], ftrs: &[f32], p: usize, c: usize) -> f64 {
        let mut idx = self.trans_base(p, c);
        let mut score = 0.0;
        if self.cfg.use_trans_ftrs {
            for k in self.cfg.trans_ftr_range.clone() {
                score += lambda[idx] * ftrs[k] as f64;
                idx += 1;
            }
        }
        if self.cfg.use_trans_bias {
            score += lambda[idx] * self.cfg.trans_bias_value;
        }
        score
    }

    /// Accumulates the state-feature block for label `c`: adds
    /// `prob * f_k` into `exp_f`, and when `matched` adds `f_k` into `grad`
    /// and returns the reference-path score contribution
    /// `sum(lambda_k * f_k)` (0.0 otherwise).
    pub fn accumulate_state(
        &self,
        ftrs: &[f32],
        lambda: &[f64],
        c: usize,
        exp_f: &mut [f64],
        grad: &mut [f64],
        prob: f64,
        matched: bool,
    ) -> f64 {
        let mut idx = self.state_base(c);
        let mut log_li = 0.0;
        for k in self.cfg.state_ftr_range.clone() {
            let f = ftrs[k] as f64;
            exp_f[idx] += prob * f;
            if matched {
                grad[idx] += f;
                log_li += lambda[idx] * f;
            }
            idx += 1;
        }
        if self.cfg.use_state_bias {
            let f = self.cfg.state_bias_value;
            exp_f[idx] += prob * f;
            if matched {
                grad[idx] += f;
                log_li += lambda[idx] * f;
            }
        }
        log_li
    }

    /// Transition-block counterpart of
    /// [`accumulate_state`](Self::accumulate_state) for the pair `(p, c)`.
    pub fn accumulate_trans(
        &self,
        ftrs: &[f32],
        lambda: &[f64],
        p: usize,
        c: usize,
        exp_f: &mut [f64],
        grad: &mut [f64],
        prob: f64,
        matched: bool,
    ) -> f64 {
        let mut idx = self.trans_base(p, c);
        let mut log_li = 0.0;
        if self.cfg.use_trans_ftrs {
            for k in self.cfg.trans_ftr_range.clone() {
                let f = ftrs[k] as f64;
                exp_f[idx] += prob * f;
                if matched {
                    grad[idx] += f;
                    log_li += lambda[idx] * f;
                }
                idx += 1;
            }
        }
        if self.cfg.use_trans_bias {
            let f = self.cfg.trans_bias_value;
            exp_f[idx] += prob * f;
            if matched {
                grad[idx] += f;
                log_li += lambda[idx] * f;
            }
        }
        log_li
    }
}
