use ndarray::Array2;

use crate::logmath::{log_add, log_sum, LOG0};
use crate::model::{CrfModel, NodeKind};
use crate::nodes::StateNode;

/// Chain node for models with `num_states` chained sub-states per label.
///
/// Legal transitions follow the left-to-right topology: every sub-state
/// may loop on itself, an interior sub-state is entered from its
/// predecessor in the same chain, and a chain is entered at its first
/// sub-state from any chain's last sub-state. Everything else scores
/// `LOG0` and is skipped by the recursions.
#[derive(Debug)]
pub struct MultiStateNode {
    ftr_buf: Vec<f32>,
    label: Option<u32>,
    num_states: usize,
    state_vals: Vec<f64>,
    trans: Array2<f64>,
    alpha: Vec<f64>,
    beta: Vec<f64>,
    alpha_scale: f64,
    scored: bool,
}

impl MultiStateNode {
    pub fn new() -> Self {
        MultiStateNode {
            ftr_buf: Vec::new(),
            label: None,
            num_states: 0,
            state_vals: Vec::new(),
            trans: Array2::from_elem((0, 0), LOG0),
            alpha: Vec::new(),
            beta: Vec::new(),
            alpha_scale: 0.0,
            scored: false,
        }
    }

    fn num_labs(&self) -> usize {
        assert!(self.scored, "scores not computed for this position");
        self.state_vals.len()
    }

    fn is_start(&self, c: usize) -> bool {
        c % self.num_states == 0
    }

    fn is_end(&self, c: usize) -> bool {
        c % self.num_states == self.num_states - 1
    }
}

impl Default for MultiStateNode {
    fn default() -> Self {
        Self::new()
    }
}

impl StateNode for MultiStateNode {
    fn kind(&self) -> NodeKind {
        NodeKind::MultiState
    }

    fn reset(&mut self, ftr_buf: Vec<f32>, label: Option<u32>) {
        self.ftr_buf = ftr_buf;
        self.label = label;
        self.state_vals.clear();
        self.alpha.clear();
        self.beta.clear();
        self.alpha_scale = 0.0;
        self.scored = false;
    }

    fn compute_trans_matrix(&mut self, model: &CrfModel) {
        let map = model.feature_map();
        let lambda = model.lambda();
        let n = map.num_labs();
        let ns = map.num_states();
        assert!(ns > 1, "multi-state node on a single-state model");
        assert_eq!(
            self.ftr_buf.len(),
            map.num_ftrs(),
            "feature row width does not match the model"
        );
        self.num_states = ns;
        self.state_vals.clear();
        for c in 0..n {
            let score = map.state_score(lambda, &self.ftr_buf, c);
            self.state_vals.push(score);
        }
        if self.trans.dim() != (n, n) {
            self.trans = Array2::from_elem((n, n), LOG0);
        } else {
            self.trans.fill(LOG0);
        }
        for c in 0..n {
            self.trans[[c, c]] = map.trans_score(lambda, &self.ftr_buf, c, c);
            if c % ns != 0 {
                self.trans[[c - 1, c]] = map.trans_score(lambda, &self.ftr_buf, c - 1, c);
            } else {
                for p in (ns - 1..n).step_by(ns) {
                    self.trans[[p, c]] = map.trans_score(lambda, &self.ftr_buf, p, c);
                }
            }
        }
        self.scored = true;
    }

    fn compute_first_alpha(&mut self, base: &[f64]) -> f64 {
        let n = self.num_labs();
        assert_eq!(base.len(), n, "alpha base length mismatch");
        self.alpha.clear();
        for c in 0..n {
            self.alpha.push(base[c] + self.state_vals[c]);
        }
        self.alpha_scale = 0.0;
        self.alpha_scale
    }

    fn compute_alpha(&mut self, prev_alpha: &[f64], _prev_nodes: &[Box<dyn StateNode>]) -> f64 {
        let n = self.num_labs();
        let ns = self.num_states;
        assert_eq!(prev_alpha.len(), n, "previous alpha length mismatch");
        self.alpha.clear();
        for c in 0..n {
            let mut acc = prev_alpha[c] + self.trans[[c, c]];
            if self.is_start(c) {
                for p in (ns - 1..n).step_by(ns) {
                    acc = log_add(acc, prev_alpha[p] + self.trans[[p, c]]);
                }
            } else {
                acc = log_add(acc, prev_alpha[c - 1] + self.trans[[c - 1, c]]);
            }
            self.alpha.push(acc + self.state_vals[c]);
        }
        self.alpha_scale = 0.0;
        self.alpha_scale
    }

    fn compute_beta(&self, result_beta: &mut [f64], _scale: f64) {
        let n = self.num_labs();
        let ns = self.num_states;
        assert_eq!(self.beta.len(), n, "backward pass has not reached this position");
        assert_eq!(result_beta.len(), n, "beta target length mismatch");
        for p in 0..n {
            let mut acc = self.trans[[p, p]] + self.state_vals[p] + self.beta[p];
            if self.is_end(p) {
                for c in (0..n).step_by(ns) {
                    acc = log_add(acc, self.trans[[p, c]] + self.state_vals[c] + self.beta[c]);
                }
            } else {
                acc = log_add(
                    acc,
                    self.trans[[p, p + 1]] + self.state_vals[p + 1] + self.beta[p + 1],
                );
            }
            result_beta[p] = acc;
        }
    }

    fn set_tail_beta(&mut self) {
        let n = self.num_labs();
        self.beta.clear();
        self.beta.resize(n, 0.0);
    }

    fn compute_alpha_sum(&self) -> f64 {
        assert!(!self.alpha.is_empty(), "forward pass has not run");
        log_sum(&self.alpha)
    }

    fn compute_exp_f(
        &self,
        model: &CrfModel,
        exp_f: &mut [f64],
        grad: &mut [f64],
        zx: f64,
        prev_alpha: Option<&[f64]>,
        prev_lab: Option<u32>,
    ) -> f64 {
        let n = self.num_labs();
        assert_eq!(self.alpha.len(), n, "forward pass has not run");
        assert_eq!(self.beta.len(), n, "backward pass has not run");
        let map = model.feature_map();
        let lambda = model.lambda();
        let mut log_li = 0.0;
        for c in 0..n {
            let gamma = (self.alpha[c] + self.beta[c] - zx).exp();
            let matched = self.label == Some(c as u32);
            log_li += map.accumulate_state(&self.ftr_buf, lambda, c, exp_f, grad, gamma, matched);
            if let Some(pa) = prev_alpha {
                for p in 0..n {
                    let t = self.trans[[p, c]];
                    if t == LOG0 {
                        continue;
                    }
                    let xi = (pa[p] + t + self.state_vals[c] + self.beta[c] - zx).exp();
                    let pair_matched = matched && prev_lab == Some(p as u32);
                    log_li += map.accumulate_trans(
                        &self.ftr_buf,
                        lambda,
                        p,
                        c,
                        exp_f,
                        grad,
                        xi,
                        pair_matched,
                    );
                }
            }
        }
        log_li
    }

    fn alpha(&self) -> &[f64] {
        &self.alpha
    }

    fn beta(&self) -> &[f64] {
        &self.beta
    }

    fn beta_mut(&mut self) -> &mut [f64] {
        if self.beta.is_empty() {
            let n = self.num_labs();
            self.beta.resize(n, 0.0);
        }
        &mut self.beta
    }

    fn alpha_scale(&self) -> f64 {
        self.alpha_scale
    }

    fn label(&self) -> Option<u32> {
        self.label
    }

    fn ftr_buf(&self) -> &[f32] {
        &self.ftr_buf
    }

    fn num_avail_labs(&self) -> usize {
        self.num_labs()
    }

    fn trans_value(&self, prev_lab: usize, cur_lab: usize) -> f64 {
        let n = self.num_labs();
        assert!(
            prev_lab < n && cur_lab < n,
            "label pair ({prev_lab}, {cur_lab}) out of range"
        );
        self.trans[[prev_lab, cur_lab]]
    }

    fn state_value(&self, cur_lab: usize) -> f64 {
        let n = self.num_labs();
        assert!(cur_lab < n, "label {cur_lab} out of range");
        self.state_vals[cur_lab]
    }
}
