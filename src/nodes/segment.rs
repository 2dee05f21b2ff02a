use ndarray::Array2;

use crate::logmath::{log_add, log_sum, LOG0};
use crate::model::{CrfModel, NodeKind};
use crate::nodes::StateNode;

/// Duration-aware node for segmental models.
///
/// Owns one feature row per admissible duration ending at this position
/// (row `d-1` holds the duration-`d` segment features). State scores are
/// duration-tied over the actual label set: a segment's score comes from
/// the weight block of its actual label applied to that duration's row,
/// with duration itself carried by the one-hot block inside the row.
/// Boundary transition scores come from the duration-1 row of the node
/// where a segment starts. The reference label, when present, is
/// duration-encoded as `num_actual_labs * (dur - 1) + actual_lab`.
///
/// Segment nodes implement the forward family and the scoring accessors;
/// the chain backward entry points panic, as decoding and alignment for
/// segmental models go through the lattice builder.
#[derive(Debug)]
pub struct SegmentNode {
    ftr_buf: Vec<f32>,
    label: Option<u32>,
    node_max_dur: usize,
    num_prev_nodes: usize,
    state_vals: Array2<f64>,
    trans: Array2<f64>,
    alpha: Vec<f64>,
    alpha_scale: f64,
    scored: bool,
}

impl SegmentNode {
    pub fn new() -> Self {
        SegmentNode {
            ftr_buf: Vec::new(),
            label: None,
            node_max_dur: 0,
            num_prev_nodes: 0,
            state_vals: Array2::zeros((0, 0)),
            trans: Array2::from_elem((0, 0), LOG0),
            alpha: Vec::new(),
            alpha_scale: 0.0,
            scored: false,
        }
    }

    pub fn node_max_dur(&self) -> usize {
        self.node_max_dur
    }

    pub fn num_prev_nodes(&self) -> usize {
        self.num_prev_nodes
    }

    fn num_labs(&self) -> usize {
        assert!(self.scored, "scores not computed for this position");
        self.state_vals.ncols()
    }
}

impl Default for SegmentNode {
    fn default() -> Self {
        Self::new()
    }
}

impl StateNode for SegmentNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Segment
    }

    fn reset(&mut self, ftr_buf: Vec<f32>, label: Option<u32>) {
        self.ftr_buf = ftr_buf;
        self.label = label;
        self.node_max_dur = 0;
        self.num_prev_nodes = 0;
        self.alpha.clear();
        self.alpha_scale = 0.0;
        self.scored = false;
    }

    fn set_prev_window(&mut self, num_prev_nodes: usize, node_max_dur: usize) {
        assert!(node_max_dur >= 1, "duration window must admit duration 1");
        assert!(
            num_prev_nodes + 1 >= node_max_dur,
            "window admits duration {node_max_dur} with only {num_prev_nodes} predecessors"
        );
        self.num_prev_nodes = num_prev_nodes;
        self.node_max_dur = node_max_dur;
    }

    fn compute_trans_matrix(&mut self, model: &CrfModel) {
        let map = model.feature_map();
        let lambda = model.lambda();
        let n = map.num_actual_labs();
        let ns = map.num_states();
        let width = map.num_ftrs();
        assert!(self.node_max_dur >= 1, "duration window not installed");
        assert!(
            self.node_max_dur <= map.max_dur(),
            "duration window exceeds the model's duration cap"
        );
        assert_eq!(
            self.ftr_buf.len(),
            self.node_max_dur * width,
            "feature rows do not match the duration window"
        );
        self.state_vals = Array2::zeros((self.node_max_dur, n));
        for d in 1..=self.node_max_dur {
            let row = &self.ftr_buf[(d - 1) * width..d * width];
            for c in 0..n {
                self.state_vals[[d - 1, c]] = map.state_score(lambda, row, c);
            }
        }
        let boundary = &self.ftr_buf[..width];
        if self.trans.dim() != (n, n) {
            self.trans = Array2::from_elem((n, n), LOG0);
        } else {
            self.trans.fill(LOG0);
        }
        if ns > 1 {
            for c in 0..n {
                self.trans[[c, c]] = map.trans_score(lambda, boundary, c, c);
                if c % ns != 0 {
                    self.trans[[c - 1, c]] = map.trans_score(lambda, boundary, c - 1, c);
                } else {
                    for p in (ns - 1..n).step_by(ns) {
                        self.trans[[p, c]] = map.trans_score(lambda, boundary, p, c);
                    }
                }
            }
        } else {
            for p in 0..n {
                for c in 0..n {
                    self.trans[[p, c]] = map.trans_score(lambda, boundary, p, c);
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
            self.alpha.push(base[c] + self.state_vals[[0, c]]);
        }
        self.alpha_scale = 0.0;
        self.alpha_scale
    }

    fn compute_alpha(&mut self, _prev_alpha: &[f64], prev_nodes: &[Box<dyn StateNode>]) -> f64 {
        let n = self.num_labs();
        let len = prev_nodes.len();
        assert!(
            len >= self.num_prev_nodes,
            "buffer prefix shorter than the duration window"
        );
        self.alpha.clear();
        for c in 0..n {
            let mut acc = LOG0;
            for dur in 1..=self.node_max_dur {
                let sv = self.state_vals[[dur - 1, c]];
                if dur <= self.num_prev_nodes {
                    // Segment of this duration starts at the node dur-1
                    // positions back; its boundary transition matrix
                    // scores the entry.
                    let pa = prev_nodes[len - dur].alpha();
                    assert_eq!(pa.len(), n, "predecessor alpha length mismatch");
                    let mut entry = LOG0;
                    for p in 0..n {
                        let t = if dur == 1 {
                            self.trans[[p, c]]
                        } else {
                            prev_nodes[len - (dur - 1)].trans_value(p, c)
                        };
                        if t == LOG0 {
                            continue;
                        }
                        entry = log_add(entry, pa[p] + t);
                    }
                    acc = log_add(acc, entry + sv);
                } else {
                    // Utterance-initial segment spanning the whole prefix.
                    acc = log_add(acc, sv);
                }
            }
            self.alpha.push(acc);
        }
        self.alpha_scale = 0.0;
        self.alpha_scale
    }

    fn compute_beta(&self, _result_beta: &mut [f64], _scale: f64) {
        panic!("segment nodes do not implement the chain backward pass");
    }

    fn set_tail_beta(&mut self) {
        panic!("segment nodes do not implement the chain backward pass");
    }

    fn compute_alpha_sum(&self) -> f64 {
        assert!(!self.alpha.is_empty(), "forward pass has not run");
        log_sum(&self.alpha)
    }

    fn compute_exp_f(
        &self,
        _model: &CrfModel,
        _exp_f: &mut [f64],
        _grad: &mut [f64],
        _zx: f64,
        _prev_alpha: Option<&[f64]>,
        _prev_lab: Option<u32>,
    ) -> f64 {
        panic!("segment nodes do not implement the chain backward pass");
    }

    fn alpha(&self) -> &[f64] {
        &self.alpha
    }

    fn beta(&self) -> &[f64] {
        &[]
    }

    fn beta_mut(&mut self) -> &mut [f64] {
        panic!("segment nodes do not implement the chain backward pass");
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
        self.state_value_dur(cur_lab, 1)
    }

    fn state_value_dur(&self, cur_lab: usize, dur: usize) -> f64 {
        let n = self.num_labs();
        assert!(cur_lab < n, "label {cur_lab} out of range");
        assert!(
            dur >= 1 && dur <= self.node_max_dur,
            "duration {dur} outside this position's window of {}",
            self.node_max_dur
        );
        self.state_vals[[dur - 1, cur_lab]]
    }
}
