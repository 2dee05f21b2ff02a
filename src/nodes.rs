pub mod buffer;
pub mod frame;
pub mod nstate;
pub mod segment;

pub use buffer::SeqBuffer;
pub use frame::FrameNode;
pub use nstate::MultiStateNode;
pub use segment::SegmentNode;

use crate::model::{CrfModel, NodeKind};

/// One sequence position: owned feature rows, the reference label, and the
/// cached score matrices and forward/backward values for that position.
///
/// All recursions run in the log domain; the `scale` values threaded
/// through the forward and backward calls are always 0 there and exist for
/// the scaled linear-domain contract slot. Call order is `reset`,
/// `compute_trans_matrix`, forward (`compute_first_alpha` or
/// `compute_alpha`), then the backward family; violations panic rather
/// than return stale numbers.
pub trait StateNode {
    /// Topology this node was built for.
    fn kind(&self) -> NodeKind;

    /// Takes ownership of a new feature buffer and reference label,
    /// discarding every cached value from the previous occupant.
    fn reset(&mut self, ftr_buf: Vec<f32>, label: Option<u32>);

    /// Installs the per-position duration window (number of admissible
    /// predecessor positions and longest admissible duration). No-op for
    /// frame-synchronous nodes.
    fn set_prev_window(&mut self, _num_prev_nodes: usize, _node_max_dur: usize) {}

    /// Scores the owned feature rows against the model: per-label state
    /// values (one row per admissible duration for segment nodes) and the
    /// transition matrix. Disallowed transitions hold `LOG0`.
    fn compute_trans_matrix(&mut self, model: &CrfModel);

    /// Forward step for position 0: `alpha[c] = base[c] + state[c]`.
    /// Returns the scale.
    fn compute_first_alpha(&mut self, base: &[f64]) -> f64;

    /// Forward step for later positions. Chain nodes combine the previous
    /// position's alpha with this node's transition and state scores;
    /// segment nodes instead draw on `prev_nodes` (the buffer prefix, most
    /// recent last) for the alphas and boundary transition matrices of
    /// every admissible duration. Returns the scale.
    fn compute_alpha(&mut self, prev_alpha: &[f64], prev_nodes: &[Box<dyn StateNode>]) -> f64;

    /// Backward step: invoked on the node at position i+1, writes position
    /// i's beta into `result_beta`. `scale` is position i's alpha scale.
    fn compute_beta(&self, result_beta: &mut [f64], scale: f64);

    /// Seeds the backward recursion at the last position: beta is the
    /// identity (0 for every label).
    fn set_tail_beta(&mut self);

    /// Log-sum-exp of the cached alpha; the partition function Zx at the
    /// last position.
    fn compute_alpha_sum(&self) -> f64;

    /// Accumulates this position's model-expected feature counts into
    /// `exp_f` and the reference (empirical) counts into `grad`, and
    /// returns the position's contribution to the reference-path score.
    ///
    /// `prev_alpha` is `None` at position 0, where no transition is scored
    /// on either side; `prev_lab` is the predecessor's reference label
    /// (`None` when unknown, which suppresses only the empirical side).
    fn compute_exp_f(
        &self,
        model: &CrfModel,
        exp_f: &mut [f64],
        grad: &mut [f64],
        zx: f64,
        prev_alpha: Option<&[f64]>,
        prev_lab: Option<u32>,
    ) -> f64;

    fn alpha(&self) -> &[f64];

    fn beta(&self) -> &[f64];

    /// Backward-pass target storage, sized on first use.
    fn beta_mut(&mut self) -> &mut [f64];

    fn alpha_scale(&self) -> f64;

    fn label(&self) -> Option<u32>;

    fn ftr_buf(&self) -> &[f32];

    /// Labels addressable on this node's lattice states: the full label
    /// set for chain nodes, the actual (pre-duration-expansion) label set
    /// for segment nodes.
    fn num_avail_labs(&self) -> usize;

    /// Cached transition score into `cur_lab` from `prev_lab`.
    ///
    /// # Panics
    /// If scores were not computed or a label is out of range.
    fn trans_value(&self, prev_lab: usize, cur_lab: usize) -> f64;

    /// Cached state score of `cur_lab` (duration 1 for segment nodes).
    ///
    /// # Panics
    /// If scores were not computed or the label is out of range.
    fn state_value(&self, cur_lab: usize) -> f64;

    /// Cached state score of `cur_lab` at the given duration.
    ///
    /// # Panics
    /// If the duration exceeds this position's admissible window (chain
    /// nodes admit only duration 1).
    fn state_value_dur(&self, cur_lab: usize, dur: usize) -> f64 {
        assert_eq!(dur, 1, "duration {dur} on a frame-synchronous node");
        self.state_value(cur_lab)
    }

    /// Transition plus destination state score.
    fn full_trans_value(&self, prev_lab: usize, cur_lab: usize) -> f64 {
        self.trans_value(prev_lab, cur_lab) + self.state_value(cur_lab)
    }
}

/// Builds the node variant for the model's topology. The only place
/// concrete node types are chosen.
pub fn create_node(model: &CrfModel) -> Box<dyn StateNode> {
    match model.node_kind() {
        NodeKind::Frame => Box::new(FrameNode::new()),
        NodeKind::MultiState => Box::new(MultiStateNode::new()),
        NodeKind::Segment => Box::new(SegmentNode::new()),
    }
}
