use crate::model::CrfModel;
use crate::nodes::{create_node, StateNode};

/// Growable arena of state nodes for one sequence.
///
/// Nodes are created through the factory on first use and recycled across
/// sequences: `set` hands position `idx` a fresh feature buffer without
/// reallocating the node unless the model topology changed. A node's
/// admissible predecessors always live at lower indices, so the buffer can
/// split-borrow itself to run the forward and backward recursions.
pub struct SeqBuffer {
    nodes: Vec<Box<dyn StateNode>>,
    count: usize,
}

impl SeqBuffer {
    pub fn new() -> Self {
        SeqBuffer {
            nodes: Vec::new(),
            count: 0,
        }
    }

    /// Number of positions filled for the current sequence.
    pub fn node_count(&self) -> usize {
        self.count
    }

    /// Installs position `idx`: recycles or creates the node, hands it the
    /// feature buffer and label, and derives its duration window from the
    /// model. Positions must be filled in order; `set(0, ..)` starts a new
    /// sequence.
    ///
    /// # Panics
    /// If `idx` skips past the end of the filled prefix.
    pub fn set(&mut self, idx: usize, ftr_buf: Vec<f32>, label: Option<u32>, model: &CrfModel) {
        assert!(
            idx <= self.nodes.len(),
            "position {idx} set before its predecessors"
        );
        let kind = model.node_kind();
        if idx == self.nodes.len() {
            self.nodes.push(create_node(model));
        } else if self.nodes[idx].kind() != kind {
            self.nodes[idx] = create_node(model);
        }
        let max_dur = model.max_dur();
        let node = &mut self.nodes[idx];
        node.reset(ftr_buf, label);
        node.set_prev_window(idx.min(max_dur), (idx + 1).min(max_dur));
        self.count = idx + 1;
    }

    /// # Panics
    /// If `idx` is outside the filled prefix.
    pub fn node(&self, idx: usize) -> &dyn StateNode {
        assert!(idx < self.count, "position {idx} not filled");
        &*self.nodes[idx]
    }

    /// # Panics
    /// If `idx` is outside the filled prefix.
    pub fn node_mut(&mut self, idx: usize) -> &mut dyn StateNode {
        assert!(idx < self.count, "position {idx} not filled");
        &mut *self.nodes[idx]
    }

    /// Runs the forward step at `idx`: the first-alpha seeding at position
    /// 0, otherwise the alpha recursion over the buffer prefix. Returns
    /// the scale.
    pub fn forward_at(&mut self, idx: usize, base: &[f64]) -> f64 {
        assert!(idx < self.count, "position {idx} not filled");
        if idx == 0 {
            return self.nodes[0].compute_first_alpha(base);
        }
        let (prefix, rest) = self.nodes.split_at_mut(idx);
        rest[0].compute_alpha(prefix[idx - 1].alpha(), prefix)
    }

    /// Fills position `idx`'s beta: the identity at the last position,
    /// otherwise computed by the successor node.
    pub fn backward_at(&mut self, idx: usize) {
        assert!(idx < self.count, "position {idx} not filled");
        if idx + 1 == self.count {
            self.nodes[idx].set_tail_beta();
            return;
        }
        let (left, right) = self.nodes.split_at_mut(idx + 1);
        let target = &mut left[idx];
        let scale = target.alpha_scale();
        right[0].compute_beta(target.beta_mut(), scale);
    }
}

impl Default for SeqBuffer {
    fn default() -> Self {
        Self::new()
    }
}
