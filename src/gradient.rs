pub mod batch;

pub use batch::{accumulate_batch, BatchStats};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{CrfModel, NodeKind};
use crate::nodes::SeqBuffer;
use crate::stream::{FeatureStream, LAB_BAD};

/// Frames pulled from the stream per read call.
const READ_BUNCH: usize = 3;

/// Per-sequence result of a gradient pass.
///
/// `log_likelihood` is the unnormalized log-score of the reference path;
/// subtracting the partition function gives the conditional log-likelihood
/// a trainer maximizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeqStats {
    pub frames: usize,
    pub log_likelihood: f64,
    pub zx: f64,
}

impl SeqStats {
    pub fn cond_log_likelihood(&self) -> f64 {
        self.log_likelihood - self.zx
    }
}

/// Accumulates the conditional log-likelihood gradient of one sequence.
///
/// One pass runs the forward recursion over the stream, takes the
/// partition function at the tail, then walks backward computing beta and
/// the expected feature counts per position. The caller's gradient vector
/// receives empirical counts minus expectations, so repeated calls
/// accumulate across sequences.
pub struct GradientBuilder {
    buf: SeqBuffer,
    exp_f: Vec<f64>,
    alpha_base: Vec<f64>,
}

impl GradientBuilder {
    pub fn new(model: &CrfModel) -> Self {
        GradientBuilder {
            buf: SeqBuffer::new(),
            exp_f: vec![0.0; model.feature_map().num_ftr_funcs()],
            alpha_base: vec![0.0; model.num_labs()],
        }
    }

    /// Consumes `stream` to exhaustion and adds this sequence's gradient
    /// into `grad`.
    ///
    /// Frames labelled [`LAB_BAD`] contribute expectations but no
    /// empirical counts, so partially labelled sequences still train.
    ///
    /// # Errors
    /// `Error::Config` for a segmental model (segment scores have no chain
    /// backward pass; decode them through the lattice builder) and
    /// `Error::Stream` when the stream's shape does not fit the model.
    ///
    /// # Panics
    /// If `grad` is not sized to the feature-map layout.
    pub fn build_gradient(
        &mut self,
        model: &CrfModel,
        stream: &mut dyn FeatureStream,
        grad: &mut [f64],
    ) -> Result<SeqStats> {
        if model.node_kind() == NodeKind::Segment {
            return Err(Error::config(
                "segmental models are scored through the lattice builder",
            ));
        }
        let map = model.feature_map();
        if stream.num_ftrs() != map.num_ftrs() {
            return Err(Error::stream(format!(
                "stream serves {} features but the model scores {}",
                stream.num_ftrs(),
                map.num_ftrs()
            )));
        }
        if stream.labs_width() != 1 {
            return Err(Error::stream(format!(
                "chain gradients need one reference label per frame, stream has {}",
                stream.labs_width()
            )));
        }
        assert_eq!(
            grad.len(),
            map.num_ftr_funcs(),
            "gradient vector sized {} for a layout of {}",
            grad.len(),
            map.num_ftr_funcs()
        );
        self.exp_f.resize(map.num_ftr_funcs(), 0.0);
        self.exp_f.fill(0.0);
        self.alpha_base.resize(model.num_labs(), 0.0);

        let num_ftrs = stream.num_ftrs();
        let mut ftr_buf = vec![0.0f32; READ_BUNCH * num_ftrs];
        let mut lab_buf = vec![0u32; READ_BUNCH];
        let mut frames = 0;
        let mut scale_sum = 0.0;
        loop {
            let rows = stream.read(READ_BUNCH, &mut ftr_buf, &mut lab_buf)?;
            if rows == 0 {
                break;
            }
            for r in 0..rows {
                let row = ftr_buf[r * num_ftrs..(r + 1) * num_ftrs].to_vec();
                let label = match lab_buf[r] {
                    LAB_BAD => None,
                    lab => Some(lab),
                };
                self.buf.set(frames, row, label, model);
                self.buf.node_mut(frames).compute_trans_matrix(model);
                scale_sum += self.buf.forward_at(frames, &self.alpha_base);
                frames += 1;
            }
            if rows < READ_BUNCH {
                break;
            }
        }
        if frames == 0 {
            warn!("gradient pass over an empty sequence");
            return Ok(SeqStats {
                frames: 0,
                log_likelihood: 0.0,
                zx: 0.0,
            });
        }

        let zx = self.buf.node(frames - 1).compute_alpha_sum();
        let mut log_li = -scale_sum;
        for i in (0..frames).rev() {
            self.buf.backward_at(i);
            let prev_alpha = if i > 0 {
                Some(self.buf.node(i - 1).alpha())
            } else {
                None
            };
            let prev_lab = if i > 0 { self.buf.node(i - 1).label() } else { None };
            log_li += self.buf.node(i).compute_exp_f(
                model,
                &mut self.exp_f,
                grad,
                zx,
                prev_alpha,
                prev_lab,
            );
        }
        for (g, e) in grad.iter_mut().zip(&self.exp_f) {
            *g -= e;
        }
        debug!(
            "sequence of {} frames: reference score {:.6}, partition {:.6}",
            frames, log_li, zx
        );
        Ok(SeqStats {
            frames,
            log_likelihood: log_li,
            zx,
        })
    }
}
