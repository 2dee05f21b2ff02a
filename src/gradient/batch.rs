use log::debug;
use rayon::prelude::*;

use crate::error::Result;
use crate::gradient::{GradientBuilder, SeqStats};
use crate::model::CrfModel;
use crate::stream::FeatureStream;

/// Totals for one batch of sequences.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchStats {
    pub sequences: usize,
    pub frames: usize,
    pub cond_log_likelihood: f64,
}

/// Runs a gradient pass over every stream in parallel and adds the summed
/// gradient into `grad`.
///
/// Each worker scores its sequences with a private builder and a private
/// gradient vector; the partial vectors are merged sequentially, so the
/// result equals the same passes run one after another.
///
/// # Errors
/// The first error any sequence produces.
pub fn accumulate_batch<S>(
    model: &CrfModel,
    streams: &mut [S],
    grad: &mut [f64],
) -> Result<BatchStats>
where
    S: FeatureStream + Send,
{
    let num_funcs = grad.len();
    let per_seq: Vec<(SeqStats, Vec<f64>)> = streams
        .par_iter_mut()
        .map(|stream| {
            let mut builder = GradientBuilder::new(model);
            let mut local = vec![0.0; num_funcs];
            let stats = builder.build_gradient(model, stream, &mut local)?;
            Ok((stats, local))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut frames = 0;
    let mut cond_log_likelihood = 0.0;
    for (stats, local) in &per_seq {
        frames += stats.frames;
        cond_log_likelihood += stats.cond_log_likelihood();
        for (g, l) in grad.iter_mut().zip(local) {
            *g += l;
        }
    }
    debug!(
        "batch of {} sequences, {} frames: conditional log-likelihood {:.6}",
        per_seq.len(),
        frames,
        cond_log_likelihood
    );
    Ok(BatchStats {
        sequences: per_seq.len(),
        frames,
        cond_log_likelihood,
    })
}
