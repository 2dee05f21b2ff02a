use log::{debug, warn};

use crate::error::{Error, Result};
use crate::lattice::{Lattice, LatticeArc};
use crate::logmath::LOG0;
use crate::model::{CrfModel, NodeKind};
use crate::nodes::SeqBuffer;
use crate::stream::{FeatureStream, LAB_BAD};

/// Frames pulled per read when decoding frame-synchronous sequences.
const READ_BUNCH: usize = 3;

/// Result of one build: the decoding lattice, the reference-label
/// automaton when alignment was requested, and the frames consumed.
#[derive(Debug, Clone)]
pub struct LatticeBuild {
    pub lattice: Lattice,
    pub alignment: Option<Lattice>,
    pub frames: usize,
}

/// How boundary states connect to the previous position's segment states.
enum BoundaryWiring {
    /// Every previous label reaches every current label.
    AllPairs,
    /// Left-to-right sub-state chains: a chain-start label is entered
    /// from chain-end labels and itself, an interior label from its
    /// predecessor and itself.
    SubState,
}

/// Expands a sequence into a weighted acceptor over segment labels.
///
/// Each position contributes a layer of states: one boundary state per
/// label carrying the transition costs on epsilon in-arcs, then one
/// segment state per label whose in-arcs carry the segment score for
/// each candidate duration, labelled with the duration-encoded label.
/// Utterance-initial durations are wired from the lattice start state.
/// With `norm` the arcs into the final state carry the partition
/// function, so the costs of complete paths are normalized
/// log-probabilities and the lattice's path mass is one.
pub struct LatticeBuilder {
    buf: SeqBuffer,
    node_start_states: Vec<usize>,
    alpha_base: Vec<f64>,
}

impl LatticeBuilder {
    pub fn new(model: &CrfModel) -> Self {
        LatticeBuilder {
            buf: SeqBuffer::new(),
            node_start_states: Vec::new(),
            alpha_base: vec![0.0; model.num_labs()],
        }
    }

    /// Builds the duration-aware lattice for `stream`. Works for any
    /// topology; frame-synchronous models reduce to single-duration
    /// layers.
    ///
    /// # Errors
    /// `Error::Stream` when the stream's shape does not fit the model,
    /// `Error::InvalidInput` when the reference labels put two segments
    /// on one frame or `align` is requested without labels.
    pub fn build_lattice(
        &mut self,
        model: &CrfModel,
        stream: &mut dyn FeatureStream,
        align: bool,
        norm: bool,
    ) -> Result<LatticeBuild> {
        self.build_walk(model, stream, align, norm, BoundaryWiring::AllPairs)
    }

    /// [`build_lattice`](Self::build_lattice) with boundary arcs
    /// restricted to the legal sub-state chain moves of a multi-state
    /// model.
    pub fn build_nstate_lattice(
        &mut self,
        model: &CrfModel,
        stream: &mut dyn FeatureStream,
        align: bool,
        norm: bool,
    ) -> Result<LatticeBuild> {
        self.build_walk(model, stream, align, norm, BoundaryWiring::SubState)
    }

    fn build_walk(
        &mut self,
        model: &CrfModel,
        stream: &mut dyn FeatureStream,
        align: bool,
        norm: bool,
        wiring: BoundaryWiring,
    ) -> Result<LatticeBuild> {
        let map = model.feature_map();
        if stream.num_ftrs() != map.num_ftrs() {
            return Err(Error::stream(format!(
                "stream serves {} features but the model scores {}",
                stream.num_ftrs(),
                map.num_ftrs()
            )));
        }
        let labs_width = stream.labs_width();
        let max_dur = model.max_dur();
        if max_dur > 1 && labs_width > 0 && labs_width < 3 {
            return Err(Error::stream(
                "segmental decoding needs {label, begin, end} label triples",
            ));
        }
        if align && labs_width == 0 {
            return Err(Error::invalid_input(
                "alignment requested on an unlabelled stream",
            ));
        }
        let num_actual = model.num_actual_labs();
        let ns = model.num_states();

        let mut lat = Lattice::new();
        let start_state = lat.add_state();
        lat.set_start(start_state);
        let mut alignment = align.then(|| {
            let mut fst = Lattice::new();
            let s = fst.add_state();
            fst.set_start(s);
            fst
        });
        let mut aligner = AlignTracker::new();

        self.node_start_states.clear();
        self.alpha_base.resize(model.num_labs(), 0.0);
        let mut ftr_buf = vec![0.0f32; max_dur * map.num_ftrs()];
        let mut lab_buf = vec![0u32; max_dur * labs_width.max(1)];

        let mut frames = 0;
        let mut window = 1;
        loop {
            let rows = stream.read(window, &mut ftr_buf, &mut lab_buf)?;
            if rows == 0 {
                break;
            }
            let i = frames;
            let node_max = (i + 1).min(max_dur);
            let num_prev = i.min(max_dur);
            if rows != node_max {
                return Err(Error::stream(format!(
                    "stream served {rows} duration rows at position {i}, the model scores {node_max}"
                )));
            }

            let label = scan_reference_label(&lab_buf, rows, labs_width, num_actual)?;
            let ftrs = ftr_buf[..rows * map.num_ftrs()].to_vec();
            self.buf.set(i, ftrs, label, model);
            self.buf.node_mut(i).compute_trans_matrix(model);
            self.buf.forward_at(i, &self.alpha_base);

            if i == 0 {
                self.node_start_states.push(start_state + 1);
            }
            let mut num_new = 0;

            // Boundary states: transition costs into each label at this
            // position. The first position starts fresh and has none.
            if num_prev > 0 {
                let prev_avail = self.buf.node(i - 1).num_avail_labs();
                assert_eq!(
                    prev_avail, num_actual,
                    "previous position offers {prev_avail} labels, expected {num_actual}"
                );
                // The layer for position 0 has no boundary states to skip.
                let prev_seg_start = if i == 1 {
                    self.node_start_states[i - 1]
                } else {
                    self.node_start_states[i - 1] + prev_avail
                };
                for lab in 0..num_actual {
                    let cur_state = lat.add_state();
                    num_new += 1;
                    let node = self.buf.node(i);
                    match wiring {
                        BoundaryWiring::AllPairs => {
                            for prev_lab in 0..prev_avail {
                                let w = -node.trans_value(prev_lab, lab);
                                lat.add_arc(
                                    prev_seg_start + prev_lab,
                                    LatticeArc::epsilon(w, cur_state),
                                );
                            }
                        }
                        BoundaryWiring::SubState => {
                            if lab % ns == 0 {
                                let mut prev_lab = ns - 1;
                                while prev_lab < prev_avail {
                                    let w = -node.trans_value(prev_lab, lab);
                                    lat.add_arc(
                                        prev_seg_start + prev_lab,
                                        LatticeArc::epsilon(w, cur_state),
                                    );
                                    prev_lab += ns;
                                }
                                if ns > 1 {
                                    let w = -node.trans_value(lab, lab);
                                    lat.add_arc(
                                        prev_seg_start + lab,
                                        LatticeArc::epsilon(w, cur_state),
                                    );
                                }
                            } else {
                                for prev_lab in [lab - 1, lab] {
                                    let w = -node.trans_value(prev_lab, lab);
                                    lat.add_arc(
                                        prev_seg_start + prev_lab,
                                        LatticeArc::epsilon(w, cur_state),
                                    );
                                }
                            }
                        }
                    }
                }
            }

            // Segment states: one per label, in-arcs per candidate
            // duration from the boundary state of the position the
            // segment starts at.
            for lab in 0..num_actual {
                let cur_state = lat.add_state();
                num_new += 1;
                let node = self.buf.node(i);
                let mut enc_lab = lab;
                for dur in 1..=node_max {
                    let w = -node.state_value_dur(lab, dur);
                    let arc = LatticeArc::new(enc_lab + 1, enc_lab + 1, w, cur_state);
                    if dur <= num_prev {
                        let prev_state = self.node_start_states[i - dur + 1] + lab;
                        lat.add_arc(prev_state, arc);
                    } else {
                        lat.add_arc(start_state, arc);
                    }
                    enc_lab += num_actual;
                }
            }
            self.node_start_states.push(self.node_start_states[i] + num_new);

            if let Some(fst) = alignment.as_mut() {
                aligner.observe(fst, label);
            }

            frames += 1;
            if window < max_dur {
                window += 1;
            }
        }

        if frames == 0 {
            warn!("lattice build over an empty sequence");
            return Ok(LatticeBuild {
                lattice: lat,
                alignment,
                frames: 0,
            });
        }

        let zx_cost = if norm {
            self.buf.node(frames - 1).compute_alpha_sum()
        } else {
            0.0
        };
        let final_state = lat.add_state();
        let last_avail = self.buf.node(frames - 1).num_avail_labs();
        let last_seg_start = if frames == 1 {
            self.node_start_states[frames - 1]
        } else {
            self.node_start_states[frames - 1] + last_avail
        };
        for prev_lab in 0..last_avail {
            lat.add_arc(
                last_seg_start + prev_lab,
                LatticeArc::epsilon(zx_cost, final_state),
            );
        }
        lat.set_final(final_state, 0.0);
        if let Some(fst) = alignment.as_mut() {
            aligner.finish(fst);
        }
        debug!(
            "built lattice over {} frames: {} states, {} arcs",
            frames,
            lat.num_states(),
            lat.num_arcs()
        );
        Ok(LatticeBuild {
            lattice: lat,
            alignment,
            frames,
        })
    }

    /// Builds the compact frame-synchronous lattice: one state per
    /// (position, label), arcs carrying the combined transition and
    /// state cost.
    ///
    /// # Errors
    /// `Error::Config` for a segmental model, `Error::Stream` or
    /// `Error::InvalidInput` as for
    /// [`build_lattice`](Self::build_lattice).
    pub fn build_frame_lattice(
        &mut self,
        model: &CrfModel,
        stream: &mut dyn FeatureStream,
        align: bool,
        norm: bool,
    ) -> Result<LatticeBuild> {
        if model.node_kind() == NodeKind::Segment {
            return Err(Error::config(
                "segmental models need the duration-aware lattice walk",
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
        let labs_width = stream.labs_width();
        if labs_width > 1 {
            return Err(Error::stream(
                "frame decoding reads at most one label word per frame",
            ));
        }
        if align && labs_width == 0 {
            return Err(Error::invalid_input(
                "alignment requested on an unlabelled stream",
            ));
        }
        let num_labs = model.num_labs();
        let num_ftrs = map.num_ftrs();

        let mut lat = Lattice::new();
        let start_state = lat.add_state();
        lat.set_start(start_state);
        let mut alignment = align.then(|| {
            let mut fst = Lattice::new();
            let s = fst.add_state();
            fst.set_start(s);
            fst
        });
        let mut aligner = AlignTracker::new();

        self.alpha_base.resize(num_labs, 0.0);
        let mut ftr_buf = vec![0.0f32; READ_BUNCH * num_ftrs];
        let mut lab_buf = vec![0u32; READ_BUNCH];

        let mut frames = 0;
        loop {
            let rows = stream.read(READ_BUNCH, &mut ftr_buf, &mut lab_buf)?;
            if rows == 0 {
                break;
            }
            for r in 0..rows {
                let i = frames;
                let label = if labs_width == 0 {
                    None
                } else {
                    match lab_buf[r] {
                        LAB_BAD => None,
                        lab => Some(lab),
                    }
                };
                let row = ftr_buf[r * num_ftrs..(r + 1) * num_ftrs].to_vec();
                self.buf.set(i, row, label, model);
                self.buf.node_mut(i).compute_trans_matrix(model);
                self.buf.forward_at(i, &self.alpha_base);

                let node = self.buf.node(i);
                if i == 0 {
                    for lab in 0..num_labs {
                        let w = -node.state_value(lab);
                        let cur_state = lat.add_state();
                        lat.add_arc(start_state, LatticeArc::new(lab + 1, lab + 1, w, cur_state));
                    }
                } else {
                    for lab in 0..num_labs {
                        let cur_state = lat.add_state();
                        for prev_lab in 0..num_labs {
                            if node.trans_value(prev_lab, lab) == LOG0 {
                                continue;
                            }
                            let w = -node.full_trans_value(prev_lab, lab);
                            let prev_state = 1 + (i - 1) * num_labs + prev_lab;
                            lat.add_arc(
                                prev_state,
                                LatticeArc::new(lab + 1, lab + 1, w, cur_state),
                            );
                        }
                    }
                }
                if let Some(fst) = alignment.as_mut() {
                    aligner.observe(fst, label);
                }
                frames += 1;
            }
            if rows < READ_BUNCH {
                break;
            }
        }

        if frames == 0 {
            warn!("lattice build over an empty sequence");
            return Ok(LatticeBuild {
                lattice: lat,
                alignment,
                frames: 0,
            });
        }

        let zx_cost = if norm {
            self.buf.node(frames - 1).compute_alpha_sum()
        } else {
            0.0
        };
        let final_state = lat.add_state();
        for prev_lab in 0..num_labs {
            let prev_state = 1 + (frames - 1) * num_labs + prev_lab;
            lat.add_arc(prev_state, LatticeArc::epsilon(zx_cost, final_state));
        }
        lat.set_final(final_state, 0.0);
        if let Some(fst) = alignment.as_mut() {
            aligner.finish(fst);
        }
        debug!(
            "built frame lattice over {} frames: {} states, {} arcs",
            frames,
            lat.num_states(),
            lat.num_arcs()
        );
        Ok(LatticeBuild {
            lattice: lat,
            alignment,
            frames,
        })
    }
}

/// Builds the reference-label automaton: one state per run of equal
/// labels, entered by a labelled arc and kept by a labelled self-loop.
/// Unlabelled positions extend the current run.
struct AlignTracker {
    state: usize,
    lab: usize,
    first: bool,
}

impl AlignTracker {
    fn new() -> Self {
        AlignTracker {
            state: 0,
            lab: 0,
            first: true,
        }
    }

    fn observe(&mut self, fst: &mut Lattice, label: Option<u32>) {
        if let Some(lab) = label {
            let arc_lab = lab as usize + 1;
            if self.first || arc_lab != self.lab {
                let prev = self.state;
                self.state = fst.add_state();
                fst.add_arc(prev, LatticeArc::new(arc_lab, arc_lab, 0.0, self.state));
                fst.add_arc(self.state, LatticeArc::new(arc_lab, arc_lab, 0.0, self.state));
                self.first = false;
                self.lab = arc_lab;
            }
        }
    }

    fn finish(&self, fst: &mut Lattice) {
        fst.set_final(self.state, 0.0);
    }
}

/// Reads the reference label out of one read's label rows.
///
/// Frame streams carry one label word; segmental streams carry a
/// `{label, begin, end}` triple per duration row, and the one matching
/// row (if any) yields the duration-encoded label
/// `actual + (dur - 1) * num_actual`.
fn scan_reference_label(
    lab_buf: &[u32],
    rows: usize,
    labs_width: usize,
    num_actual: usize,
) -> Result<Option<u32>> {
    if labs_width == 0 {
        return Ok(None);
    }
    if labs_width < 3 {
        return Ok(match lab_buf[0] {
            LAB_BAD => None,
            lab => Some(lab),
        });
    }
    let mut label = None;
    for d in 1..=rows {
        let row = &lab_buf[(d - 1) * labs_width..d * labs_width];
        if row[0] == LAB_BAD {
            continue;
        }
        let begin = row[1] as usize;
        let end = row[2] as usize;
        if end + 1 != begin + d {
            return Err(Error::stream(format!(
                "reference span [{begin}, {end}] does not fit duration row {d}"
            )));
        }
        if label.is_some() {
            return Err(Error::invalid_input(
                "two valid labels found for the same frame",
            ));
        }
        label = Some((num_actual * (d - 1)) as u32 + row[0]);
    }
    Ok(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logmath::log_sum;
    use crate::model::{FeatureMap, FeatureMapConfig};
    use crate::stream::{SegmentSliceStream, SliceFeatureStream};
    use approx::assert_relative_eq;

    fn frame_model() -> CrfModel {
        let map = FeatureMap::new(FeatureMapConfig::new(2, 1)).unwrap();
        let w = vec![0.2, -0.1, 0.3, 0.05, -0.4, 0.25, 0.15, 0.35];
        CrfModel::with_weights(map, w).unwrap()
    }

    fn frame_paths(model: &CrfModel, frames: &[f32]) -> Vec<(Vec<usize>, f64)> {
        let map = model.feature_map();
        let lambda = model.lambda();
        let n = model.num_labs();
        let mut paths = vec![(Vec::new(), 0.0)];
        for (t, f) in frames.iter().enumerate() {
            let mut next = Vec::new();
            for (labs, score) in &paths {
                for c in 0..n {
                    let mut s = *score + map.state_score(lambda, &[*f], c);
                    if t > 0 {
                        s += map.trans_score(lambda, &[], labs[t - 1], c);
                    }
                    let mut labs = labs.clone();
                    labs.push(c);
                    next.push((labs, s));
                }
            }
            paths = next;
        }
        paths
    }

    fn best_of(paths: &[(Vec<usize>, f64)]) -> (&[usize], f64) {
        let mut best = &paths[0];
        for p in paths {
            if p.1 > best.1 {
                best = p;
            }
        }
        (&best.0, best.1)
    }

    #[test]
    fn test_frame_lattice_matches_exhaustive_viterbi() {
        let model = frame_model();
        let frames = vec![0.5f32, 1.0, -0.3];
        let mut stream =
            SliceFeatureStream::new(frames.clone(), vec![LAB_BAD; 3], 1).unwrap();
        let mut builder = LatticeBuilder::new(&model);

        let build = builder
            .build_frame_lattice(&model, &mut stream, false, false)
            .unwrap();
        assert_eq!(build.frames, 3);
        let path = build.lattice.shortest_path().unwrap();

        let paths = frame_paths(&model, &frames);
        let (best_labs, best_score) = best_of(&paths);
        assert_relative_eq!(path.cost, -best_score, max_relative = 1e-12);
        assert_eq!(path.output_labels(), best_labs);
    }

    #[test]
    fn test_normalized_frame_lattice_has_unit_mass() {
        let model = frame_model();
        let frames = vec![0.5f32, 1.0, -0.3];
        let mut stream =
            SliceFeatureStream::new(frames.clone(), vec![LAB_BAD; 3], 1).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let build = builder
            .build_frame_lattice(&model, &mut stream, false, true)
            .unwrap();
        assert_relative_eq!(
            build.lattice.path_mass().unwrap(),
            0.0,
            epsilon = 1e-10
        );

        // The normalized best-path cost is the negated log-probability.
        let scores: Vec<f64> = frame_paths(&model, &frames)
            .iter()
            .map(|(_, s)| *s)
            .collect();
        let zx = log_sum(&scores);
        let best = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let path = build.lattice.shortest_path().unwrap();
        assert_relative_eq!(path.cost, zx - best, max_relative = 1e-10);
    }

    #[test]
    fn test_two_arc_walk_agrees_with_frame_lattice() {
        let model = frame_model();
        let frames = vec![0.5f32, 1.0, -0.3];
        let mut stream =
            SliceFeatureStream::new(frames, vec![LAB_BAD; 3], 1).unwrap();
        let mut builder = LatticeBuilder::new(&model);

        let compact = builder
            .build_frame_lattice(&model, &mut stream, false, false)
            .unwrap();
        stream.rewind();
        let layered = builder
            .build_lattice(&model, &mut stream, false, false)
            .unwrap();

        let a = compact.lattice.shortest_path().unwrap();
        let b = layered.lattice.shortest_path().unwrap();
        assert_relative_eq!(a.cost, b.cost, max_relative = 1e-12);
        assert_eq!(a.output_labels(), b.output_labels());
    }

    fn seg_model() -> CrfModel {
        let cfg = FeatureMapConfig::new(2, 4)
            .with_max_dur(2)
            .with_dur_ftr_start(2)
            .with_state_bias(false);
        let map = FeatureMap::new(cfg).unwrap();
        let mut w = vec![0.0; map.num_ftr_funcs()];
        w[0] = 1.0; // label 0 reads the first pooled feature
        w[3] = 0.7; // and rewards duration 2
        w[7] = 1.0; // label 1 reads the second pooled feature
        w[8] = -0.2; // and penalizes duration 1
        w[4] = 0.1;
        w[5] = 0.2;
        w[10] = 0.3;
        w[11] = 0.4;
        CrfModel::with_weights(map, w).unwrap()
    }

    /// Mean-pooled features plus the one-hot duration block, as the
    /// segment stream serves them.
    fn pooled_row(frames: &[[f32; 2]], begin: usize, end: usize, max_dur: usize) -> Vec<f32> {
        let mut row = vec![0.0f32; 2 + max_dur];
        for f in &frames[begin..=end] {
            row[0] += f[0];
            row[1] += f[1];
        }
        let dur = end - begin + 1;
        row[0] /= dur as f32;
        row[1] /= dur as f32;
        row[2 + dur - 1] = 1.0;
        row
    }

    /// Every (segmentation, labelling) of the sequence with durations
    /// up to 2, with its log score.
    fn seg_paths(model: &CrfModel, frames: &[[f32; 2]]) -> Vec<(Vec<(usize, usize)>, f64)> {
        let map = model.feature_map();
        let lambda = model.lambda();
        let compositions: Vec<Vec<usize>> = vec![vec![1, 1, 1], vec![1, 2], vec![2, 1]];
        let mut out = Vec::new();
        for comp in &compositions {
            let segs = comp.len();
            for mask in 0..(1usize << segs) {
                let mut labs = Vec::new();
                for s in 0..segs {
                    labs.push((mask >> s) & 1);
                }
                let mut score = 0.0;
                let mut begin = 0;
                let mut path = Vec::new();
                for (s, (&dur, &lab)) in comp.iter().zip(&labs).enumerate() {
                    let end = begin + dur - 1;
                    let row = pooled_row(frames, begin, end, 2);
                    score += map.state_score(lambda, &row, lab);
                    if s > 0 {
                        score += map.trans_score(lambda, &[], labs[s - 1], lab);
                    }
                    path.push((lab, dur));
                    begin = end + 1;
                }
                out.push((path, score));
            }
        }
        out
    }

    #[test]
    fn test_segmental_lattice_matches_enumeration() {
        let model = seg_model();
        let frames = [[0.3f32, -0.1], [0.5, 0.2], [-0.2, 0.6]];
        let flat: Vec<f32> = frames.iter().flatten().copied().collect();
        let mut stream = SegmentSliceStream::new(flat, 2, 2, Vec::new()).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let build = builder
            .build_lattice(&model, &mut stream, false, false)
            .unwrap();
        assert_eq!(build.frames, 3);

        let paths = seg_paths(&model, &frames);
        let mut best = &paths[0];
        for p in &paths {
            if p.1 > best.1 {
                best = p;
            }
        }
        let lat_path = build.lattice.shortest_path().unwrap();
        assert_relative_eq!(lat_path.cost, -best.1, max_relative = 1e-12);

        // Output labels carry the duration encoding.
        let expected: Vec<usize> = best.0.iter().map(|&(lab, dur)| lab + (dur - 1) * 2).collect();
        assert_eq!(lat_path.output_labels(), expected);

        // No arc offers a segment longer than the duration window.
        for s in 0..build.lattice.num_states() {
            for arc in build.lattice.arcs(s) {
                assert!(arc.olabel <= 2 * model.max_dur());
            }
        }
    }

    #[test]
    fn test_normalized_segmental_lattice_has_unit_mass() {
        let model = seg_model();
        let frames = [[0.3f32, -0.1], [0.5, 0.2], [-0.2, 0.6]];
        let flat: Vec<f32> = frames.iter().flatten().copied().collect();
        let mut stream = SegmentSliceStream::new(flat, 2, 2, Vec::new()).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let build = builder
            .build_lattice(&model, &mut stream, false, true)
            .unwrap();
        assert_relative_eq!(build.lattice.path_mass().unwrap(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_overlapping_reference_segments_are_rejected() {
        let model = seg_model();
        let frames = vec![0.3f32, -0.1, 0.5, 0.2, -0.2, 0.6];
        // Both a duration-2 and a duration-1 segment end at frame 1.
        let segments = vec![(0, 0, 1), (1, 1, 1)];
        let mut stream = SegmentSliceStream::new(frames, 2, 2, segments).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let err = builder
            .build_lattice(&model, &mut stream, false, false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    fn deep_seg_model() -> CrfModel {
        let cfg = FeatureMapConfig::new(2, 5)
            .with_max_dur(3)
            .with_dur_ftr_start(2)
            .with_state_bias(false);
        let map = FeatureMap::new(cfg).unwrap();
        let w: Vec<f64> = (0..map.num_ftr_funcs())
            .map(|i| 0.05 * ((i * 7 % 11) as f64) - 0.2)
            .collect();
        CrfModel::with_weights(map, w).unwrap()
    }

    #[test]
    fn test_segment_durations_bounded_by_position() {
        let model = deep_seg_model();
        let flat: Vec<f32> = (0..10).map(|i| 0.1 * i as f32 - 0.4).collect();
        let mut stream = SegmentSliceStream::new(flat, 2, 3, Vec::new()).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let build = builder
            .build_lattice(&model, &mut stream, false, false)
            .unwrap();
        assert_eq!(build.frames, 5);

        // Labelled arcs end in segment states: 1..=2 at position 0, then
        // the back half of each boundary/segment layer of four.
        let lat = &build.lattice;
        let mut capped = 0;
        for s in 0..lat.num_states() {
            for arc in lat.arcs(s) {
                if arc.olabel == 0 {
                    continue;
                }
                let dur = (arc.olabel - 1) / 2 + 1;
                let pos = match arc.nextstate {
                    1 | 2 => 0,
                    t => {
                        assert!((t - 3) % 4 >= 2, "labelled arc into a boundary state");
                        (t - 3) / 4 + 1
                    }
                };
                assert!(
                    dur <= (pos + 1).min(3),
                    "duration {dur} segment ends at position {pos}"
                );
                if dur == 3 {
                    capped += 1;
                }
            }
        }
        // Positions 2..=4 each admit both labels at the duration cap.
        assert_eq!(capped, 6);
    }

    fn nstate_model() -> CrfModel {
        let map = FeatureMap::new(FeatureMapConfig::new(4, 1).with_num_states(2)).unwrap();
        let w: Vec<f64> = (0..map.num_ftr_funcs())
            .map(|i| 0.1 * ((i * 5 % 13) as f64) / 13.0 - 0.04)
            .collect();
        CrfModel::with_weights(map, w).unwrap()
    }

    fn legal(p: usize, c: usize, ns: usize) -> bool {
        p == c || (c % ns != 0 && p == c - 1) || (c % ns == 0 && p % ns == ns - 1)
    }

    #[test]
    fn test_nstate_lattice_matches_legal_path_viterbi() {
        let model = nstate_model();
        let frames = vec![0.4f32, -0.7, 0.2];
        let mut stream =
            SliceFeatureStream::new(frames.clone(), vec![LAB_BAD; 3], 1).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let build = builder
            .build_nstate_lattice(&model, &mut stream, false, false)
            .unwrap();

        let map = model.feature_map();
        let lambda = model.lambda();
        let n = model.num_labs();
        let mut best = f64::NEG_INFINITY;
        for l0 in 0..n {
            for l1 in 0..n {
                if !legal(l0, l1, 2) {
                    continue;
                }
                for l2 in 0..n {
                    if !legal(l1, l2, 2) {
                        continue;
                    }
                    let s = map.state_score(lambda, &frames[0..1], l0)
                        + map.trans_score(lambda, &[], l0, l1)
                        + map.state_score(lambda, &frames[1..2], l1)
                        + map.trans_score(lambda, &[], l1, l2)
                        + map.state_score(lambda, &frames[2..3], l2);
                    if s > best {
                        best = s;
                    }
                }
            }
        }
        let path = build.lattice.shortest_path().unwrap();
        assert_relative_eq!(path.cost, -best, max_relative = 1e-12);

        // Restricting the boundary wiring prunes arcs but keeps the
        // state layout.
        stream.rewind();
        let all_pairs = builder
            .build_lattice(&model, &mut stream, false, false)
            .unwrap();
        assert_eq!(build.lattice.num_states(), all_pairs.lattice.num_states());
        assert_eq!(build.lattice.num_arcs(), 36);
        assert_eq!(all_pairs.lattice.num_arcs(), 48);
    }

    #[test]
    fn test_normalized_nstate_lattice_has_unit_mass() {
        let model = nstate_model();
        let mut stream =
            SliceFeatureStream::new(vec![0.4f32, -0.7, 0.2], vec![LAB_BAD; 3], 1).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let build = builder
            .build_nstate_lattice(&model, &mut stream, false, true)
            .unwrap();
        assert_relative_eq!(build.lattice.path_mass().unwrap(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_frame_lattice_skips_masked_transitions() {
        let model = nstate_model();
        let mut stream =
            SliceFeatureStream::new(vec![0.4f32, -0.7], vec![LAB_BAD; 2], 1).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let build = builder
            .build_frame_lattice(&model, &mut stream, false, false)
            .unwrap();

        let lat = &build.lattice;
        for s in 0..lat.num_states() {
            for arc in lat.arcs(s) {
                assert!(arc.weight.is_finite());
            }
        }
        // Arcs out of the first position follow the sub-state chain.
        for prev_lab in 0..4 {
            for arc in lat.arcs(1 + prev_lab) {
                let lab = arc.olabel - 1;
                assert!(legal(prev_lab, lab, 2), "({prev_lab}, {lab}) is masked");
            }
        }
        // 4 start arcs, 10 legal transitions, 4 final arcs.
        assert_eq!(lat.num_arcs(), 18);
    }

    #[test]
    fn test_alignment_automaton_from_label_runs() {
        let model = frame_model();
        let frames = vec![0.1f32, 0.2, 0.3, 0.4, 0.5];
        let labels = vec![0u32, 0, 1, 1, 1];
        let mut stream = SliceFeatureStream::new(frames, labels, 1).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let build = builder
            .build_frame_lattice(&model, &mut stream, true, false)
            .unwrap();
        let fst = build.alignment.unwrap();

        // Start plus one state per run.
        assert_eq!(fst.num_states(), 3);
        assert_eq!(fst.start(), Some(0));
        assert_eq!(fst.arcs(0).len(), 1);
        assert_eq!(fst.arcs(0)[0].olabel, 1);
        assert_eq!(fst.arcs(1).len(), 2);
        assert_eq!(fst.arcs(1)[0].nextstate, 1); // self loop
        assert_eq!(fst.arcs(1)[1].olabel, 2);
        assert_eq!(fst.arcs(2).len(), 1);
        assert_eq!(fst.arcs(2)[0].nextstate, 2);
        assert_eq!(fst.final_weight(2), Some(0.0));
    }

    #[test]
    fn test_alignment_automaton_chains_three_runs() {
        let map = FeatureMap::new(FeatureMapConfig::new(3, 1)).unwrap();
        let model = CrfModel::new(map);
        let labels = vec![0u32, 0, 1, 1, 1, 2];
        let mut stream = SliceFeatureStream::new(vec![0.1f32; 6], labels, 1).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let build = builder
            .build_frame_lattice(&model, &mut stream, true, false)
            .unwrap();
        let fst = build.alignment.unwrap();

        // Start plus one state per run, each entered once and self-looped.
        assert_eq!(fst.num_states(), 4);
        assert_eq!(fst.start(), Some(0));
        for run in 1..=3usize {
            let entry = fst.arcs(run - 1).last().unwrap();
            assert_eq!((entry.olabel, entry.nextstate), (run, run));
            let lp = &fst.arcs(run)[0];
            assert_eq!((lp.olabel, lp.nextstate), (run, run));
        }
        // The length-one final run closes the chain.
        assert_eq!(fst.arcs(3).len(), 1);
        assert_eq!(fst.final_weight(3), Some(0.0));
        assert_eq!(fst.final_weight(2), None);
    }

    struct UnlabelledStream {
        inner: SliceFeatureStream,
    }

    impl FeatureStream for UnlabelledStream {
        fn num_ftrs(&self) -> usize {
            self.inner.num_ftrs()
        }

        fn labs_width(&self) -> usize {
            0
        }

        fn read(
            &mut self,
            window: usize,
            ftr_buf: &mut [f32],
            _lab_buf: &mut [u32],
        ) -> Result<usize> {
            let mut scratch = vec![0u32; window];
            self.inner.read(window, ftr_buf, &mut scratch)
        }

        fn rewind(&mut self) {
            self.inner.rewind();
        }
    }

    #[test]
    fn test_alignment_needs_labels() {
        let model = frame_model();
        let mut stream = UnlabelledStream {
            inner: SliceFeatureStream::new(vec![0.1f32, 0.2], vec![0, 1], 1).unwrap(),
        };
        let mut builder = LatticeBuilder::new(&model);
        let err = builder
            .build_frame_lattice(&model, &mut stream, true, false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        // Without alignment the unlabelled stream decodes fine.
        stream.rewind();
        let build = builder
            .build_frame_lattice(&model, &mut stream, false, false)
            .unwrap();
        assert_eq!(build.frames, 2);
        assert!(build.lattice.shortest_path().is_ok());
    }

    #[test]
    fn test_empty_sequence_builds_no_arcs() {
        let model = frame_model();
        let mut stream = SliceFeatureStream::new(Vec::new(), Vec::new(), 1).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let build = builder
            .build_frame_lattice(&model, &mut stream, false, true)
            .unwrap();
        assert_eq!(build.frames, 0);
        assert_eq!(build.lattice.num_states(), 1);
        assert_eq!(build.lattice.num_arcs(), 0);
        assert!(build.lattice.shortest_path().is_err());

        let mut seg_stream = SegmentSliceStream::new(Vec::new(), 2, 2, Vec::new()).unwrap();
        let seg = seg_model();
        let build = builder.build_lattice(&seg, &mut seg_stream, false, true).unwrap();
        assert_eq!(build.frames, 0);
        assert_eq!(build.lattice.num_states(), 1);
    }

    #[test]
    fn test_frame_walk_rejects_segment_stream() {
        let model = frame_model();
        let mut stream = SegmentSliceStream::new(vec![0.1f32, 0.2], 1, 2, Vec::new()).unwrap();
        let mut builder = LatticeBuilder::new(&model);
        let err = builder
            .build_frame_lattice(&model, &mut stream, false, false)
            .unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }
}
