use crate::error::{Error, Result};

/// Sentinel marking a frame or segment with no usable reference label.
pub const LAB_BAD: u32 = u32::MAX;

/// Source of observation features and reference labels for one sequence.
///
/// A frame stream serves one row per frame with `labs_width() == 1`. A
/// segmental stream serves, per call, one row for each candidate segment
/// duration ending at the current frame boundary, with
/// `labs_width() >= 3` label words per row (`{label, begin, end}`).
pub trait FeatureStream {
    /// Width of one feature row.
    fn num_ftrs(&self) -> usize;

    /// Label words per row.
    fn labs_width(&self) -> usize;

    /// Fills up to `window` rows of features and labels and returns the
    /// number of rows provided. A frame stream returns fewer rows than
    /// requested only at end-of-sequence; `0` means the sequence is
    /// exhausted.
    ///
    /// # Errors
    /// `Error::Stream` when the destination buffers cannot hold the rows
    /// being returned.
    fn read(&mut self, window: usize, ftr_buf: &mut [f32], lab_buf: &mut [u32]) -> Result<usize>;

    /// Restarts the sequence from its first frame.
    fn rewind(&mut self);
}

/// In-memory frame stream over a row-major feature matrix.
#[derive(Debug, Clone)]
pub struct SliceFeatureStream {
    frames: Vec<f32>,
    labels: Vec<u32>,
    num_ftrs: usize,
    pos: usize,
}

impl SliceFeatureStream {
    /// # Errors
    /// `Error::Stream` when the matrix length is not a multiple of
    /// `num_ftrs` or the label count does not match the frame count.
    pub fn new(frames: Vec<f32>, labels: Vec<u32>, num_ftrs: usize) -> Result<Self> {
        if num_ftrs == 0 {
            return Err(Error::stream("feature width must be positive"));
        }
        if frames.len() % num_ftrs != 0 {
            return Err(Error::stream(format!(
                "feature matrix length {} is not a multiple of the feature width {}",
                frames.len(),
                num_ftrs
            )));
        }
        let num_frames = frames.len() / num_ftrs;
        if labels.len() != num_frames {
            return Err(Error::stream(format!(
                "{} labels for {} frames",
                labels.len(),
                num_frames
            )));
        }
        Ok(SliceFeatureStream {
            frames,
            labels,
            num_ftrs,
            pos: 0,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.labels.len()
    }
}

impl FeatureStream for SliceFeatureStream {
    fn num_ftrs(&self) -> usize {
        self.num_ftrs
    }

    fn labs_width(&self) -> usize {
        1
    }

    fn read(&mut self, window: usize, ftr_buf: &mut [f32], lab_buf: &mut [u32]) -> Result<usize> {
        let remaining = self.num_frames() - self.pos;
        let rows = window.min(remaining);
        if ftr_buf.len() < rows * self.num_ftrs || lab_buf.len() < rows {
            return Err(Error::stream(format!(
                "read buffers too small for {rows} rows"
            )));
        }
        let start = self.pos * self.num_ftrs;
        ftr_buf[..rows * self.num_ftrs]
            .copy_from_slice(&self.frames[start..start + rows * self.num_ftrs]);
        lab_buf[..rows].copy_from_slice(&self.labels[self.pos..self.pos + rows]);
        self.pos += rows;
        Ok(rows)
    }

    fn rewind(&mut self) {
        self.pos = 0;
    }
}

/// In-memory segmental stream.
///
/// Each `read` advances one frame boundary and serves one row per candidate
/// duration `d = 1..=window`: the mean of the frame features over the span
/// ending at the boundary, followed by a one-hot duration block of width
/// `max_dur`. The label row for `d` is `{label, begin, end}` when the
/// reference segmentation contains exactly that span, `{LAB_BAD, 0, 0}`
/// otherwise.
#[derive(Debug, Clone)]
pub struct SegmentSliceStream {
    frames: Vec<f32>,
    base_ftrs: usize,
    max_dur: usize,
    segments: Vec<(u32, usize, usize)>,
    pos: usize,
}

impl SegmentSliceStream {
    /// `segments` holds the reference segmentation as `(label, begin, end)`
    /// with inclusive frame indices; leave it empty for decode-only use.
    ///
    /// # Errors
    /// `Error::Stream` on a ragged frame matrix or a segment that falls
    /// outside the sequence.
    pub fn new(
        frames: Vec<f32>,
        base_ftrs: usize,
        max_dur: usize,
        segments: Vec<(u32, usize, usize)>,
    ) -> Result<Self> {
        if base_ftrs == 0 || max_dur == 0 {
            return Err(Error::stream(
                "feature width and maximum duration must be positive",
            ));
        }
        if frames.len() % base_ftrs != 0 {
            return Err(Error::stream(format!(
                "feature matrix length {} is not a multiple of the feature width {}",
                frames.len(),
                base_ftrs
            )));
        }
        let num_frames = frames.len() / base_ftrs;
        for &(_, begin, end) in &segments {
            if begin > end || end >= num_frames {
                return Err(Error::stream(format!(
                    "segment [{begin}, {end}] outside sequence of {num_frames} frames"
                )));
            }
        }
        Ok(SegmentSliceStream {
            frames,
            base_ftrs,
            max_dur,
            segments,
            pos: 0,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len() / self.base_ftrs
    }

    fn reference_at(&self, begin: usize, end: usize) -> Option<u32> {
        self.segments
            .iter()
            .find(|&&(_, b, e)| b == begin && e == end)
            .map(|&(lab, _, _)| lab)
    }
}

impl FeatureStream for SegmentSliceStream {
    fn num_ftrs(&self) -> usize {
        self.base_ftrs + self.max_dur
    }

    fn labs_width(&self) -> usize {
        3
    }

    fn read(&mut self, window: usize, ftr_buf: &mut [f32], lab_buf: &mut [u32]) -> Result<usize> {
        if self.pos >= self.num_frames() {
            return Ok(0);
        }
        let rows = window.min(self.pos + 1).min(self.max_dur);
        let width = self.num_ftrs();
        if ftr_buf.len() < rows * width || lab_buf.len() < rows * 3 {
            return Err(Error::stream(format!(
                "read buffers too small for {rows} segment rows"
            )));
        }
        for d in 1..=rows {
            let begin = self.pos + 1 - d;
            let row = &mut ftr_buf[(d - 1) * width..d * width];
            row.fill(0.0);
            for frame in begin..=self.pos {
                let src = &self.frames[frame * self.base_ftrs..(frame + 1) * self.base_ftrs];
                for (dst, &x) in row[..self.base_ftrs].iter_mut().zip(src) {
                    *dst += x;
                }
            }
            let inv = 1.0 / d as f32;
            for x in row[..self.base_ftrs].iter_mut() {
                *x *= inv;
            }
            row[self.base_ftrs + d - 1] = 1.0;

            let labs = &mut lab_buf[(d - 1) * 3..d * 3];
            match self.reference_at(begin, self.pos) {
                Some(lab) => {
                    labs[0] = lab;
                    labs[1] = begin as u32;
                    labs[2] = self.pos as u32;
                }
                None => {
                    labs[0] = LAB_BAD;
                    labs[1] = 0;
                    labs[2] = 0;
                }
            }
        }
        self.pos += 1;
        Ok(rows)
    }

    fn rewind(&mut self) {
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_frame_stream_reads_in_bunches() {
        let frames = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let mut stream = SliceFeatureStream::new(frames, vec![0, 1, 0, 1, 0], 2).unwrap();
        let mut ftr = vec![0.0f32; 6];
        let mut lab = vec![0u32; 3];

        assert_eq!(stream.read(3, &mut ftr, &mut lab).unwrap(), 3);
        assert_eq!(ftr, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(lab, vec![0, 1, 0]);

        // Short read at end-of-sequence, then exhaustion.
        assert_eq!(stream.read(3, &mut ftr, &mut lab).unwrap(), 2);
        assert_eq!(&ftr[..4], &[7.0, 8.0, 9.0, 10.0]);
        assert_eq!(stream.read(3, &mut ftr, &mut lab).unwrap(), 0);

        stream.rewind();
        assert_eq!(stream.read(3, &mut ftr, &mut lab).unwrap(), 3);
    }

    #[test]
    fn test_frame_stream_rejects_ragged_matrix() {
        let err = SliceFeatureStream::new(vec![1.0, 2.0, 3.0], vec![0], 2).unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
        let err = SliceFeatureStream::new(vec![1.0, 2.0], vec![0, 1], 2).unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[test]
    fn test_frame_stream_rejects_undersized_buffer() {
        let mut stream =
            SliceFeatureStream::new(vec![1.0, 2.0, 3.0, 4.0], vec![0, 1], 2).unwrap();
        let mut ftr = vec![0.0f32; 2];
        let mut lab = vec![0u32; 2];
        assert!(matches!(
            stream.read(2, &mut ftr, &mut lab),
            Err(Error::Stream(_))
        ));
    }

    #[test]
    fn test_segment_stream_pools_and_encodes_duration() {
        // 3 frames x 2 features; one reference segment [0,1] labelled 1.
        let frames = vec![2.0, 0.0, 4.0, 2.0, 6.0, 4.0];
        let mut stream =
            SegmentSliceStream::new(frames, 2, 2, vec![(1, 0, 1), (0, 2, 2)]).unwrap();
        assert_eq!(stream.num_ftrs(), 4);
        let mut ftr = vec![0.0f32; 8];
        let mut lab = vec![0u32; 6];

        // Boundary 0: only duration 1 exists.
        assert_eq!(stream.read(2, &mut ftr, &mut lab).unwrap(), 1);
        assert_eq!(&ftr[..4], &[2.0, 0.0, 1.0, 0.0]);
        assert_eq!(&lab[..3], &[LAB_BAD, 0, 0]);

        // Boundary 1: durations 1 and 2; duration 2 matches the reference.
        assert_eq!(stream.read(2, &mut ftr, &mut lab).unwrap(), 2);
        assert_eq!(&ftr[..4], &[4.0, 2.0, 1.0, 0.0]);
        assert_relative_eq!(ftr[4], 3.0);
        assert_relative_eq!(ftr[5], 1.0);
        assert_eq!(&ftr[6..8], &[0.0, 1.0]);
        assert_eq!(&lab[..3], &[LAB_BAD, 0, 0]);
        assert_eq!(&lab[3..6], &[1, 0, 1]);

        // Boundary 2, then exhaustion.
        assert_eq!(stream.read(2, &mut ftr, &mut lab).unwrap(), 2);
        assert_eq!(&lab[..3], &[0, 2, 2]);
        assert_eq!(stream.read(2, &mut ftr, &mut lab).unwrap(), 0);
    }

    #[test]
    fn test_segment_stream_rejects_out_of_range_segment() {
        let err = SegmentSliceStream::new(vec![1.0, 2.0], 1, 2, vec![(0, 1, 3)]).unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }
}
