pub mod error;
pub mod gradient;
pub mod lattice;
pub mod logmath;
pub mod model;
pub mod nodes;
pub mod stream;

pub use error::{Error, Result};
pub use gradient::{accumulate_batch, BatchStats, GradientBuilder, SeqStats};
pub use lattice::{Lattice, LatticeArc, LatticeBuild, LatticeBuilder, LatticePath};
pub use model::{CrfModel, FeatureMap, FeatureMapConfig, NodeKind, ParamStore};
pub use nodes::{create_node, FrameNode, MultiStateNode, SegmentNode, SeqBuffer, StateNode};
pub use stream::{FeatureStream, SegmentSliceStream, SliceFeatureStream, LAB_BAD};
