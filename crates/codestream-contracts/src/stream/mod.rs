mod demux;
mod fence;

pub use demux::{StreamDemux, StreamKey};
pub use fence::{FenceExtractor, END_FENCE, START_FENCE, START_FENCE_MAX_LEN, START_FENCE_MODIFIER};
