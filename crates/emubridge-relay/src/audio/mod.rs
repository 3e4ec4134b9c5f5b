//! Streaming audio from the session's audio channel into the playback sink.

mod pipeline;
mod queue;
mod sink;

pub use pipeline::{AudioError, AudioPipeline, SharedSink};
pub use queue::{AudioStats, SegmentQueue};
pub use sink::{FileSink, NullSink, PlaybackSink, SinkError};
