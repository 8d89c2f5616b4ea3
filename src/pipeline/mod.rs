//! Threaded playback pipeline: demux, decode and present stages joined by bounded ordered
//! buffers and paced by a shared stream clock.

pub mod buffer;
pub mod clock;
pub mod collaborators;
pub mod cpal_output;
pub mod decoder;
pub mod demux;
pub mod engine;
pub mod events;
pub mod monitor;
pub mod null_output;
pub mod player;
pub mod pool;
pub mod runtime;
pub mod stage;
pub mod symphonia_source;
pub mod time;

#[cfg(test)]
pub(crate) mod tests;

pub use buffer::{BoundedOrderedBuffer, PutOutcome, TakeOutcome};
pub use clock::{ClockKind, ClockState, StreamClock};
pub use collaborators::{
    Coder, Container, ContainerOpener, DecodeStep, FrameOutput, OutputProvider, ReadStatus, SeekFlags, TrackCoder,
};
pub use engine::{Engine, EngineState, EngineStatus};
pub use events::{EventBus, PipelineEvent};
pub use null_output::{NullOutputProvider, PresentationLog};
pub use runtime::PipelineRuntime;
