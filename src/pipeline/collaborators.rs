//! Seams to the outside world: containers, track coders and outputs.
//!
//! The pipeline never decodes or renders on its own. A `ContainerOpener` produces a `Container`,
//! which hands out one `Coder` per playable track; decoded frames go to `FrameOutput`s.

use crate::error::{ContainerError, DecodeError, OutputError};
use crate::models::{AudioSamples, MediaMetadata, Packet, TrackInfo, TrackKind, VideoFrame, NO_TS};

/// Outcome of reading from a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The packet argument was filled in
    Packet,
    EndOfStream,
}

/// Flags handed to `Container::seek`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeekFlags {
    /// The target lies before the current position
    pub backwards: bool,
    /// Land on any frame instead of the nearest keyframe
    pub any_frame: bool,
}

impl SeekFlags {
    pub fn for_target(current_stream_time: i64, target: i64, keyframe_only: bool) -> Self {
        Self {
            backwards: current_stream_time != NO_TS && current_stream_time > target,
            any_frame: !keyframe_only,
        }
    }
}

/// Result of one decode call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStep {
    /// Bytes of the packet consumed by this call
    pub consumed: usize,
    /// The frame is fully assembled
    pub complete: bool,
}

/// Per-track decoder. One packet may take several calls, each continuing at `offset`.
pub trait Coder<F>: Send {
    fn decode(&mut self, packet: &Packet, offset: usize, frame: &mut F) -> Result<DecodeStep, DecodeError>;

    /// Forget codec state, called after a seek
    fn flush(&mut self) {}

    /// Nominal duration of one output frame, when known
    fn frame_duration_micros(&self) -> Option<i64> {
        None
    }
}

/// Coder for a track, tagged by what it produces
pub enum TrackCoder {
    Audio(Box<dyn Coder<AudioSamples>>),
    Video(Box<dyn Coder<VideoFrame>>),
}

impl TrackCoder {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackCoder::Audio(_) => TrackKind::Audio,
            TrackCoder::Video(_) => TrackKind::Video,
        }
    }
}

impl std::fmt::Debug for TrackCoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TrackCoder({})", self.kind())
    }
}

/// An opened media source
pub trait Container: Send {
    fn track_count(&self) -> usize;

    fn track_info(&self, index: usize) -> Option<TrackInfo>;

    fn track_kind(&self, index: usize) -> TrackKind {
        self.track_info(index).map_or(TrackKind::Other, |t| t.kind)
    }

    fn open_track_coder(&mut self, index: usize) -> Result<TrackCoder, ContainerError>;

    /// Fill `packet` with the next packet in file order
    fn read_packet(&mut self, packet: &mut Packet) -> Result<ReadStatus, ContainerError>;

    /// Reposition `track` near `target` (microseconds)
    fn seek(&mut self, track: usize, target: i64, flags: SeekFlags) -> Result<(), ContainerError>;

    fn metadata(&self) -> MediaMetadata;

    fn close(&mut self) {}
}

/// Factory for containers
pub trait ContainerOpener: Send + Sync {
    fn open(&self, reference: &str) -> Result<Box<dyn Container>, ContainerError>;
}

/// Presentation target for decoded frames
pub trait FrameOutput<F>: Send {
    fn present(&mut self, frame: &F) -> Result<(), OutputError>;

    /// Stream position the output has played up to, `NO_TS` before anything was presented
    fn last_presented_timestamp(&self) -> i64;

    fn close(&mut self) {}
}

pub type VideoOutput = Box<dyn FrameOutput<VideoFrame>>;
pub type AudioOutput = Box<dyn FrameOutput<AudioSamples>>;

/// Creates the outputs for a freshly loaded source
pub trait OutputProvider: Send + Sync {
    fn audio_output(&self, track: &TrackInfo) -> Result<AudioOutput, OutputError>;

    fn video_output(&self, track: &TrackInfo) -> Result<VideoOutput, OutputError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_flags_for_target() {
        let flags = SeekFlags::for_target(10_000_000, 2_000_000, true);
        assert!(flags.backwards);
        assert!(!flags.any_frame);

        let flags = SeekFlags::for_target(1_000_000, 2_000_000, false);
        assert!(!flags.backwards);
        assert!(flags.any_frame);

        // Nothing played yet
        assert!(!SeekFlags::for_target(NO_TS, 0, true).backwards);
    }
}
