use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::OutputError;
use crate::models::{AudioSamples, TrackInfo, VideoFrame, NO_TS};
use crate::pipeline::collaborators::{AudioOutput, FrameOutput, OutputProvider, VideoOutput};

/// Timestamps handed to null outputs, shared with whoever wants to inspect them
#[derive(Debug, Clone, Default)]
pub struct PresentationLog {
    video: Arc<Mutex<Vec<i64>>>,
    audio: Arc<Mutex<Vec<i64>>>,
}

impl PresentationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video(&self) -> Vec<i64> {
        self.video.lock().clone()
    }

    pub fn audio(&self) -> Vec<i64> {
        self.audio.lock().clone()
    }
}

/// Discards pictures, remembering when they were shown
pub struct NullVideoOutput {
    log: PresentationLog,
    last: i64,
    closed: bool,
}

impl NullVideoOutput {
    pub fn new(log: PresentationLog) -> Self {
        Self {
            log,
            last: NO_TS,
            closed: false,
        }
    }
}

impl FrameOutput<VideoFrame> for NullVideoOutput {
    fn present(&mut self, frame: &VideoFrame) -> Result<(), OutputError> {
        if self.closed {
            return Err(OutputError::Closed);
        }
        self.last = frame.pts;
        self.log.video.lock().push(frame.pts);
        Ok(())
    }

    fn last_presented_timestamp(&self) -> i64 {
        self.last
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Discards samples; reports the end of the last block as its play position
pub struct NullAudioOutput {
    log: PresentationLog,
    position: i64,
    closed: bool,
}

impl NullAudioOutput {
    pub fn new(log: PresentationLog) -> Self {
        Self {
            log,
            position: NO_TS,
            closed: false,
        }
    }
}

impl FrameOutput<AudioSamples> for NullAudioOutput {
    fn present(&mut self, frame: &AudioSamples) -> Result<(), OutputError> {
        if self.closed {
            return Err(OutputError::Closed);
        }
        if frame.pts != NO_TS {
            self.position = frame.pts + frame.duration_micros();
        }
        self.log.audio.lock().push(frame.pts);
        Ok(())
    }

    fn last_presented_timestamp(&self) -> i64 {
        self.position
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Hands out null outputs for every track
#[derive(Debug, Clone, Default)]
pub struct NullOutputProvider {
    log: PresentationLog,
}

impl NullOutputProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: PresentationLog) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &PresentationLog {
        &self.log
    }
}

impl OutputProvider for NullOutputProvider {
    fn audio_output(&self, _track: &TrackInfo) -> Result<AudioOutput, OutputError> {
        Ok(Box::new(NullAudioOutput::new(self.log.clone())))
    }

    fn video_output(&self, _track: &TrackInfo) -> Result<VideoOutput, OutputError> {
        Ok(Box::new(NullVideoOutput::new(self.log.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_position_is_end_of_block() {
        let log = PresentationLog::new();
        let mut output = NullAudioOutput::new(log.clone());
        assert_eq!(output.last_presented_timestamp(), NO_TS);

        let block = AudioSamples {
            pts: 1_000_000,
            sample_rate: 48_000,
            channels: 2,
            samples: vec![0.0; 960 * 2],
            ..AudioSamples::default()
        };
        output.present(&block).unwrap();

        assert_eq!(output.last_presented_timestamp(), 1_020_000);
        assert_eq!(log.audio(), vec![1_000_000]);
    }

    #[test]
    fn test_closed_output_rejects_frames() {
        let mut output = NullVideoOutput::new(PresentationLog::new());
        output.close();
        let frame = VideoFrame {
            pts: 0,
            ..VideoFrame::default()
        };
        assert!(matches!(output.present(&frame), Err(OutputError::Closed)));
    }
}
