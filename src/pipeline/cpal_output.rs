use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::bounded;
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::OutputError;
use crate::models::{AudioSamples, TrackInfo, NO_TS};
use crate::pipeline::collaborators::{AudioOutput, FrameOutput, OutputProvider, VideoOutput};
use crate::pipeline::null_output::{NullVideoOutput, PresentationLog};
use crate::pipeline::time::samples_duration_micros;

/// Jumps larger than this between consecutive blocks flush the device queue
const DISCONTINUITY_MICROS: i64 = 250_000;

/// Most audio kept waiting for the device. Blocks presented faster than real time
/// (play speed above 1) push the oldest queued blocks out.
const MAX_QUEUED_MICROS: i64 = 500_000;

/// Samples waiting for the device, with the stream position of each block
#[derive(Debug)]
struct DeviceQueue {
    sample_rate: u32,
    channels: u16,
    samples: VecDeque<f32>,
    /// (index of the block's first sample, block pts)
    markers: VecDeque<(u64, i64)>,
    queued: u64,
    played: u64,
    queued_end: i64,
    dropped: u64,
}

impl DeviceQueue {
    fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            samples: VecDeque::new(),
            markers: VecDeque::new(),
            queued: 0,
            played: 0,
            queued_end: NO_TS,
            dropped: 0,
        }
    }

    /// Playing time of the samples not yet pulled by the device
    fn queued_micros(&self) -> i64 {
        let frames = self.samples.len() as u64 / self.channels as u64;
        samples_duration_micros(self.sample_rate, frames)
    }

    fn push(&mut self, frame: &AudioSamples) {
        if frame.pts != NO_TS && self.queued_end != NO_TS && (frame.pts - self.queued_end).abs() > DISCONTINUITY_MICROS {
            debug!("Audio discontinuity at {}us, dropping {} queued samples", frame.pts, self.samples.len());
            self.played += self.samples.len() as u64;
            self.samples.clear();
            self.markers.clear();
        }
        if frame.pts != NO_TS {
            self.markers.push_back((self.queued, frame.pts));
            self.queued_end = frame.pts + frame.duration_micros();
        }
        self.samples.extend(frame.samples.iter().copied());
        self.queued += frame.samples.len() as u64;
        self.trim();
    }

    /// Drop whole blocks from the front until the backlog fits; the newest block always stays
    fn trim(&mut self) {
        let mut trimmed = 0;
        while self.markers.len() > 1 && self.queued_micros() > MAX_QUEUED_MICROS {
            let next_start = self.markers[1].0;
            let count = next_start.saturating_sub(self.played).min(self.samples.len() as u64);
            self.samples.drain(..count as usize);
            self.played += count;
            trimmed += count;
            self.markers.pop_front();
        }
        if trimmed > 0 {
            self.dropped += trimmed;
            trace!("Audio backlog over {}us, dropped {} samples", MAX_QUEUED_MICROS, trimmed);
        }
    }

    fn pull(&mut self) -> Option<f32> {
        let sample = self.samples.pop_front()?;
        self.played += 1;
        Some(sample)
    }

    /// Stream position of the device's playback head
    fn position(&mut self) -> i64 {
        while self.markers.len() > 1 && self.markers[1].0 <= self.played {
            self.markers.pop_front();
        }
        match self.markers.front() {
            Some(&(start, pts)) if start <= self.played => {
                let frames = (self.played - start) / self.channels as u64;
                pts + samples_duration_micros(self.sample_rate, frames)
            }
            _ => NO_TS,
        }
    }
}

/// Plays interleaved f32 blocks on the default output device
pub struct CpalAudioOutput {
    queue: Arc<Mutex<DeviceQueue>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    channels: u16,
}

impl CpalAudioOutput {
    pub fn open(track: &TrackInfo) -> Result<Self, OutputError> {
        let sample_rate = track.sample_rate.unwrap_or(44_100);
        let channels = track.channels.unwrap_or(2);
        let queue = Arc::new(Mutex::new(DeviceQueue::new(sample_rate, channels)));
        let running = Arc::new(AtomicBool::new(true));

        // cpal streams are not Send, so the stream lives on its own thread
        let (ready_tx, ready_rx) = bounded::<Result<(), OutputError>>(1);
        let thread_queue = Arc::clone(&queue);
        let thread_running = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("audio-device".to_string())
            .spawn(move || {
                let stream = match build_stream(sample_rate, channels, thread_queue) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(OutputError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                let _ = stream.pause();
            })
            .map_err(|e| OutputError::DeviceUnavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(OutputError::DeviceUnavailable("audio thread exited".to_string())),
        }

        info!("Audio device opened at {}Hz, {} channel(s)", sample_rate, channels);
        Ok(Self {
            queue,
            running,
            thread: Some(thread),
            channels,
        })
    }
}

fn build_stream(sample_rate: u32, channels: u16, queue: Arc<Mutex<DeviceQueue>>) -> Result<cpal::Stream, OutputError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| OutputError::DeviceUnavailable("no default output device".to_string()))?;
    let format = device
        .default_output_config()
        .map_err(|e| OutputError::DeviceUnavailable(e.to_string()))?
        .sample_format();

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    match format {
        SampleFormat::F32 => stream_for::<f32>(&device, &config, queue),
        SampleFormat::I16 => stream_for::<i16>(&device, &config, queue),
        SampleFormat::U16 => stream_for::<u16>(&device, &config, queue),
        other => Err(OutputError::DeviceUnavailable(format!("unsupported sample format {:?}", other))),
    }
}

fn stream_for<T>(device: &cpal::Device, config: &StreamConfig, queue: Arc<Mutex<DeviceQueue>>) -> Result<cpal::Stream, OutputError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue.lock();
                for out in data.iter_mut() {
                    *out = T::from_sample(queue.pull().unwrap_or(0.0));
                }
            },
            |e| error!("Audio stream error: {}", e),
            None,
        )
        .map_err(|e| OutputError::DeviceUnavailable(e.to_string()))
}

impl FrameOutput<AudioSamples> for CpalAudioOutput {
    fn present(&mut self, frame: &AudioSamples) -> Result<(), OutputError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(OutputError::Closed);
        }
        if frame.channels != 0 && frame.channels != self.channels {
            warn!("Block has {} channel(s), device expects {}", frame.channels, self.channels);
        }
        self.queue.lock().push(frame);
        Ok(())
    }

    fn last_presented_timestamp(&self) -> i64 {
        self.queue.lock().position()
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio device thread panicked");
            }
            let dropped = self.queue.lock().dropped;
            if dropped > 0 {
                info!("Dropped {} queued samples to keep up with the play speed", dropped);
            }
        }
    }
}

impl Drop for CpalAudioOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Audio through cpal; pictures are dropped since there is no display surface
#[derive(Debug, Default)]
pub struct CpalOutputProvider {
    video_log: PresentationLog,
}

impl CpalOutputProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputProvider for CpalOutputProvider {
    fn audio_output(&self, track: &TrackInfo) -> Result<AudioOutput, OutputError> {
        Ok(Box::new(CpalAudioOutput::open(track)?))
    }

    fn video_output(&self, _track: &TrackInfo) -> Result<VideoOutput, OutputError> {
        Ok(Box::new(NullVideoOutput::new(self.video_log.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(pts: i64, frames: usize) -> AudioSamples {
        AudioSamples {
            pts,
            sample_rate: 1_000,
            channels: 2,
            samples: vec![0.5; frames * 2],
            ..AudioSamples::default()
        }
    }

    fn queue() -> DeviceQueue {
        DeviceQueue::new(1_000, 2)
    }

    #[test]
    fn test_position_follows_playback_head() {
        let mut queue = queue();
        queue.push(&block(0, 10));
        queue.push(&block(10_000, 10));
        assert_eq!(queue.position(), 0);

        for _ in 0..10 {
            queue.pull();
        }
        assert_eq!(queue.position(), 5_000);

        for _ in 0..14 {
            queue.pull();
        }
        assert_eq!(queue.position(), 12_000);
    }

    #[test]
    fn test_discontinuity_flushes_queue() {
        let mut queue = queue();
        queue.push(&block(0, 100));
        queue.push(&block(5_000_000, 10));

        assert_eq!(queue.samples.len(), 20);
        assert_eq!(queue.position(), 5_000_000);
    }

    #[test]
    fn test_backlog_is_bounded_when_presented_faster_than_played() {
        let mut queue = queue();
        // Two seconds of contiguous 100ms blocks handed over with nothing pulled
        for i in 0..20 {
            queue.push(&block(i * 100_000, 100));
            assert!(queue.queued_micros() <= MAX_QUEUED_MICROS);
        }

        assert_eq!(queue.queued_micros(), 500_000);
        assert_eq!(queue.position(), 1_500_000);
        assert_eq!(queue.dropped, 15 * 200);

        // The head keeps tracking the surviving blocks
        for _ in 0..100 {
            queue.pull();
        }
        assert_eq!(queue.position(), 1_550_000);
    }

    #[test]
    fn test_backlog_keeps_newest_block() {
        let mut queue = queue();
        queue.push(&block(0, 100));
        queue.push(&block(100_000, 900));

        // A single oversized block is never cut
        assert_eq!(queue.queued_micros(), 900_000);
        assert_eq!(queue.position(), 100_000);
    }

    #[test]
    fn test_empty_queue_plays_silence() {
        let mut queue = queue();
        assert_eq!(queue.pull(), None);
        assert_eq!(queue.position(), NO_TS);
    }
}
