//! Mock collaborators and multi-stage scenarios.


use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ContainerError, DecodeError};
use crate::models::{AudioSamples, MediaMetadata, Packet, TrackInfo, TrackKind, VideoFrame};
use crate::pipeline::collaborators::{
    Coder, Container, ContainerOpener, DecodeStep, ReadStatus, SeekFlags, TrackCoder,
};

/// First payload byte marking a packet the mock coders refuse
pub(crate) const CORRUPT: u8 = 0xFF;

/// Audio rate used by the mock coder, one sample per millisecond keeps the arithmetic obvious
pub(crate) const MOCK_SAMPLE_RATE: u32 = 1_000;

/// Poll `condition` until it holds or `timeout` passes
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub(crate) fn packet(track: usize, pts: i64, duration: i64, size: usize) -> Packet {
    Packet {
        track,
        pts,
        duration,
        keyframe: true,
        data: vec![1; size],
    }
}

/// In-memory media: tracks plus packets in file order
#[derive(Debug, Clone, Default)]
pub(crate) struct MockSource {
    pub tracks: Vec<TrackInfo>,
    pub packets: Vec<Packet>,
    pub fail_seek: bool,
    /// Bytes the video coder consumes per call
    pub video_chunk: usize,
    /// Coders fail to open once this many have been handed out
    pub coder_limit: Option<usize>,
}

impl MockSource {
    /// Interleaved audio (track 0, 20ms blocks) and video (track 1, 40ms frames)
    pub(crate) fn audio_video(length_micros: i64) -> Self {
        let mut audio = TrackInfo::new(0, TrackKind::Audio, "mock-pcm");
        audio.sample_rate = Some(MOCK_SAMPLE_RATE);
        audio.channels = Some(1);
        let mut video = TrackInfo::new(1, TrackKind::Video, "mock-video");
        video.frame_rate = Some(25.0);
        video.width = Some(4);
        video.height = Some(4);

        let mut packets = Vec::new();
        let mut pts = 0;
        while pts < length_micros {
            packets.push(packet(0, pts, 20_000, 20));
            if pts % 40_000 == 0 {
                packets.push(packet(1, pts, 40_000, 16));
            }
            pts += 20_000;
        }

        Self {
            tracks: vec![audio, video],
            packets,
            fail_seek: false,
            video_chunk: usize::MAX,
            coder_limit: None,
        }
    }

    pub(crate) fn video_only(frames: usize, frame_micros: i64) -> Self {
        let mut video = TrackInfo::new(0, TrackKind::Video, "mock-video");
        video.frame_rate = Some(1_000_000.0 / frame_micros as f64);
        Self {
            tracks: vec![video],
            packets: (0..frames)
                .map(|i| packet(0, i as i64 * frame_micros, frame_micros, 16))
                .collect(),
            fail_seek: false,
            video_chunk: usize::MAX,
            coder_limit: None,
        }
    }

    pub(crate) fn audio_only(blocks: usize) -> Self {
        let mut audio = TrackInfo::new(0, TrackKind::Audio, "mock-pcm");
        audio.sample_rate = Some(MOCK_SAMPLE_RATE);
        audio.channels = Some(1);
        Self {
            tracks: vec![audio],
            packets: (0..blocks).map(|i| packet(0, i as i64 * 20_000, 20_000, 20)).collect(),
            fail_seek: false,
            video_chunk: usize::MAX,
            coder_limit: None,
        }
    }

    pub(crate) fn length_micros(&self) -> i64 {
        self.packets.iter().map(|p| p.pts + p.duration).max().unwrap_or(0)
    }
}

/// What the mock container has been asked to do
#[derive(Debug, Default)]
pub(crate) struct ContainerLog {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub seeks: Mutex<Vec<(usize, i64, SeekFlags)>>,
    pub decode_calls: AtomicUsize,
    pub coders_opened: AtomicUsize,
    /// Coders panic on any decode call past this count
    pub panic_after: Mutex<Option<usize>>,
}

impl ContainerLog {
    fn count_decode(&self) {
        let calls = self.decode_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let limit = *self.panic_after.lock();
        if limit.map_or(false, |limit| calls > limit) {
            panic!("mock coder gave up after {} decode calls", calls - 1);
        }
    }
}

pub(crate) struct MockContainer {
    source: MockSource,
    cursor: usize,
    log: Arc<ContainerLog>,
}

impl MockContainer {
    pub(crate) fn new(source: MockSource) -> Self {
        Self::with_log(source, Arc::default())
    }

    pub(crate) fn with_log(source: MockSource, log: Arc<ContainerLog>) -> Self {
        log.opened.fetch_add(1, Ordering::SeqCst);
        Self {
            source,
            cursor: 0,
            log,
        }
    }
}

impl Container for MockContainer {
    fn track_count(&self) -> usize {
        self.source.tracks.len()
    }

    fn track_info(&self, index: usize) -> Option<TrackInfo> {
        self.source.tracks.get(index).cloned()
    }

    fn open_track_coder(&mut self, index: usize) -> Result<TrackCoder, ContainerError> {
        let opened = self.log.coders_opened.fetch_add(1, Ordering::SeqCst);
        if self.source.coder_limit.map_or(false, |limit| opened >= limit) {
            return Err(ContainerError::CoderUnavailable {
                index,
                reason: "mock coder limit reached".to_string(),
            });
        }

        let calls = Arc::clone(&self.log);
        match self.track_kind(index) {
            TrackKind::Audio => Ok(TrackCoder::Audio(Box::new(MockAudioCoder { log: calls }))),
            TrackKind::Video => Ok(TrackCoder::Video(Box::new(MockVideoCoder {
                chunk: self.source.video_chunk.max(1),
                log: calls,
            }))),
            TrackKind::Other => Err(ContainerError::CoderUnavailable {
                index,
                reason: "mock has no coder".to_string(),
            }),
        }
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<ReadStatus, ContainerError> {
        let Some(next) = self.source.packets.get(self.cursor) else {
            return Ok(ReadStatus::EndOfStream);
        };
        self.cursor += 1;
        packet.track = next.track;
        packet.pts = next.pts;
        packet.duration = next.duration;
        packet.keyframe = next.keyframe;
        packet.data.clear();
        packet.data.extend_from_slice(&next.data);
        Ok(ReadStatus::Packet)
    }

    fn seek(&mut self, track: usize, target: i64, flags: SeekFlags) -> Result<(), ContainerError> {
        if self.source.fail_seek {
            return Err(ContainerError::SeekFailed("mock refuses to seek".to_string()));
        }
        self.log.seeks.lock().push((track, target, flags));
        self.cursor = self
            .source
            .packets
            .iter()
            .position(|p| p.pts >= target)
            .unwrap_or(self.source.packets.len());
        Ok(())
    }

    fn metadata(&self) -> MediaMetadata {
        let mut metadata = MediaMetadata::new("");
        metadata.duration_micros = Some(self.source.length_micros());
        metadata.tracks = self.source.tracks.clone();
        metadata.tags.insert("title".to_string(), "Mock Clip".to_string());
        metadata
    }

    fn close(&mut self) {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opens a fresh `MockContainer` over the same source each time
pub(crate) struct MockOpener {
    pub source: MockSource,
    pub log: Arc<ContainerLog>,
}

impl MockOpener {
    pub(crate) fn new(source: MockSource) -> Self {
        Self {
            source,
            log: Arc::default(),
        }
    }
}

impl ContainerOpener for MockOpener {
    fn open(&self, reference: &str) -> Result<Box<dyn Container>, ContainerError> {
        if reference.starts_with("missing") {
            return Err(ContainerError::OpenFailed {
                reference: reference.to_string(),
                reason: "no such mock".to_string(),
            });
        }
        Ok(Box::new(MockContainer::with_log(self.source.clone(), Arc::clone(&self.log))))
    }
}

/// One complete block per packet, `duration` worth of samples
pub(crate) struct MockAudioCoder {
    log: Arc<ContainerLog>,
}

impl Coder<AudioSamples> for MockAudioCoder {
    fn decode(&mut self, packet: &Packet, offset: usize, frame: &mut AudioSamples) -> Result<DecodeStep, DecodeError> {
        self.log.count_decode();
        if packet.data.first() == Some(&CORRUPT) {
            return Err(DecodeError::CorruptPacket {
                pts: packet.pts,
                reason: "mock corruption".to_string(),
            });
        }

        let frames = (packet.duration.max(0) as u64 * MOCK_SAMPLE_RATE as u64 / 1_000_000) as usize;
        frame.pts = packet.pts;
        frame.sample_rate = MOCK_SAMPLE_RATE;
        frame.channels = 1;
        frame.samples.clear();
        frame.samples.resize(frames, 0.25);
        frame.complete = true;

        Ok(DecodeStep {
            consumed: packet.size() - offset,
            complete: true,
        })
    }
}

/// Consumes `chunk` bytes per call; the picture is complete once the packet is used up
pub(crate) struct MockVideoCoder {
    chunk: usize,
    log: Arc<ContainerLog>,
}

impl Coder<VideoFrame> for MockVideoCoder {
    fn decode(&mut self, packet: &Packet, offset: usize, frame: &mut VideoFrame) -> Result<DecodeStep, DecodeError> {
        self.log.count_decode();
        if packet.data.first() == Some(&CORRUPT) {
            return Err(DecodeError::CorruptPacket {
                pts: packet.pts,
                reason: "mock corruption".to_string(),
            });
        }

        let remaining = packet.size().saturating_sub(offset);
        let consumed = remaining.min(self.chunk);
        if offset == 0 {
            frame.pts = packet.pts;
            frame.width = 4;
            frame.height = 4;
        }
        frame.data.extend_from_slice(&packet.data[offset..offset + consumed]);
        let complete = offset + consumed >= packet.size();
        frame.complete = complete;

        Ok(DecodeStep { consumed, complete })
    }
}
