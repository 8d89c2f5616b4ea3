use log::debug;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{AudioSamples, Frame, Packet, TrackKind, VideoFrame};
use crate::pipeline::buffer::BoundedOrderedBuffer;
use crate::pipeline::clock::StreamClock;
use crate::pipeline::collaborators::Container;
use crate::pipeline::events::EventBus;
use crate::pipeline::pool::{PayloadPool, PoolStats};

pub const VIDEO_PACKETS: &str = "video-packets";
pub const AUDIO_PACKETS: &str = "audio-packets";
pub const VIDEO_FRAMES: &str = "video-frames";
pub const AUDIO_FRAMES: &str = "audio-frames";

/// Fill level of one buffer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferLevel {
    pub name: String,
    pub size: usize,
    pub capacity: usize,
    /// Oldest timestamp held, `None` when empty
    pub head: Option<i64>,
}

impl BufferLevel {
    pub fn fill(&self) -> f32 {
        self.size as f32 / self.capacity.max(1) as f32
    }
}

/// State shared by every stage thread of one loaded source.
///
/// Each field locks independently; nothing here is guarded by a single coarse lock.
pub struct PipelineRuntime {
    config: EngineConfig,

    pub video_packets: BoundedOrderedBuffer<Packet>,
    pub audio_packets: BoundedOrderedBuffer<Packet>,
    pub video_frames: BoundedOrderedBuffer<VideoFrame>,
    pub audio_frames: BoundedOrderedBuffer<AudioSamples>,

    clock: Arc<StreamClock>,
    paused: AtomicBool,
    /// Serializes container reads and seeks
    container: Mutex<Option<Box<dyn Container>>>,
    seek_generation: AtomicU64,
    first_frame_presented: AtomicBool,

    packet_pool: PayloadPool<Vec<u8>>,
    video_pool: PayloadPool<Vec<u8>>,
    audio_pool: PayloadPool<Vec<f32>>,

    events: EventBus,
}

impl PipelineRuntime {
    pub fn new(config: EngineConfig, events: EventBus) -> Result<Arc<Self>, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let slice = config.wait_timeout();
        let clock = StreamClock::new(config.clock, config.play_speed)
            .map_err(|_| EngineError::InvalidPlaySpeed(config.play_speed))?;
        let pools = config.use_object_pools;
        let max_idle = config.pool_max_idle;

        let runtime = Self {
            video_packets: BoundedOrderedBuffer::new(VIDEO_PACKETS, config.video_packet_buffer_size)?
                .with_wait_slice(slice)
                .with_events(events.clone()),
            audio_packets: BoundedOrderedBuffer::new(AUDIO_PACKETS, config.audio_packet_buffer_size)?
                .with_wait_slice(slice)
                .with_events(events.clone()),
            video_frames: BoundedOrderedBuffer::new(VIDEO_FRAMES, config.video_frame_buffer_size)?
                .with_wait_slice(slice)
                .with_events(events.clone()),
            audio_frames: BoundedOrderedBuffer::new(AUDIO_FRAMES, config.audio_frame_buffer_size)?
                .with_wait_slice(slice)
                .with_events(events.clone()),
            clock: Arc::new(clock),
            paused: AtomicBool::new(false),
            container: Mutex::new(None),
            seek_generation: AtomicU64::new(0),
            first_frame_presented: AtomicBool::new(false),
            packet_pool: PayloadPool::new("packets", pools, max_idle),
            video_pool: PayloadPool::new("video-pictures", pools, max_idle),
            audio_pool: PayloadPool::new("audio-samples", pools, max_idle),
            events,
            config,
        };

        debug!(
            "Runtime created: {} clock, pools {}",
            runtime.config.clock,
            if pools { "on" } else { "off" }
        );
        Ok(Arc::new(runtime))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<StreamClock> {
        &self.clock
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn play_speed(&self) -> f64 {
        self.clock.play_speed()
    }

    /// Lock the container slot. Hold the guard for a single read or seek only.
    pub fn container(&self) -> MutexGuard<'_, Option<Box<dyn Container>>> {
        self.container.lock()
    }

    pub fn install_container(&self, container: Box<dyn Container>) {
        *self.container.lock() = Some(container);
    }

    /// Close and drop the container, if any
    pub fn close_container(&self) {
        if let Some(mut container) = self.container.lock().take() {
            container.close();
        }
    }

    pub fn has_container(&self) -> bool {
        self.container.lock().is_some()
    }

    /// Incremented by every seek so stages can detect a new cycle
    pub fn seek_generation(&self) -> u64 {
        self.seek_generation.load(Ordering::SeqCst)
    }

    pub fn bump_seek_generation(&self) -> u64 {
        self.seek_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// True for exactly one caller per load
    pub fn claim_first_frame(&self) -> bool {
        !self.first_frame_presented.swap(true, Ordering::SeqCst)
    }

    /// Empty all four buffers, packets before frames, recycling their payloads
    pub fn clear_buffers(&self) -> usize {
        self.video_packets.clear_with(|p| self.recycle_packet(p))
            + self.audio_packets.clear_with(|p| self.recycle_packet(p))
            + self.video_frames.clear_with(|f| self.recycle_video_frame(f))
            + self.audio_frames.clear_with(|f| self.recycle_audio_frame(f))
    }

    pub fn packet_pool(&self) -> &PayloadPool<Vec<u8>> {
        &self.packet_pool
    }

    pub fn video_pool(&self) -> &PayloadPool<Vec<u8>> {
        &self.video_pool
    }

    pub fn audio_pool(&self) -> &PayloadPool<Vec<f32>> {
        &self.audio_pool
    }

    /// Fresh packet whose data buffer comes from the packet pool
    pub fn borrow_packet(&self) -> Packet {
        Packet::new(self.packet_pool.borrow_or_alloc())
    }

    pub fn recycle_packet(&self, packet: Packet) {
        self.packet_pool.give_back(packet.data);
    }

    pub fn recycle_video_frame(&self, frame: VideoFrame) {
        self.video_pool.give_back(frame.data);
    }

    pub fn recycle_audio_frame(&self, frame: AudioSamples) {
        self.audio_pool.give_back(frame.samples);
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        vec![
            self.packet_pool.stats(),
            self.video_pool.stats(),
            self.audio_pool.stats(),
        ]
    }

    pub fn buffer_levels(&self) -> Vec<BufferLevel> {
        fn level<T: crate::models::MediaItem>(buffer: &BoundedOrderedBuffer<T>) -> BufferLevel {
            BufferLevel {
                name: buffer.name().to_string(),
                size: buffer.size(),
                capacity: buffer.capacity(),
                head: buffer.peek_head(),
            }
        }

        vec![
            level(&self.video_packets),
            level(&self.audio_packets),
            level(&self.video_frames),
            level(&self.audio_frames),
        ]
    }
}

/// Per-kind access to the buffers and pool a decoded frame type flows through
pub trait MediaLane: Frame {
    const KIND: TrackKind;

    fn packet_buffer(runtime: &PipelineRuntime) -> &BoundedOrderedBuffer<Packet>;

    fn frame_buffer(runtime: &PipelineRuntime) -> &BoundedOrderedBuffer<Self>;

    fn payload_pool(runtime: &PipelineRuntime) -> &PayloadPool<Self::Payload>;

    /// Empty frame backed by a pooled payload
    fn borrow_frame(runtime: &PipelineRuntime, track: usize) -> Self {
        Self::with_payload(track, Self::payload_pool(runtime).borrow_or_alloc())
    }

    fn recycle(runtime: &PipelineRuntime, frame: Self) {
        Self::payload_pool(runtime).give_back(frame.into_payload());
    }
}

impl MediaLane for VideoFrame {
    const KIND: TrackKind = TrackKind::Video;

    fn packet_buffer(runtime: &PipelineRuntime) -> &BoundedOrderedBuffer<Packet> {
        &runtime.video_packets
    }

    fn frame_buffer(runtime: &PipelineRuntime) -> &BoundedOrderedBuffer<Self> {
        &runtime.video_frames
    }

    fn payload_pool(runtime: &PipelineRuntime) -> &PayloadPool<Vec<u8>> {
        &runtime.video_pool
    }
}

impl MediaLane for AudioSamples {
    const KIND: TrackKind = TrackKind::Audio;

    fn packet_buffer(runtime: &PipelineRuntime) -> &BoundedOrderedBuffer<Packet> {
        &runtime.audio_packets
    }

    fn frame_buffer(runtime: &PipelineRuntime) -> &BoundedOrderedBuffer<Self> {
        &runtime.audio_frames
    }

    fn payload_pool(runtime: &PipelineRuntime) -> &PayloadPool<Vec<f32>> {
        &runtime.audio_pool
    }
}

impl std::fmt::Debug for PipelineRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRuntime")
            .field("clock", &self.clock.kind())
            .field("paused", &self.is_paused())
            .field("seek_generation", &self.seek_generation())
            .finish()
    }
}
