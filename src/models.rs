use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel for an unknown presentation timestamp
pub const NO_TS: i64 = -1;

/// A timestamped unit moving through the pipeline (packet or decoded frame)
pub trait MediaItem: Send + 'static {
    /// Presentation timestamp in microseconds, `NO_TS` when unknown
    fn timestamp(&self) -> i64;

    /// Index of the container track this item belongs to
    fn track(&self) -> usize;
}

/// Payload storage that can be recycled through a pool
pub trait Reusable: Send + 'static {
    /// Drop contents but keep allocated capacity
    fn reset(&mut self);

    /// Approximate heap footprint in bytes
    fn footprint(&self) -> usize;
}

impl Reusable for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }

    fn footprint(&self) -> usize {
        self.capacity()
    }
}

impl Reusable for Vec<f32> {
    fn reset(&mut self) {
        self.clear();
    }

    fn footprint(&self) -> usize {
        self.capacity() * std::mem::size_of::<f32>()
    }
}

/// A decoded frame type that a track coder fills in place
pub trait Frame: MediaItem + Sized {
    type Payload: Reusable + Default;

    /// Wrap a (possibly recycled) payload into an empty frame for `track`
    fn with_payload(track: usize, payload: Self::Payload) -> Self;

    /// Whether the coder has finished assembling this frame
    fn is_complete(&self) -> bool;

    /// Give the payload back for recycling
    fn into_payload(self) -> Self::Payload;
}

/// Encoded packet read from the container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
    pub track: usize,
    pub pts: i64,
    pub duration: i64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            track: 0,
            pts: NO_TS,
            duration: 0,
            keyframe: false,
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl MediaItem for Packet {
    fn timestamp(&self) -> i64 {
        self.pts
    }

    fn track(&self) -> usize {
        self.track
    }
}

/// Decoded picture
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFrame {
    pub track: usize,
    pub pts: i64,
    pub width: u32,
    pub height: u32,
    pub complete: bool,
    pub data: Vec<u8>,
}

impl MediaItem for VideoFrame {
    fn timestamp(&self) -> i64 {
        self.pts
    }

    fn track(&self) -> usize {
        self.track
    }
}

impl Frame for VideoFrame {
    type Payload = Vec<u8>;

    fn with_payload(track: usize, payload: Vec<u8>) -> Self {
        Self {
            track,
            pts: NO_TS,
            width: 0,
            height: 0,
            complete: false,
            data: payload,
        }
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn into_payload(self) -> Vec<u8> {
        self.data
    }
}

/// Decoded block of interleaved audio samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioSamples {
    pub track: usize,
    pub pts: i64,
    pub sample_rate: u32,
    pub channels: u16,
    pub complete: bool,
    pub samples: Vec<f32>,
}

impl AudioSamples {
    /// Number of sample frames (one sample per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Playback length of this block in microseconds
    pub fn duration_micros(&self) -> i64 {
        crate::pipeline::time::samples_duration_micros(self.sample_rate, self.frames() as u64)
    }
}

impl MediaItem for AudioSamples {
    fn timestamp(&self) -> i64 {
        self.pts
    }

    fn track(&self) -> usize {
        self.track
    }
}

impl Frame for AudioSamples {
    type Payload = Vec<f32>;

    fn with_payload(track: usize, payload: Vec<f32>) -> Self {
        Self {
            track,
            pts: NO_TS,
            sample_rate: 0,
            channels: 0,
            complete: false,
            samples: payload,
        }
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn into_payload(self) -> Vec<f32> {
        self.samples
    }
}

/// Kind of a container track
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
    Other,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
            TrackKind::Other => "other",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of one container track
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackInfo {
    pub index: usize,
    pub kind: TrackKind,
    pub codec: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub duration_micros: Option<i64>,
}

impl TrackInfo {
    pub fn new(index: usize, kind: TrackKind, codec: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            codec: codec.into(),
            sample_rate: None,
            channels: None,
            width: None,
            height: None,
            frame_rate: None,
            duration_micros: None,
        }
    }

    /// Nominal duration of a single video frame
    pub fn frame_duration_micros(&self) -> Option<i64> {
        self.frame_rate
            .filter(|rate| *rate > 0.0)
            .map(|rate| crate::pipeline::time::video_frames_to_micros(rate, 1))
    }

    /// Short human readable description, e.g. "audio pcm_s16le 44100Hz 2ch"
    pub fn describe(&self) -> String {
        let mut parts = vec![self.kind.to_string(), self.codec.clone()];
        if let Some(rate) = self.sample_rate {
            parts.push(format!("{}Hz", rate));
        }
        if let Some(channels) = self.channels {
            parts.push(format!("{}ch", channels));
        }
        if let (Some(w), Some(h)) = (self.width, self.height) {
            parts.push(format!("{}x{}", w, h));
        }
        if let Some(fps) = self.frame_rate {
            parts.push(format!("{:.3}fps", fps));
        }
        parts.join(" ")
    }
}

/// Metadata published when a source is loaded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MediaMetadata {
    pub source: String,
    pub duration_micros: Option<i64>,
    pub tracks: Vec<TrackInfo>,
    pub tags: BTreeMap<String, String>,
}

impl MediaMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// First track of the given kind
    pub fn first_track(&self, kind: TrackKind) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    pub fn has_audio(&self) -> bool {
        self.first_track(TrackKind::Audio).is_some()
    }

    pub fn has_video(&self) -> bool {
        self.first_track(TrackKind::Video).is_some()
    }

    pub fn title(&self) -> Option<&str> {
        self.tags.get("title").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_defaults_to_unknown_timestamp() {
        let packet = Packet::new(vec![1, 2, 3]);
        assert_eq!(packet.timestamp(), NO_TS);
        assert_eq!(packet.size(), 3);
    }

    #[test]
    fn test_audio_samples_duration() {
        let samples = AudioSamples {
            track: 0,
            pts: 0,
            sample_rate: 48_000,
            channels: 2,
            complete: true,
            samples: vec![0.0; 48_000 * 2 / 10],
        };
        assert_eq!(samples.frames(), 4_800);
        assert_eq!(samples.duration_micros(), 100_000);
    }

    #[test]
    fn test_frame_payload_recycling() {
        let mut payload: Vec<u8> = Vec::with_capacity(1024);
        payload.extend_from_slice(&[9; 16]);
        let frame = VideoFrame::with_payload(1, payload);
        assert!(!frame.is_complete());
        assert_eq!(frame.track(), 1);

        let mut back = frame.into_payload();
        back.reset();
        assert!(back.is_empty());
        assert!(back.footprint() >= 1024, "Capacity should survive reset");
    }

    #[test]
    fn test_track_info_describe_and_frame_duration() {
        let mut video = TrackInfo::new(0, TrackKind::Video, "h264");
        video.width = Some(1920);
        video.height = Some(1080);
        video.frame_rate = Some(25.0);

        assert_eq!(video.frame_duration_micros(), Some(40_000));
        assert_eq!(video.describe(), "video h264 1920x1080 25.000fps");

        let audio = TrackInfo::new(1, TrackKind::Audio, "flac");
        assert_eq!(audio.frame_duration_micros(), None);
    }

    #[test]
    fn test_metadata_track_lookup() {
        let mut metadata = MediaMetadata::new("clip.mkv");
        metadata.tracks.push(TrackInfo::new(0, TrackKind::Video, "vp9"));
        metadata.tracks.push(TrackInfo::new(1, TrackKind::Audio, "opus"));
        metadata.tags.insert("title".to_string(), "Clip".to_string());

        assert!(metadata.has_audio());
        assert!(metadata.has_video());
        assert_eq!(metadata.first_track(TrackKind::Audio).map(|t| t.index), Some(1));
        assert_eq!(metadata.title(), Some("Clip"));
    }

    #[test]
    fn test_metadata_serializes_to_json() {
        let mut metadata = MediaMetadata::new("song.flac");
        metadata.duration_micros = Some(1_500_000);
        metadata.tracks.push(TrackInfo::new(0, TrackKind::Audio, "flac"));

        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("\"source\":\"song.flac\""));
        assert!(json.contains("\"kind\":\"Audio\""));

        let back: MediaMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }
}
