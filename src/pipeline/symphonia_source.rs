//! Container and audio coder backed by symphonia.
//!
//! Symphonia only ships audio codecs, so every non-audio track is reported as `Other`
//! and left to the demuxer to drop.

use log::{debug, trace};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;

use crate::error::{ContainerError, DecodeError};
use crate::models::{AudioSamples, MediaMetadata, Packet, TrackInfo, TrackKind, NO_TS};
use crate::pipeline::collaborators::{
    Coder, Container, ContainerOpener, DecodeStep, ReadStatus, SeekFlags, TrackCoder,
};
use crate::pipeline::time::{micros_to_time_base_units, samples_duration_micros, time_base_units_to_micros};

/// Opens local files through the symphonia probe
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaOpener;

impl ContainerOpener for SymphoniaOpener {
    fn open(&self, reference: &str) -> Result<Box<dyn Container>, ContainerError> {
        Ok(Box::new(SymphoniaContainer::open(reference)?))
    }
}

struct SourceTrack {
    id: u32,
    info: TrackInfo,
    params: CodecParameters,
    time_base: Option<TimeBase>,
}

impl SourceTrack {
    fn to_micros(&self, units: u64) -> i64 {
        match self.time_base {
            Some(tb) => time_base_units_to_micros(tb.numer, tb.denom, units as i64),
            None => NO_TS,
        }
    }

    fn to_units(&self, micros: i64) -> u64 {
        match self.time_base {
            Some(tb) => micros_to_time_base_units(tb.numer, tb.denom, micros).max(0) as u64,
            None => 0,
        }
    }
}

pub struct SymphoniaContainer {
    reader: Box<dyn FormatReader>,
    tracks: Vec<SourceTrack>,
    metadata: MediaMetadata,
    /// After an accurate seek: (track id, timestamp) before which that track's packets are skipped
    skip_until: Option<(u32, u64)>,
}

impl SymphoniaContainer {
    pub fn open(reference: &str) -> Result<Self, ContainerError> {
        let open_failed = |reason: String| ContainerError::OpenFailed {
            reference: reference.to_string(),
            reason,
        };

        let path = Path::new(reference);
        let file = File::open(path).map_err(|e| open_failed(e.to_string()))?;
        let source = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mut probed = symphonia::default::get_probe()
            .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| open_failed(e.to_string()))?;

        let mut tags = BTreeMap::new();
        if let Some(revision) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            collect_tags(revision, &mut tags);
        }
        let mut reader = probed.format;
        if let Some(revision) = reader.metadata().current() {
            collect_tags(revision, &mut tags);
        }

        let tracks: Vec<SourceTrack> = reader
            .tracks()
            .iter()
            .enumerate()
            .map(|(index, track)| describe_track(index, track.id, &track.codec_params))
            .collect();

        let metadata = MediaMetadata {
            source: reference.to_string(),
            duration_micros: tracks.iter().filter_map(|t| t.info.duration_micros).max(),
            tracks: tracks.iter().map(|t| t.info.clone()).collect(),
            tags,
        };
        debug!("Opened {} with {} track(s)", reference, tracks.len());

        Ok(Self {
            reader,
            tracks,
            metadata,
            skip_until: None,
        })
    }

    fn index_of(&self, track_id: u32) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }
}

fn describe_track(index: usize, id: u32, params: &CodecParameters) -> SourceTrack {
    let is_audio = params.codec != CODEC_TYPE_NULL && params.sample_rate.is_some();
    let kind = if is_audio { TrackKind::Audio } else { TrackKind::Other };
    let codec = symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map_or("unknown", |d| d.short_name);

    let time_base = params
        .time_base
        .or_else(|| params.sample_rate.map(|rate| TimeBase::new(1, rate)));

    let mut info = TrackInfo::new(index, kind, codec);
    info.sample_rate = params.sample_rate;
    info.channels = params.channels.map(|c| c.count() as u16);
    info.duration_micros = match (params.n_frames, time_base, params.sample_rate) {
        (Some(frames), Some(tb), _) => Some(time_base_units_to_micros(tb.numer, tb.denom, frames as i64)),
        (Some(frames), None, Some(rate)) => Some(samples_duration_micros(rate, frames)),
        _ => None,
    };

    SourceTrack {
        id,
        info,
        params: params.clone(),
        time_base,
    }
}

fn collect_tags(revision: &MetadataRevision, tags: &mut BTreeMap<String, String>) {
    for tag in revision.tags() {
        let key = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => "title",
            Some(StandardTagKey::Artist) => "artist",
            Some(StandardTagKey::Album) => "album",
            Some(StandardTagKey::AlbumArtist) => "album_artist",
            Some(StandardTagKey::Genre) => "genre",
            Some(StandardTagKey::Date) => "date",
            Some(StandardTagKey::TrackNumber) => "track",
            _ => continue,
        };
        tags.entry(key.to_string()).or_insert_with(|| tag.value.to_string());
    }
}

impl Container for SymphoniaContainer {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_info(&self, index: usize) -> Option<TrackInfo> {
        self.tracks.get(index).map(|t| t.info.clone())
    }

    fn open_track_coder(&mut self, index: usize) -> Result<TrackCoder, ContainerError> {
        let track = self.tracks.get(index).ok_or(ContainerError::NoSuchTrack { index })?;
        if track.info.kind != TrackKind::Audio {
            return Err(ContainerError::CoderUnavailable {
                index,
                reason: format!("no decoder for {} track", track.info.kind),
            });
        }

        let decoder = symphonia::default::get_codecs()
            .make(&track.params, &DecoderOptions::default())
            .map_err(|e| ContainerError::CoderUnavailable {
                index,
                reason: e.to_string(),
            })?;

        Ok(TrackCoder::Audio(Box::new(SymphoniaAudioCoder {
            decoder,
            track_id: track.id,
            time_base: track.time_base,
            scratch: None,
        })))
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<ReadStatus, ContainerError> {
        let next = loop {
            let next = match self.reader.next_packet() {
                Ok(next) => next,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(ReadStatus::EndOfStream);
                }
                Err(e) => return Err(ContainerError::ReadFailed(e.to_string())),
            };

            match self.skip_until {
                Some((track_id, required)) if next.track_id() == track_id => {
                    if next.ts() < required {
                        trace!("Skipping packet at ts {} before seek point {}", next.ts(), required);
                        continue;
                    }
                    self.skip_until = None;
                }
                _ => {}
            }
            break next;
        };

        // Tracks added after probing are reported past the end so the demuxer ignores them
        let index = self.index_of(next.track_id()).unwrap_or(self.tracks.len());
        let (pts, duration) = match self.tracks.get(index) {
            Some(track) => (track.to_micros(next.ts()), track.to_micros(next.dur())),
            None => (NO_TS, 0),
        };

        packet.track = index;
        packet.pts = pts;
        packet.duration = duration.max(0);
        packet.keyframe = true;
        packet.data.clear();
        packet.data.extend_from_slice(next.buf());
        Ok(ReadStatus::Packet)
    }

    fn seek(&mut self, track: usize, target: i64, flags: SeekFlags) -> Result<(), ContainerError> {
        let source = self.tracks.get(track).ok_or(ContainerError::NoSuchTrack { index: track })?;
        let mode = if flags.any_frame { SeekMode::Accurate } else { SeekMode::Coarse };
        let to = SeekTo::TimeStamp {
            ts: source.to_units(target),
            track_id: source.id,
        };

        let seeked = self
            .reader
            .seek(mode, to)
            .map_err(|e| ContainerError::SeekFailed(e.to_string()))?;
        debug!(
            "Container seek to {}us landed at {}us",
            target,
            source.to_micros(seeked.actual_ts)
        );

        // Accurate seeks can land before the target; the lead-in is dropped on read
        self.skip_until = match mode {
            SeekMode::Accurate if seeked.actual_ts < seeked.required_ts => Some((seeked.track_id, seeked.required_ts)),
            _ => None,
        };
        Ok(())
    }

    fn metadata(&self) -> MediaMetadata {
        self.metadata.clone()
    }
}

/// Decodes one packet per call into interleaved f32 samples
struct SymphoniaAudioCoder {
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    scratch: Option<(SignalSpec, SampleBuffer<f32>)>,
}

impl Coder<AudioSamples> for SymphoniaAudioCoder {
    fn decode(&mut self, packet: &Packet, offset: usize, frame: &mut AudioSamples) -> Result<DecodeStep, DecodeError> {
        let data = packet.data.get(offset..).unwrap_or_default();
        let ts = match self.time_base {
            Some(tb) if packet.pts != NO_TS => micros_to_time_base_units(tb.numer, tb.denom, packet.pts).max(0) as u64,
            _ => 0,
        };
        let input = symphonia::core::formats::Packet::new_from_slice(self.track_id, ts, 0, data);

        let decoded = match self.decoder.decode(&input) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                return Err(DecodeError::CorruptPacket {
                    pts: packet.pts,
                    reason: reason.to_string(),
                });
            }
            Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
        };

        let spec = *decoded.spec();
        let capacity = decoded.capacity() as u64;
        let needed = capacity * spec.channels.count() as u64;
        let reuse = matches!(&self.scratch, Some((s, buf)) if *s == spec && buf.capacity() as u64 >= needed);
        if !reuse {
            self.scratch = Some((spec, SampleBuffer::new(capacity, spec)));
        }

        let Some((_, buffer)) = self.scratch.as_mut() else {
            return Err(DecodeError::DecodeFailed("sample buffer unavailable".to_string()));
        };
        buffer.copy_interleaved_ref(decoded);

        frame.samples.clear();
        frame.samples.extend_from_slice(buffer.samples());
        frame.sample_rate = spec.rate;
        frame.channels = spec.channels.count() as u16;
        frame.pts = packet.pts;
        frame.complete = true;

        Ok(DecodeStep {
            consumed: data.len(),
            complete: true,
        })
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }
}
