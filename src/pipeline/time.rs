//! Conversions between timestamps, frame counts and byte counts.

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// PCM layout used for byte/time conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub sample_size_bits: u16,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, sample_size_bits: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            sample_size_bits,
            channels,
        }
    }

    /// Bytes occupied by one sample frame across all channels
    pub fn bytes_per_frame(&self) -> u64 {
        (self.sample_size_bits as u64 / 8) * self.channels as u64
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_frame() * self.sample_rate as u64
    }
}

/// Format a stream position as `HH:MM:SS:FF` for the given frame rate
pub fn timecode(frame_rate: f64, micros: i64) -> String {
    let micros = micros.max(0);
    let seconds = micros / MICROS_PER_SECOND;
    let frames = if frame_rate > 0.0 {
        let per_second = frame_rate.round().max(1.0) as i64;
        micros_to_frames(frame_rate, micros) % per_second
    } else {
        0
    };

    format!(
        "{:02}:{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60,
        frames
    )
}

/// Format a stream position as `HH:MM:SS`
pub fn readable_time(micros: i64) -> String {
    let seconds = micros.max(0) / MICROS_PER_SECOND;
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds / 60) % 60, seconds % 60)
}

/// Number of whole video frames elapsed at `micros`
pub fn micros_to_frames(frame_rate: f64, micros: i64) -> i64 {
    if frame_rate <= 0.0 {
        return 0;
    }
    ((micros as f64) * frame_rate / MICROS_PER_SECOND as f64).floor() as i64
}

/// Duration of `frames` video frames in microseconds
pub fn video_frames_to_micros(frame_rate: f64, frames: i64) -> i64 {
    if frame_rate <= 0.0 {
        return 0;
    }
    ((frames as f64) * MICROS_PER_SECOND as f64 / frame_rate).round() as i64
}

/// Milliseconds of playback contained in `bytes` of PCM data
pub fn audio_bytes_to_millis(format: &AudioFormat, bytes: u64) -> u64 {
    let per_second = format.bytes_per_second();
    if per_second == 0 {
        return 0;
    }
    bytes.saturating_mul(1000) / per_second
}

/// Number of sample frames that play for `millis`
pub fn millis_to_audio_frames(format: &AudioFormat, millis: u64) -> u64 {
    (format.sample_rate as u64).saturating_mul(millis) / 1000
}

/// Convert microseconds to units of a `num/den` seconds time base
pub fn micros_to_time_base_units(num: u32, den: u32, micros: i64) -> i64 {
    if num == 0 {
        return 0;
    }
    let units = (micros as i128 * den as i128) / (num as i128 * MICROS_PER_SECOND as i128);
    units.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Convert units of a `num/den` seconds time base to microseconds
pub fn time_base_units_to_micros(num: u32, den: u32, units: i64) -> i64 {
    if den == 0 {
        return 0;
    }
    let micros = (units as i128 * num as i128 * MICROS_PER_SECOND as i128) / den as i128;
    micros.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Playback length of `frames` sample frames at `sample_rate`
pub fn samples_duration_micros(sample_rate: u32, frames: u64) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    let micros = frames as i128 * MICROS_PER_SECOND as i128 / sample_rate as i128;
    micros.min(i64::MAX as i128) as i64
}
