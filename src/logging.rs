use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::pipeline::events::PipelineEvent;
use crate::pipeline::time::readable_time;

/// Environment variable selecting the log level
pub const LOG_LEVEL_ENV: &str = "MPIPE_LOG_LEVEL";

/// Pipeline event kept in the logger history
#[derive(Debug, Clone)]
pub struct LoggedEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: PipelineEventType,
    pub duration: Option<Duration>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEventType {
    SourceLoaded,
    PlaybackStarted,
    PlaybackPaused,
    PlaybackResumed,
    Seek,
    PlaybackStopped,
    ClipEnded,
    BufferFull,
    BufferEmpty,
    DecodeError,
    StageDied,
    PlaybackFinished,
    SlowOperation,
}

impl PipelineEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineEventType::SourceLoaded => "SOURCE_LOADED",
            PipelineEventType::PlaybackStarted => "PLAYBACK_STARTED",
            PipelineEventType::PlaybackPaused => "PLAYBACK_PAUSED",
            PipelineEventType::PlaybackResumed => "PLAYBACK_RESUMED",
            PipelineEventType::Seek => "SEEK",
            PipelineEventType::PlaybackStopped => "PLAYBACK_STOPPED",
            PipelineEventType::ClipEnded => "CLIP_ENDED",
            PipelineEventType::BufferFull => "BUFFER_FULL",
            PipelineEventType::BufferEmpty => "BUFFER_EMPTY",
            PipelineEventType::DecodeError => "DECODE_ERROR",
            PipelineEventType::StageDied => "STAGE_DIED",
            PipelineEventType::PlaybackFinished => "PLAYBACK_FINISHED",
            PipelineEventType::SlowOperation => "SLOW_OPERATION",
        }
    }
}

/// Logger setup plus a bounded history of pipeline events
#[derive(Clone)]
pub struct PipelineLogger {
    events: Arc<Mutex<VecDeque<LoggedEvent>>>,
    max_events: usize,
}

impl Default for PipelineLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineLogger {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            max_events: max_events.max(1),
        }
    }

    /// Initialize env_logger, level from `MPIPE_LOG_LEVEL` (default info)
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());

        let mut builder = env_logger::Builder::new();
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });
        builder.filter_level(parse_level(&log_level));
        builder.try_init()?;

        info!("Pipeline logging initialized with level: {}", log_level);
        Ok(())
    }

    pub fn log_event(&self, event_type: PipelineEventType, details: String, duration: Option<Duration>) {
        match event_type {
            PipelineEventType::BufferFull | PipelineEventType::BufferEmpty => {
                debug!("[{}] {}", event_type.as_str(), details)
            }
            PipelineEventType::DecodeError => warn!("[{}] {}", event_type.as_str(), details),
            PipelineEventType::StageDied => error!("[{}] {}", event_type.as_str(), details),
            PipelineEventType::SlowOperation => {
                warn!("[{}] {} (duration: {:?})", event_type.as_str(), details, duration)
            }
            _ => info!("[{}] {}", event_type.as_str(), details),
        }

        let mut events = self.events.lock();
        events.push_back(LoggedEvent {
            timestamp: Utc::now(),
            event_type,
            duration,
            details,
        });
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    /// Record a bus event. Per-frame and tick events are not kept; returns whether it was recorded.
    pub fn observe(&self, event: &PipelineEvent) -> bool {
        let (event_type, details) = match event {
            PipelineEvent::MediaLoaded(metadata) => (
                PipelineEventType::SourceLoaded,
                format!("Loaded '{}' ({} track(s))", metadata.source, metadata.tracks.len()),
            ),
            PipelineEvent::Started => (PipelineEventType::PlaybackStarted, "Playback started".to_string()),
            PipelineEvent::Paused => (PipelineEventType::PlaybackPaused, "Playback paused".to_string()),
            PipelineEvent::Unpaused => (PipelineEventType::PlaybackResumed, "Playback resumed".to_string()),
            PipelineEvent::Seeked(target) => (PipelineEventType::Seek, format!("Seek to {}", readable_time(*target))),
            PipelineEvent::Stopped => (PipelineEventType::PlaybackStopped, "Playback stopped".to_string()),
            PipelineEvent::ClipEnded => (PipelineEventType::ClipEnded, "Container exhausted".to_string()),
            PipelineEvent::BufferFull(name) => (PipelineEventType::BufferFull, format!("Buffer '{}' is full", name)),
            PipelineEvent::BufferEmpty(name) => (PipelineEventType::BufferEmpty, format!("Buffer '{}' is empty", name)),
            PipelineEvent::PlaybackFinished => (PipelineEventType::PlaybackFinished, "Playback finished".to_string()),
            PipelineEvent::Error(message) if message.contains("stopped unexpectedly") => {
                (PipelineEventType::StageDied, message.clone())
            }
            PipelineEvent::Error(message) => (PipelineEventType::DecodeError, message.clone()),
            PipelineEvent::StreamTimeTick(_)
            | PipelineEvent::FirstFramePresented
            | PipelineEvent::VideoFramePresented(_)
            | PipelineEvent::AudioFramePresented(_)
            | PipelineEvent::PlaySpeedChanged(_) => return false,
        };
        self.log_event(event_type, details, None);
        true
    }

    pub fn log_slow_operation(&self, operation: &str, duration: Duration, threshold: Duration) {
        self.log_event(
            PipelineEventType::SlowOperation,
            format!(
                "{} took {}ms (threshold: {}ms)",
                operation,
                duration.as_millis(),
                threshold.as_millis()
            ),
            Some(duration),
        );
    }

    /// The last `count` events, oldest first
    pub fn recent_events(&self, count: usize) -> Vec<LoggedEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn statistics(&self) -> EventStatistics {
        let events = self.events.lock();
        let mut stats = EventStatistics {
            total_events: events.len(),
            ..EventStatistics::default()
        };

        for event in events.iter() {
            match event.event_type {
                PipelineEventType::Seek => stats.seeks += 1,
                PipelineEventType::BufferFull => stats.buffer_full += 1,
                PipelineEventType::BufferEmpty => stats.buffer_empty += 1,
                PipelineEventType::DecodeError => stats.errors += 1,
                PipelineEventType::StageDied => stats.stage_deaths += 1,
                PipelineEventType::SlowOperation => stats.slow_operations += 1,
                _ => {}
            }
        }
        stats
    }
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Counts over the logged history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStatistics {
    pub total_events: usize,
    pub seeks: usize,
    pub buffer_full: usize,
    pub buffer_empty: usize,
    pub errors: usize,
    pub stage_deaths: usize,
    pub slow_operations: usize,
}

/// Measures one engine operation
pub struct OperationTimer {
    start_time: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        let operation_name = operation_name.into();
        trace!("Starting operation: {}", operation_name);
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish(self) -> Duration {
        let duration = self.elapsed();
        trace!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        duration
    }

    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let duration = self.elapsed();
        if duration > threshold {
            warn!(
                "Operation '{}' took {}ms (threshold: {}ms)",
                self.operation_name,
                duration.as_millis(),
                threshold.as_millis()
            );
        } else {
            debug!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        }
        duration
    }
}
