use crate::error::{ErrorSeverity, PipelineError};
use crate::models::{MediaMetadata, NO_TS};
use crate::pipeline::engine::EngineStatus;
use crate::pipeline::events::PipelineEvent;
use crate::pipeline::time::readable_time;

/// Status display formatter for the CLI
pub struct StatusDisplay;

impl StatusDisplay {
    /// Engine state, position, buffers, pools and stages
    pub fn display_full_status(status: &EngineStatus) {
        print!("{}", Self::render_full_status(status));
    }

    pub fn render_full_status(status: &EngineStatus) -> String {
        let mut out = String::new();
        out.push_str("┌─ Engine Status ─────────────────────────────────────────┐\n");
        out.push_str(&format!("│ State: {}\n", status.state));

        match &status.source {
            Some(source) => {
                out.push_str(&format!("│ Source: {}\n", Self::truncate(source, 48)));
                out.push_str(&format!(
                    "│ Position: {} / {}\n",
                    Self::format_time(status.stream_time),
                    status.duration.map(Self::format_time).unwrap_or_else(|| "--:--:--".to_string())
                ));
                if let Some(progress) = Self::progress(status) {
                    out.push_str(&format!(
                        "│ [{}] {:.1}%\n",
                        Self::create_progress_bar(progress, 40),
                        progress * 100.0
                    ));
                }
                out.push_str(&format!(
                    "│ Clock: {} ({})  Speed: {:.2}x\n",
                    status.clock,
                    if status.sync_ready { "synced" } else { "waiting for first frame" },
                    status.play_speed
                ));
            }
            None => out.push_str("│ No source loaded\n"),
        }

        if !status.buffers.is_empty() {
            out.push_str("│\n│ Buffers:\n");
            for level in &status.buffers {
                out.push_str(&format!(
                    "│   {:<14} [{}] {:>5}/{:<5}\n",
                    level.name,
                    Self::create_progress_bar(level.fill(), 20),
                    level.size,
                    level.capacity
                ));
            }
        }

        if !status.pools.is_empty() {
            out.push_str("│\n│ Pools:\n");
            for pool in &status.pools {
                out.push_str(&format!(
                    "│   {:<14} active {:<5} idle {:<5} created {:<6} reused {}\n",
                    pool.name, pool.active, pool.idle, pool.created, pool.reused
                ));
            }
        }

        if !status.stages.is_empty() {
            out.push_str("│\n│ Stages:\n");
            for stage in &status.stages {
                out.push_str(&format!("│   {:<14} {}\n", stage.name, stage.phase));
            }
        }

        if status.source.is_some() {
            out.push_str(&format!(
                "│\n│ Presented: {} video, {} audio ({} stale dropped)\n",
                status.presented_video, status.presented_audio, status.stale_dropped
            ));
        }
        out.push_str("└─────────────────────────────────────────────────────────┘\n");
        out
    }

    /// One-line status
    pub fn display_compact_status(status: &EngineStatus) {
        println!("{}", Self::render_compact_status(status));
    }

    pub fn render_compact_status(status: &EngineStatus) -> String {
        match &status.source {
            Some(source) => format!(
                "{} | {} | {} | {:.2}x",
                status.state,
                Self::truncate(source, 40),
                Self::format_time(status.stream_time),
                status.play_speed
            ),
            None => format!("{} | No source loaded", status.state),
        }
    }

    pub fn display_metadata(metadata: &MediaMetadata) {
        print!("{}", Self::render_metadata(metadata));
    }

    pub fn render_metadata(metadata: &MediaMetadata) -> String {
        let mut out = String::new();
        out.push_str("┌─ Media Information ─────────────────────────────────────┐\n");
        out.push_str(&format!("│ Source: {}\n", Self::truncate(&metadata.source, 48)));
        if let Some(title) = metadata.title() {
            out.push_str(&format!("│ Title: {}\n", Self::truncate(title, 49)));
        }
        if let Some(duration) = metadata.duration_micros {
            out.push_str(&format!("│ Duration: {}\n", Self::format_time(duration)));
        }
        out.push_str(&format!("│ Tracks: {}\n", metadata.tracks.len()));
        for track in &metadata.tracks {
            out.push_str(&format!("│   #{} {}\n", track.index, track.describe()));
        }
        let other_tags: Vec<_> = metadata.tags.iter().filter(|(key, _)| key.as_str() != "title").collect();
        if !other_tags.is_empty() {
            out.push_str("│ Tags:\n");
            for (key, value) in other_tags {
                out.push_str(&format!("│   {}: {}\n", key, Self::truncate(value, 40)));
            }
        }
        out.push_str("└─────────────────────────────────────────────────────────┘\n");
        out
    }

    /// Text for a bus event, `None` for per-frame events
    pub fn format_event(event: &PipelineEvent) -> Option<String> {
        let text = match event {
            PipelineEvent::MediaLoaded(metadata) => format!(
                "Loaded {} ({} track(s){})",
                metadata.title().unwrap_or(metadata.source.as_str()),
                metadata.tracks.len(),
                metadata
                    .duration_micros
                    .map(|d| format!(", {}", Self::format_time(d)))
                    .unwrap_or_default()
            ),
            PipelineEvent::Started => "▶ Playing".to_string(),
            PipelineEvent::Paused => "⏸ Paused".to_string(),
            PipelineEvent::Unpaused => "▶ Resumed".to_string(),
            PipelineEvent::Stopped => "⏹ Stopped".to_string(),
            PipelineEvent::PlaybackFinished => "Playback finished".to_string(),
            PipelineEvent::ClipEnded => "End of media reached, draining".to_string(),
            PipelineEvent::Seeked(target) => format!("Seeked to {}", Self::format_time(*target)),
            PipelineEvent::PlaySpeedChanged(speed) => format!("Speed {:.2}x", speed),
            PipelineEvent::FirstFramePresented => "First frame presented".to_string(),
            PipelineEvent::Error(message) => format!("✗ {}", message),
            PipelineEvent::BufferFull(_)
            | PipelineEvent::BufferEmpty(_)
            | PipelineEvent::StreamTimeTick(_)
            | PipelineEvent::VideoFramePresented(_)
            | PipelineEvent::AudioFramePresented(_) => return None,
        };
        Some(text)
    }

    /// Error box with the user message and up to three suggestions
    pub fn display_error(error: &PipelineError) {
        let severity = error.severity();
        let severity_icon = match severity {
            ErrorSeverity::Info => "ℹ",
            ErrorSeverity::Warning => "⚠",
            ErrorSeverity::Error => "✗",
            ErrorSeverity::Critical => "🔥",
        };

        eprintln!("┌─ {} {} ─────────────────────────────────────────────────┐", severity_icon, severity.as_str());
        for line in Self::wrap_text(&error.user_message(), 55) {
            eprintln!("│ {}", line);
        }

        let suggestions = error.recovery_suggestions();
        if !suggestions.is_empty() {
            eprintln!("│");
            eprintln!("│ Suggestions:");
            for suggestion in suggestions.iter().take(3) {
                for line in Self::wrap_text(&format!("• {}", suggestion), 53) {
                    eprintln!("│   {}", line);
                }
            }
        }
        eprintln!("└─────────────────────────────────────────────────────────┘");
    }

    fn progress(status: &EngineStatus) -> Option<f32> {
        let duration = status.duration.filter(|d| *d > 0)?;
        if status.stream_time == NO_TS {
            return None;
        }
        Some((status.stream_time as f64 / duration as f64).clamp(0.0, 1.0) as f32)
    }

    /// `HH:MM:SS`, or dashes when unknown
    pub fn format_time(micros: i64) -> String {
        if micros == NO_TS {
            "--:--:--".to_string()
        } else {
            readable_time(micros)
        }
    }

    fn wrap_text(text: &str, width: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current_line = String::new();

        for word in text.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.len() + word.len() < width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(std::mem::take(&mut current_line));
                current_line = word.to_string();
            }
        }
        if !current_line.is_empty() {
            lines.push(current_line);
        }
        lines
    }

    /// Shorten to `max_len` characters with a trailing ellipsis
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len || max_len <= 3 {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{}...", kept)
        }
    }

    pub fn create_progress_bar(progress: f32, width: usize) -> String {
        let filled = ((progress.clamp(0.0, 1.0) * width as f32) as usize).min(width);
        format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
    }
}
