use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
pub use crate::pipeline::clock::ClockKind;

/// Engine configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub video_packet_buffer_size: usize,
    pub audio_packet_buffer_size: usize,
    pub video_frame_buffer_size: usize,
    pub audio_frame_buffer_size: usize,
    pub clock: ClockKind,
    pub auto_start: bool,
    pub stop_after_first_frame: bool,
    pub use_object_pools: bool,
    pub pool_max_idle: usize,
    pub check_memory: bool,
    pub check_threads: bool,
    pub monitor_interval_ms: u64,
    pub staleness_tolerance_micros: i64,
    pub audio_render_lead_micros: i64,
    pub video_render_lead_micros: i64,
    pub default_frame_duration_micros: i64,
    pub tick_event_interval_ms: u64,
    pub wait_timeout_ms: u64,
    pub play_speed: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            video_packet_buffer_size: 1000,
            audio_packet_buffer_size: 1000,
            video_frame_buffer_size: 50,
            audio_frame_buffer_size: 100,
            clock: ClockKind::Ticking,
            auto_start: true,
            stop_after_first_frame: false,
            use_object_pools: false,
            pool_max_idle: 64,
            check_memory: false,
            check_threads: false,
            monitor_interval_ms: 1000,
            staleness_tolerance_micros: 40_000,
            audio_render_lead_micros: 50_000,
            video_render_lead_micros: 10_000,
            default_frame_duration_micros: 40_000,
            tick_event_interval_ms: 100,
            wait_timeout_ms: 10,
            play_speed: 1.0,
        }
    }
}

/// Keys accepted by `ConfigManager::set_value`
pub const CONFIG_KEYS: &[&str] = &[
    "video_packet_buffer_size",
    "audio_packet_buffer_size",
    "video_frame_buffer_size",
    "audio_frame_buffer_size",
    "clock",
    "auto_start",
    "stop_after_first_frame",
    "use_object_pools",
    "pool_max_idle",
    "check_memory",
    "check_threads",
    "monitor_interval_ms",
    "staleness_tolerance_micros",
    "audio_render_lead_micros",
    "video_render_lead_micros",
    "default_frame_duration_micros",
    "tick_event_interval_ms",
    "wait_timeout_ms",
    "play_speed",
];

impl EngineConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("video_packet_buffer_size", self.video_packet_buffer_size),
            ("audio_packet_buffer_size", self.audio_packet_buffer_size),
            ("video_frame_buffer_size", self.video_frame_buffer_size),
            ("audio_frame_buffer_size", self.audio_frame_buffer_size),
        ];
        for (key, capacity) in capacities {
            if capacity == 0 {
                return Err(invalid(key, capacity));
            }
        }

        if !self.play_speed.is_finite() || self.play_speed <= 0.0 {
            return Err(invalid("play_speed", self.play_speed));
        }
        if self.wait_timeout_ms == 0 {
            return Err(invalid("wait_timeout_ms", self.wait_timeout_ms));
        }
        if self.staleness_tolerance_micros < 0 {
            return Err(invalid("staleness_tolerance_micros", self.staleness_tolerance_micros));
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }

    /// Assign one setting from its textual form
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "video_packet_buffer_size" => self.video_packet_buffer_size = parse(key, value)?,
            "audio_packet_buffer_size" => self.audio_packet_buffer_size = parse(key, value)?,
            "video_frame_buffer_size" => self.video_frame_buffer_size = parse(key, value)?,
            "audio_frame_buffer_size" => self.audio_frame_buffer_size = parse(key, value)?,
            "clock" => self.clock = parse(key, value)?,
            "auto_start" => self.auto_start = parse(key, value)?,
            "stop_after_first_frame" => self.stop_after_first_frame = parse(key, value)?,
            "use_object_pools" => self.use_object_pools = parse(key, value)?,
            "pool_max_idle" => self.pool_max_idle = parse(key, value)?,
            "check_memory" => self.check_memory = parse(key, value)?,
            "check_threads" => self.check_threads = parse(key, value)?,
            "monitor_interval_ms" => self.monitor_interval_ms = parse(key, value)?,
            "staleness_tolerance_micros" => self.staleness_tolerance_micros = parse(key, value)?,
            "audio_render_lead_micros" => self.audio_render_lead_micros = parse(key, value)?,
            "video_render_lead_micros" => self.video_render_lead_micros = parse(key, value)?,
            "default_frame_duration_micros" => self.default_frame_duration_micros = parse(key, value)?,
            "tick_event_interval_ms" => self.tick_event_interval_ms = parse(key, value)?,
            "wait_timeout_ms" => self.wait_timeout_ms = parse(key, value)?,
            "play_speed" => self.play_speed = parse(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: EngineConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_config(&config_path).unwrap_or_default();

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut EngineConfig),
    {
        updater(&mut self.config);
        self.save_config()
    }

    pub fn set_play_speed(&mut self, speed: f64) -> Result<(), ConfigError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(invalid("play_speed", speed));
        }
        self.config.play_speed = speed;
        self.save_config()
    }

    /// Set a key from text, validate the result, and persist it
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut updated = self.config.clone();
        updated.set_value(key, value)?;
        updated.validate()?;
        self.config = updated;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = EngineConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("media-pipeline");

        std::fs::create_dir_all(&config_dir).map_err(ConfigError::IoError)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }

        let config_content = std::fs::read_to_string(path).map_err(ConfigError::IoError)?;

        let config: EngineConfig =
            toml::from_str(&config_content).map_err(ConfigError::DeserializationError)?;

        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }

        let config_content =
            toml::to_string_pretty(&self.config).map_err(ConfigError::SerializationError)?;

        std::fs::write(&self.config_path, config_content).map_err(ConfigError::IoError)?;

        Ok(())
    }
}
