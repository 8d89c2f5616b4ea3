use thiserror::Error;

/// Top-level error type for the media pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("CLI parse error: {0}")]
    Parse(#[from] crate::cli::ParseError),
}

impl PipelineError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Engine(err) => err.user_message(),
            PipelineError::Container(err) => err.user_message(),
            PipelineError::Decode(err) => err.user_message(),
            PipelineError::Output(err) => err.user_message(),
            PipelineError::Clock(err) => err.user_message(),
            PipelineError::Config(err) => err.user_message(),
            PipelineError::File(err) => Self::format_file_error(err),
            PipelineError::Parse(err) => format!("Command error: {}", err),
        }
    }

    /// Get suggested recovery actions for the error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PipelineError::Engine(err) => err.recovery_suggestions(),
            PipelineError::Container(err) => err.recovery_suggestions(),
            PipelineError::Decode(err) => err.recovery_suggestions(),
            PipelineError::Output(err) => err.recovery_suggestions(),
            PipelineError::Clock(err) => err.recovery_suggestions(),
            PipelineError::Config(err) => err.recovery_suggestions(),
            PipelineError::File(_) => vec![
                "Check that the file path is correct".to_string(),
                "Check file permissions".to_string(),
            ],
            PipelineError::Parse(_) => vec!["Type 'help' to see available commands".to_string()],
        }
    }

    /// Check if this error allows playback to continue
    pub fn is_recoverable(&self) -> bool {
        match self {
            PipelineError::Engine(err) => err.is_recoverable(),
            PipelineError::Container(err) => err.is_recoverable(),
            PipelineError::Decode(err) => err.is_recoverable(),
            PipelineError::Output(err) => err.is_recoverable(),
            PipelineError::Clock(err) => err.is_recoverable(),
            PipelineError::Config(err) => err.is_recoverable(),
            PipelineError::File(_) => false,
            PipelineError::Parse(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PipelineError::Engine(EngineError::InvalidState { .. }) => ErrorSeverity::Warning,
            PipelineError::Engine(EngineError::NoSource) => ErrorSeverity::Info,
            PipelineError::Engine(EngineError::Load(_)) => ErrorSeverity::Critical,
            PipelineError::Engine(_) => ErrorSeverity::Error,
            PipelineError::Container(ContainerError::OpenFailed { .. }) => ErrorSeverity::Critical,
            PipelineError::Container(_) => ErrorSeverity::Error,
            PipelineError::Decode(_) => ErrorSeverity::Warning,
            PipelineError::Output(_) => ErrorSeverity::Error,
            PipelineError::Clock(_) => ErrorSeverity::Warning,
            PipelineError::Config(_) => ErrorSeverity::Warning,
            PipelineError::File(_) => ErrorSeverity::Error,
            PipelineError::Parse(_) => ErrorSeverity::Info,
        }
    }

    fn format_file_error(err: &std::io::Error) -> String {
        match err.kind() {
            std::io::ErrorKind::NotFound => "File or directory not found".to_string(),
            std::io::ErrorKind::PermissionDenied => "Permission denied - cannot access file".to_string(),
            _ => format!("File system error: {}", err),
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Errors raised by engine lifecycle operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No media source loaded")]
    NoSource,

    #[error("Operation '{operation}' not allowed in state {state}")]
    InvalidState { operation: String, state: String },

    #[error("Load failed: {0}")]
    Load(#[from] ContainerError),

    #[error("Seek to {target}us failed: {reason}")]
    SeekFailed { target: i64, reason: String },

    #[error("Invalid play speed: {0}")]
    InvalidPlaySpeed(f64),

    #[error("Failed to spawn thread '{name}': {reason}")]
    ThreadSpawn { name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),
}

impl EngineError {
    pub fn user_message(&self) -> String {
        match self {
            EngineError::NoSource => "Nothing is loaded - load a media file first".to_string(),
            EngineError::InvalidState { operation, state } => {
                format!("Cannot {} while the engine is {}", operation, state)
            }
            EngineError::Load(err) => format!("Could not load media: {}", err.user_message()),
            EngineError::SeekFailed { target, reason } => {
                format!("Seek to {:.2}s failed: {}", *target as f64 / 1_000_000.0, reason)
            }
            EngineError::InvalidPlaySpeed(speed) => {
                format!("Play speed {} is not valid - it must be a positive number", speed)
            }
            EngineError::ThreadSpawn { name, .. } => {
                format!("Could not start pipeline thread '{}'", name)
            }
            EngineError::InvalidConfig(msg) => format!("Engine configuration is invalid: {}", msg),
            EngineError::Buffer(err) => format!("Pipeline buffer could not be created: {}", err),
            EngineError::Output(err) => err.user_message(),
            EngineError::Clock(err) => err.user_message(),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            EngineError::NoSource => vec!["Use 'load <file>' to open a media file".to_string()],
            EngineError::InvalidState { .. } => vec![
                "Use 'status' to see the current engine state".to_string(),
            ],
            EngineError::Load(err) => err.recovery_suggestions(),
            EngineError::SeekFailed { .. } => vec![
                "Try seeking to a different position".to_string(),
                "Playback continues from the previous position".to_string(),
            ],
            EngineError::InvalidPlaySpeed(_) => vec![
                "Use a speed such as 0.5, 1.0 or 2.0".to_string(),
            ],
            EngineError::ThreadSpawn { .. } => vec![
                "Close other applications to free system resources".to_string(),
                "Restart the application".to_string(),
            ],
            EngineError::InvalidConfig(_) | EngineError::Buffer(_) => vec![
                "Check the configuration with 'config show'".to_string(),
                "Reset it with 'config reset'".to_string(),
            ],
            EngineError::Output(err) => err.recovery_suggestions(),
            EngineError::Clock(err) => err.recovery_suggestions(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::NoSource => true,
            EngineError::InvalidState { .. } => true,
            EngineError::Load(_) => false, // Pipeline never started
            EngineError::SeekFailed { .. } => true, // Prior state is kept
            EngineError::InvalidPlaySpeed(_) => true,
            EngineError::ThreadSpawn { .. } => false,
            EngineError::InvalidConfig(_) => false,
            EngineError::Buffer(_) => false,
            EngineError::Output(err) => err.is_recoverable(),
            EngineError::Clock(err) => err.is_recoverable(),
        }
    }
}

/// Errors constructing a pipeline buffer
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Buffer '{name}' needs a capacity of at least one")]
    ZeroCapacity { name: String },
}

/// Errors from the container (demux) collaborator
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Cannot open '{reference}': {reason}")]
    OpenFailed { reference: String, reason: String },

    #[error("No playable tracks in '{reference}'")]
    NoPlayableTracks { reference: String },

    #[error("Track {index} does not exist")]
    NoSuchTrack { index: usize },

    #[error("Read error: {0}")]
    ReadFailed(String),

    #[error("Seek error: {0}")]
    SeekFailed(String),

    #[error("Cannot open coder for track {index}: {reason}")]
    CoderUnavailable { index: usize, reason: String },
}

impl ContainerError {
    pub fn user_message(&self) -> String {
        match self {
            ContainerError::OpenFailed { reference, reason } => {
                format!("Media source '{}' could not be opened ({})", reference, reason)
            }
            ContainerError::NoPlayableTracks { reference } => {
                format!("'{}' has no audio or video track that can be played", reference)
            }
            ContainerError::NoSuchTrack { index } => format!("Track {} does not exist", index),
            ContainerError::ReadFailed(msg) => format!("Reading media data failed: {}", msg),
            ContainerError::SeekFailed(msg) => format!("Repositioning the media failed: {}", msg),
            ContainerError::CoderUnavailable { index, reason } => {
                format!("No decoder available for track {} ({})", index, reason)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ContainerError::OpenFailed { .. } => vec![
                "Check that the file exists and is readable".to_string(),
                "Check that the file is a supported media format".to_string(),
            ],
            ContainerError::NoPlayableTracks { .. } | ContainerError::CoderUnavailable { .. } => vec![
                "Convert the file to a supported format".to_string(),
            ],
            ContainerError::NoSuchTrack { .. } => vec!["Use 'info <file>' to list tracks".to_string()],
            ContainerError::ReadFailed(_) => vec![
                "Check if the file is completely downloaded".to_string(),
                "Try playing the file again".to_string(),
            ],
            ContainerError::SeekFailed(_) => vec![
                "Some files do not support seeking".to_string(),
                "Play from the beginning instead".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            ContainerError::OpenFailed { .. } => false,
            ContainerError::NoPlayableTracks { .. } => false,
            ContainerError::NoSuchTrack { .. } => false,
            ContainerError::ReadFailed(_) => false,
            ContainerError::SeekFailed(_) => true,
            ContainerError::CoderUnavailable { .. } => false,
        }
    }
}

/// Errors from a track coder
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Corrupt packet at {pts}us: {reason}")]
    CorruptPacket { pts: i64, reason: String },

    #[error("Unsupported codec: {codec}")]
    UnsupportedCodec { codec: String },

    #[error("Decode failed: {0}")]
    DecodeFailed(String),
}

impl DecodeError {
    pub fn user_message(&self) -> String {
        match self {
            DecodeError::CorruptPacket { pts, .. } => {
                format!("Skipped damaged data at {:.2}s", *pts as f64 / 1_000_000.0)
            }
            DecodeError::UnsupportedCodec { codec } => {
                format!("Codec '{}' is not supported", codec)
            }
            DecodeError::DecodeFailed(msg) => format!("Failed to decode media data: {}", msg),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            DecodeError::CorruptPacket { .. } => vec![
                "Playback continues - the damaged frame was dropped".to_string(),
            ],
            DecodeError::UnsupportedCodec { .. } => vec![
                "Convert the file to a supported codec".to_string(),
            ],
            DecodeError::DecodeFailed(_) => vec![
                "Verify the file is not corrupted".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            DecodeError::CorruptPacket { .. } => true,
            DecodeError::UnsupportedCodec { .. } => false,
            DecodeError::DecodeFailed(_) => true, // The stage drops the packet and continues
        }
    }
}

/// Errors from audio or video output collaborators
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Output device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Output stream error: {0}")]
    StreamError(String),

    #[error("Output already closed")]
    Closed,
}

impl OutputError {
    pub fn user_message(&self) -> String {
        match self {
            OutputError::DeviceUnavailable(msg) => format!("No output device could be used: {}", msg),
            OutputError::StreamError(msg) => format!("Output interrupted: {}", msg),
            OutputError::Closed => "The output has already been closed".to_string(),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            OutputError::DeviceUnavailable(_) => vec![
                "Check that your audio device is connected".to_string(),
                "Run with --no-audio-device for headless playback".to_string(),
            ],
            OutputError::StreamError(_) => vec!["Stop and start playback again".to_string()],
            OutputError::Closed => vec!["Load the media again".to_string()],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            OutputError::DeviceUnavailable(_) => false,
            OutputError::StreamError(_) => true,
            OutputError::Closed => false,
        }
    }
}

/// Stream clock errors
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("Invalid play speed: {0}")]
    InvalidSpeed(f64),

    #[error("Clock is stopped")]
    Stopped,
}

impl ClockError {
    pub fn user_message(&self) -> String {
        match self {
            ClockError::InvalidSpeed(speed) => format!("Play speed {} is not supported", speed),
            ClockError::Stopped => "The playback clock has been stopped".to_string(),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ClockError::InvalidSpeed(_) => vec!["Use a positive speed multiplier".to_string()],
            ClockError::Stopped => vec!["Load the media again to restart the clock".to_string()],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, ClockError::InvalidSpeed(_))
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => format!("Cannot access configuration file: {}", err),
            ConfigError::SerializationError(_) => "Failed to save configuration settings".to_string(),
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
            ConfigError::UnknownKey(key) => format!("'{}' is not a configuration setting", key),
            ConfigError::InvalidValue { key, value } => {
                format!("'{}' is not a valid value for {}", value, key)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ConfigError::ConfigDirNotFound => vec![
                "Check that you have write permissions to your home directory".to_string(),
                "Try creating the directory manually: ~/.config/media-pipeline/".to_string(),
            ],
            ConfigError::IoError(_) => vec![
                "Check file permissions for the configuration directory".to_string(),
                "Ensure the disk is not full".to_string(),
            ],
            ConfigError::SerializationError(_) => vec![
                "Configuration will use default values".to_string(),
            ],
            ConfigError::DeserializationError(_) => vec![
                "Delete the configuration file to reset to defaults".to_string(),
                "Check the configuration file format manually".to_string(),
            ],
            ConfigError::UnknownKey(_) => vec!["Use 'config show' to list settings".to_string()],
            ConfigError::InvalidValue { .. } => vec![
                "Check the expected type with 'config show'".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        true // Defaults are always available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_pipeline_error_from_engine_error() {
        let engine_error = EngineError::NoSource;
        let pipeline_error: PipelineError = engine_error.into();

        match pipeline_error {
            PipelineError::Engine(EngineError::NoSource) => {}
            _ => panic!("Expected Engine error variant"),
        }
    }

    #[test]
    fn test_engine_error_wraps_container_error() {
        let container_error = ContainerError::OpenFailed {
            reference: "/missing.flac".to_string(),
            reason: "not found".to_string(),
        };
        let engine_error: EngineError = container_error.into();

        assert!(matches!(engine_error, EngineError::Load(ContainerError::OpenFailed { .. })));
        assert!(!engine_error.is_recoverable(), "A failed load never starts the pipeline");
    }

    #[test]
    fn test_decode_errors_are_recoverable() {
        let error = DecodeError::CorruptPacket { pts: 2_000_000, reason: "bad crc".to_string() };
        assert!(error.is_recoverable());
        assert!(error.user_message().contains("2.00s"));

        let error = DecodeError::UnsupportedCodec { codec: "xyz".to_string() };
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = EngineError::InvalidState {
            operation: "seek".to_string(),
            state: "Idle".to_string(),
        };
        assert_eq!(format!("{}", error), "Operation 'seek' not allowed in state Idle");

        let error = ContainerError::NoSuchTrack { index: 3 };
        assert_eq!(format!("{}", error), "Track 3 does not exist");

        let error = ClockError::InvalidSpeed(-1.0);
        assert_eq!(format!("{}", error), "Invalid play speed: -1");

        let error = OutputError::Closed;
        assert_eq!(format!("{}", error), "Output already closed");
    }

    #[test]
    fn test_severity_mapping() {
        let error: PipelineError = EngineError::Load(ContainerError::NoPlayableTracks {
            reference: "a.bin".to_string(),
        })
        .into();
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert_eq!(error.severity().log_level(), log::Level::Error);

        let error: PipelineError = DecodeError::DecodeFailed("x".to_string()).into();
        assert_eq!(error.severity(), ErrorSeverity::Warning);
        assert_eq!(error.severity().as_str(), "WARNING");
    }

    #[test]
    fn test_config_error_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied");
        let config_error: ConfigError = io_error.into();

        match config_error {
            ConfigError::IoError(_) => {}
            _ => panic!("Expected IoError variant"),
        }
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied");
        let pipeline_error = PipelineError::Config(ConfigError::IoError(io_error));

        let mut current_error: &dyn Error = &pipeline_error;
        let mut error_count = 0;
        while let Some(source) = current_error.source() {
            current_error = source;
            error_count += 1;
        }

        assert!(error_count >= 1);
    }

    #[test]
    fn test_recovery_suggestions_not_empty() {
        let errors: Vec<PipelineError> = vec![
            EngineError::NoSource.into(),
            ContainerError::SeekFailed("eof".to_string()).into(),
            OutputError::DeviceUnavailable("none".to_string()).into(),
            ClockError::Stopped.into(),
            ConfigError::UnknownKey("foo".to_string()).into(),
        ];

        for error in errors {
            assert!(!error.recovery_suggestions().is_empty(), "No suggestions for {}", error);
        }
    }
}
