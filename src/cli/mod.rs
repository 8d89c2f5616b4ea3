use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ClockKind;
use crate::pipeline::time::MICROS_PER_SECOND;

pub mod status;
pub use status::StatusDisplay;

/// Threaded media playback pipeline
#[derive(Parser)]
#[command(name = "mpipe")]
#[command(about = "Play media files through a threaded demux/decode/present pipeline")]
#[command(version = "0.1.0")]
pub struct CliApp {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load a file and play it to the end
    Play {
        /// Media file to play
        file: PathBuf,
        /// Clock driving presentation (wall_clock, ticking, audio_driven)
        #[arg(long)]
        clock: Option<ClockKind>,
        /// Play speed multiplier
        #[arg(long)]
        speed: Option<f64>,
        /// Present audio without opening a sound device
        #[arg(long)]
        no_audio_device: bool,
    },
    /// Print media metadata
    Info {
        file: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the persisted engine configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the current configuration
    Show,
    /// Restore the defaults
    Reset,
    /// Set one key
    Set { key: String, value: String },
}

/// Commands accepted by the interactive shell
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Load(PathBuf),
    Start,
    Pause,
    Resume,
    /// Target in microseconds
    Seek(i64),
    Speed(f64),
    Status,
    Stop,
    Help,
    Quit,
}

impl CliApp {
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Expand a leading `~` to the home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => PathBuf::from(path),
            }
        } else if path == "~" {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(path))
        } else {
            PathBuf::from(path)
        }
    }

    /// Parse one interactive shell line
    pub fn parse_command(input: &str) -> Result<ShellCommand, ParseError> {
        let args: Vec<&str> = input.split_whitespace().collect();
        let Some(&name) = args.first() else {
            return Err(ParseError::EmptyCommand);
        };

        let argument = |what: &str| -> Result<String, ParseError> {
            if args.len() > 1 {
                Ok(args[1..].join(" "))
            } else {
                Err(ParseError::MissingArgument {
                    command: name.to_string(),
                    argument: what.to_string(),
                })
            }
        };

        match name {
            "load" | "open" => Ok(ShellCommand::Load(Self::expand_path(&argument("file")?))),
            "start" | "play" => Ok(ShellCommand::Start),
            "pause" => Ok(ShellCommand::Pause),
            "resume" | "unpause" => Ok(ShellCommand::Resume),
            "seek" => Ok(ShellCommand::Seek(Self::parse_time(&argument("time")?)?)),
            "speed" => {
                let value = argument("multiplier")?;
                match value.parse::<f64>() {
                    Ok(speed) if speed.is_finite() && speed > 0.0 => Ok(ShellCommand::Speed(speed)),
                    _ => Err(ParseError::InvalidArgument {
                        argument: "speed".to_string(),
                        value,
                        expected: "a positive number".to_string(),
                    }),
                }
            }
            "status" => Ok(ShellCommand::Status),
            "stop" => Ok(ShellCommand::Stop),
            "help" | "?" => Ok(ShellCommand::Help),
            "quit" | "exit" => Ok(ShellCommand::Quit),
            _ => Err(ParseError::UnknownCommand {
                command: name.to_string(),
            }),
        }
    }

    /// Parse "90", "90s", "1:30", "01:02:03" or "1:30.5" into microseconds
    pub fn parse_time(time_str: &str) -> Result<i64, ParseError> {
        let invalid = || ParseError::InvalidTimeFormat {
            input: time_str.to_string(),
        };
        let trimmed = time_str.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let parts: Vec<&str> = trimmed.trim_end_matches('s').split(':').collect();
        if parts.len() > 3 {
            return Err(invalid());
        }

        let (whole, last) = parts.split_at(parts.len() - 1);
        let seconds: f64 = last[0].parse().map_err(|_| invalid())?;
        if !seconds.is_finite() || seconds < 0.0 || (!whole.is_empty() && seconds >= 60.0) {
            return Err(invalid());
        }

        let mut total = 0u64;
        for (i, part) in whole.iter().enumerate() {
            let value: u64 = part.parse().map_err(|_| invalid())?;
            // minutes below hours must stay under 60
            if i > 0 && value >= 60 {
                return Err(invalid());
            }
            total = total * 60 + value;
        }

        let micros = (total as f64 * 60.0 + seconds) * MICROS_PER_SECOND as f64;
        Ok(micros.round() as i64)
    }

    pub fn display_help() {
        println!("mpipe interactive shell - available commands:");
        println!();
        println!("  load <file>     - Open a media file (starts playing with auto start)");
        println!("  start           - Start playback of the loaded file");
        println!("  pause           - Pause presentation");
        println!("  resume          - Resume presentation");
        println!("  seek <time>     - Seek to a position (e.g. '90', '1:30', '01:02:03')");
        println!("  speed <x>       - Set the play speed multiplier");
        println!("  status          - Show engine state, buffers and pools");
        println!("  stop            - Stop playback and release the file");
        println!("  help            - Show this help message");
        println!("  quit, exit      - Leave the shell");
    }
}

/// Command parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid argument {argument}: got '{value}', expected {expected}")]
    InvalidArgument {
        argument: String,
        value: String,
        expected: String,
    },

    #[error("Invalid time format: {input}")]
    InvalidTimeFormat { input: String },
}
