use crossbeam_channel::Receiver;
use log::{error, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use media_pipeline::cli::{CliApp, Commands, ConfigAction, ShellCommand, StatusDisplay};
use media_pipeline::config::{ConfigManager, EngineConfig};
use media_pipeline::error::{ErrorSeverity, PipelineError};
use media_pipeline::logging::PipelineLogger;
use media_pipeline::pipeline::collaborators::{ContainerOpener, OutputProvider};
use media_pipeline::pipeline::cpal_output::CpalOutputProvider;
use media_pipeline::pipeline::symphonia_source::SymphoniaOpener;
use media_pipeline::pipeline::{Engine, NullOutputProvider, PipelineEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Owns the engine and routes shell commands and bus events
pub struct AppController {
    config_manager: ConfigManager,
    logger: PipelineLogger,
    engine: Engine,
    events: Receiver<PipelineEvent>,
    shutdown: Arc<AtomicBool>,
}

impl AppController {
    pub fn new(config: EngineConfig, audio_device: bool, config_manager: ConfigManager) -> Result<Self, PipelineError> {
        let outputs: Arc<dyn OutputProvider> = if audio_device {
            Arc::new(CpalOutputProvider::new())
        } else {
            Arc::new(NullOutputProvider::new())
        };
        let opener: Arc<dyn ContainerOpener> = Arc::new(SymphoniaOpener);
        let engine = Engine::new(config, opener, outputs)?;
        let events = engine.subscribe();

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            println!("\nReceived interrupt signal. Shutting down...");
            flag.store(true, Ordering::Relaxed);
        }) {
            warn!("Could not install Ctrl-C handler: {}", e);
        }

        info!("Application controller initialized");
        Ok(Self {
            config_manager,
            logger: PipelineLogger::new(),
            engine,
            events,
            shutdown,
        })
    }

    /// Print and record pending bus events; returns true once playback finished
    fn drain_events(&self) -> bool {
        let mut finished = false;
        for event in self.events.try_iter() {
            self.logger.observe(&event);
            if let Some(text) = StatusDisplay::format_event(&event) {
                println!("{}", text);
            }
            finished |= event == PipelineEvent::PlaybackFinished;
        }
        finished
    }

    /// Load `file` and block until playback finishes or Ctrl-C
    pub async fn play(&mut self, file: &Path) -> Result<(), PipelineError> {
        self.engine.load_source(&file.to_string_lossy())?;
        if !self.engine.is_running() {
            self.engine.start()?;
        }

        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            interval.tick().await;
            if self.drain_events() || self.shutdown.load(Ordering::Relaxed) {
                break;
            }
        }

        self.engine.stop()?;
        self.drain_events();
        Ok(())
    }

    pub async fn run_interactive_mode(&mut self) -> Result<(), PipelineError> {
        println!("mpipe interactive shell. Type 'help' for commands.");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut interval = tokio::time::interval(POLL_INTERVAL);
        let mut awaiting_input = false;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            if !awaiting_input {
                print!("> ");
                let _ = std::io::Write::flush(&mut std::io::stdout());
                awaiting_input = true;
            }

            tokio::select! {
                biased;

                line = rx.recv() => {
                    awaiting_input = false;
                    let Some(line) = line else {
                        println!();
                        break;
                    };
                    if line.is_empty() {
                        continue;
                    }
                    match CliApp::parse_command(&line) {
                        Ok(ShellCommand::Quit) => {
                            println!("Goodbye!");
                            break;
                        }
                        Ok(command) => {
                            if let Err(e) = self.execute(command) {
                                self.handle_error(&e);
                            }
                        }
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            println!("Type 'help' for available commands.");
                        }
                    }
                }

                _ = interval.tick() => {
                    if self.drain_events() {
                        awaiting_input = false;
                    }
                }
            }
        }

        self.shutdown()
    }

    fn execute(&mut self, command: ShellCommand) -> Result<(), PipelineError> {
        match command {
            ShellCommand::Load(path) => {
                self.engine.load_source(&path.to_string_lossy())?;
            }
            ShellCommand::Start => self.engine.start()?,
            ShellCommand::Pause => self.engine.pause()?,
            ShellCommand::Resume => self.engine.unpause()?,
            ShellCommand::Seek(target) => {
                self.engine.seek(target, true)?;
                StatusDisplay::display_compact_status(&self.engine.status());
            }
            ShellCommand::Speed(speed) => {
                self.engine.set_play_speed(speed)?;
                StatusDisplay::display_compact_status(&self.engine.status());
            }
            ShellCommand::Status => {
                StatusDisplay::display_full_status(&self.engine.status());
                let stats = self.logger.statistics();
                println!(
                    "Events: {} logged, {} seek(s), {} error(s), {} stage death(s)",
                    stats.total_events, stats.seeks, stats.errors, stats.stage_deaths
                );
            }
            ShellCommand::Stop => self.engine.stop()?,
            ShellCommand::Help => CliApp::display_help(),
            ShellCommand::Quit => {}
        }
        Ok(())
    }

    /// Stop the engine and persist the speed last used
    pub fn shutdown(&mut self) -> Result<(), PipelineError> {
        println!("Shutting down...");
        if let Err(e) = self.engine.stop() {
            eprintln!("Warning: Error stopping engine: {}", e);
        }

        let speed = self.engine.play_speed();
        if speed != self.config_manager.get_config().play_speed {
            if let Err(e) = self.config_manager.set_play_speed(speed) {
                eprintln!("Warning: Error saving configuration: {}", e);
            }
        }
        Ok(())
    }

    fn handle_error(&self, error: &PipelineError) {
        match error.severity() {
            ErrorSeverity::Info => info!("{}", error),
            ErrorSeverity::Warning => warn!("{}", error),
            ErrorSeverity::Error | ErrorSeverity::Critical => error!("{}", error),
        }
        StatusDisplay::display_error(error);
    }
}

fn show_info(file: &Path, json: bool) -> Result<(), PipelineError> {
    let reference = file.to_string_lossy();
    let mut container = SymphoniaOpener.open(&reference)?;
    let mut metadata = container.metadata();
    metadata.source = reference.to_string();
    container.close();

    if json {
        let text = serde_json::to_string_pretty(&metadata).map_err(std::io::Error::from)?;
        println!("{}", text);
    } else {
        StatusDisplay::display_metadata(&metadata);
    }
    Ok(())
}

fn manage_config(config_manager: &mut ConfigManager, action: ConfigAction) -> Result<(), PipelineError> {
    match action {
        ConfigAction::Show => {
            let text = toml::to_string_pretty(config_manager.get_config())
                .map_err(media_pipeline::error::ConfigError::from)?;
            println!("# {}", config_manager.config_path().display());
            println!("{}", text);
        }
        ConfigAction::Reset => {
            config_manager.reset_to_defaults()?;
            println!("Configuration reset to defaults");
        }
        ConfigAction::Set { key, value } => {
            config_manager.set_value(&key, &value)?;
            println!("{} = {}", key, value);
        }
    }
    Ok(())
}

async fn run(cli: CliApp) -> Result<(), PipelineError> {
    let mut config_manager = ConfigManager::new()?;

    match cli.command {
        Some(Commands::Play {
            file,
            clock,
            speed,
            no_audio_device,
        }) => {
            let mut config = config_manager.get_config().clone();
            config.auto_start = true;
            if let Some(clock) = clock {
                config.clock = clock;
            }
            if let Some(speed) = speed {
                config.play_speed = speed;
            }
            let mut app = AppController::new(config, !no_audio_device, config_manager)?;
            app.play(&file).await
        }
        Some(Commands::Info { file, json }) => show_info(&file, json),
        Some(Commands::Config { action }) => manage_config(&mut config_manager, action),
        None => {
            let config = config_manager.get_config().clone();
            let mut app = AppController::new(config, true, config_manager)?;
            app.run_interactive_mode().await
        }
    }
}

#[tokio::main]
async fn main() {
    if std::env::var(media_pipeline::logging::LOG_LEVEL_ENV).is_err() {
        std::env::set_var(media_pipeline::logging::LOG_LEVEL_ENV, "warn");
    }
    if let Err(e) = PipelineLogger::init() {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let cli = CliApp::parse();
    if let Err(e) = run(cli).await {
        error!("{}", e);
        StatusDisplay::display_error(&e);
        std::process::exit(1);
    }
    info!("Application shutdown complete");
}
