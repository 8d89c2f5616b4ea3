use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ClockKind, EngineConfig};
use crate::error::{ContainerError, EngineError};
use crate::logging::OperationTimer;
use crate::models::{AudioSamples, MediaMetadata, TrackKind, VideoFrame, NO_TS};
use crate::pipeline::clock::ClockTicker;
use crate::pipeline::collaborators::{
    Coder, Container, ContainerOpener, OutputProvider, SeekFlags, TrackCoder,
};
use crate::pipeline::decoder::PacketDecoder;
use crate::pipeline::demux::{Demuxer, TrackRoutes};
use crate::pipeline::events::{EventBus, PipelineEvent};
use crate::pipeline::monitor::{MemoryChecker, ThreadWatchdog, WatchList};
use crate::pipeline::player::{shared_output, Player, PlayerStats, SharedOutput};
use crate::pipeline::pool::PoolStats;
use crate::pipeline::runtime::{BufferLevel, PipelineRuntime};
use crate::pipeline::stage::{
    CancellationToken, Stage, StageContext, StageExit, StageHandle, StagePhase, StageStatus,
};

const SLOW_LOAD: Duration = Duration::from_millis(500);
const SLOW_SEEK: Duration = Duration::from_millis(100);

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Idle,
    Loaded,
    Running,
    Paused,
    Stopped,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "Idle",
            EngineState::Loaded => "Loaded",
            EngineState::Running => "Running",
            EngineState::Paused => "Paused",
            EngineState::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of one stage thread, for status reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub name: String,
    pub phase: String,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub source: Option<String>,
    pub stream_time: i64,
    pub duration: Option<i64>,
    pub play_speed: f64,
    pub clock: ClockKind,
    pub sync_ready: bool,
    pub buffers: Vec<BufferLevel>,
    pub pools: Vec<PoolStats>,
    pub stages: Vec<StageReport>,
    pub presented_video: u64,
    pub presented_audio: u64,
    pub stale_dropped: u64,
}

/// Everything that belongs to one loaded source
struct Session {
    reference: String,
    runtime: Arc<PipelineRuntime>,
    metadata: MediaMetadata,
    routes: TrackRoutes,
    master: TrackKind,
    video_frame_duration: Option<i64>,

    audio_coder: Option<Box<dyn Coder<AudioSamples>>>,
    video_coder: Option<Box<dyn Coder<VideoFrame>>>,
    audio_output: Option<SharedOutput<AudioSamples>>,
    video_output: Option<SharedOutput<VideoFrame>>,

    stages: Vec<StageHandle>,
    services: Vec<StageHandle>,
    /// Shared with the watchdog so respawned stages are watched too
    watched: WatchList,
    audio_stats: Arc<Mutex<PlayerStats>>,
    video_stats: Arc<Mutex<PlayerStats>>,
}

impl Session {
    fn master_track(&self) -> Option<usize> {
        match self.master {
            TrackKind::Audio => self.routes.audio,
            _ => self.routes.video,
        }
    }

    /// Reuse the coder opened at load, or open a fresh one for a restart
    fn take_audio_coder(&mut self) -> Result<Option<Box<dyn Coder<AudioSamples>>>, EngineError> {
        if let Some(coder) = self.audio_coder.take() {
            return Ok(Some(coder));
        }
        match self.routes.audio {
            Some(index) => match open_coder(&self.runtime, index)? {
                TrackCoder::Audio(coder) => Ok(Some(coder)),
                TrackCoder::Video(_) => Err(coder_mismatch(index)),
            },
            None => Ok(None),
        }
    }

    fn take_video_coder(&mut self) -> Result<Option<Box<dyn Coder<VideoFrame>>>, EngineError> {
        if let Some(coder) = self.video_coder.take() {
            return Ok(Some(coder));
        }
        match self.routes.video {
            Some(index) => match open_coder(&self.runtime, index)? {
                TrackCoder::Video(coder) => Ok(Some(coder)),
                TrackCoder::Audio(_) => Err(coder_mismatch(index)),
            },
            None => Ok(None),
        }
    }

    /// Spawn demux, decoders and players in dependency order
    fn spawn_stages(&mut self) -> Result<(), EngineError> {
        let audio_coder = self.take_audio_coder()?;
        let video_coder = self.take_video_coder()?;
        let runtime = &self.runtime;

        let demux_status = StageStatus::new("demux");
        let audio_decode = audio_coder.as_ref().map(|_| StageStatus::new("audio-decode"));
        let video_decode = video_coder.as_ref().map(|_| StageStatus::new("video-decode"));
        let audio_play = audio_decode.as_ref().map(|_| StageStatus::new("audio-play"));
        let video_play = video_decode.as_ref().map(|_| StageStatus::new("video-play"));

        let context = |status: &Arc<StageStatus>, downstream: &[&Option<Arc<StageStatus>>]| {
            StageContext::new(
                CancellationToken::new(),
                Arc::clone(status),
                downstream.iter().filter_map(|s| s.as_ref().map(Arc::clone)).collect(),
            )
        };

        let mut stages = Vec::new();
        stages.push(StageHandle::spawn(
            Demuxer::new(Arc::clone(runtime), self.routes),
            context(&demux_status, &[&audio_decode, &video_decode]),
        )?);

        if let (Some(coder), Some(status)) = (audio_coder, &audio_decode) {
            let master = self.master == TrackKind::Audio;
            stages.push(StageHandle::spawn(
                PacketDecoder::new(Arc::clone(runtime), coder, master),
                context(status, &[&audio_play]),
            )?);
        }
        if let (Some(coder), Some(status)) = (video_coder, &video_decode) {
            let master = self.master == TrackKind::Video;
            stages.push(StageHandle::spawn(
                PacketDecoder::new(Arc::clone(runtime), coder, master),
                context(status, &[&video_play]),
            )?);
        }

        if let (Some(output), Some(status)) = (&self.audio_output, &audio_play) {
            let player = Player::<AudioSamples>::new(Arc::clone(runtime), Arc::clone(output), None);
            self.audio_stats = player.stats_handle();
            stages.push(StageHandle::spawn(player, context(status, &[]))?);
        }
        if let (Some(output), Some(status)) = (&self.video_output, &video_play) {
            let player = Player::<VideoFrame>::new(
                Arc::clone(runtime),
                Arc::clone(output),
                self.video_frame_duration,
            );
            self.video_stats = player.stats_handle();
            stages.push(StageHandle::spawn(player, context(status, &[]))?);
        }

        debug!("Spawned {} pipeline stages", stages.len());
        self.watched.replace(stages.iter().map(|s| Arc::clone(s.status())).collect());
        self.stages = stages;
        Ok(())
    }

    /// Clock ticker and optional monitors
    fn spawn_services(&mut self) -> Result<(), EngineError> {
        let config = self.runtime.config().clone();
        let events = self.runtime.events().clone();
        let service = |name: &str| StageContext::new(CancellationToken::new(), StageStatus::new(name), vec![]);

        self.services.push(StageHandle::spawn(
            ClockTicker::new(Arc::clone(self.runtime.clock()), events.clone(), config.tick_event_interval_ms),
            service("clock-ticker"),
        )?);

        if config.check_memory {
            self.services.push(StageHandle::spawn(
                MemoryChecker::new(Arc::clone(&self.runtime)),
                service("memory-checker"),
            )?);
        }
        if config.check_threads {
            self.services.push(StageHandle::spawn(
                ThreadWatchdog::new(self.watched.clone(), events, config.monitor_interval()),
                service("thread-watchdog"),
            )?);
        }
        Ok(())
    }

    fn stop_stages(&mut self) {
        for stage in &self.stages {
            stage.cancel();
        }
        for stage in &mut self.stages {
            stage.join();
        }
        self.stages.clear();
        self.watched.replace(Vec::new());
    }

    fn stop_services(&mut self) {
        for service in &self.services {
            service.cancel();
        }
        for service in &mut self.services {
            service.join();
        }
        self.services.clear();
    }

    /// All stages ended on their own (drained or died), none was cancelled
    fn finished_naturally(&self) -> bool {
        !self.stages.is_empty()
            && self.stages.iter().all(|s| s.status().phase().is_terminal())
            && self.stages.iter().all(|s| s.status().phase() != StagePhase::Cancelled)
    }

    fn any_stage_terminal(&self) -> bool {
        self.stages.iter().any(|s| s.status().phase().is_terminal())
    }

    /// Full teardown: threads, clock, outputs, buffers, container
    fn shutdown(&mut self) {
        self.stop_stages();
        self.stop_services();
        self.runtime.clock().stop();

        if let Some(output) = &self.audio_output {
            output.lock().close();
        }
        if let Some(output) = &self.video_output {
            output.lock().close();
        }

        let cleared = self.runtime.clear_buffers();
        debug!("Cleared {} buffered items", cleared);
        self.runtime.close_container();
    }

    fn stage_reports(&self) -> Vec<StageReport> {
        self.stages
            .iter()
            .chain(self.services.iter())
            .map(|s| StageReport {
                name: s.name().to_string(),
                phase: format!("{:?}", s.status().phase()),
            })
            .collect()
    }
}

fn open_coder(runtime: &PipelineRuntime, index: usize) -> Result<TrackCoder, EngineError> {
    let mut container = runtime.container();
    let container = container.as_mut().ok_or(EngineError::NoSource)?;
    Ok(container.open_track_coder(index)?)
}

fn coder_mismatch(index: usize) -> EngineError {
    EngineError::Load(ContainerError::CoderUnavailable {
        index,
        reason: "coder kind does not match track kind".to_string(),
    })
}

struct EngineInner {
    state: EngineState,
    session: Option<Session>,
    /// Reference of the last load, reopened by `start` after a stop
    last_reference: Option<String>,
    supervisor: Option<StageHandle>,
    play_speed: f64,
}

impl EngineInner {
    fn invalid(&self, operation: &str) -> EngineError {
        EngineError::InvalidState {
            operation: operation.to_string(),
            state: self.state.to_string(),
        }
    }

    fn pause(&mut self, events: &EventBus) {
        if self.state != EngineState::Running {
            return;
        }
        if let Some(session) = &self.session {
            session.runtime.set_paused(true);
            session.runtime.clock().pause();
        }
        self.state = EngineState::Paused;
        info!("Playback paused");
        events.publish(PipelineEvent::Paused);
    }

    /// Tear the session down; the supervisor handle is left to the caller
    fn teardown(&mut self, events: &EventBus) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
            self.last_reference = Some(session.reference);
        }
        self.state = EngineState::Stopped;
        events.publish(PipelineEvent::Stopped);
    }
}

/// Watches the stage threads and the event bus on behalf of the engine
struct Supervisor {
    inner: Arc<Mutex<EngineInner>>,
    events: EventBus,
    rx: Receiver<PipelineEvent>,
    stop_after_first_frame: bool,
    wait: Duration,
}

impl Stage for Supervisor {
    fn name(&self) -> &'static str {
        "supervisor"
    }

    fn run(&mut self, ctx: &StageContext) -> StageExit {
        let mut pause_requested = false;

        while !ctx.is_cancelled() {
            match self.rx.recv_timeout(self.wait) {
                Ok(PipelineEvent::FirstFramePresented) if self.stop_after_first_frame => {
                    pause_requested = true;
                }
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return StageExit::Cancelled,
            }

            // Never block on the engine lock: the engine may be joining this thread
            let Some(mut inner) = self.inner.try_lock_for(self.wait) else {
                continue;
            };

            if pause_requested {
                inner.pause(&self.events);
                pause_requested = false;
            }

            let finished = inner
                .session
                .as_ref()
                .map_or(false, |session| session.finished_naturally());
            if finished {
                info!("All pipeline stages finished, playback complete");
                inner.teardown(&self.events);
                self.events.publish(PipelineEvent::PlaybackFinished);
                return StageExit::Drained;
            }
        }

        StageExit::Cancelled
    }
}

/// Orchestrates loading, the stage threads, and the lifecycle of one media source at a time
pub struct Engine {
    config: EngineConfig,
    opener: Arc<dyn ContainerOpener>,
    outputs: Arc<dyn OutputProvider>,
    events: EventBus,
    inner: Arc<Mutex<EngineInner>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        opener: Arc<dyn ContainerOpener>,
        outputs: Arc<dyn OutputProvider>,
    ) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let play_speed = config.play_speed;
        Ok(Self {
            config,
            opener,
            outputs,
            events: EventBus::new(),
            inner: Arc::new(Mutex::new(EngineInner {
                state: EngineState::Idle,
                session: None,
                last_reference: None,
                supervisor: None,
                play_speed,
            })),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Open `reference`, build the runtime and, with auto start, begin playback
    pub fn load_source(&self, reference: &str) -> Result<MediaMetadata, EngineError> {
        let timer = OperationTimer::new(format!("load {}", reference));
        let mut inner = self.inner.lock();
        let loaded = self.load_locked(&mut inner, reference, self.config.auto_start);
        timer.finish_with_threshold(SLOW_LOAD);
        loaded
    }

    fn load_locked(
        &self,
        inner: &mut EngineInner,
        reference: &str,
        auto_start: bool,
    ) -> Result<MediaMetadata, EngineError> {
        if inner.session.is_some() {
            self.stop_locked(inner);
        }

        info!("Loading {}", reference);
        let mut container = self.opener.open(reference)?;
        let routes = TrackRoutes::discover(container.as_ref());
        if routes.is_empty() {
            container.close();
            return Err(ContainerError::NoPlayableTracks {
                reference: reference.to_string(),
            }
            .into());
        }

        let mut config = self.config.clone();
        config.play_speed = inner.play_speed;
        if config.clock == ClockKind::AudioDriven && routes.audio.is_none() {
            warn!("No audio track to drive the clock, using the ticking clock");
            config.clock = ClockKind::Ticking;
        }

        let session = match self.build_session(config, reference, container, routes) {
            Ok(session) => session,
            Err(e) => {
                error!("Load of {} failed: {}", reference, e);
                return Err(e);
            }
        };

        let metadata = session.metadata.clone();
        inner.session = Some(session);
        inner.last_reference = Some(reference.to_string());
        inner.state = EngineState::Loaded;
        self.events.publish(PipelineEvent::MediaLoaded(metadata.clone()));

        if auto_start {
            self.start_locked(inner)?;
        }
        Ok(metadata)
    }

    fn build_session(
        &self,
        config: EngineConfig,
        reference: &str,
        mut container: Box<dyn Container>,
        routes: TrackRoutes,
    ) -> Result<Session, EngineError> {
        let runtime = PipelineRuntime::new(config, self.events.clone())?;
        runtime.clock().init();

        let mut metadata = container.metadata();
        if metadata.source.is_empty() {
            metadata.source = reference.to_string();
        }

        let mut audio_coder = None;
        let mut audio_output = None;
        if let Some(index) = routes.audio {
            match container.open_track_coder(index)? {
                TrackCoder::Audio(coder) => audio_coder = Some(coder),
                TrackCoder::Video(_) => return Err(coder_mismatch(index)),
            }
            let track = container
                .track_info(index)
                .ok_or(ContainerError::NoSuchTrack { index })?;
            audio_output = Some(shared_output(self.outputs.audio_output(&track)?));
        }

        let mut video_coder = None;
        let mut video_output = None;
        let mut video_frame_duration = None;
        if let Some(index) = routes.video {
            let coder = match container.open_track_coder(index)? {
                TrackCoder::Video(coder) => coder,
                TrackCoder::Audio(_) => return Err(coder_mismatch(index)),
            };
            let track = container
                .track_info(index)
                .ok_or(ContainerError::NoSuchTrack { index })?;
            video_frame_duration = coder.frame_duration_micros().or_else(|| track.frame_duration_micros());
            video_coder = Some(coder);
            video_output = Some(shared_output(self.outputs.video_output(&track)?));
        }

        let master = if routes.audio.is_some() {
            TrackKind::Audio
        } else {
            TrackKind::Video
        };
        runtime.install_container(container);

        debug!("Session ready: {:?}, clock master {}", routes, master);
        Ok(Session {
            reference: reference.to_string(),
            runtime,
            metadata,
            routes,
            master,
            video_frame_duration,
            audio_coder,
            video_coder,
            audio_output,
            video_output,
            stages: Vec::new(),
            services: Vec::new(),
            watched: WatchList::new(),
            audio_stats: Arc::default(),
            video_stats: Arc::default(),
        })
    }

    /// Spawn the stage threads and start the clock. No-op while running or paused.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        self.start_locked(&mut inner)
    }

    fn start_locked(&self, inner: &mut EngineInner) -> Result<(), EngineError> {
        match inner.state {
            EngineState::Running | EngineState::Paused => return Ok(()),
            EngineState::Idle => return Err(EngineError::NoSource),
            EngineState::Stopped => {
                let reference = inner.last_reference.clone().ok_or(EngineError::NoSource)?;
                return self.load_locked(inner, &reference, true).map(|_| ());
            }
            EngineState::Loaded => {}
        }

        if let Some(mut old) = inner.supervisor.take() {
            old.cancel();
            old.join();
        }

        let session = inner.session.as_mut().ok_or(EngineError::NoSource)?;
        if !session.runtime.has_container() {
            let reference = session.reference.clone();
            return self.load_locked(inner, &reference, true).map(|_| ());
        }

        // Subscribe before any stage can publish
        let rx = self.events.subscribe();
        if let Err(e) = session.spawn_stages().and_then(|_| session.spawn_services()) {
            session.stop_stages();
            session.stop_services();
            return Err(e);
        }
        session.runtime.clock().start()?;

        let supervisor = Supervisor {
            inner: Arc::clone(&self.inner),
            events: self.events.clone(),
            rx,
            stop_after_first_frame: self.config.stop_after_first_frame,
            wait: self.config.wait_timeout(),
        };
        let ctx = StageContext::new(CancellationToken::new(), StageStatus::new("supervisor"), vec![]);
        inner.supervisor = Some(StageHandle::spawn(supervisor, ctx)?);

        inner.state = EngineState::Running;
        info!("Playback started");
        self.events.publish(PipelineEvent::Started);
        Ok(())
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        match inner.state {
            EngineState::Running => {
                inner.pause(&self.events);
                Ok(())
            }
            EngineState::Paused => Ok(()),
            _ => Err(inner.invalid("pause")),
        }
    }

    /// Resume without a jump in stream time
    pub fn unpause(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        match inner.state {
            EngineState::Paused => {
                if let Some(session) = &inner.session {
                    session.runtime.clock().unpause();
                    session.runtime.set_paused(false);
                }
                inner.state = EngineState::Running;
                info!("Playback resumed");
                self.events.publish(PipelineEvent::Unpaused);
                Ok(())
            }
            EngineState::Running => Ok(()),
            _ => Err(inner.invalid("unpause")),
        }
    }

    /// Reposition to `target` microseconds. A rejected seek keeps the previous state; if the
    /// drained stages cannot be brought back the engine stops.
    pub fn seek(&self, target: i64, clear_buffers: bool) -> Result<(), EngineError> {
        let timer = OperationTimer::new("seek");
        let mut inner = self.inner.lock();
        let state = inner.state;
        if !matches!(state, EngineState::Loaded | EngineState::Running | EngineState::Paused) {
            return Err(inner.invalid("seek"));
        }
        if target < 0 {
            return Err(EngineError::SeekFailed {
                target,
                reason: "target is before the start of the media".to_string(),
            });
        }

        let session = inner.session.as_mut().ok_or(EngineError::NoSource)?;
        let runtime = Arc::clone(&session.runtime);
        let clock = runtime.clock();
        let track = session.master_track().ok_or(EngineError::NoSource)?;
        let flags = SeekFlags::for_target(clock.stream_time(), target, true);

        {
            let mut container = runtime.container();
            let container = container.as_mut().ok_or(EngineError::NoSource)?;
            container
                .seek(track, target, flags)
                .map_err(|e| EngineError::SeekFailed {
                    target,
                    reason: e.to_string(),
                })?;

            runtime.bump_seek_generation();
            clock.on_seek(target);
            if session.routes.audio.is_some() {
                clock.attach_audio();
            }
            if clear_buffers {
                runtime.clear_buffers();
            }
        }

        // Stages that already drained at end of clip have exited; bring the pipeline back
        if state != EngineState::Loaded && session.any_stage_terminal() {
            debug!("Restarting drained stages after seek");
            session.stop_stages();
            runtime.clear_buffers();
            if let Err(e) = session.spawn_stages() {
                error!("Could not restart pipeline stages after seek: {}", e);
                self.stop_locked(&mut inner);
                return Err(e);
            }
        }

        info!("Seeked to {}us ({:?})", target, flags);
        timer.finish_with_threshold(SLOW_SEEK);
        self.events.publish(PipelineEvent::Seeked(target));
        Ok(())
    }

    /// Hard-cancel everything and release the source. No-op when already stopped.
    pub fn stop(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        self.stop_locked(&mut inner);
        Ok(())
    }

    fn stop_locked(&self, inner: &mut EngineInner) {
        if let Some(mut supervisor) = inner.supervisor.take() {
            supervisor.cancel();
            supervisor.join();
        }
        if inner.session.is_none() {
            return;
        }
        info!("Stopping playback");
        inner.teardown(&self.events);
    }

    /// Change the playback rate; elapsed time is folded in first so stream time does not jump
    pub fn set_play_speed(&self, speed: f64) -> Result<(), EngineError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(EngineError::InvalidPlaySpeed(speed));
        }

        let mut inner = self.inner.lock();
        if let Some(session) = &inner.session {
            session
                .runtime
                .clock()
                .set_play_speed(speed)
                .map_err(|_| EngineError::InvalidPlaySpeed(speed))?;
        }
        inner.play_speed = speed;
        self.events.publish(PipelineEvent::PlaySpeedChanged(speed));
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    pub fn is_paused(&self) -> bool {
        self.state() == EngineState::Paused
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    pub fn play_speed(&self) -> f64 {
        self.inner.lock().play_speed
    }

    /// Current stream time, `NO_TS` when nothing is loaded or the zero point is not set yet
    pub fn stream_time(&self) -> i64 {
        self.inner
            .lock()
            .session
            .as_ref()
            .map_or(NO_TS, |s| s.runtime.clock().stream_time())
    }

    pub fn metadata(&self) -> Option<MediaMetadata> {
        self.inner.lock().session.as_ref().map(|s| s.metadata.clone())
    }

    pub fn status(&self) -> EngineStatus {
        let inner = self.inner.lock();
        let mut status = EngineStatus {
            state: inner.state,
            source: inner.last_reference.clone(),
            stream_time: NO_TS,
            duration: None,
            play_speed: inner.play_speed,
            clock: self.config.clock,
            sync_ready: false,
            buffers: Vec::new(),
            pools: Vec::new(),
            stages: Vec::new(),
            presented_video: 0,
            presented_audio: 0,
            stale_dropped: 0,
        };

        if let Some(session) = &inner.session {
            let clock = session.runtime.clock();
            let audio = *session.audio_stats.lock();
            let video = *session.video_stats.lock();

            status.stream_time = clock.stream_time();
            status.clock = clock.kind();
            status.sync_ready = clock.sync_ready();
            status.duration = session.metadata.duration_micros;
            status.buffers = session.runtime.buffer_levels();
            status.pools = session.runtime.pool_stats();
            status.stages = session.stage_reports();
            status.presented_audio = audio.presented;
            status.presented_video = video.presented;
            status.stale_dropped = audio.stale + video.stale;
        }
        status
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        self.stop_locked(&mut inner);
    }
}
