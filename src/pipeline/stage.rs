use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::EngineError;

const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Cooperative cancellation flag shared between the engine and one stage thread
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a stage thread as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StagePhase {
    Starting = 0,
    Running = 1,
    /// Upstream ended and the input buffer ran dry
    Drained = 2,
    /// Hard-cancelled by the engine
    Cancelled = 3,
    /// Exited abnormally (panic)
    Died = 4,
}

impl StagePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StagePhase::Starting,
            1 => StagePhase::Running,
            2 => StagePhase::Drained,
            3 => StagePhase::Cancelled,
            _ => StagePhase::Died,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StagePhase::Drained | StagePhase::Cancelled | StagePhase::Died)
    }
}

/// How a stage loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageExit {
    Drained,
    Cancelled,
}

/// Externally visible state of one stage: its phase and the upstream "clip ended" mark
#[derive(Debug)]
pub struct StageStatus {
    name: String,
    phase: AtomicU8,
    clip_ended: AtomicBool,
}

impl StageStatus {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            phase: AtomicU8::new(StagePhase::Starting as u8),
            clip_ended: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> StagePhase {
        StagePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: StagePhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Upstream has no more input for this stage
    pub fn mark_clip_ended(&self) {
        self.clip_ended.store(true, Ordering::SeqCst);
    }

    pub fn clip_ended(&self) -> bool {
        self.clip_ended.load(Ordering::SeqCst)
    }
}

/// Everything a stage loop needs to observe cancellation and signal downstream
#[derive(Debug, Clone)]
pub struct StageContext {
    pub token: CancellationToken,
    pub status: Arc<StageStatus>,
    downstream: Vec<Arc<StageStatus>>,
}

impl StageContext {
    pub fn new(token: CancellationToken, status: Arc<StageStatus>, downstream: Vec<Arc<StageStatus>>) -> Self {
        Self {
            token,
            status,
            downstream,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn clip_ended(&self) -> bool {
        self.status.clip_ended()
    }

    /// Sleep up to `duration` in short slices; false if cancelled meanwhile
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    /// Soft drain: tell every downstream stage that no more input will arrive
    pub fn propagate_clip_end(&self) {
        for stage in &self.downstream {
            debug!("{} -> {}: clip ended", self.status.name(), stage.name());
            stage.mark_clip_ended();
        }
    }
}

/// A pipeline stage body run on its own thread
pub trait Stage: Send + 'static {
    fn name(&self) -> &'static str;

    /// Loop until cancelled or drained
    fn run(&mut self, ctx: &StageContext) -> StageExit;
}

/// Marks the stage as died if the body unwinds
struct PhaseGuard {
    status: Arc<StageStatus>,
    armed: bool,
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        if self.armed {
            self.status.set_phase(StagePhase::Died);
        }
    }
}

/// Owning handle to a spawned stage thread
pub struct StageHandle {
    name: String,
    ctx: StageContext,
    join: Option<JoinHandle<()>>,
}

impl StageHandle {
    /// Spawn `stage` on a named OS thread
    pub fn spawn<S: Stage>(mut stage: S, ctx: StageContext) -> Result<Self, EngineError> {
        let name = stage.name().to_string();
        let thread_ctx = ctx.clone();

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut guard = PhaseGuard {
                    status: Arc::clone(&thread_ctx.status),
                    armed: true,
                };
                thread_ctx.status.set_phase(StagePhase::Running);

                let exit = stage.run(&thread_ctx);

                guard.armed = false;
                let phase = match exit {
                    StageExit::Drained => StagePhase::Drained,
                    StageExit::Cancelled => StagePhase::Cancelled,
                };
                thread_ctx.status.set_phase(phase);
                info!("{} shutting down ({:?})", thread_ctx.status.name(), exit);
            })
            .map_err(|e| EngineError::ThreadSpawn {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            ctx,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &Arc<StageStatus> {
        &self.ctx.status
    }

    pub fn cancel(&self) {
        self.ctx.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    /// Wait for the thread to exit; a panicked stage is reported, not propagated
    pub fn join(&mut self) {
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                error!("Stage '{}' panicked", self.name);
                self.ctx.status.set_phase(StagePhase::Died);
            }
        }
    }
}

impl Drop for StageHandle {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}
