use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ClockError;
use crate::models::NO_TS;
use crate::pipeline::events::{EventBus, PipelineEvent};
use crate::pipeline::stage::{Stage, StageContext, StageExit};

/// Strategy used to advance stream time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    /// Stream time is computed from the wall clock on every read
    WallClock,
    /// Stream time is advanced by a dedicated ticker thread
    #[default]
    Ticking,
    /// Stream time follows the timestamps reported by the audio output
    AudioDriven,
}

impl ClockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockKind::WallClock => "wall_clock",
            ClockKind::Ticking => "ticking",
            ClockKind::AudioDriven => "audio_driven",
        }
    }
}

impl std::str::FromStr for ClockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "wall_clock" | "wall" => Ok(ClockKind::WallClock),
            "ticking" | "tick" => Ok(ClockKind::Ticking),
            "audio_driven" | "audio" => Ok(ClockKind::AudioDriven),
            other => Err(format!("unknown clock '{}'", other)),
        }
    }
}

impl std::fmt::Display for ClockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Unstarted,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug)]
struct ClockInner {
    kind: ClockKind,
    /// Stream time at `anchor`
    base: i64,
    anchor: Instant,
    zero: i64,
    zero_set: bool,
    state: ClockState,
    speed: f64,
    /// Audio feedback has ended; an audio-driven clock falls back to wall time
    audio_detached: bool,
}

impl ClockInner {
    fn fresh(kind: ClockKind, speed: f64) -> Self {
        Self {
            kind,
            base: NO_TS,
            anchor: Instant::now(),
            zero: 0,
            zero_set: false,
            state: ClockState::Unstarted,
            speed,
            audio_detached: false,
        }
    }

    fn advancing(&self) -> bool {
        self.state == ClockState::Running && self.zero_set
    }

    /// Whether elapsed wall time moves this clock
    fn wall_driven(&self) -> bool {
        self.kind != ClockKind::AudioDriven || self.audio_detached
    }

    /// Scaled microseconds elapsed since the anchor; skew counts as no advancement
    fn pending(&self, now: Instant) -> i64 {
        let elapsed = match now.checked_duration_since(self.anchor) {
            Some(elapsed) => elapsed,
            None => return 0,
        };
        let micros = i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX);
        if micros <= 0 {
            return 0;
        }
        // Float-to-int casts saturate
        ((micros as f64) * self.speed) as i64
    }

    /// Move elapsed time into `base` and re-anchor at `now`
    fn fold(&mut self, now: Instant) {
        if self.advancing() && self.wall_driven() {
            self.base = self.base.max(0).saturating_add(self.pending(now));
        }
        self.anchor = now;
    }
}

/// Shared stream clock: derives the virtual presentation position used by every consumer stage
#[derive(Debug)]
pub struct StreamClock {
    kind: ClockKind,
    inner: Mutex<ClockInner>,
}

impl StreamClock {
    pub fn new(kind: ClockKind, speed: f64) -> Result<Self, ClockError> {
        validate_speed(speed)?;
        Ok(Self {
            kind,
            inner: Mutex::new(ClockInner::fresh(kind, speed)),
        })
    }

    pub fn kind(&self) -> ClockKind {
        self.kind
    }

    /// Reset for a new load; the clock does not advance until started
    pub fn init(&self) {
        let mut inner = self.inner.lock();
        let speed = inner.speed;
        *inner = ClockInner::fresh(self.kind, speed);
        debug!("{} clock initialised", self.kind);
    }

    /// Begin advancing. No-op unless the clock is unstarted.
    pub fn start(&self) -> Result<(), ClockError> {
        let mut inner = self.inner.lock();
        match inner.state {
            ClockState::Unstarted => {
                inner.state = ClockState::Running;
                inner.anchor = Instant::now();
                info!("{} clock started at {}x", self.kind, inner.speed);
                Ok(())
            }
            ClockState::Stopped => Err(ClockError::Stopped),
            ClockState::Running | ClockState::Paused => Ok(()),
        }
    }

    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ClockState::Running {
            inner.fold(Instant::now());
            inner.state = ClockState::Paused;
        }
    }

    /// Resume from the paused position without counting the paused interval
    pub fn unpause(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ClockState::Paused {
            inner.anchor = Instant::now();
            inner.state = ClockState::Running;
        }
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.fold(Instant::now());
        inner.state = ClockState::Stopped;
    }

    /// Establish the zero point. With `reset` the stream time becomes `timestamp`,
    /// otherwise `timestamp` is added to the current stream time.
    pub fn set_zero(&self, timestamp: i64, reset: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.fold(now);

        inner.base = if reset {
            timestamp
        } else {
            inner.base.max(0).saturating_add(timestamp)
        };
        inner.zero = timestamp;
        inner.zero_set = true;
        inner.anchor = now;
        debug!("Clock zero set to {}us (reset: {})", timestamp, reset);
    }

    /// Reposition after a seek; the next master frame re-establishes the zero point
    pub fn on_seek(&self, stream_time: i64) {
        let mut inner = self.inner.lock();
        inner.base = stream_time;
        inner.zero_set = false;
        inner.anchor = Instant::now();
    }

    /// Current stream time in microseconds, `NO_TS` before any zero point or seek
    pub fn stream_time(&self) -> i64 {
        let inner = self.inner.lock();
        let computed_on_read = match self.kind {
            ClockKind::WallClock => true,
            ClockKind::AudioDriven => inner.audio_detached,
            ClockKind::Ticking => false,
        };
        if computed_on_read && inner.advancing() {
            inner.base.max(0).saturating_add(inner.pending(Instant::now()))
        } else {
            inner.base
        }
    }

    pub fn sync_ready(&self) -> bool {
        self.inner.lock().zero_set
    }

    pub fn zero(&self) -> i64 {
        self.inner.lock().zero
    }

    pub fn state(&self) -> ClockState {
        self.inner.lock().state
    }

    pub fn play_speed(&self) -> f64 {
        self.inner.lock().speed
    }

    /// Switch rate, folding elapsed time in first so stream time does not jump
    pub fn set_play_speed(&self, speed: f64) -> Result<(), ClockError> {
        validate_speed(speed)?;
        let mut inner = self.inner.lock();
        inner.fold(Instant::now());
        inner.speed = speed;
        Ok(())
    }

    /// Advance a ticking clock by the time elapsed since the last tick
    pub fn tick(&self) {
        if self.kind != ClockKind::Ticking {
            return;
        }
        self.inner.lock().fold(Instant::now());
    }

    /// Audio output feedback: an audio-driven clock follows presented timestamps forward
    pub fn report_presented(&self, pts: i64) {
        if self.kind != ClockKind::AudioDriven || pts == NO_TS {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.audio_detached {
            return;
        }
        if inner.zero_set && inner.state != ClockState::Stopped && pts > inner.base {
            inner.base = pts;
            inner.anchor = Instant::now();
        }
    }

    /// No further audio feedback will arrive (audio drained); keep advancing on wall time
    pub fn detach_audio(&self) {
        let mut inner = self.inner.lock();
        if self.kind == ClockKind::AudioDriven && !inner.audio_detached {
            inner.anchor = Instant::now();
            inner.audio_detached = true;
            debug!("Audio feedback ended, clock continues on wall time");
        }
    }

    /// Clear a previous `detach_audio`, e.g. after seeking back into the audio
    pub fn attach_audio(&self) {
        let mut inner = self.inner.lock();
        inner.fold(Instant::now());
        inner.audio_detached = false;
    }
}

fn validate_speed(speed: f64) -> Result<(), ClockError> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(ClockError::InvalidSpeed(speed))
    }
}

/// Stage that ticks the clock every millisecond and publishes periodic stream time events
pub struct ClockTicker {
    clock: Arc<StreamClock>,
    events: EventBus,
    tick: Duration,
    event_interval: Duration,
}

impl ClockTicker {
    pub fn new(clock: Arc<StreamClock>, events: EventBus, event_interval_ms: u64) -> Self {
        Self {
            clock,
            events,
            tick: Duration::from_millis(1),
            event_interval: Duration::from_millis(event_interval_ms.max(1)),
        }
    }
}

impl Stage for ClockTicker {
    fn name(&self) -> &'static str {
        "clock-ticker"
    }

    fn run(&mut self, ctx: &StageContext) -> StageExit {
        // Keep tick jitter low (platform-specific)
        #[cfg(target_os = "macos")]
        {
            unsafe {
                let thread = libc::pthread_self();
                let mut policy: libc::c_int = 0;
                let mut param: libc::sched_param = std::mem::zeroed();

                if libc::pthread_getschedparam(thread, &mut policy, &mut param) == 0 {
                    param.sched_priority = 47;
                    let _ = libc::pthread_setschedparam(thread, libc::SCHED_RR, &param);
                }
            }
        }

        let mut last_event = Instant::now();
        while !ctx.is_cancelled() {
            thread::sleep(self.tick);
            self.clock.tick();

            match self.clock.state() {
                ClockState::Stopped => return StageExit::Drained,
                ClockState::Running if self.clock.sync_ready() => {
                    if last_event.elapsed() >= self.event_interval {
                        self.events
                            .publish(PipelineEvent::StreamTimeTick(self.clock.stream_time()));
                        last_event = Instant::now();
                    }
                }
                _ => {}
            }
        }
        StageExit::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::{CancellationToken, StageHandle, StageStatus};

    fn running(kind: ClockKind) -> StreamClock {
        let clock = StreamClock::new(kind, 1.0).unwrap();
        clock.start().unwrap();
        clock
    }

    #[test]
    fn test_stream_time_unknown_before_zero() {
        let clock = running(ClockKind::Ticking);
        assert_eq!(clock.stream_time(), NO_TS);
        assert!(!clock.sync_ready());

        thread::sleep(Duration::from_millis(5));
        clock.tick();
        assert_eq!(clock.stream_time(), NO_TS, "No advancement without a zero point");
    }

    #[test]
    fn test_set_zero_then_tick_for_40ms() {
        let clock = running(ClockKind::Ticking);
        clock.set_zero(5_000_000, true);
        assert!(clock.sync_ready());
        assert_eq!(clock.stream_time(), 5_000_000);

        thread::sleep(Duration::from_millis(40));
        clock.tick();

        let now = clock.stream_time();
        assert!(now >= 5_040_000, "stream time {} lags", now);
        assert!(now < 5_040_000 + 200_000, "stream time {} ran ahead", now);
    }

    #[test]
    fn test_wall_clock_advances_on_read() {
        let clock = running(ClockKind::WallClock);
        clock.set_zero(1_000, true);
        thread::sleep(Duration::from_millis(10));
        assert!(clock.stream_time() >= 11_000);
    }

    #[test]
    fn test_set_zero_without_reset_offsets() {
        let clock = StreamClock::new(ClockKind::AudioDriven, 1.0).unwrap();
        clock.set_zero(2_000, true);
        clock.set_zero(500, false);
        assert_eq!(clock.stream_time(), 2_500);
        assert_eq!(clock.zero(), 500);
    }

    #[test]
    fn test_monotonic_while_running() {
        let clock = running(ClockKind::WallClock);
        clock.set_zero(0, true);

        let mut previous = clock.stream_time();
        for _ in 0..200 {
            let current = clock.stream_time();
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn test_pause_freezes_and_unpause_does_not_jump() {
        let clock = running(ClockKind::Ticking);
        clock.set_zero(0, true);
        thread::sleep(Duration::from_millis(10));
        clock.pause();
        let frozen = clock.stream_time();
        assert_eq!(clock.state(), ClockState::Paused);

        thread::sleep(Duration::from_millis(30));
        clock.tick();
        assert_eq!(clock.stream_time(), frozen);

        clock.unpause();
        clock.tick();
        let resumed = clock.stream_time();
        assert!(resumed >= frozen);
        assert!(resumed < frozen + 20_000, "Paused interval must not be counted");
    }

    #[test]
    fn test_on_seek_repositions_and_invalidates_zero() {
        let clock = running(ClockKind::Ticking);
        clock.set_zero(0, true);
        clock.on_seek(30_000_000);

        assert_eq!(clock.stream_time(), 30_000_000);
        assert!(!clock.sync_ready());

        thread::sleep(Duration::from_millis(5));
        clock.tick();
        assert_eq!(clock.stream_time(), 30_000_000, "Held until the next zero point");

        clock.set_zero(30_000_000, true);
        assert!(clock.sync_ready());
    }

    #[test]
    fn test_play_speed_validation_and_scaling() {
        let clock = running(ClockKind::Ticking);
        assert!(matches!(clock.set_play_speed(0.0), Err(ClockError::InvalidSpeed(_))));
        assert!(clock.set_play_speed(f64::NAN).is_err());
        assert!(StreamClock::new(ClockKind::Ticking, -2.0).is_err());

        clock.set_zero(0, true);
        clock.set_play_speed(4.0).unwrap();
        thread::sleep(Duration::from_millis(20));
        clock.tick();
        assert!(clock.stream_time() >= 80_000);
        assert_eq!(clock.play_speed(), 4.0);
    }

    #[test]
    fn test_audio_driven_follows_reports_forward_only() {
        let clock = running(ClockKind::AudioDriven);
        clock.report_presented(10_000);
        assert_eq!(clock.stream_time(), NO_TS, "Reports before zero are ignored");

        clock.set_zero(0, true);
        clock.report_presented(10_000);
        clock.report_presented(5_000);
        assert_eq!(clock.stream_time(), 10_000);
    }

    #[test]
    fn test_detached_audio_clock_runs_on_wall_time() {
        let clock = running(ClockKind::AudioDriven);
        clock.set_zero(0, true);
        clock.report_presented(20_000);
        clock.detach_audio();
        thread::sleep(Duration::from_millis(10));
        assert!(clock.stream_time() >= 30_000);

        clock.attach_audio();
        let held = clock.stream_time();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.stream_time(), held);
    }

    #[test]
    fn test_lifecycle() {
        let clock = StreamClock::new(ClockKind::Ticking, 1.0).unwrap();
        assert_eq!(clock.state(), ClockState::Unstarted);
        clock.start().unwrap();
        clock.start().unwrap();
        assert_eq!(clock.state(), ClockState::Running);

        clock.stop();
        assert!(matches!(clock.start(), Err(ClockError::Stopped)));

        clock.init();
        assert_eq!(clock.state(), ClockState::Unstarted);
        assert_eq!(clock.stream_time(), NO_TS);
    }

    #[test]
    fn test_ticker_publishes_stream_time() {
        let clock = Arc::new(running(ClockKind::Ticking));
        clock.set_zero(0, true);
        let bus = EventBus::new();
        let rx = bus.subscribe();

        let ctx = StageContext::new(CancellationToken::new(), StageStatus::new("clock-ticker"), vec![]);
        let mut handle = StageHandle::spawn(ClockTicker::new(Arc::clone(&clock), bus, 5), ctx).unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, PipelineEvent::StreamTimeTick(t) if t >= 0));

        handle.cancel();
        handle.join();
    }

    #[test]
    fn test_clock_kind_parsing() {
        assert_eq!("wall-clock".parse::<ClockKind>().unwrap(), ClockKind::WallClock);
        assert_eq!("audio".parse::<ClockKind>().unwrap(), ClockKind::AudioDriven);
        assert!("sundial".parse::<ClockKind>().is_err());
        assert_eq!(ClockKind::default(), ClockKind::Ticking);
    }
}
