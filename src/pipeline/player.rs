use log::{trace, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::models::{TrackKind, NO_TS};
use crate::pipeline::collaborators::FrameOutput;
use crate::pipeline::events::PipelineEvent;
use crate::pipeline::runtime::{MediaLane, PipelineRuntime};
use crate::pipeline::stage::{Stage, StageContext, StageExit};

/// Output shared between a player thread and the engine (which closes it)
pub type SharedOutput<F> = Arc<Mutex<Box<dyn FrameOutput<F>>>>;

pub fn shared_output<F>(output: Box<dyn FrameOutput<F>>) -> SharedOutput<F> {
    Arc::new(Mutex::new(output))
}

/// Counters kept by a player
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerStats {
    pub presented: u64,
    pub stale: u64,
    pub output_errors: u64,
}

/// Presents frames when the stream clock reaches them and discards the ones it has passed
pub struct Player<F: MediaLane> {
    runtime: Arc<PipelineRuntime>,
    output: SharedOutput<F>,
    /// How far ahead of stream time a frame may be handed over
    lead: i64,
    tolerance: i64,
    frame_duration: i64,
    last_pts: i64,
    generation: u64,
    stats: Arc<Mutex<PlayerStats>>,
}

impl<F: MediaLane> Player<F> {
    pub fn new(runtime: Arc<PipelineRuntime>, output: SharedOutput<F>, frame_duration: Option<i64>) -> Self {
        let config = runtime.config();
        let lead = match F::KIND {
            TrackKind::Audio => config.audio_render_lead_micros,
            _ => config.video_render_lead_micros,
        };
        let tolerance = config.staleness_tolerance_micros;
        let frame_duration = frame_duration.unwrap_or(config.default_frame_duration_micros);
        let generation = runtime.seek_generation();

        Self {
            runtime,
            output,
            lead,
            tolerance,
            frame_duration,
            last_pts: NO_TS,
            generation,
            stats: Arc::new(Mutex::new(PlayerStats::default())),
        }
    }

    /// Handle for reading this player's counters from another thread
    pub fn stats_handle(&self) -> Arc<Mutex<PlayerStats>> {
        Arc::clone(&self.stats)
    }

    /// Microseconds until `head` is due, zero when it is due now
    fn time_until_due(&self, head: i64, now: i64) -> i64 {
        if head == NO_TS {
            return 0;
        }
        let mut until = head.saturating_sub(now.saturating_add(self.lead));
        if F::KIND == TrackKind::Video && self.last_pts != NO_TS {
            // Hold the previous picture for its full duration
            until = until.max(self.last_pts.saturating_add(self.frame_duration).saturating_sub(now));
        }
        until.max(0)
    }

    fn is_stale(&self, pts: i64, now: i64) -> bool {
        pts != NO_TS && pts < now.saturating_sub(self.tolerance)
    }

    fn present(&mut self, frame: F) {
        let pts = frame.timestamp();
        let result = {
            let mut output = self.output.lock();
            output.present(&frame).map(|_| output.last_presented_timestamp())
        };
        F::recycle(&self.runtime, frame);

        match result {
            Ok(position) => {
                self.last_pts = pts;
                self.stats.lock().presented += 1;

                let events = self.runtime.events();
                if self.runtime.claim_first_frame() {
                    events.publish(PipelineEvent::FirstFramePresented);
                }
                match F::KIND {
                    TrackKind::Audio => {
                        self.runtime
                            .clock()
                            .report_presented(if position == NO_TS { pts } else { position });
                        events.publish(PipelineEvent::AudioFramePresented(pts));
                    }
                    _ => events.publish(PipelineEvent::VideoFramePresented(pts)),
                }
            }
            Err(e) => {
                self.stats.lock().output_errors += 1;
                warn!("{} output rejected frame at {}us: {}", F::KIND, pts, e);
            }
        }
    }

    /// Sleep for part of the wait, scaled to wall time by the play speed
    fn sleep_until_due(&self, until: i64, wait: Duration) {
        let speed = self.runtime.play_speed().max(f64::MIN_POSITIVE);
        let wall = Duration::from_micros(((until as f64) / speed) as u64);
        thread::sleep(wall.min(wait).max(Duration::from_micros(200)));
    }
}

impl<F: MediaLane> Stage for Player<F> {
    fn name(&self) -> &'static str {
        match F::KIND {
            TrackKind::Audio => "audio-play",
            _ => "video-play",
        }
    }

    fn run(&mut self, ctx: &StageContext) -> StageExit {
        let runtime = Arc::clone(&self.runtime);
        let wait = runtime.config().wait_timeout();
        let frames = F::frame_buffer(&runtime);
        let clock = Arc::clone(runtime.clock());

        while !ctx.is_cancelled() {
            if runtime.is_paused() {
                thread::sleep(wait);
                continue;
            }
            if ctx.clip_ended() && frames.is_empty() {
                if F::KIND == TrackKind::Audio {
                    clock.detach_audio();
                }
                return StageExit::Drained;
            }
            if !clock.sync_ready() {
                match frames.peek_head() {
                    // Upstream is done but the master never produced a frame
                    Some(head) if ctx.clip_ended() && head != NO_TS => clock.set_zero(head, true),
                    _ => {
                        thread::sleep(wait);
                        continue;
                    }
                }
            }
            if !frames.wait_for_item(&ctx.token, wait) {
                continue;
            }

            let generation = runtime.seek_generation();
            if generation != self.generation {
                self.generation = generation;
                self.last_pts = NO_TS;
            }

            let Some(head) = frames.peek_head() else {
                continue;
            };
            let now = clock.stream_time();
            let until = self.time_until_due(head, now);
            if until > 0 {
                self.sleep_until_due(until, wait);
                continue;
            }

            let Some(frame) = frames.try_take() else {
                continue;
            };
            if ctx.is_cancelled() {
                F::recycle(&runtime, frame);
                return StageExit::Cancelled;
            }

            let pts = frame.timestamp();
            let now = clock.stream_time();
            if self.is_stale(pts, now) {
                trace!("{} frame at {}us is stale (stream time {}us)", F::KIND, pts, now);
                self.stats.lock().stale += 1;
                F::recycle(&runtime, frame);
                continue;
            }

            self.present(frame);
        }

        StageExit::Cancelled
    }
}
