use log::{error, info, trace, warn};
use std::sync::Arc;

use crate::models::{Packet, TrackKind};
use crate::pipeline::buffer::PutOutcome;
use crate::pipeline::collaborators::{Container, ReadStatus};
use crate::pipeline::events::PipelineEvent;
use crate::pipeline::runtime::PipelineRuntime;
use crate::pipeline::stage::{Stage, StageContext, StageExit};

/// Packet routing decided at load time: the first audio and first video track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackRoutes {
    pub audio: Option<usize>,
    pub video: Option<usize>,
}

impl TrackRoutes {
    pub fn discover(container: &dyn Container) -> Self {
        let mut routes = Self::default();
        for index in 0..container.track_count() {
            match container.track_kind(index) {
                TrackKind::Audio if routes.audio.is_none() => routes.audio = Some(index),
                TrackKind::Video if routes.video.is_none() => routes.video = Some(index),
                _ => {}
            }
        }
        routes
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

enum Route {
    Audio,
    Video,
    Ignored,
}

/// Reads container packets and routes them to the audio and video packet buffers
pub struct Demuxer {
    runtime: Arc<PipelineRuntime>,
    routes: TrackRoutes,
    packets_read: u64,
}

impl Demuxer {
    pub fn new(runtime: Arc<PipelineRuntime>, routes: TrackRoutes) -> Self {
        Self {
            runtime,
            routes,
            packets_read: 0,
        }
    }

    fn route(&self, packet: &Packet) -> Route {
        if Some(packet.track) == self.routes.audio {
            Route::Audio
        } else if Some(packet.track) == self.routes.video {
            Route::Video
        } else {
            Route::Ignored
        }
    }

    fn end_of_clip(&self, ctx: &StageContext) -> StageExit {
        info!("Demuxer reached end of clip after {} packets", self.packets_read);
        ctx.status.mark_clip_ended();
        ctx.propagate_clip_end();
        self.runtime.events().publish(PipelineEvent::ClipEnded);
        StageExit::Drained
    }
}

impl Stage for Demuxer {
    fn name(&self) -> &'static str {
        "demux"
    }

    fn run(&mut self, ctx: &StageContext) -> StageExit {
        let runtime = Arc::clone(&self.runtime);
        let wait = runtime.config().wait_timeout();

        while !ctx.is_cancelled() {
            // No read-ahead while paused
            if runtime.is_paused() {
                std::thread::sleep(wait);
                continue;
            }

            let mut packet = runtime.borrow_packet();

            // Lock held for the read only; epochs captured under it so a racing seek is detected
            let (status, audio_epoch, video_epoch) = {
                let mut container = runtime.container();
                let Some(container) = container.as_mut() else {
                    warn!("Demuxer has no container");
                    runtime.recycle_packet(packet);
                    return self.end_of_clip(ctx);
                };
                let audio_epoch = runtime.audio_packets.epoch();
                let video_epoch = runtime.video_packets.epoch();
                (container.read_packet(&mut packet), audio_epoch, video_epoch)
            };

            match status {
                Ok(ReadStatus::Packet) => {}
                Ok(ReadStatus::EndOfStream) => {
                    runtime.recycle_packet(packet);
                    return self.end_of_clip(ctx);
                }
                Err(e) => {
                    error!("Container read failed: {}", e);
                    runtime.events().publish(PipelineEvent::Error(e.user_message()));
                    runtime.recycle_packet(packet);
                    return self.end_of_clip(ctx);
                }
            }
            self.packets_read += 1;

            let outcome = match self.route(&packet) {
                Route::Audio => runtime.audio_packets.put_in_epoch(packet, audio_epoch, &ctx.token),
                Route::Video => runtime.video_packets.put_in_epoch(packet, video_epoch, &ctx.token),
                Route::Ignored => {
                    trace!("Skipping packet for unrouted track {}", packet.track);
                    runtime.recycle_packet(packet);
                    continue;
                }
            };

            match outcome {
                PutOutcome::Inserted => {}
                PutOutcome::Cancelled(packet) => {
                    runtime.recycle_packet(packet);
                    return StageExit::Cancelled;
                }
                PutOutcome::Duplicate(packet) | PutOutcome::Invalidated(packet) => {
                    trace!("Dropped packet at {}us", packet.pts);
                    runtime.recycle_packet(packet);
                }
            }
        }

        StageExit::Cancelled
    }
}
