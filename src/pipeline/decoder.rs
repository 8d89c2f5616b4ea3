use log::{debug, trace, warn};
use std::sync::Arc;

use crate::models::{Packet, NO_TS};
use crate::pipeline::buffer::{PutOutcome, TakeOutcome};
use crate::pipeline::collaborators::Coder;
use crate::pipeline::runtime::{MediaLane, PipelineRuntime};
use crate::pipeline::stage::{Stage, StageContext, StageExit};

/// Turns packets of one track into frames.
///
/// The clock master (audio when present) sets the clock's zero point from the first frame
/// it buffers after a load or seek.
pub struct PacketDecoder<F: MediaLane> {
    runtime: Arc<PipelineRuntime>,
    coder: Box<dyn Coder<F>>,
    master: bool,
    /// Frame spanning more than one packet
    pending: Option<F>,
    generation: u64,
    decoded: u64,
    errors: u64,
}

impl<F: MediaLane> PacketDecoder<F> {
    pub fn new(runtime: Arc<PipelineRuntime>, coder: Box<dyn Coder<F>>, master: bool) -> Self {
        let generation = runtime.seek_generation();
        Self {
            runtime,
            coder,
            master,
            pending: None,
            generation,
            decoded: 0,
            errors: 0,
        }
    }

    /// Drop codec state left over from before a seek
    fn sync_generation(&mut self) {
        let generation = self.runtime.seek_generation();
        if generation != self.generation {
            debug!("{} decoder: new seek generation {}", F::KIND, generation);
            self.generation = generation;
            self.coder.flush();
            if let Some(stale) = self.pending.take() {
                F::recycle(&self.runtime, stale);
            }
        }
    }

    /// Decode one packet, emitting every frame it completes
    fn decode_packet(&mut self, packet: &Packet, frame_epoch: u64, ctx: &StageContext) -> Option<StageExit> {
        let mut offset = 0;

        loop {
            let mut frame = self
                .pending
                .take()
                .unwrap_or_else(|| F::borrow_frame(&self.runtime, packet.track));

            match self.coder.decode(packet, offset, &mut frame) {
                Ok(step) => {
                    offset += step.consumed;
                    if step.complete {
                        if let Some(exit) = self.emit(frame, frame_epoch, ctx) {
                            return Some(exit);
                        }
                    } else {
                        self.pending = Some(frame);
                    }

                    if step.consumed == 0 || offset >= packet.size() {
                        return None;
                    }
                }
                Err(e) => {
                    self.errors += 1;
                    warn!("{} decode error, dropping packet at {}us: {}", F::KIND, packet.pts, e);
                    F::recycle(&self.runtime, frame);
                    return None;
                }
            }
        }
    }

    fn emit(&mut self, frame: F, frame_epoch: u64, ctx: &StageContext) -> Option<StageExit> {
        let pts = frame.timestamp();

        match F::frame_buffer(&self.runtime).put_in_epoch(frame, frame_epoch, &ctx.token) {
            PutOutcome::Inserted => {
                self.decoded += 1;
                let clock = self.runtime.clock();
                if self.master && pts != NO_TS && !clock.sync_ready() {
                    debug!("{} decoder sets clock zero at {}us", F::KIND, pts);
                    clock.set_zero(pts, true);
                }
                None
            }
            PutOutcome::Cancelled(frame) => {
                F::recycle(&self.runtime, frame);
                Some(StageExit::Cancelled)
            }
            PutOutcome::Duplicate(frame) | PutOutcome::Invalidated(frame) => {
                trace!("{} frame at {}us dropped", F::KIND, pts);
                F::recycle(&self.runtime, frame);
                None
            }
        }
    }

    fn finish(&mut self, ctx: &StageContext) -> StageExit {
        if let Some(partial) = self.pending.take() {
            F::recycle(&self.runtime, partial);
        }
        debug!(
            "{} decoder drained: {} frames, {} errors",
            F::KIND,
            self.decoded,
            self.errors
        );
        ctx.propagate_clip_end();
        StageExit::Drained
    }
}

impl<F: MediaLane> Stage for PacketDecoder<F> {
    fn name(&self) -> &'static str {
        match F::KIND {
            crate::models::TrackKind::Audio => "audio-decode",
            _ => "video-decode",
        }
    }

    fn run(&mut self, ctx: &StageContext) -> StageExit {
        let runtime = Arc::clone(&self.runtime);
        let wait = runtime.config().wait_timeout();
        let packets = F::packet_buffer(&runtime);

        while !ctx.is_cancelled() {
            if runtime.is_paused() {
                std::thread::sleep(wait);
                continue;
            }
            if ctx.clip_ended() && packets.is_empty() {
                return self.finish(ctx);
            }

            self.sync_generation();
            // Captured before the take so a seek in between invalidates the output
            let frame_epoch = F::frame_buffer(&runtime).epoch();

            let packet = match packets.take_timeout(&ctx.token, wait) {
                TakeOutcome::Item(packet) => packet,
                TakeOutcome::TimedOut | TakeOutcome::Invalidated => continue,
                TakeOutcome::Cancelled => return StageExit::Cancelled,
            };

            let exit = self.decode_packet(&packet, frame_epoch, ctx);
            runtime.recycle_packet(packet);
            if let Some(exit) = exit {
                return exit;
            }
        }

        StageExit::Cancelled
    }
}
