use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::models::MediaMetadata;

/// Notifications pushed to engine observers
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    MediaLoaded(MediaMetadata),
    Started,
    Paused,
    Unpaused,
    Stopped,
    PlaybackFinished,
    ClipEnded,
    BufferFull(String),
    BufferEmpty(String),
    StreamTimeTick(i64),
    Seeked(i64),
    FirstFramePresented,
    VideoFramePresented(i64),
    AudioFramePresented(i64),
    PlaySpeedChanged(f64),
    Error(String),
}

impl PipelineEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineEvent::MediaLoaded(_) => "MEDIA_LOADED",
            PipelineEvent::Started => "STARTED",
            PipelineEvent::Paused => "PAUSED",
            PipelineEvent::Unpaused => "UNPAUSED",
            PipelineEvent::Stopped => "STOPPED",
            PipelineEvent::PlaybackFinished => "PLAYBACK_FINISHED",
            PipelineEvent::ClipEnded => "CLIP_ENDED",
            PipelineEvent::BufferFull(_) => "BUFFER_FULL",
            PipelineEvent::BufferEmpty(_) => "BUFFER_EMPTY",
            PipelineEvent::StreamTimeTick(_) => "STREAM_TIME_TICK",
            PipelineEvent::Seeked(_) => "SEEKED",
            PipelineEvent::FirstFramePresented => "FIRST_FRAME_PRESENTED",
            PipelineEvent::VideoFramePresented(_) => "VIDEO_FRAME_PRESENTED",
            PipelineEvent::AudioFramePresented(_) => "AUDIO_FRAME_PRESENTED",
            PipelineEvent::PlaySpeedChanged(_) => "PLAY_SPEED_CHANGED",
            PipelineEvent::Error(_) => "ERROR",
        }
    }

    /// High-rate events that are only traced, never logged at debug
    fn is_chatty(&self) -> bool {
        matches!(
            self,
            PipelineEvent::StreamTimeTick(_)
                | PipelineEvent::VideoFramePresented(_)
                | PipelineEvent::AudioFramePresented(_)
        )
    }
}

/// One-to-many event fan-out over unbounded channels
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<PipelineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer; every event published afterwards is delivered to it
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to all live subscribers. Never blocks.
    pub fn publish(&self, event: PipelineEvent) {
        if event.is_chatty() {
            trace!("event {:?}", event);
        } else {
            debug!("event {:?}", event);
        }

        let mut subscribers = self.subscribers.lock();
        // Receivers that have been dropped are pruned here
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_every_subscriber_receives_events() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.publish(PipelineEvent::Seeked(1_000));

        assert_eq!(first.try_recv().unwrap(), PipelineEvent::Seeked(1_000));
        assert_eq!(second.try_recv().unwrap(), PipelineEvent::Seeked(1_000));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        {
            let _dropped = bus.subscribe();
        }
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(PipelineEvent::Started);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.recv_timeout(Duration::from_millis(100)).unwrap(), PipelineEvent::Started);
    }

    #[test]
    fn test_publish_across_threads() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let publisher = bus.clone();

        let handle = std::thread::spawn(move || {
            for i in 0..10 {
                publisher.publish(PipelineEvent::StreamTimeTick(i));
            }
        });
        handle.join().unwrap();

        let ticks: Vec<_> = rx.try_iter().collect();
        assert_eq!(ticks.len(), 10);
        assert_eq!(ticks[9], PipelineEvent::StreamTimeTick(9));
    }

    #[test]
    fn test_event_tags() {
        assert_eq!(PipelineEvent::PlaybackFinished.as_str(), "PLAYBACK_FINISHED");
        assert_eq!(PipelineEvent::BufferFull("video-packets".to_string()).as_str(), "BUFFER_FULL");
    }
}
