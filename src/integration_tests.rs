//! Engine-level flows over mock containers and headless outputs.

use crossbeam_channel::Receiver;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ClockKind, EngineConfig};
use crate::error::{ContainerError, EngineError};
use crate::models::{TrackInfo, TrackKind};
use crate::pipeline::collaborators::SeekFlags;
use crate::pipeline::engine::{Engine, EngineState};
use crate::pipeline::events::PipelineEvent;
use crate::pipeline::null_output::{NullOutputProvider, PresentationLog};
use crate::pipeline::runtime::{BufferLevel, AUDIO_FRAMES, AUDIO_PACKETS, VIDEO_FRAMES, VIDEO_PACKETS};
use crate::pipeline::tests::{wait_until, ContainerLog, MockOpener, MockSource};

const SETTLE: Duration = Duration::from_secs(5);

struct Harness {
    engine: Engine,
    events: Receiver<PipelineEvent>,
    container: Arc<ContainerLog>,
    presented: PresentationLog,
}

fn small_config() -> EngineConfig {
    EngineConfig {
        video_packet_buffer_size: 50,
        audio_packet_buffer_size: 50,
        video_frame_buffer_size: 10,
        audio_frame_buffer_size: 10,
        auto_start: false,
        ..EngineConfig::default()
    }
}

fn harness(config: EngineConfig, source: MockSource) -> Harness {
    let opener = MockOpener::new(source);
    let container = Arc::clone(&opener.log);
    let presented = PresentationLog::new();
    let engine = Engine::new(
        config,
        Arc::new(opener),
        Arc::new(NullOutputProvider::with_log(presented.clone())),
    )
    .unwrap();
    let events = engine.subscribe();
    Harness {
        engine,
        events,
        container,
        presented,
    }
}

/// Receive until `wanted` arrives; returns every event seen on the way
fn wait_for_event(rx: &Receiver<PipelineEvent>, wanted: &PipelineEvent, timeout: Duration) -> Option<Vec<PipelineEvent>> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(event) => {
                let done = &event == wanted;
                seen.push(event);
                if done {
                    return Some(seen);
                }
            }
            Err(_) => return None,
        }
    }
    None
}

fn buffer_size(levels: &[BufferLevel], name: &str) -> usize {
    levels
        .iter()
        .find(|level| level.name == name)
        .map_or(usize::MAX, |level| level.size)
}

#[test]
fn test_auto_start_plays_to_the_end() {
    let config = EngineConfig {
        auto_start: true,
        ..small_config()
    };
    let h = harness(config, MockSource::audio_video(400_000));

    let metadata = h.engine.load_source("clip.mock").unwrap();
    assert_eq!(metadata.source, "clip.mock");
    assert_eq!(metadata.title(), Some("Mock Clip"));
    assert_eq!(metadata.tracks.len(), 2);

    let seen = wait_for_event(&h.events, &PipelineEvent::PlaybackFinished, SETTLE).expect("playback should finish");
    assert!(matches!(seen[0], PipelineEvent::MediaLoaded(_)));
    assert!(seen.contains(&PipelineEvent::Started));
    assert!(seen.contains(&PipelineEvent::ClipEnded));
    assert!(seen.contains(&PipelineEvent::FirstFramePresented));

    assert!(wait_until(SETTLE, || h.engine.state() == EngineState::Stopped));
    assert_eq!(h.container.opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.container.closed.load(Ordering::SeqCst), 1);

    // Presented in timestamp order and never past the end of the clip
    let audio = h.presented.audio();
    assert!(!audio.is_empty());
    assert!(audio.windows(2).all(|w| w[0] < w[1]));
    assert!(audio.iter().all(|pts| *pts <= 380_000));
    let video = h.presented.video();
    assert!(!video.is_empty());
    assert!(video.iter().all(|pts| *pts <= 360_000));
}

#[test]
fn test_load_failure_keeps_engine_idle() {
    let h = harness(small_config(), MockSource::audio_video(400_000));

    match h.engine.load_source("missing.mock") {
        Err(EngineError::Load(ContainerError::OpenFailed { reference, .. })) => {
            assert_eq!(reference, "missing.mock")
        }
        other => panic!("Expected OpenFailed, got {:?}", other.map(|m| m.source)),
    }
    assert_eq!(h.engine.state(), EngineState::Idle);
    assert!(h.engine.metadata().is_none());
    assert!(matches!(h.engine.start(), Err(EngineError::NoSource)));
}

#[test]
fn test_source_without_playable_tracks_is_rejected() {
    let source = MockSource {
        tracks: vec![TrackInfo::new(0, TrackKind::Other, "subtitles")],
        ..MockSource::default()
    };
    let h = harness(small_config(), source);

    assert!(matches!(
        h.engine.load_source("subs.mock"),
        Err(EngineError::Load(ContainerError::NoPlayableTracks { .. }))
    ));
    assert_eq!(h.container.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_operations_outside_their_states() {
    let h = harness(small_config(), MockSource::audio_video(2_000_000));

    assert!(matches!(h.engine.pause(), Err(EngineError::InvalidState { .. })));
    assert!(matches!(h.engine.seek(0, true), Err(EngineError::InvalidState { .. })));
    assert_eq!(h.engine.stream_time(), crate::models::NO_TS);

    h.engine.load_source("clip.mock").unwrap();
    assert_eq!(h.engine.state(), EngineState::Loaded);
    assert!(matches!(h.engine.pause(), Err(EngineError::InvalidState { .. })));
    assert!(matches!(h.engine.unpause(), Err(EngineError::InvalidState { .. })));
}

#[test]
fn test_pause_freezes_stream_time() {
    let h = harness(small_config(), MockSource::audio_video(20_000_000));
    h.engine.load_source("clip.mock").unwrap();
    h.engine.start().unwrap();
    assert!(h.engine.is_running());
    assert!(wait_until(SETTLE, || h.engine.status().sync_ready));

    h.engine.pause().unwrap();
    assert!(h.engine.is_paused());
    // Pausing twice is harmless
    h.engine.pause().unwrap();

    let frozen = h.engine.stream_time();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.engine.stream_time(), frozen);

    h.engine.unpause().unwrap();
    assert!(h.engine.is_running());
    assert!(wait_until(SETTLE, || h.engine.stream_time() > frozen));

    let seen = wait_for_event(&h.events, &PipelineEvent::Unpaused, SETTLE).unwrap();
    assert_eq!(seen.iter().filter(|e| **e == PipelineEvent::Paused).count(), 1);
}

#[test]
fn test_seek_with_clear_drops_stale_frames() {
    let h = harness(small_config(), MockSource::audio_video(20_000_000));
    h.engine.load_source("clip.mock").unwrap();
    h.engine.start().unwrap();
    assert!(wait_until(SETTLE, || h.engine.status().sync_ready));

    h.engine.pause().unwrap();
    // Let in-flight stage iterations settle into the paused loop
    std::thread::sleep(Duration::from_millis(100));

    h.engine.seek(10_000_000, true).unwrap();
    let status = h.engine.status();
    assert!(!status.sync_ready);
    assert_eq!(status.stream_time, 10_000_000);
    for name in [VIDEO_PACKETS, AUDIO_PACKETS, VIDEO_FRAMES, AUDIO_FRAMES] {
        assert_eq!(buffer_size(&status.buffers, name), 0, "{} not empty", name);
    }

    // Paused stages stay idle, read-ahead included
    std::thread::sleep(Duration::from_millis(50));
    assert!(h.engine.status().buffers.iter().all(|level| level.size == 0));

    let seeks = h.container.seeks.lock().clone();
    assert_eq!(
        seeks,
        vec![(
            0,
            10_000_000,
            SeekFlags {
                backwards: false,
                any_frame: false
            }
        )]
    );

    let audio_before = h.presented.audio().len();
    let video_before = h.presented.video().len();
    h.engine.unpause().unwrap();
    assert!(wait_until(SETTLE, || h.engine.status().sync_ready));
    assert!(wait_until(SETTLE, || h.presented.audio().len() > audio_before + 4));

    // Nothing from before the seek point reaches the outputs afterwards
    let audio = h.presented.audio();
    let video = h.presented.video();
    assert!(audio[audio_before..].iter().all(|pts| *pts >= 10_000_000));
    assert!(video[video_before..].iter().all(|pts| *pts >= 10_000_000));
    assert!(h.engine.stream_time() >= 10_000_000);

    let seen = wait_for_event(&h.events, &PipelineEvent::Seeked(10_000_000), SETTLE);
    assert!(seen.is_some());
}

#[test]
fn test_seek_while_running_keeps_nothing_before_target() {
    let h = harness(small_config(), MockSource::audio_video(20_000_000));
    h.engine.load_source("clip.mock").unwrap();
    h.engine.start().unwrap();
    assert!(wait_until(SETTLE, || h.engine.status().sync_ready));
    assert!(wait_until(SETTLE, || buffer_size(&h.engine.status().buffers, AUDIO_PACKETS) > 0));

    h.engine.seek(10_000_000, true).unwrap();
    let audio_before = h.presented.audio().len();

    // Running stages may refill right away, but only from the new position
    let status = h.engine.status();
    assert_eq!(status.state, EngineState::Running);
    for level in &status.buffers {
        if let Some(head) = level.head {
            assert!(head >= 10_000_000, "{} head at {}us", level.name, head);
        }
    }

    assert!(wait_until(SETTLE, || h.presented.audio().len() > audio_before + 8));
    // At most one block was already on its way to the output when the seek landed
    let audio = h.presented.audio();
    let after: Vec<i64> = audio[audio_before..].to_vec();
    assert!(after.iter().skip(1).all(|pts| *pts >= 10_000_000), "{:?}", after);
    assert!(h.engine.stream_time() >= 10_000_000);
}

#[test]
fn test_seek_backwards_after_drain_restarts_stages() {
    let h = harness(small_config(), MockSource::audio_video(300_000));
    h.engine.load_source("clip.mock").unwrap();
    h.engine.start().unwrap();
    assert!(wait_for_event(&h.events, &PipelineEvent::ClipEnded, SETTLE).is_some());

    h.engine.seek(0, true).unwrap();
    let presented = h.presented.audio().len();
    assert!(wait_for_event(&h.events, &PipelineEvent::PlaybackFinished, SETTLE).is_some());
    // The clip played again from the start
    assert!(h.presented.audio().len() > presented);
    assert!(wait_until(SETTLE, || h.engine.state() == EngineState::Stopped));
}

#[test]
fn test_watchdog_covers_stages_restarted_by_seek() {
    let config = EngineConfig {
        check_threads: true,
        monitor_interval_ms: 20,
        ..small_config()
    };
    let h = harness(config, MockSource::audio_video(300_000));
    h.engine.load_source("clip.mock").unwrap();
    h.engine.start().unwrap();
    assert!(wait_for_event(&h.events, &PipelineEvent::ClipEnded, SETTLE).is_some());
    h.engine.pause().unwrap();

    h.engine.seek(0, true).unwrap();
    assert_eq!(h.engine.state(), EngineState::Paused);

    // The old stages are joined; only the restarted coders can trip this
    let calls = h.container.decode_calls.load(Ordering::SeqCst);
    *h.container.panic_after.lock() = Some(calls);
    h.engine.unpause().unwrap();

    let deadline = Instant::now() + SETTLE;
    let mut reported = false;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match h.events.recv_timeout(left) {
            Ok(PipelineEvent::Error(message)) if message.contains("stopped unexpectedly") => {
                reported = true;
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    assert!(reported, "death of a restarted stage was not reported");
    assert!(h.engine.status().stages.iter().any(|stage| stage.phase == "Died"));
}

#[test]
fn test_failed_stage_restart_stops_engine() {
    let source = MockSource {
        // The coders opened at load are the only ones available
        coder_limit: Some(2),
        ..MockSource::audio_video(300_000)
    };
    let h = harness(small_config(), source);
    h.engine.load_source("clip.mock").unwrap();
    h.engine.start().unwrap();
    assert!(wait_for_event(&h.events, &PipelineEvent::ClipEnded, SETTLE).is_some());
    h.engine.pause().unwrap();

    assert!(matches!(
        h.engine.seek(0, true),
        Err(EngineError::Load(ContainerError::CoderUnavailable { .. }))
    ));
    assert_eq!(h.engine.state(), EngineState::Stopped);
    assert!(h.engine.status().stages.is_empty());
    assert_eq!(h.container.closed.load(Ordering::SeqCst), 1);
    assert!(h.events.try_iter().any(|e| e == PipelineEvent::Stopped));
}

#[test]
fn test_failed_seek_keeps_state() {
    let mut source = MockSource::audio_video(2_000_000);
    source.fail_seek = true;
    let h = harness(small_config(), source);
    h.engine.load_source("clip.mock").unwrap();

    match h.engine.seek(1_000_000, true) {
        Err(EngineError::SeekFailed { target, .. }) => assert_eq!(target, 1_000_000),
        other => panic!("Expected SeekFailed, got {:?}", other),
    }
    assert!(matches!(h.engine.seek(-1, false), Err(EngineError::SeekFailed { .. })));
    assert_eq!(h.engine.state(), EngineState::Loaded);
    assert!(h.events.try_iter().all(|e| !matches!(e, PipelineEvent::Seeked(_))));
}

#[test]
fn test_stop_is_idempotent_and_start_reloads() {
    let h = harness(small_config(), MockSource::audio_video(20_000_000));
    h.engine.load_source("clip.mock").unwrap();
    h.engine.start().unwrap();

    h.engine.stop().unwrap();
    assert_eq!(h.engine.state(), EngineState::Stopped);
    h.engine.stop().unwrap();
    assert_eq!(h.container.closed.load(Ordering::SeqCst), 1);

    let stopped = h.events.try_iter().filter(|e| *e == PipelineEvent::Stopped).count();
    assert_eq!(stopped, 1);
    assert!(matches!(h.engine.seek(0, true), Err(EngineError::InvalidState { .. })));

    // Start after stop reopens the last source
    h.engine.start().unwrap();
    assert_eq!(h.engine.state(), EngineState::Running);
    assert_eq!(h.container.opened.load(Ordering::SeqCst), 2);
    assert_eq!(h.engine.status().source.as_deref(), Some("clip.mock"));

    drop(h.engine);
    assert_eq!(h.container.closed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_set_play_speed() {
    let h = harness(small_config(), MockSource::audio_video(2_000_000));

    for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(h.engine.set_play_speed(bad), Err(EngineError::InvalidPlaySpeed(_))));
    }
    assert_eq!(h.engine.play_speed(), 1.0);

    h.engine.load_source("clip.mock").unwrap();
    h.engine.set_play_speed(2.0).unwrap();
    assert_eq!(h.engine.play_speed(), 2.0);
    assert_eq!(h.engine.status().play_speed, 2.0);
    assert!(h.events.try_iter().any(|e| e == PipelineEvent::PlaySpeedChanged(2.0)));
}

#[test]
fn test_stop_after_first_frame_pauses() {
    let config = EngineConfig {
        auto_start: true,
        stop_after_first_frame: true,
        ..small_config()
    };
    let h = harness(config, MockSource::audio_video(20_000_000));
    h.engine.load_source("clip.mock").unwrap();

    assert!(wait_for_event(&h.events, &PipelineEvent::Paused, SETTLE).is_some());
    assert_eq!(h.engine.state(), EngineState::Paused);
    assert!(!h.presented.audio().is_empty() || !h.presented.video().is_empty());
}

#[test]
fn test_audio_driven_clock_without_audio_falls_back() {
    let config = EngineConfig {
        clock: ClockKind::AudioDriven,
        ..small_config()
    };
    let h = harness(config, MockSource::video_only(10, 40_000));
    h.engine.load_source("video.mock").unwrap();
    assert_eq!(h.engine.status().clock, ClockKind::Ticking);

    h.engine.start().unwrap();
    assert!(wait_for_event(&h.events, &PipelineEvent::PlaybackFinished, SETTLE).is_some());
    let video = h.presented.video();
    assert!(!video.is_empty() && video.len() <= 10);
    assert!(video.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = EngineConfig {
        video_frame_buffer_size: 0,
        ..EngineConfig::default()
    };
    let result = Engine::new(
        config,
        Arc::new(MockOpener::new(MockSource::default())),
        Arc::new(NullOutputProvider::new()),
    );
    assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
}
