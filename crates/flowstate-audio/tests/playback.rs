//! Controller scenarios driven through a manual output device.

#![allow(clippy::unwrap_used, clippy::float_cmp)]

mod common;

use std::time::{Duration, Instant};

use common::{controller, pump, track_changes, Fixture, BLOCK};
use flowstate_audio::effects::Gain;
use flowstate_audio::effects::Effect;
use flowstate_audio::{EngineEvent, PlaybackState, SyncTarget};
use flowstate_core::{Error, RepeatMode, SessionState, StreamProperties};

#[test]
fn repeat_all_advances_and_wraps() {
    let fx = Fixture::new();
    let tracks = [fx.track("a", 2400), fx.track("b", 2400), fx.track("c", 2400)];
    let (mut c, device, events) = controller();
    c.add_paths(tracks.iter().cloned());
    c.set_repeat_mode(RepeatMode::All);
    c.play(None).unwrap();

    let mut seen = Vec::new();
    let mut b_restarted = false;
    let finished = pump(&mut c, &device, &events, &mut seen, |c, seen| {
        let changes = track_changes(seen);
        if changes.first() == Some(&1) && c.playlist().current_index() == Some(1) && c.position() < 0.05 {
            b_restarted = true;
        }
        changes.len() >= 3
    });

    assert!(finished, "playback never wrapped");
    assert_eq!(&track_changes(&seen)[..3], &[1, 2, 0]);
    assert!(b_restarted, "position did not reset for the second track");
    assert_eq!(c.state(), PlaybackState::Playing);
}

#[test]
fn repeat_off_stops_at_playlist_end() {
    let fx = Fixture::new();
    let (mut c, device, events) = controller();
    c.add_paths([fx.track("a", 600), fx.track("b", 600)]);
    c.play(None).unwrap();

    let mut seen = Vec::new();
    let finished = pump(&mut c, &device, &events, &mut seen, |_, seen| {
        seen.contains(&EngineEvent::PlaybackFinished)
    });

    assert!(finished);
    assert_eq!(track_changes(&seen), vec![1]);
    assert_eq!(c.state(), PlaybackState::Stopped);
    assert!(!c.is_producer_running());
}

#[test]
fn repeat_one_loops_current_track() {
    let fx = Fixture::new();
    let (mut c, device, events) = controller();
    c.add_paths([fx.track("a", 1280), fx.track("b", 1280)]);
    c.set_repeat_mode(RepeatMode::One);
    c.play(None).unwrap();

    // Ten blocks per pass; wait for three passes
    let mut seen = Vec::new();
    let looped = pump(&mut c, &device, &events, &mut seen, |c, _| {
        c.metrics().blocks_produced >= 30
    });

    assert!(looped);
    assert!(track_changes(&seen).is_empty());
    assert_eq!(c.playlist().current_index(), Some(0));
}

#[test]
fn paused_output_emits_silence_until_resumed() {
    let fx = Fixture::new();
    let (mut c, device, _events) = controller();
    c.load(fx.track("long", 32_000)).unwrap();
    c.play(None).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    c.pause().unwrap();
    assert_eq!(c.state(), PlaybackState::Paused);

    // Drain whatever was queued before the pause
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let block = device.render(BLOCK).unwrap();
        if block.is_silent() {
            break;
        }
        assert!(Instant::now() < deadline, "queue never drained");
    }

    for _ in 0..50 {
        let block = device.render(BLOCK).unwrap();
        assert!(block.has_shape(BLOCK, 1));
        assert!(block.is_silent());
    }

    c.resume().unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while device.render(BLOCK).unwrap().is_silent() {
        assert!(Instant::now() < deadline, "audio did not resume");
    }
}

#[test]
fn seek_discards_stale_blocks() {
    let fx = Fixture::new();
    let (mut c, device, _events) = controller();
    c.load(fx.track("long", 32_000)).unwrap();
    c.play(None).unwrap();
    for _ in 0..3 {
        device.render(BLOCK);
    }
    std::thread::sleep(Duration::from_millis(20));

    c.seek(2.0).unwrap();
    assert!((c.position() - 2.0).abs() < 1e-3);
    assert_eq!(c.state(), PlaybackState::Playing);

    let target = 0.01 + 16_000.0 * 1e-4;
    let tolerance = BLOCK as f32 * 1e-4 + 1e-3;
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut checked = 0;
    while checked < 5 {
        assert!(Instant::now() < deadline, "no audio after seek");
        let block = device.render(BLOCK).unwrap();
        if block.is_silent() {
            continue;
        }
        // Every sample after the seek comes from at or after the target
        assert!(
            block.samples()[0] >= target - tolerance,
            "stale sample {} observed after seek",
            block.samples()[0]
        );
        if checked == 0 {
            assert!((block.samples()[0] - target).abs() <= tolerance);
        }
        checked += 1;
    }
}

#[test]
fn load_stops_active_producer() {
    let fx = Fixture::new();
    let a = fx.track("a", 32_000);
    let b = fx.track("b", 800);
    let (mut c, _device, _events) = controller();
    c.load_and_play(&a).unwrap();
    assert!(c.is_producer_running());

    c.load(&b).unwrap();
    assert_eq!(c.state(), PlaybackState::Stopped);
    assert!(!c.is_producer_running());
    assert_eq!(c.position(), 0.0);
    assert_eq!(c.current_path(), Some(b.as_path()));
    assert_eq!(c.playlist().len(), 2);
}

#[test]
fn device_open_failure_leaves_state_unchanged() {
    let fx = Fixture::new();
    let (mut c, device, _events) = controller();
    c.load(fx.track("a", 800)).unwrap();

    device.set_fail_open(true);
    let err = c.play(None).unwrap_err();
    assert!(matches!(err, Error::Device(_)));
    assert!(err.is_user_visible());
    assert_eq!(c.state(), PlaybackState::Stopped);

    device.set_fail_open(false);
    c.play(None).unwrap();
    assert_eq!(c.state(), PlaybackState::Playing);
}

#[test]
fn lost_device_reported_and_reopened() {
    let fx = Fixture::new();
    let (mut c, device, events) = controller();
    c.load_and_play(fx.track("a", 32_000)).unwrap();
    assert!(c.is_output_open());

    device.lose_device();
    c.poll();
    assert!(events
        .try_iter()
        .any(|e| matches!(e, EngineEvent::Error(msg) if msg.contains("lost"))));
    assert!(!c.is_output_open());
    assert_eq!(c.state(), PlaybackState::Playing);

    c.reopen_output().unwrap();
    assert!(c.is_output_open());
}

#[test]
fn stream_change_reconfigures_chain() {
    let fx = Fixture::new();
    let (mut c, device, events) = controller();
    c.add_paths([fx.track("a", 600), fx.track_with("b", 16_000, 2, 600)]);
    c.play(None).unwrap();

    let stereo = StreamProperties {
        sample_rate: 16_000,
        channels: 2,
    };
    let mut seen = Vec::new();
    let loaded = pump(&mut c, &device, &events, &mut seen, |_, seen| {
        seen.iter().any(|e| {
            matches!(e, EngineEvent::TrackLoaded { index: 1, properties, .. } if *properties == stereo)
        })
    });

    assert!(loaded);
    assert_eq!(c.chain().lock().stream_properties(), stereo);
    assert_eq!(c.properties(), Some(stereo));
}

#[test]
fn truncated_track_advances() {
    let fx = Fixture::new();
    let a = fx.track("a", 8000);
    let bytes = std::fs::read(&a).unwrap();
    std::fs::write(&a, &bytes[..bytes.len() / 2]).unwrap();

    let (mut c, device, events) = controller();
    c.add_paths([a, fx.track("b", 600)]);
    c.play(None).unwrap();

    let mut seen = Vec::new();
    let advanced = pump(&mut c, &device, &events, &mut seen, |_, seen| {
        track_changes(seen).contains(&1)
    });
    assert!(advanced);
}

#[test]
fn effects_apply_to_rendered_audio() {
    let fx = Fixture::new();
    let (mut c, device, _events) = controller();
    c.load(fx.track("a", 8000)).unwrap();
    let mut gain = Gain::new();
    gain.set_parameter("gain_db", -6.0);
    c.chain().lock().add(Box::new(gain));
    c.play(None).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let block = loop {
        let block = device.render(BLOCK).unwrap();
        if !block.is_silent() {
            break block;
        }
        assert!(Instant::now() < deadline);
    };
    // First frame of the ramp is 0.01, halved by -6 dB
    assert!((block.samples()[0] - 0.01 * 0.501_187).abs() < 1e-4);
}

#[test]
fn previous_restarts_past_threshold() {
    let fx = Fixture::new();
    let (mut c, _device, _events) = controller();
    c.add_paths([fx.track("a", 800), fx.track("b", 40_000)]);
    c.play_index(1).unwrap();
    c.seek(3.5).unwrap();

    c.previous().unwrap();
    assert_eq!(c.playlist().current_index(), Some(1));
    assert!(c.position() < 0.01);

    c.previous().unwrap();
    assert_eq!(c.playlist().current_index(), Some(0));
    assert_eq!(c.state(), PlaybackState::Playing);
}

#[test]
fn force_sync_jumps_and_sets_state() {
    let fx = Fixture::new();
    let (mut c, _device, _events) = controller();
    c.add_paths([fx.track("a", 800), fx.track("b", 16_000)]);

    c.force_sync_playback(SyncTarget::Index(1), 0.5, true).unwrap();
    assert_eq!(c.state(), PlaybackState::Playing);
    assert_eq!(c.playlist().current_index(), Some(1));
    assert!((c.position() - 0.5).abs() < 0.02);

    c.force_sync_playback(SyncTarget::Index(1), 0.25, false).unwrap();
    assert_eq!(c.state(), PlaybackState::Paused);
    assert!((c.position() - 0.25).abs() < 0.02);
}

#[test]
fn session_round_trip() {
    let fx = Fixture::new();
    let (mut first, _d1, _e1) = controller();
    first.add_paths([fx.track("a", 800), fx.track("b", 8000)]);
    first.load(fx.dir.path().join("b.wav")).unwrap();
    first.set_volume(0.3);
    first.set_repeat_mode(RepeatMode::All);
    first.seek(0.5).unwrap();

    let json = first.session_state().to_json().unwrap();
    let session = SessionState::from_json(&json).unwrap();
    assert_eq!(session.current_index, Some(1));

    let (mut second, _d2, _e2) = controller();
    second.restore_session(&session).unwrap();
    assert_eq!(second.playlist().len(), 2);
    assert_eq!(second.playlist().current_index(), Some(1));
    assert_eq!(second.playlist().repeat_mode(), RepeatMode::All);
    assert!((second.volume() - 0.3).abs() < f32::EPSILON);
    assert!((second.position() - 0.5).abs() < 0.02);
    assert_eq!(second.state(), PlaybackState::Stopped);
}

#[test]
fn tap_receives_processed_audio() {
    let fx = Fixture::new();
    let (mut c, device, events) = controller();
    let mut tap = c.attach_tap();
    c.load_and_play(fx.track("a", 4000)).unwrap();

    let mut seen = Vec::new();
    let mut latest = Vec::new();
    let got = pump(&mut c, &device, &events, &mut seen, |_, _| {
        latest = tap.latest_mono(64);
        latest.len() == 64
    });
    assert!(got);
    assert!(latest.iter().all(|s| s.is_finite()));
}

#[test]
fn seek_after_track_fully_decoded_stays_on_track() {
    let fx = Fixture::new();
    let (mut c, device, events) = controller();
    c.add_paths([fx.track("a", 8 * BLOCK), fx.track("b", 8 * BLOCK)]);
    c.play(None).unwrap();

    // Eight blocks fit in the queue, so the producer reaches the end unaided
    std::thread::sleep(Duration::from_millis(200));
    device.render(BLOCK);
    device.render(BLOCK);

    c.seek(0.0).unwrap();
    c.poll();
    let seen: Vec<_> = events.try_iter().collect();
    assert!(track_changes(&seen).is_empty(), "seek advanced the playlist");
    assert_eq!(c.playlist().current_index(), Some(0));
    assert_eq!(c.state(), PlaybackState::Playing);
    assert!(c.position() < 0.02);

    let deadline = Instant::now() + Duration::from_secs(10);
    let block = loop {
        let block = device.render(BLOCK).unwrap();
        if !block.is_silent() {
            break block;
        }
        assert!(Instant::now() < deadline, "no audio after seek");
    };
    assert!((block.samples()[0] - 0.01).abs() < 1e-3);

    // The restarted track still hands over to the next entry
    let mut seen = Vec::new();
    assert!(pump(&mut c, &device, &events, &mut seen, |_, seen| {
        track_changes(seen) == [1]
    }));
}

#[test]
fn playlist_end_waits_for_queued_tail() {
    let fx = Fixture::new();
    let (mut c, device, events) = controller();
    c.add_paths([fx.track("a", 10 * BLOCK)]);
    c.play(None).unwrap();

    std::thread::sleep(Duration::from_millis(200));
    c.poll();
    let seen: Vec<_> = events.try_iter().collect();
    assert!(!seen.contains(&EngineEvent::PlaybackFinished));
    assert_eq!(c.state(), PlaybackState::Playing);

    let mut audible = 0;
    let mut finished = false;
    for _ in 0..20 {
        if !device.render(BLOCK).unwrap().is_silent() {
            audible += 1;
        }
        c.poll();
        if events.try_iter().any(|e| e == EngineEvent::PlaybackFinished) {
            finished = true;
            break;
        }
    }
    assert!(finished);
    assert_eq!(audible, 10, "finished before the tail played");
    assert_eq!(c.state(), PlaybackState::Stopped);
}

#[test]
fn next_at_playlist_end_finishes_immediately() {
    let fx = Fixture::new();
    let (mut c, _device, events) = controller();
    c.add_paths([fx.track("a", 10 * BLOCK)]);
    c.play(None).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    c.next().unwrap();
    assert_eq!(c.state(), PlaybackState::Stopped);
    assert!(events.try_iter().any(|e| e == EngineEvent::PlaybackFinished));
}
