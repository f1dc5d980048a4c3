//! Playback controller tests with a fake engine and a recording device

#![cfg(unix)]

mod helpers;

use helpers::{arg_after, EngineScript, Rig};
use narramix_engine::{MixEvent, MixSettings, MixSource, PlaybackState};
use serial_test::serial;
use std::path::PathBuf;
use std::time::Duration;

const STREAM_BYTES: u64 = 250_000;

fn output_of(args: &[String]) -> PathBuf {
    PathBuf::from(args.last().unwrap())
}

#[tokio::test]
#[serial]
async fn test_play_requires_both_sources() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;
    let controller = narramix_engine::PlaybackController::new(
        helpers::test_config(&rig.tools.ffmpeg),
        rig.player.clone(),
        std::sync::Arc::new(helpers::FakeProbe::new([])),
        MixSettings::default(),
    );

    let outcome = controller.play(None).await;
    assert!(!outcome.success);
    assert_eq!(
        outcome.message,
        "Please load both audiobook and background music first."
    );
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert!(rig.tools.runs().is_empty());
}

#[tokio::test]
#[serial]
async fn test_cued_seek_is_used_by_next_play() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;
    let mut events = rig.controller.subscribe_events();

    let outcome = rig.controller.seek(50.0).await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(rig.controller.state(), PlaybackState::Idle);
    assert!(rig.tools.runs().is_empty());
    assert!(matches!(
        events.try_recv(),
        Ok(MixEvent::PositionCued { position, .. }) if position == 50.0
    ));

    let outcome = rig.controller.play(None).await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "Playing from 0:50");
    assert_eq!(rig.controller.state(), PlaybackState::Playing);

    let args = rig.tools.last_run();
    assert_eq!(arg_after(&args, "-ss"), Some("50.000"));
    assert_eq!(arg_after(&args, "-t"), Some("550.000"));
    assert_eq!(arg_after(&args, "-ar"), Some("22050"));
    assert_eq!(arg_after(&args, "-f"), Some("wav"));
    assert_eq!(rig.player.calls(), vec!["load", "set_volume", "play"]);
    assert_eq!(rig.player.loaded(), Some(output_of(&args)));

    let position = rig.controller.current_position();
    assert!((50.0..51.0).contains(&position), "position {position}");

    rig.controller.stop().await;
}

#[tokio::test]
#[serial]
async fn test_stop_removes_stream_buffer() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;
    assert!(rig.controller.play(Some(10.0)).await.success);
    let buffer = output_of(&rig.tools.last_run());
    assert!(buffer.exists());

    let outcome = rig.controller.stop().await;
    assert!(outcome.success);
    assert_eq!(rig.controller.state(), PlaybackState::Stopped);
    assert_eq!(rig.controller.current_position(), 0.0);
    assert!(!buffer.exists());
    assert_eq!(rig.player.calls().last().map(String::as_str), Some("stop"));
}

#[tokio::test]
#[serial]
async fn test_stop_during_buffering_cancels_start() {
    // Never writes enough output to become playable
    let rig = Rig::new(&EngineScript::streaming(1_000), 600.0, MixSettings::default()).await;

    let controller = rig.controller.clone();
    let play = tokio::spawn(async move { controller.play(None).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(rig.controller.state(), PlaybackState::Preparing);

    let stop = tokio::time::timeout(Duration::from_secs(5), rig.controller.stop())
        .await
        .expect("stop must not wait out the buffering loop");
    assert!(stop.success);

    let outcome = play.await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Cancelled");
    assert_eq!(rig.controller.state(), PlaybackState::Stopped);
    assert!(!output_of(&rig.tools.last_run()).exists());
    assert!(rig.player.calls().is_empty());
}

#[tokio::test]
#[serial]
async fn test_engine_exit_during_buffering_reports_failure() {
    let script = EngineScript::failing(1, &["rain.mp3: No such file or directory"]);
    let rig = Rig::new(&script, 600.0, MixSettings::default()).await;

    let outcome = rig.controller.play(None).await;
    assert!(!outcome.success);
    assert!(outcome.message.starts_with("FFmpeg failed: "), "{}", outcome.message);
    assert!(outcome.message.contains("No such file or directory"));
    assert_eq!(rig.controller.state(), PlaybackState::Stopped);
}

#[tokio::test]
#[serial]
async fn test_speed_converts_durations() {
    let settings = MixSettings::new(1.5, 0.0, -10.0);
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, settings).await;

    let mixed = rig.controller.mixed_duration().await.unwrap();
    assert!((mixed - 400.0).abs() < 1e-9);

    // 100 s into the mix is 150 s into the recording
    assert!(rig.controller.play(Some(100.0)).await.success);
    let args = rig.tools.last_run();
    assert_eq!(arg_after(&args, "-ss"), Some("150.000"));
    assert_eq!(arg_after(&args, "-t"), Some("300.000"));
    let graph = arg_after(&args, "-filter_complex").unwrap();
    assert!(graph.contains("atempo=1.500"));

    rig.controller.stop().await;
}

#[tokio::test]
#[serial]
async fn test_play_past_end_is_rejected() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 120.0, MixSettings::default()).await;

    let outcome = rig.controller.play(Some(120.0)).await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("past the end"), "{}", outcome.message);
    assert_eq!(rig.controller.state(), PlaybackState::Stopped);
    assert!(rig.tools.runs().is_empty());
}

#[tokio::test]
#[serial]
async fn test_pause_resume_and_live_gain() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;
    assert!(rig.controller.play(None).await.success);

    assert!(rig.controller.pause().success);
    assert_eq!(rig.controller.state(), PlaybackState::Paused);
    let frozen = rig.controller.current_position();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rig.controller.current_position(), frozen);
    assert!(!rig.controller.pause().success);

    let expected = MixSettings::new(1.0, -6.0, -10.0).blended_volume();
    assert!(rig.controller.set_primary_gain(-6.0).success);
    assert_eq!(rig.player.last_volume(), Some(expected));

    assert!(rig.controller.resume().await.success);
    assert_eq!(rig.controller.state(), PlaybackState::Playing);
    assert!(rig.controller.current_position() >= frozen);
    assert_eq!(
        rig.player.calls(),
        vec!["load", "set_volume", "play", "pause", "set_volume", "unpause"]
    );
    // Gain changes never restart the engine
    assert_eq!(rig.tools.runs().len(), 1);

    rig.controller.stop().await;
}

#[tokio::test]
#[serial]
async fn test_gain_while_idle_only_updates_settings() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;

    assert!(rig.controller.set_background_gain(-20.0).success);
    assert_eq!(rig.controller.settings().background_gain_db, -20.0);
    assert_eq!(rig.player.last_volume(), None);

    assert!(rig.controller.play(None).await.success);
    let graph = arg_after(&rig.tools.last_run(), "-filter_complex")
        .unwrap()
        .to_string();
    assert!(graph.contains("[1:a]volume=-20dB[m]"), "{graph}");

    rig.controller.stop().await;
}

#[tokio::test]
#[serial]
async fn test_speed_changes_coalesce_into_one_restart() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;
    let mut events = rig.controller.subscribe_events();
    assert!(rig.controller.play(Some(30.0)).await.success);

    assert!(rig.controller.set_speed(1.1).success);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rig.controller.set_speed(1.25).success);
    assert_eq!(rig.controller.settings().speed(), 1.25);
    assert_eq!(rig.tools.runs().len(), 1);

    // Debounce window plus the restart's own buffering
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let runs = rig.tools.runs();
    assert_eq!(runs.len(), 2, "expected one restart");
    let graph = arg_after(&runs[1], "-filter_complex").unwrap();
    assert!(graph.contains("atempo=1.250"));
    assert_eq!(rig.controller.state(), PlaybackState::Playing);

    // Restarted at the same point of the recording: ~30 s of source
    let seek: f64 = arg_after(&runs[1], "-ss").unwrap().parse().unwrap();
    assert!((30.0..31.0).contains(&seek), "seek {seek}");

    let mut scheduled = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, MixEvent::SpeedRestartScheduled { .. }) {
            scheduled += 1;
        }
    }
    assert_eq!(scheduled, 2);

    rig.controller.stop().await;
}

#[tokio::test]
#[serial]
async fn test_speed_change_while_idle_does_not_stream() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;
    let outcome = rig.controller.set_speed(5.0);
    assert!(outcome.success);
    assert_eq!(rig.controller.settings().speed(), 2.0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(rig.tools.runs().is_empty());
    assert_eq!(rig.controller.state(), PlaybackState::Idle);
}

#[tokio::test]
#[serial]
async fn test_adjustments_while_preparing_reach_the_stream() {
    let script = EngineScript::streaming(STREAM_BYTES).after_delay(600);
    let rig = Rig::new(&script, 600.0, MixSettings::default()).await;
    let mut events = rig.controller.subscribe_events();

    let controller = rig.controller.clone();
    let play = tokio::spawn(async move { controller.play(None).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rig.controller.state(), PlaybackState::Preparing);
    assert!(rig.controller.set_speed(1.5).success);
    assert!(rig.controller.set_primary_gain(-20.0).success);

    let outcome = play.await.unwrap();
    assert!(outcome.success, "{}", outcome.message);
    let expected = MixSettings::new(1.5, -20.0, -10.0).blended_volume();
    assert_eq!(rig.player.last_volume(), Some(expected));

    // Debounce window plus the restart's own delayed buffering
    tokio::time::sleep(Duration::from_millis(2000)).await;

    let runs = rig.tools.runs();
    assert_eq!(runs.len(), 2, "expected a restart at the new speed");
    assert!(!arg_after(&runs[0], "-filter_complex").unwrap().contains("atempo"));
    let graph = arg_after(&runs[1], "-filter_complex").unwrap();
    assert!(graph.contains("atempo=1.500"), "{graph}");
    assert!(graph.contains("volume=-20dB"), "{graph}");
    let seek: f64 = arg_after(&runs[1], "-ss").unwrap().parse().unwrap();
    assert!((0.0..2.0).contains(&seek), "seek {seek}");
    assert_eq!(rig.controller.state(), PlaybackState::Playing);
    assert_eq!(rig.player.last_volume(), Some(expected));

    let mut scheduled = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let MixEvent::SpeedRestartScheduled { speed, .. } = event {
            scheduled.push(speed);
        }
    }
    assert_eq!(scheduled, vec![1.5]);

    rig.controller.stop().await;
}

#[tokio::test]
#[serial]
async fn test_seek_while_playing_replaces_stream() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;
    assert!(rig.controller.play(Some(10.0)).await.success);
    let first = output_of(&rig.tools.last_run());

    let outcome = rig.controller.seek(120.0).await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "Playing from 2:00");
    assert_eq!(rig.controller.state(), PlaybackState::Playing);

    let runs = rig.tools.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(arg_after(&runs[1], "-ss"), Some("120.000"));
    assert_eq!(arg_after(&runs[1], "-t"), Some("480.000"));
    assert!(!first.exists());
    assert_eq!(rig.player.loaded(), Some(output_of(&runs[1])));

    let position = rig.controller.current_position();
    assert!((120.0..121.0).contains(&position), "position {position}");

    rig.controller.stop().await;
}

#[tokio::test]
#[serial]
async fn test_seek_while_paused_restarts_playing() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;
    assert!(rig.controller.play(None).await.success);
    assert!(rig.controller.pause().success);

    let outcome = rig.controller.seek(200.0).await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(rig.controller.state(), PlaybackState::Playing);

    let runs = rig.tools.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(arg_after(&runs[1], "-ss"), Some("200.000"));
    assert!(!output_of(&runs[0]).exists());

    rig.controller.stop().await;
}

#[tokio::test]
#[serial]
async fn test_resume_after_speed_change_restarts_at_same_recording_point() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;
    assert!(rig.controller.play(Some(30.0)).await.success);
    assert!(rig.controller.pause().success);
    let paused_at = rig.controller.current_position();

    assert!(rig.controller.set_speed(1.25).success);
    // No restart while paused
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(rig.tools.runs().len(), 1);
    assert_eq!(rig.controller.state(), PlaybackState::Paused);

    let outcome = rig.controller.resume().await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(rig.controller.state(), PlaybackState::Playing);

    let runs = rig.tools.runs();
    assert_eq!(runs.len(), 2);
    let graph = arg_after(&runs[1], "-filter_complex").unwrap();
    assert!(graph.contains("atempo=1.250"), "{graph}");
    let seek: f64 = arg_after(&runs[1], "-ss").unwrap().parse().unwrap();
    assert!((seek - paused_at).abs() < 0.01, "seek {seek}, paused at {paused_at}");

    // Mixed timeline shrinks with the faster speed
    let position = rig.controller.current_position();
    assert!((paused_at / 1.25 - 0.01..paused_at / 1.25 + 1.0).contains(&position));
    assert!(!rig.player.calls().contains(&"unpause".to_string()));

    rig.controller.stop().await;
}

#[tokio::test]
#[serial]
async fn test_output_finished_follows_device() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;
    assert!(!rig.controller.output_finished());

    assert!(rig.controller.play(None).await.success);
    assert!(!rig.controller.output_finished());

    rig.player.finish();
    assert!(rig.controller.output_finished());

    // Paused output is not finished output
    assert!(rig.controller.pause().success);
    assert!(!rig.controller.output_finished());

    rig.controller.stop().await;
    assert!(!rig.controller.output_finished());
}

#[tokio::test]
#[serial]
async fn test_preview_caps_duration() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;

    let outcome = rig.controller.preview(590.0, 30.0).await;
    assert!(outcome.success, "{}", outcome.message);
    let args = rig.tools.last_run();
    // Only 10 s remain
    assert_eq!(arg_after(&args, "-t"), Some("10.000"));
    assert_eq!(arg_after(&args, "-ss"), Some("590.000"));

    assert!(!rig.controller.preview(0.0, 0.0).await.success);
    rig.controller.stop().await;
}

#[tokio::test]
#[serial]
async fn test_multi_file_preview_trims_primary() {
    let rig = Rig::new(&EngineScript::streaming(STREAM_BYTES), 600.0, MixSettings::default()).await;
    let chapters = vec![rig.tools.media("01.mp3"), rig.tools.media("02.mp3")];
    let probe = std::sync::Arc::new(helpers::FakeProbe::new([
        (chapters[0].clone(), 300.0),
        (chapters[1].clone(), 300.0),
    ]));
    let controller = narramix_engine::PlaybackController::new(
        helpers::test_config(&rig.tools.ffmpeg),
        rig.player.clone(),
        probe,
        MixSettings::default(),
    );
    assert!(controller.set_primary(MixSource::Sequence(chapters)).await.success);
    assert!(controller.set_background(&rig.background).await.success);

    assert!(controller.preview(42.0, 30.0).await.success);
    let args = rig.tools.last_run();
    assert_eq!(arg_after(&args, "-f"), Some("concat"));
    assert_eq!(arg_after(&args, "-ss"), None);
    let graph = arg_after(&args, "-filter_complex").unwrap();
    assert!(
        graph.starts_with("[0:a]atrim=start=42.000:end=72.000,asetpts=PTS-STARTPTS,"),
        "{graph}"
    );

    controller.stop().await;
}

#[tokio::test]
#[serial]
async fn test_render_through_controller_is_exclusive() {
    let rig = Rig::new(&EngineScript::streaming(50_000), 600.0, MixSettings::default()).await;
    let mut events = rig.controller.subscribe_events();
    let target = rig.tools.dir.path().join("export.mp3");

    let controller = rig.controller.clone();
    let first_target = target.clone();
    let first = tokio::spawn(async move { controller.render(first_target, |_| {}).await });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = rig.controller.render(target.clone(), |_| {}).await;
    assert!(!second.success);
    assert_eq!(second.message, "A render is already in progress");

    assert!(rig.controller.cancel_render().success);
    let first = first.await.unwrap();
    assert!(!first.success);
    assert_eq!(first.message, "Cancelled");
    assert!(!target.exists());
    assert!(!rig.controller.cancel_render().success);

    let mut finished = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let MixEvent::RenderFinished { success, message, .. } = event {
            finished.push((success, message));
        }
    }
    assert_eq!(finished, vec![(false, "Cancelled".to_string())]);
}

#[tokio::test]
#[serial]
async fn test_render_through_controller_reports_size() {
    let rig = Rig::new(&EngineScript::succeeding(2 * 1024 * 1024), 600.0, MixSettings::default()).await;
    let target = rig.tools.dir.path().join("export.mp3");

    let mut percents = Vec::new();
    let outcome = rig.controller.render(&target, |p| percents.push(p.percent)).await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(
        outcome.message,
        format!("Export complete: {} (2.0 MB)", target.display())
    );
    assert_eq!(percents.last(), Some(&100));
    // Rendering does not touch playback
    assert_eq!(rig.controller.state(), PlaybackState::Idle);
}
