//! Integration tests for the recording lifecycle, driven through the
//! simulated device adapter.

use std::sync::Arc;
use std::time::Duration;

use biosig_acquisition::{
    load_bundle, spawn, DataKind, RecorderConfig, RecorderError, RecorderState,
    RecordingStateError, SaveRequest,
};
use biosig_device::{DeviceKind, SimulatedConnector};
use tokio_util::sync::CancellationToken;

fn fast_config() -> RecorderConfig {
    RecorderConfig {
        tick_interval: Duration::from_millis(25),
        connect_timeout: Duration::from_secs(2),
        window_seconds: 10.0,
    }
}

fn quick_connector() -> Arc<SimulatedConnector> {
    Arc::new(SimulatedConnector {
        handshake_delay: Duration::from_millis(5),
        fail_handshake: false,
    })
}

fn save_request(folder: std::path::PathBuf) -> SaveRequest {
    SaveRequest {
        folder,
        name: Some("test_rec".to_string()),
        subject_id: None,
        description: "integration test".to_string(),
        flat_exports: true,
    }
}

#[tokio::test]
async fn full_lifecycle_records_and_saves() {
    let shutdown = CancellationToken::new();
    let recorder = spawn(fast_config(), quick_connector(), shutdown.clone());

    recorder.connect(DeviceKind::Muse2).await.unwrap();
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Armed);

    recorder.start_recording().await.unwrap();
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Recording);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let window = recorder.window_snapshot().await.unwrap();
    assert!(!window.is_empty(), "live window should fill while recording");
    assert_eq!(window.channels.len(), 5);

    recorder.stop_recording().await.unwrap();
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Stopped);

    let dir = tempfile::tempdir().unwrap();
    let saved = recorder
        .save_recording(save_request(dir.path().to_path_buf()))
        .await
        .unwrap();
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Saved);

    let bundle = load_bundle(&saved.bundle_path).unwrap();
    let eeg = bundle.record(DataKind::Eeg).expect("eeg record");
    assert!(!eeg.is_empty());
    assert_eq!(eeg.rows[0].time_rel, 0.0);
    for pair in eeg.rows.windows(2) {
        assert!(pair[0].time_rel <= pair[1].time_rel);
    }
    // Secondary groups come from the one-shot bulk read at stop.
    assert!(bundle.record(DataKind::Imu).is_some());
    assert!(bundle.record(DataKind::Ppg).is_some());
    assert!(!saved.csv_paths.is_empty());
    assert!(saved.description_path.is_some());

    shutdown.cancel();
}

#[tokio::test]
async fn connect_failure_leaves_idle_and_no_polling() {
    let shutdown = CancellationToken::new();
    let connector = Arc::new(SimulatedConnector {
        handshake_delay: Duration::from_millis(5),
        fail_handshake: true,
    });
    let recorder = spawn(fast_config(), connector, shutdown.clone());

    let mut events = recorder.subscribe();
    let err = recorder.connect(DeviceKind::Muse2).await.unwrap_err();
    assert!(matches!(err, RecorderError::Connect(_)));
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Idle);

    // The failure is also broadcast to subscribers.
    let event = events.recv().await.unwrap();
    assert!(matches!(
        event,
        biosig_acquisition::RecorderEvent::ConnectFailed(_)
    ));

    // Recording must be rejected without a device.
    let err = recorder.start_recording().await.unwrap_err();
    assert!(matches!(err, RecorderError::State(_)));
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Idle);

    shutdown.cancel();
}

#[tokio::test]
async fn illegal_transitions_are_rejected_without_side_effects() {
    let shutdown = CancellationToken::new();
    let recorder = spawn(fast_config(), quick_connector(), shutdown.clone());

    // stop() from Idle: error, state still Idle.
    let err = recorder.stop_recording().await.unwrap_err();
    assert!(matches!(
        err,
        RecorderError::State(RecordingStateError::Illegal { .. })
    ));
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Idle);

    recorder.connect(DeviceKind::Muse2).await.unwrap();
    recorder.start_recording().await.unwrap();

    // start() while Recording is rejected and recording continues.
    let err = recorder.start_recording().await.unwrap_err();
    assert!(matches!(err, RecorderError::State(_)));
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Recording);

    // save() is only legal from Stopped.
    let dir = tempfile::tempdir().unwrap();
    let err = recorder
        .save_recording(save_request(dir.path().to_path_buf()))
        .await
        .unwrap_err();
    assert!(matches!(err, RecorderError::State(_)));

    shutdown.cancel();
}

#[tokio::test]
async fn second_connect_while_pending_is_rejected() {
    let shutdown = CancellationToken::new();
    let connector = Arc::new(SimulatedConnector {
        handshake_delay: Duration::from_millis(300),
        fail_handshake: false,
    });
    let recorder = spawn(fast_config(), connector, shutdown.clone());

    let first = {
        let recorder = recorder.clone();
        tokio::spawn(async move { recorder.connect(DeviceKind::Muse2).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = recorder.connect(DeviceKind::MuseS).await.unwrap_err();
    assert!(matches!(
        err,
        RecorderError::Connect(biosig_device::ConnectError::Pending)
    ));

    first.await.unwrap().unwrap();
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Armed);

    shutdown.cancel();
}

#[tokio::test]
async fn connect_timeout_reports_and_discards_late_result() {
    let shutdown = CancellationToken::new();
    let config = RecorderConfig {
        connect_timeout: Duration::from_millis(50),
        ..fast_config()
    };
    let connector = Arc::new(SimulatedConnector {
        handshake_delay: Duration::from_millis(200),
        fail_handshake: false,
    });
    let recorder = spawn(config, connector, shutdown.clone());

    let err = recorder.connect(DeviceKind::Muse2).await.unwrap_err();
    assert!(matches!(
        err,
        RecorderError::Connect(biosig_device::ConnectError::Timeout(_))
    ));
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Idle);

    // The worker finishes on its own; its result is discarded, not armed.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Idle);

    shutdown.cancel();
}

#[tokio::test]
async fn zero_sample_stop_persists_placeholder_bundle() {
    let shutdown = CancellationToken::new();
    // Tick far slower than the test runs so no poll ever lands.
    let config = RecorderConfig {
        tick_interval: Duration::from_secs(60),
        ..fast_config()
    };
    let recorder = spawn(config, quick_connector(), shutdown.clone());

    recorder.connect(DeviceKind::Muse2).await.unwrap();
    recorder.start_recording().await.unwrap();
    recorder.stop_recording().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let saved = recorder
        .save_recording(SaveRequest {
            folder: dir.path().to_path_buf(),
            name: Some("empty_rec".to_string()),
            subject_id: Some("s01".to_string()),
            description: String::new(),
            flat_exports: true,
        })
        .await
        .unwrap();

    let bundle = load_bundle(&saved.bundle_path).unwrap();
    assert!(saved.bundle_path.starts_with(dir.path().join("s01")));
    assert_eq!(bundle.metadata.name, "empty_rec");
    assert_eq!(bundle.metadata.duration_secs, 0.0);

    shutdown.cancel();
}

#[tokio::test]
async fn disconnect_aborts_recording_and_returns_to_idle() {
    let shutdown = CancellationToken::new();
    let recorder = spawn(fast_config(), quick_connector(), shutdown.clone());

    recorder.connect(DeviceKind::Muse2).await.unwrap();
    recorder.start_recording().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    recorder.disconnect().await.unwrap();
    assert_eq!(recorder.state().await.unwrap(), RecorderState::Idle);

    // Aborted recording is gone: nothing left to save or display.
    assert!(recorder.window_snapshot().await.unwrap().is_empty());
    let err = recorder.stop_recording().await.unwrap_err();
    assert!(matches!(err, RecorderError::State(_)));

    shutdown.cancel();
}

#[tokio::test]
async fn repeated_recordings_reset_the_accumulator() {
    let shutdown = CancellationToken::new();
    let recorder = spawn(fast_config(), quick_connector(), shutdown.clone());

    recorder.connect(DeviceKind::Muse2).await.unwrap();
    recorder.start_recording().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    recorder.stop_recording().await.unwrap();

    // A second recording starts from a clean buffer and a fresh epoch.
    recorder.start_recording().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let window = recorder.window_snapshot().await.unwrap();
    assert!(!window.is_empty());
    assert_eq!(window.rows[0].time_rel, 0.0);
    assert!(window.duration_secs() < 0.2);

    recorder.stop_recording().await.unwrap();
    shutdown.cancel();
}
