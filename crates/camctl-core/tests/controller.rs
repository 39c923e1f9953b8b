//! Controller lifecycle, configuration files and the async handle

mod common;

use camctl_core::actor::ControllerHandle;
use camctl_core::config::ControllerConfig;
use camctl_core::dialect::{DialectKind, RunDirection};
use camctl_core::protocol::{LinkConfig, ProtocolError};
use camctl_core::Controller;
use common::{canon_camera, fast_config, mock, visca_camera, VC_C4_RANGES};
use pretty_assertions::assert_eq;
use std::fs;
use std::time::{Duration, Instant};

#[test]
fn test_unknown_protocol_is_rejected() {
    for name in ["bogus", "Canon", "VISCA", ""] {
        assert!(
            matches!(
                Controller::create(name),
                Err(ProtocolError::UnknownProtocol(n)) if n == name
            ),
            "{:?} accepted",
            name
        );
    }
}

#[test]
fn test_reopen_replaces_previous_session() {
    let (first, _h1) = mock(visca_camera());
    let (second, h2) = mock(visca_camera());
    let mut controller = Controller::create_with_config("visca", fast_config()).unwrap();

    controller.open_with_channel(first).unwrap();
    controller.pan(10.0, 20.0).unwrap();
    assert!(controller.last_position().pan > 19.0);

    controller.open_with_channel(second).unwrap();
    assert!(controller.is_open());
    assert_eq!(controller.last_position().pan, 0.0);
    controller.query().unwrap();
    assert_eq!(h2.frames().len(), 2);

    controller.close();
    assert!(!controller.is_open());
    controller.close();
}

#[test]
fn test_tilt_holds_pan() {
    let (channel, _handle) = mock(visca_camera());
    let mut controller = Controller::create_with_config("sony", fast_config()).unwrap();
    controller.open_with_channel(channel).unwrap();

    controller.pan(10.0, 50.0).unwrap();
    controller.tilt(2.0, -10.0).unwrap();
    let pos = controller.query().unwrap();
    let cal = controller.calibration().unwrap();
    assert!((pos.pan - 50.0).abs() <= cal.pan.resolution());
    assert!((pos.tilt + 10.0).abs() <= cal.tilt.resolution());
}

#[test]
fn test_counters_track_traffic() {
    let (channel, _handle) = mock(visca_camera());
    let mut controller = Controller::create_with_config("visca", fast_config()).unwrap();
    controller.open_with_channel(channel).unwrap();
    let before = controller.counters();
    controller.zoom(1, 0.0).unwrap();
    let after = controller.counters();
    assert_eq!(after.tx_messages, before.tx_messages + 1);
    assert_eq!(after.tx_bytes, before.tx_bytes + 6);
    assert_eq!(after.rx_messages, before.rx_messages + 1);
}

#[test]
fn test_config_file_drives_timing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camctl.json");
    fs::write(
        &path,
        r#"{
            "link": { "poll_interval_ms": 1, "reply_timeout_ms": 40 },
            "visca_address": 2
        }"#,
    )
    .unwrap();

    let config = ControllerConfig::from_file(&path).unwrap();
    assert_eq!(config.visca_address, 2);
    assert_eq!(config.link.reply_timeout_ms, 40);
    assert_eq!(config.link.baud_rate, 9600);

    let (channel, handle) = common::silent();
    let mut controller = Controller::create_with_config("visca", config).unwrap();
    let start = Instant::now();
    assert!(matches!(
        controller.open_with_channel(channel),
        Err(ProtocolError::Timeout)
    ));
    assert!(start.elapsed() >= Duration::from_millis(40));
    assert_eq!(handle.frames(), vec![vec![0x82, 0x09, 0x00, 0x02, 0xFF]]);
}

#[test]
fn test_config_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saved.json");
    let config = ControllerConfig {
        terminator: Some(0xFF),
        pana_speed_table: 2,
        link: LinkConfig {
            completion_timeout_ms: 8000,
            ..LinkConfig::default()
        },
        ..ControllerConfig::default()
    };
    config.save(&path).unwrap();
    assert_eq!(ControllerConfig::from_file(&path).unwrap(), config);
}

#[test]
fn test_bad_config_files() {
    let dir = tempfile::tempdir().unwrap();

    let garbled = dir.path().join("garbled.json");
    fs::write(&garbled, "{ not json").unwrap();
    assert!(matches!(
        ControllerConfig::from_file(&garbled),
        Err(ProtocolError::Config(_))
    ));

    let out_of_range = dir.path().join("range.json");
    fs::write(&out_of_range, r#"{ "visca_address": 0 }"#).unwrap();
    assert!(matches!(
        ControllerConfig::from_file(&out_of_range),
        Err(ProtocolError::Config(_))
    ));

    assert!(matches!(
        ControllerConfig::from_file(dir.path().join("missing.json")),
        Err(ProtocolError::IoError(_))
    ));
}

#[tokio::test]
async fn test_handle_serialises_requests() {
    let (channel, handle) = mock(canon_camera("VC-C4", VC_C4_RANGES));
    let mut controller = Controller::create_with_config("canon", fast_config()).unwrap();
    controller.open_with_channel(channel).unwrap();
    handle.clear();

    let camera = ControllerHandle::spawn(controller).unwrap();
    assert_eq!(camera.kind(), DialectKind::Canon);

    let cal = camera.calibration().await.unwrap().unwrap();
    let (a, b) = tokio::join!(camera.pan(20.0, 30.0), camera.zoom(4, -1.0));
    a.unwrap();
    b.unwrap();
    camera.run(5.0, 5.0, RunDirection::Top, true).await.unwrap();
    camera.run(0.0, 0.0, RunDirection::None, false).await.unwrap();

    let pos = camera.query().await.unwrap();
    assert!((pos.pan - 30.0).abs() <= cal.pan.resolution());

    // every frame reached the wire whole, one after another
    for frame in handle.frames() {
        assert_eq!(&frame[..4], &[0xFF, 0x30, 0x30, 0x00]);
        assert_eq!(frame.last().copied(), Some(0xEF));
    }

    camera.close().await.unwrap();
    assert!(matches!(
        camera.query().await,
        Err(ProtocolError::NotConnected)
    ));
    camera.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_aborts_inflight_query() {
    let mut config = fast_config();
    config.link.reply_timeout_ms = 10_000;

    // answers everything except the position query
    let (channel, _handle) = mock({
        let mut camera = canon_camera("VC-C4", VC_C4_RANGES);
        move |frame: &[u8]| {
            if frame.get(4) == Some(&0x63) {
                Vec::new()
            } else {
                camera(frame)
            }
        }
    });
    let mut controller = Controller::create_with_config("canon", config).unwrap();
    controller.open_with_channel(channel).unwrap();
    let camera = ControllerHandle::spawn(controller).unwrap();
    let token = camera.cancellation_token();

    let start = Instant::now();
    let (result, _) = tokio::join!(camera.query(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    assert!(matches!(result, Err(ProtocolError::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(5));

    camera.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handle_open_missing_device() {
    let controller = Controller::create("pana").unwrap();
    let camera = ControllerHandle::spawn(controller).unwrap();
    assert!(matches!(
        camera.open("/dev/does-not-exist-camctl").await,
        Err(ProtocolError::Device { .. })
    ));
    assert!(camera.calibration().await.unwrap().is_none());
    camera.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_goes_through_after_cancel_and_reset() {
    let (channel, handle) = mock(visca_camera());
    let mut controller = Controller::create_with_config("visca", fast_config()).unwrap();
    controller.open_with_channel(channel).unwrap();
    let mut camera = ControllerHandle::spawn(controller).unwrap();

    camera.run(5.0, 5.0, RunDirection::Left, true).await.unwrap();
    camera.cancellation_token().cancel();
    assert!(matches!(
        camera.run(5.0, 5.0, RunDirection::Left, false).await,
        Err(ProtocolError::Cancelled)
    ));

    camera.reset_cancellation().await.unwrap();
    assert!(!camera.cancellation_token().is_cancelled());
    camera.run(5.0, 5.0, RunDirection::Left, false).await.unwrap();

    let stops = handle
        .frames()
        .iter()
        .filter(|f| f.len() == 9 && f[1..4] == [0x01, 0x06, 0x01] && f[6..8] == [0x03, 0x03])
        .count();
    assert_eq!(stops, 2);
    camera.shutdown().await.unwrap();
}
