//! Canon range discovery and the degree mapping built from it

mod common;

use camctl_core::calibration::{AxisRange, Bound, RangeSource, CANON_UNIT_FACTOR};
use camctl_core::protocol::ProtocolError;
use camctl_core::Controller;
use common::{canon_camera, fast_config, mock, VC_C4_RANGES};
use pretty_assertions::assert_eq;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn open_canon(info: &'static str, ranges: [Option<u16>; 9]) -> Controller {
    let (channel, _handle) = mock(canon_camera(info, ranges));
    let mut controller = Controller::create_with_config("canon", fast_config()).unwrap();
    controller.open_with_channel(channel).unwrap();
    controller
}

#[test]
fn test_discovered_pan_range_is_symmetric() {
    let controller = open_canon("VC-C4", VC_C4_RANGES);
    let cal = controller.calibration().unwrap();

    assert!(approx(cal.pan.min, -100.0125));
    assert!(approx(cal.pan.max, 100.0125));
    assert_eq!(cal.pan.native_min, 0x7C87);
    assert_eq!(cal.pan.native_max, 0x8379);
    assert!(approx(cal.pan_speed.max, 0x320 as f64 * CANON_UNIT_FACTOR));
    assert_eq!(cal.zoom.native_max, 0x0640);
    assert!(!cal.used_defaults());
    assert_eq!(cal.source(Bound::PanMin), RangeSource::Discovered);
    assert_eq!(controller.device_info(), Some("VC-C4"));
}

#[test]
fn test_degree_mapping_clamps_at_the_edges() {
    let pan = AxisRange::centered(0x7C87, 0x8379, CANON_UNIT_FACTOR);
    assert_eq!(pan.to_native(-1000.0), 0x7C87);
    assert_eq!(pan.to_native(1000.0), 0x8379);
    assert_eq!(pan.to_native(0.0), 0x8000);
    assert!(approx(pan.to_physical(0x7C87), -100.0125));
}

#[test]
fn test_bad_bound_falls_back_per_bound() {
    let mut ranges = VC_C4_RANGES;
    ranges[1] = None;
    ranges[4] = None;
    let controller = open_canon("VC-C50i", ranges);
    let cal = controller.calibration().unwrap();

    assert!(cal.used_defaults());
    assert_eq!(cal.source(Bound::PanMin), RangeSource::Discovered);
    assert_eq!(cal.source(Bound::PanMax), RangeSource::Default);
    assert_eq!(cal.source(Bound::ZoomMax), RangeSource::Default);
    assert_eq!(cal.source(Bound::TiltMax), RangeSource::Discovered);

    // VC-C50i table entry
    assert_eq!(cal.pan.native_max, 0x8379);
    assert_eq!(cal.zoom.native_max, 0x0A60);
}

#[test]
fn test_unnamed_head_gets_wildcard_defaults() {
    let controller = open_canon("", [None; 9]);
    let cal = controller.calibration().unwrap();

    assert!(controller.device_info().is_none());
    assert_eq!(cal.pan.native_min, 0x7C87);
    assert_eq!(cal.pan.native_max, 0x8379);
    assert_eq!(cal.tilt.native_min, 0x7EF5);
    assert_eq!(cal.tilt.native_max, 0x8320);
    for bound in [Bound::PanMin, Bound::TiltSpeedMax, Bound::ZoomMax] {
        assert_eq!(cal.source(bound), RangeSource::Default);
    }
}

#[test]
fn test_named_head_selects_its_table_row() {
    let controller = open_canon("VC-C4R", [None; 9]);
    let cal = controller.calibration().unwrap();
    assert_eq!(cal.pan.native_min, 0x7A19);
    assert_eq!(cal.pan.native_max, 0x85E7);
}

#[test]
fn test_inverted_range_uses_defaults() {
    let mut ranges = VC_C4_RANGES;
    ranges[2] = Some(0x8320);
    ranges[3] = Some(0x7EF5);
    let controller = open_canon("VC-C4", ranges);
    let cal = controller.calibration().unwrap();

    assert_eq!(cal.tilt.native_min, 0x7EF5);
    assert_eq!(cal.tilt.native_max, 0x8320);
    assert_eq!(cal.source(Bound::TiltMin), RangeSource::Default);
    assert_eq!(cal.source(Bound::TiltMax), RangeSource::Default);
}

#[test]
fn test_range_queries_follow_handshake() {
    let (channel, handle) = mock(canon_camera("VC-C4", VC_C4_RANGES));
    let mut controller = Controller::create_with_config("canon", fast_config()).unwrap();
    controller.open_with_channel(channel).unwrap();

    let codes: Vec<Vec<u8>> = handle
        .frames()
        .iter()
        .map(|f| f[4..f.len() - 1].to_vec())
        .collect();
    let mut expected: Vec<Vec<u8>> = vec![
        vec![0x90, 0x30],
        vec![0x94, 0x30],
        vec![0xA0, 0x30],
        vec![0xA0, 0x31],
        vec![0xAA, 0x30],
        vec![0x94, 0x31],
        vec![0xBE],
    ];
    expected.extend((b'0'..=b'8').map(|s| vec![0x5C, s]));
    assert_eq!(codes, expected);
}

#[test]
fn test_rejected_probe_fails_open() {
    let (channel, _handle) = mock(|_: &[u8]| vec![0xFE, 0x30, 0x30, 0x00, b'1', b'0', 0xEF]);
    let mut controller = Controller::create_with_config("canon", fast_config()).unwrap();
    assert!(matches!(
        controller.open_with_channel(channel),
        Err(ProtocolError::CameraError(_))
    ));
    assert!(!controller.is_open());
}

#[test]
fn test_speed_bound_too_wide_for_the_wire_uses_default() {
    let mut ranges = VC_C4_RANGES;
    ranges[6] = Some(0x1000);
    let (channel, handle) = mock(canon_camera("VC-C4", ranges));
    let mut controller = Controller::create_with_config("canon", fast_config()).unwrap();
    controller.open_with_channel(channel).unwrap();
    let cal = controller.calibration().unwrap().clone();

    assert_eq!(cal.pan_speed.native_max, 0x0320);
    assert_eq!(cal.source(Bound::PanSpeedMax), RangeSource::Default);
    assert_eq!(cal.source(Bound::PanSpeedMin), RangeSource::Discovered);

    handle.clear();
    controller.move_to(cal.pan_speed.max * 2.0, 0.0, 1.0, 0.0).unwrap();
    let speed = handle
        .frames()
        .into_iter()
        .find(|f| f.get(4) == Some(&0x50))
        .unwrap();
    assert_eq!(&speed[5..8], b"320");
}

#[test]
fn test_zero_zoom_max_uses_default() {
    let mut ranges = VC_C4_RANGES;
    ranges[4] = Some(0);
    let controller = open_canon("VC-C50i", ranges);
    let cal = controller.calibration().unwrap();

    assert_eq!(cal.zoom.native_max, 0x0A60);
    assert_eq!(cal.source(Bound::ZoomMax), RangeSource::Default);
    assert_eq!(cal.source(Bound::PanMax), RangeSource::Discovered);
}
