//! Canon VC-C dialect
//!
//! Frames are `FF 30 30 00`, a command code, ASCII hex parameters and the
//! terminator (`0xEF` unless overridden). Replies echo the header as
//! `FE 30 30 00` followed by two status characters, `"00"` meaning OK.
//!
//! This is the only dialect that asks the head for its limits. Any limit the
//! head fails to report comes from [`CANON_DEFAULTS`] instead.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Dialect, DialectKind, MoveCommand, PanTilt, RunDirection};
use crate::calibration::{
    lookup, resolve_bound, AxisRange, Bound, Calibration, RangeSource, CANON_DEFAULTS,
    CANON_UNIT_FACTOR,
};
use crate::protocol::message::{hex_dump, parse_hex_field};
use crate::protocol::{
    Connection, Framing, Message, MessageBuilder, ProtocolError, MAX_MESSAGE_SIZE,
};

/// Default VC-C terminator
pub const CANON_TERMINATOR: u8 = 0xEF;

const HEADER: [u8; 4] = [0xFF, 0x30, 0x30, 0x00];
const REPLY_HEADER: [u8; 4] = [0xFE, 0x30, 0x30, 0x00];

const HOST_MODE: &[u8] = &[0x90, 0x30];
const NOTIFY_OFF: &[u8] = &[0x94, 0x30];
const NOTIFY_ON: &[u8] = &[0x94, 0x31];
const POWER_OFF: &[u8] = &[0xA0, 0x30];
const POWER_ON: &[u8] = &[0xA0, 0x31];
const PT_RESET: &[u8] = &[0xAA, 0x30];
const DEVICE_INFO: &[u8] = &[0xBE];

/// Speeds are written back as three hex digits
const SPEED_LIMIT: i32 = 0xFFF;

const RANGE_QUERY: u8 = 0x5C;
const PAN_SPEED: u8 = 0x50;
const TILT_SPEED: u8 = 0x51;
const RUN: u8 = 0x60;
const POSITION: u8 = 0x62;
const POSITION_QUERY: u8 = 0x63;
const ZOOM_DRIVE: u8 = 0xB2;
const ZOOM_POSITION: u8 = 0xB3;
const ZOOM_SPEED: u8 = 0xB4;

/// Range-query selector for each bound, in query order
const RANGE_SELECTORS: [(Bound, u8); 9] = [
    (Bound::PanMin, b'0'),
    (Bound::PanMax, b'1'),
    (Bound::TiltMin, b'2'),
    (Bound::TiltMax, b'3'),
    (Bound::ZoomMax, b'4'),
    (Bound::PanSpeedMin, b'5'),
    (Bound::PanSpeedMax, b'6'),
    (Bound::TiltSpeedMin, b'7'),
    (Bound::TiltSpeedMax, b'8'),
];

/// Canon VC-C dialect
pub struct Canon {
    framing: Framing,
}

impl Canon {
    /// Create the dialect; `terminator` overrides `0xEF`
    pub fn new(terminator: Option<u8>) -> Self {
        Self {
            framing: Framing::new(terminator.unwrap_or(CANON_TERMINATOR), MAX_MESSAGE_SIZE),
        }
    }

    fn message(&self) -> MessageBuilder {
        self.framing.builder().bytes(&HEADER)
    }

    fn simple(&self, body: &[u8]) -> Result<Message, ProtocolError> {
        self.message().bytes(body).build()
    }

    /// Send and return the reply payload after a good status
    fn transact(
        &self,
        conn: &mut Connection,
        msg: &Message,
        timeout: Duration,
    ) -> Result<Vec<u8>, ProtocolError> {
        // with notifications on, the head reports finished moves unasked
        conn.drain_input()?;
        let reply = conn.send_and_await_reply(msg, self.framing.terminator, timeout)?;
        let bytes = reply.as_bytes();

        if bytes.len() < REPLY_HEADER.len() + 3 || !bytes.starts_with(&REPLY_HEADER) {
            return Err(ProtocolError::MalformedReply(format!(
                "not a VC-C reply: {}",
                hex_dump(bytes)
            )));
        }
        let status = &bytes[4..6];
        if status != b"00" {
            let status = String::from_utf8_lossy(status).into_owned();
            warn!(status = %status, command = %hex_dump(msg.as_bytes()), "camera rejected command");
            return Err(ProtocolError::CameraError(format!("status {}", status)));
        }
        Ok(reply.body(6).to_vec())
    }

    fn set_speeds(
        &self,
        conn: &mut Connection,
        cal: &Calibration,
        pan_speed: f64,
        tilt_speed: f64,
    ) -> Result<(), ProtocolError> {
        let timeout = conn.config().reply_timeout();
        let pan = cal.pan_speed.to_native(pan_speed).clamp(0, SPEED_LIMIT) as u32;
        let tilt = cal.tilt_speed.to_native(tilt_speed).clamp(0, SPEED_LIMIT) as u32;
        self.transact(conn, &self.message().byte(PAN_SPEED).hex(pan, 3).build()?, timeout)?;
        self.transact(conn, &self.message().byte(TILT_SPEED).hex(tilt, 3).build()?, timeout)?;
        Ok(())
    }

    fn set_zoom_speed(&self, conn: &mut Connection, speed: u8) -> Result<(), ProtocolError> {
        let timeout = conn.config().reply_timeout();
        let msg = self
            .message()
            .byte(ZOOM_SPEED)
            .byte(b'0' + speed.min(7))
            .build()?;
        self.transact(conn, &msg, timeout).map(|_| ())
    }

    fn query_range(
        &self,
        conn: &mut Connection,
        selector: u8,
        timeout: Duration,
    ) -> Result<Option<i32>, ProtocolError> {
        let msg = self.message().byte(RANGE_QUERY).byte(selector).build()?;
        let payload = optional(self.transact(conn, &msg, timeout))?;
        Ok(payload
            .and_then(|p| parse_hex_field(&p, 4))
            .map(|v| v as i32))
    }
}

/// Turn failures a degraded open can live with into `None`
fn optional<T>(result: Result<T, ProtocolError>) -> Result<Option<T>, ProtocolError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(
            e @ (ProtocolError::Timeout
            | ProtocolError::MalformedReply(_)
            | ProtocolError::CameraError(_)
            | ProtocolError::BufferOverflow { .. }),
        ) => {
            debug!("optional query failed: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Whether a reported bound can be used as-is
fn usable(bound: Bound, value: i32) -> bool {
    match bound {
        Bound::PanSpeedMin | Bound::PanSpeedMax | Bound::TiltSpeedMin | Bound::TiltSpeedMax => {
            value <= SPEED_LIMIT
        }
        Bound::ZoomMax => value > 0,
        _ => true,
    }
}

/// Ordered pair, or the fallback pair if the device reported nonsense
fn ordered(
    device: &str,
    (lo_bound, hi_bound): (Bound, Bound),
    (lo, hi): (i32, i32),
    fallback: (i32, i32),
    sources: &mut HashMap<Bound, RangeSource>,
) -> (i32, i32) {
    if lo < hi {
        return (lo, hi);
    }
    warn!(device, %lo_bound, %hi_bound, lo, hi, "inverted range reported, using defaults");
    sources.insert(lo_bound, RangeSource::Default);
    sources.insert(hi_bound, RangeSource::Default);
    fallback
}

impl Dialect for Canon {
    fn kind(&self) -> DialectKind {
        DialectKind::Canon
    }

    fn framing(&self) -> Framing {
        self.framing
    }

    fn open(&mut self, conn: &mut Connection) -> Result<Calibration, ProtocolError> {
        let reply_timeout = conn.config().reply_timeout();
        let slow_timeout = conn.config().completion_timeout();

        let handshake: [(&str, &[u8], Duration); 6] = [
            ("probe", HOST_MODE, reply_timeout),
            ("notification off", NOTIFY_OFF, reply_timeout),
            ("power off", POWER_OFF, slow_timeout),
            ("power on", POWER_ON, slow_timeout),
            ("pan/tilt reset", PT_RESET, slow_timeout),
            ("notification on", NOTIFY_ON, reply_timeout),
        ];
        for (step, body, timeout) in handshake {
            debug!(step, "canon handshake");
            if let Err(e) = self.transact(conn, &self.simple(body)?, timeout) {
                warn!(step, "canon handshake failed: {}", e);
                return Err(e);
            }
        }

        let info = optional(self.transact(conn, &self.simple(DEVICE_INFO)?, reply_timeout))?
            .map(|p| String::from_utf8_lossy(&p).trim().to_string())
            .filter(|s| !s.is_empty());
        let name = info.as_deref().unwrap_or("");
        let defaults = lookup(CANON_DEFAULTS, name)
            .copied()
            .unwrap_or(CANON_DEFAULTS[CANON_DEFAULTS.len() - 1]);
        debug!(device = name, table = defaults.pattern, "canon device identified");

        let fallback = |bound: Bound| match bound {
            Bound::PanMin => defaults.pan.0,
            Bound::PanMax => defaults.pan.1,
            Bound::TiltMin => defaults.tilt.0,
            Bound::TiltMax => defaults.tilt.1,
            Bound::ZoomMax => defaults.zoom_max,
            Bound::PanSpeedMin => defaults.pan_speed.0,
            Bound::PanSpeedMax => defaults.pan_speed.1,
            Bound::TiltSpeedMin => defaults.tilt_speed.0,
            Bound::TiltSpeedMax => defaults.tilt_speed.1,
        };

        let mut sources = HashMap::new();
        let mut values = HashMap::new();
        for (bound, selector) in RANGE_SELECTORS {
            let discovered = self
                .query_range(conn, selector, reply_timeout)?
                .filter(|&v| {
                    let ok = usable(bound, v);
                    if !ok {
                        warn!(
                            device = name,
                            %bound,
                            value = %format!("{:#06x}", v),
                            "reported bound out of range"
                        );
                    }
                    ok
                });
            let v = resolve_bound(name, bound, discovered, fallback(bound), &mut sources);
            values.insert(bound, v);
        }
        let get = |b: Bound| values.get(&b).copied().unwrap_or_else(|| fallback(b));

        let pan = ordered(
            name,
            (Bound::PanMin, Bound::PanMax),
            (get(Bound::PanMin), get(Bound::PanMax)),
            defaults.pan,
            &mut sources,
        );
        let tilt = ordered(
            name,
            (Bound::TiltMin, Bound::TiltMax),
            (get(Bound::TiltMin), get(Bound::TiltMax)),
            defaults.tilt,
            &mut sources,
        );
        let pan_speed = ordered(
            name,
            (Bound::PanSpeedMin, Bound::PanSpeedMax),
            (get(Bound::PanSpeedMin), get(Bound::PanSpeedMax)),
            defaults.pan_speed,
            &mut sources,
        );
        let tilt_speed = ordered(
            name,
            (Bound::TiltSpeedMin, Bound::TiltSpeedMax),
            (get(Bound::TiltSpeedMin), get(Bound::TiltSpeedMax)),
            defaults.tilt_speed,
            &mut sources,
        );
        let zoom_max = get(Bound::ZoomMax);

        let mut cal = Calibration::new(
            AxisRange::centered(pan.0, pan.1, CANON_UNIT_FACTOR),
            AxisRange::centered(tilt.0, tilt.1, CANON_UNIT_FACTOR),
            AxisRange::scaled(pan_speed.0, pan_speed.1, CANON_UNIT_FACTOR),
            AxisRange::scaled(tilt_speed.0, tilt_speed.1, CANON_UNIT_FACTOR),
            AxisRange::new(0, zoom_max, 0.0, 1.0),
        )
        .with_sources(sources);
        if let Some(info) = info {
            cal = cal.with_device_info(info);
        }
        debug!(pan = ?cal.pan, tilt = ?cal.tilt, "canon calibrated");
        Ok(cal)
    }

    fn move_to(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        cmd: MoveCommand,
    ) -> Result<(), ProtocolError> {
        self.set_speeds(conn, cal, cmd.pan_speed, cmd.tilt_speed)?;
        let msg = self
            .message()
            .byte(POSITION)
            .hex(cal.pan.to_native(cmd.pan) as u32, 4)
            .hex(cal.tilt.to_native(cmd.tilt) as u32, 4)
            .build()?;
        let timeout = conn.config().reply_timeout();
        self.transact(conn, &msg, timeout).map(|_| ())
    }

    fn zoom(
        &mut self,
        conn: &mut Connection,
        _cal: &Calibration,
        speed: u8,
        z: f64,
    ) -> Result<(), ProtocolError> {
        let direction = if z < 0.0 {
            b'1'
        } else if z > 0.0 {
            b'2'
        } else {
            b'0'
        };
        if direction != b'0' {
            self.set_zoom_speed(conn, speed)?;
        }
        let timeout = conn.config().reply_timeout();
        let msg = self.message().byte(ZOOM_DRIVE).byte(direction).build()?;
        self.transact(conn, &msg, timeout).map(|_| ())
    }

    fn zoom_to(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        speed: u8,
        fraction: f64,
    ) -> Result<(), ProtocolError> {
        self.set_zoom_speed(conn, speed)?;
        let timeout = conn.config().reply_timeout();
        let msg = self
            .message()
            .byte(ZOOM_POSITION)
            .hex(cal.zoom.to_native(fraction) as u32, 4)
            .build()?;
        self.transact(conn, &msg, timeout).map(|_| ())
    }

    fn run(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        pan_speed: f64,
        tilt_speed: f64,
        direction: RunDirection,
        start: bool,
    ) -> Result<(), ProtocolError> {
        let (pan_digit, tilt_digit) = if start {
            let pan = match direction.pan_sign() {
                1 => b'1',
                -1 => b'2',
                _ => b'0',
            };
            let tilt = match direction.tilt_sign() {
                1 => b'1',
                -1 => b'2',
                _ => b'0',
            };
            self.set_speeds(conn, cal, pan_speed, tilt_speed)?;
            (pan, tilt)
        } else {
            (b'0', b'0')
        };
        let timeout = conn.config().reply_timeout();
        let msg = self.message().byte(RUN).byte(pan_digit).byte(tilt_digit).build()?;
        self.transact(conn, &msg, timeout).map(|_| ())
    }

    fn query(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
    ) -> Result<PanTilt, ProtocolError> {
        let timeout = conn.config().reply_timeout();
        let payload = self.transact(conn, &self.message().byte(POSITION_QUERY).build()?, timeout)?;
        let pan = parse_hex_field(&payload, 4);
        let tilt = payload.get(4..).and_then(|rest| parse_hex_field(rest, 4));
        match (pan, tilt) {
            (Some(p), Some(t)) => Ok(PanTilt {
                pan: cal.pan.to_physical(p as i32),
                tilt: cal.tilt.to_physical(t as i32),
            }),
            _ => Err(ProtocolError::MalformedReply(format!(
                "bad position payload: {}",
                hex_dump(&payload)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_carry_header_and_terminator() {
        let canon = Canon::new(None);
        let msg = canon.message().byte(POSITION).hex(0x7C87, 4).hex(0x8000, 4).build().unwrap();
        assert_eq!(&msg.as_bytes()[..4], &HEADER);
        assert_eq!(&msg.as_bytes()[4..13], b"\x627C878000");
        assert!(msg.ends_with(CANON_TERMINATOR));
    }

    #[test]
    fn test_terminator_override() {
        let canon = Canon::new(Some(0xFF));
        assert_eq!(canon.framing().terminator, 0xFF);
        assert!(canon.simple(HOST_MODE).unwrap().ends_with(0xFF));
    }

    #[test]
    fn test_usable_bounds() {
        assert!(usable(Bound::PanSpeedMax, 0xFFF));
        assert!(!usable(Bound::PanSpeedMax, 0x1000));
        assert!(!usable(Bound::TiltSpeedMin, 0x1000));
        assert!(!usable(Bound::ZoomMax, 0));
        assert!(usable(Bound::PanMax, 0xFFFF));
    }

    #[test]
    fn test_optional_keeps_hard_errors() {
        assert!(matches!(optional::<()>(Err(ProtocolError::Timeout)), Ok(None)));
        assert!(matches!(
            optional::<()>(Err(ProtocolError::Cancelled)),
            Err(ProtocolError::Cancelled)
        ));
    }
}
