//! Panasonic dialect
//!
//! Two framings share the line. Session setup and status use `STX ... ETX`
//! with ETX-terminated replies. Control commands are `#` plus letters and
//! digits, ended by CR, and answered with a CR-terminated echo code.

use tracing::{debug, warn};

use super::{Dialect, DialectKind, MoveCommand, PanTilt, RunDirection};
use crate::calibration::{AxisRange, Calibration};
use crate::protocol::message::{hex_dump, parse_hex_field, CR, ETX, STX};
use crate::protocol::{Connection, Framing, Message, ProtocolError, MAX_MESSAGE_SIZE};

const CONTROL: Framing = Framing::new(CR, MAX_MESSAGE_SIZE);
const SESSION: Framing = Framing::new(ETX, MAX_MESSAGE_SIZE);

/// Neutral value of the two-digit speed fields
const NEUTRAL: u32 = 50;

/// Fixed ranges of the Panasonic heads
pub fn pana_calibration() -> Calibration {
    Calibration::new(
        AxisRange::new(0x2D08, 0xD2F7, -175.0, 175.0),
        AxisRange::new(0x5555, 0x8E38, -30.0, 90.0),
        AxisRange::scaled(0x01, 0x1D, 2.0),
        AxisRange::scaled(0x01, 0x1D, 2.0),
        AxisRange::new(0x555, 0xFFF, 0.0, 1.0),
    )
}

/// Offset from 50 for a run or zoom speed field, 1..=49
fn speed_offset(range: &AxisRange, speed: f64) -> u32 {
    let span = (range.native_max - range.native_min).max(1) as u32;
    let step = (range.to_native(speed) - range.native_min) as u32;
    1 + step * 48 / span
}

/// Panasonic dialect
pub struct Pana {
    speed_table: u8,
}

impl Pana {
    /// Create the dialect; `speed_table` is the `#APS` table digit
    pub fn new(speed_table: u8) -> Self {
        Self {
            speed_table: speed_table.min(2),
        }
    }

    /// Send a control command and check the reply starts with `expect`
    fn control(
        &self,
        conn: &mut Connection,
        msg: &Message,
        expect: &str,
    ) -> Result<Vec<u8>, ProtocolError> {
        let timeout = conn.config().reply_timeout();
        let reply = conn.send_and_await_reply(msg, CR, timeout)?;
        let body = reply.body(0);

        if body.starts_with(b"eR") || body.starts_with(b"rER") {
            let code = String::from_utf8_lossy(body).into_owned();
            warn!(code = %code, command = %hex_dump(msg.as_bytes()), "camera error reply");
            return Err(ProtocolError::CameraError(code));
        }
        if !body.starts_with(expect.as_bytes()) {
            return Err(ProtocolError::MalformedReply(format!(
                "expected '{}', got [{}]",
                expect,
                hex_dump(reply.as_bytes())
            )));
        }
        Ok(body[expect.len()..].to_vec())
    }

    /// Send `STX text ETX` and return the reply text between the framing bytes
    fn session(&self, conn: &mut Connection, text: &str) -> Result<String, ProtocolError> {
        let msg = SESSION.builder().byte(STX).text(text).build()?;
        let timeout = conn.config().reply_timeout();
        let reply = conn.send_and_await_reply(&msg, ETX, timeout)?;
        let body = reply.body(0);
        let body = body.strip_prefix(&[STX]).unwrap_or(body);
        Ok(String::from_utf8_lossy(body).into_owned())
    }
}

impl Dialect for Pana {
    fn kind(&self) -> DialectKind {
        DialectKind::Pana
    }

    fn framing(&self) -> Framing {
        CONTROL
    }

    fn open(&mut self, conn: &mut Connection) -> Result<Calibration, ProtocolError> {
        self.control(conn, &CONTROL.builder().text("#O1").build()?, "p1")?;

        let status = self.session(conn, "OSA:87:2")?;
        debug!(status = %status, "operation status set");

        let info = self.session(conn, "QSA:87")?;
        debug!(info = %info, "pana camera answered");

        let cal = pana_calibration();
        Ok(if info.is_empty() {
            cal
        } else {
            cal.with_device_info(info)
        })
    }

    fn move_to(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        cmd: MoveCommand,
    ) -> Result<(), ProtocolError> {
        let speed = cal
            .pan_speed
            .to_native(cmd.pan_speed)
            .max(cal.tilt_speed.to_native(cmd.tilt_speed));
        let msg = CONTROL
            .builder()
            .text("#APS")
            .hex(cal.pan.to_native(cmd.pan) as u32, 4)
            .hex(cal.tilt.to_native(cmd.tilt) as u32, 4)
            .hex(speed as u32, 2)
            .decimal(self.speed_table as u32, 1)
            .build()?;
        self.control(conn, &msg, "aPS").map(|_| ())
    }

    fn zoom(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        speed: u8,
        z: f64,
    ) -> Result<(), ProtocolError> {
        let offset = speed_offset(&cal.zoom_speed, speed as f64);
        let value = if z < 0.0 {
            NEUTRAL + offset
        } else if z > 0.0 {
            NEUTRAL - offset
        } else {
            NEUTRAL
        };
        let msg = CONTROL.builder().text("#Z").decimal(value, 2).build()?;
        self.control(conn, &msg, "zS").map(|_| ())
    }

    fn zoom_to(
        &mut self,
        _conn: &mut Connection,
        _cal: &Calibration,
        _speed: u8,
        _fraction: f64,
    ) -> Result<(), ProtocolError> {
        Err(ProtocolError::Unsupported("pana"))
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
        let field = |sign: i8, range: &AxisRange, speed: f64| match (start, sign) {
            (true, 1) => NEUTRAL + speed_offset(range, speed),
            (true, -1) => NEUTRAL - speed_offset(range, speed),
            _ => NEUTRAL,
        };
        let msg = CONTROL
            .builder()
            .text("#PTS")
            .decimal(field(direction.pan_sign(), &cal.pan_speed, pan_speed), 2)
            .decimal(field(direction.tilt_sign(), &cal.tilt_speed, tilt_speed), 2)
            .build()?;
        self.control(conn, &msg, "pTS").map(|_| ())
    }

    fn query(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
    ) -> Result<PanTilt, ProtocolError> {
        let msg = CONTROL.builder().text("#APC").build()?;
        let payload = self.control(conn, &msg, "aPC")?;
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
