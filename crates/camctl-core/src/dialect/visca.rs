//! VISCA binary dialect
//!
//! Frames are `0x80 | address`, a command packet, then the terminator
//! (`0xFF` unless overridden). Values travel as nibbles, one per byte.
//! The codec here is shared with the Sony dialect, which adds the
//! ACK/completion handshake on top.

use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::{Dialect, DialectKind, MoveCommand, PanTilt, RunDirection};
use crate::calibration::{AxisRange, Calibration};
use crate::protocol::message::{from_nibbles, hex_dump};
use crate::protocol::{Connection, Framing, Message, ProtocolError};

/// Standard VISCA terminator
pub const VISCA_TERMINATOR: u8 = 0xFF;

/// VISCA packets never exceed 16 bytes
pub const VISCA_MAX_LEN: usize = 16;

/// Drive-command code for "hold this axis"
const DRIVE_STOP: u8 = 0x03;

/// Fixed ranges of the EVI-D30 class heads
pub fn evi_calibration() -> Calibration {
    Calibration::new(
        // 0xFC90..0x0370 as two's complement
        AxisRange::new(-880, 880, -100.0, 100.0),
        // 0xFED4..0x012C
        AxisRange::new(-300, 300, -25.0, 25.0),
        AxisRange::scaled(1, 0x18, 80.0 / 24.0),
        AxisRange::scaled(1, 0x14, 2.5),
        AxisRange::new(0, 0x3FF, 0.0, 1.0),
    )
}

/// Decoded VISCA reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Command accepted into socket `socket`
    Ack {
        /// Command socket
        socket: u8,
    },
    /// Command finished, or inquiry answered
    Completion {
        /// Command socket, 0 for inquiries
        socket: u8,
        /// Bytes between the reply code and the terminator
        payload: Vec<u8>,
    },
}

/// Text for a VISCA error code
pub fn error_text(code: u8) -> &'static str {
    match code {
        0x01 => "message length error",
        0x02 => "syntax error",
        0x03 => "command buffer full",
        0x04 => "command cancelled",
        0x05 => "no socket",
        0x41 => "command not executable",
        _ => "unknown error",
    }
}

/// Decode one reply frame. Error replies become [`ProtocolError::CameraError`].
pub fn parse_reply(reply: &Message) -> Result<Reply, ProtocolError> {
    let bytes = reply.as_bytes();
    if bytes.len() < 3 || bytes[0] & 0x8F != 0x80 {
        return Err(ProtocolError::MalformedReply(format!(
            "not a VISCA reply: {}",
            hex_dump(bytes)
        )));
    }

    let socket = bytes[1] & 0x0F;
    match bytes[1] & 0xF0 {
        0x40 => Ok(Reply::Ack { socket }),
        0x50 => Ok(Reply::Completion {
            socket,
            payload: reply.body(2).to_vec(),
        }),
        0x60 => {
            let code = bytes.get(2).copied().unwrap_or(0);
            warn!(socket, code, "camera error reply: {}", error_text(code));
            Err(ProtocolError::CameraError(format!(
                "{} (code {:#04x}, socket {})",
                error_text(code),
                code,
                socket
            )))
        }
        _ => Err(ProtocolError::MalformedReply(format!(
            "unknown VISCA reply type: {}",
            hex_dump(bytes)
        ))),
    }
}

/// Decode a position inquiry payload into native pan and tilt
pub fn parse_position(payload: &[u8]) -> Result<(i32, i32), ProtocolError> {
    let pan = from_nibbles(payload);
    let tilt = payload.get(4..).and_then(from_nibbles);
    match (pan, tilt) {
        (Some(p), Some(t)) => Ok((p as i16 as i32, t as i16 as i32)),
        _ => Err(ProtocolError::MalformedReply(format!(
            "bad position payload: {}",
            hex_dump(payload)
        ))),
    }
}

/// Builds VISCA packets for one camera address
#[derive(Debug, Clone, Copy)]
pub struct ViscaCodec {
    header: u8,
    framing: Framing,
}

impl ViscaCodec {
    /// Codec for camera `address` (1..=7)
    pub fn new(address: u8, terminator: u8) -> Self {
        Self {
            header: 0x80 | (address & 0x07),
            framing: Framing::new(terminator, VISCA_MAX_LEN),
        }
    }

    /// Framing in use
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Header plus `body` plus terminator
    pub fn command(&self, body: &[u8]) -> Result<Message, ProtocolError> {
        self.framing.builder().byte(self.header).bytes(body).build()
    }

    /// Broadcast a raw packet (header `0x88`)
    pub fn broadcast(&self, body: &[u8]) -> Result<Message, ProtocolError> {
        self.framing.builder().byte(0x88).bytes(body).build()
    }

    /// `01 06 02 VV WW` + pan nibbles + tilt nibbles
    pub fn absolute_position(
        &self,
        pan_speed: u8,
        tilt_speed: u8,
        pan: i32,
        tilt: i32,
    ) -> Result<Message, ProtocolError> {
        self.framing
            .builder()
            .byte(self.header)
            .bytes(&[0x01, 0x06, 0x02, pan_speed, tilt_speed])
            .nibbles(pan as i16 as u16)
            .nibbles(tilt as i16 as u16)
            .build()
    }

    /// `01 04 07 00` stop, `2p` tele, `3p` wide
    pub fn zoom_drive(&self, speed: u8, z: f64) -> Result<Message, ProtocolError> {
        let p = speed.min(7);
        let code = if z < 0.0 {
            0x20 | p
        } else if z > 0.0 {
            0x30 | p
        } else {
            0x00
        };
        self.command(&[0x01, 0x04, 0x07, code])
    }

    /// `01 04 47` + zoom nibbles
    pub fn zoom_direct(&self, position: u16) -> Result<Message, ProtocolError> {
        self.framing
            .builder()
            .byte(self.header)
            .bytes(&[0x01, 0x04, 0x47])
            .nibbles(position)
            .build()
    }

    /// `01 06 01 VV WW XX YY`
    pub fn drive(
        &self,
        pan_speed: u8,
        tilt_speed: u8,
        direction: RunDirection,
        start: bool,
    ) -> Result<Message, ProtocolError> {
        let (xx, yy) = if start {
            let xx = match direction.pan_sign() {
                -1 => 0x01,
                1 => 0x02,
                _ => DRIVE_STOP,
            };
            let yy = match direction.tilt_sign() {
                1 => 0x01,
                -1 => 0x02,
                _ => DRIVE_STOP,
            };
            (xx, yy)
        } else {
            (DRIVE_STOP, DRIVE_STOP)
        };
        self.command(&[0x01, 0x06, 0x01, pan_speed, tilt_speed, xx, yy])
    }

    /// Pan/tilt home
    pub fn home(&self) -> Result<Message, ProtocolError> {
        self.command(&[0x01, 0x06, 0x04])
    }

    /// Pan/tilt reset (re-initialise the head)
    pub fn reset(&self) -> Result<Message, ProtocolError> {
        self.command(&[0x01, 0x06, 0x05])
    }

    /// `09 06 12`
    pub fn position_inquiry(&self) -> Result<Message, ProtocolError> {
        self.command(&[0x09, 0x06, 0x12])
    }

    /// `09 04 47`
    pub fn zoom_inquiry(&self) -> Result<Message, ProtocolError> {
        self.command(&[0x09, 0x04, 0x47])
    }

    /// `09 00 02`
    pub fn version_inquiry(&self) -> Result<Message, ProtocolError> {
        self.command(&[0x09, 0x00, 0x02])
    }
}

/// Read replies until `wanted` accepts one, skipping ACKs and completions
/// that belong to earlier commands. `timeout` bounds the whole wait.
pub(crate) fn await_reply(
    conn: &mut Connection,
    framing: Framing,
    timeout: Duration,
    wanted: impl Fn(&Reply) -> bool,
) -> Result<Reply, ProtocolError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let reply = conn.read_reply(framing.terminator, framing.max_len, remaining)?;
        let reply = parse_reply(&reply)?;
        if wanted(&reply) {
            return Ok(reply);
        }
        trace!(?reply, "skipping stale reply");
    }
}

/// Answer to an inquiry: a completion on socket 0
pub(crate) fn is_inquiry_answer(reply: &Reply) -> bool {
    matches!(reply, Reply::Completion { socket: 0, .. })
}

/// Native speeds for a move, never zero
pub(crate) fn speeds(cal: &Calibration, pan_speed: f64, tilt_speed: f64) -> (u8, u8) {
    (
        cal.pan_speed.to_native(pan_speed).clamp(1, 0x7F) as u8,
        cal.tilt_speed.to_native(tilt_speed).clamp(1, 0x7F) as u8,
    )
}

/// Plain VISCA: one reply per command, fixed EVI ranges
pub struct Visca {
    codec: ViscaCodec,
}

impl Visca {
    /// Dialect for camera `address`; `terminator` overrides `0xFF`
    pub fn new(address: u8, terminator: Option<u8>) -> Self {
        Self {
            codec: ViscaCodec::new(address, terminator.unwrap_or(VISCA_TERMINATOR)),
        }
    }

    /// Send a command and wait for its ACK. The completion follows once the
    /// head stops and is skipped by whichever exchange reads it.
    fn exchange(&self, conn: &mut Connection, msg: &Message) -> Result<Reply, ProtocolError> {
        conn.drain_input()?;
        conn.send(msg)?;
        let timeout = conn.config().reply_timeout();
        await_reply(conn, self.codec.framing, timeout, |r| {
            matches!(r, Reply::Ack { .. } | Reply::Completion { socket: 0, .. })
        })
    }

    fn inquire(&self, conn: &mut Connection, msg: &Message) -> Result<Vec<u8>, ProtocolError> {
        conn.drain_input()?;
        conn.send(msg)?;
        let timeout = conn.config().reply_timeout();
        match await_reply(conn, self.codec.framing, timeout, is_inquiry_answer)? {
            Reply::Completion { payload, .. } => Ok(payload),
            Reply::Ack { .. } => Err(ProtocolError::MalformedReply(
                "inquiry answered with ACK".to_string(),
            )),
        }
    }
}

impl Dialect for Visca {
    fn kind(&self) -> DialectKind {
        DialectKind::Visca
    }

    fn framing(&self) -> Framing {
        self.codec.framing
    }

    fn open(&mut self, conn: &mut Connection) -> Result<Calibration, ProtocolError> {
        let payload = self.inquire(conn, &self.codec.version_inquiry()?)?;
        let info = match payload.as_slice() {
            [g1, g2, h1, h2, j1, j2, ..] => format!(
                "VISCA vendor {:02X}{:02X} model {:02X}{:02X} rom {:02X}{:02X}",
                g1, g2, h1, h2, j1, j2
            ),
            other => format!("VISCA {}", hex_dump(other)),
        };
        debug!(info = %info, "visca camera answered");
        Ok(evi_calibration().with_device_info(info))
    }

    fn move_to(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        cmd: MoveCommand,
    ) -> Result<(), ProtocolError> {
        let (vv, ww) = speeds(cal, cmd.pan_speed, cmd.tilt_speed);
        let msg = self.codec.absolute_position(
            vv,
            ww,
            cal.pan.to_native(cmd.pan),
            cal.tilt.to_native(cmd.tilt),
        )?;
        self.exchange(conn, &msg).map(|_| ())
    }

    fn zoom(
        &mut self,
        conn: &mut Connection,
        _cal: &Calibration,
        speed: u8,
        z: f64,
    ) -> Result<(), ProtocolError> {
        let msg = self.codec.zoom_drive(speed, z)?;
        self.exchange(conn, &msg).map(|_| ())
    }

    fn zoom_to(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        _speed: u8,
        fraction: f64,
    ) -> Result<(), ProtocolError> {
        let msg = self.codec.zoom_direct(cal.zoom.to_native(fraction) as u16)?;
        self.exchange(conn, &msg).map(|_| ())
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
        let (vv, ww) = speeds(cal, pan_speed, tilt_speed);
        let msg = self.codec.drive(vv, ww, direction, start)?;
        self.exchange(conn, &msg).map(|_| ())
    }

    fn query(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
    ) -> Result<PanTilt, ProtocolError> {
        let payload = self.inquire(conn, &self.codec.position_inquiry()?)?;
        let (pan, tilt) = parse_position(&payload)?;
        Ok(PanTilt {
            pan: cal.pan.to_physical(pan),
            tilt: cal.tilt.to_physical(tilt),
        })
    }
}
