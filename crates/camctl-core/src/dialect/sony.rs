//! Sony EVI-D30/D31
//!
//! VISCA with the full session setup: the address chain is numbered and the
//! interface cleared before anything else, and every command is confirmed
//! twice (ACK when accepted, completion when done).

use std::time::Duration;
use tracing::{debug, warn};

use super::visca::{
    await_reply, evi_calibration, is_inquiry_answer, parse_position, parse_reply, speeds, Reply,
    ViscaCodec, VISCA_TERMINATOR,
};
use super::{Dialect, DialectKind, MoveCommand, PanTilt, RunDirection};
use crate::calibration::Calibration;
use crate::protocol::message::{from_nibbles, hex_dump};
use crate::protocol::{Connection, Framing, Message, ProtocolError};

const INIT_TRIES: usize = 3;

/// Sony EVI dialect, camera 1 on the chain
pub struct Sony {
    codec: ViscaCodec,
    cameras: u8,
    zoom: Option<u16>,
}

impl Default for Sony {
    fn default() -> Self {
        Self::new()
    }
}

impl Sony {
    /// Create the dialect
    pub fn new() -> Self {
        Self {
            codec: ViscaCodec::new(1, VISCA_TERMINATOR),
            cameras: 0,
            zoom: None,
        }
    }

    /// Cameras found on the chain at open
    pub fn cameras(&self) -> u8 {
        self.cameras
    }

    /// Native zoom position read at open
    pub fn initial_zoom(&self) -> Option<u16> {
        self.zoom
    }

    /// Send a broadcast and wait for a reply accepted by `check`, retrying
    fn broadcast_with_retry<T>(
        &self,
        conn: &mut Connection,
        body: &[u8],
        what: &str,
        check: impl Fn(&[u8]) -> Option<T>,
    ) -> Result<T, ProtocolError> {
        let msg = self.codec.broadcast(body)?;
        let timeout = conn.config().reply_timeout();
        let mut last_err = ProtocolError::Timeout;

        for attempt in 1..=INIT_TRIES {
            conn.drain_input()?;
            match conn.send_and_await_reply(&msg, VISCA_TERMINATOR, timeout) {
                Ok(reply) => match check(reply.as_bytes()) {
                    Some(v) => return Ok(v),
                    None => {
                        warn!(attempt, "{}: unexpected reply [{}]", what, hex_dump(reply.as_bytes()));
                        last_err = ProtocolError::MalformedReply(format!(
                            "{} reply: {}",
                            what,
                            hex_dump(reply.as_bytes())
                        ));
                    }
                },
                Err(e @ (ProtocolError::Timeout | ProtocolError::BufferOverflow { .. })) => {
                    warn!(attempt, "{}: {}", what, e);
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    fn read(&self, conn: &mut Connection, timeout: Duration) -> Result<Reply, ProtocolError> {
        let reply = conn.read_reply(VISCA_TERMINATOR, self.codec.framing().max_len, timeout)?;
        parse_reply(&reply)
    }

    /// Send a command, wait for its ACK, then for its completion
    fn command(&self, conn: &mut Connection, msg: &Message) -> Result<(), ProtocolError> {
        conn.send(msg)?;
        let ack_timeout = conn.config().reply_timeout();
        let done_timeout = conn.config().completion_timeout();

        let socket = match self.read(conn, ack_timeout)? {
            Reply::Ack { socket } => socket,
            Reply::Completion { .. } => return Ok(()),
        };
        loop {
            match self.read(conn, done_timeout)? {
                Reply::Completion { socket: s, .. } if s == socket => return Ok(()),
                other => debug!(?other, socket, "skipping reply for another socket"),
            }
        }
    }

    fn inquire(&self, conn: &mut Connection, msg: &Message) -> Result<Vec<u8>, ProtocolError> {
        conn.send(msg)?;
        let timeout = conn.config().reply_timeout();
        match await_reply(conn, self.codec.framing(), timeout, is_inquiry_answer)? {
            Reply::Completion { payload, .. } => Ok(payload),
            Reply::Ack { .. } => Err(ProtocolError::MalformedReply(
                "inquiry answered with ACK".to_string(),
            )),
        }
    }
}

impl Dialect for Sony {
    fn kind(&self) -> DialectKind {
        DialectKind::Sony
    }

    fn framing(&self) -> Framing {
        self.codec.framing()
    }

    fn open(&mut self, conn: &mut Connection) -> Result<Calibration, ProtocolError> {
        // AddressSet: 88 30 01 FF comes back as 88 30 0n FF, n = cameras + 1
        let next = self.broadcast_with_retry(conn, &[0x30, 0x01], "address set", |r| {
            match r {
                [0x88, 0x30, n, 0xFF] if *n >= 1 => Some(*n),
                _ => None,
            }
        })?;
        self.cameras = next - 1;
        if self.cameras == 0 {
            return Err(ProtocolError::CameraError("no camera on the chain".to_string()));
        }
        debug!(cameras = self.cameras, "address chain numbered");

        self.broadcast_with_retry(conn, &[0x01, 0x00, 0x01], "interface clear", |r| {
            (r == [0x88, 0x01, 0x00, 0x01, 0xFF]).then_some(())
        })?;

        self.command(conn, &self.codec.home()?)?;
        self.command(conn, &self.codec.reset()?)?;

        let payload = self.inquire(conn, &self.codec.zoom_inquiry()?)?;
        self.zoom = from_nibbles(&payload);
        debug!(zoom = ?self.zoom, "initial zoom");

        Ok(evi_calibration().with_device_info(format!(
            "Sony EVI-D30, {} camera(s) on chain",
            self.cameras
        )))
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
        self.command(conn, &msg)
    }

    fn zoom(
        &mut self,
        conn: &mut Connection,
        _cal: &Calibration,
        speed: u8,
        z: f64,
    ) -> Result<(), ProtocolError> {
        self.command(conn, &self.codec.zoom_drive(speed, z)?)
    }

    fn zoom_to(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        _speed: u8,
        fraction: f64,
    ) -> Result<(), ProtocolError> {
        let position = cal.zoom.to_native(fraction) as u16;
        self.command(conn, &self.codec.zoom_direct(position)?)?;
        self.zoom = Some(position);
        Ok(())
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
        self.command(conn, &self.codec.drive(vv, ww, direction, start)?)
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
