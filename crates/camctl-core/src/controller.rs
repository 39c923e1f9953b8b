//! Controller façade
//!
//! A [`Controller`] binds one dialect to one serial line. It owns the
//! connection and the calibration the dialect produced at open, and keeps
//! the last commanded position so single-axis moves can hold the other axis.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::calibration::Calibration;
use crate::config::ControllerConfig;
use crate::dialect::{create_dialect, Dialect, DialectKind, MoveCommand, PanTilt, RunDirection};
use crate::protocol::{CommunicationChannel, Connection, LinkCounters, ProtocolError};

/// A PTZ camera controller
pub struct Controller {
    kind: DialectKind,
    config: ControllerConfig,
    dialect: Box<dyn Dialect>,
    conn: Connection,
    calibration: Option<Calibration>,
    last: PanTilt,
}

impl Controller {
    /// Create a controller for the dialect called `name` with default settings
    pub fn create(name: &str) -> Result<Self, ProtocolError> {
        Self::create_with_config(name, ControllerConfig::default())
    }

    /// Create a controller for the dialect called `name`.
    ///
    /// Names match exactly: `canon`, `sony`, `pana` or `visca`.
    pub fn create_with_config(name: &str, config: ControllerConfig) -> Result<Self, ProtocolError> {
        let kind: DialectKind = name.parse()?;
        config.validate()?;
        Ok(Self {
            kind,
            dialect: create_dialect(kind, &config),
            conn: Connection::new(config.link.clone()),
            config,
            calibration: None,
            last: PanTilt::default(),
        })
    }

    /// Dialect in use
    pub fn kind(&self) -> DialectKind {
        self.kind
    }

    /// Settings in use
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// True after a successful open
    pub fn is_open(&self) -> bool {
        self.calibration.is_some() && self.conn.is_open()
    }

    /// Ranges established at open
    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    /// Path of the open device
    pub fn device(&self) -> Option<&str> {
        self.conn.device()
    }

    /// Identification string the camera reported at open
    pub fn device_info(&self) -> Option<&str> {
        self.calibration.as_ref()?.device_info.as_deref()
    }

    /// Last commanded position
    pub fn last_position(&self) -> PanTilt {
        self.last
    }

    /// Traffic counters of the line
    pub fn counters(&self) -> LinkCounters {
        self.conn.counters()
    }

    /// Token that aborts any blocking read when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.conn.cancellation_token()
    }

    /// Install a fresh token after a cancellation
    pub fn reset_cancellation(&mut self) {
        self.conn.set_cancellation_token(CancellationToken::new());
    }

    /// Open `device`, closing any previous handle first
    pub fn open(&mut self, device: &str) -> Result<(), ProtocolError> {
        self.close();
        debug!(dialect = %self.kind, device, "opening camera");
        self.conn.reopen(device)?;
        self.handshake()
    }

    /// Open over an already connected channel
    pub fn open_with_channel(
        &mut self,
        channel: Box<dyn CommunicationChannel>,
    ) -> Result<(), ProtocolError> {
        self.close();
        debug!(dialect = %self.kind, "opening camera on supplied channel");
        self.conn.attach(channel, "<channel>");
        self.handshake()
    }

    fn handshake(&mut self) -> Result<(), ProtocolError> {
        match self.dialect.open(&mut self.conn) {
            Ok(cal) => {
                info!(
                    dialect = %self.kind,
                    device = self.conn.device().unwrap_or(""),
                    info = cal.device_info.as_deref().unwrap_or("-"),
                    defaults = cal.used_defaults(),
                    "camera open"
                );
                self.calibration = Some(cal);
                self.last = PanTilt::default();
                Ok(())
            }
            Err(e) => {
                warn!(dialect = %self.kind, "camera handshake failed: {}", e);
                self.conn.close();
                Err(e)
            }
        }
    }

    /// Close the device. Safe to call when not open.
    pub fn close(&mut self) {
        if self.conn.is_open() {
            if self.calibration.is_some() {
                if let Err(e) = self.dialect.close(&mut self.conn) {
                    debug!("goodbye failed: {}", e);
                }
            }
            self.conn.close();
            debug!(dialect = %self.kind, "camera closed");
        }
        self.calibration = None;
    }

    fn session(
        &mut self,
    ) -> Result<(&mut Box<dyn Dialect>, &mut Connection, &Calibration), ProtocolError> {
        let cal = self.calibration.as_ref().ok_or(ProtocolError::NotConnected)?;
        if !self.conn.is_open() {
            return Err(ProtocolError::NotConnected);
        }
        Ok((&mut self.dialect, &mut self.conn, cal))
    }

    /// Pan to `v` degrees, holding tilt at its last commanded value
    pub fn pan(&mut self, speed: f64, v: f64) -> Result<(), ProtocolError> {
        let tilt = self.last.tilt;
        self.move_to(speed, v, speed, tilt)
    }

    /// Tilt to `v` degrees, holding pan at its last commanded value
    pub fn tilt(&mut self, speed: f64, v: f64) -> Result<(), ProtocolError> {
        let pan = self.last.pan;
        self.move_to(speed, pan, speed, v)
    }

    /// Move both axes to an absolute position. Out-of-range values are clamped.
    pub fn move_to(
        &mut self,
        pan_speed: f64,
        pan: f64,
        tilt_speed: f64,
        tilt: f64,
    ) -> Result<(), ProtocolError> {
        let (dialect, conn, cal) = self.session()?;
        let cmd = MoveCommand {
            pan_speed,
            pan,
            tilt_speed,
            tilt,
        };
        dialect.move_to(conn, cal, cmd)?;
        let last = PanTilt {
            pan: cal.pan.clamp(pan),
            tilt: cal.tilt.clamp(tilt),
        };
        self.last = last;
        Ok(())
    }

    /// Drive the zoom: `z < 0` tele, `z > 0` wide, `z == 0` stop
    pub fn zoom(&mut self, speed: u8, z: f64) -> Result<(), ProtocolError> {
        let (dialect, conn, cal) = self.session()?;
        dialect.zoom(conn, cal, speed, z)
    }

    /// Zoom to `fraction`, 0 wide to 1 tele
    pub fn zoom_to(&mut self, speed: u8, fraction: f64) -> Result<(), ProtocolError> {
        let (dialect, conn, cal) = self.session()?;
        dialect.zoom_to(conn, cal, speed, fraction)
    }

    /// Start (`start == true`) or stop continuous motion
    pub fn run(
        &mut self,
        pan_speed: f64,
        tilt_speed: f64,
        direction: RunDirection,
        start: bool,
    ) -> Result<(), ProtocolError> {
        let (dialect, conn, cal) = self.session()?;
        dialect.run(conn, cal, pan_speed, tilt_speed, direction, start)
    }

    /// Read back the head position in degrees
    pub fn query(&mut self) -> Result<PanTilt, ProtocolError> {
        let (dialect, conn, cal) = self.session()?;
        dialect.query(conn, cal)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.close();
    }
}
