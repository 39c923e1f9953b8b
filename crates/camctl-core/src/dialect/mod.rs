//! Camera protocol dialects
//!
//! A dialect turns abstract motion requests into one vendor's wire format.
//! The [`Controller`](crate::Controller) picks one by name when it is created
//! and drives it through the [`Dialect`] trait from then on.

mod canon;
mod pana;
mod sony;
pub mod visca;

pub use canon::Canon;
pub use pana::Pana;
pub use sony::Sony;
pub use visca::Visca;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::calibration::Calibration;
use crate::config::ControllerConfig;
use crate::protocol::{Connection, Framing, ProtocolError};

/// Known dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// Canon VC-C with range discovery
    Canon,
    /// Sony EVI-D30/D31
    Sony,
    /// Panasonic text protocol
    Pana,
    /// Plain VISCA binary protocol
    Visca,
}

impl DialectKind {
    /// All dialects, in name order
    pub const ALL: [DialectKind; 4] = [
        DialectKind::Canon,
        DialectKind::Pana,
        DialectKind::Sony,
        DialectKind::Visca,
    ];

    /// Name used to select the dialect
    pub fn name(&self) -> &'static str {
        match self {
            DialectKind::Canon => "canon",
            DialectKind::Sony => "sony",
            DialectKind::Pana => "pana",
            DialectKind::Visca => "visca",
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DialectKind {
    type Err = ProtocolError;

    /// Exact, case-sensitive match
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DialectKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| ProtocolError::UnknownProtocol(s.to_string()))
    }
}

/// Continuous-motion direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunDirection {
    /// Stop both axes
    #[default]
    None = 0,
    /// Pan left
    Left = 1,
    /// Pan left, tilt up
    LeftTop = 2,
    /// Pan left, tilt down
    LeftBottom = 3,
    /// Pan right
    Right = 4,
    /// Pan right, tilt up
    RightTop = 5,
    /// Pan right, tilt down
    RightBottom = 6,
    /// Tilt up
    Top = 7,
    /// Tilt down
    Bottom = 8,
}

impl RunDirection {
    /// -1 for left, 1 for right, 0 if pan holds still
    pub fn pan_sign(&self) -> i8 {
        match self {
            RunDirection::Left | RunDirection::LeftTop | RunDirection::LeftBottom => -1,
            RunDirection::Right | RunDirection::RightTop | RunDirection::RightBottom => 1,
            _ => 0,
        }
    }

    /// 1 for up, -1 for down, 0 if tilt holds still
    pub fn tilt_sign(&self) -> i8 {
        match self {
            RunDirection::Top | RunDirection::LeftTop | RunDirection::RightTop => 1,
            RunDirection::Bottom | RunDirection::LeftBottom | RunDirection::RightBottom => -1,
            _ => 0,
        }
    }
}

impl TryFrom<i32> for RunDirection {
    type Error = ProtocolError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => RunDirection::None,
            1 => RunDirection::Left,
            2 => RunDirection::LeftTop,
            3 => RunDirection::LeftBottom,
            4 => RunDirection::Right,
            5 => RunDirection::RightTop,
            6 => RunDirection::RightBottom,
            7 => RunDirection::Top,
            8 => RunDirection::Bottom,
            other => {
                return Err(ProtocolError::Config(format!(
                    "run direction {} out of range 0..=8",
                    other
                )))
            }
        })
    }
}

impl FromStr for RunDirection {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" | "stop" => RunDirection::None,
            "left" => RunDirection::Left,
            "left-top" => RunDirection::LeftTop,
            "left-bottom" => RunDirection::LeftBottom,
            "right" => RunDirection::Right,
            "right-top" => RunDirection::RightTop,
            "right-bottom" => RunDirection::RightBottom,
            "top" => RunDirection::Top,
            "bottom" => RunDirection::Bottom,
            other => {
                return Err(ProtocolError::Config(format!(
                    "unknown run direction '{}'",
                    other
                )))
            }
        })
    }
}

/// Absolute pan/tilt request in physical units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveCommand {
    /// Pan speed, degrees per second
    pub pan_speed: f64,
    /// Pan angle, degrees
    pub pan: f64,
    /// Tilt speed, degrees per second
    pub tilt_speed: f64,
    /// Tilt angle, degrees
    pub tilt: f64,
}

/// Reported head position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PanTilt {
    /// Pan angle, degrees
    pub pan: f64,
    /// Tilt angle, degrees
    pub tilt: f64,
}

/// One vendor's command set.
///
/// Every call except [`Dialect::open`] receives the calibration that `open`
/// returned. Callers guarantee the connection is open.
pub trait Dialect: Send {
    /// Which dialect this is
    fn kind(&self) -> DialectKind;

    /// Framing of the main command channel
    fn framing(&self) -> Framing;

    /// Run the session handshake and establish the ranges
    fn open(&mut self, conn: &mut Connection) -> Result<Calibration, ProtocolError>;

    /// Drive to an absolute position
    fn move_to(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        cmd: MoveCommand,
    ) -> Result<(), ProtocolError>;

    /// Drive the zoom: `z < 0` tele, `z > 0` wide, `z == 0` stop
    fn zoom(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        speed: u8,
        z: f64,
    ) -> Result<(), ProtocolError>;

    /// Drive the zoom to an absolute fraction, 0 wide to 1 tele
    fn zoom_to(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        speed: u8,
        fraction: f64,
    ) -> Result<(), ProtocolError>;

    /// Start or stop continuous motion
    fn run(
        &mut self,
        conn: &mut Connection,
        cal: &Calibration,
        pan_speed: f64,
        tilt_speed: f64,
        direction: RunDirection,
        start: bool,
    ) -> Result<(), ProtocolError>;

    /// Read back the head position
    fn query(&mut self, conn: &mut Connection, cal: &Calibration)
        -> Result<PanTilt, ProtocolError>;

    /// Say goodbye before the handle is dropped
    fn close(&mut self, _conn: &mut Connection) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Build the dialect for `kind` with its per-version settings from `config`
pub fn create_dialect(kind: DialectKind, config: &ControllerConfig) -> Box<dyn Dialect> {
    match kind {
        DialectKind::Canon => Box::new(Canon::new(config.terminator)),
        DialectKind::Visca => Box::new(Visca::new(config.visca_address, config.terminator)),
        DialectKind::Sony => Box::new(Sony::new()),
        DialectKind::Pana => Box::new(Pana::new(config.pana_speed_table)),
    }
}
