//! # camctl Core Library
//!
//! Pan-tilt-zoom camera control over serial lines.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial transport with bounded, cancellable reply reads
//! - Message framing for byte-terminated and STX/ETX text protocols
//! - Camera dialects translating abstract motion into vendor wire formats
//! - Calibration between native device units and degrees
//! - A controller façade and an async actor wrapper
//!
//! ## Supported cameras
//!
//! - `canon`: Canon VC-C series, with range discovery at open
//! - `visca`: plain VISCA heads
//! - `sony`: Sony EVI-D30/D31
//! - `pana`: Panasonic heads
//!
//! ## Example
//!
//! ```rust,no_run
//! use camctl_core::Controller;
//!
//! # fn main() -> Result<(), camctl_core::protocol::ProtocolError> {
//! let mut camera = Controller::create("sony")?;
//! camera.open("/dev/ttyUSB0")?;
//!
//! camera.move_to(20.0, -30.0, 10.0, 5.0)?;
//! camera.zoom(3, -1.0)?;
//! let pos = camera.query()?;
//! println!("pan {:.1} tilt {:.1}", pos.pan, pos.tilt);
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod dialect;
pub mod protocol;

pub use controller::Controller;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::actor::ControllerHandle;
    pub use crate::calibration::{AxisRange, Calibration, RangeSource};
    pub use crate::config::ControllerConfig;
    pub use crate::controller::Controller;
    pub use crate::dialect::{DialectKind, MoveCommand, PanTilt, RunDirection};
    pub use crate::protocol::{Connection, ConnectionState, LinkConfig, ProtocolError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
