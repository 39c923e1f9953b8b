//! Serial Protocol Communication
//!
//! Transport and framing shared by every camera dialect: serial line setup,
//! the channel seam, bounded wire messages and the send/reply link.

mod connection;
mod error;
pub mod message;
pub mod serial;
pub mod stream;

pub use connection::{Connection, ConnectionState, LinkConfig, LinkCounters};
pub use error::ProtocolError;
pub use message::{Framing, Message, MessageBuilder};
pub use serial::{clear_buffers, configure_port, list_ports, open_port, PortInfo};
pub use stream::{CommunicationChannel, SerialChannel};

/// Default baud rate; every supported camera talks 9600 8N1
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default timeout for replies in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default per-read timeout and poll sleep in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Largest frame any dialect sends or accepts
pub const MAX_MESSAGE_SIZE: usize = 64;
