//! Connection management
//!
//! Owns the serial handle and runs the send/reply cycle with the camera.

use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{
    message::hex_dump,
    serial::{clear_buffers, configure_port, open_port},
    stream::{CommunicationChannel, SerialChannel},
    Message, ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No handle open
    Disconnected,
    /// Handle open and usable
    Connected,
    /// A write failed part-way; the line needs a re-open
    Error,
}

/// Serial link timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read blocking timeout and sleep between polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Budget for a reply or acknowledgement, in milliseconds
    pub reply_timeout_ms: u64,
    /// Budget for a command-completion notice, in milliseconds
    pub completion_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reply_timeout_ms: DEFAULT_TIMEOUT_MS,
            completion_timeout_ms: 5000,
        }
    }
}

impl LinkConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Reply budget as a duration
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Completion budget as a duration
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCounters {
    /// Bytes written
    pub tx_bytes: u64,
    /// Bytes read
    pub rx_bytes: u64,
    /// Messages written
    pub tx_messages: u64,
    /// Complete replies read
    pub rx_messages: u64,
}

/// Exclusive owner of one camera line
pub struct Connection {
    channel: Option<Box<dyn CommunicationChannel>>,
    state: ConnectionState,
    device: Option<String>,
    config: LinkConfig,
    cancel: CancellationToken,
    counters: LinkCounters,
}

impl Connection {
    /// Create a connection with no handle open
    pub fn new(config: LinkConfig) -> Self {
        Self {
            channel: None,
            state: ConnectionState::Disconnected,
            device: None,
            config,
            cancel: CancellationToken::new(),
            counters: LinkCounters::default(),
        }
    }

    /// Open a serial device and apply the line settings
    pub fn open(device: &str, config: &LinkConfig) -> Result<Self, ProtocolError> {
        let mut conn = Self::new(config.clone());
        conn.reopen(device)?;
        Ok(conn)
    }

    /// Wrap an already open channel
    pub fn with_channel(channel: Box<dyn CommunicationChannel>, config: &LinkConfig) -> Self {
        let mut conn = Self::new(config.clone());
        conn.attach(channel, "<channel>");
        conn
    }

    /// Close any open handle, then open `device`
    pub fn reopen(&mut self, device: &str) -> Result<(), ProtocolError> {
        self.close();

        let mut port = open_port(device, self.config.baud_rate, self.config.poll_interval())?;
        configure_port(device, port.as_mut())?;
        clear_buffers(device, port.as_mut())?;

        debug!(device, baud = self.config.baud_rate, "serial line open");
        self.attach(Box::new(SerialChannel::new(port)), device);
        Ok(())
    }

    /// Install `channel` as the open handle, closing any previous one
    pub fn attach(&mut self, mut channel: Box<dyn CommunicationChannel>, device: &str) {
        self.close();
        if let Err(e) = channel.set_timeout(self.config.poll_interval()) {
            warn!(device, "could not set channel timeout: {}", e);
        }
        self.channel = Some(channel);
        self.device = Some(device.to_string());
        self.state = ConnectionState::Connected;
    }

    /// Drop the handle
    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            debug!(device = self.device.as_deref().unwrap_or(""), "serial line closed");
        }
        self.device = None;
        self.state = ConnectionState::Disconnected;
    }

    /// True while a handle is open
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Path of the open device
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Link timing in use
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Get cumulative tx/rx counters
    pub fn counters(&self) -> LinkCounters {
        self.counters
    }

    /// Token checked between reads; once cancelled every read fails with
    /// [`ProtocolError::Cancelled`] until a new token is installed
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replace the cancellation token
    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    /// Write one message. A short write is a hard failure.
    pub fn send(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;
        let bytes = msg.as_bytes();

        trace!("tx [{}]", hex_dump(bytes));
        let written = match channel.write(bytes) {
            Ok(n) => n,
            Err(e) => {
                self.state = ConnectionState::Error;
                return Err(e.into());
            }
        };
        if written != bytes.len() {
            self.state = ConnectionState::Error;
            return Err(ProtocolError::PartialWrite {
                written,
                expected: bytes.len(),
            });
        }
        channel.flush()?;

        self.counters.tx_bytes = self.counters.tx_bytes.saturating_add(written as u64);
        self.counters.tx_messages = self.counters.tx_messages.saturating_add(1);
        Ok(())
    }

    /// Bytes waiting in the input queue
    pub fn read_available(&mut self) -> Result<usize, ProtocolError> {
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;
        Ok(channel.bytes_to_read()? as usize)
    }

    /// Read a single byte, polling until `deadline`
    pub fn read_byte(&mut self, deadline: Instant) -> Result<u8, ProtocolError> {
        let poll = self.config.poll_interval();
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;
        let mut buf = [0u8; 1];

        loop {
            if self.cancel.is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ProtocolError::Timeout);
            }

            if channel.bytes_to_read()? > 0 {
                match channel.read(&mut buf) {
                    Ok(1) => {
                        self.counters.rx_bytes = self.counters.rx_bytes.saturating_add(1);
                        return Ok(buf[0]);
                    }
                    Ok(_) => {}
                    Err(ref e)
                        if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            std::thread::sleep(poll.min(deadline - now));
        }
    }

    /// Read bytes until `terminator`, which is included in the result
    pub fn read_reply(
        &mut self,
        terminator: u8,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Message, ProtocolError> {
        let deadline = Instant::now() + timeout;
        let mut reply = Message::new(max_len);

        loop {
            let byte = match self.read_byte(deadline) {
                Ok(b) => b,
                Err(ProtocolError::Timeout) => {
                    debug!(
                        partial = %hex_dump(reply.as_bytes()),
                        "reply timed out after {}ms",
                        timeout.as_millis()
                    );
                    return Err(ProtocolError::Timeout);
                }
                Err(e) => return Err(e),
            };
            reply.append(byte)?;
            if byte == terminator {
                break;
            }
        }

        trace!("rx [{}]", hex_dump(reply.as_bytes()));
        self.counters.rx_messages = self.counters.rx_messages.saturating_add(1);
        Ok(reply)
    }

    /// Send `msg` and block for the reply
    pub fn send_and_await_reply(
        &mut self,
        msg: &Message,
        terminator: u8,
        timeout: Duration,
    ) -> Result<Message, ProtocolError> {
        self.send(msg)?;
        self.read_reply(terminator, msg.max_len(), timeout)
    }

    /// Discard unread input
    pub fn drain_input(&mut self) -> Result<(), ProtocolError> {
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;
        let pending = channel.bytes_to_read()?;
        if pending > 0 {
            trace!(pending, "draining stale input");
        }
        channel.clear_input_buffer()?;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Channel that hands out a fixed input and records writes
    struct FakeChannel {
        input: VecDeque<u8>,
        written: Arc<Mutex<Vec<u8>>>,
        write_limit: Option<usize>,
    }

    impl FakeChannel {
        fn new(input: &[u8]) -> Self {
            Self {
                input: input.iter().copied().collect(),
                written: Arc::new(Mutex::new(Vec::new())),
                write_limit: None,
            }
        }
    }

    impl Read for FakeChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.input.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Err(io::Error::new(ErrorKind::TimedOut, "empty")),
            }
        }
    }

    impl Write for FakeChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.write_limit.unwrap_or(buf.len()).min(buf.len());
            self.written.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CommunicationChannel for FakeChannel {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_input_buffer(&mut self) -> io::Result<()> {
            self.input.clear();
            Ok(())
        }

        fn bytes_to_read(&mut self) -> io::Result<u32> {
            Ok(self.input.len() as u32)
        }
    }

    fn fast_link() -> LinkConfig {
        LinkConfig {
            poll_interval_ms: 1,
            reply_timeout_ms: 50,
            ..LinkConfig::default()
        }
    }

    #[test]
    fn test_link_config_default() {
        let config = LinkConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.reply_timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn test_connection_state() {
        let mut conn = Connection::new(LinkConfig::default());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_open());
        let msg = Message::from_bytes(&[0x81, 0xFF], 16).unwrap();
        assert!(matches!(conn.send(&msg), Err(ProtocolError::NotConnected)));
    }

    #[test]
    fn test_read_reply_stops_at_terminator() {
        let channel = FakeChannel::new(&[0x90, 0x41, 0xFF, 0x90, 0x51, 0xFF]);
        let mut conn = Connection::with_channel(Box::new(channel), &fast_link());

        let reply = conn.read_reply(0xFF, 16, Duration::from_millis(50)).unwrap();
        assert_eq!(reply.as_bytes(), &[0x90, 0x41, 0xFF]);
        assert_eq!(conn.read_available().unwrap(), 3);
        assert_eq!(conn.counters().rx_messages, 1);
    }

    #[test]
    fn test_read_reply_times_out() {
        let channel = FakeChannel::new(&[0x90, 0x41]);
        let mut conn = Connection::with_channel(Box::new(channel), &fast_link());

        let start = Instant::now();
        let err = conn
            .read_reply(0xFF, 16, Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_read_reply_overflows() {
        let channel = FakeChannel::new(&[1, 2, 3, 4, 5]);
        let mut conn = Connection::with_channel(Box::new(channel), &fast_link());

        let err = conn.read_reply(0xFF, 4, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, ProtocolError::BufferOverflow { max_len: 4 }));
    }

    #[test]
    fn test_cancelled_read() {
        let channel = FakeChannel::new(&[]);
        let mut conn = Connection::with_channel(Box::new(channel), &fast_link());
        conn.cancellation_token().cancel();

        let err = conn.read_reply(0xFF, 16, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ProtocolError::Cancelled));
    }

    #[test]
    fn test_partial_write_is_error() {
        let mut channel = FakeChannel::new(&[]);
        channel.write_limit = Some(2);
        let written = channel.written.clone();
        let mut conn = Connection::with_channel(Box::new(channel), &fast_link());

        let msg = Message::from_bytes(&[0x81, 0x01, 0x04, 0x07, 0x00, 0xFF], 16).unwrap();
        let err = conn.send(&msg).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::PartialWrite {
                written: 2,
                expected: 6
            }
        ));
        assert_eq!(conn.state(), ConnectionState::Error);
        assert_eq!(written.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_drain_input() {
        let channel = FakeChannel::new(&[1, 2, 3]);
        let mut conn = Connection::with_channel(Box::new(channel), &fast_link());
        conn.drain_input().unwrap();
        assert_eq!(conn.read_available().unwrap(), 0);
        conn.close();
        assert!(matches!(conn.drain_input(), Err(ProtocolError::NotConnected)));
    }
}
