//! Simulated cameras for the integration tests
#![allow(dead_code)]

use camctl_core::config::ControllerConfig;
use camctl_core::protocol::{CommunicationChannel, LinkConfig};
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

struct MockState {
    frames: Vec<Vec<u8>>,
    input: VecDeque<u8>,
    responder: Responder,
    write_limit: Option<usize>,
}

/// Mock serial line: every write is recorded and answered by the responder
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
}

/// Inspection handle that stays with the test after the channel is moved
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Every frame written so far
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().frames.clone()
    }

    /// Forget recorded frames
    pub fn clear(&self) {
        self.state.lock().unwrap().frames.clear();
    }

    /// Make writes stop short after `n` bytes
    pub fn limit_writes(&self, n: usize) {
        self.state.lock().unwrap().write_limit = Some(n);
    }

    /// Queue unsolicited input
    pub fn push_input(&self, bytes: &[u8]) {
        self.state.lock().unwrap().input.extend(bytes.iter().copied());
    }
}

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        match state.input.pop_front() {
            Some(b) if !buf.is_empty() => {
                buf[0] = b;
                Ok(1)
            }
            _ => Err(io::Error::new(ErrorKind::TimedOut, "no data")),
        }
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        let n = state.write_limit.unwrap_or(buf.len()).min(buf.len());
        state.frames.push(buf[..n].to_vec());
        if n == buf.len() {
            let reply = (state.responder)(buf);
            state.input.extend(reply);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for MockChannel {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().input.clear();
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(self.state.lock().unwrap().input.len() as u32)
    }
}

/// Channel answered by `responder`, plus its inspection handle
pub fn mock(
    responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static,
) -> (Box<dyn CommunicationChannel>, MockHandle) {
    let state = Arc::new(Mutex::new(MockState {
        frames: Vec::new(),
        input: VecDeque::new(),
        responder: Box::new(responder),
        write_limit: None,
    }));
    (
        Box::new(MockChannel {
            state: state.clone(),
        }),
        MockHandle { state },
    )
}

/// A line nobody answers on
pub fn silent() -> (Box<dyn CommunicationChannel>, MockHandle) {
    mock(|_| Vec::new())
}

/// Short timeouts so failing exchanges finish quickly
pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        link: LinkConfig {
            poll_interval_ms: 1,
            reply_timeout_ms: 100,
            completion_timeout_ms: 200,
            ..LinkConfig::default()
        },
        ..ControllerConfig::default()
    }
}

fn hex4(v: u16) -> Vec<u8> {
    format!("{:04X}", v).into_bytes()
}

fn nibbles(v: u16) -> [u8; 4] {
    [
        ((v >> 12) & 0xF) as u8,
        ((v >> 8) & 0xF) as u8,
        ((v >> 4) & 0xF) as u8,
        (v & 0xF) as u8,
    ]
}

/// Canon VC-C head. `ranges` answers the nine range queries in order
/// (pan min/max, tilt min/max, zoom max, pan speed min/max, tilt speed
/// min/max); `None` answers with garbage.
pub fn canon_camera(
    info: &'static str,
    ranges: [Option<u16>; 9],
) -> impl FnMut(&[u8]) -> Vec<u8> + Send + 'static {
    let mut position = b"80008000".to_vec();
    move |frame: &[u8]| {
        let ok = |payload: &[u8]| {
            let mut r = vec![0xFE, 0x30, 0x30, 0x00, b'0', b'0'];
            r.extend_from_slice(payload);
            r.push(0xEF);
            r
        };
        if frame.len() < 6 || frame[..4] != [0xFF, 0x30, 0x30, 0x00] {
            return Vec::new();
        }
        let body = &frame[4..frame.len() - 1];
        match body[0] {
            0x5C => {
                let idx = (body[1] - b'0') as usize;
                match ranges.get(idx).copied().flatten() {
                    Some(v) => ok(&hex4(v)),
                    None => ok(b"ZZZZ"),
                }
            }
            0xBE => ok(info.as_bytes()),
            0x62 => {
                position = body[1..9].to_vec();
                ok(b"")
            }
            0x63 => ok(&position),
            _ => ok(b""),
        }
    }
}

/// Ranges of a VC-C4 head
pub const VC_C4_RANGES: [Option<u16>; 9] = [
    Some(0x7C87),
    Some(0x8379),
    Some(0x7EF5),
    Some(0x8320),
    Some(0x0640),
    Some(0x0008),
    Some(0x0320),
    Some(0x0008),
    Some(0x026A),
];

/// VISCA head (serves both the `visca` and `sony` dialects). Commands get an
/// ACK followed by a completion; inquiries get a completion with data.
pub fn visca_camera() -> impl FnMut(&[u8]) -> Vec<u8> + Send + 'static {
    let mut pan: u16 = 0;
    let mut tilt: u16 = 0;
    move |frame: &[u8]| {
        if frame.len() < 3 || frame[frame.len() - 1] != 0xFF {
            return Vec::new();
        }
        if frame[0] == 0x88 {
            return match &frame[1..frame.len() - 1] {
                [0x30, 0x01] => vec![0x88, 0x30, 0x02, 0xFF],
                [0x01, 0x00, 0x01] => frame.to_vec(),
                _ => Vec::new(),
            };
        }
        let body = &frame[1..frame.len() - 1];
        match body {
            [0x09, 0x00, 0x02] => vec![0x90, 0x50, 0x00, 0x01, 0x04, 0x02, 0x01, 0x00, 0x02, 0xFF],
            [0x09, 0x04, 0x47] => vec![0x90, 0x50, 0x00, 0x02, 0x00, 0x00, 0xFF],
            [0x09, 0x06, 0x12] => {
                let mut r = vec![0x90, 0x50];
                r.extend_from_slice(&nibbles(pan));
                r.extend_from_slice(&nibbles(tilt));
                r.push(0xFF);
                r
            }
            [0x01, 0x06, 0x02, _, _, p @ ..] if p.len() == 8 => {
                let join = |n: &[u8]| n.iter().fold(0u16, |acc, &b| (acc << 4) | b as u16);
                pan = join(&p[..4]);
                tilt = join(&p[4..]);
                vec![0x90, 0x41, 0xFF, 0x90, 0x51, 0xFF]
            }
            [0x01, ..] => vec![0x90, 0x41, 0xFF, 0x90, 0x51, 0xFF],
            _ => vec![0x90, 0x60, 0x02, 0xFF],
        }
    }
}

/// Panasonic head
pub fn pana_camera() -> impl FnMut(&[u8]) -> Vec<u8> + Send + 'static {
    let mut position = b"80008000".to_vec();
    move |frame: &[u8]| {
        let cr = |text: &[u8]| {
            let mut r = text.to_vec();
            r.push(b'\r');
            r
        };
        match frame {
            [0x02, text @ .., 0x03] => {
                let reply: &[u8] = match text {
                    b"OSA:87:2" => b"OSA:87:2",
                    b"QSA:87" => b"AW-HE130",
                    _ => return Vec::new(),
                };
                let mut r = vec![0x02];
                r.extend_from_slice(reply);
                r.push(0x03);
                r
            }
            [b'#', text @ .., b'\r'] => {
                if text == b"O1" {
                    cr(b"p1")
                } else if let Some(rest) = text.strip_prefix(b"APS") {
                    position = rest[..8].to_vec();
                    let mut r = b"aPS".to_vec();
                    r.extend_from_slice(rest);
                    cr(&r)
                } else if text == b"APC" {
                    let mut r = b"aPC".to_vec();
                    r.extend_from_slice(&position);
                    cr(&r)
                } else if let Some(rest) = text.strip_prefix(b"Z") {
                    let mut r = b"zS".to_vec();
                    r.extend_from_slice(rest);
                    cr(&r)
                } else if let Some(rest) = text.strip_prefix(b"PTS") {
                    let mut r = b"pTS".to_vec();
                    r.extend_from_slice(rest);
                    cr(&r)
                } else {
                    cr(b"eR2")
                }
            }
            _ => Vec::new(),
        }
    }
}
