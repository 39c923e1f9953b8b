//! Wire messages
//!
//! A [`Message`] is a bounded byte buffer. Two framing disciplines are built
//! on it:
//! - binary commands followed by a terminator byte (VISCA `0xFF`,
//!   Canon VC-C `0xEF`)
//! - ASCII text wrapped in control characters (`STX ... ETX`, `# ... CR`)
//!
//! Either way a message is only well-formed once it ends with its terminator.

use std::fmt;

use super::ProtocolError;

/// ASCII start-of-text
pub const STX: u8 = 0x02;
/// ASCII end-of-text
pub const ETX: u8 = 0x03;
/// Carriage return, terminates Panasonic `#` commands
pub const CR: u8 = b'\r';

/// Framing constants of one dialect version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Byte that ends every frame
    pub terminator: u8,
    /// Largest frame the device accepts or sends, terminator included
    pub max_len: usize,
}

impl Framing {
    /// Create framing constants
    pub const fn new(terminator: u8, max_len: usize) -> Self {
        Self {
            terminator,
            max_len,
        }
    }

    /// Start building a message with this framing
    pub fn builder(&self) -> MessageBuilder {
        MessageBuilder::new(*self)
    }
}

/// A bounded byte buffer holding one frame
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    buffer: Vec<u8>,
    max_len: usize,
}

impl Message {
    /// Create an empty message that can hold up to `max_len` bytes
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_len),
            max_len,
        }
    }

    /// Create a message from raw bytes
    pub fn from_bytes(bytes: &[u8], max_len: usize) -> Result<Self, ProtocolError> {
        let mut msg = Self::new(max_len);
        msg.extend(bytes)?;
        Ok(msg)
    }

    /// Append one byte
    pub fn append(&mut self, byte: u8) -> Result<(), ProtocolError> {
        if self.buffer.len() >= self.max_len {
            return Err(ProtocolError::BufferOverflow {
                max_len: self.max_len,
            });
        }
        self.buffer.push(byte);
        Ok(())
    }

    /// Append several bytes
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if self.buffer.len() + bytes.len() > self.max_len {
            return Err(ProtocolError::BufferOverflow {
                max_len: self.max_len,
            });
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Clear the buffer for reuse
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes in the message
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing has been appended yet
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Capacity limit of this message
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// The raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// True when the last byte is `terminator`
    pub fn ends_with(&self, terminator: u8) -> bool {
        self.buffer.last() == Some(&terminator)
    }

    /// Bytes between a header of `skip` bytes and the terminator
    pub fn body(&self, skip: usize) -> &[u8] {
        let end = self.buffer.len().saturating_sub(1);
        if skip >= end {
            return &[];
        }
        &self.buffer[skip..end]
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message[{}]", hex_dump(&self.buffer))
    }
}

/// Builder for framed messages
pub struct MessageBuilder {
    framing: Framing,
    body: Vec<u8>,
}

impl MessageBuilder {
    /// Create a new builder
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            body: Vec::with_capacity(framing.max_len),
        }
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.body.push(b);
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.body.extend_from_slice(data);
        self
    }

    /// Add a 16-bit value as four VISCA nibbles, most significant first
    pub fn nibbles(mut self, value: u16) -> Self {
        self.body.extend_from_slice(&nibbles_u16(value));
        self
    }

    /// Add a fixed-width upper-case hex field
    pub fn hex(mut self, value: u32, width: usize) -> Self {
        self.body.extend_from_slice(hex_field(value, width).as_bytes());
        self
    }

    /// Add a zero-padded decimal field
    pub fn decimal(mut self, value: u32, width: usize) -> Self {
        self.body.extend_from_slice(decimal_field(value, width).as_bytes());
        self
    }

    /// Add ASCII text
    pub fn text(mut self, s: &str) -> Self {
        self.body.extend_from_slice(s.as_bytes());
        self
    }

    /// Append the terminator and check the frame fits
    pub fn build(self) -> Result<Message, ProtocolError> {
        let mut msg = Message::new(self.framing.max_len);
        msg.extend(&self.body)?;
        msg.append(self.framing.terminator)?;
        Ok(msg)
    }
}

/// Split a 16-bit value into four nibbles, most significant first
pub fn nibbles_u16(value: u16) -> [u8; 4] {
    [
        ((value >> 12) & 0x0F) as u8,
        ((value >> 8) & 0x0F) as u8,
        ((value >> 4) & 0x0F) as u8,
        (value & 0x0F) as u8,
    ]
}

/// Reassemble four nibbles into a 16-bit value
///
/// Returns `None` if fewer than four bytes are given or a byte has its high
/// nibble set.
pub fn from_nibbles(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < 4 {
        return None;
    }
    bytes[..4].iter().try_fold(0u16, |acc, &b| {
        if b > 0x0F {
            None
        } else {
            Some((acc << 4) | b as u16)
        }
    })
}

/// Format `value` as exactly `width` upper-case hex digits (truncating high digits)
pub fn hex_field(value: u32, width: usize) -> String {
    let s = format!("{:0width$X}", value, width = width);
    s[s.len() - width..].to_string()
}

/// Format `value` as exactly `width` zero-padded decimal digits (truncating high digits)
pub fn decimal_field(value: u32, width: usize) -> String {
    let s = format!("{:0width$}", value, width = width);
    s[s.len() - width..].to_string()
}

/// Fixed-width hex scan of the first `width` bytes
pub fn parse_hex_field(bytes: &[u8], width: usize) -> Option<u32> {
    if width == 0 || width > 8 || bytes.len() < width {
        return None;
    }
    let s = std::str::from_utf8(&bytes[..width]).ok()?;
    if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

/// Render bytes for logs: printable ASCII as-is, everything else as `\xNN`
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        match b {
            b'\r' => out.push_str("\\r"),
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out
}
