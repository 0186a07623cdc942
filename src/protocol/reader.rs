//! Packet reader
//!
//! Read-only view over a leased packet buffer, handed to receive callbacks.
//! Framing has already been validated by the pump, so reads past the end
//! return zero defaults rather than erroring; handlers that need stricter
//! validation check `remaining()` themselves.

use tracing::warn;

use crate::net::session::Session;

/// Read cursor over one dispatched packet
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a reader positioned at the start of the buffer
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a reader positioned past the frame header.
    ///
    /// Fixed-length packets carry `[opcode]`, dynamic packets carry
    /// `[opcode][length:2]`; the cursor starts on the first payload byte.
    pub fn wrap(data: &'a [u8], fixed: bool) -> Self {
        let pos = if fixed { 1 } else { 3 };
        Self {
            data,
            pos: pos.min(data.len()),
        }
    }

    /// Total packet length, header included
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the packet is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes remaining past the cursor
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// The packet's opcode byte
    pub fn opcode(&self) -> u8 {
        self.data.first().copied().unwrap_or(0)
    }

    /// Peek the next unsigned byte without advancing
    pub fn peek_ubyte(&self) -> u8 {
        self.data.get(self.pos).copied().unwrap_or(0)
    }

    /// Read an unsigned byte
    pub fn read_ubyte(&mut self) -> u8 {
        if self.pos >= self.data.len() {
            return 0;
        }
        let value = self.data[self.pos];
        self.pos += 1;
        value
    }

    /// Read a signed byte
    pub fn read_byte(&mut self) -> i8 {
        self.read_ubyte() as i8
    }

    /// Read an unsigned big-endian short (2 bytes)
    pub fn read_ushort(&mut self) -> u16 {
        let b1 = self.read_ubyte() as u16;
        let b2 = self.read_ubyte() as u16;
        (b1 << 8) | b2
    }

    /// Read an unsigned little-endian short (2 bytes)
    pub fn read_ushort_le(&mut self) -> u16 {
        let b1 = self.read_ubyte() as u16;
        let b2 = self.read_ubyte() as u16;
        (b2 << 8) | b1
    }

    /// Read an unsigned big-endian int (4 bytes)
    pub fn read_uint(&mut self) -> u32 {
        let b1 = self.read_ubyte() as u32;
        let b2 = self.read_ubyte() as u32;
        let b3 = self.read_ubyte() as u32;
        let b4 = self.read_ubyte() as u32;
        (b1 << 24) | (b2 << 16) | (b3 << 8) | b4
    }

    /// Read an unsigned big-endian long (8 bytes)
    pub fn read_ulong(&mut self) -> u64 {
        let high = self.read_uint() as u64;
        let low = self.read_uint() as u64;
        (high << 32) | low
    }

    /// Read a null-terminated string
    pub fn read_string(&mut self) -> String {
        let mut bytes = Vec::new();
        while self.pos < self.data.len() {
            let b = self.data[self.pos];
            self.pos += 1;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Read up to `count` raw bytes
    pub fn read_bytes(&mut self, count: usize) -> Vec<u8> {
        let end = (self.pos + count).min(self.data.len());
        let bytes = self.data[self.pos..end].to_vec();
        self.pos = end;
        bytes
    }

    /// Log the packet contents as a diagnostic hex dump.
    ///
    /// Used when framing cannot continue (unregistered opcode); the whole
    /// remaining stream ends up here for inspection.
    pub fn trace(&self, session: &Session) {
        warn!(
            session_id = session.id,
            address = %session.address,
            opcode = %format!("0x{:02X}", self.opcode()),
            length = self.data.len(),
            dump = %hex_preview(self.data, 16),
            "Unhandled inbound data"
        );
    }
}

/// Format bytes as hex for diagnostics, eliding the middle of long runs
fn hex_preview(data: &[u8], max_each: usize) -> String {
    fn join_hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    if data.is_empty() {
        return "<empty>".to_string();
    }
    if data.len() <= max_each * 2 {
        join_hex(data)
    } else {
        format!(
            "{} .. {}",
            join_hex(&data[..max_each]),
            join_hex(&data[data.len() - max_each..])
        )
    }
}
