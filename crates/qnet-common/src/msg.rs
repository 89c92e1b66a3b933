// msg.rs — typed read/write cursors over message payloads.
//
// Payload fields are little-endian; only the packet header (wire.rs) is
// big-endian. Every read is bounds-checked: running past the end of a
// self-describing message means the decoder has desynchronized, which is
// fatal to the connection.

use crate::error::NetError;

// =============================================================================
// Writer
// =============================================================================

/// Growable write cursor for building message payloads.
#[derive(Debug, Default, Clone)]
pub struct MsgWriter {
    buf: Vec<u8>,
}

impl MsgWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_byte(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_short(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_long(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_float(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// NUL-terminated string.
    pub fn write_string(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// World coordinate, quantized to 1/8 unit.
    pub fn write_coord(&mut self, v: f32) {
        self.write_short((v * 8.0) as i16);
    }

    /// Angle in degrees, quantized to 256 steps per revolution.
    pub fn write_angle(&mut self, v: f32) {
        self.write_byte(((v * 256.0 / 360.0) as i32 & 255) as u8);
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Bounds-checked read cursor over a received payload.
#[derive(Debug)]
pub struct MsgReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MsgReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], NetError> {
        if self.remaining() < n {
            return Err(NetError::ReadPastEnd);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_byte(&mut self) -> Result<u8, NetError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_short(&mut self) -> Result<i16, NetError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_long(&mut self) -> Result<i32, NetError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_float(&mut self) -> Result<f32, NetError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read up to a NUL terminator (consumed, not returned). A string running
    /// to the end of the message without a terminator is malformed.
    pub fn read_string(&mut self) -> Result<String, NetError> {
        let start = self.pos;
        while self.pos < self.data.len() {
            if self.data[self.pos] == 0 {
                let s = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
                self.pos += 1;
                return Ok(s);
            }
            self.pos += 1;
        }
        Err(NetError::ReadPastEnd)
    }

    pub fn read_coord(&mut self) -> Result<f32, NetError> {
        Ok(self.read_short()? as f32 * (1.0 / 8.0))
    }

    pub fn read_angle(&mut self) -> Result<f32, NetError> {
        Ok(self.read_byte()? as i8 as f32 * (360.0 / 256.0))
    }
}
