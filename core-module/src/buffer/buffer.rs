//! Buffer for reading and writing DNS packets.

use std::collections::BTreeMap;

use derive_more::{Display, Error, From};

/// Maximum number of compression-pointer hops `read_qname` will follow
/// before giving up. Prevents an infinite loop on a pointer cycle.
const MAX_POINTER_HOPS: usize = 128;

#[derive(Debug, Display, From, Error)]
pub enum BufferError {
    #[display(fmt = "I/O error: {}", _0)]
    Io(std::io::Error),
    #[display(fmt = "end of buffer reached")]
    EndOfBuffer,
    #[display(fmt = "invalid label at position {}", _0)]
    InvalidLabel(#[error(not(source))] usize),
    #[display(fmt = "compression pointer loop detected")]
    PointerLoop,
}

pub type Result<T> = std::result::Result<T, BufferError>;

pub trait PacketBuffer {
    /// Reads the next byte from the buffer.
    fn read(&mut self) -> Result<u8>;

    /// Reads a 16-bit value from the buffer.
    fn read_u16(&mut self) -> Result<u16> {
        Ok(((self.read()? as u16) << 8) | (self.read()? as u16))
    }

    /// Reads a 32-bit value from the buffer.
    fn read_u32(&mut self) -> Result<u32> {
        Ok(((self.read()? as u32) << 24)
            | ((self.read()? as u32) << 16)
            | ((self.read()? as u32) << 8)
            | (self.read()? as u32))
    }

    /// Reads a domain name (QNAME) from the buffer, following compression
    /// pointers. Terminates even on a pointer cycle: a hop budget of
    /// `MAX_POINTER_HOPS` is enforced and exceeding it is a `PointerLoop`.
    fn read_qname(&mut self, outstr: &mut String) -> Result<()> {
        let mut pos = self.pos();
        let mut jumped = false;
        let mut hops = 0usize;

        let mut delim = "";
        loop {
            let len = self.get(pos)?;

            // Two byte sequence where the top two bits of the first byte are
            // set: a compressed pointer, relative to the start of the buffer.
            if (len & 0xC0) == 0xC0 {
                if !jumped {
                    self.seek(pos + 2)?;
                }

                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(BufferError::PointerLoop);
                }

                let second = self.get(pos + 1)? as u16;
                let offset = (((len as u16) ^ 0xC0) << 8) | second;
                pos = offset as usize;
                jumped = true;
                continue;
            }

            // A label longer than 63 bytes is not valid for this wire format.
            if len & 0xC0 != 0 {
                return Err(BufferError::InvalidLabel(pos));
            }

            // Names terminate with an empty label.
            if len == 0 {
                break;
            }

            pos += 1;

            let label_bytes = self.get_range(pos, len as usize)?;
            outstr.push_str(delim);
            outstr.push_str(&String::from_utf8_lossy(label_bytes));
            delim = ".";
            pos += len as usize;
        }

        if !jumped {
            self.seek(pos + 1)?;
        }

        Ok(())
    }

    /// Writes a single byte at the current position in the buffer.
    fn write(&mut self, val: u8) -> Result<()>;

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.write(val)
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        self.write((val >> 8) as u8)?;
        self.write((val & 0xFF) as u8)?;
        Ok(())
    }

    fn write_u32(&mut self, val: u32) -> Result<()> {
        for i in (0..4).rev() {
            self.write(((val >> (i * 8)) & 0xFF) as u8)?;
        }
        Ok(())
    }

    /// Writes a domain name (QNAME) to the buffer. Name compression is not
    /// implemented on write; names are always written out in full, which is
    /// correct per the wire format even if less compact.
    fn write_qname(&mut self, qname: &str) -> Result<()> {
        for label in qname.split('.') {
            if label.is_empty() {
                continue;
            }
            if label.len() > 63 {
                return Err(BufferError::InvalidLabel(self.pos()));
            }
            self.write_u8(label.len() as u8)?;
            for b in label.as_bytes() {
                self.write_u8(*b)?;
            }
        }
        self.write_u8(0)
    }

    /// Gets the byte at a specific position without moving the cursor.
    fn get(&mut self, pos: usize) -> Result<u8>;

    /// Gets a range of bytes starting at a specific position.
    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]>;

    /// Finds a previously written label's byte offset, for compression.
    fn find_label(&self, label: &str) -> Option<usize>;

    /// Remembers a label's position for later compression lookups.
    fn save_label(&mut self, label: &str, pos: usize);

    /// Seeks to a specific position in the buffer.
    fn seek(&mut self, pos: usize) -> Result<()>;

    /// Advances the cursor by a number of bytes.
    fn step(&mut self, steps: usize) -> Result<()>;

    /// Returns the current cursor position.
    fn pos(&self) -> usize;

    /// Overwrites the byte at a specific position.
    fn set(&mut self, pos: usize, val: u8) -> Result<()>;

    /// Overwrites a 16-bit value at a specific position (used to patch
    /// record-length fields after the fact).
    fn set_u16(&mut self, pos: usize, val: u16) -> Result<()> {
        self.set(pos, (val >> 8) as u8)?;
        self.set(pos + 1, (val & 0xFF) as u8)?;
        Ok(())
    }
}

/// A growable, in-memory packet buffer. This is the only buffer
/// implementation needed since every transport this server speaks (raw
/// UDP, DoH request/response bodies) hands over a complete datagram rather
/// than an incremental byte stream.
#[derive(Default)]
pub struct VectorPacketBuffer {
    pub buffer: Vec<u8>,
    pub pos: usize,
    pub label_lookup: BTreeMap<String, usize>,
}

impl VectorPacketBuffer {
    pub fn new() -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: Vec::with_capacity(512),
            pos: 0,
            label_lookup: BTreeMap::new(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: bytes.to_vec(),
            pos: 0,
            label_lookup: BTreeMap::new(),
        }
    }
}

impl PacketBuffer for VectorPacketBuffer {
    fn find_label(&self, label: &str) -> Option<usize> {
        self.label_lookup.get(label).cloned()
    }

    fn save_label(&mut self, label: &str, pos: usize) {
        self.label_lookup.insert(label.to_string(), pos);
    }

    fn read(&mut self) -> Result<u8> {
        if self.pos >= self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        let res = self.buffer[self.pos];
        self.pos += 1;
        Ok(res)
    }

    fn get(&mut self, pos: usize) -> Result<u8> {
        self.buffer.get(pos).copied().ok_or(BufferError::EndOfBuffer)
    }

    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]> {
        if start + len > self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(&self.buffer[start..start + len])
    }

    fn write(&mut self, val: u8) -> Result<()> {
        if self.pos == self.buffer.len() {
            self.buffer.push(val);
        } else {
            self.buffer[self.pos] = val;
        }
        self.pos += 1;
        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        if pos >= self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        self.buffer[pos] = val;
        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.pos += steps;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_qname_roundtrip() {
        let mut buffer = VectorPacketBuffer::new();
        buffer.write_qname("a.google.com").unwrap();

        buffer.seek(0).unwrap();
        let mut out = String::new();
        buffer.read_qname(&mut out).unwrap();
        assert_eq!(out, "a.google.com");
        assert_eq!(buffer.pos, buffer.buffer.len());
    }

    #[test]
    fn read_qname_follows_compression_pointer() {
        let mut buffer = VectorPacketBuffer::new();
        buffer.write_qname("b.google.com").unwrap();

        // A second name whose suffix is a pointer back to offset 2
        // ("google.com" starts right after the "b" label's length byte).
        let crafted = [0x01u8, b'c', 0xC0, 0x02];
        for b in &crafted {
            buffer.write_u8(*b).unwrap();
        }

        buffer.seek(0).unwrap();
        let mut first = String::new();
        buffer.read_qname(&mut first).unwrap();
        assert_eq!(first, "b.google.com");

        let mut second = String::new();
        buffer.read_qname(&mut second).unwrap();
        assert_eq!(second, "c.google.com");
    }

    #[test]
    fn read_qname_rejects_pointer_cycle() {
        let mut buffer = VectorPacketBuffer::new();
        // A pointer at offset 0 that points to itself.
        buffer.write_u8(0xC0).unwrap();
        buffer.write_u8(0x00).unwrap();

        buffer.seek(0).unwrap();
        let mut out = String::new();
        let err = buffer.read_qname(&mut out).unwrap_err();
        assert!(matches!(err, BufferError::PointerLoop));
    }

    #[test]
    fn get_and_get_range_bounds_check() {
        let mut buffer = VectorPacketBuffer::new();
        for i in 0..10u8 {
            buffer.write_u8(i).unwrap();
        }

        assert_eq!(buffer.get(2).unwrap(), 2);
        assert_eq!(buffer.get_range(2, 3).unwrap(), &[2, 3, 4]);
        assert!(buffer.get(20).is_err());
        assert!(buffer.get_range(8, 5).is_err());
    }

    #[test]
    fn write_qname_rejects_oversized_label() {
        let mut buffer = VectorPacketBuffer::new();
        let label = "a".repeat(64);
        assert!(buffer.write_qname(&label).is_err());
    }
}
