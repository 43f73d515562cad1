//! DNS wire protocol types: header, question, resource record and packet,
//! plus the parse/serialize contract the rest of the pipeline relies on.
//!
//! Only A and AAAA records are ever constructed locally. Every other record
//! type that shows up in an upstream reply is kept around verbatim as
//! `DnsRecord::Other` so it can be copied back out on the wire, but this
//! server never builds one itself.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use derive_more::{Display, Error, From};
use serde_derive::{Deserialize, Serialize};

use crate::buffer::buffer::{self, PacketBuffer, VectorPacketBuffer};

/// TTLs arrive as an unsigned 32-bit count of seconds, but the high bit is
/// reserved by RFC 2181: a value above `i32::MAX` is clamped on read.
const MAX_TTL: u32 = i32::MAX as u32;

const CLASS_IN: u16 = 1;

#[derive(Debug, Display, From, Error)]
pub enum ProtocolError {
    #[display(fmt = "input too short to contain a valid message")]
    TruncatedInput,
    #[display(fmt = "invalid label encountered while decoding a name")]
    InvalidLabel,
    #[display(fmt = "compression pointer loop detected")]
    PointerLoop,
    #[display(fmt = "unsupported question class")]
    UnsupportedClass,
    #[display(fmt = "I/O error: {}", _0)]
    Io(std::io::Error),
}

impl From<buffer::BufferError> for ProtocolError {
    fn from(err: buffer::BufferError) -> Self {
        match err {
            buffer::BufferError::EndOfBuffer => ProtocolError::TruncatedInput,
            buffer::BufferError::InvalidLabel(_) => ProtocolError::InvalidLabel,
            buffer::BufferError::PointerLoop => ProtocolError::PointerLoop,
            buffer::BufferError::Io(e) => ProtocolError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// The subset of query types this server reasons about directly. Anything
/// that isn't A/AAAA is still carried faithfully on the wire, but is never
/// inspected: it flows straight through to upstream (`spec.md` §3).
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum QueryType {
    A,
    AAAA,
    Other(u16),
}

impl QueryType {
    pub fn to_num(self) -> u16 {
        match self {
            QueryType::A => 1,
            QueryType::AAAA => 28,
            QueryType::Other(x) => x,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            28 => QueryType::AAAA,
            x => QueryType::Other(x),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::A => write!(f, "A"),
            QueryType::AAAA => write!(f, "AAAA"),
            QueryType::Other(x) => write!(f, "TYPE{}", x),
        }
    }
}

/// A DNS resource record. `A`/`AAAA` are the only variants this server ever
/// constructs; `Other` is an opaque pass-through for everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsRecord {
    A {
        domain: String,
        addr: Ipv4Addr,
        ttl: u32,
    },
    AAAA {
        domain: String,
        addr: Ipv6Addr,
        ttl: u32,
    },
    Other {
        domain: String,
        qtype: u16,
        class: u16,
        ttl: u32,
        rdata: Vec<u8>,
    },
}

impl DnsRecord {
    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<DnsRecord> {
        let mut domain = String::new();
        buffer.read_qname(&mut domain)?;

        let qtype_num = buffer.read_u16()?;
        let qtype = QueryType::from_num(qtype_num);
        let class = buffer.read_u16()?;
        let ttl = buffer.read_u32()?.min(MAX_TTL);
        let data_len = buffer.read_u16()?;

        match qtype {
            QueryType::A => {
                let raw = buffer.read_u32()?;
                Ok(DnsRecord::A {
                    domain,
                    addr: Ipv4Addr::from(raw),
                    ttl,
                })
            }
            QueryType::AAAA => {
                let hi = (buffer.read_u32()? as u128) << 96
                    | (buffer.read_u32()? as u128) << 64
                    | (buffer.read_u32()? as u128) << 32
                    | (buffer.read_u32()? as u128);
                Ok(DnsRecord::AAAA {
                    domain,
                    addr: Ipv6Addr::from(hi),
                    ttl,
                })
            }
            QueryType::Other(num) => {
                let pos = buffer.pos();
                let rdata = buffer.get_range(pos, data_len as usize)?.to_vec();
                buffer.step(data_len as usize)?;
                Ok(DnsRecord::Other {
                    domain,
                    qtype: num,
                    class,
                    ttl,
                    rdata,
                })
            }
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<usize> {
        let start_pos = buffer.pos();

        match self {
            DnsRecord::A { domain, addr, ttl } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::A.to_num())?;
                buffer.write_u16(CLASS_IN)?;
                buffer.write_u32(*ttl)?;
                buffer.write_u16(4)?;
                for octet in addr.octets() {
                    buffer.write_u8(octet)?;
                }
            }
            DnsRecord::AAAA { domain, addr, ttl } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::AAAA.to_num())?;
                buffer.write_u16(CLASS_IN)?;
                buffer.write_u32(*ttl)?;
                buffer.write_u16(16)?;
                for segment in addr.segments() {
                    buffer.write_u16(segment)?;
                }
            }
            DnsRecord::Other {
                domain,
                qtype,
                class,
                ttl,
                rdata,
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(*qtype)?;
                buffer.write_u16(*class)?;
                buffer.write_u32(*ttl)?;
                buffer.write_u16(rdata.len() as u16)?;
                for b in rdata {
                    buffer.write_u8(*b)?;
                }
            }
        }

        Ok(buffer.pos() - start_pos)
    }

    pub fn domain(&self) -> &str {
        match self {
            DnsRecord::A { domain, .. }
            | DnsRecord::AAAA { domain, .. }
            | DnsRecord::Other { domain, .. } => domain,
        }
    }

    pub fn ttl(&self) -> u32 {
        match self {
            DnsRecord::A { ttl, .. } | DnsRecord::AAAA { ttl, .. } | DnsRecord::Other { ttl, .. } => *ttl,
        }
    }

    pub fn query_type(&self) -> QueryType {
        match self {
            DnsRecord::A { .. } => QueryType::A,
            DnsRecord::AAAA { .. } => QueryType::AAAA,
            DnsRecord::Other { qtype, .. } => QueryType::Other(*qtype),
        }
    }

    /// Returns a copy of this record with its TTL replaced, used when
    /// raising a record to the cache's minimum TTL floor.
    pub fn with_ttl(&self, ttl: u32) -> DnsRecord {
        match self.clone() {
            DnsRecord::A { domain, addr, .. } => DnsRecord::A { domain, addr, ttl },
            DnsRecord::AAAA { domain, addr, .. } => DnsRecord::AAAA { domain, addr, ttl },
            DnsRecord::Other {
                domain,
                qtype,
                class,
                rdata,
                ..
            } => DnsRecord::Other {
                domain,
                qtype,
                class,
                ttl,
                rdata,
            },
        }
    }
}

/// Response code, as defined by RFC 1035 §4.1.1. This server only ever
/// emits the first five (`spec.md` §6); `REFUSED` is kept so responses
/// copied in from upstream round-trip faithfully.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ResultCode {
    #[default]
    NOERROR,
    FORMERR,
    SERVFAIL,
    NXDOMAIN,
    NOTIMP,
    REFUSED,
}

impl ResultCode {
    pub fn from_num(num: u8) -> ResultCode {
        match num {
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            _ => ResultCode::NOERROR,
        }
    }

    pub fn to_num(self) -> u8 {
        match self {
            ResultCode::NOERROR => 0,
            ResultCode::FORMERR => 1,
            ResultCode::SERVFAIL => 2,
            ResultCode::NXDOMAIN => 3,
            ResultCode::NOTIMP => 4,
            ResultCode::REFUSED => 5,
        }
    }
}

/// The fixed 12-byte DNS message header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,

    pub recursion_desired: bool,
    pub truncated_message: bool,
    pub authoritative_answer: bool,
    pub opcode: u8,
    pub response: bool,

    pub rescode: ResultCode,
    pub checking_disabled: bool,
    pub authed_data: bool,
    pub z: bool,
    pub recursion_available: bool,

    pub questions: u16,
    pub answers: u16,
    pub authoritative_entries: u16,
    pub resource_entries: u16,
}

impl DnsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub const WIRE_LEN: usize = 12;

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16(self.id)?;

        let flags1 = (self.recursion_desired as u8)
            | ((self.truncated_message as u8) << 1)
            | ((self.authoritative_answer as u8) << 2)
            | (self.opcode << 3)
            | ((self.response as u8) << 7);

        let flags2 = self.rescode.to_num()
            | ((self.checking_disabled as u8) << 4)
            | ((self.authed_data as u8) << 5)
            | ((self.z as u8) << 6)
            | ((self.recursion_available as u8) << 7);

        buffer.write_u8(flags1)?;
        buffer.write_u8(flags2)?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let flags1 = (flags >> 8) as u8;
        let flags2 = (flags & 0xFF) as u8;

        self.recursion_desired = (flags1 & (1 << 0)) > 0;
        self.truncated_message = (flags1 & (1 << 1)) > 0;
        self.authoritative_answer = (flags1 & (1 << 2)) > 0;
        self.opcode = (flags1 >> 3) & 0x0F;
        self.response = (flags1 & (1 << 7)) > 0;

        self.rescode = ResultCode::from_num(flags2 & 0x0F);
        self.checking_disabled = (flags2 & (1 << 4)) > 0;
        self.authed_data = (flags2 & (1 << 5)) > 0;
        self.z = (flags2 & (1 << 6)) > 0;
        self.recursion_available = (flags2 & (1 << 7)) > 0;

        self.questions = buffer.read_u16()?;
        self.answers = buffer.read_u16()?;
        self.authoritative_entries = buffer.read_u16()?;
        self.resource_entries = buffer.read_u16()?;

        Ok(())
    }
}

impl fmt::Display for DnsHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DnsHeader {{ id: {}, response: {}, rescode: {:?}, q: {}, a: {}, ns: {}, ar: {} }}",
            self.id,
            self.response,
            self.rescode,
            self.questions,
            self.answers,
            self.authoritative_entries,
            self.resource_entries
        )
    }
}

/// A DNS question: only the `IN` class is accepted when reading one off
/// the wire (`spec.md` §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
}

impl DnsQuestion {
    pub fn new(name: String, qtype: QueryType) -> Self {
        Self { name, qtype }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(CLASS_IN)?;
        Ok(())
    }

    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<Self> {
        let mut name = String::new();
        buffer.read_qname(&mut name)?;
        let qtype = QueryType::from_num(buffer.read_u16()?);
        let class = buffer.read_u16()?;
        if class != CLASS_IN {
            return Err(ProtocolError::UnsupportedClass);
        }
        Ok(Self { name, qtype })
    }
}

/// A parsed DNS message: header, questions, and the three record sections.
#[derive(Debug, Clone, Default)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub additionals: Vec<DnsRecord>,
}

impl DnsPacket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a complete message out of a byte buffer. Validates the
    /// 12-byte header is present before reading anything else.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DnsHeader::WIRE_LEN {
            return Err(ProtocolError::TruncatedInput);
        }

        let mut buffer = VectorPacketBuffer::from_bytes(bytes);
        let mut packet = Self::new();
        packet.header.read(&mut buffer)?;

        for _ in 0..packet.header.questions {
            packet.questions.push(DnsQuestion::read(&mut buffer)?);
        }

        for _ in 0..packet.header.answers {
            packet.answers.push(DnsRecord::read(&mut buffer)?);
        }
        for _ in 0..packet.header.authoritative_entries {
            packet.authorities.push(DnsRecord::read(&mut buffer)?);
        }
        for _ in 0..packet.header.resource_entries {
            packet.additionals.push(DnsRecord::read(&mut buffer)?);
        }

        Ok(packet)
    }

    /// Serializes this message. Caps the result at `max_size` bytes: once
    /// adding the next record would exceed it, the remaining records are
    /// dropped and the TC (truncated) bit is set instead of compressing
    /// names to make room.
    pub fn serialize(&self, max_size: usize) -> Result<Vec<u8>> {
        let mut header = self.header.clone();
        header.questions = self.questions.len() as u16;

        let mut scratch = VectorPacketBuffer::new();
        for question in &self.questions {
            question.write(&mut scratch)?;
        }

        let all_records = self
            .answers
            .iter()
            .map(|r| (Section::Answer, r))
            .chain(self.authorities.iter().map(|r| (Section::Authority, r)))
            .chain(self.additionals.iter().map(|r| (Section::Additional, r)));

        let mut included = (0u16, 0u16, 0u16);
        for (section, record) in all_records {
            let before = scratch.pos();
            record.write(&mut scratch)?;
            if scratch.pos() > max_size {
                header.truncated_message = true;
                scratch.seek(before)?;
                break;
            }
            match section {
                Section::Answer => included.0 += 1,
                Section::Authority => included.1 += 1,
                Section::Additional => included.2 += 1,
            }
        }

        header.answers = included.0;
        header.authoritative_entries = included.1;
        header.resource_entries = included.2;

        let mut out = VectorPacketBuffer::new();
        header.write(&mut out)?;
        for question in &self.questions {
            question.write(&mut out)?;
        }
        for record in self
            .answers
            .iter()
            .take(included.0 as usize)
            .chain(self.authorities.iter().take(included.1 as usize))
            .chain(self.additionals.iter().take(included.2 as usize))
        {
            record.write(&mut out)?;
        }

        Ok(out.buffer)
    }
}

#[derive(Clone, Copy)]
enum Section {
    Answer,
    Authority,
    Additional,
}
