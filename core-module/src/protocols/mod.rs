//! DNS wire protocol: header, question and resource record types plus
//! parse/serialize implementations.

pub mod protocol;

pub use protocol::{
    DnsHeader, DnsPacket, DnsQuestion, DnsRecord, ProtocolError, QueryType, ResultCode,
};
