//! Fixed-size header codecs for the fast path: IPv4, UDP and GTP-U.
//!
//! Parsing is slice-based and structural; semantic checks (ports,
//! message types, length bounds against the outer frame) belong to the
//! fast path so every drop reason is decided in one place.

use std::net::Ipv4Addr;

use byteorder::{ByteOrder, NetworkEndian};
use thiserror::Error;

pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
pub const GTPU_HEADER_LEN: usize = 8;

/// GTP-U well-known UDP port.
pub const GTPU_PORT: u16 = 2152;
/// Source port used for locally originated tunnel frames.
pub const GTPU_SRC_PORT: u16 = 2153;
/// GTP version 1, protocol type GTP, no extension/sequence/N-PDU flags.
pub const GTPU_V1_FLAGS: u8 = 0x30;
/// T-PDU message type.
pub const GTPU_TPDU: u8 = 255;

pub const IP_PROTO_UDP: u8 = 17;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("slice too short: need {needed} bytes, have {len}")]
    UnexpectedEndOfSlice { needed: usize, len: usize },
    #[error("unsupported ip version {0}")]
    UnsupportedIpVersion(u8),
}

fn require(slice: &[u8], needed: usize) -> Result<(), PacketError> {
    if slice.len() < needed {
        Err(PacketError::UnexpectedEndOfSlice {
            needed,
            len: slice.len(),
        })
    } else {
        Ok(())
    }
}

/// IPv4 header without options (ihl fixed at 5, as the tunnel endpoints
/// never emit options).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub flags_fragment: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl Ipv4Header {
    pub fn parse(slice: &[u8]) -> Result<Self, PacketError> {
        require(slice, IPV4_HEADER_LEN)?;
        let version = slice[0] >> 4;
        if version != 4 {
            return Err(PacketError::UnsupportedIpVersion(version));
        }
        Ok(Self {
            tos: slice[1],
            total_len: NetworkEndian::read_u16(&slice[2..4]),
            id: NetworkEndian::read_u16(&slice[4..6]),
            flags_fragment: NetworkEndian::read_u16(&slice[6..8]),
            ttl: slice[8],
            protocol: slice[9],
            checksum: NetworkEndian::read_u16(&slice[10..12]),
            source: Ipv4Addr::new(slice[12], slice[13], slice[14], slice[15]),
            destination: Ipv4Addr::new(slice[16], slice[17], slice[18], slice[19]),
        })
    }

    /// Write the header into the first 20 bytes of `buf`.
    pub fn write(&self, buf: &mut [u8]) {
        buf[0] = 0x45; // version 4, ihl 5
        buf[1] = self.tos;
        NetworkEndian::write_u16(&mut buf[2..4], self.total_len);
        NetworkEndian::write_u16(&mut buf[4..6], self.id);
        NetworkEndian::write_u16(&mut buf[6..8], self.flags_fragment);
        buf[8] = self.ttl;
        buf[9] = self.protocol;
        NetworkEndian::write_u16(&mut buf[10..12], self.checksum);
        buf[12..16].copy_from_slice(&self.source.octets());
        buf[16..20].copy_from_slice(&self.destination.octets());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpHeader {
    pub source_port: u16,
    pub dest_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub fn parse(slice: &[u8]) -> Result<Self, PacketError> {
        require(slice, UDP_HEADER_LEN)?;
        Ok(Self {
            source_port: NetworkEndian::read_u16(&slice[0..2]),
            dest_port: NetworkEndian::read_u16(&slice[2..4]),
            length: NetworkEndian::read_u16(&slice[4..6]),
            checksum: NetworkEndian::read_u16(&slice[6..8]),
        })
    }

    pub fn write(&self, buf: &mut [u8]) {
        NetworkEndian::write_u16(&mut buf[0..2], self.source_port);
        NetworkEndian::write_u16(&mut buf[2..4], self.dest_port);
        NetworkEndian::write_u16(&mut buf[4..6], self.length);
        NetworkEndian::write_u16(&mut buf[6..8], self.checksum);
    }
}

/// Minimal 8-byte GTP-U header (no extension headers, no sequence).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtpuHeader {
    pub flags: u8,
    pub message_type: u8,
    pub length: u16,
    pub teid: u32,
}

impl GtpuHeader {
    pub fn parse(slice: &[u8]) -> Result<Self, PacketError> {
        require(slice, GTPU_HEADER_LEN)?;
        Ok(Self {
            flags: slice[0],
            message_type: slice[1],
            length: NetworkEndian::read_u16(&slice[2..4]),
            teid: NetworkEndian::read_u32(&slice[4..8]),
        })
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[0] = self.flags;
        buf[1] = self.message_type;
        NetworkEndian::write_u16(&mut buf[2..4], self.length);
        NetworkEndian::write_u32(&mut buf[4..8], self.teid);
    }

    /// Version bits must read `001` for GTP version 1.
    pub fn version_is_v1(&self) -> bool {
        self.flags & 0xe0 == 0x20
    }
}
