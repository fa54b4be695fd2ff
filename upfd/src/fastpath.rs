//! Per-packet transforms between the data network and the GTP-U tunnel.
//!
//! Both directions are pure functions over the (read-only) session
//! table and one packet; every failure is a typed drop so the workers
//! can account for it without touching the packet again.

use bytes::{Bytes, BytesMut};

use crate::packet::{
    GtpuHeader, Ipv4Header, PacketError, UdpHeader, GTPU_HEADER_LEN, GTPU_PORT, GTPU_SRC_PORT,
    GTPU_TPDU, GTPU_V1_FLAGS, IPV4_HEADER_LEN, IP_PROTO_UDP, UDP_HEADER_LEN,
};
use crate::session::SessionTable;

/// Total overhead added to a downlink packet: outer IPv4 + UDP + GTP-U.
pub const TUNNEL_OVERHEAD: usize = IPV4_HEADER_LEN + UDP_HEADER_LEN + GTPU_HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotIpv4,
    TooShort,
    NoSession,
    NotUdp,
    NotGtpuPort,
    BadGtpu,
    EmptyPayload,
    Oversize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Transformed frame, ready for the peer-facing TX queue.
    Forward(Bytes),
    Drop(DropReason),
}

/// Data network -> UE: encapsulate an IPv4 packet into GTP-U toward the
/// serving gNB.
pub fn downlink(table: &SessionTable, packet: &[u8]) -> Verdict {
    let inner = match Ipv4Header::parse(packet) {
        Ok(header) => header,
        Err(PacketError::UnsupportedIpVersion(_)) => return Verdict::Drop(DropReason::NotIpv4),
        Err(PacketError::UnexpectedEndOfSlice { .. }) => {
            return Verdict::Drop(DropReason::TooShort)
        }
    };

    let Some(session) = table.lookup_downlink(inner.destination) else {
        return Verdict::Drop(DropReason::NoSession);
    };

    let total_len = TUNNEL_OVERHEAD + packet.len();
    if total_len > u16::MAX as usize {
        return Verdict::Drop(DropReason::Oversize);
    }

    let mut out = BytesMut::zeroed(total_len);
    let outer_ip = Ipv4Header {
        // DSCP carried over from the inner packet.
        tos: inner.tos,
        total_len: total_len as u16,
        id: 1,
        flags_fragment: 0,
        ttl: 64,
        protocol: IP_PROTO_UDP,
        // Left to hardware offload, or simply skipped.
        checksum: 0,
        source: table.local_ip(),
        destination: session.gnb_ip,
    };
    outer_ip.write(&mut out[..IPV4_HEADER_LEN]);

    let outer_udp = UdpHeader {
        source_port: GTPU_SRC_PORT,
        dest_port: session.gnb_port,
        length: (UDP_HEADER_LEN + GTPU_HEADER_LEN + packet.len()) as u16,
        // Zero UDP checksum is legal over IPv4.
        checksum: 0,
    };
    outer_udp.write(&mut out[IPV4_HEADER_LEN..IPV4_HEADER_LEN + UDP_HEADER_LEN]);

    let gtpu = GtpuHeader {
        flags: GTPU_V1_FLAGS,
        message_type: GTPU_TPDU,
        length: packet.len() as u16,
        teid: session.dl_teid,
    };
    gtpu.write(&mut out[IPV4_HEADER_LEN + UDP_HEADER_LEN..TUNNEL_OVERHEAD]);

    out[TUNNEL_OVERHEAD..].copy_from_slice(packet);

    session.record_downlink(total_len as u64);
    log::trace!(
        "[upfd] dl: teid={:#x} len={} -> {}",
        session.dl_teid,
        total_len,
        session.gnb_ip
    );
    Verdict::Forward(out.freeze())
}

/// gNB -> data network: strip the tunnel and re-emit the inner IPv4
/// packet verbatim.
pub fn uplink(table: &SessionTable, packet: &[u8]) -> Verdict {
    if packet.len() < TUNNEL_OVERHEAD {
        return Verdict::Drop(DropReason::TooShort);
    }

    let outer_ip = match Ipv4Header::parse(packet) {
        Ok(header) => header,
        Err(_) => return Verdict::Drop(DropReason::NotIpv4),
    };
    if outer_ip.protocol != IP_PROTO_UDP {
        return Verdict::Drop(DropReason::NotUdp);
    }

    let outer_udp = match UdpHeader::parse(&packet[IPV4_HEADER_LEN..]) {
        Ok(header) => header,
        Err(_) => return Verdict::Drop(DropReason::TooShort),
    };
    if outer_udp.dest_port != GTPU_PORT {
        return Verdict::Drop(DropReason::NotGtpuPort);
    }

    let gtp_slice = &packet[IPV4_HEADER_LEN + UDP_HEADER_LEN..];
    let gtpu = match GtpuHeader::parse(gtp_slice) {
        Ok(header) => header,
        Err(_) => return Verdict::Drop(DropReason::TooShort),
    };
    if !gtpu.version_is_v1() || gtpu.message_type != GTPU_TPDU {
        return Verdict::Drop(DropReason::BadGtpu);
    }

    let inner_len = gtpu.length as usize;
    if inner_len == 0 {
        return Verdict::Drop(DropReason::EmptyPayload);
    }
    if GTPU_HEADER_LEN + inner_len > gtp_slice.len() {
        return Verdict::Drop(DropReason::BadGtpu);
    }

    let Some(session) = table.lookup_uplink(gtpu.teid) else {
        return Verdict::Drop(DropReason::NoSession);
    };

    let inner = Bytes::copy_from_slice(&gtp_slice[GTPU_HEADER_LEN..GTPU_HEADER_LEN + inner_len]);
    session.record_uplink(inner_len as u64);
    log::trace!("[upfd] ul: teid={:#x} len={}", gtpu.teid, inner_len);
    Verdict::Forward(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UpfSession;
    use byteorder::{ByteOrder, NetworkEndian};
    use std::net::Ipv4Addr;

    const UE_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const GNB_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);
    const DL_TEID: u32 = 0x1234_5678;
    const UL_TEID: u32 = 0x8765_4321;

    fn table() -> SessionTable {
        let mut table = SessionTable::new(Ipv4Addr::new(192, 168, 1, 50));
        table
            .insert(UpfSession::new(
                UE_IP,
                DL_TEID,
                UL_TEID,
                GNB_IP,
                GTPU_PORT,
                Ipv4Addr::new(8, 8, 8, 8),
                5,
                0x20,
            ))
            .unwrap();
        table
    }

    /// An IPv4 packet with `payload_len` payload bytes addressed to `dst`.
    fn ipv4_packet(dst: Ipv4Addr, payload_len: usize) -> Vec<u8> {
        let total = IPV4_HEADER_LEN + payload_len;
        let mut packet = vec![0u8; total];
        Ipv4Header {
            tos: 0x20,
            total_len: total as u16,
            id: 7,
            flags_fragment: 0,
            ttl: 62,
            protocol: IP_PROTO_UDP,
            checksum: 0,
            source: Ipv4Addr::new(8, 8, 8, 8),
            destination: dst,
        }
        .write(&mut packet[..IPV4_HEADER_LEN]);
        for (i, byte) in packet[IPV4_HEADER_LEN..].iter_mut().enumerate() {
            *byte = i as u8;
        }
        packet
    }

    /// A full outer frame carrying `inner` behind a GTP-U header.
    fn gtpu_frame(teid: u32, inner: &[u8], gtp_length: u16) -> Vec<u8> {
        let total = TUNNEL_OVERHEAD + inner.len();
        let mut frame = vec![0u8; total];
        Ipv4Header {
            tos: 0,
            total_len: total as u16,
            id: 1,
            flags_fragment: 0,
            ttl: 64,
            protocol: IP_PROTO_UDP,
            checksum: 0,
            source: GNB_IP,
            destination: Ipv4Addr::new(192, 168, 1, 50),
        }
        .write(&mut frame[..IPV4_HEADER_LEN]);
        UdpHeader {
            source_port: GTPU_SRC_PORT,
            dest_port: GTPU_PORT,
            length: (UDP_HEADER_LEN + GTPU_HEADER_LEN + inner.len()) as u16,
            checksum: 0,
        }
        .write(&mut frame[IPV4_HEADER_LEN..IPV4_HEADER_LEN + UDP_HEADER_LEN]);
        GtpuHeader {
            flags: GTPU_V1_FLAGS,
            message_type: GTPU_TPDU,
            length: gtp_length,
            teid,
        }
        .write(&mut frame[IPV4_HEADER_LEN + UDP_HEADER_LEN..TUNNEL_OVERHEAD]);
        frame[TUNNEL_OVERHEAD..].copy_from_slice(inner);
        frame
    }

    #[test]
    fn downlink_encapsulates_toward_gnb() {
        let table = table();
        let payload_len = 64usize;
        let inner = ipv4_packet(UE_IP, payload_len);
        let inner_total = inner.len();

        let Verdict::Forward(frame) = downlink(&table, &inner) else {
            panic!("expected forward");
        };
        assert_eq!(frame.len(), TUNNEL_OVERHEAD + inner_total);

        let outer_ip = Ipv4Header::parse(&frame).unwrap();
        assert_eq!(outer_ip.destination, GNB_IP);
        assert_eq!(outer_ip.source, table.local_ip());
        assert_eq!(outer_ip.ttl, 64);
        assert_eq!(outer_ip.id, 1);
        assert_eq!(outer_ip.flags_fragment, 0);
        assert_eq!(outer_ip.checksum, 0);
        assert_eq!(outer_ip.tos, 0x20, "DSCP copied from the inner header");
        assert_eq!(outer_ip.total_len as usize, frame.len());

        let outer_udp = UdpHeader::parse(&frame[IPV4_HEADER_LEN..]).unwrap();
        assert_eq!(outer_udp.dest_port, GTPU_PORT);
        assert_eq!(outer_udp.source_port, GTPU_SRC_PORT);
        assert_eq!(
            outer_udp.length as usize,
            UDP_HEADER_LEN + GTPU_HEADER_LEN + inner_total
        );
        assert_eq!(outer_udp.checksum, 0);

        let gtpu = GtpuHeader::parse(&frame[IPV4_HEADER_LEN + UDP_HEADER_LEN..]).unwrap();
        assert_eq!(gtpu.teid, DL_TEID);
        assert_eq!(gtpu.message_type, GTPU_TPDU);
        assert_eq!(gtpu.length as usize, inner_total);

        assert_eq!(&frame[TUNNEL_OVERHEAD..], &inner[..]);

        let session = table.lookup_downlink(UE_IP).unwrap();
        assert_eq!(session.dl_sequence(), 1);
        assert_eq!(session.packets_tx(), 1);
        assert_eq!(session.bytes_tx(), frame.len() as u64);
    }

    #[test]
    fn downlink_drops_unknown_ue_and_non_ipv4() {
        let table = table();
        let stranger = ipv4_packet(Ipv4Addr::new(10, 9, 9, 9), 16);
        assert_eq!(
            downlink(&table, &stranger),
            Verdict::Drop(DropReason::NoSession)
        );

        let mut v6 = ipv4_packet(UE_IP, 16);
        v6[0] = 0x60;
        assert_eq!(downlink(&table, &v6), Verdict::Drop(DropReason::NotIpv4));
    }

    #[test]
    fn uplink_reemits_inner_packet_verbatim() {
        let table = table();
        let inner = ipv4_packet(Ipv4Addr::new(8, 8, 8, 8), 40);
        let frame = gtpu_frame(UL_TEID, &inner, inner.len() as u16);

        let Verdict::Forward(out) = uplink(&table, &frame) else {
            panic!("expected forward");
        };
        assert_eq!(out, inner);

        let session = table.lookup_uplink(UL_TEID).unwrap();
        assert_eq!(session.packets_rx(), 1);
        assert_eq!(session.bytes_rx(), inner.len() as u64);
        assert_eq!(session.ul_sequence(), 1);
    }

    #[test]
    fn uplink_gating() {
        let table = table();
        let inner = ipv4_packet(Ipv4Addr::new(8, 8, 8, 8), 8);

        // Shorter than the tunnel overhead.
        assert_eq!(
            uplink(&table, &[0u8; TUNNEL_OVERHEAD - 1]),
            Verdict::Drop(DropReason::TooShort)
        );

        // Wrong transport protocol.
        let mut not_udp = gtpu_frame(UL_TEID, &inner, inner.len() as u16);
        not_udp[9] = 6; // TCP
        assert_eq!(uplink(&table, &not_udp), Verdict::Drop(DropReason::NotUdp));

        // Wrong UDP port.
        let mut wrong_port = gtpu_frame(UL_TEID, &inner, inner.len() as u16);
        NetworkEndian::write_u16(&mut wrong_port[IPV4_HEADER_LEN + 2..IPV4_HEADER_LEN + 4], 53);
        assert_eq!(
            uplink(&table, &wrong_port),
            Verdict::Drop(DropReason::NotGtpuPort)
        );

        // Wrong GTP version bits.
        let mut bad_version = gtpu_frame(UL_TEID, &inner, inner.len() as u16);
        bad_version[IPV4_HEADER_LEN + UDP_HEADER_LEN] = 0x40;
        assert_eq!(
            uplink(&table, &bad_version),
            Verdict::Drop(DropReason::BadGtpu)
        );

        // Unknown TEID.
        let unknown = gtpu_frame(0xdead_beef, &inner, inner.len() as u16);
        assert_eq!(uplink(&table, &unknown), Verdict::Drop(DropReason::NoSession));
    }

    #[test]
    fn uplink_zero_length_gtp_payload_is_dropped() {
        let table = table();
        // Header-only frame: GTP length field 0, no inner bytes.
        let frame = gtpu_frame(UL_TEID, &[], 0);
        assert_eq!(frame.len(), TUNNEL_OVERHEAD);
        assert_eq!(
            uplink(&table, &frame),
            Verdict::Drop(DropReason::EmptyPayload)
        );
        // Nothing counted for a dropped frame.
        assert_eq!(table.lookup_uplink(UL_TEID).unwrap().packets_rx(), 0);
    }

    #[test]
    fn uplink_length_beyond_frame_is_dropped() {
        let table = table();
        let inner = ipv4_packet(Ipv4Addr::new(8, 8, 8, 8), 8);
        // Claim more inner bytes than the frame carries.
        let frame = gtpu_frame(UL_TEID, &inner, (inner.len() + 32) as u16);
        assert_eq!(uplink(&table, &frame), Verdict::Drop(DropReason::BadGtpu));
    }

    #[test]
    fn mtu_sized_packets_are_forwarded() {
        let table = table();
        let inner = ipv4_packet(Ipv4Addr::new(8, 8, 8, 8), 1480 - IPV4_HEADER_LEN);
        assert_eq!(inner.len(), 1480);
        let frame = gtpu_frame(UL_TEID, &inner, inner.len() as u16);
        assert!(matches!(uplink(&table, &frame), Verdict::Forward(_)));

        let dl = ipv4_packet(UE_IP, 1480 - IPV4_HEADER_LEN);
        assert!(matches!(downlink(&table, &dl), Verdict::Forward(_)));
    }

    #[test]
    fn byte_counters_match_emitted_lengths() {
        let table = table();
        let mut emitted_dl = 0u64;
        let mut emitted_ul = 0u64;

        for len in [16usize, 64, 256, 1000] {
            let dl = ipv4_packet(UE_IP, len);
            if let Verdict::Forward(frame) = downlink(&table, &dl) {
                emitted_dl += frame.len() as u64;
            }
            let inner = ipv4_packet(Ipv4Addr::new(8, 8, 8, 8), len);
            let ul = gtpu_frame(UL_TEID, &inner, inner.len() as u16);
            if let Verdict::Forward(out) = uplink(&table, &ul) {
                emitted_ul += out.len() as u64;
            }
        }
        // A drop in the middle must not skew the totals.
        let _ = downlink(&table, &ipv4_packet(Ipv4Addr::new(1, 2, 3, 4), 100));
        let _ = uplink(&table, &gtpu_frame(0x1111, &ipv4_packet(UE_IP, 10), 30));

        let session = table.lookup_downlink(UE_IP).unwrap();
        assert_eq!(session.bytes_tx(), emitted_dl);
        assert_eq!(session.bytes_rx(), emitted_ul);
        assert_eq!(session.packets_tx(), 4);
        assert_eq!(session.packets_rx(), 4);
    }
}
