//! Static UE session table.
//!
//! Written once at configuration time, read concurrently by the queue
//! workers afterwards. Each session is reachable through two indices
//! that must stay consistent: UE IP for downlink, uplink TEID for
//! uplink. The per-session counters are only ever mutated by the worker
//! that owns the session's queue.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("duplicate session for UE ip {0}")]
    DuplicateUeIp(Ipv4Addr),
    #[error("duplicate session for uplink teid {0:#x}")]
    DuplicateUplinkTeid(u32),
}

#[derive(Debug)]
pub struct UpfSession {
    pub ue_ip: Ipv4Addr,
    pub dl_teid: u32,
    pub ul_teid: u32,
    pub gnb_ip: Ipv4Addr,
    pub gnb_port: u16,
    pub dn_ip: Ipv4Addr,
    pub qos_priority: u8,
    pub qos_dscp: u8,

    dl_sequence: AtomicU64,
    ul_sequence: AtomicU64,
    packets_tx: AtomicU64,
    packets_rx: AtomicU64,
    bytes_tx: AtomicU64,
    bytes_rx: AtomicU64,
}

impl UpfSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ue_ip: Ipv4Addr,
        dl_teid: u32,
        ul_teid: u32,
        gnb_ip: Ipv4Addr,
        gnb_port: u16,
        dn_ip: Ipv4Addr,
        qos_priority: u8,
        qos_dscp: u8,
    ) -> Self {
        Self {
            ue_ip,
            dl_teid,
            ul_teid,
            gnb_ip,
            gnb_port,
            dn_ip,
            qos_priority,
            qos_dscp,
            dl_sequence: AtomicU64::new(0),
            ul_sequence: AtomicU64::new(0),
            packets_tx: AtomicU64::new(0),
            packets_rx: AtomicU64::new(0),
            bytes_tx: AtomicU64::new(0),
            bytes_rx: AtomicU64::new(0),
        }
    }

    /// One encapsulated frame left on the gNB-facing queue.
    pub fn record_downlink(&self, frame_len: u64) {
        self.dl_sequence.fetch_add(1, Ordering::Relaxed);
        self.packets_tx.fetch_add(1, Ordering::Relaxed);
        self.bytes_tx.fetch_add(frame_len, Ordering::Relaxed);
    }

    /// One decapsulated inner packet left on the DN-facing queue.
    pub fn record_uplink(&self, inner_len: u64) {
        self.ul_sequence.fetch_add(1, Ordering::Relaxed);
        self.packets_rx.fetch_add(1, Ordering::Relaxed);
        self.bytes_rx.fetch_add(inner_len, Ordering::Relaxed);
    }

    pub fn dl_sequence(&self) -> u64 {
        self.dl_sequence.load(Ordering::Relaxed)
    }

    pub fn ul_sequence(&self) -> u64 {
        self.ul_sequence.load(Ordering::Relaxed)
    }

    pub fn packets_tx(&self) -> u64 {
        self.packets_tx.load(Ordering::Relaxed)
    }

    pub fn packets_rx(&self) -> u64 {
        self.packets_rx.load(Ordering::Relaxed)
    }

    pub fn bytes_tx(&self) -> u64 {
        self.bytes_tx.load(Ordering::Relaxed)
    }

    pub fn bytes_rx(&self) -> u64 {
        self.bytes_rx.load(Ordering::Relaxed)
    }
}

pub struct SessionTable {
    local_ip: Ipv4Addr,
    sessions: Vec<UpfSession>,
    by_ue_ip: HashMap<Ipv4Addr, usize>,
    by_ul_teid: HashMap<u32, usize>,
}

impl SessionTable {
    pub fn new(local_ip: Ipv4Addr) -> Self {
        Self {
            local_ip,
            sessions: Vec::new(),
            by_ue_ip: HashMap::new(),
            by_ul_teid: HashMap::new(),
        }
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    /// Install a session. Configuration-time only; both indices are
    /// updated together or not at all.
    pub fn insert(&mut self, session: UpfSession) -> Result<(), SessionError> {
        if self.by_ue_ip.contains_key(&session.ue_ip) {
            return Err(SessionError::DuplicateUeIp(session.ue_ip));
        }
        if self.by_ul_teid.contains_key(&session.ul_teid) {
            return Err(SessionError::DuplicateUplinkTeid(session.ul_teid));
        }
        let idx = self.sessions.len();
        self.by_ue_ip.insert(session.ue_ip, idx);
        self.by_ul_teid.insert(session.ul_teid, idx);
        self.sessions.push(session);
        Ok(())
    }

    pub fn lookup_downlink(&self, ue_ip: Ipv4Addr) -> Option<&UpfSession> {
        self.by_ue_ip.get(&ue_ip).map(|&i| &self.sessions[i])
    }

    pub fn lookup_uplink(&self, ul_teid: u32) -> Option<&UpfSession> {
        self.by_ul_teid.get(&ul_teid).map(|&i| &self.sessions[i])
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpfSession> {
        self.sessions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(ue: [u8; 4], dl: u32, ul: u32) -> UpfSession {
        UpfSession::new(
            Ipv4Addr::from(ue),
            dl,
            ul,
            Ipv4Addr::new(192, 168, 1, 100),
            2152,
            Ipv4Addr::new(8, 8, 8, 8),
            5,
            0x20,
        )
    }

    #[test]
    fn both_indices_resolve_the_same_session() {
        let mut table = SessionTable::new(Ipv4Addr::new(192, 168, 1, 50));
        table
            .insert(session([10, 0, 0, 2], 0x1234_5678, 0x8765_4321))
            .unwrap();

        let by_ip = table.lookup_downlink(Ipv4Addr::new(10, 0, 0, 2)).unwrap();
        let by_teid = table.lookup_uplink(0x8765_4321).unwrap();
        assert_eq!(by_ip.dl_teid, by_teid.dl_teid);
        assert_eq!(by_ip.ue_ip, by_teid.ue_ip);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut table = SessionTable::new(Ipv4Addr::new(192, 168, 1, 50));
        table.insert(session([10, 0, 0, 2], 1, 2)).unwrap();
        assert_eq!(
            table.insert(session([10, 0, 0, 2], 3, 4)).unwrap_err(),
            SessionError::DuplicateUeIp(Ipv4Addr::new(10, 0, 0, 2))
        );
        assert_eq!(
            table.insert(session([10, 0, 0, 3], 3, 2)).unwrap_err(),
            SessionError::DuplicateUplinkTeid(2)
        );
        // The failed insert must not leave a dangling ip index entry.
        assert!(table.lookup_downlink(Ipv4Addr::new(10, 0, 0, 3)).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn counters_accumulate() {
        let s = session([10, 0, 0, 2], 1, 2);
        s.record_downlink(100);
        s.record_downlink(50);
        s.record_uplink(64);
        assert_eq!(s.dl_sequence(), 2);
        assert_eq!(s.ul_sequence(), 1);
        assert_eq!(s.packets_tx(), 2);
        assert_eq!(s.packets_rx(), 1);
        assert_eq!(s.bytes_tx(), 150);
        assert_eq!(s.bytes_rx(), 64);
    }
}
