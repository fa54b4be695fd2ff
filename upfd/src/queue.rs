//! Receive-queue dispatch and per-queue workers.
//!
//! The software dispatcher stands in for NIC RSS: downlink packets are
//! steered by UE address, uplink frames by tunnel id, so every packet of
//! a session reaches the same worker and the session's counters are
//! only ever touched from that worker. Queues are bounded channels; one
//! worker task owns each RX queue and forwards onto the direction's TX
//! queue.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::fastpath::{downlink, uplink, Verdict};
use crate::packet::{GtpuHeader, Ipv4Header, IPV4_HEADER_LEN, UDP_HEADER_LEN};
use crate::session::SessionTable;

const QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{workers} workers cannot serve {required} rx queues; refusing to drop packets")]
    NotEnoughWorkers { workers: usize, required: usize },
    #[error("at least one rx queue per direction is required")]
    NoQueues,
}

/// Engine-wide packet accounting, shared across workers.
#[derive(Default)]
pub struct EngineStats {
    pub dl_forwarded: AtomicU64,
    pub ul_forwarded: AtomicU64,
    pub dropped: AtomicU64,
}

impl EngineStats {
    pub fn dl_forwarded(&self) -> u64 {
        self.dl_forwarded.load(Ordering::Relaxed)
    }

    pub fn ul_forwarded(&self) -> u64 {
        self.ul_forwarded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// FNV-1a. The steering hash must be deterministic across workers and
/// runs, which rules out the std randomized hasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Queue index for a downlink packet, keyed on the UE address.
pub fn downlink_queue(ue_ip: Ipv4Addr, num_queues: usize) -> usize {
    (fnv1a(&ue_ip.octets()) % num_queues as u64) as usize
}

/// Queue index for an uplink frame, keyed on the tunnel id.
pub fn uplink_queue(teid: u32, num_queues: usize) -> usize {
    (fnv1a(&teid.to_be_bytes()) % num_queues as u64) as usize
}

pub struct FastPathEngine {
    num_queues: usize,
    dl_queues: Vec<mpsc::Sender<Bytes>>,
    ul_queues: Vec<mpsc::Sender<Bytes>>,
    stats: Arc<EngineStats>,
}

/// The peer-facing TX rings: encapsulated frames toward the gNB side,
/// decapsulated packets toward the data network side.
pub struct TxQueues {
    pub ran_tx: mpsc::Receiver<Bytes>,
    pub dn_tx: mpsc::Receiver<Bytes>,
}

impl FastPathEngine {
    /// Spawn one worker per RX queue in each direction. Fails up front
    /// when the worker budget cannot cover every queue; running with
    /// unserved queues would silently drop traffic.
    pub fn spawn(
        table: Arc<SessionTable>,
        num_queues: usize,
        num_workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, TxQueues), EngineError> {
        if num_queues == 0 {
            return Err(EngineError::NoQueues);
        }
        let required = num_queues * 2;
        if num_workers < required {
            return Err(EngineError::NotEnoughWorkers {
                workers: num_workers,
                required,
            });
        }

        let stats = Arc::new(EngineStats::default());
        let (ran_tx_sender, ran_tx) = mpsc::channel(QUEUE_DEPTH);
        let (dn_tx_sender, dn_tx) = mpsc::channel(QUEUE_DEPTH);

        let mut dl_queues = Vec::with_capacity(num_queues);
        let mut ul_queues = Vec::with_capacity(num_queues);

        for queue_id in 0..num_queues {
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            dl_queues.push(tx);
            log::info!("[upfd] worker {queue_id} -> downlink queue {queue_id}");
            tokio::spawn(downlink_worker(
                queue_id,
                rx,
                Arc::clone(&table),
                ran_tx_sender.clone(),
                Arc::clone(&stats),
                shutdown.clone(),
            ));
        }
        for queue_id in 0..num_queues {
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            ul_queues.push(tx);
            log::info!(
                "[upfd] worker {} -> uplink queue {queue_id}",
                num_queues + queue_id
            );
            tokio::spawn(uplink_worker(
                queue_id,
                rx,
                Arc::clone(&table),
                dn_tx_sender.clone(),
                Arc::clone(&stats),
                shutdown.clone(),
            ));
        }

        Ok((
            Self {
                num_queues,
                dl_queues,
                ul_queues,
                stats,
            },
            TxQueues { ran_tx, dn_tx },
        ))
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Steer one data-network packet onto its RSS queue. Frames that do
    /// not parse land on queue 0, whose worker drops them with a reason.
    pub fn inject_downlink(&self, packet: Bytes) -> bool {
        let queue = Ipv4Header::parse(&packet)
            .map(|h| downlink_queue(h.destination, self.num_queues))
            .unwrap_or(0);
        match self.dl_queues[queue].try_send(packet) {
            Ok(()) => true,
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Steer one tunnel frame onto its RSS queue by TEID.
    pub fn inject_uplink(&self, packet: Bytes) -> bool {
        let queue = packet
            .get(IPV4_HEADER_LEN + UDP_HEADER_LEN..)
            .and_then(|gtp| GtpuHeader::parse(gtp).ok())
            .map(|h| uplink_queue(h.teid, self.num_queues))
            .unwrap_or(0);
        match self.ul_queues[queue].try_send(packet) {
            Ok(()) => true,
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

async fn downlink_worker(
    queue_id: usize,
    mut rx: mpsc::Receiver<Bytes>,
    table: Arc<SessionTable>,
    tx_out: mpsc::Sender<Bytes>,
    stats: Arc<EngineStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("[upfd] downlink worker started for queue {queue_id}");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            packet = rx.recv() => {
                let Some(packet) = packet else { break };
                match downlink(&table, &packet) {
                    Verdict::Forward(frame) => {
                        stats.dl_forwarded.fetch_add(1, Ordering::Relaxed);
                        if tx_out.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Verdict::Drop(reason) => {
                        stats.dropped.fetch_add(1, Ordering::Relaxed);
                        log::debug!("[upfd] dl q{queue_id}: drop {reason:?}");
                    }
                }
            }
        }
    }
    log::info!("[upfd] downlink worker for queue {queue_id} stopped");
}

async fn uplink_worker(
    queue_id: usize,
    mut rx: mpsc::Receiver<Bytes>,
    table: Arc<SessionTable>,
    tx_out: mpsc::Sender<Bytes>,
    stats: Arc<EngineStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("[upfd] uplink worker started for queue {queue_id}");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            packet = rx.recv() => {
                let Some(packet) = packet else { break };
                match uplink(&table, &packet) {
                    Verdict::Forward(inner) => {
                        stats.ul_forwarded.fetch_add(1, Ordering::Relaxed);
                        if tx_out.send(inner).await.is_err() {
                            break;
                        }
                    }
                    Verdict::Drop(reason) => {
                        stats.dropped.fetch_add(1, Ordering::Relaxed);
                        log::debug!("[upfd] ul q{queue_id}: drop {reason:?}");
                    }
                }
            }
        }
    }
    log::info!("[upfd] uplink worker for queue {queue_id} stopped");
}
