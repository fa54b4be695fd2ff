use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

use serde::Serialize;

/// Global counters for the AMF daemon.
///
/// Updated from request paths, so all fields are atomic; gauge-style
/// fields are refreshed by the monitor tick. Reads are lock-free
/// snapshots and eventually consistent, never torn.
pub struct AmfStats {
    pub start_time: SystemTime,

    total_ue_registrations: AtomicU64,
    active_ue_connections: AtomicUsize,
    total_pdu_sessions: AtomicU64,
    total_handovers: AtomicU64,
    total_auth_attempts: AtomicU64,
    successful_auths: AtomicU64,
    total_sbi_messages: AtomicU64,

    // Gauges recomputed by the monitor loop.
    total_ue_contexts: AtomicUsize,
    active_pdu_sessions: AtomicUsize,
    registered_nf_instances: AtomicUsize,
    healthy_nf_instances: AtomicUsize,
    system_load: AtomicU64,
}

/// Point-in-time view of the counters, suitable for logging and the
/// status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub uptime_s: u64,
    pub total_ue_registrations: u64,
    pub active_ue_connections: usize,
    pub total_ue_contexts: usize,
    pub total_pdu_sessions: u64,
    pub active_pdu_sessions: usize,
    pub total_handovers: u64,
    pub total_auth_attempts: u64,
    pub successful_auths: u64,
    pub total_sbi_messages: u64,
    pub total_n1_messages: u64,
    pub total_n2_messages: u64,
    pub registered_nf_instances: usize,
    pub healthy_nf_instances: usize,
    pub system_load: u64,
}

impl AmfStats {
    pub fn new() -> Self {
        Self {
            start_time: SystemTime::now(),
            total_ue_registrations: AtomicU64::new(0),
            active_ue_connections: AtomicUsize::new(0),
            total_pdu_sessions: AtomicU64::new(0),
            total_handovers: AtomicU64::new(0),
            total_auth_attempts: AtomicU64::new(0),
            successful_auths: AtomicU64::new(0),
            total_sbi_messages: AtomicU64::new(0),
            total_ue_contexts: AtomicUsize::new(0),
            active_pdu_sessions: AtomicUsize::new(0),
            registered_nf_instances: AtomicUsize::new(0),
            healthy_nf_instances: AtomicUsize::new(0),
            system_load: AtomicU64::new(0),
        }
    }

    pub fn inc_registrations(&self) {
        self.total_ue_registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_registrations(&self) -> u64 {
        self.total_ue_registrations.load(Ordering::Relaxed)
    }

    pub fn inc_active_connections(&self) {
        self.active_ue_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active_connections(&self) {
        let _ = self
            .active_ue_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn active_connections(&self) -> usize {
        self.active_ue_connections.load(Ordering::Relaxed)
    }

    pub fn inc_pdu_sessions(&self) {
        self.total_pdu_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_pdu_sessions(&self) -> u64 {
        self.total_pdu_sessions.load(Ordering::Relaxed)
    }

    pub fn inc_handovers(&self) {
        self.total_handovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_auth_attempts(&self) {
        self.total_auth_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_auth_successes(&self) {
        self.successful_auths.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sbi_messages(&self) {
        self.total_sbi_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Refresh the derived gauges. Called from the monitor tick with
    /// values recomputed against the UE store and NF registry.
    pub fn refresh_gauges(
        &self,
        ue_contexts: usize,
        active_sessions: usize,
        registered_nfs: usize,
        healthy_nfs: usize,
        system_load: u64,
    ) {
        self.total_ue_contexts.store(ue_contexts, Ordering::Relaxed);
        self.active_pdu_sessions
            .store(active_sessions, Ordering::Relaxed);
        self.registered_nf_instances
            .store(registered_nfs, Ordering::Relaxed);
        self.healthy_nf_instances
            .store(healthy_nfs, Ordering::Relaxed);
        self.system_load.store(system_load, Ordering::Relaxed);
    }

    pub fn system_load(&self) -> u64 {
        self.system_load.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }

    pub fn report(&self, n1_messages: u64, n2_messages: u64) -> StatsReport {
        StatsReport {
            uptime_s: self.uptime_seconds(),
            total_ue_registrations: self.total_ue_registrations.load(Ordering::Relaxed),
            active_ue_connections: self.active_ue_connections.load(Ordering::Relaxed),
            total_ue_contexts: self.total_ue_contexts.load(Ordering::Relaxed),
            total_pdu_sessions: self.total_pdu_sessions.load(Ordering::Relaxed),
            active_pdu_sessions: self.active_pdu_sessions.load(Ordering::Relaxed),
            total_handovers: self.total_handovers.load(Ordering::Relaxed),
            total_auth_attempts: self.total_auth_attempts.load(Ordering::Relaxed),
            successful_auths: self.successful_auths.load(Ordering::Relaxed),
            total_sbi_messages: self.total_sbi_messages.load(Ordering::Relaxed),
            total_n1_messages: n1_messages,
            total_n2_messages: n2_messages,
            registered_nf_instances: self.registered_nf_instances.load(Ordering::Relaxed),
            healthy_nf_instances: self.healthy_nf_instances.load(Ordering::Relaxed),
            system_load: self.system_load.load(Ordering::Relaxed),
        }
    }
}

impl Default for AmfStats {
    fn default() -> Self {
        Self::new()
    }
}
