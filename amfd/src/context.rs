//! UE context records and the process-wide context store.
//!
//! The store maps `supi -> UeContext` with a `guti -> supi` reverse index.
//! Entries live in a sharded concurrent map, so writers to different UEs
//! do not block each other while a single UE's mutations stay serialized
//! behind its entry guard.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use thiserror::Error;

use crate::sm::UeState;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("UE context already exists for supi {0}")]
    Duplicate(String),
    #[error("no UE context for supi {0}")]
    NotFound(String),
}

/// The 5G subscriber identifiers carried by a context. `supi` is the
/// primary key; `guti` additionally lives in the store's reverse index.
#[derive(Debug, Clone, Default)]
pub struct UeIdentifiers {
    pub supi: String,
    pub pei: String,
    pub gpsi: String,
    pub guti: String,
    pub tmsi: String,
}

#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    pub k_amf: Vec<u8>,
    pub k_seaf: Vec<u8>,
    pub k_ausf: Vec<u8>,
    pub ng_ksi: u8,
    pub authenticated: bool,
    pub last_auth: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub struct LocationInfo {
    pub tai: String,
    pub cell_id: String,
    pub rat_type: String,
    pub last_update: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub struct AccessInfo {
    pub access_type: String,
    pub ran_node_id: String,
    pub ran_address: String,
    pub connected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MobilityInfo {
    pub allowed_nssai: Vec<String>,
    pub configured_nssai: Vec<String>,
    pub roaming: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionInfo {
    pub subscribed_slices: Vec<String>,
    pub access_restriction: String,
    pub emergency: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduSessionState {
    Active,
    Inactive,
    Releasing,
}

impl fmt::Display for PduSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PduSessionState::Active => "ACTIVE",
            PduSessionState::Inactive => "INACTIVE",
            PduSessionState::Releasing => "RELEASING",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct PduSession {
    pub id: u8,
    pub dnn: String,
    pub s_nssai: String,
    pub pdu_type: String,
    pub smf_id: String,
    pub upf_id: String,
    pub state: PduSessionState,
    pub created_at: SystemTime,
}

/// One subscriber known to this AMF.
#[derive(Debug, Clone)]
pub struct UeContext {
    pub identifiers: UeIdentifiers,
    pub state: UeState,
    pub connection_substate: String,
    pub security: SecurityContext,
    pub location: LocationInfo,
    pub access: AccessInfo,
    pub mobility: MobilityInfo,
    pub subscription: SubscriptionInfo,
    pub sessions: BTreeMap<u8, PduSession>,
    pub created_at: SystemTime,
    pub last_activity: Instant,
}

impl UeContext {
    pub fn new(supi: &str) -> Self {
        Self {
            identifiers: UeIdentifiers {
                supi: supi.to_string(),
                ..Default::default()
            },
            state: UeState::Deregistered,
            connection_substate: "IDLE".to_string(),
            security: SecurityContext::default(),
            location: LocationInfo::default(),
            access: AccessInfo::default(),
            mobility: MobilityInfo::default(),
            subscription: SubscriptionInfo::default(),
            sessions: BTreeMap::new(),
            created_at: SystemTime::now(),
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn add_pdu_session(&mut self, session: PduSession) {
        self.sessions.insert(session.id, session);
        self.touch();
    }

    pub fn remove_pdu_session(&mut self, id: u8) -> Option<PduSession> {
        let removed = self.sessions.remove(&id);
        self.touch();
        removed
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.state == PduSessionState::Active)
            .count()
    }

    /// Smallest unused session id, starting at 1.
    pub fn next_session_id(&self) -> u8 {
        let mut id = 1u8;
        while self.sessions.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        id
    }

    pub fn update_location(&mut self, tai: &str) {
        self.location.tai = tai.to_string();
        self.location.last_update = Some(SystemTime::now());
        self.touch();
    }

    pub fn enter_connected(&mut self) {
        self.state = UeState::RegisteredConnected;
        self.access.connected = true;
        self.connection_substate = "CONNECTED".to_string();
        self.touch();
    }

    pub fn enter_idle(&mut self) {
        self.state = UeState::RegisteredIdle;
        self.access.connected = false;
        self.connection_substate = "IDLE".to_string();
        self.touch();
    }

    /// Deregistration drops every session and the AN association; a
    /// Deregistered UE has no active sessions.
    pub fn enter_deregistered(&mut self) {
        self.state = UeState::Deregistered;
        self.sessions.clear();
        self.access.connected = false;
        self.connection_substate = "IDLE".to_string();
        self.touch();
    }
}

pub type UeGuard<'a> = RefMut<'a, String, UeContext>;

/// Process-wide `supi -> UeContext` store with the GUTI reverse index.
pub struct UeContextStore {
    contexts: DashMap<String, UeContext>,
    guti_index: DashMap<String, String>,
}

impl UeContextStore {
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
            guti_index: DashMap::new(),
        }
    }

    /// Create a fresh context. Fails when one already exists; the caller
    /// decides whether an existing Deregistered context is reusable.
    pub fn create(&self, supi: &str) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.contexts.entry(supi.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(supi.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(UeContext::new(supi));
                Ok(())
            }
        }
    }

    /// Exclusive per-UE guard. Hold it for the duration of the mutation;
    /// do not perform adapter I/O or store-wide scans while holding it.
    pub fn get(&self, supi: &str) -> Option<UeGuard<'_>> {
        self.contexts.get_mut(supi)
    }

    pub fn get_by_guti(&self, guti: &str) -> Option<UeGuard<'_>> {
        let supi = self.guti_index.get(guti).map(|e| e.value().clone())?;
        match self.contexts.get_mut(&supi) {
            Some(guard) => Some(guard),
            // A dangling index entry means the two maps diverged; that is
            // unrecoverable corruption, not a routine miss.
            None => panic!("guti index entry {guti} points at missing supi {supi}"),
        }
    }

    /// Set or replace a UE's GUTI, keeping the reverse index consistent.
    pub fn assign_guti(&self, supi: &str, guti: &str) -> Result<(), StoreError> {
        let mut ue = self
            .contexts
            .get_mut(supi)
            .ok_or_else(|| StoreError::NotFound(supi.to_string()))?;
        let old = std::mem::replace(&mut ue.identifiers.guti, guti.to_string());
        ue.touch();
        drop(ue);
        if !old.is_empty() {
            self.guti_index.remove(&old);
        }
        self.guti_index.insert(guti.to_string(), supi.to_string());
        Ok(())
    }

    pub fn remove(&self, supi: &str) -> Option<UeContext> {
        let (_, ue) = self.contexts.remove(supi)?;
        if !ue.identifiers.guti.is_empty() {
            self.guti_index.remove(&ue.identifiers.guti);
        }
        Some(ue)
    }

    /// Snapshot of every non-Deregistered context. Ordering is unspecified.
    pub fn all_active(&self) -> Vec<UeContext> {
        self.contexts
            .iter()
            .filter(|e| e.state != UeState::Deregistered)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn by_slice(&self, snssai: &str) -> Vec<UeContext> {
        self.contexts
            .iter()
            .filter(|e| {
                e.subscription
                    .subscribed_slices
                    .iter()
                    .any(|s| s == snssai)
            })
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn by_location(&self, tai: &str) -> Vec<UeContext> {
        self.contexts
            .iter()
            .filter(|e| e.location.tai == tai)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.contexts.len()
    }

    pub fn registered_count(&self) -> usize {
        self.contexts
            .iter()
            .filter(|e| e.state != UeState::Deregistered)
            .count()
    }

    pub fn connected_count(&self) -> usize {
        self.contexts.iter().filter(|e| e.access.connected).count()
    }

    pub fn active_session_count(&self) -> usize {
        self.contexts
            .iter()
            .map(|e| e.active_session_count())
            .sum()
    }

    /// Remove Deregistered contexts idle past `threshold`. Contexts in
    /// any other state are never swept, regardless of idleness.
    pub fn sweep_inactive(&self, threshold: Duration) -> usize {
        let stale: Vec<String> = self
            .contexts
            .iter()
            .filter(|e| {
                e.state == UeState::Deregistered && e.last_activity.elapsed() > threshold
            })
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for supi in stale {
            if self.remove(&supi).is_some() {
                log::info!("[amfd] swept inactive UE context {supi}");
                removed += 1;
            }
        }
        removed
    }
}

impl Default for UeContextStore {
    fn default() -> Self {
        Self::new()
    }
}
