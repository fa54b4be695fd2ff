//! NF instance lifecycle, discovery and load-aware selection.
//!
//! One registry guards both the instance map and the by-type index under
//! a single `RwLock`: discovery takes it read, the sweeps and lifecycle
//! operations take it write. Health is derived, never stored: an
//! instance is healthy iff it is Registered and its heartbeat is younger
//! than the staleness threshold.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Heartbeats at least this old mark an instance stale. The boundary
/// itself is stale: strict inequality is reserved for "fresh".
pub const HEARTBEAT_STALE_SECS: u64 = 60;
/// Heartbeats older than this get the instance removed outright.
pub const EXPIRY_SECS: u64 = 120;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("NF instance already registered: {0}")]
    Duplicate(String),
    #[error("no NF instance with id {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NfType {
    Amf,
    Smf,
    Upf,
    Ausf,
    Udm,
    Udr,
    Pcf,
    Nrf,
    Nssf,
    Nef,
}

impl fmt::Display for NfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NfType::Amf => "AMF",
            NfType::Smf => "SMF",
            NfType::Upf => "UPF",
            NfType::Ausf => "AUSF",
            NfType::Udm => "UDM",
            NfType::Udr => "UDR",
            NfType::Pcf => "PCF",
            NfType::Nrf => "NRF",
            NfType::Nssf => "NSSF",
            NfType::Nef => "NEF",
        };
        f.write_str(s)
    }
}

impl FromStr for NfType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AMF" => Ok(NfType::Amf),
            "SMF" => Ok(NfType::Smf),
            "UPF" => Ok(NfType::Upf),
            "AUSF" => Ok(NfType::Ausf),
            "UDM" => Ok(NfType::Udm),
            "UDR" => Ok(NfType::Udr),
            "PCF" => Ok(NfType::Pcf),
            "NRF" => Ok(NfType::Nrf),
            "NSSF" => Ok(NfType::Nssf),
            "NEF" => Ok(NfType::Nef),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NfStatus {
    Registered,
    Suspended,
    Undiscoverable,
    Deregistered,
}

impl fmt::Display for NfStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NfStatus::Registered => "REGISTERED",
            NfStatus::Suspended => "SUSPENDED",
            NfStatus::Undiscoverable => "UNDISCOVERABLE",
            NfStatus::Deregistered => "DEREGISTERED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NfService {
    pub service_instance_id: String,
    pub service_name: String,
    pub versions: Vec<String>,
    pub scheme: String,
    pub fqdn: String,
    pub ipv4_address: String,
    pub port: u16,
    pub api_prefix: String,
}

/// One network function known to this AMF.
#[derive(Debug, Clone)]
pub struct NfInstance {
    pub instance_id: String,
    pub nf_type: NfType,
    pub status: NfStatus,
    pub plmn_id: String,
    pub snssai_list: Vec<String>,
    pub tai_list: Vec<String>,
    pub fqdn: String,
    pub ipv4_address: String,
    pub ipv6_address: String,
    pub priority: i32,
    pub capacity: i32,
    pub load: u8,
    pub supported_dnns: Vec<String>,
    pub services: Vec<NfService>,
    pub registered_at: SystemTime,
    pub last_heartbeat: Instant,
}

impl NfInstance {
    pub fn new(instance_id: &str, nf_type: NfType) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            nf_type,
            status: NfStatus::Registered,
            plmn_id: String::new(),
            snssai_list: Vec::new(),
            tai_list: Vec::new(),
            fqdn: String::new(),
            ipv4_address: String::new(),
            ipv6_address: String::new(),
            priority: 100,
            capacity: 100,
            load: 0,
            supported_dnns: Vec::new(),
            services: Vec::new(),
            registered_at: SystemTime::now(),
            last_heartbeat: Instant::now(),
        }
    }

    pub fn add_service(&mut self, service: NfService) {
        self.services.push(service);
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.service_name == name)
    }

    fn is_healthy_at(&self, now: Instant) -> bool {
        self.status == NfStatus::Registered
            && now.saturating_duration_since(self.last_heartbeat)
                < Duration::from_secs(HEARTBEAT_STALE_SECS)
    }
}

/// Wire form of an NF instance for the NRF management routes and
/// discovery responses. Timestamps stay internal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfProfile {
    pub nf_instance_id: String,
    pub nf_type: NfType,
    #[serde(default = "default_status")]
    pub nf_status: NfStatus,
    #[serde(default)]
    pub plmn_id: String,
    #[serde(default)]
    pub s_nssais: Vec<String>,
    #[serde(default)]
    pub tai_list: Vec<String>,
    #[serde(default)]
    pub fqdn: String,
    #[serde(default)]
    pub ipv4_address: String,
    #[serde(default)]
    pub ipv6_address: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_capacity")]
    pub capacity: i32,
    #[serde(default)]
    pub load: u8,
    #[serde(default)]
    pub dnn_list: Vec<String>,
    #[serde(default)]
    pub nf_services: Vec<NfService>,
}

fn default_status() -> NfStatus {
    NfStatus::Registered
}

fn default_priority() -> i32 {
    100
}

fn default_capacity() -> i32 {
    100
}

impl From<NfProfile> for NfInstance {
    fn from(p: NfProfile) -> Self {
        let mut nf = NfInstance::new(&p.nf_instance_id, p.nf_type);
        nf.status = p.nf_status;
        nf.plmn_id = p.plmn_id;
        nf.snssai_list = p.s_nssais;
        nf.tai_list = p.tai_list;
        nf.fqdn = p.fqdn;
        nf.ipv4_address = p.ipv4_address;
        nf.ipv6_address = p.ipv6_address;
        nf.priority = p.priority;
        nf.capacity = p.capacity;
        nf.load = p.load.min(100);
        nf.supported_dnns = p.dnn_list;
        nf.services = p.nf_services;
        nf
    }
}

impl From<&NfInstance> for NfProfile {
    fn from(nf: &NfInstance) -> Self {
        Self {
            nf_instance_id: nf.instance_id.clone(),
            nf_type: nf.nf_type,
            nf_status: nf.status,
            plmn_id: nf.plmn_id.clone(),
            s_nssais: nf.snssai_list.clone(),
            tai_list: nf.tai_list.clone(),
            fqdn: nf.fqdn.clone(),
            ipv4_address: nf.ipv4_address.clone(),
            ipv6_address: nf.ipv6_address.clone(),
            priority: nf.priority,
            capacity: nf.capacity,
            load: nf.load,
            dnn_list: nf.supported_dnns.clone(),
            nf_services: nf.services.clone(),
        }
    }
}

/// Discovery filter. `target_type` is the only mandatory criterion in
/// practice; everything else narrows the candidate set.
#[derive(Debug, Clone, Default)]
pub struct NfQuery {
    pub target_type: Option<NfType>,
    pub service_name: Option<String>,
    pub plmn_id: Option<String>,
    pub snssai: Option<String>,
    pub dnn: Option<String>,
}

struct Inner {
    instances: HashMap<String, NfInstance>,
    by_type: HashMap<NfType, Vec<String>>,
}

pub struct NfRegistry {
    inner: RwLock<Inner>,
}

impl NfRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                instances: HashMap::new(),
                by_type: HashMap::new(),
            }),
        }
    }

    pub fn register(&self, mut nf: NfInstance) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap();
        if inner.instances.contains_key(&nf.instance_id) {
            return Err(RegistryError::Duplicate(nf.instance_id));
        }
        nf.registered_at = SystemTime::now();
        nf.last_heartbeat = Instant::now();
        let id = nf.instance_id.clone();
        let nf_type = nf.nf_type;
        inner.instances.insert(id.clone(), nf);
        inner.by_type.entry(nf_type).or_default().push(id.clone());
        log::info!("[amfd] NF instance registered: {id} ({nf_type})");
        Ok(())
    }

    pub fn update(&self, id: &str, mut nf: NfInstance) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap();
        let old = inner
            .instances
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let old_type = old.nf_type;
        nf.instance_id = id.to_string();
        nf.last_heartbeat = Instant::now();
        let new_type = nf.nf_type;
        inner.instances.insert(id.to_string(), nf);
        if old_type != new_type {
            remove_from_index(&mut inner.by_type, old_type, id);
            inner
                .by_type
                .entry(new_type)
                .or_default()
                .push(id.to_string());
        }
        Ok(())
    }

    pub fn deregister(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap();
        let nf = inner
            .instances
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        remove_from_index(&mut inner.by_type, nf.nf_type, id);
        log::info!("[amfd] NF instance deregistered: {id}");
        Ok(())
    }

    pub fn update_status(&self, id: &str, status: NfStatus) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap();
        let nf = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        nf.status = status;
        nf.last_heartbeat = Instant::now();
        Ok(())
    }

    pub fn heartbeat(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap();
        let nf = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        nf.last_heartbeat = Instant::now();
        Ok(())
    }

    /// Load is clamped to [0, 100]; a load report counts as a heartbeat.
    pub fn update_load(&self, id: &str, load: u32) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap();
        let nf = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        nf.load = load.min(100) as u8;
        nf.last_heartbeat = Instant::now();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<NfInstance> {
        self.inner.read().unwrap().instances.get(id).cloned()
    }

    /// Discovery is a pure function of the registry snapshot: filter to
    /// healthy candidates matching the query, sort by descending priority
    /// with ties broken by ascending load.
    pub fn discover(&self, query: &NfQuery) -> Vec<NfInstance> {
        self.discover_at(query, Instant::now())
    }

    fn discover_at(&self, query: &NfQuery, now: Instant) -> Vec<NfInstance> {
        let inner = self.inner.read().unwrap();
        let mut results: Vec<NfInstance> = inner
            .instances
            .values()
            .filter(|nf| matches_query(nf, query, now))
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.load.cmp(&b.load))
        });
        results
    }

    pub fn select(&self, nf_type: NfType, plmn_id: &str) -> Option<NfInstance> {
        let query = NfQuery {
            target_type: Some(nf_type),
            plmn_id: (!plmn_id.is_empty()).then(|| plmn_id.to_string()),
            ..Default::default()
        };
        self.discover(&query).into_iter().next()
    }

    /// Mark every instance whose heartbeat has gone stale as Suspended.
    pub fn health_sweep(&self) -> usize {
        self.health_sweep_at(Instant::now())
    }

    fn health_sweep_at(&self, now: Instant) -> usize {
        let stale = Duration::from_secs(HEARTBEAT_STALE_SECS);
        let mut inner = self.inner.write().unwrap();
        let mut suspended = 0;
        for nf in inner.instances.values_mut() {
            if nf.status == NfStatus::Registered
                && now.saturating_duration_since(nf.last_heartbeat) >= stale
            {
                nf.status = NfStatus::Suspended;
                log::warn!("[amfd] NF instance marked stale: {}", nf.instance_id);
                suspended += 1;
            }
        }
        suspended
    }

    /// Remove every instance whose heartbeat is past the expiry horizon.
    pub fn expire_sweep(&self) -> usize {
        self.expire_sweep_at(Instant::now())
    }

    fn expire_sweep_at(&self, now: Instant) -> usize {
        let expiry = Duration::from_secs(EXPIRY_SECS);
        let mut inner = self.inner.write().unwrap();
        let expired: Vec<(String, NfType)> = inner
            .instances
            .values()
            .filter(|nf| now.saturating_duration_since(nf.last_heartbeat) > expiry)
            .map(|nf| (nf.instance_id.clone(), nf.nf_type))
            .collect();
        for (id, nf_type) in &expired {
            inner.instances.remove(id);
            remove_from_index(&mut inner.by_type, *nf_type, id);
            log::warn!("[amfd] expired NF instance removed: {id}");
        }
        expired.len()
    }

    /// (total, healthy) instance counts.
    pub fn counts(&self) -> (usize, usize) {
        let now = Instant::now();
        let inner = self.inner.read().unwrap();
        let total = inner.instances.len();
        let healthy = inner
            .instances
            .values()
            .filter(|nf| nf.is_healthy_at(now))
            .count();
        (total, healthy)
    }

    pub fn count_by_type(&self, nf_type: NfType) -> usize {
        self.inner
            .read()
            .unwrap()
            .by_type
            .get(&nf_type)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    pub fn ids_by_type(&self, nf_type: NfType) -> Vec<String> {
        self.inner
            .read()
            .unwrap()
            .by_type
            .get(&nf_type)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for NfRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_from_index(by_type: &mut HashMap<NfType, Vec<String>>, nf_type: NfType, id: &str) {
    if let Some(ids) = by_type.get_mut(&nf_type) {
        ids.retain(|i| i != id);
        if ids.is_empty() {
            by_type.remove(&nf_type);
        }
    }
}

fn matches_query(nf: &NfInstance, query: &NfQuery, now: Instant) -> bool {
    if let Some(t) = query.target_type {
        if nf.nf_type != t {
            return false;
        }
    }
    if !nf.is_healthy_at(now) {
        return false;
    }
    if let Some(service) = &query.service_name {
        if !nf.has_service(service) {
            return false;
        }
    }
    if let Some(plmn) = &query.plmn_id {
        if !nf.plmn_id.is_empty() && &nf.plmn_id != plmn {
            return false;
        }
    }
    if let Some(snssai) = &query.snssai {
        if !nf.snssai_list.is_empty() && !nf.snssai_list.iter().any(|s| s == snssai) {
            return false;
        }
    }
    if let Some(dnn) = &query.dnn {
        if !nf.supported_dnns.is_empty() && !nf.supported_dnns.iter().any(|d| d == dnn) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smf(id: &str, priority: i32, load: u8) -> NfInstance {
        let mut nf = NfInstance::new(id, NfType::Smf);
        nf.priority = priority;
        nf.load = load;
        nf.plmn_id = "46001".to_string();
        nf
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = NfRegistry::new();
        registry.register(smf("smf-001", 10, 0)).unwrap();
        let err = registry.register(smf("smf-001", 10, 0)).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("smf-001".to_string()));
        assert_eq!(registry.count_by_type(NfType::Smf), 1);
    }

    #[test]
    fn heartbeat_is_fresh_after_processing() {
        let registry = NfRegistry::new();
        registry.register(smf("smf-001", 10, 0)).unwrap();
        registry.heartbeat("smf-001").unwrap();
        let nf = registry.get("smf-001").unwrap();
        assert!(nf.last_heartbeat.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn heartbeat_unknown_instance_fails() {
        let registry = NfRegistry::new();
        assert_eq!(
            registry.heartbeat("smf-404").unwrap_err(),
            RegistryError::NotFound("smf-404".to_string())
        );
    }

    #[test]
    fn discovery_orders_by_priority_then_load() {
        let registry = NfRegistry::new();
        registry.register(smf("smf-a", 10, 5)).unwrap();
        registry.register(smf("smf-b", 20, 80)).unwrap();
        registry.register(smf("smf-c", 20, 10)).unwrap();

        let results = registry.discover(&NfQuery {
            target_type: Some(NfType::Smf),
            ..Default::default()
        });
        let ids: Vec<&str> = results.iter().map(|nf| nf.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["smf-c", "smf-b", "smf-a"]);
    }

    #[test]
    fn select_takes_the_discovery_head() {
        let registry = NfRegistry::new();
        registry.register(smf("smf-a", 10, 5)).unwrap();
        registry.register(smf("smf-b", 20, 10)).unwrap();
        let chosen = registry.select(NfType::Smf, "46001").unwrap();
        assert_eq!(chosen.instance_id, "smf-b");
    }

    #[test]
    fn health_sweep_suspends_stale_instances() {
        let registry = NfRegistry::new();
        registry.register(smf("smf-001", 10, 0)).unwrap();

        // Evaluate the sweep 61 s into the future instead of backdating
        // the heartbeat; monotonic clocks cannot be wound back.
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(registry.health_sweep_at(later), 1);
        assert_eq!(
            registry.get("smf-001").unwrap().status,
            NfStatus::Suspended
        );
        let found = registry.discover_at(
            &NfQuery {
                target_type: Some(NfType::Smf),
                ..Default::default()
            },
            later,
        );
        assert!(found.is_empty());
    }

    #[test]
    fn exactly_sixty_seconds_is_stale() {
        let registry = NfRegistry::new();
        registry.register(smf("smf-001", 10, 0)).unwrap();
        let hb = registry.get("smf-001").unwrap().last_heartbeat;

        let fresh = registry.discover_at(
            &NfQuery {
                target_type: Some(NfType::Smf),
                ..Default::default()
            },
            hb + Duration::from_secs(59),
        );
        assert_eq!(fresh.len(), 1);

        let stale = registry.discover_at(
            &NfQuery {
                target_type: Some(NfType::Smf),
                ..Default::default()
            },
            hb + Duration::from_secs(60),
        );
        assert!(stale.is_empty());
    }

    #[test]
    fn expire_sweep_removes_and_fixes_index() {
        let registry = NfRegistry::new();
        registry.register(smf("smf-001", 10, 0)).unwrap();
        let later = Instant::now() + Duration::from_secs(121);
        assert_eq!(registry.expire_sweep_at(later), 1);
        assert!(registry.get("smf-001").is_none());
        assert_eq!(registry.count_by_type(NfType::Smf), 0);
        assert!(registry.ids_by_type(NfType::Smf).is_empty());
    }

    #[test]
    fn discovery_filters_service_and_slice() {
        let registry = NfRegistry::new();
        let mut with_service = smf("smf-svc", 10, 0);
        with_service.add_service(NfService {
            service_name: "nsmf-pdusession".to_string(),
            ..Default::default()
        });
        with_service.snssai_list = vec!["SST:1,SD:000001".to_string()];
        registry.register(with_service).unwrap();
        registry.register(smf("smf-bare", 10, 0)).unwrap();

        let by_service = registry.discover(&NfQuery {
            target_type: Some(NfType::Smf),
            service_name: Some("nsmf-pdusession".to_string()),
            ..Default::default()
        });
        assert_eq!(by_service.len(), 1);
        assert_eq!(by_service[0].instance_id, "smf-svc");

        let by_slice = registry.discover(&NfQuery {
            target_type: Some(NfType::Smf),
            snssai: Some("SST:2,SD:000002".to_string()),
            ..Default::default()
        });
        // smf-bare advertises no slices, which matches anything.
        assert_eq!(by_slice.len(), 1);
        assert_eq!(by_slice[0].instance_id, "smf-bare");
    }

    #[test]
    fn load_is_clamped() {
        let registry = NfRegistry::new();
        registry.register(smf("smf-001", 10, 0)).unwrap();
        registry.update_load("smf-001", 250).unwrap();
        assert_eq!(registry.get("smf-001").unwrap().load, 100);
    }

    #[test]
    fn deregister_fixes_index() {
        let registry = NfRegistry::new();
        registry.register(smf("smf-001", 10, 0)).unwrap();
        registry.deregister("smf-001").unwrap();
        assert!(registry.get("smf-001").is_none());
        assert_eq!(registry.count_by_type(NfType::Smf), 0);
    }

    #[test]
    fn profile_roundtrip() {
        let mut nf = smf("smf-001", 42, 7);
        nf.supported_dnns = vec!["internet".to_string()];
        let profile = NfProfile::from(&nf);
        let back: NfInstance = profile.into();
        assert_eq!(back.instance_id, "smf-001");
        assert_eq!(back.nf_type, NfType::Smf);
        assert_eq!(back.priority, 42);
        assert_eq!(back.load, 7);
        assert_eq!(back.supported_dnns, vec!["internet"]);
    }
}
