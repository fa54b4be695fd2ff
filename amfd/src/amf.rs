//! The AMF orchestrator.
//!
//! Owns the four once-singleton components (UE store, NF registry, N1/N2
//! service, self NF entry) as explicit values and glues them to the
//! adapters: every incoming message resolves a UE context, derives a
//! state-machine event, runs the transition under the UE's guard and
//! performs the side effects. Outbound N1/N2 messages are collected
//! while the guard is held and emitted only after it is dropped, so no
//! adapter I/O ever happens under a context lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::config::AmfConfig;
use crate::context::{PduSession, PduSessionState, UeContext, UeContextStore};
use crate::n1n2::{
    IncomingMessage, N1Message, N1MessageType, N1N2Service, N2Message, N2MessageType,
};
use crate::registry::{NfInstance, NfProfile, NfQuery, NfRegistry, NfService, NfType};
use crate::sbi::{SbiMessage, SbiMessageType, SbiOutcome};
use crate::sm::{transition, Action, UeEvent, UeState};
use crate::stats::{AmfStats, StatsReport};

const MONITOR_INTERVAL: Duration = Duration::from_secs(30);
const NF_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AmfError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("UE not registered: {0}")]
    UeNotFound(String),
    #[error("operation not allowed in current state: {0}")]
    StateDisallowed(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("maximum UE connections reached")]
    CapacityExceeded,
    #[error("no healthy {0} instance available")]
    NoHealthyNf(&'static str),
    #[error("no {0} resource: {1}")]
    ResourceNotFound(&'static str, String),
}

impl AmfError {
    fn status_code(&self) -> u16 {
        match self {
            AmfError::Malformed(_) => 400,
            AmfError::UeNotFound(_) | AmfError::StateDisallowed(_) => 403,
            AmfError::Duplicate(_) => 409,
            AmfError::CapacityExceeded | AmfError::NoHealthyNf(_) => 503,
            AmfError::ResourceNotFound(_, _) => 404,
        }
    }
}

/// Outbound message collected during a transition, emitted after the
/// UE guard is dropped.
enum Outbound {
    N1(N1Message),
    N2(N2Message),
}

/// Per-event parameters. The state machine's action consumes what it
/// needs; whatever survives is applied directly by the calling handler,
/// which keeps session bookkeeping correct in states whose table row
/// ignores the event.
#[derive(Default)]
struct EventArgs {
    session: Option<PduSession>,
    release_session_id: Option<u8>,
    target_ran: Option<String>,
    tai: Option<String>,
    paging_cause: Option<String>,
}

pub struct Amf {
    config: AmfConfig,
    store: Arc<UeContextStore>,
    registry: Arc<NfRegistry>,
    n1n2: Arc<N1N2Service>,
    stats: Arc<AmfStats>,
    tmsi_seq: AtomicU32,
}

impl Amf {
    pub fn new(config: AmfConfig) -> (Arc<Self>, mpsc::Receiver<IncomingMessage>) {
        let (n1n2, inbound) = N1N2Service::new();
        let amf = Arc::new(Self {
            config,
            store: Arc::new(UeContextStore::new()),
            registry: Arc::new(NfRegistry::new()),
            n1n2,
            stats: Arc::new(AmfStats::new()),
            tmsi_seq: AtomicU32::new(0),
        });
        (amf, inbound)
    }

    pub fn config(&self) -> &AmfConfig {
        &self.config
    }

    pub fn store(&self) -> &UeContextStore {
        &self.store
    }

    pub fn registry(&self) -> &NfRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &AmfStats {
        &self.stats
    }

    pub fn n1n2(&self) -> &N1N2Service {
        &self.n1n2
    }

    pub fn n1n2_handle(&self) -> Arc<N1N2Service> {
        Arc::clone(&self.n1n2)
    }

    /// Global AMF state label echoed in SBI responses. Per-UE state is
    /// reported instead whenever a request resolves to a UE.
    pub fn state_label(&self) -> String {
        "OPERATIONAL".to_string()
    }

    pub fn statistics(&self) -> StatsReport {
        self.stats
            .report(self.n1n2.n1_message_count(), self.n1n2.n2_message_count())
    }

    /// Register the self NF entry plus the simulated peer NFs, then open
    /// the N1/N2 service for traffic.
    pub fn bootstrap(&self) -> anyhow::Result<()> {
        self.register_self_nf()?;
        self.register_peer_nfs()?;
        self.n1n2.start();
        log::info!(
            "[amfd] AMF initialized with instance id {}",
            self.config.amf_instance_id
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        self.n1n2.stop();
        if self.registry.deregister(&self.config.amf_instance_id).is_ok() {
            log::info!("[amfd] self NF entry deregistered");
        }
        log::info!("[amfd] AMF shut down");
    }

    fn register_self_nf(&self) -> anyhow::Result<()> {
        let mut amf_nf = NfInstance::new(&self.config.amf_instance_id, NfType::Amf);
        amf_nf.plmn_id = self.config.plmn_id.clone();
        amf_nf.snssai_list = self.config.supported_slices.clone();
        amf_nf.tai_list = self.config.tai_list.clone();
        amf_nf.fqdn = "amf.5gc.mnc001.mcc460.3gppnetwork.org".to_string();
        for name in ["namf-comm", "namf-evts", "namf-mt", "namf-loc"] {
            amf_nf.add_service(NfService {
                service_instance_id: format!("{}-{name}", self.config.amf_instance_id),
                service_name: name.to_string(),
                versions: vec!["v1".to_string()],
                scheme: "http".to_string(),
                fqdn: amf_nf.fqdn.clone(),
                ipv4_address: self.config.sbi_bind_address.clone(),
                port: self.config.sbi_port,
                api_prefix: format!("/{name}/v1"),
            });
        }
        self.registry.register(amf_nf)?;
        log::info!(
            "[amfd] registered self with NRF at {}",
            self.config.nrf_uri
        );
        Ok(())
    }

    /// Pre-register peer NFs so selection works before any real NRF
    /// exchange happens; a production deployment would learn these
    /// through discovery.
    fn register_peer_nfs(&self) -> anyhow::Result<()> {
        let peers: [(&str, NfType, &str); 5] = [
            ("smf-001", NfType::Smf, "nsmf-pdusession"),
            ("upf-001", NfType::Upf, "nupf-service"),
            ("ausf-001", NfType::Ausf, "nausf-auth"),
            ("udm-001", NfType::Udm, "nudm-sdm"),
            ("pcf-001", NfType::Pcf, "npcf-am-policy"),
        ];
        for (id, nf_type, service) in peers {
            let mut nf = NfInstance::new(id, nf_type);
            nf.plmn_id = self.config.plmn_id.clone();
            nf.snssai_list = self.config.supported_slices.clone();
            if nf_type == NfType::Smf {
                nf.supported_dnns = vec!["internet".to_string(), "ims".to_string()];
            }
            nf.add_service(NfService {
                service_instance_id: format!("{id}-{service}"),
                service_name: service.to_string(),
                versions: vec!["v1".to_string()],
                scheme: "http".to_string(),
                ..Default::default()
            });
            self.registry.register(nf)?;
        }
        log::info!("[amfd] pre-registered {} peer NF instances", 5);
        Ok(())
    }

    // ---- NF selection helpers ----

    pub fn select_smf_for_session(&self, dnn: &str, snssai: &str) -> Option<NfInstance> {
        let query = NfQuery {
            target_type: Some(NfType::Smf),
            plmn_id: Some(self.config.plmn_id.clone()),
            snssai: Some(snssai.to_string()),
            dnn: Some(dnn.to_string()),
            ..Default::default()
        };
        self.registry.discover(&query).into_iter().next()
    }

    pub fn select_ausf_for_authentication(&self) -> Option<NfInstance> {
        self.registry.select(NfType::Ausf, &self.config.plmn_id)
    }

    // ---- SBI entry point ----

    pub fn handle_sbi(&self, msg: &SbiMessage) -> SbiOutcome {
        self.stats.inc_sbi_messages();
        log::info!(
            "[amfd] sbi <- {:?} {:?} {}",
            msg.method,
            msg.message_type,
            msg.uri
        );
        let result = match msg.message_type {
            SbiMessageType::UeContextCreateRequest => self.sbi_ue_context_create(msg),
            SbiMessageType::UeContextUpdateRequest => self.sbi_ue_context_update(msg),
            SbiMessageType::UeContextReleaseRequest => self.sbi_ue_context_release(msg),
            SbiMessageType::UeAuthenticationRequest => self.sbi_ue_authentication(msg),
            SbiMessageType::PduSessionCreateSmContextRequest => self.sbi_session_create(msg),
            SbiMessageType::PduSessionUpdateSmContextRequest => self.sbi_session_update(msg),
            SbiMessageType::PduSessionReleaseSmContextRequest => self.sbi_session_release(msg),
            SbiMessageType::AmPolicyControlCreateRequest => self.sbi_policy_create(msg),
            SbiMessageType::AmPolicyControlDeleteRequest => self.sbi_policy_delete(msg),
            SbiMessageType::NfRegisterRequest => self.sbi_nf_register(msg),
            SbiMessageType::NfUpdateRequest => self.sbi_nf_heartbeat(msg),
            SbiMessageType::NfDeregisterRequest => self.sbi_nf_deregister(msg),
            SbiMessageType::NfDiscoverRequest => self.sbi_nf_discover(msg),
            other => {
                log::debug!("[amfd] sbi: no handler for {other:?}");
                Ok(SbiOutcome::ok(200, self.state_label()))
            }
        };
        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("[amfd] sbi: {} {} -> {}", msg.uri, err, err.status_code());
                SbiOutcome::ok(err.status_code(), self.state_label())
                    .with("error", json!(err.to_string()))
            }
        }
    }

    fn sbi_ue_context_create(&self, msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        let body = msg
            .body_json()
            .map_err(|e| AmfError::Malformed(e.to_string()))?;
        let supi = supi_from_body(&body)
            .ok_or_else(|| AmfError::Malformed("missing supi".to_string()))?;
        let emergency = body
            .get("registrationType")
            .and_then(Value::as_str)
            .map(|t| t == "emergency")
            .unwrap_or(false)
            || body.get("emergency").and_then(Value::as_bool).unwrap_or(false);

        if let Some(ue) = self.store.get(&supi) {
            if ue.state != UeState::Deregistered {
                return Err(AmfError::Duplicate(format!("UE context exists for {supi}")));
            }
        } else {
            if self.store.count() >= self.config.max_ue_connections {
                return Err(AmfError::CapacityExceeded);
            }
            self.store
                .create(&supi)
                .map_err(|e| AmfError::Duplicate(e.to_string()))?;
        }

        let guti = self.generate_guti();
        self.store
            .assign_guti(&supi, &guti)
            .map_err(|_| AmfError::UeNotFound(supi.clone()))?;

        let (state, outbound) = {
            let mut ue = self
                .store
                .get(&supi)
                .ok_or_else(|| AmfError::UeNotFound(supi.clone()))?;
            ue.identifiers.tmsi = guti.rsplit('-').next().unwrap_or_default().to_string();
            if let Some(pei) = body.get("pei").and_then(Value::as_str) {
                ue.identifiers.pei = pei.to_string();
            }
            if let Some(gpsi) = body.get("gpsi").and_then(Value::as_str) {
                ue.identifiers.gpsi = gpsi.to_string();
            }
            ue.subscription.subscribed_slices = self.config.supported_slices.clone();
            ue.mobility.allowed_nssai = self.config.supported_slices.clone();
            ue.mobility.configured_nssai = self.config.supported_slices.clone();
            ue.location.tai = body
                .get("tai")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| self.config.tai_list.first().cloned())
                .unwrap_or_default();
            ue.access.ran_node_id = body
                .get("ranNodeId")
                .and_then(Value::as_str)
                .unwrap_or("gnb-001")
                .to_string();
            ue.access.access_type = "3GPP_ACCESS".to_string();

            let event = if emergency {
                UeEvent::EmergencyRegistration
            } else {
                UeEvent::RegistrationRequest
            };
            let mut args = EventArgs::default();
            let outbound = self.drive(&mut ue, event, &mut args);
            (ue.state, outbound)
        };
        self.emit_all(outbound);

        Ok(SbiOutcome::ok(201, state.to_string())
            .with("ueContextId", json!(supi))
            .with("guti", json!(guti)))
    }

    fn sbi_ue_context_update(&self, msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        let body = msg
            .body_json()
            .map_err(|e| AmfError::Malformed(e.to_string()))?;
        let supi = supi_from_uri(&msg.uri, "/ue-contexts/")
            .or_else(|| supi_from_body(&body))
            .ok_or_else(|| AmfError::Malformed("missing supi".to_string()))?;

        let (state, outbound) = {
            let mut ue = self
                .store
                .get(&supi)
                .ok_or_else(|| AmfError::UeNotFound(supi.clone()))?;
            let mut args = EventArgs {
                tai: body.get("tai").and_then(Value::as_str).map(str::to_string),
                ..Default::default()
            };
            let outbound = self.drive(&mut ue, UeEvent::TrackingAreaUpdate, &mut args);
            // Connected UEs ignore the mobility event; the location
            // update itself still applies.
            if let Some(tai) = args.tai.take() {
                ue.update_location(&tai);
            }
            if let Some(ran) = body.get("ranNodeId").and_then(Value::as_str) {
                ue.access.ran_node_id = ran.to_string();
            }
            (ue.state, outbound)
        };
        self.emit_all(outbound);

        Ok(SbiOutcome::ok(200, state.to_string()).with("ueContextId", json!(supi)))
    }

    fn sbi_ue_context_release(&self, msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        let body = msg
            .body_json()
            .map_err(|e| AmfError::Malformed(e.to_string()))?;
        let supi = supi_from_uri(&msg.uri, "/ue-contexts/")
            .or_else(|| supi_from_uri(&msg.uri, "/deregistrations/"))
            .or_else(|| supi_from_body(&body))
            .ok_or_else(|| AmfError::Malformed("missing supi".to_string()))?;

        let (state, outbound) = {
            let mut ue = self
                .store
                .get(&supi)
                .ok_or_else(|| AmfError::UeNotFound(supi.clone()))?;
            let mut args = EventArgs::default();
            let outbound = self.drive(&mut ue, UeEvent::DeregisterRequest, &mut args);
            (ue.state, outbound)
        };
        self.emit_all(outbound);

        Ok(SbiOutcome::ok(200, state.to_string()).with("released", json!(true)))
    }

    fn sbi_ue_authentication(&self, msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        let body = msg
            .body_json()
            .map_err(|e| AmfError::Malformed(e.to_string()))?;
        let supi = supi_from_body(&body)
            .ok_or_else(|| AmfError::Malformed("missing supi".to_string()))?;

        let ausf = self
            .select_ausf_for_authentication()
            .ok_or(AmfError::NoHealthyNf("AUSF"))?;
        self.stats.inc_auth_attempts();

        let (state, outbound) = {
            let mut ue = self
                .store
                .get(&supi)
                .ok_or_else(|| AmfError::UeNotFound(supi.clone()))?;
            let mut args = EventArgs::default();
            let outbound = self.drive(&mut ue, UeEvent::AuthenticationRequest, &mut args);
            (ue.state, outbound)
        };
        self.emit_all(outbound);

        Ok(SbiOutcome::ok(200, state.to_string())
            .with("authCtxId", json!(uuid::Uuid::new_v4().to_string()))
            .with("ausfId", json!(ausf.instance_id)))
    }

    fn sbi_session_create(&self, msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        let body = msg
            .body_json()
            .map_err(|e| AmfError::Malformed(e.to_string()))?;
        let supi = supi_from_body(&body)
            .ok_or_else(|| AmfError::Malformed("missing supi".to_string()))?;
        let dnn = body
            .get("dnn")
            .and_then(Value::as_str)
            .unwrap_or("internet")
            .to_string();

        let (state, session_id, outbound) = {
            let mut ue = self
                .store
                .get(&supi)
                .ok_or_else(|| AmfError::UeNotFound(supi.clone()))?;
            if ue.state == UeState::Deregistered {
                return Err(AmfError::StateDisallowed("UE not registered".to_string()));
            }

            let snssai = body
                .get("sNssai")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| ue.mobility.allowed_nssai.first().cloned())
                .ok_or_else(|| {
                    AmfError::StateDisallowed("UE has no allowed slices".to_string())
                })?;
            if !ue.mobility.allowed_nssai.iter().any(|s| s == &snssai) {
                return Err(AmfError::StateDisallowed(format!(
                    "slice {snssai} not in allowed NSSAI"
                )));
            }

            let smf = self
                .select_smf_for_session(&dnn, &snssai)
                .ok_or(AmfError::NoHealthyNf("SMF"))?;
            let upf_id = self
                .registry
                .select(NfType::Upf, &self.config.plmn_id)
                .map(|nf| nf.instance_id)
                .unwrap_or_default();

            let session_id = body
                .get("pduSessionId")
                .and_then(Value::as_u64)
                .map(|v| v as u8)
                .unwrap_or_else(|| ue.next_session_id());
            if ue.sessions.contains_key(&session_id) {
                return Err(AmfError::Duplicate(format!("pdu session {session_id}")));
            }

            let session = PduSession {
                id: session_id,
                dnn: dnn.clone(),
                s_nssai: snssai,
                pdu_type: body
                    .get("pduType")
                    .and_then(Value::as_str)
                    .unwrap_or("IPv4")
                    .to_string(),
                smf_id: smf.instance_id,
                upf_id,
                state: PduSessionState::Active,
                created_at: SystemTime::now(),
            };
            let mut args = EventArgs {
                session: Some(session),
                ..Default::default()
            };
            let outbound = self.drive(&mut ue, UeEvent::PduSessionEstablishmentRequest, &mut args);
            // A Connected UE's table row ignores the event; the session
            // is still established.
            if let Some(session) = args.session.take() {
                ue.add_pdu_session(session);
                self.stats.inc_pdu_sessions();
            }
            (ue.state, session_id, outbound)
        };
        self.emit_all(outbound);

        Ok(SbiOutcome::ok(201, state.to_string())
            .with("smContextId", json!(format!("{supi}:{session_id}")))
            .with("pduSessionId", json!(session_id)))
    }

    fn sbi_session_update(&self, msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        let body = msg
            .body_json()
            .map_err(|e| AmfError::Malformed(e.to_string()))?;
        let (supi, session_id) = session_ref(&msg.uri, &body)
            .ok_or_else(|| AmfError::Malformed("missing sm context reference".to_string()))?;

        let state = {
            let mut ue = self
                .store
                .get(&supi)
                .ok_or_else(|| AmfError::UeNotFound(supi.clone()))?;
            let session = ue
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| {
                    AmfError::ResourceNotFound("pdu session", session_id.to_string())
                })?;
            if let Some(s) = body.get("state").and_then(Value::as_str) {
                session.state = match s {
                    "INACTIVE" => PduSessionState::Inactive,
                    "RELEASING" => PduSessionState::Releasing,
                    _ => PduSessionState::Active,
                };
            }
            ue.touch();
            ue.state
        };

        Ok(SbiOutcome::ok(200, state.to_string())
            .with("smContextId", json!(format!("{supi}:{session_id}"))))
    }

    fn sbi_session_release(&self, msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        let body = msg
            .body_json()
            .map_err(|e| AmfError::Malformed(e.to_string()))?;
        let (supi, session_id) = session_ref(&msg.uri, &body)
            .ok_or_else(|| AmfError::Malformed("missing sm context reference".to_string()))?;

        let (state, outbound) = {
            let mut ue = self
                .store
                .get(&supi)
                .ok_or_else(|| AmfError::UeNotFound(supi.clone()))?;
            let mut args = EventArgs {
                release_session_id: Some(session_id),
                ..Default::default()
            };
            let outbound = self.drive(&mut ue, UeEvent::PduSessionReleaseRequest, &mut args);
            if let Some(id) = args.release_session_id.take() {
                ue.remove_pdu_session(id);
            }
            (ue.state, outbound)
        };
        self.emit_all(outbound);

        Ok(SbiOutcome::ok(200, state.to_string()).with("released", json!(true)))
    }

    fn sbi_policy_create(&self, _msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        Ok(SbiOutcome::ok(201, self.state_label())
            .with("policyId", json!(uuid::Uuid::new_v4().to_string())))
    }

    fn sbi_policy_delete(&self, _msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        Ok(SbiOutcome::ok(200, self.state_label()).with("released", json!(true)))
    }

    // ---- NRF management / discovery routes, operating on the local registry ----

    fn sbi_nf_register(&self, msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        let profile: NfProfile = serde_json::from_str(&msg.body)
            .map_err(|e| AmfError::Malformed(e.to_string()))?;
        let id = profile.nf_instance_id.clone();
        let nf: NfInstance = profile.into();
        match self.registry.register(nf.clone()) {
            Ok(()) => Ok(SbiOutcome::ok(201, self.state_label())
                .with("nfInstanceId", json!(id))),
            Err(_) => {
                // PUT semantics: re-registration replaces the profile.
                self.registry
                    .update(&id, nf)
                    .map_err(|e| AmfError::Malformed(e.to_string()))?;
                Ok(SbiOutcome::ok(200, self.state_label()).with("nfInstanceId", json!(id)))
            }
        }
    }

    fn sbi_nf_heartbeat(&self, msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        let body = msg
            .body_json()
            .map_err(|e| AmfError::Malformed(e.to_string()))?;
        let id = supi_from_uri(&msg.uri, "/nf-instances/")
            .or_else(|| {
                body.get("nfInstanceId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| AmfError::Malformed("missing nfInstanceId".to_string()))?;
        self.registry
            .heartbeat(&id)
            .map_err(|_| AmfError::ResourceNotFound("nf instance", id.clone()))?;
        if let Some(load) = body.get("load").and_then(Value::as_u64) {
            let _ = self.registry.update_load(&id, load as u32);
        }
        Ok(SbiOutcome::ok(200, self.state_label()).with("nfInstanceId", json!(id)))
    }

    fn sbi_nf_deregister(&self, msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        let id = supi_from_uri(&msg.uri, "/nf-instances/")
            .ok_or_else(|| AmfError::Malformed("missing nfInstanceId".to_string()))?;
        self.registry
            .deregister(&id)
            .map_err(|_| AmfError::ResourceNotFound("nf instance", id.clone()))?;
        Ok(SbiOutcome::ok(200, self.state_label()).with("nfInstanceId", json!(id)))
    }

    fn sbi_nf_discover(&self, msg: &SbiMessage) -> Result<SbiOutcome, AmfError> {
        let params = query_params(&msg.uri);
        let query = NfQuery {
            target_type: params
                .get("target-nf-type")
                .and_then(|t| t.parse::<NfType>().ok()),
            service_name: params.get("service-names").cloned(),
            plmn_id: params.get("target-plmn-list").cloned(),
            snssai: params.get("snssais").cloned(),
            dnn: params.get("dnn").cloned(),
        };
        let found = self.registry.discover(&query);
        let profiles: Vec<Value> = found
            .iter()
            .map(|nf| serde_json::to_value(NfProfile::from(nf)).unwrap_or(Value::Null))
            .collect();
        Ok(SbiOutcome::ok(200, self.state_label()).with("nfInstances", json!(profiles)))
    }

    // ---- N1 / N2 inbound ----

    pub fn handle_incoming(&self, msg: IncomingMessage) {
        match msg {
            IncomingMessage::N1(m) => self.handle_n1(m),
            IncomingMessage::N2(m) => self.handle_n2(m),
        }
    }

    pub fn handle_n1(&self, msg: N1Message) {
        let event = match msg.message_type {
            N1MessageType::RegistrationRequest => UeEvent::RegistrationRequest,
            N1MessageType::DeregistrationRequestUeOrig
            | N1MessageType::DeregistrationRequestUeTerm => UeEvent::DeregisterRequest,
            N1MessageType::ServiceRequest => UeEvent::ServiceRequest,
            N1MessageType::AuthenticationResponse => UeEvent::AuthenticationResponse,
            N1MessageType::SecurityModeComplete => UeEvent::SecurityModeComplete,
            other => {
                log::debug!("[amfd] n1: no handler for {other}");
                return;
            }
        };
        if msg.ue_id.is_empty() {
            log::warn!("[amfd] n1: {} without ue id dropped", msg.message_type);
            return;
        }
        if event == UeEvent::RegistrationRequest && self.store.get(&msg.ue_id).is_none() {
            if self.store.create(&msg.ue_id).is_ok() {
                let guti = self.generate_guti();
                let _ = self.store.assign_guti(&msg.ue_id, &guti);
            }
        }
        self.drive_supi(&msg.ue_id, event, EventArgs::default());
    }

    pub fn handle_n2(&self, msg: N2Message) {
        match msg.message_type {
            N2MessageType::InitialContextSetupResponse => {
                log::info!(
                    "[amfd] n2: initial context setup completed on {}",
                    msg.ran_node_id
                );
            }
            N2MessageType::UeContextReleaseComplete => {
                if let Some(supi) = msg.ies.get("ueId") {
                    self.drive_supi(supi, UeEvent::ConnectionRelease, EventArgs::default());
                }
            }
            N2MessageType::HandoverRequestAcknowledge => {
                log::info!("[amfd] n2: handover acknowledged by {}", msg.ran_node_id);
            }
            N2MessageType::HandoverNotify => {
                if let Some(supi) = msg.ies.get("ueId") {
                    let args = EventArgs {
                        target_ran: Some(msg.ran_node_id.clone()),
                        ..Default::default()
                    };
                    self.drive_supi(supi, UeEvent::HandoverComplete, args);
                }
            }
            N2MessageType::NgSetupRequest => {
                let response = N2Message::new(N2MessageType::NgSetupResponse, &msg.ran_node_id)
                    .with_ie("amfName", &self.config.amf_name);
                self.n1n2.send_n2(&response);
            }
            other => {
                log::debug!("[amfd] n2: no handler for {other}");
            }
        }
    }

    fn drive_supi(&self, supi: &str, event: UeEvent, mut args: EventArgs) {
        let outbound = {
            let Some(mut ue) = self.store.get(supi) else {
                log::warn!("[amfd] no UE context for {supi}, dropping {event:?}");
                return;
            };
            self.drive(&mut ue, event, &mut args)
        };
        self.emit_all(outbound);
    }

    // ---- transition execution ----

    /// Run one event through the table and apply its side effects under
    /// the caller's UE guard. Returns the adapter messages to emit once
    /// the guard is dropped.
    fn drive(&self, ue: &mut UeContext, event: UeEvent, args: &mut EventArgs) -> Vec<Outbound> {
        let prev = ue.state;
        let t = transition(prev, event);
        let supi = ue.identifiers.supi.clone();
        let mut out = Vec::new();

        match t.action {
            Action::None => {}
            Action::Register { emergency } => {
                ue.enter_connected();
                ue.subscription.emergency = emergency;
                self.stats.inc_registrations();
                out.push(Outbound::N1(
                    N1Message::new(N1MessageType::RegistrationAccept, &supi)
                        .with_ie("registrationResult", "3GPP_ACCESS"),
                ));
                log::info!(
                    "[amfd] UE {supi} registered{}",
                    if emergency { " (emergency)" } else { "" }
                );
            }
            Action::SetupAnContext => {
                ue.enter_connected();
                let ran = serving_ran(ue);
                out.push(Outbound::N2(
                    N2Message::new(N2MessageType::InitialContextSetupRequest, &ran)
                        .with_ie("ueId", &supi),
                ));
            }
            Action::CreatePduSession => {
                if let Some(session) = args.session.take() {
                    ue.add_pdu_session(session);
                    self.stats.inc_pdu_sessions();
                }
                ue.enter_connected();
            }
            Action::UpdateRanNode => {
                if let Some(target) = args.target_ran.take() {
                    ue.access.ran_node_id = target;
                }
                ue.enter_connected();
                self.stats.inc_handovers();
            }
            Action::Deregister => {
                let was_connected = ue.access.connected;
                let ran = serving_ran(ue);
                ue.enter_deregistered();
                if was_connected {
                    out.push(Outbound::N2(
                        N2Message::new(N2MessageType::UeContextReleaseCommand, &ran)
                            .with_ie("ueId", &supi)
                            .with_ie("releaseReason", "deregistration"),
                    ));
                }
                out.push(Outbound::N1(N1Message::new(
                    N1MessageType::DeregistrationAccept,
                    &supi,
                )));
                log::info!("[amfd] UE {supi} deregistered");
            }
            Action::UpdateLocation => {
                if let Some(tai) = args.tai.take() {
                    ue.update_location(&tai);
                } else {
                    ue.touch();
                }
                out.push(Outbound::N1(
                    N1Message::new(N1MessageType::RegistrationAccept, &supi)
                        .with_ie("registrationType", "periodic-updating"),
                ));
            }
            Action::EmitPaging => {
                let ran = serving_ran(ue);
                let cause = args
                    .paging_cause
                    .take()
                    .unwrap_or_else(|| "mt-call".to_string());
                out.push(Outbound::N2(
                    N2Message::new(N2MessageType::Paging, &ran)
                        .with_ie("ueId", &supi)
                        .with_ie("pagingCause", &cause)
                        .with_ie("pagingPriority", "normal"),
                ));
            }
            Action::ReleaseConnection => {
                let ran = serving_ran(ue);
                ue.enter_idle();
                out.push(Outbound::N2(
                    N2Message::new(N2MessageType::UeContextReleaseCommand, &ran)
                        .with_ie("ueId", &supi)
                        .with_ie("releaseReason", "normal"),
                ));
            }
            Action::ReleaseSession => {
                if let Some(id) = args.release_session_id.take() {
                    ue.remove_pdu_session(id);
                }
                ue.enter_idle();
            }
            Action::CompleteHandover => {
                if let Some(target) = args.target_ran.take() {
                    ue.access.ran_node_id = target;
                }
                ue.enter_idle();
                self.stats.inc_handovers();
            }
            Action::SecurityProcedure => {
                match event {
                    UeEvent::AuthenticationRequest => {
                        out.push(Outbound::N1(N1Message::new(
                            N1MessageType::AuthenticationRequest,
                            &supi,
                        )));
                    }
                    UeEvent::AuthenticationResponse => {
                        ue.security.authenticated = true;
                        ue.security.last_auth = Some(SystemTime::now());
                        self.stats.inc_auth_successes();
                        out.push(Outbound::N1(
                            N1Message::new(N1MessageType::SecurityModeCommand, &supi).with_ie(
                                "algorithms",
                                &self.config.supported_algorithms.join(","),
                            ),
                        ));
                    }
                    UeEvent::SecurityModeCommand => {
                        out.push(Outbound::N1(N1Message::new(
                            N1MessageType::SecurityModeCommand,
                            &supi,
                        )));
                    }
                    UeEvent::SecurityModeComplete => {
                        ue.security.authenticated = true;
                    }
                    _ => {}
                }
                ue.touch();
            }
        }

        // The action handlers leave the context in the table's target
        // state; cover the pure-transition rows too.
        if ue.state != t.next {
            match t.next {
                UeState::Deregistered => ue.enter_deregistered(),
                UeState::RegisteredIdle => ue.enter_idle(),
                UeState::RegisteredConnected => ue.enter_connected(),
            }
        }

        // Connection gauge follows Connected entries and exits.
        if prev != UeState::RegisteredConnected && t.next == UeState::RegisteredConnected {
            self.stats.inc_active_connections();
        } else if prev == UeState::RegisteredConnected && t.next != UeState::RegisteredConnected {
            self.stats.dec_active_connections();
        }

        out
    }

    fn emit_all(&self, outbound: Vec<Outbound>) {
        for msg in outbound {
            match msg {
                Outbound::N1(m) => {
                    self.n1n2.send_n1(&m);
                }
                Outbound::N2(m) => {
                    self.n1n2.send_n2(&m);
                }
            }
        }
    }

    fn generate_guti(&self) -> String {
        let tmsi = self.tmsi_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!(
            "{}-{}{}{}-{tmsi:08x}",
            self.config.plmn_id,
            self.config.amf_region_id,
            self.config.amf_set_id,
            self.config.amf_pointer
        )
    }

    // ---- monitoring ----

    /// Recompute the derived statistics, push the load into the self NF
    /// entry and sweep idle UE contexts. Runs on the monitor tick.
    pub fn refresh_statistics(&self) {
        let ue_contexts = self.store.count();
        let active_sessions = self.store.active_session_count();
        let (registered_nfs, healthy_nfs) = self.registry.counts();
        let load = if self.config.max_ue_connections == 0 {
            0
        } else {
            (self.stats.active_connections() * 100 / self.config.max_ue_connections) as u64
        };
        self.stats.refresh_gauges(
            ue_contexts,
            active_sessions,
            registered_nfs,
            healthy_nfs,
            load,
        );
        let _ = self
            .registry
            .update_load(&self.config.amf_instance_id, load as u32);

        let swept = self
            .store
            .sweep_inactive(Duration::from_secs(self.config.ue_inactivity_threshold));
        if swept > 0 {
            log::info!("[amfd] swept {swept} inactive UE contexts");
        }

        let report = self.statistics();
        log::info!(
            "[amfd] stats: ue={} conn={} sessions={} nf={}/{} load={}%",
            report.total_ue_contexts,
            report.active_ue_connections,
            report.active_pdu_sessions,
            report.healthy_nf_instances,
            report.registered_nf_instances,
            report.system_load
        );
    }
}

fn serving_ran(ue: &UeContext) -> String {
    if ue.access.ran_node_id.is_empty() {
        "gnb-001".to_string()
    } else {
        ue.access.ran_node_id.clone()
    }
}

fn supi_from_body(body: &Value) -> Option<String> {
    body.get("supi").and_then(Value::as_str).map(str::to_string)
}

/// Extract the path segment following `marker`, query string stripped.
fn supi_from_uri(uri: &str, marker: &str) -> Option<String> {
    let path = uri.split('?').next().unwrap_or(uri);
    let rest = &path[path.find(marker)? + marker.len()..];
    let segment = rest.split('/').next().unwrap_or("");
    (!segment.is_empty()).then(|| segment.to_string())
}

/// Resolve `(supi, sessionId)` from an `{supi}:{id}` sm-context path
/// segment or from the body fields.
fn session_ref(uri: &str, body: &Value) -> Option<(String, u8)> {
    let from_uri = supi_from_uri(uri, "/sm-contexts/")
        .or_else(|| supi_from_uri(uri, "/pdu-sessions/"))
        .and_then(|segment| {
            let (supi, id) = segment.rsplit_once(':')?;
            Some((supi.to_string(), id.parse::<u8>().ok()?))
        });
    from_uri.or_else(|| {
        let supi = supi_from_body(body)?;
        let id = body.get("pduSessionId").and_then(Value::as_u64)? as u8;
        Some((supi, id))
    })
}

fn query_params(uri: &str) -> std::collections::HashMap<String, String> {
    let mut params = std::collections::HashMap::new();
    if let Some((_, query)) = uri.split_once('?') {
        for pair in query.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                params.insert(k.to_string(), v.to_string());
            }
        }
    }
    params
}

/// Demultiplexer: inbound N1/N2 messages flow through here onto the
/// orchestrator, one at a time.
pub async fn run_demux(
    amf: Arc<Amf>,
    mut inbound: mpsc::Receiver<IncomingMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            msg = inbound.recv() => match msg {
                Some(m) => amf.handle_incoming(m),
                None => break,
            }
        }
    }
    log::info!("[amfd] demux stopped");
}

/// 30 s statistics tick.
pub async fn run_monitor(amf: Arc<Amf>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(MONITOR_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => amf.refresh_statistics(),
        }
    }
    log::info!("[amfd] monitor stopped");
}

/// 10 s NF health/expiry sweep tick.
pub async fn run_nf_sweeper(amf: Arc<Amf>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(NF_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                amf.registry().health_sweep();
                amf.registry().expire_sweep();
            }
        }
    }
    log::info!("[amfd] nf sweeper stopped");
}

/// Self NF heartbeat at the configured cadence.
pub async fn run_self_heartbeat(amf: Arc<Amf>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(amf.config().nf_heartbeat_interval.max(1));
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                let id = amf.config().amf_instance_id.clone();
                if amf.registry().heartbeat(&id).is_err() {
                    log::warn!("[amfd] self NF entry missing, heartbeat skipped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbi::{HttpMethod, SbiServiceType};

    fn test_amf() -> Arc<Amf> {
        let (amf, _inbound) = Amf::new(AmfConfig::default());
        amf.bootstrap().unwrap();
        amf
    }

    fn sbi(
        service: SbiServiceType,
        message_type: SbiMessageType,
        method: HttpMethod,
        uri: &str,
        body: &str,
    ) -> SbiMessage {
        SbiMessage::new(service, message_type, method, uri, body)
    }

    fn register_ue(amf: &Amf, supi: &str) -> SbiOutcome {
        amf.handle_sbi(&sbi(
            SbiServiceType::NamfCommunication,
            SbiMessageType::UeContextCreateRequest,
            HttpMethod::Post,
            "/namf-comm/v1/ue-contexts",
            &format!(r#"{{"supi":"{supi}"}}"#),
        ))
    }

    #[test]
    fn fresh_registration_via_sbi() {
        let amf = test_amf();
        let outcome = register_ue(&amf, "imsi-460001234567890");
        assert_eq!(outcome.status_code, 201);
        assert_eq!(outcome.amf_state, "REGISTERED_CONNECTED");
        assert_eq!(amf.store().count(), 1);
        assert_eq!(amf.stats().total_registrations(), 1);

        let ue = amf.store().get("imsi-460001234567890").unwrap();
        assert_eq!(ue.state, UeState::RegisteredConnected);
        assert!(ue.access.connected);
        assert!(!ue.identifiers.guti.is_empty());
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let amf = test_amf();
        register_ue(&amf, "imsi-460001234567890");
        let outcome = register_ue(&amf, "imsi-460001234567890");
        assert_eq!(outcome.status_code, 409);
        assert_eq!(amf.store().count(), 1);
        assert_eq!(amf.stats().total_registrations(), 1);
    }

    #[test]
    fn session_create_then_release() {
        let amf = test_amf();
        register_ue(&amf, "imsi-460001234567890");

        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NsmfPduSession,
            SbiMessageType::PduSessionCreateSmContextRequest,
            HttpMethod::Post,
            "/nsmf-pdusession/v1/sm-contexts",
            r#"{"supi":"imsi-460001234567890"}"#,
        ));
        assert_eq!(outcome.status_code, 201);
        let sm_context_id = outcome.extra["smContextId"].as_str().unwrap().to_string();
        assert_eq!(sm_context_id, "imsi-460001234567890:1");
        {
            let ue = amf.store().get("imsi-460001234567890").unwrap();
            assert_eq!(ue.sessions.len(), 1);
            assert_eq!(ue.sessions[&1].state, PduSessionState::Active);
            assert_eq!(ue.sessions[&1].smf_id, "smf-001");
        }
        assert_eq!(amf.stats().total_pdu_sessions(), 1);

        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NsmfPduSession,
            SbiMessageType::PduSessionReleaseSmContextRequest,
            HttpMethod::Delete,
            &format!("/nsmf-pdusession/v1/sm-contexts/{sm_context_id}"),
            "",
        ));
        assert_eq!(outcome.status_code, 200);
        let ue = amf.store().get("imsi-460001234567890").unwrap();
        assert!(ue.sessions.is_empty());
        assert_eq!(ue.state, UeState::RegisteredIdle);
    }

    #[test]
    fn session_create_requires_registration() {
        let amf = test_amf();
        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NsmfPduSession,
            SbiMessageType::PduSessionCreateSmContextRequest,
            HttpMethod::Post,
            "/nsmf-pdusession/v1/sm-contexts",
            r#"{"supi":"imsi-unknown"}"#,
        ));
        assert_eq!(outcome.status_code, 403);
        assert_eq!(amf.stats().total_pdu_sessions(), 0);
    }

    #[test]
    fn disallowed_slice_is_rejected() {
        let amf = test_amf();
        register_ue(&amf, "imsi-1");
        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NsmfPduSession,
            SbiMessageType::PduSessionCreateSmContextRequest,
            HttpMethod::Post,
            "/nsmf-pdusession/v1/sm-contexts",
            r#"{"supi":"imsi-1","sNssai":"SST:9,SD:ffffff"}"#,
        ));
        assert_eq!(outcome.status_code, 403);
    }

    #[test]
    fn malformed_body_is_400() {
        let amf = test_amf();
        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NamfCommunication,
            SbiMessageType::UeContextCreateRequest,
            HttpMethod::Post,
            "/namf-comm/v1/ue-contexts",
            "{oops",
        ));
        assert_eq!(outcome.status_code, 400);
        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NamfCommunication,
            SbiMessageType::UeContextCreateRequest,
            HttpMethod::Post,
            "/namf-comm/v1/ue-contexts",
            "{}",
        ));
        assert_eq!(outcome.status_code, 400);
    }

    #[test]
    fn capacity_limit_yields_503() {
        let mut config = AmfConfig::default();
        config.max_ue_connections = 1;
        let (amf, _inbound) = Amf::new(config);
        amf.bootstrap().unwrap();

        assert_eq!(register_ue(&amf, "imsi-1").status_code, 201);
        assert_eq!(register_ue(&amf, "imsi-2").status_code, 503);
        assert_eq!(amf.store().count(), 1);
    }

    #[test]
    fn release_deregisters_and_clears_sessions() {
        let amf = test_amf();
        register_ue(&amf, "imsi-1");
        amf.handle_sbi(&sbi(
            SbiServiceType::NsmfPduSession,
            SbiMessageType::PduSessionCreateSmContextRequest,
            HttpMethod::Post,
            "/nsmf-pdusession/v1/sm-contexts",
            r#"{"supi":"imsi-1"}"#,
        ));

        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NamfCommunication,
            SbiMessageType::UeContextReleaseRequest,
            HttpMethod::Delete,
            "/namf-comm/v1/ue-contexts/imsi-1",
            "",
        ));
        assert_eq!(outcome.status_code, 200);
        let ue = amf.store().get("imsi-1").unwrap();
        assert_eq!(ue.state, UeState::Deregistered);
        assert!(ue.sessions.is_empty());
        assert!(!ue.access.connected);
        assert_eq!(amf.stats().active_connections(), 0);
    }

    #[test]
    fn guti_index_resolves_registered_ue() {
        let amf = test_amf();
        let outcome = register_ue(&amf, "imsi-1");
        let guti = outcome.extra["guti"].as_str().unwrap();
        let ue = amf.store().get_by_guti(guti).unwrap();
        assert_eq!(ue.identifiers.supi, "imsi-1");
    }

    #[test]
    fn re_registration_after_deregistration_succeeds() {
        let amf = test_amf();
        register_ue(&amf, "imsi-1");
        amf.handle_sbi(&sbi(
            SbiServiceType::NamfCommunication,
            SbiMessageType::UeContextReleaseRequest,
            HttpMethod::Delete,
            "/namf-comm/v1/ue-contexts/imsi-1",
            "",
        ));
        let outcome = register_ue(&amf, "imsi-1");
        assert_eq!(outcome.status_code, 201);
        assert_eq!(amf.stats().total_registrations(), 2);
        assert_eq!(amf.store().count(), 1);
    }

    #[test]
    fn authentication_selects_ausf() {
        let amf = test_amf();
        register_ue(&amf, "imsi-1");
        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NausfUeAuthentication,
            SbiMessageType::UeAuthenticationRequest,
            HttpMethod::Post,
            "/nausf-auth/v1/ue-authentications",
            r#"{"supi":"imsi-1"}"#,
        ));
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.extra["ausfId"], "ausf-001");
        let report = amf.statistics();
        assert_eq!(report.total_auth_attempts, 1);
    }

    #[test]
    fn n1_service_request_reconnects_idle_ue() {
        let amf = test_amf();
        register_ue(&amf, "imsi-1");
        // Drop to idle through a connection release.
        amf.handle_n2(
            N2Message::new(N2MessageType::UeContextReleaseComplete, "gnb-001")
                .with_ie("ueId", "imsi-1"),
        );
        assert_eq!(
            amf.store().get("imsi-1").unwrap().state,
            UeState::RegisteredIdle
        );

        amf.handle_n1(N1Message::new(N1MessageType::ServiceRequest, "imsi-1"));
        let ue = amf.store().get("imsi-1").unwrap();
        assert_eq!(ue.state, UeState::RegisteredConnected);
    }

    #[test]
    fn handover_notify_records_target_ran() {
        let amf = test_amf();
        register_ue(&amf, "imsi-1");
        amf.handle_n2(
            N2Message::new(N2MessageType::HandoverNotify, "gnb-002").with_ie("ueId", "imsi-1"),
        );
        let ue = amf.store().get("imsi-1").unwrap();
        assert_eq!(ue.access.ran_node_id, "gnb-002");
        assert_eq!(ue.state, UeState::RegisteredIdle);
    }

    #[test]
    fn nf_discovery_route_returns_profiles() {
        let amf = test_amf();
        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NrfNfDiscovery,
            SbiMessageType::NfDiscoverRequest,
            HttpMethod::Get,
            "/nnrf-disc/v1/nf-instances?target-nf-type=SMF",
            "",
        ));
        assert_eq!(outcome.status_code, 200);
        let instances = outcome.extra["nfInstances"].as_array().unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0]["nfInstanceId"], "smf-001");
    }

    #[test]
    fn nf_register_and_heartbeat_routes() {
        let amf = test_amf();
        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NrfNfManagement,
            SbiMessageType::NfRegisterRequest,
            HttpMethod::Put,
            "/nnrf-nfm/v1/nf-instances/smf-002",
            r#"{"nfInstanceId":"smf-002","nfType":"SMF","priority":5}"#,
        ));
        assert_eq!(outcome.status_code, 201);
        assert!(amf.registry().get("smf-002").is_some());

        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NrfNfManagement,
            SbiMessageType::NfUpdateRequest,
            HttpMethod::Patch,
            "/nnrf-nfm/v1/nf-instances/smf-002",
            r#"{"load":40}"#,
        ));
        assert_eq!(outcome.status_code, 200);
        assert_eq!(amf.registry().get("smf-002").unwrap().load, 40);

        let outcome = amf.handle_sbi(&sbi(
            SbiServiceType::NrfNfManagement,
            SbiMessageType::NfUpdateRequest,
            HttpMethod::Patch,
            "/nnrf-nfm/v1/nf-instances/nf-missing",
            "",
        ));
        assert_eq!(outcome.status_code, 404);
    }

    #[test]
    fn statistics_refresh_updates_load() {
        let mut config = AmfConfig::default();
        config.max_ue_connections = 10;
        let (amf, _inbound) = Amf::new(config);
        amf.bootstrap().unwrap();
        register_ue(&amf, "imsi-1");

        amf.refresh_statistics();
        let report = amf.statistics();
        assert_eq!(report.total_ue_contexts, 1);
        assert_eq!(report.system_load, 10);
        assert_eq!(
            amf.registry().get("amf-001").unwrap().load,
            10,
            "self NF entry carries the reported load"
        );
        // All bootstrap NFs plus the self entry are healthy.
        assert_eq!(report.registered_nf_instances, 6);
        assert_eq!(report.healthy_nf_instances, 6);
    }
}
