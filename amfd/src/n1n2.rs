//! N1 (UE NAS) and N2 (gNB) adapters.
//!
//! N1 carries no wire port here: its messages are synthesized in-process
//! from SBI inputs. N2 is a TCP listener speaking a line-oriented text
//! framing in place of SCTP/NGAP. Inbound messages from either interface
//! flow through one typed channel into the orchestrator's demultiplexer
//! task instead of per-type callback maps.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum N1MessageType {
    RegistrationRequest,
    RegistrationAccept,
    RegistrationReject,
    DeregistrationRequestUeOrig,
    DeregistrationRequestUeTerm,
    DeregistrationAccept,
    ServiceRequest,
    ServiceAccept,
    ServiceReject,
    AuthenticationRequest,
    AuthenticationResponse,
    AuthenticationFailure,
    SecurityModeCommand,
    SecurityModeComplete,
    SecurityModeReject,
    IdentityRequest,
    IdentityResponse,
    ConfigurationUpdateCommand,
    ConfigurationUpdateComplete,
    DlNasTransport,
    UlNasTransport,
}

impl fmt::Display for N1MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            N1MessageType::RegistrationRequest => "REGISTRATION_REQUEST",
            N1MessageType::RegistrationAccept => "REGISTRATION_ACCEPT",
            N1MessageType::RegistrationReject => "REGISTRATION_REJECT",
            N1MessageType::DeregistrationRequestUeOrig => "DEREGISTRATION_REQUEST_UE_ORIG",
            N1MessageType::DeregistrationRequestUeTerm => "DEREGISTRATION_REQUEST_UE_TERM",
            N1MessageType::DeregistrationAccept => "DEREGISTRATION_ACCEPT",
            N1MessageType::ServiceRequest => "SERVICE_REQUEST",
            N1MessageType::ServiceAccept => "SERVICE_ACCEPT",
            N1MessageType::ServiceReject => "SERVICE_REJECT",
            N1MessageType::AuthenticationRequest => "AUTHENTICATION_REQUEST",
            N1MessageType::AuthenticationResponse => "AUTHENTICATION_RESPONSE",
            N1MessageType::AuthenticationFailure => "AUTHENTICATION_FAILURE",
            N1MessageType::SecurityModeCommand => "SECURITY_MODE_COMMAND",
            N1MessageType::SecurityModeComplete => "SECURITY_MODE_COMPLETE",
            N1MessageType::SecurityModeReject => "SECURITY_MODE_REJECT",
            N1MessageType::IdentityRequest => "IDENTITY_REQUEST",
            N1MessageType::IdentityResponse => "IDENTITY_RESPONSE",
            N1MessageType::ConfigurationUpdateCommand => "CONFIGURATION_UPDATE_COMMAND",
            N1MessageType::ConfigurationUpdateComplete => "CONFIGURATION_UPDATE_COMPLETE",
            N1MessageType::DlNasTransport => "DL_NAS_TRANSPORT",
            N1MessageType::UlNasTransport => "UL_NAS_TRANSPORT",
        };
        f.write_str(s)
    }
}

impl FromStr for N1MessageType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "REGISTRATION_REQUEST" => N1MessageType::RegistrationRequest,
            "REGISTRATION_ACCEPT" => N1MessageType::RegistrationAccept,
            "REGISTRATION_REJECT" => N1MessageType::RegistrationReject,
            "DEREGISTRATION_REQUEST_UE_ORIG" => N1MessageType::DeregistrationRequestUeOrig,
            "DEREGISTRATION_REQUEST_UE_TERM" => N1MessageType::DeregistrationRequestUeTerm,
            "DEREGISTRATION_ACCEPT" => N1MessageType::DeregistrationAccept,
            "SERVICE_REQUEST" => N1MessageType::ServiceRequest,
            "SERVICE_ACCEPT" => N1MessageType::ServiceAccept,
            "SERVICE_REJECT" => N1MessageType::ServiceReject,
            "AUTHENTICATION_REQUEST" => N1MessageType::AuthenticationRequest,
            "AUTHENTICATION_RESPONSE" => N1MessageType::AuthenticationResponse,
            "AUTHENTICATION_FAILURE" => N1MessageType::AuthenticationFailure,
            "SECURITY_MODE_COMMAND" => N1MessageType::SecurityModeCommand,
            "SECURITY_MODE_COMPLETE" => N1MessageType::SecurityModeComplete,
            "SECURITY_MODE_REJECT" => N1MessageType::SecurityModeReject,
            "IDENTITY_REQUEST" => N1MessageType::IdentityRequest,
            "IDENTITY_RESPONSE" => N1MessageType::IdentityResponse,
            "CONFIGURATION_UPDATE_COMMAND" => N1MessageType::ConfigurationUpdateCommand,
            "CONFIGURATION_UPDATE_COMPLETE" => N1MessageType::ConfigurationUpdateComplete,
            "DL_NAS_TRANSPORT" => N1MessageType::DlNasTransport,
            "UL_NAS_TRANSPORT" => N1MessageType::UlNasTransport,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum N2MessageType {
    InitialContextSetupRequest,
    InitialContextSetupResponse,
    InitialContextSetupFailure,
    UeContextReleaseCommand,
    UeContextReleaseComplete,
    UeContextReleaseRequest,
    HandoverRequired,
    HandoverRequest,
    HandoverRequestAcknowledge,
    HandoverNotify,
    HandoverCancel,
    Paging,
    PathSwitchRequest,
    PathSwitchRequestAcknowledge,
    ErrorIndication,
    NgSetupRequest,
    NgSetupResponse,
}

impl fmt::Display for N2MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            N2MessageType::InitialContextSetupRequest => "INITIAL_CONTEXT_SETUP_REQUEST",
            N2MessageType::InitialContextSetupResponse => "INITIAL_CONTEXT_SETUP_RESPONSE",
            N2MessageType::InitialContextSetupFailure => "INITIAL_CONTEXT_SETUP_FAILURE",
            N2MessageType::UeContextReleaseCommand => "UE_CONTEXT_RELEASE_COMMAND",
            N2MessageType::UeContextReleaseComplete => "UE_CONTEXT_RELEASE_COMPLETE",
            N2MessageType::UeContextReleaseRequest => "UE_CONTEXT_RELEASE_REQUEST",
            N2MessageType::HandoverRequired => "HANDOVER_REQUIRED",
            N2MessageType::HandoverRequest => "HANDOVER_REQUEST",
            N2MessageType::HandoverRequestAcknowledge => "HANDOVER_REQUEST_ACKNOWLEDGE",
            N2MessageType::HandoverNotify => "HANDOVER_NOTIFY",
            N2MessageType::HandoverCancel => "HANDOVER_CANCEL",
            N2MessageType::Paging => "PAGING",
            N2MessageType::PathSwitchRequest => "PATH_SWITCH_REQUEST",
            N2MessageType::PathSwitchRequestAcknowledge => "PATH_SWITCH_REQUEST_ACKNOWLEDGE",
            N2MessageType::ErrorIndication => "ERROR_INDICATION",
            N2MessageType::NgSetupRequest => "NG_SETUP_REQUEST",
            N2MessageType::NgSetupResponse => "NG_SETUP_RESPONSE",
        };
        f.write_str(s)
    }
}

impl FromStr for N2MessageType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "INITIAL_CONTEXT_SETUP_REQUEST" => N2MessageType::InitialContextSetupRequest,
            "INITIAL_CONTEXT_SETUP_RESPONSE" => N2MessageType::InitialContextSetupResponse,
            "INITIAL_CONTEXT_SETUP_FAILURE" => N2MessageType::InitialContextSetupFailure,
            "UE_CONTEXT_RELEASE_COMMAND" => N2MessageType::UeContextReleaseCommand,
            "UE_CONTEXT_RELEASE_COMPLETE" => N2MessageType::UeContextReleaseComplete,
            "UE_CONTEXT_RELEASE_REQUEST" => N2MessageType::UeContextReleaseRequest,
            "HANDOVER_REQUIRED" => N2MessageType::HandoverRequired,
            "HANDOVER_REQUEST" => N2MessageType::HandoverRequest,
            "HANDOVER_REQUEST_ACKNOWLEDGE" => N2MessageType::HandoverRequestAcknowledge,
            "HANDOVER_NOTIFY" => N2MessageType::HandoverNotify,
            "HANDOVER_CANCEL" => N2MessageType::HandoverCancel,
            "PAGING" => N2MessageType::Paging,
            "PATH_SWITCH_REQUEST" => N2MessageType::PathSwitchRequest,
            "PATH_SWITCH_REQUEST_ACKNOWLEDGE" => N2MessageType::PathSwitchRequestAcknowledge,
            "ERROR_INDICATION" => N2MessageType::ErrorIndication,
            "NG_SETUP_REQUEST" => N2MessageType::NgSetupRequest,
            "NG_SETUP_RESPONSE" => N2MessageType::NgSetupResponse,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct N1Message {
    pub message_type: N1MessageType,
    pub ue_id: String,
    pub nas_container: String,
    pub ies: HashMap<String, String>,
    pub timestamp: SystemTime,
}

impl N1Message {
    pub fn new(message_type: N1MessageType, ue_id: &str) -> Self {
        Self {
            message_type,
            ue_id: ue_id.to_string(),
            nas_container: String::new(),
            ies: HashMap::new(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_ie(mut self, key: &str, value: &str) -> Self {
        self.ies.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct N2Message {
    pub message_type: N2MessageType,
    pub ran_node_id: String,
    pub ran_ue_ngap_id: String,
    pub amf_ue_ngap_id: String,
    pub ngap_container: String,
    pub ies: HashMap<String, String>,
    pub timestamp: SystemTime,
}

impl N2Message {
    pub fn new(message_type: N2MessageType, ran_node_id: &str) -> Self {
        Self {
            message_type,
            ran_node_id: ran_node_id.to_string(),
            ran_ue_ngap_id: String::new(),
            amf_ue_ngap_id: String::new(),
            ngap_container: String::new(),
            ies: HashMap::new(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_ie(mut self, key: &str, value: &str) -> Self {
        self.ies.insert(key.to_string(), value.to_string());
        self
    }
}

/// One inbound message from either interface, on its way to the
/// orchestrator's demultiplexer.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    N1(N1Message),
    N2(N2Message),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum N2ParseError {
    #[error("missing `N2 <type>` header line")]
    MissingHeader,
    #[error("unknown N2 message type: {0}")]
    UnknownMessageType(String),
}

/// Serialize an N2 message into the text framing: an `N2 <type>` header
/// line, `key: value` fields, `ie.<name>` entries, blank-line terminator.
pub fn format_n2(msg: &N2Message) -> String {
    let mut out = format!("N2 {}\n", msg.message_type);
    if !msg.ran_node_id.is_empty() {
        out.push_str(&format!("ran-node-id: {}\n", msg.ran_node_id));
    }
    if !msg.ran_ue_ngap_id.is_empty() {
        out.push_str(&format!("ran-ue-ngap-id: {}\n", msg.ran_ue_ngap_id));
    }
    if !msg.amf_ue_ngap_id.is_empty() {
        out.push_str(&format!("amf-ue-ngap-id: {}\n", msg.amf_ue_ngap_id));
    }
    if !msg.ngap_container.is_empty() {
        out.push_str(&format!("ngap: {}\n", msg.ngap_container));
    }
    let mut keys: Vec<&String> = msg.ies.keys().collect();
    keys.sort();
    for key in keys {
        out.push_str(&format!("ie.{}: {}\n", key, msg.ies[key]));
    }
    out.push('\n');
    out
}

/// Parse one framed block (without the trailing blank line).
pub fn parse_n2(block: &str) -> Result<N2Message, N2ParseError> {
    let mut lines = block.lines();
    let header = lines.next().ok_or(N2ParseError::MissingHeader)?.trim();
    let type_name = header
        .strip_prefix("N2 ")
        .ok_or(N2ParseError::MissingHeader)?
        .trim();
    let message_type = N2MessageType::from_str(type_name)
        .map_err(|_| N2ParseError::UnknownMessageType(type_name.to_string()))?;

    let mut msg = N2Message::new(message_type, "");
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "ran-node-id" => msg.ran_node_id = value.to_string(),
            "ran-ue-ngap-id" => msg.ran_ue_ngap_id = value.to_string(),
            "amf-ue-ngap-id" => msg.amf_ue_ngap_id = value.to_string(),
            "ngap" => msg.ngap_container = value.to_string(),
            _ => {
                if let Some(ie) = key.strip_prefix("ie.") {
                    msg.ies.insert(ie.to_string(), value.to_string());
                }
            }
        }
    }
    Ok(msg)
}

/// The N1/N2 interface service: outbound send surface, inbound channel
/// plumbing and per-direction counters.
pub struct N1N2Service {
    running: AtomicBool,
    inbound: mpsc::Sender<IncomingMessage>,
    ran_writers: DashMap<String, mpsc::Sender<String>>,
    n1_sent: AtomicU64,
    n1_received: AtomicU64,
    n2_sent: AtomicU64,
    n2_received: AtomicU64,
}

impl N1N2Service {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<IncomingMessage>) {
        let (tx, rx) = mpsc::channel(256);
        let service = Arc::new(Self {
            running: AtomicBool::new(false),
            inbound: tx,
            ran_writers: DashMap::new(),
            n1_sent: AtomicU64::new(0),
            n1_received: AtomicU64::new(0),
            n2_sent: AtomicU64::new(0),
            n2_received: AtomicU64::new(0),
        });
        (service, rx)
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Send an N1 message toward the UE. N1 is an in-process stub: the
    /// NAS payload would ride an N2 DownlinkNasTransport in a full stack.
    pub fn send_n1(&self, msg: &N1Message) -> bool {
        if !self.is_running() {
            log::warn!("[amfd] n1: send while service stopped");
            return false;
        }
        log::debug!("[amfd] n1 -> {} ue={}", msg.message_type, msg.ue_id);
        self.n1_sent.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Send an N2 message toward a gNB. Delivery is best effort: when
    /// the RAN node is attached the frame goes out its connection.
    pub fn send_n2(&self, msg: &N2Message) -> bool {
        if !self.is_running() {
            log::warn!("[amfd] n2: send while service stopped");
            return false;
        }
        if let Some(writer) = self.ran_writers.get(&msg.ran_node_id) {
            if writer.try_send(format_n2(msg)).is_err() {
                log::warn!(
                    "[amfd] n2: write queue full for ran node {}",
                    msg.ran_node_id
                );
            }
        }
        log::debug!("[amfd] n2 -> {} ran={}", msg.message_type, msg.ran_node_id);
        self.n2_sent.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Feed an inbound N1 message to the orchestrator.
    pub fn submit_n1(&self, msg: N1Message) -> bool {
        self.n1_received.fetch_add(1, Ordering::Relaxed);
        self.inbound.try_send(IncomingMessage::N1(msg)).is_ok()
    }

    /// Feed an inbound N2 message to the orchestrator.
    pub fn submit_n2(&self, msg: N2Message) -> bool {
        self.n2_received.fetch_add(1, Ordering::Relaxed);
        self.inbound.try_send(IncomingMessage::N2(msg)).is_ok()
    }

    pub fn attach_ran_node(&self, ran_node_id: &str, writer: mpsc::Sender<String>) {
        log::info!("[amfd] n2: ran node connected: {ran_node_id}");
        self.ran_writers.insert(ran_node_id.to_string(), writer);
    }

    pub fn detach_ran_node(&self, ran_node_id: &str) {
        if self.ran_writers.remove(ran_node_id).is_some() {
            log::info!("[amfd] n2: ran node disconnected: {ran_node_id}");
        }
    }

    pub fn is_ran_node_connected(&self, ran_node_id: &str) -> bool {
        self.ran_writers.contains_key(ran_node_id)
    }

    pub fn connected_ran_nodes(&self) -> Vec<String> {
        self.ran_writers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn n1_message_count(&self) -> u64 {
        self.n1_sent.load(Ordering::Relaxed) + self.n1_received.load(Ordering::Relaxed)
    }

    pub fn n2_message_count(&self) -> u64 {
        self.n2_sent.load(Ordering::Relaxed) + self.n2_received.load(Ordering::Relaxed)
    }
}

/// Accept loop for the N2 stub port. Exits when the shutdown signal
/// flips; per-connection tasks notice through their own receiver clone
/// or a failed read once the socket closes.
pub async fn run_n2_listener(
    service: Arc<N1N2Service>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        log::info!("[amfd] n2: connection from {peer}");
                        let service = Arc::clone(&service);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_n2_connection(service, stream, shutdown).await;
                        });
                    }
                    Err(err) => {
                        log::warn!("[amfd] n2: accept failed: {err}");
                    }
                }
            }
        }
    }
    log::info!("[amfd] n2: listener stopped");
}

async fn handle_n2_connection(
    service: Arc<N1N2Service>,
    stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    let mut ran_node_id: Option<String> = None;
    let mut block: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(frame) = out_rx.recv() => {
                if writer.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            if block.is_empty() {
                                continue;
                            }
                            match parse_n2(&block.join("\n")) {
                                Ok(msg) => {
                                    if ran_node_id.is_none() && !msg.ran_node_id.is_empty() {
                                        ran_node_id = Some(msg.ran_node_id.clone());
                                        service.attach_ran_node(&msg.ran_node_id, out_tx.clone());
                                    }
                                    service.submit_n2(msg);
                                }
                                Err(err) => {
                                    log::warn!("[amfd] n2: dropping malformed frame: {err}");
                                }
                            }
                            block.clear();
                        } else {
                            block.push(line);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("[amfd] n2: read failed: {err}");
                        break;
                    }
                }
            }
        }
    }

    if let Some(id) = ran_node_id {
        service.detach_ran_node(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n2_codec_roundtrip() {
        let msg = N2Message::new(N2MessageType::InitialContextSetupRequest, "gnb-001")
            .with_ie("ueId", "imsi-460001234567890")
            .with_ie("serviceType", "data");
        let mut msg = msg;
        msg.ran_ue_ngap_id = "17".to_string();
        msg.amf_ue_ngap_id = "42".to_string();
        msg.ngap_container = "deadbeef".to_string();

        let text = format_n2(&msg);
        assert!(text.ends_with("\n\n"));
        let parsed = parse_n2(text.trim_end()).unwrap();
        assert_eq!(parsed.message_type, N2MessageType::InitialContextSetupRequest);
        assert_eq!(parsed.ran_node_id, "gnb-001");
        assert_eq!(parsed.ran_ue_ngap_id, "17");
        assert_eq!(parsed.amf_ue_ngap_id, "42");
        assert_eq!(parsed.ngap_container, "deadbeef");
        assert_eq!(parsed.ies["ueId"], "imsi-460001234567890");
        assert_eq!(parsed.ies["serviceType"], "data");
    }

    #[test]
    fn parse_rejects_bad_frames() {
        assert_eq!(parse_n2("").unwrap_err(), N2ParseError::MissingHeader);
        assert_eq!(
            parse_n2("HELLO world").unwrap_err(),
            N2ParseError::MissingHeader
        );
        assert_eq!(
            parse_n2("N2 NOT_A_REAL_TYPE").unwrap_err(),
            N2ParseError::UnknownMessageType("NOT_A_REAL_TYPE".to_string())
        );
    }

    #[test]
    fn send_fails_when_stopped() {
        let (service, _rx) = N1N2Service::new();
        let n1 = N1Message::new(N1MessageType::RegistrationAccept, "imsi-1");
        let n2 = N2Message::new(N2MessageType::Paging, "gnb-001");
        assert!(!service.send_n1(&n1));
        assert!(!service.send_n2(&n2));
        assert_eq!(service.n1_message_count(), 0);
        assert_eq!(service.n2_message_count(), 0);
    }

    #[test]
    fn counters_track_both_directions() {
        let (service, mut rx) = N1N2Service::new();
        service.start();

        assert!(service.send_n1(&N1Message::new(
            N1MessageType::RegistrationAccept,
            "imsi-1"
        )));
        assert!(service.submit_n1(N1Message::new(
            N1MessageType::RegistrationRequest,
            "imsi-1"
        )));
        assert_eq!(service.n1_message_count(), 2);

        assert!(service.send_n2(&N2Message::new(N2MessageType::Paging, "gnb-001")));
        assert!(service.submit_n2(N2Message::new(
            N2MessageType::HandoverNotify,
            "gnb-001"
        )));
        assert_eq!(service.n2_message_count(), 2);

        // Both submissions are waiting in the demux channel.
        assert!(matches!(rx.try_recv().unwrap(), IncomingMessage::N1(_)));
        assert!(matches!(rx.try_recv().unwrap(), IncomingMessage::N2(_)));
    }

    #[tokio::test]
    async fn outbound_n2_reaches_attached_ran_node() {
        let (service, _rx) = N1N2Service::new();
        service.start();
        let (tx, mut rx) = mpsc::channel(4);
        service.attach_ran_node("gnb-001", tx);

        let msg = N2Message::new(N2MessageType::UeContextReleaseCommand, "gnb-001");
        assert!(service.send_n2(&msg));
        let frame = rx.recv().await.unwrap();
        assert!(frame.starts_with("N2 UE_CONTEXT_RELEASE_COMMAND"));

        service.detach_ran_node("gnb-001");
        assert!(!service.is_ran_node_connected("gnb-001"));
    }
}
