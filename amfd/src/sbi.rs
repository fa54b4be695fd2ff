//! SBI adapter: HTTP termination, service/operation classification and
//! response shaping.
//!
//! Classification works on case-sensitive URI substrings, the way the
//! service actually routes in deployment: a request is first binned into
//! a service by its `/n<nf>-<service>/` path component, then into an
//! operation by sub-path and method. Unknown paths fall back to
//! namf-comm UeContextCreate unless strict routing is configured, in
//! which case they get a 404.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::error_handling::HandleErrorLayer;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::{json, Value};
use thiserror::Error;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;

use crate::amf::Amf;

/// Request bodies above this size are rejected; 4 KiB covers every
/// operation the SBI models.
pub const MAX_BODY_BYTES: usize = 4096;
/// Per-request processing deadline, surfaced as 408.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SbiError {
    #[error("no route for this uri")]
    UnknownRoute,
    #[error("malformed request body: {0}")]
    MalformedBody(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Delete = 3,
    Patch = 4,
}

impl HttpMethod {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Unknown verbs default to POST, mirroring the forgiving parser of
    /// the wire format this models.
    pub fn from_http(method: &Method) -> Self {
        match method.as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            "PATCH" => HttpMethod::Patch,
            _ => HttpMethod::Post,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbiServiceType {
    NamfCommunication = 0,
    NamfEventExposure = 1,
    NamfLocation = 2,
    NamfMt = 3,
    NsmfPduSession = 4,
    NudmSdm = 5,
    NudmUeAuthentication = 6,
    NausfUeAuthentication = 7,
    NpcfAmPolicyControl = 8,
    NrfNfManagement = 9,
    NrfNfDiscovery = 10,
}

impl SbiServiceType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbiMessageType {
    // Registration management
    UeContextCreateRequest = 0,
    UeContextCreateResponse = 1,
    UeContextUpdateRequest = 2,
    UeContextUpdateResponse = 3,
    UeContextReleaseRequest = 4,
    UeContextReleaseResponse = 5,

    // Authentication
    UeAuthenticationRequest = 6,
    UeAuthenticationResponse = 7,
    UeAuthenticationResultRequest = 8,
    UeAuthenticationResultResponse = 9,

    // Session management
    PduSessionCreateSmContextRequest = 10,
    PduSessionCreateSmContextResponse = 11,
    PduSessionUpdateSmContextRequest = 12,
    PduSessionUpdateSmContextResponse = 13,
    PduSessionReleaseSmContextRequest = 14,
    PduSessionReleaseSmContextResponse = 15,

    // Policy control
    AmPolicyControlCreateRequest = 16,
    AmPolicyControlCreateResponse = 17,
    AmPolicyControlUpdateRequest = 18,
    AmPolicyControlUpdateResponse = 19,
    AmPolicyControlDeleteRequest = 20,
    AmPolicyControlDeleteResponse = 21,

    // NF management
    NfRegisterRequest = 22,
    NfRegisterResponse = 23,
    NfUpdateRequest = 24,
    NfUpdateResponse = 25,
    NfDeregisterRequest = 26,
    NfDeregisterResponse = 27,
    NfStatusNotifyRequest = 28,
    NfStatusNotifyResponse = 29,

    // Discovery
    NfDiscoverRequest = 30,
    NfDiscoverResponse = 31,

    // Errors
    ProblemDetails = 32,
    ErrorResponse = 33,
}

impl SbiMessageType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Wire-level SBI message handed to the orchestrator. Everything stays
/// at string level; no schema is imposed beyond JSON bodies.
#[derive(Debug, Clone)]
pub struct SbiMessage {
    pub service: SbiServiceType,
    pub message_type: SbiMessageType,
    pub method: HttpMethod,
    pub uri: String,
    pub headers: HashMap<String, Vec<String>>,
    pub body: String,
}

impl SbiMessage {
    pub fn new(
        service: SbiServiceType,
        message_type: SbiMessageType,
        method: HttpMethod,
        uri: &str,
        body: &str,
    ) -> Self {
        Self {
            service,
            message_type,
            method,
            uri: uri.to_string(),
            headers: HashMap::new(),
            body: body.to_string(),
        }
    }

    /// Parse the body as JSON. An empty body is an empty object so
    /// operations without parameters do not have to special-case it.
    pub fn body_json(&self) -> Result<Value, SbiError> {
        if self.body.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&self.body).map_err(|e| SbiError::MalformedBody(e.to_string()))
    }
}

/// Outcome the orchestrator hands back for response shaping.
#[derive(Debug, Clone)]
pub struct SbiOutcome {
    pub status_code: u16,
    pub amf_state: String,
    pub extra: serde_json::Map<String, Value>,
}

impl SbiOutcome {
    pub fn ok(status_code: u16, amf_state: String) -> Self {
        Self {
            status_code,
            amf_state,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Classify a request URI and method into (service, operation).
pub fn classify(
    uri: &str,
    method: HttpMethod,
    strict: bool,
) -> Result<(SbiServiceType, SbiMessageType), SbiError> {
    use SbiMessageType as M;
    use SbiServiceType as S;

    let service = if uri.contains("/namf-comm/") {
        S::NamfCommunication
    } else if uri.contains("/nausf-auth/") {
        S::NausfUeAuthentication
    } else if uri.contains("/nsmf-pdusession/") {
        S::NsmfPduSession
    } else if uri.contains("/npcf-am-policy/") {
        S::NpcfAmPolicyControl
    } else if uri.contains("/nnrf-nfm/") {
        S::NrfNfManagement
    } else if uri.contains("/nnrf-disc/") {
        S::NrfNfDiscovery
    } else if strict {
        return Err(SbiError::UnknownRoute);
    } else {
        S::NamfCommunication
    };

    let message = if uri.contains("/ue-contexts") {
        match method {
            HttpMethod::Post => Some(M::UeContextCreateRequest),
            HttpMethod::Put => Some(M::UeContextUpdateRequest),
            HttpMethod::Delete => Some(M::UeContextReleaseRequest),
            _ => None,
        }
    } else if uri.contains("/authentications") || service == S::NausfUeAuthentication {
        Some(M::UeAuthenticationRequest)
    } else if service == S::NsmfPduSession {
        // Session operations are method-driven; both /pdu-sessions and
        // /sm-contexts shaped paths land here.
        match method {
            HttpMethod::Post => Some(M::PduSessionCreateSmContextRequest),
            HttpMethod::Delete => Some(M::PduSessionReleaseSmContextRequest),
            HttpMethod::Put | HttpMethod::Patch => Some(M::PduSessionUpdateSmContextRequest),
            _ => None,
        }
    } else if service == S::NpcfAmPolicyControl {
        match method {
            HttpMethod::Post => Some(M::AmPolicyControlCreateRequest),
            HttpMethod::Delete => Some(M::AmPolicyControlDeleteRequest),
            HttpMethod::Put | HttpMethod::Patch => Some(M::AmPolicyControlUpdateRequest),
            _ => None,
        }
    } else if service == S::NrfNfManagement {
        match method {
            HttpMethod::Put | HttpMethod::Post => Some(M::NfRegisterRequest),
            HttpMethod::Patch => Some(M::NfUpdateRequest),
            HttpMethod::Delete => Some(M::NfDeregisterRequest),
            HttpMethod::Get => Some(M::NfDiscoverRequest),
        }
    } else if service == S::NrfNfDiscovery {
        Some(M::NfDiscoverRequest)
    } else if !strict && uri.contains("/deregistrations") {
        Some(M::UeContextReleaseRequest)
    } else if !strict && uri.contains("/registrations") {
        Some(M::UeContextCreateRequest)
    } else {
        None
    };

    match message {
        Some(m) => Ok((service, m)),
        None if strict => Err(SbiError::UnknownRoute),
        None => Ok((service, M::UeContextCreateRequest)),
    }
}

/// Render the fixed response body. Returned separately from the HTTP
/// plumbing so the shape is testable without a socket.
pub fn render_response(message: &SbiMessage, outcome: &SbiOutcome) -> (u16, String) {
    let mut obj = serde_json::Map::new();
    obj.insert(
        "status".to_string(),
        json!(if outcome.is_success() { "success" } else { "error" }),
    );
    obj.insert(
        "timestamp".to_string(),
        json!(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
    );
    obj.insert("amfState".to_string(), json!(outcome.amf_state));
    obj.insert(
        "processedMessage".to_string(),
        json!({
            "service": message.service.code(),
            "type": message.message_type.code(),
            "method": message.method.code(),
            "uri": message.uri,
        }),
    );
    for (key, value) in &outcome.extra {
        obj.insert(key.clone(), value.clone());
    }
    (outcome.status_code, Value::Object(obj).to_string())
}

#[derive(Clone)]
struct SbiState {
    amf: Arc<Amf>,
}

/// Build the SBI router: one fallback handler classifies every request,
/// a 30 s timeout maps to 408 and bodies are capped at 4 KiB.
pub fn build_router(amf: Arc<Amf>) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|_err: tower::BoxError| async {
                    StatusCode::REQUEST_TIMEOUT
                }))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(SbiState { amf })
}

async fn handle_request(
    State(state): State<SbiState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let http_method = HttpMethod::from_http(&method);
    let path = uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let strict = state.amf.config().sbi_strict_routing;

    let (service, message_type) = match classify(&path, http_method, strict) {
        Ok(c) => c,
        Err(SbiError::UnknownRoute) | Err(SbiError::MalformedBody(_)) => {
            log::debug!("[amfd] sbi: no route for {} {path}", method);
            let message = SbiMessage::new(
                SbiServiceType::NamfCommunication,
                SbiMessageType::ProblemDetails,
                http_method,
                &path,
                "",
            );
            let outcome = SbiOutcome::ok(404, state.amf.state_label())
                .with("error", json!("unknown route"));
            return to_http_response(&message, &outcome);
        }
    };

    let mut header_map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        header_map
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    let message = SbiMessage {
        service,
        message_type,
        method: http_method,
        uri: path,
        headers: header_map,
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    let outcome = state.amf.handle_sbi(&message);
    to_http_response(&message, &outcome)
}

fn to_http_response(message: &SbiMessage, outcome: &SbiOutcome) -> Response {
    let (status, body) = render_response(message, outcome);
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CONNECTION, "close"),
        ],
        body,
    )
        .into_response()
}
