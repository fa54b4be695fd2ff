//! Per-UE registration state machine.
//!
//! The machine is a pure transition table: it never touches the context
//! store or the adapters itself, it only names the target state and the
//! side effect the orchestrator has to perform. Per-UE serialization is
//! the store's job, so the table can stay total and deterministic.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UeState {
    Deregistered,
    RegisteredIdle,
    RegisteredConnected,
}

impl fmt::Display for UeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UeState::Deregistered => "DEREGISTERED",
            UeState::RegisteredIdle => "REGISTERED_IDLE",
            UeState::RegisteredConnected => "REGISTERED_CONNECTED",
        };
        f.write_str(s)
    }
}

/// Events that can drive a UE state transition. Events that carry no row
/// in the table for the current state are accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UeEvent {
    // Registration management
    RegistrationRequest,
    RegistrationAccept,
    RegistrationReject,
    DeregisterRequest,
    DeregisterAccept,

    // Connection management
    ServiceRequest,
    ServiceAccept,
    ServiceReject,
    AnRelease,
    ConnectionRelease,
    PagingRequest,
    PagingResponse,
    PagingFailure,

    // Mobility management
    HandoverRequest,
    HandoverCommand,
    HandoverComplete,
    HandoverFailure,
    TrackingAreaUpdate,
    PeriodicRegistrationUpdate,

    // Security
    AuthenticationRequest,
    AuthenticationResponse,
    AuthenticationFailure,
    SecurityModeCommand,
    SecurityModeComplete,
    SecurityModeReject,

    // Session management
    PduSessionEstablishmentRequest,
    PduSessionModificationRequest,
    PduSessionReleaseRequest,

    // Errors and timeouts
    NetworkFailure,
    TimeoutT3510,
    TimeoutT3511,
    TimeoutT3513,
    TimeoutT3560,

    // Configuration management
    ConfigurationUpdateCommand,
    ConfigurationUpdateComplete,

    // Emergency
    EmergencyRegistration,
    EmergencyServiceRequest,
}

/// Side effect the orchestrator performs alongside a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No side effect; the event is either a pure counter bump or ignored.
    None,
    /// New registration: bump counters, mark the UE connected.
    Register { emergency: bool },
    /// Service request from idle: emit N2 InitialContextSetupRequest.
    SetupAnContext,
    /// Establish a PDU session.
    CreatePduSession,
    /// Handover: point the context at the target RAN node.
    UpdateRanNode,
    /// Full deregistration: release sessions and the AN connection.
    Deregister,
    /// Tracking-area / periodic update: refresh location, stay idle.
    UpdateLocation,
    /// Page the UE through N2.
    EmitPaging,
    /// Release the AN connection, keep the registration.
    ReleaseConnection,
    /// Release a PDU session.
    ReleaseSession,
    /// Handover finished: record the new serving node.
    CompleteHandover,
    /// Authentication / security-mode step; the orchestrator inspects
    /// the triggering event for the exact sub-step.
    SecurityProcedure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: UeState,
    pub action: Action,
}

impl Transition {
    fn to(next: UeState, action: Action) -> Self {
        Self { next, action }
    }

    fn stay(state: UeState) -> Self {
        Self {
            next: state,
            action: Action::None,
        }
    }
}

/// The transition table. Total over all `(state, event)` pairs.
pub fn transition(state: UeState, event: UeEvent) -> Transition {
    use Action::*;
    use UeEvent as E;
    use UeState::*;

    match state {
        Deregistered => match event {
            E::RegistrationRequest => {
                Transition::to(RegisteredConnected, Register { emergency: false })
            }
            E::EmergencyRegistration => {
                Transition::to(RegisteredConnected, Register { emergency: true })
            }
            E::RegistrationReject
            | E::AuthenticationFailure
            | E::SecurityModeReject
            | E::NetworkFailure => Transition::stay(Deregistered),
            _ => ignored(state, event),
        },
        RegisteredIdle => match event {
            E::ServiceRequest | E::EmergencyServiceRequest | E::PagingResponse => {
                Transition::to(RegisteredConnected, SetupAnContext)
            }
            E::PduSessionEstablishmentRequest => {
                Transition::to(RegisteredConnected, CreatePduSession)
            }
            E::HandoverRequest => Transition::to(RegisteredConnected, UpdateRanNode),
            E::DeregisterRequest | E::TimeoutT3511 | E::NetworkFailure => {
                Transition::to(Deregistered, Deregister)
            }
            E::TrackingAreaUpdate | E::PeriodicRegistrationUpdate => {
                Transition::to(RegisteredIdle, UpdateLocation)
            }
            E::PagingRequest => Transition::to(RegisteredIdle, EmitPaging),
            _ => ignored(state, event),
        },
        RegisteredConnected => match event {
            E::AnRelease | E::ConnectionRelease => {
                Transition::to(RegisteredIdle, ReleaseConnection)
            }
            E::HandoverComplete => Transition::to(RegisteredIdle, CompleteHandover),
            E::PduSessionReleaseRequest => Transition::to(RegisteredIdle, ReleaseSession),
            E::DeregisterRequest
            | E::DeregisterAccept
            | E::NetworkFailure
            | E::AuthenticationFailure => Transition::to(Deregistered, Deregister),
            E::AuthenticationRequest
            | E::AuthenticationResponse
            | E::SecurityModeCommand
            | E::SecurityModeComplete => {
                Transition::to(RegisteredConnected, SecurityProcedure)
            }
            _ => ignored(state, event),
        },
    }
}

fn ignored(state: UeState, event: UeEvent) -> Transition {
    log::debug!("[amfd] event {event:?} ignored in state {state}");
    Transition::stay(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_connects_from_deregistered() {
        let t = transition(UeState::Deregistered, UeEvent::RegistrationRequest);
        assert_eq!(t.next, UeState::RegisteredConnected);
        assert_eq!(t.action, Action::Register { emergency: false });

        let t = transition(UeState::Deregistered, UeEvent::EmergencyRegistration);
        assert_eq!(t.next, UeState::RegisteredConnected);
        assert_eq!(t.action, Action::Register { emergency: true });
    }

    #[test]
    fn rejects_keep_deregistered() {
        for event in [
            UeEvent::RegistrationReject,
            UeEvent::AuthenticationFailure,
            UeEvent::SecurityModeReject,
            UeEvent::NetworkFailure,
        ] {
            let t = transition(UeState::Deregistered, event);
            assert_eq!(t.next, UeState::Deregistered);
            assert_eq!(t.action, Action::None);
        }
    }

    #[test]
    fn idle_service_paths_connect() {
        for event in [
            UeEvent::ServiceRequest,
            UeEvent::EmergencyServiceRequest,
            UeEvent::PagingResponse,
        ] {
            let t = transition(UeState::RegisteredIdle, event);
            assert_eq!(t.next, UeState::RegisteredConnected);
            assert_eq!(t.action, Action::SetupAnContext);
        }
    }

    #[test]
    fn idle_session_and_handover() {
        let t = transition(
            UeState::RegisteredIdle,
            UeEvent::PduSessionEstablishmentRequest,
        );
        assert_eq!(t.next, UeState::RegisteredConnected);
        assert_eq!(t.action, Action::CreatePduSession);

        let t = transition(UeState::RegisteredIdle, UeEvent::HandoverRequest);
        assert_eq!(t.next, UeState::RegisteredConnected);
        assert_eq!(t.action, Action::UpdateRanNode);
    }

    #[test]
    fn idle_deregistration_paths() {
        for event in [
            UeEvent::DeregisterRequest,
            UeEvent::TimeoutT3511,
            UeEvent::NetworkFailure,
        ] {
            let t = transition(UeState::RegisteredIdle, event);
            assert_eq!(t.next, UeState::Deregistered);
            assert_eq!(t.action, Action::Deregister);
        }
    }

    #[test]
    fn idle_location_updates_stay_idle() {
        for event in [
            UeEvent::TrackingAreaUpdate,
            UeEvent::PeriodicRegistrationUpdate,
        ] {
            let t = transition(UeState::RegisteredIdle, event);
            assert_eq!(t.next, UeState::RegisteredIdle);
            assert_eq!(t.action, Action::UpdateLocation);
        }
        let t = transition(UeState::RegisteredIdle, UeEvent::PagingRequest);
        assert_eq!(t.next, UeState::RegisteredIdle);
        assert_eq!(t.action, Action::EmitPaging);
    }

    #[test]
    fn connected_releases_go_idle() {
        for event in [UeEvent::AnRelease, UeEvent::ConnectionRelease] {
            let t = transition(UeState::RegisteredConnected, event);
            assert_eq!(t.next, UeState::RegisteredIdle);
            assert_eq!(t.action, Action::ReleaseConnection);
        }
        let t = transition(UeState::RegisteredConnected, UeEvent::HandoverComplete);
        assert_eq!(t.next, UeState::RegisteredIdle);
        assert_eq!(t.action, Action::CompleteHandover);
        let t = transition(
            UeState::RegisteredConnected,
            UeEvent::PduSessionReleaseRequest,
        );
        assert_eq!(t.next, UeState::RegisteredIdle);
        assert_eq!(t.action, Action::ReleaseSession);
    }

    #[test]
    fn connected_deregistration_paths() {
        for event in [
            UeEvent::DeregisterRequest,
            UeEvent::DeregisterAccept,
            UeEvent::NetworkFailure,
            UeEvent::AuthenticationFailure,
        ] {
            let t = transition(UeState::RegisteredConnected, event);
            assert_eq!(t.next, UeState::Deregistered);
            assert_eq!(t.action, Action::Deregister);
        }
    }

    #[test]
    fn connected_security_procedures_stay_connected() {
        for event in [
            UeEvent::AuthenticationRequest,
            UeEvent::AuthenticationResponse,
            UeEvent::SecurityModeCommand,
            UeEvent::SecurityModeComplete,
        ] {
            let t = transition(UeState::RegisteredConnected, event);
            assert_eq!(t.next, UeState::RegisteredConnected);
            assert_eq!(t.action, Action::SecurityProcedure);
        }
    }

    #[test]
    fn unlisted_events_are_total_noops() {
        // A sample of events with no row in each state: state unchanged,
        // no side effect requested.
        for (state, event) in [
            (UeState::Deregistered, UeEvent::ServiceRequest),
            (UeState::Deregistered, UeEvent::PduSessionReleaseRequest),
            (UeState::RegisteredIdle, UeEvent::RegistrationRequest),
            (UeState::RegisteredIdle, UeEvent::SecurityModeComplete),
            (UeState::RegisteredConnected, UeEvent::RegistrationRequest),
            (UeState::RegisteredConnected, UeEvent::TrackingAreaUpdate),
            (UeState::RegisteredConnected, UeEvent::PagingRequest),
        ] {
            let t = transition(state, event);
            assert_eq!(t.next, state);
            assert_eq!(t.action, Action::None);
        }
    }
}
