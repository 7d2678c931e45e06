//! Call coordinator
//!
//! The single owner of call-lifecycle truth. Three event sources (push
//! channel, telephony transport, host bridge / sibling broadcasts) plus user
//! actions feed one reducer, which reconciles them into one screen state and
//! at most one call session. The reducer is pure and synchronous: it mutates
//! only its own state and returns the side effects for the runtime to
//! execute, so every race in the protocol can be replayed in a unit test as
//! a plain sequence of events.

pub mod runtime;
pub mod session;

pub use runtime::{WidgetRuntime, WidgetSnapshot};
pub use session::CallSession;

use crate::bridge::{BridgeEvent, BridgeMessage, CallEndStatus, HostEvent, HostReadyData};
use crate::config::{CrossTabUiPolicy, WidgetConfig};
use crate::formatters::clean_phone_number;
use crate::models::{
    Availability, CallAnsweredData, CallStatus, CallStatusUpdateData, ContactInfo, Direction,
    EngagementProperties, IncomingCallData, PermissionCheckResult, PermissionStatus, ScreenState,
};
use crate::telephony::{TelephonyCallInfo, TelephonyStatusEvent};
use crate::timer::CallTimer;

/// Everything that can happen to the widget, from any source.
#[derive(Debug, Clone)]
pub enum Event {
    // User actions
    Login,
    Logout,
    SetAvailability(Availability),
    SetDialNumber(String),
    Dial,
    Accept,
    Decline,
    EndCall,
    SetMute(bool),
    SendDigit(String),
    SetNotes(String),
    SetRecording(bool),
    Save { disposition: Option<String> },
    Discard,
    RequestPermission,
    CancelPermission,

    // Async operation results fed back by the runtime
    PermissionChecked(PermissionCheckResult),
    PermissionRequested(PermissionStatus),
    DialStarted { call_sid: Option<String> },
    DialFailed { error: String },
    ContactResolved { number: String, contact: Option<ContactInfo> },

    // Push channel
    PushIncoming(IncomingCallData),
    PushAnswered(CallAnsweredData),
    PushStatus(CallStatusUpdateData),
    PushConnected,
    PushDisconnected,

    // Telephony transport
    TelephonyIncoming(TelephonyCallInfo),
    TelephonyStatus(TelephonyStatusEvent),

    // Host bridge
    Host(HostEvent),

    // Sibling instance broadcast
    Sibling(BridgeMessage),
}

/// Host-bridge notifications the runtime forwards to [`crate::bridge::HostBridge`].
#[derive(Debug, Clone)]
pub enum BridgeNotify {
    Initialized { logged_in: bool, available: bool },
    LoggedIn,
    LoggedOut,
    Available,
    Unavailable,
    IncomingCall { from_number: String, contact_name: Option<String> },
    OutgoingCall { number: String },
    CallAnswered,
    CallEnded(CallEndStatus),
    CallCompleted {
        engagement_id: Option<i64>,
        properties: Option<EngagementProperties>,
    },
    NavigateToRecord(serde_json::Value),
    ReportError(String),
}

/// Side effects the runtime executes after each reduction.
#[derive(Debug, Clone)]
pub enum Effect {
    ValidatePermission { number: String },
    SendPermissionRequest { number: String, contact_id: Option<String> },
    /// Start the outbound media leg.
    StartOutboundCall { number: String },
    AcceptTelephony,
    RejectTelephony,
    HangupTelephony,
    SetMute(bool),
    SendDigits(String),
    /// Confirm an answered inbound call with the backend.
    ApiAnswer { call_sid: String },
    ApiDecline { call_sid: String },
    ApiEnd { call_sid: String, status: CallStatus },
    /// Connect push channel and register the telephony device.
    ConnectServices { owner_id: String },
    DisconnectServices,
    RefreshVoiceToken,
    LookupContact { number: String },
    RecordingReady { engagement_id: i64 },
    Bridge(BridgeNotify),
    /// Forward a sibling's broadcast into the host contract.
    Replay(BridgeMessage),
}

pub struct CallCoordinator {
    cross_tab: CrossTabUiPolicy,
    from_number: String,
    standalone_owner_id: Option<String>,

    screen: ScreenState,
    logged_in: bool,
    availability: Availability,
    owner_id: Option<String>,
    dial_number: String,
    session: Option<CallSession>,
    /// A permission validation is in flight; dialing is refused until the
    /// outcome arrives.
    validating: bool,
    telephony_ready: bool,
    push_connected: bool,
    timer: CallTimer,
}

impl CallCoordinator {
    pub fn new(config: &WidgetConfig) -> Self {
        Self {
            cross_tab: config.cross_tab,
            from_number: config.from_number.clone(),
            standalone_owner_id: config.standalone_owner_id.clone(),
            screen: ScreenState::Loading,
            logged_in: false,
            availability: Availability::Unavailable,
            owner_id: None,
            dial_number: String::new(),
            session: None,
            validating: false,
            telephony_ready: false,
            push_connected: false,
            timer: CallTimer::new(),
        }
    }

    pub fn screen(&self) -> ScreenState {
        self.screen
    }

    pub fn availability(&self) -> Availability {
        self.availability
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn dial_number(&self) -> &str {
        &self.dial_number
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    pub fn call_duration_secs(&self) -> u64 {
        self.timer.elapsed_secs()
    }

    /// A permission validation round trip is outstanding; the UI shows a
    /// checking state and further dials are refused until it resolves.
    pub fn is_validating(&self) -> bool {
        self.validating
    }

    pub fn is_push_connected(&self) -> bool {
        self.push_connected
    }

    /// Apply one event, returning the side effects to execute.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Login => self.on_login(),
            Event::Logout => self.on_logout(),
            Event::SetAvailability(a) => self.on_set_availability(a),
            Event::SetDialNumber(number) => {
                self.dial_number = number;
                Vec::new()
            }
            Event::Dial => self.on_dial(),
            Event::Accept => self.on_accept(),
            Event::Decline => self.on_decline(),
            Event::EndCall => self.on_end_call(),
            Event::SetMute(muted) => self.on_set_mute(muted),
            Event::SendDigit(digits) => self.on_send_digit(digits),
            Event::SetNotes(notes) => {
                if let Some(session) = self.session.as_mut() {
                    session.notes = notes;
                }
                Vec::new()
            }
            Event::SetRecording(requested) => {
                if let Some(session) = self.session.as_mut() {
                    session.recording_requested = requested;
                }
                Vec::new()
            }
            Event::Save { disposition } => self.on_save(disposition),
            Event::Discard => self.on_discard(),
            Event::RequestPermission => self.on_request_permission(),
            Event::CancelPermission => self.on_cancel_permission(),

            Event::PermissionChecked(result) => self.on_permission_checked(result),
            Event::PermissionRequested(status) => self.on_permission_requested(status),
            Event::DialStarted { call_sid } => self.on_dial_started(call_sid),
            Event::DialFailed { error } => self.on_dial_failed(&error),
            Event::ContactResolved { number, contact } => self.on_contact_resolved(&number, contact),

            Event::PushIncoming(data) => self.on_push_incoming(data),
            Event::PushAnswered(data) => self.on_push_answered(&data),
            Event::PushStatus(data) => self.on_push_status(&data),
            Event::PushConnected => {
                self.push_connected = true;
                Vec::new()
            }
            Event::PushDisconnected => {
                self.push_connected = false;
                Vec::new()
            }

            Event::TelephonyIncoming(info) => self.on_telephony_incoming(info),
            Event::TelephonyStatus(status) => self.on_telephony_status(status),

            Event::Host(host_event) => self.on_host_event(host_event),
            Event::Sibling(msg) => self.on_sibling(msg),
        }
    }

    // -- user actions --

    fn on_login(&mut self) -> Vec<Effect> {
        if self.logged_in {
            return Vec::new();
        }
        self.logged_in = true;
        self.availability = Availability::Available;
        self.screen = ScreenState::Keypad;

        let mut effects = vec![
            Effect::Bridge(BridgeNotify::LoggedIn),
            Effect::Bridge(BridgeNotify::Available),
        ];
        match self.owner_id.clone() {
            Some(owner_id) => effects.push(Effect::ConnectServices { owner_id }),
            None => tracing::warn!("Logged in without an owner id; services not connected"),
        }
        effects
    }

    fn on_logout(&mut self) -> Vec<Effect> {
        if !self.logged_in {
            return Vec::new();
        }
        self.logged_in = false;
        self.availability = Availability::Unavailable;
        self.reset_call_state();
        self.dial_number.clear();
        self.screen = ScreenState::Login;
        vec![
            Effect::Bridge(BridgeNotify::LoggedOut),
            Effect::DisconnectServices,
        ]
    }

    fn on_set_availability(&mut self, availability: Availability) -> Vec<Effect> {
        if self.availability == availability {
            return Vec::new();
        }
        self.availability = availability;
        let notify = match availability {
            Availability::Available => BridgeNotify::Available,
            Availability::Unavailable => BridgeNotify::Unavailable,
        };
        vec![Effect::Bridge(notify)]
    }

    fn on_dial(&mut self) -> Vec<Effect> {
        if self.validating {
            tracing::warn!("Dial refused: permission validation already in flight");
            return Vec::new();
        }
        if self.session.is_some() {
            tracing::warn!("Dial refused: a call session is already live");
            return Vec::new();
        }
        if self.screen != ScreenState::Keypad {
            tracing::debug!("Dial ignored outside the keypad screen");
            return Vec::new();
        }

        let number = clean_phone_number(&self.dial_number);
        if number.len() <= 1 {
            tracing::debug!("Dial ignored: no number entered");
            return Vec::new();
        }

        self.validating = true;
        vec![Effect::ValidatePermission { number }]
    }

    fn on_accept(&mut self) -> Vec<Effect> {
        let Some(session) = self.session.as_mut() else {
            tracing::warn!("Accept with no incoming call");
            return Vec::new();
        };
        if session.direction != Direction::Inbound || session.is_active || session.already_ended {
            return Vec::new();
        }

        // Optimistic transition either way; answered state is applied when
        // the transport or push channel confirms.
        self.screen = ScreenState::Calling;

        if session.has_media {
            let mut effects = vec![Effect::AcceptTelephony];
            if let Some(sid) = session.call_sid.clone() {
                effects.push(Effect::ApiAnswer { call_sid: sid });
            }
            effects
        } else {
            // Media leg has not rung yet; remember the intent and accept
            // automatically when it does.
            session.pending_accept = true;
            tracing::info!("Accept queued until the media leg arrives");
            Vec::new()
        }
    }

    fn on_decline(&mut self) -> Vec<Effect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.direction != Direction::Inbound || session.is_active || session.already_ended {
            return Vec::new();
        }

        session.already_ended = true;
        session.status = CallStatus::Canceled;
        let mut effects = vec![Effect::RejectTelephony];
        if let Some(sid) = session.call_sid.clone() {
            effects.push(Effect::ApiDecline { call_sid: sid });
        }
        effects.push(Effect::Bridge(BridgeNotify::CallEnded(CallEndStatus::Rejected)));

        // Declined calls skip the wrap-up screen.
        self.reset_call_state();
        self.screen = ScreenState::Keypad;
        effects
    }

    fn on_end_call(&mut self) -> Vec<Effect> {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("EndCall with no session");
            return Vec::new();
        };
        if session.already_ended {
            return Vec::new();
        }

        session.we_ended_call = true;
        let sid = session.call_sid.clone();

        let mut effects = vec![Effect::HangupTelephony];
        if let Some(call_sid) = sid {
            effects.push(Effect::ApiEnd {
                call_sid,
                status: CallStatus::Completed,
            });
        }
        effects.extend(self.finish_call(CallStatus::Completed, true));
        effects
    }

    fn on_set_mute(&mut self, muted: bool) -> Vec<Effect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if !session.is_active {
            return Vec::new();
        }
        session.is_muted = muted;
        vec![Effect::SetMute(muted)]
    }

    fn on_send_digit(&mut self, digits: String) -> Vec<Effect> {
        match self.session.as_ref() {
            Some(session) if session.is_active => vec![Effect::SendDigits(digits)],
            _ => Vec::new(),
        }
    }

    fn on_save(&mut self, disposition: Option<String>) -> Vec<Effect> {
        if self.screen != ScreenState::CallEnded {
            return Vec::new();
        }
        let Some(session) = self.session.as_ref() else {
            self.screen = ScreenState::Keypad;
            return Vec::new();
        };

        let mut properties = self.build_engagement_properties(session);
        properties.hs_call_disposition = disposition;
        let engagement_id = session.engagement_id;

        let mut effects = Vec::new();
        if session.recording_requested {
            if let Some(id) = engagement_id {
                effects.push(Effect::RecordingReady { engagement_id: id });
            }
        }
        effects.push(Effect::Bridge(BridgeNotify::CallCompleted {
            engagement_id,
            properties: Some(properties),
        }));

        self.reset_call_state();
        self.dial_number.clear();
        self.screen = ScreenState::Keypad;
        effects
    }

    fn on_discard(&mut self) -> Vec<Effect> {
        if self.screen != ScreenState::CallEnded {
            return Vec::new();
        }
        let engagement_id = self.session.as_ref().and_then(|s| s.engagement_id);
        self.reset_call_state();
        self.dial_number.clear();
        self.screen = ScreenState::Keypad;
        vec![Effect::Bridge(BridgeNotify::CallCompleted {
            engagement_id,
            properties: None,
        })]
    }

    fn on_request_permission(&mut self) -> Vec<Effect> {
        if self.screen != ScreenState::PermissionRequest {
            return Vec::new();
        }
        let number = clean_phone_number(&self.dial_number);
        if number.len() <= 1 {
            self.screen = ScreenState::Keypad;
            return Vec::new();
        }
        vec![Effect::SendPermissionRequest {
            number,
            contact_id: self.session.as_ref().and_then(|s| s.contact_id.clone()),
        }]
    }

    fn on_cancel_permission(&mut self) -> Vec<Effect> {
        if matches!(
            self.screen,
            ScreenState::PermissionRequest
                | ScreenState::PermissionPending
                | ScreenState::PermissionDenied
        ) {
            self.screen = ScreenState::Keypad;
        }
        Vec::new()
    }

    // -- async operation results --

    fn on_permission_checked(&mut self, result: PermissionCheckResult) -> Vec<Effect> {
        if !self.validating {
            tracing::debug!("Permission outcome with no validation in flight, dropped");
            return Vec::new();
        }
        self.validating = false;

        if result.can_call {
            let number = clean_phone_number(&self.dial_number);
            self.session = Some(CallSession::outbound(&number));
            self.screen = ScreenState::Dialing;
            return vec![
                Effect::Bridge(BridgeNotify::OutgoingCall { number: number.clone() }),
                Effect::StartOutboundCall { number: number.clone() },
                Effect::LookupContact { number },
            ];
        }

        let status = result
            .permission
            .as_ref()
            .map(|p| p.permission_status)
            .unwrap_or(PermissionStatus::NotFound);
        self.screen = match status {
            PermissionStatus::NotFound => ScreenState::PermissionRequest,
            PermissionStatus::Pending => ScreenState::PermissionPending,
            _ => ScreenState::PermissionDenied,
        };
        if let Some(reason) = result.reason {
            tracing::info!("Dial blocked: {}", reason);
        }
        Vec::new()
    }

    fn on_permission_requested(&mut self, status: PermissionStatus) -> Vec<Effect> {
        self.screen = match status {
            PermissionStatus::Granted => ScreenState::Keypad,
            PermissionStatus::Pending => ScreenState::PermissionPending,
            _ => ScreenState::PermissionDenied,
        };
        Vec::new()
    }

    fn on_dial_started(&mut self, call_sid: Option<String>) -> Vec<Effect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.direction != Direction::Outbound || session.already_ended {
            return Vec::new();
        }
        if let Some(sid) = call_sid {
            session.adopt_sid(&sid);
        }
        session.has_media = true;
        session.status = CallStatus::Ringing;
        Vec::new()
    }

    fn on_dial_failed(&mut self, error: &str) -> Vec<Effect> {
        tracing::warn!("Outbound dial failed: {}", error);
        let mut effects = self.finish_call(CallStatus::Failed, true);
        effects.push(Effect::Bridge(BridgeNotify::ReportError(format!(
            "Call failed: {}",
            error
        ))));
        effects
    }

    fn on_contact_resolved(&mut self, number: &str, contact: Option<ContactInfo>) -> Vec<Effect> {
        let Some(contact) = contact else {
            return Vec::new();
        };
        if let Some(session) = self.session.as_mut() {
            if session.peer_number == number {
                if session.contact_name.is_none() {
                    let name = contact.display_name();
                    if !name.is_empty() {
                        session.contact_name = Some(name);
                    }
                }
                session.contact_id.get_or_insert(contact.id);
            }
        }
        Vec::new()
    }

    // -- push channel --

    fn on_push_incoming(&mut self, data: IncomingCallData) -> Vec<Effect> {
        if !self.logged_in {
            tracing::debug!("Inbound call dropped: not logged in");
            return Vec::new();
        }
        if self.availability == Availability::Unavailable {
            tracing::info!("Inbound call {} dropped: user unavailable", data.call_sid);
            return Vec::new();
        }
        if let Some(session) = self.session.as_ref() {
            if !session.already_ended {
                tracing::info!(
                    "Inbound call {} dropped: session {} is live",
                    data.call_sid,
                    session.call_sid.as_deref().unwrap_or("<pending>")
                );
                return Vec::new();
            }
        }

        let from_number = data.from_number.clone();
        let contact_name = data.contact_name.clone();
        self.timer.reset();
        self.session = Some(CallSession::inbound(&data));
        self.screen = ScreenState::Incoming;

        let mut effects = vec![Effect::Bridge(BridgeNotify::IncomingCall {
            from_number: from_number.clone(),
            contact_name: contact_name.clone(),
        })];
        if contact_name.is_none() {
            effects.push(Effect::LookupContact { number: from_number });
        }
        effects
    }

    fn on_push_answered(&mut self, data: &CallAnsweredData) -> Vec<Effect> {
        if !self.session_matches(&data.call_sid) {
            return Vec::new();
        }
        if let Some(session) = self.session.as_mut() {
            session.adopt_sid(&data.call_sid);
        }
        self.apply_answered(true)
    }

    fn on_push_status(&mut self, data: &CallStatusUpdateData) -> Vec<Effect> {
        if !self.session_matches(&data.call_sid) {
            return Vec::new();
        }
        let Some(status) = CallStatus::parse(&data.status) else {
            tracing::debug!("Unknown call status '{}', ignored", data.status);
            return Vec::new();
        };
        if let Some(session) = self.session.as_mut() {
            session.adopt_sid(&data.call_sid);
        }

        if status.is_terminal() {
            return self.finish_call(status, true);
        }
        match status {
            CallStatus::InProgress => self.apply_answered(true),
            other => {
                if let Some(session) = self.session.as_mut() {
                    if !session.is_active {
                        session.status = other;
                    }
                }
                Vec::new()
            }
        }
    }

    // -- telephony transport --

    fn on_telephony_incoming(&mut self, info: TelephonyCallInfo) -> Vec<Effect> {
        if let Some(session) = self.session.as_mut() {
            if session.already_ended {
                tracing::debug!("Media ring after session end, rejecting");
                return vec![Effect::RejectTelephony];
            }
            if let Some(sid) = &info.call_sid {
                if !session.matches_sid(sid) {
                    tracing::warn!("Media ring for foreign call {}, rejecting", sid);
                    return vec![Effect::RejectTelephony];
                }
                session.adopt_sid(sid);
            }
            session.has_media = true;

            if session.pending_accept {
                // User already accepted while the leg was in flight.
                session.pending_accept = false;
                tracing::info!("Auto-accepting queued answer");
                let mut effects = vec![Effect::AcceptTelephony];
                if let Some(sid) = session.call_sid.clone() {
                    effects.push(Effect::ApiAnswer { call_sid: sid });
                }
                return effects;
            }
            return Vec::new();
        }

        // Media-first arrival without a push notification.
        if !self.logged_in || self.availability == Availability::Unavailable {
            tracing::info!("Media ring while unavailable, rejecting");
            return vec![Effect::RejectTelephony];
        }
        let from_number = info.from_number.clone().unwrap_or_default();
        self.timer.reset();
        self.session = Some(CallSession::inbound_from_media(&info));
        self.screen = ScreenState::Incoming;

        let mut effects = vec![Effect::Bridge(BridgeNotify::IncomingCall {
            from_number: from_number.clone(),
            contact_name: None,
        })];
        if !from_number.is_empty() {
            effects.push(Effect::LookupContact { number: from_number });
        }
        effects
    }

    fn on_telephony_status(&mut self, status: TelephonyStatusEvent) -> Vec<Effect> {
        match status {
            TelephonyStatusEvent::Registered => {
                self.telephony_ready = true;
                Vec::new()
            }
            TelephonyStatusEvent::Unregistered => {
                self.telephony_ready = false;
                Vec::new()
            }
            TelephonyStatusEvent::TokenWillExpire => vec![Effect::RefreshVoiceToken],
            TelephonyStatusEvent::DeviceError(message) => {
                tracing::error!("Telephony device error: {}", message);
                // A dead device takes any in-flight session down with it.
                let mut effects = self.finish_call(CallStatus::Failed, true);
                effects.push(Effect::Bridge(BridgeNotify::ReportError(message)));
                effects
            }
            TelephonyStatusEvent::Accepted => self.apply_answered(true),
            TelephonyStatusEvent::Ringing => {
                if let Some(session) = self.session.as_mut() {
                    if !session.is_active {
                        session.status = CallStatus::Ringing;
                    }
                }
                Vec::new()
            }
            TelephonyStatusEvent::Disconnected => self.finish_call(CallStatus::Completed, true),
            TelephonyStatusEvent::Canceled => self.finish_call(CallStatus::Canceled, true),
            TelephonyStatusEvent::Rejected => self.finish_call(CallStatus::Canceled, true),
            TelephonyStatusEvent::CallError(message) => {
                tracing::warn!("Media session error: {}", message);
                self.finish_call(CallStatus::Failed, true)
            }
            TelephonyStatusEvent::Reconnecting | TelephonyStatusEvent::Reconnected => {
                tracing::debug!("Media transport {:?}", status);
                Vec::new()
            }
        }
    }

    // -- host bridge --

    fn on_host_event(&mut self, event: HostEvent) -> Vec<Effect> {
        match event {
            HostEvent::Ready(data) => self.on_host_ready(data),
            HostEvent::DialNumber(number) => {
                if self.session.is_none() && !self.validating {
                    self.dial_number = clean_phone_number(&number);
                    if self.logged_in {
                        self.screen = ScreenState::Keypad;
                    }
                }
                Vec::new()
            }
            HostEvent::EngagementCreated { engagement_id } => {
                if let Some(session) = self.session.as_mut() {
                    session.engagement_id = Some(engagement_id);
                }
                Vec::new()
            }
            HostEvent::CallerIdMatchSucceeded {
                contact_name,
                object_coordinates,
            } => {
                if let Some(session) = self.session.as_mut() {
                    if session.contact_name.is_none() {
                        session.contact_name = contact_name;
                    }
                }
                vec![Effect::Bridge(BridgeNotify::NavigateToRecord(object_coordinates))]
            }
            HostEvent::CallerIdMatchFailed { reason } => {
                tracing::debug!("Caller id match failed: {}", reason);
                Vec::new()
            }
            HostEvent::EndCallRequested => self.on_end_call(),
        }
    }

    fn on_host_ready(&mut self, data: HostReadyData) -> Vec<Effect> {
        self.owner_id = data.owner_id.or_else(|| self.standalone_owner_id.clone());
        if self.screen == ScreenState::Loading {
            self.screen = ScreenState::Login;
        }
        if let Some(id) = data.engagement_id {
            if let Some(session) = self.session.as_mut() {
                session.engagement_id = Some(id);
            }
        }
        vec![Effect::Bridge(BridgeNotify::Initialized {
            logged_in: self.logged_in,
            available: self.availability == Availability::Available,
        })]
    }

    // -- sibling broadcasts --

    fn on_sibling(&mut self, msg: BridgeMessage) -> Vec<Effect> {
        // The contract-owning instance forwards every sibling notification
        // to the host; the bridge itself gates on role.
        let mut effects = vec![Effect::Replay(msg.clone())];

        match msg.event {
            BridgeEvent::LoggedIn => {
                if self.cross_tab.login_state && !self.logged_in {
                    self.logged_in = true;
                    self.availability = Availability::Available;
                    if self.session.is_none() {
                        self.screen = ScreenState::Keypad;
                    }
                }
            }
            BridgeEvent::LoggedOut => {
                if self.cross_tab.login_state && self.logged_in {
                    self.logged_in = false;
                    self.availability = Availability::Unavailable;
                    self.reset_call_state();
                    self.screen = ScreenState::Login;
                }
            }
            BridgeEvent::Available => {
                if self.cross_tab.availability {
                    self.availability = Availability::Available;
                }
            }
            BridgeEvent::Unavailable => {
                if self.cross_tab.availability {
                    self.availability = Availability::Unavailable;
                }
            }
            BridgeEvent::IncomingCall(info) => {
                if self.session.is_none() && self.logged_in {
                    let mut session = CallSession::mirrored(Direction::Inbound, &info.from_number);
                    session.contact_name = info.contact_name;
                    self.timer.reset();
                    self.session = Some(session);
                    self.screen = ScreenState::Incoming;
                }
            }
            BridgeEvent::OutgoingCall(info) => {
                if self.session.is_none() && self.logged_in {
                    self.timer.reset();
                    self.session =
                        Some(CallSession::mirrored(Direction::Outbound, &info.phone_number));
                    self.screen = ScreenState::Dialing;
                }
            }
            BridgeEvent::CallAnswered(_) => {
                // Mirror the answered transition locally without notifying
                // the host again; the originating tab already did.
                effects.extend(self.apply_answered(false));
            }
            BridgeEvent::CallEnded(info) => {
                let ignore = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.is_active && !s.we_ended_call);
                if ignore {
                    // An active call this tab did not end stays up; ending
                    // it here would let a stray mirror kill a live call.
                    tracing::debug!("Sibling call_ended ignored for live session");
                } else {
                    let status = match info.call_end_status {
                        CallEndStatus::Completed => CallStatus::Completed,
                        CallEndStatus::Failed => CallStatus::Failed,
                        CallEndStatus::Rejected => CallStatus::Canceled,
                    };
                    effects.extend(self.finish_call(status, false));
                }
            }
            BridgeEvent::CallCompleted(_) => {
                if self.cross_tab.call_completed && self.session.is_some() {
                    self.reset_call_state();
                    self.screen = ScreenState::Keypad;
                }
            }
        }
        effects
    }

    // -- shared transitions --

    /// Apply the answered transition exactly once per session.
    fn apply_answered(&mut self, notify: bool) -> Vec<Effect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.is_active || session.already_ended {
            return Vec::new();
        }
        session.is_active = true;
        session.pending_accept = false;
        session.status = CallStatus::InProgress;
        self.timer.reset();
        self.timer.start();
        self.screen = ScreenState::Calling;
        tracing::info!(
            "Call answered: {}",
            session.call_sid.as_deref().unwrap_or("<pending>")
        );
        if notify {
            vec![Effect::Bridge(BridgeNotify::CallAnswered)]
        } else {
            Vec::new()
        }
    }

    /// Apply a terminal transition exactly once per session.
    ///
    /// `already_ended` is set before anything else, so whichever source
    /// reports the end first wins and every later terminal is a no-op.
    fn finish_call(&mut self, status: CallStatus, notify: bool) -> Vec<Effect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.already_ended {
            tracing::debug!("Terminal {:?} after session end, dropped", status);
            return Vec::new();
        }
        session.already_ended = true;
        let was_active = session.is_active;
        session.is_active = false;
        session.status = status;
        self.timer.stop();

        let end_status = match status {
            CallStatus::Completed => CallEndStatus::Completed,
            CallStatus::Canceled => CallEndStatus::Rejected,
            _ => CallEndStatus::Failed,
        };
        let missed_inbound =
            !was_active && session.direction == Direction::Inbound && !session.we_ended_call;

        let mut effects = Vec::new();
        if notify {
            effects.push(Effect::Bridge(BridgeNotify::CallEnded(end_status)));
        }

        if missed_inbound {
            // Nothing to wrap up; go straight back to the keypad.
            tracing::info!("Missed inbound call ({:?})", status);
            self.reset_call_state();
            self.screen = ScreenState::Keypad;
        } else {
            self.screen = ScreenState::CallEnded;
        }
        effects
    }

    fn session_matches(&self, call_sid: &str) -> bool {
        match self.session.as_ref() {
            Some(session) if session.already_ended => {
                tracing::debug!("Event for ended session {}, dropped", call_sid);
                false
            }
            Some(session) => {
                let matches = session.matches_sid(call_sid);
                if !matches {
                    tracing::warn!(
                        "Event for call {} does not match live session {}, dropped",
                        call_sid,
                        session.call_sid.as_deref().unwrap_or("<pending>")
                    );
                }
                matches
            }
            None => {
                tracing::debug!("Event for call {} with no session, dropped", call_sid);
                false
            }
        }
    }

    fn build_engagement_properties(&self, session: &CallSession) -> EngagementProperties {
        let (from, to) = match session.direction {
            Direction::Outbound => (self.from_number.clone(), session.peer_number.clone()),
            Direction::Inbound => (session.peer_number.clone(), self.from_number.clone()),
        };
        let direction = match session.direction {
            Direction::Outbound => "OUTBOUND",
            Direction::Inbound => "INBOUND",
        };
        let title_peer = session
            .contact_name
            .clone()
            .unwrap_or_else(|| session.peer_number.clone());

        EngagementProperties {
            hs_timestamp: chrono::Utc::now().timestamp_millis(),
            hs_call_body: (!session.notes.is_empty()).then(|| session.notes.clone()),
            hs_call_direction: direction.to_string(),
            hs_call_disposition: None,
            hs_call_duration: self.timer.elapsed_secs().to_string(),
            hs_call_from_number: from,
            hs_call_to_number: to,
            hs_call_status: "COMPLETED".to_string(),
            hs_call_title: format!("Call - {}", title_peer),
            hs_call_source: "INTEGRATIONS_PLATFORM".to_string(),
            hs_call_recording_url: None,
        }
    }

    fn reset_call_state(&mut self) {
        self.session = None;
        self.validating = false;
        self.timer.reset();
    }
}
