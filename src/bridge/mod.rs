//! Host bridge
//!
//! Single choke point between call handling and the outside UI surfaces:
//! every notification is first mirrored onto the cross-instance broadcast
//! channel, then forwarded to the CRM host contract when this instance's
//! role owns it. The bridge also owns the per-call external id the host
//! uses to correlate our notifications.

pub mod broadcast;
pub mod contract;

use std::sync::Mutex;

use uuid::Uuid;

pub use broadcast::{BridgeEvent, BridgeMessage, BridgeReceiver, BroadcastChannel};
pub use contract::{
    CallAnsweredInfo, CallCompletedInfo, CallEndStatus, CallEndedInfo, HostContract, HostEvent,
    HostReadyData, IncomingCallInfo, InitializedInfo, NullHostContract, OutgoingCallInfo,
};

use crate::config::BridgeRole;
use crate::models::EngagementProperties;

pub struct HostBridge {
    contract: Box<dyn HostContract>,
    role: BridgeRole,
    channel: BroadcastChannel,
    external_call_id: Mutex<Option<String>>,
    last_incoming_number: Mutex<Option<String>>,
}

impl HostBridge {
    pub fn new(contract: Box<dyn HostContract>, role: BridgeRole, channel: BroadcastChannel) -> Self {
        Self {
            contract,
            role,
            channel,
            external_call_id: Mutex::new(None),
            last_incoming_number: Mutex::new(None),
        }
    }

    pub fn role(&self) -> BridgeRole {
        self.role
    }

    /// External id for the current call session, minting one if absent.
    pub fn external_call_id(&self) -> String {
        let mut slot = self.external_call_id.lock().expect("call id poisoned");
        slot.get_or_insert_with(|| Uuid::new_v4().to_string()).clone()
    }

    pub fn last_incoming_number(&self) -> Option<String> {
        self.last_incoming_number
            .lock()
            .expect("incoming number poisoned")
            .clone()
    }

    /// Drop per-call state once the session is fully over.
    pub fn clear_session(&self) {
        self.external_call_id.lock().expect("call id poisoned").take();
        self.last_incoming_number
            .lock()
            .expect("incoming number poisoned")
            .take();
    }

    /// Subscribe to sibling-instance notifications.
    pub fn subscribe_siblings(&self) -> BridgeReceiver {
        self.channel.subscribe()
    }

    // -- outbound notifications: mirror first, then forward --

    /// One-time handshake; per-instance, never mirrored.
    pub fn initialized(&self, is_logged_in: bool, is_available: bool) {
        if self.role.owns_contract() {
            self.contract.initialized(&InitializedInfo {
                is_logged_in,
                is_available,
            });
        }
    }

    pub fn user_logged_in(&self) {
        self.mirror(BridgeEvent::LoggedIn);
        if self.role.owns_contract() {
            self.contract.user_logged_in();
        }
    }

    pub fn user_logged_out(&self) {
        self.mirror(BridgeEvent::LoggedOut);
        if self.role.owns_contract() {
            self.contract.user_logged_out();
        }
    }

    pub fn user_available(&self) {
        self.mirror(BridgeEvent::Available);
        if self.role.owns_contract() {
            self.contract.user_available();
        }
    }

    pub fn user_unavailable(&self) {
        self.mirror(BridgeEvent::Unavailable);
        if self.role.owns_contract() {
            self.contract.user_unavailable();
        }
    }

    /// Announce an inbound ring. Returns the external call id for the new
    /// session.
    pub fn incoming_call(&self, from_number: &str, contact_name: Option<&str>) -> String {
        let external_call_id = self.fresh_call_id();
        *self
            .last_incoming_number
            .lock()
            .expect("incoming number poisoned") = Some(from_number.to_string());

        let info = IncomingCallInfo {
            external_call_id: external_call_id.clone(),
            from_number: from_number.to_string(),
            contact_name: contact_name.map(str::to_string),
            create_engagement: true,
        };
        self.mirror(BridgeEvent::IncomingCall(info.clone()));
        if self.role.owns_contract() {
            self.contract.incoming_call(&info);
        }
        external_call_id
    }

    /// Announce an outbound dial. Returns the external call id.
    pub fn outgoing_call(&self, phone_number: &str) -> String {
        let external_call_id = self.fresh_call_id();
        let info = OutgoingCallInfo {
            external_call_id: external_call_id.clone(),
            phone_number: phone_number.to_string(),
            create_engagement: true,
            call_start_time: chrono::Utc::now().timestamp_millis(),
        };
        self.mirror(BridgeEvent::OutgoingCall(info.clone()));
        if self.role.owns_contract() {
            self.contract.outgoing_call(&info);
        }
        external_call_id
    }

    pub fn call_answered(&self) {
        let info = CallAnsweredInfo {
            external_call_id: self.external_call_id(),
        };
        self.mirror(BridgeEvent::CallAnswered(info.clone()));
        if self.role.owns_contract() {
            self.contract.call_answered(&info);
        }
    }

    pub fn call_ended(&self, status: CallEndStatus) {
        let info = CallEndedInfo {
            external_call_id: self.external_call_id(),
            call_end_status: status,
            end_timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.mirror(BridgeEvent::CallEnded(info.clone()));
        if self.role.owns_contract() {
            self.contract.call_ended(&info);
        }
    }

    pub fn call_completed(
        &self,
        engagement_id: Option<i64>,
        properties: Option<EngagementProperties>,
    ) {
        let info = CallCompletedInfo {
            external_call_id: self.external_call_id(),
            engagement_id,
            hide_widget: false,
            engagement_properties: properties,
        };
        self.mirror(BridgeEvent::CallCompleted(info.clone()));
        if self.role.owns_contract() {
            self.contract.call_completed(&info);
        }
        self.clear_session();
    }

    /// Record navigation is host-tab work: the detached calling window must
    /// not steer the CRM, so the `Window` role suppresses it.
    pub fn navigate_to_record(&self, coordinates: &serde_json::Value) {
        if self.role == BridgeRole::Window {
            tracing::debug!("Suppressing record navigation from calling window");
            return;
        }
        self.contract.navigate_to_record(coordinates);
    }

    pub fn send_error(&self, message: &str) {
        if self.role.owns_contract() {
            self.contract.send_error(message);
        }
    }

    pub fn log_debug(&self, message: &str) {
        if self.role.owns_contract() {
            self.contract.log_debug(message);
        }
    }

    /// Forward a sibling's notification into the real contract.
    ///
    /// Only a contract-owning instance replays, and it mints its own external
    /// call id for session starts: the host treats each instance's ids as a
    /// separate namespace.
    pub fn replay(&self, msg: &BridgeMessage) {
        if !self.role.owns_contract() {
            return;
        }
        match &msg.event {
            BridgeEvent::LoggedIn => self.contract.user_logged_in(),
            BridgeEvent::LoggedOut => self.contract.user_logged_out(),
            BridgeEvent::Available => self.contract.user_available(),
            BridgeEvent::Unavailable => self.contract.user_unavailable(),
            BridgeEvent::IncomingCall(info) => {
                let mut local = info.clone();
                local.external_call_id = self.fresh_call_id();
                *self
                    .last_incoming_number
                    .lock()
                    .expect("incoming number poisoned") = Some(local.from_number.clone());
                self.contract.incoming_call(&local);
            }
            BridgeEvent::OutgoingCall(info) => {
                let mut local = info.clone();
                local.external_call_id = self.fresh_call_id();
                self.contract.outgoing_call(&local);
            }
            BridgeEvent::CallAnswered(info) => {
                let mut local = info.clone();
                local.external_call_id = self.external_call_id();
                self.contract.call_answered(&local);
            }
            BridgeEvent::CallEnded(info) => {
                let mut local = info.clone();
                local.external_call_id = self.external_call_id();
                self.contract.call_ended(&local);
            }
            BridgeEvent::CallCompleted(info) => {
                let mut local = info.clone();
                local.external_call_id = self.external_call_id();
                self.contract.call_completed(&local);
                self.clear_session();
            }
        }
    }

    fn mirror(&self, event: BridgeEvent) {
        if self.role.mirrors() {
            self.channel.publish(event);
        }
    }

    /// Replace any stale session id with a fresh one.
    fn fresh_call_id(&self) -> String {
        let id = Uuid::new_v4().to_string();
        *self.external_call_id.lock().expect("call id poisoned") = Some(id.clone());
        id
    }
}
