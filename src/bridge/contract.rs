//! Host CRM iframe contract
//!
//! The embedding CRM exposes a messaging SDK to the widget iframe. This
//! module models that surface as the `HostContract` trait plus the payloads
//! each notification carries, and the callback stream the host sends back as
//! `HostEvent`. A `NullHostContract` stands in when the widget runs without
//! a host.

use serde::{Deserialize, Serialize};

/// Final disposition reported to the host when a call ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallEndStatus {
    Completed,
    Failed,
    Rejected,
}

/// Payload for the one-time `initialized` handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializedInfo {
    pub is_logged_in: bool,
    pub is_available: bool,
}

/// Notification that an inbound call is ringing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallInfo {
    pub external_call_id: String,
    pub from_number: String,
    #[serde(default)]
    pub contact_name: Option<String>,
    pub create_engagement: bool,
}

/// Notification that an outbound call has started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingCallInfo {
    pub external_call_id: String,
    pub phone_number: String,
    pub create_engagement: bool,
    /// Unix millis when dialing began.
    pub call_start_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnsweredInfo {
    pub external_call_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEndedInfo {
    pub external_call_id: String,
    pub call_end_status: CallEndStatus,
    /// Unix millis when the call ended.
    pub end_timestamp: i64,
}

/// Final call summary, sent once the user saves or discards the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCompletedInfo {
    pub external_call_id: String,
    #[serde(default)]
    pub engagement_id: Option<i64>,
    pub hide_widget: bool,
    #[serde(default)]
    pub engagement_properties: Option<crate::models::EngagementProperties>,
}

/// Outbound surface of the CRM messaging SDK.
///
/// Methods are fire-and-forget; delivery problems are the implementation's
/// concern and must not surface into call handling.
pub trait HostContract: Send + Sync {
    fn initialized(&self, info: &InitializedInfo);
    fn user_logged_in(&self);
    fn user_logged_out(&self);
    fn user_available(&self);
    fn user_unavailable(&self);
    fn incoming_call(&self, info: &IncomingCallInfo);
    fn outgoing_call(&self, info: &OutgoingCallInfo);
    fn call_answered(&self, info: &CallAnsweredInfo);
    fn call_ended(&self, info: &CallEndedInfo);
    fn call_completed(&self, info: &CallCompletedInfo);
    /// Ask the host to open the matched record. `coordinates` is the opaque
    /// object reference the host handed us in the caller-id match callback.
    fn navigate_to_record(&self, coordinates: &serde_json::Value);
    fn send_error(&self, message: &str);
    fn log_debug(&self, message: &str);
}

/// Contract for standalone deployments: logs and drops everything.
pub struct NullHostContract;

impl HostContract for NullHostContract {
    fn initialized(&self, info: &InitializedInfo) {
        tracing::debug!("No host: initialized (logged_in={})", info.is_logged_in);
    }
    fn user_logged_in(&self) {
        tracing::debug!("No host: user_logged_in");
    }
    fn user_logged_out(&self) {
        tracing::debug!("No host: user_logged_out");
    }
    fn user_available(&self) {
        tracing::debug!("No host: user_available");
    }
    fn user_unavailable(&self) {
        tracing::debug!("No host: user_unavailable");
    }
    fn incoming_call(&self, info: &IncomingCallInfo) {
        tracing::debug!("No host: incoming_call from {}", info.from_number);
    }
    fn outgoing_call(&self, info: &OutgoingCallInfo) {
        tracing::debug!("No host: outgoing_call to {}", info.phone_number);
    }
    fn call_answered(&self, info: &CallAnsweredInfo) {
        tracing::debug!("No host: call_answered ({})", info.external_call_id);
    }
    fn call_ended(&self, info: &CallEndedInfo) {
        tracing::debug!(
            "No host: call_ended ({:?}, {})",
            info.call_end_status,
            info.external_call_id
        );
    }
    fn call_completed(&self, info: &CallCompletedInfo) {
        tracing::debug!("No host: call_completed ({})", info.external_call_id);
    }
    fn navigate_to_record(&self, _coordinates: &serde_json::Value) {
        tracing::debug!("No host: navigate_to_record");
    }
    fn send_error(&self, message: &str) {
        tracing::warn!("No host: send_error: {}", message);
    }
    fn log_debug(&self, message: &str) {
        tracing::debug!("No host: {}", message);
    }
}

/// Callbacks arriving from the host SDK.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// Host finished its side of the handshake.
    Ready(HostReadyData),
    /// User clicked a phone number in the CRM.
    DialNumber(String),
    /// Host created the engagement record for the current call.
    EngagementCreated { engagement_id: i64 },
    /// Host matched the caller to a CRM record.
    CallerIdMatchSucceeded {
        contact_name: Option<String>,
        object_coordinates: serde_json::Value,
    },
    CallerIdMatchFailed { reason: String },
    /// Host-side end-call button.
    EndCallRequested,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostReadyData {
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub portal_id: Option<i64>,
    #[serde(default)]
    pub engagement_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_end_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&CallEndStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
        assert_eq!(
            serde_json::to_string(&CallEndStatus::Rejected).unwrap(),
            "\"REJECTED\""
        );
    }

    #[test]
    fn test_outgoing_call_info_camel_case() {
        let info = OutgoingCallInfo {
            external_call_id: "ext-1".into(),
            phone_number: "+12025550123".into(),
            create_engagement: true,
            call_start_time: 1700000000000,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["externalCallId"], "ext-1");
        assert_eq!(json["createEngagement"], true);
        assert_eq!(json["callStartTime"], 1700000000000i64);
    }

    #[test]
    fn test_host_ready_data_tolerates_missing_fields() {
        let data: HostReadyData = serde_json::from_str("{}").unwrap();
        assert!(data.owner_id.is_none());
        assert!(data.engagement_id.is_none());
    }
}
