//! Call lifecycle types

use serde::{Deserialize, Serialize};

/// Which party initiated the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Whether the user accepts inbound calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    Available,
    Unavailable,
}

/// Provider call status, normalized across the push channel and the
/// telephony transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Connecting,
    Ringing,
    InProgress,
    Completed,
    Failed,
    Busy,
    NoAnswer,
    Canceled,
}

impl CallStatus {
    /// Whether no further lifecycle transition is expected.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Failed
                | CallStatus::Busy
                | CallStatus::NoAnswer
                | CallStatus::Canceled
        )
    }

    /// Parse a provider status string. Both event sources use their own
    /// vocabulary; aliases are folded into the canonical set here.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connecting" => Some(CallStatus::Connecting),
            "ringing" => Some(CallStatus::Ringing),
            "in-progress" | "accepted" | "answered" => Some(CallStatus::InProgress),
            "completed" | "disconnected" => Some(CallStatus::Completed),
            "failed" | "error" => Some(CallStatus::Failed),
            "busy" => Some(CallStatus::Busy),
            "no-answer" => Some(CallStatus::NoAnswer),
            "canceled" | "cancelled" | "rejected" => Some(CallStatus::Canceled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Connecting => "connecting",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Canceled => "canceled",
        }
    }
}

/// The single active screen. Transitions are driven exclusively by the
/// coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenState {
    Loading,
    Login,
    Keypad,
    PermissionRequest,
    PermissionPending,
    PermissionDenied,
    Dialing,
    Incoming,
    Calling,
    CallEnded,
}

/// Inbound call notification delivered over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallData {
    pub call_sid: String,
    pub from_number: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    pub owner_id: String,
    #[serde(default)]
    pub owner_email: Option<String>,
    #[serde(default)]
    pub engagement_id: Option<i64>,
}

/// `call_answered` push payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnsweredData {
    pub call_sid: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// `call_status_update` push payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatusUpdateData {
    pub call_sid: String,
    pub status: String,
    #[serde(default)]
    pub duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        for s in [
            CallStatus::Completed,
            CallStatus::Failed,
            CallStatus::Busy,
            CallStatus::NoAnswer,
            CallStatus::Canceled,
        ] {
            assert!(s.is_terminal(), "{:?} should be terminal", s);
        }
        for s in [CallStatus::Connecting, CallStatus::Ringing, CallStatus::InProgress] {
            assert!(!s.is_terminal(), "{:?} should not be terminal", s);
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(CallStatus::parse("disconnected"), Some(CallStatus::Completed));
        assert_eq!(CallStatus::parse("rejected"), Some(CallStatus::Canceled));
        assert_eq!(CallStatus::parse("accepted"), Some(CallStatus::InProgress));
        assert_eq!(CallStatus::parse("error"), Some(CallStatus::Failed));
        assert_eq!(CallStatus::parse("bogus"), None);
    }

    #[test]
    fn test_incoming_call_data_wire_format() {
        let data: IncomingCallData = serde_json::from_str(
            r#"{
                "callSid": "CA123",
                "fromNumber": "+447000000000",
                "contactName": "Test Contact",
                "ownerId": "owner1",
                "engagementId": 99
            }"#,
        )
        .unwrap();
        assert_eq!(data.call_sid, "CA123");
        assert_eq!(data.from_number, "+447000000000");
        assert_eq!(data.engagement_id, Some(99));
        assert!(data.contact_id.is_none());
    }
}
