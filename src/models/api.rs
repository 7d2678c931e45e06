//! Backend wire envelope and CRM-facing payloads

use serde::{Deserialize, Serialize};

/// Every backend JSON response is wrapped in `{success, data, error}`.
/// No `serde(default)` on the options: that would force `T: Default`
/// onto every payload type, and missing fields already parse to `None`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// `GET /token?identity=` response.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceToken {
    pub token: String,
    pub identity: String,
}

/// Contact resolved from a phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl ContactInfo {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => format!("{} {}", f, l),
            (Some(f), None) => f.clone(),
            (None, Some(l)) => l.clone(),
            (None, None) => String::new(),
        }
    }
}

/// Call-log properties sent to the CRM when the user saves a call summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementProperties {
    pub hs_timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hs_call_body: Option<String>,
    pub hs_call_direction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hs_call_disposition: Option<String>,
    pub hs_call_duration: String,
    pub hs_call_from_number: String,
    pub hs_call_to_number: String,
    pub hs_call_status: String,
    pub hs_call_title: String,
    pub hs_call_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hs_call_recording_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_with_data() {
        let env: ApiEnvelope<VoiceToken> = serde_json::from_str(
            r#"{"success": true, "data": {"token": "tok", "identity": "crm_1"}}"#,
        )
        .unwrap();
        assert!(env.success);
        assert_eq!(env.data.unwrap().token, "tok");
    }

    #[test]
    fn test_envelope_error_only() {
        let env: ApiEnvelope<VoiceToken> =
            serde_json::from_str(r#"{"success": false, "error": "boom"}"#).unwrap();
        assert!(!env.success);
        assert!(env.data.is_none());
        assert_eq!(env.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_contact_display_name() {
        let contact = ContactInfo {
            id: "1".into(),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            phone: None,
            email: None,
        };
        assert_eq!(contact.display_name(), "Ada Lovelace");
    }

    #[test]
    fn test_engagement_properties_skip_empty() {
        let props = EngagementProperties {
            hs_timestamp: 1_700_000_000_000,
            hs_call_direction: "OUTBOUND".into(),
            hs_call_duration: "42".into(),
            hs_call_from_number: "+15550001111".into(),
            hs_call_to_number: "+12025550123".into(),
            hs_call_status: "COMPLETED".into(),
            hs_call_title: "Call - +12025550123".into(),
            hs_call_source: "INTEGRATIONS_PLATFORM".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&props).unwrap();
        assert!(!json.contains("hs_call_recording_url"));
        assert!(!json.contains("hs_call_body"));
    }
}
