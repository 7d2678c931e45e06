//! Call-authorization (consent) records

use serde::{Deserialize, Serialize};

/// Backend-tracked consent status for a destination number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Pending,
    Denied,
    Revoked,
    Expired,
    NotFound,
    RateLimited,
}

impl PermissionStatus {
    /// Whether this status blocks calling outright (vs. merely requiring a
    /// fresh consent request).
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            PermissionStatus::Denied
                | PermissionStatus::Revoked
                | PermissionStatus::Expired
                | PermissionStatus::RateLimited
        )
    }
}

/// Consent record as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallPermission {
    #[serde(default)]
    pub id: Option<String>,
    pub phone_number: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    pub permission_status: PermissionStatus,
    #[serde(default)]
    pub permission_requested_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub permission_granted_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub permission_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub missed_call_count: u32,
}

/// `POST /permissions/validate` response: the authoritative pre-dial check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionCheckResult {
    pub can_call: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub permission: Option<CallPermission>,
}

/// `GET /permissions/status/:number` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionStatusResponse {
    pub status: String,
    #[serde(default)]
    pub permission: Option<CallPermission>,
}

/// `POST /permissions/request` outcome. Rate limiting is surfaced as a
/// status, never retried here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestOutcome {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub permission: Option<CallPermission>,
    #[serde(default)]
    pub message_sid: Option<String>,
}
