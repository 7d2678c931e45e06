//! Permission gate: call-authorization checks for destination numbers
//!
//! Pure request/response against the backend, plus a cache of the last-known
//! status so screens can branch without refetching. Rate limiting is enforced
//! server-side and surfaced here as a status value, never retried.

use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::models::{
    CallPermission, PermissionCheckResult, PermissionRequestOutcome, PermissionStatus,
    PermissionStatusResponse,
};

use super::client::{encode_segment, ApiClient, ApiError};

#[derive(Debug, Default, Clone)]
struct GateState {
    status: Option<PermissionStatus>,
    permission: Option<CallPermission>,
    reason: Option<String>,
    can_call: bool,
}

/// Caches last-known authorization status for the number being dialed.
pub struct PermissionGate {
    client: Arc<ApiClient>,
    state: Mutex<GateState>,
}

impl PermissionGate {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Read-only status check. Debouncing is the caller's concern.
    pub async fn check_status(&self, phone_number: &str) -> Result<PermissionStatus, ApiError> {
        if phone_number.is_empty() {
            return Err(ApiError::Malformed {
                url: "/permissions/status".into(),
                message: "phone number is required".into(),
            });
        }

        let path = format!("/permissions/status/{}", encode_segment(phone_number));
        let status = match self.client.get_json::<PermissionStatusResponse>(&path).await {
            Ok(resp) => {
                let status = resp
                    .permission
                    .as_ref()
                    .map(|p| p.permission_status)
                    .unwrap_or(PermissionStatus::NotFound);
                self.store(status, resp.permission, None);
                status
            }
            Err(ApiError::NotFound) => {
                self.store(PermissionStatus::NotFound, None, None);
                PermissionStatus::NotFound
            }
            Err(e) => return Err(e),
        };

        Ok(status)
    }

    /// Trigger the out-of-band consent flow for a destination.
    pub async fn request_permission(
        &self,
        phone_number: &str,
        contact_id: &str,
    ) -> Result<PermissionStatus, ApiError> {
        if phone_number.is_empty() {
            return Err(ApiError::Malformed {
                url: "/permissions/request".into(),
                message: "phone number is required".into(),
            });
        }

        let body = json!({ "phoneNumber": phone_number, "contactId": contact_id });
        let outcome: PermissionRequestOutcome =
            match self.client.post_json("/permissions/request", &body).await {
                Ok(outcome) => outcome,
                Err(ApiError::RateLimited { body }) => parse_rate_limited(&body),
                Err(e) => return Err(e),
            };

        let status = match outcome.status.as_str() {
            "rate_limited" => PermissionStatus::RateLimited,
            "sent" | "pending" => PermissionStatus::Pending,
            "granted" => PermissionStatus::Granted,
            other => {
                tracing::warn!("Unexpected permission request status: {}", other);
                PermissionStatus::Pending
            }
        };

        self.store(status, outcome.permission, outcome.error);
        Ok(status)
    }

    /// Authoritative pre-dial check. The coordinator must not dial when this
    /// returns `can_call == false`.
    pub async fn validate(&self, phone_number: &str) -> PermissionCheckResult {
        if phone_number.is_empty() {
            return PermissionCheckResult {
                can_call: false,
                reason: Some("Phone number is required".into()),
                permission: None,
            };
        }

        let body = json!({ "phoneNumber": phone_number });
        let result: PermissionCheckResult =
            match self.client.post_json("/permissions/validate", &body).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!("Permission validation failed for {}: {:#}", phone_number, e);
                    PermissionCheckResult {
                        can_call: false,
                        reason: Some("Failed to validate permission. Please try again.".into()),
                        permission: None,
                    }
                }
            };

        let status = result
            .permission
            .as_ref()
            .map(|p| p.permission_status)
            .or_else(|| result.can_call.then_some(PermissionStatus::Granted));
        {
            let mut state = self.state.lock().expect("gate state poisoned");
            state.status = status;
            state.permission = result.permission.clone();
            state.reason = result.reason.clone();
            state.can_call = result.can_call;
        }

        result
    }

    /// Last-known status from any of the three operations.
    pub fn last_status(&self) -> Option<PermissionStatus> {
        self.state.lock().expect("gate state poisoned").status
    }

    pub fn last_reason(&self) -> Option<String> {
        self.state.lock().expect("gate state poisoned").reason.clone()
    }

    pub fn can_call(&self) -> bool {
        self.state.lock().expect("gate state poisoned").can_call
    }

    /// Clear cached status when a call session is discarded.
    pub fn reset(&self) {
        *self.state.lock().expect("gate state poisoned") = GateState::default();
    }

    fn store(
        &self,
        status: PermissionStatus,
        permission: Option<CallPermission>,
        reason: Option<String>,
    ) {
        let mut state = self.state.lock().expect("gate state poisoned");
        state.status = Some(status);
        state.can_call = status == PermissionStatus::Granted;
        state.permission = permission;
        state.reason = reason;
    }
}

/// A 429 body still carries the envelope with the rate-limited record.
fn parse_rate_limited(body: &str) -> PermissionRequestOutcome {
    #[derive(serde::Deserialize)]
    struct Envelope {
        #[serde(default)]
        data: Option<PermissionRequestOutcome>,
        #[serde(default)]
        error: Option<String>,
    }

    let parsed: Option<Envelope> = serde_json::from_str(body).ok();
    let (data, error) = match parsed {
        Some(env) => (env.data, env.error),
        None => (None, None),
    };

    let mut outcome = data.unwrap_or(PermissionRequestOutcome {
        status: "rate_limited".into(),
        error: None,
        permission: None,
        message_sid: None,
    });
    outcome.status = "rate_limited".into();
    if outcome.error.is_none() {
        outcome.error =
            Some(error.unwrap_or_else(|| "Rate limit exceeded. Please try again later.".into()));
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate_limited_with_envelope() {
        let outcome = parse_rate_limited(
            r#"{"success": false, "error": "Too many requests", "data": {
                "status": "rate_limited",
                "permission": {
                    "phone_number": "+12025550123",
                    "permission_status": "rate_limited",
                    "missed_call_count": 0
                }
            }}"#,
        );
        assert_eq!(outcome.status, "rate_limited");
        assert_eq!(outcome.error.as_deref(), Some("Too many requests"));
        assert!(outcome.permission.is_some());
    }

    #[test]
    fn test_parse_rate_limited_garbage_body() {
        let outcome = parse_rate_limited("<html>429</html>");
        assert_eq!(outcome.status, "rate_limited");
        assert!(outcome.error.is_some());
        assert!(outcome.permission.is_none());
    }
}
