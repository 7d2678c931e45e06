//! Call control, token, and contact endpoints
//!
//! Call-control posts are fire-and-forget: the lifecycle truth arrives via
//! the push channel and the telephony transport, so failures here are logged
//! and swallowed rather than propagated into the coordinator.

use serde_json::json;

use crate::models::{ContactInfo, VoiceToken};

use super::client::{encode_segment, ApiClient, ApiError};

/// Fetch a telephony access token for a device identity.
pub async fn voice_token(client: &ApiClient, identity: &str) -> Result<VoiceToken, ApiError> {
    let path = format!("/token?identity={}", encode_segment(identity));
    client.get_json(&path).await
}

/// Ask the backend to place an outbound call leg (server-initiated dial).
pub async fn initiate_call(
    client: &ApiClient,
    phone_number: &str,
    contact_id: Option<&str>,
) -> Result<serde_json::Value, ApiError> {
    client
        .post_json(
            "/calls/initiate",
            &json!({
                "phoneNumber": phone_number,
                "contactId": contact_id,
            }),
        )
        .await
}

/// Poll provider-side status for a call.
pub async fn call_status(client: &ApiClient, call_sid: &str) -> Result<serde_json::Value, ApiError> {
    let path = format!("/calls/status/{}", encode_segment(call_sid));
    client.get_json(&path).await
}

/// Confirm an answered inbound call with the backend.
pub async fn answer_call(client: &ApiClient, call_sid: &str) {
    if call_sid.is_empty() {
        return;
    }
    if let Err(e) = client
        .post_unit("/calls/answer", &json!({ "callSid": call_sid }))
        .await
    {
        tracing::warn!("Failed to confirm answer for {}: {:#}", call_sid, e);
    }
}

/// Decline an inbound call.
pub async fn decline_call(client: &ApiClient, call_sid: &str) {
    if call_sid.is_empty() {
        return;
    }
    if let Err(e) = client
        .post_unit("/calls/decline", &json!({ "callSid": call_sid }))
        .await
    {
        tracing::warn!("Failed to decline call {}: {:#}", call_sid, e);
    }
}

/// End an active call.
pub async fn end_call(client: &ApiClient, call_sid: &str, status: Option<&str>) {
    if call_sid.is_empty() {
        return;
    }
    if let Err(e) = client
        .post_unit("/calls/end", &json!({ "callSid": call_sid, "status": status }))
        .await
    {
        tracing::warn!("Failed to end call {}: {:#}", call_sid, e);
    }
}

/// Resolve a contact by phone number. `None` when the backend has no match.
pub async fn contact_by_number(
    client: &ApiClient,
    phone_number: &str,
) -> Result<Option<ContactInfo>, ApiError> {
    let path = format!("/contacts/{}", encode_segment(phone_number));
    match client.get_json(&path).await {
        Ok(contact) => Ok(Some(contact)),
        Err(ApiError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Signal that a call recording is ready for transcription.
pub async fn recording_ready(client: &ApiClient, engagement_id: i64) {
    if let Err(e) = client
        .post_unit("/recordings/ready", &json!({ "engagementId": engagement_id }))
        .await
    {
        tracing::warn!(
            "Failed to signal recording ready for engagement {}: {:#}",
            engagement_id,
            e
        );
    }
}

/// Backend reachability probe.
pub async fn health(client: &ApiClient) -> bool {
    client.post_unit("/health", &json!({})).await.is_ok()
}
