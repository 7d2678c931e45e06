//! Push notification client
//!
//! Connects to the notification server over a socket.io WebSocket, joins the
//! per-user owner room, and dispatches inbound-call and call-status events to
//! subscribers. Holds no business state beyond the connection handle and the
//! owner id; reconnection is automatic with exponential backoff.

pub mod socket;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;

use crate::handlers::{HandlerRegistry, Subscription};
use crate::models::{CallAnsweredData, CallStatusUpdateData, IncomingCallData};

/// Reason the inner connection loop exited.
enum DisconnectReason {
    /// Clean shutdown requested. Do not reconnect.
    Shutdown,
    /// Error or server-initiated close. Should reconnect.
    Error(anyhow::Error),
}

struct PushShared {
    base_url: String,
    http: reqwest::Client,
    owner_id: Mutex<Option<String>>,
    connected: AtomicBool,
    shutdown: Notify,

    incoming: HandlerRegistry<IncomingCallData>,
    answered: HandlerRegistry<CallAnsweredData>,
    status: HandlerRegistry<CallStatusUpdateData>,
    on_connect: HandlerRegistry<()>,
    on_disconnect: HandlerRegistry<()>,
}

/// Client for the real-time notification channel.
pub struct PushClient {
    shared: Arc<PushShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PushClient {
    pub fn new(push_url: &str) -> Self {
        Self {
            shared: Arc::new(PushShared {
                base_url: push_url.trim_end_matches('/').to_string(),
                http: reqwest::Client::new(),
                owner_id: Mutex::new(None),
                connected: AtomicBool::new(false),
                shutdown: Notify::new(),
                incoming: HandlerRegistry::new(),
                answered: HandlerRegistry::new(),
                status: HandlerRegistry::new(),
                on_connect: HandlerRegistry::new(),
                on_disconnect: HandlerRegistry::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Connect and join the owner's room. Idempotent for the same owner; a
    /// different owner tears the existing connection down first.
    pub fn connect(&self, owner_id: &str) {
        {
            let mut task = self.task.lock().expect("push task slot poisoned");
            let current = self.shared.owner_id.lock().expect("owner poisoned").clone();
            let running = task.as_ref().is_some_and(|t| !t.is_finished());

            if running && current.as_deref() == Some(owner_id) {
                tracing::debug!("Push client already connected for {}", owner_id);
                return;
            }
            if running {
                tracing::info!("Push owner changed, reconnecting as {}", owner_id);
                self.shared.shutdown.notify_waiters();
                if let Some(t) = task.take() {
                    t.abort();
                }
            }

            *self.shared.owner_id.lock().expect("owner poisoned") = Some(owner_id.to_string());
            *task = Some(tokio::spawn(connect_and_run(Arc::clone(&self.shared))));
        }
    }

    /// Tear down the connection and background task.
    pub fn disconnect(&self) {
        self.shared.shutdown.notify_waiters();
        if let Some(task) = self.task.lock().expect("push task slot poisoned").take() {
            task.abort();
        }
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared.on_disconnect.emit(&());
        }
        *self.shared.owner_id.lock().expect("owner poisoned") = None;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn owner_id(&self) -> Option<String> {
        self.shared.owner_id.lock().expect("owner poisoned").clone()
    }

    pub fn on_incoming_call<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&IncomingCallData) + Send + Sync + 'static,
    {
        self.shared.incoming.subscribe(handler)
    }

    pub fn on_call_answered<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CallAnsweredData) + Send + Sync + 'static,
    {
        self.shared.answered.subscribe(handler)
    }

    pub fn on_call_status_update<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CallStatusUpdateData) + Send + Sync + 'static,
    {
        self.shared.status.subscribe(handler)
    }

    pub fn on_connect<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.shared.on_connect.subscribe(handler)
    }

    pub fn on_disconnect<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.shared.on_disconnect.subscribe(handler)
    }
}

impl Drop for PushClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().expect("push task slot poisoned").take() {
            task.abort();
        }
    }
}

/// Run the push connection with automatic reconnection.
///
/// On transient errors or server-initiated disconnects, reconnects with
/// exponential backoff (1s, 2s, 4s, ... capped at 64s). Backoff resets after
/// a stable session (>60s connected).
async fn connect_and_run(shared: Arc<PushShared>) {
    let mut backoff = 1u64;

    loop {
        match connect_and_run_inner(&shared).await {
            Ok(DisconnectReason::Shutdown) => {
                return;
            }
            Ok(DisconnectReason::Error(e)) => {
                backoff = 1;
                tracing::warn!(
                    "Push channel disconnected after stable session: {:#}. Reconnecting in 1s...",
                    e,
                );
                tokio::select! {
                    _ = time::sleep(Duration::from_secs(1)) => {}
                    _ = shared.shutdown.notified() => return,
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Push channel disconnected: {:#}. Reconnecting in {}s...",
                    e,
                    backoff
                );
                tokio::select! {
                    _ = time::sleep(Duration::from_secs(backoff)) => {}
                    _ = shared.shutdown.notified() => return,
                }
                backoff = (backoff * 2).min(64);
            }
        }
    }
}

/// Run one full push session: negotiate, connect, join room, event loop.
async fn connect_and_run_inner(shared: &Arc<PushShared>) -> Result<DisconnectReason> {
    let owner_id = shared
        .owner_id
        .lock()
        .expect("owner poisoned")
        .clone()
        .ok_or_else(|| anyhow::anyhow!("No owner id set"))?;

    // 1. Negotiate session id over HTTP
    let session_id = socket::negotiate(&shared.http, &shared.base_url).await?;

    // 2. Connect WebSocket
    let mut ws = socket::PushSocket::connect(&shared.base_url, &session_id).await?;

    // 3. Wait for handshake frame (1::)
    let frame = ws
        .recv_frame()
        .await?
        .ok_or_else(|| anyhow::anyhow!("Connection closed before handshake"))?;
    if !frame.starts_with("1::") {
        tracing::warn!("Expected 1:: handshake, got: {}", frame);
    }

    // 4. Join the owner's room for targeted notifications
    ws.emit_event("join_owner_room", serde_json::Value::String(owner_id.clone()))
        .await?;
    tracing::info!("Joined owner room: {}", owner_id);

    shared.connected.store(true, Ordering::SeqCst);
    shared.on_connect.emit(&());

    // 5. Event loop: recv frames, send heartbeat.
    let connected_at = Instant::now();
    let stability_threshold = Duration::from_secs(60);
    let mut heartbeat = time::interval(Duration::from_secs(25));
    heartbeat.tick().await; // skip first immediate tick

    let disconnect_reason = loop {
        tokio::select! {
            frame = ws.recv_frame() => {
                match frame {
                    Ok(Some(text)) => handle_frame(shared, &text),
                    Ok(None) => {
                        break DisconnectReason::Error(anyhow::anyhow!("WebSocket closed by server"));
                    }
                    Err(e) => {
                        break DisconnectReason::Error(e.context("WebSocket recv error"));
                    }
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = ws.send_text("2::").await {
                    break DisconnectReason::Error(e.context("Heartbeat send failed"));
                }
            }
            _ = shared.shutdown.notified() => {
                break DisconnectReason::Shutdown;
            }
        }
    };

    shared.connected.store(false, Ordering::SeqCst);
    shared.on_disconnect.emit(&());

    // Stable sessions reset the caller's backoff.
    if connected_at.elapsed() >= stability_threshold {
        return Ok(disconnect_reason);
    }
    match disconnect_reason {
        DisconnectReason::Shutdown => Ok(DisconnectReason::Shutdown),
        DisconnectReason::Error(e) => Err(e),
    }
}

/// Dispatch an incoming socket.io frame to subscribers.
fn handle_frame(shared: &Arc<PushShared>, frame: &str) {
    if frame.starts_with("2::") {
        tracing::debug!("Heartbeat ping from server");
        return;
    }

    let Some(event) = socket::parse_event(frame) else {
        tracing::debug!("Unhandled frame: {}", frame);
        return;
    };

    match event.name.as_str() {
        "incoming_call" => match serde_json::from_value::<IncomingCallData>(event.arg) {
            Ok(data) => {
                tracing::info!("Incoming call notification: sid={}", data.call_sid);
                shared.incoming.emit(&data);
            }
            Err(e) => tracing::warn!("Bad incoming_call payload: {:#}", e),
        },
        "call_answered" => match serde_json::from_value::<CallAnsweredData>(event.arg) {
            Ok(data) => {
                tracing::info!("Call answered: sid={}", data.call_sid);
                shared.answered.emit(&data);
            }
            Err(e) => tracing::warn!("Bad call_answered payload: {:#}", e),
        },
        "call_status_update" => match serde_json::from_value::<CallStatusUpdateData>(event.arg) {
            Ok(data) => {
                tracing::debug!("Call status update: sid={} status={}", data.call_sid, data.status);
                shared.status.emit(&data);
            }
            Err(e) => tracing::warn!("Bad call_status_update payload: {:#}", e),
        },
        "joined" => {
            tracing::debug!("Room join confirmed: {}", event.arg);
        }
        other => {
            tracing::debug!("Unhandled push event: {}", other);
        }
    }
}
