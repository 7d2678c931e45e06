//! Async driver for the coordinator
//!
//! Owns the single event queue the reducer consumes. Adapter callbacks from
//! the push channel, the telephony transport, and sibling broadcasts are
//! turned into [`Event`]s here; effects coming back out of the reducer are
//! executed against the services, with async results (permission outcomes,
//! dial results, contact lookups) fed back into the same queue. The UI reads
//! state through a `watch` channel snapshot after every reduction.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::api::{self, ApiClient, PermissionGate};
use crate::bridge::{BroadcastChannel, HostBridge, HostContract};
use crate::config::WidgetConfig;
use crate::models::{Availability, PermissionStatus, ScreenState};
use crate::push::PushClient;
use crate::telephony::{TelephonyClient, TelephonyEventInjector, VoiceTransport};

use super::session::CallSession;
use super::{BridgeNotify, CallCoordinator, Effect, Event};

/// Read-only state snapshot published after every reduction.
#[derive(Clone)]
pub struct WidgetSnapshot {
    pub screen: ScreenState,
    pub logged_in: bool,
    pub availability: Availability,
    pub dial_number: String,
    pub session: Option<CallSession>,
    pub call_duration_secs: u64,
    pub validating: bool,
    pub push_connected: bool,
}

struct Services {
    config: WidgetConfig,
    api: Arc<ApiClient>,
    gate: PermissionGate,
    push: PushClient,
    telephony: TelephonyClient,
    bridge: HostBridge,
}

/// The running widget engine. Dropping or shutting it down tears the
/// background tasks and service connections down.
pub struct WidgetRuntime {
    events: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<WidgetSnapshot>,
    services: Arc<Services>,
    stop: Arc<Notify>,
    main_task: JoinHandle<()>,
    sibling_task: JoinHandle<()>,
}

impl WidgetRuntime {
    /// Wire the services together and start the event loop.
    ///
    /// `channel` is shared between sibling instances of the same session;
    /// each instance calls [`BroadcastChannel::handle`] on a common root.
    pub fn start(
        config: WidgetConfig,
        transport: Arc<dyn VoiceTransport>,
        contract: Box<dyn HostContract>,
        channel: BroadcastChannel,
    ) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config)?);
        let services = Arc::new(Services {
            gate: PermissionGate::new(Arc::clone(&api)),
            push: PushClient::new(&config.push_url),
            telephony: TelephonyClient::new(transport),
            bridge: HostBridge::new(contract, config.role, channel),
            api,
            config,
        });

        let (events, mut events_rx) = mpsc::unbounded_channel::<Event>();
        let coordinator = CallCoordinator::new(&services.config);
        let (state_tx, state) = watch::channel(snapshot_of(&coordinator));
        let stop = Arc::new(Notify::new());

        // Adapter callbacks feed the queue. The subscriptions live as long
        // as the main loop.
        let mut subscriptions = Vec::new();
        {
            let tx = events.clone();
            subscriptions.push(services.push.on_incoming_call(move |data| {
                let _ = tx.send(Event::PushIncoming(data.clone()));
            }));
            let tx = events.clone();
            subscriptions.push(services.push.on_call_answered(move |data| {
                let _ = tx.send(Event::PushAnswered(data.clone()));
            }));
            let tx = events.clone();
            subscriptions.push(services.push.on_call_status_update(move |data| {
                let _ = tx.send(Event::PushStatus(data.clone()));
            }));
            let tx = events.clone();
            subscriptions.push(services.push.on_connect(move |_| {
                let _ = tx.send(Event::PushConnected);
            }));
            let tx = events.clone();
            subscriptions.push(services.push.on_disconnect(move |_| {
                let _ = tx.send(Event::PushDisconnected);
            }));
            let tx = events.clone();
            subscriptions.push(services.telephony.on_incoming(move |info| {
                let _ = tx.send(Event::TelephonyIncoming(info.clone()));
            }));
            let tx = events.clone();
            subscriptions.push(services.telephony.on_status(move |status| {
                let _ = tx.send(Event::TelephonyStatus(status.clone()));
            }));
        }

        let sibling_task = {
            let mut rx = services.bridge.subscribe_siblings();
            let tx = events.clone();
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if tx.send(Event::Sibling(msg)).is_err() {
                        break;
                    }
                }
            })
        };

        let main_task = {
            let services = Arc::clone(&services);
            let events = events.clone();
            let stop = Arc::clone(&stop);
            let mut coordinator = coordinator;
            tokio::spawn(async move {
                let _subscriptions = subscriptions;
                loop {
                    let event = tokio::select! {
                        event = events_rx.recv() => match event {
                            Some(event) => event,
                            None => break,
                        },
                        _ = stop.notified() => break,
                    };

                    tracing::debug!("Event: {:?}", event);
                    for effect in coordinator.handle(event) {
                        execute(&services, &events, effect);
                    }
                    let _ = state_tx.send(snapshot_of(&coordinator));
                }
                tracing::debug!("Coordinator loop stopped");
            })
        };

        Ok(Self {
            events,
            state,
            services,
            stop,
            main_task,
            sibling_task,
        })
    }

    /// Queue an event for the coordinator.
    pub fn dispatch(&self, event: Event) {
        if self.events.send(event).is_err() {
            tracing::warn!("Event dropped: coordinator loop has stopped");
        }
    }

    /// Watch channel carrying the latest state snapshot.
    pub fn state(&self) -> watch::Receiver<WidgetSnapshot> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> WidgetSnapshot {
        self.state.borrow().clone()
    }

    /// Handle for the media transport to inject its callbacks.
    pub fn telephony_injector(&self) -> TelephonyEventInjector {
        self.services.telephony.injector()
    }

    /// Disconnect services and stop the event loop.
    pub async fn shutdown(self) {
        self.services.push.disconnect();
        self.services.telephony.destroy();
        // notify_one stores a permit, so the loop stops even if it has not
        // reached its select yet. The effect executor keeps a sender clone,
        // which rules out closing the queue as the stop signal.
        self.stop.notify_one();
        self.sibling_task.abort();
        let _ = self.main_task.await;
    }
}

fn snapshot_of(coordinator: &CallCoordinator) -> WidgetSnapshot {
    WidgetSnapshot {
        screen: coordinator.screen(),
        logged_in: coordinator.is_logged_in(),
        availability: coordinator.availability(),
        dial_number: coordinator.dial_number().to_string(),
        session: coordinator.session().cloned(),
        call_duration_secs: coordinator.call_duration_secs(),
        validating: coordinator.is_validating(),
        push_connected: coordinator.is_push_connected(),
    }
}

/// Execute one effect. Fast paths run inline; anything that awaits is
/// spawned, with its outcome fed back through `tx`.
fn execute(services: &Arc<Services>, tx: &mpsc::UnboundedSender<Event>, effect: Effect) {
    match effect {
        Effect::ValidatePermission { number } => {
            let services = Arc::clone(services);
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = services.gate.validate(&number).await;
                let _ = tx.send(Event::PermissionChecked(result));
            });
        }
        Effect::SendPermissionRequest { number, contact_id } => {
            let services = Arc::clone(services);
            let tx = tx.clone();
            tokio::spawn(async move {
                match services
                    .gate
                    .request_permission(&number, contact_id.as_deref().unwrap_or(""))
                    .await
                {
                    Ok(status) => {
                        let _ = tx.send(Event::PermissionRequested(status));
                    }
                    Err(e) => {
                        tracing::warn!("Permission request for {} failed: {:#}", number, e);
                        let _ = tx.send(Event::PermissionRequested(PermissionStatus::Denied));
                    }
                }
            });
        }
        Effect::StartOutboundCall { number } => {
            let event = match services
                .telephony
                .make_call(&number, services.api.from_number())
            {
                Ok(call_sid) => Event::DialStarted { call_sid },
                Err(e) => Event::DialFailed {
                    error: format!("{:#}", e),
                },
            };
            let _ = tx.send(event);
        }
        Effect::AcceptTelephony => services.telephony.accept(),
        Effect::RejectTelephony => services.telephony.reject(),
        Effect::HangupTelephony => services.telephony.hangup(),
        Effect::SetMute(muted) => services.telephony.set_mute(muted),
        Effect::SendDigits(digits) => services.telephony.send_digits(&digits),
        Effect::ApiAnswer { call_sid } => {
            let services = Arc::clone(services);
            tokio::spawn(async move {
                api::answer_call(&services.api, &call_sid).await;
            });
        }
        Effect::ApiDecline { call_sid } => {
            let services = Arc::clone(services);
            tokio::spawn(async move {
                api::decline_call(&services.api, &call_sid).await;
            });
        }
        Effect::ApiEnd { call_sid, status } => {
            let services = Arc::clone(services);
            tokio::spawn(async move {
                api::end_call(&services.api, &call_sid, Some(status.as_str())).await;
            });
        }
        Effect::ConnectServices { owner_id } => {
            services.push.connect(&owner_id);
            let identity = services.config.identity_for(&owner_id);
            let services = Arc::clone(services);
            tokio::spawn(async move {
                if let Err(e) = services.telephony.initialize(&identity, &services.api).await {
                    tracing::error!("Telephony initialization failed: {:#}", e);
                    services.bridge.send_error(&format!("{:#}", e));
                }
            });
        }
        Effect::DisconnectServices => {
            services.push.disconnect();
            services.telephony.destroy();
        }
        Effect::RefreshVoiceToken => {
            let services = Arc::clone(services);
            tokio::spawn(async move {
                if let Err(e) = services.telephony.refresh_token(&services.api).await {
                    tracing::warn!("Voice token refresh failed: {:#}", e);
                }
            });
        }
        Effect::LookupContact { number } => {
            let services = Arc::clone(services);
            let tx = tx.clone();
            tokio::spawn(async move {
                let contact = match api::contact_by_number(&services.api, &number).await {
                    Ok(contact) => contact,
                    Err(e) => {
                        tracing::debug!("Contact lookup for {} failed: {:#}", number, e);
                        None
                    }
                };
                let _ = tx.send(Event::ContactResolved { number, contact });
            });
        }
        Effect::RecordingReady { engagement_id } => {
            let services = Arc::clone(services);
            tokio::spawn(async move {
                api::recording_ready(&services.api, engagement_id).await;
            });
        }
        Effect::Bridge(notify) => notify_bridge(&services.bridge, notify),
        Effect::Replay(msg) => services.bridge.replay(&msg),
    }
}

fn notify_bridge(bridge: &HostBridge, notify: BridgeNotify) {
    match notify {
        BridgeNotify::Initialized { logged_in, available } => {
            bridge.initialized(logged_in, available)
        }
        BridgeNotify::LoggedIn => bridge.user_logged_in(),
        BridgeNotify::LoggedOut => bridge.user_logged_out(),
        BridgeNotify::Available => bridge.user_available(),
        BridgeNotify::Unavailable => bridge.user_unavailable(),
        BridgeNotify::IncomingCall {
            from_number,
            contact_name,
        } => {
            bridge.incoming_call(&from_number, contact_name.as_deref());
        }
        BridgeNotify::OutgoingCall { number } => {
            bridge.outgoing_call(&number);
        }
        BridgeNotify::CallAnswered => bridge.call_answered(),
        BridgeNotify::CallEnded(status) => bridge.call_ended(status),
        BridgeNotify::CallCompleted {
            engagement_id,
            properties,
        } => bridge.call_completed(engagement_id, properties),
        BridgeNotify::NavigateToRecord(coordinates) => bridge.navigate_to_record(&coordinates),
        BridgeNotify::ReportError(message) => bridge.send_error(&message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{HostEvent, HostReadyData, NullHostContract};
    use crate::telephony::test_support::MockTransport;
    use std::time::Duration;

    fn start_runtime() -> WidgetRuntime {
        let config = WidgetConfig {
            standalone_owner_id: Some("owner1".to_string()),
            ..WidgetConfig::default()
        };
        WidgetRuntime::start(
            config,
            Arc::new(MockTransport::default()),
            Box::new(NullHostContract),
            BroadcastChannel::new(),
        )
        .expect("runtime start")
    }

    async fn wait_for<F>(runtime: &WidgetRuntime, predicate: F) -> WidgetSnapshot
    where
        F: Fn(&WidgetSnapshot) -> bool,
    {
        let mut state = runtime.state();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let snap = state.borrow().clone();
                    if predicate(&snap) {
                        return snap;
                    }
                }
                state.changed().await.expect("state channel closed");
            }
        })
        .await
        .expect("timed out waiting for state")
    }

    #[tokio::test]
    async fn test_ready_moves_to_login_screen() {
        let runtime = start_runtime();
        assert_eq!(runtime.snapshot().screen, ScreenState::Loading);

        runtime.dispatch(Event::Host(HostEvent::Ready(HostReadyData::default())));
        let snap = wait_for(&runtime, |s| s.screen == ScreenState::Login).await;
        assert!(!snap.logged_in);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_dial_number_reaches_snapshot() {
        let runtime = start_runtime();
        runtime.dispatch(Event::SetDialNumber("+12025550123".to_string()));
        let snap = wait_for(&runtime, |s| !s.dial_number.is_empty()).await;
        assert_eq!(snap.dial_number, "+12025550123");
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_event_loop() {
        let runtime = start_runtime();
        let events = runtime.events.clone();
        // Shutdown straight after start, before the loop has been polled
        // into its select. Must complete promptly, not hang.
        tokio::time::timeout(Duration::from_secs(5), runtime.shutdown())
            .await
            .expect("shutdown did not complete");
        // The receiver is gone; sends fail instead of queueing forever.
        assert!(events.send(Event::Login).is_err());
    }
}
