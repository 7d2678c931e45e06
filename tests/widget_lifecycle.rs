//! End-to-end lifecycle tests through the public API: a runtime wired with a
//! mock media transport and a recording host contract, driven the way an
//! embedder would drive it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use cti_widget::bridge::{
    BroadcastChannel, CallAnsweredInfo, CallCompletedInfo, CallEndedInfo, HostContract, HostEvent,
    HostReadyData, IncomingCallInfo, InitializedInfo, OutgoingCallInfo,
};
use cti_widget::coordinator::{WidgetRuntime, WidgetSnapshot};
use cti_widget::models::IncomingCallData;
use cti_widget::telephony::{OutboundParams, TelephonyCallInfo, TelephonyStatusEvent, VoiceTransport};
use cti_widget::{BridgeRole, Event, ScreenState, WidgetConfig};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct FakeTransport {
    commands: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn log(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn push(&self, cmd: impl Into<String>) {
        self.commands.lock().unwrap().push(cmd.into());
    }
}

impl VoiceTransport for FakeTransport {
    fn register(&self, _token: &str) -> Result<()> {
        self.push("register");
        Ok(())
    }
    fn unregister(&self) {
        self.push("unregister");
    }
    fn update_token(&self, _token: &str) {
        self.push("update_token");
    }
    fn connect(&self, params: &OutboundParams) -> Result<Option<String>> {
        self.push(format!("connect:{}", params.to_number));
        Ok(Some("CA-out".to_string()))
    }
    fn accept(&self) {
        self.push("accept");
    }
    fn reject(&self) {
        self.push("reject");
    }
    fn disconnect(&self) {
        self.push("disconnect");
    }
    fn set_mute(&self, muted: bool) {
        self.push(format!("mute:{}", muted));
    }
    fn send_digits(&self, digits: &str) {
        self.push(format!("digits:{}", digits));
    }
}

#[derive(Clone, Default)]
struct RecordingHost {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingHost {
    fn log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, name: impl Into<String>) {
        self.calls.lock().unwrap().push(name.into());
    }
}

impl HostContract for RecordingHost {
    fn initialized(&self, _info: &InitializedInfo) {
        self.push("initialized");
    }
    fn user_logged_in(&self) {
        self.push("user_logged_in");
    }
    fn user_logged_out(&self) {
        self.push("user_logged_out");
    }
    fn user_available(&self) {
        self.push("user_available");
    }
    fn user_unavailable(&self) {
        self.push("user_unavailable");
    }
    fn incoming_call(&self, info: &IncomingCallInfo) {
        self.push(format!("incoming_call:{}", info.from_number));
    }
    fn outgoing_call(&self, info: &OutgoingCallInfo) {
        self.push(format!("outgoing_call:{}", info.phone_number));
    }
    fn call_answered(&self, _info: &CallAnsweredInfo) {
        self.push("call_answered");
    }
    fn call_ended(&self, info: &CallEndedInfo) {
        self.push(format!("call_ended:{:?}", info.call_end_status));
    }
    fn call_completed(&self, _info: &CallCompletedInfo) {
        self.push("call_completed");
    }
    fn navigate_to_record(&self, _coordinates: &serde_json::Value) {
        self.push("navigate_to_record");
    }
    fn send_error(&self, _message: &str) {
        self.push("send_error");
    }
    fn log_debug(&self, _message: &str) {}
}

struct Harness {
    runtime: WidgetRuntime,
    transport: Arc<FakeTransport>,
    host: RecordingHost,
}

fn start() -> Harness {
    init_logging();
    let config = WidgetConfig {
        from_number: "+15550001111".to_string(),
        standalone_owner_id: Some("owner1".to_string()),
        role: BridgeRole::Standalone,
        ..WidgetConfig::default()
    };
    let transport = Arc::new(FakeTransport::default());
    let host = RecordingHost::default();
    let runtime = WidgetRuntime::start(
        config,
        Arc::clone(&transport) as Arc<dyn VoiceTransport>,
        Box::new(host.clone()),
        BroadcastChannel::new(),
    )
    .expect("runtime start");
    Harness {
        runtime,
        transport,
        host,
    }
}

async fn wait_for<F>(runtime: &WidgetRuntime, what: &str, predicate: F) -> WidgetSnapshot
where
    F: Fn(&WidgetSnapshot) -> bool,
{
    let mut state = runtime.state();
    tokio::time::timeout(Duration::from_secs(3), async {
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
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

fn incoming(sid: &str) -> IncomingCallData {
    IncomingCallData {
        call_sid: sid.to_string(),
        from_number: "+447000000000".to_string(),
        contact_id: None,
        contact_name: Some("Ada".to_string()),
        owner_id: "owner1".to_string(),
        owner_email: None,
        engagement_id: None,
    }
}

#[tokio::test]
async fn inbound_call_lifecycle_reaches_host_contract() {
    let h = start();

    h.runtime
        .dispatch(Event::Host(HostEvent::Ready(HostReadyData::default())));
    wait_for(&h.runtime, "login screen", |s| s.screen == ScreenState::Login).await;

    h.runtime.dispatch(Event::Login);
    wait_for(&h.runtime, "keypad", |s| s.screen == ScreenState::Keypad).await;

    // Push notification rings first, then the media leg arrives.
    h.runtime.dispatch(Event::PushIncoming(incoming("CA1")));
    wait_for(&h.runtime, "incoming screen", |s| {
        s.screen == ScreenState::Incoming
    })
    .await;

    let injector = h.runtime.telephony_injector();
    injector.incoming(TelephonyCallInfo {
        call_sid: Some("CA1".to_string()),
        from_number: Some("+447000000000".to_string()),
    });
    wait_for(&h.runtime, "media leg", |s| {
        s.session.as_ref().is_some_and(|c| c.has_media)
    })
    .await;

    h.runtime.dispatch(Event::Accept);
    wait_for(&h.runtime, "optimistic calling", |s| {
        s.screen == ScreenState::Calling
    })
    .await;
    assert!(h.transport.log().contains(&"accept".to_string()));

    injector.status(TelephonyStatusEvent::Accepted);
    wait_for(&h.runtime, "active call", |s| {
        s.session.as_ref().is_some_and(|c| c.is_active)
    })
    .await;

    h.runtime.dispatch(Event::EndCall);
    wait_for(&h.runtime, "wrap-up screen", |s| {
        s.screen == ScreenState::CallEnded
    })
    .await;
    assert!(h.transport.log().contains(&"disconnect".to_string()));

    h.runtime.dispatch(Event::Save { disposition: None });
    wait_for(&h.runtime, "keypad after save", |s| {
        s.screen == ScreenState::Keypad && s.session.is_none()
    })
    .await;

    let host_log = h.host.log();
    assert!(host_log.contains(&"incoming_call:+447000000000".to_string()));
    assert!(host_log.contains(&"call_answered".to_string()));
    assert!(host_log.contains(&"call_ended:Completed".to_string()));
    assert!(host_log.contains(&"call_completed".to_string()));
    // Answered and ended each reached the host exactly once.
    assert_eq!(
        host_log.iter().filter(|c| *c == "call_answered").count(),
        1
    );
    assert_eq!(
        host_log
            .iter()
            .filter(|c| c.starts_with("call_ended"))
            .count(),
        1
    );

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn duplicate_terminal_events_notify_host_once() {
    let h = start();
    h.runtime
        .dispatch(Event::Host(HostEvent::Ready(HostReadyData::default())));
    h.runtime.dispatch(Event::Login);
    h.runtime.dispatch(Event::PushIncoming(incoming("CA2")));
    wait_for(&h.runtime, "incoming", |s| s.screen == ScreenState::Incoming).await;

    let injector = h.runtime.telephony_injector();
    injector.status(TelephonyStatusEvent::Accepted);
    wait_for(&h.runtime, "active", |s| {
        s.session.as_ref().is_some_and(|c| c.is_active)
    })
    .await;

    // Both sources report the end.
    h.runtime.dispatch(Event::PushStatus(
        cti_widget::models::CallStatusUpdateData {
            call_sid: "CA2".to_string(),
            status: "completed".to_string(),
            duration: None,
        },
    ));
    injector.status(TelephonyStatusEvent::Disconnected);
    wait_for(&h.runtime, "ended", |s| s.screen == ScreenState::CallEnded).await;

    // Give the second terminal a chance to (wrongly) land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.host
            .log()
            .iter()
            .filter(|c| c.starts_with("call_ended"))
            .count(),
        1
    );

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn unavailable_user_never_sees_inbound_call() {
    let h = start();
    h.runtime
        .dispatch(Event::Host(HostEvent::Ready(HostReadyData::default())));
    h.runtime.dispatch(Event::Login);
    wait_for(&h.runtime, "keypad", |s| s.screen == ScreenState::Keypad).await;

    h.runtime.dispatch(Event::SetAvailability(
        cti_widget::Availability::Unavailable,
    ));
    wait_for(&h.runtime, "unavailable", |s| {
        s.availability == cti_widget::Availability::Unavailable
    })
    .await;

    h.runtime.dispatch(Event::PushIncoming(incoming("CA3")));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snap = h.runtime.snapshot();
    assert_eq!(snap.screen, ScreenState::Keypad);
    assert!(snap.session.is_none());
    assert!(!h
        .host
        .log()
        .iter()
        .any(|c| c.starts_with("incoming_call")));

    h.runtime.shutdown().await;
}
