//! Telephony client adapter
//!
//! Wraps the browser media transport behind the `VoiceTransport` trait: the
//! adapter manages device identity, token fetch/refresh, and the current
//! call handle, and re-exposes transport callbacks as subscribable events.
//! It holds no call-lifecycle policy; that belongs to the coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::{Context, Result};

use crate::api::{self, ApiClient};
use crate::handlers::{HandlerRegistry, Subscription};

/// Device- and call-level events from the media transport, merged into one
/// stream the way subscribers consume them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyStatusEvent {
    Registered,
    Unregistered,
    DeviceError(String),
    TokenWillExpire,
    Accepted,
    Ringing,
    Disconnected,
    Canceled,
    Rejected,
    CallError(String),
    Reconnecting,
    Reconnected,
}

/// Handle data for an incoming or in-flight media call.
#[derive(Debug, Clone, Default)]
pub struct TelephonyCallInfo {
    pub call_sid: Option<String>,
    pub from_number: Option<String>,
}

/// Parameters for an outbound media session.
#[derive(Debug, Clone)]
pub struct OutboundParams {
    pub to_number: String,
    pub from_number: String,
}

/// The external media transport (browser voice SDK or a test double).
///
/// Implementations emit their device/call callbacks through the
/// [`TelephonyEventInjector`] obtained from the client.
pub trait VoiceTransport: Send + Sync {
    fn register(&self, token: &str) -> Result<()>;
    fn unregister(&self);
    fn update_token(&self, token: &str);
    /// Start an outbound media session. Returns the provider call sid when
    /// the transport already knows it.
    fn connect(&self, params: &OutboundParams) -> Result<Option<String>>;
    fn accept(&self);
    fn reject(&self);
    fn disconnect(&self);
    fn set_mute(&self, muted: bool);
    fn send_digits(&self, digits: &str);
}

struct TelephonyInner {
    transport: Arc<dyn VoiceTransport>,
    identity: Mutex<Option<String>>,
    registered: AtomicBool,
    initializing: AtomicBool,
    current_call: Mutex<Option<TelephonyCallInfo>>,

    incoming: HandlerRegistry<TelephonyCallInfo>,
    status: HandlerRegistry<TelephonyStatusEvent>,
}

/// Event-sourcing wrapper around the media transport.
pub struct TelephonyClient {
    inner: Arc<TelephonyInner>,
}

impl TelephonyClient {
    pub fn new(transport: Arc<dyn VoiceTransport>) -> Self {
        Self {
            inner: Arc::new(TelephonyInner {
                transport,
                identity: Mutex::new(None),
                registered: AtomicBool::new(false),
                initializing: AtomicBool::new(false),
                current_call: Mutex::new(None),
                incoming: HandlerRegistry::new(),
                status: HandlerRegistry::new(),
            }),
        }
    }

    /// Fetch an access token for `identity` and register the device.
    /// Idempotent for the same identity; concurrent calls are coalesced.
    pub async fn initialize(&self, identity: &str, api_client: &ApiClient) -> Result<()> {
        let inner = &self.inner;

        if inner.registered.load(Ordering::SeqCst)
            && inner.identity.lock().expect("identity poisoned").as_deref() == Some(identity)
        {
            tracing::debug!("Telephony already initialized for {}", identity);
            return Ok(());
        }
        if inner.initializing.swap(true, Ordering::SeqCst) {
            tracing::debug!("Telephony initialization already in progress");
            return Ok(());
        }

        let result = async {
            let token = api::voice_token(api_client, identity)
                .await
                .context("Failed to fetch voice token")?;

            if inner.registered.swap(false, Ordering::SeqCst) {
                inner.transport.unregister();
            }

            inner
                .transport
                .register(&token.token)
                .context("Device registration failed")?;

            *inner.identity.lock().expect("identity poisoned") = Some(identity.to_string());
            inner.registered.store(true, Ordering::SeqCst);
            tracing::info!("Telephony device registered as {}", identity);
            Ok(())
        }
        .await;

        inner.initializing.store(false, Ordering::SeqCst);
        result
    }

    /// Refresh the device token (on `TokenWillExpire`).
    pub async fn refresh_token(&self, api_client: &ApiClient) -> Result<()> {
        let identity = self
            .inner
            .identity
            .lock()
            .expect("identity poisoned")
            .clone()
            .context("No device identity, cannot refresh token")?;

        let token = api::voice_token(api_client, &identity)
            .await
            .context("Failed to refresh voice token")?;
        self.inner.transport.update_token(&token.token);
        tracing::info!("Telephony token refreshed for {}", identity);
        Ok(())
    }

    /// Start an outbound call. The returned sid may be absent until the
    /// provider confirms the leg.
    pub fn make_call(&self, to_number: &str, from_number: &str) -> Result<Option<String>> {
        anyhow::ensure!(
            self.inner.registered.load(Ordering::SeqCst),
            "Telephony device not registered"
        );

        let params = OutboundParams {
            to_number: to_number.to_string(),
            from_number: from_number.to_string(),
        };
        let sid = self
            .inner
            .transport
            .connect(&params)
            .with_context(|| format!("Outbound call to {} failed", to_number))?;

        *self.inner.current_call.lock().expect("call slot poisoned") = Some(TelephonyCallInfo {
            call_sid: sid.clone(),
            from_number: None,
        });

        Ok(sid)
    }

    /// Accept the pending incoming call. No-op without one.
    pub fn accept(&self) {
        if self.has_call() {
            self.inner.transport.accept();
        } else {
            tracing::warn!("No incoming call to accept");
        }
    }

    /// Reject the pending incoming call. No-op without one.
    pub fn reject(&self) {
        if self.take_call().is_some() {
            self.inner.transport.reject();
        } else {
            tracing::warn!("No incoming call to reject");
        }
    }

    /// End the current call. Safe to call after the transport has already
    /// torn the session down.
    pub fn hangup(&self) {
        if self.take_call().is_some() {
            self.inner.transport.disconnect();
        } else {
            tracing::debug!("No active call to end");
        }
    }

    pub fn set_mute(&self, muted: bool) {
        if self.has_call() {
            self.inner.transport.set_mute(muted);
        }
    }

    pub fn send_digits(&self, digits: &str) {
        if self.has_call() {
            self.inner.transport.send_digits(digits);
        }
    }

    pub fn current_call_sid(&self) -> Option<String> {
        self.inner
            .current_call
            .lock()
            .expect("call slot poisoned")
            .as_ref()
            .and_then(|c| c.call_sid.clone())
    }

    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::SeqCst)
    }

    /// Release the call and the device.
    pub fn destroy(&self) {
        if self.take_call().is_some() {
            self.inner.transport.disconnect();
        }
        if self.inner.registered.swap(false, Ordering::SeqCst) {
            self.inner.transport.unregister();
        }
        *self.inner.identity.lock().expect("identity poisoned") = None;
        tracing::info!("Telephony client destroyed");
    }

    /// Handle through which the transport injects its callbacks.
    pub fn injector(&self) -> TelephonyEventInjector {
        TelephonyEventInjector {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn on_incoming<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TelephonyCallInfo) + Send + Sync + 'static,
    {
        self.inner.incoming.subscribe(handler)
    }

    pub fn on_status<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TelephonyStatusEvent) + Send + Sync + 'static,
    {
        self.inner.status.subscribe(handler)
    }

    fn has_call(&self) -> bool {
        self.inner.current_call.lock().expect("call slot poisoned").is_some()
    }

    fn take_call(&self) -> Option<TelephonyCallInfo> {
        self.inner.current_call.lock().expect("call slot poisoned").take()
    }
}

/// Injection handle the transport uses to surface its events. Weak so a
/// dangling transport cannot keep the client alive.
#[derive(Clone)]
pub struct TelephonyEventInjector {
    inner: Weak<TelephonyInner>,
}

impl TelephonyEventInjector {
    /// An incoming media call arrived from the provider.
    pub fn incoming(&self, info: TelephonyCallInfo) {
        let Some(inner) = self.inner.upgrade() else { return };
        *inner.current_call.lock().expect("call slot poisoned") = Some(info.clone());
        inner.incoming.emit(&info);
    }

    /// A device- or call-level status change.
    pub fn status(&self, event: TelephonyStatusEvent) {
        let Some(inner) = self.inner.upgrade() else { return };

        match &event {
            TelephonyStatusEvent::Registered => {
                inner.registered.store(true, Ordering::SeqCst);
            }
            TelephonyStatusEvent::Unregistered => {
                inner.registered.store(false, Ordering::SeqCst);
            }
            // The call handle is gone once the transport reports teardown.
            TelephonyStatusEvent::Disconnected
            | TelephonyStatusEvent::Canceled
            | TelephonyStatusEvent::Rejected => {
                inner.current_call.lock().expect("call slot poisoned").take();
            }
            _ => {}
        }

        inner.status.emit(&event);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records transport commands for assertions; never fails.
    #[derive(Default)]
    pub struct MockTransport {
        pub commands: Mutex<Vec<String>>,
        pub connect_sid: Mutex<Option<String>>,
        pub fail_connect: Mutex<bool>,
    }

    impl MockTransport {
        pub fn log(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }

        fn push(&self, cmd: impl Into<String>) {
            self.commands.lock().unwrap().push(cmd.into());
        }
    }

    impl VoiceTransport for MockTransport {
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
            if *self.fail_connect.lock().unwrap() {
                anyhow::bail!("transport refused");
            }
            self.push(format!("connect:{}", params.to_number));
            Ok(self.connect_sid.lock().unwrap().clone())
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
}

#[cfg(test)]
mod tests {
    use super::test_support::MockTransport;
    use super::*;

    fn client_with_mock() -> (TelephonyClient, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::default());
        let client = TelephonyClient::new(transport.clone() as Arc<dyn VoiceTransport>);
        (client, transport)
    }

    #[test]
    fn test_actions_without_call_are_noops() {
        let (client, transport) = client_with_mock();
        client.accept();
        client.reject();
        client.hangup();
        client.set_mute(true);
        client.send_digits("5");
        assert!(transport.log().is_empty());
    }

    #[test]
    fn test_incoming_sets_call_handle_and_emits() {
        let (client, transport) = client_with_mock();
        let seen = Arc::new(Mutex::new(0u32));
        let s = Arc::clone(&seen);
        let _sub = client.on_incoming(move |_| *s.lock().unwrap() += 1);

        client.injector().incoming(TelephonyCallInfo {
            call_sid: Some("CA1".into()),
            from_number: Some("+1555".into()),
        });

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(client.current_call_sid().as_deref(), Some("CA1"));

        client.accept();
        assert_eq!(transport.log(), ["accept"]);
    }

    #[test]
    fn test_disconnect_event_clears_call_handle() {
        let (client, _transport) = client_with_mock();
        client.injector().incoming(TelephonyCallInfo {
            call_sid: Some("CA2".into()),
            from_number: None,
        });
        client.injector().status(TelephonyStatusEvent::Disconnected);
        assert!(client.current_call_sid().is_none());

        // Ending again after teardown is a no-op, not an error.
        client.hangup();
    }

    #[test]
    fn test_make_call_requires_registration() {
        let (client, _transport) = client_with_mock();
        assert!(client.make_call("+12025550123", "+15550001111").is_err());
    }

    #[test]
    fn test_make_call_records_sid() {
        let (client, transport) = client_with_mock();
        client.injector().status(TelephonyStatusEvent::Registered);
        *transport.connect_sid.lock().unwrap() = Some("CA3".into());

        let sid = client.make_call("+12025550123", "+15550001111").unwrap();
        assert_eq!(sid.as_deref(), Some("CA3"));
        assert_eq!(client.current_call_sid().as_deref(), Some("CA3"));
        assert_eq!(transport.log(), ["connect:+12025550123"]);
    }

    #[test]
    fn test_registered_tracks_device_events() {
        let (client, _transport) = client_with_mock();
        assert!(!client.is_registered());
        client.injector().status(TelephonyStatusEvent::Registered);
        assert!(client.is_registered());
        client.injector().status(TelephonyStatusEvent::Unregistered);
        assert!(!client.is_registered());
    }
}
