//! Cross-instance broadcast channel
//!
//! Sibling widget instances (other tabs of the same session) mirror their
//! bridge notifications to each other so every tab shows the same state.
//! Each instance stamps its messages with its own origin id and filters its
//! own messages out on receive, so a mirror can never loop back.

use tokio::sync::broadcast;
use uuid::Uuid;

use super::contract::{
    CallAnsweredInfo, CallCompletedInfo, CallEndedInfo, IncomingCallInfo, OutgoingCallInfo,
};

const CHANNEL_CAPACITY: usize = 64;

/// A bridge notification as mirrored between instances.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    LoggedIn,
    LoggedOut,
    Available,
    Unavailable,
    IncomingCall(IncomingCallInfo),
    OutgoingCall(OutgoingCallInfo),
    CallAnswered(CallAnsweredInfo),
    CallEnded(CallEndedInfo),
    CallCompleted(CallCompletedInfo),
}

#[derive(Debug, Clone)]
pub struct BridgeMessage {
    pub origin: Uuid,
    pub event: BridgeEvent,
}

/// One instance's handle on the shared channel.
pub struct BroadcastChannel {
    origin: Uuid,
    tx: broadcast::Sender<BridgeMessage>,
}

impl BroadcastChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            origin: Uuid::new_v4(),
            tx,
        }
    }

    /// Join the same channel under a fresh origin id.
    pub fn handle(&self) -> Self {
        Self {
            origin: Uuid::new_v4(),
            tx: self.tx.clone(),
        }
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Publish an event to sibling instances. Having no listeners is fine.
    pub fn publish(&self, event: BridgeEvent) {
        let msg = BridgeMessage {
            origin: self.origin,
            event,
        };
        if self.tx.send(msg).is_err() {
            tracing::trace!("No sibling instances listening");
        }
    }

    /// Subscribe to sibling messages. Own messages are filtered out.
    pub fn subscribe(&self) -> BridgeReceiver {
        BridgeReceiver {
            origin: self.origin,
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BridgeReceiver {
    origin: Uuid,
    rx: broadcast::Receiver<BridgeMessage>,
}

impl BridgeReceiver {
    /// Next message from a sibling instance, or `None` when the channel is
    /// gone. Lagged receivers skip to the oldest retained message.
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if msg.origin == self.origin => continue,
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Broadcast receiver lagged, dropped {} messages", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
