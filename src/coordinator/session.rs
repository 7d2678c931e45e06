//! Per-call session state
//!
//! One value holds everything known about the call on screen, including the
//! reconciliation flags that used to be scattered mutable refs in older
//! revisions: `is_active` (answered applied), `already_ended` (terminal
//! applied), `pending_accept` (user accepted before the media leg existed)
//! and `we_ended_call` (local hangup, for cross-tab echo suppression).

use crate::models::{CallStatus, Direction, IncomingCallData};
use crate::telephony::TelephonyCallInfo;

#[derive(Debug, Clone)]
pub struct CallSession {
    pub direction: Direction,
    /// Provider call sid. Outbound sessions may not know it yet.
    pub call_sid: Option<String>,
    /// The other party's number, cleaned.
    pub peer_number: String,
    pub contact_id: Option<String>,
    pub contact_name: Option<String>,
    pub engagement_id: Option<i64>,
    pub status: CallStatus,

    /// Answered has been applied; the call is live.
    pub is_active: bool,
    /// A terminal transition has been applied. Set before any side effects
    /// of ending, so later terminal events are no-ops.
    pub already_ended: bool,
    /// User accepted before the media leg arrived; the next matching media
    /// ring consumes this and auto-accepts.
    pub pending_accept: bool,
    /// This instance initiated the hangup.
    pub we_ended_call: bool,
    /// The media leg for this session has arrived.
    pub has_media: bool,

    pub is_muted: bool,
    pub recording_requested: bool,
    pub notes: String,
}

impl CallSession {
    fn new(direction: Direction, peer_number: String) -> Self {
        Self {
            direction,
            call_sid: None,
            peer_number,
            contact_id: None,
            contact_name: None,
            engagement_id: None,
            status: CallStatus::Connecting,
            is_active: false,
            already_ended: false,
            pending_accept: false,
            we_ended_call: false,
            has_media: false,
            is_muted: false,
            recording_requested: false,
            notes: String::new(),
        }
    }

    /// Session for an inbound push notification.
    pub fn inbound(data: &IncomingCallData) -> Self {
        let mut session = Self::new(Direction::Inbound, data.from_number.clone());
        session.call_sid = Some(data.call_sid.clone());
        session.contact_id = data.contact_id.clone();
        session.contact_name = data.contact_name.clone();
        session.engagement_id = data.engagement_id;
        session.status = CallStatus::Ringing;
        session
    }

    /// Session for a media ring that arrived without a push notification.
    pub fn inbound_from_media(info: &TelephonyCallInfo) -> Self {
        let mut session = Self::new(
            Direction::Inbound,
            info.from_number.clone().unwrap_or_default(),
        );
        session.call_sid = info.call_sid.clone();
        session.status = CallStatus::Ringing;
        session.has_media = true;
        session
    }

    /// Session for an outbound dial.
    pub fn outbound(peer_number: &str) -> Self {
        Self::new(Direction::Outbound, peer_number.to_string())
    }

    /// Session mirrored from a sibling instance's broadcast. No sid and no
    /// media leg; lifecycle updates arrive as further broadcasts.
    pub fn mirrored(direction: Direction, peer_number: &str) -> Self {
        let mut session = Self::new(direction, peer_number.to_string());
        session.status = CallStatus::Ringing;
        session
    }

    /// Whether an event carrying `sid` belongs to this session. A session
    /// that does not know its sid yet accepts the first one it sees; the
    /// caller should then adopt it via [`CallSession::adopt_sid`].
    pub fn matches_sid(&self, sid: &str) -> bool {
        match &self.call_sid {
            Some(known) => known == sid,
            None => true,
        }
    }

    pub fn adopt_sid(&mut self, sid: &str) {
        if self.call_sid.is_none() && !sid.is_empty() {
            self.call_sid = Some(sid.to_string());
        }
    }
}
