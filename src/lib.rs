//! CRM calling-widget engine
//!
//! Coordinates one on-screen call at a time across three asynchronous event
//! sources: a CRM host bridge (iframe contract mirrored onto a cross-window
//! broadcast channel), a WebSocket push channel delivering inbound-call
//! notifications, and a telephony transport delivering media-session events.
//!
//! The embedder constructs the services explicitly, wires them into a
//! [`coordinator::WidgetRuntime`], and renders screens from the state
//! snapshots the runtime publishes. All reconciliation logic lives in the
//! [`coordinator::CallCoordinator`] reducer.

pub mod api;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod formatters;
pub mod handlers;
pub mod models;
pub mod push;
pub mod telephony;
pub mod timer;

pub use config::{BridgeRole, CrossTabUiPolicy, WidgetConfig};
pub use coordinator::{CallCoordinator, Event, WidgetRuntime};
pub use models::{Availability, CallStatus, Direction, PermissionStatus, ScreenState};
