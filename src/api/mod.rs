//! Backend HTTP API: permissions, call control, tokens, contacts

pub mod calls;
pub mod client;
pub mod permissions;

pub use calls::*;
pub use client::{ApiClient, ApiError};
pub use permissions::PermissionGate;
