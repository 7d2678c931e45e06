//! Data models shared across the widget services

mod api;
mod call;
mod permission;

pub use api::*;
pub use call::*;
pub use permission::*;
