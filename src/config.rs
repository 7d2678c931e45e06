//! Widget configuration
//!
//! Everything that used to be sniffed from the runtime environment is an
//! explicit, injected value here: the bridge role, the cross-tab UI policy,
//! and the service endpoints. The embedder builds a `WidgetConfig` in code
//! or loads one from a TOML file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which role this widget instance plays in a multi-window deployment.
///
/// Exactly one instance (the `Window` role) talks to the real host iframe
/// contract; `Remote` instances mirror state over the broadcast channel and
/// only update local UI. `Standalone` runs without a host entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeRole {
    Window,
    Remote,
    Standalone,
}

impl BridgeRole {
    /// Whether this instance forwards notifications to the host contract.
    pub fn owns_contract(self) -> bool {
        !matches!(self, BridgeRole::Remote)
    }

    /// Whether this instance mirrors notifications onto the broadcast channel.
    pub fn mirrors(self) -> bool {
        !matches!(self, BridgeRole::Standalone)
    }
}

/// Which cross-tab broadcast events update the local screen state.
///
/// Call lifecycle events always sync. Login and availability default to
/// synced; `call_completed` defaults to host-contract-only, so a sibling
/// tab saving a call summary does not yank this tab back to the keypad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossTabUiPolicy {
    pub login_state: bool,
    pub availability: bool,
    pub call_completed: bool,
}

impl Default for CrossTabUiPolicy {
    fn default() -> Self {
        Self {
            login_state: true,
            availability: true,
            call_completed: false,
        }
    }
}

/// Application configuration for one widget instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Backend HTTP API base URL.
    pub backend_url: String,
    /// Push notification server base URL (socket.io endpoint).
    pub push_url: String,
    /// The number calls are placed from (the business line).
    pub from_number: String,
    /// Prefix for the telephony device identity (`{prefix}{owner_id}`).
    pub identity_prefix: String,
    /// Owner id to use when running without a host (standalone mode).
    pub standalone_owner_id: Option<String>,
    pub role: BridgeRole,
    pub cross_tab: CrossTabUiPolicy,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000".to_string(),
            push_url: "http://localhost:3000".to_string(),
            from_number: String::new(),
            identity_prefix: "crm_".to_string(),
            standalone_owner_id: None,
            role: BridgeRole::Window,
            cross_tab: CrossTabUiPolicy::default(),
            request_timeout_secs: 30,
        }
    }
}

impl WidgetConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Telephony device identity for an owner.
    pub fn identity_for(&self, owner_id: &str) -> String {
        format!("{}{}", self.identity_prefix, owner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WidgetConfig::default();
        assert_eq!(config.role, BridgeRole::Window);
        assert!(config.cross_tab.login_state);
        assert!(!config.cross_tab.call_completed);
    }

    #[test]
    fn test_role_predicates() {
        assert!(BridgeRole::Window.owns_contract());
        assert!(BridgeRole::Window.mirrors());
        assert!(!BridgeRole::Remote.owns_contract());
        assert!(BridgeRole::Remote.mirrors());
        assert!(BridgeRole::Standalone.owns_contract());
        assert!(!BridgeRole::Standalone.mirrors());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: WidgetConfig = toml::from_str(
            r#"
            backend_url = "https://calls.example.com"
            from_number = "+15550001111"
            role = "remote"

            [cross_tab]
            availability = false
            "#,
        )
        .unwrap();

        assert_eq!(config.backend_url, "https://calls.example.com");
        assert_eq!(config.role, BridgeRole::Remote);
        assert!(!config.cross_tab.availability);
        // Unspecified fields keep their defaults.
        assert!(config.cross_tab.login_state);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_identity_for() {
        let config = WidgetConfig::default();
        assert_eq!(config.identity_for("owner42"), "crm_owner42");
    }
}
