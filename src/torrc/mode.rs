//! Externally visible configuration shape.

use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::torrc::bridges::BridgeType;

/// When the managed proxy should be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TorMode {
    /// Keep the proxy running and route everything through it.
    Always,
    /// Never start the proxy.
    Never,
    /// Start the proxy only for destinations that are not directly reachable.
    Auto,
}

impl TorMode {
    pub fn name(&self) -> &'static str {
        match self {
            TorMode::Always => "ALWAYS",
            TorMode::Never => "NEVER",
            TorMode::Auto => "AUTO",
        }
    }
}

impl std::fmt::Display for TorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tor mode: {0}")]
pub struct UnknownTorMode(pub String);

impl FromStr for TorMode {
    type Err = UnknownTorMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [TorMode::Always, TorMode::Never, TorMode::Auto]
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownTorMode(s.to_string()))
    }
}

/// Compact summary reported to the command layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeSummary {
    pub tor_mode: TorMode,
    pub tor_port: u16,
    pub bridge_type: BridgeType,
}

/// A port given either as a JSON number or as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u64),
    Text(String),
}

impl PortValue {
    pub fn as_text(&self) -> String {
        match self {
            PortValue::Number(n) => n.to_string(),
            PortValue::Text(s) => s.trim().to_string(),
        }
    }
}

/// Partial settings update accepted from the command layer.
///
/// Values are kept as text so that bad input degrades to a default
/// instead of rejecting the whole request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    pub tor_mode: Option<String>,
    #[serde(default)]
    pub tor_port: Option<PortValue>,
    #[serde(default)]
    pub bridge_type: Option<String>,
}

impl SettingsUpdate {
    /// Requested mode; unknown names fall back to `Auto`.
    pub fn mode(&self) -> Option<TorMode> {
        self.tor_mode.as_deref().map(|name| {
            name.parse().unwrap_or_else(|e: UnknownTorMode| {
                tracing::warn!(error = %e, "Falling back to AUTO");
                TorMode::Auto
            })
        })
    }

    /// Requested bridge type; unknown names fall back to `None`.
    pub fn bridge(&self) -> Option<BridgeType> {
        self.bridge_type.as_deref().map(|name| {
            name.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to NONE");
                BridgeType::None
            })
        })
    }

    pub fn port_text(&self) -> Option<String> {
        self.tor_port.as_ref().map(PortValue::as_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_uses_camel_case_keys() {
        let summary = ModeSummary {
            tor_mode: TorMode::Auto,
            tor_port: 9051,
            bridge_type: BridgeType::MeekLite,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["torMode"], "AUTO");
        assert_eq!(json["torPort"], 9051);
        assert_eq!(json["bridgeType"], "MEEK_LITE");
    }

    #[test]
    fn update_accepts_numeric_or_text_port() {
        let a: SettingsUpdate = serde_json::from_str(r#"{"torPort": 9150}"#).unwrap();
        let b: SettingsUpdate = serde_json::from_str(r#"{"torPort": "9150"}"#).unwrap();
        assert_eq!(a.port_text().as_deref(), Some("9150"));
        assert_eq!(b.port_text().as_deref(), Some("9150"));
    }

    #[test]
    fn unknown_values_degrade_to_defaults() {
        let update: SettingsUpdate =
            serde_json::from_str(r#"{"torMode": "SOMETIMES", "bridgeType": "PIGEON"}"#).unwrap();
        assert_eq!(update.mode(), Some(TorMode::Auto));
        assert_eq!(update.bridge(), Some(BridgeType::None));
    }
}
