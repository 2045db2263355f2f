//! Bridge transports and the bundled bridge catalog.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::torrc::entry::{ConfigEntry, ConfigSnapshot};

pub const USE_BRIDGES: &str = "UseBridges";
pub const CLIENT_TRANSPORT_PLUGIN: &str = "ClientTransportPlugin";
pub const BRIDGE: &str = "Bridge";

/// Bridge transport selected for the managed proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeType {
    None,
    Vanilla,
    Obfs3,
    Obfs4,
    MeekLite,
    Snowflake,
    #[serde(rename = "WEBTUNNEL")]
    WebTunnel,
}

impl BridgeType {
    pub const ALL: [BridgeType; 7] = [
        BridgeType::None,
        BridgeType::Vanilla,
        BridgeType::Obfs3,
        BridgeType::Obfs4,
        BridgeType::MeekLite,
        BridgeType::Snowflake,
        BridgeType::WebTunnel,
    ];

    /// Transport token used in `Bridge` and `ClientTransportPlugin` lines.
    pub fn transport(&self) -> Option<&'static str> {
        match self {
            BridgeType::None | BridgeType::Vanilla => None,
            BridgeType::Obfs3 => Some("obfs3"),
            BridgeType::Obfs4 => Some("obfs4"),
            BridgeType::MeekLite => Some("meek_lite"),
            BridgeType::Snowflake => Some("snowflake"),
            BridgeType::WebTunnel => Some("webtunnel"),
        }
    }

    /// Classify a `Bridge` directive value by its leading transport token.
    /// Anything unrecognized is a plain relay address, i.e. vanilla.
    pub fn from_bridge_value(value: &str) -> Self {
        value
            .split_whitespace()
            .next()
            .and_then(Self::from_transport)
            .unwrap_or(BridgeType::Vanilla)
    }

    pub fn from_transport(token: &str) -> Option<Self> {
        match token {
            "obfs3" => Some(BridgeType::Obfs3),
            "obfs4" => Some(BridgeType::Obfs4),
            "meek_lite" => Some(BridgeType::MeekLite),
            "snowflake" => Some(BridgeType::Snowflake),
            "webtunnel" => Some(BridgeType::WebTunnel),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BridgeType::None => "NONE",
            BridgeType::Vanilla => "VANILLA",
            BridgeType::Obfs3 => "OBFS3",
            BridgeType::Obfs4 => "OBFS4",
            BridgeType::MeekLite => "MEEK_LITE",
            BridgeType::Snowflake => "SNOWFLAKE",
            BridgeType::WebTunnel => "WEBTUNNEL",
        }
    }
}

impl std::fmt::Display for BridgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown bridge type: {0}")]
pub struct UnknownBridgeType(pub String);

impl FromStr for BridgeType {
    type Err = UnknownBridgeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BridgeType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownBridgeType(s.to_string()))
    }
}

/// Executables serving the pluggable transports.
#[derive(Debug, Clone)]
pub struct TransportPaths {
    pub obfs4proxy: PathBuf,
    pub snowflake: PathBuf,
    pub webtunnel: PathBuf,
}

impl TransportPaths {
    fn plugin_for(&self, bridge: BridgeType) -> Option<&PathBuf> {
        match bridge {
            BridgeType::None | BridgeType::Vanilla => None,
            BridgeType::Obfs3 | BridgeType::Obfs4 | BridgeType::MeekLite => Some(&self.obfs4proxy),
            BridgeType::Snowflake => Some(&self.snowflake),
            BridgeType::WebTunnel => Some(&self.webtunnel),
        }
    }
}

const SNOWFLAKE_BRIDGES: &[&str] = &[
    "snowflake 192.0.2.3:80 2B280B23E1107BB62ABFC40DDCC8824814F80A72 fingerprint=2B280B23E1107BB62ABFC40DDCC8824814F80A72 url=https://snowflake-broker.torproject.net/ ampcache=https://cdn.ampproject.org/ fronts=www.google.com,cdn.ampproject.org utls-imitate=hellorandomizedalpn ice=stun:stun.nextcloud.com:443,stun:stun.sipgate.net:10000,stun:stun.epygi.com:3478,stun:stun.uls.co.za:3478,stun:stun.voipgate.com:3478,stun:stun.bethesda.net:3478,stun:stun.mixvoip.com:3478,stun:stun.voipia.net:3478",
    "snowflake 192.0.2.4:80 8838024498816A039FCBBAB14E6F40A0843051FA fingerprint=8838024498816A039FCBBAB14E6F40A0843051FA url=https://snowflake-broker.torproject.net/ ampcache=https://cdn.ampproject.org/ fronts=www.google.com,cdn.ampproject.org utls-imitate=hellorandomizedalpn ice=stun:stun.nextcloud.com:443,stun:stun.sipgate.net:10000,stun:stun.epygi.com:3478,stun:stun.uls.co.za:3478,stun:stun.voipgate.com:3478,stun:stun.bethesda.net:3478,stun:stun.mixvoip.com:3478,stun:stun.voipia.net:3478",
];

/// Known-good bridge descriptors, keyed by transport.
///
/// Snowflake ships built in; other transports are supplied through the
/// `[bridges]` section of the keeper config.
#[derive(Debug, Clone)]
pub struct BridgeCatalog {
    descriptors: BTreeMap<BridgeType, Vec<String>>,
}

impl BridgeCatalog {
    pub fn builtin() -> Self {
        let mut descriptors = BTreeMap::new();
        descriptors.insert(
            BridgeType::Snowflake,
            SNOWFLAKE_BRIDGES.iter().map(|s| s.to_string()).collect(),
        );
        Self { descriptors }
    }

    /// Built-in catalog extended with operator-provided descriptors.
    /// Keys that do not name a bridge type are logged and skipped.
    pub fn with_extra(extra: &BTreeMap<String, Vec<String>>) -> Self {
        let mut catalog = Self::builtin();
        for (name, lines) in extra {
            match name.parse::<BridgeType>() {
                Ok(BridgeType::None) | Err(_) => {
                    tracing::warn!(bridge_type = %name, "Ignoring bridge descriptors for unknown type");
                }
                Ok(bridge) => {
                    catalog.descriptors.entry(bridge).or_default().extend(lines.iter().cloned());
                }
            }
        }
        catalog
    }

    pub fn descriptors(&self, bridge: BridgeType) -> &[String] {
        self.descriptors.get(&bridge).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn is_bridge_directive(entry: &ConfigEntry) -> bool {
    entry.key == USE_BRIDGES || entry.key == CLIENT_TRANSPORT_PLUGIN || entry.key == BRIDGE
}

/// Rewrite the bridge directives of `snapshot` for `bridge`.
///
/// All existing `UseBridges`, `ClientTransportPlugin` and `Bridge` lines
/// are removed, then the new block is appended. A transport without any
/// catalog descriptors degrades to bridges disabled.
pub fn apply_bridge_mode(
    snapshot: &ConfigSnapshot,
    bridge: BridgeType,
    catalog: &BridgeCatalog,
    transports: &TransportPaths,
) -> ConfigSnapshot {
    let mut entries: Vec<ConfigEntry> = snapshot
        .iter()
        .filter(|e| !is_bridge_directive(e))
        .cloned()
        .collect();

    let descriptors = catalog.descriptors(bridge);
    if bridge == BridgeType::None || descriptors.is_empty() {
        if bridge != BridgeType::None {
            tracing::warn!(bridge_type = %bridge, "No bridge descriptors available, disabling bridges");
        }
        entries.push(ConfigEntry::new(USE_BRIDGES, "0"));
        return entries.into();
    }

    entries.push(ConfigEntry::new(USE_BRIDGES, "1"));
    if let (Some(transport), Some(plugin)) = (bridge.transport(), transports.plugin_for(bridge)) {
        entries.push(ConfigEntry::new(
            CLIENT_TRANSPORT_PLUGIN,
            format!("{} exec {}", transport, plugin.display()),
        ));
    }
    for line in descriptors {
        entries.push(ConfigEntry::new(BRIDGE, line.clone()));
    }

    entries.into()
}

/// Point every `ClientTransportPlugin` line at the configured executable
/// for its transport. Lines for unknown transports are left alone.
pub fn correct_plugin_paths(snapshot: &ConfigSnapshot, transports: &TransportPaths) -> ConfigSnapshot {
    snapshot
        .iter()
        .map(|entry| {
            if entry.key != CLIENT_TRANSPORT_PLUGIN {
                return entry.clone();
            }
            let mut parts = entry.value.split_whitespace();
            let (Some(transport), Some("exec"), Some(_old)) = (parts.next(), parts.next(), parts.next()) else {
                return entry.clone();
            };
            // Several transports may share one plugin: `obfs4,meek_lite exec ...`.
            let first = transport.split(',').next().unwrap_or(transport);
            let Some(plugin) = BridgeType::from_transport(first).and_then(|b| transports.plugin_for(b)) else {
                return entry.clone();
            };
            let rest: Vec<&str> = parts.collect();
            let mut value = format!("{} exec {}", transport, plugin.display());
            if !rest.is_empty() {
                value.push(' ');
                value.push_str(&rest.join(" "));
            }
            ConfigEntry::new(CLIENT_TRANSPORT_PLUGIN, value)
        })
        .collect()
}

/// Bridge type in effect: taken from the last `Bridge` line, `None` when
/// there is none.
pub fn detect_bridge_type(snapshot: &ConfigSnapshot) -> BridgeType {
    snapshot
        .entries()
        .iter()
        .rev()
        .find(|e| e.key == BRIDGE)
        .map(|e| BridgeType::from_bridge_value(&e.value))
        .unwrap_or(BridgeType::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transports() -> TransportPaths {
        TransportPaths {
            obfs4proxy: PathBuf::from("/opt/pt/obfs4proxy"),
            snowflake: PathBuf::from("/opt/pt/snowflake"),
            webtunnel: PathBuf::from("/opt/pt/webtunnel"),
        }
    }

    fn sample() -> ConfigSnapshot {
        ConfigSnapshot::parse(
            "SOCKSPort 9051\nUseBridges 1\nClientTransportPlugin obfs4 exec /x\nBridge obfs4 1.2.3.4:443 AAA\nBridge obfs4 5.6.7.8:443 BBB\nLog notice stdout\n",
        )
    }

    #[test]
    fn snowflake_mode_has_one_flag_one_plugin_and_bridges() {
        let out = apply_bridge_mode(&sample(), BridgeType::Snowflake, &BridgeCatalog::builtin(), &transports());

        assert_eq!(out.count(USE_BRIDGES), 1);
        assert_eq!(out.first(USE_BRIDGES).unwrap().value, "1");
        assert_eq!(out.count(CLIENT_TRANSPORT_PLUGIN), 1);
        assert_eq!(
            out.first(CLIENT_TRANSPORT_PLUGIN).unwrap().value,
            "snowflake exec /opt/pt/snowflake"
        );
        assert!(out.count(BRIDGE) >= 1);
        assert!(out.iter().filter(|e| e.key == BRIDGE).all(|e| e.value.starts_with("snowflake ")));
    }

    #[test]
    fn none_mode_disables_bridges() {
        let out = apply_bridge_mode(&sample(), BridgeType::None, &BridgeCatalog::builtin(), &transports());

        assert_eq!(out.count(USE_BRIDGES), 1);
        assert_eq!(out.first(USE_BRIDGES).unwrap().value, "0");
        assert_eq!(out.count(CLIENT_TRANSPORT_PLUGIN), 0);
        assert_eq!(out.count(BRIDGE), 0);
        assert_eq!(out.first("SOCKSPort").unwrap().value, "9051");
        assert_eq!(out.first("Log").unwrap().value, "notice stdout");
    }

    #[test]
    fn transport_without_descriptors_falls_back_to_disabled() {
        let out = apply_bridge_mode(&sample(), BridgeType::WebTunnel, &BridgeCatalog::builtin(), &transports());
        assert_eq!(out.first(USE_BRIDGES).unwrap().value, "0");
        assert_eq!(out.count(BRIDGE), 0);
    }

    #[test]
    fn extra_descriptors_extend_the_catalog() {
        let mut extra = BTreeMap::new();
        extra.insert("OBFS4".to_string(), vec!["obfs4 9.9.9.9:443 CCC cert=x iat-mode=0".to_string()]);
        extra.insert("BOGUS".to_string(), vec!["nope".to_string()]);
        let catalog = BridgeCatalog::with_extra(&extra);

        let out = apply_bridge_mode(&sample(), BridgeType::Obfs4, &catalog, &transports());
        assert_eq!(out.count(BRIDGE), 1);
        assert_eq!(
            out.first(CLIENT_TRANSPORT_PLUGIN).unwrap().value,
            "obfs4 exec /opt/pt/obfs4proxy"
        );
    }

    #[test]
    fn detects_bridge_type_from_token() {
        assert_eq!(detect_bridge_type(&sample()), BridgeType::Obfs4);
        assert_eq!(
            detect_bridge_type(&ConfigSnapshot::parse("Bridge 1.2.3.4:443 FINGERPRINT")),
            BridgeType::Vanilla
        );
        assert_eq!(detect_bridge_type(&ConfigSnapshot::parse("SOCKSPort 9051")), BridgeType::None);
    }

    #[test]
    fn plugin_paths_follow_configuration() {
        let snapshot = ConfigSnapshot::parse(
            "ClientTransportPlugin obfs4,meek_lite exec /old/lib/libobfs4proxy.so -enableLogging\nClientTransportPlugin snowflake exec /old/snowflake\nClientTransportPlugin custom exec /usr/bin/custom\n",
        );

        let out = correct_plugin_paths(&snapshot, &transports());
        assert_eq!(
            out.entries()[0].value,
            "obfs4,meek_lite exec /opt/pt/obfs4proxy -enableLogging"
        );
        assert_eq!(out.entries()[1].value, "snowflake exec /opt/pt/snowflake");
        assert_eq!(out.entries()[2], snapshot.entries()[2]);
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("meek_lite".parse::<BridgeType>().unwrap(), BridgeType::MeekLite);
        assert_eq!("WEBTUNNEL".parse::<BridgeType>().unwrap(), BridgeType::WebTunnel);
        assert!("carrier-pigeon".parse::<BridgeType>().is_err());
    }
}
