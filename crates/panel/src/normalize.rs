//! Peer record normalization
//!
//! Upstream panel versions disagree on field naming. Each logical field has
//! an ordered list of known aliases, applied left to right, first match
//! wins. Records lacking any identifier are not peers and are discarded.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical peer shape consumed by the rest of the system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub name: String,
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    pub config: String,
}

const ID_ALIASES: &[&str] = &["id", "peerId", "peer_id", "publicKey", "public_key", "PublicKey"];
const NAME_ALIASES: &[&str] = &["name", "Name"];
const PUBLIC_KEY_ALIASES: &[&str] = &["publicKey", "public_key", "PublicKey"];
const ALLOWED_IPS_ALIASES: &[&str] = &["allowedIPs", "allowed_ips", "AllowedIPs"];
const CONFIG_ALIASES: &[&str] = &["config", "peerConfig", "peer_config"];

/// Derive the canonical peer from a raw upstream record.
///
/// Returns None when no identifier alias is present (not a peer).
pub fn normalize_peer(value: &Value, fallback_name: Option<&str>) -> Option<Peer> {
    let obj = value.as_object()?;

    let id = first_scalar(obj, ID_ALIASES)?;

    let name = first_scalar(obj, NAME_ALIASES)
        .or_else(|| fallback_name.map(String::from))
        .unwrap_or_default();
    let public_key = first_scalar(obj, PUBLIC_KEY_ALIASES).unwrap_or_default();
    let allowed_ips = first_value(obj, ALLOWED_IPS_ALIASES)
        .map(coerce_string_list)
        .unwrap_or_default();
    let config = first_scalar(obj, CONFIG_ALIASES).unwrap_or_default();

    Some(Peer {
        id,
        name,
        public_key,
        allowed_ips,
        config,
    })
}

fn first_value<'a>(
    obj: &'a serde_json::Map<String, Value>,
    aliases: &[&str],
) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|alias| obj.get(*alias))
        .filter(|v| !v.is_null())
}

/// First alias present, coerced to a string. Numbers are stringified;
/// empty strings do not count as present.
fn first_scalar(obj: &serde_json::Map<String, Value>, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        match obj.get(*alias) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

/// Coerce to an ordered list of strings: arrays element-wise, a bare
/// string becomes a single entry, everything else is empty.
fn coerce_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explicit_id_wins() {
        let peer = normalize_peer(
            &json!({"id": "p1", "publicKey": "pk", "name": "laptop"}),
            None,
        )
        .unwrap();
        assert_eq!(peer.id, "p1");
        assert_eq!(peer.public_key, "pk");
        assert_eq!(peer.name, "laptop");
    }

    #[test]
    fn test_public_key_as_identifier() {
        let peer = normalize_peer(&json!({"PublicKey": "abc="}), None).unwrap();
        assert_eq!(peer.id, "abc=");
        assert_eq!(peer.public_key, "abc=");
    }

    #[test]
    fn test_snake_case_aliases() {
        let peer = normalize_peer(
            &json!({
                "peer_id": "p2",
                "public_key": "pk2",
                "allowed_ips": ["10.0.0.2/32", "fd00::2/128"],
                "peer_config": "[Interface]..."
            }),
            None,
        )
        .unwrap();
        assert_eq!(peer.id, "p2");
        assert_eq!(peer.allowed_ips, vec!["10.0.0.2/32", "fd00::2/128"]);
        assert_eq!(peer.config, "[Interface]...");
    }

    #[test]
    fn test_discards_record_without_identifier() {
        assert!(normalize_peer(&json!({"name": "ghost"}), None).is_none());
        assert!(normalize_peer(&json!("not an object"), None).is_none());
        assert!(normalize_peer(&json!({"id": null}), None).is_none());
    }

    #[test]
    fn test_fallback_name() {
        let peer = normalize_peer(&json!({"id": "p1"}), Some("User_123")).unwrap();
        assert_eq!(peer.name, "User_123");
    }

    #[test]
    fn test_allowed_ips_coercion() {
        let peer = normalize_peer(
            &json!({"id": "p1", "allowedIPs": "10.0.0.2/32, 10.0.0.3/32"}),
            None,
        )
        .unwrap();
        assert_eq!(peer.allowed_ips, vec!["10.0.0.2/32", "10.0.0.3/32"]);

        let peer = normalize_peer(&json!({"id": "p1", "allowedIPs": 42}), None).unwrap();
        assert!(peer.allowed_ips.is_empty());
    }

    #[test]
    fn test_numeric_id_stringified() {
        let peer = normalize_peer(&json!({"id": 17}), None).unwrap();
        assert_eq!(peer.id, "17");
    }
}
