//! Candidate request descriptors and response classification
//!
//! The upstream panel's peer-listing shape varies between versions, so the
//! client walks an explicit ordered list of request descriptors and stops at
//! the first one whose response classifies as a peer list. Keeping the
//! descriptors and the classifier as plain data/pure functions keeps the
//! discovery strategy testable without network transport.

use serde_json::Value;
use urlencoding::encode;

/// HTTP method of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One speculative request shape tried during discovery
#[derive(Debug, Clone)]
pub struct Candidate {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl Candidate {
    fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// Ordered peer-listing candidates, most specific shape first
pub fn list_peer_candidates(config_name: &str) -> Vec<Candidate> {
    let name = encode(config_name);
    vec![
        Candidate::get(format!("/api/getPeers/{}", name)),
        Candidate::get(format!("/api/getPeers?configName={}", name)),
        Candidate::get(format!("/api/getPeers?configuration={}", name)),
        Candidate::get(format!("/api/getPeers?config={}", name)),
        Candidate::post("/api/getPeers", serde_json::json!({ "configName": config_name })),
        Candidate::post("/api/getPeers", serde_json::json!({ "configuration": config_name })),
        Candidate::get(format!("/api/getWireguardConfiguration/{}", name)),
        Candidate::get(format!("/api/getWireguardConfigurations/{}", name)),
        Candidate::get("/api/getWireguardConfigurations"),
    ]
}

/// URL templates for config download, most specific first
pub fn download_paths(config_name: &str, encoded_peer_id: &str) -> Vec<String> {
    let name = encode(config_name);
    vec![
        format!("/api/downloadPeer/{}/{}", name, encoded_peer_id),
        format!("/api/downloadPeer/{}", encoded_peer_id),
        format!("/api/download/{}", encoded_peer_id),
    ]
}

/// Fields that mark an interface/configuration summary rather than a peer
const CONFIG_SUMMARY_MARKERS: &[&str] = &[
    "ListenPort",
    "listen_port",
    "ConnectedPeers",
    "connected_peers",
    "TotalPeers",
    "total_peers",
    "PeersCount",
    "peers_count",
];

/// Classify a parsed response as a peer list.
///
/// Unwraps the known envelopes, then rejects configuration-summary payloads:
/// a listing of interface configurations is list-shaped too, but its records
/// carry listen-port/peer-count markers and must not be mistaken for peers.
pub fn classify_peer_response(data: &Value) -> Option<&Vec<Value>> {
    let items = unwrap_peer_array(data)?;
    if items.iter().any(is_config_summary) {
        return None;
    }
    Some(items)
}

fn unwrap_peer_array(data: &Value) -> Option<&Vec<Value>> {
    let obj = data.as_object()?;

    if obj.get("status").and_then(Value::as_bool) == Some(true) {
        if let Some(items) = obj.get("data").and_then(Value::as_array) {
            return Some(items);
        }
    }
    if let Some(items) = obj.get("data").and_then(Value::as_array) {
        return Some(items);
    }
    if let Some(items) = obj.get("peers").and_then(Value::as_array) {
        return Some(items);
    }
    obj.get("data")?.get("peers")?.as_array()
}

fn is_config_summary(record: &Value) -> bool {
    record
        .as_object()
        .map(|obj| CONFIG_SUMMARY_MARKERS.iter().any(|marker| obj.contains_key(*marker)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_candidate_ordering() {
        let candidates = list_peer_candidates("wg0");
        assert_eq!(candidates.len(), 9);
        assert_eq!(candidates[0].path, "/api/getPeers/wg0");
        assert_eq!(candidates[0].method, Method::Get);
        assert_eq!(candidates[4].method, Method::Post);
        assert_eq!(candidates[8].path, "/api/getWireguardConfigurations");
    }

    #[test]
    fn test_config_name_is_encoded() {
        let candidates = list_peer_candidates("wg 0/x");
        assert_eq!(candidates[0].path, "/api/getPeers/wg%200%2Fx");
    }

    #[test]
    fn test_unwraps_status_envelope() {
        let data = json!({"status": true, "data": [{"id": "p1"}]});
        let items = classify_peer_response(&data).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_unwraps_alternate_envelopes() {
        assert!(classify_peer_response(&json!({"data": [{"id": "p1"}]})).is_some());
        assert!(classify_peer_response(&json!({"peers": [{"id": "p1"}]})).is_some());
        assert!(classify_peer_response(&json!({"data": {"peers": [{"id": "p1"}]}})).is_some());
    }

    #[test]
    fn test_rejects_config_summary() {
        // A configuration listing is list-shaped but carries interface markers
        let data = json!({
            "status": true,
            "data": [{"Name": "wg0", "ListenPort": 51820, "ConnectedPeers": 3}]
        });
        assert!(classify_peer_response(&data).is_none());

        let data = json!({"data": [{"name": "wg0", "total_peers": 5}]});
        assert!(classify_peer_response(&data).is_none());
    }

    #[test]
    fn test_rejects_non_list_payloads() {
        assert!(classify_peer_response(&json!({"status": true})).is_none());
        assert!(classify_peer_response(&json!({"status": false, "message": "nope"})).is_none());
        assert!(classify_peer_response(&json!("plain text")).is_none());
    }

    #[test]
    fn test_download_paths() {
        let paths = download_paths("wg0", "peer%2D1");
        assert_eq!(paths[0], "/api/downloadPeer/wg0/peer%2D1");
        assert_eq!(paths[1], "/api/downloadPeer/peer%2D1");
        assert_eq!(paths[2], "/api/download/peer%2D1");
    }
}
