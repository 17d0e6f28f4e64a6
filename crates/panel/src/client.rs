//! Upstream panel client
//!
//! Every operation tolerates the panel's shape drift: listing probes the
//! candidate descriptors in order, downloads retry across URL templates and
//! id encodings in escalating rounds, and mutations treat the follow-up
//! interface restart as best-effort. Failures are absorbed and logged here;
//! callers see peers, text or booleans.

use crate::normalize::{normalize_peer, Peer};
use crate::probe::{self, Candidate, Method};
use peerlink_common::config::PanelConfig;
use peerlink_common::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use urlencoding::encode;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Escalating retry rounds for config download; round k is preceded by a
/// 250*k ms delay. The download surface is the least standardized one
/// across panel versions.
const DOWNLOAD_ROUNDS: usize = 3;
const DOWNLOAD_BACKOFF_MS: u64 = 250;

/// Options for peer creation; unset fields fall back to configured defaults
#[derive(Debug, Clone, Default)]
pub struct CreatePeerOptions {
    pub name: Option<String>,
    pub dns: Option<String>,
    pub endpoint_allowed_ip: Option<String>,
    pub keepalive: Option<u32>,
    pub mtu: Option<u32>,
    pub preshared_key: bool,
}

/// Client for the upstream panel
pub struct PanelClient {
    http: reqwest::Client,
    base_url: String,
    config: PanelConfig,
}

impl PanelClient {
    pub fn new(config: PanelConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !config.api_key.trim().is_empty() {
            let value = HeaderValue::from_str(config.api_key.trim())
                .map_err(|e| Error::InvalidConfig(format!("bad api key: {}", e)))?;
            headers.insert("wg-dashboard-apikey", value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;

        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        info!("Panel client initialized for {} ({})", base_url, config.config_name);

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check panel reachability
    pub async fn handshake(&self) -> bool {
        match self.http.get(self.url("/api/handshake")).send().await {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(data) => data.get("status").and_then(Value::as_bool) == Some(true),
                Err(_) => false,
            },
            Err(e) => {
                warn!("Panel handshake failed: {}", e);
                false
            }
        }
    }

    /// List peers by probing candidate request shapes in order.
    ///
    /// 404 means "shape not supported here" and is not an error; other
    /// failures are logged and the next candidate is tried. Exhausting all
    /// candidates yields an empty list with the collected failure codes
    /// logged once.
    pub async fn list_peers(&self) -> Vec<Peer> {
        let candidates = probe::list_peer_candidates(&self.config.config_name);
        let mut failures: Vec<String> = Vec::new();

        for candidate in &candidates {
            let resp = match self.send_candidate(candidate).await {
                Ok(resp) => resp,
                Err(e) => {
                    debug!("Candidate {} transport error: {}", candidate.path, e);
                    failures.push(format!("{}: transport", candidate.path));
                    continue;
                }
            };

            let status = resp.status();
            if status == StatusCode::NOT_FOUND {
                failures.push(format!("{}: 404", candidate.path));
                continue;
            }
            if !status.is_success() {
                warn!("Candidate {} returned {}", candidate.path, status);
                failures.push(format!("{}: {}", candidate.path, status));
                continue;
            }

            let data: Value = match resp.json().await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Candidate {} body unparseable: {}", candidate.path, e);
                    failures.push(format!("{}: unparseable", candidate.path));
                    continue;
                }
            };

            match probe::classify_peer_response(&data) {
                Some(items) if !items.is_empty() => {
                    let peers: Vec<Peer> = items
                        .iter()
                        .filter_map(|item| normalize_peer(item, None))
                        .collect();
                    debug!(
                        "Candidate {} yielded {} peers",
                        candidate.path,
                        peers.len()
                    );
                    return peers;
                }
                _ => {
                    failures.push(format!("{}: not a peer list", candidate.path));
                }
            }
        }

        warn!("All peer-listing candidates failed: [{}]", failures.join(", "));
        Vec::new()
    }

    pub async fn get_peer_by_id(&self, peer_id: &str) -> Option<Peer> {
        self.list_peers()
            .await
            .into_iter()
            .find(|peer| peer.id == peer_id)
    }

    /// Create a peer and best-effort restart the interface.
    ///
    /// The created record is extracted from the creation response when
    /// embedded; otherwise the list is re-fetched and matched by name,
    /// falling back to the most recently listed record.
    pub async fn create_peer(&self, options: CreatePeerOptions) -> Option<Peer> {
        let name = options
            .name
            .unwrap_or_else(|| format!("User_{}", peerlink_common::now_epoch_ms()));
        let payload = serde_json::json!({
            "bulkAdd": false,
            "name": name,
            "DNS": options.dns.unwrap_or_else(|| self.config.dns.clone()),
            "endpoint_allowed_ip": options
                .endpoint_allowed_ip
                .unwrap_or_else(|| self.config.endpoint_allowed_ip.clone()),
            "keepalive": options.keepalive.unwrap_or(self.config.keepalive),
            "mtu": options.mtu.unwrap_or(self.config.mtu),
            "preshared_key_bulkAdd": options.preshared_key,
        });

        info!("Creating peer {}", name);

        let path = format!("/api/addPeers/{}", encode(&self.config.config_name));
        let resp = match self.http.post(self.url(&path)).json(&payload).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Peer creation request failed: {}", e);
                return None;
            }
        };

        let data: Value = match resp.json().await {
            Ok(data) => data,
            Err(e) => {
                warn!("Peer creation response unparseable: {}", e);
                return None;
            }
        };

        if data.get("status").and_then(Value::as_bool) != Some(true) {
            warn!("Peer creation rejected: {}", data);
            return None;
        }

        // The panel applies changes on its next reconciliation regardless,
        // so a failed restart does not fail the creation.
        self.restart_interface().await;

        if let Some(peer) = extract_created_peer(&data, &name) {
            info!("Peer created: {}", peer.id);
            return Some(peer);
        }

        // Response did not embed the record; re-list and match
        let peers = self.list_peers().await;
        peers
            .iter()
            .find(|peer| peer.name == name)
            .cloned()
            .or_else(|| peers.last().cloned())
    }

    /// Best-effort interface restart after a mutation
    pub async fn restart_interface(&self) -> bool {
        let path = format!(
            "/api/restartWireguardConfiguration/{}",
            encode(&self.config.config_name)
        );
        match self.http.post(self.url(&path)).send().await {
            Ok(resp) => {
                // Older panels lack the endpoint; 404 is not worth noise
                if resp.status() == StatusCode::NOT_FOUND {
                    return false;
                }
                let ok = resp
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|data| data.get("status").and_then(Value::as_bool))
                    == Some(true);
                if ok {
                    info!("Interface restarted");
                } else {
                    warn!("Interface restart not acknowledged");
                }
                ok
            }
            Err(e) => {
                warn!("Interface restart failed: {}", e);
                false
            }
        }
    }

    pub async fn delete_peer(&self, peer_id: &str) -> bool {
        let path = format!("/api/deletePeers/{}", encode(&self.config.config_name));
        let ok = self
            .panel_action(&path, serde_json::json!({ "peers": [peer_id] }))
            .await;
        if ok {
            self.restart_interface().await;
        }
        ok
    }

    pub async fn restrict_peer(&self, peer_id: &str, restrict: bool) -> bool {
        let path = format!("/api/restrictPeers/{}", encode(&self.config.config_name));
        let ok = self
            .panel_action(
                &path,
                serde_json::json!({ "peers": [peer_id], "restrict": restrict }),
            )
            .await;
        if ok {
            self.restart_interface().await;
        }
        ok
    }

    async fn panel_action(&self, path: &str, body: Value) -> bool {
        match self.http.post(self.url(path)).json(&body).send().await {
            Ok(resp) => {
                resp.json::<Value>()
                    .await
                    .ok()
                    .and_then(|data| data.get("status").and_then(Value::as_bool))
                    == Some(true)
            }
            Err(e) => {
                warn!("Panel action {} failed: {}", path, e);
                false
            }
        }
    }

    /// Download a peer's configuration text.
    ///
    /// Tries every URL template under both singly- and doubly-encoded ids,
    /// in up to three escalating rounds, accepting the first non-empty body
    /// that is not a failure envelope. Exhausted rounds fall back to the
    /// config embedded in the normalized peer record.
    pub async fn download_peer_config(&self, peer_id: &str) -> Option<String> {
        let id = peer_id.trim();
        if id.is_empty() || matches!(id.to_ascii_lowercase().as_str(), "null" | "undefined") {
            warn!("Refusing config download for sentinel peer id {:?}", peer_id);
            return None;
        }

        let single = encode(id).into_owned();
        let double = encode(&single).into_owned();
        let mut encodings = vec![single];
        if double != encodings[0] {
            // Some panel versions decode the path twice
            encodings.push(double);
        }

        for round in 0..DOWNLOAD_ROUNDS {
            if round > 0 {
                let delay = DOWNLOAD_BACKOFF_MS * round as u64;
                debug!("Download round {} for {} after {}ms", round + 1, id, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            for encoded in &encodings {
                for path in probe::download_paths(&self.config.config_name, encoded) {
                    if let Some(config) = self.try_download(&path).await {
                        return Some(config);
                    }
                }
            }
        }

        // Least standardized surface of all: fall back to the embedded
        // config field from the peer record itself.
        if let Some(peer) = self.get_peer_by_id(id).await {
            if !peer.config.trim().is_empty() {
                info!("Using embedded config for peer {}", id);
                return Some(peer.config);
            }
        }

        warn!("Config unavailable for peer {} after all fallbacks", id);
        None
    }

    async fn try_download(&self, path: &str) -> Option<String> {
        let resp = match self.http.get(self.url(path)).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("Download {} transport error: {}", path, e);
                return None;
            }
        };

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return None;
        }
        if !status.is_success() {
            warn!("Download {} returned {}", path, status);
            return None;
        }

        let text = resp.text().await.ok()?;
        if text.trim().is_empty() {
            return None;
        }

        // A JSON envelope with an explicit failure flag means "try elsewhere";
        // an envelope with a config payload yields its data string.
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&text) {
            if obj.get("status").and_then(Value::as_bool) == Some(false) {
                debug!("Download {} rejected by panel", path);
                return None;
            }
            if let Some(data) = obj.get("data").and_then(Value::as_str) {
                if !data.trim().is_empty() {
                    return Some(data.to_string());
                }
            }
        }

        Some(text)
    }

    async fn send_candidate(&self, candidate: &Candidate) -> reqwest::Result<reqwest::Response> {
        match candidate.method {
            Method::Get => self.http.get(self.url(&candidate.path)).send().await,
            Method::Post => {
                let mut req = self.http.post(self.url(&candidate.path));
                if let Some(body) = &candidate.body {
                    req = req.json(body);
                }
                req.send().await
            }
        }
    }
}

/// Pull the created peer out of a creation response body, if embedded
fn extract_created_peer(data: &Value, fallback_name: &str) -> Option<Peer> {
    let candidate = data
        .get("data")
        .filter(|v| v.is_object())
        .or_else(|| data.get("peer").filter(|v| v.is_object()))?;
    normalize_peer(candidate, Some(fallback_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::RawQuery;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_for(base_url: String) -> PanelClient {
        let config = PanelConfig {
            base_url,
            api_key: "test-key".to_string(),
            config_name: "wg0".to_string(),
            ..Default::default()
        };
        PanelClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_list_peers_stops_at_first_valid_candidate() {
        let hits = Arc::new(AtomicUsize::new(0));

        // Candidate 1 (path param) falls through to the counting fallback;
        // candidate 2 (configName=) 404s; candidate 3 (configuration=) wins.
        let peers_hits = hits.clone();
        let fallback_hits = hits.clone();
        let router = Router::new()
            .route(
                "/api/getPeers",
                get(move |RawQuery(query): RawQuery| {
                    let hits = peers_hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        let query = query.unwrap_or_default();
                        if query.contains("configuration=") {
                            Json(json!({
                                "status": true,
                                "data": [{"id": "p1", "name": "laptop", "public_key": "pk"}]
                            }))
                            .into_response()
                        } else {
                            StatusCode::NOT_FOUND.into_response()
                        }
                    }
                }),
            )
            .fallback(move || {
                let hits = fallback_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NOT_FOUND
                }
            });

        let client = client_for(serve(router).await);
        let peers = client.list_peers().await;

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, "p1");
        assert_eq!(peers[0].name, "laptop");
        // One fallback 404 + two getPeers calls; no probing after success
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_list_peers_skips_config_summary() {
        let router = Router::new()
            .route(
                "/api/getPeers/:config",
                get(|| async {
                    Json(json!({
                        "status": true,
                        "data": [{"Name": "wg0", "ListenPort": 51820, "ConnectedPeers": 2}]
                    }))
                }),
            )
            .route(
                "/api/getPeers",
                get(|| async {
                    Json(json!({"status": true, "data": [{"id": "p1"}]}))
                }),
            );

        let client = client_for(serve(router).await);
        let peers = client.list_peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, "p1");
    }

    #[tokio::test]
    async fn test_list_peers_exhaustion_returns_empty() {
        let client = client_for(serve(Router::new()).await);
        assert!(client.list_peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_download_falls_back_across_templates() {
        // First template unmatched (404); second serves the config text
        let router = Router::new().route(
            "/api/downloadPeer/:id",
            get(|| async { "[Interface]\nPrivateKey = x\n" }),
        );

        let client = client_for(serve(router).await);
        let config = client.download_peer_config("peer-1").await.unwrap();
        assert!(config.contains("[Interface]"));
    }

    #[tokio::test]
    async fn test_download_unwraps_data_envelope() {
        let router = Router::new().route(
            "/api/downloadPeer/:config/:id",
            get(|| async { Json(json!({"status": true, "data": "[Interface]\nPrivateKey = x\n"})) }),
        );

        let client = client_for(serve(router).await);
        let config = client.download_peer_config("peer-1").await.unwrap();
        assert!(config.starts_with("[Interface]"));
    }

    #[tokio::test]
    async fn test_download_sentinel_ids_fail_fast() {
        // No server needed; the request is never sent
        let client = client_for("http://127.0.0.1:1".to_string());
        assert!(client.download_peer_config("").await.is_none());
        assert!(client.download_peer_config("null").await.is_none());
        assert!(client.download_peer_config("undefined").await.is_none());
    }

    #[tokio::test]
    async fn test_download_falls_back_to_embedded_config() {
        // Every download template reports failure; the peer record carries
        // the config inline.
        let failure = || async { Json(json!({"status": false, "message": "no"})) };
        let router = Router::new()
            .route("/api/downloadPeer/:config/:id", get(failure.clone()))
            .route("/api/downloadPeer/:id", get(failure.clone()))
            .route("/api/download/:id", get(failure))
            .route(
                "/api/getPeers/:config",
                get(|| async {
                    Json(json!({
                        "status": true,
                        "data": [{"id": "peer-1", "config": "[Interface]\nPrivateKey = x\n"}]
                    }))
                }),
            );

        let client = client_for(serve(router).await);
        let config = client.download_peer_config("peer-1").await.unwrap();
        assert!(config.contains("PrivateKey"));
    }

    #[tokio::test]
    async fn test_create_peer_uses_embedded_record() {
        let list_hits = Arc::new(AtomicUsize::new(0));
        let hits = list_hits.clone();
        let router = Router::new()
            .route(
                "/api/addPeers/:config",
                post(|| async {
                    Json(json!({
                        "status": true,
                        "data": {"id": "peer-123", "public_key": "pk", "allowed_ips": ["10.0.0.2/32"]}
                    }))
                }),
            )
            .route(
                "/api/restartWireguardConfiguration/:config",
                post(|| async { Json(json!({"status": true})) }),
            )
            .route(
                "/api/getPeers/:config",
                get(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Json(json!({"status": true, "data": [{"id": "other"}]}))
                    }
                }),
            );

        let client = client_for(serve(router).await);
        let peer = client
            .create_peer(CreatePeerOptions {
                name: Some("n1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(peer.id, "peer-123");
        assert_eq!(peer.name, "n1"); // fallback name from the request
        assert_eq!(list_hits.load(Ordering::SeqCst), 0); // no re-listing
    }

    #[tokio::test]
    async fn test_create_peer_relists_when_not_embedded() {
        let router = Router::new()
            .route(
                "/api/addPeers/:config",
                post(|| async { Json(json!({"status": true})) }),
            )
            .route(
                "/api/restartWireguardConfiguration/:config",
                post(|| async { Json(json!({"status": true})) }),
            )
            .route(
                "/api/getPeers/:config",
                get(|| async {
                    Json(json!({
                        "status": true,
                        "data": [{"id": "p1", "name": "other"}, {"id": "p2", "name": "n1"}]
                    }))
                }),
            );

        let client = client_for(serve(router).await);
        let peer = client
            .create_peer(CreatePeerOptions {
                name: Some("n1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(peer.id, "p2");
    }

    #[tokio::test]
    async fn test_restrict_and_delete() {
        let router = Router::new()
            .route(
                "/api/restrictPeers/:config",
                post(|| async { Json(json!({"status": true})) }),
            )
            .route(
                "/api/deletePeers/:config",
                post(|| async { Json(json!({"status": false})) }),
            );

        let client = client_for(serve(router).await);
        assert!(client.restrict_peer("p1", true).await);
        assert!(!client.delete_peer("p1").await);
    }
}
