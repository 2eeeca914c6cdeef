// crates/shoal-store/src/relay.rs
//
// RelayStore: networked replicated store over an HTTP relay swarm.
//
// Wraps a local MemoryStore and exchanges records with the store endpoints
// exposed by each peer's transport layer (connection setup, discovery, and
// serving are provided externally). Accepted local puts are pushed to all
// configured peers fire-and-forget; a background pull loop fetches each
// peer's view and merges it through the local store, which re-validates
// signatures, ownership, and last-writer-wins on every merged entry.
//
// Callers see eventual consistency only: a get after a put on another peer
// returns the value once a push or pull has carried it over, and reads near
// phase boundaries should be re-polled rather than issued once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use shoal_core::error::ShoalError;
use shoal_core::identity::PeerId;
use shoal_core::traits::{ReplicatedStore, StoredEntry};
use shoal_core::SignedEnvelope;

use crate::memory::MemoryStore;

/// Reachability of one configured relay peer.
#[derive(Debug, Clone)]
pub struct RelayPeerState {
    pub url: String,
    /// Whether the last communication attempt succeeded.
    pub alive: bool,
}

/// Replicated store backed by a local MemoryStore plus HTTP relay peers.
#[derive(Clone)]
pub struct RelayStore {
    local: Arc<MemoryStore>,
    configured_peers: Vec<String>,
    peer_state: Arc<RwLock<HashMap<String, RelayPeerState>>>,
    client: reqwest::Client,
}

/// JSON-RPC response envelope for parsing peer responses.
#[derive(serde::Deserialize)]
struct JsonRpcResponse {
    success: bool,
    result: Option<serde_json::Value>,
    error: Option<String>,
}

impl RelayStore {
    /// Create a RelayStore over the given local backend and peer URLs.
    pub fn new(local: Arc<MemoryStore>, configured_peers: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let mut state_map = HashMap::new();
        for url in &configured_peers {
            state_map.insert(
                url.clone(),
                RelayPeerState {
                    url: url.clone(),
                    alive: false,
                },
            );
        }

        Self {
            local,
            configured_peers,
            peer_state: Arc::new(RwLock::new(state_map)),
            client,
        }
    }

    /// The local backend, for direct snapshot access.
    pub fn local(&self) -> &Arc<MemoryStore> {
        &self.local
    }

    /// Return URLs of peers that last responded successfully.
    pub async fn live_peer_urls(&self) -> Vec<String> {
        let state = self.peer_state.read().await;
        state
            .values()
            .filter(|p| p.alive)
            .map(|p| p.url.clone())
            .collect()
    }

    /// Mark a peer as alive or dead after a communication attempt.
    async fn mark_peer(&self, url: &str, alive: bool) {
        let mut state = self.peer_state.write().await;
        if let Some(peer) = state.get_mut(url) {
            peer.alive = alive;
        }
    }

    /// Push one accepted record to all configured peers.
    /// Fire-and-forget: failures are logged, not propagated.
    fn push_to_peers(
        &self,
        key: &str,
        subkey: &PeerId,
        envelope: &SignedEnvelope,
        expires_at: DateTime<Utc>,
    ) {
        let request_body = serde_json::json!({
            "method": "record/put",
            "params": {
                "key": key,
                "subkey": subkey,
                "envelope": envelope,
                "expires_at": expires_at,
            }
        });

        for peer_url in &self.configured_peers {
            let client = self.client.clone();
            let url = peer_url.clone();
            let body = request_body.clone();
            let store = self.clone();

            tokio::spawn(async move {
                match client.post(&url).json(&body).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        store.mark_peer(&url, true).await;
                    }
                    Ok(resp) => {
                        tracing::warn!(
                            "record/put to peer {} returned status {}",
                            url,
                            resp.status()
                        );
                        store.mark_peer(&url, false).await;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to push record to peer {}: {}", url, e);
                        store.mark_peer(&url, false).await;
                    }
                }
            });
        }
    }

    /// Run the background pull loop, merging each peer's view every
    /// `interval_secs`.
    pub async fn run_pull_loop(self: Arc<Self>, interval_secs: u64) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            if let Err(e) = self.pull_once().await {
                tracing::warn!("Relay pull error: {}", e);
            }
        }
    }

    /// Perform a single pull round against all peers.
    ///
    /// Every fetched entry goes through the local store's own `put`, so a
    /// misbehaving peer cannot smuggle in forged or stale records.
    pub async fn pull_once(&self) -> Result<(), ShoalError> {
        // Shed expired local entries before merging fresh views.
        self.local.purge_expired(Utc::now()).await;

        for peer_url in &self.configured_peers {
            let view = match self.fetch_remote_view(peer_url).await {
                Ok(view) => {
                    self.mark_peer(peer_url, true).await;
                    view
                }
                Err(e) => {
                    tracing::debug!("Pull: could not reach peer {}: {}", peer_url, e);
                    self.mark_peer(peer_url, false).await;
                    continue;
                }
            };

            let mut merged = 0usize;
            for (key, subkeys) in view {
                for (subkey, entry) in subkeys {
                    match self
                        .local
                        .put(&key, &subkey, entry.envelope, entry.expires_at)
                        .await
                    {
                        Ok(true) => merged += 1,
                        // Stale, duplicate, or invalid — already handled and
                        // logged by the local store.
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!("Pull: failed to merge entry from {}: {}", peer_url, e)
                        }
                    }
                }
            }

            if merged > 0 {
                tracing::debug!("Pull: merged {} records from {}", merged, peer_url);
            }
        }

        Ok(())
    }

    /// Fetch a peer's full unexpired record view.
    async fn fetch_remote_view(
        &self,
        peer_url: &str,
    ) -> Result<HashMap<String, BTreeMap<PeerId, StoredEntry>>, ShoalError> {
        let request_body = serde_json::json!({
            "method": "record/dump",
            "params": {}
        });

        let resp = self
            .client
            .post(peer_url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ShoalError::Store(format!("HTTP error: {}", e)))?;

        let rpc_resp: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| ShoalError::Store(format!("Failed to parse response: {}", e)))?;

        if !rpc_resp.success {
            return Err(ShoalError::Store(
                rpc_resp.error.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        let result = rpc_resp
            .result
            .ok_or_else(|| ShoalError::Store("No result in response".to_string()))?;
        serde_json::from_value(result)
            .map_err(|e| ShoalError::Store(format!("Failed to parse record view: {}", e)))
    }
}

#[async_trait]
impl ReplicatedStore for RelayStore {
    async fn put(
        &self,
        key: &str,
        subkey: &PeerId,
        envelope: SignedEnvelope,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, ShoalError> {
        let accepted = self
            .local
            .put(key, subkey, envelope.clone(), expires_at)
            .await?;

        if accepted {
            self.push_to_peers(key, subkey, &envelope, expires_at);
        }
        Ok(accepted)
    }

    async fn get(
        &self,
        key: &str,
        as_of: DateTime<Utc>,
    ) -> Result<BTreeMap<PeerId, StoredEntry>, ShoalError> {
        // Reads serve the local view; the pull loop is what carries remote
        // writes over. Callers re-poll near phase boundaries.
        self.local.get(key, as_of).await
    }

    async fn get_subkey(
        &self,
        key: &str,
        subkey: &PeerId,
        as_of: DateTime<Utc>,
    ) -> Result<Option<StoredEntry>, ShoalError> {
        self.local.get_subkey(key, subkey, as_of).await
    }
}
