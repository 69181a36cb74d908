//! Connection Hub: WebSocket fan-out with per-client subscriptions, a
//! stale-connection reaper, and per-client/per-channel metrics.
//! `server.rs` holds the thin axum adapter; this module is the part
//! with the actual contract and is independently testable without a socket.

pub mod server;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::DashSet;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub type ClientId = String;
pub type Channel = String;

/// A frame destined for a single client's outbound stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub channel: Option<Channel>,
}

impl OutboundFrame {
    pub fn new(frame_type: impl Into<String>, data: Value, channel: Option<Channel>) -> Self {
        Self {
            frame_type: frame_type.into(),
            data,
            timestamp: Utc::now(),
            channel,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientMetrics {
    pub connected_at: DateTime<Utc>,
    pub message_count: u64,
    pub error_count: u32,
    pub last_activity: DateTime<Utc>,
    pub latency_ms: Option<u64>,
}

impl ClientMetrics {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            connected_at: now,
            message_count: 0,
            error_count: 0,
            last_activity: now,
            latency_ms: None,
        }
    }
}

/// Handle the Hub keeps per connected client; the real socket-writer task
/// lives behind this channel so a client's own frames are always written
/// in send-initiation order.
struct ClientHandle {
    sender: mpsc::UnboundedSender<OutboundFrame>,
    metrics: ClientMetrics,
}

/// Inbound-message dispatch: `(client_id, action, payload) -> ()`.
pub type Handler = Arc<dyn Fn(&ClientId, &Value) + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct HubMetrics {
    pub total_connections: usize,
    pub per_channel_counts: Vec<(Channel, usize)>,
}

/// Single logical owner of the client table, subscription sets, and
/// handler map. All mutations funnel through these methods — the hub's
/// single-writer discipline.
pub struct ConnectionHub {
    clients: DashMap<ClientId, ClientHandle>,
    subscriptions: DashMap<Channel, DashSet<ClientId>>,
    handlers: DashMap<Channel, Handler>,
    reaper_idle: chrono::Duration,
    reaper_max_errors: u32,
}

impl ConnectionHub {
    pub fn new(reaper_idle_seconds: i64, reaper_max_errors: u32) -> Self {
        Self {
            clients: DashMap::new(),
            subscriptions: DashMap::new(),
            handlers: DashMap::new(),
            reaper_idle: chrono::Duration::seconds(reaper_idle_seconds),
            reaper_max_errors,
        }
    }

    /// Register a client and its outbound drain channel. Returns the
    /// receiver half the axum adapter should forward to the socket.
    pub fn connect(&self, client_id: ClientId) -> mpsc::UnboundedReceiver<OutboundFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.insert(
            client_id.clone(),
            ClientHandle {
                sender: tx,
                metrics: ClientMetrics::new(),
            },
        );
        info!(%client_id, "client connected");
        rx
    }

    pub fn disconnect(&self, client_id: &ClientId) {
        self.clients.remove(client_id);
        for entry in self.subscriptions.iter() {
            entry.value().remove(client_id);
        }
        info!(%client_id, "client disconnected");
    }

    pub fn subscribe(&self, client_id: &ClientId, channel: &Channel) {
        self.subscriptions
            .entry(channel.clone())
            .or_insert_with(DashSet::new)
            .insert(client_id.clone());
    }

    pub fn unsubscribe(&self, client_id: &ClientId, channel: &Channel) {
        if let Some(set) = self.subscriptions.get(channel) {
            set.remove(client_id);
        }
    }

    pub fn subscriptions_of(&self, client_id: &ClientId) -> HashSet<Channel> {
        self.subscriptions
            .iter()
            .filter(|e| e.value().contains(client_id))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn is_connected(&self, client_id: &ClientId) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn register_handler(&self, channel: impl Into<Channel>, handler: Handler) {
        self.handlers.insert(channel.into(), handler);
    }

    /// Route an inbound message to the channel's registered handler, if
    /// any, and bump the client's message counter.
    pub fn dispatch_inbound(&self, client_id: &ClientId, channel: &Channel, payload: &Value) {
        if let Some(mut handle) = self.clients.get_mut(client_id) {
            handle.metrics.message_count += 1;
            handle.metrics.last_activity = Utc::now();
        }
        if let Some(handler) = self.handlers.get(channel) {
            handler(client_id, payload);
        }
    }

    pub fn record_error(&self, client_id: &ClientId) {
        if let Some(mut handle) = self.clients.get_mut(client_id) {
            handle.metrics.error_count += 1;
        }
    }

    /// Direct send to one client. Returns `false` if the client is not
    /// connected or its channel is closed.
    pub fn send_to_client(&self, client_id: &ClientId, frame: OutboundFrame) -> bool {
        match self.clients.get(client_id) {
            Some(handle) => handle.sender.send(frame).is_ok(),
            None => false,
        }
    }

    /// Serialize once, fan out concurrently to every subscriber of
    /// `channel` (or every connected client if `channel` is `None`).
    /// Returns the count of clients the frame was *not* delivered to.
    pub async fn broadcast(&self, frame: OutboundFrame, channel: Option<&Channel>) -> usize {
        let targets: Vec<ClientId> = match channel {
            Some(channel) => self
                .subscriptions
                .get(channel)
                .map(|set| set.iter().map(|c| c.clone()).collect())
                .unwrap_or_default(),
            None => self.clients.iter().map(|e| e.key().clone()).collect(),
        };

        let sends = targets.iter().map(|client_id| {
            let frame = frame.clone();
            async move { self.send_to_client(client_id, frame) }
        });
        let results = join_all(sends).await;
        results.into_iter().filter(|delivered| !delivered).count()
    }

    /// Disconnect clients idle past the configured threshold or with too
    /// many recorded errors. Called every `reaper_interval` from the
    /// facade's background loop.
    pub fn reap_stale(&self) -> Vec<ClientId> {
        let now = Utc::now();
        let stale: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|e| {
                let m = &e.value().metrics;
                now - m.last_activity > self.reaper_idle || m.error_count >= self.reaper_max_errors
            })
            .map(|e| e.key().clone())
            .collect();

        for client_id in &stale {
            warn!(%client_id, "reaping stale connection");
            self.disconnect(client_id);
        }
        stale
    }

    pub fn metrics(&self) -> HubMetrics {
        HubMetrics {
            total_connections: self.clients.len(),
            per_channel_counts: self
                .subscriptions
                .iter()
                .map(|e| (e.key().clone(), e.value().len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hub() -> ConnectionHub {
        ConnectionHub::new(300, 3)
    }

    #[test]
    fn subscribe_is_idempotent_and_unsubscribe_without_prior_is_noop() {
        let hub = hub();
        let client = "c1".to_string();
        let channel = "market".to_string();
        hub.connect(client.clone());
        hub.subscribe(&client, &channel);
        hub.subscribe(&client, &channel);
        assert_eq!(hub.subscriptions_of(&client).len(), 1);

        hub.unsubscribe(&"ghost".to_string(), &channel);
        assert_eq!(hub.subscriptions_of(&client).len(), 1);
    }

    #[test]
    fn disconnect_removes_client_from_every_channel() {
        let hub = hub();
        let client = "c1".to_string();
        hub.connect(client.clone());
        hub.subscribe(&client, &"market".to_string());
        hub.subscribe(&client, &"trades".to_string());

        hub.disconnect(&client);

        assert!(!hub.is_connected(&client));
        assert!(hub.subscriptions_of(&client).is_empty());
    }

    #[tokio::test]
    async fn broadcast_only_reaches_subscribers() {
        let hub = hub();
        let a = "a".to_string();
        let b = "b".to_string();
        let _rx_a = hub.connect(a.clone());
        let _rx_b = hub.connect(b.clone());
        hub.subscribe(&a, &"market".to_string());

        let frame = OutboundFrame::new("tick", json!({"px": 1}), Some("market".to_string()));
        let failures = hub.broadcast(frame, Some(&"market".to_string())).await;
        assert_eq!(failures, 0);
    }

    #[test]
    fn reaper_evicts_idle_and_error_heavy_clients() {
        let hub = ConnectionHub::new(-1, 3);
        let client = "idle".to_string();
        hub.connect(client.clone());

        let reaped = hub.reap_stale();
        assert_eq!(reaped, vec![client.clone()]);
        assert!(!hub.is_connected(&client));
    }
}
