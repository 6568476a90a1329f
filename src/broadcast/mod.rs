//! Broadcast Fabric: local fan-out to this instance's WebSocket
//! connections, plus a cross-instance relay leg so a multi-instance
//! deployment keeps every connected client in sync regardless of which
//! instance owns a given match's scheduler.

use async_trait::async_trait;
use base64::Engine;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub body: serde_json::Value,
    pub source_instance: String,
    pub message_id: String,
}

#[async_trait]
pub trait BroadcastFabric: Send + Sync {
    fn publish(&self, channel: &str, body: serde_json::Value);
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Envelope>;
}

/// Transport for the cross-instance relay leg. `InMemoryRelay` below is the
/// only implementation shipped here; a production multi-instance
/// deployment would back this with a pub/sub broker (see DESIGN.md for why
/// that isn't wired in directly).
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn publish_relay(&self, signed_payload: &[u8]);
}

pub struct InMemoryRelay;

#[async_trait]
impl RelayTransport for InMemoryRelay {
    async fn publish_relay(&self, _signed_payload: &[u8]) {
        // Single-instance deployments have no peer to relay to.
    }
}

pub struct LocalFabric {
    channels: DashMap<String, broadcast::Sender<Envelope>>,
    relay: Arc<dyn RelayTransport>,
    mac_secret: Vec<u8>,
    instance_id: String,
}

impl LocalFabric {
    pub fn new(relay: Arc<dyn RelayTransport>, mac_secret: String, instance_id: String) -> Self {
        Self {
            channels: DashMap::new(),
            relay,
            mac_secret: mac_secret.into_bytes(),
            instance_id,
        }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Envelope> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }

    fn sign(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.mac_secret).expect("hmac accepts any key length");
        mac.update(payload);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Verifies a MAC in constant time (`ct_eq` is not pulled in as a
    /// separate dependency for a single comparison; this loop always
    /// compares every byte rather than short-circuiting).
    fn verify(&self, payload: &[u8], mac_b64: &str) -> bool {
        let expected = self.sign(payload);
        let expected_bytes = expected.as_bytes();
        let given_bytes = mac_b64.as_bytes();
        if expected_bytes.len() != given_bytes.len() {
            return false;
        }
        let mut diff = 0u8;
        for (a, b) in expected_bytes.iter().zip(given_bytes.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }

    /// Called when a signed envelope arrives from the relay leg of another
    /// instance. Source-id deduplication happens upstream of this crate's
    /// boundary (the relay transport is expected to not redeliver its own
    /// publisher's messages); this only verifies integrity before fan-out.
    pub fn ingest_relayed(&self, payload: &[u8], mac_b64: &str) {
        if !self.verify(payload, mac_b64) {
            warn!("dropped relayed broadcast envelope with invalid MAC");
            return;
        }
        let Ok(envelope) = serde_json::from_slice::<Envelope>(payload) else {
            warn!("dropped relayed broadcast envelope with unparseable body");
            return;
        };
        if envelope.source_instance == self.instance_id {
            return;
        }
        let _ = self.sender_for(&envelope.channel).send(envelope);
    }
}

#[async_trait]
impl BroadcastFabric for LocalFabric {
    fn publish(&self, channel: &str, body: serde_json::Value) {
        let envelope = Envelope {
            channel: channel.to_string(),
            body,
            source_instance: self.instance_id.clone(),
            message_id: Uuid::new_v4().to_string(),
        };

        let _ = self.sender_for(channel).send(envelope.clone());

        if let Ok(payload) = serde_json::to_vec(&envelope) {
            let mac = self.sign(&payload);
            let relay = self.relay.clone();
            let signed = [payload, mac.into_bytes()].concat();
            tokio::spawn(async move {
                relay.publish_relay(&signed).await;
            });
        }
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Envelope> {
        self.sender_for(channel).subscribe()
    }
}
