//! Message bus seam between the request queue and the relay network.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::lock::Mutex;
use futures::stream::{self, BoxStream};
use futures::{future, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, SignerError};
use crate::types::{Event, PublicKey, NOSTR_CONNECT_KIND};

/// Delivers signed events to relays and hands back whatever arrives.
///
/// `send` is fire-and-forget: success means the event was handed to the
/// network layer, not that anyone received it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, event: Event, to: &PublicKey, relays: &[String]) -> Result<()>;

    /// Stream of incoming events. May be called again after the previous
    /// stream was dropped.
    fn subscribe(&self) -> Result<BoxStream<'static, Event>>;

    /// Ask the network layer to deliver kind 24133 events tagged to
    /// `client_pubkey`. Transports that receive everything can ignore it.
    async fn watch(&self, _client_pubkey: &PublicKey, _relays: &[String]) -> Result<()> {
        Ok(())
    }
}

const SUB_PREFIX: &str = "nip46";

/// Frame-level adapter to a connections layer that speaks raw relay frames.
///
/// Outbound messages are `{"relays": [...], "frames": [...]}` envelopes;
/// inbound messages are single relay frames, of which only
/// `["EVENT", "<sub>", {...}]` for our subscriptions are kept.
pub struct RelayTransport {
    to_connections: mpsc::UnboundedSender<Vec<u8>>,
    from_connections: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl RelayTransport {
    pub fn new(
        to_connections: mpsc::UnboundedSender<Vec<u8>>,
        from_connections: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            to_connections,
            from_connections: Arc::new(Mutex::new(from_connections)),
        }
    }

    pub fn subscription_id(client_pubkey: &PublicKey) -> String {
        let hex = client_pubkey.to_hex();
        format!("{SUB_PREFIX}-{}", &hex[..16])
    }

    fn publish_frames(&self, relays: &[String], frames: Vec<Value>) -> Result<()> {
        let env = json!({
            "relays": relays,
            "frames": frames,
        });
        let buf = serde_json::to_vec(&env).map_err(|e| SignerError::Transport(e.to_string()))?;
        self.to_connections.unbounded_send(buf).map_err(|e| {
            warn!("[nip46][transport] failed to send to connections: {}", e);
            SignerError::Transport("connections channel closed".to_string())
        })
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn send(&self, event: Event, to: &PublicKey, relays: &[String]) -> Result<()> {
        let event_json =
            serde_json::to_value(&event).map_err(|e| SignerError::Transport(e.to_string()))?;
        debug!(
            "[nip46][transport] publishing {} to {} via {} relays",
            event.id.to_hex(),
            to,
            relays.len()
        );
        self.publish_frames(relays, vec![json!(["EVENT", event_json])])
    }

    fn subscribe(&self) -> Result<BoxStream<'static, Event>> {
        let rx = self.from_connections.clone();
        let frames = stream::unfold(rx, |rx| async move {
            let next = {
                let mut guard = rx.lock().await;
                guard.next().await
            };
            next.map(|frame| (frame, rx))
        });
        Ok(frames
            .filter_map(|frame| future::ready(parse_event_frame(&frame)))
            .boxed())
    }

    async fn watch(&self, client_pubkey: &PublicKey, relays: &[String]) -> Result<()> {
        let filter = json!({
            "kinds": [NOSTR_CONNECT_KIND],
            "#p": [client_pubkey.to_hex()],
        });
        let frame = json!(["REQ", Self::subscription_id(client_pubkey), filter]);
        self.publish_frames(relays, vec![frame])
    }
}

fn parse_event_frame(bytes: &[u8]) -> Option<Event> {
    let frame: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(_) => {
            debug!("[nip46][transport] ignoring {} non-JSON bytes", bytes.len());
            return None;
        }
    };
    let parts = frame.as_array()?;
    match parts.first().and_then(Value::as_str) {
        Some("EVENT") | Some("event") => {}
        _ => return None,
    }
    let sub = parts.get(1).and_then(Value::as_str)?;
    if !sub.starts_with(SUB_PREFIX) {
        return None;
    }
    let event = parts.get(2)?;
    match serde_json::from_value::<Event>(event.clone()) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("[nip46][transport] failed to parse event JSON: {}", e);
            None
        }
    }
}
