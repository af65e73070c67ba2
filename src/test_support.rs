//! Mock transport and remote signer for unit tests.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::codec::{self, Algorithm, ConversationContext, Nip46Request};
use crate::error::{Result, SignerError};
use crate::transport::Transport;
use crate::types::{Event, Keys, PublicKey, NOSTR_CONNECT_KIND};

pub(crate) type Responder = Arc<dyn Fn(&Event) -> Vec<Event> + Send + Sync>;

/// In-memory bus. Every sent event is copied to the outbox; an optional
/// responder turns sent events into inbound ones synchronously.
pub(crate) struct MockTransport {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
    outbox_tx: mpsc::UnboundedSender<Event>,
    outbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    responder: Mutex<Option<Responder>>,
    fail_sends: AtomicBool,
    pub watched: Mutex<Vec<PublicKey>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (outbox_tx, outbox_rx) = mpsc::unbounded();
        Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            outbox_tx,
            outbox_rx: Mutex::new(Some(outbox_rx)),
            responder: Mutex::new(None),
            fail_sends: AtomicBool::new(false),
            watched: Mutex::new(Vec::new()),
        })
    }

    pub fn with_responder(responder: Responder) -> Arc<Self> {
        let transport = Self::new();
        transport.set_responder(responder);
        transport
    }

    pub fn set_responder(&self, responder: Responder) {
        *self.responder.lock().unwrap() = Some(responder);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Everything sent through the transport, in order. Can be taken once.
    pub fn outbox(&self) -> mpsc::UnboundedReceiver<Event> {
        self.outbox_rx.lock().unwrap().take().expect("outbox already taken")
    }

    /// Push an event to every live subscriber.
    pub fn deliver(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, event: Event, _to: &PublicKey, relays: &[String]) -> Result<()> {
        assert!(!relays.is_empty(), "send without relays");
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SignerError::Transport("relay unreachable".to_string()));
        }
        let _ = self.outbox_tx.unbounded_send(event.clone());
        let responder = self.responder.lock().unwrap().clone();
        if let Some(responder) = responder {
            for reply in responder(&event) {
                self.deliver(reply);
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<BoxStream<'static, Event>> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().unwrap().push(tx);
        Ok(rx.boxed())
    }

    async fn watch(&self, client_pubkey: &PublicKey, _relays: &[String]) -> Result<()> {
        self.watched.lock().unwrap().push(*client_pubkey);
        Ok(())
    }
}

/// Bunker side of the conversation: `bunker_keys` talk to clients,
/// `user_keys` sign and encrypt on the user's behalf.
pub(crate) struct MockRemoteSigner {
    pub bunker_keys: Keys,
    pub user_keys: Keys,
    pub algorithm: Algorithm,
}

impl MockRemoteSigner {
    pub fn new() -> Arc<Self> {
        Self::with_algorithm(Algorithm::Nip44)
    }

    pub fn with_algorithm(algorithm: Algorithm) -> Arc<Self> {
        Arc::new(Self {
            bunker_keys: Keys::generate(),
            user_keys: Keys::generate(),
            algorithm,
        })
    }

    pub fn bunker_uri(&self, secret: Option<&str>) -> String {
        let mut uri = format!(
            "bunker://{}?relay=wss%3A%2F%2Frelay.example.com",
            self.bunker_keys.public_key()
        );
        if let Some(secret) = secret {
            uri.push_str("&secret=");
            uri.push_str(secret);
        }
        uri
    }

    /// Decrypt a client request addressed to the bunker.
    pub fn decode_request(&self, event: &Event) -> Option<Nip46Request> {
        if event.kind != NOSTR_CONNECT_KIND {
            return None;
        }
        let sender = event.pubkey.to_hex();
        let ctx = ConversationContext::new(self.bunker_keys.secret_key(), &sender);
        let plaintext = codec::decrypt(&event.content, &ctx, self.algorithm).ok()?;
        serde_json::from_str(&plaintext).ok()
    }

    /// Encrypted, signed response event from the bunker to `client`.
    pub fn response_event(&self, client: &PublicKey, body: Value) -> Event {
        let client_hex = client.to_hex();
        let ctx = ConversationContext::new(self.bunker_keys.secret_key(), &client_hex);
        let content = codec::encrypt(&body.to_string(), &ctx, self.algorithm).unwrap();
        Event::sign_with(
            &self.bunker_keys,
            NOSTR_CONNECT_KIND,
            content,
            vec![vec!["p".to_string(), client_hex]],
            crate::types::nostr::timestamp_now(),
        )
        .unwrap()
    }

    pub fn reply(&self, request_event: &Event, result: Option<&str>, error: Option<&str>) -> Event {
        let request = self.decode_request(request_event).expect("undecodable request");
        let mut body = json!({ "id": request.id });
        if let Some(result) = result {
            body["result"] = json!(result);
        }
        if let Some(error) = error {
            body["error"] = json!(error);
        }
        self.response_event(&request_event.pubkey, body)
    }

    /// What an honest bunker answers.
    pub fn handle(&self, request: &Nip46Request) -> std::result::Result<String, String> {
        let user = self.user_keys.secret_key();
        match request.method.as_str() {
            "connect" => Ok("ack".to_string()),
            "ping" => Ok("pong".to_string()),
            "get_public_key" => Ok(self.user_keys.public_key().to_hex()),
            "sign_event" => {
                let template: Value =
                    serde_json::from_str(request.params.first().ok_or("missing template")?)
                        .map_err(|e| e.to_string())?;
                let tags: Vec<Vec<String>> =
                    serde_json::from_value(template["tags"].clone()).unwrap_or_default();
                let event = Event::sign_with(
                    &self.user_keys,
                    template["kind"].as_u64().unwrap_or(1) as u16,
                    template["content"].as_str().unwrap_or_default(),
                    tags,
                    template["created_at"].as_u64().unwrap_or_default(),
                )
                .map_err(|e| e.to_string())?;
                Ok(event.to_json())
            }
            method @ ("nip44_encrypt" | "nip44_decrypt" | "nip04_encrypt" | "nip04_decrypt") => {
                let peer = request.params.first().ok_or("missing peer")?;
                let value = request.params.get(1).ok_or("missing value")?;
                let algorithm = if method.starts_with("nip44") {
                    Algorithm::Nip44
                } else {
                    Algorithm::Nip04
                };
                let ctx = ConversationContext::new(user, peer);
                if method.ends_with("encrypt") {
                    codec::encrypt(value, &ctx, algorithm).map_err(|e| e.to_string())
                } else {
                    codec::decrypt(value, &ctx, algorithm).map_err(|e| e.to_string())
                }
            }
            other => Err(format!("unsupported method {other}")),
        }
    }

    /// Responder answering every request honestly.
    pub fn honest(self: &Arc<Self>) -> Responder {
        let bunker = self.clone();
        Arc::new(move |event: &Event| {
            let Some(request) = bunker.decode_request(event) else {
                return Vec::new();
            };
            let reply = match bunker.handle(&request) {
                Ok(result) => json!({ "id": request.id, "result": result }),
                Err(error) => json!({ "id": request.id, "error": error }),
            };
            vec![bunker.response_event(&event.pubkey, reply)]
        })
    }

    /// Responder built from a closure over the decoded request.
    pub fn scripted<F>(self: &Arc<Self>, script: F) -> Responder
    where
        F: Fn(&Nip46Request) -> Option<Value> + Send + Sync + 'static,
    {
        let bunker = self.clone();
        Arc::new(move |event: &Event| {
            let Some(request) = bunker.decode_request(event) else {
                return Vec::new();
            };
            script(&request)
                .map(|body| vec![bunker.response_event(&event.pubkey, body)])
                .unwrap_or_default()
        })
    }
}
