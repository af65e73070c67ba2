//! Correlates NIP-46 responses with outstanding requests.
//!
//! Every request gets a pending entry keyed by its id. The entry is removed
//! exactly once: by the pump when a matching response arrives, by the caller
//! when its deadline passes, or by `shutdown`. Whoever removes it owns the
//! completion, so late and duplicate responses find nothing and are dropped.

use futures::stream::BoxStream;
use futures::StreamExt;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::codec::{self, ConversationContext, Nip46Request, Nip46Response, ResponseOutcome};
use crate::error::{Result, SignerError};
use crate::session::{Session, SessionManager, SessionPatch};
use crate::transport::Transport;
use crate::types::nostr::timestamp_now;
use crate::types::{Event, PublicKey, NOSTR_CONNECT_KIND};

struct PendingRequest {
    session_id: String,
    deadline: Instant,
    tx: oneshot::Sender<Result<ResponseOutcome>>,
}

type PendingMap = Arc<Mutex<FxHashMap<String, PendingRequest>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, FxHashMap<String, PendingRequest>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct RequestQueue {
    sessions: Arc<SessionManager>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    pending: PendingMap,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RequestQueue {
    pub fn new(
        sessions: Arc<SessionManager>,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            transport,
            timeout,
            pending: Arc::new(Mutex::new(FxHashMap::default())),
            pump: Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_running(&self) -> bool {
        self.pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Subscribe to the transport and start the response pump. Calling it
    /// while the pump runs does nothing.
    pub fn init(&self) -> Result<()> {
        let mut pump = self.pump.lock().unwrap_or_else(|e| e.into_inner());
        if pump.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return Ok(());
        }

        let events = self.transport.subscribe()?;
        let handle = tokio::spawn(run_pump(
            events,
            self.pending.clone(),
            self.sessions.clone(),
        ));
        *pump = Some(handle);
        info!("[nip46][queue] response pump started");
        Ok(())
    }

    /// Stop the pump and reject everything still pending with
    /// `SignerError::Shutdown`.
    pub fn shutdown(&self) {
        if let Some(handle) = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
            info!("[nip46][queue] response pump stopped");
        }

        let drained: Vec<(String, PendingRequest)> = lock(&self.pending).drain().collect();
        if !drained.is_empty() {
            info!(
                "[nip46][queue] rejecting {} pending requests on shutdown",
                drained.len()
            );
        }
        for (_, request) in drained {
            let _ = request.tx.send(Err(SignerError::Shutdown));
        }
    }

    /// Send `request` on behalf of `session` and wait for its response.
    ///
    /// Nothing is retried: a timed out `sign_event` may still be signed by
    /// the remote signer later.
    pub async fn enqueue(&self, session: &Session, request: Nip46Request) -> Result<ResponseOutcome> {
        if !self.is_running() {
            return Err(SignerError::Shutdown);
        }
        let remote = session.remote_signer_pubkey.ok_or_else(|| {
            SignerError::NotReady(format!("session {} has no remote signer yet", session.id))
        })?;
        let id = request.id.clone();
        let payload = request.to_json()?;

        let deadline = Instant::now() + self.timeout;
        let (tx, mut rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.contains_key(&id) {
                return Err(SignerError::Encode(format!("request id {id} already pending")));
            }
            pending.insert(
                id.clone(),
                PendingRequest {
                    session_id: session.id.clone(),
                    deadline,
                    tx,
                },
            );
        }

        let event = match self.build_event(session, &remote, &payload) {
            Ok(event) => event,
            Err(e) => {
                self.remove(&id);
                return Err(e);
            }
        };

        debug!(
            "[nip46][queue] sending {} ({}) for session {}",
            id, request.method, session.id
        );
        if let Err(e) = self.transport.send(event, &remote, &session.relays).await {
            self.remove(&id);
            warn!("[nip46][queue] send failed for {}: {}", id, e);
            return Err(match e {
                SignerError::Transport(msg) => SignerError::Transport(msg),
                other => SignerError::Transport(other.to_string()),
            });
        }

        match timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without an answer: the entry was drained
            Ok(Err(_)) => Err(SignerError::Shutdown),
            Err(_) => {
                if self.remove(&id).is_none() {
                    // Resolved in the same instant the deadline fired
                    if let Ok(outcome) = rx.try_recv() {
                        return outcome;
                    }
                }
                warn!(
                    "[nip46][queue] request {} timed out after {}ms",
                    id,
                    self.timeout.as_millis()
                );
                Err(SignerError::Timeout {
                    id,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    fn remove(&self, id: &str) -> Option<PendingRequest> {
        lock(&self.pending).remove(id)
    }

    fn build_event(&self, session: &Session, remote: &PublicKey, payload: &str) -> Result<Event> {
        let remote_hex = remote.to_hex();
        let ctx = ConversationContext::new(session.client_keys.secret_key(), &remote_hex);
        let content = codec::encrypt(payload, &ctx, session.algorithm)?;

        let mut tags = vec![vec!["p".to_string(), remote_hex]];
        if let Some(app) = &session.app_name {
            tags.push(vec!["client".to_string(), app.clone()]);
        }

        Event::sign_with(
            &session.client_keys,
            NOSTR_CONNECT_KIND,
            content,
            tags,
            timestamp_now(),
        )
        .map_err(|e| SignerError::Encode(format!("sign envelope: {e}")))
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

async fn run_pump(
    mut events: BoxStream<'static, Event>,
    pending: PendingMap,
    sessions: Arc<SessionManager>,
) {
    while let Some(event) = events.next().await {
        handle_event(&event, &pending, &sessions);
    }
    info!("[nip46][queue] transport stream closed, pump exiting");
}

fn handle_event(event: &Event, pending: &PendingMap, sessions: &SessionManager) {
    if event.kind != NOSTR_CONNECT_KIND {
        debug!("[nip46][queue] ignoring event kind {}", event.kind);
        return;
    }

    // Sessions whose client key is p-tagged and whose remote signer is the
    // sender, or not known yet.
    let candidates: Vec<Session> = event
        .tag_values("p")
        .filter_map(|p| PublicKey::from_hex(p).ok())
        .flat_map(|client| sessions.find_by_client_pubkey(&client))
        .filter(|s| s.remote_signer_pubkey.map_or(true, |r| r == event.pubkey))
        .collect();
    if candidates.is_empty() {
        debug!("[nip46][queue] event {} not addressed to us", event.id.to_hex());
        return;
    }

    if let Err(e) = event.verify() {
        warn!("[nip46][queue] dropping event with bad signature: {}", e);
        return;
    }

    let sender = event.pubkey.to_hex();
    let decrypted = candidates.into_iter().find_map(|session| {
        let ctx = ConversationContext::new(session.client_keys.secret_key(), &sender);
        codec::decrypt(&event.content, &ctx, session.algorithm)
            .ok()
            .map(|plaintext| (session, plaintext))
    });
    let Some((session, plaintext)) = decrypted else {
        warn!("[nip46][queue] could not decrypt event from {}", sender);
        return;
    };

    let response = match Nip46Response::from_json(&plaintext) {
        Ok(response) => response,
        Err(e) => {
            warn!("[nip46][queue] undecodable response from {}: {}", sender, e);
            return;
        }
    };

    if response.is_auth_challenge() {
        info!(
            "[nip46][queue] request {} needs user authorization at {}",
            response.id,
            response.error.as_deref().unwrap_or_default()
        );
        return;
    }

    if session.remote_signer_pubkey.is_none() {
        let result = response.result_str();
        match (&session.nostr_connect_secret, result) {
            (Some(secret), Some(result)) if *secret == result => {
                info!(
                    "[nip46][queue] remote signer discovered for session {}: {}",
                    session.id, sender
                );
                sessions.update_session(
                    &session.id,
                    SessionPatch::clear_error().with_remote_signer_pubkey(event.pubkey),
                );
            }
            _ => {
                warn!(
                    "[nip46][queue] ignoring response from unconfirmed signer {}",
                    sender
                );
                return;
            }
        }
    }

    let entry = {
        let mut pending = lock(pending);
        match pending.get(&response.id) {
            Some(entry) if entry.session_id == session.id => pending.remove(&response.id),
            Some(_) => {
                warn!(
                    "[nip46][queue] response {} arrived for another session",
                    response.id
                );
                None
            }
            None => None,
        }
    };

    match entry {
        Some(entry) => {
            debug!(
                "[nip46][queue] resolved {} ({}ms before deadline)",
                response.id,
                entry
                    .deadline
                    .saturating_duration_since(Instant::now())
                    .as_millis()
            );
            let _ = entry.tx.send(Ok(response.outcome()));
        }
        None => debug!("[nip46][queue] no pending request {}", response.id),
    }
}
