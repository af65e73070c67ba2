//! NIP-46 method dispatch on top of the session manager and request queue.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec::{
    normalize_pubkey, ConnectParams, Method, Nip46Request, ResponseOutcome,
};
use crate::config::Nip46Config;
use crate::error::{Result, SignerError};
use crate::queue::RequestQueue;
use crate::session::{
    PairingOptions, PairingUri, Session, SessionManager, SessionPatch, SessionStore,
};
use crate::transport::Transport;
use crate::types::PublicKey;

/// What `pair_with_uri` hands back. `handshake` is the background `connect`
/// task when the remote signer was known at pairing time.
#[derive(Debug)]
pub struct PairingResult {
    pub session: Session,
    pub uri: PairingUri,
    pub handshake: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct SigningService {
    sessions: Arc<SessionManager>,
    queue: Arc<RequestQueue>,
    transport: Arc<dyn Transport>,
}

impl SigningService {
    pub fn new(config: Nip46Config, transport: Arc<dyn Transport>) -> Self {
        let timeout = config.request_timeout();
        Self::from_parts(Arc::new(SessionManager::new(config)), transport, timeout)
    }

    pub fn with_store(
        config: Nip46Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let timeout = config.request_timeout();
        Self::from_parts(
            Arc::new(SessionManager::with_store(config, store)),
            transport,
            timeout,
        )
    }

    fn from_parts(
        sessions: Arc<SessionManager>,
        transport: Arc<dyn Transport>,
        timeout: std::time::Duration,
    ) -> Self {
        let queue = Arc::new(RequestQueue::new(
            sessions.clone(),
            transport.clone(),
            timeout,
        ));
        Self {
            sessions,
            queue,
            transport,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn init(&self) -> Result<()> {
        self.queue.init()
    }

    pub fn destroy(&self) {
        self.queue.shutdown();
    }

    fn session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .get_session(session_id)
            .ok_or_else(|| SignerError::Session(session_id.to_string()))
    }

    /// Create a session from `uri` and, if the remote signer is already
    /// known, start the `connect` handshake in the background.
    pub async fn pair_with_uri(&self, uri: &str, options: PairingOptions) -> Result<PairingResult> {
        let paired = self.sessions.create_session_from_uri(uri, options)?;
        self.init()?;

        let session = paired.session;
        if let Err(e) = self
            .transport
            .watch(&session.client_keys.public_key(), &session.relays)
            .await
        {
            warn!(
                "[nip46][service] failed to watch relays for session {}: {}",
                session.id, e
            );
            self.sessions
                .update_session(&session.id, SessionPatch::error(e.to_string()));
        }

        let handshake = session.remote_signer_pubkey.map(|_| {
            let service = self.clone();
            let session_id = session.id.clone();
            tokio::spawn(async move {
                if let Err(e) = service.initiate_connect(&session_id).await {
                    error!(
                        "[nip46][service] connect handshake failed for session {}: {}",
                        session_id, e
                    );
                    service
                        .sessions
                        .update_session(&session_id, SessionPatch::error(e.to_string()));
                }
            })
        });

        Ok(PairingResult {
            session,
            uri: paired.uri,
            handshake,
        })
    }

    pub async fn send_request(
        &self,
        session_id: &str,
        method: Method,
        params: Vec<String>,
        request_id: Option<String>,
    ) -> Result<ResponseOutcome> {
        let session = self.session(session_id)?;
        self.init()?;
        let request = Nip46Request::new(method, params, request_id);
        self.queue.enqueue(&session, request).await
    }

    /// Handshake for sessions whose remote signer became known after pairing.
    pub async fn connect_session(&self, session_id: &str) -> Result<()> {
        self.init()?;
        self.initiate_connect(session_id).await
    }

    async fn initiate_connect(&self, session_id: &str) -> Result<()> {
        let session = self.session(session_id)?;
        let remote = session.remote_signer_pubkey.ok_or_else(|| {
            SignerError::NotReady(format!("session {session_id} has no remote signer yet"))
        })?;

        let request = Nip46Request::connect(
            ConnectParams {
                remote_signer_pubkey: &remote,
                secret: session.nostr_connect_secret.as_deref(),
                permissions: &session.permissions,
            },
            None,
        );
        let result = self.queue.enqueue(&session, request).await?.into_result()?;
        debug!(
            "[nip46][service] connect acknowledged for session {}: {}",
            session_id, result
        );
        self.sessions
            .update_session(session_id, SessionPatch::clear_error());
        info!("[nip46][service] session {} connected", session_id);

        // The user key may have arrived while connect was in flight.
        let session = self.session(session_id)?;
        if session.user_pubkey.is_none() && session.has_permission(Method::GetPublicKey) {
            self.fetch_user_public_key(session_id).await;
        }
        Ok(())
    }

    /// Ask the remote signer for the user's key. Failures are recorded in
    /// `last_error`, not returned.
    pub async fn fetch_user_public_key(&self, session_id: &str) -> Option<PublicKey> {
        let fetched = async {
            let outcome = self
                .send_request(session_id, Method::GetPublicKey, Vec::new(), None)
                .await?;
            let hex = outcome.into_result()?;
            normalize_pubkey(hex.trim()).map_err(|e| {
                SignerError::Protocol(format!("get_public_key returned an invalid key: {e}"))
            })
        }
        .await;

        match fetched {
            Ok(pubkey) => {
                self.sessions.update_session(
                    session_id,
                    SessionPatch::clear_error().with_user_pubkey(pubkey),
                );
                info!(
                    "[nip46][service] session {} signs as {}",
                    session_id, pubkey
                );
                Some(pubkey)
            }
            Err(e) => {
                warn!(
                    "[nip46][service] get_public_key failed for session {}: {}",
                    session_id, e
                );
                self.sessions
                    .update_session(session_id, SessionPatch::error(e.to_string()));
                None
            }
        }
    }

    pub async fn ping(&self, session_id: &str) -> Result<()> {
        let result = self
            .send_request(session_id, Method::Ping, Vec::new(), None)
            .await?
            .into_result()?;
        if result != "pong" {
            debug!("[nip46][service] unexpected ping answer: {}", result);
        }
        Ok(())
    }
}
