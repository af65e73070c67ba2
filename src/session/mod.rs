//! Session model and the manager that owns the authoritative copies.

mod store;
mod uri;

pub use store::{MemorySessionStore, SessionStore};
pub use uri::{normalize_relay_url, normalize_relays, PairingUri};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::codec::{Algorithm, Method};
use crate::config::Nip46Config;
use crate::error::{Result, SignerError};
use crate::types::{Keys, PublicKey};

/// One pairing with a remote signer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub remote_signer_pubkey: Option<PublicKey>,
    pub user_pubkey: Option<PublicKey>,
    pub relays: Vec<String>,
    pub permissions: Vec<String>,
    pub nostr_connect_secret: Option<String>,
    pub last_error: Option<String>,
    #[serde(with = "keys_hex")]
    pub client_keys: Keys,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default)]
    pub app_name: Option<String>,
}

impl Session {
    pub fn is_ready(&self) -> bool {
        self.user_pubkey.is_some()
    }

    /// Permissions are `method` or `method:param` (e.g. `sign_event:1`).
    pub fn has_permission(&self, method: Method) -> bool {
        let name = method.as_str();
        self.permissions.iter().any(|p| {
            p == name
                || p.strip_prefix(name)
                    .map_or(false, |rest| rest.starts_with(':'))
        })
    }

    /// `bunker://` URI for this session, once the remote key is known.
    pub fn bunker_uri(&self) -> Option<PairingUri> {
        self.remote_signer_pubkey.map(|remote| PairingUri::Bunker {
            remote_signer_pubkey: remote,
            relays: self.relays.clone(),
            secret: self.nostr_connect_secret.clone(),
        })
    }
}

mod keys_hex {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::types::Keys;

    pub fn serialize<S: Serializer>(keys: &Keys, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&keys.secret_key().to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Keys, D::Error> {
        let s = String::deserialize(deserializer)?;
        Keys::parse(&s).map_err(de::Error::custom)
    }
}

/// Partial update for [`SessionManager::update_session`]. `None` leaves a
/// field untouched; `last_error: Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub remote_signer_pubkey: Option<PublicKey>,
    pub user_pubkey: Option<PublicKey>,
    pub relays: Option<Vec<String>>,
    pub permissions: Option<Vec<String>>,
    pub last_error: Option<Option<String>>,
}

impl SessionPatch {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            last_error: Some(Some(message.into())),
            ..Default::default()
        }
    }

    pub fn clear_error() -> Self {
        Self {
            last_error: Some(None),
            ..Default::default()
        }
    }

    pub fn with_user_pubkey(mut self, pubkey: PublicKey) -> Self {
        self.user_pubkey = Some(pubkey);
        self
    }

    pub fn with_remote_signer_pubkey(mut self, pubkey: PublicKey) -> Self {
        self.remote_signer_pubkey = Some(pubkey);
        self
    }

    fn apply(self, session: &mut Session) {
        if let Some(remote) = self.remote_signer_pubkey {
            session.remote_signer_pubkey = Some(remote);
        }
        if let Some(user) = self.user_pubkey {
            session.user_pubkey = Some(user);
        }
        if let Some(relays) = self.relays {
            session.relays = relays;
        }
        if let Some(permissions) = self.permissions {
            session.permissions = permissions;
        }
        if let Some(last_error) = self.last_error {
            session.last_error = last_error;
        }
    }
}

/// Caller-side knobs for pairing.
#[derive(Clone, Debug, Default)]
pub struct PairingOptions {
    /// Local keypair; generated when absent. Required for `nostrconnect://`.
    pub client_keys: Option<Keys>,
    /// Overrides the URI's `perms` and the configured defaults.
    pub permissions: Option<Vec<String>>,
    pub algorithm: Option<Algorithm>,
    pub app_name: Option<String>,
    /// Known user identity, e.g. restored from an earlier login.
    pub user_pubkey: Option<PublicKey>,
}

#[derive(Clone, Debug)]
pub struct PairedSession {
    pub session: Session,
    pub uri: PairingUri,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    store: Arc<dyn SessionStore>,
    config: Nip46Config,
}

impl SessionManager {
    pub fn new(config: Nip46Config) -> Self {
        Self::with_store(config, Arc::new(MemorySessionStore::new()))
    }

    pub fn with_store(config: Nip46Config, store: Arc<dyn SessionStore>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &Nip46Config {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, session: &Session) {
        if let Err(e) = self.store.set(session) {
            warn!("[nip46][session] failed to persist {}: {}", session.id, e);
        }
    }

    /// Repopulate the in-memory map from the store. Returns how many sessions
    /// were loaded.
    pub fn load(&self) -> Result<usize> {
        let stored = self.store.list()?;
        let count = stored.len();
        let mut sessions = self.write();
        for session in stored {
            sessions.insert(session.id.clone(), session);
        }
        info!("[nip46][session] loaded {} sessions from store", count);
        Ok(count)
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Session> {
        self.read().values().cloned().collect()
    }

    /// Sessions talking through `client_pubkey`.
    pub fn find_by_client_pubkey(&self, client_pubkey: &PublicKey) -> Vec<Session> {
        self.read()
            .values()
            .filter(|s| s.client_keys.public_key() == *client_pubkey)
            .cloned()
            .collect()
    }

    /// Apply `patch` atomically. Unknown ids are ignored.
    pub fn update_session(&self, id: &str, patch: SessionPatch) {
        let mut sessions = self.write();
        match sessions.get_mut(id) {
            Some(session) => {
                patch.apply(session);
                // under the lock: store writes keep patch order
                self.persist(session);
            }
            None => debug!("[nip46][session] update for unknown session {}", id),
        }
    }

    pub fn create_session_from_uri(
        &self,
        uri: &str,
        options: PairingOptions,
    ) -> Result<PairedSession> {
        let parsed = PairingUri::parse(uri)?;

        let (client_keys, uri_permissions, uri_name) = match &parsed {
            PairingUri::Bunker { .. } => (
                options.client_keys.unwrap_or_else(Keys::generate),
                Vec::new(),
                None,
            ),
            PairingUri::NostrConnect {
                client_pubkey,
                permissions,
                name,
                ..
            } => {
                let keys = options.client_keys.ok_or_else(|| {
                    SignerError::Pairing(
                        "nostrconnect pairing needs the client keys that produced the URI"
                            .to_string(),
                    )
                })?;
                if keys.public_key() != *client_pubkey {
                    return Err(SignerError::Pairing(format!(
                        "nostrconnect URI is for {}, client keys are {}",
                        client_pubkey,
                        keys.public_key()
                    )));
                }
                (keys, permissions.clone(), name.clone())
            }
        };

        let permissions = options
            .permissions
            .filter(|p| !p.is_empty())
            .or_else(|| (!uri_permissions.is_empty()).then_some(uri_permissions))
            .unwrap_or_else(|| self.config.default_permissions.clone());

        let mut session = Session {
            id: String::new(),
            remote_signer_pubkey: parsed.remote_signer_pubkey(),
            user_pubkey: options.user_pubkey,
            relays: parsed.relays().to_vec(),
            permissions,
            nostr_connect_secret: parsed.secret().map(str::to_string),
            last_error: None,
            client_keys,
            algorithm: options.algorithm.unwrap_or(self.config.algorithm),
            app_name: options
                .app_name
                .or(uri_name)
                .or_else(|| self.config.app_name.clone()),
        };

        {
            let mut sessions = self.write();
            let mut id = new_session_id()?;
            while sessions.contains_key(&id) {
                id = new_session_id()?;
            }
            session.id = id;
            sessions.insert(session.id.clone(), session.clone());
            self.persist(&session);
        }

        info!(
            "[nip46][session] created session {} ({} relays, remote key {})",
            session.id,
            session.relays.len(),
            if session.remote_signer_pubkey.is_some() {
                "known"
            } else {
                "pending"
            }
        );

        Ok(PairedSession {
            session,
            uri: parsed,
        })
    }
}

fn new_session_id() -> Result<String> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| SignerError::Pairing(format!("Failed to generate session id: {e}")))?;
    Ok(hex::encode(bytes))
}
