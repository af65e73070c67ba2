use async_trait::async_trait;
use tracing::info;

use super::{NostrSigner, RelayHandle, RelayPool, SignerPayload, User};
use crate::codec::{self, Algorithm, ConversationContext};
use crate::error::{Result, SignerError};
use crate::types::{Event, Keys, PublicKey};

pub(crate) const PAYLOAD_TYPE: &str = "private-key";

/// Signer holding the user's secret key in process.
pub struct PrivateKeySigner {
    keys: Keys,
}

impl PrivateKeySigner {
    pub fn new(keys: Keys) -> Self {
        info!(
            "[pk] created signer with public key: {}",
            keys.public_key()
        );
        Self { keys }
    }

    /// Accepts a 64-char hex secret key.
    pub fn from_hex(private_key_hex: &str) -> Result<Self> {
        let keys = Keys::parse(private_key_hex)
            .map_err(|e| SignerError::Parse(format!("Invalid private key: {e}")))?;
        Ok(Self::new(keys))
    }

    /// The payload carries the secret key itself; store it accordingly.
    pub fn from_payload(json: &str) -> Result<Self> {
        let payload = SignerPayload::parse(json)?;
        if payload.kind != PAYLOAD_TYPE {
            return Err(SignerError::Parse(format!(
                "expected {PAYLOAD_TYPE} payload, got {}",
                payload.kind
            )));
        }
        Self::from_hex(&payload.payload)
    }

    fn context<'a>(&'a self, peer_hex: &'a str) -> ConversationContext<'a> {
        ConversationContext::new(self.keys.secret_key(), peer_hex)
    }
}

#[async_trait]
impl NostrSigner for PrivateKeySigner {
    fn pubkey(&self) -> Result<PublicKey> {
        Ok(self.keys.public_key())
    }

    async fn user(&self) -> Result<User> {
        Ok(User::new(self.keys.public_key()))
    }

    async fn sign(&self, event: &mut Event) -> Result<String> {
        let signed = Event::sign_with(
            &self.keys,
            event.kind,
            event.content.clone(),
            event.tags.clone(),
            event.created_at,
        )
        .map_err(|e| SignerError::SignatureInvalid(format!("local sign failed: {e}")))?;

        // Same check relays apply
        signed
            .verify()
            .map_err(|e| SignerError::SignatureInvalid(format!("local verify failed: {e}")))?;

        let sig = signed.sig.clone();
        *event = signed;
        Ok(sig)
    }

    async fn encrypt(&self, recipient: &PublicKey, value: &str, scheme: Algorithm) -> Result<String> {
        let peer = recipient.to_hex();
        codec::encrypt(value, &self.context(&peer), scheme)
    }

    async fn decrypt(&self, sender: &PublicKey, value: &str, scheme: Algorithm) -> Result<String> {
        let peer = sender.to_hex();
        codec::decrypt(value, &self.context(&peer), scheme)
    }

    fn relays(&self, _pool: &dyn RelayPool) -> Vec<RelayHandle> {
        Vec::new()
    }

    fn to_payload(&self) -> String {
        SignerPayload {
            kind: PAYLOAD_TYPE.to_string(),
            payload: self.keys.secret_key().to_hex(),
        }
        .to_json()
    }
}
