//! Signer capability set shared by the remote (NIP-46) and local key signers.

pub mod pk;
pub mod remote;

pub use pk::PrivateKeySigner;
pub use remote::RemoteSigner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::codec::Algorithm;
use crate::error::{Result, SignerError};
use crate::service::SigningService;
use crate::types::{Event, PublicKey};

/// Identity handle of whoever a signer signs as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct User {
    pub pubkey: PublicKey,
}

impl User {
    pub fn new(pubkey: PublicKey) -> Self {
        Self { pubkey }
    }
}

/// Handle to a relay the application's connection pool knows about.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RelayHandle {
    pub url: String,
}

/// Lookup into the application's relay connection pool.
pub trait RelayPool: Send + Sync {
    fn relay(&self, url: &str) -> Option<RelayHandle>;
}

/// Pool backed by a fixed set of URLs.
#[derive(Clone, Debug, Default)]
pub struct StaticRelayPool {
    urls: BTreeSet<String>,
}

impl StaticRelayPool {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add(&mut self, url: impl Into<String>) {
        self.urls.insert(url.into());
    }
}

impl RelayPool for StaticRelayPool {
    fn relay(&self, url: &str) -> Option<RelayHandle> {
        self.urls.get(url).map(|url| RelayHandle { url: url.clone() })
    }
}

#[async_trait]
pub trait NostrSigner: Send + Sync {
    /// Public key the signer signs as, if already known.
    fn pubkey(&self) -> Result<PublicKey>;

    async fn user(&self) -> Result<User>;

    async fn block_until_ready(&self) -> Result<User> {
        self.user().await
    }

    /// Sign `event` in place and return the signature. `event` is left
    /// untouched on error.
    async fn sign(&self, event: &mut Event) -> Result<String>;

    async fn encrypt(&self, recipient: &PublicKey, value: &str, scheme: Algorithm) -> Result<String>;

    async fn decrypt(&self, sender: &PublicKey, value: &str, scheme: Algorithm) -> Result<String>;

    fn relays(&self, pool: &dyn RelayPool) -> Vec<RelayHandle>;

    /// JSON `{"type": ..., "payload": ...}` that `signer_from_payload` restores.
    fn to_payload(&self) -> String;
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SignerPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: String,
}

impl SignerPayload {
    pub(crate) fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SignerError::Parse(format!("signer payload: {e}")))
    }

    pub(crate) fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Rebuild the signer described by a `to_payload` string.
pub fn signer_from_payload(json: &str, service: &SigningService) -> Result<Arc<dyn NostrSigner>> {
    let payload = SignerPayload::parse(json)?;
    match payload.kind.as_str() {
        remote::PAYLOAD_TYPE => Ok(Arc::new(RemoteSigner::from_payload(service.clone(), json)?)),
        pk::PAYLOAD_TYPE => Ok(Arc::new(PrivateKeySigner::from_payload(json)?)),
        other => Err(SignerError::Parse(format!("unknown signer type {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Nip46Config;
    use crate::test_support::MockTransport;
    use crate::types::Keys;

    #[test]
    fn test_static_pool_lookup() {
        let mut pool = StaticRelayPool::new(["wss://a.example/"]);
        pool.add("wss://b.example/");
        assert!(pool.relay("wss://a.example/").is_some());
        assert!(pool.relay("wss://b.example/").is_some());
        assert!(pool.relay("wss://c.example/").is_none());
    }

    #[tokio::test]
    async fn test_restore_from_payload() {
        let service = SigningService::new(Nip46Config::default(), MockTransport::new());
        let local = PrivateKeySigner::new(Keys::generate());
        let restored = signer_from_payload(&local.to_payload(), &service).unwrap();
        assert_eq!(restored.pubkey().unwrap(), local.pubkey().unwrap());

        assert!(matches!(
            signer_from_payload(r#"{"type":"hardware","payload":"x"}"#, &service),
            Err(SignerError::Parse(_))
        ));
        assert!(matches!(
            signer_from_payload("nope", &service),
            Err(SignerError::Parse(_))
        ));
    }
}
