use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use tracing::{debug, warn};

use super::{NostrSigner, RelayHandle, RelayPool, SignerPayload, User};
use crate::codec::{Algorithm, Method};
use crate::error::{Result, SignerError};
use crate::service::SigningService;
use crate::session::Session;
use crate::types::{Event, PublicKey};

pub(crate) const PAYLOAD_TYPE: &str = "nip46";

/// Signer that delegates every operation to a NIP-46 remote signer through
/// one session of a [`SigningService`].
pub struct RemoteSigner {
    service: SigningService,
    session_id: String,
    user: Mutex<Option<User>>,
}

impl RemoteSigner {
    pub fn new(service: SigningService, session_id: impl Into<String>) -> Self {
        Self {
            service,
            session_id: session_id.into(),
            user: Mutex::new(None),
        }
    }

    /// Restore from `to_payload` output. The session must be known to the
    /// service's session manager.
    pub fn from_payload(service: SigningService, json: &str) -> Result<Self> {
        let payload = SignerPayload::parse(json)?;
        if payload.kind != PAYLOAD_TYPE {
            return Err(SignerError::Parse(format!(
                "expected {PAYLOAD_TYPE} payload, got {}",
                payload.kind
            )));
        }
        if service.sessions().get_session(&payload.payload).is_none() {
            return Err(SignerError::Session(payload.payload));
        }
        Ok(Self::new(service, payload.payload))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn session(&self) -> Result<Session> {
        self.service
            .sessions()
            .get_session(&self.session_id)
            .ok_or_else(|| SignerError::Session(self.session_id.clone()))
    }

    async fn call(&self, method: Method, params: Vec<String>) -> Result<String> {
        self.service
            .send_request(&self.session_id, method, params, None)
            .await?
            .into_result()
    }
}

#[async_trait]
impl NostrSigner for RemoteSigner {
    fn pubkey(&self) -> Result<PublicKey> {
        self.session()?.user_pubkey.ok_or_else(|| {
            SignerError::NotReady(format!(
                "session {} has no user public key yet",
                self.session_id
            ))
        })
    }

    async fn user(&self) -> Result<User> {
        if let Some(user) = *self.user.lock().unwrap_or_else(|e| e.into_inner()) {
            return Ok(user);
        }
        let user = User::new(self.pubkey()?);
        *self.user.lock().unwrap_or_else(|e| e.into_inner()) = Some(user);
        Ok(user)
    }

    /// Nothing is retried here. Retrying after a timeout can produce two
    /// signatures for the same template if the first request was only slow.
    async fn sign(&self, event: &mut Event) -> Result<String> {
        let expected = self.pubkey()?;
        let result = self
            .call(Method::SignEvent, vec![event.template_json()])
            .await?;

        let value: Value = serde_json::from_str(&result)
            .map_err(|e| SignerError::Parse(format!("sign_event result: {e}")))?;
        let signed: Event = serde_json::from_value(value)
            .map_err(|e| SignerError::SignatureInvalid(format!("malformed signed event: {e}")))?;
        signed
            .verify()
            .map_err(|e| SignerError::SignatureInvalid(e.to_string()))?;

        if signed.pubkey != expected {
            warn!(
                "[nip46][signer] remote signer signed as {} instead of {}",
                signed.pubkey, expected
            );
            return Err(SignerError::IdentityMismatch {
                expected: expected.to_hex(),
                actual: signed.pubkey.to_hex(),
            });
        }

        debug!("[nip46][signer] signed event {}", signed.id.to_hex());
        event.id = signed.id;
        event.pubkey = signed.pubkey;
        event.created_at = signed.created_at;
        event.tags = signed.tags;
        event.content = signed.content;
        event.sig = signed.sig.clone();
        Ok(signed.sig)
    }

    async fn encrypt(&self, recipient: &PublicKey, value: &str, scheme: Algorithm) -> Result<String> {
        let method = match scheme {
            Algorithm::Nip44 => Method::Nip44Encrypt,
            Algorithm::Nip04 => Method::Nip04Encrypt,
        };
        let result = self
            .call(method, vec![recipient.to_hex(), value.to_string()])
            .await?;
        if result.is_empty() {
            return Err(SignerError::Protocol(format!("{method} returned nothing")));
        }
        Ok(result)
    }

    async fn decrypt(&self, sender: &PublicKey, value: &str, scheme: Algorithm) -> Result<String> {
        let method = match scheme {
            Algorithm::Nip44 => Method::Nip44Decrypt,
            Algorithm::Nip04 => Method::Nip04Decrypt,
        };
        let result = self
            .call(method, vec![sender.to_hex(), value.to_string()])
            .await?;
        if result.is_empty() {
            return Err(SignerError::Protocol(format!("{method} returned nothing")));
        }
        Ok(result)
    }

    fn relays(&self, pool: &dyn RelayPool) -> Vec<RelayHandle> {
        match self.session() {
            Ok(session) => session
                .relays
                .iter()
                .filter_map(|url| pool.relay(url))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn to_payload(&self) -> String {
        SignerPayload {
            kind: PAYLOAD_TYPE.to_string(),
            payload: self.session_id.clone(),
        }
        .to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Nip46Config;
    use crate::session::PairingOptions;
    use crate::signers::{PrivateKeySigner, StaticRelayPool};
    use crate::test_support::{MockRemoteSigner, MockTransport, Responder};
    use crate::types::Keys;
    use serde_json::json;
    use std::sync::Arc;

    async fn ready_signer(
        bunker: &Arc<MockRemoteSigner>,
        transport: Arc<MockTransport>,
    ) -> RemoteSigner {
        let service = SigningService::new(Nip46Config::default(), transport);
        let paired = service
            .pair_with_uri(
                &bunker.bunker_uri(Some("pairing")),
                PairingOptions {
                    permissions: Some(vec!["sign_event".into(), "get_public_key".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        paired.handshake.unwrap().await.unwrap();
        RemoteSigner::new(service, paired.session.id)
    }

    /// Honest for everything except `sign_event`, which `sign` answers.
    fn with_sign_handler<F>(bunker: &Arc<MockRemoteSigner>, sign: F) -> Responder
    where
        F: Fn(&crate::codec::Nip46Request) -> Value + Send + Sync + 'static,
    {
        let honest = bunker.clone();
        bunker.scripted(move |request| {
            if request.method == "sign_event" {
                return Some(sign(request));
            }
            let result = honest.handle(request).unwrap();
            Some(json!({ "id": request.id, "result": result }))
        })
    }

    fn draft() -> Event {
        Event::unsigned(1, "hello from the client", vec![vec!["t".into(), "nip46".into()]])
    }

    #[tokio::test]
    async fn test_sign_copies_signed_fields() {
        let bunker = MockRemoteSigner::new();
        let signer = ready_signer(&bunker, MockTransport::with_responder(bunker.honest())).await;

        let user = signer.block_until_ready().await.unwrap();
        assert_eq!(user.pubkey, bunker.user_keys.public_key());
        assert_eq!(signer.user().await.unwrap(), user);

        let mut event = draft();
        let sig = signer.sign(&mut event).await.unwrap();
        assert_eq!(event.sig, sig);
        assert_eq!(event.pubkey, bunker.user_keys.public_key());
        assert_eq!(event.content, "hello from the client");
        event.verify().unwrap();
    }

    #[tokio::test]
    async fn test_identity_mismatch_leaves_event_untouched() {
        let bunker = MockRemoteSigner::new();
        let impostor = Keys::generate();
        let responder = with_sign_handler(&bunker, move |request| {
            let forged = Event::sign_with(&impostor, 1, "hello from the client", vec![], 1).unwrap();
            json!({ "id": request.id, "result": forged.to_json() })
        });
        let signer = ready_signer(&bunker, MockTransport::with_responder(responder)).await;

        let mut event = draft();
        let before = event.clone();
        assert!(matches!(
            signer.sign(&mut event).await,
            Err(SignerError::IdentityMismatch { .. })
        ));
        assert_eq!(event, before);
    }

    #[tokio::test]
    async fn test_tampered_signature_rejected() {
        let bunker = MockRemoteSigner::new();
        let user_keys = bunker.user_keys.clone();
        let responder = with_sign_handler(&bunker, move |request| {
            let mut signed = Event::sign_with(&user_keys, 1, "hello", vec![], 1).unwrap();
            signed.content = "changed after signing".into();
            json!({ "id": request.id, "result": signed.to_json() })
        });
        let signer = ready_signer(&bunker, MockTransport::with_responder(responder)).await;

        let mut event = draft();
        let before = event.clone();
        assert!(matches!(
            signer.sign(&mut event).await,
            Err(SignerError::SignatureInvalid(_))
        ));
        assert_eq!(event, before);
    }

    #[tokio::test]
    async fn test_sign_error_kinds() {
        let bunker = MockRemoteSigner::new();
        let responder = with_sign_handler(&bunker, |request| {
            if request.params[0].contains("reject") {
                json!({ "id": request.id, "error": "user said no" })
            } else {
                json!({ "id": request.id, "result": "{not json" })
            }
        });
        let signer = ready_signer(&bunker, MockTransport::with_responder(responder)).await;

        let mut rejected = Event::unsigned(1, "reject me", vec![]);
        assert_eq!(
            signer.sign(&mut rejected).await,
            Err(SignerError::Protocol("user said no".into()))
        );
        let mut garbled = draft();
        assert!(matches!(
            signer.sign(&mut garbled).await,
            Err(SignerError::Parse(_))
        ));
        assert!(garbled.sig.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_timeout_leaves_event_untouched() {
        let bunker = MockRemoteSigner::new();
        let honest = bunker.clone();
        let responder = bunker.scripted(move |request| {
            // the remote signer never answers sign_event
            (request.method != "sign_event").then(|| {
                json!({ "id": request.id, "result": honest.handle(request).unwrap() })
            })
        });
        let signer = ready_signer(&bunker, MockTransport::with_responder(responder)).await;

        let mut event = draft();
        let before = event.clone();
        assert!(matches!(
            signer.sign(&mut event).await,
            Err(SignerError::Timeout { timeout_ms: 20_000, .. })
        ));
        assert_eq!(event, before);
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_through_remote() {
        let bunker = MockRemoteSigner::new();
        let signer = ready_signer(&bunker, MockTransport::with_responder(bunker.honest())).await;
        let me = signer.pubkey().unwrap();
        let local_user = PrivateKeySigner::new(bunker.user_keys.clone());

        for scheme in [Algorithm::Nip44, Algorithm::Nip04] {
            let cipher = signer.encrypt(&me, "remote secret", scheme).await.unwrap();
            assert_eq!(
                local_user.decrypt(&me, &cipher, scheme).await.unwrap(),
                "remote secret"
            );
            assert_eq!(
                signer.decrypt(&me, &cipher, scheme).await.unwrap(),
                "remote secret"
            );
        }
    }

    #[tokio::test]
    async fn test_empty_encrypt_result_is_protocol_error() {
        let bunker = MockRemoteSigner::new();
        let honest = bunker.clone();
        let responder = bunker.scripted(move |request| {
            let result = match request.method.as_str() {
                "nip44_encrypt" => String::new(),
                _ => honest.handle(request).unwrap(),
            };
            Some(json!({ "id": request.id, "result": result }))
        });
        let signer = ready_signer(&bunker, MockTransport::with_responder(responder)).await;
        let me = signer.pubkey().unwrap();
        assert!(matches!(
            signer.encrypt(&me, "x", Algorithm::Nip44).await,
            Err(SignerError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_not_ready_without_user_pubkey() {
        let bunker = MockRemoteSigner::new();
        let service = SigningService::new(Nip46Config::default(), MockTransport::new());
        let session = service
            .sessions()
            .create_session_from_uri(&bunker.bunker_uri(None), PairingOptions::default())
            .unwrap()
            .session;
        let signer = RemoteSigner::new(service, session.id);

        assert!(matches!(signer.pubkey(), Err(SignerError::NotReady(_))));
        assert!(matches!(signer.user().await, Err(SignerError::NotReady(_))));
        assert!(matches!(
            signer.block_until_ready().await,
            Err(SignerError::NotReady(_))
        ));
        let mut event = draft();
        assert!(matches!(
            signer.sign(&mut event).await,
            Err(SignerError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_relays_and_payload() {
        let bunker = MockRemoteSigner::new();
        let signer = ready_signer(&bunker, MockTransport::with_responder(bunker.honest())).await;

        let pool = StaticRelayPool::new(["wss://relay.example.com/", "wss://elsewhere.example/"]);
        let relays = signer.relays(&pool);
        assert_eq!(
            relays,
            vec![RelayHandle {
                url: "wss://relay.example.com/".into()
            }]
        );
        assert!(signer.relays(&StaticRelayPool::default()).is_empty());

        let payload = signer.to_payload();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value, json!({ "type": "nip46", "payload": signer.session_id() }));

        let restored = RemoteSigner::from_payload(signer.service.clone(), &payload).unwrap();
        assert_eq!(restored.pubkey().unwrap(), signer.pubkey().unwrap());
        assert!(matches!(
            RemoteSigner::from_payload(
                signer.service.clone(),
                r#"{"type":"nip46","payload":"missing"}"#
            ),
            Err(SignerError::Session(_))
        ));
    }
}
