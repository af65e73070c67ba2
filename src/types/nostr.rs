use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use sha2::{Digest, Sha256};
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use std::fmt;

use super::TypesError;

type Result<T> = std::result::Result<T, TypesError>;

pub type Kind = u16;
pub type Timestamp = u64;

/// NIP-46 request/response event kind
pub const NOSTR_CONNECT_KIND: Kind = 24133;

// ============================================================================
// Basic Types - Just byte arrays
// ============================================================================

fn decode_32(s: &str, what: &str) -> Result<[u8; 32]> {
    let bytes =
        hex::decode(s).map_err(|_| TypesError::InvalidFormat(format!("Invalid {what} hex")))?;
    if bytes.len() != 32 {
        return Err(TypesError::InvalidFormat(format!("Invalid {what} length")));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventId(pub [u8; 32]);

impl EventId {
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_32(s, "event id").map(EventId)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.to_hex())
    }
}

/// x-only secp256k1 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_32(s, "pubkey").map(PublicKey)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(pub [u8; 32]);

impl SecretKey {
    pub fn from_hex(s: &str) -> Result<Self> {
        let arr = decode_32(s, "secret key")?;
        // Reject zero / out-of-range scalars up front
        SigningKey::from_bytes(&arr)
            .map_err(|_| TypesError::InvalidFormat("Invalid secret key".to_string()))?;
        Ok(SecretKey(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        let signing_key = SigningKey::from_bytes(&self.0)
            .map_err(|_| TypesError::InvalidFormat("Invalid secret key".to_string()))?;
        Ok(PublicKey(signing_key.verifying_key().to_bytes().into()))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<sensitive>)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keys {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl Keys {
    pub fn new(secret_key: SecretKey) -> Result<Self> {
        let public_key = secret_key.public_key()?;
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Parse a hex encoded secret key.
    pub fn parse(secret_hex: &str) -> Result<Self> {
        if secret_hex.starts_with("nsec1") {
            return Err(TypesError::InvalidFormat(
                "Bech32 nsec parsing not supported".to_string(),
            ));
        }
        Self::new(SecretKey::from_hex(secret_hex.trim())?)
    }

    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut k256::elliptic_curve::rand_core::OsRng);
        let secret_key = SecretKey(signing_key.to_bytes().into());
        let public_key = PublicKey(signing_key.verifying_key().to_bytes().into());
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// BIP-340 signature over a 32-byte event id, hex encoded.
    pub fn sign_id(&self, id: &EventId) -> Result<String> {
        let signing_key = SigningKey::from_bytes(&self.secret_key.0)
            .map_err(|_| TypesError::InvalidFormat("Invalid secret key".to_string()))?;
        let signature: Signature = signing_key
            .sign_prehash(&id.0)
            .map_err(|e| TypesError::Other(format!("Schnorr prehash sign failed: {e}")))?;
        Ok(hex::encode(signature.to_bytes()))
    }
}

macro_rules! hex_serde {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $ty::from_hex(&s).map_err(de::Error::custom)
            }
        }
    };
}

hex_serde!(EventId);
hex_serde!(PublicKey);

// ============================================================================
// Event
// ============================================================================

/// A Nostr event. An unsigned event has an empty id and signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub created_at: Timestamp,
    pub kind: Kind,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Build an unsigned event stamped with the current time.
    pub fn unsigned(kind: Kind, content: impl Into<String>, tags: Vec<Vec<String>>) -> Self {
        Event {
            id: EventId::default(),
            pubkey: PublicKey::default(),
            created_at: timestamp_now(),
            kind,
            tags,
            content: content.into(),
            sig: String::new(),
        }
    }

    /// Build, hash and sign an event with `keys`.
    pub fn sign_with(
        keys: &Keys,
        kind: Kind,
        content: impl Into<String>,
        tags: Vec<Vec<String>>,
        created_at: Timestamp,
    ) -> Result<Self> {
        let mut event = Event {
            id: EventId::default(),
            pubkey: keys.public_key(),
            created_at,
            kind,
            tags,
            content: content.into(),
            sig: String::new(),
        };
        event.id = event.compute_id();
        event.sig = keys.sign_id(&event.id)?;
        Ok(event)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TypesError::InvalidFormat(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Unsigned template as sent in a `sign_event` request.
    pub fn template_json(&self) -> String {
        let mut template = json!({
            "kind": self.kind,
            "content": self.content,
            "tags": self.tags,
            "created_at": self.created_at,
        });
        if !self.pubkey.is_empty() {
            template["pubkey"] = json!(self.pubkey.to_hex());
        }
        template.to_string()
    }

    /// NIP-01 id: sha256 of `[0, pubkey, created_at, kind, tags, content]`.
    pub fn compute_id(&self) -> EventId {
        let serialized = json!([
            0,
            self.pubkey.to_hex(),
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ])
        .to_string();
        let digest = Sha256::digest(serialized.as_bytes());
        EventId(digest.into())
    }

    /// Structural checks plus BIP-340 verification of `sig` over `id`.
    pub fn verify(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(TypesError::MissingField("id".to_string()));
        }
        if self.pubkey.is_empty() {
            return Err(TypesError::MissingField("pubkey".to_string()));
        }
        if self.sig.is_empty() {
            return Err(TypesError::MissingField("sig".to_string()));
        }
        if self.compute_id() != self.id {
            return Err(TypesError::InvalidFormat(
                "Event id does not match content".to_string(),
            ));
        }

        let verifying_key = VerifyingKey::from_bytes(&self.pubkey.0)
            .map_err(|_| TypesError::InvalidFormat("Invalid public key".to_string()))?;
        let signature_bytes = hex::decode(&self.sig)
            .map_err(|_| TypesError::InvalidFormat("Invalid signature hex".to_string()))?;
        let signature = Signature::try_from(signature_bytes.as_slice())
            .map_err(|_| TypesError::InvalidFormat("Invalid signature format".to_string()))?;

        verifying_key
            .verify_prehash(&self.id.0, &signature)
            .map_err(|_| TypesError::InvalidFormat("Signature verification failed".to_string()))
    }

    /// Values of all tags named `name` (second element).
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }
}

pub fn timestamp_now() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
