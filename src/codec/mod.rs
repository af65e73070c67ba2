//! Payload codec for NIP-46 traffic.
//!
//! Stateless: conversation-key derivation, payload encryption under the
//! session's algorithm, and the JSON-RPC request/response envelopes.

pub mod nip04;
pub mod nip44;
mod request;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SignerError};
use crate::types::{PublicKey, SecretKey};
pub use nip44::ConversationKey;
pub use request::{
    next_request_id, ConnectParams, Method, Nip46Request, Nip46Response, ResponseOutcome,
};

/// Payload encryption algorithm. Fixed per session; the remote signer has
/// no way to tell which one a message used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// NIP-44 v2, authenticated, keyed by the derived conversation key
    #[default]
    Nip44,
    /// NIP-04, AES-CBC keyed directly by the ECDH secret
    Nip04,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Nip44 => "nip44",
            Algorithm::Nip04 => "nip04",
        }
    }
}

/// Local secret key plus the hex public key of the other party.
#[derive(Clone, Copy, Debug)]
pub struct ConversationContext<'a> {
    pub secret_key: &'a SecretKey,
    pub remote_pubkey: &'a str,
}

impl<'a> ConversationContext<'a> {
    pub fn new(secret_key: &'a SecretKey, remote_pubkey: &'a str) -> Self {
        Self {
            secret_key,
            remote_pubkey,
        }
    }
}

/// Parse a hex public key in x-only (64 chars) or compressed (66 chars,
/// `02`/`03` prefix) form into the 32-byte x-only key.
pub fn normalize_pubkey(pubkey_hex: &str) -> Result<PublicKey> {
    let bytes = hex::decode(pubkey_hex)
        .map_err(|_| SignerError::Encode(format!("public key is not hex: {pubkey_hex}")))?;

    let x_only = match bytes.len() {
        32 => &bytes[..],
        33 => match bytes[0] {
            0x02 | 0x03 => &bytes[1..],
            prefix => {
                return Err(SignerError::Encode(format!(
                    "unsupported public key prefix: {prefix:02x}"
                )))
            }
        },
        n => {
            return Err(SignerError::Encode(format!(
                "invalid public key length: {n} bytes"
            )))
        }
    };

    let mut arr = [0u8; 32];
    arr.copy_from_slice(x_only);
    Ok(PublicKey(arr))
}

/// Derive the NIP-44 conversation key for `ctx`.
pub fn derive_conversation_key(ctx: &ConversationContext<'_>) -> Result<ConversationKey> {
    let remote = normalize_pubkey(ctx.remote_pubkey)?;
    ConversationKey::derive(ctx.secret_key, &remote)
        .map_err(|e| SignerError::Encode(format!("nip44 derive: {e}")))
}

/// Encrypt `plaintext` for the peer in `ctx`.
///
/// NIP-44 payloads must be 1..=65535 bytes, so an empty `plaintext` is an
/// [`SignerError::Encode`] under [`Algorithm::Nip44`]. NIP-04 accepts it.
pub fn encrypt(plaintext: &str, ctx: &ConversationContext<'_>, algorithm: Algorithm) -> Result<String> {
    match algorithm {
        Algorithm::Nip44 => {
            let conv = derive_conversation_key(ctx)?;
            nip44::encrypt(plaintext, &conv)
                .map_err(|e| SignerError::Encode(format!("nip44 encrypt: {e}")))
        }
        Algorithm::Nip04 => {
            let remote = normalize_pubkey(ctx.remote_pubkey)?;
            nip04::encrypt(ctx.secret_key, &remote, plaintext)
                .map_err(|e| SignerError::Encode(format!("nip04 encrypt: {e}")))
        }
    }
}

pub fn decrypt(ciphertext: &str, ctx: &ConversationContext<'_>, algorithm: Algorithm) -> Result<String> {
    let remote = normalize_pubkey(ctx.remote_pubkey)
        .map_err(|e| SignerError::Decode(e.to_string()))?;
    let result = match algorithm {
        Algorithm::Nip44 => ConversationKey::derive(ctx.secret_key, &remote)
            .map_err(|e| e.to_string())
            .and_then(|conv| nip44::decrypt(ciphertext, &conv).map_err(|e| e.to_string())),
        Algorithm::Nip04 => {
            nip04::decrypt(ctx.secret_key, &remote, ciphertext).map_err(|e| e.to_string())
        }
    };
    result.map_err(|e| {
        debug!("[nip46][codec] {} decrypt failed: {}", algorithm.as_str(), e);
        SignerError::Decode(format!("{} decrypt: {e}", algorithm.as_str()))
    })
}
