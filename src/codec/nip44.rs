// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license
// Adapted for project dependencies while maintaining NIP44 v2 compliance

//! NIP44 (v2) - Encrypted Payloads
//!
//! <https://github.com/nostr-protocol/nips/blob/master/44.md>

use std::fmt;
use std::ops::Range;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use getrandom::getrandom;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::{PublicKey, SecretKey};

// Constants as per NIP44 specification
const VERSION: u8 = 2;
const MESSAGE_KEYS_SIZE: usize = 76;
const CHACHA_KEY_SIZE: usize = 32;
const CHACHA_NONCE_SIZE: usize = 12;
const CHACHA_KEY_RANGE: Range<usize> = 0..CHACHA_KEY_SIZE;
const CHACHA_NONCE_RANGE: Range<usize> = CHACHA_KEY_SIZE..CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE;
const HMAC_KEY_RANGE: Range<usize> = CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE..MESSAGE_KEYS_SIZE;

const MIN_PLAINTEXT_SIZE: usize = 1;
const MAX_PLAINTEXT_SIZE: usize = 65535;

/// NIP44 v2 errors
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Nip44Error {
    #[error("error while decoding UTF-8")]
    Utf8Decode,
    #[error("invalid length for HKDF")]
    HkdfLength,
    #[error("message empty")]
    MessageEmpty,
    #[error("message too long")]
    MessageTooLong,
    #[error("invalid HMAC")]
    InvalidHmac,
    #[error("invalid padding")]
    InvalidPadding,
    #[error("invalid payload")]
    InvalidPayload,
    #[error("unknown version: {0}")]
    UnknownVersion(u8),
    #[error("decoding error: {0}")]
    DecodingError(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("random generation failed")]
    RandomGenerationFailed,
}

/// Message keys derived from conversation key and nonce
struct MessageKeys {
    chacha_key: [u8; 32],
    chacha_nonce: [u8; 12],
    hmac_key: [u8; 32],
}

impl MessageKeys {
    /// Derive message keys from conversation key and nonce using HKDF-expand
    fn derive(conversation_key: &ConversationKey, nonce: &[u8; 32]) -> Result<Self, Nip44Error> {
        let hk = Hkdf::<Sha256>::from_prk(conversation_key.as_bytes())
            .map_err(|_| Nip44Error::HkdfLength)?;

        let mut okm = [0u8; MESSAGE_KEYS_SIZE];
        hk.expand(nonce, &mut okm)
            .map_err(|_| Nip44Error::HkdfLength)?;

        let mut chacha_key = [0u8; 32];
        let mut chacha_nonce = [0u8; 12];
        let mut hmac_key = [0u8; 32];

        chacha_key.copy_from_slice(&okm[CHACHA_KEY_RANGE]);
        chacha_nonce.copy_from_slice(&okm[CHACHA_NONCE_RANGE]);
        hmac_key.copy_from_slice(&okm[HMAC_KEY_RANGE]);

        Ok(MessageKeys {
            chacha_key,
            chacha_nonce,
            hmac_key,
        })
    }
}

/// NIP44 v2 Conversation Key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey([u8; 32]);

impl fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conversation key: <sensitive>")
    }
}

impl ConversationKey {
    /// Construct conversation key from 32-byte array
    #[inline]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive conversation key from secret key and public key
    pub fn derive(secret_key: &SecretKey, public_key: &PublicKey) -> Result<Self, Nip44Error> {
        let shared_x = ecdh_shared_x(secret_key, public_key)?;

        // HKDF-extract with salt="nip44-v2" and IKM=shared_x
        let (prk, _) = Hkdf::<Sha256>::extract(Some(b"nip44-v2"), &shared_x);

        let mut conversation_key = [0u8; 32];
        conversation_key.copy_from_slice(&prk);

        Ok(Self(conversation_key))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// ECDH over secp256k1 returning the unhashed shared x-coordinate.
///
/// Nostr keys are x-only, so the even-y point is used; the shared x is the
/// same for either parity.
pub(crate) fn ecdh_shared_x(
    secret_key: &SecretKey,
    public_key: &PublicKey,
) -> Result<[u8; 32], Nip44Error> {
    use k256::{ecdh::diffie_hellman, PublicKey as K256PublicKey, SecretKey as K256SecretKey};

    let k256_secret = K256SecretKey::from_slice(&secret_key.0)
        .map_err(|e| Nip44Error::InvalidKey(format!("secret key: {e}")))?;

    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(&public_key.0);
    let k256_public = K256PublicKey::from_sec1_bytes(&compressed)
        .map_err(|e| Nip44Error::InvalidKey(format!("public key: {e}")))?;

    let shared_secret = diffie_hellman(k256_secret.to_nonzero_scalar(), k256_public.as_affine());

    let mut result = [0u8; 32];
    result.copy_from_slice(shared_secret.raw_secret_bytes());
    Ok(result)
}

/// Calculate padded length according to NIP44 specification
fn calc_padded_len(unpadded_len: usize) -> usize {
    if unpadded_len <= 32 {
        return 32;
    }

    let next_power = 1 << ((unpadded_len - 1).ilog2() + 1);
    let chunk = if next_power <= 256 {
        32
    } else {
        next_power / 8
    };

    chunk * ((unpadded_len - 1) / chunk + 1)
}

fn pad(plaintext: &[u8]) -> Result<Vec<u8>, Nip44Error> {
    let len = plaintext.len();

    if len < MIN_PLAINTEXT_SIZE {
        return Err(Nip44Error::MessageEmpty);
    }

    if len > MAX_PLAINTEXT_SIZE {
        return Err(Nip44Error::MessageTooLong);
    }

    let padded_len = calc_padded_len(len);
    let mut padded = Vec::with_capacity(2 + padded_len);

    // Length prefix (big-endian u16), plaintext, zero padding
    padded.extend_from_slice(&(len as u16).to_be_bytes());
    padded.extend_from_slice(plaintext);
    padded.resize(2 + padded_len, 0);

    Ok(padded)
}

fn unpad(padded: &[u8]) -> Result<Vec<u8>, Nip44Error> {
    if padded.len() < 2 {
        return Err(Nip44Error::InvalidPadding);
    }

    let unpadded_len = u16::from_be_bytes([padded[0], padded[1]]) as usize;

    if unpadded_len == 0 {
        return Err(Nip44Error::MessageEmpty);
    }

    if padded.len() < 2 + unpadded_len || padded.len() != 2 + calc_padded_len(unpadded_len) {
        return Err(Nip44Error::InvalidPadding);
    }

    Ok(padded[2..2 + unpadded_len].to_vec())
}

/// Encrypt with NIP44 (v2)
///
/// **The result is NOT encoded in base64!**
pub fn encrypt_to_bytes(
    conversation_key: &ConversationKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, Nip44Error> {
    let mut nonce = [0u8; 32];
    getrandom(&mut nonce).map_err(|_| Nip44Error::RandomGenerationFailed)?;
    encrypt_to_bytes_with_nonce(conversation_key, plaintext, &nonce)
}

fn encrypt_to_bytes_with_nonce(
    conversation_key: &ConversationKey,
    plaintext: &[u8],
    nonce: &[u8; 32],
) -> Result<Vec<u8>, Nip44Error> {
    let padded = pad(plaintext)?;
    let keys = MessageKeys::derive(conversation_key, nonce)?;

    let mut ciphertext = padded;
    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut ciphertext);

    // HMAC over nonce || ciphertext
    let mut mac = Hmac::<Sha256>::new_from_slice(&keys.hmac_key)
        .map_err(|_| Nip44Error::HkdfLength)?;
    mac.update(nonce);
    mac.update(&ciphertext);
    let mac_bytes = mac.finalize().into_bytes();

    // version || nonce || ciphertext || mac
    let mut payload = Vec::with_capacity(1 + 32 + ciphertext.len() + 32);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&ciphertext);
    payload.extend_from_slice(&mac_bytes);

    Ok(payload)
}

/// Decrypt with NIP44 (v2)
///
/// **The payload MUST be already decoded from base64**
pub fn decrypt_to_bytes(
    conversation_key: &ConversationKey,
    payload: &[u8],
) -> Result<Vec<u8>, Nip44Error> {
    let len = payload.len();
    if !(99..=65603).contains(&len) {
        return Err(Nip44Error::InvalidPayload);
    }

    let version = payload[0];
    if version != VERSION {
        return Err(Nip44Error::UnknownVersion(version));
    }

    let mut nonce = [0u8; 32];
    nonce.copy_from_slice(&payload[1..33]);
    let ciphertext = &payload[33..len - 32];
    let mac = &payload[len - 32..];

    let keys = MessageKeys::derive(conversation_key, &nonce)?;

    let mut mac_verifier = Hmac::<Sha256>::new_from_slice(&keys.hmac_key)
        .map_err(|_| Nip44Error::HkdfLength)?;
    mac_verifier.update(&nonce);
    mac_verifier.update(ciphertext);

    // Constant-time comparison
    mac_verifier
        .verify_slice(mac)
        .map_err(|_| Nip44Error::InvalidHmac)?;

    let mut plaintext_padded = ciphertext.to_vec();
    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut plaintext_padded);

    unpad(&plaintext_padded)
}

/// Encrypt a string and return base64
pub fn encrypt(plaintext: &str, conversation_key: &ConversationKey) -> Result<String, Nip44Error> {
    let encrypted = encrypt_to_bytes(conversation_key, plaintext.as_bytes())?;
    Ok(BASE64.encode(encrypted))
}

/// Decrypt from a base64 string
pub fn decrypt(payload: &str, conversation_key: &ConversationKey) -> Result<String, Nip44Error> {
    // Future-proof flag
    if payload.starts_with('#') {
        return Err(Nip44Error::UnknownVersion(0));
    }

    let plen = payload.len();
    if !(132..=87472).contains(&plen) {
        return Err(Nip44Error::InvalidPayload);
    }

    let data = BASE64
        .decode(payload)
        .map_err(|e| Nip44Error::DecodingError(e.to_string()))?;

    let plaintext_bytes = decrypt_to_bytes(conversation_key, &data)?;
    String::from_utf8(plaintext_bytes).map_err(|_| Nip44Error::Utf8Decode)
}
