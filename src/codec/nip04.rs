//! NIP-04: Encrypted Direct Message implementation
//!
//! AES-256-CBC keyed by the raw ECDH x coordinate, encoded as
//! `base64(ciphertext)?iv=base64(iv)`.
//!
//! Note: NIP-04 is deprecated in favor of NIP-44; it is kept for remote
//! signers that only speak the legacy scheme.

use aes::Aes256;
use base64::engine::{general_purpose, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use getrandom::getrandom;

use super::nip44::ecdh_shared_x;
use crate::types::{PublicKey, SecretKey};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// NIP-04 specific errors
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Nip04Error {
    #[error("Invalid content format")]
    InvalidContentFormat,

    #[error("Base64 decode error")]
    Base64Decode,

    #[error("UTF-8 decoding error")]
    Utf8Decode,

    #[error("Wrong block mode")]
    WrongBlockMode,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Random generation failed")]
    RandomGenerationFailed,
}

fn shared_key(secret_key: &SecretKey, public_key: &PublicKey) -> Result<[u8; 32], Nip04Error> {
    // NIP-04 uses the x coordinate of the shared point WITHOUT hashing
    ecdh_shared_x(secret_key, public_key).map_err(|e| Nip04Error::InvalidKey(e.to_string()))
}

fn generate_iv() -> Result<[u8; 16], Nip04Error> {
    let mut iv = [0u8; 16];
    getrandom(&mut iv).map_err(|_| Nip04Error::RandomGenerationFailed)?;
    Ok(iv)
}

/// Encrypt a message using NIP-04
pub fn encrypt(
    secret_key: &SecretKey,
    public_key: &PublicKey,
    content: &str,
) -> Result<String, Nip04Error> {
    encrypt_with_iv(secret_key, public_key, content, generate_iv()?)
}

/// Encrypt with a caller-supplied IV
pub fn encrypt_with_iv(
    secret_key: &SecretKey,
    public_key: &PublicKey,
    content: &str,
    iv: [u8; 16],
) -> Result<String, Nip04Error> {
    let key = shared_key(secret_key, public_key)?;
    let cipher = Aes256CbcEnc::new(&key.into(), &iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(content.as_bytes());

    Ok(format!(
        "{}?iv={}",
        general_purpose::STANDARD.encode(ciphertext),
        general_purpose::STANDARD.encode(iv)
    ))
}

/// Decrypt a message using NIP-04
pub fn decrypt(
    secret_key: &SecretKey,
    public_key: &PublicKey,
    encrypted_content: &str,
) -> Result<String, Nip04Error> {
    let bytes = decrypt_to_bytes(secret_key, public_key, encrypted_content)?;
    String::from_utf8(bytes).map_err(|_| Nip04Error::Utf8Decode)
}

/// Decrypt to raw bytes
pub fn decrypt_to_bytes(
    secret_key: &SecretKey,
    public_key: &PublicKey,
    encrypted_content: &str,
) -> Result<Vec<u8>, Nip04Error> {
    let (content, iv) = encrypted_content
        .split_once("?iv=")
        .ok_or(Nip04Error::InvalidContentFormat)?;

    let mut encrypted = general_purpose::STANDARD
        .decode(content)
        .map_err(|_| Nip04Error::Base64Decode)?;
    let iv = general_purpose::STANDARD
        .decode(iv)
        .map_err(|_| Nip04Error::Base64Decode)?;
    let iv: [u8; 16] = iv
        .as_slice()
        .try_into()
        .map_err(|_| Nip04Error::InvalidContentFormat)?;

    let key = shared_key(secret_key, public_key)?;
    let cipher = Aes256CbcDec::new(&key.into(), &iv.into());

    let decrypted = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&mut encrypted)
        .map_err(|_| Nip04Error::WrongBlockMode)?;

    Ok(decrypted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Keys;

    #[test]
    fn test_both_sides_share_key() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let ct = encrypt(alice.secret_key(), &bob.public_key(), "hi bob").unwrap();
        assert!(ct.contains("?iv="));
        let pt = decrypt(bob.secret_key(), &alice.public_key(), &ct).unwrap();
        assert_eq!(pt, "hi bob");
    }

    #[test]
    fn test_malformed_content() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        assert_eq!(
            decrypt(alice.secret_key(), &bob.public_key(), "no-iv-here"),
            Err(Nip04Error::InvalidContentFormat)
        );
        assert_eq!(
            decrypt(alice.secret_key(), &bob.public_key(), "!!!?iv=AAAA"),
            Err(Nip04Error::Base64Decode)
        );
        // IV of the wrong size
        assert_eq!(
            decrypt(alice.secret_key(), &bob.public_key(), "AAAAAAAAAAAAAAAAAAAAAA==?iv=AAAA"),
            Err(Nip04Error::InvalidContentFormat)
        );
    }
}
