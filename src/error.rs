/// Error types surfaced by every layer of the NIP-46 client.
///
/// All variants are call-scoped except `Shutdown`, which the request queue
/// broadcasts to every request pending at teardown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("Pairing error: {0}")]
    Pairing(String),

    #[error("Unknown session: {0}")]
    Session(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Remote signer error: {0}")]
    Protocol(String),

    #[error("Request {id} timed out after {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },

    #[error("Request queue was shut down")]
    Shutdown,

    #[error("Remote signer answered as {actual}, expected {expected}")]
    IdentityMismatch { expected: String, actual: String },

    #[error("Invalid signed event: {0}")]
    SignatureInvalid(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Session not ready: {0}")]
    NotReady(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session store error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for SignerError {
    fn from(e: serde_json::Error) -> Self {
        SignerError::Parse(e.to_string())
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, SignerError>;

impl From<crate::types::TypesError> for SignerError {
    fn from(e: crate::types::TypesError) -> Self {
        SignerError::Parse(e.to_string())
    }
}

impl From<crate::codec::nip44::Nip44Error> for SignerError {
    fn from(e: crate::codec::nip44::Nip44Error) -> Self {
        SignerError::Decode(format!("nip44: {e}"))
    }
}

impl From<crate::codec::nip04::Nip04Error> for SignerError {
    fn from(e: crate::codec::nip04::Nip04Error) -> Self {
        SignerError::Decode(format!("nip04: {e}"))
    }
}
