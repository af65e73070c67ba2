pub mod nostr;

pub use nostr::{Event, EventId, Keys, Kind, PublicKey, SecretKey, Timestamp, NOSTR_CONNECT_KIND};

/// Error types for the types module
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypesError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Other error: {0}")]
    Other(String),
}
