//! Client side of NIP-46 ("Nostr Connect") remote signing.
//!
//! Layers, leaves first: [`codec`] (payload encryption and JSON-RPC
//! envelopes), [`session`] (pairing state), [`transport`] (the relay bus
//! seam), [`queue`] (request/response correlation), [`service`] (method
//! dispatch and the `connect` handshake) and [`signers`] (the signer facade
//! application code talks to).

pub mod codec;
pub mod config;
pub mod error;
pub mod queue;
pub mod service;
pub mod session;
pub mod signers;
pub mod telemetry;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::{Algorithm, Method, Nip46Request, Nip46Response, ResponseOutcome};
pub use config::Nip46Config;
pub use error::{Result, SignerError};
pub use queue::RequestQueue;
pub use service::{PairingResult, SigningService};
pub use session::{
    MemorySessionStore, PairedSession, PairingOptions, PairingUri, Session, SessionManager,
    SessionPatch, SessionStore,
};
pub use signers::{
    signer_from_payload, NostrSigner, PrivateKeySigner, RelayHandle, RelayPool, RemoteSigner,
    StaticRelayPool, User,
};
pub use transport::{RelayTransport, Transport};
pub use types::{Event, Keys, PublicKey};
