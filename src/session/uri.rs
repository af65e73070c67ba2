use std::fmt;

use getrandom::getrandom;
use tracing::debug;
use url::{form_urlencoded, Url};

use crate::codec::normalize_pubkey;
use crate::error::{Result, SignerError};
use crate::types::PublicKey;

const BUNKER_SCHEME: &str = "bunker://";
const NOSTRCONNECT_SCHEME: &str = "nostrconnect://";

/// A parsed pairing URI.
///
/// - `bunker://<remote-signer-pubkey>?relay=wss://...&secret=...` is handed out
///   by the remote signer; the remote key is known up front.
/// - `nostrconnect://<client-pubkey>?relay=...&secret=...&perms=...&name=...` is
///   shown by this client (QR code); the remote key is learned from the first
///   response that echoes the secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairingUri {
    Bunker {
        remote_signer_pubkey: PublicKey,
        relays: Vec<String>,
        secret: Option<String>,
    },
    NostrConnect {
        client_pubkey: PublicKey,
        relays: Vec<String>,
        secret: String,
        permissions: Vec<String>,
        name: Option<String>,
    },
}

impl PairingUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if let Some(rest) = uri.strip_prefix(BUNKER_SCHEME) {
            let (pubkey, query) = split_query(rest, "bunker")?;
            let remote_signer_pubkey = normalize_pubkey(pubkey).map_err(|e| {
                SignerError::Pairing(format!("Invalid remote signer pubkey in bunker URI: {e}"))
            })?;
            let params = QueryParams::parse(query)?;
            Ok(PairingUri::Bunker {
                remote_signer_pubkey,
                relays: params.relays("bunker")?,
                secret: params.first("secret"),
            })
        } else if let Some(rest) = uri.strip_prefix(NOSTRCONNECT_SCHEME) {
            let (pubkey, query) = split_query(rest, "nostrconnect")?;
            let client_pubkey = normalize_pubkey(pubkey).map_err(|e| {
                SignerError::Pairing(format!("Invalid client pubkey in nostrconnect URI: {e}"))
            })?;
            let params = QueryParams::parse(query)?;
            let secret = params.first("secret").ok_or_else(|| {
                SignerError::Pairing("nostrconnect URI requires a secret".to_string())
            })?;
            let permissions = params
                .first("perms")
                .map(|p| split_permissions(&p))
                .unwrap_or_default();
            Ok(PairingUri::NostrConnect {
                client_pubkey,
                relays: params.relays("nostrconnect")?,
                secret,
                permissions,
                name: params.first("name"),
            })
        } else {
            Err(SignerError::Pairing(
                "URI must start with bunker:// or nostrconnect://".to_string(),
            ))
        }
    }

    /// Build a `nostrconnect://` URI for `client_pubkey` with a fresh secret.
    pub fn new_nostrconnect(
        client_pubkey: PublicKey,
        relays: &[String],
        permissions: Vec<String>,
        name: Option<String>,
    ) -> Result<Self> {
        let relays = normalize_relays(relays)?;
        if relays.is_empty() {
            return Err(SignerError::Pairing("No relays specified".to_string()));
        }
        Ok(PairingUri::NostrConnect {
            client_pubkey,
            relays,
            secret: generate_secret()?,
            permissions,
            name,
        })
    }

    pub fn relays(&self) -> &[String] {
        match self {
            PairingUri::Bunker { relays, .. } | PairingUri::NostrConnect { relays, .. } => relays,
        }
    }

    pub fn secret(&self) -> Option<&str> {
        match self {
            PairingUri::Bunker { secret, .. } => secret.as_deref(),
            PairingUri::NostrConnect { secret, .. } => Some(secret),
        }
    }

    pub fn remote_signer_pubkey(&self) -> Option<PublicKey> {
        match self {
            PairingUri::Bunker {
                remote_signer_pubkey,
                ..
            } => Some(*remote_signer_pubkey),
            PairingUri::NostrConnect { .. } => None,
        }
    }
}

impl fmt::Display for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut query = form_urlencoded::Serializer::new(String::new());
        match self {
            PairingUri::Bunker {
                remote_signer_pubkey,
                relays,
                secret,
            } => {
                for relay in relays {
                    query.append_pair("relay", relay);
                }
                if let Some(secret) = secret {
                    query.append_pair("secret", secret);
                }
                write!(f, "{BUNKER_SCHEME}{}?{}", remote_signer_pubkey, query.finish())
            }
            PairingUri::NostrConnect {
                client_pubkey,
                relays,
                secret,
                permissions,
                name,
            } => {
                for relay in relays {
                    query.append_pair("relay", relay);
                }
                query.append_pair("secret", secret);
                if !permissions.is_empty() {
                    query.append_pair("perms", &permissions.join(","));
                }
                if let Some(name) = name {
                    query.append_pair("name", name);
                }
                write!(f, "{NOSTRCONNECT_SCHEME}{}?{}", client_pubkey, query.finish())
            }
        }
    }
}

fn split_query<'a>(rest: &'a str, kind: &str) -> Result<(&'a str, &'a str)> {
    match rest.split_once('?') {
        Some((pubkey, query)) if !query.is_empty() => Ok((pubkey.trim_end_matches('/'), query)),
        _ => Err(SignerError::Pairing(format!(
            "Invalid {kind} URI: missing query parameters"
        ))),
    }
}

struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    fn parse(query: &str) -> Result<Self> {
        let params = Url::parse(&format!("http://localhost/?{query}"))
            .map_err(|e| SignerError::Pairing(format!("Invalid URI parameters: {e}")))?;
        Ok(Self(params.query_pairs().into_owned().collect()))
    }

    fn all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn first(&self, key: &str) -> Option<String> {
        self.all(key)
            .find(|v| !v.is_empty())
            .map(|v| v.to_string())
    }

    fn relays(&self, kind: &str) -> Result<Vec<String>> {
        let raw: Vec<String> = self.all("relay").map(|r| r.to_string()).collect();
        let relays = normalize_relays(&raw)?;
        if relays.is_empty() {
            return Err(SignerError::Pairing(format!(
                "No relays specified in {kind} URI"
            )));
        }
        Ok(relays)
    }
}

fn split_permissions(perms: &str) -> Vec<String> {
    perms
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalize a relay URL: add `wss://` when no scheme is given and require a
/// websocket URL with a host.
pub fn normalize_relay_url(url: &str) -> Result<String> {
    let url = url.trim();
    let candidate = if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("//") {
        format!("wss://{rest}")
    } else if url.contains("://") {
        return Err(SignerError::Pairing(format!("Unsupported relay scheme: {url}")));
    } else {
        format!("wss://{url}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|e| SignerError::Pairing(format!("Invalid relay URL {url}: {e}")))?;
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(SignerError::Pairing(format!("Relay URL has no host: {url}")));
    }
    Ok(parsed.to_string())
}

/// Normalize, drop blanks and de-duplicate while keeping order.
pub fn normalize_relays(relays: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(relays.len());
    for relay in relays.iter().filter(|r| !r.trim().is_empty()) {
        let normalized = normalize_relay_url(relay)?;
        if out.contains(&normalized) {
            debug!("[nip46][uri] dropping duplicate relay {}", normalized);
            continue;
        }
        out.push(normalized);
    }
    Ok(out)
}

pub(crate) fn generate_secret() -> Result<String> {
    let mut bytes = [0u8; 16];
    getrandom(&mut bytes)
        .map_err(|e| SignerError::Pairing(format!("Failed to generate secret: {e}")))?;
    Ok(hex::encode(bytes))
}
