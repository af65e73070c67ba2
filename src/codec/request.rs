use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, SignerError};
use crate::types::PublicKey;

/// Methods of the NIP-46 wire surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Connect,
    SignEvent,
    Nip44Encrypt,
    Nip44Decrypt,
    Nip04Encrypt,
    Nip04Decrypt,
    GetPublicKey,
    Ping,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Connect => "connect",
            Method::SignEvent => "sign_event",
            Method::Nip44Encrypt => "nip44_encrypt",
            Method::Nip44Decrypt => "nip44_decrypt",
            Method::Nip04Encrypt => "nip04_encrypt",
            Method::Nip04Decrypt => "nip04_decrypt",
            Method::GetPublicKey => "get_public_key",
            Method::Ping => "ping",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique correlation id: `<counter>-<unix ms>`.
pub fn next_request_id() -> String {
    let c = ID_COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{c}-{ms}")
}

/// Named inputs for the positional `connect` parameter list.
#[derive(Clone, Debug)]
pub struct ConnectParams<'a> {
    pub remote_signer_pubkey: &'a PublicKey,
    pub secret: Option<&'a str>,
    pub permissions: &'a [String],
}

impl ConnectParams<'_> {
    /// `[remote, secret | "" , "perm1,perm2"]`, trailing slots omitted when unused.
    pub fn into_params(self) -> Vec<String> {
        let mut params = vec![self.remote_signer_pubkey.to_hex()];
        match self.secret {
            Some(secret) => params.push(secret.to_string()),
            None if !self.permissions.is_empty() => params.push(String::new()),
            None => {}
        }
        if !self.permissions.is_empty() {
            params.push(self.permissions.join(","));
        }
        params
    }
}

/// JSON-RPC-like request carried in the encrypted content of a kind 24133 event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nip46Request {
    pub id: String,
    pub method: String,
    pub params: Vec<String>,
}

impl Nip46Request {
    pub fn new(method: Method, params: Vec<String>, id: Option<String>) -> Self {
        Self {
            id: id.unwrap_or_else(next_request_id),
            method: method.as_str().to_string(),
            params,
        }
    }

    pub fn connect(params: ConnectParams<'_>, id: Option<String>) -> Self {
        Self::new(Method::Connect, params.into_params(), id)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SignerError::Encode(e.to_string()))
    }
}

/// Decoded outcome of a response: exactly one of result or error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseOutcome {
    Ok(String),
    Err(String),
}

impl ResponseOutcome {
    /// Turn a remote error into `SignerError::Protocol`.
    pub fn into_result(self) -> Result<String> {
        match self {
            ResponseOutcome::Ok(result) => Ok(result),
            ResponseOutcome::Err(message) => Err(SignerError::Protocol(message)),
        }
    }
}

/// Raw response as found on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Nip46Response {
    pub id: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Nip46Response {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SignerError::Decode(format!("response: {e}")))
    }

    /// Result as a string; non-string JSON results are re-serialized.
    pub fn result_str(&self) -> Option<String> {
        match &self.result {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    /// A non-empty `error` wins over any `result`.
    pub fn outcome(&self) -> ResponseOutcome {
        match self.error.as_deref() {
            Some(error) if !error.is_empty() => ResponseOutcome::Err(error.to_string()),
            _ => ResponseOutcome::Ok(self.result_str().unwrap_or_default()),
        }
    }

    /// `auth_url` challenges are not final answers.
    pub fn is_auth_challenge(&self) -> bool {
        self.result_str().as_deref() == Some("auth_url")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> PublicKey {
        PublicKey([7u8; 32])
    }

    #[test]
    fn test_connect_params_with_secret() {
        let perms = vec!["sign_event".to_string(), "get_public_key".to_string()];
        let pk = remote();
        let params = ConnectParams {
            remote_signer_pubkey: &pk,
            secret: Some("s3cr3t"),
            permissions: &perms,
        }
        .into_params();
        assert_eq!(
            params,
            vec![pk.to_hex(), "s3cr3t".to_string(), "sign_event,get_public_key".to_string()]
        );
    }

    #[test]
    fn test_connect_params_placeholder_without_secret() {
        let perms = vec!["sign_event".to_string(), "get_public_key".to_string()];
        let pk = remote();
        let params = ConnectParams {
            remote_signer_pubkey: &pk,
            secret: None,
            permissions: &perms,
        }
        .into_params();
        assert_eq!(
            params,
            vec![pk.to_hex(), String::new(), "sign_event,get_public_key".to_string()]
        );
    }

    #[test]
    fn test_connect_params_minimal() {
        let pk = remote();
        let params = ConnectParams {
            remote_signer_pubkey: &pk,
            secret: None,
            permissions: &[],
        }
        .into_params();
        assert_eq!(params, vec![pk.to_hex()]);

        let params = ConnectParams {
            remote_signer_pubkey: &pk,
            secret: Some("x"),
            permissions: &[],
        }
        .into_params();
        assert_eq!(params, vec![pk.to_hex(), "x".to_string()]);
    }

    #[test]
    fn test_request_ids_are_generated_and_unique() {
        let a = Nip46Request::new(Method::Ping, vec![], None);
        let b = Nip46Request::new(Method::Ping, vec![], None);
        assert_ne!(a.id, b.id);

        let c = Nip46Request::new(Method::GetPublicKey, vec![], Some("fixed".into()));
        assert_eq!(c.id, "fixed");
        let json: Value = serde_json::from_str(&c.to_json().unwrap()).unwrap();
        assert_eq!(json["method"], "get_public_key");
        assert_eq!(json["params"], serde_json::json!([]));
    }

    #[test]
    fn test_response_outcomes() {
        let ok = Nip46Response::from_json(r#"{"id":"1","result":"ack"}"#).unwrap();
        assert_eq!(ok.outcome(), ResponseOutcome::Ok("ack".into()));

        let err = Nip46Response::from_json(r#"{"id":"2","result":"x","error":"denied"}"#).unwrap();
        assert_eq!(err.outcome(), ResponseOutcome::Err("denied".into()));
        assert_eq!(
            err.outcome().into_result(),
            Err(SignerError::Protocol("denied".into()))
        );

        let empty_err = Nip46Response::from_json(r#"{"id":"3","result":"pk","error":""}"#).unwrap();
        assert_eq!(empty_err.outcome(), ResponseOutcome::Ok("pk".into()));

        let object = Nip46Response::from_json(r#"{"id":"4","result":{"a":1}}"#).unwrap();
        assert_eq!(object.outcome(), ResponseOutcome::Ok(r#"{"a":1}"#.into()));

        let auth = Nip46Response::from_json(r#"{"id":"5","result":"auth_url","error":"https://x"}"#)
            .unwrap();
        assert!(auth.is_auth_challenge());

        assert!(matches!(
            Nip46Response::from_json("not json"),
            Err(SignerError::Decode(_))
        ));
    }
}
