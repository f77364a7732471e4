//! Relay state carried through the STS round trip in `wctx`.
//!
//! Nothing is stored server-side: the state lives only inside the encoded
//! `wctx` value, so the codec is what keeps a browser from editing it.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Separator between the payload and its MAC in an encoded token.
const SIGNATURE_SEPARATOR: char = '.';

/// Minimum accepted length for a configured state secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Errors produced while encoding or decoding relay state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("relay state is missing")]
    Missing,

    #[error("relay state does not carry the expected prefix")]
    MissingPrefix,

    #[error("relay state is not in the expected format: {0}")]
    Malformed(String),

    #[error("relay state signature does not match")]
    SignatureMismatch,

    #[error("relay state payload could not be read: {0}")]
    Payload(String),

    #[error("relay state expired {age_secs}s after issue")]
    Expired { age_secs: i64 },

    #[error("relay state could not be encoded: {0}")]
    Encode(String),

    #[error("invalid relay state key: {0}")]
    Key(String),
}

/// Caller state that survives the redirect to the STS and back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayState {
    /// Where to send the browser once sign-in completes.
    #[serde(default, rename = "r", skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,

    /// Arbitrary caller data, extended before encoding.
    #[serde(default, rename = "x", skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,

    /// When the redirect was issued.
    #[serde(default, rename = "t", skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
}

impl RelayState {
    pub fn new(return_url: impl Into<String>) -> Self {
        Self {
            return_url: Some(return_url.into()),
            ..Default::default()
        }
    }

    /// Attach a caller-defined value.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Age of the state relative to `now`, if it records an issue time.
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.issued_at.map(|issued| now - issued)
    }
}

/// Turns relay state into an opaque `wctx` token and back.
///
/// Implementations must reject anything they did not produce. Decoding a
/// tampered value yields an error, never a substitute default state.
pub trait StateCodec: Send + Sync {
    fn encode(&self, state: &RelayState) -> Result<String, StateError>;

    fn decode(&self, value: &str) -> Result<RelayState, StateError>;
}

/// Default codec: base64url JSON payload followed by an HMAC-SHA256 tag.
///
/// Tokens survive process restarts only when the key is durable, i.e. built
/// with [`HmacStateCodec::new`] from a configured secret.
pub struct HmacStateCodec {
    key: Vec<u8>,
}

impl HmacStateCodec {
    /// Create a codec from a shared secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, StateError> {
        let key = secret.as_ref();
        if key.len() < MIN_SECRET_LEN {
            return Err(StateError::Key(format!(
                "secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                key.len()
            )));
        }
        Ok(Self { key: key.to_vec() })
    }

    /// Create a codec with a random per-process key.
    ///
    /// Relay states issued before a restart will no longer decode.
    pub fn ephemeral() -> Self {
        use rand::RngCore;

        let mut key = vec![0u8; MIN_SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    fn mac(&self, payload: &str) -> Result<Vec<u8>, StateError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|e| StateError::Key(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl std::fmt::Debug for HmacStateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacStateCodec").finish_non_exhaustive()
    }
}

impl StateCodec for HmacStateCodec {
    fn encode(&self, state: &RelayState) -> Result<String, StateError> {
        let json = serde_json::to_vec(state).map_err(|e| StateError::Encode(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let tag = URL_SAFE_NO_PAD.encode(self.mac(&payload)?);
        Ok(format!("{payload}{SIGNATURE_SEPARATOR}{tag}"))
    }

    fn decode(&self, value: &str) -> Result<RelayState, StateError> {
        let (payload, tag) = value
            .split_once(SIGNATURE_SEPARATOR)
            .ok_or_else(|| StateError::Malformed("missing signature".to_string()))?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|e| StateError::Malformed(format!("signature is not base64url: {e}")))?;

        let expected = self.mac(payload)?;
        if !bool::from(expected.ct_eq(&tag)) {
            return Err(StateError::SignatureMismatch);
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| StateError::Payload(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| StateError::Payload(e.to_string()))
    }
}
