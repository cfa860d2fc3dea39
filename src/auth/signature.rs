//! HMAC-SHA256 signed playback tokens.
//!
//! A token is `base64(JSON{data, signature})` where `data` is the base64 of
//! the JSON payload `{expireAt, itemId, mediaId}` and `signature` is the
//! base64 HMAC-SHA256 of that payload. This is an integrity token, not
//! encryption: the payload is readable by anyone, the key only prevents
//! forgery. The config key is still called `Encipher` for compatibility
//! with deployed frontends.
//!
//! Expiry is enforced by the request handler, not here: `decrypt` only
//! proves the frontend minted the token.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The facts a signed URL carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePayload {
    pub item_id: String,
    pub media_id: String,
    /// Expiry as seconds since the Unix epoch, UTC.
    pub expire_at: i64,
}

/// Errors from token issuance and verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("encipher key must be 16 bytes, got {0}")]
    KeyLength(usize),

    /// The token is not a well-formed envelope.
    #[error("invalid signature token")]
    InvalidToken,

    /// The HMAC does not match the payload.
    #[error("signature verification failed")]
    InvalidSignature,

    /// The signed payload is missing fields or has the wrong types.
    #[error("invalid signature structure")]
    InvalidStructure,
}

/// Wire payload. Field order matters: the original issuer serializes keys
/// alphabetically, and the HMAC covers the exact bytes.
#[derive(Serialize)]
struct WirePayload<'a> {
    #[serde(rename = "expireAt")]
    expire_at: i64,
    #[serde(rename = "itemId")]
    item_id: &'a str,
    #[serde(rename = "mediaId")]
    media_id: &'a str,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    data: String,
    signature: String,
}

/// Issues and verifies signed playback tokens. Constructed once at startup
/// and shared through the application context.
#[derive(Debug)]
pub struct SignatureService {
    key: Vec<u8>,
}

impl SignatureService {
    /// Create the service. The key must be exactly 16 bytes.
    pub fn new(encipher: &str) -> Result<Self, SignatureError> {
        let key = encipher.as_bytes();
        if key.len() != 16 {
            return Err(SignatureError::KeyLength(key.len()));
        }
        Ok(Self { key: key.to_vec() })
    }

    /// Issue a token for `payload`. Deterministic: the same payload always
    /// yields the same token.
    pub fn encrypt(&self, payload: &SignaturePayload) -> String {
        let data = serde_json::to_vec(&WirePayload {
            expire_at: payload.expire_at,
            item_id: &payload.item_id,
            media_id: &payload.media_id,
        })
        .expect("payload serialization is infallible");

        let signature = self.mac(&data);
        let envelope = serde_json::to_vec(&Envelope {
            data: STANDARD.encode(&data),
            signature: STANDARD.encode(signature),
        })
        .expect("envelope serialization is infallible");

        STANDARD.encode(envelope)
    }

    /// Verify `token` and return its payload. Tolerates `expireAt` encoded
    /// as a floating-point number.
    pub fn decrypt(&self, token: &str) -> Result<SignaturePayload, SignatureError> {
        let envelope_json = STANDARD
            .decode(token)
            .map_err(|_| SignatureError::InvalidToken)?;
        let envelope: Envelope =
            serde_json::from_slice(&envelope_json).map_err(|_| SignatureError::InvalidToken)?;

        let data = STANDARD
            .decode(&envelope.data)
            .map_err(|_| SignatureError::InvalidToken)?;
        let signature = STANDARD
            .decode(&envelope.signature)
            .map_err(|_| SignatureError::InvalidToken)?;

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(&data);
        // Constant-time comparison via the hmac crate.
        mac.verify_slice(&signature)
            .map_err(|_| SignatureError::InvalidSignature)?;

        let value: serde_json::Value =
            serde_json::from_slice(&data).map_err(|_| SignatureError::InvalidStructure)?;
        let item_id = value
            .get("itemId")
            .and_then(serde_json::Value::as_str)
            .ok_or(SignatureError::InvalidStructure)?;
        let media_id = value
            .get("mediaId")
            .and_then(serde_json::Value::as_str)
            .ok_or(SignatureError::InvalidStructure)?;
        let expire_at = value
            .get("expireAt")
            .and_then(serde_json::Value::as_f64)
            .ok_or(SignatureError::InvalidStructure)? as i64;

        Ok(SignaturePayload {
            item_id: item_id.to_string(),
            media_id: media_id.to_string(),
            expire_at,
        })
    }

    fn mac(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}
