//! Encoding and decoding of the session token carried in the cookie.
//!
//! The token is five `.`-separated fields:
//!
//! ```text
//! b64(iv) . b64(ciphertext) . created_at . duration . b64(mac)
//! ```
//!
//! `b64` is unpadded base64url, `created_at` (unix milliseconds) and `duration` (milliseconds) are
//! decimal integers. The ciphertext is AES-CBC over `cookie_name=<json content>` and the MAC is an
//! HMAC over `iv.ciphertext.created_at.duration`, so the plaintext timestamps cannot be altered
//! without invalidating the token. The MAC is verified before anything is decrypted.
//!
//! The format is unversioned: it is byte-compatible with existing deployments and must not
//! change.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use zeroize::Zeroizing;

use crate::{
    error::{Error, Result},
    keys::KeyMaterial,
};

/// Separates the cookie name from the JSON content inside the plaintext.
pub const COOKIE_NAME_SEPARATOR: char = '=';

/// Length of the initialization vector in bytes.
pub const IV_LEN: usize = 16;

/// Duration used when [`encode`] is not given one: 24 hours.
pub const DEFAULT_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

/// Content and timestamps recovered from a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub content: Map<String, Value>,
    /// Unix time in milliseconds.
    pub created_at: u64,
    /// Validity window in milliseconds.
    pub duration: u64,
}

#[derive(Debug, thiserror::Error)]
enum Rejection {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),
    #[error("field is not valid base64url")]
    Base64,
    #[error("timestamp is not a decimal integer")]
    Timestamp,
    #[error("iv is {0} bytes")]
    IvLength(usize),
    #[error("mac mismatch")]
    Mac,
    #[error("ciphertext does not decrypt")]
    Decrypt,
    #[error("cookie name mismatch")]
    CookieName,
    #[error("content is not a json object")]
    Json,
}

pub(crate) fn check_cookie_name(cookie_name: &str) -> Result<()> {
    if cookie_name.is_empty() {
        return Err(Error::config("cookie name is required"));
    }
    if cookie_name.contains(COOKIE_NAME_SEPARATOR) {
        return Err(Error::config(format!(
            "cookie name cannot include {COOKIE_NAME_SEPARATOR:?}"
        )));
    }
    Ok(())
}

pub(crate) fn now_millis() -> u64 {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    u64::try_from(millis).unwrap_or(0)
}

/// Seal `content` into a token bound to `cookie_name`.
///
/// `duration` defaults to [`DEFAULT_DURATION_MS`] and `created_at` to the current time. A fresh
/// random IV is drawn for every call.
pub fn encode(
    keys: &KeyMaterial,
    cookie_name: &str,
    content: &Map<String, Value>,
    duration: Option<u64>,
    created_at: Option<u64>,
) -> Result<String> {
    check_cookie_name(cookie_name)?;

    let duration = duration.unwrap_or(DEFAULT_DURATION_MS);
    let created_at = created_at.unwrap_or_else(now_millis);

    let mut iv = Zeroizing::new([0u8; IV_LEN]);
    rand::rng().fill_bytes(&mut iv[..]);

    encode_with_iv(keys, cookie_name, content, duration, created_at, &iv[..])
}

pub(crate) fn encode_with_iv(
    keys: &KeyMaterial,
    cookie_name: &str,
    content: &Map<String, Value>,
    duration: u64,
    created_at: u64,
    iv: &[u8],
) -> Result<String> {
    let json = Zeroizing::new(serde_json::to_vec(content)?);

    let mut plaintext = Zeroizing::new(Vec::with_capacity(cookie_name.len() + 1 + json.len()));
    plaintext.extend_from_slice(cookie_name.as_bytes());
    plaintext.push(COOKIE_NAME_SEPARATOR as u8);
    plaintext.extend_from_slice(&json);

    let ciphertext = Zeroizing::new(keys.encryption_algorithm().encrypt(
        keys.encryption_key(),
        iv,
        &plaintext,
    )?);
    let mac = compute_mac(keys, iv, &ciphertext, created_at, duration)?;

    Ok(format!(
        "{}.{}.{}.{}.{}",
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(&*ciphertext),
        created_at,
        duration,
        URL_SAFE_NO_PAD.encode(&*mac)
    ))
}

/// The MAC covering a token's IV, ciphertext and timestamps.
pub fn compute_mac(
    keys: &KeyMaterial,
    iv: &[u8],
    ciphertext: &[u8],
    created_at: u64,
    duration: u64,
) -> Result<Zeroizing<Vec<u8>>> {
    let created_at = created_at.to_string();
    let duration = duration.to_string();
    keys.signature_algorithm().compute(
        keys.signature_key(),
        &[
            iv,
            b".",
            ciphertext,
            b".",
            created_at.as_bytes(),
            b".",
            duration.as_bytes(),
        ],
    )
}

/// Open a token produced by [`encode`] under the same keys and cookie name.
///
/// Any malformed, forged or foreign token yields `Ok(None)`. Only an unusable `cookie_name` is an
/// error.
pub fn decode(keys: &KeyMaterial, cookie_name: &str, token: &str) -> Result<Option<DecodedToken>> {
    check_cookie_name(cookie_name)?;

    match open(keys, cookie_name, token) {
        Ok(decoded) => Ok(Some(decoded)),
        Err(rejection) => {
            tracing::debug!(cookie = cookie_name, reason = %rejection, "session token rejected");
            Ok(None)
        }
    }
}

fn b64_field(field: &str) -> std::result::Result<Zeroizing<Vec<u8>>, Rejection> {
    URL_SAFE_NO_PAD
        .decode(field)
        .map(Zeroizing::new)
        .map_err(|_| Rejection::Base64)
}

fn open(
    keys: &KeyMaterial,
    cookie_name: &str,
    token: &str,
) -> std::result::Result<DecodedToken, Rejection> {
    let fields: Vec<&str> = token.split('.').collect();
    let [iv, ciphertext, created_at, duration, mac] = fields.as_slice() else {
        return Err(Rejection::FieldCount(fields.len()));
    };

    let iv = b64_field(iv)?;
    let ciphertext = b64_field(ciphertext)?;
    let mac = b64_field(mac)?;
    let created_at: u64 = created_at.parse().map_err(|_| Rejection::Timestamp)?;
    let duration: u64 = duration.parse().map_err(|_| Rejection::Timestamp)?;

    if iv.len() != IV_LEN {
        return Err(Rejection::IvLength(iv.len()));
    }

    let expected =
        compute_mac(keys, &iv, &ciphertext, created_at, duration).map_err(|_| Rejection::Mac)?;
    if !bool::from(expected.ct_eq(&mac)) {
        return Err(Rejection::Mac);
    }

    let plaintext = keys
        .encryption_algorithm()
        .decrypt(keys.encryption_key(), &iv, &ciphertext)
        .ok_or(Rejection::Decrypt)?;

    let split = plaintext
        .iter()
        .position(|&b| b == COOKIE_NAME_SEPARATOR as u8)
        .ok_or(Rejection::CookieName)?;
    if &plaintext[..split] != cookie_name.as_bytes() {
        return Err(Rejection::CookieName);
    }

    let content: Map<String, Value> =
        serde_json::from_slice(&plaintext[split + 1..]).map_err(|_| Rejection::Json)?;

    Ok(DecodedToken {
        content,
        created_at,
        duration,
    })
}
