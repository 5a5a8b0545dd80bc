//! Client-side sessions for `tower` services, stored in an encrypted and signed cookie.
//!
//! [`ClientSessionLayer`] opens the session cookie lazily, exposes its JSON object content
//! through a [`Session`] request extension, renews it while it is in active use and writes it
//! back only when something changed.
//!
//! # Format
//! A cookie value has five dot-separated fields:
//! `base64url(iv).base64url(ciphertext).createdAt.duration.base64url(mac)`, with times in unix
//! milliseconds. The ciphertext is AES-CBC over `cookieName=JSON`, and the MAC is an HMAC over
//! the first four fields. Tokens are authenticated before they are decrypted and a token sealed
//! for one cookie name is rejected under any other name.
//!
//! # Keys
//! [`KeyMaterial`] derives separate encryption and signature keys from a single secret, or takes
//! explicit keys. Explicit keys must be used for anything but AES-256 with HMAC-SHA-256 and its
//! truncation.
//!
//! # Security
//! The session content is confidential and tamper-evident, but a client can always replay an
//! older cookie until it expires. Do not store anything whose revocation must take effect
//! immediately.

mod attributes;
mod config;
mod error;
pub mod format;
mod keys;
pub mod layer;
mod session;
mod transport;

pub use tower_cookies::cookie::SameSite;

pub use crate::attributes::CookieAttributes;
pub use crate::config::{
    ClientSessionConfig, DEFAULT_ACTIVE_DURATION, DEFAULT_COOKIE_NAME, DEFAULT_DURATION,
};
pub use crate::error::{Error, Result};
pub use crate::keys::{
    ENCRYPTION_KEY_LABEL, EncryptionAlgorithm, KeyMaterial, KeyMaterialBuilder,
    SIGNATURE_KEY_LABEL, SignatureAlgorithm, derive_key,
};
pub use crate::layer::ClientSessionLayer;
pub use crate::session::{OutgoingCookie, Session, SessionState, Sessions};
pub use crate::transport::{CookieTransport, SecureConnection, TowerCookies};
