//! Error types.
//!
//! Only configuration problems and caller misuse surface as errors. A token that fails to decode
//! is never an error: it is indistinguishable from a request that carried no session at all.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing keys, incompatible cookie options, malformed cookie name, unsupported
    /// algorithm, or a secure cookie requested over an insecure transport.
    #[error("client session configuration error: {0}")]
    Configuration(String),

    /// Session content was replaced by something other than a JSON object.
    #[error("cannot set client session content to a non-object value")]
    NotAnObject,

    #[error("session value (de)serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The finalized cookie value would exceed the configured size limit.
    #[error("cookie value exceeds max_cookie_bytes ({size} > {max})")]
    CookieTooLarge { size: usize, max: usize },

    /// A cipher or MAC primitive rejected its key or IV.
    #[error("cryptographic primitive rejected its input")]
    Crypto,
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
