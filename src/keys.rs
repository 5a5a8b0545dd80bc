//! Key material for the session codec.
//!
//! Two independent keys are needed: one for AES-CBC encryption and one for the HMAC that
//! authenticates the token. Both are either derived from a single secret or supplied directly,
//! and are validated once when the [`KeyMaterial`] is built. After that they are immutable and
//! shared read-only between requests.

use std::{fmt, str::FromStr};

use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use hmac::{
    Hmac, Mac,
    digest::{InvalidLength, KeyInit},
};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

/// Label mixed into the secret to derive the encryption key.
pub const ENCRYPTION_KEY_LABEL: &str = "cookiesession-encryption";
/// Label mixed into the secret to derive the signature key.
pub const SIGNATURE_KEY_LABEL: &str = "cookiesession-signature";

/// Block cipher used for the session payload. All variants run in CBC mode with PKCS#7 padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncryptionAlgorithm {
    Aes128,
    Aes192,
    #[default]
    Aes256,
}

impl EncryptionAlgorithm {
    pub const ALL: [Self; 3] = [Self::Aes128, Self::Aes192, Self::Aes256];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Aes128 => "aes128",
            Self::Aes192 => "aes192",
            Self::Aes256 => "aes256",
        }
    }

    /// Exact key length in bytes.
    #[must_use]
    pub const fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    pub(crate) fn encrypt(self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let ciphertext = match self {
            Self::Aes128 => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
                .map(|cipher| cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            Self::Aes192 => cbc::Encryptor::<aes::Aes192>::new_from_slices(key, iv)
                .map(|cipher| cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            Self::Aes256 => cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv)
                .map(|cipher| cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        };
        ciphertext.map_err(|_| Error::Crypto)
    }

    /// Returns `None` when the key/IV are rejected or the padding does not verify.
    pub(crate) fn decrypt(
        self,
        key: &[u8],
        iv: &[u8],
        ciphertext: &[u8],
    ) -> Option<Zeroizing<Vec<u8>>> {
        let plaintext = match self {
            Self::Aes128 => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
                .ok()?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            Self::Aes192 => cbc::Decryptor::<aes::Aes192>::new_from_slices(key, iv)
                .ok()?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            Self::Aes256 => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, iv)
                .ok()?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        plaintext.ok().map(Zeroizing::new)
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|algo| algo.name() == lower)
            .ok_or_else(|| {
                Error::config(format!(
                    "invalid encryption algorithm {s:?}, supported are: {}",
                    Self::ALL.map(Self::name).join(", ")
                ))
            })
    }
}

/// HMAC digest used to authenticate the token.
///
/// The `DropN` variants keep only the leading `N` bits of the wider digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignatureAlgorithm {
    #[default]
    Sha256,
    Sha256Drop128,
    Sha384,
    Sha384Drop192,
    Sha512,
    Sha512Drop256,
}

impl SignatureAlgorithm {
    pub const ALL: [Self; 6] = [
        Self::Sha256,
        Self::Sha256Drop128,
        Self::Sha384,
        Self::Sha384Drop192,
        Self::Sha512,
        Self::Sha512Drop256,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha256Drop128 => "sha256-drop128",
            Self::Sha384 => "sha384",
            Self::Sha384Drop192 => "sha384-drop192",
            Self::Sha512 => "sha512",
            Self::Sha512Drop256 => "sha512-drop256",
        }
    }

    /// Minimum signature key length in bytes.
    #[must_use]
    pub const fn min_key_len(self) -> usize {
        match self {
            Self::Sha256 | Self::Sha256Drop128 => 32,
            Self::Sha384 | Self::Sha384Drop192 => 48,
            Self::Sha512 | Self::Sha512Drop256 => 64,
        }
    }

    /// Length in bytes of the MAC carried on the wire.
    #[must_use]
    pub const fn mac_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha256Drop128 => 16,
            Self::Sha384 => 48,
            Self::Sha384Drop192 => 24,
            Self::Sha512 => 64,
            Self::Sha512Drop256 => 32,
        }
    }

    /// HMAC over the concatenation of `parts`, truncated to [`Self::mac_len`].
    pub(crate) fn compute(self, key: &[u8], parts: &[&[u8]]) -> Result<Zeroizing<Vec<u8>>> {
        let keep = self.mac_len();
        let mac = match self {
            Self::Sha256 | Self::Sha256Drop128 => hmac_digest::<Hmac<Sha256>>(key, parts, keep),
            Self::Sha384 | Self::Sha384Drop192 => hmac_digest::<Hmac<Sha384>>(key, parts, keep),
            Self::Sha512 | Self::Sha512Drop256 => hmac_digest::<Hmac<Sha512>>(key, parts, keep),
        };
        mac.map_err(|_| Error::Crypto)
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|algo| algo.name() == lower)
            .ok_or_else(|| {
                Error::config(format!(
                    "invalid signature algorithm {s:?}, supported are: {}",
                    Self::ALL.map(Self::name).join(", ")
                ))
            })
    }
}

fn hmac_digest<M: Mac + KeyInit>(
    key: &[u8],
    parts: &[&[u8]],
    keep: usize,
) -> std::result::Result<Zeroizing<Vec<u8>>, InvalidLength> {
    let mut mac = <M as Mac>::new_from_slice(key)?;
    for part in parts {
        mac.update(part);
    }
    let mut digest = mac.finalize().into_bytes();
    let truncated = Zeroizing::new(digest[..keep].to_vec());
    // the dropped tail is still secret-derived
    digest.as_mut_slice().zeroize();
    Ok(truncated)
}

/// Derives a 32-byte key from `secret`, unique per `label`.
pub fn derive_key(secret: &[u8], label: &str) -> Result<Zeroizing<Vec<u8>>> {
    hmac_digest::<Hmac<Sha256>>(secret, &[label.as_bytes()], 32).map_err(|_| Error::Crypto)
}

/// Checks that a key pair is usable with the given algorithms.
pub fn validate(
    encryption_key: &[u8],
    signature_key: &[u8],
    encryption_algorithm: EncryptionAlgorithm,
    signature_algorithm: SignatureAlgorithm,
) -> Result<()> {
    if bool::from(encryption_key.ct_eq(signature_key)) {
        return Err(Error::config(
            "encryption and signature keys must be different",
        ));
    }

    let required = encryption_algorithm.key_len();
    if encryption_key.len() != required {
        return Err(Error::config(format!(
            "encryption key for {encryption_algorithm} must be exactly {required} bytes ({} bits)",
            required * 8
        )));
    }

    let minimum = signature_algorithm.min_key_len();
    if signature_key.len() < minimum {
        return Err(Error::config(format!(
            "signature key for {signature_algorithm} must be at least {minimum} bytes ({} bits)",
            minimum * 8
        )));
    }

    Ok(())
}

/// Validated encryption and signature keys plus their algorithms.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    encryption_key: Vec<u8>,
    signature_key: Vec<u8>,
    #[zeroize(skip)]
    encryption_algorithm: EncryptionAlgorithm,
    #[zeroize(skip)]
    signature_algorithm: SignatureAlgorithm,
}

impl KeyMaterial {
    #[must_use]
    pub fn builder() -> KeyMaterialBuilder {
        KeyMaterialBuilder::default()
    }

    /// Derives both keys from `secret` using the default algorithms.
    pub fn from_secret(secret: impl AsRef<[u8]>) -> Result<Self> {
        Self::builder().with_secret(secret).build()
    }

    /// Uses explicit keys with the default algorithms.
    pub fn from_keys(
        encryption_key: impl Into<Vec<u8>>,
        signature_key: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        Self::builder()
            .with_encryption_key(encryption_key)
            .with_signature_key(signature_key)
            .build()
    }

    pub fn new(
        encryption_key: Vec<u8>,
        signature_key: Vec<u8>,
        encryption_algorithm: EncryptionAlgorithm,
        signature_algorithm: SignatureAlgorithm,
    ) -> Result<Self> {
        let keys = Self {
            encryption_key,
            signature_key,
            encryption_algorithm,
            signature_algorithm,
        };
        validate(
            &keys.encryption_key,
            &keys.signature_key,
            encryption_algorithm,
            signature_algorithm,
        )?;
        Ok(keys)
    }

    #[must_use]
    pub fn encryption_algorithm(&self) -> EncryptionAlgorithm {
        self.encryption_algorithm
    }

    #[must_use]
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.signature_algorithm
    }

    pub(crate) fn encryption_key(&self) -> &[u8] {
        &self.encryption_key
    }

    pub(crate) fn signature_key(&self) -> &[u8] {
        &self.signature_key
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("encryption_key", &"<redacted>")
            .field("signature_key", &"<redacted>")
            .field("encryption_algorithm", &self.encryption_algorithm)
            .field("signature_algorithm", &self.signature_algorithm)
            .finish()
    }
}

/// Builds a [`KeyMaterial`] from a secret and/or explicit keys.
///
/// An explicit key takes precedence over the one that would be derived from the secret, so a
/// secret plus a single explicit key is valid.
#[derive(Default)]
pub struct KeyMaterialBuilder {
    secret: Option<Zeroizing<Vec<u8>>>,
    encryption_key: Option<Zeroizing<Vec<u8>>>,
    signature_key: Option<Zeroizing<Vec<u8>>>,
    encryption_algorithm: EncryptionAlgorithm,
    signature_algorithm: SignatureAlgorithm,
}

impl KeyMaterialBuilder {
    #[must_use]
    pub fn with_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.secret = Some(Zeroizing::new(secret.as_ref().to_vec()));
        self
    }

    #[must_use]
    pub fn with_encryption_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.encryption_key = Some(Zeroizing::new(key.into()));
        self
    }

    #[must_use]
    pub fn with_signature_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.signature_key = Some(Zeroizing::new(key.into()));
        self
    }

    #[must_use]
    pub fn with_encryption_algorithm(mut self, algorithm: EncryptionAlgorithm) -> Self {
        self.encryption_algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    pub fn build(self) -> Result<KeyMaterial> {
        let secret = self.secret.filter(|secret| !secret.is_empty());

        let (encryption_key, signature_key) =
            match (secret, self.encryption_key, self.signature_key) {
                (_, Some(enc), Some(sig)) => (enc, sig),
                (Some(secret), enc, sig) => (
                    match enc {
                        Some(enc) => enc,
                        None => derive_key(&secret, ENCRYPTION_KEY_LABEL)?,
                    },
                    match sig {
                        Some(sig) => sig,
                        None => derive_key(&secret, SIGNATURE_KEY_LABEL)?,
                    },
                ),
                (None, _, _) => {
                    return Err(Error::config(
                        "cannot set up sessions without a secret or encryption/signature key pair",
                    ));
                }
            };

        KeyMaterial::new(
            encryption_key.to_vec(),
            signature_key.to_vec(),
            self.encryption_algorithm,
            self.signature_algorithm,
        )
    }
}
