use aes_gcm::aead::Aead as _;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, KeyInit as _};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore as _;
use sha2::Sha256;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use zeroize::Zeroize as _;

/// App-layer encryption for credential fields at rest.
///
/// Threat model goal:
/// - DB snapshots / accidental reads of the `credentials` table must not
///   reveal upstream secrets in plaintext.
/// - Gateway nodes decrypt at call time using a process-wide master key.
///
/// Crypto:
/// - AEAD: AES-256-GCM with a 16-byte IV and 16-byte tag.
/// - Key derivation: PBKDF2-HMAC-SHA256, 100k iterations, over the master
///   key and a 64-byte per-record salt, so no two records share a key.
/// - On-disk format (v1, implicit): `salt:iv:ciphertext:tag`, lowercase hex.
///
/// Every seal draws a fresh salt and IV. Unseal fails closed on a
/// malformed envelope or tag mismatch with one indistinguishable error:
/// a field-level attacker cannot tell "wrong key" from "wrong ciphertext".
#[derive(Clone)]
pub struct SecretsCipher {
    master: [u8; MASTER_KEY_LEN],
}

impl std::fmt::Debug for SecretsCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsCipher").finish_non_exhaustive()
    }
}

type EnvelopeAead = AesGcm<Aes256, U16>;

pub const MASTER_KEY_LEN: usize = 32;
const SALT_LEN: usize = 64;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const PBKDF2_ITERATIONS: u32 = 100_000;

const MASTER_KEY_ENV: &str = "PORTWAY_MASTER_KEY";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("PORTWAY_MASTER_KEY must be 32 bytes of hex")]
    InvalidMasterKey,
    #[error("malformed secret envelope")]
    Malformed,
    #[error("encryption failed")]
    Seal,
    /// Deliberately uniform across tag mismatch, wrong key, and invalid
    /// plaintext encoding.
    #[error("decryption failed")]
    Unseal,
}

impl SecretsCipher {
    /// Read the master key from the environment. Absence is a fatal
    /// configuration error at startup.
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var(MASTER_KEY_ENV)
            .map_err(|_| anyhow::anyhow!("{MASTER_KEY_ENV} is required"))?;
        Ok(Self::from_hex(raw.trim())?)
    }

    pub fn from_hex(master_hex: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode(master_hex).map_err(|_| CryptoError::InvalidMasterKey)?;
        if bytes.len() != MASTER_KEY_LEN {
            bytes.zeroize();
            return Err(CryptoError::InvalidMasterKey);
        }
        let mut master = [0u8; MASTER_KEY_LEN];
        master.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self { master })
    }

    #[must_use]
    pub fn from_key(master: [u8; MASTER_KEY_LEN]) -> Self {
        Self { master }
    }

    /// Seal one UTF-8 string into the hex envelope.
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let mut key = self.derive_key(&salt);
        let aead = EnvelopeAead::new_from_slice(&key).map_err(|_| CryptoError::Seal)?;
        key.zeroize();

        let sealed = aead
            .encrypt(GenericArray::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CryptoError::Seal)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}:{}",
            hex::encode(salt),
            hex::encode(iv),
            hex::encode(ciphertext),
            hex::encode(tag)
        ))
    }

    /// Unseal a hex envelope produced by [`Self::seal`].
    pub fn unseal(&self, envelope: &str) -> Result<String, CryptoError> {
        let (salt, iv, mut sealed) = parse_envelope(envelope)?;

        let mut key = self.derive_key(&salt);
        let aead = EnvelopeAead::new_from_slice(&key).map_err(|_| CryptoError::Unseal)?;
        key.zeroize();

        let plaintext = aead
            .decrypt(GenericArray::from_slice(&iv), sealed.as_slice())
            .map_err(|_| CryptoError::Unseal)?;
        sealed.zeroize();

        String::from_utf8(plaintext).map_err(|_| CryptoError::Unseal)
    }

    /// Decrypt a sealed credential config under its field schema.
    ///
    /// Fields marked encrypted are unsealed when the stored value parses
    /// as an envelope; values that do not parse as envelopes pass through
    /// unchanged (data written before the field was marked encrypted).
    /// Unencrypted fields always pass through.
    pub fn unseal_config(
        &self,
        sealed: &HashMap<String, String>,
        encrypted_fields: &HashSet<String>,
    ) -> Result<HashMap<String, String>, CryptoError> {
        let mut out = HashMap::with_capacity(sealed.len());
        for (key, value) in sealed {
            let plaintext = if encrypted_fields.contains(key) && looks_sealed(value) {
                self.unseal(value)?
            } else {
                value.clone()
            };
            out.insert(key.clone(), plaintext);
        }
        Ok(out)
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; 32] {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(&self.master, salt, PBKDF2_ITERATIONS, &mut key);
        key
    }
}

impl Drop for SecretsCipher {
    fn drop(&mut self) {
        self.master.zeroize();
    }
}

/// Structural check used by the historical-plaintext pass-through rule.
#[must_use]
pub fn looks_sealed(value: &str) -> bool {
    parse_envelope(value).is_ok()
}

fn parse_envelope(envelope: &str) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), CryptoError> {
    let mut parts = envelope.split(':');
    let (Some(salt), Some(iv), Some(ciphertext), Some(tag), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(CryptoError::Malformed);
    };

    let salt = hex::decode(salt).map_err(|_| CryptoError::Malformed)?;
    let iv = hex::decode(iv).map_err(|_| CryptoError::Malformed)?;
    let ciphertext = hex::decode(ciphertext).map_err(|_| CryptoError::Malformed)?;
    let tag = hex::decode(tag).map_err(|_| CryptoError::Malformed)?;

    if salt.len() != SALT_LEN || iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(CryptoError::Malformed);
    }

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);
    Ok((salt, iv, sealed))
}
