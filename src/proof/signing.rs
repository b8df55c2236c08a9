//! Signing keys for proof certificates.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::ProofConfig;
use crate::error::ProofError;

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of generated keys.
pub const KEY_LEN: usize = 32;

/// Upper bound on the hex-encoded length accepted from the environment.
const MAX_ENCODED_CHARS: usize = 1024;

/// A secret key for HMAC-SHA256 certificate signatures.
///
/// Keys are explicit values handed to a
/// [`ProofGenerator`](super::ProofGenerator); there is no process-wide key.
/// Certificates only verify under the key that signed them, so deployments
/// that verify across restarts must supply a stable key.
#[derive(Clone)]
pub struct SigningKey {
    bytes: Vec<u8>,
}

impl SigningKey {
    /// Generate a random key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0_u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Wrap raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::InvalidKey`] for an empty key.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, ProofError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ProofError::InvalidKey("key is empty".into()));
        }
        Ok(Self { bytes })
    }

    /// Decode a hex-encoded key.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::InvalidKey`] if the text is not hex or is empty.
    pub fn from_hex(encoded: &str) -> Result<Self, ProofError> {
        let encoded = encoded.trim();
        if encoded.len() > MAX_ENCODED_CHARS {
            return Err(ProofError::InvalidKey(
                "encoded key exceeds maximum length".into(),
            ));
        }
        let bytes =
            hex::decode(encoded).map_err(|e| ProofError::InvalidKey(format!("bad hex: {e}")))?;
        Self::from_bytes(bytes)
    }

    /// Read a hex-encoded key from the environment variable `var`.
    ///
    /// Returns `Ok(None)` when the variable is unset or blank.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::InvalidKey`] if the variable is set but does not
    /// hold a valid key.
    pub fn from_env(var: &str) -> Result<Option<Self>, ProofError> {
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Self::from_hex(&value).map(Some),
            Ok(_) | Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(ProofError::InvalidKey(format!(
                "{var} is not valid unicode"
            ))),
        }
    }

    /// The key named by the configuration, or a fresh random one.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::InvalidKey`] if the configured variable holds
    /// an invalid key.
    pub fn from_config(config: &ProofConfig) -> Result<Self, ProofError> {
        if let Some(var) = config.signing_key_env.as_deref()
            && let Some(key) = Self::from_env(var)?
        {
            tracing::debug!(fingerprint = %key.fingerprint(), "loaded signing key from environment");
            return Ok(key);
        }
        let key = Self::generate();
        tracing::warn!(
            fingerprint = %key.fingerprint(),
            "no signing key configured, generated an ephemeral key; certificates will not verify after restart"
        );
        Ok(key)
    }

    /// Hex encoding of the key, for provisioning.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Short public identifier: the first 8 bytes of SHA-256 of the key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(&self.bytes)[..8])
    }

    /// HMAC-SHA256 of `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::InvalidKey`] if the MAC cannot be keyed.
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, ProofError> {
        let mut mac = HmacSha256::new_from_slice(&self.bytes)
            .map_err(|e| ProofError::InvalidKey(e.to_string()))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Constant-time check of `signature` against the MAC of `payload`.
    #[must_use]
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let Ok(expected) = self.sign(payload) else {
            return false;
        };
        if expected.len() != signature.len() {
            return false;
        }
        expected.ct_eq(signature).into()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let a = SigningKey::generate();
        let b = SigningKey::generate();
        assert_eq!(a.to_hex().len(), KEY_LEN * 2);
        assert_ne!(a.to_hex(), b.to_hex());
    }

    #[test]
    fn test_hex_round_trip() {
        let key = SigningKey::generate();
        let decoded = SigningKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key.fingerprint(), decoded.fingerprint());
    }

    #[test]
    fn test_invalid_keys() {
        assert!(SigningKey::from_bytes(Vec::new()).is_err());
        assert!(SigningKey::from_hex("zz").is_err());
        assert!(SigningKey::from_hex("").is_err());
        assert!(SigningKey::from_hex(&"a".repeat(2048)).is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let key = SigningKey::from_bytes(b"super-secret".to_vec()).unwrap();
        let debug = format!("{key:?}");
        assert!(!debug.contains(&key.to_hex()));
        assert!(debug.contains(&key.fingerprint()));
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::from_bytes(b"k".to_vec()).unwrap();
        let signature = key.sign(b"payload").unwrap();
        assert!(key.verify(b"payload", &signature));
        assert!(!key.verify(b"payload!", &signature));
        assert!(!key.verify(b"payload", &signature[..16]));

        let other = SigningKey::from_bytes(b"j".to_vec()).unwrap();
        assert!(!other.verify(b"payload", &signature));
    }

    #[test]
    fn test_from_env_unset() {
        assert!(
            SigningKey::from_env("OXIPROOF_TEST_KEY_THAT_IS_NEVER_SET")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_from_config_without_env_generates() {
        let config = ProofConfig {
            signing_key_env: None,
            ..ProofConfig::default()
        };
        let a = SigningKey::from_config(&config).unwrap();
        let b = SigningKey::from_config(&config).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
