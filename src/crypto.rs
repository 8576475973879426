//! Credential cipher.
//!
//! Stored database passwords are encrypted with AES-256-CBC under a key derived
//! from the configured secret with scrypt and a fixed salt. The derivation is
//! deterministic, so blobs written by one process stay readable after a restart
//! as long as the secret is unchanged.
//!
//! Blob format: `<iv hex>:<ciphertext hex>`, with a fresh 16-byte IV per call.

use crate::error::{GatewayError, GatewayResult};
use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use rand::RngCore;
use serde::{Deserialize, Serialize};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Fixed, non-secret KDF salt. Changing it invalidates every stored secret.
const KDF_SALT: &[u8] = b"salt";
/// scrypt cost parameters: N = 2^14, r = 8, p = 1.
const KDF_LOG_N: u8 = 14;
const KDF_R: u32 = 8;
const KDF_P: u32 = 1;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// An encrypted credential as persisted by the profile store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedSecret(String);

impl EncryptedSecret {
    /// Wrap a blob read back from storage.
    pub fn new(blob: impl Into<String>) -> Self {
        Self(blob.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptedSecret(..)")
    }
}

/// Symmetric cipher for stored credentials.
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; KEY_LEN],
}

impl CredentialCipher {
    /// Derive the cipher key from the configured secret.
    ///
    /// A missing or blank secret is a configuration error: running without
    /// one would leave credentials unprotected.
    pub fn from_secret(secret: Option<&str>) -> GatewayResult<Self> {
        let secret = secret
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| GatewayError::configuration("encryption secret is not set"))?;

        let params = scrypt::Params::new(KDF_LOG_N, KDF_R, KDF_P, KEY_LEN)
            .map_err(|e| GatewayError::configuration(format!("invalid scrypt parameters: {}", e)))?;

        let mut key = [0u8; KEY_LEN];
        scrypt::scrypt(secret.as_bytes(), KDF_SALT, &params, &mut key)
            .map_err(|e| GatewayError::configuration(format!("key derivation failed: {}", e)))?;

        Ok(Self { key })
    }

    /// Encrypt a plaintext credential.
    pub fn encrypt(&self, plaintext: &str) -> GatewayResult<EncryptedSecret> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|_| GatewayError::configuration("invalid cipher key length"))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        Ok(EncryptedSecret(format!(
            "{}:{}",
            hex::encode(iv),
            hex::encode(ciphertext)
        )))
    }

    /// Decrypt a stored credential.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> GatewayResult<String> {
        let (iv_hex, cipher_hex) = secret
            .as_str()
            .split_once(':')
            .filter(|(iv, ct)| !iv.is_empty() && !ct.is_empty())
            .ok_or_else(|| GatewayError::decryption("malformed secret"))?;

        let iv = hex::decode(iv_hex).map_err(|_| GatewayError::decryption("malformed secret"))?;
        let ciphertext =
            hex::decode(cipher_hex).map_err(|_| GatewayError::decryption("malformed secret"))?;

        let cipher = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|_| GatewayError::decryption("malformed secret"))?;
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| GatewayError::decryption("secret could not be decrypted"))?;

        String::from_utf8(plaintext)
            .map_err(|_| GatewayError::decryption("secret could not be decrypted"))
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CredentialCipher {
        CredentialCipher::from_secret(Some("test-secret")).unwrap()
    }

    #[test]
    fn test_missing_secret_is_configuration_error() {
        let err = CredentialCipher::from_secret(None).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));

        let err = CredentialCipher::from_secret(Some("   ")).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[test]
    fn test_round_trip() {
        let cipher = cipher();
        let long = "x".repeat(100);
        for plaintext in ["", "hunter2", "pässwörd with spaces", long.as_str()] {
            let blob = cipher.encrypt(plaintext).unwrap();
            assert_eq!(cipher.decrypt(&blob).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let cipher = cipher();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), "same");
        assert_eq!(cipher.decrypt(&b).unwrap(), "same");
    }

    #[test]
    fn test_blob_format() {
        let blob = cipher().encrypt("secret").unwrap();
        let (iv, ct) = blob.as_str().split_once(':').unwrap();
        assert_eq!(iv.len(), IV_LEN * 2);
        // One AES block for a short plaintext
        assert_eq!(ct.len(), 32);
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let blob = cipher().encrypt("persisted").unwrap();
        // A fresh cipher from the same secret models a process restart.
        assert_eq!(cipher().decrypt(&blob).unwrap(), "persisted");
    }

    #[test]
    fn test_missing_delimiter_is_decryption_error() {
        let err = cipher()
            .decrypt(&EncryptedSecret::new("deadbeef"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Decryption { .. }));
    }

    #[test]
    fn test_bad_hex_and_iv_length_are_decryption_errors() {
        let cipher = cipher();
        for blob in ["zz:00", "00:zz", "0011:00112233445566778899aabbccddeeff", ":abcd", "abcd:"] {
            let err = cipher.decrypt(&EncryptedSecret::new(blob)).unwrap_err();
            assert!(
                matches!(err, GatewayError::Decryption { .. }),
                "blob {blob:?} should fail as decryption error"
            );
        }
    }

    #[test]
    fn test_wrong_key_fails_without_leaking_details() {
        let blob = cipher().encrypt("secret").unwrap();
        let other = CredentialCipher::from_secret(Some("another-secret")).unwrap();
        // Wrong key almost always breaks the padding; a lucky pad still yields garbage.
        match other.decrypt(&blob) {
            Err(GatewayError::Decryption { reason }) => {
                assert!(!reason.to_lowercase().contains("unpad"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(plain) => assert_ne!(plain, "secret"),
        }
    }

    #[test]
    fn test_debug_does_not_expose_material() {
        let blob = cipher().encrypt("secret").unwrap();
        assert_eq!(format!("{:?}", blob), "EncryptedSecret(..)");
        assert!(!format!("{:?}", cipher()).contains("key"));
    }
}
