//! Cryptographic provider interface for Secure Content
//!
//! The pipeline in [`crate::pipeline`] never touches a cipher directly; it asks
//! a [`CryptoProvider`] for random keys, AEAD encryption and RSA key wrapping.
//! [`RustCryptoProvider`] (feature `crypto`) implements the trait with the
//! RustCrypto crates. Other backends (HSMs, platform keychains) implement the
//! trait themselves.

use crate::error::{Error, Result};
use std::fmt;

/// Length of an AES-256-GCM content key in bytes
pub const CONTENT_KEY_LEN: usize = 32;

/// Length of an AES-GCM nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Length of an AES-GCM authentication tag in bytes
pub const TAG_LEN: usize = 16;

/// Private key material of the consumer decrypting a package
///
/// Supplied by the caller for one read; the keystore never stores it.
#[derive(Clone)]
pub struct ConsumerKey {
    /// Consumer id matched against decrypt rights
    pub consumer_id: String,
    /// RSA private key, PKCS#8 or PKCS#1 PEM
    pub private_key_pem: String,
}

impl ConsumerKey {
    /// Create a consumer key
    pub fn new(consumer_id: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            private_key_pem: private_key_pem.into(),
        }
    }
}

impl fmt::Debug for ConsumerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerKey")
            .field("consumer_id", &self.consumer_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Cryptographic primitives used by the secure content pipeline
///
/// AEAD methods work on AES-256-GCM with the ciphertext and tag concatenated.
/// The RSA methods default to [`Error::ShouldNotBeCalled`] so a provider that
/// only implements content encryption reports a clear error when a decrypt
/// right needs key wrapping.
pub trait CryptoProvider: Send + Sync {
    /// Fresh random content key of [`CONTENT_KEY_LEN`] bytes
    fn generate_content_key(&self) -> Result<Vec<u8>>;

    /// Fresh random nonce of [`NONCE_LEN`] bytes
    fn generate_nonce(&self) -> Result<Vec<u8>>;

    /// Encrypt and return `ciphertext || tag`
    fn aead_encrypt(&self, key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Authenticate and decrypt `ciphertext || tag`
    ///
    /// Must fail with [`Error::DecryptionFailed`] when authentication fails.
    fn aead_decrypt(&self, key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Wrap `key` for the holder of `public_key_pem` using RSA-OAEP (MGF1, SHA-1)
    fn rsa_wrap(&self, public_key_pem: &str, key: &[u8]) -> Result<Vec<u8>> {
        let _ = (public_key_pem, key);
        Err(Error::ShouldNotBeCalled(
            "this crypto provider does not implement RSA-OAEP key wrapping".to_string(),
        ))
    }

    /// Unwrap a key wrapped by [`CryptoProvider::rsa_wrap`]
    fn rsa_unwrap(&self, private_key_pem: &str, wrapped: &[u8]) -> Result<Vec<u8>> {
        let _ = (private_key_pem, wrapped);
        Err(Error::ShouldNotBeCalled(
            "this crypto provider does not implement RSA-OAEP key unwrapping".to_string(),
        ))
    }
}

#[cfg(feature = "crypto")]
pub use rustcrypto::RustCryptoProvider;

#[cfg(feature = "crypto")]
mod rustcrypto {
    use super::{CONTENT_KEY_LEN, CryptoProvider, NONCE_LEN};
    use crate::error::{Error, Result};
    use aes_gcm::{
        Aes256Gcm, Nonce,
        aead::{Aead, KeyInit},
    };
    use rand::RngCore;
    use rand::rngs::OsRng;
    use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
    use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
    use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
    use sha1::Sha1;

    /// [`CryptoProvider`] backed by `aes-gcm`, `rsa` and the OS random source
    #[derive(Debug, Clone, Copy, Default)]
    pub struct RustCryptoProvider;

    impl RustCryptoProvider {
        /// Create the provider
        pub fn new() -> Self {
            Self
        }
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }

    fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(key).map_err(|_| {
            Error::InvalidKeyMaterial(format!(
                "AES-256-GCM key must be {} bytes, got {}",
                CONTENT_KEY_LEN,
                key.len()
            ))
        })
    }

    fn check_nonce(nonce: &[u8]) -> Result<()> {
        if nonce.len() == NONCE_LEN {
            Ok(())
        } else {
            Err(Error::InvalidKeyMaterial(format!(
                "AES-GCM nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce.len()
            )))
        }
    }

    fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
        RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| Error::InvalidKeyMaterial(format!("Invalid RSA public key: {}", e)))
    }

    fn parse_private_key(pem: &str) -> Result<RsaPrivateKey> {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| Error::InvalidKeyMaterial(format!("Invalid RSA private key: {}", e)))
    }

    impl CryptoProvider for RustCryptoProvider {
        fn generate_content_key(&self) -> Result<Vec<u8>> {
            Ok(random_bytes(CONTENT_KEY_LEN))
        }

        fn generate_nonce(&self) -> Result<Vec<u8>> {
            Ok(random_bytes(NONCE_LEN))
        }

        fn aead_encrypt(&self, key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
            check_nonce(nonce)?;
            cipher(key)?
                .encrypt(Nonce::from_slice(nonce), plaintext)
                .map_err(|e| Error::InvalidKeyMaterial(format!("AES-GCM encryption failed: {}", e)))
        }

        fn aead_decrypt(&self, key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
            check_nonce(nonce)?;
            cipher(key)?
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| {
                    Error::DecryptionFailed(
                        "AES-GCM authentication failed; content is tampered or the key is wrong"
                            .to_string(),
                    )
                })
        }

        fn rsa_wrap(&self, public_key_pem: &str, key: &[u8]) -> Result<Vec<u8>> {
            let public_key = parse_public_key(public_key_pem)?;
            public_key
                .encrypt(&mut OsRng, Oaep::new::<Sha1>(), key)
                .map_err(|e| Error::InvalidKeyMaterial(format!("RSA-OAEP wrap failed: {}", e)))
        }

        fn rsa_unwrap(&self, private_key_pem: &str, wrapped: &[u8]) -> Result<Vec<u8>> {
            let private_key = parse_private_key(private_key_pem)?;
            private_key
                .decrypt(Oaep::new::<Sha1>(), wrapped)
                .map_err(|e| Error::DecryptionFailed(format!("RSA-OAEP unwrap failed: {}", e)))
        }
    }
}
