//! Secure content pipeline
//!
//! Encrypts and decrypts part bytes according to the [`KeyStore`]. An
//! encrypted part is laid out as `nonce (12) || ciphertext || tag (16)`.
//! When the resource data entry asks for compression the plaintext is raw
//! deflated before encryption and inflated after decryption.
//!
//! Each part gets a fresh content key. The key is wrapped once per decrypt
//! right with the consumer's RSA public key from the keystore, and the
//! wrapped bytes become that right's cipher value.

use crate::crypto::{CONTENT_KEY_LEN, ConsumerKey, CryptoProvider, NONCE_LEN, TAG_LEN};
use crate::error::{Error, Result};
use crate::model::{EncryptionAlgorithm, KeyStore, ResourceData};
use crate::package::Package;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::borrow::Cow;
use std::io::{Read, Write};
use tracing::debug;

/// Orchestrates part encryption over a [`CryptoProvider`]
pub struct SecureContentPipeline<'a> {
    provider: &'a dyn CryptoProvider,
}

impl<'a> SecureContentPipeline<'a> {
    /// Pipeline using `provider` for every primitive
    pub fn new(provider: &'a dyn CryptoProvider) -> Self {
        Self { provider }
    }

    /// Encrypt the bytes of the part at `path`
    ///
    /// Fills in the cipher value of every decrypt right of the entry. Fails
    /// without touching the keystore when the entry is missing
    /// ([`Error::InvalidParam`]), has no decrypt rights
    /// ([`Error::InvalidConsumer`]) or a consumer has no public key
    /// ([`Error::InvalidKeyMaterial`]).
    pub fn encrypt_part(
        &self,
        keystore: &mut KeyStore,
        path: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let entry = entry(keystore, path)?;
        check_content_algorithm(entry)?;
        if entry.decrypt_rights.is_empty() {
            return Err(Error::InvalidConsumer(format!(
                "'{}' has no decrypt rights; the content key would be unrecoverable",
                path
            )));
        }

        let mut recipients = Vec::with_capacity(entry.decrypt_rights.len());
        for right in &entry.decrypt_rights {
            let public_key = keystore
                .consumer(&right.consumer_id)
                .and_then(|c| c.key_value.as_deref())
                .filter(|pem| !pem.trim().is_empty())
                .ok_or_else(|| {
                    Error::InvalidKeyMaterial(format!(
                        "consumer '{}' has no public key to wrap the content key of '{}'",
                        right.consumer_id, path
                    ))
                })?;
            recipients.push((right.encryption_algorithm, public_key));
        }

        let payload = if entry.compression {
            Cow::Owned(deflate(plaintext)?)
        } else {
            Cow::Borrowed(plaintext)
        };

        let content_key = self.provider.generate_content_key()?;
        expect_len("content key", &content_key, CONTENT_KEY_LEN)?;
        let nonce = self.provider.generate_nonce()?;
        expect_len("nonce", &nonce, NONCE_LEN)?;
        let sealed = self.provider.aead_encrypt(&content_key, &nonce, &payload)?;

        let wrapped = recipients
            .iter()
            .map(|(algorithm, public_key)| self.wrap(*algorithm, public_key, &content_key))
            .collect::<Result<Vec<_>>>()?;
        let consumers = recipients.len();

        let entry = keystore.entry_mut(path)?;
        for (right, cipher_value) in entry.decrypt_rights.iter_mut().zip(wrapped) {
            right.cipher_value = cipher_value;
        }

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        debug!(
            path,
            plaintext_len = plaintext.len(),
            encrypted_len = out.len(),
            consumers,
            "encrypted part"
        );
        Ok(out)
    }

    /// Decrypt the bytes of the part at `path` as the holder of `key`
    ///
    /// Fails with [`Error::DecryptionFailed`] when the consumer has no decrypt
    /// right, the key does not unwrap, or authentication fails.
    pub fn decrypt_part(
        &self,
        keystore: &KeyStore,
        path: &str,
        data: &[u8],
        key: &ConsumerKey,
    ) -> Result<Vec<u8>> {
        let entry = entry(keystore, path)?;
        check_content_algorithm(entry)?;
        let right = entry.decrypt_right(&key.consumer_id).ok_or_else(|| {
            Error::DecryptionFailed(format!(
                "consumer '{}' is not authorized to decrypt '{}'",
                key.consumer_id, path
            ))
        })?;
        if right.is_pending() {
            return Err(Error::InvalidKeyMaterial(format!(
                "decrypt right for consumer '{}' on '{}' has no wrapped key",
                key.consumer_id, path
            )));
        }

        let content_key = match right.encryption_algorithm {
            EncryptionAlgorithm::RsaOaepMgf1p => self
                .provider
                .rsa_unwrap(&key.private_key_pem, &right.cipher_value)?,
            EncryptionAlgorithm::Aes256Gcm => {
                return Err(Error::Unsupported(format!(
                    "decrypt right for consumer '{}' uses AES256-GCM key wrapping",
                    key.consumer_id
                )));
            }
        };

        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::DecryptionFailed(format!(
                "'{}' is truncated: {} bytes",
                path,
                data.len()
            )));
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let payload = self.provider.aead_decrypt(&content_key, nonce, sealed)?;

        let plaintext = if entry.compression {
            inflate(&payload)?
        } else {
            payload
        };
        debug!(path, consumer = %key.consumer_id, plaintext_len = plaintext.len(), "decrypted part");
        Ok(plaintext)
    }

    /// Encrypt every part listed in the keystore
    ///
    /// All parts are encrypted before any is replaced, so on error the package
    /// still holds plaintext.
    pub fn encrypt_package(&self, keystore: &mut KeyStore, package: &mut Package) -> Result<()> {
        let paths = keystore_paths(keystore, package)?;
        let mut sealed = Vec::with_capacity(paths.len());
        for path in paths {
            let plaintext = package
                .part(&path)
                .ok_or_else(|| Error::MissingPart(path.clone()))?;
            let bytes = self.encrypt_part(keystore, &path, plaintext)?;
            sealed.push((path, bytes));
        }
        for (path, bytes) in sealed {
            package.insert_part(&path, bytes);
        }
        Ok(())
    }

    /// Decrypt every part listed in the keystore
    pub fn decrypt_package(
        &self,
        keystore: &KeyStore,
        package: &mut Package,
        key: &ConsumerKey,
    ) -> Result<()> {
        let paths = keystore_paths(keystore, package)?;
        let mut opened = Vec::with_capacity(paths.len());
        for path in paths {
            let data = package
                .part(&path)
                .ok_or_else(|| Error::MissingPart(path.clone()))?;
            let bytes = self.decrypt_part(keystore, &path, data, key)?;
            opened.push((path, bytes));
        }
        for (path, bytes) in opened {
            package.insert_part(&path, bytes);
        }
        Ok(())
    }

    fn wrap(
        &self,
        algorithm: EncryptionAlgorithm,
        public_key: &str,
        content_key: &[u8],
    ) -> Result<Vec<u8>> {
        match algorithm {
            EncryptionAlgorithm::RsaOaepMgf1p => self.provider.rsa_wrap(public_key, content_key),
            EncryptionAlgorithm::Aes256Gcm => Err(Error::Unsupported(
                "AES256-GCM is a content algorithm and cannot wrap keys for a consumer".to_string(),
            )),
        }
    }
}

fn entry<'k>(keystore: &'k KeyStore, path: &str) -> Result<&'k ResourceData> {
    keystore
        .resource_data(path)
        .ok_or_else(|| Error::InvalidParam(format!("no resource data for path '{}'", path)))
}

fn check_content_algorithm(entry: &ResourceData) -> Result<()> {
    match entry.encryption_algorithm {
        EncryptionAlgorithm::Aes256Gcm => Ok(()),
        other => Err(Error::Unsupported(format!(
            "content of '{}' cannot be encrypted with {}",
            entry.path, other
        ))),
    }
}

fn keystore_paths(keystore: &KeyStore, package: &Package) -> Result<Vec<String>> {
    keystore
        .resource_data_entries()
        .iter()
        .map(|d| {
            if package.has_part(&d.path) {
                Ok(d.path.clone())
            } else {
                Err(Error::MissingPart(format!(
                    "keystore lists '{}' but the package has no such part",
                    d.path
                )))
            }
        })
        .collect()
}

fn expect_len(what: &str, bytes: &[u8], len: usize) -> Result<()> {
    if bytes.len() == len {
        Ok(())
    } else {
        Err(Error::InvalidKeyMaterial(format!(
            "provider returned a {}-byte {}, expected {}",
            bytes.len(),
            what,
            len
        )))
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::DecryptionFailed(format!("Decompression failed: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Consumer;

    /// Deterministic provider: XOR "encryption" with a checksum tag and
    /// reversible key wrapping keyed by the PEM text
    struct MockProvider;

    impl CryptoProvider for MockProvider {
        fn generate_content_key(&self) -> Result<Vec<u8>> {
            Ok((0..CONTENT_KEY_LEN as u8).collect())
        }
        fn generate_nonce(&self) -> Result<Vec<u8>> {
            Ok(vec![9; NONCE_LEN])
        }
        fn aead_encrypt(&self, key: &[u8], _nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
            let mut out: Vec<u8> = plaintext
                .iter()
                .zip(key.iter().cycle())
                .map(|(p, k)| p ^ k)
                .collect();
            let sum = plaintext.iter().fold(0u8, |a, b| a.wrapping_add(*b));
            out.extend(std::iter::repeat_n(sum, TAG_LEN));
            Ok(out)
        }
        fn aead_decrypt(&self, key: &[u8], _nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
            let (body, tag) = ciphertext.split_at(ciphertext.len() - TAG_LEN);
            let plain: Vec<u8> = body
                .iter()
                .zip(key.iter().cycle())
                .map(|(c, k)| c ^ k)
                .collect();
            let sum = plain.iter().fold(0u8, |a, b| a.wrapping_add(*b));
            if tag.iter().all(|t| *t == sum) {
                Ok(plain)
            } else {
                Err(Error::DecryptionFailed("tag mismatch".into()))
            }
        }
        fn rsa_wrap(&self, public_key_pem: &str, key: &[u8]) -> Result<Vec<u8>> {
            let mut out = public_key_pem.as_bytes().to_vec();
            out.extend_from_slice(key);
            Ok(out)
        }
        fn rsa_unwrap(&self, private_key_pem: &str, wrapped: &[u8]) -> Result<Vec<u8>> {
            wrapped
                .strip_prefix(private_key_pem.as_bytes())
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::DecryptionFailed("wrong key".into()))
        }
    }

    fn keystore(compression: bool) -> KeyStore {
        let mut ks = KeyStore::new();
        ks.add_consumer(Consumer::new("c1").with_key_value("KEY1"))
            .unwrap();
        let handle = ks
            .add_resource_data(
                "/3D/3dmodel.model",
                EncryptionAlgorithm::Aes256Gcm,
                compression,
            )
            .unwrap();
        ks.grant_access(&handle, "c1", EncryptionAlgorithm::RsaOaepMgf1p)
            .unwrap();
        ks
    }

    #[test]
    fn test_round_trip_with_compression() {
        let provider = MockProvider;
        let pipeline = SecureContentPipeline::new(&provider);
        let mut ks = keystore(true);
        let plaintext = b"<model>".repeat(50);

        let sealed = pipeline
            .encrypt_part(&mut ks, "/3D/3dmodel.model", &plaintext)
            .unwrap();
        assert_eq!(&sealed[..NONCE_LEN], &[9; NONCE_LEN]);
        assert!(sealed.len() < plaintext.len());
        let right = &ks.resource_data("/3D/3dmodel.model").unwrap().decrypt_rights[0];
        assert!(!right.is_pending());

        let key = ConsumerKey::new("c1", "KEY1");
        let opened = pipeline
            .decrypt_part(&ks, "/3D/3dmodel.model", &sealed, &key)
            .unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_missing_public_key_leaves_keystore_untouched() {
        let provider = MockProvider;
        let pipeline = SecureContentPipeline::new(&provider);
        let mut ks = KeyStore::new();
        ks.add_consumer(Consumer::new("c1")).unwrap();
        let handle = ks
            .add_resource_data("/a", EncryptionAlgorithm::Aes256Gcm, false)
            .unwrap();
        ks.grant_access(&handle, "c1", EncryptionAlgorithm::RsaOaepMgf1p)
            .unwrap();
        let before = ks.clone();
        assert!(matches!(
            pipeline.encrypt_part(&mut ks, "/a", b"x"),
            Err(Error::InvalidKeyMaterial(_))
        ));
        assert_eq!(ks, before);
    }

    #[test]
    fn test_unknown_path_and_no_rights() {
        let provider = MockProvider;
        let pipeline = SecureContentPipeline::new(&provider);
        let mut ks = KeyStore::new();
        assert!(matches!(
            pipeline.encrypt_part(&mut ks, "/nope", b"x"),
            Err(Error::InvalidParam(_))
        ));
        ks.add_resource_data("/a", EncryptionAlgorithm::Aes256Gcm, false)
            .unwrap();
        assert!(matches!(
            pipeline.encrypt_part(&mut ks, "/a", b"x"),
            Err(Error::InvalidConsumer(_))
        ));
    }

    #[test]
    fn test_rsa_content_algorithm_is_unsupported() {
        let provider = MockProvider;
        let pipeline = SecureContentPipeline::new(&provider);
        let mut ks = KeyStore::new();
        ks.add_resource_data("/a", EncryptionAlgorithm::RsaOaepMgf1p, false)
            .unwrap();
        assert!(matches!(
            pipeline.encrypt_part(&mut ks, "/a", b"x"),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_truncated_and_unauthorized() {
        let provider = MockProvider;
        let pipeline = SecureContentPipeline::new(&provider);
        let mut ks = keystore(false);
        let sealed = pipeline
            .encrypt_part(&mut ks, "/3D/3dmodel.model", b"abc")
            .unwrap();
        let key = ConsumerKey::new("c1", "KEY1");
        assert!(matches!(
            pipeline.decrypt_part(&ks, "/3D/3dmodel.model", &sealed[..10], &key),
            Err(Error::DecryptionFailed(_))
        ));
        let stranger = ConsumerKey::new("c2", "KEY1");
        assert!(matches!(
            pipeline.decrypt_part(&ks, "/3D/3dmodel.model", &sealed, &stranger),
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_package_requires_every_keystore_part() {
        let provider = MockProvider;
        let pipeline = SecureContentPipeline::new(&provider);
        let mut ks = keystore(false);
        let mut package = Package::new();
        package.insert_part("/3D/other.model", b"x".to_vec());
        assert!(matches!(
            pipeline.encrypt_package(&mut ks, &mut package),
            Err(Error::MissingPart(_))
        ));

        package.insert_part("/3D/3dmodel.model", b"<model/>".to_vec());
        pipeline.encrypt_package(&mut ks, &mut package).unwrap();
        assert_ne!(package.part("/3D/3dmodel.model").unwrap(), b"<model/>");
        assert_eq!(package.part("/3D/other.model").unwrap(), b"x");

        pipeline
            .decrypt_package(&ks, &mut package, &ConsumerKey::new("c1", "KEY1"))
            .unwrap();
        assert_eq!(package.part("/3D/3dmodel.model").unwrap(), b"<model/>");
    }
}
