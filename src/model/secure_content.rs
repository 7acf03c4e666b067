//! Secure Content keystore
//!
//! The [`KeyStore`] records which package parts are encrypted, how, and which
//! consumers may unwrap each part's content key. It holds only public key
//! material: wrapped content keys and consumer public keys. Private keys are
//! supplied by the caller at decryption time and never stored here.

use crate::error::{Error, Result};
use crate::package::normalize_part_path;
use std::fmt;

/// Encryption algorithm identifiers recognised in the keystore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncryptionAlgorithm {
    /// AES-256 in Galois/Counter Mode (`AES256-GCM`)
    #[default]
    Aes256Gcm,
    /// RSA-OAEP with MGF1 and SHA-1 (`RSA-OAEP-MGF1P`)
    RsaOaepMgf1p,
}

impl EncryptionAlgorithm {
    /// Exact XML token
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::Aes256Gcm => "AES256-GCM",
            EncryptionAlgorithm::RsaOaepMgf1p => "RSA-OAEP-MGF1P",
        }
    }

    /// Parse an XML token; matching is case-sensitive
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "AES256-GCM" => Some(EncryptionAlgorithm::Aes256Gcm),
            "RSA-OAEP-MGF1P" => Some(EncryptionAlgorithm::RsaOaepMgf1p),
            _ => None,
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A party allowed to decrypt protected content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    /// Unique consumer identifier
    pub consumer_id: String,
    /// Optional identifier of the consumer's key
    pub key_id: Option<String>,
    /// Optional PEM public key used to wrap content keys for this consumer
    pub key_value: Option<String>,
}

impl Consumer {
    /// Consumer with an id and nothing else
    pub fn new(consumer_id: impl Into<String>) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            key_id: None,
            key_value: None,
        }
    }

    /// Builder-style key id
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Builder-style PEM public key
    pub fn with_key_value(mut self, pem: impl Into<String>) -> Self {
        self.key_value = Some(pem.into());
        self
    }
}

/// Authorization for one consumer to unwrap one part's content key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptRight {
    /// Consumer this right belongs to
    pub consumer_id: String,
    /// Algorithm that wrapped the content key
    pub encryption_algorithm: EncryptionAlgorithm,
    /// Wrapped content key; empty while the right is pending encryption
    pub cipher_value: Vec<u8>,
}

impl DecryptRight {
    /// True until the pipeline has wrapped a content key for this right
    pub fn is_pending(&self) -> bool {
        self.cipher_value.is_empty()
    }
}

/// Encryption descriptor for one package part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceData {
    /// Absolute part path, unique within the keystore
    pub path: String,
    /// Content encryption algorithm
    pub encryption_algorithm: EncryptionAlgorithm,
    /// Whether the plaintext is deflated before encryption
    pub compression: bool,
    /// Decrypt rights in the order they were added
    pub decrypt_rights: Vec<DecryptRight>,
}

impl ResourceData {
    /// Descriptor without decrypt rights
    pub fn new(
        path: impl Into<String>,
        encryption_algorithm: EncryptionAlgorithm,
        compression: bool,
    ) -> Self {
        Self {
            path: path.into(),
            encryption_algorithm,
            compression,
            decrypt_rights: Vec::new(),
        }
    }

    /// Decrypt right for `consumer_id`
    pub fn decrypt_right(&self, consumer_id: &str) -> Option<&DecryptRight> {
        self.decrypt_rights
            .iter()
            .find(|r| r.consumer_id == consumer_id)
    }
}

/// Handle to a resource data entry, returned by [`KeyStore::add_resource_data`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDataHandle {
    path: String,
}

impl ResourceDataHandle {
    /// Path of the entry this handle refers to
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Per-package encryption descriptors and consumer registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStore {
    uuid: Option<String>,
    consumers: Vec<Consumer>,
    resource_data: Vec<ResourceData>,
}

impl KeyStore {
    /// Empty keystore
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no part is flagged for encryption and no consumer is known
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty() && self.resource_data.is_empty()
    }

    /// Keystore UUID
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// Set the keystore UUID
    pub fn set_uuid(&mut self, uuid: Option<String>) {
        self.uuid = uuid;
    }

    /// Register a consumer
    pub fn add_consumer(&mut self, consumer: Consumer) -> Result<()> {
        if consumer.consumer_id.is_empty() {
            return Err(Error::InvalidConsumer(
                "consumer id must not be empty".to_string(),
            ));
        }
        if self.consumer(&consumer.consumer_id).is_some() {
            return Err(Error::InvalidConsumer(format!(
                "consumer '{}' is already registered",
                consumer.consumer_id
            )));
        }
        self.consumers.push(consumer);
        Ok(())
    }

    /// Registered consumer by id
    pub fn consumer(&self, consumer_id: &str) -> Option<&Consumer> {
        self.consumers.iter().find(|c| c.consumer_id == consumer_id)
    }

    pub(crate) fn consumer_mut(&mut self, consumer_id: &str) -> Option<&mut Consumer> {
        self.consumers
            .iter_mut()
            .find(|c| c.consumer_id == consumer_id)
    }

    /// Consumers in registration order
    pub fn consumers(&self) -> &[Consumer] {
        &self.consumers
    }

    /// Flag `path` for encryption
    ///
    /// Fails with [`Error::DuplicateResourceDataPath`] when the path is already
    /// registered.
    pub fn add_resource_data(
        &mut self,
        path: &str,
        encryption_algorithm: EncryptionAlgorithm,
        compression: bool,
    ) -> Result<ResourceDataHandle> {
        self.commit_resource_data(ResourceData::new(path, encryption_algorithm, compression))
    }

    /// Insert a fully built entry after checking every keystore invariant
    ///
    /// Nothing is inserted when any check fails.
    pub fn commit_resource_data(&mut self, mut data: ResourceData) -> Result<ResourceDataHandle> {
        if data.path.trim_start_matches('/').is_empty() {
            return Err(Error::InvalidParam(
                "resource data path must not be empty".to_string(),
            ));
        }
        data.path = normalize_part_path(&data.path);
        if self.resource_data(&data.path).is_some() {
            return Err(Error::DuplicateResourceDataPath(data.path));
        }
        for (index, right) in data.decrypt_rights.iter().enumerate() {
            self.check_consumer(&right.consumer_id)?;
            if data.decrypt_rights[..index]
                .iter()
                .any(|r| r.consumer_id == right.consumer_id)
            {
                return Err(Error::InvalidConsumer(format!(
                    "consumer '{}' already has a decrypt right for '{}'",
                    right.consumer_id, data.path
                )));
            }
            if right.cipher_value.is_empty() {
                return Err(Error::InvalidKeyMaterial(format!(
                    "decrypt right for consumer '{}' on '{}' has an empty cipher value",
                    right.consumer_id, data.path
                )));
            }
        }
        let handle = ResourceDataHandle {
            path: data.path.clone(),
        };
        self.resource_data.push(data);
        Ok(handle)
    }

    /// Append a decrypt right carrying an already wrapped content key
    pub fn add_decrypt_right(
        &mut self,
        handle: &ResourceDataHandle,
        consumer_id: &str,
        encryption_algorithm: EncryptionAlgorithm,
        cipher_value: Vec<u8>,
    ) -> Result<()> {
        self.check_consumer(consumer_id)?;
        if cipher_value.is_empty() {
            return Err(Error::InvalidKeyMaterial(format!(
                "decrypt right for consumer '{}' has an empty cipher value",
                consumer_id
            )));
        }
        self.push_right(handle, consumer_id, encryption_algorithm, cipher_value)
    }

    /// Append a pending decrypt right; the pipeline fills in the wrapped key
    /// when the part is encrypted
    pub fn grant_access(
        &mut self,
        handle: &ResourceDataHandle,
        consumer_id: &str,
        encryption_algorithm: EncryptionAlgorithm,
    ) -> Result<()> {
        self.check_consumer(consumer_id)?;
        self.push_right(handle, consumer_id, encryption_algorithm, Vec::new())
    }

    fn push_right(
        &mut self,
        handle: &ResourceDataHandle,
        consumer_id: &str,
        encryption_algorithm: EncryptionAlgorithm,
        cipher_value: Vec<u8>,
    ) -> Result<()> {
        let data = self.entry_mut(handle.path())?;
        if data.decrypt_right(consumer_id).is_some() {
            return Err(Error::InvalidConsumer(format!(
                "consumer '{}' already has a decrypt right for '{}'",
                consumer_id, data.path
            )));
        }
        data.decrypt_rights.push(DecryptRight {
            consumer_id: consumer_id.to_string(),
            encryption_algorithm,
            cipher_value,
        });
        Ok(())
    }

    fn check_consumer(&self, consumer_id: &str) -> Result<()> {
        if consumer_id.is_empty() {
            return Err(Error::InvalidConsumer(
                "consumer id must not be empty".to_string(),
            ));
        }
        if self.consumer(consumer_id).is_none() {
            return Err(Error::InvalidConsumer(format!(
                "consumer '{}' is not registered",
                consumer_id
            )));
        }
        Ok(())
    }

    /// Entry for `path`, with or without the leading slash
    pub fn resource_data(&self, path: &str) -> Option<&ResourceData> {
        let path = normalize_part_path(path);
        self.resource_data.iter().find(|d| d.path == path)
    }

    pub(crate) fn entry_mut(&mut self, path: &str) -> Result<&mut ResourceData> {
        let normalized = normalize_part_path(path);
        self.resource_data
            .iter_mut()
            .find(|d| d.path == normalized)
            .ok_or_else(|| Error::InvalidParam(format!("no resource data for path '{}'", path)))
    }

    /// Entries in insertion order
    pub fn resource_data_entries(&self) -> &[ResourceData] {
        &self.resource_data
    }

    /// Remove the entry for `path`
    pub fn remove_resource_data(&mut self, path: &str) -> Option<ResourceData> {
        let path = normalize_part_path(path);
        let index = self.resource_data.iter().position(|d| d.path == path)?;
        Some(self.resource_data.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keystore_with_consumer() -> KeyStore {
        let mut ks = KeyStore::new();
        ks.add_consumer(Consumer::new("c1")).unwrap();
        ks
    }

    #[test]
    fn test_algorithm_tokens_are_case_sensitive() {
        assert_eq!(
            EncryptionAlgorithm::from_token("AES256-GCM"),
            Some(EncryptionAlgorithm::Aes256Gcm)
        );
        assert_eq!(
            EncryptionAlgorithm::from_token("RSA-OAEP-MGF1P"),
            Some(EncryptionAlgorithm::RsaOaepMgf1p)
        );
        assert_eq!(EncryptionAlgorithm::from_token("aes256-gcm"), None);
    }

    #[test]
    fn test_duplicate_path() {
        let mut ks = KeyStore::new();
        ks.add_resource_data("/3D/3dmodel.model", EncryptionAlgorithm::Aes256Gcm, true)
            .unwrap();
        let err = ks
            .add_resource_data("/3D/3dmodel.model", EncryptionAlgorithm::Aes256Gcm, false)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateResourceDataPath(ref p) if p == "/3D/3dmodel.model"));
        assert_eq!(ks.resource_data_entries().len(), 1);
        assert!(ks.resource_data("/3D/3dmodel.model").unwrap().compression);
    }

    #[test]
    fn test_paths_are_normalized() {
        let mut ks = keystore_with_consumer();
        let handle = ks
            .add_resource_data("3D/tex.png", EncryptionAlgorithm::Aes256Gcm, false)
            .unwrap();
        assert_eq!(handle.path(), "/3D/tex.png");

        let err = ks
            .add_resource_data("/3D/tex.png", EncryptionAlgorithm::Aes256Gcm, false)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateResourceDataPath(ref p) if p == "/3D/tex.png"));
        assert!(ks.resource_data("3D/tex.png").is_some());
        assert!(matches!(
            ks.add_resource_data("/", EncryptionAlgorithm::Aes256Gcm, false),
            Err(Error::InvalidParam(_))
        ));

        ks.add_decrypt_right(&handle, "c1", EncryptionAlgorithm::RsaOaepMgf1p, vec![1])
            .unwrap();
        assert!(ks.remove_resource_data("3D/tex.png").is_some());
        assert!(ks.resource_data_entries().is_empty());
    }

    #[test]
    fn test_commit_rejects_repeated_consumer() {
        let mut ks = keystore_with_consumer();
        let mut data = ResourceData::new("/3D/a.model", EncryptionAlgorithm::Aes256Gcm, false);
        for cipher in [vec![1], vec![2]] {
            data.decrypt_rights.push(DecryptRight {
                consumer_id: "c1".into(),
                encryption_algorithm: EncryptionAlgorithm::RsaOaepMgf1p,
                cipher_value: cipher,
            });
        }
        assert!(matches!(
            ks.commit_resource_data(data),
            Err(Error::InvalidConsumer(_))
        ));
        assert!(ks.resource_data_entries().is_empty());
    }

    #[test]
    fn test_add_decrypt_right_checks_consumer_and_key() {
        let mut ks = keystore_with_consumer();
        let handle = ks
            .add_resource_data("/3D/a.model", EncryptionAlgorithm::Aes256Gcm, false)
            .unwrap();

        let empty = ks.add_decrypt_right(&handle, "", EncryptionAlgorithm::RsaOaepMgf1p, vec![1]);
        assert!(matches!(empty, Err(Error::InvalidConsumer(_))));

        let unknown =
            ks.add_decrypt_right(&handle, "c9", EncryptionAlgorithm::RsaOaepMgf1p, vec![1]);
        assert!(matches!(unknown, Err(Error::InvalidConsumer(_))));

        let no_key = ks.add_decrypt_right(&handle, "c1", EncryptionAlgorithm::RsaOaepMgf1p, vec![]);
        assert!(matches!(no_key, Err(Error::InvalidKeyMaterial(_))));

        ks.add_decrypt_right(&handle, "c1", EncryptionAlgorithm::RsaOaepMgf1p, vec![7, 8])
            .unwrap();
        let entry = ks.resource_data("/3D/a.model").unwrap();
        assert_eq!(entry.decrypt_rights.len(), 1);
        assert_eq!(entry.decrypt_rights[0].cipher_value, vec![7, 8]);
    }

    #[test]
    fn test_commit_is_atomic() {
        let mut ks = keystore_with_consumer();
        let mut data = ResourceData::new("/3D/a.model", EncryptionAlgorithm::Aes256Gcm, false);
        data.decrypt_rights.push(DecryptRight {
            consumer_id: "nobody".into(),
            encryption_algorithm: EncryptionAlgorithm::RsaOaepMgf1p,
            cipher_value: vec![1],
        });
        assert!(ks.commit_resource_data(data).is_err());
        assert!(ks.resource_data("/3D/a.model").is_none());
    }

    #[test]
    fn test_grant_access_creates_pending_right() {
        let mut ks = keystore_with_consumer();
        let handle = ks
            .add_resource_data("/3D/a.model", EncryptionAlgorithm::Aes256Gcm, false)
            .unwrap();
        ks.grant_access(&handle, "c1", EncryptionAlgorithm::RsaOaepMgf1p)
            .unwrap();
        let right = &ks.resource_data("/3D/a.model").unwrap().decrypt_rights[0];
        assert!(right.is_pending());

        let twice = ks.grant_access(&handle, "c1", EncryptionAlgorithm::RsaOaepMgf1p);
        assert!(matches!(twice, Err(Error::InvalidConsumer(_))));
    }

    #[test]
    fn test_consumer_registry() {
        let mut ks = keystore_with_consumer();
        assert!(matches!(
            ks.add_consumer(Consumer::new("c1")),
            Err(Error::InvalidConsumer(_))
        ));
        assert!(matches!(
            ks.add_consumer(Consumer::new("")),
            Err(Error::InvalidConsumer(_))
        ));
        ks.add_consumer(Consumer::new("c2").with_key_id("k2"))
            .unwrap();
        assert_eq!(ks.consumers().len(), 2);
        assert_eq!(ks.consumer("c2").unwrap().key_id.as_deref(), Some("k2"));
    }
}
