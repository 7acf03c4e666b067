//! Integration tests for the Secure Content keystore
//!
//! Exercises the keystore API and the lenient keystore reader without any
//! cryptography.

use lib3mf_core::parser::read_keystore;
use lib3mf_core::{
    Consumer, EncryptionAlgorithm, Error, KeyStore, ParserConfig, ResourceData, WarningCode,
    WarningLevel, Warnings,
};

const SC_NAMESPACE: &str = "http://schemas.microsoft.com/3dmanufacturing/securecontent/2019/07";

fn parse(xml: &str) -> lib3mf_core::Result<(KeyStore, Warnings)> {
    let mut keystore = KeyStore::new();
    let mut warnings = Warnings::new();
    read_keystore(
        xml.as_bytes(),
        &mut keystore,
        &ParserConfig::default(),
        &mut warnings,
    )?;
    Ok((keystore, warnings))
}

#[test]
fn test_consumer_registration() {
    let mut keystore = KeyStore::new();
    assert!(keystore.is_empty());
    keystore
        .add_consumer(Consumer::new("c1").with_key_id("k1"))
        .unwrap();
    assert!(matches!(
        keystore.add_consumer(Consumer::new("c1")),
        Err(Error::InvalidConsumer(_))
    ));
    assert!(matches!(
        keystore.add_consumer(Consumer::new("")),
        Err(Error::InvalidConsumer(_))
    ));
    assert_eq!(keystore.consumers().len(), 1);
    assert_eq!(keystore.consumer("c1").unwrap().key_id.as_deref(), Some("k1"));
    assert!(!keystore.is_empty());
}

#[test]
fn test_resource_data_paths_are_unique() {
    let mut keystore = KeyStore::new();
    let handle = keystore
        .add_resource_data("/3D/3dmodel.model", EncryptionAlgorithm::Aes256Gcm, true)
        .unwrap();
    assert_eq!(handle.path(), "/3D/3dmodel.model");

    assert!(matches!(
        keystore.add_resource_data("/3D/3dmodel.model", EncryptionAlgorithm::Aes256Gcm, false),
        Err(Error::DuplicateResourceDataPath(path)) if path == "/3D/3dmodel.model"
    ));
    assert!(matches!(
        keystore.add_resource_data("", EncryptionAlgorithm::Aes256Gcm, false),
        Err(Error::InvalidParam(_))
    ));

    let removed = keystore.remove_resource_data("/3D/3dmodel.model").unwrap();
    assert!(removed.compression);
    keystore
        .add_resource_data("/3D/3dmodel.model", EncryptionAlgorithm::Aes256Gcm, false)
        .unwrap();
}

#[test]
fn test_decrypt_rights_need_registered_consumers_and_keys() {
    let mut keystore = KeyStore::new();
    keystore.add_consumer(Consumer::new("c1")).unwrap();
    let handle = keystore
        .add_resource_data("/3D/3dmodel.model", EncryptionAlgorithm::Aes256Gcm, false)
        .unwrap();

    assert!(matches!(
        keystore.add_decrypt_right(&handle, "nobody", EncryptionAlgorithm::RsaOaepMgf1p, vec![1]),
        Err(Error::InvalidConsumer(_))
    ));
    assert!(matches!(
        keystore.add_decrypt_right(&handle, "c1", EncryptionAlgorithm::RsaOaepMgf1p, Vec::new()),
        Err(Error::InvalidKeyMaterial(_))
    ));

    keystore
        .add_decrypt_right(&handle, "c1", EncryptionAlgorithm::RsaOaepMgf1p, vec![9, 9])
        .unwrap();
    let data = keystore.resource_data("/3D/3dmodel.model").unwrap();
    assert_eq!(data.decrypt_rights.len(), 1);
    assert!(!data.decrypt_right("c1").unwrap().is_pending());
}

#[test]
fn test_commit_is_atomic() {
    let mut keystore = KeyStore::new();
    keystore.add_consumer(Consumer::new("c1")).unwrap();

    let mut data = ResourceData::new("/3D/3dmodel.model", EncryptionAlgorithm::Aes256Gcm, true);
    data.decrypt_rights.push(lib3mf_core::DecryptRight {
        consumer_id: "c1".to_string(),
        encryption_algorithm: EncryptionAlgorithm::RsaOaepMgf1p,
        cipher_value: vec![1, 2, 3],
    });
    data.decrypt_rights.push(lib3mf_core::DecryptRight {
        consumer_id: "c2".to_string(),
        encryption_algorithm: EncryptionAlgorithm::RsaOaepMgf1p,
        cipher_value: vec![4, 5, 6],
    });

    assert!(matches!(
        keystore.commit_resource_data(data.clone()),
        Err(Error::InvalidConsumer(_))
    ));
    assert!(keystore.resource_data("/3D/3dmodel.model").is_none());

    keystore.add_consumer(Consumer::new("c2")).unwrap();
    keystore.commit_resource_data(data).unwrap();
    assert_eq!(
        keystore
            .resource_data("/3D/3dmodel.model")
            .unwrap()
            .decrypt_rights
            .len(),
        2
    );
}

#[test]
fn test_read_resource_data_scenario() {
    let xml = format!(
        r#"<keystore xmlns="{}">
  <resourcedata path="/3D/3dmodel.model" encryptionalgorithm="AES256-GCM" compression="deflate">
    <decryptright consumerid="c1" encryptionalgorithm="RSA-OAEP-MGF1P">
      <ciphervalue>q83vEjRWeJA=</ciphervalue>
    </decryptright>
  </resourcedata>
</keystore>"#,
        SC_NAMESPACE
    );
    let (keystore, warnings) = parse(&xml).unwrap();
    assert!(warnings.is_empty());

    let data = keystore.resource_data("/3D/3dmodel.model").unwrap();
    assert_eq!(data.encryption_algorithm, EncryptionAlgorithm::Aes256Gcm);
    assert!(data.compression);
    assert_eq!(data.decrypt_rights.len(), 1);

    let right = &data.decrypt_rights[0];
    assert_eq!(right.consumer_id, "c1");
    assert_eq!(right.encryption_algorithm, EncryptionAlgorithm::RsaOaepMgf1p);
    assert_eq!(
        right.cipher_value,
        vec![0xAB, 0xCD, 0xEF, 0x12, 0x34, 0x56, 0x78, 0x90]
    );
}

#[test]
fn test_unknown_child_is_reported_once() {
    let xml = format!(
        r#"<keystore xmlns="{}">
  <consumer consumerid="c1"/>
  <resourcedata path="/a.model" encryptionalgorithm="AES256-GCM">
    <accessright consumerid="c1"/>
    <decryptright consumerid="c1" encryptionalgorithm="RSA-OAEP-MGF1P"><ciphervalue>AQ==</ciphervalue></decryptright>
  </resourcedata>
  <resourcedata path="/b.model" encryptionalgorithm="AES256-GCM"/>
</keystore>"#,
        SC_NAMESPACE
    );
    let (keystore, warnings) = parse(&xml).unwrap();

    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings.count(WarningCode::NamespaceInvalidElement), 1);
    assert_eq!(
        warnings.iter().next().unwrap().level,
        WarningLevel::NamespaceUnknownElement
    );
    assert_eq!(keystore.consumers().len(), 1);
    assert_eq!(keystore.resource_data_entries().len(), 2);
    assert!(keystore.resource_data("/a.model").unwrap().decrypt_right("c1").is_some());

    let strict = ParserConfig::default().strict(true);
    let mut warnings = Warnings::new();
    let result = read_keystore(xml.as_bytes(), &mut KeyStore::new(), &strict, &mut warnings);
    assert!(matches!(result, Err(Error::NamespaceInvalidElement(_))));
}

#[test]
fn test_foreign_content_is_skipped() {
    let xml = format!(
        r#"<keystore xmlns="{}" xmlns:x="urn:example:vendor" x:flavour="plain">
  <x:audit><x:entry>ignored</x:entry></x:audit>
  <consumer consumerid="c1" x:team="print"/>
</keystore>"#,
        SC_NAMESPACE
    );
    let (keystore, warnings) = parse(&xml).unwrap();
    assert_eq!(keystore.consumers().len(), 1);
    assert_eq!(warnings.count(WarningCode::UnknownNamespaceElement), 1);
    assert_eq!(warnings.count(WarningCode::NamespaceInvalidElement), 0);
}

#[test]
fn test_committed_entries_survive_a_later_error() {
    let xml = format!(
        r#"<keystore xmlns="{}">
  <resourcedata path="/a.model" encryptionalgorithm="AES256-GCM"/>
  <resourcedata path="/a.model" encryptionalgorithm="AES256-GCM"/>
</keystore>"#,
        SC_NAMESPACE
    );
    let mut keystore = KeyStore::new();
    let mut warnings = Warnings::new();
    let result = read_keystore(
        xml.as_bytes(),
        &mut keystore,
        &ParserConfig::default(),
        &mut warnings,
    );
    assert!(matches!(result, Err(Error::DuplicateResourceDataPath(_))));
    assert_eq!(keystore.resource_data_entries().len(), 1);
}
