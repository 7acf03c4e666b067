//! Secure Content keystore parsing
//!
//! Each `<resourcedata>` collects its path, algorithm, compression flag and
//! decrypt rights while it is open and is committed to the keystore in one
//! step when it closes. Decrypt rights that cannot be used (no consumer, no
//! or undecodable cipher value) are reported and dropped; the rest of the
//! entry survives. A consumer first seen in a decrypt right is registered
//! with only its id and completed if its `<consumer>` element follows.

use crate::error::{Error, Result, WarningCode, WarningLevel};
use crate::model::{
    Consumer, DecryptRight, EncryptionAlgorithm, Extension, KeyStore, ResourceData,
    canonical_uuid,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::HashSet;

use super::{
    AttributeKind, ChildEntry, ReadContext, StartTag, XmlAttribute, XmlCursor, XmlNamespace,
    dispatch, read_text, visit_attributes,
};

const NONE: XmlNamespace = XmlNamespace::Unqualified;

/// Keystore being filled, plus the consumers registered only by a decrypt right
struct KeystoreState {
    keystore: KeyStore,
    implicit: HashSet<String>,
}

const KEYSTORE_CHILDREN: &[ChildEntry<KeystoreState>] = &[
    (Extension::SecureContent, "consumer", read_consumer),
    (Extension::SecureContent, "resourcedata", read_resource_data),
];

const CONSUMER_CHILDREN: &[ChildEntry<Option<String>>] =
    &[(Extension::SecureContent, "keyvalue", read_value_text)];

const RESOURCE_DATA_CHILDREN: &[ChildEntry<Vec<DecryptRight>>] =
    &[(Extension::SecureContent, "decryptright", read_decrypt_right)];

const DECRYPT_RIGHT_CHILDREN: &[ChildEntry<Option<String>>] =
    &[(Extension::SecureContent, "ciphervalue", read_value_text)];

pub(super) fn read_keystore_element(
    keystore: &mut KeyStore,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut uuid = None;
    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (NONE, "UUID") => {
            match canonical_uuid(&attr.value) {
                Ok(value) => uuid = Some(value),
                Err(_) => {
                    ctx.invalid_value(tag, attr, WarningLevel::InvalidOptionalValue, "a UUID")?
                }
            }
            Ok(AttributeKind::Optional)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;
    if uuid.is_some() {
        keystore.set_uuid(uuid);
    }

    let mut state = KeystoreState {
        keystore: std::mem::take(keystore),
        implicit: HashSet::new(),
    };
    let result = dispatch(&mut state, ctx, cursor, tag, KEYSTORE_CHILDREN);
    // Entries committed before a fatal error stay in the caller's keystore
    *keystore = state.keystore;
    result.map(|_| ())
}

fn read_consumer(
    state: &mut KeystoreState,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut consumer_id = None;
    let mut key_id = None;
    visit_attributes(ctx, tag, |_, attr| match attr.key() {
        (NONE, "consumerid") => {
            consumer_id = Some(attr.value.clone());
            Ok(AttributeKind::Mandatory)
        }
        (NONE, "keyid") => {
            key_id = Some(attr.value.clone());
            Ok(AttributeKind::Optional)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;

    let mut key_value = None;
    dispatch(&mut key_value, ctx, cursor, tag, CONSUMER_CHILDREN)?;

    let Some(consumer_id) = consumer_id.filter(|id| !id.is_empty()) else {
        return ctx.missing_attribute(tag, "consumerid", "consumer without an id skipped");
    };
    if state.implicit.remove(&consumer_id)
        && let Some(consumer) = state.keystore.consumer_mut(&consumer_id)
    {
        consumer.key_id = key_id;
        consumer.key_value = key_value;
        return Ok(());
    }
    state.keystore.add_consumer(Consumer {
        consumer_id,
        key_id,
        key_value,
    })
}

fn read_value_text(
    value: &mut Option<String>,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    visit_attributes(ctx, tag, |_, _| Ok(AttributeKind::Unknown))?;
    *value = Some(read_text(ctx, cursor, tag)?);
    Ok(())
}

/// Algorithm token, or the default with a warning
fn algorithm(
    ctx: &mut ReadContext<'_>,
    tag: &StartTag,
    attr: &XmlAttribute,
    default: EncryptionAlgorithm,
) -> Result<EncryptionAlgorithm> {
    match EncryptionAlgorithm::from_token(&attr.value) {
        Some(value) => Ok(value),
        None => {
            ctx.unrecognized_value(
                tag,
                attr,
                WarningLevel::InvalidMandatoryValue,
                default.as_str(),
            )?;
            Ok(default)
        }
    }
}

fn read_resource_data(
    state: &mut KeystoreState,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut path = None;
    let mut encryption_algorithm = None;
    let mut compression = false;
    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (NONE, "path") => {
            path = Some(attr.value.clone());
            Ok(AttributeKind::DataPath)
        }
        (NONE, "encryptionalgorithm") => {
            encryption_algorithm = Some(algorithm(ctx, tag, attr, EncryptionAlgorithm::Aes256Gcm)?);
            Ok(AttributeKind::Mandatory)
        }
        (NONE, "compression") => {
            compression = match attr.value.as_str() {
                "deflate" => true,
                "none" => false,
                _ => {
                    ctx.unrecognized_value(tag, attr, WarningLevel::InvalidOptionalValue, "none")?;
                    false
                }
            };
            Ok(AttributeKind::Optional)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;
    let path = path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::missing_attribute("resourcedata", "path"))?;
    let encryption_algorithm = match encryption_algorithm {
        Some(value) => value,
        None => {
            ctx.missing_attribute(
                tag,
                "encryptionalgorithm",
                "resource data without an algorithm; using AES256-GCM",
            )?;
            EncryptionAlgorithm::Aes256Gcm
        }
    };

    let mut rights = Vec::new();
    dispatch(&mut rights, ctx, cursor, tag, RESOURCE_DATA_CHILDREN)?;

    // Rights may name consumers the keystore never declared
    for right in &rights {
        if state.keystore.consumer(&right.consumer_id).is_none() {
            state
                .keystore
                .add_consumer(Consumer::new(right.consumer_id.as_str()))?;
            state.implicit.insert(right.consumer_id.clone());
        }
    }

    let mut data = ResourceData::new(path, encryption_algorithm, compression);
    data.decrypt_rights = rights;
    state.keystore.commit_resource_data(data)?;
    Ok(())
}

fn read_decrypt_right(
    rights: &mut Vec<DecryptRight>,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut consumer_id = None;
    let mut encryption_algorithm = EncryptionAlgorithm::RsaOaepMgf1p;
    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (NONE, "consumerid") => {
            consumer_id = Some(attr.value.clone());
            Ok(AttributeKind::Mandatory)
        }
        (NONE, "encryptionalgorithm") => {
            encryption_algorithm =
                algorithm(ctx, tag, attr, EncryptionAlgorithm::RsaOaepMgf1p)?;
            Ok(AttributeKind::Mandatory)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;

    let mut cipher_text = None;
    dispatch(&mut cipher_text, ctx, cursor, tag, DECRYPT_RIGHT_CHILDREN)?;

    let Some(consumer_id) = consumer_id.filter(|id| !id.is_empty()) else {
        return ctx.missing_attribute(tag, "consumerid", "decrypt right without a consumer dropped");
    };
    let Some(cipher_text) = cipher_text else {
        return ctx.missing_attribute(
            tag,
            "ciphervalue",
            "decrypt right without a cipher value dropped",
        );
    };

    let compact: String = cipher_text.split_whitespace().collect();
    let cipher_value = match BASE64.decode(compact.as_bytes()) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => {
            return ctx.warn(
                WarningLevel::InvalidMandatoryValue,
                WarningCode::InvalidValue,
                "ciphervalue",
                None,
                format!("empty cipher value for consumer '{}'; right dropped", consumer_id),
            );
        }
        Err(e) => {
            return ctx.warn(
                WarningLevel::InvalidMandatoryValue,
                WarningCode::InvalidValue,
                "ciphervalue",
                None,
                format!(
                    "cipher value for consumer '{}' is not valid base64 ({}); right dropped",
                    consumer_id, e
                ),
            );
        }
    };

    if rights.iter().any(|r| r.consumer_id == consumer_id) {
        return ctx.warn(
            WarningLevel::InvalidMandatoryValue,
            WarningCode::InvalidValue,
            &tag.local,
            Some("consumerid"),
            format!(
                "consumer '{}' already has a decrypt right here; duplicate dropped",
                consumer_id
            ),
        );
    }

    rights.push(DecryptRight {
        consumer_id,
        encryption_algorithm,
        cipher_value,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::error::{Error, WarningCode, WarningLevel, Warnings};
    use crate::model::{EncryptionAlgorithm, KeyStore, ParserConfig};
    use crate::parser::read_keystore;

    fn keystore_xml(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<keystore xmlns="http://schemas.microsoft.com/3dmanufacturing/securecontent/2019/07"
          UUID="0f7a1d4e-4b8c-4a6a-9f1e-0d9b8c7a6e5f">{}</keystore>"#,
            body
        )
    }

    fn read(xml: &str, config: &ParserConfig) -> crate::Result<(KeyStore, Warnings)> {
        let mut keystore = KeyStore::new();
        let mut warnings = Warnings::new();
        read_keystore(xml.as_bytes(), &mut keystore, config, &mut warnings)?;
        Ok((keystore, warnings))
    }

    #[test]
    fn test_consumers_and_resource_data() {
        let xml = keystore_xml(
            r#"<consumer consumerid="c1" keyid="k1"><keyvalue>PEM</keyvalue></consumer>
            <resourcedata path="/3D/3dmodel.model" encryptionalgorithm="AES256-GCM" compression="deflate">
              <decryptright consumerid="c1" encryptionalgorithm="RSA-OAEP-MGF1P">
                <ciphervalue>AAECAw==</ciphervalue>
              </decryptright>
            </resourcedata>
            <resourcedata path="/3D/Textures/wood.png" encryptionalgorithm="AES256-GCM">
              <decryptright consumerid="c2" encryptionalgorithm="RSA-OAEP-MGF1P">
                <ciphervalue>
                  BAUG
                  Bw==
                </ciphervalue>
              </decryptright>
            </resourcedata>"#,
        );
        let (keystore, warnings) = read(&xml, &ParserConfig::default()).unwrap();
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(keystore.uuid(), Some("0f7a1d4e-4b8c-4a6a-9f1e-0d9b8c7a6e5f"));

        let consumer = keystore.consumer("c1").unwrap();
        assert_eq!(consumer.key_id.as_deref(), Some("k1"));
        assert_eq!(consumer.key_value.as_deref(), Some("PEM"));
        // c2 is registered by its decrypt right
        assert!(keystore.consumer("c2").unwrap().key_value.is_none());

        let model = keystore.resource_data("/3D/3dmodel.model").unwrap();
        assert!(model.compression);
        assert_eq!(model.decrypt_rights.len(), 1);
        assert_eq!(model.decrypt_rights[0].cipher_value, vec![0, 1, 2, 3]);

        let texture = keystore.resource_data("/3D/Textures/wood.png").unwrap();
        assert!(!texture.compression);
        assert_eq!(texture.decrypt_rights[0].cipher_value, vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_unusable_rights_are_dropped() {
        let xml = keystore_xml(
            r#"<resourcedata path="/a" encryptionalgorithm="AES256-GCM">
              <decryptright consumerid="c1" encryptionalgorithm="RSA-OAEP-MGF1P"/>
              <decryptright consumerid="c2" encryptionalgorithm="RSA-OAEP-MGF1P"><ciphervalue>@@@</ciphervalue></decryptright>
              <decryptright encryptionalgorithm="RSA-OAEP-MGF1P"><ciphervalue>AA==</ciphervalue></decryptright>
              <decryptright consumerid="c3" encryptionalgorithm="RSA-OAEP-MGF1P"><ciphervalue>AA==</ciphervalue></decryptright>
            </resourcedata>"#,
        );
        let (keystore, warnings) = read(&xml, &ParserConfig::default()).unwrap();
        let data = keystore.resource_data("/a").unwrap();
        assert_eq!(data.decrypt_rights.len(), 1);
        assert_eq!(data.decrypt_rights[0].consumer_id, "c3");
        assert_eq!(
            warnings.with_level(WarningLevel::InvalidMandatoryValue).count(),
            3
        );

        let strict = ParserConfig::default().strict(true);
        assert!(matches!(
            read(&xml, &strict),
            Err(Error::InvalidMandatoryValue(_))
        ));
    }

    #[test]
    fn test_unknown_tokens_fall_back() {
        let xml = keystore_xml(
            r#"<resourcedata path="/a" encryptionalgorithm="AES128-CBC" compression="zip">
              <decryptright consumerid="c1" encryptionalgorithm="rsa-oaep-mgf1p"><ciphervalue>AA==</ciphervalue></decryptright>
            </resourcedata>"#,
        );
        let (keystore, warnings) = read(&xml, &ParserConfig::default()).unwrap();
        let data = keystore.resource_data("/a").unwrap();
        assert_eq!(data.encryption_algorithm, EncryptionAlgorithm::Aes256Gcm);
        assert!(!data.compression);
        assert_eq!(
            data.decrypt_rights[0].encryption_algorithm,
            EncryptionAlgorithm::RsaOaepMgf1p
        );
        assert_eq!(warnings.count(WarningCode::UnrecognizedValue), 3);
        assert_eq!(
            warnings.with_level(WarningLevel::InvalidOptionalValue).count(),
            1
        );
    }

    #[test]
    fn test_duplicate_path_attribute_warns_and_last_wins() {
        let xml = keystore_xml(
            r#"<resourcedata path="/first" path="/second" encryptionalgorithm="AES256-GCM"/>"#,
        );
        let (keystore, warnings) = read(&xml, &ParserConfig::default()).unwrap();
        assert!(keystore.resource_data("/first").is_none());
        assert!(keystore.resource_data("/second").is_some());
        assert_eq!(warnings.count(WarningCode::DuplicateResourceDataPath), 1);
    }

    #[test]
    fn test_structural_errors_are_fatal() {
        let repeated = keystore_xml(
            r#"<resourcedata path="/a" encryptionalgorithm="AES256-GCM"/>
               <resourcedata path="/a" encryptionalgorithm="AES256-GCM"/>"#,
        );
        assert!(matches!(
            read(&repeated, &ParserConfig::default()),
            Err(Error::DuplicateResourceDataPath(_))
        ));

        let no_path = keystore_xml(r#"<resourcedata encryptionalgorithm="AES256-GCM"/>"#);
        assert!(matches!(
            read(&no_path, &ParserConfig::default()),
            Err(Error::InvalidMandatoryValue(_))
        ));

        let twice = keystore_xml(r#"<consumer consumerid="c1"/><consumer consumerid="c1"/>"#);
        assert!(matches!(
            read(&twice, &ParserConfig::default()),
            Err(Error::InvalidConsumer(_))
        ));

        let wrong_root = r#"<model xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02"/>"#;
        assert!(matches!(
            read(wrong_root, &ParserConfig::default()),
            Err(Error::InvalidXml(_))
        ));
    }

    #[test]
    fn test_consumer_declared_after_its_decrypt_right() {
        let xml = keystore_xml(
            r#"<resourcedata path="/3D/3dmodel.model" encryptionalgorithm="AES256-GCM">
              <decryptright consumerid="c1" encryptionalgorithm="RSA-OAEP-MGF1P">
                <ciphervalue>AQID</ciphervalue>
              </decryptright>
            </resourcedata>
            <consumer consumerid="c1" keyid="k1"><keyvalue>PEM</keyvalue></consumer>"#,
        );
        let (keystore, warnings) = read(&xml, &ParserConfig::default()).unwrap();
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(keystore.consumers().len(), 1);
        let consumer = keystore.consumer("c1").unwrap();
        assert_eq!(consumer.key_id.as_deref(), Some("k1"));
        assert_eq!(consumer.key_value.as_deref(), Some("PEM"));

        // Only the first declaration completes the consumer
        let twice = keystore_xml(
            r#"<resourcedata path="/a" encryptionalgorithm="AES256-GCM">
              <decryptright consumerid="c1"><ciphervalue>AQID</ciphervalue></decryptright>
            </resourcedata>
            <consumer consumerid="c1"/><consumer consumerid="c1"/>"#,
        );
        assert!(matches!(
            read(&twice, &ParserConfig::default()),
            Err(Error::InvalidConsumer(_))
        ));
    }

    #[test]
    fn test_earlier_namespace_accepted() {
        let xml = r#"<keystore xmlns="http://schemas.microsoft.com/3dmanufacturing/securecontent/2019/04">
            <consumer consumerid="c1"/></keystore>"#;
        let (keystore, _) = read(xml, &ParserConfig::default()).unwrap();
        assert_eq!(keystore.consumers().len(), 1);
    }
}
