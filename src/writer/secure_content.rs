//! Secure Content keystore writing

use crate::error::{Error, Result};
use crate::model::{Consumer, Extension, KeyStore, ResourceData};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use quick_xml::Writer;
use quick_xml::events::BytesStart;
use std::io::Write as IoWrite;

use super::{empty, end, start, text_element};

pub(super) fn write_keystore<W: IoWrite>(
    writer: &mut Writer<W>,
    keystore: &KeyStore,
) -> Result<()> {
    let mut elem = BytesStart::new("keystore");
    elem.push_attribute(("xmlns", Extension::SecureContent.namespace()));
    if let Some(uuid) = keystore.uuid() {
        elem.push_attribute(("UUID", uuid));
    }
    if keystore.is_empty() {
        return empty(writer, elem, "keystore");
    }

    start(writer, elem, "keystore")?;
    for consumer in keystore.consumers() {
        write_consumer(writer, consumer)?;
    }
    for data in keystore.resource_data_entries() {
        write_resource_data(writer, data)?;
    }
    end(writer, "keystore")
}

fn write_consumer<W: IoWrite>(writer: &mut Writer<W>, consumer: &Consumer) -> Result<()> {
    let mut elem = BytesStart::new("consumer");
    elem.push_attribute(("consumerid", consumer.consumer_id.as_str()));
    if let Some(key_id) = &consumer.key_id {
        elem.push_attribute(("keyid", key_id.as_str()));
    }
    match &consumer.key_value {
        Some(pem) => {
            start(writer, elem, "consumer")?;
            text_element(writer, BytesStart::new("keyvalue"), "keyvalue", pem)?;
            end(writer, "consumer")
        }
        None => empty(writer, elem, "consumer"),
    }
}

fn write_resource_data<W: IoWrite>(writer: &mut Writer<W>, data: &ResourceData) -> Result<()> {
    let mut elem = BytesStart::new("resourcedata");
    elem.push_attribute(("path", data.path.as_str()));
    elem.push_attribute(("encryptionalgorithm", data.encryption_algorithm.as_str()));
    if data.compression {
        elem.push_attribute(("compression", "deflate"));
    }
    if data.decrypt_rights.is_empty() {
        return empty(writer, elem, "resourcedata");
    }

    start(writer, elem, "resourcedata")?;
    for right in &data.decrypt_rights {
        if right.is_pending() {
            return Err(Error::InvalidKeyMaterial(format!(
                "decrypt right for consumer '{}' on '{}' has no wrapped key; encrypt the package first",
                right.consumer_id, data.path
            )));
        }
        let mut right_elem = BytesStart::new("decryptright");
        right_elem.push_attribute(("consumerid", right.consumer_id.as_str()));
        right_elem.push_attribute(("encryptionalgorithm", right.encryption_algorithm.as_str()));
        start(writer, right_elem, "decryptright")?;
        text_element(
            writer,
            BytesStart::new("ciphervalue"),
            "ciphervalue",
            &BASE64.encode(&right.cipher_value),
        )?;
        end(writer, "decryptright")?;
    }
    end(writer, "resourcedata")
}
