//! XML writing for 3MF model and keystore parts
//!
//! Serializes a [`Model`] into the `3dmodel.model` part and a [`KeyStore`]
//! into the keystore part. Output is indented by two spaces and starts with
//! an XML declaration. Attributes that hold their default value are omitted.

mod core;
mod material;
mod secure_content;
mod slice;

use crate::error::{Error, Result};
use crate::model::{
    Extension, KeyStore, MetadataEntry, Model, ObjectKind, Resource, ResourceId,
    SlicesMeshResolution,
};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::collections::HashSet;
use std::io::Write as IoWrite;

/// Write a Model as the XML of a model part
///
/// Resources are written so that every reference points backwards: base
/// material groups and slice stacks first, then objects with each component
/// target ahead of the object that contains it. A component or build item
/// that names a removed object fails with [`Error::InvalidReference`].
pub fn write_model<W: IoWrite>(model: &Model, writer: W) -> Result<()> {
    let mut xml_writer = Writer::new_with_indent(writer, b' ', 2);
    write_declaration(&mut xml_writer)?;

    let uses_production = model.objects().any(|o| {
        o.uuid().is_some() || o.component_slice().iter().any(|c| c.uuid().is_some())
    }) || model.build_uuid().is_some()
        || model.build_items().iter().any(|i| i.uuid().is_some());
    let uses_slice = model
        .resources()
        .iter()
        .any(|r| matches!(r, Resource::SliceStack(_)))
        || model.objects().any(|o| {
            o.has_slice_stack() || o.slices_mesh_resolution != SlicesMeshResolution::FullRes
        });

    let mut model_elem = BytesStart::new("model");
    model_elem.push_attribute(("unit", model.unit.as_str()));
    if let Some(language) = &model.language {
        model_elem.push_attribute(("xml:lang", language.as_str()));
    }
    model_elem.push_attribute(("xmlns", Extension::Core.namespace()));
    for (used, extension) in [
        (uses_production, Extension::Production),
        (uses_slice, Extension::Slice),
    ] {
        if let (true, Some(prefix)) = (used, extension.prefix()) {
            let name = format!("xmlns:{}", prefix);
            model_elem.push_attribute((name.as_str(), extension.namespace()));
        }
    }
    start(&mut xml_writer, model_elem, "model")?;

    for entry in &model.metadata {
        write_metadata(&mut xml_writer, entry)?;
    }
    write_resources(&mut xml_writer, model)?;
    core::write_build(&mut xml_writer, model)?;

    end(&mut xml_writer, "model")?;

    tracing::debug!(
        resources = model.resources().len(),
        build_items = model.build_items().len(),
        "model part written"
    );
    Ok(())
}

/// Write a KeyStore as the XML of the keystore part
///
/// Fails with [`Error::InvalidKeyMaterial`] while any decrypt right is still
/// pending, that is before the secure content pipeline wrapped its key.
pub fn write_keystore<W: IoWrite>(keystore: &KeyStore, writer: W) -> Result<()> {
    let mut xml_writer = Writer::new_with_indent(writer, b' ', 2);
    write_declaration(&mut xml_writer)?;
    secure_content::write_keystore(&mut xml_writer, keystore)?;

    tracing::debug!(
        consumers = keystore.consumers().len(),
        resource_data = keystore.resource_data_entries().len(),
        "keystore part written"
    );
    Ok(())
}

fn write_declaration<W: IoWrite>(writer: &mut Writer<W>) -> Result<()> {
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| Error::xml_write(format!("Failed to write XML declaration: {}", e)))
}

fn start<W: IoWrite>(
    writer: &mut Writer<W>,
    elem: BytesStart<'_>,
    name: &str,
) -> Result<()> {
    writer
        .write_event(Event::Start(elem))
        .map_err(|e| Error::xml_write(format!("Failed to write {} element: {}", name, e)))
}

fn empty<W: IoWrite>(
    writer: &mut Writer<W>,
    elem: BytesStart<'_>,
    name: &str,
) -> Result<()> {
    writer
        .write_event(Event::Empty(elem))
        .map_err(|e| Error::xml_write(format!("Failed to write {} element: {}", name, e)))
}

fn end<W: IoWrite>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| Error::xml_write(format!("Failed to close {} element: {}", name, e)))
}

/// Element holding only escaped text
fn text_element<W: IoWrite>(
    writer: &mut Writer<W>,
    elem: BytesStart<'_>,
    name: &str,
    text: &str,
) -> Result<()> {
    start(writer, elem, name)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(|e| Error::xml_write(format!("Failed to write {} value: {}", name, e)))?;
    end(writer, name)
}

fn write_metadata<W: IoWrite>(writer: &mut Writer<W>, entry: &MetadataEntry) -> Result<()> {
    let mut elem = BytesStart::new("metadata");
    elem.push_attribute(("name", entry.name.as_str()));
    if let Some(preserve) = entry.preserve {
        elem.push_attribute(("preserve", if preserve { "1" } else { "0" }));
    }
    text_element(writer, elem, "metadata", &entry.value)
}

fn write_resources<W: IoWrite>(writer: &mut Writer<W>, model: &Model) -> Result<()> {
    if model.resources().is_empty() {
        return empty(writer, BytesStart::new("resources"), "resources");
    }
    start(writer, BytesStart::new("resources"), "resources")?;

    for resource in model.resources() {
        match resource {
            Resource::BaseMaterials(group) => material::write_base_material_group(writer, group)?,
            Resource::SliceStack(stack) => slice::write_slice_stack(writer, stack)?,
            Resource::Object(_) => {}
        }
    }

    let mut written = HashSet::new();
    for object in model.objects() {
        write_object_after_targets(writer, model, object.id(), &mut written)?;
    }

    end(writer, "resources")
}

/// Write the components' targets depth first, then the object itself
fn write_object_after_targets<W: IoWrite>(
    writer: &mut Writer<W>,
    model: &Model,
    id: ResourceId,
    written: &mut HashSet<ResourceId>,
) -> Result<()> {
    if !written.insert(id) {
        return Ok(());
    }
    let object = model.object(id)?;
    if let ObjectKind::Components(components) = object.kind() {
        for component in components {
            let target = component.object_id();
            model.object(target).map_err(|_| {
                Error::InvalidReference(format!(
                    "object {} has a component referencing missing object {}",
                    id, target
                ))
            })?;
            write_object_after_targets(writer, model, target, written)?;
        }
    }
    core::write_object(writer, object)
}
