//! Core 3MF element parsing
//!
//! This module handles parsing of core 3MF elements including the model root,
//! metadata, objects, meshes, components and build items.

use crate::error::{Error, Result, WarningCode, WarningLevel};
use crate::model::{
    BuildItem, Component, Extension, MetadataEntry, Mesh, Model, Object, ObjectKind, ObjectType,
    ParserConfig, ResourceId, SlicesMeshResolution, Transform, Triangle, Unit, Vertex,
    canonical_uuid,
};

use super::{
    AttributeKind, ChildEntry, ReadContext, StartTag, XmlAttribute, XmlCursor, XmlNamespace,
    dispatch, material, parse_finite, parse_number, parse_resource_id, read_text, slice,
    visit_attributes,
};

const PRODUCTION: XmlNamespace = XmlNamespace::Known(Extension::Production);
const SLICE: XmlNamespace = XmlNamespace::Known(Extension::Slice);
const NONE: XmlNamespace = XmlNamespace::Unqualified;

struct ModelState {
    model: Model,
    resources: usize,
    builds: usize,
}

const MODEL_CHILDREN: &[ChildEntry<ModelState>] = &[
    (Extension::Core, "metadata", read_metadata),
    (Extension::Core, "resources", read_resources),
    (Extension::Core, "build", read_build),
];

const RESOURCE_CHILDREN: &[ChildEntry<Model>] = &[
    (Extension::Core, "object", read_object),
    (Extension::Core, "basematerials", material::read_base_materials),
    (Extension::Material, "basematerials", material::read_base_materials),
    (Extension::Slice, "slicestack", slice::read_slice_stack),
];

/// Read `<model>` and everything below it
pub(super) fn read_model_element(
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<Model> {
    let mut model = Model::new();
    let mut required = None;
    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (NONE, "unit") => {
            match Unit::from_token(&attr.value) {
                Some(unit) => model.unit = unit,
                None => ctx.unrecognized_value(
                    tag,
                    attr,
                    WarningLevel::InvalidOptionalValue,
                    Unit::default().as_str(),
                )?,
            }
            Ok(AttributeKind::Optional)
        }
        (XmlNamespace::Xml, "lang") => {
            model.language = Some(attr.value.clone());
            Ok(AttributeKind::Optional)
        }
        (NONE, "requiredextensions") => {
            required = Some(attr.value.clone());
            Ok(AttributeKind::Optional)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;

    if let Some(required) = required {
        check_required_extensions(ctx.config(), cursor, &required)?;
    }

    let mut state = ModelState {
        model,
        resources: 0,
        builds: 0,
    };
    dispatch(&mut state, ctx, cursor, tag, MODEL_CHILDREN)?;

    if state.resources != 1 {
        return Err(Error::invalid_xml_element(
            "model",
            "a model must contain exactly one <resources> element",
        ));
    }
    if state.builds != 1 {
        return Err(Error::invalid_xml_element(
            "model",
            "a model must contain exactly one <build> element",
        ));
    }
    Ok(state.model)
}

/// Every prefix listed in `requiredextensions` must name a supported extension
fn check_required_extensions(
    config: &ParserConfig,
    cursor: &XmlCursor<'_>,
    value: &str,
) -> Result<()> {
    for prefix in value.split_whitespace() {
        let uri = cursor.namespace_of_prefix(prefix).ok_or_else(|| {
            Error::UnsupportedExtension(format!(
                "required extension prefix '{}' is not declared",
                prefix
            ))
        })?;
        match Extension::from_namespace(uri) {
            Some(extension) if config.supports(&extension) => {}
            Some(extension) => {
                return Err(Error::UnsupportedExtension(format!(
                    "{} extension ({}) is required but not enabled",
                    extension.name(),
                    uri
                )));
            }
            None => {
                return Err(Error::UnsupportedExtension(format!(
                    "required extension '{}' ({}) is not supported",
                    prefix, uri
                )));
            }
        }
    }
    Ok(())
}

fn read_metadata(
    state: &mut ModelState,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut name = None;
    let mut preserve = None;
    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (NONE, "name") => {
            name = Some(attr.value.clone());
            Ok(AttributeKind::Mandatory)
        }
        (NONE, "preserve") => {
            preserve = match attr.value.as_str() {
                "1" | "true" => Some(true),
                "0" | "false" => Some(false),
                _ => {
                    ctx.invalid_value(tag, attr, WarningLevel::InvalidOptionalValue, "a boolean")?;
                    None
                }
            };
            Ok(AttributeKind::Optional)
        }
        (NONE, "type") => Ok(AttributeKind::Optional),
        _ => Ok(AttributeKind::Unknown),
    })?;
    let value = read_text(ctx, cursor, tag)?;

    let Some(name) = name else {
        return ctx.missing_attribute(tag, "name", "metadata entry without a name skipped");
    };
    if state.model.metadata_value(&name).is_some() {
        return ctx.warn(
            WarningLevel::InvalidMandatoryValue,
            WarningCode::InvalidValue,
            &tag.local,
            Some("name"),
            format!("metadata '{}' is already defined; duplicate skipped", name),
        );
    }

    state.model.metadata.push(MetadataEntry {
        name,
        value,
        preserve,
    });
    Ok(())
}

fn read_resources(
    state: &mut ModelState,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    state.resources += 1;
    if state.resources > 1 {
        return Err(Error::invalid_xml_element(
            "model",
            "a model must contain exactly one <resources> element",
        ));
    }
    visit_attributes(ctx, tag, |_, _| Ok(AttributeKind::Unknown))?;
    dispatch(&mut state.model, ctx, cursor, tag, RESOURCE_CHILDREN)?;
    Ok(())
}

#[derive(Default)]
struct ObjectShape {
    kind: Option<ObjectKind>,
}

const OBJECT_CHILDREN: &[ChildEntry<ObjectShape>] = &[
    (Extension::Core, "mesh", read_mesh),
    (Extension::Core, "components", read_components),
];

fn read_object(
    model: &mut Model,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut id = None;
    let mut object_type = ObjectType::default();
    let mut name = None;
    let mut part_number = None;
    let mut pid = None;
    let mut pindex = None;
    let mut uuid = None;
    let mut slice_stack_id = None;
    let mut resolution = SlicesMeshResolution::default();

    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (NONE, "id") => {
            id = Some(parse_resource_id(tag, attr)?);
            Ok(AttributeKind::Identity)
        }
        (NONE, "type") => {
            match ObjectType::from_token(&attr.value) {
                Some(value) => object_type = value,
                None => ctx.unrecognized_value(
                    tag,
                    attr,
                    WarningLevel::InvalidOptionalValue,
                    ObjectType::default().as_str(),
                )?,
            }
            Ok(AttributeKind::Optional)
        }
        (NONE, "name") => {
            name = Some(attr.value.clone());
            Ok(AttributeKind::Optional)
        }
        (NONE, "partnumber") => {
            part_number = Some(attr.value.clone());
            Ok(AttributeKind::Optional)
        }
        (NONE, "pid") => {
            pid = optional_index(ctx, tag, attr)?;
            Ok(AttributeKind::Optional)
        }
        (NONE, "pindex") => {
            pindex = optional_index(ctx, tag, attr)?;
            Ok(AttributeKind::Optional)
        }
        (NONE, "thumbnail") => Ok(AttributeKind::Optional),
        (PRODUCTION, "UUID") => {
            uuid = optional_uuid(ctx, tag, attr)?;
            Ok(AttributeKind::Optional)
        }
        (SLICE, "slicestackid") => {
            slice_stack_id = optional_index(ctx, tag, attr)?.filter(|&id| id > 0);
            Ok(AttributeKind::Optional)
        }
        (SLICE, "meshresolution") => {
            match SlicesMeshResolution::from_token(&attr.value) {
                Some(value) => resolution = value,
                None => ctx.unrecognized_value(
                    tag,
                    attr,
                    WarningLevel::InvalidOptionalValue,
                    SlicesMeshResolution::default().as_str(),
                )?,
            }
            Ok(AttributeKind::Optional)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;
    let id: ResourceId = id.ok_or_else(|| Error::missing_attribute("object", "id"))?;

    let mut shape = ObjectShape::default();
    dispatch(&mut shape, ctx, cursor, tag, OBJECT_CHILDREN)?;

    let kind = shape.kind.ok_or_else(|| {
        Error::InvalidObject(format!(
            "object {} has neither a <mesh> nor a <components> element",
            id
        ))
    })?;
    if let ObjectKind::Mesh(mesh) = &kind
        && let Some(index) = mesh.first_invalid_triangle()
    {
        return Err(Error::InvalidObject(format!(
            "object {} triangle {} references a missing vertex or repeats a vertex",
            id, index
        )));
    }

    if let Some(group) = pid
        && model.base_material_group(group).is_err()
    {
        ctx.warn(
            WarningLevel::InvalidOptionalValue,
            WarningCode::InvalidValue,
            &tag.local,
            Some("pid"),
            format!(
                "pid {} does not reference a base material group; property dropped",
                group
            ),
        )?;
        pid = None;
        pindex = None;
    }

    let mut object = Object::with_kind(id, kind);
    object.object_type = object_type;
    object.name = name;
    object.part_number = part_number;
    object.pid = pid;
    object.pindex = pindex;
    object.slices_mesh_resolution = resolution;
    object.uuid = uuid;
    object.slice_stack_id = slice_stack_id;
    model.add_resource(object)?;
    Ok(())
}

/// A second shape element on one object is reported and skipped
fn claim_shape(shape: &ObjectShape, ctx: &mut ReadContext<'_>, tag: &StartTag) -> Result<bool> {
    if shape.kind.is_none() {
        return Ok(true);
    }
    ctx.warn(
        WarningLevel::InvalidMandatoryValue,
        WarningCode::InvalidValue,
        &tag.local,
        None,
        "object already has a shape; element skipped",
    )?;
    Ok(false)
}

const MESH_CHILDREN: &[ChildEntry<Mesh>] = &[
    (Extension::Core, "vertices", read_vertices),
    (Extension::Core, "triangles", read_triangles),
];

const VERTICES_CHILDREN: &[ChildEntry<Mesh>] = &[(Extension::Core, "vertex", read_vertex)];

const TRIANGLES_CHILDREN: &[ChildEntry<Mesh>] = &[(Extension::Core, "triangle", read_triangle)];

const COMPONENTS_CHILDREN: &[ChildEntry<Vec<Component>>] =
    &[(Extension::Core, "component", read_component)];

fn read_mesh(
    shape: &mut ObjectShape,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    if !claim_shape(shape, ctx, tag)? {
        return Ok(());
    }
    visit_attributes(ctx, tag, |_, _| Ok(AttributeKind::Unknown))?;
    let mut mesh = Mesh::new();
    dispatch(&mut mesh, ctx, cursor, tag, MESH_CHILDREN)?;
    shape.kind = Some(ObjectKind::Mesh(mesh));
    Ok(())
}

fn read_vertices(
    mesh: &mut Mesh,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    dispatch(mesh, ctx, cursor, tag, VERTICES_CHILDREN)?;
    Ok(())
}

fn read_vertex(
    mesh: &mut Mesh,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let (mut x, mut y, mut z) = (None, None, None);
    visit_attributes(ctx, tag, |_, attr| {
        let slot = match attr.key() {
            (NONE, "x") => &mut x,
            (NONE, "y") => &mut y,
            (NONE, "z") => &mut z,
            _ => return Ok(AttributeKind::Unknown),
        };
        *slot = Some(parse_finite(tag, attr)?);
        Ok(AttributeKind::Mandatory)
    })?;
    read_text(ctx, cursor, tag)?;

    mesh.vertices.push(Vertex::new(
        x.ok_or_else(|| Error::missing_attribute("vertex", "x"))?,
        y.ok_or_else(|| Error::missing_attribute("vertex", "y"))?,
        z.ok_or_else(|| Error::missing_attribute("vertex", "z"))?,
    ));
    Ok(())
}

fn read_triangles(
    mesh: &mut Mesh,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    dispatch(mesh, ctx, cursor, tag, TRIANGLES_CHILDREN)?;
    Ok(())
}

fn read_triangle(
    mesh: &mut Mesh,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut vertices = [None; 3];
    let mut triangle = Triangle::new(0, 0, 0);
    visit_attributes(ctx, tag, |ctx, attr| {
        let index = match attr.key() {
            (NONE, "v1") => 0,
            (NONE, "v2") => 1,
            (NONE, "v3") => 2,
            (NONE, "pid") => {
                triangle.pid = optional_index(ctx, tag, attr)?;
                return Ok(AttributeKind::Optional);
            }
            (NONE, "p1") => {
                triangle.p1 = optional_index(ctx, tag, attr)?;
                return Ok(AttributeKind::Optional);
            }
            (NONE, "p2") => {
                triangle.p2 = optional_index(ctx, tag, attr)?;
                return Ok(AttributeKind::Optional);
            }
            (NONE, "p3") => {
                triangle.p3 = optional_index(ctx, tag, attr)?;
                return Ok(AttributeKind::Optional);
            }
            _ => return Ok(AttributeKind::Unknown),
        };
        vertices[index] = Some(parse_number::<u32>(tag, attr, "vertex index")?);
        Ok(AttributeKind::Mandatory)
    })?;
    read_text(ctx, cursor, tag)?;

    let [v1, v2, v3] = vertices;
    triangle.v1 = v1.ok_or_else(|| Error::missing_attribute("triangle", "v1"))?;
    triangle.v2 = v2.ok_or_else(|| Error::missing_attribute("triangle", "v2"))?;
    triangle.v3 = v3.ok_or_else(|| Error::missing_attribute("triangle", "v3"))?;
    mesh.triangles.push(triangle);
    Ok(())
}

fn read_components(
    shape: &mut ObjectShape,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    if !claim_shape(shape, ctx, tag)? {
        return Ok(());
    }
    visit_attributes(ctx, tag, |_, _| Ok(AttributeKind::Unknown))?;
    let mut components = Vec::new();
    dispatch(&mut components, ctx, cursor, tag, COMPONENTS_CHILDREN)?;
    shape.kind = Some(ObjectKind::Components(components));
    Ok(())
}

fn read_component(
    components: &mut Vec<Component>,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut object_id = None;
    let mut transform = None;
    let mut uuid = None;
    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (NONE, "objectid") => {
            object_id = Some(parse_resource_id(tag, attr)?);
            Ok(AttributeKind::Identity)
        }
        (NONE, "transform") => {
            transform = optional_transform(ctx, tag, attr)?;
            Ok(AttributeKind::Optional)
        }
        (PRODUCTION, "UUID") => {
            uuid = optional_uuid(ctx, tag, attr)?;
            Ok(AttributeKind::Optional)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;
    read_text(ctx, cursor, tag)?;

    let mut component =
        Component::new(object_id.ok_or_else(|| Error::missing_attribute("component", "objectid"))?);
    component.transform = transform;
    component.uuid = uuid;
    components.push(component);
    Ok(())
}

const BUILD_CHILDREN: &[ChildEntry<Model>] = &[(Extension::Core, "item", read_item)];

fn read_build(
    state: &mut ModelState,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    state.builds += 1;
    if state.builds > 1 {
        return Err(Error::invalid_xml_element(
            "model",
            "a model must contain exactly one <build> element",
        ));
    }

    let mut uuid = None;
    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (PRODUCTION, "UUID") => {
            uuid = optional_uuid(ctx, tag, attr)?;
            Ok(AttributeKind::Optional)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;
    state.model.set_build_uuid(uuid.as_deref())?;

    dispatch(&mut state.model, ctx, cursor, tag, BUILD_CHILDREN)?;
    Ok(())
}

fn read_item(
    model: &mut Model,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut object_id = None;
    let mut transform = None;
    let mut part_number = None;
    let mut uuid = None;
    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (NONE, "objectid") => {
            object_id = Some(parse_resource_id(tag, attr)?);
            Ok(AttributeKind::Identity)
        }
        (NONE, "transform") => {
            transform = optional_transform(ctx, tag, attr)?;
            Ok(AttributeKind::Optional)
        }
        (NONE, "partnumber") => {
            part_number = Some(attr.value.clone());
            Ok(AttributeKind::Optional)
        }
        (PRODUCTION, "UUID") => {
            uuid = optional_uuid(ctx, tag, attr)?;
            Ok(AttributeKind::Optional)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;
    read_text(ctx, cursor, tag)?;

    let object_id = object_id.ok_or_else(|| Error::missing_attribute("item", "objectid"))?;
    let mut item = BuildItem::new(object_id);
    item.transform = transform;
    item.part_number = part_number;
    item.uuid = uuid;
    model.add_build_item(item).map_err(|e| match e {
        Error::InvalidReference(_) | Error::InvalidObject(_) => Error::InvalidReference(format!(
            "build item references object {} which is not an object resource",
            object_id
        )),
        other => other,
    })
}

fn optional_index(
    ctx: &mut ReadContext<'_>,
    tag: &StartTag,
    attr: &XmlAttribute,
) -> Result<Option<u32>> {
    match attr.value.trim().parse::<u32>() {
        Ok(value) => Ok(Some(value)),
        Err(_) => {
            ctx.invalid_value(
                tag,
                attr,
                WarningLevel::InvalidOptionalValue,
                "a non-negative integer",
            )?;
            Ok(None)
        }
    }
}

fn optional_uuid(
    ctx: &mut ReadContext<'_>,
    tag: &StartTag,
    attr: &XmlAttribute,
) -> Result<Option<String>> {
    match canonical_uuid(&attr.value) {
        Ok(uuid) => Ok(Some(uuid)),
        Err(_) => {
            ctx.invalid_value(tag, attr, WarningLevel::InvalidOptionalValue, "a UUID")?;
            Ok(None)
        }
    }
}

fn optional_transform(
    ctx: &mut ReadContext<'_>,
    tag: &StartTag,
    attr: &XmlAttribute,
) -> Result<Option<Transform>> {
    match attr.value.parse::<Transform>() {
        Ok(transform) => Ok(Some(transform)),
        Err(_) => {
            ctx.invalid_value(
                tag,
                attr,
                WarningLevel::InvalidOptionalValue,
                "a transform of 12 numbers",
            )?;
            Ok(None)
        }
    }
}
