//! Core element writing: objects, meshes, components and the build

use crate::error::{Error, Result};
use crate::model::{
    Component, Mesh, Model, Object, ObjectKind, ObjectType, SlicesMeshResolution, Triangle,
};
use quick_xml::Writer;
use quick_xml::events::BytesStart;
use std::io::Write as IoWrite;

use super::{empty, end, start};

/// Write an object
pub(super) fn write_object<W: IoWrite>(writer: &mut Writer<W>, object: &Object) -> Result<()> {
    let mut elem = BytesStart::new("object");
    elem.push_attribute(("id", object.id().to_string().as_str()));

    if object.object_type != ObjectType::Model {
        elem.push_attribute(("type", object.object_type.as_str()));
    }
    if let Some(name) = &object.name {
        elem.push_attribute(("name", name.as_str()));
    }
    if let Some(part_number) = &object.part_number {
        elem.push_attribute(("partnumber", part_number.as_str()));
    }
    if let Some(pid) = object.pid {
        elem.push_attribute(("pid", pid.to_string().as_str()));
        if let Some(pindex) = object.pindex {
            elem.push_attribute(("pindex", pindex.to_string().as_str()));
        }
    }
    if let Some(uuid) = object.uuid() {
        elem.push_attribute(("p:UUID", uuid));
    }
    if let Some(stack) = object.slice_stack_id() {
        elem.push_attribute(("s:slicestackid", stack.to_string().as_str()));
    }
    if object.slices_mesh_resolution != SlicesMeshResolution::FullRes {
        elem.push_attribute(("s:meshresolution", object.slices_mesh_resolution.as_str()));
    }

    start(writer, elem, "object")?;
    match object.kind() {
        ObjectKind::Mesh(mesh) => write_mesh(writer, mesh)?,
        ObjectKind::Components(components) => write_components(writer, components)?,
    }
    end(writer, "object")
}

fn write_mesh<W: IoWrite>(writer: &mut Writer<W>, mesh: &Mesh) -> Result<()> {
    start(writer, BytesStart::new("mesh"), "mesh")?;

    start(writer, BytesStart::new("vertices"), "vertices")?;
    for vertex in &mesh.vertices {
        let mut v_elem = BytesStart::new("vertex");
        v_elem.push_attribute(("x", vertex.x.to_string().as_str()));
        v_elem.push_attribute(("y", vertex.y.to_string().as_str()));
        v_elem.push_attribute(("z", vertex.z.to_string().as_str()));
        empty(writer, v_elem, "vertex")?;
    }
    end(writer, "vertices")?;

    start(writer, BytesStart::new("triangles"), "triangles")?;
    for triangle in &mesh.triangles {
        empty(writer, triangle_element(triangle), "triangle")?;
    }
    end(writer, "triangles")?;

    end(writer, "mesh")
}

fn triangle_element(triangle: &Triangle) -> BytesStart<'static> {
    let mut elem = BytesStart::new("triangle");
    elem.push_attribute(("v1", triangle.v1.to_string().as_str()));
    elem.push_attribute(("v2", triangle.v2.to_string().as_str()));
    elem.push_attribute(("v3", triangle.v3.to_string().as_str()));

    if let Some(pid) = triangle.pid {
        elem.push_attribute(("pid", pid.to_string().as_str()));
    }
    for (name, value) in [("p1", triangle.p1), ("p2", triangle.p2), ("p3", triangle.p3)] {
        if let Some(value) = value {
            elem.push_attribute((name, value.to_string().as_str()));
        }
    }
    elem
}

fn write_components<W: IoWrite>(writer: &mut Writer<W>, components: &[Component]) -> Result<()> {
    start(writer, BytesStart::new("components"), "components")?;
    for component in components {
        let mut elem = BytesStart::new("component");
        elem.push_attribute(("objectid", component.object_id().to_string().as_str()));
        if let Some(transform) = &component.transform {
            elem.push_attribute(("transform", transform.to_string().as_str()));
        }
        if let Some(uuid) = component.uuid() {
            elem.push_attribute(("p:UUID", uuid));
        }
        empty(writer, elem, "component")?;
    }
    end(writer, "components")
}

/// Write the build section
pub(super) fn write_build<W: IoWrite>(writer: &mut Writer<W>, model: &Model) -> Result<()> {
    let mut build_elem = BytesStart::new("build");
    if let Some(uuid) = model.build_uuid() {
        build_elem.push_attribute(("p:UUID", uuid));
    }
    if model.build_items().is_empty() {
        return empty(writer, build_elem, "build");
    }

    start(writer, build_elem, "build")?;
    for item in model.build_items() {
        model.object(item.object_id()).map_err(|_| {
            Error::InvalidReference(format!(
                "build item references missing object {}",
                item.object_id()
            ))
        })?;

        let mut elem = BytesStart::new("item");
        elem.push_attribute(("objectid", item.object_id().to_string().as_str()));
        if let Some(transform) = &item.transform {
            elem.push_attribute(("transform", transform.to_string().as_str()));
        }
        if let Some(part_number) = &item.part_number {
            elem.push_attribute(("partnumber", part_number.as_str()));
        }
        if let Some(uuid) = item.uuid() {
            elem.push_attribute(("p:UUID", uuid));
        }
        empty(writer, elem, "item")?;
    }
    end(writer, "build")
}
