//! Slice extension parsing

use crate::error::{Error, Result, WarningLevel};
use crate::model::{Extension, Model, Slice, SlicePolygon, SliceStack, Vertex2D};

use super::{
    AttributeKind, ChildEntry, ReadContext, StartTag, XmlCursor, XmlNamespace, dispatch,
    parse_finite, parse_number, parse_resource_id, read_text, visit_attributes,
};

const NONE: XmlNamespace = XmlNamespace::Unqualified;

const STACK_CHILDREN: &[ChildEntry<Vec<Slice>>] = &[(Extension::Slice, "slice", read_slice)];

const SLICE_CHILDREN: &[ChildEntry<Slice>] = &[
    (Extension::Slice, "vertices", read_vertices),
    (Extension::Slice, "polygon", read_polygon),
];

const VERTICES_CHILDREN: &[ChildEntry<Slice>] = &[(Extension::Slice, "vertex", read_vertex)];

const POLYGON_CHILDREN: &[ChildEntry<SlicePolygon>] =
    &[(Extension::Slice, "segment", read_segment)];

pub(super) fn read_slice_stack(
    model: &mut Model,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut id = None;
    let mut zbottom = 0.0;
    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (NONE, "id") => {
            id = Some(parse_resource_id(tag, attr)?);
            Ok(AttributeKind::Identity)
        }
        (NONE, "zbottom") => {
            match parse_finite(tag, attr) {
                Ok(value) => zbottom = value,
                Err(_) => ctx.invalid_value(
                    tag,
                    attr,
                    WarningLevel::InvalidOptionalValue,
                    "a finite number",
                )?,
            }
            Ok(AttributeKind::Optional)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;
    let id = id.ok_or_else(|| Error::missing_attribute("slicestack", "id"))?;

    let mut slices = Vec::new();
    dispatch(&mut slices, ctx, cursor, tag, STACK_CHILDREN)?;

    let mut stack = SliceStack::new(id, zbottom);
    stack.slices = slices;
    model.add_resource(stack)?;
    Ok(())
}

fn read_slice(
    slices: &mut Vec<Slice>,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut ztop = None;
    let mut malformed = false;
    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (NONE, "ztop") => {
            match parse_finite(tag, attr) {
                Ok(value) => ztop = Some(value),
                Err(_) => {
                    malformed = true;
                    ctx.invalid_value(
                        tag,
                        attr,
                        WarningLevel::InvalidMandatoryValue,
                        "a finite number",
                    )?;
                }
            }
            Ok(AttributeKind::Mandatory)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;

    let mut slice = Slice::new(ztop.unwrap_or_default());
    dispatch(&mut slice, ctx, cursor, tag, SLICE_CHILDREN)?;

    match ztop {
        Some(_) => slices.push(slice),
        None if malformed => {}
        None => ctx.missing_attribute(tag, "ztop", "slice without ztop skipped")?,
    }
    Ok(())
}

fn read_vertices(
    slice: &mut Slice,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    dispatch(slice, ctx, cursor, tag, VERTICES_CHILDREN)?;
    Ok(())
}

fn read_vertex(
    slice: &mut Slice,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let (mut x, mut y) = (None, None);
    visit_attributes(ctx, tag, |_, attr| {
        let slot = match attr.key() {
            (NONE, "x") => &mut x,
            (NONE, "y") => &mut y,
            _ => return Ok(AttributeKind::Unknown),
        };
        *slot = Some(parse_finite(tag, attr)?);
        Ok(AttributeKind::Mandatory)
    })?;
    read_text(ctx, cursor, tag)?;

    slice.vertices.push(Vertex2D::new(
        x.ok_or_else(|| Error::missing_attribute("vertex", "x"))?,
        y.ok_or_else(|| Error::missing_attribute("vertex", "y"))?,
    ));
    Ok(())
}

fn read_polygon(
    slice: &mut Slice,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut startv = None;
    visit_attributes(ctx, tag, |_, attr| match attr.key() {
        (NONE, "startv") => {
            startv = Some(parse_number::<u32>(tag, attr, "vertex index")?);
            Ok(AttributeKind::Mandatory)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;
    let startv = startv.ok_or_else(|| Error::missing_attribute("polygon", "startv"))?;

    let mut polygon = SlicePolygon::new(startv);
    dispatch(&mut polygon, ctx, cursor, tag, POLYGON_CHILDREN)?;
    slice.polygons.push(polygon);
    Ok(())
}

fn read_segment(
    polygon: &mut SlicePolygon,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut v2 = None;
    visit_attributes(ctx, tag, |_, attr| match attr.key() {
        (NONE, "v2") => {
            v2 = Some(parse_number::<u32>(tag, attr, "vertex index")?);
            Ok(AttributeKind::Mandatory)
        }
        // Per-segment properties are not kept
        (NONE, "p1" | "p2" | "pid") => Ok(AttributeKind::Optional),
        _ => Ok(AttributeKind::Unknown),
    })?;
    read_text(ctx, cursor, tag)?;

    polygon
        .segments
        .push(v2.ok_or_else(|| Error::missing_attribute("segment", "v2"))?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::error::{Error, WarningCode, Warnings};
    use crate::model::{ParserConfig, SlicesMeshResolution};
    use crate::parser::read_model;

    fn read(resources: &str) -> crate::Result<(crate::model::Model, Warnings)> {
        let xml = format!(
            r#"<model xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02"
                xmlns:s="http://schemas.microsoft.com/3dmanufacturing/slice/2015/07">
              <resources>{}</resources><build/></model>"#,
            resources
        );
        let mut warnings = Warnings::new();
        let model = read_model(xml.as_bytes(), &ParserConfig::default(), &mut warnings)?;
        Ok((model, warnings))
    }

    const STACK: &str = r#"<s:slicestack id="1" zbottom="0.5">
        <s:slice ztop="1.0">
          <s:vertices>
            <s:vertex x="0" y="0"/><s:vertex x="10" y="0"/><s:vertex x="10" y="10"/>
          </s:vertices>
          <s:polygon startv="0"><s:segment v2="1"/><s:segment v2="2"/><s:segment v2="0"/></s:polygon>
        </s:slice>
        <s:slice ztop="oops"/>
        <s:slice ztop="2.0"/>
      </s:slicestack>"#;

    #[test]
    fn test_slice_stack_and_reference() {
        let resources = format!(
            r#"{}<object id="2" s:slicestackid="1" s:meshresolution="lowres">
                 <mesh><vertices>
                   <vertex x="0" y="0" z="0"/><vertex x="1" y="0" z="0"/><vertex x="0" y="1" z="0"/>
                 </vertices><triangles><triangle v1="0" v2="1" v3="2"/></triangles></mesh>
               </object>"#,
            STACK
        );
        let (model, warnings) = read(&resources).unwrap();

        let stack = model.slice_stack(1).unwrap();
        assert_eq!(stack.zbottom, 0.5);
        assert_eq!(stack.slices.len(), 2);
        assert_eq!(stack.slices[0].vertices.len(), 3);
        assert_eq!(stack.slices[0].polygons[0].segments, vec![1, 2, 0]);
        assert_eq!(stack.slices[1].ztop, 2.0);
        assert_eq!(warnings.count(WarningCode::InvalidValue), 1);

        let object = model.object(2).unwrap();
        assert_eq!(object.slice_stack_id(), Some(1));
        assert_eq!(object.slices_mesh_resolution, SlicesMeshResolution::LowRes);
        assert_eq!(model.object_slice_stack(2).unwrap().id(), 1);
    }

    #[test]
    fn test_reference_to_missing_stack_is_fatal() {
        let resources = r#"<object id="2" s:slicestackid="9"><components/></object>"#;
        assert!(matches!(
            read(resources),
            Err(Error::InvalidSliceStackResource(_))
        ));
    }
}
