//! Materials extension parsing
//!
//! `<basematerials>` is accepted both in the core namespace and in the
//! materials namespace.

use crate::error::{Error, Result, WarningLevel};
use crate::model::{BaseMaterial, BaseMaterialGroup, Color, Extension, Model};

use super::{
    AttributeKind, ChildEntry, ReadContext, StartTag, XmlCursor, XmlNamespace, dispatch,
    parse_resource_id, read_text, visit_attributes,
};

const NONE: XmlNamespace = XmlNamespace::Unqualified;

const GROUP_CHILDREN: &[ChildEntry<Vec<BaseMaterial>>] = &[
    (Extension::Core, "base", read_base),
    (Extension::Material, "base", read_base),
];

pub(super) fn read_base_materials(
    model: &mut Model,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut id = None;
    visit_attributes(ctx, tag, |_, attr| match attr.key() {
        (NONE, "id") => {
            id = Some(parse_resource_id(tag, attr)?);
            Ok(AttributeKind::Identity)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;
    let id = id.ok_or_else(|| Error::missing_attribute("basematerials", "id"))?;

    let mut materials = Vec::new();
    dispatch(&mut materials, ctx, cursor, tag, GROUP_CHILDREN)?;

    let mut group = BaseMaterialGroup::new(id);
    group.materials = materials;
    model.add_resource(group)?;
    Ok(())
}

fn read_base(
    materials: &mut Vec<BaseMaterial>,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<()> {
    let mut name = None;
    let mut color = None;
    let mut has_color = false;
    visit_attributes(ctx, tag, |ctx, attr| match attr.key() {
        (NONE, "name") => {
            name = Some(attr.value.clone());
            Ok(AttributeKind::Mandatory)
        }
        (NONE, "displaycolor") => {
            has_color = true;
            color = Color::from_hex(attr.value.trim());
            if color.is_none() {
                ctx.invalid_value(
                    tag,
                    attr,
                    WarningLevel::InvalidMandatoryValue,
                    "a #RRGGBB or #RRGGBBAA color",
                )?;
            }
            Ok(AttributeKind::Mandatory)
        }
        _ => Ok(AttributeKind::Unknown),
    })?;
    read_text(ctx, cursor, tag)?;

    if name.is_none() {
        ctx.missing_attribute(tag, "name", "base material without a name; using ''")?;
    }
    if !has_color {
        ctx.missing_attribute(tag, "displaycolor", "base material without a color; using white")?;
    }
    materials.push(BaseMaterial::new(
        name.unwrap_or_default(),
        color.unwrap_or_default(),
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::error::{Error, WarningCode, WarningLevel, Warnings};
    use crate::model::{Color, ParserConfig};
    use crate::parser::read_model;

    fn read(resources: &str) -> crate::Result<(crate::model::Model, Warnings)> {
        let xml = format!(
            r#"<model xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02"
                xmlns:m="http://schemas.microsoft.com/3dmanufacturing/material/2015/02">
              <resources>{}</resources><build/></model>"#,
            resources
        );
        let mut warnings = Warnings::new();
        let model = read_model(xml.as_bytes(), &ParserConfig::default(), &mut warnings)?;
        Ok((model, warnings))
    }

    #[test]
    fn test_core_and_material_namespaces() {
        let (model, warnings) = read(
            r##"<basematerials id="1">
                  <base name="PLA Red" displaycolor="#FF0000"/>
                  <base name="Glass" displaycolor="#CCE5FF80"/>
                </basematerials>
                <m:basematerials id="2"><m:base name="Steel" displaycolor="#808080"/></m:basematerials>"##,
        )
        .unwrap();
        assert!(warnings.is_empty());

        let group = model.base_material_group(1).unwrap();
        assert_eq!(group.count(), 2);
        assert_eq!(group.name(0).unwrap(), "PLA Red");
        assert_eq!(group.display_color(1).unwrap(), Color::rgba(0xCC, 0xE5, 0xFF, 0x80));
        assert_eq!(model.base_material_group(2).unwrap().name(0).unwrap(), "Steel");
    }

    #[test]
    fn test_bad_base_values_fall_back() {
        let (model, warnings) = read(
            r##"<basematerials id="1">
                  <base displaycolor="#00FF00"/>
                  <base name="Odd" displaycolor="green"/>
                </basematerials>"##,
        )
        .unwrap();
        let group = model.base_material_group(1).unwrap();
        assert_eq!(group.name(0).unwrap(), "");
        assert_eq!(group.display_color(1).unwrap(), Color::default());
        assert_eq!(warnings.count(WarningCode::MissingAttribute), 1);
        assert_eq!(warnings.count(WarningCode::InvalidValue), 1);
        assert_eq!(
            warnings.with_level(WarningLevel::InvalidMandatoryValue).count(),
            2
        );
    }

    #[test]
    fn test_missing_group_id_is_fatal() {
        assert!(matches!(
            read(r##"<basematerials><base name="x" displaycolor="#000000"/></basematerials>"##),
            Err(Error::InvalidMandatoryValue(_))
        ));
    }
}
