//! Base material writing
//!
//! Groups are written in the core namespace; colors use `#RRGGBB` unless the
//! alpha channel is not opaque.

use crate::error::Result;
use crate::model::BaseMaterialGroup;
use quick_xml::Writer;
use quick_xml::events::BytesStart;
use std::io::Write as IoWrite;

use super::{empty, end, start};

/// Write a base material group
pub(super) fn write_base_material_group<W: IoWrite>(
    writer: &mut Writer<W>,
    group: &BaseMaterialGroup,
) -> Result<()> {
    let mut elem = BytesStart::new("basematerials");
    elem.push_attribute(("id", group.id().to_string().as_str()));
    if group.materials.is_empty() {
        return empty(writer, elem, "basematerials");
    }

    start(writer, elem, "basematerials")?;
    for material in &group.materials {
        let mut mat_elem = BytesStart::new("base");
        mat_elem.push_attribute(("name", material.name.as_str()));
        mat_elem.push_attribute(("displaycolor", material.display_color.to_string().as_str()));
        empty(writer, mat_elem, "base")?;
    }
    end(writer, "basematerials")
}
