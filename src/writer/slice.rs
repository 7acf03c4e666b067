//! Slice extension writing

use crate::error::Result;
use crate::model::{Slice, SliceStack};
use quick_xml::Writer;
use quick_xml::events::BytesStart;
use std::io::Write as IoWrite;

use super::{empty, end, start};

/// Write a slice stack with all its slices
pub(super) fn write_slice_stack<W: IoWrite>(
    writer: &mut Writer<W>,
    stack: &SliceStack,
) -> Result<()> {
    let mut elem = BytesStart::new("s:slicestack");
    elem.push_attribute(("id", stack.id().to_string().as_str()));
    if stack.zbottom != 0.0 {
        elem.push_attribute(("zbottom", stack.zbottom.to_string().as_str()));
    }
    if stack.slices.is_empty() {
        return empty(writer, elem, "s:slicestack");
    }

    start(writer, elem, "s:slicestack")?;
    for slice in &stack.slices {
        write_slice(writer, slice)?;
    }
    end(writer, "s:slicestack")
}

fn write_slice<W: IoWrite>(writer: &mut Writer<W>, slice: &Slice) -> Result<()> {
    let mut elem = BytesStart::new("s:slice");
    elem.push_attribute(("ztop", slice.ztop.to_string().as_str()));
    if slice.vertices.is_empty() && slice.polygons.is_empty() {
        return empty(writer, elem, "s:slice");
    }
    start(writer, elem, "s:slice")?;

    start(writer, BytesStart::new("s:vertices"), "s:vertices")?;
    for vertex in &slice.vertices {
        let mut v_elem = BytesStart::new("s:vertex");
        v_elem.push_attribute(("x", vertex.x.to_string().as_str()));
        v_elem.push_attribute(("y", vertex.y.to_string().as_str()));
        empty(writer, v_elem, "s:vertex")?;
    }
    end(writer, "s:vertices")?;

    for polygon in &slice.polygons {
        let mut p_elem = BytesStart::new("s:polygon");
        p_elem.push_attribute(("startv", polygon.startv.to_string().as_str()));
        start(writer, p_elem, "s:polygon")?;
        for v2 in &polygon.segments {
            let mut s_elem = BytesStart::new("s:segment");
            s_elem.push_attribute(("v2", v2.to_string().as_str()));
            empty(writer, s_elem, "s:segment")?;
        }
        end(writer, "s:polygon")?;
    }

    end(writer, "s:slice")
}
