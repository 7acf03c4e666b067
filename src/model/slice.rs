//! Slice extension types

use super::core::ResourceId;

/// A 2D vertex inside a slice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex2D {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Vertex2D {
    /// Create a new 2D vertex
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A closed or open polyline in a slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicePolygon {
    /// Starting vertex index
    pub startv: u32,
    /// End vertex of each segment; the start is the previous end
    pub segments: Vec<u32>,
}

impl SlicePolygon {
    /// Create a polygon starting at `startv`
    pub fn new(startv: u32) -> Self {
        Self {
            startv,
            segments: Vec::new(),
        }
    }
}

/// A single slice at a specific Z height
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    /// Z coordinate of the top of this slice
    pub ztop: f64,
    /// 2D vertices
    pub vertices: Vec<Vertex2D>,
    /// Polygons over `vertices`
    pub polygons: Vec<SlicePolygon>,
}

impl Slice {
    /// Create an empty slice
    pub fn new(ztop: f64) -> Self {
        Self {
            ztop,
            vertices: Vec::new(),
            polygons: Vec::new(),
        }
    }
}

/// A stack of slices, attachable to objects
#[derive(Debug, Clone, PartialEq)]
pub struct SliceStack {
    pub(crate) id: ResourceId,
    /// Z coordinate of the bottom of the stack
    pub zbottom: f64,
    /// Slices, bottom to top
    pub slices: Vec<Slice>,
}

impl SliceStack {
    /// Create an empty slice stack
    pub fn new(id: ResourceId, zbottom: f64) -> Self {
        Self {
            id,
            zbottom,
            slices: Vec::new(),
        }
    }

    /// Resource id
    pub fn id(&self) -> ResourceId {
        self.id
    }
}
