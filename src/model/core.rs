//! Core 3MF types: meshes, objects, components, build items and metadata

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Identifier of a resource inside one model
pub type ResourceId = u32;

/// Number of values in a 3MF transform attribute (a 4x3 matrix)
const TRANSFORM_MATRIX_SIZE: usize = 12;

/// Unit of measurement for model coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unit {
    /// Micrometres
    Micron,
    /// Millimetres
    #[default]
    Millimeter,
    /// Centimetres
    Centimeter,
    /// Inches
    Inch,
    /// Feet
    Foot,
    /// Metres
    Meter,
}

impl Unit {
    /// Token used in the `unit` attribute
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Micron => "micron",
            Unit::Millimeter => "millimeter",
            Unit::Centimeter => "centimeter",
            Unit::Inch => "inch",
            Unit::Foot => "foot",
            Unit::Meter => "meter",
        }
    }

    /// Parse a `unit` token
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "micron" => Some(Unit::Micron),
            "millimeter" => Some(Unit::Millimeter),
            "centimeter" => Some(Unit::Centimeter),
            "inch" => Some(Unit::Inch),
            "foot" => Some(Unit::Foot),
            "meter" => Some(Unit::Meter),
            _ => None,
        }
    }
}

/// Metadata entry with name, value and preserve flag
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    /// Metadata name (may carry a namespace prefix)
    pub name: String,
    /// Metadata value
    pub value: String,
    /// Whether consumers should keep this entry when re-saving
    pub preserve: Option<bool>,
}

impl MetadataEntry {
    /// Create a new metadata entry
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            preserve: None,
        }
    }
}

/// A vertex in a triangle mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Vertex {
    /// Create a new vertex
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A triangle in a mesh, referencing three vertices by index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    /// Index of first vertex
    pub v1: u32,
    /// Index of second vertex
    pub v2: u32,
    /// Index of third vertex
    pub v3: u32,
    /// Property group id for the whole triangle
    pub pid: Option<ResourceId>,
    /// Property index for vertex 1
    pub p1: Option<u32>,
    /// Property index for vertex 2
    pub p2: Option<u32>,
    /// Property index for vertex 3
    pub p3: Option<u32>,
}

impl Triangle {
    /// Create a new triangle without properties
    pub fn new(v1: u32, v2: u32, v3: u32) -> Self {
        Self {
            v1,
            v2,
            v3,
            pid: None,
            p1: None,
            p2: None,
            p3: None,
        }
    }
}

/// Triangle mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    /// List of vertices
    pub vertices: Vec<Vertex>,
    /// List of triangles
    pub triangles: Vec<Triangle>,
}

impl Mesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a vertex and return its index
    pub fn add_vertex(&mut self, x: f64, y: f64, z: f64) -> u32 {
        self.vertices.push(Vertex::new(x, y, z));
        (self.vertices.len() - 1) as u32
    }

    /// Append a triangle
    pub fn add_triangle(&mut self, v1: u32, v2: u32, v3: u32) {
        self.triangles.push(Triangle::new(v1, v2, v3));
    }

    /// Index of the first triangle that is out of range or repeats a vertex
    pub fn first_invalid_triangle(&self) -> Option<usize> {
        let count = self.vertices.len() as u64;
        self.triangles.iter().position(|t| {
            let in_range = [t.v1, t.v2, t.v3].iter().all(|&v| u64::from(v) < count);
            !in_range || t.v1 == t.v2 || t.v2 == t.v3 || t.v1 == t.v3
        })
    }

    /// A buildable mesh has three or more vertices, at least one triangle,
    /// and only well-formed triangles
    pub fn is_valid(&self) -> bool {
        self.vertices.len() >= 3
            && !self.triangles.is_empty()
            && self.first_invalid_triangle().is_none()
    }
}

/// Affine transform stored as the 4x3 matrix used by 3MF
///
/// Row `i` holds `m[i][0..3]`; the implied fourth column is `(0, 0, 0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Matrix rows; the last row is the translation
    pub fields: [[f64; 3]; 4],
}

impl Transform {
    /// Identity transform
    pub fn identity() -> Self {
        Self {
            fields: [
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [0.0, 0.0, 0.0],
            ],
        }
    }

    /// Build a transform from its rows
    pub fn from_fields(fields: [[f64; 3]; 4]) -> Self {
        Self { fields }
    }

    /// Pure translation
    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut transform = Self::identity();
        transform.fields[3] = [x, y, z];
        transform
    }

    /// True when every field equals the identity
    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl FromStr for Transform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let values: Vec<f64> = s
            .split_whitespace()
            .map(|v| {
                v.parse::<f64>().map_err(|_| {
                    Error::parse_error_with_context("transform value", v, "floating-point number")
                })
            })
            .collect::<Result<_>>()?;

        if values.len() != TRANSFORM_MATRIX_SIZE {
            return Err(Error::InvalidParam(format!(
                "transform must have {} values, got {}",
                TRANSFORM_MATRIX_SIZE,
                values.len()
            )));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(Error::InvalidParam(format!(
                "transform contains non-finite value {}",
                bad
            )));
        }

        let mut fields = [[0.0; 3]; 4];
        for (i, value) in values.into_iter().enumerate() {
            fields[i / 3][i % 3] = value;
        }
        Ok(Self { fields })
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for value in self.fields.iter().flatten() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}", value)?;
            first = false;
        }
        Ok(())
    }
}

/// Component referencing another object
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub(crate) object_id: ResourceId,
    /// Optional placement of the referenced object
    pub transform: Option<Transform>,
    pub(crate) uuid: Option<String>,
}

impl Component {
    /// Create a component pointing at `object_id`
    pub fn new(object_id: ResourceId) -> Self {
        Self {
            object_id,
            transform: None,
            uuid: None,
        }
    }

    /// Builder-style transform
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Builder-style UUID; checked for uniqueness when the component is added
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Id of the referenced object
    pub fn object_id(&self) -> ResourceId {
        self.object_id
    }

    /// Production UUID
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// True when a transform is set
    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }

    /// Replace the transform
    pub fn set_transform(&mut self, transform: Option<Transform>) {
        self.transform = transform;
    }
}

/// Type of 3D object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectType {
    /// A standard model object
    #[default]
    Model,
    /// A support structure
    Support,
    /// A solid support structure
    SolidSupport,
    /// A surface object
    Surface,
    /// Other types
    Other,
}

impl ObjectType {
    /// Token used in the `type` attribute
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Model => "model",
            ObjectType::Support => "support",
            ObjectType::SolidSupport => "solidsupport",
            ObjectType::Surface => "surface",
            ObjectType::Other => "other",
        }
    }

    /// Parse a `type` token
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "model" => Some(ObjectType::Model),
            "support" => Some(ObjectType::Support),
            "solidsupport" => Some(ObjectType::SolidSupport),
            "surface" => Some(ObjectType::Surface),
            "other" => Some(ObjectType::Other),
            _ => None,
        }
    }
}

/// Which mesh a slicer should use when a slice stack is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlicesMeshResolution {
    /// Mesh matches the slices exactly
    #[default]
    FullRes,
    /// Mesh is a low resolution preview
    LowRes,
}

impl SlicesMeshResolution {
    /// Token used in the `s:meshresolution` attribute
    pub fn as_str(&self) -> &'static str {
        match self {
            SlicesMeshResolution::FullRes => "fullres",
            SlicesMeshResolution::LowRes => "lowres",
        }
    }

    /// Parse a `s:meshresolution` token
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "fullres" => Some(SlicesMeshResolution::FullRes),
            "lowres" => Some(SlicesMeshResolution::LowRes),
            _ => None,
        }
    }
}

/// Shape carried by an object
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    /// Triangle mesh
    Mesh(Mesh),
    /// Ordered references to other objects
    Components(Vec<Component>),
}

/// A buildable object: either a mesh or an assembly of components
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub(crate) id: ResourceId,
    /// Type of object
    pub object_type: ObjectType,
    /// Object name
    pub name: Option<String>,
    /// Part number
    pub part_number: Option<String>,
    /// Default property group
    pub pid: Option<ResourceId>,
    /// Default property index inside `pid`
    pub pindex: Option<u32>,
    /// Mesh resolution relative to the attached slice stack
    pub slices_mesh_resolution: SlicesMeshResolution,
    pub(crate) uuid: Option<String>,
    pub(crate) slice_stack_id: Option<ResourceId>,
    pub(crate) kind: ObjectKind,
}

impl Object {
    /// Create a mesh object
    pub fn new_mesh(id: ResourceId, mesh: Mesh) -> Self {
        Self::with_kind(id, ObjectKind::Mesh(mesh))
    }

    /// Create an empty components object
    pub fn new_components(id: ResourceId) -> Self {
        Self::with_kind(id, ObjectKind::Components(Vec::new()))
    }

    pub(crate) fn with_kind(id: ResourceId, kind: ObjectKind) -> Self {
        Self {
            id,
            object_type: ObjectType::Model,
            name: None,
            part_number: None,
            pid: None,
            pindex: None,
            slices_mesh_resolution: SlicesMeshResolution::FullRes,
            uuid: None,
            slice_stack_id: None,
            kind,
        }
    }

    /// Resource id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Shape of the object
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// Production UUID
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// Attached slice stack, if any
    pub fn slice_stack_id(&self) -> Option<ResourceId> {
        self.slice_stack_id
    }

    /// True when a slice stack is attached
    pub fn has_slice_stack(&self) -> bool {
        self.slice_stack_id.is_some()
    }

    /// True for mesh objects
    pub fn is_mesh_object(&self) -> bool {
        matches!(self.kind, ObjectKind::Mesh(_))
    }

    /// True for components objects
    pub fn is_components_object(&self) -> bool {
        matches!(self.kind, ObjectKind::Components(_))
    }

    /// The mesh, or `InvalidCast` for a components object
    pub fn as_mesh(&self) -> Result<&Mesh> {
        match &self.kind {
            ObjectKind::Mesh(mesh) => Ok(mesh),
            ObjectKind::Components(_) => Err(Error::InvalidCast(format!(
                "object {} is a components object, not a mesh object",
                self.id
            ))),
        }
    }

    /// Mutable mesh, or `InvalidCast` for a components object
    pub fn as_mesh_mut(&mut self) -> Result<&mut Mesh> {
        let id = self.id;
        match &mut self.kind {
            ObjectKind::Mesh(mesh) => Ok(mesh),
            ObjectKind::Components(_) => Err(Error::InvalidCast(format!(
                "object {} is a components object, not a mesh object",
                id
            ))),
        }
    }

    /// The components, or `InvalidCast` for a mesh object
    pub fn as_components(&self) -> Result<&[Component]> {
        match &self.kind {
            ObjectKind::Components(components) => Ok(components),
            ObjectKind::Mesh(_) => Err(Error::InvalidCast(format!(
                "object {} is a mesh object, not a components object",
                self.id
            ))),
        }
    }

    pub(crate) fn components_mut(&mut self) -> Result<&mut Vec<Component>> {
        let id = self.id;
        match &mut self.kind {
            ObjectKind::Components(components) => Ok(components),
            ObjectKind::Mesh(_) => Err(Error::InvalidCast(format!(
                "object {} is a mesh object, not a components object",
                id
            ))),
        }
    }

    /// Components of this object, empty for meshes
    pub(crate) fn component_slice(&self) -> &[Component] {
        match &self.kind {
            ObjectKind::Components(components) => components,
            ObjectKind::Mesh(_) => &[],
        }
    }

    /// Mesh objects need a valid mesh, components objects at least one component
    pub fn is_valid(&self) -> bool {
        match &self.kind {
            ObjectKind::Mesh(mesh) => mesh.is_valid(),
            ObjectKind::Components(components) => !components.is_empty(),
        }
    }
}

/// Build item referencing an object to manufacture
#[derive(Debug, Clone, PartialEq)]
pub struct BuildItem {
    pub(crate) object_id: ResourceId,
    /// Optional placement
    pub transform: Option<Transform>,
    /// Part number
    pub part_number: Option<String>,
    pub(crate) uuid: Option<String>,
}

impl BuildItem {
    /// Create a build item for `object_id`
    pub fn new(object_id: ResourceId) -> Self {
        Self {
            object_id,
            transform: None,
            part_number: None,
            uuid: None,
        }
    }

    /// Builder-style transform
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Builder-style UUID; checked for uniqueness when the item is added
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Id of the object to build
    pub fn object_id(&self) -> ResourceId {
        self.object_id
    }

    /// Production UUID
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }
}

/// Build section of a model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Build {
    pub(crate) items: Vec<BuildItem>,
    /// Production UUID of the `<build>` element
    pub(crate) uuid: Option<String>,
}
