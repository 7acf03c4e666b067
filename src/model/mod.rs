//! Resource graph of a 3MF document
//!
//! A [`Model`] owns every resource in an arena indexed by id. Cross references
//! (component to object, build item to object, object to slice stack) are
//! stored as ids and resolved through the model on demand, so every mutation
//! that could create a dangling reference or a cycle goes through a `Model`
//! method that checks it first.

mod config;
mod core;
mod material;
mod secure_content;
mod slice;

pub use config::{Extension, ParserConfig};
pub use core::{
    Build, BuildItem, Component, Mesh, MetadataEntry, Object, ObjectKind, ObjectType,
    ResourceId, SlicesMeshResolution, Transform, Triangle, Unit, Vertex,
};
pub use material::{BaseMaterial, BaseMaterialGroup, Color};
pub use secure_content::{
    Consumer, DecryptRight, EncryptionAlgorithm, KeyStore, ResourceData, ResourceDataHandle,
};
pub use slice::{Slice, SlicePolygon, SliceStack, Vertex2D};

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Any entity owned by the resource graph
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    /// Mesh or components object
    Object(Object),
    /// Base material group
    BaseMaterials(BaseMaterialGroup),
    /// Slice stack
    SliceStack(SliceStack),
}

impl Resource {
    /// Resource id
    pub fn id(&self) -> ResourceId {
        match self {
            Resource::Object(o) => o.id,
            Resource::BaseMaterials(g) => g.id,
            Resource::SliceStack(s) => s.id,
        }
    }

    /// Element name of this kind of resource
    pub fn kind_name(&self) -> &'static str {
        match self {
            Resource::Object(_) => "object",
            Resource::BaseMaterials(_) => "basematerials",
            Resource::SliceStack(_) => "slicestack",
        }
    }

    /// The object, or `InvalidObject` for other kinds
    pub fn object(&self) -> Result<&Object> {
        match self {
            Resource::Object(o) => Ok(o),
            other => Err(Error::InvalidObject(format!(
                "resource {} is a {}, not an object",
                other.id(),
                other.kind_name()
            ))),
        }
    }

    /// Mutable object, or `InvalidObject` for other kinds
    pub fn object_mut(&mut self) -> Result<&mut Object> {
        match self {
            Resource::Object(o) => Ok(o),
            other => Err(Error::InvalidObject(format!(
                "resource {} is a {}, not an object",
                other.id(),
                other.kind_name()
            ))),
        }
    }

    /// The base material group, or `UnknownModelResource` for other kinds
    pub fn base_material_group(&self) -> Result<&BaseMaterialGroup> {
        match self {
            Resource::BaseMaterials(g) => Ok(g),
            other => Err(Error::UnknownModelResource(format!(
                "resource {} is a {}, not a base material group",
                other.id(),
                other.kind_name()
            ))),
        }
    }

    /// The slice stack, or `InvalidSliceStackResource` for other kinds
    pub fn slice_stack(&self) -> Result<&SliceStack> {
        match self {
            Resource::SliceStack(s) => Ok(s),
            other => Err(Error::InvalidSliceStackResource(format!(
                "resource {} is a {}, not a slice stack",
                other.id(),
                other.kind_name()
            ))),
        }
    }
}

impl From<Object> for Resource {
    fn from(object: Object) -> Self {
        Resource::Object(object)
    }
}

impl From<BaseMaterialGroup> for Resource {
    fn from(group: BaseMaterialGroup) -> Self {
        Resource::BaseMaterials(group)
    }
}

impl From<SliceStack> for Resource {
    fn from(stack: SliceStack) -> Self {
        Resource::SliceStack(stack)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UuidOwner {
    Object(ResourceId),
    Component(ResourceId, usize),
    BuildItem(usize),
    Build,
    Pending,
}

/// Validate a UUID and return it in lowercase hyphenated form
pub(crate) fn canonical_uuid(value: &str) -> Result<String> {
    uuid::Uuid::parse_str(value)
        .map(|u| u.hyphenated().to_string())
        .map_err(|e| Error::InvalidParam(format!("invalid UUID '{}': {}", value, e)))
}

/// Complete 3MF document: resources, build, metadata and keystore
#[derive(Debug, Clone, Default)]
pub struct Model {
    /// Unit of measurement
    pub unit: Unit,
    /// `xml:lang` of the model part
    pub language: Option<String>,
    /// Model-level metadata
    pub metadata: Vec<MetadataEntry>,
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
    /// Lowest id never handed out; ids are not reused after removal
    next_id: u64,
    build: Build,
    keystore: KeyStore,
}

impl Model {
    /// Create an empty model
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Fresh id that has never been used in this model
    pub fn next_resource_id(&self) -> Result<ResourceId> {
        ResourceId::try_from(self.next_id.max(1))
            .map_err(|_| Error::InvalidParam("resource id space exhausted".to_string()))
    }

    /// Add a resource with its own id
    ///
    /// Fails with [`Error::DuplicateId`] for a reused id, and for objects with
    /// the reference and UUID errors described on [`Model::add_component`] and
    /// [`Model::set_object_uuid`].
    pub fn add_resource(&mut self, resource: impl Into<Resource>) -> Result<ResourceId> {
        let mut resource = resource.into();
        let id = resource.id();
        if id == 0 {
            return Err(Error::InvalidParam("resource id 0 is reserved".to_string()));
        }
        if self.index.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }
        if let Resource::Object(object) = &mut resource {
            self.check_new_object(object)?;
        }

        self.index.insert(id, self.resources.len());
        self.resources.push(resource);
        self.next_id = self.next_id.max(u64::from(id) + 1);
        tracing::trace!(id, "resource added");
        Ok(id)
    }

    fn check_new_object(&self, object: &mut Object) -> Result<()> {
        let mut local = HashSet::new();
        if let Some(uuid) = object.uuid.take() {
            let uuid = self.claim_uuid(&uuid, UuidOwner::Pending)?;
            local.insert(uuid.clone());
            object.uuid = Some(uuid);
        }

        for component in object.component_slice() {
            self.check_component_target(object.id, component.object_id)?;
        }
        if let ObjectKind::Components(components) = &mut object.kind {
            for component in components.iter_mut() {
                if let Some(uuid) = component.uuid.take() {
                    let uuid = self.claim_uuid(&uuid, UuidOwner::Pending)?;
                    if !local.insert(uuid.clone()) {
                        return Err(Error::DuplicateUuid(uuid));
                    }
                    component.uuid = Some(uuid);
                }
            }
        }

        if let Some(stack) = object.slice_stack_id {
            self.slice_stack(stack)?;
        }
        if let Some(pid) = object.pid {
            self.resource(pid)?.base_material_group().map_err(|_| {
                Error::InvalidReference(format!(
                    "object {} pid {} is not a property resource",
                    object.id, pid
                ))
            })?;
        }
        Ok(())
    }

    fn check_component_target(&self, container: ResourceId, target: ResourceId) -> Result<()> {
        if container == target || self.reaches(target, container) {
            return Err(Error::CircularReference { container, target });
        }
        self.object(target).map(|_| ())
    }

    /// Whether `goal` is reachable from `from` through component references
    fn reaches(&self, from: ResourceId, goal: ResourceId) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == goal {
                return true;
            }
            if !visited.insert(id) || visited.len() > self.resources.len() {
                continue;
            }
            if let Some(Resource::Object(object)) = self.find_resource(id) {
                stack.extend(object.component_slice().iter().map(|c| c.object_id));
            }
        }
        false
    }

    fn find_uuid(&self, uuid: &str) -> Option<UuidOwner> {
        for object in self.objects() {
            if object.uuid() == Some(uuid) {
                return Some(UuidOwner::Object(object.id));
            }
            for (i, component) in object.component_slice().iter().enumerate() {
                if component.uuid() == Some(uuid) {
                    return Some(UuidOwner::Component(object.id, i));
                }
            }
        }
        if let Some(i) = self.build.items.iter().position(|b| b.uuid() == Some(uuid)) {
            return Some(UuidOwner::BuildItem(i));
        }
        if self.build.uuid.as_deref() == Some(uuid) {
            return Some(UuidOwner::Build);
        }
        None
    }

    fn claim_uuid(&self, uuid: &str, owner: UuidOwner) -> Result<String> {
        let canonical = canonical_uuid(uuid)?;
        match self.find_uuid(&canonical) {
            Some(existing) if existing != owner => Err(Error::DuplicateUuid(canonical)),
            _ => Ok(canonical),
        }
    }

    /// Allocate an id and add a mesh object
    pub fn add_mesh_object(&mut self, mesh: Mesh) -> Result<ResourceId> {
        let id = self.next_resource_id()?;
        self.add_resource(Object::new_mesh(id, mesh))
    }

    /// Allocate an id and add an empty components object
    pub fn add_components_object(&mut self) -> Result<ResourceId> {
        let id = self.next_resource_id()?;
        self.add_resource(Object::new_components(id))
    }

    /// Allocate an id and add an empty base material group
    pub fn add_base_material_group(&mut self) -> Result<ResourceId> {
        let id = self.next_resource_id()?;
        self.add_resource(BaseMaterialGroup::new(id))
    }

    /// Allocate an id and add an empty slice stack
    pub fn add_slice_stack(&mut self, zbottom: f64) -> Result<ResourceId> {
        let id = self.next_resource_id()?;
        self.add_resource(SliceStack::new(id, zbottom))
    }

    /// Look up a resource; `None` when the id is unknown
    pub fn find_resource(&self, id: ResourceId) -> Option<&Resource> {
        self.index.get(&id).map(|&i| &self.resources[i])
    }

    /// Look up a resource that must exist
    pub fn resource(&self, id: ResourceId) -> Result<&Resource> {
        self.find_resource(id)
            .ok_or_else(|| Error::InvalidReference(format!("resource {} does not exist", id)))
    }

    fn resource_mut(&mut self, id: ResourceId) -> Result<&mut Resource> {
        match self.index.get(&id) {
            Some(&i) => Ok(&mut self.resources[i]),
            None => Err(Error::InvalidReference(format!(
                "resource {} does not exist",
                id
            ))),
        }
    }

    /// Remove a resource; references to it are left for the caller to repair
    pub fn remove_resource(&mut self, id: ResourceId) -> Result<Resource> {
        let position = *self
            .index
            .get(&id)
            .ok_or_else(|| Error::InvalidReference(format!("resource {} does not exist", id)))?;
        let removed = self.resources.remove(position);
        self.index = self
            .resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id(), i))
            .collect();
        tracing::trace!(id, "resource removed");
        Ok(removed)
    }

    /// Resources in insertion order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Objects in insertion order
    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.resources.iter().filter_map(|r| match r {
            Resource::Object(o) => Some(o),
            _ => None,
        })
    }

    /// Object by id
    pub fn object(&self, id: ResourceId) -> Result<&Object> {
        self.resource(id)?.object()
    }

    /// Mutable object by id
    pub fn object_mut(&mut self, id: ResourceId) -> Result<&mut Object> {
        self.resource_mut(id)?.object_mut()
    }

    /// Base material group by id
    pub fn base_material_group(&self, id: ResourceId) -> Result<&BaseMaterialGroup> {
        self.resource(id)?.base_material_group()
    }

    /// Mutable base material group by id
    pub fn base_material_group_mut(&mut self, id: ResourceId) -> Result<&mut BaseMaterialGroup> {
        match self.resource_mut(id)? {
            Resource::BaseMaterials(g) => Ok(g),
            other => Err(Error::UnknownModelResource(format!(
                "resource {} is a {}, not a base material group",
                id,
                other.kind_name()
            ))),
        }
    }

    /// Slice stack by id; any failure is `InvalidSliceStackResource`
    pub fn slice_stack(&self, id: ResourceId) -> Result<&SliceStack> {
        match self.find_resource(id) {
            Some(resource) => resource.slice_stack(),
            None => Err(Error::InvalidSliceStackResource(format!(
                "slice stack {} does not exist",
                id
            ))),
        }
    }

    /// Mutable slice stack by id
    pub fn slice_stack_mut(&mut self, id: ResourceId) -> Result<&mut SliceStack> {
        self.slice_stack(id)?;
        match self.resource_mut(id)? {
            Resource::SliceStack(s) => Ok(s),
            _ => Err(Error::InvalidSliceStackResource(format!(
                "resource {} is not a slice stack",
                id
            ))),
        }
    }

    /// Append a component to a components object
    ///
    /// Fails with [`Error::InvalidReference`] when the target does not exist,
    /// [`Error::InvalidCast`] when `object_id` is a mesh object,
    /// [`Error::CircularReference`] when the target already (transitively)
    /// contains `object_id`, and [`Error::DuplicateUuid`] for a reused UUID.
    pub fn add_component(&mut self, object_id: ResourceId, mut component: Component) -> Result<()> {
        let container = self.object(object_id)?;
        let index = container.as_components()?.len();
        self.check_component_target(object_id, component.object_id)?;
        if let Some(uuid) = component.uuid.take() {
            component.uuid = Some(self.claim_uuid(&uuid, UuidOwner::Component(object_id, index))?);
        }
        self.object_mut(object_id)?.components_mut()?.push(component);
        Ok(())
    }

    /// Point an existing component at another object
    pub fn set_component_object(
        &mut self,
        object_id: ResourceId,
        index: usize,
        target: ResourceId,
    ) -> Result<()> {
        self.component(object_id, index)?;
        self.check_component_target(object_id, target)?;
        self.component_mut(object_id, index)?.object_id = target;
        Ok(())
    }

    /// Set or clear a component's UUID
    pub fn set_component_uuid(
        &mut self,
        object_id: ResourceId,
        index: usize,
        uuid: Option<&str>,
    ) -> Result<()> {
        self.component(object_id, index)?;
        let uuid = uuid
            .map(|u| self.claim_uuid(u, UuidOwner::Component(object_id, index)))
            .transpose()?;
        self.component_mut(object_id, index)?.uuid = uuid;
        Ok(())
    }

    /// Set or clear a component's transform
    pub fn set_component_transform(
        &mut self,
        object_id: ResourceId,
        index: usize,
        transform: Option<Transform>,
    ) -> Result<()> {
        self.component_mut(object_id, index)?.set_transform(transform);
        Ok(())
    }

    /// Remove a component from a components object
    pub fn remove_component(&mut self, object_id: ResourceId, index: usize) -> Result<Component> {
        self.component(object_id, index)?;
        Ok(self.object_mut(object_id)?.components_mut()?.remove(index))
    }

    /// Component `index` of `object_id`
    pub fn component(&self, object_id: ResourceId, index: usize) -> Result<&Component> {
        let components = self.object(object_id)?.as_components()?;
        components.get(index).ok_or_else(|| {
            Error::InvalidParam(format!(
                "component index {} out of range for object {} ({} components)",
                index,
                object_id,
                components.len()
            ))
        })
    }

    fn component_mut(&mut self, object_id: ResourceId, index: usize) -> Result<&mut Component> {
        self.component(object_id, index)?;
        let components = self.object_mut(object_id)?.components_mut()?;
        components
            .get_mut(index)
            .ok_or_else(|| Error::InvalidParam(format!("component index {} out of range", index)))
    }

    /// Set or clear an object's UUID
    ///
    /// Fails with [`Error::DuplicateUuid`] when another object, component or
    /// build item already uses it.
    pub fn set_object_uuid(&mut self, object_id: ResourceId, uuid: Option<&str>) -> Result<()> {
        self.object(object_id)?;
        let uuid = uuid
            .map(|u| self.claim_uuid(u, UuidOwner::Object(object_id)))
            .transpose()?;
        self.object_mut(object_id)?.uuid = uuid;
        Ok(())
    }

    /// Attach a slice stack to an object
    pub fn assign_slice_stack(&mut self, object_id: ResourceId, stack_id: ResourceId) -> Result<()> {
        self.slice_stack(stack_id)?;
        self.object_mut(object_id)?.slice_stack_id = Some(stack_id);
        Ok(())
    }

    /// Detach any slice stack from an object
    pub fn clear_slice_stack(&mut self, object_id: ResourceId) -> Result<()> {
        self.object_mut(object_id)?.slice_stack_id = None;
        Ok(())
    }

    /// Slice stack attached to an object
    pub fn object_slice_stack(&self, object_id: ResourceId) -> Result<&SliceStack> {
        match self.object(object_id)?.slice_stack_id {
            Some(stack) => self.slice_stack(stack),
            None => Err(Error::InvalidSliceStackResource(format!(
                "object {} has no slice stack",
                object_id
            ))),
        }
    }

    /// Append a build item
    pub fn add_build_item(&mut self, mut item: BuildItem) -> Result<()> {
        self.object(item.object_id)?;
        if let Some(uuid) = item.uuid.take() {
            let owner = UuidOwner::BuildItem(self.build.items.len());
            item.uuid = Some(self.claim_uuid(&uuid, owner)?);
        }
        self.build.items.push(item);
        Ok(())
    }

    /// Build items in insertion order
    pub fn build_items(&self) -> &[BuildItem] {
        &self.build.items
    }

    /// Mutable build item for editing its transform or part number
    pub fn build_item_mut(&mut self, index: usize) -> Result<&mut BuildItem> {
        let count = self.build.items.len();
        self.build.items.get_mut(index).ok_or_else(|| {
            Error::InvalidParam(format!(
                "build item index {} out of range ({} items)",
                index, count
            ))
        })
    }

    /// Remove a build item
    pub fn remove_build_item(&mut self, index: usize) -> Result<BuildItem> {
        self.build_item_mut(index)?;
        Ok(self.build.items.remove(index))
    }

    /// Set or clear a build item's UUID
    pub fn set_build_item_uuid(&mut self, index: usize, uuid: Option<&str>) -> Result<()> {
        self.build_item_mut(index)?;
        let uuid = uuid
            .map(|u| self.claim_uuid(u, UuidOwner::BuildItem(index)))
            .transpose()?;
        self.build.items[index].uuid = uuid;
        Ok(())
    }

    /// UUID of the build element
    pub fn build_uuid(&self) -> Option<&str> {
        self.build.uuid.as_deref()
    }

    /// Set or clear the UUID of the build element
    pub fn set_build_uuid(&mut self, uuid: Option<&str>) -> Result<()> {
        self.build.uuid = uuid
            .map(|u| self.claim_uuid(u, UuidOwner::Build))
            .transpose()?;
        Ok(())
    }

    /// Value of the metadata entry `name`
    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.value.as_str())
    }

    /// Keystore of the package
    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    /// Mutable keystore
    pub fn keystore_mut(&mut self) -> &mut KeyStore {
        &mut self.keystore
    }

    /// Replace the keystore
    pub fn set_keystore(&mut self, keystore: KeyStore) {
        self.keystore = keystore;
    }

    /// Check that every object is buildable and every reference resolves
    ///
    /// Removal does not cascade, so this is the place dangling references
    /// left behind by [`Model::remove_resource`] are reported.
    pub fn validate(&self) -> Result<()> {
        for object in self.objects() {
            if !object.is_valid() {
                return Err(Error::InvalidObject(format!(
                    "object {} is not valid: {}",
                    object.id,
                    match object.kind() {
                        ObjectKind::Mesh(_) => "mesh is empty or has invalid triangles",
                        ObjectKind::Components(_) => "components object has no components",
                    }
                )));
            }
            for component in object.component_slice() {
                self.object(component.object_id).map_err(|_| {
                    Error::InvalidReference(format!(
                        "object {} has a component referencing missing object {}",
                        object.id, component.object_id
                    ))
                })?;
            }
            if let Some(stack) = object.slice_stack_id {
                self.slice_stack(stack)?;
            }
        }
        for item in &self.build.items {
            self.object(item.object_id).map_err(|_| {
                Error::InvalidReference(format!(
                    "build item references missing object {}",
                    item.object_id
                ))
            })?;
        }
        Ok(())
    }
}
