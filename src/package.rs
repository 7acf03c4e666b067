//! Named part buffers exchanged with the container layer
//!
//! The archive reader/writer lives outside this crate. It hands over every
//! part of a 3MF package as a path and a byte buffer, and takes the same shape
//! back on save.

use std::collections::BTreeMap;

/// Path of the primary model part
pub const MODEL_PART_PATH: &str = "/3D/3dmodel.model";

/// Path of the secure content keystore part
pub const KEYSTORE_PART_PATH: &str = "/Secure/keystore.xml";

/// Normalise a part name to an absolute package path
///
/// ```
/// use lib3mf_core::package::normalize_part_path;
/// assert_eq!(normalize_part_path("3D/3dmodel.model"), "/3D/3dmodel.model");
/// assert_eq!(normalize_part_path("/3D/3dmodel.model"), "/3D/3dmodel.model");
/// ```
pub fn normalize_part_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

/// In-memory set of package parts keyed by absolute path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    parts: BTreeMap<String, Vec<u8>>,
}

impl Package {
    /// Empty package
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a part
    pub fn insert_part(&mut self, path: &str, bytes: Vec<u8>) {
        self.parts.insert(normalize_part_path(path), bytes);
    }

    /// Bytes of a part
    pub fn part(&self, path: &str) -> Option<&[u8]> {
        self.parts.get(&normalize_part_path(path)).map(Vec::as_slice)
    }

    /// Mutable bytes of a part
    pub fn part_mut(&mut self, path: &str) -> Option<&mut Vec<u8>> {
        self.parts.get_mut(&normalize_part_path(path))
    }

    /// Whether a part exists
    pub fn has_part(&self, path: &str) -> bool {
        self.parts.contains_key(&normalize_part_path(path))
    }

    /// Remove a part
    pub fn remove_part(&mut self, path: &str) -> Option<Vec<u8>> {
        self.parts.remove(&normalize_part_path(path))
    }

    /// Part paths in sorted order
    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    /// Number of parts
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// True when the package has no parts
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
