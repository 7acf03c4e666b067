//! # lib3mf-core
//!
//! Document engine for the 3D Manufacturing Format (3MF).
//!
//! The crate holds a 3MF document in memory as a resource graph, reads and
//! writes its XML parts, and encrypts selected parts per recipient with the
//! Secure Content extension. Opening and writing the ZIP container is left to
//! the caller: packages are exchanged as a [`Package`] of named part buffers.
//!
//! ## Features
//!
//! - Pure Rust implementation with no unsafe code
//! - Resource graph with checked references, unique UUIDs and acyclic components
//! - Loss-tolerant XML reader that records [`Warnings`] instead of failing on
//!   unknown or malformed content
//! - Materials (base materials), Production (`p:UUID`) and Slice extensions
//! - Secure Content keystore with AES-256-GCM part encryption and RSA-OAEP
//!   key wrapping through a pluggable [`CryptoProvider`]
//!
//! ## Example
//!
//! ```
//! use lib3mf_core::{Mesh, Model, BuildItem};
//!
//! # fn main() -> lib3mf_core::Result<()> {
//! let mut mesh = Mesh::new();
//! mesh.add_vertex(0.0, 0.0, 0.0);
//! mesh.add_vertex(10.0, 0.0, 0.0);
//! mesh.add_vertex(0.0, 10.0, 0.0);
//! mesh.add_triangle(0, 1, 2);
//!
//! let mut model = Model::new();
//! let id = model.add_mesh_object(mesh)?;
//! model.add_build_item(BuildItem::new(id))?;
//!
//! let xml = model.to_xml()?;
//! let (copy, warnings) = Model::from_xml(&xml)?;
//! assert!(warnings.is_empty());
//! assert_eq!(copy.object(id)?.as_mesh()?.triangles.len(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
pub mod error;
pub mod model;
pub mod package;
pub mod parser;
pub mod pipeline;
pub mod writer;

pub use crypto::{ConsumerKey, CryptoProvider};
#[cfg(feature = "crypto")]
pub use crypto::RustCryptoProvider;
pub use error::{Error, Result, Warning, WarningCode, WarningLevel, Warnings};
pub use model::{
    BaseMaterial, BaseMaterialGroup, BuildItem, Color, Component, Consumer, DecryptRight,
    EncryptionAlgorithm, Extension, KeyStore, Mesh, MetadataEntry, Model, Object, ObjectKind,
    ObjectType, ParserConfig, Resource, ResourceData, ResourceDataHandle, ResourceId, Slice,
    SlicePolygon, SliceStack, SlicesMeshResolution, Transform, Triangle, Unit, Vertex, Vertex2D,
};
pub use package::{KEYSTORE_PART_PATH, MODEL_PART_PATH, Package};
pub use pipeline::SecureContentPipeline;

use std::sync::Arc;

impl Model {
    /// Parse the XML of a model part with the default configuration
    ///
    /// All known extensions are enabled and parsing is lenient: unknown or
    /// malformed content is reported in the returned [`Warnings`].
    pub fn from_xml(xml: &[u8]) -> Result<(Self, Warnings)> {
        let mut warnings = Warnings::new();
        let model = parser::read_model(xml, &ParserConfig::default(), &mut warnings)?;
        Ok((model, warnings))
    }

    /// Serialize the resource graph as the XML of a model part
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        writer::write_model(self, &mut buffer)?;
        Ok(buffer)
    }

    /// Load a model from the parts of a package
    ///
    /// The keystore part is read first. When it flags parts for encryption and
    /// `config` carries a consumer key, every flagged part is decrypted in
    /// place, using the configured provider or, with the `crypto` feature, the
    /// default [`RustCryptoProvider`]. The model part is parsed last and the
    /// keystore is attached to the returned model.
    ///
    /// Fails with [`Error::MissingPart`] when the model part is absent and
    /// with [`Error::DecryptionFailed`] when the model part is encrypted but
    /// cannot be decrypted with the given configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use lib3mf_core::{Model, Package, ParserConfig, MODEL_PART_PATH};
    ///
    /// # fn main() -> lib3mf_core::Result<()> {
    /// let mut package = Package::new();
    /// package.insert_part(MODEL_PART_PATH, Model::new().to_xml()?);
    ///
    /// let (model, _warnings) = Model::from_package(&mut package, &ParserConfig::default())?;
    /// assert!(model.resources().is_empty());
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_package(package: &mut Package, config: &ParserConfig) -> Result<(Self, Warnings)> {
        let mut warnings = Warnings::new();
        let mut keystore = KeyStore::new();
        if let Some(xml) = package.part(KEYSTORE_PART_PATH) {
            parser::read_keystore(xml, &mut keystore, config, &mut warnings)?;
        }

        if !keystore.resource_data_entries().is_empty() {
            let provider = config.crypto_provider().cloned().or_else(default_provider);
            match (provider, config.consumer_key()) {
                (Some(provider), Some(key)) => {
                    SecureContentPipeline::new(provider.as_ref())
                        .decrypt_package(&keystore, package, key)?;
                }
                _ if keystore.resource_data(MODEL_PART_PATH).is_some() => {
                    return Err(Error::DecryptionFailed(format!(
                        "{} is encrypted and no consumer key and crypto provider are configured",
                        MODEL_PART_PATH
                    )));
                }
                _ => tracing::debug!(
                    parts = keystore.resource_data_entries().len(),
                    "no consumer key configured; protected parts left encrypted"
                ),
            }
        }

        let xml = package
            .part(MODEL_PART_PATH)
            .ok_or_else(|| Error::MissingPart(MODEL_PART_PATH.to_string()))?;
        let mut model = parser::read_model(xml, config, &mut warnings)?;
        model.set_keystore(keystore);
        Ok((model, warnings))
    }

    /// Write the model part, encrypt protected parts and write the keystore
    ///
    /// Parts other than the model part that the keystore protects must already
    /// be in `package`. Every decrypt right gets a freshly wrapped content key,
    /// so each consumer needs a public key in the keystore. An empty keystore
    /// writes no keystore part; a keystore that protects parts needs
    /// `provider` ([`Error::InvalidParam`] otherwise).
    pub fn write_package(
        &mut self,
        package: &mut Package,
        provider: Option<&dyn CryptoProvider>,
    ) -> Result<()> {
        package.insert_part(MODEL_PART_PATH, self.to_xml()?);
        if self.keystore().is_empty() {
            package.remove_part(KEYSTORE_PART_PATH);
            return Ok(());
        }

        if !self.keystore().resource_data_entries().is_empty() {
            let provider = provider.ok_or_else(|| {
                Error::InvalidParam(
                    "the keystore protects parts but no crypto provider was given".to_string(),
                )
            })?;
            SecureContentPipeline::new(provider).encrypt_package(self.keystore_mut(), package)?;
        }

        let mut buffer = Vec::new();
        writer::write_keystore(self.keystore(), &mut buffer)?;
        package.insert_part(KEYSTORE_PART_PATH, buffer);
        Ok(())
    }
}

#[cfg(feature = "crypto")]
fn default_provider() -> Option<Arc<dyn CryptoProvider>> {
    Some(Arc::new(RustCryptoProvider::new()))
}

#[cfg(not(feature = "crypto"))]
fn default_provider() -> Option<Arc<dyn CryptoProvider>> {
    None
}
