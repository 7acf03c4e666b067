//! Parser configuration and known extensions

use crate::crypto::{ConsumerKey, CryptoProvider};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// 3MF namespaces this crate understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    /// Core 3MF specification (always required)
    Core,
    /// Materials & Properties Extension
    Material,
    /// Production Extension
    Production,
    /// Slice Extension
    Slice,
    /// Secure Content Extension
    SecureContent,
}

impl Extension {
    /// Get the namespace URI written for this extension
    pub fn namespace(&self) -> &'static str {
        match self {
            Extension::Core => "http://schemas.microsoft.com/3dmanufacturing/core/2015/02",
            Extension::Material => "http://schemas.microsoft.com/3dmanufacturing/material/2015/02",
            Extension::Production => {
                "http://schemas.microsoft.com/3dmanufacturing/production/2015/06"
            }
            Extension::Slice => "http://schemas.microsoft.com/3dmanufacturing/slice/2015/07",
            Extension::SecureContent => {
                "http://schemas.microsoft.com/3dmanufacturing/securecontent/2019/07"
            }
        }
    }

    /// Get extension from namespace URI
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            "http://schemas.microsoft.com/3dmanufacturing/core/2015/02" => Some(Extension::Core),
            "http://schemas.microsoft.com/3dmanufacturing/material/2015/02" => {
                Some(Extension::Material)
            }
            "http://schemas.microsoft.com/3dmanufacturing/production/2015/06" => {
                Some(Extension::Production)
            }
            "http://schemas.microsoft.com/3dmanufacturing/slice/2015/07" => Some(Extension::Slice),
            "http://schemas.microsoft.com/3dmanufacturing/securecontent/2019/07" => {
                Some(Extension::SecureContent)
            }
            // Also accept the earlier 2019/04 namespace
            "http://schemas.microsoft.com/3dmanufacturing/securecontent/2019/04" => {
                Some(Extension::SecureContent)
            }
            _ => None,
        }
    }

    /// Get a human-readable name for this extension
    pub fn name(&self) -> &'static str {
        match self {
            Extension::Core => "Core",
            Extension::Material => "Material",
            Extension::Production => "Production",
            Extension::Slice => "Slice",
            Extension::SecureContent => "SecureContent",
        }
    }

    /// Prefix the writer declares for this namespace, `None` for the default namespace
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Extension::Core | Extension::SecureContent => None,
            Extension::Material => Some("m"),
            Extension::Production => Some("p"),
            Extension::Slice => Some("s"),
        }
    }
}

/// Configuration for reading model and keystore parts
#[derive(Clone)]
pub struct ParserConfig {
    /// Set of extensions supported by the consumer
    ///
    /// Core is always implicitly supported. Model part elements and attributes
    /// of any other extension are skipped, and `requiredextensions` naming it
    /// is an error. The keystore part is read regardless.
    supported_extensions: HashSet<Extension>,
    /// Escalate mandatory-value and invalid-element warnings to errors
    strict: bool,
    /// Provider used to decrypt protected parts
    crypto_provider: Option<Arc<dyn CryptoProvider>>,
    /// Private key of the consumer reading the package
    consumer_key: Option<ConsumerKey>,
}

impl ParserConfig {
    /// Create a new parser configuration with only core support
    pub fn new() -> Self {
        let mut supported = HashSet::new();
        supported.insert(Extension::Core);
        Self {
            supported_extensions: supported,
            strict: false,
            crypto_provider: None,
            consumer_key: None,
        }
    }

    /// Create a parser configuration that supports all known extensions
    pub fn with_all_extensions() -> Self {
        Self::new()
            .with_extension(Extension::Material)
            .with_extension(Extension::Production)
            .with_extension(Extension::Slice)
            .with_extension(Extension::SecureContent)
    }

    /// Add support for a specific extension
    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.supported_extensions.insert(extension);
        self
    }

    /// Turn warnings about mandatory values and invalid elements into errors
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Use `provider` to decrypt protected parts
    pub fn with_crypto_provider(mut self, provider: Arc<dyn CryptoProvider>) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Decrypt protected parts as this consumer
    pub fn with_consumer_key(mut self, key: ConsumerKey) -> Self {
        self.consumer_key = Some(key);
        self
    }

    /// Check if an extension is supported
    pub fn supports(&self, extension: &Extension) -> bool {
        self.supported_extensions.contains(extension)
    }

    /// Whether warnings are escalated
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Configured provider
    pub fn crypto_provider(&self) -> Option<&Arc<dyn CryptoProvider>> {
        self.crypto_provider.as_ref()
    }

    /// Configured consumer key
    pub fn consumer_key(&self) -> Option<&ConsumerKey> {
        self.consumer_key.as_ref()
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self::with_all_extensions()
    }
}

impl fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserConfig")
            .field("supported_extensions", &self.supported_extensions)
            .field("strict", &self.strict)
            .field("crypto_provider", &self.crypto_provider.is_some())
            .field("consumer_key", &self.consumer_key.as_ref().map(|k| &k.consumer_id))
            .finish()
    }
}
