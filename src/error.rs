//! Error and warning types for 3MF document handling
//!
//! Fatal conditions are reported as [`Error`] values that abort the current
//! operation. Recoverable problems found while reading XML are recorded as
//! [`Warning`]s in a [`Warnings`] log that the caller threads through the parse.
//!
//! # Error Codes
//!
//! Error codes follow the pattern: `E<category><number>`
//!
//! Categories:
//! - **E1xxx**: I/O and package part errors
//! - **E2xxx**: XML parsing and structure errors
//! - **E3xxx**: Resource graph errors
//! - **E4xxx**: Unsupported features
//! - **E5xxx**: Secure content errors
//!
//! [`Error::code`] returns the code of a value without formatting the message.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for 3MF operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, reading, writing or encrypting a 3MF document
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred while reading or writing a stream
    ///
    /// **Error Code**: E1001
    #[error("[E1001] I/O error: {0}")]
    Io(#[from] io::Error),

    /// A part named by the keystore or required by the package is absent
    ///
    /// **Error Code**: E1003
    ///
    /// **Common Causes**:
    /// - A keystore `resourcedata` path with no matching part
    /// - A package without a model part
    #[error("[E1003] Missing package part: {0}")]
    MissingPart(String),

    /// XML parsing error
    ///
    /// **Error Code**: E2001
    ///
    /// **Common Causes**:
    /// - Malformed XML syntax
    /// - Invalid character encoding
    /// - Unclosed tags
    #[error("[E2001] XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// XML attribute error
    ///
    /// **Error Code**: E2002
    #[error("[E2002] XML attribute error: {0}")]
    XmlAttr(String),

    /// Invalid XML structure
    ///
    /// **Error Code**: E2003
    ///
    /// **Common Causes**:
    /// - Missing required XML elements
    /// - Wrong root element
    /// - Truncated document
    #[error("[E2003] Invalid XML structure: {0}")]
    InvalidXml(String),

    /// XML writing error
    ///
    /// **Error Code**: E2005
    #[error("[E2005] XML writing error: {0}")]
    XmlWrite(String),

    /// Unknown element in a recognised namespace, escalated by a strict parser
    ///
    /// **Error Code**: E2006
    #[error("[E2006] Invalid element in namespace: {0}")]
    NamespaceInvalidElement(String),

    /// Missing or malformed mandatory value
    ///
    /// **Error Code**: E2007
    ///
    /// Raised for identity-critical attributes such as resource ids, and for
    /// any mandatory-value warning when the parser runs in strict mode.
    #[error("[E2007] Invalid mandatory value: {0}")]
    InvalidMandatoryValue(String),

    /// A resource was expected to be an object
    ///
    /// **Error Code**: E3001
    #[error("[E3001] Invalid object: {0}")]
    InvalidObject(String),

    /// An argument is out of range or malformed
    ///
    /// **Error Code**: E3002
    #[error("[E3002] Invalid parameter: {0}")]
    InvalidParam(String),

    /// An object was accessed as the wrong variant
    ///
    /// **Error Code**: E3003
    ///
    /// **Common Causes**:
    /// - Reading the mesh of a components object
    /// - Adding a component to a mesh object
    #[error("[E3003] Invalid cast: {0}")]
    InvalidCast(String),

    /// A capability was invoked on an implementation that does not provide it
    ///
    /// **Error Code**: E3004
    #[error("[E3004] Operation should not be called: {0}")]
    ShouldNotBeCalled(String),

    /// A slice stack reference does not name a slice stack resource
    ///
    /// **Error Code**: E3005
    #[error("[E3005] Invalid slice stack resource: {0}")]
    InvalidSliceStackResource(String),

    /// A resource has a kind the caller cannot handle
    ///
    /// **Error Code**: E3006
    #[error("[E3006] Unknown model resource: {0}")]
    UnknownModelResource(String),

    /// A resource id is already in use
    ///
    /// **Error Code**: E3007
    #[error("[E3007] Duplicate resource id {0}")]
    DuplicateId(u32),

    /// A UUID is already in use elsewhere in the document
    ///
    /// **Error Code**: E3008
    #[error("[E3008] Duplicate UUID '{0}'")]
    DuplicateUuid(String),

    /// A component would make an object (transitively) contain itself
    ///
    /// **Error Code**: E3009
    #[error("[E3009] Circular reference: object {container} cannot contain object {target}")]
    CircularReference {
        /// Object receiving the component
        container: u32,
        /// Object the component points at
        target: u32,
    },

    /// A reference names a resource that does not exist
    ///
    /// **Error Code**: E3010
    #[error("[E3010] Invalid reference: {0}")]
    InvalidReference(String),

    /// Numeric parse error
    ///
    /// **Error Code**: E3011
    ///
    /// **Suggestions**:
    /// - Verify numeric values use proper format (e.g., "1.5" not "1,5")
    #[error("[E3011] Parse error: {0}")]
    ParseError(String),

    /// Unsupported feature
    ///
    /// **Error Code**: E4001
    #[error("[E4001] Unsupported feature: {0}")]
    Unsupported(String),

    /// Required extension not supported
    ///
    /// **Error Code**: E4002
    ///
    /// **Suggestions**:
    /// - Enable the extension with `ParserConfig::with_extension`
    #[error("[E4002] Required extension not supported: {0}")]
    UnsupportedExtension(String),

    /// A keystore resource data path is already registered
    ///
    /// **Error Code**: E5001
    #[error("[E5001] Duplicate resource data path '{0}'")]
    DuplicateResourceDataPath(String),

    /// A consumer id is empty, unknown or registered twice
    ///
    /// **Error Code**: E5002
    #[error("[E5002] Invalid consumer: {0}")]
    InvalidConsumer(String),

    /// Key material is missing, empty or cannot be decoded
    ///
    /// **Error Code**: E5003
    #[error("[E5003] Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Decryption failed or the consumer is not authorized
    ///
    /// **Error Code**: E5004
    ///
    /// **Common Causes**:
    /// - No decrypt right for the consumer
    /// - Wrong private key
    /// - Tampered or truncated ciphertext
    #[error("[E5004] Decryption failed: {0}")]
    DecryptionFailed(String),
}

impl From<std::num::ParseFloatError> for Error {
    fn from(err: std::num::ParseFloatError) -> Self {
        Error::ParseError(format!("Failed to parse floating-point number: {}", err))
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::ParseError(format!("Failed to parse integer: {}", err))
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::XmlAttr(format!("Attribute parsing failed: {}", err))
    }
}

impl Error {
    /// Stable error code, e.g. `"E3007"` for [`Error::DuplicateId`]
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "E1001",
            Error::MissingPart(_) => "E1003",
            Error::Xml(_) => "E2001",
            Error::XmlAttr(_) => "E2002",
            Error::InvalidXml(_) => "E2003",
            Error::XmlWrite(_) => "E2005",
            Error::NamespaceInvalidElement(_) => "E2006",
            Error::InvalidMandatoryValue(_) => "E2007",
            Error::InvalidObject(_) => "E3001",
            Error::InvalidParam(_) => "E3002",
            Error::InvalidCast(_) => "E3003",
            Error::ShouldNotBeCalled(_) => "E3004",
            Error::InvalidSliceStackResource(_) => "E3005",
            Error::UnknownModelResource(_) => "E3006",
            Error::DuplicateId(_) => "E3007",
            Error::DuplicateUuid(_) => "E3008",
            Error::CircularReference { .. } => "E3009",
            Error::InvalidReference(_) => "E3010",
            Error::ParseError(_) => "E3011",
            Error::Unsupported(_) => "E4001",
            Error::UnsupportedExtension(_) => "E4002",
            Error::DuplicateResourceDataPath(_) => "E5001",
            Error::InvalidConsumer(_) => "E5002",
            Error::InvalidKeyMaterial(_) => "E5003",
            Error::DecryptionFailed(_) => "E5004",
        }
    }

    /// Create an InvalidXml error with element context
    ///
    /// # Example
    /// ```ignore
    /// Error::invalid_xml_element("model", "Missing <build> element")
    /// ```
    pub fn invalid_xml_element(element: &str, message: &str) -> Self {
        Error::InvalidXml(format!("Element '<{}>': {}", element, message))
    }

    /// Create an InvalidMandatoryValue error for a missing required attribute
    pub fn missing_attribute(element: &str, attribute: &str) -> Self {
        Error::InvalidMandatoryValue(format!(
            "Element '<{}>' is missing required attribute '{}'",
            element, attribute
        ))
    }

    /// Create a ParseError with context about what was being parsed
    ///
    /// # Arguments
    /// * `field_name` - The name of the field being parsed (e.g., "vertex x coordinate")
    /// * `value` - The value that failed to parse
    /// * `expected_type` - The expected type (e.g., "floating-point number")
    pub fn parse_error_with_context(field_name: &str, value: &str, expected_type: &str) -> Self {
        Error::ParseError(format!(
            "Failed to parse '{}': expected {}, got '{}'",
            field_name, expected_type, value
        ))
    }

    /// Create an XmlWrite error
    pub fn xml_write(message: String) -> Self {
        Error::XmlWrite(message)
    }
}

/// Severity of a recoverable reader diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningLevel {
    /// An optional value was malformed or unrecognised and a default was used
    InvalidOptionalValue,
    /// A mandatory value was malformed, duplicated or missing
    InvalidMandatoryValue,
    /// An element was skipped because its namespace or local name is unknown
    NamespaceUnknownElement,
}

/// Kind of a recoverable reader diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCode {
    /// Unknown local name inside a recognised namespace
    NamespaceInvalidElement,
    /// Element from a namespace the reader does not know
    UnknownNamespaceElement,
    /// Attribute the element does not define
    UnknownAttribute,
    /// Same attribute given twice on one element
    DuplicateAttribute,
    /// Resource data `path` given twice on one element
    DuplicateResourceDataPath,
    /// Enumeration token not recognised
    UnrecognizedValue,
    /// Value could not be parsed
    InvalidValue,
    /// Required attribute or child absent
    MissingAttribute,
}

/// One recoverable diagnostic recorded while reading XML
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Severity
    pub level: WarningLevel,
    /// Kind
    pub code: WarningCode,
    /// Local name of the element being read
    pub element: String,
    /// Attribute involved, if any
    pub attribute: Option<String>,
    /// Human-readable description
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attribute {
            Some(attribute) => write!(
                f,
                "{:?} in <{}> attribute '{}': {}",
                self.code, self.element, attribute, self.message
            ),
            None => write!(f, "{:?} in <{}>: {}", self.code, self.element, self.message),
        }
    }
}

/// Ordered log of warnings produced by one or more parse calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Warnings {
    entries: Vec<Warning>,
}

impl Warnings {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a warning
    pub fn push(&mut self, warning: Warning) {
        self.entries.push(warning);
    }

    /// Number of recorded warnings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in the order the warnings were recorded
    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.entries.iter()
    }

    /// Number of warnings with the given code
    pub fn count(&self, code: WarningCode) -> usize {
        self.entries.iter().filter(|w| w.code == code).count()
    }

    /// Warnings with the given severity
    pub fn with_level(&self, level: WarningLevel) -> impl Iterator<Item = &Warning> {
        self.entries.iter().filter(move |w| w.level == level)
    }
}

impl<'a> IntoIterator for &'a Warnings {
    type Item = &'a Warning;
    type IntoIter = std::slice::Iter<'a, Warning>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_in_messages() {
        let io_err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "test"));
        assert!(io_err.to_string().contains("[E1001]"));

        let dup = Error::DuplicateId(7);
        assert!(dup.to_string().contains("[E3007]"));
        assert!(dup.to_string().contains('7'));

        let cycle = Error::CircularReference {
            container: 1,
            target: 2,
        };
        assert!(cycle.to_string().contains("[E3009]"));
        assert!(cycle.to_string().contains("object 1 cannot contain object 2"));

        let path = Error::DuplicateResourceDataPath("/3D/3dmodel.model".to_string());
        assert!(path.to_string().contains("[E5001]"));
    }

    #[test]
    fn test_code_matches_message_prefix() {
        let errors = vec![
            Error::MissingPart("x".into()),
            Error::InvalidCast("x".into()),
            Error::ShouldNotBeCalled("x".into()),
            Error::DuplicateUuid("x".into()),
            Error::InvalidConsumer("x".into()),
            Error::DecryptionFailed("x".into()),
            Error::NamespaceInvalidElement("x".into()),
        ];
        for err in errors {
            let prefix = format!("[{}]", err.code());
            assert!(err.to_string().starts_with(&prefix), "{}", err);
        }
    }

    #[test]
    fn test_missing_attribute_helper() {
        let err = Error::missing_attribute("object", "id");
        assert!(err.to_string().contains("Element '<object>'"));
        assert!(err.to_string().contains("missing required attribute 'id'"));
        assert_eq!(err.code(), "E2007");
    }

    #[test]
    fn test_parse_error_with_context_helper() {
        let err =
            Error::parse_error_with_context("vertex x coordinate", "abc", "floating-point number");
        assert!(err.to_string().contains("vertex x coordinate"));
        assert!(err.to_string().contains("'abc'"));
        assert!(err.to_string().contains("[E3011]"));
    }

    #[test]
    fn test_parse_int_error_conversion() {
        let parse_err: std::num::ParseIntError = "not_a_number".parse::<u32>().unwrap_err();
        let err = Error::from(parse_err);
        assert!(err.to_string().contains("Failed to parse integer"));
    }

    #[test]
    fn test_warning_log() {
        let mut warnings = Warnings::new();
        assert!(warnings.is_empty());
        warnings.push(Warning {
            level: WarningLevel::NamespaceUnknownElement,
            code: WarningCode::NamespaceInvalidElement,
            element: "bogus".into(),
            attribute: None,
            message: "skipped".into(),
        });
        warnings.push(Warning {
            level: WarningLevel::InvalidOptionalValue,
            code: WarningCode::UnrecognizedValue,
            element: "resourcedata".into(),
            attribute: Some("compression".into()),
            message: "unknown token 'lzma'".into(),
        });
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings.count(WarningCode::NamespaceInvalidElement), 1);
        assert_eq!(
            warnings
                .with_level(WarningLevel::InvalidOptionalValue)
                .count(),
            1
        );
        let text = warnings.iter().nth(1).unwrap().to_string();
        assert!(text.contains("attribute 'compression'"));
    }
}
