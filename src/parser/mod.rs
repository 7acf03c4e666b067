//! XML parsing for 3MF model and keystore parts
//!
//! The reader is a single streaming pass over [`quick_xml::Reader`]. Namespace
//! prefixes are resolved by [`XmlCursor`] against a stack of `xmlns` scopes, so
//! element handlers match on `(Extension, local name)` pairs and never look at
//! prefixes.
//!
//! Each element handler visits its attributes once in document order, hands
//! its children to the handlers registered in a dispatch table, and commits its
//! accumulated state to the [`Model`] or [`KeyStore`] once its end tag has been
//! read. Recoverable problems are recorded in the caller's [`Warnings`] log;
//! anything that would corrupt the resource graph aborts the parse.

mod core;
mod material;
mod secure_content;
mod slice;

use crate::error::{Error, Result, Warning, WarningCode, WarningLevel, Warnings};
use crate::model::{Extension, KeyStore, Model, ParserConfig};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashSet;

/// Default buffer capacity for XML parsing (4KB)
const XML_BUFFER_CAPACITY: usize = 4096;

/// Namespace bound to the reserved `xml` prefix
const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Parse a model part
///
/// Recoverable problems are appended to `warnings`; fatal ones abort with an
/// error and leave no partial model behind.
///
/// # Example
///
/// ```
/// use lib3mf_core::error::Warnings;
/// use lib3mf_core::model::ParserConfig;
/// use lib3mf_core::parser::read_model;
///
/// let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
/// <model unit="millimeter" xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02">
///   <resources>
///     <object id="1">
///       <mesh>
///         <vertices>
///           <vertex x="0" y="0" z="0"/>
///           <vertex x="10" y="0" z="0"/>
///           <vertex x="0" y="10" z="0"/>
///         </vertices>
///         <triangles><triangle v1="0" v2="1" v3="2"/></triangles>
///       </mesh>
///     </object>
///   </resources>
///   <build><item objectid="1"/></build>
/// </model>"#;
///
/// let mut warnings = Warnings::new();
/// let model = read_model(xml, &ParserConfig::default(), &mut warnings)?;
/// assert_eq!(model.objects().count(), 1);
/// assert!(warnings.is_empty());
/// # Ok::<(), lib3mf_core::Error>(())
/// ```
pub fn read_model(xml: &[u8], config: &ParserConfig, warnings: &mut Warnings) -> Result<Model> {
    let mut cursor = XmlCursor::new(xml);
    let mut ctx = ReadContext::new(config, warnings);
    let root = cursor.root()?;
    if root.ns != XmlNamespace::Known(Extension::Core) || root.local != "model" {
        return Err(Error::invalid_xml_element(
            &root.name,
            "root element must be <model> in the 3MF core namespace",
        ));
    }

    let model = core::read_model_element(&mut ctx, &mut cursor, &root)?;
    tracing::debug!(
        resources = model.resources().len(),
        build_items = model.build_items().len(),
        warnings = ctx.warnings.len(),
        "model part read"
    );
    Ok(model)
}

/// Parse a keystore part into `keystore`
///
/// Consumers and resource data entries are committed one at a time as their
/// elements close. On error, entries committed before the failing element
/// remain in `keystore`.
pub fn read_keystore(
    xml: &[u8],
    keystore: &mut KeyStore,
    config: &ParserConfig,
    warnings: &mut Warnings,
) -> Result<()> {
    let mut cursor = XmlCursor::new(xml);
    let mut ctx = ReadContext::new(config, warnings);
    let root = cursor.root()?;
    if root.ns != XmlNamespace::Known(Extension::SecureContent) || root.local != "keystore" {
        return Err(Error::invalid_xml_element(
            &root.name,
            "root element must be <keystore> in the secure content namespace",
        ));
    }

    secure_content::read_keystore_element(keystore, &mut ctx, &mut cursor, &root)?;
    tracing::debug!(
        consumers = keystore.consumers().len(),
        resource_data = keystore.resource_data_entries().len(),
        warnings = ctx.warnings.len(),
        "keystore part read"
    );
    Ok(())
}

/// Namespace an element or attribute name resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum XmlNamespace {
    /// No namespace (unprefixed attributes, or elements without a default namespace)
    Unqualified,
    /// A 3MF namespace this crate understands
    Known(Extension),
    /// The reserved `xml` namespace
    Xml,
    /// Any other namespace
    Foreign,
}

impl XmlNamespace {
    fn classify(uri: &str) -> Self {
        if uri.is_empty() {
            XmlNamespace::Unqualified
        } else if uri == XML_NAMESPACE {
            XmlNamespace::Xml
        } else {
            Extension::from_namespace(uri).map_or(XmlNamespace::Foreign, XmlNamespace::Known)
        }
    }
}

/// Attribute with its prefix resolved
#[derive(Debug, Clone)]
pub(crate) struct XmlAttribute {
    /// Qualified name as written, e.g. `p:UUID`
    pub name: String,
    pub ns: XmlNamespace,
    pub local: String,
    pub value: String,
}

impl XmlAttribute {
    pub fn key(&self) -> (XmlNamespace, &str) {
        (self.ns, self.local.as_str())
    }
}

/// Start tag with its name and attributes resolved
#[derive(Debug, Clone)]
pub(crate) struct StartTag {
    /// Qualified name as written
    pub name: String,
    pub ns: XmlNamespace,
    pub local: String,
    pub attributes: Vec<XmlAttribute>,
    /// `<tag/>` with no content
    pub is_empty: bool,
}

type Scope = Vec<(String, String)>;

/// Streaming reader that tracks namespace scopes and element depth
///
/// One scope is pushed for every open element, so the scope stack doubles as
/// the depth counter used to skip content a handler did not consume.
pub(crate) struct XmlCursor<'x> {
    reader: Reader<&'x [u8]>,
    buf: Vec<u8>,
    scopes: Vec<Scope>,
}

impl<'x> XmlCursor<'x> {
    pub fn new(xml: &'x [u8]) -> Self {
        Self {
            reader: Reader::from_reader(xml),
            buf: Vec::with_capacity(XML_BUFFER_CAPACITY),
            scopes: Vec::new(),
        }
    }

    /// Advance to the root element
    fn root(&mut self) -> Result<StartTag> {
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => return open_tag(&mut self.scopes, &e, false),
                Event::Empty(e) => {
                    let tag = open_tag(&mut self.scopes, &e, true)?;
                    self.scopes.pop();
                    return Ok(tag);
                }
                Event::DocType(_) => return Err(doctype_error()),
                Event::Eof => {
                    return Err(Error::InvalidXml(
                        "document has no root element".to_string(),
                    ));
                }
                _ => {}
            }
        }
    }

    /// URI bound to `prefix` in the innermost open scope
    pub fn namespace_of_prefix(&self, prefix: &str) -> Option<&str> {
        lookup(&self.scopes, prefix)
    }

    /// Read the content of `parent` up to and including its end tag
    ///
    /// Every child element is passed to `on_child`. Whatever part of the child
    /// the callback leaves unread is skipped. Returns the trimmed character
    /// data found directly inside `parent`.
    pub fn read_children<F>(&mut self, parent: &StartTag, mut on_child: F) -> Result<String>
    where
        F: FnMut(&mut Self, &StartTag) -> Result<()>,
    {
        let mut text = String::new();
        if parent.is_empty {
            return Ok(text);
        }

        loop {
            self.buf.clear();
            let child = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => open_tag(&mut self.scopes, &e, false)?,
                Event::Empty(e) => {
                    let tag = open_tag(&mut self.scopes, &e, true)?;
                    self.scopes.pop();
                    tag
                }
                Event::End(_) => {
                    self.scopes.pop();
                    return Ok(text.trim().to_string());
                }
                Event::Text(t) => {
                    let content = t.decode().map_err(|e| Error::InvalidXml(e.to_string()))?;
                    text.push_str(&content);
                    continue;
                }
                Event::CData(c) => {
                    let content = std::str::from_utf8(&c)
                        .map_err(|e| Error::InvalidXml(e.to_string()))?;
                    text.push_str(content);
                    continue;
                }
                Event::GeneralRef(r) => {
                    let name =
                        std::str::from_utf8(&r).map_err(|e| Error::InvalidXml(e.to_string()))?;
                    text.push(resolve_entity(name)?);
                    continue;
                }
                Event::DocType(_) => return Err(doctype_error()),
                Event::Eof => return Err(truncated(&parent.name)),
                _ => continue,
            };

            let depth = self.scopes.len();
            on_child(self, &child)?;
            if !child.is_empty && self.scopes.len() >= depth {
                self.skip_to(depth - 1, &child.name)?;
            }
        }
    }

    /// Discard events until the scope stack is back to `depth`
    fn skip_to(&mut self, depth: usize, element: &str) -> Result<()> {
        while self.scopes.len() > depth {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(_) => self.scopes.push(Scope::new()),
                Event::End(_) => {
                    self.scopes.pop();
                }
                Event::DocType(_) => return Err(doctype_error()),
                Event::Eof => return Err(truncated(element)),
                _ => {}
            }
        }
        Ok(())
    }
}

fn doctype_error() -> Error {
    Error::InvalidXml("DTD declarations are not allowed in 3MF documents".to_string())
}

fn truncated(element: &str) -> Error {
    Error::InvalidXml(format!(
        "unexpected end of document inside <{}>",
        element
    ))
}

fn lookup<'s>(scopes: &'s [Scope], prefix: &str) -> Option<&'s str> {
    scopes
        .iter()
        .rev()
        .flat_map(|scope| scope.iter().rev())
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.as_str())
}

/// Split `name` and resolve its prefix
///
/// Unprefixed element names take the default namespace; unprefixed attribute
/// names have no namespace.
fn resolve<'n>(
    scopes: &[Scope],
    name: &'n str,
    is_element: bool,
) -> Result<(XmlNamespace, &'n str)> {
    match name.split_once(':') {
        Some(("xml", local)) => Ok((XmlNamespace::Xml, local)),
        Some((prefix, local)) => lookup(scopes, prefix)
            .map(|uri| (XmlNamespace::classify(uri), local))
            .ok_or_else(|| {
                Error::InvalidXml(format!(
                    "namespace prefix '{}' of '{}' is not declared",
                    prefix, name
                ))
            }),
        None if is_element => Ok((
            lookup(scopes, "").map_or(XmlNamespace::Unqualified, XmlNamespace::classify),
            name,
        )),
        None => Ok((XmlNamespace::Unqualified, name)),
    }
}

/// Push the scope declared on `e` and resolve its names
fn open_tag(scopes: &mut Vec<Scope>, e: &BytesStart, is_empty: bool) -> Result<StartTag> {
    let mut scope = Scope::new();
    let mut raw = Vec::with_capacity(8);
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        let key =
            std::str::from_utf8(attr.key.as_ref()).map_err(|e| Error::InvalidXml(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| Error::XmlAttr(format!("Attribute '{}': {}", key, e)))?
            .into_owned();
        if key == "xmlns" {
            scope.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.push((prefix.to_string(), value));
        } else {
            raw.push((key.to_string(), value));
        }
    }
    scopes.push(scope);

    let qname = e.name();
    let name =
        std::str::from_utf8(qname.as_ref()).map_err(|e| Error::InvalidXml(e.to_string()))?;
    let (ns, local) = resolve(scopes, name, true)?;
    let mut attributes = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        let (attr_ns, attr_local) = resolve(scopes, &key, false)?;
        attributes.push(XmlAttribute {
            ns: attr_ns,
            local: attr_local.to_string(),
            name: key.clone(),
            value,
        });
    }

    Ok(StartTag {
        name: name.to_string(),
        ns,
        local: local.to_string(),
        attributes,
        is_empty,
    })
}

fn resolve_entity(name: &str) -> Result<char> {
    let resolved = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => name.strip_prefix('#').and_then(|code| {
            match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => code.parse::<u32>().ok(),
            }
            .and_then(char::from_u32)
        }),
    };
    resolved.ok_or_else(|| Error::InvalidXml(format!("unknown entity reference '&{};'", name)))
}

/// Shared state of one parse call
pub(crate) struct ReadContext<'c> {
    config: &'c ParserConfig,
    warnings: &'c mut Warnings,
}

impl<'c> ReadContext<'c> {
    pub fn new(config: &'c ParserConfig, warnings: &'c mut Warnings) -> Self {
        Self { config, warnings }
    }

    pub fn config(&self) -> &ParserConfig {
        self.config
    }

    /// Content of an extension the configuration leaves out
    ///
    /// Core content is always read, and so is the keystore part.
    fn is_disabled(&self, ns: XmlNamespace) -> bool {
        match ns {
            XmlNamespace::Known(Extension::Core | Extension::SecureContent) => false,
            XmlNamespace::Known(extension) => !self.config.supports(&extension),
            _ => false,
        }
    }

    /// Record a warning, or fail when strict mode escalates it
    pub fn warn(
        &mut self,
        level: WarningLevel,
        code: WarningCode,
        element: &str,
        attribute: Option<&str>,
        message: impl Into<String>,
    ) -> Result<()> {
        let message = message.into();
        tracing::trace!(?level, ?code, element, attribute, %message, "reader warning");

        if self.config.is_strict() {
            let context = match attribute {
                Some(attribute) => format!("<{}> attribute '{}': {}", element, attribute, message),
                None => format!("<{}>: {}", element, message),
            };
            if code == WarningCode::NamespaceInvalidElement {
                return Err(Error::NamespaceInvalidElement(context));
            }
            if level == WarningLevel::InvalidMandatoryValue {
                return Err(Error::InvalidMandatoryValue(context));
            }
        }

        self.warnings.push(Warning {
            level,
            code,
            element: element.to_string(),
            attribute: attribute.map(str::to_string),
            message,
        });
        Ok(())
    }

    /// Attribute value that failed to parse
    pub fn invalid_value(
        &mut self,
        tag: &StartTag,
        attr: &XmlAttribute,
        level: WarningLevel,
        expected: &str,
    ) -> Result<()> {
        self.warn(
            level,
            WarningCode::InvalidValue,
            &tag.local,
            Some(&attr.name),
            format!("'{}' is not {}; value ignored", attr.value, expected),
        )
    }

    /// Enumeration token that is not recognised
    pub fn unrecognized_value(
        &mut self,
        tag: &StartTag,
        attr: &XmlAttribute,
        level: WarningLevel,
        fallback: &str,
    ) -> Result<()> {
        self.warn(
            level,
            WarningCode::UnrecognizedValue,
            &tag.local,
            Some(&attr.name),
            format!("unrecognized value '{}'; using '{}'", attr.value, fallback),
        )
    }

    /// Required attribute that is absent
    pub fn missing_attribute(
        &mut self,
        tag: &StartTag,
        attribute: &str,
        message: &str,
    ) -> Result<()> {
        self.warn(
            WarningLevel::InvalidMandatoryValue,
            WarningCode::MissingAttribute,
            &tag.local,
            Some(attribute),
            message,
        )
    }

    /// Child element no handler is registered for
    fn unknown_element(&mut self, parent: &StartTag, child: &StartTag) -> Result<()> {
        match child.ns {
            XmlNamespace::Known(extension) => self.warn(
                WarningLevel::NamespaceUnknownElement,
                WarningCode::NamespaceInvalidElement,
                &child.local,
                None,
                format!(
                    "element is not valid inside <{}> in the {} namespace; skipped",
                    parent.local,
                    extension.name()
                ),
            ),
            _ => self.warn(
                WarningLevel::NamespaceUnknownElement,
                WarningCode::UnknownNamespaceElement,
                &child.local,
                None,
                format!("element '{}' from an unknown namespace skipped", child.name),
            ),
        }
    }
}

/// How an element treats one of its attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttributeKind {
    Optional,
    Mandatory,
    /// Resource ids and object references; repeating one is fatal
    Identity,
    /// Resource data `path`
    DataPath,
    Unknown,
}

/// Offer every attribute of `tag` to `on_attribute` in document order
///
/// The callback classifies the attribute; unknown and repeated attributes are
/// reported here. A repeated attribute is offered again so the last value wins.
pub(crate) fn visit_attributes<'c, F>(
    ctx: &mut ReadContext<'c>,
    tag: &StartTag,
    mut on_attribute: F,
) -> Result<()>
where
    F: FnMut(&mut ReadContext<'c>, &XmlAttribute) -> Result<AttributeKind>,
{
    let mut seen = HashSet::with_capacity(tag.attributes.len());
    for attr in &tag.attributes {
        if ctx.is_disabled(attr.ns) {
            tracing::trace!(element = %tag.local, attribute = %attr.name, "extension not enabled; attribute ignored");
            continue;
        }
        let repeated = !seen.insert(attr.key());
        let kind = on_attribute(ctx, attr)?;
        if kind == AttributeKind::Unknown {
            ctx.warn(
                WarningLevel::InvalidOptionalValue,
                WarningCode::UnknownAttribute,
                &tag.local,
                Some(&attr.name),
                "attribute is not defined for this element; ignored",
            )?;
            continue;
        }
        if !repeated {
            continue;
        }

        let message = "attribute given more than once; the last value is used";
        match kind {
            AttributeKind::Identity => {
                return Err(Error::InvalidMandatoryValue(format!(
                    "<{}> attribute '{}' given more than once",
                    tag.local, attr.name
                )));
            }
            AttributeKind::DataPath => ctx.warn(
                WarningLevel::InvalidMandatoryValue,
                WarningCode::DuplicateResourceDataPath,
                &tag.local,
                Some(&attr.name),
                message,
            )?,
            AttributeKind::Mandatory => ctx.warn(
                WarningLevel::InvalidMandatoryValue,
                WarningCode::DuplicateAttribute,
                &tag.local,
                Some(&attr.name),
                message,
            )?,
            AttributeKind::Optional => ctx.warn(
                WarningLevel::InvalidOptionalValue,
                WarningCode::DuplicateAttribute,
                &tag.local,
                Some(&attr.name),
                message,
            )?,
            AttributeKind::Unknown => {}
        }
    }
    Ok(())
}

/// Handler for one child element
pub(crate) type ChildHandler<S> =
    fn(&mut S, &mut ReadContext<'_>, &mut XmlCursor<'_>, &StartTag) -> Result<()>;

/// Dispatch table entry: namespace, local name, handler
pub(crate) type ChildEntry<S> = (Extension, &'static str, ChildHandler<S>);

/// Read the children of `parent` through `table`, returning its text content
pub(crate) fn dispatch<S>(
    state: &mut S,
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    parent: &StartTag,
    table: &[ChildEntry<S>],
) -> Result<String> {
    cursor.read_children(parent, |cursor, child| {
        if ctx.is_disabled(child.ns) {
            tracing::trace!(element = %child.name, "extension not enabled; element skipped");
            return Ok(());
        }
        let handler = table.iter().find(|(extension, local, _)| {
            child.ns == XmlNamespace::Known(*extension) && child.local == *local
        });
        match handler {
            Some((_, _, handler)) => handler(state, ctx, cursor, child),
            None => ctx.unknown_element(parent, child),
        }
    })
}

/// Read an element that only carries text
pub(crate) fn read_text(
    ctx: &mut ReadContext<'_>,
    cursor: &mut XmlCursor<'_>,
    tag: &StartTag,
) -> Result<String> {
    dispatch(&mut (), ctx, cursor, tag, &[])
}

/// Parse a resource id or object reference, which must be a positive integer
pub(crate) fn parse_resource_id(tag: &StartTag, attr: &XmlAttribute) -> Result<u32> {
    match attr.value.trim().parse::<u32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(Error::InvalidMandatoryValue(format!(
            "<{}> attribute '{}': '{}' is not a valid resource id",
            tag.local, attr.name, attr.value
        ))),
    }
}

/// Parse a mandatory number; malformed values are fatal
pub(crate) fn parse_number<T: std::str::FromStr>(
    tag: &StartTag,
    attr: &XmlAttribute,
    expected: &str,
) -> Result<T> {
    attr.value.trim().parse::<T>().map_err(|_| {
        Error::parse_error_with_context(
            &format!("{} {}", tag.local, attr.name),
            &attr.value,
            expected,
        )
    })
}

/// Parse a finite floating-point value
pub(crate) fn parse_finite(tag: &StartTag, attr: &XmlAttribute) -> Result<f64> {
    let value: f64 = parse_number(tag, attr, "floating-point number")?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::parse_error_with_context(
            &format!("{} {}", tag.local, attr.name),
            &attr.value,
            "finite number",
        ))
    }
}
