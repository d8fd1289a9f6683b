// Helpers around xmltree::Element: construction in "D:name" shorthand,
// event-writer serialization, DAV namespace predicates, and the encoding
// of property names into extended-attribute names.

use std::collections::HashMap;
use std::io::{Cursor, Write};

use xml::common::XmlVersion;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as XmlWEvent};
use xmltree::{Element, XMLNode};

use crate::errors::DavError;

pub(crate) const NS_DAV_URI: &str = "DAV:";
pub(crate) const NS_APACHE_URI: &str = "http://apache.org/dav/props/";

// prefix under which dead properties are stored in the xattr namespace.
pub(crate) const XATTR_PREFIX: &str = "user.";

pub(crate) trait ElementExt {
    fn new2(name: &str) -> Element;
    fn ns(self, prefix: &str, uri: &str) -> Element;
    fn text(self, text: impl Into<String>) -> Element;
    fn push(&mut self, e: Element);
    fn child_elems(&self) -> Vec<&Element>;
    fn has_dav_name(&self, name: &str) -> bool;
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> Result<(), DavError>;
}

impl ElementExt for Element {
    // `Element::new2("D:foo")` splits off the prefix; the DAV: and Apache
    // namespaces are filled in, anything else is left to the caller.
    fn new2(name: &str) -> Element {
        let (prefix, local) = match name.split_once(':') {
            Some((p, l)) => (Some(p.to_string()), l.to_string()),
            None => (None, name.to_string()),
        };
        let namespace = match prefix.as_deref() {
            Some("D") => Some(NS_DAV_URI.to_string()),
            Some("A") => Some(NS_APACHE_URI.to_string()),
            _ => None,
        };
        Element {
            prefix,
            namespace,
            namespaces: None,
            name: local,
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    fn ns(mut self, prefix: &str, uri: &str) -> Element {
        self.prefix = if prefix.is_empty() {
            None
        } else {
            Some(prefix.to_string())
        };
        self.namespace = Some(uri.to_string());
        self
    }

    fn text(mut self, text: impl Into<String>) -> Element {
        self.children.push(XMLNode::Text(text.into()));
        self
    }

    fn push(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn child_elems(&self) -> Vec<&Element> {
        self.children
            .iter()
            .filter_map(|n| match n {
                XMLNode::Element(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn has_dav_name(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(NS_DAV_URI)
    }

    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> Result<(), DavError> {
        write_elem(emitter, self, false)
    }
}

// `declare_dav` forces the xmlns:D binding; set when the element is the
// root of its own document (inside a multistatus, the root already
// declared it).
fn write_elem<W: Write>(
    emitter: &mut EventWriter<W>,
    elem: &Element,
    declare_dav: bool,
) -> Result<(), DavError> {
    let qname = match &elem.prefix {
        Some(p) => format!("{}:{}", p, elem.name),
        None => elem.name.clone(),
    };
    let mut ev = XmlWEvent::start_element(qname.as_str());
    match (&elem.prefix, &elem.namespace) {
        (Some(p), Some(uri)) if p != "D" || declare_dav => ev = ev.ns(p.as_str(), uri.as_str()),
        (None, Some(uri)) => ev = ev.default_ns(uri.as_str()),
        _ => {}
    }
    for (k, v) in &elem.attributes {
        ev = ev.attr(k.as_str(), v.as_str());
    }
    emitter.write(ev)?;
    for child in &elem.children {
        match child {
            XMLNode::Element(e) => write_elem(emitter, e, false)?,
            XMLNode::Text(t) => emitter.write(XmlWEvent::characters(t))?,
            _ => {}
        }
    }
    emitter.write(XmlWEvent::end_element())?;
    Ok(())
}

// An emitter for a standalone XML document, no pretty-printing.
pub(crate) fn emitter<W: Write>(w: W) -> Result<EventWriter<W>, DavError> {
    let mut emitter = EventWriter::new_with_config(
        w,
        EmitterConfig {
            normalize_empty_elements: false,
            perform_indent: false,
            ..Default::default()
        },
    );
    emitter.write(XmlWEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    Ok(emitter)
}

// Serialize an element to a standalone document string.
pub(crate) fn element_to_string(elem: &Element) -> Result<String, DavError> {
    let mut buf = Vec::new();
    {
        let mut emitter = emitter(&mut buf)?;
        write_elem(&mut emitter, elem, true)?;
    }
    String::from_utf8(buf).map_err(|_| DavError::XmlReadError)
}

// Serialize only the children of an element (text and nested markup);
// this is the value stored for a dead property.
pub(crate) fn children_to_string(elem: &Element) -> Result<String, DavError> {
    let mut buf = Vec::new();
    {
        let mut emitter = EventWriter::new_with_config(
            &mut buf,
            EmitterConfig {
                normalize_empty_elements: false,
                perform_indent: false,
                write_document_declaration: false,
                ..Default::default()
            },
        );
        for child in &elem.children {
            match child {
                XMLNode::Element(e) => e.write_ev(&mut emitter)?,
                XMLNode::Text(t) => emitter.write(XmlWEvent::characters(t))?,
                _ => {}
            }
        }
    }
    String::from_utf8(buf).map_err(|_| DavError::XmlReadError)
}

/// Parse a request body; the root element must carry the given DAV: name.
pub(crate) fn davdoc_parse(body: &[u8], name: &str) -> Result<Element, DavError> {
    let root = Element::parse(Cursor::new(body))?;
    if root.name != name || root.namespace.as_deref() != Some(NS_DAV_URI) {
        return Err(DavError::XmlParseError);
    }
    Ok(root)
}

/// Encode a property's (namespace, local-name) pair into an attribute name:
/// `<prefix><ns-uri>#<local-name>`, or `<prefix><local-name>` without a
/// namespace.
pub(crate) fn prop_to_xattr_name(elem: &Element, prefix: &str) -> String {
    match elem.namespace.as_deref() {
        Some(ns) => format!("{}{}#{}", prefix, ns, elem.name),
        None => format!("{}{}", prefix, elem.name),
    }
}

/// Decode an attribute name (with the storage prefix already removed) back
/// into an empty property element.
pub(crate) fn xattr_name_to_prop(name: &str) -> Element {
    match name.split_once('#') {
        Some((ns, local)) => {
            let mut e = Element::new2(local);
            e.namespace = Some(ns.to_string());
            e
        }
        None => Element::new2(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_construction() {
        let e = Element::new2("D:multistatus");
        assert_eq!(e.name, "multistatus");
        assert_eq!(e.prefix.as_deref(), Some("D"));
        assert_eq!(e.namespace.as_deref(), Some("DAV:"));
    }

    #[test]
    fn xattr_name_roundtrip() {
        let mut e = Element::new2("tag");
        e.namespace = Some("u:".to_string());
        assert_eq!(prop_to_xattr_name(&e, "user."), "user.u:#tag");
        let back = xattr_name_to_prop("u:#tag");
        assert_eq!(back.name, "tag");
        assert_eq!(back.namespace.as_deref(), Some("u:"));

        let plain = Element::new2("flag");
        assert_eq!(prop_to_xattr_name(&plain, "user."), "user.flag");
        let back = xattr_name_to_prop("flag");
        assert_eq!(back.name, "flag");
        assert!(back.namespace.is_none());
    }

    #[test]
    fn serializes_children_only() {
        let e = Element::new2("X:tag").text("value");
        assert_eq!(children_to_string(&e).unwrap(), "value");
    }

    #[test]
    fn dav_name_predicate() {
        let e = Element::new2("D:prop");
        assert!(e.has_dav_name("prop"));
        let mut other = Element::new2("prop");
        other.namespace = Some("urn:x".to_string());
        assert!(!other.has_dav_name("prop"));
    }
}
