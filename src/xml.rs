//! A small owned element tree built from quick-xml events.
//!
//! Element and attribute names are stored by local name, so `vmap:AdBreak`
//! and `AdBreak` are looked up the same way.

use crate::error::{Result, VastError};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::BTreeMap;
use std::str::from_utf8;

/// A node inside an element
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with its attributes and children in document order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Value of the attribute with the given local name
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// All attributes as an owned map
    pub fn attr_map(&self) -> BTreeMap<String, String> {
        self.attributes.iter().cloned().collect()
    }

    /// Direct child elements, skipping text
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// The first child that is an element
    pub fn first_element(&self) -> Option<&Element> {
        self.elements().next()
    }

    /// The first direct child element with the given name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// Every descendant element with the given name, in document order
    pub fn descendants(&self, name: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        collect_descendants(self, name, &mut found);
        found
    }

    /// The first descendant element with the given name
    pub fn descendant(&self, name: &str) -> Option<&Element> {
        for child in self.elements() {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.descendant(name) {
                return Some(found);
            }
        }
        None
    }

    /// Concatenated text of this element and all its descendants
    pub fn text(&self) -> String {
        let mut text = String::new();
        collect_text(self, &mut text);
        text
    }

    /// Text content with every whitespace character removed, as used for URLs
    pub fn compact_text(&self) -> String {
        self.text().chars().filter(|c| !c.is_whitespace()).collect()
    }

    /// Text content with surrounding whitespace trimmed
    pub fn trimmed_text(&self) -> String {
        self.text().trim().to_string()
    }
}

fn collect_descendants<'a>(element: &'a Element, name: &str, found: &mut Vec<&'a Element>) {
    for child in element.elements() {
        if child.name == name {
            found.push(child);
        }
        collect_descendants(child, name, found);
    }
}

fn collect_text(element: &Element, text: &mut String) {
    for node in &element.children {
        match node {
            Node::Text(t) => text.push_str(t),
            Node::Element(e) => collect_text(e, text),
        }
    }
}

/// Parse an XML document and return its root element
pub fn parse_document(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                stack.push(start_element(e)?);
            }
            Ok(Event::Empty(ref e)) => {
                let element = start_element(e)?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(e.unescape()?.into_owned()));
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(parent) = stack.last_mut() {
                    if let Ok(value) = from_utf8(&e) {
                        parent.children.push(Node::Text(value.to_string()));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(VastError::Other("Unexpected end of file".to_string()));
    }

    root.ok_or_else(|| VastError::MissingField("document element".to_string()))
}

/// Build an element from a start tag, keeping attribute order
fn start_element(start: &BytesStart) -> Result<Element> {
    let name = from_utf8(start.local_name().as_ref())
        .map_err(|e| VastError::Other(format!("Invalid element name: {}", e)))?
        .to_string();
    let mut element = Element::new(name);

    for attr in start.attributes() {
        if let Ok(attr) = attr {
            if let Ok(key) = from_utf8(attr.key.local_name().as_ref()) {
                let value = attr.unescape_value()?.into_owned();
                element.attributes.push((key.to_string(), value));
            }
        }
    }

    Ok(element)
}

/// Append a finished element to its parent, or make it the root
fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
        <VAST version="3.0" xmlns:v="urn:x">
          <Ad id="1" sequence="2">
            <InLine>
              <AdTitle> A title </AdTitle>
              <Impression><![CDATA[ http://x.test/imp?a=1 ]]></Impression>
              <Empty attr="yes"/>
            </InLine>
          </Ad>
          <v:Ad id="2"/>
        </VAST>"#;

    #[test]
    fn builds_tree_with_local_names() {
        let root = parse_document(SAMPLE).unwrap();
        assert_eq!(root.name, "VAST");
        assert_eq!(root.attr("version"), Some("3.0"));

        let ads = root.descendants("Ad");
        assert_eq!(ads.len(), 2);
        assert_eq!(ads[0].attr("sequence"), Some("2"));
        assert_eq!(ads[1].attr("id"), Some("2"));
    }

    #[test]
    fn reads_text_and_cdata() {
        let root = parse_document(SAMPLE).unwrap();
        let title = root.descendant("AdTitle").unwrap();
        assert_eq!(title.trimmed_text(), "A title");

        let imp = root.descendant("Impression").unwrap();
        assert_eq!(imp.compact_text(), "http://x.test/imp?a=1");

        let empty = root.descendant("Empty").unwrap();
        assert!(empty.children.is_empty());
        assert!(empty.has_attr("attr"));
    }

    #[test]
    fn first_element_skips_text() {
        let root = parse_document("<Creative>  text <Linear/></Creative>").unwrap();
        assert_eq!(root.first_element().map(|e| e.name.as_str()), Some("Linear"));
    }

    #[test]
    fn rejects_non_xml() {
        assert!(parse_document("not xml at all").is_err());
        assert!(parse_document("<VAST><Ad></VAST>").is_err());
    }
}
