//! Stateless XML parsing into an element tree.
//!
//! Every call builds its own reader, so concurrent calls share nothing.
//! [`XmlDocument::to_value`] renders the tree in the layout xml2js-style
//! consumers expect: attributes under `$`, mixed text under `_`, and child
//! elements always grouped into arrays by name.

use crate::error::ApiError;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

/// Key holding attributes in the JSON view.
pub const ATTR_KEY: &str = "$";
/// Key holding text content of an element that also has attributes or children.
pub const CHAR_KEY: &str = "_";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    pub name: String,
    /// Attributes in document order, values unescaped.
    pub attributes: Vec<(String, String)>,
    /// Concatenated text and CDATA content, unescaped.
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ApiError> {
        let mut element = Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            ..Self::default()
        };
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    /// Value of attribute `name`, if present.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Direct children named `name`.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// JSON view of this element's content (its name is the caller's key).
    ///
    /// A text-only element becomes a string. Otherwise an object holding
    /// `$` for attributes, `_` for non-blank text and one array per child
    /// element name.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let has_text = !self.text.trim().is_empty();
        if self.attributes.is_empty() && self.children.is_empty() {
            return Value::String(if has_text {
                self.text.clone()
            } else {
                String::new()
            });
        }

        let mut map = Map::new();
        if !self.attributes.is_empty() {
            let attrs = self
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            map.insert(ATTR_KEY.to_owned(), Value::Object(attrs));
        }
        if has_text {
            map.insert(CHAR_KEY.to_owned(), Value::String(self.text.clone()));
        }
        for child in &self.children {
            let slot = map
                .entry(child.name.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = slot {
                items.push(child.to_value());
            }
        }
        Value::Object(map)
    }
}

/// A parsed document: exactly one root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub root: XmlElement,
}

impl XmlDocument {
    /// `{ <root name>: <root content> }`
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(self.root.name.clone(), self.root.to_value());
        Value::Object(map)
    }
}

/// Parse `text` into an [`XmlDocument`].
///
/// # Errors
/// Returns `ApiError::Xml` for malformed markup (including mismatched end
/// tags) and `ApiError::XmlStructure` when the input has no root element,
/// more than one, or ends inside an element.
pub fn parse(text: &str) -> Result<XmlDocument, ApiError> {
    let mut reader = Reader::from_str(text);
    let mut open: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => open.push(XmlElement::from_start(&start)?),
            Event::Empty(start) => {
                let element = XmlElement::from_start(&start)?;
                attach(&mut open, &mut root, element)?;
            }
            Event::End(_) => {
                if let Some(element) = open.pop() {
                    attach(&mut open, &mut root, element)?;
                }
            }
            Event::Text(text) => {
                if let Some(current) = open.last_mut() {
                    current.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(cdata) => {
                if let Some(current) = open.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(unclosed) = open.last() {
        return Err(ApiError::XmlStructure(format!(
            "unexpected end of input inside <{}>",
            unclosed.name
        )));
    }
    root.map(|root| XmlDocument { root })
        .ok_or_else(|| ApiError::XmlStructure("document has no root element".to_owned()))
}

fn attach(
    open: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), ApiError> {
    if let Some(parent) = open.last_mut() {
        parent.children.push(element);
        return Ok(());
    }
    if root.is_some() {
        return Err(ApiError::XmlStructure(format!(
            "second root element <{}>",
            element.name
        )));
    }
    *root = Some(element);
    Ok(())
}
