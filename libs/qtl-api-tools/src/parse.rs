use crate::error::ApiError;
use crate::xml::{self, XmlDocument};
use serde_json::Value;

/// Response body after content-type dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    /// `Content-Type` contained `application/json`
    Json(Value),
    /// `Content-Type` contained `application/xml`
    Xml(XmlDocument),
    /// Anything else, passed through as text
    Text(String),
}

impl ParsedBody {
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_xml(&self) -> Option<&XmlDocument> {
        match self {
            Self::Xml(doc) => Some(doc),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Uniform JSON view: XML is rendered with [`XmlDocument::to_value`] and
    /// text becomes a JSON string.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Xml(doc) => doc.to_value(),
            Self::Text(text) => Value::String(text),
        }
    }
}

/// Which parser a `Content-Type` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Xml,
    Text,
}

impl BodyKind {
    /// Substring match, so parameters (`; charset=utf-8`) and vendor suffixes
    /// in front of the media type are tolerated. `text/xml` is text.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.contains("application/json") {
            BodyKind::Json
        } else if content_type.contains("application/xml") {
            BodyKind::Xml
        } else {
            BodyKind::Text
        }
    }
}

/// Parse a decoded body according to `kind`.
///
/// # Errors
/// Returns `ApiError::Json` for malformed JSON and `ApiError::Xml` /
/// `ApiError::XmlStructure` for malformed XML.
pub fn parse_body(kind: BodyKind, text: String) -> Result<ParsedBody, ApiError> {
    match kind {
        BodyKind::Json => Ok(ParsedBody::Json(serde_json::from_str(&text)?)),
        BodyKind::Xml => Ok(ParsedBody::Xml(xml::parse(&text)?)),
        BodyKind::Text => Ok(ParsedBody::Text(text)),
    }
}
