//! Self-describing binary documents
//!
//! A document is a 4-byte little-endian total length, a run of elements and
//! a single `0x00` terminator. Each element is a type code, a NUL-terminated
//! name and a value whose layout depends on the type code. Decoding is eager:
//! the whole tree is materialized, and lookups run over the decoded elements.

mod decode;
mod element;
mod encode;
mod json;

use std::fmt;

pub use decode::{decode_document, decode_element, MAX_NESTING_DEPTH};
pub use element::{Element, ElementType, Value};
pub use encode::encode_document;

/// Length field plus terminator of an empty document
pub const EMPTY_DOCUMENT_LEN: usize = 5;

/// Ordered sequence of named elements
///
/// Names are not required to be unique; lookup by name returns the first
/// match, the same way the upstream server resolves duplicated keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    elements: Vec<Element>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an array body, keying values "0", "1", ...
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| Element::new(i.to_string(), value))
            .collect()
    }

    /// Append an element; existing elements with the same name are kept
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.elements.push(Element::new(name, value));
        self
    }

    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    /// Element at a position
    pub fn get_index(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    /// First element with the given name
    pub fn get(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name() == name)
    }

    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(Element::value)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get_value(name).and_then(Value::as_str)
    }

    pub fn get_document(&self, name: &str) -> Option<&Document> {
        self.get_value(name).and_then(Value::as_document)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.elements.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(Element::name)
    }

    /// Length field + every element + terminator
    pub fn encoded_len(&self) -> usize {
        EMPTY_DOCUMENT_LEN + self.elements.iter().map(Element::encoded_len).sum::<usize>()
    }

    /// Wire encoding of this document
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_document(self)
    }
}

impl FromIterator<Element> for Document {
    fn from_iter<I: IntoIterator<Item = Element>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = Element;
    type IntoIter = std::vec::IntoIter<Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
