//! Document encoding

use bytes::BufMut;

use super::element::{Element, Value};
use super::Document;

/// Serialize a document to its wire form
pub fn encode_document(doc: &Document) -> Vec<u8> {
    let mut buf = Vec::with_capacity(doc.encoded_len());
    put_document(&mut buf, doc);
    buf
}

// Lengths above i32::MAX cannot be framed by the protocol at all.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn put_len<B: BufMut>(buf: &mut B, len: usize) {
    buf.put_i32_le(len as i32);
}

fn put_cstring<B: BufMut>(buf: &mut B, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn put_string<B: BufMut>(buf: &mut B, s: &str) {
    put_len(buf, s.len() + 1);
    put_cstring(buf, s);
}

fn put_document<B: BufMut>(buf: &mut B, doc: &Document) {
    put_len(buf, doc.encoded_len());
    for element in doc {
        put_element(buf, element);
    }
    buf.put_u8(0);
}

fn put_element<B: BufMut>(buf: &mut B, element: &Element) {
    buf.put_u8(element.element_type().code());
    put_cstring(buf, element.name());
    put_value(buf, element.value());
}

fn put_value<B: BufMut>(buf: &mut B, value: &Value) {
    match value {
        Value::Double(v) => buf.put_f64_le(*v),
        Value::String(s) | Value::JavaScript(s) | Value::Symbol(s) => put_string(buf, s),
        Value::Document(doc) | Value::Array(doc) => put_document(buf, doc),
        Value::Binary { subtype, bytes } => {
            put_len(buf, bytes.len());
            buf.put_u8(*subtype);
            buf.put_slice(bytes);
        }
        Value::Undefined | Value::Null | Value::MaxKey | Value::MinKey => {}
        Value::ObjectId(id) => buf.put_slice(id),
        Value::Boolean(v) => buf.put_u8(u8::from(*v)),
        Value::DateTime(v) | Value::Int64(v) => buf.put_i64_le(*v),
        Value::Regex { pattern, options } => {
            put_cstring(buf, pattern);
            put_cstring(buf, options);
        }
        Value::DbPointer { namespace, id } => {
            put_string(buf, namespace);
            buf.put_slice(id);
        }
        Value::JavaScriptWithScope { code, scope } => {
            put_len(buf, value.encoded_len());
            put_string(buf, code);
            put_document(buf, scope);
        }
        Value::Int32(v) => buf.put_i32_le(*v),
        Value::Timestamp(v) => buf.put_u64_le(*v),
        Value::Decimal128(bytes) => buf.put_slice(bytes),
    }
}
