//! Document decoding
//!
//! All offsets are absolute positions in the caller's buffer, so errors point
//! at the byte that could not be decoded. Element decoding inside a document
//! runs over a view that ends just before the document's terminator, which
//! keeps a lying length field from reading past its enclosing document.

use mongoproxy_common::error::ProtocolError;

use super::element::{Element, ElementType, Value};
use super::{Document, EMPTY_DOCUMENT_LEN};

/// Deepest embedding of documents/arrays accepted
pub const MAX_NESTING_DEPTH: usize = 100;

type Result<T> = std::result::Result<T, ProtocolError>;

/// Decode the document starting at `offset`
///
/// Exactly the declared length is consumed; bytes after the terminator are
/// left alone.
pub fn decode_document(buffer: &[u8], offset: usize) -> Result<Document> {
    Decoder { buf: buffer }.document(offset, 0)
}

/// Decode a single element starting at `offset`
pub fn decode_element(buffer: &[u8], offset: usize) -> Result<Element> {
    Decoder { buf: buffer }.element(offset, 0)
}

#[derive(Clone, Copy)]
struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn take(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let truncated = || ProtocolError::Truncated {
            offset,
            needed: len,
            available: self.buf.len().saturating_sub(offset),
        };
        let end = offset.checked_add(len).ok_or_else(truncated)?;
        self.buf.get(offset..end).ok_or_else(truncated)
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(offset, N)?);
        Ok(out)
    }

    fn u8(&self, offset: usize) -> Result<u8> {
        Ok(self.take(offset, 1)?[0])
    }

    fn i32(&self, offset: usize) -> Result<i32> {
        self.array(offset).map(i32::from_le_bytes)
    }

    fn i64(&self, offset: usize) -> Result<i64> {
        self.array(offset).map(i64::from_le_bytes)
    }

    /// A length field that must not be negative
    fn length(&self, offset: usize) -> Result<usize> {
        let raw = self.i32(offset)?;
        usize::try_from(raw)
            .map_err(|_| ProtocolError::InvalidFormat(format!("negative length {raw} at offset {offset}")))
    }

    fn utf8(bytes: &[u8], offset: usize) -> Result<String> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8(offset))
    }

    /// NUL-terminated string; returns the string and the bytes consumed
    fn cstring(&self, offset: usize) -> Result<(String, usize)> {
        let rest = self
            .buf
            .get(offset..)
            .ok_or(ProtocolError::InvalidCString(offset))?;
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::InvalidCString(offset))?;
        Ok((Self::utf8(&rest[..nul], offset)?, nul + 1))
    }

    /// Length-prefixed string whose length counts its trailing NUL
    fn string(&self, offset: usize) -> Result<(String, usize)> {
        let len = self.length(offset)?;
        if len == 0 {
            return Err(ProtocolError::InvalidFormat(format!(
                "zero string length at offset {offset}"
            )));
        }
        let bytes = self.take(offset + 4, len)?;
        if bytes[len - 1] != 0 {
            return Err(ProtocolError::MissingTerminator(offset + 4 + len - 1));
        }
        Ok((Self::utf8(&bytes[..len - 1], offset + 4)?, 4 + len))
    }

    fn document(&self, offset: usize, depth: usize) -> Result<Document> {
        if depth > MAX_NESTING_DEPTH {
            return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
        }

        let declared = self.length(offset)?;
        if declared < EMPTY_DOCUMENT_LEN {
            return Err(ProtocolError::InvalidFormat(format!(
                "document length {declared} at offset {offset}"
            )));
        }
        self.take(offset, declared)?;

        let terminator = offset + declared - 1;
        let body = Decoder {
            buf: &self.buf[..terminator],
        };

        let mut elements = Vec::new();
        let mut pos = offset + 4;
        while pos < terminator {
            let element = body.element(pos, depth)?;
            pos += element.encoded_len();
            elements.push(element);
        }

        if self.buf[terminator] != 0 {
            return Err(ProtocolError::MissingTerminator(terminator));
        }

        Ok(elements.into_iter().collect())
    }

    fn element(&self, offset: usize, depth: usize) -> Result<Element> {
        let code = self.u8(offset)?;
        let ty = ElementType::from_code(code)
            .ok_or(ProtocolError::UnknownElementType { code, offset })?;
        let (name, name_len) = self.cstring(offset + 1)?;
        let value = self.value(ty, offset + 1 + name_len, depth)?;
        Ok(Element::new(name, value))
    }

    fn value(&self, ty: ElementType, offset: usize, depth: usize) -> Result<Value> {
        let value = match ty {
            ElementType::Double => Value::Double(f64::from_le_bytes(self.array(offset)?)),
            ElementType::String => Value::String(self.string(offset)?.0),
            ElementType::Document => Value::Document(self.document(offset, depth + 1)?),
            ElementType::Array => Value::Array(self.document(offset, depth + 1)?),
            ElementType::Binary => {
                let len = self.length(offset)?;
                let subtype = self.u8(offset + 4)?;
                let bytes = self.take(offset + 5, len)?.to_vec();
                Value::Binary { subtype, bytes }
            }
            ElementType::Undefined => Value::Undefined,
            ElementType::ObjectId => Value::ObjectId(self.array(offset)?),
            ElementType::Boolean => match self.u8(offset)? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => {
                    return Err(ProtocolError::InvalidFormat(format!(
                        "boolean byte {other} at offset {offset}"
                    )))
                }
            },
            ElementType::DateTime => Value::DateTime(self.i64(offset)?),
            ElementType::Null => Value::Null,
            ElementType::Regex => {
                let (pattern, pattern_len) = self.cstring(offset)?;
                let (options, _) = self.cstring(offset + pattern_len)?;
                Value::Regex { pattern, options }
            }
            ElementType::DbPointer => {
                let (namespace, ns_len) = self.string(offset)?;
                let id = self.array(offset + ns_len)?;
                Value::DbPointer { namespace, id }
            }
            ElementType::JavaScript => Value::JavaScript(self.string(offset)?.0),
            ElementType::Symbol => Value::Symbol(self.string(offset)?.0),
            ElementType::JavaScriptWithScope => {
                let declared = self.length(offset)?;
                let (code, code_len) = self.string(offset + 4)?;
                let scope = self.document(offset + 4 + code_len, depth + 1)?;
                let consumed = 4 + code_len + scope.encoded_len();
                if consumed != declared {
                    return Err(ProtocolError::LengthMismatch {
                        offset,
                        declared,
                        consumed,
                    });
                }
                Value::JavaScriptWithScope { code, scope }
            }
            ElementType::Int32 => Value::Int32(self.i32(offset)?),
            ElementType::Timestamp => Value::Timestamp(u64::from_le_bytes(self.array(offset)?)),
            ElementType::Int64 => Value::Int64(self.i64(offset)?),
            ElementType::Decimal128 => Value::Decimal128(self.array(offset)?),
            ElementType::MaxKey => Value::MaxKey,
            ElementType::MinKey => Value::MinKey,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// {"n": int64 7}
    fn int64_document() -> Vec<u8> {
        let mut buf = vec![];
        buf.extend_from_slice(&16i32.to_le_bytes());
        buf.push(0x12);
        buf.extend_from_slice(b"n\0");
        buf.extend_from_slice(&7i64.to_le_bytes());
        buf.push(0);
        buf
    }

    #[test]
    fn test_decode_int64_document() {
        let doc = decode_document(&int64_document(), 0).unwrap();
        assert_eq!(doc.len(), 1);
        let element = doc.get_index(0).unwrap();
        assert_eq!(element.name(), "n");
        assert_eq!(element.value(), &Value::Int64(7));
        assert_eq!(doc.encoded_len(), 16);
    }

    #[test]
    fn test_decode_at_offset_ignores_surroundings() {
        let mut buf = b"junk".to_vec();
        buf.extend_from_slice(&int64_document());
        buf.extend_from_slice(b"trailing");

        let doc = decode_document(&buf, 4).unwrap();
        assert_eq!(doc.get_value("n"), Some(&Value::Int64(7)));
    }

    #[test]
    fn test_decode_element_directly() {
        let buf = int64_document();
        let element = decode_element(&buf, 4).unwrap();
        assert_eq!(element.name(), "n");
        assert_eq!(element.encoded_len(), 11);
    }

    #[test]
    fn test_unknown_type_code_fails() {
        let mut buf = int64_document();
        buf[4] = 0x42;
        assert_eq!(
            decode_document(&buf, 0).unwrap_err(),
            ProtocolError::UnknownElementType { code: 0x42, offset: 4 }
        );
    }

    #[test]
    fn test_truncated_document_fails() {
        let buf = int64_document();
        assert!(matches!(
            decode_document(&buf[..10], 0),
            Err(ProtocolError::Truncated { offset: 0, needed: 16, .. })
        ));
    }

    #[test]
    fn test_value_cannot_cross_terminator() {
        // Declares 12 bytes, but the int64 element needs 11 bytes after the
        // 4-byte length, which would swallow the terminator.
        let mut buf = int64_document();
        buf[0] = 12;
        buf.truncate(12);
        assert!(matches!(
            decode_document(&buf, 0),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_missing_terminator_fails() {
        let mut buf = int64_document();
        let last = buf.len() - 1;
        buf[last] = 1;
        assert_eq!(
            decode_document(&buf, 0).unwrap_err(),
            ProtocolError::MissingTerminator(15)
        );
    }

    #[test]
    fn test_short_and_negative_lengths() {
        assert!(matches!(
            decode_document(&[4, 0, 0, 0, 0], 0),
            Err(ProtocolError::InvalidFormat(_))
        ));
        assert!(matches!(
            decode_document(&(-1i32).to_le_bytes(), 0),
            Err(ProtocolError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_unterminated_name() {
        let buf = [0x10, b'a', b'b'];
        assert_eq!(
            decode_element(&buf, 0).unwrap_err(),
            ProtocolError::InvalidCString(1)
        );
    }

    #[test]
    fn test_string_requires_nul() {
        let mut buf = vec![0x02, b's', 0];
        buf.extend_from_slice(&2i32.to_le_bytes());
        buf.extend_from_slice(b"ab");
        assert_eq!(
            decode_element(&buf, 0).unwrap_err(),
            ProtocolError::MissingTerminator(8)
        );
    }

    #[test]
    fn test_nesting_limit() {
        let mut doc = Document::new();
        for _ in 0..=MAX_NESTING_DEPTH {
            let mut outer = Document::new();
            outer.insert("d", doc);
            doc = outer;
        }
        assert_eq!(
            decode_document(&doc.to_bytes(), 0).unwrap_err(),
            ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH)
        );
    }

    #[test]
    fn test_code_with_scope_length_checked() {
        let mut scope = Document::new();
        scope.insert("x", 1);
        let mut doc = Document::new();
        doc.insert(
            "f",
            Value::JavaScriptWithScope {
                code: "return x;".to_string(),
                scope,
            },
        );
        let mut bytes = doc.to_bytes();
        assert_eq!(decode_document(&bytes, 0).unwrap(), doc);

        // corrupt the code-with-scope total length (right after "f\0")
        bytes[7] = bytes[7].wrapping_add(1);
        assert!(matches!(
            decode_document(&bytes, 0),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }
}
