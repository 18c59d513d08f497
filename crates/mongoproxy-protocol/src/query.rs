//! Legacy OP_QUERY message view
//!
//! Layout after the 16-byte header:
//! - flags: 4 bytes
//! - fullCollectionName: cstring (`<database>.$cmd` for commands)
//! - numberToSkip: 4 bytes
//! - numberToReturn: 4 bytes
//! - query: document
//! - returnFieldsSelector: optional document

use bytes::{BufMut, BytesMut};

use mongoproxy_common::error::ProtocolError;

use crate::document::{decode_document, Document};
use crate::frame::{Frame, OpCode, HEADER_LEN};

/// Byte offset of the namespace C string
pub const NAMESPACE_OFFSET: usize = HEADER_LEN + 4;

/// numberToSkip + numberToReturn between the namespace and the query document
const SKIP_RETURN_LEN: usize = 8;

/// Namespace suffix commands are addressed to
pub const COMMAND_NAMESPACE_SUFFIX: &str = ".$cmd";

/// Borrowed view of an OP_QUERY frame
#[derive(Debug, Clone, Copy)]
pub struct OpQuery<'a> {
    frame: &'a Frame,
    namespace: &'a str,
}

impl<'a> OpQuery<'a> {
    pub fn parse(frame: &'a Frame) -> Result<Self, ProtocolError> {
        if frame.op_code() != OpCode::Query {
            return Err(ProtocolError::InvalidFormat(format!(
                "expected OP_QUERY, got {}",
                frame.op_code()
            )));
        }

        let bytes = frame.as_bytes();
        let rest = bytes
            .get(NAMESPACE_OFFSET..)
            .ok_or(ProtocolError::Truncated {
                offset: NAMESPACE_OFFSET,
                needed: 1,
                available: 0,
            })?;
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::InvalidCString(NAMESPACE_OFFSET))?;
        let namespace = std::str::from_utf8(&rest[..nul])
            .map_err(|_| ProtocolError::InvalidUtf8(NAMESPACE_OFFSET))?;

        Ok(Self { frame, namespace })
    }

    /// Full collection name, e.g. `app.$cmd`
    pub fn namespace(&self) -> &'a str {
        self.namespace
    }

    /// Database a command is addressed to, `None` for non-command queries
    pub fn command_database(&self) -> Option<&'a str> {
        self.namespace.strip_suffix(COMMAND_NAMESPACE_SUFFIX)
    }

    pub fn is_command(&self) -> bool {
        self.command_database().is_some()
    }

    pub fn flags(&self) -> u32 {
        let b = self.frame.as_bytes();
        u32::from_le_bytes([b[HEADER_LEN], b[HEADER_LEN + 1], b[HEADER_LEN + 2], b[HEADER_LEN + 3]])
    }

    /// Where the query document starts: 29 + namespace length
    pub fn document_offset(&self) -> usize {
        NAMESPACE_OFFSET + self.namespace.len() + 1 + SKIP_RETURN_LEN
    }

    /// Decode the query document
    pub fn query(&self) -> Result<Document, ProtocolError> {
        decode_document(self.frame.as_bytes(), self.document_offset())
    }

    /// Assemble an OP_QUERY frame
    pub fn build(
        request_id: i32,
        flags: u32,
        namespace: &str,
        number_to_skip: i32,
        number_to_return: i32,
        query: &Document,
    ) -> Frame {
        let mut body = BytesMut::with_capacity(4 + namespace.len() + 1 + SKIP_RETURN_LEN + query.encoded_len());
        body.put_u32_le(flags);
        body.put_slice(namespace.as_bytes());
        body.put_u8(0);
        body.put_i32_le(number_to_skip);
        body.put_i32_le(number_to_return);
        body.put_slice(&query.to_bytes());
        Frame::build(request_id, 0, OpCode::Query, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Value;

    fn insert_command() -> Document {
        let mut user = Document::new();
        user.insert("name", "Alice").insert("age", 30i64);

        let mut command = Document::new();
        command
            .insert("insert", "users")
            .insert("documents", Value::Array(Document::from_values(vec![Value::Document(user)])))
            .insert("ordered", true);
        command
    }

    #[test]
    fn test_parse_command_query() {
        let command = insert_command();
        let frame = OpQuery::build(3, 0, "app.$cmd", 0, -1, &command);
        let query = OpQuery::parse(&frame).unwrap();

        assert_eq!(query.namespace(), "app.$cmd");
        assert_eq!(query.command_database(), Some("app"));
        assert_eq!(query.flags(), 0);
        assert_eq!(query.document_offset(), 29 + "app.$cmd".len());
        assert_eq!(query.query().unwrap(), command);
    }

    #[test]
    fn test_non_command_namespace() {
        let frame = OpQuery::build(3, 0, "app.users", 0, 0, &Document::new());
        let query = OpQuery::parse(&frame).unwrap();
        assert!(!query.is_command());
        assert_eq!(query.command_database(), None);
    }

    #[test]
    fn test_rejects_other_opcodes() {
        let frame = Frame::build(1, 0, OpCode::Msg, &[0u8; 8]);
        assert!(matches!(
            OpQuery::parse(&frame),
            Err(ProtocolError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_unterminated_namespace() {
        let frame = Frame::build(1, 0, OpCode::Query, b"\0\0\0\0app");
        assert_eq!(
            OpQuery::parse(&frame).unwrap_err(),
            ProtocolError::InvalidCString(NAMESPACE_OFFSET)
        );
    }

    #[test]
    fn test_missing_query_document() {
        let frame = Frame::build(1, 0, OpCode::Query, b"\0\0\0\0a.$cmd\0");
        let query = OpQuery::parse(&frame).unwrap();
        assert!(matches!(query.query(), Err(ProtocolError::Truncated { .. })));
    }
}
