//! Length-prefixed message framing
//!
//! Every message starts with a 16-byte header whose first field is the total
//! message length, itself included. A frame is read in full before anyone
//! looks at it and is written back out byte for byte.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use mongoproxy_common::config::{DEFAULT_MAX_MESSAGE_BYTES, MESSAGE_HEADER_LEN};
use mongoproxy_common::error::{Error, NetworkError, ProtocolError, Result};

/// Size of the message header
pub const HEADER_LEN: usize = MESSAGE_HEADER_LEN as usize;

/// Size of the total-length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Byte offset of the opcode field
pub const OP_CODE_OFFSET: usize = 12;

/// OP_MSG flag bit: the sender will not wait for a reply
pub const MSG_FLAG_MORE_TO_COME: u32 = 1 << 1;

/// Wire protocol opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Reply,       // Deprecated
    Update,      // Deprecated
    Insert,      // Deprecated
    Query,       // Deprecated
    GetMore,     // Deprecated
    Delete,      // Deprecated
    KillCursors, // Deprecated
    Compressed,
    Msg,
    Unknown(u32),
}

impl From<u32> for OpCode {
    fn from(value: u32) -> Self {
        match value {
            1 => OpCode::Reply,
            2001 => OpCode::Update,
            2002 => OpCode::Insert,
            2004 => OpCode::Query,
            2005 => OpCode::GetMore,
            2006 => OpCode::Delete,
            2007 => OpCode::KillCursors,
            2012 => OpCode::Compressed,
            2013 => OpCode::Msg,
            other => OpCode::Unknown(other),
        }
    }
}

impl OpCode {
    pub fn code(self) -> u32 {
        match self {
            OpCode::Reply => 1,
            OpCode::Update => 2001,
            OpCode::Insert => 2002,
            OpCode::Query => 2004,
            OpCode::GetMore => 2005,
            OpCode::Delete => 2006,
            OpCode::KillCursors => 2007,
            OpCode::Compressed => 2012,
            OpCode::Msg => 2013,
            OpCode::Unknown(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Reply => "OP_REPLY",
            OpCode::Update => "OP_UPDATE",
            OpCode::Insert => "OP_INSERT",
            OpCode::Query => "OP_QUERY",
            OpCode::GetMore => "OP_GET_MORE",
            OpCode::Delete => "OP_DELETE",
            OpCode::KillCursors => "OP_KILL_CURSORS",
            OpCode::Compressed => "OP_COMPRESSED",
            OpCode::Msg => "OP_MSG",
            OpCode::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::Unknown(code) => write!(f, "UNKNOWN({code})"),
            known => f.write_str(known.name()),
        }
    }
}

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub message_length: u32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MsgHeader {
    /// Parse the header at the start of `data`
    pub fn parse(data: &[u8]) -> std::result::Result<Self, ProtocolError> {
        let header: &[u8; HEADER_LEN] = data
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or(ProtocolError::Truncated {
                offset: 0,
                needed: HEADER_LEN,
                available: data.len(),
            })?;

        let field = |at: usize| [header[at], header[at + 1], header[at + 2], header[at + 3]];
        Ok(Self {
            message_length: u32::from_le_bytes(field(0)),
            request_id: i32::from_le_bytes(field(4)),
            response_to: i32::from_le_bytes(field(8)),
            op_code: u32::from_le_bytes(field(OP_CODE_OFFSET)).into(),
        })
    }

    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.message_length);
        buf.put_i32_le(self.request_id);
        buf.put_i32_le(self.response_to);
        buf.put_u32_le(self.op_code.code());
    }
}

/// One complete message; immutable once read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: MsgHeader,
    bytes: Bytes,
}

impl Frame {
    /// Wrap raw bytes, checking the length prefix against the buffer
    pub fn from_bytes(bytes: impl Into<Bytes>) -> std::result::Result<Self, ProtocolError> {
        let bytes = bytes.into();
        let header = MsgHeader::parse(&bytes)?;
        if header.message_length as usize != bytes.len() {
            return Err(ProtocolError::LengthMismatch {
                offset: 0,
                declared: header.message_length as usize,
                consumed: bytes.len(),
            });
        }
        Ok(Self { header, bytes })
    }

    /// Assemble a frame from header fields and a body
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(request_id: i32, response_to: i32, op_code: OpCode, body: &[u8]) -> Self {
        let header = MsgHeader {
            message_length: (HEADER_LEN + body.len()) as u32,
            request_id,
            response_to,
            op_code,
        };
        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
        header.serialize(&mut buf);
        buf.extend_from_slice(body);
        Self {
            header,
            bytes: buf.freeze(),
        }
    }

    pub fn header(&self) -> &MsgHeader {
        &self.header
    }

    pub fn op_code(&self) -> OpCode {
        self.header.op_code
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Everything after the header
    pub fn body(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    /// Whether the server answers this request
    ///
    /// Legacy write opcodes never get a reply, and neither does an OP_MSG
    /// sent with `moreToCome`. An OP_COMPRESSED frame is judged by the
    /// `originalOpcode` at the start of its body; the flags of a compressed
    /// OP_MSG are inside the compressed payload, so it is assumed to expect
    /// a reply.
    pub fn expects_reply(&self) -> bool {
        match self.header.op_code {
            OpCode::Compressed => match self.body_u32(0) {
                Some(original) => !is_fire_and_forget_write(OpCode::from(original)),
                None => true,
            },
            OpCode::Msg => match self.body_u32(0) {
                Some(flags) => flags & MSG_FLAG_MORE_TO_COME == 0,
                None => true,
            },
            op_code => !is_fire_and_forget_write(op_code),
        }
    }

    fn body_u32(&self, offset: usize) -> Option<u32> {
        let b = self.body().get(offset..offset + 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Legacy write opcodes the server never answers
fn is_fire_and_forget_write(op_code: OpCode) -> bool {
    matches!(
        op_code,
        OpCode::Insert | OpCode::Update | OpCode::Delete | OpCode::KillCursors
    )
}

/// Reads and writes frames with a size limit
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_message_bytes: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_BYTES)
    }
}

impl FrameCodec {
    pub fn new(max_message_bytes: u32) -> Self {
        Self { max_message_bytes }
    }

    pub fn max_message_bytes(&self) -> u32 {
        self.max_message_bytes
    }

    /// Read one complete frame
    ///
    /// A stream that ends before the first length byte yields
    /// `NetworkError::ConnectionClosed`; one that ends anywhere later is an
    /// `UnexpectedEof` I/O error.
    pub async fn read<R>(&self, reader: &mut R) -> Result<Frame>
    where
        R: AsyncRead + Unpin,
    {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_LEN {
            let n = reader.read(&mut prefix[filled..]).await?;
            if n == 0 {
                return Err(if filled == 0 {
                    NetworkError::ConnectionClosed.into()
                } else {
                    Error::Io(std::io::ErrorKind::UnexpectedEof.into())
                });
            }
            filled += n;
        }

        let length = u32::from_le_bytes(prefix);
        if (length as usize) < HEADER_LEN {
            return Err(ProtocolError::InvalidFrameLength {
                length,
                minimum: MESSAGE_HEADER_LEN,
            }
            .into());
        }
        if length > self.max_message_bytes {
            return Err(ProtocolError::FrameTooLarge {
                length,
                limit: self.max_message_bytes,
            }
            .into());
        }

        let mut buf = vec![0u8; length as usize];
        buf[..LENGTH_PREFIX_LEN].copy_from_slice(&prefix);
        reader.read_exact(&mut buf[LENGTH_PREFIX_LEN..]).await?;

        let header = MsgHeader::parse(&buf)?;
        trace!("Read {} frame of {} bytes", header.op_code, length);
        Ok(Frame {
            header,
            bytes: Bytes::from(buf),
        })
    }

    /// Write a frame as one contiguous buffer
    pub async fn write<W>(&self, writer: &mut W, frame: &Frame) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Read a frame with the default size limit
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    FrameCodec::default().read(reader).await
}

/// Write a frame unchanged
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    FrameCodec::default().write(writer, frame).await
}
