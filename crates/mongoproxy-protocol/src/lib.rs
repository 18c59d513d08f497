//! Wire protocol support for the mongoproxy relay
//!
//! - Length-prefixed message framing (`frame`)
//! - Legacy OP_QUERY request view (`query`)
//! - Self-describing binary documents (`document`)

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod document;
pub mod frame;
pub mod query;

pub use document::{
    decode_document, decode_element, encode_document, Document, Element, ElementType, Value,
};
pub use frame::{read_frame, write_frame, Frame, FrameCodec, MsgHeader, OpCode};
pub use query::OpQuery;
