//! Wire protocol: frame codec and message codec.
//!
//! A framed record on the wire is `length(u32 LE) | magic(u32 LE) | payload`
//! (see [`frame`]); the payload is a MessagePack-encoded `[id, type, data]`
//! triple (see [`message`]).

pub mod frame;
pub mod message;

/// Magic value stamped on every frame header.
pub const MAGIC: u32 = 0xB1F7_705F;

/// `CALL` message type tag.
pub const TYPE_CALL: u32 = 0xDF68_F4CB;
/// `RETURN` message type tag.
pub const TYPE_RETURN: u32 = 0x68B1_7581;
/// `CALLBACK` message type tag.
pub const TYPE_CALLBACK: u32 = 0x8D65_E5CC;
/// `ERROR` message type tag.
pub const TYPE_ERROR: u32 = 0xA07C_0F84;

/// `OTHERS` argument tag: the payload is a direct [`crate::value::Value`].
pub const ARG_OTHERS: u32 = 0xA7_F68C;
/// `FUNCTION` argument tag: the payload is a 32-bit callback handle.
pub const ARG_FUNCTION: u32 = 0x7F_F45F;

pub use message::{Message, MessageData, WireArg};
