//! Encode/decode one RPC message to/from a framed record.
//!
//! A message is always `[id, type, data]` on the wire. The shape of `data`
//! depends on `type`: an ordered list of `[arg-tag, payload]` pairs for CALL
//! and CALLBACK, an opaque value for RETURN, and a `{message, stack}` record
//! for ERROR.

use rmpv::Value as RmpValue;

use super::{ARG_FUNCTION, ARG_OTHERS, TYPE_CALL, TYPE_CALLBACK, TYPE_ERROR, TYPE_RETURN};
use crate::{
    error::RpcError,
    value::Value,
};

/// One positional argument of a CALL or CALLBACK message.
#[derive(Debug, Clone)]
pub enum WireArg {
    /// An `OTHERS`-tagged argument: a value handed over directly.
    Others(Value),
    /// A `FUNCTION`-tagged argument: a callback handle the recipient may
    /// invoke by emitting CALLBACK messages bearing this id.
    Function(u32),
}

/// The `message, stack` payload of an ERROR message.
#[derive(Debug, Clone)]
pub struct ErrorPayload {
    /// Human-readable failure description.
    pub message: String,
    /// The remote stack trace, preserved for diagnostics.
    pub stack: String,
}

/// The type-dependent body of a [`Message`].
#[derive(Debug, Clone)]
pub enum MessageData {
    /// Procedure name (first arg) plus positional arguments.
    Call(Vec<WireArg>),
    /// The procedure's return value. Absence of a return value is the
    /// `undefined` marker (see [`crate::value::undefined`]), not a missing
    /// variant.
    Return(Value),
    /// Arguments for one invocation of a callback handle.
    Callback(Vec<WireArg>),
    /// A thrown error.
    Error(ErrorPayload),
}

/// One RPC protocol unit.
#[derive(Debug, Clone)]
pub struct Message {
    /// Per-connection unique id; callback handles share this id space.
    pub id: u32,
    /// The type-tagged body.
    pub data: MessageData,
}

impl Message {
    /// Build a CALL message for `procedure` with pre-tagged arguments.
    #[must_use]
    pub const fn call(id: u32, args: Vec<WireArg>) -> Self {
        Self {
            id,
            data: MessageData::Call(args),
        }
    }

    /// Build a RETURN message.
    #[must_use]
    pub const fn return_value(id: u32, value: Value) -> Self {
        Self {
            id,
            data: MessageData::Return(value),
        }
    }

    /// Build a CALLBACK message.
    #[must_use]
    pub const fn callback(id: u32, args: Vec<WireArg>) -> Self {
        Self {
            id,
            data: MessageData::Callback(args),
        }
    }

    /// Build an ERROR message.
    #[must_use]
    pub const fn error(id: u32, message: String, stack: String) -> Self {
        Self {
            id,
            data: MessageData::Error(ErrorPayload { message, stack }),
        }
    }

    fn type_tag(&self) -> u32 {
        match &self.data {
            MessageData::Call(_) => TYPE_CALL,
            MessageData::Return(_) => TYPE_RETURN,
            MessageData::Callback(_) => TYPE_CALLBACK,
            MessageData::Error(_) => TYPE_ERROR,
        }
    }

    /// Serialize this message to a single framed record's payload.
    ///
    /// # Errors
    /// Returns [`RpcError::Encode`] if the value tree cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, RpcError> {
        let data_value = match &self.data {
            MessageData::Call(args) | MessageData::Callback(args) => encode_args(args),
            MessageData::Return(value) => value.clone(),
            MessageData::Error(payload) => RmpValue::Map(vec![
                (
                    RmpValue::String("message".into()),
                    RmpValue::String(payload.message.clone().into()),
                ),
                (
                    RmpValue::String("stack".into()),
                    RmpValue::String(payload.stack.clone().into()),
                ),
            ]),
        };

        let wire = RmpValue::Array(vec![
            RmpValue::from(self.id),
            RmpValue::from(self.type_tag()),
            data_value,
        ]);

        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &wire)?;
        Ok(buf)
    }

    /// Deserialize a message from a framed record's payload.
    ///
    /// # Errors
    /// Returns [`RpcError::Serialization`] if the value tree itself is
    /// malformed, or [`RpcError::Framing`] if it decodes but is not a
    /// well-formed `[id, type, data]` triple.
    pub fn decode(bytes: &[u8]) -> Result<Self, RpcError> {
        let mut cursor = bytes;
        let wire = rmpv::decode::read_value(&mut cursor)?;

        let RmpValue::Array(items) = wire else {
            return Err(RpcError::framing("message is not a 3-element array"));
        };
        let [id_v, type_v, data_v] = <[RmpValue; 3]>::try_from(items)
            .map_err(|_| RpcError::framing("message array must have exactly 3 elements"))?;

        let id = id_v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| RpcError::framing("message id is not a u32"))?;
        let type_tag = type_v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| RpcError::framing("message type is not a u32"))?;

        let data = match type_tag {
            TYPE_CALL => MessageData::Call(decode_args(data_v)?),
            TYPE_CALLBACK => MessageData::Callback(decode_args(data_v)?),
            TYPE_RETURN => MessageData::Return(data_v),
            TYPE_ERROR => MessageData::Error(decode_error(data_v)?),
            other => return Err(RpcError::framing(format!("unknown message type {other:#x}"))),
        };

        Ok(Self { id, data })
    }
}

fn encode_args(args: &[WireArg]) -> RmpValue {
    RmpValue::Array(
        args.iter()
            .map(|arg| match arg {
                WireArg::Others(value) => {
                    RmpValue::Array(vec![RmpValue::from(ARG_OTHERS), value.clone()])
                }
                WireArg::Function(handle) => {
                    RmpValue::Array(vec![RmpValue::from(ARG_FUNCTION), RmpValue::from(*handle)])
                }
            })
            .collect(),
    )
}

fn decode_args(value: RmpValue) -> Result<Vec<WireArg>, RpcError> {
    let RmpValue::Array(items) = value else {
        return Err(RpcError::framing("call/callback data is not an array"));
    };
    items.into_iter().map(decode_arg).collect()
}

fn decode_arg(item: RmpValue) -> Result<WireArg, RpcError> {
    let RmpValue::Array(pair) = item else {
        return Err(RpcError::framing("argument item is not a [tag, payload] pair"));
    };
    let [tag_v, payload] = <[RmpValue; 2]>::try_from(pair)
        .map_err(|_| RpcError::framing("argument item must have exactly 2 elements"))?;
    let tag = tag_v
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| RpcError::framing("argument tag is not a u32"))?;

    match tag {
        ARG_OTHERS => Ok(WireArg::Others(payload)),
        ARG_FUNCTION => {
            let handle = payload
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| RpcError::framing("function argument payload is not a u32"))?;
            Ok(WireArg::Function(handle))
        }
        other => Err(RpcError::framing(format!("unknown argument tag {other:#x}"))),
    }
}

fn decode_error(value: RmpValue) -> Result<ErrorPayload, RpcError> {
    let RmpValue::Map(entries) = value else {
        return Err(RpcError::framing("error data is not a map"));
    };
    let mut message = None;
    let mut stack = None;
    for (key, val) in entries {
        match key.as_str() {
            Some("message") => message = val.as_str().map(ToOwned::to_owned),
            Some("stack") => stack = val.as_str().map(ToOwned::to_owned),
            _ => {}
        }
    }
    Ok(ErrorPayload {
        message: message.ok_or_else(|| RpcError::framing("error data missing 'message'"))?,
        stack: stack.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::value::undefined;

    #[rstest]
    fn round_trips_a_call_message() {
        let msg = Message::call(
            7,
            vec![
                WireArg::Others(Value::String("echo".into())),
                WireArg::Others(Value::Integer(42.into())),
                WireArg::Function(99),
            ],
        );
        let bytes = msg.encode().expect("encode");
        let decoded = Message::decode(&bytes).expect("decode");

        assert_eq!(decoded.id, 7);
        let MessageData::Call(args) = decoded.data else {
            panic!("expected Call");
        };
        assert_eq!(args.len(), 3);
        assert!(matches!(args[2], WireArg::Function(99)));
    }

    #[rstest]
    fn round_trips_undefined_return() {
        let msg = Message::return_value(1, undefined());
        let bytes = msg.encode().expect("encode");
        let decoded = Message::decode(&bytes).expect("decode");
        let MessageData::Return(value) = decoded.data else {
            panic!("expected Return");
        };
        assert!(crate::value::is_undefined(&value));
    }

    #[rstest]
    fn round_trips_an_error_message() {
        let msg = Message::error(3, "boom".into(), "at fn f()".into());
        let bytes = msg.encode().expect("encode");
        let decoded = Message::decode(&bytes).expect("decode");
        let MessageData::Error(payload) = decoded.data else {
            panic!("expected Error");
        };
        assert_eq!(payload.message, "boom");
        assert_eq!(payload.stack, "at fn f()");
    }

    #[rstest]
    fn rejects_unknown_type_tag() {
        let wire = RmpValue::Array(vec![
            RmpValue::from(1u32),
            RmpValue::from(0xFFFF_FFFFu32),
            RmpValue::Nil,
        ]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &wire).expect("encode");
        assert!(Message::decode(&buf).is_err());
    }
}
