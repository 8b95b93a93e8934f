//! The wire value type.
//!
//! Argument and return payloads are self-describing MessagePack values:
//! strings, integers, floats, booleans, byte arrays, ordered sequences,
//! maps with arbitrary (including non-string) keys, nested records, and
//! null all round-trip without a companion schema. [`Value`] is a thin
//! re-export of [`rmpv::Value`], which already has these properties plus
//! support for extension types, used below to give `undefined`, dates,
//! sets, and arbitrary-precision integers a representation MessagePack
//! itself has no native variant for.

/// A self-describing wire value.
///
/// Re-exported rather than wrapped: the message codec builds and
/// destructures these directly, and downstream extension code benefits from
/// the same ergonomics (`Value::from`, `.as_str()`, `.as_array()`, ...).
pub use rmpv::Value;

use crate::error::RpcError;

/// MessagePack extension type used to mark the "undefined" value.
///
/// The source distinguishes "no return value" from an explicit `null`.
/// MessagePack has no native `undefined`, so it is modelled as a
/// zero-length extension payload under a reserved type code.
pub const UNDEFINED_EXT_TYPE: i8 = 0;

/// MessagePack extension type used for a date/instant value, carried as an
/// 8-byte big-endian milliseconds-since-epoch payload.
pub const DATE_EXT_TYPE: i8 = 1;

/// MessagePack extension type used for a set, carried as a nested
/// MessagePack-encoded array of its (unordered) members.
pub const SET_EXT_TYPE: i8 = 2;

/// MessagePack extension type used for an arbitrary-precision integer,
/// carried as its base-10 digit string (with an optional leading `-`),
/// UTF-8 encoded. `rmpv::Value::Integer` tops out at i64/u64, which this
/// exists to exceed.
pub const BIG_INT_EXT_TYPE: i8 = 3;

/// Construct the wire representation of "undefined".
#[must_use]
pub fn undefined() -> Value { Value::Ext(UNDEFINED_EXT_TYPE, Vec::new()) }

/// Returns `true` if `value` is the wire "undefined" marker.
#[must_use]
pub fn is_undefined(value: &Value) -> bool {
    matches!(value, Value::Ext(ty, payload) if *ty == UNDEFINED_EXT_TYPE && payload.is_empty())
}

/// Construct the wire representation of a date/instant.
#[must_use]
pub fn date(at: chrono::DateTime<chrono::Utc>) -> Value {
    Value::Ext(DATE_EXT_TYPE, at.timestamp_millis().to_be_bytes().to_vec())
}

/// Returns the date carried by `value`, if it is one.
#[must_use]
pub fn as_date(value: &Value) -> Option<chrono::DateTime<chrono::Utc>> {
    let Value::Ext(ty, payload) = value else {
        return None;
    };
    if *ty != DATE_EXT_TYPE {
        return None;
    }
    let bytes: [u8; 8] = payload.as_slice().try_into().ok()?;
    use chrono::TimeZone;
    chrono::Utc.timestamp_millis_opt(i64::from_be_bytes(bytes)).single()
}

/// Construct the wire representation of a set from its members. The
/// members are MessagePack-encoded into the extension payload as a nested
/// array; membership, not order, is what round-trips.
///
/// # Errors
/// Returns [`RpcError::Encode`] if the members cannot be serialized.
pub fn set(members: Vec<Value>) -> Result<Value, RpcError> {
    let mut payload = Vec::new();
    rmpv::encode::write_value(&mut payload, &Value::Array(members))?;
    Ok(Value::Ext(SET_EXT_TYPE, payload))
}

/// Returns the set members carried by `value`, if it is one.
///
/// # Errors
/// Returns [`RpcError::Serialization`] if the extension payload is not a
/// well-formed nested MessagePack array.
pub fn as_set(value: &Value) -> Result<Option<Vec<Value>>, RpcError> {
    let Value::Ext(ty, payload) = value else {
        return Ok(None);
    };
    if *ty != SET_EXT_TYPE {
        return Ok(None);
    }
    let mut cursor = payload.as_slice();
    let decoded = rmpv::decode::read_value(&mut cursor)?;
    Ok(match decoded {
        Value::Array(members) => Some(members),
        _ => None,
    })
}

/// Construct the wire representation of an arbitrary-precision integer from
/// its base-10 digit string (an optional leading `-` followed by one or
/// more ASCII digits).
#[must_use]
pub fn big_int(digits: impl Into<String>) -> Value {
    Value::Ext(BIG_INT_EXT_TYPE, digits.into().into_bytes())
}

/// Returns the digit string carried by `value`, if it is a big integer.
#[must_use]
pub fn as_big_int(value: &Value) -> Option<&str> {
    let Value::Ext(ty, payload) = value else {
        return None;
    };
    if *ty != BIG_INT_EXT_TYPE {
        return None;
    }
    std::str::from_utf8(payload).ok()
}
