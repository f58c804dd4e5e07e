// ABOUTME: Decodes and encodes response payloads according to an object's DataType
// ABOUTME: Used by the driver and CLI to turn raw frame payloads into displayable values

use crate::error::CodecError;
use crate::registry::DataType;

/// A decoded payload value. One variant per [`DataType`] (minus `Unknown`,
/// which is left as raw bytes rather than wrapped).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    Enum(u8),
    Float(f32),
    String(String),
    Bytes(Vec<u8>),
}

fn require_len(data_type: DataType, payload: &[u8], expected: usize) -> Result<(), CodecError> {
    if payload.len() < expected {
        Err(CodecError::TooShort {
            data_type,
            expected,
            got: payload.len(),
        })
    } else {
        Ok(())
    }
}

/// Decodes `payload` according to `data_type`. `DataType::Unknown` always
/// succeeds, returning the payload verbatim as `Value::Bytes`.
pub fn decode_value(data_type: DataType, payload: &[u8]) -> Result<Value, CodecError> {
    match data_type {
        DataType::Unknown => Ok(Value::Bytes(payload.to_vec())),
        DataType::Bool => {
            require_len(data_type, payload, 1)?;
            Ok(Value::Bool(payload[0] != 0))
        }
        DataType::Uint8 => {
            require_len(data_type, payload, 1)?;
            Ok(Value::U8(payload[0]))
        }
        DataType::Int8 => {
            require_len(data_type, payload, 1)?;
            Ok(Value::I8(payload[0] as i8))
        }
        DataType::Uint16 => {
            require_len(data_type, payload, 2)?;
            Ok(Value::U16(u16::from_be_bytes([payload[0], payload[1]])))
        }
        DataType::Int16 => {
            require_len(data_type, payload, 2)?;
            Ok(Value::I16(i16::from_be_bytes([payload[0], payload[1]])))
        }
        DataType::Uint32 => {
            require_len(data_type, payload, 4)?;
            Ok(Value::U32(u32::from_be_bytes(payload[..4].try_into().unwrap())))
        }
        DataType::Int32 => {
            require_len(data_type, payload, 4)?;
            Ok(Value::I32(i32::from_be_bytes(payload[..4].try_into().unwrap())))
        }
        DataType::Enum => {
            require_len(data_type, payload, 1)?;
            Ok(Value::Enum(payload[0]))
        }
        DataType::Float => {
            require_len(data_type, payload, 4)?;
            Ok(Value::Float(f32::from_be_bytes(payload[..4].try_into().unwrap())))
        }
        DataType::String => {
            let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
            std::str::from_utf8(&payload[..end])
                .map(|s| Value::String(s.to_string()))
                .map_err(|_| CodecError::InvalidUtf8)
        }
    }
}

/// Encodes `value` for `data_type`, for building WRITE-style request
/// payloads. Fails with `TypeMismatch` if `value`'s variant doesn't match
/// `data_type`.
pub fn encode_value(data_type: DataType, value: &Value) -> Result<Vec<u8>, CodecError> {
    let mismatch = || CodecError::TypeMismatch(data_type);
    let mut out = Vec::new();
    match (data_type, value) {
        (DataType::Unknown, Value::Bytes(b)) => out.extend_from_slice(b),
        (DataType::Bool, Value::Bool(b)) => out.push(*b as u8),
        (DataType::Uint8, Value::U8(v)) => out.push(*v),
        (DataType::Int8, Value::I8(v)) => out.push(*v as u8),
        (DataType::Uint16, Value::U16(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (DataType::Int16, Value::I16(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (DataType::Uint32, Value::U32(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (DataType::Int32, Value::I32(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (DataType::Enum, Value::Enum(v)) => out.push(*v),
        (DataType::Float, Value::Float(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (DataType::String, Value::String(s)) => out.extend_from_slice(s.as_bytes()),
        _ => return Err(mismatch()),
    }
    Ok(out)
}
