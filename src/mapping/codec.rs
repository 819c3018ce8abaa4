// Copyright 2025
// Licensed under the Elastic License v2.0

//! Default value codec
//!
//! Converts record [`Value`]s into CQL native protocol encodings.
//!
//! ## Conversions
//!
//! | CQL type | Accepted values |
//! |----------|-----------------|
//! | boolean | Bool, String ("true"/"false"/"1"/"0") |
//! | int, bigint, counter | Int64, String |
//! | float, double | Float64, Int64, String |
//! | text, varchar, ascii | any scalar (Display form), Struct (JSON text) |
//! | blob | Bytes, String ("0x" hex literal or raw UTF-8) |
//! | timestamp | Int64 (epoch millis), String (RFC 3339 or millis) |
//! | uuid | String, Bytes (16 bytes) |
//!
//! `Null` always encodes to `None`.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::DateTime;
use uuid::Uuid;

use crate::core::{CodecError, CqlType, Value, ValueCodec};

/// Codec for the built-in CQL scalar types
#[derive(Debug, Clone, Default)]
pub struct StandardCodec;

impl StandardCodec {
    pub fn new() -> Self {
        Self
    }

    fn encode_boolean(&self, value: &Value) -> Result<Bytes, CodecError> {
        let b = match value {
            Value::Bool(b) => *b,
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return Err(invalid(s, CqlType::Boolean, "expected true or false")),
            },
            other => return Err(unsupported(other, CqlType::Boolean)),
        };
        Ok(Bytes::copy_from_slice(&[u8::from(b)]))
    }

    fn encode_int(&self, value: &Value) -> Result<Bytes, CodecError> {
        let n = self.integer(value, CqlType::Int)?;
        let n = i32::try_from(n).map_err(|_| CodecError::OutOfRange {
            value: n.to_string(),
            cql_type: CqlType::Int,
        })?;
        Ok(Bytes::copy_from_slice(&n.to_be_bytes()))
    }

    fn encode_bigint(&self, value: &Value, cql_type: CqlType) -> Result<Bytes, CodecError> {
        let n = self.integer(value, cql_type)?;
        Ok(Bytes::copy_from_slice(&n.to_be_bytes()))
    }

    fn integer(&self, value: &Value, cql_type: CqlType) -> Result<i64, CodecError> {
        match value {
            Value::Int64(n) => Ok(*n),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| invalid(s, cql_type, &e.to_string())),
            other => Err(unsupported(other, cql_type)),
        }
    }

    fn float(&self, value: &Value, cql_type: CqlType) -> Result<f64, CodecError> {
        match value {
            Value::Float64(f) => Ok(*f),
            Value::Int64(n) => Ok(*n as f64),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| invalid(s, cql_type, &e.to_string())),
            other => Err(unsupported(other, cql_type)),
        }
    }

    fn encode_text(&self, value: &Value, cql_type: CqlType) -> Result<Bytes, CodecError> {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Struct(_) => value.to_json().to_string(),
            other => other.to_string(),
        };
        if cql_type == CqlType::Ascii && !text.is_ascii() {
            return Err(invalid(&text, cql_type, "non-ASCII characters"));
        }
        Ok(Bytes::from(text.into_bytes()))
    }

    fn encode_blob(&self, value: &Value) -> Result<Bytes, CodecError> {
        match value {
            Value::Bytes(b) => Ok(Bytes::copy_from_slice(b)),
            Value::String(s) => match s.strip_prefix("0x") {
                Some(digits) => hex::decode(digits)
                    .map(Bytes::from)
                    .map_err(|e| invalid(s, CqlType::Blob, &e.to_string())),
                None => Ok(Bytes::copy_from_slice(s.as_bytes())),
            },
            other => Err(unsupported(other, CqlType::Blob)),
        }
    }

    fn encode_timestamp(&self, value: &Value) -> Result<Bytes, CodecError> {
        let millis = match value {
            Value::Int64(n) => *n,
            Value::String(s) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(n) => n,
                    Err(_) => DateTime::parse_from_rfc3339(s)
                        .map(|dt| dt.timestamp_millis())
                        .map_err(|e| invalid(s, CqlType::Timestamp, &e.to_string()))?,
                }
            }
            other => return Err(unsupported(other, CqlType::Timestamp)),
        };
        Ok(Bytes::copy_from_slice(&millis.to_be_bytes()))
    }

    fn encode_uuid(&self, value: &Value) -> Result<Bytes, CodecError> {
        let uuid = match value {
            Value::String(s) => {
                Uuid::parse_str(s.trim()).map_err(|e| invalid(s, CqlType::Uuid, &e.to_string()))?
            }
            Value::Bytes(b) => Uuid::from_slice(b).map_err(|e| CodecError::InvalidLiteral {
                input: hex::encode(b),
                cql_type: CqlType::Uuid,
                reason: e.to_string(),
            })?,
            other => return Err(unsupported(other, CqlType::Uuid)),
        };
        Ok(Bytes::copy_from_slice(uuid.as_bytes()))
    }
}

impl ValueCodec for StandardCodec {
    fn encode(&self, value: &Value, cql_type: &CqlType) -> Result<Option<Bytes>, CodecError> {
        if value.is_null() {
            return Ok(None);
        }

        let bytes = match cql_type {
            CqlType::Boolean => self.encode_boolean(value)?,
            CqlType::Int => self.encode_int(value)?,
            CqlType::Bigint | CqlType::Counter => self.encode_bigint(value, *cql_type)?,
            CqlType::Float => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_f32(self.float(value, CqlType::Float)? as f32);
                buf.freeze()
            }
            CqlType::Double => {
                let mut buf = BytesMut::with_capacity(8);
                buf.put_f64(self.float(value, CqlType::Double)?);
                buf.freeze()
            }
            CqlType::Ascii | CqlType::Text | CqlType::Varchar => {
                self.encode_text(value, *cql_type)?
            }
            CqlType::Blob => self.encode_blob(value)?,
            CqlType::Timestamp => self.encode_timestamp(value)?,
            CqlType::Uuid => self.encode_uuid(value)?,
        };
        Ok(Some(bytes))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Int64(_) => "integer",
        Value::Float64(_) => "float",
        Value::String(_) => "string",
        Value::Bytes(_) => "bytes",
        Value::Struct(_) => "struct",
    }
}

fn unsupported(value: &Value, cql_type: CqlType) -> CodecError {
    CodecError::Unsupported {
        value_kind: kind(value),
        cql_type,
    }
}

fn invalid(input: &str, cql_type: CqlType, reason: &str) -> CodecError {
    CodecError::InvalidLiteral {
        input: input.to_string(),
        cql_type,
        reason: reason.to_string(),
    }
}
