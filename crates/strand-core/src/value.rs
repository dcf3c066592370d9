//! Control-rate values and their binary codec.
//!
//! A [`Value`] is what flows through callbacks, UI messages and network
//! events. The codec is a tag byte followed by a little-endian body:
//!
//! | Tag | Type | Body |
//! |---|---|---|
//! | `0x01` | `Bool` | 1 byte, non-zero is true |
//! | `0x02` | `Int` | `i32` |
//! | `0x03` | `UInt` | `u32` |
//! | `0x04` | `Float` | `f32` |
//! | `0x05` | `Double` | `f64` |
//! | `0x06` | `String` | `u32` byte length, then UTF-8 |

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_UINT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_DOUBLE: u8 = 0x05;
const TAG_STRING: u8 = 0x06;

/// Type tag of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarType {
    /// Boolean flag.
    Bool,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// Single-precision float.
    Float,
    /// Double-precision float.
    Double,
    /// UTF-8 string.
    String,
    /// Audio-rate sample buffer. Never carried by a [`Value`].
    Audio,
}

impl VarType {
    /// Lowercase type name.
    pub const fn name(self) -> &'static str {
        match self {
            VarType::Bool => "bool",
            VarType::Int => "int",
            VarType::UInt => "uint",
            VarType::Float => "float",
            VarType::Double => "double",
            VarType::String => "string",
            VarType::Audio => "audio",
        }
    }

    /// Returns true for the audio-rate type.
    pub const fn is_audio(self) -> bool {
        matches!(self, VarType::Audio)
    }

    /// Zero value of this type, `None` for audio.
    pub fn zero(self) -> Option<Value> {
        match self {
            VarType::Bool => Some(Value::Bool(false)),
            VarType::Int => Some(Value::Int(0)),
            VarType::UInt => Some(Value::UInt(0)),
            VarType::Float => Some(Value::Float(0.0)),
            VarType::Double => Some(Value::Double(0.0)),
            VarType::String => Some(Value::String(Arc::from(""))),
            VarType::Audio => None,
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed control value.
///
/// Strings are reference counted so that cloning a value on the routing path
/// never allocates.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i32),
    /// Unsigned integer.
    UInt(u32),
    /// Single-precision float.
    Float(f32),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 string.
    String(Arc<str>),
}

impl Value {
    /// Type tag of this value.
    pub const fn var_type(&self) -> VarType {
        match self {
            Value::Bool(_) => VarType::Bool,
            Value::Int(_) => VarType::Int,
            Value::UInt(_) => VarType::UInt,
            Value::Float(_) => VarType::Float,
            Value::Double(_) => VarType::Double,
            Value::String(_) => VarType::String,
        }
    }

    /// Numeric view of the value. Strings are not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            Value::Int(v) => Some(f64::from(v)),
            Value::UInt(v) => Some(f64::from(v)),
            Value::Float(v) => Some(f64::from(v)),
            Value::Double(v) => Some(v),
            Value::String(_) => None,
        }
    }

    /// Returns the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts to `ty`.
    ///
    /// Numeric types convert through `f64` with saturating casts; strings are
    /// parsed into numbers and numbers are formatted into strings. Returns
    /// `None` for audio or an unparseable string.
    pub fn convert(&self, ty: VarType) -> Option<Value> {
        if self.var_type() == ty {
            return Some(self.clone());
        }
        match (self, ty) {
            (_, VarType::Audio) => None,
            (_, VarType::String) => Some(Value::String(Arc::from(self.to_string()))),
            (Value::String(s), VarType::Bool) => match s.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                other => other.parse::<f64>().ok().map(|v| Value::Bool(v != 0.0)),
            },
            (Value::String(s), _) => {
                let parsed = s.trim().parse::<f64>().ok()?;
                Value::Double(parsed).convert(ty)
            }
            (_, _) => {
                let v = self.as_f64()?;
                Some(match ty {
                    VarType::Bool => Value::Bool(v != 0.0),
                    VarType::Int => Value::Int(v as i32),
                    VarType::UInt => Value::UInt(v as u32),
                    VarType::Float => Value::Float(v as f32),
                    _ => Value::Double(v),
                })
            }
        }
    }

    /// Number of bytes [`encode_into`](Self::encode_into) appends.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Value::Bool(_) => 1,
            Value::Int(_) | Value::UInt(_) | Value::Float(_) => 4,
            Value::Double(_) => 8,
            Value::String(s) => 4 + s.len(),
        }
    }

    /// Appends the tagged encoding of this value to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*b));
            }
            Value::Int(v) => {
                out.push(TAG_INT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::UInt(v) => {
                out.push(TAG_UINT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float(v) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Double(v) => {
                out.push(TAG_DOUBLE);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::String(s) => {
                out.push(TAG_STRING);
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Decodes one value from the front of `bytes`.
    ///
    /// Returns the value and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Value, usize), CodecError> {
        let (&tag, body) = bytes.split_first().ok_or(CodecError::Empty)?;
        let (value, used) = match tag {
            TAG_BOOL => (Value::Bool(take::<1>(body)?[0] != 0), 1),
            TAG_INT => (Value::Int(i32::from_le_bytes(take(body)?)), 4),
            TAG_UINT => (Value::UInt(u32::from_le_bytes(take(body)?)), 4),
            TAG_FLOAT => (Value::Float(f32::from_le_bytes(take(body)?)), 4),
            TAG_DOUBLE => (Value::Double(f64::from_le_bytes(take(body)?)), 8),
            TAG_STRING => {
                let len = u32::from_le_bytes(take(body)?) as usize;
                let end = len.saturating_add(4);
                let raw = body.get(4..end).ok_or(CodecError::Truncated {
                    needed: end,
                    found: body.len(),
                })?;
                let text = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
                (Value::String(Arc::from(text)), end)
            }
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok((value, used + 1))
    }
}

fn take<const N: usize>(body: &[u8]) -> Result<[u8; N], CodecError> {
    body.get(..N)
        .and_then(|raw| <[u8; N]>::try_from(raw).ok())
        .ok_or(CodecError::Truncated {
            needed: N,
            found: body.len(),
        })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

/// Failure to decode a value blob.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// No bytes at all.
    #[error("empty value blob")]
    Empty,
    /// The tag byte names no known type.
    #[error("unknown value tag 0x{0:02x}")]
    UnknownTag(u8),
    /// The body is shorter than its type requires.
    #[error("truncated value: needed {needed} bytes, found {found}")]
    Truncated {
        /// Body bytes required.
        needed: usize,
        /// Body bytes present.
        found: usize,
    },
    /// A string body is not valid UTF-8.
    #[error("string value is not valid UTF-8")]
    InvalidUtf8,
}
