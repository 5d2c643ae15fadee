//! Conversion between raw register words and typed values.
//!
//! Each register travels as a big-endian word. Words are split into bytes in
//! word order and the resulting byte stream is reinterpreted according to the
//! format atoms and their byte order.

use std::fmt;
use thiserror::Error;

use crate::access::{ByteOrder, FormatAtom, TypeCode};
use crate::robust_modbus::{Coil, Word};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    F32(f32),
    F64(f64),
    Text(String),
}

impl Value {
    /// Hex rendering for integer values.
    pub fn hex(&self) -> Option<String> {
        match self {
            Value::Signed(v) if *v < 0 => Some(format!("-{:#x}", v.unsigned_abs())),
            Value::Signed(v) => Some(format!("{v:#x}")),
            Value::Unsigned(v) => Some(format!("{v:#x}")),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", u8::from(*v)),
            Value::Signed(v) => write!(f, "{v}"),
            Value::Unsigned(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LiteralError {
    #[error("{literal:?} is not a valid integer")]
    Integer { literal: String },
    #[error("{literal:?} is not a valid number")]
    Float { literal: String },
    #[error("{literal:?} does not fit in type '{code}'")]
    Range { literal: String, code: TypeCode },
    #[error("{literal:?} is longer than {max} bytes")]
    TextTooLong { literal: String, max: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("type '{0}' packs to {1} bytes, not a whole number of registers")]
    OddLength(TypeCode, usize),
    #[error("format expects {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error(transparent)]
    Literal(#[from] LiteralError),
}

fn array<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut bytes = [0; N];
    bytes.copy_from_slice(chunk);
    bytes
}

macro_rules! from_bytes {
    ($ty:ty, $order:expr, $chunk:expr) => {
        match $order {
            ByteOrder::Big => <$ty>::from_be_bytes(array($chunk)),
            ByteOrder::Little => <$ty>::from_le_bytes(array($chunk)),
        }
    };
}

macro_rules! to_bytes {
    ($value:expr, $order:expr) => {
        match $order {
            ByteOrder::Big => $value.to_be_bytes().to_vec(),
            ByteOrder::Little => $value.to_le_bytes().to_vec(),
        }
    };
}

fn unpack(atom: &FormatAtom, chunk: &[u8]) -> Option<Value> {
    let order = atom.order;
    Some(match atom.code {
        TypeCode::Pad => return None,
        TypeCode::Bool => Value::Bool(chunk[0] != 0),
        TypeCode::I8 => Value::Signed(i8::from_be_bytes([chunk[0]]).into()),
        TypeCode::U8 => Value::Unsigned(chunk[0].into()),
        TypeCode::I16 => Value::Signed(from_bytes!(i16, order, chunk).into()),
        TypeCode::U16 => Value::Unsigned(from_bytes!(u16, order, chunk).into()),
        TypeCode::I32 => Value::Signed(from_bytes!(i32, order, chunk).into()),
        TypeCode::U32 => Value::Unsigned(from_bytes!(u32, order, chunk).into()),
        TypeCode::I64 => Value::Signed(from_bytes!(i64, order, chunk)),
        TypeCode::U64 => Value::Unsigned(from_bytes!(u64, order, chunk)),
        TypeCode::F32 => Value::F32(from_bytes!(f32, order, chunk)),
        TypeCode::F64 => Value::F64(from_bytes!(f64, order, chunk)),
        TypeCode::Text(_) => {
            let end = chunk.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            Value::Text(String::from_utf8_lossy(&chunk[..end]).into_owned())
        }
    })
}

/// Decodes `words` into one value per atom, in atom order. Pad bytes are
/// skipped.
pub fn decode(words: &[Word], atoms: &[FormatAtom]) -> Result<Vec<Value>, CodecError> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    let expected: usize = atoms.iter().map(FormatAtom::size).sum();
    if expected != bytes.len() {
        return Err(CodecError::Length {
            expected,
            actual: bytes.len(),
        });
    }

    let mut offset = 0;
    Ok(atoms
        .iter()
        .filter_map(|atom| {
            let chunk = &bytes[offset..offset + atom.size()];
            offset += atom.size();
            unpack(atom, chunk)
        })
        .collect())
}

pub fn decode_bits(bits: &[Coil]) -> Vec<Value> {
    bits.iter().copied().map(Value::Bool).collect()
}

fn parse_integer(literal: &str) -> Option<i128> {
    let (negative, unsigned) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal.strip_prefix('+').unwrap_or(literal)),
    };
    let lower = unsigned.to_ascii_lowercase();
    let (radix, digits) = if let Some(digits) = lower.strip_prefix("0x") {
        (16, digits)
    } else if let Some(digits) = lower.strip_prefix("0o") {
        (8, digits)
    } else if let Some(digits) = lower.strip_prefix("0b") {
        (2, digits)
    } else {
        (10, lower.as_str())
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

fn integer_range(code: TypeCode) -> (i128, i128) {
    match code {
        TypeCode::I8 => (i8::MIN.into(), i8::MAX.into()),
        TypeCode::U8 => (0, u8::MAX.into()),
        TypeCode::I16 => (i16::MIN.into(), i16::MAX.into()),
        TypeCode::U16 => (0, u16::MAX.into()),
        TypeCode::I32 => (i32::MIN.into(), i32::MAX.into()),
        TypeCode::U32 => (0, u32::MAX.into()),
        TypeCode::I64 => (i64::MIN.into(), i64::MAX.into()),
        _ => (0, u64::MAX.into()),
    }
}

/// Parses a write literal as the atom's declared type.
pub fn parse_literal(atom: &FormatAtom, literal: &str) -> Result<Value, LiteralError> {
    let literal = literal.trim();
    match atom.code {
        TypeCode::F32 | TypeCode::F64 => {
            let value: f64 = literal.parse().map_err(|_| LiteralError::Float {
                literal: literal.to_string(),
            })?;
            match atom.code {
                TypeCode::F32 => {
                    let narrowed = value as f32;
                    if value.is_finite() && narrowed.is_infinite() {
                        return Err(LiteralError::Range {
                            literal: literal.to_string(),
                            code: TypeCode::F32,
                        });
                    }
                    Ok(Value::F32(narrowed))
                }
                _ => Ok(Value::F64(value)),
            }
        }
        TypeCode::Text(max) => {
            if literal.len() > max {
                return Err(LiteralError::TextTooLong {
                    literal: literal.to_string(),
                    max,
                });
            }
            Ok(Value::Text(literal.to_string()))
        }
        TypeCode::Bool => parse_coil(literal).map(Value::Bool),
        code => {
            let value = parse_integer(literal).ok_or_else(|| LiteralError::Integer {
                literal: literal.to_string(),
            })?;
            let (min, max) = integer_range(code);
            if value < min || value > max {
                return Err(LiteralError::Range {
                    literal: literal.to_string(),
                    code,
                });
            }
            Ok(if min < 0 {
                Value::Signed(value as i64)
            } else {
                Value::Unsigned(value as u64)
            })
        }
    }
}

/// Coil literals are integers; anything non-zero switches the coil on.
pub fn parse_coil(literal: &str) -> Result<Coil, LiteralError> {
    parse_integer(literal.trim())
        .map(|v| v != 0)
        .ok_or_else(|| LiteralError::Integer {
            literal: literal.to_string(),
        })
}

fn pack(atom: &FormatAtom, value: &Value) -> Vec<u8> {
    let order = atom.order;
    match (atom.code, value) {
        (TypeCode::F32, Value::F32(v)) => to_bytes!(v, order),
        (TypeCode::F64, Value::F64(v)) => to_bytes!(v, order),
        (TypeCode::Text(len), Value::Text(v)) => {
            let mut bytes = v.as_bytes().to_vec();
            bytes.resize(len, 0);
            bytes
        }
        (TypeCode::Bool, Value::Bool(v)) => vec![u8::from(*v)],
        (TypeCode::I8, Value::Signed(v)) => (*v as i8).to_be_bytes().to_vec(),
        (TypeCode::U8, Value::Unsigned(v)) => vec![*v as u8],
        (TypeCode::I16, Value::Signed(v)) => to_bytes!(*v as i16, order),
        (TypeCode::U16, Value::Unsigned(v)) => to_bytes!(*v as u16, order),
        (TypeCode::I32, Value::Signed(v)) => to_bytes!(*v as i32, order),
        (TypeCode::U32, Value::Unsigned(v)) => to_bytes!(*v as u32, order),
        (TypeCode::I64, Value::Signed(v)) => to_bytes!(v, order),
        (TypeCode::U64, Value::Unsigned(v)) => to_bytes!(v, order),
        (code, value) => unreachable!("{value:?} was not parsed as '{code}'"),
    }
}

/// Encodes one write literal into the register words that carry it.
pub fn encode(atom: &FormatAtom, literal: &str) -> Result<Vec<Word>, CodecError> {
    if atom.size() % 2 != 0 {
        return Err(CodecError::OddLength(atom.code, atom.size()));
    }
    let value = parse_literal(atom, literal)?;
    Ok(pack(atom, &value)
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}
