use std::fmt;
use thiserror::Error;

/// Most registers a single read request can carry.
pub const MAX_REGISTERS: usize = 125;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            '!' | '>' => Some(ByteOrder::Big),
            '<' => Some(ByteOrder::Little),
            '=' | '@' => Some(ByteOrder::native()),
            _ => None,
        }
    }

    fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }
}

/// Primitive type codes, named after their struct-pack characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeCode {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Text(usize),
    /// Skipped byte, carries no value.
    Pad,
}

impl TypeCode {
    pub fn size(&self) -> usize {
        match self {
            TypeCode::Bool | TypeCode::I8 | TypeCode::U8 | TypeCode::Pad => 1,
            TypeCode::I16 | TypeCode::U16 => 2,
            TypeCode::I32 | TypeCode::U32 | TypeCode::F32 => 4,
            TypeCode::I64 | TypeCode::U64 | TypeCode::F64 => 8,
            TypeCode::Text(len) => *len,
        }
    }

    fn from_code(code: char) -> Option<Self> {
        Some(match code {
            '?' => TypeCode::Bool,
            'b' => TypeCode::I8,
            'B' => TypeCode::U8,
            'h' => TypeCode::I16,
            'H' => TypeCode::U16,
            'i' | 'l' => TypeCode::I32,
            'I' | 'L' => TypeCode::U32,
            'q' => TypeCode::I64,
            'Q' => TypeCode::U64,
            'f' => TypeCode::F32,
            'd' => TypeCode::F64,
            'x' => TypeCode::Pad,
            _ => return None,
        })
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            TypeCode::Bool => '?',
            TypeCode::I8 => 'b',
            TypeCode::U8 => 'B',
            TypeCode::I16 => 'h',
            TypeCode::U16 => 'H',
            TypeCode::I32 => 'i',
            TypeCode::U32 => 'I',
            TypeCode::I64 => 'q',
            TypeCode::U64 => 'Q',
            TypeCode::F32 => 'f',
            TypeCode::F64 => 'd',
            TypeCode::Pad => 'x',
            TypeCode::Text(len) => return write!(f, "{len}s"),
        };
        write!(f, "{code}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatAtom {
    pub order: ByteOrder,
    pub code: TypeCode,
}

impl FormatAtom {
    pub fn size(&self) -> usize {
        self.code.size()
    }

    pub fn has_value(&self) -> bool {
        self.code != TypeCode::Pad
    }
}

/// Ordered atoms of one descriptor. Never empty; the byte order of the first
/// atom is the order of the whole format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Format {
    atoms: Vec<FormatAtom>,
}

impl Format {
    pub fn bit() -> Self {
        Self {
            atoms: vec![FormatAtom {
                order: ByteOrder::Big,
                code: TypeCode::Bool,
            }],
        }
    }

    pub fn atoms(&self) -> &[FormatAtom] {
        &self.atoms
    }

    pub fn order(&self) -> ByteOrder {
        self.atoms[0].order
    }

    pub fn byte_len(&self) -> usize {
        self.atoms.iter().map(FormatAtom::size).sum()
    }

    /// Number of values the format decodes to; pad bytes carry none.
    pub fn value_count(&self) -> usize {
        self.atoms.iter().filter(|a| a.has_value()).count()
    }
}

impl Default for Format {
    fn default() -> Self {
        Self {
            atoms: vec![FormatAtom {
                order: ByteOrder::Big,
                code: TypeCode::U16,
            }],
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("empty format")]
    Empty,
    #[error("unknown type code {0:?} at offset {1}")]
    UnknownCode(char, usize),
    #[error("zero repeat count at offset {0}")]
    ZeroCount(usize),
    #[error("repeat count too large at offset {0}")]
    CountOverflow(usize),
    #[error("format is {0} bytes long, not a whole number of registers")]
    OddLength(usize),
    #[error("format spans more than {MAX_REGISTERS} registers")]
    TooLong,
}

/// Parses `[byte-order-tag] ([count] code)+`. Without a tag the format is
/// big-endian.
pub fn parse_format(src: &str) -> Result<Format, FormatError> {
    let mut chars = src.char_indices().peekable();
    let order = match chars.peek().and_then(|&(_, c)| ByteOrder::from_tag(c)) {
        Some(order) => {
            chars.next();
            order
        }
        None => ByteOrder::Big,
    };

    let max_bytes = MAX_REGISTERS * 2;
    let mut atoms = Vec::new();
    let mut byte_len = 0;
    while let Some(&(start, _)) = chars.peek() {
        let mut count: Option<usize> = None;
        while let Some(&(_, c)) = chars.peek() {
            let Some(digit) = c.to_digit(10) else {
                break;
            };
            chars.next();
            count = count
                .unwrap_or(0)
                .checked_mul(10)
                .and_then(|n| n.checked_add(digit as usize))
                .map(Some)
                .ok_or(FormatError::CountOverflow(start))?;
        }
        if count == Some(0) {
            return Err(FormatError::ZeroCount(start));
        }

        let (offset, code) = chars.next().ok_or(FormatError::UnknownCode('\0', src.len()))?;
        let (code, repeat) = match code {
            's' => (TypeCode::Text(count.unwrap_or(1)), 1),
            code => (
                TypeCode::from_code(code).ok_or(FormatError::UnknownCode(code, offset))?,
                count.unwrap_or(1),
            ),
        };
        byte_len = code
            .size()
            .checked_mul(repeat)
            .and_then(|n| n.checked_add(byte_len))
            .filter(|&n| n <= max_bytes)
            .ok_or(FormatError::TooLong)?;
        atoms.extend(std::iter::repeat(FormatAtom { order, code }).take(repeat));
    }

    if atoms.is_empty() {
        return Err(FormatError::Empty);
    }
    let format = Format { atoms };
    match format.byte_len() {
        len if len % 2 != 0 => Err(FormatError::OddLength(len)),
        _ => Ok(format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_format_is_big_endian() {
        let format = parse_format("i").unwrap();
        assert_eq!(format.order(), ByteOrder::Big);
        assert_eq!(format.atoms()[0].code, TypeCode::I32);
        assert_eq!(format.byte_len(), 4);
    }

    #[test]
    fn leading_tag_sets_order_of_every_atom() {
        let format = parse_format("<Hf").unwrap();
        assert_eq!(format.atoms().len(), 2);
        assert!(format.atoms().iter().all(|a| a.order == ByteOrder::Little));
    }

    #[test]
    fn repeat_count_expands_numeric_codes() {
        let format = parse_format("!3H").unwrap();
        assert_eq!(format.atoms().len(), 3);
        assert_eq!(format.byte_len(), 6);
    }

    #[test]
    fn count_before_s_is_string_length() {
        let format = parse_format("10s").unwrap();
        assert_eq!(format.atoms(), &[FormatAtom {
            order: ByteOrder::Big,
            code: TypeCode::Text(10)
        }]);
    }

    #[test]
    fn rejects_odd_length_and_unknown_codes() {
        assert_eq!(parse_format("B"), Err(FormatError::OddLength(1)));
        assert_eq!(parse_format("!z"), Err(FormatError::UnknownCode('z', 1)));
        assert_eq!(parse_format("!"), Err(FormatError::Empty));
        assert_eq!(parse_format("0H"), Err(FormatError::ZeroCount(0)));
        assert!(parse_format("2").is_err());
    }

    #[test]
    fn rejects_formats_longer_than_one_request() {
        assert_eq!(parse_format("131072s"), Err(FormatError::TooLong));
        assert_eq!(parse_format("126H"), Err(FormatError::TooLong));
        assert_eq!(parse_format("100000000000H"), Err(FormatError::TooLong));
        assert_eq!(parse_format("125H").unwrap().byte_len(), 250);
        assert_eq!(parse_format("124H2s").unwrap().byte_len(), 250);
    }

    #[test]
    fn pad_bytes_take_space_without_values() {
        let format = parse_format(">xBH").unwrap();
        assert_eq!(format.byte_len(), 4);
        assert_eq!(format.value_count(), 2);
        assert!(!format.atoms()[0].has_value());
    }

    #[test]
    fn single_bytes_pair_into_a_register() {
        let format = parse_format("bB").unwrap();
        assert_eq!(format.byte_len(), 2);
    }
}
