use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::{parse_format, Direction, Format, FormatError, RegisterDescriptor, RegisterKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("skipping {token:?}: {reason}")]
    Malformed { token: String, reason: String },
    #[error("{token:?}: invalid register type {kind:?}")]
    InvalidKind { token: String, kind: char },
    #[error("{token:?}: cannot write to a {kind}")]
    ReadOnly { token: String, kind: RegisterKind },
    #[error("{token:?}: a write takes exactly one value, format has {atoms}")]
    MultiValueWrite { token: String, atoms: usize },
}

impl AccessError {
    /// Malformed tokens are dropped; everything else aborts the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AccessError::Malformed { .. })
    }
}

/// Structured form of `[kind ['@']] [address] ['/' format]`, before validation.
#[derive(Debug, PartialEq)]
pub struct Definition<'a> {
    pub kind: Option<char>,
    pub address: Option<u16>,
    pub format: Option<&'a str>,
}

#[derive(Debug, Error, PartialEq)]
enum SyntaxError {
    #[error("unexpected {0:?} at offset {1}")]
    Unexpected(char, usize),
    #[error("address out of range at offset {0}")]
    AddressRange(usize),
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.src[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn kind(&mut self) -> Option<char> {
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() => {
                self.bump();
                self.eat('@');
                Some(c)
            }
            _ => None,
        }
    }

    fn address(&mut self) -> Result<Option<u16>, SyntaxError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if start == self.pos {
            return Ok(None);
        }
        self.src[start..self.pos]
            .parse()
            .map(Some)
            .map_err(|_| SyntaxError::AddressRange(start))
    }

    fn format(&mut self) -> Result<Option<&'a str>, SyntaxError> {
        if !self.eat('/') {
            return match self.peek() {
                Some(c) => Err(SyntaxError::Unexpected(c, self.pos)),
                None => Ok(None),
            };
        }
        let rest = &self.src[self.pos..];
        self.pos = self.src.len();
        Ok(Some(rest))
    }
}

/// Matches a register definition against the access grammar. Only syntax is
/// checked here; kind and format validity are left to the caller.
pub fn parse_definition(src: &str) -> Result<Definition<'_>, String> {
    let mut cursor = Cursor { src, pos: 0 };
    // A lone letter followed by a non-digit that is not '@' or '/' cannot be a kind.
    if let (Some(first), Some(second)) = (cursor.peek(), cursor.peek_second()) {
        if first.is_ascii_alphabetic() && !(second.is_ascii_digit() || second == '@' || second == '/')
        {
            return Err(SyntaxError::Unexpected(second, first.len_utf8()).to_string());
        }
    }
    let kind = cursor.kind();
    let address = cursor.address().map_err(|e| e.to_string())?;
    let format = cursor.format().map_err(|e| e.to_string())?;
    Ok(Definition {
        kind,
        address,
        format,
    })
}

/// Splits `definition=literal`. An `=` right after the format slash is the
/// native byte order tag, not the value separator.
fn split_write(token: &str) -> Option<(&str, &str)> {
    token
        .match_indices('=')
        .map(|(i, _)| i)
        .find(|&i| !token[..i].ends_with('/'))
        .map(|i| (&token[..i], &token[i + 1..]))
}

/// Turns one access token into a descriptor, resolving names through `names`.
pub fn parse_access(
    token: &str,
    names: &HashMap<String, String>,
) -> Result<RegisterDescriptor, AccessError> {
    let malformed = |reason: String| AccessError::Malformed {
        token: token.to_string(),
        reason,
    };

    let (name, value) = match split_write(token) {
        Some((name, value)) => (name, Some(value.to_string())),
        None => (token, None),
    };
    let direction = match value {
        Some(_) => Direction::Write,
        None => Direction::Read,
    };
    let named = names.get(name);
    let source = match named {
        Some(definition) => {
            debug!(name, %definition, "resolved register name");
            definition.as_str()
        }
        None => name,
    };

    let definition = parse_definition(source).map_err(malformed)?;
    let address = definition
        .address
        .ok_or_else(|| malformed("missing register address".to_string()))?;

    let kind = match definition.kind {
        None => RegisterKind::HoldingRegister,
        Some(tag) => RegisterKind::from_tag(tag).ok_or(AccessError::InvalidKind {
            token: token.to_string(),
            kind: tag,
        })?,
    };
    if direction == Direction::Write && !kind.is_writable() {
        return Err(AccessError::ReadOnly {
            token: token.to_string(),
            kind,
        });
    }

    let format = if kind.is_bit() {
        Format::bit()
    } else {
        match definition.format {
            Some(src) => parse_format(src).map_err(|e: FormatError| malformed(e.to_string()))?,
            None => Format::default(),
        }
    };
    if direction == Direction::Write && format.atoms().len() != 1 {
        // Pad bytes count here too: a write only takes a bare value.
        return Err(AccessError::MultiValueWrite {
            token: token.to_string(),
            atoms: format.atoms().len(),
        });
    }

    Ok(RegisterDescriptor {
        kind,
        direction,
        address,
        format,
        label: match named {
            Some(_) => name.to_string(),
            None => address.to_string(),
        },
        token: token.to_string(),
        value,
    })
}

/// Parses every token, dropping malformed ones with a warning. Stops at the
/// first fatal error.
pub fn parse_accesses<'a, I>(
    tokens: I,
    names: &HashMap<String, String>,
) -> Result<Vec<RegisterDescriptor>, AccessError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut descriptors = Vec::new();
    for token in tokens {
        match parse_access(token, names) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("{e}"),
        }
    }
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{ByteOrder, TypeCode};

    fn parse(token: &str) -> Result<RegisterDescriptor, AccessError> {
        parse_access(token, &HashMap::new())
    }

    #[test]
    fn bare_address_defaults_to_holding_u16_read() {
        let d = parse("100").unwrap();
        assert_eq!(d.kind, RegisterKind::HoldingRegister);
        assert_eq!(d.address, 100);
        assert_eq!(d.format, Format::default());
        assert_eq!(d.direction, Direction::Read);
        assert_eq!(d.label, "100");
        assert_eq!(d.value, None);
    }

    #[test]
    fn coil_write_without_at_sign() {
        let d = parse("c5=1").unwrap();
        assert_eq!(d.kind, RegisterKind::Coil);
        assert_eq!(d.address, 5);
        assert_eq!(d.direction, Direction::Write);
        assert_eq!(d.value.as_deref(), Some("1"));
    }

    #[test]
    fn signed_32_bit_holding_write() {
        let d = parse("h10/!i=-4").unwrap();
        assert_eq!(d.kind, RegisterKind::HoldingRegister);
        assert_eq!(d.address, 10);
        assert_eq!(d.format.atoms().len(), 1);
        assert_eq!(d.format.atoms()[0].code, TypeCode::I32);
        assert_eq!(d.format.order(), ByteOrder::Big);
        assert_eq!(d.value.as_deref(), Some("-4"));
        assert_eq!(d.size(), 2);
    }

    #[test]
    fn kind_is_case_insensitive_and_at_is_optional() {
        assert_eq!(parse("I@7").unwrap().kind, RegisterKind::InputRegister);
        assert_eq!(parse("d7").unwrap().kind, RegisterKind::DiscreteInput);
    }

    #[test]
    fn missing_address_is_skipped_not_fatal() {
        let err = parse("h@/!H").unwrap_err();
        assert!(matches!(err, AccessError::Malformed { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn unknown_kind_is_fatal() {
        let err = parse("x5").unwrap_err();
        assert_eq!(
            err,
            AccessError::InvalidKind {
                token: "x5".into(),
                kind: 'x'
            }
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn writes_to_read_only_tables_are_fatal() {
        assert!(matches!(
            parse("i3=1"),
            Err(AccessError::ReadOnly { .. })
        ));
        assert!(matches!(
            parse("d3=1"),
            Err(AccessError::ReadOnly { .. })
        ));
    }

    #[test]
    fn write_with_several_atoms_is_fatal() {
        assert!(matches!(
            parse("h3/HH=1"),
            Err(AccessError::MultiValueWrite { atoms: 2, .. })
        ));
    }

    #[test]
    fn garbage_and_bad_formats_are_skipped() {
        for token in ["foo", "12x", "h5/z", "h5/B", "99999"] {
            let err = parse(token).unwrap_err();
            assert!(!err.is_fatal(), "{token} should be skipped, got {err}");
        }
    }

    #[test]
    fn names_resolve_but_keep_their_label() {
        let names = HashMap::from([("power".to_string(), "i@30/<f".to_string())]);
        let d = parse_access("power", &names).unwrap();
        assert_eq!(d.kind, RegisterKind::InputRegister);
        assert_eq!(d.address, 30);
        assert_eq!(d.format.order(), ByteOrder::Little);
        assert_eq!(d.label, "power");
        assert_eq!(d.token, "power");
    }

    #[test]
    fn native_order_tag_is_not_a_write() {
        let d = parse("h5/=H").unwrap();
        assert_eq!(d.direction, Direction::Read);
        let d = parse("h5/=H=3").unwrap();
        assert_eq!(d.label, "5");
        assert_eq!(d.token, "h5/=H=3");
        assert_eq!(d.value.as_deref(), Some("3"));
    }

    #[test]
    fn unnamed_accesses_are_labelled_by_address() {
        for token in ["h10/!i", "c10=1", "i@10/<f", "10"] {
            assert_eq!(parse(token).unwrap().label, "10", "{token}");
        }
    }

    #[test]
    fn oversized_format_is_skipped() {
        let err = parse("h0/131072s").unwrap_err();
        assert!(!err.is_fatal());
        let descriptors = parse_accesses(["h0/131072s", "h0"], &HashMap::new()).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].size(), 1);
    }

    #[test]
    fn bit_kinds_ignore_format() {
        let d = parse("c9/!i").unwrap();
        assert_eq!(d.format, Format::bit());
        assert_eq!(d.size(), 1);
    }

    #[test]
    fn batch_keeps_valid_tokens_around_a_malformed_one() {
        let descriptors =
            parse_accesses(["100", "h@/!H", "101"], &HashMap::new()).unwrap();
        let addresses: Vec<_> = descriptors.iter().map(|d| d.address).collect();
        assert_eq!(addresses, vec![100, 101]);
    }

    #[test]
    fn batch_stops_at_fatal_token() {
        let err = parse_accesses(["100", "x5", "101"], &HashMap::new()).unwrap_err();
        assert!(err.is_fatal());
    }
}
