mod format;
mod parser;

pub use format::{parse_format, ByteOrder, Format, FormatAtom, FormatError, TypeCode};
pub use parser::{parse_access, parse_accesses, AccessError};

use std::fmt;
use tokio_modbus::Address;

/// The four addressable Modbus tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl RegisterKind {
    pub fn from_tag(tag: char) -> Option<Self> {
        match tag.to_ascii_lowercase() {
            'c' => Some(RegisterKind::Coil),
            'd' => Some(RegisterKind::DiscreteInput),
            'h' => Some(RegisterKind::HoldingRegister),
            'i' => Some(RegisterKind::InputRegister),
            _ => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::HoldingRegister)
    }

    /// Coils and discrete inputs carry one bit per address.
    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::DiscreteInput)
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegisterKind::Coil => "coil",
            RegisterKind::DiscreteInput => "discrete input",
            RegisterKind::HoldingRegister => "holding register",
            RegisterKind::InputRegister => "input register",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// One requested access, created once from a command line token.
#[derive(Clone, Debug, PartialEq)]
pub struct RegisterDescriptor {
    pub kind: RegisterKind,
    pub direction: Direction,
    pub address: Address,
    pub format: Format,
    /// Register name if one was looked up, else the address.
    pub label: String,
    /// The access token this descriptor came from, for diagnostics.
    pub token: String,
    /// Unparsed write literal, present iff `direction` is `Write`.
    pub value: Option<String>,
}

impl RegisterDescriptor {
    /// Number of addresses the access spans: one per bit, or one per register word.
    pub fn size(&self) -> u16 {
        if self.kind.is_bit() {
            1
        } else {
            u16::try_from(self.format.byte_len() / 2).unwrap_or(u16::MAX)
        }
    }
}
