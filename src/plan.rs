//! Turns access groups into device requests, encoding every write up front so
//! a bad literal stops the run before anything reaches the device.

use thiserror::Error;
use tracing::warn;

use crate::access::{Direction, RegisterKind};
use crate::batch::AccessGroup;
use crate::codec::{self, CodecError, LiteralError};
use crate::robust_modbus::Request;

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("{token:?}: {source}")]
    Literal {
        token: String,
        #[source]
        source: LiteralError,
    },
    #[error("internal error encoding {token:?}: {source}")]
    Codec {
        token: String,
        #[source]
        source: CodecError,
    },
    #[error("writing several coils at once is not supported: {labels}")]
    MultiCoilWrite { labels: String },
}

#[derive(Debug)]
pub struct Transaction {
    pub group: AccessGroup,
    pub request: Request,
}

pub fn plan(groups: Vec<AccessGroup>) -> Result<Vec<Transaction>, PlanError> {
    groups
        .into_iter()
        .map(|group| {
            let request = request_for(&group)?;
            Ok(Transaction { group, request })
        })
        .collect()
}

fn request_for(group: &AccessGroup) -> Result<Request, PlanError> {
    let addr = group.start_address;
    let cnt = group.register_count;
    let request = match (group.kind, group.direction) {
        (RegisterKind::Coil, Direction::Read) => Request::ReadCoils { addr, cnt },
        (RegisterKind::DiscreteInput, Direction::Read) => Request::ReadDiscreteInputs { addr, cnt },
        (RegisterKind::HoldingRegister, Direction::Read) => {
            Request::ReadHoldingRegisters { addr, cnt }
        }
        (RegisterKind::InputRegister, Direction::Read) => Request::ReadInputRegisters { addr, cnt },
        (RegisterKind::Coil, Direction::Write) => {
            let [member] = group.members() else {
                return Err(PlanError::MultiCoilWrite {
                    labels: group.labels().collect::<Vec<_>>().join(", "),
                });
            };
            let literal = member.value.as_deref().unwrap_or_default();
            let coil = codec::parse_coil(literal).map_err(|source| PlanError::Literal {
                token: member.token.clone(),
                source,
            })?;
            Request::WriteSingleCoil { addr, coil }
        }
        (RegisterKind::HoldingRegister, Direction::Write) => {
            let mut words = Vec::with_capacity(cnt.into());
            for (member, literal) in group.members().iter().zip(group.values()) {
                let literal = literal.unwrap_or_default();
                for atom in member.format.atoms() {
                    words.extend(codec::encode(atom, literal).map_err(|e| match e {
                        CodecError::Literal(source) => PlanError::Literal {
                            token: member.token.clone(),
                            source,
                        },
                        source => PlanError::Codec {
                            token: member.token.clone(),
                            source,
                        },
                    })?);
                }
            }
            Request::WriteMultipleRegisters { addr, words }
        }
        (kind, Direction::Write) => unreachable!("{kind} writes are rejected when parsing"),
    };
    if let Some(limit) = request.exceeded_limit() {
        warn!(
            addr,
            cnt,
            limit,
            labels = ?group.labels().collect::<Vec<_>>(),
            "{} is larger than one Modbus request allows",
            request.name()
        );
    }
    Ok(request)
}
