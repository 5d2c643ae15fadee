use tokio_modbus::{Address, Quantity, Result as ModbusResult};

use super::{Coil, Transport, Word};

/// One device transaction. Each register table maps to exactly one read
/// operation; only coils and holding registers have a write.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Request {
    ReadCoils { addr: Address, cnt: Quantity },
    ReadDiscreteInputs { addr: Address, cnt: Quantity },
    ReadHoldingRegisters { addr: Address, cnt: Quantity },
    ReadInputRegisters { addr: Address, cnt: Quantity },
    WriteSingleCoil { addr: Address, coil: Coil },
    WriteMultipleRegisters { addr: Address, words: Vec<Word> },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Response {
    Bits(Vec<Coil>),
    Words(Vec<Word>),
    Written,
}

impl Request {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Request::ReadCoils { .. } => "read_coils",
            Request::ReadDiscreteInputs { .. } => "read_discrete_inputs",
            Request::ReadHoldingRegisters { .. } => "read_holding_registers",
            Request::ReadInputRegisters { .. } => "read_input_registers",
            Request::WriteSingleCoil { .. } => "write_single_coil",
            Request::WriteMultipleRegisters { .. } => "write_multiple_registers",
        }
    }

    /// The protocol's per-request quantity limit, if this request exceeds it.
    /// Devices usually answer such requests with an exception.
    pub(crate) fn exceeded_limit(&self) -> Option<usize> {
        let (quantity, limit) = match self {
            Request::ReadCoils { cnt, .. } | Request::ReadDiscreteInputs { cnt, .. } => {
                (usize::from(*cnt), 2000)
            }
            Request::ReadHoldingRegisters { cnt, .. } | Request::ReadInputRegisters { cnt, .. } => {
                (usize::from(*cnt), 125)
            }
            Request::WriteMultipleRegisters { words, .. } => (words.len(), 123),
            Request::WriteSingleCoil { .. } => return None,
        };
        (quantity > limit).then_some(limit)
    }

    pub(crate) async fn execute<T: Transport>(&self, transport: &mut T) -> ModbusResult<Response> {
        let response = match *self {
            Request::ReadCoils { addr, cnt } => transport
                .read_coils(addr, cnt)
                .await?
                .map(|bits| Response::Bits(truncate(bits, cnt))),
            Request::ReadDiscreteInputs { addr, cnt } => transport
                .read_discrete_inputs(addr, cnt)
                .await?
                .map(|bits| Response::Bits(truncate(bits, cnt))),
            Request::ReadHoldingRegisters { addr, cnt } => transport
                .read_holding_registers(addr, cnt)
                .await?
                .map(Response::Words),
            Request::ReadInputRegisters { addr, cnt } => transport
                .read_input_registers(addr, cnt)
                .await?
                .map(Response::Words),
            Request::WriteSingleCoil { addr, coil } => transport
                .write_single_coil(addr, coil)
                .await?
                .map(|()| Response::Written),
            Request::WriteMultipleRegisters { addr, ref words } => transport
                .write_multiple_registers(addr, words)
                .await?
                .map(|()| Response::Written),
        };
        Ok(response)
    }
}

/// Bit reads come back padded to a whole byte.
fn truncate(mut bits: Vec<Coil>, cnt: Quantity) -> Vec<Coil> {
    bits.truncate(cnt.into());
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_limits_follow_the_function_code() {
        let read = |cnt| Request::ReadHoldingRegisters { addr: 0, cnt };
        assert_eq!(read(125).exceeded_limit(), None);
        assert_eq!(read(126).exceeded_limit(), Some(125));
        let coils = Request::ReadCoils { addr: 0, cnt: 2001 };
        assert_eq!(coils.exceeded_limit(), Some(2000));
        let write = |n| Request::WriteMultipleRegisters {
            addr: 0,
            words: vec![0; n],
        };
        assert_eq!(write(123).exceeded_limit(), None);
        assert_eq!(write(124).exceeded_limit(), Some(123));
    }
}
