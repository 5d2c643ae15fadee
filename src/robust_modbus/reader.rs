use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::time;
use tokio_modbus::{prelude::*, Address, Error as ModbusError, Quantity, Result as ModbusResult};
use tracing::{trace, warn};

use super::{Coil, RobustContext, Transport, Word};

async fn timed<T>(
    timeout: Duration,
    request: impl Future<Output = ModbusResult<T>>,
) -> ModbusResult<T> {
    match time::timeout(timeout, request).await {
        Ok(res) => res,
        Err(_) => Err(ModbusError::Transport(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no response within {timeout:?}"),
        ))),
    }
}

impl Transport for RobustContext {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> ModbusResult<Vec<Coil>> {
        trace!(addr, cnt, "read coils");
        timed(self.timeout, self.ctx.read_coils(addr, cnt)).await
    }

    async fn read_discrete_inputs(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> ModbusResult<Vec<Coil>> {
        trace!(addr, cnt, "read discrete inputs");
        timed(self.timeout, self.ctx.read_discrete_inputs(addr, cnt)).await
    }

    async fn read_holding_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> ModbusResult<Vec<Word>> {
        trace!(addr, cnt, "read holding registers");
        timed(self.timeout, self.ctx.read_holding_registers(addr, cnt)).await
    }

    async fn read_input_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> ModbusResult<Vec<Word>> {
        trace!(addr, cnt, "read input registers");
        timed(self.timeout, self.ctx.read_input_registers(addr, cnt)).await
    }

    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> ModbusResult<()> {
        trace!(addr, coil, "write single coil");
        timed(self.timeout, self.ctx.write_single_coil(addr, coil)).await
    }

    async fn write_multiple_registers(
        &mut self,
        addr: Address,
        words: &[Word],
    ) -> ModbusResult<()> {
        trace!(addr, ?words, "write multiple registers");
        timed(self.timeout, self.ctx.write_multiple_registers(addr, words)).await
    }

    async fn disconnect(&mut self) {
        match self.ctx.disconnect().await {
            Ok(Ok(())) => trace!("modbus disconnected"),
            Ok(Err(exception)) => warn!("modbus disconnect failed: {exception}"),
            Err(e) => warn!("modbus disconnect failed: {e}"),
        }
    }
}
