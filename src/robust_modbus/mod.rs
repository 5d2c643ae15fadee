mod reader;
mod registers;

pub(crate) use registers::{Request, Response};

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tokio_modbus::{prelude::*, Address, Quantity, Result as ModbusResult};
use tokio_retry::strategy::{jitter, FixedInterval};
use tokio_retry::Retry;
use tokio_serial::SerialStream;
use tracing::{debug, info, warn};

use crate::config::Endpoint;

pub(crate) type Coil = bool;
pub(crate) type Word = u16;

const DEFAULT_TCP_PORT: u16 = 502;

/// The six device operations the planner issues. Results keep tokio-modbus'
/// split between transport failures and exception responses.
pub(crate) trait Transport {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> ModbusResult<Vec<Coil>>;

    async fn read_discrete_inputs(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> ModbusResult<Vec<Coil>>;

    async fn read_holding_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> ModbusResult<Vec<Word>>;

    async fn read_input_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> ModbusResult<Vec<Word>>;

    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> ModbusResult<()>;

    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word])
        -> ModbusResult<()>;

    /// Closes the connection. Failures are logged, never returned.
    async fn disconnect(&mut self) {}
}

/// A connected client with a per-transaction timeout. Connecting is retried;
/// transactions are not.
#[derive(Debug)]
pub struct RobustContext {
    ctx: client::Context,
    timeout: Duration,
}

impl RobustContext {
    pub async fn connect(endpoint: &Endpoint, slave: Slave, timeout: Duration) -> io::Result<Self> {
        let ctx = match endpoint {
            Endpoint::Tcp { host } => {
                let socket_address = resolve(host)?;
                info!(%socket_address, ?slave, "connecting modbus tcp");
                let action = || tcp::connect_slave(socket_address, slave);
                Retry::spawn(Self::retry_strategy_connect(), action).await?
            }
            Endpoint::Serial {
                path,
                baud,
                parity,
                stop_bits,
            } => {
                info!(%path, baud = *baud, ?slave, "opening modbus rtu");
                let builder = tokio_serial::new(path, *baud)
                    .parity((*parity).into())
                    .stop_bits(*stop_bits)
                    .data_bits(tokio_serial::DataBits::Eight);
                let builder = &builder;
                let action = move || async move {
                    SerialStream::open(builder).map_err(|e| {
                        warn!("could not open serial port: {e}");
                        io::Error::from(e)
                    })
                };
                let port = Retry::spawn(Self::retry_strategy_connect(), action).await?;
                rtu::attach_slave(port, slave)
            }
        };
        debug!("modbus connected");
        Ok(Self { ctx, timeout })
    }

    fn retry_strategy_connect() -> impl Iterator<Item = Duration> {
        FixedInterval::from_millis(100).map(jitter).take(3)
    }
}

fn resolve(host: &str) -> io::Result<SocketAddr> {
    let mut addrs = match host.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => host.to_socket_addrs()?,
        _ => (
            host.trim_start_matches('[').trim_end_matches(']'),
            DEFAULT_TCP_PORT,
        )
            .to_socket_addrs()?,
    };
    addrs.next().ok_or(io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        "cannot resolve hostname",
    ))
}
