use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Read and write Modbus registers and coils.
///
/// Each access is `[kind[@]]address[/format][=value]` or a name from a
/// registers file. Kinds are c (coil), d (discrete input), h (holding
/// register, the default) and i (input register). Formats use struct-pack
/// codes with an optional byte order tag, e.g. `h10/<f` or `i@3/!2H`.
/// `x` skips a byte; half floats (`e`) are not supported.
#[derive(Parser, Debug)]
#[command(name = "modbus", version)]
pub struct Cli {
    /// Serial port path (RTU) or host[:port] (TCP)
    #[arg(env = "MODBUS_DEVICE")]
    pub device: String,

    /// Register accesses to perform
    #[arg(required = true)]
    pub accesses: Vec<String>,

    /// File of `name definition` lines, may be repeated
    #[arg(
        short,
        long,
        env = "MODBUS_REGISTERS",
        value_delimiter = ':'
    )]
    pub registers: Vec<PathBuf>,

    /// Slave (unit) id
    #[arg(short, long, env = "MODBUS_SLAVE_ID", default_value_t = 1)]
    pub slave_id: u8,

    /// Serial baud rate
    #[arg(short, long, env = "MODBUS_BAUD", default_value_t = 19200)]
    pub baud: u32,

    /// Serial stop bits
    #[arg(short = 'p', long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub stop_bits: u8,

    /// Serial parity
    #[arg(short = 'P', long, value_enum, default_value_t = Parity::None)]
    pub parity: Parity,

    /// Seconds to wait for each response
    #[arg(short, long, env = "MODBUS_TIMEOUT", default_value = "5", value_parser = parse_timeout)]
    pub timeout: Duration,

    /// Print values only, without labels or hex
    #[arg(short = 'S', long)]
    pub silent: bool,

    /// Log connection and transaction details
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Where the device lives.
#[derive(Clone, Debug, PartialEq)]
pub enum Endpoint {
    Tcp {
        host: String,
    },
    Serial {
        path: String,
        baud: u32,
        parity: Parity,
        stop_bits: tokio_serial::StopBits,
    },
}

impl Cli {
    pub fn endpoint(&self) -> Endpoint {
        if is_serial_port(&self.device) {
            Endpoint::Serial {
                path: self.device.clone(),
                baud: self.baud,
                parity: self.parity,
                stop_bits: match self.stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                },
            }
        } else {
            Endpoint::Tcp {
                host: self.device.clone(),
            }
        }
    }

    /// `RUST_LOG` wins; otherwise warnings, or more with `-v`.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("{value} is not a finite, non-negative number of seconds"))
}

fn is_serial_port(device: &str) -> bool {
    device.starts_with("/dev/")
        || device
            .to_ascii_uppercase()
            .strip_prefix("COM")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        || Path::new(device).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("modbus").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn serial_device_uses_line_settings() {
        let cli = cli(&["/dev/ttyUSB0", "-b", "9600", "-P", "even", "-p", "2", "100"]);
        assert_eq!(
            cli.endpoint(),
            Endpoint::Serial {
                path: "/dev/ttyUSB0".into(),
                baud: 9600,
                parity: Parity::Even,
                stop_bits: tokio_serial::StopBits::Two,
            }
        );
    }

    #[test]
    fn host_is_tcp() {
        let cli = cli(&["192.168.1.10:1502", "c5=1", "h10"]);
        assert_eq!(
            cli.endpoint(),
            Endpoint::Tcp {
                host: "192.168.1.10:1502".into()
            }
        );
        assert_eq!(cli.accesses, vec!["c5=1", "h10"]);
        assert_eq!(cli.slave_id, 1);
    }

    #[test]
    fn verbosity_raises_log_level() {
        assert_eq!(cli(&["host", "1"]).log_filter(), "warn");
        assert_eq!(cli(&["-vv", "host", "1"]).log_filter(), "debug");
    }

    #[test]
    fn timeout_is_fractional_seconds() {
        assert_eq!(cli(&["-t", "0.5", "host", "1"]).timeout, Duration::from_millis(500));
        assert_eq!(cli(&["host", "1"]).timeout, Duration::from_secs(5));
    }

    #[test]
    fn negative_or_nan_timeout_is_rejected() {
        for timeout in ["--timeout=-1", "--timeout=nan", "--timeout=inf", "--timeout=soon"] {
            let parsed = Cli::try_parse_from(["modbus", timeout, "host", "1"]);
            assert!(parsed.is_err(), "{timeout} was accepted");
        }
    }

    #[test]
    fn windows_port_names_are_serial() {
        assert!(is_serial_port("COM3"));
        assert!(!is_serial_port("computer.local"));
    }
}
