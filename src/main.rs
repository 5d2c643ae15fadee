mod access;
mod batch;
mod codec;
mod config;
mod exec;
mod names;
mod plan;
mod robust_modbus;

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::process::ExitCode;
use tokio_modbus::prelude::Slave;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::config::Cli;
use crate::names::NameTable;
use crate::robust_modbus::RobustContext;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut names = NameTable::default();
    for path in &cli.registers {
        names.load(path)?;
    }

    let endpoint = &cli.endpoint();
    let cli = &cli;
    let connect = move || async move {
        RobustContext::connect(endpoint, Slave(cli.slave_id), cli.timeout)
            .await
            .with_context(|| format!("connecting to {}", cli.device))
    };
    exec::run_accesses(
        &cli.accesses,
        names.definitions(),
        connect,
        &mut io::stdout(),
        cli.silent,
    )
    .await
}
