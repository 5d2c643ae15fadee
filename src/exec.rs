use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use tokio_modbus::Exception;
use tracing::{debug, info, warn};

use crate::access;
use crate::batch::{self, AccessGroup};
use crate::codec::{self, Value};
use crate::plan::{self, Transaction};
use crate::robust_modbus::{Response, Transport};

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Values(Vec<Value>),
    Written,
    InvalidAddress,
    InvalidFunction,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub label: String,
    pub outcome: Outcome,
}

impl Report {
    /// The output line for this access; successful writes print nothing.
    pub fn render(&self, silent: bool) -> Option<String> {
        let text = match &self.outcome {
            Outcome::Written => return None,
            Outcome::InvalidAddress => "invalid address".to_string(),
            Outcome::InvalidFunction => "invalid function".to_string(),
            Outcome::Values(values) => {
                let mut text = values
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                if let ([value], false) = (values.as_slice(), silent) {
                    if let Some(hex) = value.hex() {
                        text = format!("{text} {hex}");
                    }
                }
                text
            }
        };
        Some(if silent {
            text
        } else {
            format!("{}: {text}", self.label)
        })
    }
}

fn uniform(group: &AccessGroup, outcome: Outcome) -> Vec<Report> {
    group
        .labels()
        .map(|label| Report {
            label: label.to_string(),
            outcome: outcome.clone(),
        })
        .collect()
}

fn split_values(group: &AccessGroup, response: Response) -> Result<Vec<Report>> {
    let values = match response {
        Response::Written => return Ok(uniform(group, Outcome::Written)),
        Response::Bits(bits) => codec::decode_bits(&bits),
        Response::Words(words) => codec::decode(&words, &group.atoms())?,
    };

    let mut values = values.into_iter();
    group
        .members()
        .iter()
        .map(|member| {
            let count = if member.kind.is_bit() {
                1
            } else {
                member.format.value_count()
            };
            let taken: Vec<Value> = values.by_ref().take(count).collect();
            if taken.len() != count {
                return Err(anyhow!("short response for {}", member.label));
            }
            Ok(Report {
                label: member.label.clone(),
                outcome: Outcome::Values(taken),
            })
        })
        .collect()
}

/// Runs one transaction. Illegal address and illegal function exceptions
/// become per-access sentinels; every other failure is returned.
pub async fn execute_one<T: Transport>(
    transaction: &Transaction,
    transport: &mut T,
) -> Result<Vec<Report>> {
    let Transaction { group, request } = transaction;
    debug!(
        ?request,
        labels = ?group.labels().collect::<Vec<_>>(),
        addresses = ?group.addresses().collect::<Vec<_>>(),
        "executing"
    );
    let context = || format!("{} at address {}", request.name(), group.start_address);

    match request.execute(transport).await.with_context(context)? {
        Ok(response) => {
            if response == Response::Written {
                info!(
                    addr = group.start_address,
                    cnt = group.register_count,
                    "{} succeeded",
                    request.name()
                );
            }
            split_values(group, response).with_context(context)
        }
        Err(Exception::IllegalDataAddress) => Ok(uniform(group, Outcome::InvalidAddress)),
        Err(Exception::IllegalFunction) => Ok(uniform(group, Outcome::InvalidFunction)),
        Err(code) => bail!("{}: device exception {code:?}", context()),
    }
}

/// Runs transactions in order, printing each access as its group completes.
pub async fn execute<T: Transport, W: Write>(
    transactions: &[Transaction],
    transport: &mut T,
    out: &mut W,
    silent: bool,
) -> Result<()> {
    for transaction in transactions {
        for report in execute_one(transaction, transport).await? {
            if let Some(line) = report.render(silent) {
                writeln!(out, "{line}")?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

/// Parses, batches and plans `tokens`, then runs them on the transport that
/// `connect` opens. Nothing connects unless at least one transaction is left
/// once malformed tokens are dropped.
pub async fn run_accesses<T, F, Fut, W>(
    tokens: &[String],
    names: &HashMap<String, String>,
    connect: F,
    out: &mut W,
    silent: bool,
) -> Result<()>
where
    T: Transport,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
    W: Write,
{
    let descriptors = access::parse_accesses(tokens.iter().map(String::as_str), names)?;
    let transactions = plan::plan(batch::group(descriptors))?;
    debug!(transactions = transactions.len(), "planned");
    if transactions.is_empty() {
        warn!("no valid register accesses given");
        return Ok(());
    }

    let mut transport = connect().await?;
    let result = execute(&transactions, &mut transport, out, silent).await;
    transport.disconnect().await;
    result
}
