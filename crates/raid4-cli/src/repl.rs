//! Line-oriented command loop driving a running array.
//!
//! ```text
//! wr <block> <text>   write text to a logical block (zero padded, at most one block)
//! rd <block>          read a logical block
//! parity <stripe>     read the parity block of a stripe
//! kill <disk>         crash a disk's worker process
//! restore <disk>      restart a crashed disk with empty storage
//! status              show every slot's worker state
//! exit                checkpoint all disks and quit
//! ```

use std::io::{BufRead, Write};

use anyhow::{Context, Result, bail};
use raid4_rs::{Error, StorageArray};
use tracing::warn;

#[derive(Debug, Eq, PartialEq)]
pub enum Op {
    Write { block: i64, text: String },
    Read { block: i64 },
    Parity { stripe: i64 },
    Kill { disk: usize },
    Restore { disk: usize },
    Status,
    Exit,
}

/// `parse_line` turns one input line into an operation; blank lines and
/// `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Op>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim_start();
    let op = match word {
        "wr" => {
            let (block, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            Op::Write {
                block: block.parse().with_context(|| format!("bad block number {block:?}"))?,
                text: text.to_string(),
            }
        }
        "rd" => Op::Read {
            block: rest.parse().with_context(|| format!("bad block number {rest:?}"))?,
        },
        "parity" => Op::Parity {
            stripe: rest.parse().with_context(|| format!("bad stripe {rest:?}"))?,
        },
        "kill" => Op::Kill {
            disk: rest.parse().with_context(|| format!("bad disk {rest:?}"))?,
        },
        "restore" => Op::Restore {
            disk: rest.parse().with_context(|| format!("bad disk {rest:?}"))?,
        },
        "status" => Op::Status,
        "exit" | "quit" => Op::Exit,
        other => bail!("unknown command {other:?}"),
    };
    Ok(Some(op))
}

/// `padded` zero-fills `text` to a full block. Text longer than a block is
/// rejected rather than cut.
fn padded(text: &str, block_size: usize) -> raid4_rs::Result<Vec<u8>> {
    if text.len() > block_size {
        return Err(Error::BlockLength {
            expected: block_size,
            actual: text.len(),
        });
    }
    let mut buf = text.as_bytes().to_vec();
    buf.resize(block_size, 0);
    Ok(buf)
}

fn printable(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    bytes[..end].escape_ascii().to_string()
}

/// `run` executes commands until `exit` or end of input. Per-command
/// failures are reported and skipped; a failed restore ends the loop with
/// an error.
pub fn run(array: &mut StorageArray, input: impl BufRead, mut out: impl Write) -> Result<()> {
    for line in input.lines() {
        let line = line.context("failed to read command")?;
        let op = match parse_line(&line) {
            Ok(Some(op)) => op,
            Ok(None) => continue,
            Err(e) => {
                writeln!(out, "error: {e:#}")?;
                continue;
            }
        };
        if op == Op::Exit {
            break;
        }
        match execute(array, op, &mut out) {
            Ok(()) => {}
            Err(e @ Error::Fatal { .. }) => return Err(e).context("array is unrecoverable"),
            Err(e) => {
                warn!("command failed: {e}");
                writeln!(out, "error: {e}")?;
            }
        }
    }
    Ok(())
}

fn execute(array: &mut StorageArray, op: Op, out: &mut impl Write) -> raid4_rs::Result<()> {
    // Output failures are not array failures.
    match op {
        Op::Write { block, text } => {
            array.write_block(block, &padded(&text, array.block_size())?)?;
            let _ = writeln!(out, "wrote block {block}");
        }
        Op::Read { block } => {
            let data = array.read_logical(block)?;
            let _ = writeln!(out, "block {block}: {}", printable(data.as_bytes()));
        }
        Op::Parity { stripe } => {
            let slot = array.geometry().parity_slot();
            let data = array.read_member(slot, stripe)?;
            let _ = writeln!(out, "parity {stripe}: {}", printable(data.as_bytes()));
        }
        Op::Kill { disk } => {
            array.simulate_failure(disk)?;
            let _ = writeln!(out, "disk {disk} failed");
        }
        Op::Restore { disk } => {
            array.restore(disk)?;
            let _ = writeln!(out, "disk {disk} restored");
        }
        Op::Status => {
            for (slot, state) in array.status().into_iter().enumerate() {
                let state = state.map_or_else(|| "DETACHED".to_string(), |s| format!("{s:?}"));
                let _ = writeln!(out, "disk {slot}: {state}");
            }
        }
        Op::Exit => {}
    }
    Ok(())
}
