//! Fixed-width wire grammar spoken between the controller and its workers.
//!
//! Every field has a width known to both sides ahead of time, so frames carry
//! no length prefix, version or checksum:
//!
//! - READ: `Command::Read`, stripe index. Reply: one block.
//! - WRITE: `Command::Write`, stripe index, one block. No reply.
//! - EXIT: `Command::Exit`. No reply.
//!
//! Integers are native-endian `i32`. Both sides must agree on the block size
//! before the first exchange.


use std::fmt;
use std::io::{ErrorKind, Read, Write};

use crate::error::{Error, Result};

pub const COMMAND_WIDTH: usize = size_of::<i32>();
pub const STRIPE_WIDTH: usize = size_of::<i32>();

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum Command {
    Read = 0,
    Write = 1,
    Exit = 2,
}

impl Command {
    #[must_use]
    pub const fn tag(self) -> i32 {
        self as i32
    }

    /// # Errors
    /// Returns `UnknownCommand` for any tag outside the grammar.
    pub fn from_tag(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(Self::Read),
            1 => Ok(Self::Write),
            2 => Ok(Self::Exit),
            other => Err(Error::UnknownCommand(other)),
        }
    }
}

/// Field names the piece of a frame a transfer was moving.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Field {
    Command,
    Stripe,
    Block,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Command => "command",
            Self::Stripe => "stripe index",
            Self::Block => "block payload",
        })
    }
}

/// Request is one controller-to-worker frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Request<'a> {
    Read { stripe: i32 },
    Write { stripe: i32, payload: &'a [u8] },
    Exit,
}

impl Request<'_> {
    #[must_use]
    pub const fn command(&self) -> Command {
        match self {
            Self::Read { .. } => Command::Read,
            Self::Write { .. } => Command::Write,
            Self::Exit => Command::Exit,
        }
    }

    /// `send` writes the frame field by field.
    ///
    /// # Errors
    /// Returns a protocol error if any field is not transferred in full.
    pub fn send<W: Write>(&self, w: &mut W) -> Result<()> {
        send_exact(w, &self.command().tag().to_ne_bytes(), Field::Command)?;
        match self {
            Self::Read { stripe } => send_exact(w, &stripe.to_ne_bytes(), Field::Stripe)?,
            Self::Write { stripe, payload } => {
                send_exact(w, &stripe.to_ne_bytes(), Field::Stripe)?;
                send_exact(w, payload, Field::Block)?;
            }
            Self::Exit => {}
        }
        w.flush().map_err(|source| Error::Channel {
            field: Field::Command,
            source,
        })
    }
}

/// `send_exact` writes all of `bytes` or reports how far it got.
///
/// # Errors
/// `ShortTransfer` if the channel stops accepting bytes, `Channel` if the
/// write fails outright (for example a closed pipe).
pub fn send_exact<W: Write>(w: &mut W, bytes: &[u8], field: Field) -> Result<()> {
    let mut sent = 0;
    while sent < bytes.len() {
        match w.write(&bytes[sent..]) {
            Ok(0) => {
                return Err(Error::ShortTransfer {
                    field,
                    expected: bytes.len(),
                    actual: sent,
                });
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(source) => return Err(Error::Channel { field, source }),
        }
    }
    Ok(())
}

/// `recv_exact` fills `buf` completely, retrying partial reads.
///
/// # Errors
/// `ShortTransfer` if end-of-stream arrives before `buf` is full, `Channel`
/// if the read fails.
pub fn recv_exact<R: Read>(r: &mut R, buf: &mut [u8], field: Field) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(Error::ShortTransfer {
                    field,
                    expected: buf.len(),
                    actual: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(source) => return Err(Error::Channel { field, source }),
        }
    }
    Ok(())
}

/// # Errors
/// Protocol error on a short read or an unrecognized tag.
pub fn recv_command<R: Read>(r: &mut R) -> Result<Command> {
    let mut raw = [0u8; COMMAND_WIDTH];
    recv_exact(r, &mut raw, Field::Command)?;
    Command::from_tag(i32::from_ne_bytes(raw))
}

/// # Errors
/// Protocol error on a short read.
pub fn recv_stripe<R: Read>(r: &mut R) -> Result<i32> {
    let mut raw = [0u8; STRIPE_WIDTH];
    recv_exact(r, &mut raw, Field::Stripe)?;
    Ok(i32::from_ne_bytes(raw))
}

/// # Errors
/// Protocol error on a short read.
pub fn recv_block<R: Read>(r: &mut R, out: &mut [u8]) -> Result<()> {
    recv_exact(r, out, Field::Block)
}

/// # Errors
/// Protocol error on a short or failed write.
pub fn send_block<W: Write>(w: &mut W, block: &[u8]) -> Result<()> {
    send_exact(w, block, Field::Block)?;
    w.flush().map_err(|source| Error::Channel {
        field: Field::Block,
        source,
    })
}

/// `wire_stripe` narrows a stripe index to the wire's field width.
///
/// # Errors
/// Returns `StripeOutOfRange` if the index does not fit.
pub fn wire_stripe(stripe: usize) -> Result<i32> {
    i32::try_from(stripe).map_err(|_| Error::StripeOutOfRange {
        stripe: i64::try_from(stripe).unwrap_or(i64::MAX),
        stripes: i64::from(i32::MAX),
    })
}
