//! Error taxonomy shared by the controller and the worker processes.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::Field;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A fixed-size field moved fewer bytes than its width before the
    /// channel reached end-of-stream.
    #[error("short transfer on {field}: expected {expected} bytes, moved {actual}")]
    ShortTransfer {
        field: Field,
        expected: usize,
        actual: usize,
    },

    #[error("channel failure on {field}: {source}")]
    Channel {
        field: Field,
        #[source]
        source: io::Error,
    },

    #[error("unknown command tag {0}")]
    UnknownCommand(i32),

    #[error("logical block {block} out of range (array holds {capacity} blocks)")]
    BlockOutOfRange { block: i64, capacity: i64 },

    #[error("stripe {stripe} out of range (disk holds {stripes} stripes)")]
    StripeOutOfRange { stripe: i64, stripes: i64 },

    #[error("slot {slot} out of range (array has {slots} slots)")]
    SlotOutOfRange { slot: usize, slots: usize },

    #[error("buffer of {actual} bytes does not match block size {expected}")]
    BlockLength { expected: usize, actual: usize },

    #[error("cannot allocate {bytes} bytes for {what}")]
    Allocation { what: &'static str, bytes: usize },

    #[error("{op} failed for slot {slot}: {source}")]
    Lifecycle {
        op: &'static str,
        slot: usize,
        #[source]
        source: nix::Error,
    },

    #[error("slot {slot} has no running worker")]
    NotRunning { slot: usize },

    /// Restarting a worker failed; the array cannot be trusted any more.
    #[error("restart of slot {slot} failed, array is unrecoverable")]
    Fatal {
        slot: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("checkpoint {}: {source}", .path.display())]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Rejected before any I/O was attempted.
    #[must_use]
    pub const fn is_addressing(&self) -> bool {
        matches!(
            self,
            Self::BlockOutOfRange { .. }
                | Self::StripeOutOfRange { .. }
                | Self::SlotOutOfRange { .. }
                | Self::BlockLength { .. }
        )
    }

    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::ShortTransfer { .. } | Self::Channel { .. } | Self::UnknownCommand(_)
        )
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    pub(crate) fn lifecycle(op: &'static str, slot: usize) -> impl FnOnce(nix::Error) -> Self {
        move |source| Self::Lifecycle { op, slot, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_partition_the_taxonomy() {
        let addressing = Error::BlockOutOfRange {
            block: 12,
            capacity: 12,
        };
        assert!(addressing.is_addressing());
        assert!(!addressing.is_protocol());

        let short = Error::ShortTransfer {
            field: Field::Block,
            expected: 4,
            actual: 1,
        };
        assert!(short.is_protocol());
        assert!(!short.is_fatal());

        let fatal = Error::Fatal {
            slot: 2,
            source: Box::new(Error::Lifecycle {
                op: "fork",
                slot: 2,
                source: nix::Error::EAGAIN,
            }),
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_addressing());
    }

    #[test]
    fn short_transfer_message_names_field_and_sizes() {
        let err = Error::ShortTransfer {
            field: Field::Stripe,
            expected: 4,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "short transfer on stripe index: expected 4 bytes, moved 2"
        );
    }
}
