//! Geometry helpers for mapping logical blocks to (disk, stripe) pairs.


use crate::config::ArrayConfig;
use crate::error::{Error, Result};

/// Geometry describes how logical blocks are spread over the data disks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Geometry {
    pub data_disks: usize,
    pub block_size: usize,
    pub blocks_per_disk: usize,
}

/// Location names one block on one member of the array.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Location {
    pub disk: usize,
    pub stripe: usize,
}

impl Geometry {
    #[must_use]
    pub const fn from_config(cfg: &ArrayConfig) -> Self {
        Self {
            data_disks: cfg.data_disks(),
            block_size: cfg.block_size(),
            blocks_per_disk: cfg.blocks_per_disk(),
        }
    }

    /// Parity always lives on the slot after the last data disk.
    #[must_use]
    pub const fn parity_slot(&self) -> usize {
        self.data_disks
    }

    #[must_use]
    pub const fn slots(&self) -> usize {
        self.data_disks + 1
    }

    #[must_use]
    pub const fn capacity_blocks(&self) -> usize {
        self.blocks_per_disk.saturating_mul(self.data_disks)
    }

    /// `locate` maps a logical block to the data disk and stripe holding it.
    ///
    /// # Errors
    /// Returns `BlockOutOfRange` for negative blocks and blocks at or past
    /// the logical capacity.
    pub fn locate(&self, logical_block: i64) -> Result<Location> {
        let capacity = i64::try_from(self.capacity_blocks()).unwrap_or(i64::MAX);
        let out_of_range = || Error::BlockOutOfRange {
            block: logical_block,
            capacity,
        };
        if logical_block < 0 || logical_block >= capacity {
            return Err(out_of_range());
        }
        let block = usize::try_from(logical_block).map_err(|_| out_of_range())?;
        Ok(Location {
            disk: block % self.data_disks,
            stripe: block / self.data_disks,
        })
    }

    /// `parity_location` returns where the parity block for `stripe` lives.
    #[must_use]
    pub const fn parity_location(&self, stripe: usize) -> Location {
        Location {
            disk: self.parity_slot(),
            stripe,
        }
    }

    /// # Errors
    /// Returns `StripeOutOfRange` when `stripe` is not on the disk.
    pub fn check_stripe(&self, stripe: i64) -> Result<usize> {
        let stripes = i64::try_from(self.blocks_per_disk).unwrap_or(i64::MAX);
        if stripe < 0 || stripe >= stripes {
            return Err(Error::StripeOutOfRange { stripe, stripes });
        }
        usize::try_from(stripe).map_err(|_| Error::StripeOutOfRange { stripe, stripes })
    }

    /// # Errors
    /// Returns `SlotOutOfRange` when `slot` is neither a data nor the parity slot.
    pub fn check_slot(&self, slot: usize) -> Result<usize> {
        if slot >= self.slots() {
            return Err(Error::SlotOutOfRange {
                slot,
                slots: self.slots(),
            });
        }
        Ok(slot)
    }

    /// # Errors
    /// Returns `BlockLength` when `len` differs from the block size.
    pub fn check_len(&self, len: usize) -> Result<()> {
        if len != self.block_size {
            return Err(Error::BlockLength {
                expected: self.block_size,
                actual: len,
            });
        }
        Ok(())
    }
}

/// `stripe_byte_offset` converts a stripe index into a byte offset on a
/// disk, or `None` if the offset does not fit in `usize`.
#[must_use]
pub const fn stripe_byte_offset(stripe: usize, block_size: usize) -> Option<usize> {
    stripe.checked_mul(block_size)
}
