//! Array geometry and behavior settings shared by the controller and workers.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// How the controller refreshes the parity block after a data write.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ParityMode {
    /// Re-read every other data disk in the stripe and XOR them with the new
    /// payload. Costs N-1 reads per write.
    #[default]
    Recompute,
    /// Read the old data block and the old parity block and fold the change
    /// into parity. Costs two reads per write regardless of N.
    ReadModifyWrite,
}

/// `ArrayConfig` is fixed for the lifetime of an array and must be identical
/// in the controller and every worker it spawns.
#[derive(Clone, Debug)]
pub struct ArrayConfig {
    data_disks: usize,
    disk_size: usize,
    block_size: usize,
    checkpoint_dir: PathBuf,
    parity_mode: ParityMode,
}

impl ArrayConfig {
    #[must_use]
    pub fn new(data_disks: usize, disk_size: usize, block_size: usize) -> Self {
        Self {
            data_disks,
            disk_size,
            block_size,
            checkpoint_dir: PathBuf::from("."),
            parity_mode: ParityMode::default(),
        }
    }

    /// `from_total_disks` builds a config from the data-plus-parity disk count.
    ///
    /// # Errors
    /// Returns a config error when fewer than two disks are requested.
    pub fn from_total_disks(total_disks: usize, disk_size: usize, block_size: usize) -> Result<Self> {
        if total_disks < 2 {
            return Err(Error::Config(format!(
                "need at least one data disk and one parity disk, got {total_disks} disks"
            )));
        }
        Ok(Self::new(total_disks - 1, disk_size, block_size))
    }

    #[must_use]
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn with_parity_mode(mut self, mode: ParityMode) -> Self {
        self.parity_mode = mode;
        self
    }

    /// # Errors
    /// Returns a config error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.data_disks == 0 {
            return Err(Error::Config("array needs at least one data disk".into()));
        }
        if self.block_size == 0 {
            return Err(Error::Config("block size must be non-zero".into()));
        }
        if self.block_size > self.disk_size {
            return Err(Error::Config(format!(
                "block size {} exceeds disk size {}",
                self.block_size, self.disk_size
            )));
        }
        // Stripe indices travel as 32-bit signed integers.
        if i32::try_from(self.blocks_per_disk()).is_err() {
            return Err(Error::Config(format!(
                "{} stripes per disk do not fit the wire stripe field",
                self.blocks_per_disk()
            )));
        }
        if i64::try_from(self.capacity_blocks()).is_err() {
            return Err(Error::Config("logical capacity overflows".into()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn data_disks(&self) -> usize {
        self.data_disks
    }

    #[must_use]
    pub const fn total_disks(&self) -> usize {
        self.data_disks + 1
    }

    #[must_use]
    pub const fn parity_slot(&self) -> usize {
        self.data_disks
    }

    #[must_use]
    pub const fn disk_size(&self) -> usize {
        self.disk_size
    }

    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    #[must_use]
    pub const fn blocks_per_disk(&self) -> usize {
        if self.block_size == 0 {
            0
        } else {
            self.disk_size / self.block_size
        }
    }

    #[must_use]
    pub const fn capacity_blocks(&self) -> usize {
        self.blocks_per_disk().saturating_mul(self.data_disks)
    }

    #[must_use]
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    #[must_use]
    pub const fn parity_mode(&self) -> ParityMode {
        self.parity_mode
    }
}
