//! The array façade: logical block reads and writes with parity upkeep.

mod recovery;

use std::time::Instant;

use tracing::{debug, error, info};

use crate::config::{ArrayConfig, ParityMode};
use crate::error::Result;
use crate::layout::address::{Geometry, Location};
use crate::layout::block::Block;
use crate::metrics::{self, ArrayOp, MemberOp, Transfer};
use crate::protocol;
use crate::registry::{ChannelRegistry, SlotState};

/// StorageArray stripes logical blocks over N data workers and keeps the
/// XOR of every stripe on the parity worker in slot N.
///
/// Calls are strictly sequential and the array does no locking of its own;
/// callers sharing it must serialize access.
pub struct StorageArray {
    geometry: Geometry,
    parity_mode: ParityMode,
    registry: ChannelRegistry,
}

impl StorageArray {
    /// `init_all` validates `cfg` and spawns one worker per slot, parity last.
    /// If any spawn fails the workers already started are killed and reaped.
    ///
    /// # Errors
    /// Config errors, or the lifecycle error of the slot that failed.
    pub fn init_all(cfg: ArrayConfig) -> Result<Self> {
        cfg.validate()?;
        let geometry = Geometry::from_config(&cfg);
        let parity_mode = cfg.parity_mode();
        let mut registry = ChannelRegistry::new(cfg);
        for slot in 0..geometry.slots() {
            if let Err(e) = registry.initialize(slot) {
                error!(slot, "array initialization failed: {e}");
                registry.terminate_all();
                return Err(e);
            }
        }
        info!(
            data_disks = geometry.data_disks,
            block_size = geometry.block_size,
            blocks = geometry.capacity_blocks(),
            "array online"
        );
        Ok(Self {
            geometry,
            parity_mode,
            registry,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ArrayConfig {
        self.registry.config()
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.geometry.block_size
    }

    #[must_use]
    pub const fn capacity_blocks(&self) -> usize {
        self.geometry.capacity_blocks()
    }

    /// # Errors
    /// `SlotOutOfRange` for an unknown slot.
    pub fn slot_state(&self, slot: usize) -> Result<Option<SlotState>> {
        self.registry.state(slot)
    }

    #[must_use]
    pub fn status(&self) -> Vec<Option<SlotState>> {
        (0..self.geometry.slots())
            .map(|slot| self.registry.state(slot).ok().flatten())
            .collect()
    }

    /// `read_block` copies logical block `logical_block` into `out`.
    ///
    /// # Errors
    /// Addressing errors before any I/O; protocol errors if the owning
    /// worker does not answer in full.
    pub fn read_block(&mut self, logical_block: i64, out: &mut [u8]) -> Result<()> {
        self.geometry.check_len(out.len())?;
        let loc = self.geometry.locate(logical_block)?;
        let started = Instant::now();
        let result = self.member_read(loc.disk, loc.stripe, out);
        record_array(logical_block, Transfer::Read, None, started, result.is_err());
        result
    }

    /// `read_logical` is [`Self::read_block`] returning an owned block.
    ///
    /// # Errors
    /// See [`Self::read_block`].
    pub fn read_logical(&mut self, logical_block: i64) -> Result<Block> {
        let mut block = Block::zero(self.geometry.block_size);
        self.read_block(logical_block, block.as_bytes_mut())?;
        Ok(block)
    }

    /// `write_block` stores `data` at `logical_block` and refreshes the
    /// stripe's parity.
    ///
    /// # Errors
    /// Addressing errors before any I/O; protocol errors from any worker
    /// touched along the way. A failure after the data write leaves parity
    /// stale for that stripe.
    pub fn write_block(&mut self, logical_block: i64, data: &[u8]) -> Result<()> {
        self.geometry.check_len(data.len())?;
        let loc = self.geometry.locate(logical_block)?;
        let started = Instant::now();
        let result = match self.parity_mode {
            ParityMode::Recompute => self.write_recompute(loc, data),
            ParityMode::ReadModifyWrite => self.write_read_modify(loc, data),
        };
        record_array(
            logical_block,
            Transfer::Write,
            Some(self.parity_mode),
            started,
            result.is_err(),
        );
        result
    }

    /// # Errors
    /// See [`Self::write_block`].
    pub fn write_logical(&mut self, logical_block: i64, block: &Block) -> Result<()> {
        self.write_block(logical_block, block.as_bytes())
    }

    /// `read_member` reads a raw block from any slot, parity included.
    ///
    /// # Errors
    /// Slot or stripe addressing errors; protocol errors from the worker.
    pub fn read_member(&mut self, slot: usize, stripe: i64) -> Result<Block> {
        let slot = self.geometry.check_slot(slot)?;
        let stripe = self.geometry.check_stripe(stripe)?;
        let mut block = Block::zero(self.geometry.block_size);
        self.member_read(slot, stripe, block.as_bytes_mut())?;
        Ok(block)
    }

    /// New parity is the new payload XOR every other data block in the stripe.
    fn write_recompute(&mut self, loc: Location, data: &[u8]) -> Result<()> {
        self.member_write(loc.disk, loc.stripe, data)?;

        let mut parity = Block::from_bytes(data);
        let mut sibling = Block::zero(self.geometry.block_size);
        for disk in (0..self.geometry.data_disks).filter(|&d| d != loc.disk) {
            self.member_read(disk, loc.stripe, sibling.as_bytes_mut())?;
            parity ^= &sibling;
        }

        let target = self.geometry.parity_location(loc.stripe);
        debug!(stripe = loc.stripe, "parity recomputed from full stripe");
        self.member_write(target.disk, target.stripe, parity.as_bytes())
    }

    /// New parity is old parity XOR old data XOR new data.
    fn write_read_modify(&mut self, loc: Location, data: &[u8]) -> Result<()> {
        let target = self.geometry.parity_location(loc.stripe);
        let mut old = Block::zero(self.geometry.block_size);
        let mut parity = Block::zero(self.geometry.block_size);
        self.member_read(loc.disk, loc.stripe, old.as_bytes_mut())?;
        self.member_read(target.disk, target.stripe, parity.as_bytes_mut())?;

        self.member_write(loc.disk, loc.stripe, data)?;

        parity ^= &old;
        parity ^= data;
        debug!(stripe = loc.stripe, "parity folded from delta");
        self.member_write(target.disk, target.stripe, parity.as_bytes())
    }

    fn member_read(&mut self, slot: usize, stripe: usize, out: &mut [u8]) -> Result<()> {
        let wire = protocol::wire_stripe(stripe)?;
        let started = Instant::now();
        let result = self
            .registry
            .handle_mut(slot)
            .and_then(|h| h.read(wire, out));
        record_member(slot, stripe, Transfer::Read, started, result.is_err());
        result
    }

    fn member_write(&mut self, slot: usize, stripe: usize, data: &[u8]) -> Result<()> {
        let wire = protocol::wire_stripe(stripe)?;
        let started = Instant::now();
        let result = self
            .registry
            .handle_mut(slot)
            .and_then(|h| h.write(wire, data));
        record_member(slot, stripe, Transfer::Write, started, result.is_err());
        result
    }

    /// `shutdown` sends EXIT to every worker, then waits for each of them in
    /// slot order. Workers checkpoint their disks on the way out.
    pub fn shutdown(mut self) {
        info!("array shutting down");
        self.registry.broadcast_exit();
        self.registry.reap_all();
    }
}

fn record_member(slot: usize, stripe: usize, transfer: Transfer, started: Instant, failed: bool) {
    if !metrics::is_enabled() {
        return;
    }
    metrics::record_member(&MemberOp {
        slot,
        stripe,
        transfer,
        latency: started.elapsed(),
        failed,
    });
}

fn record_array(
    logical_block: i64,
    transfer: Transfer,
    parity: Option<ParityMode>,
    started: Instant,
    failed: bool,
) {
    if !metrics::is_enabled() {
        return;
    }
    metrics::record_array(&ArrayOp {
        logical_block,
        transfer,
        parity,
        latency: started.elapsed(),
        failed,
    });
}
