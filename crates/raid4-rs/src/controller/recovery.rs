//! Failure injection and in-place worker restarts.
//!
//! A restarted worker starts from a zeroed disk. Nothing is rebuilt from
//! parity, so the stripes it held stay inconsistent until rewritten.

use nix::sys::signal::Signal;
use tracing::{error, info};

use super::StorageArray;
use crate::error::{Error, Result};
use crate::registry::SlotState;

impl StorageArray {
    /// `simulate_failure` crashes the worker in `slot` and waits for it to
    /// terminate. Requests to the slot fail until it is restored.
    ///
    /// Sends SIGKILL; SIGINT may be inherited as ignored from the shell.
    ///
    /// # Errors
    /// `SlotOutOfRange`, `NotRunning` if the slot is already down, or the
    /// kill/wait failure.
    pub fn simulate_failure(&mut self, slot: usize) -> Result<()> {
        let slot = self.geometry.check_slot(slot)?;
        info!(slot, "simulate: killing disk");
        self.registry.kill(slot, Signal::SIGKILL)
    }

    /// `restore` starts a fresh, zeroed worker in `slot`.
    ///
    /// # Errors
    /// `SlotOutOfRange` or a lifecycle error if the slot still runs a worker.
    /// Any failure of the restart itself is returned as `Error::Fatal`: the
    /// array is no longer usable and the caller should stop.
    pub fn restore(&mut self, slot: usize) -> Result<()> {
        let slot = self.geometry.check_slot(slot)?;
        if self.registry.state(slot)? == Some(SlotState::Running) {
            return Err(Error::Lifecycle {
                op: "restore",
                slot,
                source: nix::Error::EBUSY,
            });
        }
        self.registry.restart(slot).map_err(|e| {
            error!(slot, "failed to restore disk process: {e}");
            Error::Fatal {
                slot,
                source: Box::new(e),
            }
        })?;
        info!(slot, "disk restored with empty storage");
        Ok(())
    }

    /// `disconnect` closes the controller's channels to `slot` and waits for
    /// the worker to exit on end-of-stream. Returns its exit code.
    ///
    /// This only returns once no other process holds the slot's command pipe
    /// open, so a descriptor leaked into a sibling shows up as a hang.
    ///
    /// # Errors
    /// `SlotOutOfRange`, `NotRunning`, or the wait failure.
    pub fn disconnect(&mut self, slot: usize) -> Result<Option<i32>> {
        let slot = self.geometry.check_slot(slot)?;
        info!(slot, "disconnecting disk");
        self.registry.hang_up(slot)
    }
}
