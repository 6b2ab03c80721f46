//! Controller-side table of worker processes and their channels.
//!
//! Each slot owns two pipes. The command pipe is written by the controller
//! and read by the worker; the reply pipe is the reverse. After a spawn the
//! controller keeps only its two ends and the worker only its two ends.
//! Because `fork` copies the whole descriptor table, a freshly spawned worker
//! also closes every other slot's controller-side ends; otherwise it would
//! keep a sibling's command pipe writable and that sibling would never see
//! end-of-stream once the controller lets go of it.

mod handle;

use std::fs::File;
use std::panic::{self, AssertUnwindSafe};

use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork, pipe};
use tracing::{info, warn};

pub use handle::{SlotState, WorkerHandle};

use crate::config::ArrayConfig;
use crate::error::{Error, Result};
use crate::retention::worker;

/// `ignore_sigpipe` makes writes to a pipe without readers fail with EPIPE
/// instead of terminating the writer.
///
/// # Errors
/// Returns the `sigaction` failure.
pub fn ignore_sigpipe() -> nix::Result<()> {
    // SAFETY: SIG_IGN installs no handler code.
    unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }.map(drop)
}

pub struct ChannelRegistry {
    cfg: ArrayConfig,
    slots: Vec<Option<WorkerHandle>>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new(cfg: ArrayConfig) -> Self {
        let slots = (0..cfg.total_disks()).map(|_| None).collect();
        Self { cfg, slots }
    }

    #[must_use]
    pub fn config(&self) -> &ArrayConfig {
        &self.cfg
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.slots.len() {
            return Err(Error::SlotOutOfRange {
                slot,
                slots: self.slots.len(),
            });
        }
        Ok(())
    }

    /// `state` reports the slot's worker lifecycle, `None` if never spawned.
    ///
    /// # Errors
    /// Returns `SlotOutOfRange` for an unknown slot.
    pub fn state(&self, slot: usize) -> Result<Option<SlotState>> {
        self.check_slot(slot)?;
        Ok(self.slots[slot].as_ref().map(WorkerHandle::state))
    }

    /// # Errors
    /// `SlotOutOfRange`, or `NotRunning` if the slot was never spawned or
    /// has been hung up.
    pub fn handle_mut(&mut self, slot: usize) -> Result<&mut WorkerHandle> {
        self.check_slot(slot)?;
        self.slots[slot]
            .as_mut()
            .ok_or(Error::NotRunning { slot })
    }

    /// `initialize` spawns the first worker for an empty slot.
    ///
    /// # Errors
    /// `SlotOutOfRange`, a lifecycle error if the slot is occupied, or the
    /// pipe/fork failure.
    pub fn initialize(&mut self, slot: usize) -> Result<()> {
        self.check_slot(slot)?;
        if self.slots[slot].is_some() {
            return Err(Error::Lifecycle {
                op: "initialize",
                slot,
                source: nix::Error::EEXIST,
            });
        }
        self.spawn(slot)
    }

    /// `restart` replaces a worker that is no longer running with a fresh one
    /// in the same slot. The old channel ends are closed first, so neither the
    /// controller nor the new worker keeps them.
    ///
    /// # Errors
    /// `SlotOutOfRange`, a lifecycle error if the slot still runs a worker,
    /// or the pipe/fork failure.
    pub fn restart(&mut self, slot: usize) -> Result<()> {
        self.check_slot(slot)?;
        if let Some(h) = &self.slots[slot] {
            if h.state == SlotState::Running {
                return Err(Error::Lifecycle {
                    op: "restart",
                    slot,
                    source: nix::Error::EBUSY,
                });
            }
        }
        self.slots[slot] = None;
        self.spawn(slot)
    }

    fn spawn(&mut self, slot: usize) -> Result<()> {
        ignore_sigpipe().map_err(Error::lifecycle("sigaction", slot))?;

        let (cmd_rx, cmd_tx) = pipe().map_err(Error::lifecycle("pipe", slot))?;
        let (reply_rx, reply_tx) = pipe().map_err(Error::lifecycle("pipe", slot))?;

        // SAFETY: the child touches only its own pipe ends, its freshly
        // allocated disk buffer and its checkpoint file, then exits without
        // returning into the caller.
        match unsafe { fork() }.map_err(Error::lifecycle("fork", slot))? {
            ForkResult::Child => {
                drop(cmd_tx);
                drop(reply_rx);
                self.close_controller_ends();
                let (from_controller, to_controller) = (File::from(cmd_rx), File::from(reply_tx));
                // Unwinding past here would resume the controller's code.
                let code = panic::catch_unwind(AssertUnwindSafe(|| {
                    worker::run(slot, &self.cfg, from_controller, to_controller)
                }))
                .unwrap_or(101);
                std::process::exit(code);
            }
            ForkResult::Parent { child } => {
                drop(cmd_rx);
                drop(reply_tx);
                info!(slot, pid = child.as_raw(), "worker spawned");
                self.slots[slot] = Some(WorkerHandle {
                    slot,
                    pid: child,
                    to_worker: File::from(cmd_tx),
                    from_worker: File::from(reply_rx),
                    state: SlotState::Running,
                });
                Ok(())
            }
        }
    }

    /// Drops every inherited controller-side end. Only ever runs in a child.
    fn close_controller_ends(&mut self) {
        for handle in &mut self.slots {
            *handle = None;
        }
    }

    /// `kill` delivers `sig` to the slot's worker and waits until it is gone.
    ///
    /// The channels stay in place: requests to the slot fail with a protocol
    /// error until it is restarted.
    ///
    /// # Errors
    /// `NotRunning` if the slot has no live worker, or the kill/wait failure.
    pub fn kill(&mut self, slot: usize, sig: Signal) -> Result<()> {
        let handle = self.handle_mut(slot)?;
        if handle.state != SlotState::Running {
            return Err(Error::NotRunning { slot });
        }
        signal::kill(handle.pid, sig).map_err(Error::lifecycle("kill", slot))?;
        let status = waitpid(handle.pid, None).map_err(Error::lifecycle("waitpid", slot));
        // The process is gone whether or not the wait succeeded.
        handle.state = SlotState::Failed;
        let status = status?;
        info!(slot, ?status, "worker terminated");
        Ok(())
    }

    /// `hang_up` closes the controller's ends of the slot and waits for the
    /// worker to notice end-of-stream and exit. Returns its exit code when it
    /// exited normally.
    ///
    /// # Errors
    /// `NotRunning` if nothing occupies the slot, or the wait failure.
    pub fn hang_up(&mut self, slot: usize) -> Result<Option<i32>> {
        self.check_slot(slot)?;
        let handle = self.slots[slot].take().ok_or(Error::NotRunning { slot })?;
        let WorkerHandle {
            pid,
            to_worker,
            from_worker,
            state,
            ..
        } = handle;
        drop(to_worker);
        drop(from_worker);
        if state != SlotState::Running {
            return Ok(None);
        }
        let status = waitpid(pid, None).map_err(Error::lifecycle("waitpid", slot))?;
        info!(slot, ?status, "worker hung up");
        Ok(exit_code(status))
    }

    /// `broadcast_exit` sends EXIT to every running worker. Failures are
    /// logged and skipped.
    pub fn broadcast_exit(&mut self) {
        for handle in self.slots.iter_mut().flatten() {
            if handle.state != SlotState::Running {
                warn!(slot = handle.slot, state = ?handle.state, "no worker to send EXIT to");
                continue;
            }
            if let Err(e) = handle.exit() {
                warn!(slot = handle.slot, "failed to send EXIT: {e}");
            }
        }
    }

    /// `reap_all` waits for every running worker in slot order. A worker that
    /// did not exit cleanly is logged and otherwise ignored.
    pub fn reap_all(&mut self) {
        for handle in self.slots.iter_mut().flatten() {
            if handle.state != SlotState::Running {
                continue;
            }
            match waitpid(handle.pid, None) {
                Ok(status) if exit_code(status) == Some(0) => {}
                Ok(status) => warn!(slot = handle.slot, ?status, "worker exited uncleanly"),
                Err(e) => warn!(slot = handle.slot, "waitpid failed: {e}"),
            }
            handle.state = SlotState::Exited;
        }
    }

    /// `terminate_all` kills and reaps every running worker without letting
    /// it checkpoint.
    pub fn terminate_all(&mut self) {
        for handle in self.slots.iter_mut().flatten() {
            if handle.state != SlotState::Running {
                continue;
            }
            if let Err(e) = signal::kill(handle.pid, Signal::SIGKILL) {
                warn!(slot = handle.slot, "kill failed: {e}");
            }
            if let Err(e) = waitpid(handle.pid, None) {
                warn!(slot = handle.slot, "waitpid failed: {e}");
            }
            handle.state = SlotState::Exited;
        }
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        self.terminate_all();
    }
}

fn exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn new_registry_has_one_empty_slot_per_disk() {
        let reg = ChannelRegistry::new(ArrayConfig::new(3, 64, 4));
        for slot in 0..4 {
            assert_eq!(reg.state(slot).unwrap(), None);
        }
        assert!(matches!(
            reg.state(4),
            Err(Error::SlotOutOfRange { slot: 4, slots: 4 })
        ));
    }

    #[test]
    fn empty_slots_are_not_running() {
        let mut reg = ChannelRegistry::new(ArrayConfig::new(2, 64, 4));
        assert!(matches!(
            reg.handle_mut(1),
            Err(Error::NotRunning { slot: 1 })
        ));
        assert!(matches!(
            reg.kill(0, Signal::SIGINT),
            Err(Error::NotRunning { slot: 0 })
        ));
        assert!(matches!(reg.hang_up(2), Err(Error::NotRunning { slot: 2 })));
    }

    #[test]
    fn unknown_slots_are_addressing_errors() {
        let mut reg = ChannelRegistry::new(ArrayConfig::new(2, 64, 4));
        assert!(reg.state(3).unwrap_err().is_addressing());
        assert!(reg.initialize(3).unwrap_err().is_addressing());
        assert!(reg.restart(9).unwrap_err().is_addressing());
    }

    #[test]
    fn exit_code_only_for_normal_exit() {
        let pid = Pid::from_raw(42);
        assert_eq!(exit_code(WaitStatus::Exited(pid, 1)), Some(1));
        assert_eq!(
            exit_code(WaitStatus::Signaled(pid, Signal::SIGINT, false)),
            None
        );
    }
}
