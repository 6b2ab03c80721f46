//! End-to-end tests against real forked worker processes.
//!
//! Every test holds `FORK_LOCK` for its whole lifetime: a worker forked by
//! one test would otherwise inherit the pipes of another test's array.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;
use rand::{Rng, RngCore};
use raid4_rs::layout::block::{Block, parity_of};
use raid4_rs::retention::checkpoint::Checkpoint;
use raid4_rs::{ArrayConfig, Error, ParityMode, SlotState, StorageArray};
use tempfile::TempDir;

static FORK_LOCK: Mutex<()> = Mutex::new(());

struct Rig {
    array: StorageArray,
    dir: TempDir,
    _serial: MutexGuard<'static, ()>,
}

fn rig(data_disks: usize, disk_size: usize, block_size: usize, mode: ParityMode) -> Rig {
    let serial = FORK_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let dir = tempfile::tempdir().expect("tmp dir");
    let cfg = ArrayConfig::new(data_disks, disk_size, block_size)
        .with_checkpoint_dir(dir.path())
        .with_parity_mode(mode);
    let array = StorageArray::init_all(cfg).expect("init_all");
    Rig {
        array,
        dir,
        _serial: serial,
    }
}

/// Runs `f` on a helper thread and fails the test if it does not finish.
fn within<T: Send + 'static>(secs: u64, f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(Duration::from_secs(secs)) {
        Ok(v) => v,
        Err(RecvTimeoutError::Timeout) => {
            panic!("operation hung; a channel end leaked into another process")
        }
        Err(RecvTimeoutError::Disconnected) => panic!("helper thread panicked"),
    }
}

fn assert_parity_holds(array: &mut StorageArray) {
    let geom = array.geometry();
    for stripe in 0..geom.blocks_per_disk {
        let members: Vec<Block> = (0..geom.data_disks)
            .map(|d| array.read_member(d, stripe as i64).expect("data member"))
            .collect();
        let expected = parity_of(geom.block_size, members.iter().map(Block::as_bytes));
        let parity = array
            .read_member(geom.parity_slot(), stripe as i64)
            .expect("parity member");
        assert_eq!(parity, expected, "parity mismatch at stripe {stripe}");
    }
}

#[test]
fn fresh_array_reads_zeroes_and_reports_running() {
    let mut rig = rig(2, 32, 8, ParityMode::Recompute);
    assert_eq!(rig.array.capacity_blocks(), 8);
    assert_eq!(rig.array.status(), vec![Some(SlotState::Running); 3]);
    for b in 0..8 {
        assert_eq!(rig.array.read_logical(b).unwrap(), Block::zero(8));
    }
    rig.array.shutdown();
}

#[test]
fn round_trip_random_payloads() {
    let mut rig = rig(3, 256, 16, ParityMode::Recompute);
    let capacity = rig.array.capacity_blocks() as i64;
    let mut rng = rand::rng();
    let mut written = vec![vec![0u8; 16]; capacity as usize];

    for _ in 0..64 {
        let b = rng.random_range(0..capacity);
        rng.fill_bytes(&mut written[b as usize]);
        rig.array.write_block(b, &written[b as usize]).expect("write");

        let mut back = [0u8; 16];
        rig.array.read_block(b, &mut back).expect("read");
        assert_eq!(&back[..], &written[b as usize][..]);
    }
    for b in 0..capacity {
        let block = rig.array.read_logical(b).expect("read");
        assert_eq!(block.as_bytes(), &written[b as usize][..], "block {b}");
    }
    rig.array.shutdown();
}

#[test]
fn parity_invariant_holds_for_both_modes() {
    for mode in [ParityMode::Recompute, ParityMode::ReadModifyWrite] {
        let mut rig = rig(4, 128, 8, mode);
        let capacity = rig.array.capacity_blocks() as i64;
        let mut rng = rand::rng();
        for _ in 0..100 {
            let mut payload = [0u8; 8];
            rng.fill_bytes(&mut payload);
            let b = rng.random_range(0..capacity);
            rig.array.write_block(b, &payload).expect("write");
        }
        assert_parity_holds(&mut rig.array);
        rig.array.shutdown();
    }
}

#[test]
fn single_data_disk_parity_mirrors_data() {
    let mut rig = rig(1, 16, 4, ParityMode::Recompute);
    rig.array.write_block(2, b"solo").unwrap();
    assert_eq!(rig.array.read_member(1, 2).unwrap().as_bytes(), b"solo");
    rig.array.shutdown();
}

#[test]
fn killed_and_restored_disk_comes_back_empty() {
    let mut rig = rig(3, 64, 4, ParityMode::Recompute);
    rig.array.write_block(0, b"AAAA").unwrap();
    rig.array.write_block(1, b"BBBB").unwrap();
    rig.array.write_block(2, b"CCCC").unwrap();

    let parity = rig.array.read_member(3, 0).unwrap();
    let expected = parity_of(4, [&b"AAAA"[..], &b"BBBB"[..], &b"CCCC"[..]]);
    assert_eq!(parity, expected);

    rig.array.simulate_failure(1).unwrap();
    assert_eq!(rig.array.slot_state(1).unwrap(), Some(SlotState::Failed));
    rig.array.restore(1).unwrap();
    assert_eq!(rig.array.slot_state(1).unwrap(), Some(SlotState::Running));

    let b1 = rig.array.read_logical(1).expect("restored disk answers");
    assert_eq!(b1, Block::zero(4), "no residual data after restart");

    assert_eq!(rig.array.read_logical(0).unwrap().as_bytes(), b"AAAA");
    assert_eq!(rig.array.read_logical(2).unwrap().as_bytes(), b"CCCC");
    assert_eq!(
        rig.array.read_member(3, 0).unwrap(),
        expected,
        "restart does not touch parity"
    );

    rig.array.write_block(1, b"bbbb").unwrap();
    assert_eq!(rig.array.read_logical(1).unwrap().as_bytes(), b"bbbb");
    assert_parity_holds(&mut rig.array);
    rig.array.shutdown();
}

#[test]
fn requests_to_a_dead_disk_fail_instead_of_hanging() {
    let Rig {
        mut array,
        dir: _dir,
        _serial,
    } = rig(3, 64, 4, ParityMode::Recompute);
    array.simulate_failure(2).unwrap();

    let mut array = within(10, move || {
        let read = array.read_logical(2);
        assert!(read.unwrap_err().is_protocol(), "read from dead disk");

        // Parity recompute for stripe 0 has to read disk 2.
        let write = array.write_block(0, b"XXXX");
        assert!(write.unwrap_err().is_protocol(), "write needing dead sibling");

        // Reads served by live disks are unaffected.
        array.read_logical(3).expect("disk 0 alive");
        array
    });

    assert!(matches!(
        array.simulate_failure(2),
        Err(Error::NotRunning { slot: 2 })
    ));
    array.shutdown();
}

#[test]
fn addressing_errors_do_no_io() {
    let mut rig = rig(3, 64, 4, ParityMode::Recompute);
    for bad in [-1, 48, 1000] {
        let err = rig.array.write_block(bad, b"ZZZZ").unwrap_err();
        assert!(err.is_addressing(), "write {bad}: {err}");
        let mut out = [0u8; 4];
        let err = rig.array.read_block(bad, &mut out).unwrap_err();
        assert!(err.is_addressing(), "read {bad}: {err}");
    }
    assert!(rig.array.write_block(0, b"short").unwrap_err().is_addressing());
    assert!(rig.array.read_member(4, 0).unwrap_err().is_addressing());
    assert!(rig.array.read_member(0, 16).unwrap_err().is_addressing());
    assert!(rig.array.simulate_failure(4).unwrap_err().is_addressing());
    assert!(rig.array.restore(7).unwrap_err().is_addressing());

    for b in 0..48 {
        assert_eq!(rig.array.read_logical(b).unwrap(), Block::zero(4));
    }
    for stripe in 0..16 {
        assert_eq!(rig.array.read_member(3, stripe).unwrap(), Block::zero(4));
    }
    rig.array.shutdown();
}

#[test]
fn shutdown_checkpoints_every_disk() {
    let rig = rig(3, 64, 4, ParityMode::Recompute);
    let Rig {
        mut array,
        dir,
        _serial,
    } = rig;
    let blocks: [(i64, &[u8; 4]); 4] = [(0, b"AAAA"), (1, b"BBBB"), (2, b"CCCC"), (7, b"tail")];
    for (b, data) in blocks {
        array.write_block(b, data).unwrap();
    }
    array.shutdown();

    let ck: Vec<Checkpoint> = (0..4)
        .map(|i| Checkpoint::open_for(dir.path(), i).expect("checkpoint exists"))
        .collect();
    for c in &ck {
        assert_eq!(c.len(), 64, "{} is exactly disk_size", c.path().display());
    }
    assert_eq!(ck[0].block(0, 4), Some(&b"AAAA"[..]));
    assert_eq!(ck[1].block(0, 4), Some(&b"BBBB"[..]));
    assert_eq!(ck[2].block(0, 4), Some(&b"CCCC"[..]));
    assert_eq!(ck[1].block(2, 4), Some(&b"tail"[..]), "block 7 is disk 1 stripe 2");
    assert_eq!(
        ck[3].block(0, 4),
        Some(parity_of(4, [&b"AAAA"[..], &b"BBBB"[..], &b"CCCC"[..]]).as_bytes())
    );
    assert_eq!(ck[3].block(2, 4), Some(&b"tail"[..]));
    assert!(ck[0].as_bytes()[4..].iter().all(|&x| x == 0));
}

#[test]
fn shutdown_skips_failed_disk() {
    let rig = rig(2, 16, 4, ParityMode::Recompute);
    let Rig {
        mut array,
        dir,
        _serial,
    } = rig;
    array.simulate_failure(0).unwrap();
    within(10, move || array.shutdown());

    assert!(!dir.path().join("disk_0.dat").exists());
    assert!(dir.path().join("disk_1.dat").exists());
    assert!(dir.path().join("disk_2.dat").exists());
}

#[test]
fn dropping_a_live_array_kills_and_reaps_every_worker() {
    let rig = rig(3, 32, 4, ParityMode::Recompute);
    let Rig {
        mut array,
        dir,
        _serial,
    } = rig;
    array.write_block(0, b"AAAA").unwrap();
    array.simulate_failure(1).unwrap();
    within(10, move || drop(array));

    assert_eq!(
        waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)),
        Err(Errno::ECHILD),
        "no worker is left running or unreaped"
    );
    for slot in 0..4 {
        assert!(
            !dir.path().join(format!("disk_{slot}.dat")).exists(),
            "killed worker {slot} wrote no checkpoint"
        );
    }
}

#[test]
fn lifecycle_misuse_is_not_fatal() {
    let mut rig = rig(2, 16, 4, ParityMode::Recompute);
    let err = rig.array.restore(0).unwrap_err();
    assert!(matches!(err, Error::Lifecycle { op: "restore", slot: 0, .. }));
    assert!(!err.is_fatal());

    rig.array.simulate_failure(0).unwrap();
    assert!(matches!(
        rig.array.simulate_failure(0),
        Err(Error::NotRunning { slot: 0 })
    ));
    rig.array.restore(0).unwrap();
    rig.array.shutdown();
}

#[test]
fn siblings_do_not_hold_each_others_channels() {
    let rig = rig(3, 64, 4, ParityMode::Recompute);
    let Rig {
        array,
        dir: _dir,
        _serial,
    } = rig;

    // Slots 1..=3 were forked after slot 0 existed; slot 1 is forked again
    // after everything else. If any of them kept slot 0's command pipe open,
    // slot 0's worker would never see end-of-stream.
    let mut array = within(10, move || {
        let mut array = array;
        array.simulate_failure(1).unwrap();
        array.restore(1).unwrap();
        let code = array.disconnect(0).expect("disconnect");
        assert_eq!(code, Some(1), "worker exits with failure on end-of-stream");
        array
    });
    assert_eq!(array.slot_state(0).unwrap(), None);

    // The restarted worker must not hold the parity slot's pipe either.
    let mut array = within(10, move || {
        let code = array.disconnect(3).expect("disconnect parity");
        assert_eq!(code, Some(1));
        array
    });

    // A disconnected slot can be brought back.
    array.restore(0).unwrap();
    array.restore(3).unwrap();
    array.write_block(0, b"back").unwrap();
    assert_eq!(array.read_logical(0).unwrap().as_bytes(), b"back");
    assert_parity_holds(&mut array);
    array.shutdown();
}

#[test]
fn restarted_worker_survives_sibling_exit() {
    let rig = rig(2, 16, 4, ParityMode::Recompute);
    let Rig {
        mut array,
        dir: _dir,
        _serial,
    } = rig;
    array.simulate_failure(0).unwrap();
    array.restore(0).unwrap();

    let mut array = within(10, move || {
        array.disconnect(1).expect("disconnect");
        array
    });
    // Data lands before the parity step trips over the missing sibling.
    array.write_block(0, b"live").unwrap_err();
    assert_eq!(array.read_logical(0).unwrap().as_bytes(), b"live");
    array.restore(1).unwrap();
    array.shutdown();
}

#[test]
fn invalid_config_spawns_nothing() {
    let _serial = FORK_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let err = StorageArray::init_all(ArrayConfig::new(0, 64, 4)).err();
    assert!(matches!(err, Some(Error::Config(_))));
    let err = StorageArray::init_all(ArrayConfig::new(2, 4, 8)).err();
    assert!(matches!(err, Some(Error::Config(_))));
}
