//! RAID-4 array simulation: one worker process per disk, a dedicated parity
//! disk, and a controller that stripes logical blocks across the workers.
#![allow(clippy::cargo_common_metadata)]

pub mod config;
pub mod controller;
pub mod error;
pub mod layout;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod retention;

pub use config::{ArrayConfig, ParityMode};
pub use controller::StorageArray;
pub use error::{Error, Result};
pub use registry::SlotState;
