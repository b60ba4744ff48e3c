//! Append-only, block-addressed message log for removable flash media.
//!
//! A volume stores a monotonically numbered sequence of variable-length
//! binary messages directly on raw 512-byte sectors, with O(1) amortized
//! append and bounded random-access reads through a two-level sparse index
//! (partitions → sectors → per-block message counts). Nothing is ever freed;
//! when the device is exhausted the volume either refuses further appends or,
//! in rotate mode, wraps around and overwrites from the start.
//!
//! The building blocks, bottom up:
//!
//! - [`layout`] — the on-media partition/sector header format.
//! - [`slot`] — message packing inside a data block.
//! - [`Volume`] — formatter, mount/recovery, append engine and read resolver
//!   over any [`BlockDevice`](magnon_driver_api::block::BlockDevice).
//! - [`SharedVolume`] — the task-facing wrapper serializing volume access
//!   behind an async mutex.
//!
//! Device I/O is async and is the only suspension point; a whole operation
//! otherwise runs on the caller's task.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod error;
mod id;
pub mod layout;
mod shared;
pub mod slot;
mod volume;

pub use error::FsError;
pub use id::MessageId;
pub use shared::SharedVolume;
pub use volume::{FormatConfig, Volume};
