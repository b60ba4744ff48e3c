//! Block device drivers for the magnon storage stack.
//!
//! Hardware drivers live with their host platform; this crate carries the
//! platform-independent devices, currently the [`block::RamDisk`] used by
//! tests and demos.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod block;
