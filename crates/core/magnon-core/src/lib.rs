//! Core primitives for the magnon storage stack.
//!
//! This crate contains the synchronization and task plumbing shared by the
//! driver and filesystem crates: spin locks, an async-aware mutex, wait
//! queues, and a minimal polling executor. Everything here is host-testable
//! with `cargo test`; on the target it runs without `std`.

#![cfg_attr(not(test), no_std)]

pub mod static_assert;
pub mod sync;
pub mod task;
