//! Checkpoint store implementations.
//!
//! The kernel's [`CheckpointStore`](tutti_kernel::checkpoint::CheckpointStore)
//! contract is storage-agnostic; this module provides the in-memory
//! reference implementation.  Redis-style backends implement the same trait
//! against `checkpoint:{id}` / `checkpoint_index:pending` /
//! `claim:{checkpoint_id}` keys.

pub mod memory;

pub use memory::InMemoryCheckpointStore;
