//! Shared key-value store port and the in-process implementation.

pub mod memory;
pub mod shared_store;

pub use memory::MemoryStore;
pub use shared_store::SharedStore;
