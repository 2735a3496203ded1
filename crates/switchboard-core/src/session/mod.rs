//! TTL-bound session lifecycle on top of the shared store.

pub mod store;

pub use store::SessionStore;
