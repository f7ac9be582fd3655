//! Job record store adapters.

pub mod memory;

pub use memory::InMemoryJobStore;
