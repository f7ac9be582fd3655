//! Infrastructure adapters for job record storage.

pub mod store;

pub use store::InMemoryJobStore;
