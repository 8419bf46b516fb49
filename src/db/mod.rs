mod connection;
mod helpers;
pub mod ingest;
mod memory;
mod migrations;
pub mod models;
mod repositories;
mod store;

pub use connection::Database;
pub use memory::MemoryPassStore;
pub use models::{Pass, PassPatch, PassStatus, Visit};
pub use store::{PassStore, Snapshot, StoreError};
