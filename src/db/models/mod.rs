pub mod pass;

pub use pass::{Pass, PassPatch, PassStatus, Visit};
