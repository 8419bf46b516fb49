pub mod codes;
pub mod intake;
pub mod lifecycle;
pub mod lookup;
pub mod qr;
mod service;

pub use intake::{NewPass, ValidationErrors, VisitRequest};
pub use lifecycle::{ApprovePolicy, BlockReason, Outcome};
pub use service::{Clock, PassError, PassResult, PassService, SystemClock};
