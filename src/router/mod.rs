//! Router orchestration: from configuration snapshot to entry-point handlers.

pub mod manager;
pub mod recovery;

pub use manager::{Generation, RouterManager, PRIORITY_CEILING};
pub use recovery::Recovery;
