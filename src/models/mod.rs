// Re-export all model types from submodules
mod common;
mod stats;
mod tasks;
mod users;

pub use stats::*;
pub use tasks::*;
pub use users::*;
