pub mod error;
pub mod lifecycle;
pub mod parse;
pub mod tree;

pub use error::IacError;
pub use lifecycle::{ApplyOptions, ApplyResult, InitializeResult, LifecycleManager, PlanOptions, PlanResult, ValidateResult};
pub use parse::{ChangeCounts, ResourceRef};
pub use tree::write_atomic;
