pub mod error;
pub mod fanout;
pub mod runner;
pub mod types;

pub use error::ProcessError;
pub use fanout::FanOutRegistry;
pub use runner::{run, run_streaming};
pub use types::{CorrelationKey, RunResult, StreamEvent};
