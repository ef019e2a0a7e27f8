pub mod dispatcher;
pub mod error;
pub mod handlers;

pub use dispatcher::{JobContext, JobDispatcher, JobHandler};
pub use error::JobsError;
pub use handlers::LifecycleJobHandler;
