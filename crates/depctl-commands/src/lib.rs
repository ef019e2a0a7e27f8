pub mod error;
pub mod queue;
pub mod validator;

pub use error::CommandsError;
pub use queue::{CommandQueueService, QueueProgress};
pub use validator::{classify, Classification};
