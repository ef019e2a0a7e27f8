pub mod audit;
pub mod command;
pub mod deployment;
pub mod error;
pub mod ids;
pub mod job;
pub mod stage;
pub mod state_machine;

pub use audit::{AuditEntry, AuditEntryDraft};
pub use command::{Command, CommandHistoryEntry, CommandQueue, CommandStatus, CommandType};
pub use deployment::Deployment;
pub use error::{DomainError, EngineErrorKind, HasErrorKind};
pub use ids::{CommandId, DeploymentId, JobId, UserId};
pub use job::{Job, JobKind, JobStatus};
pub use stage::{StageId, StageSession};
pub use state_machine::DeploymentStatus;
