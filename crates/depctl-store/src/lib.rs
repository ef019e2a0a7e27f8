pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use repository::{
    AuditFilter, AuditRepository, CommandHistoryRepository, DeploymentRepository, JobRepository,
    LockHandle, ObjectStore, StageSessionRepository, StateLockStore,
};
