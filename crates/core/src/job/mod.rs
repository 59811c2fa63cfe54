//! Job records and their durable store.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{JobFilter, JobStore, JobStoreError};
pub use types::{ErrorKind, JobError, JobRecord, JobSpec, JobStatus};
