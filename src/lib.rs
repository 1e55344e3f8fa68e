mod ops;

// We do this pattern (privately use a module, then re-export parts of it) so we can refactor/rename or generally futz around with the internals without breaking the public API

// Types
mod types;
pub use types::EnvMap;
pub use types::ExecutionResult;
pub use types::Job;
pub use types::JobInit;
pub use types::JobLog;
pub use types::JobOptions;
pub use types::JobState;
pub use types::Queue as QueueRow;
pub use types::QueueState;
pub use types::QueueStats;

// Errors
mod error;
// Errors about some job operation - locks being lost, invalid state transitions, timeouts etc
pub use error::JobError;
// Errors about the queue/storage layer itself - connection failures, pause, uniqueness
pub use error::QueueError;

// Config
mod config;
pub use config::Config;
pub use config::PoolConfig;
pub use config::RemoteConfig;
pub use config::SshAuth;
pub use config::SshConfig;
pub use config::WorkerConfig;

// Storage
mod storage;
pub use storage::StorageAdapter;

// Job / Queue façades
mod job;
pub use job::JobHandle;

mod queue;
pub use queue::Queue;

// Remote execution
mod executor;
pub use executor::execute_with_timeout;
pub use executor::OutputSink;
pub use executor::RemoteExecute;
pub use executor::ServerInfo;
pub use executor::SshExecutor;
#[cfg(any(test, feature = "test-support"))]
pub use executor::FakeExecutor;

// Events
mod events;
pub use events::EventBus;
pub use events::WorkerEvent;

// Worker
mod worker;
pub use worker::Worker;

mod metrics_consts;

#[doc(hidden)]
pub mod test_support {
    pub use crate::ops;
}
