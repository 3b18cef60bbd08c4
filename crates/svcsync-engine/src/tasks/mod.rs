//! Async task polling
//!
//! Backend operations that answer 202 Accepted with a task id (invoice and
//! statement generation, remote test execution, wallet reconciliation) are
//! driven through an explicit state machine by [`TaskPoller`].

mod poller;
mod state;

pub use poller::TaskPoller;
pub use state::{TaskError, TaskKind, TaskReport, TaskState, TaskTransition};
