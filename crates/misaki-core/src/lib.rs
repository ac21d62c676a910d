mod backoff;
mod command;
mod error;
mod job;
mod result;

pub use backoff::BackoffMediator;
pub use command::{Argv, Command, CommandRegistry};
pub use error::{CoreError, Result};
pub use job::{ChatMessage, Envelope, Job};
pub use result::{ExecutionResult, ExecutionStatus};

/// Default first backoff interval of the dispatch loop, in seconds
pub const DEFAULT_INITIAL_BACKOFF_SECS: u64 = 1;

/// Default backoff ceiling of the dispatch loop, in seconds
pub const DEFAULT_MAXIMUM_BACKOFF_SECS: u64 = 300;
