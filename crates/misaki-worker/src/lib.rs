//! Command execution side of misaki: the dispatch loop, the process-running
//! executor and the webhook notifier.

pub mod config;
pub mod dispatch;
pub mod executor;
pub mod notifier;

pub use config::{ConfigError, ExecutorConfig};
pub use dispatch::{ChatFilter, DispatchLoop, Iteration};
pub use executor::{CommandExecutor, OsProcessRunner, ProcessRunner, StepOutput};
pub use notifier::{Notification, Notifier, NotifierError, SlackNotifier};
