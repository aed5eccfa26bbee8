//! Runtime error types.
//!
//! One error enum covers the whole runtime core. The split follows the
//! recovery story: `TerminalUnavailable` is fatal at startup,
//! `DuplicateName` and `EmptyName` are caller errors at registration,
//! `AlreadyStarted`/`InvalidTransition` are programming errors surfaced
//! immediately, and `StopTimeout` is logged while shutdown proceeds.

use std::io;
use thiserror::Error;

use crate::lifecycle::LifecycleState;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No interactive terminal is attached to the process (for example
    /// output was redirected). Fatal: the runtime has nothing to manage.
    #[error("No interactive terminal attached")]
    TerminalUnavailable,

    #[error("An application named '{0}' is already registered")]
    DuplicateName(String),

    #[error("Application name must not be empty")]
    EmptyName,

    #[error("Application '{name}' has already been started (state: {state:?})")]
    AlreadyStarted {
        name: String,
        state: LifecycleState,
    },

    #[error("Invalid lifecycle transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Application '{0}' did not stop within the grace period")]
    StopTimeout(String),

    #[error("Terminal I/O failed: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
