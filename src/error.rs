use crate::task::TaskError;
use std::io;
use thiserror::Error;

/// Errors reported by [`Runtime::block_on`](crate::runtime::Runtime::block_on)
/// and [`Runtime::run`](crate::runtime::Runtime::run).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Every live task is parked and the driver has nothing pending.
    /// The runtime is poisoned afterwards.
    #[error("all tasks are asleep - deadlock! ({live} live tasks)")]
    Deadlock { live: usize },
    /// The host driver failed while yielding or waiting for events.
    #[error("driver error: {0}")]
    Driver(#[from] io::Error),
    /// The main task did not produce a value.
    #[error("main task failed: {0}")]
    Main(#[from] TaskError),
}

/// Programmer errors on channels. They terminate the offending task
/// without running its deferred actions and cannot be recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("send on closed channel")]
    SendOnClosed,
    #[error("close of closed channel")]
    CloseOfClosed,
}
