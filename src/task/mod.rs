//! Tasks are the unit of cooperative execution.
//!
//! A task is a future polled by the runtime. It runs until it completes or
//! reaches a suspension point (a channel operation that cannot complete, a
//! `select` with nothing ready, or [`yield_now`]), and is not polled again
//! until it is woken.

use crate::runtime::{current_task_unwrap, current_unwrap};
use crate::unwind::{PanicValue, Unwind};
use crate::RuntimeError;
use std::cell::Cell;
use std::future::Future;
use std::task::Waker;
use thiserror::Error;

pub use join_handle::JoinHandle;
pub(crate) use join_handle::JoinCell;
pub use yield_now::yield_now;

mod join_handle;
mod yield_now;

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Queued, or currently being polled.
    Runnable,
    /// Parked at a suspension point until woken.
    Blocked,
    /// Finished, one way or another. Exited tasks are never polled again.
    Exited,
}

/// Why a task produced no value.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A panic reached the task's outermost frame unrecovered.
    #[error("panic: {0}")]
    Panicked(PanicValue),
    /// A channel misuse killed the task.
    #[error("fatal error: {0}")]
    Fatal(RuntimeError),
    /// A deferred action of the outermost frame recovered a panic, so the
    /// task completed without a value.
    #[error("recovered from a panic in the outermost frame")]
    Recovered,
    /// The task called [`exit`].
    #[error("task exited")]
    Exited,
}

/// The part of a task every handle to it shares.
pub(crate) struct Header {
    pub id: usize,
    pub state: Cell<TaskState>,
    pub waker: Waker,
    pub unwind: Unwind,
}

impl Header {
    pub fn new(id: usize, waker: Waker) -> Header {
        Header {
            id,
            state: Cell::new(TaskState::Runnable),
            waker,
            unwind: Unwind::default(),
        }
    }
}

/// Spawns a new task onto the current runtime. It is queued as runnable and
/// first polled on a later turn of the scheduler, so `spawn` never blocks.
///
/// The task runs inside its own outermost frame: an unrecovered panic
/// terminates that task only, and is reported through its [`JoinHandle`].
///
/// # Panics
/// Panics if called from the outside of a runtime context.
///
/// # Examples
/// ```
/// use warren::task::spawn;
///
/// warren::block_on(async {
///     let handle = spawn(async { 40 + 2 });
///     assert_eq!(handle.await.unwrap(), 42);
/// })
/// .unwrap();
/// ```
#[track_caller]
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    current_unwrap("spawn").spawn(future)
}

/// Returns the id of the current task.
///
/// # Panics
/// Panics if called from the outside of a task.
#[track_caller]
#[must_use]
pub fn id() -> usize {
    current_task_unwrap("task::id").id
}

/// Terminates the current task. Every pending deferred action of every
/// frame still runs, but none of them can recover, and the task's join
/// handle reports [`TaskError::Exited`].
///
/// # Panics
/// Panics if called from the outside of a task.
#[track_caller]
pub fn exit() -> ! {
    let _ = current_task_unwrap("task::exit");
    crate::unwind::goexit()
}
