//! Structured panic, defer and recover.
//!
//! A [`frame`] is a call scope with its own list of deferred actions. When
//! the frame's body returns or unwinds, the actions run last registered
//! first. A deferred action that calls [`recover`] while its frame unwinds
//! stops the unwinding, and the frame completes normally with `None`.
//!
//! ```
//! use warren::unwind::{defer, frame, panic, recover};
//!
//! warren::block_on(async {
//!     let result = frame(async {
//!         defer(|| {
//!             let value = recover().expect("the frame is panicking");
//!             assert_eq!(value.to_string(), "boom");
//!         });
//!         panic("boom");
//!     })
//!     .await;
//!     assert!(result.is_none());
//! })
//! .unwrap();
//! ```
//!
//! Every task runs inside an outermost frame, so `defer` is available
//! directly in a spawned task. A panic that reaches it unrecovered
//! terminates that task only.
//!
//! Misusing a channel (sending on or closing a closed channel) is fatal:
//! the task dies immediately, its remaining deferred actions are skipped,
//! and `recover` cannot intercept it.

use crate::runtime::current_task;
use crate::task::TaskError;
use crate::utils::futures::Payload;
use crate::RuntimeError;
use stack::{Deferred, Outcome, Scope};
use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::panic::resume_unwind;

pub(crate) use stack::Unwind;

mod stack;

/// Unwinding payload of fatal runtime errors.
struct Fatal(RuntimeError);

/// Unwinding payload of [`task::exit`](crate::task::exit).
struct Goexit;

/// A failure travelling through frames.
pub(crate) enum Unwinding {
    /// Recoverable.
    Panic(PanicValue),
    /// Runs deferred actions but cannot be recovered.
    Exit,
    /// Skips deferred actions.
    Fatal(RuntimeError),
}

impl Unwinding {
    fn from_payload(payload: Payload) -> Unwinding {
        let payload = match payload.downcast::<Fatal>() {
            Ok(fatal) => return Unwinding::Fatal(fatal.0),
            Err(payload) => payload,
        };
        if payload.is::<Goexit>() {
            return Unwinding::Exit;
        }
        Unwinding::Panic(PanicValue(payload))
    }

    fn resume(self) -> ! {
        match self {
            Unwinding::Panic(value) => resume_unwind(value.0),
            Unwinding::Exit => resume_unwind(Box::new(Goexit)),
            Unwinding::Fatal(error) => resume_unwind(Box::new(Fatal(error))),
        }
    }
}

/// The value of a panic, as caught by [`recover`] or reported by a task.
pub struct PanicValue(Payload);

impl PanicValue {
    pub(crate) fn new(payload: Payload) -> PanicValue {
        PanicValue(payload)
    }

    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// # Errors
    /// Gives the value back if it is not a `T`.
    pub fn downcast<T: Any>(self) -> Result<T, PanicValue> {
        self.0.downcast().map(|value| *value).map_err(PanicValue)
    }

    /// The raw payload, suitable for [`std::panic::resume_unwind`].
    #[must_use]
    pub fn into_inner(self) -> Box<dyn Any + Send> {
        self.0
    }
}

/// Renders the value the way the runtime reports it: strings and errors
/// print as themselves, other values print a placeholder.
impl fmt::Display for PanicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<&'static str>() {
            return f.write_str(s);
        }
        if let Some(s) = self.0.downcast_ref::<String>() {
            return f.write_str(s);
        }
        if let Some(error) = self.0.downcast_ref::<Box<dyn StdError + Send + Sync>>() {
            return fmt::Display::fmt(error, f);
        }
        if let Some(error) = self.0.downcast_ref::<RuntimeError>() {
            return fmt::Display::fmt(error, f);
        }
        f.write_str("(non-printable panic value)")
    }
}

impl fmt::Debug for PanicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PanicValue")
            .field(&format_args!("{self}"))
            .finish()
    }
}

/// Runs `body` as a new frame of the current task.
///
/// Returns `Some` with the body's output when it returns normally, even if
/// a deferred action panicked and another one recovered. Returns `None` when
/// the body panicked and a deferred action recovered. Otherwise the failure
/// keeps unwinding into the enclosing frame.
///
/// # Panics
/// Panics if awaited from the outside of a task.
pub async fn frame<F: Future>(body: F) -> Option<F::Output> {
    let scope = Scope::enter("frame");
    let result = scope.run(body).await;
    match scope.exit(result).await {
        Outcome::Returned(value) => Some(value),
        Outcome::Recovered => None,
        Outcome::Unwinding(unwinding) => unwinding.resume(),
    }
}

/// The outermost frame of a task. Failures that reach it are logged and
/// reported instead of unwinding further.
pub(crate) async fn top<F: Future>(body: F) -> Result<F::Output, TaskError> {
    let scope = Scope::enter("spawn");
    let id = scope.task().id;
    let result = scope.run(body).await;
    match scope.exit(result).await {
        Outcome::Returned(value) => Ok(value),
        Outcome::Recovered => {
            tracing::debug!(task = id, "recovered in the outermost frame");
            Err(TaskError::Recovered)
        }
        Outcome::Unwinding(Unwinding::Panic(value)) => {
            tracing::error!(task = id, "panic: {value}");
            Err(TaskError::Panicked(value))
        }
        Outcome::Unwinding(Unwinding::Exit) => Err(TaskError::Exited),
        Outcome::Unwinding(Unwinding::Fatal(error)) => {
            tracing::error!(task = id, "fatal error: {error}");
            Err(TaskError::Fatal(error))
        }
    }
}

/// Registers `action` to run when the enclosing frame of the current task
/// exits, normally or by unwinding. Inside of a deferred action, that frame
/// is the action itself: the new action runs as soon as the running one
/// returns.
///
/// # Panics
/// Panics if called from the outside of a task.
#[track_caller]
pub fn defer(action: impl FnOnce() + 'static) {
    let task = crate::runtime::current_task_unwrap("defer");
    task.unwind.defer(Deferred::Call(Box::new(action)));
}

/// Like [`defer`], for an action that may suspend, for instance to send
/// on a channel.
///
/// # Panics
/// Panics if called from the outside of a task.
#[track_caller]
pub fn defer_async(action: impl Future<Output = ()> + 'static) {
    let task = crate::runtime::current_task_unwrap("defer_async");
    task.unwind.defer(Deferred::Await(Box::pin(action)));
}

/// Starts unwinding the current frame with `value`. Unlike `panic!`, the
/// panic hook is not invoked.
pub fn panic<T: Any + Send>(value: T) -> ! {
    resume_unwind(Box::new(value))
}

/// Stops the unwinding of the frame whose deferred action is running and
/// returns the panic value.
///
/// Returns `None`, and does nothing, unless it is called by a deferred
/// action of a frame that is unwinding because of a panic. Calls from a
/// nested frame, from outside of deferred actions and from outside of tasks
/// all return `None`. An exit is never recovered, and it resumes once a
/// panic raised during it is.
///
/// Only frames delimit the action. Plain functions and futures that the
/// action calls without opening a [`frame`] count as the action itself, so
/// they may recover too.
#[must_use]
pub fn recover() -> Option<PanicValue> {
    current_task()?.unwind.recover()
}

/// Kills the current task with a runtime error. Outside of a task this is
/// an ordinary panic.
pub(crate) fn fatal(error: RuntimeError) -> ! {
    if current_task().is_none() {
        panic!("{error}");
    }
    resume_unwind(Box::new(Fatal(error)))
}

pub(crate) fn goexit() -> ! {
    resume_unwind(Box::new(Goexit))
}
