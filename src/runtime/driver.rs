use std::io;

/// The host event loop the runtime hands control back to.
///
/// The executor calls [`yield_now`](Driver::yield_now) after every drain of
/// the ready queue while tasks are still runnable, and
/// [`wait`](Driver::wait) when no task is runnable but the driver reports
/// [pending](Driver::is_pending) events. External completions wake their
/// tasks through ordinary [`Waker`](std::task::Waker)s, which are `Send`.
///
/// If every task is parked and the driver has nothing pending, the runtime
/// reports a deadlock instead of waiting.
pub trait Driver {
    /// Lets the host run its own work between two drains.
    ///
    /// # Errors
    /// Errors are returned from `block_on`/`run` as [`Error::Driver`](crate::Error::Driver).
    fn yield_now(&self) -> io::Result<()> {
        Ok(())
    }

    /// Blocks until at least one external event may have woken a task.
    ///
    /// # Errors
    /// Errors are returned from `block_on`/`run` as [`Error::Driver`](crate::Error::Driver).
    fn wait(&self) -> io::Result<()> {
        Ok(())
    }

    /// Whether external events may still wake a parked task.
    fn is_pending(&self) -> bool {
        false
    }
}

/// The default driver. It has no external events, so a runtime driven by
/// it only makes progress through its own tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pollster;

impl Driver for Pollster {}
