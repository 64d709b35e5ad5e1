use crate::error::Error;
use crate::task::{Header, JoinCell, JoinHandle, TaskState};
use crate::unwind;
use executor::{Executor, Next};
use std::cell::Cell;
use std::future::Future;
use std::pin::{pin, Pin};
use std::rc::Rc;

pub use config::Config;
pub use driver::{Driver, Pollster};
pub(crate) use globals::{current_task, current_task_unwrap, RUNTIME};

mod config;
mod driver;
mod executor;
mod globals;
mod waker;

/// Returns a handle to the currently entered [`Runtime`], if any.
/// It is always `Some` from a spawned task or from a [blocked on](block_on) future.
#[track_caller]
#[must_use]
pub fn current() -> Option<Runtime> {
    RUNTIME.with(|cell| cell.borrow().clone())
}

/// Run a future to completion on a fresh runtime with the default configuration.
///
/// # Errors
/// See [`Runtime::block_on`].
///
/// # Panics
/// Panics if called from the inside of another warren runtime.
/// Runtimes cannot be nested.
pub fn block_on<F: Future>(f: F) -> Result<F::Output, Error> {
    Runtime::new().block_on(f)
}

#[track_caller]
#[inline]
pub(crate) fn current_unwrap(fun: &str) -> Runtime {
    let Some(rt) = current() else {
        panic!("called `{fun}` from the outside of a runtime context.")
    };
    rt
}

/// Uniform index in `0..n`, from the entered runtime's generator when there is one.
pub(crate) fn random(n: usize) -> usize {
    RUNTIME
        .with(|cell| cell.borrow().as_ref().map(|rt| rt.executor.random(n)))
        .unwrap_or_else(|| fastrand::usize(..n))
}

/// The warren local runtime. Cloning it yields another handle to the same runtime.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) config: Config,
    pub(crate) executor: Rc<Executor>,
    pub(crate) driver: Rc<dyn Driver>,
}

/// Leaves the runtime context on drop. See [`Runtime::enter`].
pub struct EnterGuard(Option<Runtime>);

impl Drop for EnterGuard {
    fn drop(&mut self) {
        RUNTIME.with(|cell| *cell.borrow_mut() = self.0.take());
    }
}

/// Counts the main task out of the executor once `block_on` is done with it.
struct MainGuard<'a>(&'a Executor);

impl Drop for MainGuard<'_> {
    fn drop(&mut self) {
        self.0.release_main();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

impl Runtime {
    /// Creates a new warren runtime with the default configuration values.
    /// For more information on the default configuration, check out the [`Config`]
    /// struct.
    #[must_use]
    pub fn new() -> Runtime {
        Runtime::with_config(Config::default())
    }

    #[must_use]
    pub fn with_config(config: Config) -> Runtime {
        Runtime::with_driver(config, Pollster)
    }

    /// Creates a runtime that hands control to `driver` between drains of
    /// the ready queue.
    #[must_use]
    pub fn with_driver(config: Config, driver: impl Driver + 'static) -> Runtime {
        let executor = Rc::new(Executor::new(&config));
        Runtime {
            config,
            executor,
            driver: Rc::new(driver),
        }
    }

    /// Enters the runtime context, so functions like [`spawn`](crate::spawn)
    /// are available, until the guard is dropped.
    pub fn enter(&self) -> EnterGuard {
        EnterGuard(RUNTIME.with(|cell| cell.borrow_mut().replace(self.clone())))
    }

    /// Spawns a task onto the runtime. The task starts running the next time
    /// the runtime runs, in FIFO order.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let cell = Rc::new(JoinCell::default());
        let join = cell.clone();
        let header = self.executor.spawn(async move {
            let result = unwind::top(future).await;
            join.complete(result);
        });
        JoinHandle::new(header, cell)
    }

    /// Runs a future to completion on the warren runtime. This is the
    /// runtime's entry point.
    ///
    /// The future runs as the *main task*: it can park on channels like any
    /// other task, and it gets its own outermost frame, so `defer` and
    /// `recover` work in it. Every spawned task runs alongside it.
    ///
    /// Like Go's `main`, returning does not wait for the other tasks. They stay
    /// suspended in the runtime and resume on the next `block_on` or [`run`](Runtime::run).
    ///
    /// # Errors
    /// - [`Error::Deadlock`] if every task, main included, is parked and the
    ///   driver has nothing pending. The runtime is poisoned afterwards.
    /// - [`Error::Driver`] if the driver fails.
    /// - [`Error::Main`] if the main task panicked unrecovered, died from a
    ///   fatal error, recovered in its outermost frame or exited.
    ///
    /// # Panics
    /// This function panics if called from the inside of another warren runtime.
    ///
    /// # Examples
    ///
    /// ```
    /// use warren::runtime::Runtime;
    /// use warren::task::yield_now;
    ///
    /// // Create the runtime
    /// let rt = Runtime::new();
    ///
    /// // Execute the future, blocking the current thread until completion
    /// rt.block_on(async {
    ///     yield_now().await;
    ///     println!("hello");
    /// })
    /// .unwrap();
    /// ```
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, Error> {
        let msg = "called `block_on` from the inside of another warren runtime.";
        assert!(current().is_none(), "{}", msg);
        if self.executor.is_poisoned() {
            return Err(self.deadlocked());
        }

        // we enter the runtime context so functions like `spawn` are
        // available.
        let _h = self.enter();

        let output = Cell::new(None);
        let main = pin!(async {
            output.set(Some(unwind::top(future).await));
        });
        let main: Pin<&mut dyn Future<Output = ()>> = main;
        let header = self.executor.admit_main();
        let _main = MainGuard(&self.executor);

        self.event_loop(Some((&header, main)))?;

        match output.take() {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(Error::Main(error)),
            None => unreachable!("the main task completed without an output. This is a bug in warren."),
        }
    }

    /// Runs spawned tasks until none is live.
    ///
    /// # Errors
    /// [`Error::Deadlock`] if every remaining task is parked and the driver has
    /// nothing pending, and [`Error::Driver`] if the driver fails.
    ///
    /// # Panics
    /// This function panics if called from the inside of another warren runtime.
    pub fn run(&self) -> Result<(), Error> {
        let msg = "called `run` from the inside of another warren runtime.";
        assert!(current().is_none(), "{}", msg);
        if self.executor.is_poisoned() {
            return Err(self.deadlocked());
        }
        let _h = self.enter();
        self.event_loop(None)
    }

    /// This is the main loop. With a main task it returns once main completes,
    /// otherwise once no task is live.
    fn event_loop(
        &self,
        mut main: Option<(&Rc<Header>, Pin<&mut dyn Future<Output = ()>>)>,
    ) -> Result<(), Error> {
        let Runtime {
            executor,
            config,
            driver,
        } = self;

        loop {
            for _ in 0..config.event_interval {
                executor.drain_inbox();
                match executor.pop_ready() {
                    None => break,
                    Some(Next::Task(task)) => executor.run_once(&task),
                    Some(Next::Main) => {
                        let Some((header, future)) = main.as_mut() else {
                            continue;
                        };
                        let poll = executor.poll_task(*header, |cx| future.as_mut().poll(cx));
                        if poll.is_ready() {
                            return Ok(());
                        }
                    }
                }
            }

            executor.drain_inbox();
            if !executor.is_idle() {
                driver.yield_now()?;
                continue;
            }
            if main.is_none() && executor.live_tasks() == 0 {
                return Ok(());
            }
            if driver.is_pending() || !config.deadlock_detection {
                driver.wait()?;
                continue;
            }
            return Err(self.deadlock());
        }
    }

    /// Reports the deadlock once and poisons the runtime.
    fn deadlock(&self) -> Error {
        debug_assert_eq!(self.executor.runnable_tasks(), 0);
        if !self.executor.poison() {
            tracing::error!(
                live = self.executor.live_tasks(),
                "fatal error: all tasks are asleep - deadlock!"
            );
        }
        self.deadlocked()
    }

    fn deadlocked(&self) -> Error {
        Error::Deadlock {
            live: self.executor.live_tasks(),
        }
    }

    /// Number of tasks that have not exited, the running main task included.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.executor.live_tasks()
    }

    /// Number of live tasks that are not parked.
    #[must_use]
    pub fn runnable_tasks(&self) -> usize {
        self.executor.runnable_tasks()
    }

    /// State of the task with the given id, or `None` if no such task was
    /// ever spawned on this runtime.
    #[must_use]
    pub fn task_state(&self, id: usize) -> Option<TaskState> {
        self.executor.task_state(id)
    }
}
