use super::config::Config;
use super::globals::TaskGuard;
use super::waker::waker;
use crate::hasher::NoopHasher;
use crate::task::{Header, TaskState};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// A spawned task. The continuation of a parked task is its future.
pub(crate) struct Task {
    pub header: Rc<Header>,
    future: RefCell<Pin<Box<dyn Future<Output = ()>>>>,
}

/// What the event loop should poll next.
pub(crate) enum Next {
    Task(Rc<Task>),
    Main,
}

pub(crate) struct Executor {
    tasks: RefCell<HashMap<usize, Rc<Task>, NoopHasher>>,
    /// The task `block_on` is running, if any. It lives on the caller's
    /// stack, so only its header is known here.
    main: RefCell<Option<Rc<Header>>>,
    ready: RefCell<VecDeque<usize>>,
    /// Wake-ups are funneled through here so wakers can be `Send`.
    inbox: Receiver<usize>,
    notifier: Sender<usize>,
    task_id: Cell<usize>,
    live: Cell<usize>,
    runnable: Cell<usize>,
    deadlocked: Cell<bool>,
    rng: fastrand::Rng,
}

impl Executor {
    pub fn new(config: &Config) -> Executor {
        let (notifier, inbox) = unbounded();
        let rng = match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Executor {
            tasks: RefCell::default(),
            main: RefCell::default(),
            ready: RefCell::default(),
            inbox,
            notifier,
            task_id: Cell::new(1),
            live: Cell::new(0),
            runnable: Cell::new(0),
            deadlocked: Cell::new(false),
            rng,
        }
    }

    fn admit(&self) -> Rc<Header> {
        let id = self.task_id.get();
        self.task_id.set(id + 1);
        let header = Rc::new(Header::new(id, waker(id, self.notifier.clone())));
        self.live.set(self.live.get() + 1);
        self.runnable.set(self.runnable.get() + 1);
        self.ready.borrow_mut().push_back(id);
        header
    }

    /// Registers a runnable task. Never blocks and never fails.
    pub fn spawn<F>(&self, future: F) -> Rc<Header>
    where
        F: Future<Output = ()> + 'static,
    {
        let header = self.admit();
        let task = Rc::new(Task {
            header: header.clone(),
            future: RefCell::new(Box::pin(future)),
        });
        self.tasks.borrow_mut().insert(header.id, task);
        tracing::trace!(task = header.id, "spawned");
        header
    }

    /// Registers the `block_on` future as a task of its own.
    pub fn admit_main(&self) -> Rc<Header> {
        let header = self.admit();
        *self.main.borrow_mut() = Some(header.clone());
        tracing::trace!(task = header.id, "entered block_on");
        header
    }

    /// Counts the main task out. Called when `block_on` returns, whether or
    /// not the main task completed.
    pub fn release_main(&self) {
        let Some(header) = self.main.borrow_mut().take() else {
            return;
        };
        match header.state.get() {
            TaskState::Exited => return,
            TaskState::Runnable => self.runnable.set(self.runnable.get() - 1),
            TaskState::Blocked => (),
        }
        self.live.set(self.live.get() - 1);
        header.state.set(TaskState::Exited);
    }

    fn header(&self, id: usize) -> Option<Rc<Header>> {
        if let Some(task) = self.tasks.borrow().get(&id) {
            return Some(task.header.clone());
        }
        self.main.borrow().clone().filter(|main| main.id == id)
    }

    /// Pops the next runnable task, skipping entries of tasks that are gone.
    pub fn pop_ready(&self) -> Option<Next> {
        loop {
            let id = self.ready.borrow_mut().pop_front()?;
            if let Some(task) = self.tasks.borrow().get(&id) {
                return Some(Next::Task(task.clone()));
            }
            if self.main.borrow().as_ref().is_some_and(|main| main.id == id) {
                return Some(Next::Main);
            }
        }
    }

    /// Runs a spawned task until it completes or reaches a suspension point.
    pub fn run_once(&self, task: &Task) {
        let _ = self.poll_task(&task.header, |cx| task.future.borrow_mut().as_mut().poll(cx));
    }

    /// Polls a task's future with the task entered and accounts for the outcome.
    pub fn poll_task(
        &self,
        header: &Rc<Header>,
        poll: impl FnOnce(&mut Context<'_>) -> Poll<()>,
    ) -> Poll<()> {
        let waker = header.waker.clone();
        let cx = &mut Context::from_waker(&waker);
        let result = {
            let _guard = TaskGuard::enter(header);
            catch_unwind(AssertUnwindSafe(|| poll(cx)))
        };
        match result {
            Ok(Poll::Pending) => {
                self.park(header);
                Poll::Pending
            }
            Ok(Poll::Ready(())) => {
                self.exit(header);
                Poll::Ready(())
            }
            Err(_) => {
                // task futures catch their own unwinds, so this is a panic in the glue.
                tracing::error!(task = header.id, "task unwound past its outermost frame");
                self.exit(header);
                Poll::Ready(())
            }
        }
    }

    fn park(&self, header: &Header) {
        header.state.set(TaskState::Blocked);
        self.runnable.set(self.runnable.get() - 1);
        tracing::trace!(task = header.id, "parked");
    }

    fn exit(&self, header: &Header) {
        header.state.set(TaskState::Exited);
        self.runnable.set(self.runnable.get() - 1);
        self.live.set(self.live.get() - 1);
        // the map borrow is released before the task's destructors run.
        let task = self.tasks.borrow_mut().remove(&header.id);
        drop(task);
        tracing::debug!(task = header.id, "exited");
    }

    /// Moves a blocked task back to the ready queue. Waking a task that is
    /// runnable or gone does nothing.
    pub fn wake(&self, id: usize) {
        let Some(header) = self.header(id) else {
            return;
        };
        if header.state.get() != TaskState::Blocked {
            return;
        }
        header.state.set(TaskState::Runnable);
        self.runnable.set(self.runnable.get() + 1);
        self.ready.borrow_mut().push_back(id);
        tracing::trace!(task = id, "woken");
    }

    /// Admits every task woken since the last drain.
    pub fn drain_inbox(&self) {
        while let Ok(id) = self.inbox.try_recv() {
            self.wake(id);
        }
    }

    pub fn is_idle(&self) -> bool {
        self.ready.borrow().is_empty()
    }

    pub fn live_tasks(&self) -> usize {
        self.live.get()
    }

    pub fn runnable_tasks(&self) -> usize {
        self.runnable.get()
    }

    pub fn task_state(&self, id: usize) -> Option<TaskState> {
        if let Some(header) = self.header(id) {
            return Some(header.state.get());
        }
        (id < self.task_id.get()).then_some(TaskState::Exited)
    }

    /// Marks the executor as deadlocked. Returns whether it already was.
    pub fn poison(&self) -> bool {
        self.deadlocked.replace(true)
    }

    pub fn is_poisoned(&self) -> bool {
        self.deadlocked.get()
    }

    /// Uniform index in `0..n`.
    pub fn random(&self, n: usize) -> usize {
        self.rng.usize(..n)
    }
}
