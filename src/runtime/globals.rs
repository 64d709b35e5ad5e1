use super::Runtime;
use crate::task::Header;
use std::cell::RefCell;
use std::rc::Rc;

thread_local! {
    /// This is the runtime thread local. It determines in which runtime context we are currently in.
    pub(crate) static RUNTIME: RefCell<Option<Runtime>> = RefCell::new(None);
}

thread_local! {
    /// This is the task thread local. It determines which task is currently being executed.
    pub(crate) static TASK: RefCell<Option<Rc<Header>>> = RefCell::new(None);
}

/// Returns the header of the task currently being polled, if any.
pub(crate) fn current_task() -> Option<Rc<Header>> {
    TASK.with(|cell| cell.borrow().clone())
}

#[track_caller]
pub(crate) fn current_task_unwrap(fun: &str) -> Rc<Header> {
    let Some(task) = current_task() else {
        panic!("called `{fun}` from the outside of a task context.")
    };
    task
}

/// Marks `task` as the running task until dropped.
pub(crate) struct TaskGuard(Option<Rc<Header>>);

impl TaskGuard {
    pub fn enter(task: &Rc<Header>) -> TaskGuard {
        TaskGuard(TASK.with(|cell| cell.borrow_mut().replace(task.clone())))
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        TASK.with(|cell| *cell.borrow_mut() = self.0.take());
    }
}
