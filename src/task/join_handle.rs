use super::{Header, TaskError, TaskState};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// A handle to a spawned task. Awaiting it yields the task's output, or the
/// reason it produced none.
///
/// Dropping the handle detaches the task, it keeps running regardless.
pub struct JoinHandle<T> {
    header: Rc<Header>,
    cell: Rc<JoinCell<T>>,
}

impl<T> Unpin for JoinHandle<T> {}

pub(crate) struct JoinCell<T> {
    payload: RefCell<Payload<T>>,
    waker: RefCell<Option<Waker>>,
}

enum Payload<T> {
    Pending,
    Ready(Result<T, TaskError>),
    Taken,
}

impl<T> Default for JoinCell<T> {
    fn default() -> Self {
        JoinCell {
            payload: RefCell::new(Payload::Pending),
            waker: RefCell::default(),
        }
    }
}

impl<T> JoinCell<T> {
    /// Stores the task's result and wakes whoever awaits the handle.
    pub fn complete(&self, result: Result<T, TaskError>) {
        *self.payload.borrow_mut() = Payload::Ready(result);
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(header: Rc<Header>, cell: Rc<JoinCell<T>>) -> JoinHandle<T> {
        JoinHandle { header, cell }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.header.id
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.header.state.get()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Exited
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, TaskError>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut payload = self.cell.payload.borrow_mut();
        match mem::replace(&mut *payload, Payload::Taken) {
            Payload::Ready(result) => Poll::Ready(result),
            Payload::Pending => {
                *payload = Payload::Pending;
                *self.cell.waker.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            }
            Payload::Taken => panic!("`JoinHandle` polled after completion"),
        }
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
