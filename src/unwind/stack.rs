use super::{PanicValue, Unwinding};
use crate::hasher::NoopHasher;
use crate::runtime::current_task_unwrap;
use crate::task::Header;
use crate::utils::futures::{catch_unwind, CatchUnwind, Payload};
use pin_project_lite::pin_project;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// A cleanup action registered with [`defer`](super::defer) or
/// [`defer_async`](super::defer_async).
pub(crate) enum Deferred {
    Call(Box<dyn FnOnce()>),
    Await(Pin<Box<dyn Future<Output = ()>>>),
}

#[derive(Clone, Copy)]
enum Kind {
    /// Opened by [`frame`](super::frame) or by the task itself.
    Body,
    /// Runs one deferred action of frame `of`.
    Deferred { of: usize },
}

struct Frame {
    kind: Kind,
    deferred: Vec<Deferred>,
    /// The panic in flight.
    record: Option<Unwinding>,
    /// Set once an exit reaches the frame. Never cleared.
    exiting: bool,
}

/// Per task unwinding state.
///
/// Frames are futures, so several of them may be open at once in one task,
/// for instance under `join`. Each frame is keyed by its own id, and
/// `current` names the frame being polled right now.
#[derive(Default)]
pub(crate) struct Unwind {
    frames: RefCell<HashMap<usize, Frame, NoopHasher>>,
    frame_id: Cell<usize>,
    current: Cell<Option<usize>>,
}

impl Unwind {
    fn open(&self, kind: Kind) -> usize {
        let id = self.frame_id.get() + 1;
        self.frame_id.set(id);
        let frame = Frame {
            kind,
            deferred: Vec::new(),
            record: None,
            exiting: false,
        };
        self.frames.borrow_mut().insert(id, frame);
        id
    }

    fn close(&self, id: usize) {
        // dropped outside of the borrow, destructors of deferred actions may defer.
        let frame = self.frames.borrow_mut().remove(&id);
        drop(frame);
    }

    /// Pushes onto the frame being polled.
    ///
    /// # Panics
    /// If no frame is being polled, which only happens while the task is
    /// torn down.
    pub fn defer(&self, deferred: Deferred) {
        let mut frames = self.frames.borrow_mut();
        let Some(frame) = self.current.get().and_then(|id| frames.get_mut(&id)) else {
            panic!("called `defer` outside of a frame.");
        };
        frame.deferred.push(deferred);
    }

    fn pop_deferred(&self, id: usize) -> Option<Deferred> {
        self.frames.borrow_mut().get_mut(&id)?.deferred.pop()
    }

    /// Records a failure of frame `id`. A panic replaces the one in flight.
    /// An exit discards it and sticks to the frame.
    fn raise(&self, id: usize, unwinding: Unwinding) {
        let mut frames = self.frames.borrow_mut();
        let Some(frame) = frames.get_mut(&id) else {
            return;
        };
        if let Unwinding::Exit = unwinding {
            frame.exiting = true;
            frame.record = None;
        } else {
            frame.record = Some(unwinding);
        }
    }

    fn take_record(&self, id: usize) -> Option<Unwinding> {
        let mut frames = self.frames.borrow_mut();
        let frame = frames.get_mut(&id)?;
        match frame.record.take() {
            None if frame.exiting => Some(Unwinding::Exit),
            record => record,
        }
    }

    /// Consumes the panic of frame `of` when the frame being polled runs one
    /// of its deferred actions.
    pub fn recover(&self) -> Option<PanicValue> {
        let mut frames = self.frames.borrow_mut();
        let Kind::Deferred { of } = frames.get(&self.current.get()?)?.kind else {
            return None;
        };
        let frame = frames.get_mut(&of)?;
        match frame.record.take() {
            Some(Unwinding::Panic(value)) => Some(value),
            record => {
                frame.record = record;
                None
            }
        }
    }
}

/// Restores the frame that was being polled.
struct Restore<'a> {
    unwind: &'a Unwind,
    outer: Option<usize>,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        self.unwind.current.set(self.outer);
    }
}

pin_project! {
    /// Marks the frame as the one being polled while the body is.
    pub(crate) struct Enter<F> {
        task: Rc<Header>,
        id: usize,
        #[pin]
        future: F,
    }
}

impl<F: Future> Future for Enter<F> {
    type Output = F::Output;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let this = self.project();
        let unwind = &this.task.unwind;
        let outer = unwind.current.replace(Some(*this.id));
        let _restore = Restore { unwind, outer };
        this.future.poll(cx)
    }
}

/// How a frame ended after running its deferred actions.
pub(crate) enum Outcome<T> {
    Returned(T),
    Recovered,
    Unwinding(Unwinding),
}

/// An open frame of the current task. Dropping it discards the frame and
/// whatever actions it still holds.
pub(crate) struct Scope {
    task: Rc<Header>,
    id: usize,
}

impl Scope {
    #[track_caller]
    pub fn enter(fun: &str) -> Scope {
        Scope::open(current_task_unwrap(fun), Kind::Body)
    }

    fn open(task: Rc<Header>, kind: Kind) -> Scope {
        let id = task.unwind.open(kind);
        Scope { task, id }
    }

    pub fn task(&self) -> &Header {
        &self.task
    }

    /// Polls `body` inside of the frame, catching its unwinds.
    pub fn run<F: Future>(&self, body: F) -> CatchUnwind<Enter<F>> {
        catch_unwind(Enter {
            task: self.task.clone(),
            id: self.id,
            future: body,
        })
    }

    /// Runs the frame's deferred actions, last registered first, and decides
    /// how the frame ends. Fatal errors skip the remaining actions.
    pub async fn exit<T>(self, result: Result<T, Payload>) -> Outcome<T> {
        let unwind = &self.task.unwind;
        let id = self.id;
        let returned = match result {
            Ok(value) => Some(value),
            Err(payload) => {
                match Unwinding::from_payload(payload) {
                    fatal @ Unwinding::Fatal(_) => return Outcome::Unwinding(fatal),
                    unwinding => unwind.raise(id, unwinding),
                }
                None
            }
        };

        while let Some(deferred) = unwind.pop_deferred(id) {
            match run_deferred(self.task.clone(), id, deferred).await {
                Outcome::Returned(()) | Outcome::Recovered => {}
                Outcome::Unwinding(fatal @ Unwinding::Fatal(_)) => return Outcome::Unwinding(fatal),
                Outcome::Unwinding(unwinding) => unwind.raise(id, unwinding),
            }
        }

        match (unwind.take_record(id), returned) {
            (Some(unwinding), _) => Outcome::Unwinding(unwinding),
            (None, Some(value)) => Outcome::Returned(value),
            (None, None) => Outcome::Recovered,
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.task.unwind.close(self.id);
    }
}

/// Runs a deferred action of frame `of` inside a frame of its own, so the
/// action may defer and recover like any other code.
fn run_deferred(
    task: Rc<Header>,
    of: usize,
    deferred: Deferred,
) -> Pin<Box<dyn Future<Output = Outcome<()>>>> {
    Box::pin(async move {
        let scope = Scope::open(task, Kind::Deferred { of });
        let result = match deferred {
            Deferred::Call(action) => scope.run(async move { action() }).await,
            Deferred::Await(action) => scope.run(action).await,
        };
        scope.exit(result).await
    })
}

#[cfg(test)]
mod tests {
    use super::{Deferred, Kind, Unwind, Unwinding};
    use crate::unwind::PanicValue;

    fn panic_value(s: &'static str) -> Unwinding {
        Unwinding::Panic(PanicValue::new(Box::new(s)))
    }

    #[test]
    fn recover_needs_a_running_deferred_action() {
        let unwind = Unwind::default();
        let body = unwind.open(Kind::Body);
        unwind.raise(body, panic_value("a"));
        unwind.current.set(Some(body));
        assert!(unwind.recover().is_none());
        let action = unwind.open(Kind::Deferred { of: body });
        unwind.current.set(Some(action));
        assert_eq!(unwind.recover().unwrap().to_string(), "a");
        assert!(unwind.recover().is_none());
    }

    #[test]
    fn recover_only_from_the_unwinding_frame() {
        let unwind = Unwind::default();
        let outer = unwind.open(Kind::Body);
        unwind.raise(outer, panic_value("a"));
        let action = unwind.open(Kind::Deferred { of: outer });
        // a frame opened by the deferred action itself
        let inner = unwind.open(Kind::Body);
        unwind.current.set(Some(inner));
        assert!(unwind.recover().is_none());
        unwind.close(inner);
        unwind.current.set(Some(action));
        assert!(unwind.recover().is_some());
    }

    #[test]
    fn second_raise_replaces() {
        let unwind = Unwind::default();
        let id = unwind.open(Kind::Body);
        unwind.raise(id, panic_value("first"));
        unwind.raise(id, panic_value("second"));
        let Some(Unwinding::Panic(value)) = unwind.take_record(id) else {
            panic!("expected a panic record");
        };
        assert_eq!(value.to_string(), "second");
        assert!(unwind.take_record(id).is_none());
    }

    #[test]
    fn exits_are_not_recoverable() {
        let unwind = Unwind::default();
        let id = unwind.open(Kind::Body);
        unwind.raise(id, Unwinding::Exit);
        unwind.current.set(Some(unwind.open(Kind::Deferred { of: id })));
        assert!(unwind.recover().is_none());
        assert!(matches!(unwind.take_record(id), Some(Unwinding::Exit)));
    }

    #[test]
    fn exits_outlive_recovered_panics() {
        let unwind = Unwind::default();
        let id = unwind.open(Kind::Body);
        unwind.raise(id, Unwinding::Exit);
        unwind.raise(id, panic_value("in a deferred action"));
        unwind.current.set(Some(unwind.open(Kind::Deferred { of: id })));
        assert!(unwind.recover().is_some());
        assert!(matches!(unwind.take_record(id), Some(Unwinding::Exit)));
    }

    #[test]
    fn frames_are_independent() {
        let unwind = Unwind::default();
        let a = unwind.open(Kind::Body);
        let b = unwind.open(Kind::Body);
        unwind.current.set(Some(a));
        unwind.defer(Deferred::Call(Box::new(|| {})));
        unwind.raise(b, panic_value("kept"));
        assert!(unwind.pop_deferred(b).is_none());
        unwind.close(a);
        assert!(unwind.pop_deferred(a).is_none());
        assert!(unwind.take_record(b).is_some());
        unwind.close(b);
        assert!(unwind.frames.borrow().is_empty());
    }

    #[test]
    #[should_panic(expected = "called `defer` outside of a frame.")]
    fn defer_needs_a_polled_frame() {
        let unwind = Unwind::default();
        unwind.open(Kind::Body);
        unwind.defer(Deferred::Call(Box::new(|| {})));
    }
}
