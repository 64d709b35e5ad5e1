use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::task::Waker;

/// Which case of a parked operation completed, and whether it completed
/// because its channel was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fire {
    pub case: usize,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    Fired(Fire),
    Cancelled,
}

/// The wake-up shared by every channel registration of one parked
/// operation. A select parked on several channels owns one signal and one
/// queue entry per case.
///
/// The first channel to fire the signal wins. From then on every other
/// entry holding it is inert: channels skip entries whose signal is no
/// longer waiting, both when choosing a counterpart and when reporting
/// readiness, so at most one case of the operation ever completes.
pub(crate) struct Signal {
    state: Cell<State>,
    waker: RefCell<Waker>,
}

impl Signal {
    pub fn new(waker: &Waker) -> Rc<Signal> {
        Rc::new(Signal {
            state: Cell::new(State::Waiting),
            waker: RefCell::new(waker.clone()),
        })
    }

    pub fn is_waiting(&self) -> bool {
        self.state.get() == State::Waiting
    }

    pub fn fired(&self) -> Option<Fire> {
        match self.state.get() {
            State::Fired(fire) => Some(fire),
            _ => None,
        }
    }

    /// Refreshes the waker in case the operation moved to another task.
    pub fn set_waker(&self, waker: &Waker) {
        let mut current = self.waker.borrow_mut();
        if !current.will_wake(waker) {
            *current = waker.clone();
        }
    }

    /// Completes `case` and wakes the parked task. Returns `false` if the
    /// operation already completed or was cancelled.
    ///
    /// Must not be called while a channel is borrowed.
    pub fn fire(&self, case: usize, closed: bool) -> bool {
        if !self.is_waiting() {
            return false;
        }
        self.state.set(State::Fired(Fire { case, closed }));
        self.waker.borrow().wake_by_ref();
        true
    }

    /// Makes every registration inert without waking anyone.
    pub fn cancel(&self) {
        if self.is_waiting() {
            self.state.set(State::Cancelled);
        }
    }
}
