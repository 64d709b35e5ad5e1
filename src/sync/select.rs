use super::chan::Chan;
use super::signal::{Fire, Signal};
use crate::runtime::random;
use crate::unwind::fatal;
use crate::RuntimeError;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Waits on several channel operations at once and completes exactly one.
///
/// Cases are added with [`recv`](Select::recv) and [`send`](Select::send),
/// and numbered in the order they are added. Awaiting the select:
/// 1. completes one of the ready cases, chosen uniformly at random;
/// 2. otherwise completes the [default](Select::default) case, if any;
/// 3. otherwise parks on every channel until one case completes.
///
/// A send case on a closed channel is fatal as soon as it is evaluated.
/// A select without cases or default parks forever.
///
/// The [`select!`](crate::select!) macro builds and awaits a `Select` with
/// one arm per case.
///
/// ```
/// use warren::sync::{chan, Fired, Select};
///
/// warren::block_on(async {
///     let numbers = chan(1);
///     let words = chan::<&str>(1);
///     numbers.send(7).await;
///
///     let mut select = Select::new();
///     let number = select.recv(&numbers);
///     let _word = select.recv(&words);
///     assert_eq!(select.await, Fired::Case(number.index()));
///     assert_eq!(number.take(), Some(7));
/// })
/// .unwrap();
/// ```
#[must_use = "a select does nothing unless awaited"]
pub struct Select<'a> {
    cases: Vec<Case<'a>>,
    default: bool,
    state: State,
}

enum State {
    Idle,
    Parked(Rc<Signal>),
    Done,
}

/// A case is fixed to one kind of operation when it is added.
enum Case<'a> {
    Recv(Box<dyn Operation + 'a>),
    Send(Box<dyn Operation + 'a>),
}

/// Which case a [`Select`] completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fired {
    Case(usize),
    Default,
}

impl Fired {
    /// The index of the completed case, `None` for the default case.
    #[must_use]
    pub fn index(self) -> Option<usize> {
        match self {
            Fired::Case(index) => Some(index),
            Fired::Default => None,
        }
    }
}

/// A receive case. Holds the received value once the case completed.
pub struct RecvCase<T> {
    index: usize,
    slot: Rc<RefCell<Option<T>>>,
}

/// A send case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendCase {
    index: usize,
}

/// The default case. It completes only when no other case is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultCase;

impl<T> RecvCase<T> {
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The received value. `None` if the case completed because the channel
    /// was closed, or if another case completed.
    #[must_use]
    pub fn take(&self) -> Option<T> {
        self.slot.borrow_mut().take()
    }

    /// Like [`take`](RecvCase::take), with the zero value and `false` when
    /// there is no value.
    #[must_use]
    pub fn take_ok(&self) -> (T, bool)
    where
        T: Default,
    {
        match self.take() {
            Some(value) => (value, true),
            None => (T::default(), false),
        }
    }
}

impl SendCase {
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<'a> Select<'a> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Select<'a> {
        Select {
            cases: Vec::new(),
            default: false,
            state: State::Idle,
        }
    }

    /// Adds a case receiving from `chan`.
    pub fn recv<T>(&mut self, chan: &'a Chan<T>) -> RecvCase<T> {
        let slot = Rc::new(RefCell::new(None));
        let index = self.push(Case::Recv(Box::new(RecvOp {
            chan,
            slot: slot.clone(),
            waiter: None,
        })));
        RecvCase { index, slot }
    }

    /// Adds a case sending `value` on `chan`. The value is dropped if
    /// another case completes.
    pub fn send<T>(&mut self, chan: &'a Chan<T>, value: T) -> SendCase {
        let index = self.push(Case::Send(Box::new(SendOp {
            chan,
            value: Some(value),
            waiter: None,
        })));
        SendCase { index }
    }

    /// Adds the default case.
    ///
    /// # Panics
    /// If the select already has a default case.
    pub fn default(&mut self) -> DefaultCase {
        assert!(!self.default, "select has more than one default case");
        self.default = true;
        DefaultCase
    }

    fn push(&mut self, case: Case<'a>) -> usize {
        assert!(
            matches!(self.state, State::Idle),
            "cases cannot be added to a select that was already polled"
        );
        self.cases.push(case);
        self.cases.len() - 1
    }

    /// Completes a ready case right away, if there is one.
    fn scan(&mut self) -> Option<usize> {
        let mut ready = Vec::new();
        for (index, case) in self.cases.iter().enumerate() {
            if case.is_ready() {
                ready.push(index);
            }
        }
        let index = match ready.len() {
            0 => return None,
            1 => ready[0],
            n => ready[random(n)],
        };
        self.cases[index].op().complete();
        Some(index)
    }

    fn unpark_all(&mut self) {
        for case in &mut self.cases {
            case.op().unpark();
        }
    }
}

impl Future for Select<'_> {
    type Output = Fired;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Fired> {
        let this = self.get_mut();
        match &this.state {
            State::Done => panic!("`Select` polled after completion"),
            State::Parked(signal) => {
                let Some(Fire { case, closed }) = signal.fired() else {
                    signal.set_waker(cx.waker());
                    return Poll::Pending;
                };
                this.state = State::Done;
                this.unpark_all();
                tracing::trace!(case, closed, "select fired");
                this.cases[case].op().finish(closed);
                Poll::Ready(Fired::Case(case))
            }
            State::Idle => {
                if let Some(case) = this.scan() {
                    this.state = State::Done;
                    return Poll::Ready(Fired::Case(case));
                }
                if this.default {
                    this.state = State::Done;
                    return Poll::Ready(Fired::Default);
                }
                let signal = Signal::new(cx.waker());
                for (index, case) in this.cases.iter_mut().enumerate() {
                    case.op().park(&signal, index);
                }
                this.state = State::Parked(signal);
                Poll::Pending
            }
        }
    }
}

impl Drop for Select<'_> {
    fn drop(&mut self) {
        if let State::Parked(signal) = &self.state {
            signal.cancel();
            self.unpark_all();
        }
    }
}

impl fmt::Debug for Select<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Select")
            .field("cases", &self.cases.len())
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

impl<'a> Case<'a> {
    fn op(&mut self) -> &mut (dyn Operation + 'a) {
        match self {
            Case::Recv(op) | Case::Send(op) => &mut **op,
        }
    }

    fn is_ready(&self) -> bool {
        match self {
            Case::Recv(op) => op.is_ready(),
            Case::Send(op) => {
                if op.is_closed() {
                    fatal(RuntimeError::SendOnClosed);
                }
                op.is_ready()
            }
        }
    }
}

/// One channel operation of a select.
trait Operation {
    fn is_closed(&self) -> bool;
    /// Whether the operation would complete without parking.
    fn is_ready(&self) -> bool;
    /// Completes a ready operation.
    fn complete(&mut self);
    /// Queues the operation on its channel.
    fn park(&mut self, signal: &Rc<Signal>, case: usize);
    /// Removes the operation from its channel's queue, if it is still there.
    fn unpark(&mut self);
    /// Finishes an operation whose queue entry was fired.
    fn finish(&mut self, closed: bool);
}

struct RecvOp<'a, T> {
    chan: &'a Chan<T>,
    slot: Rc<RefCell<Option<T>>>,
    waiter: Option<u64>,
}

struct SendOp<'a, T> {
    chan: &'a Chan<T>,
    value: Option<T>,
    waiter: Option<u64>,
}

impl<T> Operation for RecvOp<'_, T> {
    fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }

    fn is_ready(&self) -> bool {
        self.chan.recv_ready()
    }

    fn complete(&mut self) {
        // a ready channel that turns out closed and drained leaves the slot empty
        if let Ok(value) = self.chan.try_recv() {
            *self.slot.borrow_mut() = Some(value);
        }
    }

    fn park(&mut self, signal: &Rc<Signal>, case: usize) {
        self.waiter = Some(self.chan.park_receiver(&self.slot, signal, case));
    }

    fn unpark(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.chan.unpark(id);
        }
    }

    // the sender already filled the slot, a close leaves it empty
    fn finish(&mut self, _closed: bool) {}
}

impl<T> Operation for SendOp<'_, T> {
    fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }

    fn is_ready(&self) -> bool {
        self.chan.send_ready()
    }

    fn complete(&mut self) {
        let Some(value) = self.value.take() else {
            return;
        };
        if self.chan.try_send(value).is_err() {
            unreachable!("a ready send case could not send. This is a bug in warren.");
        }
    }

    fn park(&mut self, signal: &Rc<Signal>, case: usize) {
        if let Some(value) = self.value.take() {
            self.waiter = Some(self.chan.park_sender(value, signal, case));
        }
    }

    fn unpark(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.chan.unpark(id);
        }
    }

    fn finish(&mut self, closed: bool) {
        if closed {
            fatal(RuntimeError::SendOnClosed);
        }
    }
}
