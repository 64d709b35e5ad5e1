use super::select::Select;
use super::signal::Signal;
use crate::unwind::fatal;
use crate::RuntimeError;
use std::{
    cell::RefCell,
    collections::VecDeque,
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    mem,
    rc::Rc,
};

/// A Go-style channel: a typed FIFO with a bounded buffer, shared by every
/// clone of the handle.
///
/// A capacity of zero makes the channel unbuffered: a send completes only
/// when a receiver takes the value, and the two tasks rendezvous.
///
/// Operations on one channel are totally ordered. Parked senders and
/// receivers are served first come, first served.
///
/// # Examples
///
/// ```rust
/// use warren::sync::Chan;
/// use warren::spawn;
///
/// #[warren::main]
/// async fn main() {
///     let ch = Chan::new(1);
///     let tx = ch.clone();
///     let tx2 = ch.clone();
///
///     spawn(async move {
///         tx.send(1).await;
///     });
///     spawn(async move {
///         tx2.send(2).await;
///     });
///
///     let msg = ch.recv().await.unwrap();
///     let msg2 = ch.recv().await.unwrap();
///     assert_eq!(3, msg + msg2);
/// }
/// ```
pub struct Chan<T>(Rc<RefCell<Inner<T>>>);

struct Inner<T> {
    cap: usize,
    /// never longer than `cap`
    buffer: VecDeque<T>,
    senders: VecDeque<SendWaiter<T>>,
    receivers: VecDeque<RecvWaiter<T>>,
    closed: bool,
    waiter_id: u64,
}

/// A parked sender and the value it is trying to send.
struct SendWaiter<T> {
    id: u64,
    case: usize,
    value: T,
    signal: Rc<Signal>,
}

/// A parked receiver. The value is handed over through `slot`.
struct RecvWaiter<T> {
    id: u64,
    case: usize,
    slot: Rc<RefCell<Option<T>>>,
    signal: Rc<Signal>,
}

/// Creates a channel with the given capacity. See [`Chan`].
#[must_use]
pub fn chan<T>(cap: usize) -> Chan<T> {
    Chan::new(cap)
}

impl<T> Chan<T> {
    #[must_use]
    pub fn new(cap: usize) -> Chan<T> {
        Chan(Rc::new(RefCell::new(Inner {
            cap,
            buffer: VecDeque::with_capacity(cap),
            senders: VecDeque::new(),
            receivers: VecDeque::new(),
            closed: false,
            waiter_id: 0,
        })))
    }

    /// Sends `value`, parking until there is a receiver or buffer room.
    ///
    /// # Panics
    /// Sending on a closed channel is a fatal error. It kills the task
    /// without running its deferred actions, and cannot be recovered.
    pub async fn send(&self, value: T) {
        let mut select = Select::new();
        select.send(self, value);
        select.await;
    }

    /// Receives a value, parking until one is available. Returns `None`
    /// once the channel is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        let mut select = Select::new();
        let case = select.recv(self);
        select.await;
        case.take()
    }

    /// Like [`recv`](Chan::recv), returning the zero value and `false` on a
    /// closed and drained channel.
    pub async fn recv_ok(&self) -> (T, bool)
    where
        T: Default,
    {
        match self.recv().await {
            Some(value) => (value, true),
            None => (T::default(), false),
        }
    }

    /// Closes the channel. Parked receivers get `None`, parked senders die
    /// with a fatal error, and buffered values can still be received.
    ///
    /// # Panics
    /// Closing a closed channel is a fatal error.
    pub fn close(&self) {
        let (senders, receivers) = {
            let mut ch = self.0.borrow_mut();
            if ch.closed {
                drop(ch);
                fatal(RuntimeError::CloseOfClosed);
            }
            ch.closed = true;
            (mem::take(&mut ch.senders), mem::take(&mut ch.receivers))
        };
        tracing::trace!(
            senders = senders.len(),
            receivers = receivers.len(),
            "channel closed"
        );
        for waiter in receivers {
            waiter.signal.fire(waiter.case, true);
        }
        for waiter in senders {
            waiter.signal.fire(waiter.case, true);
        }
    }

    /// Sends without parking.
    ///
    /// # Errors
    /// Gives the value back if the channel is full or closed. Unlike
    /// [`send`](Chan::send), a closed channel is not fatal here.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut ch = self.0.borrow_mut();
        if ch.closed {
            return Err(TrySendError::Closed(value));
        }
        if let Some(receiver) = ch.pop_receiver() {
            drop(ch);
            *receiver.slot.borrow_mut() = Some(value);
            receiver.signal.fire(receiver.case, false);
            return Ok(());
        }
        if ch.buffer.len() < ch.cap {
            ch.buffer.push_back(value);
            return Ok(());
        }
        Err(TrySendError::Full(value))
    }

    /// Receives without parking.
    ///
    /// # Errors
    /// [`TryRecvError::Empty`] if nothing is available yet,
    /// [`TryRecvError::Closed`] if the channel is closed and drained.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut ch = self.0.borrow_mut();
        if let Some(sender) = ch.pop_sender() {
            // the parked sender's value joins the back of the buffer
            let value = match ch.buffer.pop_front() {
                Some(front) => {
                    ch.buffer.push_back(sender.value);
                    front
                }
                None => sender.value,
            };
            drop(ch);
            sender.signal.fire(sender.case, false);
            return Ok(value);
        }
        if let Some(value) = ch.buffer.pop_front() {
            return Ok(value);
        }
        if ch.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn cap(&self) -> usize {
        self.0.borrow().cap
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.borrow().closed
    }

    /// A recv would complete without parking.
    pub(super) fn recv_ready(&self) -> bool {
        let ch = self.0.borrow();
        ch.closed || !ch.buffer.is_empty() || ch.senders.iter().any(|w| w.signal.is_waiting())
    }

    /// A send would complete without parking, or fail.
    pub(super) fn send_ready(&self) -> bool {
        let ch = self.0.borrow();
        ch.closed
            || ch.buffer.len() < ch.cap
            || ch.receivers.iter().any(|w| w.signal.is_waiting())
    }

    /// Parks a sender. Returns the id of its queue entry.
    pub(super) fn park_sender(&self, value: T, signal: &Rc<Signal>, case: usize) -> u64 {
        let mut ch = self.0.borrow_mut();
        let id = ch.waiter_id();
        ch.senders.push_back(SendWaiter {
            id,
            case,
            value,
            signal: signal.clone(),
        });
        id
    }

    /// Parks a receiver. Returns the id of its queue entry.
    pub(super) fn park_receiver(
        &self,
        slot: &Rc<RefCell<Option<T>>>,
        signal: &Rc<Signal>,
        case: usize,
    ) -> u64 {
        let mut ch = self.0.borrow_mut();
        let id = ch.waiter_id();
        ch.receivers.push_back(RecvWaiter {
            id,
            case,
            slot: slot.clone(),
            signal: signal.clone(),
        });
        id
    }

    /// Removes a queue entry, if it is still there.
    pub(super) fn unpark(&self, id: u64) {
        // entries are dropped outside of the borrow
        let removed = {
            let mut ch = self.0.borrow_mut();
            let sender = ch
                .senders
                .iter()
                .position(|w| w.id == id)
                .and_then(|i| ch.senders.remove(i));
            let receiver = ch
                .receivers
                .iter()
                .position(|w| w.id == id)
                .and_then(|i| ch.receivers.remove(i));
            (sender, receiver)
        };
        drop(removed);
    }
}

impl<T> Inner<T> {
    fn waiter_id(&mut self) -> u64 {
        self.waiter_id += 1;
        self.waiter_id
    }

    /// Pops the first sender still waiting, discarding inert entries.
    fn pop_sender(&mut self) -> Option<SendWaiter<T>> {
        while let Some(waiter) = self.senders.pop_front() {
            if waiter.signal.is_waiting() {
                return Some(waiter);
            }
        }
        None
    }

    fn pop_receiver(&mut self) -> Option<RecvWaiter<T>> {
        while let Some(waiter) = self.receivers.pop_front() {
            if waiter.signal.is_waiting() {
                return Some(waiter);
            }
        }
        None
    }
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Chan(self.0.clone())
    }
}

impl<T> Debug for Chan<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let ch = self.0.borrow();
        f.debug_struct("Chan")
            .field("cap", &ch.cap)
            .field("len", &ch.buffer.len())
            .field("closed", &ch.closed)
            .finish_non_exhaustive()
    }
}

impl<T> PartialEq for Chan<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for Chan<T> {}

#[derive(PartialEq, Eq, Clone, Copy)]
pub enum TrySendError<T> {
    Full(T),
    Closed(T),
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum TryRecvError {
    Empty,
    Closed,
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(value) | TrySendError::Closed(value) => value,
        }
    }
}

impl<T> Debug for TrySendError<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "Full(..)"),
            TrySendError::Closed(_) => write!(f, "Closed(..)"),
        }
    }
}

impl<T> Display for TrySendError<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "sending on a full channel"),
            TrySendError::Closed(_) => write!(f, "sending on a closed channel"),
        }
    }
}

impl Display for TryRecvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => write!(f, "receiving on an empty channel"),
            TryRecvError::Closed => write!(f, "receiving on a closed channel"),
        }
    }
}

impl Error for TryRecvError {}
impl<T> Error for TrySendError<T> {}

#[cfg(test)]
mod tests {
    use super::{chan, Chan, TryRecvError, TrySendError};
    use crate::runtime::Runtime;
    use crate::task::{spawn, yield_now};

    #[test]
    fn try_ops() {
        let ch = Chan::new(1);
        assert_eq!(ch.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(ch.try_send(1), Ok(()));
        assert_eq!(ch.try_send(2), Err(TrySendError::Full(2)));
        assert_eq!(ch.len(), 1);
        assert_eq!(ch.try_recv(), Ok(1));
        ch.close();
        assert_eq!(ch.try_send(3).map_err(TrySendError::into_inner), Err(3));
        assert_eq!(ch.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn unbuffered_never_buffers() {
        let ch = chan::<u8>(0);
        assert_eq!(ch.try_send(1), Err(TrySendError::Full(1)));
        assert!(ch.is_empty());
    }

    #[test]
    fn buffered_values_survive_close() {
        let ch = chan(2);
        ch.try_send('a').unwrap();
        ch.try_send('b').unwrap();
        ch.close();
        assert!(ch.is_closed());
        assert_eq!(ch.try_recv(), Ok('a'));
        assert_eq!(ch.try_recv(), Ok('b'));
        assert_eq!(ch.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn clones_share_state() {
        let a = chan::<()>(3);
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, chan(3));
        b.try_send(()).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a.cap(), 3);
    }

    #[test]
    #[should_panic(expected = "close of closed channel")]
    fn double_close_outside_task() {
        let ch = chan::<u8>(0);
        ch.close();
        ch.close();
    }

    #[test]
    fn chan_stress_test() {
        const N: usize = 1_000;
        let rt = Runtime::with_config(crate::runtime::Config::default().seed(1));
        rt.block_on(async {
            let ch = chan(2);
            let mut tasks = vec![];
            for i in 0..N {
                let tx = ch.clone();
                let rx = ch.clone();
                let send = spawn(async move {
                    while fastrand::f32() < 0.5 {
                        yield_now().await;
                    }
                    tx.send(i).await;
                });
                let recv = spawn(async move {
                    while fastrand::f32() < 0.5 {
                        yield_now().await;
                    }
                    rx.recv().await.unwrap()
                });
                tasks.push((send, recv));
            }
            let mut sum = 0;
            for (send, recv) in tasks {
                send.await.unwrap();
                sum += recv.await.unwrap();
            }
            assert_eq!(sum, N * (N - 1) / 2);
            assert!(ch.is_empty());
        })
        .unwrap();
    }
}
