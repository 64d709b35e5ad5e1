//! Synchronization primitives for tasks.
//!
//! Note that unlike std's, or tokio's synchronization primitives, warren's
//! are designed to be used across tasks, not across threads, so they do not implement
//! the `Send` and `Sync` traits. The wakers they store are ordinary
//! [`Waker`](std::task::Waker)s though, so a channel works from any task of any runtime.

pub use chan::{chan, Chan, TryRecvError, TrySendError};
pub use select::{DefaultCase, Fired, RecvCase, Select, SendCase};

mod chan;
mod select;
mod signal;

/// Progress of a [`select!`](crate::select!) expansion. Not public API.
#[doc(hidden)]
pub enum Step<T> {
    Fired(usize),
    Default,
    Done(T),
}

/// Waits on several channel operations and runs the arm of the one that
/// completes. See [`Select`] for the semantics.
///
/// ```
/// use warren::select;
/// use warren::sync::chan;
///
/// warren::block_on(async {
///     let numbers = chan(1);
///     let words = chan(1);
///     words.send("hello").await;
///
///     let got = select! {
///         recv(numbers) -> n => format!("number {n:?}"),
///         recv(words) -> w => format!("word {}", w.unwrap()),
///         send(numbers, 3) => String::from("sent"),
///     };
///     assert!(got == "word hello" || got == "sent");
///
///     let empty = chan::<&str>(0);
///     let got = select! {
///         recv(empty) -> w => w,
///         default => None,
///     };
///     assert_eq!(got, None);
/// })
/// .unwrap();
/// ```
///
/// A `recv` arm binds the received value as an `Option`, which is `None` if
/// the channel was closed. Arm bodies run in the enclosing async context, so
/// they can `.await`, `return` and use `?`. Channels are borrowed, so they
/// must be places rather than temporaries.
#[macro_export]
macro_rules! select {
    (@arms $sel:ident;) => {
        match $sel.await {
            $crate::sync::Fired::Case(index) => $crate::sync::Step::Fired(index),
            $crate::sync::Fired::Default => $crate::sync::Step::Default,
        }
    };
    (@arms $sel:ident; recv($ch:expr) -> $pat:pat => $($rest:tt)*) => {
        $crate::select!(@body $sel; (recv $ch, $pat); $($rest)*)
    };
    (@arms $sel:ident; send($ch:expr, $value:expr) => $($rest:tt)*) => {
        $crate::select!(@body $sel; (send $ch, $value); $($rest)*)
    };
    (@arms $sel:ident; default => $($rest:tt)*) => {
        $crate::select!(@body $sel; (default); $($rest)*)
    };

    (@body $sel:ident; $head:tt; $body:block, $($rest:tt)*) => {
        $crate::select!(@case $sel; $head; $body; $($rest)*)
    };
    (@body $sel:ident; $head:tt; $body:block $($rest:tt)*) => {
        $crate::select!(@case $sel; $head; $body; $($rest)*)
    };
    (@body $sel:ident; $head:tt; $body:expr, $($rest:tt)*) => {
        $crate::select!(@case $sel; $head; $body; $($rest)*)
    };
    (@body $sel:ident; $head:tt; $body:expr) => {
        $crate::select!(@case $sel; $head; $body;)
    };

    (@case $sel:ident; (recv $ch:expr, $pat:pat); $body:expr; $($rest:tt)*) => {{
        let case = $sel.recv(&$ch);
        match $crate::select!(@arms $sel; $($rest)*) {
            $crate::sync::Step::Fired(index) if index == case.index() => {
                let $pat = case.take();
                #[allow(unreachable_code)]
                let done = $crate::sync::Step::Done($body);
                done
            }
            step => step,
        }
    }};
    (@case $sel:ident; (send $ch:expr, $value:expr); $body:expr; $($rest:tt)*) => {{
        let case = $sel.send(&$ch, $value);
        match $crate::select!(@arms $sel; $($rest)*) {
            $crate::sync::Step::Fired(index) if index == case.index() => {
                #[allow(unreachable_code)]
                let done = $crate::sync::Step::Done($body);
                done
            }
            step => step,
        }
    }};
    (@case $sel:ident; (default); $body:expr; $($rest:tt)*) => {{
        $sel.default();
        match $crate::select!(@arms $sel; $($rest)*) {
            $crate::sync::Step::Default => {
                #[allow(unreachable_code)]
                let done = $crate::sync::Step::Done($body);
                done
            }
            step => step,
        }
    }};

    ($($arms:tt)*) => {{
        let mut select = $crate::sync::Select::new();
        match $crate::select!(@arms select; $($arms)*) {
            $crate::sync::Step::Done(value) => value,
            _ => unreachable!("select completed a case without an arm"),
        }
    }};
}
