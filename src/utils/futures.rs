use pin_project_lite::pin_project;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

pub(crate) type Payload = Box<dyn Any + Send + 'static>;

pin_project! {
    /// Future returned by [`catch_unwind`].
    pub(crate) struct CatchUnwind<F> {
        #[pin]
        future: F,
    }
}

/// Catches unwinds raised while polling `future`. The future must not be
/// polled again once it has unwound, which this wrapper never does.
pub(crate) fn catch_unwind<F: Future>(future: F) -> CatchUnwind<F> {
    CatchUnwind { future }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, Payload>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let future = self.project().future;
        match panic::catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
            Err(err) => Poll::Ready(Err(err)),
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::catch_unwind;
    use std::future::{poll_fn, Future};
    use std::pin::pin;
    use std::sync::Arc;
    use std::task::{Context, Poll, Wake, Waker};

    struct Noop;
    impl Wake for Noop {
        fn wake(self: Arc<Self>) {}
    }

    fn poll_once<F: Future>(future: F) -> Poll<F::Output> {
        let waker = Waker::from(Arc::new(Noop));
        let mut cx = Context::from_waker(&waker);
        pin!(future).poll(&mut cx)
    }

    #[test]
    fn passes_values_through() {
        let out = poll_once(catch_unwind(async { 3 }));
        assert!(matches!(out, Poll::Ready(Ok(3))));
    }

    #[test]
    fn pending_stays_pending() {
        let out = poll_once(catch_unwind(poll_fn(|_| Poll::<()>::Pending)));
        assert!(out.is_pending());
    }

    #[test]
    fn catches_payload() {
        let out = poll_once(catch_unwind(async {
            std::panic::resume_unwind(Box::new(7u8));
        }));
        let Poll::Ready(Err(payload)) = out else {
            panic!("expected an unwind");
        };
        assert_eq!(payload.downcast_ref::<u8>(), Some(&7));
    }
}
