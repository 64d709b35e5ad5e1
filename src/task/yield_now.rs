use std::future::poll_fn;
use std::task::Poll;

/// Yields execution back to the scheduler. The task goes to the back of the
/// ready queue, so every other runnable task gets polled before it resumes.
pub async fn yield_now() {
    let mut yielded = false;
    poll_fn(|cx| {
        if yielded {
            return Poll::Ready(());
        }
        yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    })
    .await;
}
