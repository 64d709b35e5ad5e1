use crossbeam_channel::Sender;
use std::sync::Arc;
use std::task::{Wake, Waker};

/// Wakers only carry the task id. The id goes through the executor's inbox,
/// so a waker may be moved to and woken from any thread.
struct TaskWaker {
    id: usize,
    inbox: Sender<usize>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }
    fn wake_by_ref(self: &Arc<Self>) {
        // the inbox only disconnects once the runtime is gone,
        // and then there is nobody left to wake.
        let _ = self.inbox.send(self.id);
    }
}

pub(crate) fn waker(id: usize, inbox: Sender<usize>) -> Waker {
    Waker::from(Arc::new(TaskWaker { id, inbox }))
}
