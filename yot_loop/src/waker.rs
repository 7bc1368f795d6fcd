use crate::executor::Inbox;
use crate::task::TaskId;
use std::sync::Arc;
use std::task::{RawWaker, RawWakerVTable, Waker};

/// Wakes a task to resume execution.
///
/// The waker is the task's explicit resumption handle: whatever parks a task
/// (timer, I/O wait, queue waiter) keeps a clone and calls it exactly when the
/// task may make progress. Waking only records the task id in the loop's inbox.
pub(crate) struct WakerData {
    task: TaskId,
    inbox: Arc<Inbox>,
}

pub(crate) fn task_waker(task: TaskId, inbox: Arc<Inbox>) -> Waker {
    let ptr = Arc::into_raw(Arc::new(WakerData { task, inbox })) as *const ();
    unsafe { Waker::from_raw(RawWaker::new(ptr, &VTABLE)) }
}

unsafe fn clone(data: *const ()) -> RawWaker {
    // Bump the count without taking ownership of the existing reference.
    unsafe { Arc::increment_strong_count(data as *const WakerData) };
    RawWaker::new(data, &VTABLE)
}

unsafe fn wake(data: *const ()) {
    // Take ownership so the reference drops at the end of this function
    let data = unsafe { Arc::from_raw(data as *const WakerData) };
    data.inbox.push(data.task);
}

unsafe fn wake_by_ref(data: *const ()) {
    let data = unsafe { &*(data as *const WakerData) };
    data.inbox.push(data.task);
}

unsafe fn drop(data: *const ()) {
    let _ = unsafe { Arc::from_raw(data as *const WakerData) };
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_wake_the_same_task() {
        let poll = mio::Poll::new().unwrap();
        let inbox = Arc::new(Inbox::new(poll.registry()).unwrap());
        let waker = task_waker(TaskId(42), inbox.clone());

        let other = waker.clone();
        waker.wake_by_ref();
        other.wake();
        waker.wake();

        assert_eq!(inbox.pop(), Some(TaskId(42)));
        assert_eq!(inbox.pop(), Some(TaskId(42)));
        assert_eq!(inbox.pop(), Some(TaskId(42)));
        assert_eq!(inbox.pop(), None);
        // Only the test's own reference is left.
        assert_eq!(Arc::strong_count(&inbox), 1);
    }

    #[test]
    fn waker_can_cross_threads() {
        let poll = mio::Poll::new().unwrap();
        let inbox = Arc::new(Inbox::new(poll.registry()).unwrap());
        let waker = task_waker(TaskId(5), inbox.clone());

        std::thread::spawn(move || waker.wake()).join().unwrap();
        assert_eq!(inbox.pop(), Some(TaskId(5)));
    }
}
