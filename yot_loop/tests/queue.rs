//! Producer/consumer behaviour of `AsyncQueue`.

mod common;

use std::time::{Duration, Instant};

use common::{Log, init_test_logging};
use proptest::prelude::*;
use yot_loop::{AsyncQueue, EventLoop, Handle, QueueClosed, yield_now};

#[test]
fn producer_consumer_with_sleeps() {
    init_test_logging();
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let queue = AsyncQueue::new(&handle);
    let log = Log::new();
    let start = Instant::now();

    {
        let queue = queue.clone();
        let handle = handle.clone();
        event_loop.add_task(async move {
            for i in 0..3 {
                handle.sleep(Duration::from_millis(100)).await;
                queue.put(i).unwrap();
            }
            queue.close();
        });
    }
    {
        let log = log.clone();
        event_loop.add_task(async move {
            loop {
                match queue.get().await {
                    Ok(item) => log.push((Some(item), start.elapsed())),
                    Err(QueueClosed) => {
                        log.push((None, start.elapsed()));
                        break;
                    }
                }
            }
        });
    }
    event_loop.run();

    let entries = log.entries();
    let items: Vec<_> = entries.iter().map(|(item, _)| *item).collect();
    assert_eq!(items, vec![Some(0), Some(1), Some(2), None]);
    for (i, (_, at)) in entries.iter().take(3).enumerate() {
        assert!(*at >= Duration::from_millis(100 * (i as u64 + 1)));
    }
    let total = entries[3].1;
    assert!(total >= Duration::from_millis(300));
    assert!(total < Duration::from_secs(2), "took {total:?}");
}

#[test]
fn close_releases_exactly_one_waiter() {
    let event_loop = EventLoop::new().unwrap();
    let queue = AsyncQueue::<u32>::new(&event_loop.handle());
    let log = Log::new();

    for consumer in 0..2 {
        let queue = queue.clone();
        let log = log.clone();
        event_loop.add_task(async move {
            let result = queue.get().await;
            log.push((consumer, result));
        });
    }
    {
        let queue = queue.clone();
        event_loop.call_soon(move || queue.close());
    }
    event_loop.run();

    assert_eq!(log.entries(), vec![(0, Err(QueueClosed))]);
    assert_eq!(queue.waiters(), 1);
    assert_eq!(event_loop.suspended_tasks(), 1);
}

#[test]
fn closed_queue_drains_before_failing() {
    let event_loop = EventLoop::new().unwrap();
    let queue = AsyncQueue::new(&event_loop.handle());
    queue.put("a").unwrap();
    queue.put("b").unwrap();
    queue.close();
    assert_eq!(queue.put("c"), Err(QueueClosed));
    assert_eq!(queue.len(), 2);

    let drained = event_loop
        .block_on(async move {
            let mut out = Vec::new();
            for _ in 0..4 {
                out.push(queue.get().await);
            }
            out
        })
        .unwrap();
    assert_eq!(
        drained,
        vec![Ok("a"), Ok("b"), Err(QueueClosed), Err(QueueClosed)]
    );
}

#[test]
fn puts_before_the_waiter_resumes_keep_their_order() {
    let event_loop = EventLoop::new().unwrap();
    let queue = AsyncQueue::new(&event_loop.handle());
    let log = Log::new();
    {
        let queue = queue.clone();
        let log = log.clone();
        event_loop.add_task(async move {
            while let Ok(item) = queue.get().await {
                log.push(item);
            }
        });
    }
    {
        let queue = queue.clone();
        event_loop.add_task(async move {
            // Several puts land before the consumer gets to run.
            for i in 0..3 {
                queue.put(i).unwrap();
            }
            yield_now().await;
            queue.put(3).unwrap();
            queue.close();
        });
    }
    event_loop.run();
    assert_eq!(log.entries(), vec![0, 1, 2, 3]);
    assert!(queue.is_empty());
    assert_eq!(event_loop.suspended_tasks(), 0);
}

#[test]
fn two_consumers_share_the_work() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let queue = AsyncQueue::new(&handle);
    let log = Log::new();

    for consumer in ["left", "right"] {
        let queue = queue.clone();
        let log = log.clone();
        event_loop.add_task(async move {
            while let Ok(item) = queue.get().await {
                log.push((consumer, item));
            }
        });
    }
    {
        let queue = queue.clone();
        event_loop.add_task(async move {
            for i in 0..4 {
                handle.sleep(Duration::from_millis(5)).await;
                queue.put(i).unwrap();
            }
        });
    }
    event_loop.run();

    // Each put wakes the oldest waiter, and a served consumer rejoins at the back.
    assert_eq!(
        log.entries(),
        vec![("left", 0), ("right", 1), ("left", 2), ("right", 3)]
    );
    assert_eq!(queue.waiters(), 2);
}

fn produce(handle: Handle, queue: AsyncQueue<u32>, next: u32) {
    if next == 3 {
        queue.close();
        return;
    }
    queue.put(next).unwrap();
    let again = handle.clone();
    handle.call_later(Duration::from_millis(10), move || {
        produce(again, queue, next + 1)
    });
}

fn consume(queue: AsyncQueue<u32>, log: Log<Result<u32, QueueClosed>>) {
    let again = queue.clone();
    queue.get_with(move |result| {
        let done = result.is_err();
        log.push(result);
        if !done {
            consume(again, log);
        }
    });
}

#[test]
fn callback_chains_over_the_queue() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let queue = AsyncQueue::new(&handle);
    let log = Log::new();

    consume(queue.clone(), log.clone());
    assert_eq!(queue.waiters(), 1);
    {
        let handle = handle.clone();
        event_loop.call_soon(move || produce(handle, queue, 0));
    }
    event_loop.run();

    assert_eq!(
        log.entries(),
        vec![Ok(0), Ok(1), Ok(2), Err(QueueClosed)]
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn get_returns_items_in_put_order(items in proptest::collection::vec(any::<i32>(), 0..64)) {
        let event_loop = EventLoop::new().unwrap();
        let queue = AsyncQueue::new(&event_loop.handle());
        for &item in &items {
            queue.put(item).unwrap();
        }
        let count = items.len();
        let drained = event_loop
            .block_on(async move {
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push(queue.get().await.unwrap());
                }
                out
            })
            .unwrap();
        prop_assert_eq!(drained, items);
    }
}
