// tests/job_queue.rs

//! Job queue ordering and cancellation

use emerge_queue::JobQueue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn test_slot_handed_to_another_thread_blocks_queue() {
    let queue = JobQueue::new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = log.clone();
    queue.put(Box::new(move |slot| {
        // Return right away; a monitor thread finishes the job later
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            first.lock().push("first done");
            slot.next();
        });
    }));

    let second = log.clone();
    queue.put(Box::new(move |slot| {
        second.lock().push("second");
        slot.next();
    }));

    assert!(queue.wait_idle(WAIT));
    assert_eq!(*log.lock(), vec!["first done", "second"]);
}

#[test]
fn test_clear_while_running_skips_later_jobs() {
    let queue = JobQueue::new().unwrap();
    let ran = Arc::new(Mutex::new(Vec::new()));
    let (started_tx, started_rx) = flume::bounded(1);

    for n in 1..=3 {
        let ran = ran.clone();
        let started_tx = started_tx.clone();
        queue.put(Box::new(move |slot| {
            let _ = started_tx.send(n);
            thread::sleep(Duration::from_millis(150));
            ran.lock().push(n);
            slot.next();
        }));
    }

    assert_eq!(started_rx.recv_timeout(WAIT).unwrap(), 1);
    assert_eq!(queue.clear(), 2);
    assert_eq!(queue.pending(), 0);

    assert!(queue.wait_idle(WAIT));
    assert_eq!(*ran.lock(), vec![1]);
    assert!(queue.is_idle());
}

#[test]
fn test_queue_keeps_working_after_clear() {
    let queue = JobQueue::new().unwrap();
    assert_eq!(queue.clear(), 0);

    let (tx, rx) = flume::unbounded();
    queue.put(Box::new(move |slot| {
        let _ = tx.send("ran");
        slot.next();
    }));

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "ran");
    assert!(queue.wait_idle(WAIT));
}
