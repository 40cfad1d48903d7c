//! Watcher lifecycle and delivery tests.

use backplane::{
    BufferConfig, BufferError, CircularBuffer, Event, EventType, FakeClock, Item, Key, RecvError,
    Watch,
};
use crossbeam_channel::select;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(100);

fn test_buffer(capacity: usize) -> CircularBuffer {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    CircularBuffer::new(BufferConfig {
        capacity,
        ..Default::default()
    })
    .unwrap()
}

fn put(key: &str) -> Event {
    Event::put(Item::new(key, b"value".to_vec()))
}

// --- Basic Delivery ---

#[test]
fn test_watcher_simple() {
    let b = test_buffer(3);
    b.set_init();

    let w = b.new_watcher(Watch::default()).unwrap();
    let init = w.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(init.kind, EventType::Init);

    b.emit(put("/1"));
    let event = w.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event.item.key, Key::from("/1"));
    assert_eq!(event.kind, EventType::Put);

    b.close();
    b.emit(put("/2"));

    select! {
        recv(w.done()) -> _ => {}
        recv(w.events()) -> event => panic!("unexpected event {:?}", event),
        default(TIMEOUT) => panic!("timeout waiting for done"),
    }
    assert_eq!(w.recv(), Err(RecvError::Closed));
}

#[test]
fn test_watcher_multi_prefix_delivers_once() {
    let b = test_buffer(3);
    b.set_init();

    let w = b
        .new_watcher(Watch::prefixes(["/a", "/a/b"]).with_queue_size(1))
        .unwrap();
    assert_eq!(w.watch().prefixes, vec![Key::from("/a")]);
    assert_eq!(w.recv_timeout(TIMEOUT).unwrap().kind, EventType::Init);

    b.emit(put("/a/b/c"));

    let event = w.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event.item.key, Key::from("/a/b/c"));
    assert_eq!(w.try_recv(), Err(RecvError::Empty));
    assert!(w.events().is_empty());
}

#[test]
fn test_watcher_filters_by_prefix() {
    let b = test_buffer(8);
    b.set_init();

    let w = b.new_watcher(Watch::prefixes(["/nodes"])).unwrap();
    assert_eq!(w.try_recv().unwrap().kind, EventType::Init);

    b.emit(put("/users/alice"));
    b.emit(put("/nodesx"));
    b.emit(put("/nodes/a"));
    b.emit(Event::delete("/nodes/a"));

    let first = w.try_recv().unwrap();
    assert_eq!(first.item.key, Key::from("/nodes/a"));
    assert_eq!(first.kind, EventType::Put);

    let second = w.try_recv().unwrap();
    assert_eq!(second.kind, EventType::Delete);
    assert!(second.item.value.is_empty());
    assert!(second.item.id > first.item.id);

    assert_eq!(w.try_recv(), Err(RecvError::Empty));
}

#[test]
fn test_deep_prefix_ignores_shallower_keys() {
    let b = test_buffer(8);
    b.set_init();

    let w = b.new_watcher(Watch::prefixes(["/a/b"])).unwrap();
    assert_eq!(w.try_recv().unwrap().kind, EventType::Init);

    b.emit(put("/a"));
    b.emit(put("/a/c"));
    assert_eq!(w.try_recv(), Err(RecvError::Empty));

    b.emit(put("/a/b"));
    assert_eq!(w.try_recv().unwrap().item.key, Key::from("/a/b"));
}

// --- Lifecycle ---

#[test]
fn test_watcher_close_removes_from_buffer() {
    let b = test_buffer(3);
    b.set_init();

    let w = b.new_watcher(Watch::default()).unwrap();
    assert_eq!(w.recv_timeout(TIMEOUT).unwrap().kind, EventType::Init);
    assert_eq!(b.watcher_count(), 1);

    w.close();
    assert_eq!(b.watcher_count(), 0);
    assert!(w.is_done());

    // Second close is a no-op.
    w.close();
    b.emit(put("/after"));
    assert_eq!(w.try_recv(), Err(RecvError::Closed));
}

#[test]
fn test_watcher_reset() {
    let b = test_buffer(3);
    b.set_init();

    let w = b.new_watcher(Watch::default()).unwrap();
    assert_eq!(w.recv_timeout(TIMEOUT).unwrap().kind, EventType::Init);

    b.emit(put("/1"));
    b.clear();

    select! {
        recv(w.done()) -> _ => {}
        default(TIMEOUT) => panic!("timeout waiting for close"),
    }
    assert!(b.is_empty());
    assert!(!b.is_initialized());

    let w2 = b.new_watcher(Watch::default()).unwrap();
    assert_eq!(w2.try_recv(), Err(RecvError::Empty));

    b.set_init();
    assert_eq!(w2.recv_timeout(TIMEOUT).unwrap().kind, EventType::Init);

    b.emit(put("/2"));
    assert_eq!(w2.recv_timeout(TIMEOUT).unwrap().item.key, Key::from("/2"));
}

#[test]
fn test_close_buffer_rejects_new_watchers() {
    let b = test_buffer(3);
    b.set_init();
    let w = b.new_watcher(Watch::default()).unwrap();

    b.close();
    assert!(w.is_done());
    assert_eq!(b.watcher_count(), 0);
    assert!(matches!(
        b.new_watcher(Watch::default()),
        Err(BufferError::Closed)
    ));
}

#[test]
fn test_watcher_outlives_buffer_handle() {
    let b = test_buffer(3);
    b.set_init();
    let w = b.new_watcher(Watch::default()).unwrap();
    drop(b);

    // Buffer state is gone; closing must still fire done.
    w.close();
    assert!(w.is_done());
}

// --- Concurrency ---

#[test]
fn test_concurrent_consumers_see_all_events_in_order() {
    const EVENTS: usize = 500;

    let b = test_buffer(16);
    b.set_init();

    let consumers: Vec<_> = (0..4)
        .map(|i| {
            let w = b
                .new_watcher(Watch::default().with_name(format!("consumer-{}", i)).with_queue_size(8))
                .unwrap();
            thread::spawn(move || {
                let mut ids = Vec::new();
                while ids.len() < EVENTS {
                    match w.recv_timeout(Duration::from_secs(5)) {
                        Ok(event) if event.kind == EventType::Init => continue,
                        Ok(event) => ids.push(event.item.id.0),
                        Err(err) => panic!("consumer stopped early: {}", err),
                    }
                }
                ids
            })
        })
        .collect();

    let writers: Vec<_> = (0..2)
        .map(|_| {
            let b = b.clone();
            thread::spawn(move || {
                for i in 0..EVENTS / 2 {
                    b.emit(put(&format!("/k/{}", i)));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    // Sequence numbers follow the single global emission order.
    let expected: Vec<u64> = (1..=EVENTS as u64).collect();
    for consumer in consumers {
        assert_eq!(consumer.join().unwrap(), expected);
    }
    assert_eq!(b.len(), 16);
}

#[test]
fn test_close_races_backlog_eviction() {
    const ROUNDS: usize = 200;
    const CLOSERS: usize = 4;

    let clock = FakeClock::new();
    let b = CircularBuffer::new(BufferConfig {
        capacity: 4,
        backlog_grace_period: Duration::from_secs(1),
        creation_grace_period: Duration::from_nanos(1),
        clock: Arc::new(clock.clone()),
        ..Default::default()
    })
    .unwrap();
    b.set_init();

    for round in 0..ROUNDS {
        let evicted_before = b.stats().evicted;

        // Init stays queued, so this event starts a backlog.
        let w = Arc::new(b.new_watcher(Watch::default().with_queue_size(1)).unwrap());
        b.emit(put("/backlog"));
        clock.advance(Duration::from_secs(2));

        let barrier = Arc::new(Barrier::new(CLOSERS + 1));
        let mut handles: Vec<_> = (0..CLOSERS)
            .map(|_| {
                let w = Arc::clone(&w);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    w.close();
                })
            })
            .collect();
        handles.push({
            let b = b.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                b.emit(put(&format!("/evict/{}", round)));
            })
        });
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(w.is_done(), "round {}: watcher not done", round);
        assert_eq!(b.watcher_count(), 0, "round {}: watcher still registered", round);
        assert!(b.stats().evicted - evicted_before <= 1);
        assert_eq!(w.try_recv(), Err(RecvError::Closed));
    }
}
