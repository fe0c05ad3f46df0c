//! Buffer pool tests: permits, exhaustion, cross-thread hand-back

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use aq_node::mux::{BufferPool, SinkId};

#[test]
fn test_buffer_returns_after_last_permit() {
    let pool = BufferPool::<3, 16>::new();
    let leased = pool.try_lease(b"pm25=4").unwrap();
    assert_eq!(pool.available(), 2);

    assert!(!pool.release(leased.index, SinkId::Console));
    assert_eq!(pool.available(), 2);
    assert_eq!(pool.permits(leased.index), SinkId::Wifi.bit());

    // Console gave its permit back; only wifi may still read
    assert_eq!(pool.with_payload(leased.index, SinkId::Console, |p| p.len()), None);
    assert_eq!(
        pool.with_payload(leased.index, SinkId::Wifi, |p| p.to_vec()),
        Some(b"pm25=4".to_vec())
    );

    assert!(pool.release(leased.index, SinkId::Wifi));
    assert_eq!(pool.available(), 3);
    assert_eq!(pool.permits(leased.index), 0);
}

#[test]
fn test_release_order_does_not_matter() {
    let pool = BufferPool::<1, 8>::new();
    let leased = pool.try_lease(b"x").unwrap();

    assert!(!pool.release(leased.index, SinkId::Wifi));
    assert!(pool.release(leased.index, SinkId::Console));
    assert_eq!(pool.available(), 1);
}

#[test]
fn test_exhaustion_and_reuse() {
    let pool = BufferPool::<2, 8>::new();
    let a = pool.try_lease(b"a").unwrap();
    let b = pool.try_lease(b"b").unwrap();
    assert_ne!(a.index, b.index);
    assert!(pool.try_lease(b"c").is_none());

    for sink in SinkId::ALL {
        pool.release(b.index, sink);
    }
    let c = pool.try_lease(b"c").unwrap();
    assert_eq!(c.index, b.index);
    assert_eq!(pool.with_payload(c.index, SinkId::Console, |p| p.to_vec()), Some(b"c".to_vec()));
}

#[test]
fn test_out_of_range_index_is_ignored() {
    let pool = BufferPool::<2, 8>::new();
    assert!(!pool.release(99, SinkId::Console));
    assert_eq!(pool.permits(99), 0);
    assert_eq!(pool.with_payload(99, SinkId::Wifi, |_| ()), None);
    assert_eq!(pool.available(), 2);
}

#[test]
fn test_message_longer_than_buffer_is_truncated() {
    let pool = BufferPool::<1, 4>::new();
    let leased = pool.try_lease(b"temperature").unwrap();

    assert!(leased.truncated);
    assert_eq!(leased.len, 4);
    assert_eq!(pool.with_payload(leased.index, SinkId::Wifi, |p| p.to_vec()), Some(b"temp".to_vec()));
}

static SHARED: BufferPool<1, 8> = BufferPool::new();

#[test]
fn test_lease_with_waits_for_release() {
    let first = SHARED.try_lease(b"first").unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let producer = s.spawn(|| {
            let leased = SHARED.lease_with(b"second", thread::yield_now);
            done.store(true, Ordering::SeqCst);
            leased
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!done.load(Ordering::SeqCst));

        SHARED.release(first.index, SinkId::Console);
        SHARED.release(first.index, SinkId::Wifi);

        let second = producer.join().unwrap();
        assert_eq!(second.index, first.index);
        assert_eq!(
            SHARED.with_payload(second.index, SinkId::Console, |p| p.to_vec()),
            Some(b"second".to_vec())
        );
    });
}
