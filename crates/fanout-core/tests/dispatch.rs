//! End-to-end dispatch behavior: routing, fan-out, isolation, and view
//! fidelity.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use common::{key, new_core, pack_bytes, unpack_bytes, CHATTER};

#[test]
fn test_single_publisher_single_subscriber_bytes_round_trip() {
    let core = new_core();
    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

    let received_in = Arc::clone(&received);
    let _sub = core
        .subscribe(key("foo", CHATTER), move |_, view| {
            assert_eq!(view.msg_type(), CHATTER);
            let words = view.segment(0).unwrap();
            received_in.lock().push(unpack_bytes(words));
            0
        })
        .unwrap();

    core.publish_with(&key("foo", CHATTER), |msg| {
        let words = msg.allocate_segment(16)?;
        pack_bytes(words, b"Hello, world!");
        Ok(())
    })
    .unwrap();

    core.wait_idle();

    let received = received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], b"Hello, world!");
}

#[test]
fn test_fan_out_delivers_exactly_once_per_subscriber() {
    let core = new_core();
    let counters: Vec<Arc<AtomicUsize>> =
        (0..8).map(|_| Arc::new(AtomicUsize::new(0))).collect();

    let subs: Vec<_> = counters
        .iter()
        .map(|counter| {
            let counter = Arc::clone(counter);
            core.subscribe(key("foo", CHATTER), move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            })
            .unwrap()
        })
        .collect();

    core.publish_with(&key("foo", CHATTER), |msg| {
        msg.allocate_segment(16)?;
        Ok(())
    })
    .unwrap();

    core.wait_idle();

    let total: usize = counters.iter().map(|c| c.load(Ordering::SeqCst)).sum();
    assert_eq!(total, 8);
    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    drop(subs);
    assert_eq!(core.subscriber_count(), 0);
}

#[test]
fn test_failing_subscriber_does_not_poison_peers() {
    let core = new_core();
    let invoked = Arc::new(AtomicUsize::new(0));

    let make = |code: i32| {
        let invoked = Arc::clone(&invoked);
        core.subscribe(key("foo", CHATTER), move |_, _| {
            invoked.fetch_add(1, Ordering::SeqCst);
            code
        })
        .unwrap()
    };

    let _a = make(0);
    let _b = make(42);
    let _c = make(0);

    // The error stays on the delivery side; the publisher sees success.
    core.publish_with(&key("foo", CHATTER), |msg| {
        msg.allocate_segment(16)?;
        Ok(())
    })
    .unwrap();

    core.wait_idle();
    assert_eq!(invoked.load(Ordering::SeqCst), 3);
}

#[test]
fn test_panicking_subscriber_is_isolated() {
    let core = new_core();
    let invoked = Arc::new(AtomicUsize::new(0));

    let _panicker = core
        .subscribe(key("foo", CHATTER), |_, _| panic!("deliberate test panic"))
        .unwrap();

    let invoked_in = Arc::clone(&invoked);
    let _peer = core
        .subscribe(key("foo", CHATTER), move |_, _| {
            invoked_in.fetch_add(1, Ordering::SeqCst);
            0
        })
        .unwrap();

    core.publish_with(&key("foo", CHATTER), |msg| {
        msg.allocate_segment(16)?;
        Ok(())
    })
    .unwrap();

    core.wait_idle();
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}

#[test]
fn test_no_cross_key_delivery() {
    let core = new_core();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_in = Arc::clone(&hits);
    let _sub = core
        .subscribe(key("foo", CHATTER), move |_, _| {
            hits_in.fetch_add(1, Ordering::SeqCst);
            0
        })
        .unwrap();

    // Same topic, different type.
    core.publish_with(&key("foo", CHATTER ^ 1), |msg| {
        msg.allocate_segment(16)?;
        Ok(())
    })
    .unwrap();

    // Same type, different topic.
    core.publish_with(&key("bar", CHATTER), |msg| {
        msg.allocate_segment(16)?;
        Ok(())
    })
    .unwrap();

    core.wait_idle();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_every_subscriber_reads_identical_bytes() {
    let core = new_core();
    let payload: Vec<u8> = (0..200u16).map(|i| (i % 251) as u8).collect();
    let seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

    let subs: Vec<_> = (0..4)
        .map(|_| {
            let seen = Arc::clone(&seen);
            core.subscribe(key("blob", CHATTER), move |_, view| {
                let words = view.segment(0).unwrap();
                seen.lock().push(unpack_bytes(words));
                0
            })
            .unwrap()
        })
        .collect();

    let expected = payload.clone();
    core.publish_with(&key("blob", CHATTER), move |msg| {
        let words = msg.allocate_segment(64)?;
        pack_bytes(words, &payload);
        Ok(())
    })
    .unwrap();

    core.wait_idle();

    let seen = seen.lock();
    assert_eq!(seen.len(), 4);
    for copy in seen.iter() {
        assert_eq!(*copy, expected);
    }

    drop(subs);
}

#[test]
fn test_multi_segment_message_preserves_order() {
    let core = new_core();
    let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

    let seen_in = Arc::clone(&seen);
    let _sub = core
        .subscribe(key("multi", CHATTER), move |_, view| {
            let mut firsts = seen_in.lock();
            for segment in view.segments() {
                firsts.push(segment[0]);
            }
            0
        })
        .unwrap();

    core.publish_with(&key("multi", CHATTER), |msg| {
        for tag in [100u64, 200, 300] {
            msg.allocate_segment(16)?[0] = tag;
        }
        Ok(())
    })
    .unwrap();

    core.wait_idle();
    assert_eq!(*seen.lock(), vec![100, 200, 300]);
}

#[test]
fn test_subscribers_added_after_publish_see_later_publishes() {
    let core = new_core();
    let early = Arc::new(AtomicUsize::new(0));
    let late = Arc::new(AtomicUsize::new(0));

    let publish = |core: &Arc<fanout_core::Core>| {
        core.publish_with(&key("seq", CHATTER), |msg| {
            msg.allocate_segment(16)?;
            Ok(())
        })
        .unwrap();
    };

    let early_in = Arc::clone(&early);
    let _a = core
        .subscribe(key("seq", CHATTER), move |_, _| {
            early_in.fetch_add(1, Ordering::SeqCst);
            0
        })
        .unwrap();

    publish(&core);
    core.wait_idle();

    let late_in = Arc::clone(&late);
    let _b = core
        .subscribe(key("seq", CHATTER), move |_, _| {
            late_in.fetch_add(1, Ordering::SeqCst);
            0
        })
        .unwrap();

    publish(&core);
    core.wait_idle();

    assert_eq!(early.load(Ordering::SeqCst), 2);
    assert_eq!(late.load(Ordering::SeqCst), 1);
}

#[test]
fn test_parameter_lifecycle() {
    let core = new_core();
    let params = core.params();

    params.set_int("x", 5).unwrap();
    assert_eq!(params.get_int("x").unwrap(), 5);
    assert_eq!(params.swap_int("x", 7).unwrap(), 5);
    assert_eq!(params.get_int("x").unwrap(), 7);

    assert!(matches!(
        params.set_bool("x", true),
        Err(fanout_core::Error::TypeMismatch)
    ));
    assert!(matches!(
        params.get_str("y"),
        Err(fanout_core::Error::NotFound)
    ));
}
