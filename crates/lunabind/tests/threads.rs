//! Independent states on separate threads

use std::sync::{Arc, Barrier};
use std::thread;

use lunabind::{BridgeError, ObjectPtr, State};

#[derive(Default)]
struct Counter {
    value: i64,
}

#[derive(Default)]
struct Gauge {
    level: f64,
}

#[test]
fn test_states_on_separate_threads() {
    let barrier = Arc::new(Barrier::new(2));

    let counting = {
        let barrier = barrier.clone();
        thread::spawn(move || {
            let mut counter = Counter::default();
            let state = State::new().unwrap();
            state
                .new_class::<Counter>("Meter")
                .field("value", |c: &Counter| c.value, |c: &mut Counter, v: i64| c.value = v)
                .method("bump", |c: &mut Counter, by: i64| {
                    c.value += by;
                    c.value
                })
                .register()
                .unwrap();
            let err = state.new_class::<Gauge>("Meter").register().unwrap_err();
            assert!(matches!(err, BridgeError::DuplicateClass(_)));

            state.set("meter", unsafe { ObjectPtr::new(&mut counter) }).unwrap();
            barrier.wait();
            state
                .execute("for i = 1, 1000 do meter:bump(1) end")
                .unwrap();

            let kind: String = state.eval("return tostring(meter):match('^%a+')").unwrap();
            let namespace = state.namespace::<Counter>();
            let live = state.live_objects();
            let depth = state.stack_depth();
            drop(state);
            (counter.value, kind, namespace, live, depth)
        })
    };

    let gauging = thread::spawn(move || {
        let mut gauge = Gauge::default();
        let state = State::new().unwrap();
        state
            .new_class::<Gauge>("Meter")
            .field("level", |g: &Gauge| g.level, |g: &mut Gauge, v: f64| g.level = v)
            .register()
            .unwrap();

        state.set("meter", unsafe { ObjectPtr::new(&mut gauge) }).unwrap();
        barrier.wait();
        state
            .execute("for i = 1, 1000 do meter.level = meter.level + 0.5 end")
            .unwrap();

        let has_bump: bool = state.eval("return meter.bump ~= nil").unwrap();
        let namespace = state.namespace::<Gauge>();
        let counter_namespace = state.namespace::<Counter>();
        let live = state.live_objects();
        drop(state);
        (gauge.level, has_bump, namespace, counter_namespace, live)
    });

    let (value, kind, namespace, live, depth) = counting.join().unwrap();
    assert_eq!(value, 1000);
    assert_eq!(kind, "Meter");
    assert_eq!(namespace.as_deref(), Some("Meter__"));
    assert_eq!(live, 1);
    assert_eq!(depth, 0);

    let (level, has_bump, namespace, counter_namespace, live) = gauging.join().unwrap();
    assert_eq!(level, 500.0);
    assert!(!has_bump);
    assert_eq!(namespace.as_deref(), Some("Meter__"));
    assert!(counter_namespace.is_none());
    assert_eq!(live, 1);
}
