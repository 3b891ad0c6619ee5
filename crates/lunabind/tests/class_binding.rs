//! Integration tests for class binding and object identity

use lunabind::{BridgeError, ObjectPtr, Reference, State};

#[derive(Debug, Default)]
struct Counter {
    value: i64,
    label: String,
}

impl Counter {
    fn bump(&mut self, by: i64) -> i64 {
        self.value += by;
        self.value
    }
}

fn bind_counter(state: &State) {
    state
        .new_class::<Counter>("Counter")
        .field("value", |c: &Counter| c.value, |c: &mut Counter, v: i64| c.value = v)
        .readonly("label", |c: &Counter| c.label.clone())
        .method("bump", |c: &mut Counter, by: i64| c.bump(by))
        .method("reset", |c: &mut Counter| c.value = 0)
        .register()
        .unwrap();
}

#[test]
fn test_field_access() {
    let mut counter = Counter {
        value: 3,
        label: "hits".to_string(),
    };
    let state = State::new().unwrap();
    bind_counter(&state);

    let object = unsafe { ObjectPtr::new(&mut counter) };
    state.set("c", object).unwrap();
    assert_eq!(state.eval::<i64>("return c.value").unwrap(), 3);
    assert_eq!(state.eval::<String>("return c.label").unwrap(), "hits");
    assert!(state.eval::<Option<i64>>("return c.missing").unwrap().is_none());

    state.execute("c.value = 10").unwrap();
    drop(state);
    assert_eq!(counter.value, 10);
}

#[test]
fn test_methods() {
    let mut counter = Counter::default();
    let state = State::new().unwrap();
    bind_counter(&state);

    state.set("c", unsafe { ObjectPtr::new(&mut counter) }).unwrap();
    assert_eq!(state.eval::<i64>("c:bump(2); return c:bump(5)").unwrap(), 7);
    state.execute("c:reset()").unwrap();
    assert_eq!(state.eval::<i64>("return c.value").unwrap(), 0);
    drop(state);
    assert_eq!(counter.value, 0);
}

#[test]
fn test_readonly_and_unknown_members() {
    let mut counter = Counter::default();
    let state = State::new().unwrap();
    bind_counter(&state);
    state.set("c", unsafe { ObjectPtr::new(&mut counter) }).unwrap();

    let err = state.execute("c.label = 'x'").unwrap_err();
    assert!(err.message().contains("read-only"));
    let err = state.execute("c.nope = 1").unwrap_err();
    assert!(err.message().contains("no member"));
    let err = state.execute("c.value = 'text'").unwrap_err();
    assert!(err.message().contains("bad argument"));
}

#[test]
fn test_identity_is_preserved() {
    let mut counter = Counter::default();
    let state = State::new().unwrap();
    bind_counter(&state);

    let object = unsafe { ObjectPtr::new(&mut counter) };
    let first = state.wrap_instance(object).unwrap();
    let second = state.wrap_instance(object).unwrap();
    assert!(first.raw_equal(&second));
    assert_eq!(state.live_objects(), 1);

    state.set("a", object).unwrap();
    state.set("b", object).unwrap();
    assert!(state.eval::<bool>("return rawequal(a, b)").unwrap());

    let back: ObjectPtr<Counter> = state.get("a").unwrap();
    assert_eq!(back, object);
}

#[test]
fn test_release_makes_proxy_stale() {
    let mut counter = Counter::default();
    let state = State::new().unwrap();
    bind_counter(&state);

    let object = unsafe { ObjectPtr::new(&mut counter) };
    state.set("c", object).unwrap();
    assert!(state.release_object(object).unwrap());
    assert!(!state.release_object(object).unwrap());

    let err = state.execute("return c.value").unwrap_err();
    assert!(err.message().contains("Counter"));
    assert!(matches!(
        state.get::<ObjectPtr<Counter>>("c"),
        Err(BridgeError::StaleObject(_))
    ));
    assert!(state.eval::<String>("return tostring(c)").unwrap().contains("released"));

    // A fresh wrap gets a new, live proxy.
    state.set("d", object).unwrap();
    assert!(!state.eval::<bool>("return rawequal(c, d)").unwrap());
    assert_eq!(state.eval::<i64>("return d.value").unwrap(), 0);
}

#[test]
fn test_collected_proxy_frees_its_slot() {
    let mut counter = Counter::default();
    let state = State::new().unwrap();
    bind_counter(&state);

    let proxy: Reference = state.wrap_instance(unsafe { ObjectPtr::new(&mut counter) }).unwrap();
    assert_eq!(state.live_objects(), 1);
    drop(proxy);
    state.collect_garbage();
    state.collect_garbage();
    assert_eq!(state.live_objects(), 0);
}

#[test]
fn test_wrong_class_is_rejected() {
    #[derive(Default)]
    struct Other;

    let mut counter = Counter::default();
    let state = State::new().unwrap();
    bind_counter(&state);
    state.new_class::<Other>("Other").register().unwrap();

    state.set("c", unsafe { ObjectPtr::new(&mut counter) }).unwrap();
    assert!(matches!(
        state.get::<ObjectPtr<Other>>("c"),
        Err(BridgeError::Marshal { .. })
    ));
    assert!(state.get::<ObjectPtr<Counter>>("c").is_ok());
    assert!(state.get::<ObjectPtr<Counter>>("undefined").unwrap().is_null());
}

#[test]
fn test_registration_rules() {
    struct Twin;

    let state = State::new().unwrap();
    bind_counter(&state);
    // Registering the same type again is a no-op.
    state.new_class::<Counter>("Renamed").register().unwrap();
    assert_eq!(state.namespace::<Counter>().as_deref(), Some("Counter__"));

    let err = state.new_class::<Twin>("Counter").register().unwrap_err();
    assert!(matches!(err, BridgeError::DuplicateClass(_)));
    assert!(state.namespace::<Twin>().is_none());
}

#[test]
fn test_unregistered_class() {
    let mut value = 5_u32;
    let state = State::new().unwrap();
    let err = state.set("v", unsafe { ObjectPtr::new(&mut value) }).unwrap_err();
    assert!(matches!(err, BridgeError::UnregisteredClass(_)));
    assert_eq!(state.stack_depth(), 0);
}

#[test]
fn test_identity_key_bound() {
    let state = State::with_options(lunabind::BridgeOptions {
        max_key_len: 16,
        ..Default::default()
    })
    .unwrap();
    state.new_class::<Counter>("AVeryLongClassName").register().unwrap();

    let counter = Counter::default();
    let err = state.identity_key(&counter as *const Counter).unwrap_err();
    assert!(matches!(err, BridgeError::IdentityOverflow { limit: 16, .. }));
}
