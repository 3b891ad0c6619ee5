//! Integration tests for pinned references

use lunabind::{BridgeError, LuaType, Reference, State};

#[test]
fn test_reference_survives_global_removal() {
    let state = State::new().unwrap();
    state.execute("value = {n = 5}").unwrap();
    let pinned: Reference = state.get("value").unwrap();
    state.execute("value = nil").unwrap();
    state.collect_garbage();

    assert_eq!(pinned.type_of().unwrap(), LuaType::Table);
    state.set("again", &pinned).unwrap();
    assert_eq!(state.eval::<i64>("return again.n").unwrap(), 5);
}

#[test]
fn test_clones_share_pin() {
    let state = State::new().unwrap();
    let first = state.new_reference("shared").unwrap();
    let second = first.clone();
    assert_eq!(first, second);
    drop(first);
    assert_eq!(second.get::<String>().unwrap(), "shared");

    second.release();
    assert!(second.is_released());
}

#[test]
fn test_distinct_values_compare_unequal() {
    let state = State::new().unwrap();
    let a = state.new_reference(1).unwrap();
    let b = state.new_reference(1).unwrap();
    let c = state.new_reference(2).unwrap();
    // Equal primitive values compare raw-equal.
    assert_eq!(a, b);
    assert_ne!(a, c);

    let t1 = state.new_table(None).unwrap();
    let t2 = state.new_table(None).unwrap();
    assert_ne!(t1, t2);
}

#[test]
fn test_reference_after_close() {
    let state = State::new().unwrap();
    let pinned = state.new_reference(vec![1, 2]).unwrap();
    drop(state);
    assert!(matches!(pinned.get::<Vec<i64>>(), Err(BridgeError::Closed)));
    drop(pinned);
}

#[test]
fn test_reference_in_another_state() {
    let first = State::new().unwrap();
    let second = State::new().unwrap();
    let pinned = first.new_reference(3).unwrap();
    assert!(second.set("x", &pinned).is_err());
    assert_eq!(second.stack_depth(), 0);
}

#[test]
fn test_pins_do_not_leak_stack() {
    let state = State::new().unwrap();
    let refs: Vec<Reference> = (0..100).map(|i| state.new_reference(i).unwrap()).collect();
    assert_eq!(state.stack_depth(), 0);
    assert_eq!(refs[42].get::<i64>().unwrap(), 42);
}
