//! Integration tests running scripts against the `tablex` and `stringx`
//! libraries

use lunabind::{BridgeError, BridgeOptions, State};
use lunabind_stdlib::open_stdlib;

fn open() -> State {
    let state = State::new().unwrap();
    open_stdlib(&state).unwrap();
    state
}

#[test]
fn test_libraries_are_global() {
    let state = open();
    assert_eq!(state.eval::<String>("return type(tablex)").unwrap(), "table");
    assert_eq!(state.eval::<String>("return type(stringx.split)").unwrap(), "function");
    assert_eq!(state.stack_depth(), 0);
}

#[test]
fn test_deepcopy_merge() {
    let state = open();
    let (x, y, b): (i64, i64, i64) = state
        .eval(
            r#"
            local dst = tablex.deepcopy({a = {y = 2}, b = 3}, {a = {x = 1}})
            return dst.a.x, dst.a.y, dst.b
            "#,
        )
        .unwrap();
    assert_eq!((x, y, b), (1, 2, 3));
}

#[test]
fn test_deepcopy_creates_destination() {
    let state = open();
    let shared: bool = state
        .eval(
            r#"
            local src = {inner = {1}}
            local copy = tablex.deepcopy(src)
            return rawequal(copy.inner, src.inner)
            "#,
        )
        .unwrap();
    assert!(!shared);

    let shared: bool = state
        .eval("local src = {inner = {}} return rawequal(tablex.copy(src).inner, src.inner)")
        .unwrap();
    assert!(shared);
}

#[test]
fn test_deepcopy_self_reference_raises() {
    let state = State::with_options(BridgeOptions {
        max_depth: 4,
        ..Default::default()
    })
    .unwrap();
    open_stdlib(&state).unwrap();
    let err = state
        .execute("local t = {} t.t = t tablex.deepcopy(t)")
        .unwrap_err();
    assert!(matches!(err, BridgeError::Invocation(_)));
    assert!(err.message().contains("depth"));
}

#[test]
fn test_erase_and_slice() {
    let state = open();
    let (all, once): (i64, i64) = state
        .eval(
            r#"
            local a = {1, 2, 1, 3, 1}
            local b = {1, 2, 1, 3, 1}
            return tablex.erase(a, 1), tablex.erase(b, 1, true)
            "#,
        )
        .unwrap();
    assert_eq!((all, once), (3, 1));

    let joined: String = state
        .eval("return table.concat(tablex.slice({'a', 'b', 'c', 'd'}, 2, 3), ',')")
        .unwrap();
    assert_eq!(joined, "b,c");
    let empty: bool = state.eval("return tablex.slice({1, 2}, 3) == nil").unwrap();
    assert!(empty);
}

#[test]
fn test_push_join_indexof() {
    let state = open();
    let (count, len, key): (i64, i64, String) = state
        .eval(
            r#"
            local t = {1}
            local n = tablex.push(t, 2, 3)
            tablex.join(t, {4, 5})
            return n, #t, tablex.indexof({name = 'v'}, 'v')
            "#,
        )
        .unwrap();
    assert_eq!((count, len, key), (2, 5, "name".to_string()));
    assert!(state.eval::<bool>("return tablex.indexof({1}, 9) == nil").unwrap());
}

#[test]
fn test_size_keys_and_clean() {
    let state = open();
    let (size, keys, kvals, after): (i64, i64, i64, i64) = state
        .eval(
            r#"
            local t = {1, 2, x = 3}
            local size = tablex.size(t)
            local keys = #tablex.keys(t)
            local kvals = #tablex.kvals(t)
            tablex.clean(t)
            return size, keys, kvals, tablex.size(t)
            "#,
        )
        .unwrap();
    assert_eq!((size, keys, kvals, after), (3, 3, 6, 0));
}

#[test]
fn test_non_table_arguments() {
    let state = open();
    let (size, keys, pushed): (i64, i64, i64) = state
        .eval("return tablex.size(5), #tablex.vals('x'), tablex.push(nil, 1)")
        .unwrap();
    assert_eq!((size, keys, pushed), (0, 0, 0));
    assert!(!state.eval::<bool>("return tablex.is_array('x')").unwrap());
    assert!(state.eval::<bool>("return tablex.is_array({}, true)").unwrap());
    assert_eq!(state.stack_depth(), 0);
}

#[test]
fn test_split() {
    let state = open();
    let joined: String = state
        .eval("return table.concat(stringx.split('a,b,,c,', ','), '|')")
        .unwrap();
    assert_eq!(joined, "a|b||c");

    let (a, b): (String, String) = state.eval("return stringx.split('k=v', '=', false)").unwrap();
    assert_eq!((a, b), ("k".to_string(), "v".to_string()));

    let pieces: i64 = state.eval("return #stringx.split('abc', '')").unwrap();
    assert_eq!(pieces, 0);
}

#[test]
fn test_string_helpers() {
    let state = open();
    let (starts, ends, title, untitle): (bool, bool, String, String) = state
        .eval(
            r#"
            return stringx.starts_with('lunabind', 'luna'),
                   stringx.ends_with('lunabind', 'x'),
                   stringx.title('hello'),
                   stringx.untitle('World')
            "#,
        )
        .unwrap();
    assert!(starts);
    assert!(!ends);
    assert_eq!(title, "Hello");
    assert_eq!(untitle, "world");
}
