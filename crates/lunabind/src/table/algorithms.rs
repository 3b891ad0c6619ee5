//! Table algorithms over the raw traversal protocol
//!
//! Every function takes stack indices of the tables it works on and uses
//! only raw access, so no metamethod ever runs. Traversal order is whatever
//! the runtime yields; only the 1-based array part has a defined order.
//!
//! Functions that produce a table push it and say so; all others leave the
//! stack depth unchanged.

use std::ffi::c_int;

use crate::error::{BridgeError, BridgeResult};
use crate::stack::{LuaType, Stack};

fn table_at(stack: &Stack, index: c_int) -> BridgeResult<c_int> {
    match stack.type_of(index) {
        LuaType::Table => Ok(stack.abs_index(index)),
        other => Err(BridgeError::MalformedArgument(format!(
            "table expected, got {}",
            other.name()
        ))),
    }
}

/// Recursively merge `src` into `dst`.
///
/// A nested table in `src` is merged into the table `dst` already holds at
/// that key, or into a fresh table otherwise; every other value overwrites.
/// Nesting deeper than `max_depth` (a self-referential source included)
/// stops with [`BridgeError::DepthExceeded`], leaving `dst` partially merged.
pub fn deep_copy(stack: &Stack, src: c_int, dst: c_int, max_depth: usize) -> BridgeResult<()> {
    let src = table_at(stack, src)?;
    let dst = table_at(stack, dst)?;
    let _guard = stack.guard();
    merge(stack, src, dst, 0, max_depth)
}

fn merge(stack: &Stack, src: c_int, dst: c_int, depth: usize, limit: usize) -> BridgeResult<()> {
    if depth >= limit {
        return Err(BridgeError::DepthExceeded(limit));
    }
    stack.check_space(5)?;
    stack.push_nil();
    while stack.next(src) {
        if stack.type_of(-1) == LuaType::Table {
            stack.push_value(-2);
            if stack.raw_get(dst) != LuaType::Table {
                stack.pop(1);
                stack.new_table(0, 8);
                stack.push_value(-3);
                stack.push_value(-2);
                stack.raw_set(dst);
            }
            let top = stack.top();
            merge(stack, top - 1, top, depth + 1, limit)?;
            stack.pop(1);
        } else {
            stack.push_value(-2);
            stack.push_value(-2);
            stack.raw_set(dst);
        }
        stack.pop(1);
    }
    Ok(())
}

/// Overwrite every key of `dst` with the value `src` holds, one level deep
pub fn shallow_copy(stack: &Stack, src: c_int, dst: c_int) -> BridgeResult<()> {
    let src = table_at(stack, src)?;
    let dst = table_at(stack, dst)?;
    let _guard = stack.guard();
    stack.check_space(4)?;
    stack.push_nil();
    while stack.next(src) {
        stack.push_value(-2);
        stack.push_value(-2);
        stack.raw_set(dst);
        stack.pop(1);
    }
    Ok(())
}

/// Remove every key in place
pub fn clean(stack: &Stack, table: c_int) -> BridgeResult<()> {
    let table = table_at(stack, table)?;
    let _guard = stack.guard();
    stack.check_space(4)?;
    stack.push_nil();
    while stack.next(table) {
        // Clearing existing fields is allowed mid-traversal.
        stack.push_value(-2);
        stack.push_nil();
        stack.raw_set(table);
        stack.pop(1);
    }
    Ok(())
}

/// Count entries by full traversal
pub fn size(stack: &Stack, table: c_int) -> BridgeResult<usize> {
    let table = table_at(stack, table)?;
    let _guard = stack.guard();
    stack.check_space(2)?;
    let mut count = 0;
    stack.push_nil();
    while stack.next(table) {
        count += 1;
        stack.pop(1);
    }
    Ok(count)
}

#[derive(Clone, Copy)]
enum Snapshot {
    Keys,
    Values,
    Pairs,
}

fn snapshot(stack: &Stack, table: c_int, what: Snapshot) -> BridgeResult<()> {
    let table = table_at(stack, table)?;
    stack.check_space(4)?;
    stack.new_table(0, 0);
    let result = stack.top();
    let mut n = 0;
    stack.push_nil();
    while stack.next(table) {
        if matches!(what, Snapshot::Keys | Snapshot::Pairs) {
            n += 1;
            stack.push_value(-2);
            stack.raw_set_index(result, n);
        }
        if matches!(what, Snapshot::Values | Snapshot::Pairs) {
            n += 1;
            stack.push_value(-1);
            stack.raw_set_index(result, n);
        }
        stack.pop(1);
    }
    Ok(())
}

/// Push a new array of the table's keys, in traversal order
pub fn keys(stack: &Stack, table: c_int) -> BridgeResult<()> {
    snapshot(stack, table, Snapshot::Keys)
}

/// Push a new array of the table's values, in traversal order
pub fn values(stack: &Stack, table: c_int) -> BridgeResult<()> {
    snapshot(stack, table, Snapshot::Values)
}

/// Push a new array alternating key and value, in traversal order
pub fn key_values(stack: &Stack, table: c_int) -> BridgeResult<()> {
    snapshot(stack, table, Snapshot::Pairs)
}

/// Append the values in slots `first..=last` after the array part.
///
/// Returns how many values were appended.
pub fn push_back(stack: &Stack, table: c_int, first: c_int, last: c_int) -> BridgeResult<usize> {
    let table = table_at(stack, table)?;
    let _guard = stack.guard();
    stack.check_space(1)?;
    let base = stack.raw_len(table) as i64;
    let mut count = 0;
    for slot in first..=last {
        stack.push_value(slot);
        count += 1;
        stack.raw_set_index(table, base + count as i64);
    }
    Ok(count)
}

/// Append the array part of `src` after the array part of `dst`.
///
/// `src` is left untouched, even when it is `dst` itself.
pub fn join(stack: &Stack, dst: c_int, src: c_int) -> BridgeResult<()> {
    let dst = table_at(stack, dst)?;
    let src = table_at(stack, src)?;
    let _guard = stack.guard();
    stack.check_space(1)?;
    let base = stack.raw_len(dst) as i64;
    let len = stack.raw_len(src) as i64;
    for i in 1..=len {
        stack.raw_get_index(src, i);
        stack.raw_set_index(dst, base + i);
    }
    Ok(())
}

/// Find the first entry whose value equals the value at `value`.
///
/// Pushes that entry's key and returns true; pushes nothing when absent.
/// The search is by value and yields a key, not a position.
pub fn index_of(stack: &Stack, table: c_int, value: c_int) -> BridgeResult<bool> {
    let table = table_at(stack, table)?;
    let value = stack.abs_index(value);
    stack.check_space(2)?;
    stack.push_nil();
    while stack.next(table) {
        if stack.raw_equal(-1, value) {
            stack.pop(1);
            return Ok(true);
        }
        stack.pop(1);
    }
    Ok(false)
}

/// Remove elements equal to the value at `value` from the array part,
/// shifting later elements down and clearing the vacated tail.
///
/// With `once` only the first match is removed. Returns the number removed.
pub fn erase(stack: &Stack, table: c_int, value: c_int, once: bool) -> BridgeResult<usize> {
    let table = table_at(stack, table)?;
    let value = stack.abs_index(value);
    let _guard = stack.guard();
    stack.check_space(2)?;
    let len = stack.raw_len(table) as i64;
    let mut write = 1;
    let mut removed = 0;
    for read in 1..=len {
        stack.raw_get_index(table, read);
        if (!once || removed == 0) && stack.raw_equal(-1, value) {
            removed += 1;
            stack.pop(1);
            continue;
        }
        if write != read {
            stack.raw_set_index(table, write);
        } else {
            stack.pop(1);
        }
        write += 1;
    }
    for tail in write..=len {
        stack.push_nil();
        stack.raw_set_index(table, tail);
    }
    Ok(removed)
}

/// Push a new array holding elements `start..=end` of the array part.
///
/// `start` is clamped to 1 and `end` (default: the array length) to the
/// array length. An empty or inverted range pushes nothing and returns
/// false.
pub fn slice(stack: &Stack, table: c_int, start: i64, end: Option<i64>) -> BridgeResult<bool> {
    let table = table_at(stack, table)?;
    let len = stack.raw_len(table) as i64;
    let start = start.max(1);
    let end = end.unwrap_or(len).min(len);
    if start > end {
        return Ok(false);
    }
    stack.check_space(2)?;
    stack.new_table(c_int::try_from(end - start + 1).unwrap_or(0), 0);
    let result = stack.top();
    for (n, i) in (start..=end).enumerate() {
        stack.raw_get_index(table, i);
        stack.raw_set_index(result, n as i64 + 1);
    }
    Ok(true)
}

/// Whether every key is an integer in `1..=len` and the array part has no
/// holes. An empty table counts only with `empty_as_array`.
pub fn is_array(stack: &Stack, table: c_int, empty_as_array: bool) -> bool {
    let Ok(table) = table_at(stack, table) else {
        return false;
    };
    let len = stack.raw_len(table);
    if len == 0 {
        return empty_as_array && size(stack, table).map_or(false, |n| n == 0);
    }
    let _guard = stack.guard();
    if stack.check_space(2).is_err() {
        return false;
    }
    let mut count = 0;
    stack.push_nil();
    while stack.next(table) {
        if !stack.is_integer(-2) {
            return false;
        }
        match stack.to_integer(-2) {
            Some(key) if key >= 1 && key as usize <= len => count += 1,
            _ => return false,
        }
        stack.pop(1);
    }
    count == len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{FromLua, ToLua};
    use crate::State;

    #[test]
    fn test_erase_all() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let _guard = stack.guard();
        vec![1, 2, 1, 3, 1].push_lua(&stack).unwrap();
        stack.push_integer(1);
        assert_eq!(erase(&stack, -2, -1, false).unwrap(), 3);
        stack.pop(1);
        assert_eq!(Vec::<i64>::read(&stack, -1).unwrap(), vec![2, 3]);
        assert_eq!(stack.raw_len(-1), 2);
    }

    #[test]
    fn test_erase_once() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let _guard = stack.guard();
        vec![1, 2, 1, 3, 1].push_lua(&stack).unwrap();
        stack.push_integer(1);
        assert_eq!(erase(&stack, -2, -1, true).unwrap(), 1);
        stack.pop(1);
        assert_eq!(Vec::<i64>::read(&stack, -1).unwrap(), vec![2, 1, 3, 1]);
    }

    #[test]
    fn test_slice_ranges() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let _guard = stack.guard();
        vec![10, 20, 30, 40].push_lua(&stack).unwrap();
        let source = stack.top();

        assert!(slice(&stack, source, 2, Some(3)).unwrap());
        assert_eq!(Vec::<i64>::read(&stack, -1).unwrap(), vec![20, 30]);
        stack.pop(1);

        assert!(slice(&stack, source, 3, None).unwrap());
        assert_eq!(Vec::<i64>::read(&stack, -1).unwrap(), vec![30, 40]);
        stack.pop(1);

        let before = stack.top();
        assert!(!slice(&stack, source, 3, Some(2)).unwrap());
        assert_eq!(stack.top(), before);

        assert!(slice(&stack, source, -5, Some(99)).unwrap());
        assert_eq!(Vec::<i64>::read(&stack, -1).unwrap(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_index_of_returns_key() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let _guard = stack.guard();
        vec!["a", "b", "c"].push_lua(&stack).unwrap();
        let source = stack.top();
        stack.push_str("b");
        assert!(index_of(&stack, source, -1).unwrap());
        assert_eq!(stack.to_integer(-1), Some(2));
        stack.pop(2);
        stack.push_str("z");
        let before = stack.top();
        assert!(!index_of(&stack, source, -1).unwrap());
        assert_eq!(stack.top(), before);
        assert_eq!(stack.top(), source + 1);
    }

    #[test]
    fn test_join_self() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let _guard = stack.guard();
        vec![1, 2].push_lua(&stack).unwrap();
        join(&stack, -1, -1).unwrap();
        assert_eq!(Vec::<i64>::read(&stack, -1).unwrap(), vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_is_array() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let _guard = stack.guard();
        vec![1, 2, 3].push_lua(&stack).unwrap();
        assert!(is_array(&stack, -1, false));
        stack.push_str("x");
        stack.raw_set_str(-2, "name");
        assert!(!is_array(&stack, -1, false));
        stack.new_table(0, 0);
        assert!(!is_array(&stack, -1, false));
        assert!(is_array(&stack, -1, true));
        stack.push_integer(5);
        assert!(!is_array(&stack, -1, true));
    }

    #[test]
    fn test_non_table_is_malformed() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let _guard = stack.guard();
        stack.push_integer(1);
        assert!(matches!(size(&stack, -1), Err(BridgeError::MalformedArgument(_))));
    }
}
