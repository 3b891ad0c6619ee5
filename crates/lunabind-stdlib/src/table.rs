//! `tablex` library
//!
//! Script-facing wrappers over [`lunabind::table::algorithms`]. A non-table
//! argument where a table is required is a malformed argument: the function
//! returns its conventional empty result instead of raising.

use std::ffi::c_int;

use lunabind::table::algorithms;
use lunabind::{BridgeResult, LuaTable, LuaType, NativeFunction, Stack, State};

/// Publish `tablex` as a global table
pub fn open_tablex(state: &State) -> BridgeResult<LuaTable> {
    let max_depth = state.options().max_depth;
    let tablex = state.new_table(Some("tablex"))?;

    tablex.set(
        "deepcopy",
        NativeFunction::raw(move |stack| deep_copy(stack, max_depth)),
    )?;
    tablex.set("copy", NativeFunction::raw(copy))?;
    tablex.set("clean", NativeFunction::raw(clean))?;
    tablex.set("size", NativeFunction::raw(size))?;
    tablex.set("keys", NativeFunction::raw(keys))?;
    tablex.set("vals", NativeFunction::raw(values))?;
    tablex.set("kvals", NativeFunction::raw(key_values))?;
    tablex.set("push", NativeFunction::raw(push))?;
    tablex.set("join", NativeFunction::raw(join))?;
    tablex.set("indexof", NativeFunction::raw(index_of))?;
    tablex.set("erase", NativeFunction::raw(erase))?;
    tablex.set("slice", NativeFunction::raw(slice))?;
    tablex.set("is_array", NativeFunction::raw(is_array))?;

    let functions = tablex.size()?;
    tracing::debug!(functions, "tablex opened");
    Ok(tablex)
}

fn is_table(stack: &Stack, index: c_int) -> bool {
    stack.type_of(index) == LuaType::Table
}

/// Make slot 2 the destination table, creating it when absent
fn destination(stack: &Stack) -> BridgeResult<()> {
    if !is_table(stack, 2) {
        stack.check_space(1)?;
        stack.set_top(1);
        stack.new_table(0, 8);
    }
    Ok(())
}

/// `deepcopy(src [, dst]) -> dst`
fn deep_copy(stack: &Stack, max_depth: usize) -> BridgeResult<c_int> {
    destination(stack)?;
    if is_table(stack, 1) {
        algorithms::deep_copy(stack, 1, 2, max_depth)?;
    }
    stack.set_top(2);
    Ok(1)
}

/// `copy(src [, dst]) -> dst`
fn copy(stack: &Stack) -> BridgeResult<c_int> {
    destination(stack)?;
    if is_table(stack, 1) {
        algorithms::shallow_copy(stack, 1, 2)?;
    }
    stack.set_top(2);
    Ok(1)
}

/// `clean(t)`
fn clean(stack: &Stack) -> BridgeResult<c_int> {
    if is_table(stack, 1) {
        algorithms::clean(stack, 1)?;
    }
    Ok(0)
}

/// `size(t) -> n`
fn size(stack: &Stack) -> BridgeResult<c_int> {
    let n = if is_table(stack, 1) {
        algorithms::size(stack, 1)?
    } else {
        0
    };
    stack.check_space(1)?;
    stack.push_integer(n as i64);
    Ok(1)
}

fn snapshot(stack: &Stack, take: fn(&Stack, c_int) -> BridgeResult<()>) -> BridgeResult<c_int> {
    if is_table(stack, 1) {
        take(stack, 1)?;
    } else {
        stack.check_space(1)?;
        stack.new_table(0, 0);
    }
    Ok(1)
}

/// `keys(t) -> {k...}`
fn keys(stack: &Stack) -> BridgeResult<c_int> {
    snapshot(stack, algorithms::keys)
}

/// `vals(t) -> {v...}`
fn values(stack: &Stack) -> BridgeResult<c_int> {
    snapshot(stack, algorithms::values)
}

/// `kvals(t) -> {k, v, ...}`
fn key_values(stack: &Stack) -> BridgeResult<c_int> {
    snapshot(stack, algorithms::key_values)
}

/// `push(t, ...) -> count`
fn push(stack: &Stack) -> BridgeResult<c_int> {
    let top = stack.top();
    let count = if is_table(stack, 1) {
        algorithms::push_back(stack, 1, 2, top)?
    } else {
        0
    };
    stack.check_space(1)?;
    stack.push_integer(count as i64);
    Ok(1)
}

/// `join(dst, src) -> dst`
fn join(stack: &Stack) -> BridgeResult<c_int> {
    if is_table(stack, 1) && is_table(stack, 2) {
        algorithms::join(stack, 1, 2)?;
    }
    stack.set_top(1);
    Ok(1)
}

/// `indexof(t, v) -> key | nil`
fn index_of(stack: &Stack) -> BridgeResult<c_int> {
    stack.set_top(2);
    if is_table(stack, 1) && algorithms::index_of(stack, 1, 2)? {
        return Ok(1);
    }
    stack.check_space(1)?;
    stack.push_nil();
    Ok(1)
}

/// `erase(t, v [, once]) -> count`
fn erase(stack: &Stack) -> BridgeResult<c_int> {
    stack.set_top(3);
    let once = stack.to_bool(3);
    let removed = if is_table(stack, 1) {
        algorithms::erase(stack, 1, 2, once)?
    } else {
        0
    };
    stack.push_integer(removed as i64);
    Ok(1)
}

/// `slice(t, start [, end]) -> {...}`; nothing for an empty range
fn slice(stack: &Stack) -> BridgeResult<c_int> {
    if !is_table(stack, 1) {
        return Ok(0);
    }
    let start = stack.to_integer(2).unwrap_or(1);
    let end = stack.to_integer(3);
    Ok(algorithms::slice(stack, 1, start, end)? as c_int)
}

/// `is_array(t [, empty_as_array]) -> bool`
fn is_array(stack: &Stack) -> BridgeResult<c_int> {
    let empty_as_array = stack.to_bool(2);
    let result = algorithms::is_array(stack, 1, empty_as_array);
    stack.check_space(1)?;
    stack.push_bool(result);
    Ok(1)
}
