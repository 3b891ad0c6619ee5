//! Runtime table handles
//!
//! [`LuaTable`] pins a table and exposes raw access plus every algorithm in
//! [`algorithms`] as a method. The stack-level functions remain available
//! for native callbacks that already hold the tables in stack slots.

pub mod algorithms;

use std::ffi::c_int;

use crate::convert::{FromLua, ToLua, ToLuaMulti};
use crate::error::{BridgeError, BridgeResult};
use crate::reference::Reference;
use crate::runtime::BridgeContext;
use crate::stack::{LuaType, Stack};
use crate::value::DynamicValue;

/// Pinned handle to a runtime table
#[derive(Debug, Clone, PartialEq)]
pub struct LuaTable(Reference);

impl LuaTable {
    /// Underlying reference
    pub fn reference(&self) -> &Reference {
        &self.0
    }

    /// `t[key]`, without metamethods
    pub fn get<K: ToLua, V: FromLua>(&self, key: K) -> BridgeResult<V> {
        self.0.with_value(|stack, table| {
            stack.check_space(1)?;
            key.push_lua(stack)?;
            stack.raw_get(table);
            V::read(stack, -1)
        })
    }

    /// `t[key] = value`, without metamethods
    pub fn set<K: ToLua, V: ToLua>(&self, key: K, value: V) -> BridgeResult<()> {
        self.0.with_value(|stack, table| {
            stack.check_space(2)?;
            key.push_lua(stack)?;
            if !stack.is_valid_key(-1) {
                return Err(BridgeError::marshal("table key", stack.type_of(-1).name()));
            }
            value.push_lua(stack)?;
            stack.raw_set(table);
            Ok(())
        })
    }

    /// Length of the array part
    pub fn len(&self) -> BridgeResult<usize> {
        self.0.with_value(|stack, table| Ok(stack.raw_len(table)))
    }

    /// Whether the table has no entries at all
    pub fn is_empty(&self) -> BridgeResult<bool> {
        self.size().map(|n| n == 0)
    }

    /// Number of entries, by full traversal
    pub fn size(&self) -> BridgeResult<usize> {
        self.0.with_value(|stack, table| algorithms::size(stack, table))
    }

    /// Remove every entry
    pub fn clear(&self) -> BridgeResult<()> {
        self.0.with_value(|stack, table| algorithms::clean(stack, table))
    }

    /// Recursively merge this table into `dst`
    pub fn deep_copy_into(&self, dst: &LuaTable) -> BridgeResult<()> {
        self.0.with_value(|stack, src| {
            let limit = BridgeContext::from_stack(stack)?.options.max_depth;
            dst.0.push_onto(stack)?;
            algorithms::deep_copy(stack, src, -1, limit)
        })
    }

    /// Copy this table's entries into `dst`, one level deep
    pub fn copy_into(&self, dst: &LuaTable) -> BridgeResult<()> {
        self.0.with_value(|stack, src| {
            dst.0.push_onto(stack)?;
            algorithms::shallow_copy(stack, src, -1)
        })
    }

    /// Snapshot of the keys, in traversal order
    pub fn keys<K: FromLua>(&self) -> BridgeResult<Vec<K>> {
        self.0.with_value(|stack, table| {
            algorithms::keys(stack, table)?;
            Vec::<K>::read(stack, -1)
        })
    }

    /// Snapshot of the values, in traversal order
    pub fn values<V: FromLua>(&self) -> BridgeResult<Vec<V>> {
        self.0.with_value(|stack, table| {
            algorithms::values(stack, table)?;
            Vec::<V>::read(stack, -1)
        })
    }

    /// Snapshot of the entries, in traversal order
    pub fn key_values<K: FromLua, V: FromLua>(&self) -> BridgeResult<Vec<(K, V)>> {
        self.0.with_value(|stack, table| {
            algorithms::key_values(stack, table)?;
            let pairs = stack.top();
            let len = stack.raw_len(pairs) as i64;
            let mut entries = Vec::with_capacity(len as usize / 2);
            for i in (1..=len).step_by(2) {
                stack.raw_get_index(pairs, i);
                stack.raw_get_index(pairs, i + 1);
                entries.push((K::read(stack, -2)?, V::read(stack, -1)?));
                stack.pop(2);
            }
            Ok(entries)
        })
    }

    /// Append values after the array part; returns how many were appended
    pub fn push<A: ToLuaMulti>(&self, values: A) -> BridgeResult<usize> {
        self.0.with_value(|stack, table| {
            let first = stack.top() + 1;
            let count = values.push_multi(stack)?;
            algorithms::push_back(stack, table, first, first + count - 1)
        })
    }

    /// Append the array part of `src`
    pub fn append(&self, src: &LuaTable) -> BridgeResult<()> {
        self.0.with_value(|stack, dst| {
            src.0.push_onto(stack)?;
            algorithms::join(stack, dst, -1)
        })
    }

    /// Key of the first entry holding `value`
    pub fn index_of<V: ToLua>(&self, value: V) -> BridgeResult<Option<DynamicValue>> {
        self.0.with_value(|stack, table| {
            stack.check_space(1)?;
            value.push_lua(stack)?;
            if algorithms::index_of(stack, table, -1)? {
                DynamicValue::read(stack, -1).map(Some)
            } else {
                Ok(None)
            }
        })
    }

    /// Remove `value` from the array part (all occurrences, or the first
    /// with `once`); returns the number removed
    pub fn erase<V: ToLua>(&self, value: V, once: bool) -> BridgeResult<usize> {
        self.0.with_value(|stack, table| {
            stack.check_space(1)?;
            value.push_lua(stack)?;
            algorithms::erase(stack, table, -1, once)
        })
    }

    /// New table with elements `start..=end` of the array part, or `None`
    /// for an empty or inverted range
    pub fn slice(&self, start: i64, end: Option<i64>) -> BridgeResult<Option<LuaTable>> {
        self.0.with_value(|stack, table| {
            if algorithms::slice(stack, table, start, end)? {
                LuaTable::read(stack, -1).map(Some)
            } else {
                Ok(None)
            }
        })
    }

    /// Whether the table is a hole-free 1-based array
    pub fn is_array(&self, empty_as_array: bool) -> BridgeResult<bool> {
        self.0
            .with_value(|stack, table| Ok(algorithms::is_array(stack, table, empty_as_array)))
    }

    /// Read the array part
    pub fn to_vec<T: FromLua>(&self) -> BridgeResult<Vec<T>> {
        self.0.get()
    }

    /// Read every entry
    pub fn pairs<K: FromLua, V: FromLua>(&self) -> BridgeResult<Vec<(K, V)>> {
        self.0.with_value(|stack, table| {
            stack.check_space(3)?;
            let mut entries = Vec::new();
            stack.push_nil();
            while stack.next(table) {
                entries.push((K::read(stack, -2)?, V::read(stack, -1)?));
                stack.pop(1);
            }
            Ok(entries)
        })
    }
}

impl ToLua for LuaTable {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        self.0.push_onto(stack)
    }
}

impl ToLua for &LuaTable {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        self.0.push_onto(stack)
    }
}

impl FromLua for LuaTable {
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        match stack.type_of(index) {
            LuaType::Table => Ok(LuaTable(Reference::pin(stack, index)?)),
            other => Err(BridgeError::marshal("table", other.name())),
        }
    }
}
