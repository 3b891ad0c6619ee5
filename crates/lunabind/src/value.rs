//! Dynamically typed runtime values
//!
//! [`DynamicValue`] is an owned snapshot of one runtime value. Scalars and
//! strings are copied; tables are copied recursively into key/value pairs;
//! functions and other opaque values stay in the runtime behind a pinned
//! [`Reference`].

use std::ffi::c_int;

use crate::convert::{FromLua, ToLua};
use crate::error::{BridgeError, BridgeResult};
use crate::reference::Reference;
use crate::runtime::BridgeContext;
use crate::stack::{LuaType, Stack};

/// Owned dynamic value
#[derive(Debug, Clone)]
pub enum DynamicValue {
    /// `nil`
    Nil,
    /// Boolean
    Boolean(bool),
    /// Integer subtype number
    Integer(i64),
    /// Float subtype number
    Number(f64),
    /// Byte string
    String(Vec<u8>),
    /// Table entries in traversal order
    Table(Vec<(DynamicValue, DynamicValue)>),
    /// Function (script or native)
    Function(Reference),
    /// Opaque handle: object proxy, userdata or thread
    Object(Reference),
}

impl DynamicValue {
    /// Runtime type name
    pub fn type_name(&self) -> &'static str {
        match self {
            DynamicValue::Nil => "nil",
            DynamicValue::Boolean(_) => "boolean",
            DynamicValue::Integer(_) | DynamicValue::Number(_) => "number",
            DynamicValue::String(_) => "string",
            DynamicValue::Table(_) => "table",
            DynamicValue::Function(_) => "function",
            DynamicValue::Object(_) => "userdata",
        }
    }

    /// Check for `nil`
    pub fn is_nil(&self) -> bool {
        matches!(self, DynamicValue::Nil)
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DynamicValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as integer (floats with an exact integer value included)
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            DynamicValue::Integer(i) => Some(*i),
            DynamicValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.2e18 => Some(*n as i64),
            _ => None,
        }
    }

    /// Get as float
    pub fn as_number(&self) -> Option<f64> {
        match self {
            DynamicValue::Integer(i) => Some(*i as f64),
            DynamicValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as UTF-8 string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynamicValue::String(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Look up a table entry by key
    pub fn get(&self, key: &DynamicValue) -> Option<&DynamicValue> {
        match self {
            DynamicValue::Table(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Look up a table entry by string key
    pub fn field(&self, name: &str) -> Option<&DynamicValue> {
        self.get(&DynamicValue::from(name))
    }

    /// The contiguous 1-based array part of a table
    pub fn array_part(&self) -> Vec<&DynamicValue> {
        let mut items = Vec::new();
        let mut n = 1;
        while let Some(value) = self.get(&DynamicValue::Integer(n)) {
            if value.is_nil() {
                break;
            }
            items.push(value);
            n += 1;
        }
        items
    }

    fn push_depth(&self, stack: &Stack, depth: usize, limit: usize) -> BridgeResult<()> {
        if depth > limit {
            return Err(BridgeError::DepthExceeded(limit));
        }
        stack.check_space(3)?;
        match self {
            DynamicValue::Nil => stack.push_nil(),
            DynamicValue::Boolean(b) => stack.push_bool(*b),
            DynamicValue::Integer(i) => stack.push_integer(*i),
            DynamicValue::Number(n) => stack.push_number(*n),
            DynamicValue::String(bytes) => stack.push_bytes(bytes),
            DynamicValue::Function(r) | DynamicValue::Object(r) => r.push_onto(stack)?,
            DynamicValue::Table(entries) => {
                stack.new_table(0, c_int::try_from(entries.len()).unwrap_or(0));
                for (key, value) in entries {
                    key.push_depth(stack, depth + 1, limit)?;
                    if !stack.is_valid_key(-1) {
                        return Err(BridgeError::marshal("table key", key.type_name()));
                    }
                    value.push_depth(stack, depth + 1, limit)?;
                    stack.raw_set(-3);
                }
            }
        }
        Ok(())
    }

    fn read_depth(stack: &Stack, index: c_int, depth: usize, limit: usize) -> BridgeResult<Self> {
        if depth > limit {
            return Err(BridgeError::DepthExceeded(limit));
        }
        let value = match stack.type_of(index) {
            LuaType::None | LuaType::Nil => DynamicValue::Nil,
            LuaType::Boolean => DynamicValue::Boolean(stack.to_bool(index)),
            LuaType::Number if stack.is_integer(index) => {
                DynamicValue::Integer(stack.to_integer(index).unwrap_or_default())
            }
            LuaType::Number => DynamicValue::Number(stack.to_number(index).unwrap_or_default()),
            LuaType::String => DynamicValue::String(stack.to_bytes(index).unwrap_or_default()),
            LuaType::Function => DynamicValue::Function(Reference::pin(stack, index)?),
            LuaType::LightUserdata | LuaType::Userdata | LuaType::Thread => {
                DynamicValue::Object(Reference::pin(stack, index)?)
            }
            LuaType::Table => {
                let table = stack.abs_index(index);
                let _guard = stack.guard();
                stack.check_space(3)?;
                let mut entries = Vec::new();
                stack.push_nil();
                while stack.next(table) {
                    let key = Self::read_depth(stack, -2, depth + 1, limit)?;
                    let value = Self::read_depth(stack, -1, depth + 1, limit)?;
                    entries.push((key, value));
                    stack.pop(1);
                }
                DynamicValue::Table(entries)
            }
        };
        Ok(value)
    }
}

fn depth_limit(stack: &Stack) -> BridgeResult<usize> {
    Ok(BridgeContext::from_stack(stack)?.options.max_depth)
}

impl ToLua for DynamicValue {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        (&self).push_lua(stack)
    }
}

impl ToLua for &DynamicValue {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        let limit = depth_limit(stack)?;
        let top = stack.top();
        let result = self.push_depth(stack, 0, limit);
        if result.is_err() {
            stack.set_top(top);
        }
        result
    }
}

impl FromLua for DynamicValue {
    /// Snapshot the value; tables nested deeper than the configured limit
    /// (including self-referential ones) fail with `DepthExceeded`.
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        let limit = depth_limit(stack)?;
        Self::read_depth(stack, index, 0, limit)
    }
}

impl PartialEq for DynamicValue {
    fn eq(&self, other: &Self) -> bool {
        use DynamicValue::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (Integer(i), Number(n)) | (Number(n), Integer(i)) => (*i as f64) == *n && n.fract() == 0.0,
            (String(a), String(b)) => a == b,
            (Table(a), Table(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.iter().any(|(bk, bv)| bk == k && bv == v))
            }
            (Function(a), Function(b)) | (Object(a), Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for DynamicValue {
    fn from(b: bool) -> Self {
        DynamicValue::Boolean(b)
    }
}

impl From<i64> for DynamicValue {
    fn from(i: i64) -> Self {
        DynamicValue::Integer(i)
    }
}

impl From<i32> for DynamicValue {
    fn from(i: i32) -> Self {
        DynamicValue::Integer(i as i64)
    }
}

impl From<f64> for DynamicValue {
    fn from(n: f64) -> Self {
        DynamicValue::Number(n)
    }
}

impl From<&str> for DynamicValue {
    fn from(s: &str) -> Self {
        DynamicValue::String(s.as_bytes().to_vec())
    }
}

impl From<String> for DynamicValue {
    fn from(s: String) -> Self {
        DynamicValue::String(s.into_bytes())
    }
}

impl<T: Into<DynamicValue>> From<Option<T>> for DynamicValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(DynamicValue::Nil, Into::into)
    }
}

impl<T: Into<DynamicValue>> From<Vec<T>> for DynamicValue {
    /// Build an array-part table
    fn from(items: Vec<T>) -> Self {
        DynamicValue::Table(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (DynamicValue::Integer(i as i64 + 1), v.into()))
                .collect(),
        )
    }
}
