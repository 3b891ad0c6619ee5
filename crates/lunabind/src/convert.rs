//! Conversion traits between Rust values and runtime values
//!
//! Dispatch happens on the Rust type at each conversion site, never by
//! inspecting the runtime value first:
//!
//! - [`ToLua`] pushes one value
//! - [`FromLua`] reads one value from a stack slot
//! - [`ToLuaMulti`] pushes a sequence of values (call arguments, returns)
//! - [`FromLuaMulti`] reads a sequence of values; missing slots read as `nil`
//!
//! Sequences become tables whose array part is 1-based and contiguous. Maps
//! become tables filled by explicit key/value insertion, in no particular
//! order. Strings always carry their length.

use std::collections::{BTreeMap, HashMap};
use std::ffi::c_int;
use std::hash::{BuildHasher, Hash};
use std::ops::{Deref, DerefMut};

use crate::error::{BridgeError, BridgeResult};
use crate::stack::{LuaType, Stack};

/// Push a Rust value onto the runtime stack.
///
/// On error nothing is left on the stack.
pub trait ToLua {
    /// Push exactly one value
    fn push_lua(self, stack: &Stack) -> BridgeResult<()>;
}

/// Read a Rust value from a runtime stack slot.
///
/// Reading never changes the stack depth.
pub trait FromLua: Sized {
    /// Convert the value at `index`
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self>;
}

/// Push a sequence of values
pub trait ToLuaMulti {
    /// Push every value in order, returning how many were pushed
    fn push_multi(self, stack: &Stack) -> BridgeResult<c_int>;
}

/// Read a sequence of values from consecutive slots
pub trait FromLuaMulti: Sized {
    /// Convert the `count` values starting at absolute index `first`
    fn read_multi(stack: &Stack, first: c_int, count: c_int) -> BridgeResult<Self>;
}

/// Run a push, truncating back to the entry depth if it fails
fn push_atomic(stack: &Stack, f: impl FnOnce() -> BridgeResult<()>) -> BridgeResult<()> {
    let top = stack.top();
    let result = f();
    if result.is_err() {
        stack.set_top(top);
    }
    result
}

/// Read slot `index`, treating anything past `last` as `nil`
fn read_slot<T: FromLua>(stack: &Stack, index: c_int, last: c_int) -> BridgeResult<T> {
    if index <= last {
        return T::read(stack, index);
    }
    let _guard = stack.guard();
    stack.check_space(1)?;
    stack.push_nil();
    T::read(stack, stack.top())
}

fn expect_table(stack: &Stack, index: c_int, expected: &str) -> BridgeResult<c_int> {
    match stack.type_of(index) {
        LuaType::Table => Ok(stack.abs_index(index)),
        other => Err(BridgeError::marshal(expected, other.name())),
    }
}

// ============================================================================
// Scalars
// ============================================================================

impl ToLua for bool {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        stack.push_bool(self);
        Ok(())
    }
}

impl FromLua for bool {
    /// Runtime truthiness: only `nil` and `false` are false
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        Ok(stack.to_bool(index))
    }
}

macro_rules! impl_integer {
    ($($ty:ty),* $(,)?) => {$(
        impl ToLua for $ty {
            fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
                let value = i64::try_from(self).map_err(|_| {
                    BridgeError::marshal("integer", concat!("out-of-range ", stringify!($ty)))
                })?;
                stack.push_integer(value);
                Ok(())
            }
        }

        impl FromLua for $ty {
            fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
                let ty = stack.type_of(index);
                if ty != LuaType::Number {
                    return Err(BridgeError::marshal(stringify!($ty), ty.name()));
                }
                let value = stack.to_integer(index).ok_or_else(|| {
                    BridgeError::marshal(stringify!($ty), "non-integral number")
                })?;
                <$ty>::try_from(value).map_err(|_| {
                    BridgeError::marshal(stringify!($ty), "out-of-range integer")
                })
            }
        }
    )*};
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl ToLua for f64 {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        stack.push_number(self);
        Ok(())
    }
}

impl FromLua for f64 {
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        stack
            .to_number(index)
            .ok_or_else(|| BridgeError::marshal("f64", stack.type_of(index).name()))
    }
}

impl ToLua for f32 {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        stack.push_number(self as f64);
        Ok(())
    }
}

impl FromLua for f32 {
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        stack
            .to_number(index)
            .map(|n| n as f32)
            .ok_or_else(|| BridgeError::marshal("f32", stack.type_of(index).name()))
    }
}

// ============================================================================
// Strings
// ============================================================================

impl ToLua for String {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        stack.push_str(&self);
        Ok(())
    }
}

impl ToLua for &String {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        stack.push_str(self);
        Ok(())
    }
}

impl ToLua for &str {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        stack.push_str(self);
        Ok(())
    }
}

impl FromLua for String {
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        let bytes = stack
            .to_bytes(index)
            .ok_or_else(|| BridgeError::marshal("string", stack.type_of(index).name()))?;
        String::from_utf8(bytes).map_err(|_| BridgeError::marshal("string", "invalid UTF-8"))
    }
}

// ============================================================================
// Option
// ============================================================================

impl<T: ToLua> ToLua for Option<T> {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        match self {
            Some(value) => value.push_lua(stack),
            None => {
                stack.push_nil();
                Ok(())
            }
        }
    }
}

impl<T: FromLua> FromLua for Option<T> {
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        if stack.type_of(index).is_nil_or_none() {
            Ok(None)
        } else {
            T::read(stack, index).map(Some)
        }
    }
}

// ============================================================================
// Sequences
// ============================================================================

fn push_sequence<T: ToLua>(
    stack: &Stack,
    len: usize,
    items: impl IntoIterator<Item = T>,
) -> BridgeResult<()> {
    push_atomic(stack, || {
        stack.check_space(3)?;
        stack.new_table(c_int::try_from(len).unwrap_or(0), 0);
        for (i, item) in items.into_iter().enumerate() {
            item.push_lua(stack)?;
            stack.raw_set_index(-2, i as i64 + 1);
        }
        Ok(())
    })
}

impl<T: ToLua> ToLua for Vec<T> {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        let len = self.len();
        push_sequence(stack, len, self)
    }
}

impl<T: ToLua + Clone> ToLua for &[T] {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        push_sequence(stack, self.len(), self.iter().cloned())
    }
}

impl<T: FromLua> FromLua for Vec<T> {
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        let table = expect_table(stack, index, "sequence")?;
        let _guard = stack.guard();
        stack.check_space(2)?;
        let len = stack.raw_len(table);
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
            stack.raw_get_index(table, i as i64);
            items.push(T::read(stack, -1)?);
            stack.pop(1);
        }
        Ok(items)
    }
}

// ============================================================================
// Maps
// ============================================================================

fn push_map<K: ToLua, V: ToLua>(
    stack: &Stack,
    len: usize,
    entries: impl IntoIterator<Item = (K, V)>,
) -> BridgeResult<()> {
    push_atomic(stack, || {
        stack.check_space(4)?;
        stack.new_table(0, c_int::try_from(len).unwrap_or(0));
        for (key, value) in entries {
            key.push_lua(stack)?;
            if !stack.is_valid_key(-1) {
                return Err(BridgeError::marshal("table key", stack.type_of(-1).name()));
            }
            value.push_lua(stack)?;
            stack.raw_set(-3);
        }
        Ok(())
    })
}

fn read_map<K: FromLua, V: FromLua>(
    stack: &Stack,
    index: c_int,
    mut insert: impl FnMut(K, V),
) -> BridgeResult<()> {
    let table = expect_table(stack, index, "map")?;
    let _guard = stack.guard();
    stack.check_space(3)?;
    stack.push_nil();
    while stack.next(table) {
        let key = K::read(stack, -2)?;
        let value = V::read(stack, -1)?;
        insert(key, value);
        stack.pop(1);
    }
    Ok(())
}

impl<K: ToLua, V: ToLua, S> ToLua for HashMap<K, V, S> {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        let len = self.len();
        push_map(stack, len, self)
    }
}

impl<K, V, S> FromLua for HashMap<K, V, S>
where
    K: FromLua + Eq + Hash,
    V: FromLua,
    S: BuildHasher + Default,
{
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        let mut map = HashMap::with_hasher(S::default());
        read_map(stack, index, |k, v| {
            map.insert(k, v);
        })?;
        Ok(map)
    }
}

impl<K: ToLua, V: ToLua> ToLua for BTreeMap<K, V> {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        let len = self.len();
        push_map(stack, len, self)
    }
}

impl<K: FromLua + Ord, V: FromLua> FromLua for BTreeMap<K, V> {
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        let mut map = BTreeMap::new();
        read_map(stack, index, |k, v| {
            map.insert(k, v);
        })?;
        Ok(map)
    }
}

// ============================================================================
// Multiple values
// ============================================================================

/// Any number of values of one type, passed or returned positionally
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> Variadic<T> {
    /// Create an empty sequence
    pub fn new() -> Self {
        Variadic(Vec::new())
    }

    /// Unwrap the values
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> Deref for Variadic<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        &self.0
    }
}

impl<T> DerefMut for Variadic<T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        &mut self.0
    }
}

impl<T> From<Vec<T>> for Variadic<T> {
    fn from(values: Vec<T>) -> Self {
        Variadic(values)
    }
}

impl<T> FromIterator<T> for Variadic<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Variadic(iter.into_iter().collect())
    }
}

impl ToLuaMulti for () {
    fn push_multi(self, _stack: &Stack) -> BridgeResult<c_int> {
        Ok(0)
    }
}

impl FromLuaMulti for () {
    fn read_multi(_stack: &Stack, _first: c_int, _count: c_int) -> BridgeResult<Self> {
        Ok(())
    }
}

impl<T: ToLua> ToLuaMulti for T {
    fn push_multi(self, stack: &Stack) -> BridgeResult<c_int> {
        stack.check_space(1)?;
        self.push_lua(stack)?;
        Ok(1)
    }
}

impl<T: FromLua> FromLuaMulti for T {
    fn read_multi(stack: &Stack, first: c_int, count: c_int) -> BridgeResult<Self> {
        read_slot(stack, first, first + count - 1)
    }
}

impl<T: ToLua> ToLuaMulti for Variadic<T> {
    fn push_multi(self, stack: &Stack) -> BridgeResult<c_int> {
        let count = c_int::try_from(self.0.len())
            .map_err(|_| BridgeError::StackOverflow)?;
        stack.check_space(count)?;
        let top = stack.top();
        for value in self.0 {
            if let Err(err) = value.push_lua(stack) {
                stack.set_top(top);
                return Err(err);
            }
        }
        Ok(count)
    }
}

impl<T: FromLua> FromLuaMulti for Variadic<T> {
    fn read_multi(stack: &Stack, first: c_int, count: c_int) -> BridgeResult<Self> {
        (first..first + count.max(0))
            .map(|index| T::read(stack, index))
            .collect::<BridgeResult<Vec<T>>>()
            .map(Variadic)
    }
}

/// A failed result is raised into the runtime as an error
impl<T: ToLuaMulti, E: Into<BridgeError>> ToLuaMulti for Result<T, E> {
    fn push_multi(self, stack: &Stack) -> BridgeResult<c_int> {
        match self {
            Ok(values) => values.push_multi(stack),
            Err(err) => Err(err.into()),
        }
    }
}

macro_rules! impl_tuple {
    ($($name:ident),+) => {
        impl<$($name: ToLua),+> ToLuaMulti for ($($name,)+) {
            #[allow(non_snake_case)]
            fn push_multi(self, stack: &Stack) -> BridgeResult<c_int> {
                let ($($name,)+) = self;
                let top = stack.top();
                let mut count: c_int = 0;
                $(
                    stack.check_space(1)?;
                    if let Err(err) = $name.push_lua(stack) {
                        stack.set_top(top);
                        return Err(err);
                    }
                    count += 1;
                )+
                Ok(count)
            }
        }

        impl<$($name: FromLua),+> FromLuaMulti for ($($name,)+) {
            #[allow(non_snake_case, unused_assignments)]
            fn read_multi(stack: &Stack, first: c_int, count: c_int) -> BridgeResult<Self> {
                let last = first + count - 1;
                let mut index = first;
                $(
                    let $name = read_slot::<$name>(stack, index, last)?;
                    index += 1;
                )+
                Ok(($($name,)+))
            }
        }
    };
}

impl_tuple!(A);
impl_tuple!(A, B);
impl_tuple!(A, B, C);
impl_tuple!(A, B, C, D);
impl_tuple!(A, B, C, D, E);
impl_tuple!(A, B, C, D, E, F);
impl_tuple!(A, B, C, D, E, F, G);
impl_tuple!(A, B, C, D, E, F, G, H);
