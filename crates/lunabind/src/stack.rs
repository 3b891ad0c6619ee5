//! Runtime value stack access
//!
//! [`Stack`] is a copyable view over one runtime handle's value stack. It
//! wraps exactly the primitives the bridge consumes from the embedded
//! runtime: typed push/read, raw table access, the `next` traversal
//! protocol, protected calls, metatables and registry references.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────────────────────┐
//! │ value                       │  ← top (index -1)
//! │ value                       │
//! │ ...                         │
//! │ value                       │  ← bottom (index 1)
//! └─────────────────────────────┘
//! ```
//!
//! Positive indices count from the bottom of the current frame, negative
//! indices from the top. Raw operations never trigger metamethods, so none
//! of them can raise a runtime error outside a protected call (allocation
//! failure aside).

use std::ffi::{c_char, c_int, c_void, CStr};
use std::ptr::NonNull;

use mlua_sys as ffi;

use crate::error::{BridgeError, BridgeResult};

/// Pseudo-index of the runtime registry table
pub const REGISTRY_INDEX: c_int = ffi::LUA_REGISTRYINDEX;

/// Result count meaning "keep every returned value"
pub const MULTRET: c_int = ffi::LUA_MULTRET;

/// Dynamic type of a stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaType {
    /// Index refers to no slot
    None,
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// Bare pointer
    LightUserdata,
    /// Integer or float
    Number,
    /// Byte string
    String,
    /// Table
    Table,
    /// Script or native function
    Function,
    /// Full userdata (object proxies, boxed callbacks)
    Userdata,
    /// Coroutine
    Thread,
}

impl LuaType {
    fn from_raw(raw: c_int) -> Self {
        match raw {
            ffi::LUA_TNIL => LuaType::Nil,
            ffi::LUA_TBOOLEAN => LuaType::Boolean,
            ffi::LUA_TLIGHTUSERDATA => LuaType::LightUserdata,
            ffi::LUA_TNUMBER => LuaType::Number,
            ffi::LUA_TSTRING => LuaType::String,
            ffi::LUA_TTABLE => LuaType::Table,
            ffi::LUA_TFUNCTION => LuaType::Function,
            ffi::LUA_TUSERDATA => LuaType::Userdata,
            ffi::LUA_TTHREAD => LuaType::Thread,
            _ => LuaType::None,
        }
    }

    /// Runtime-facing type name
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata | LuaType::Userdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }

    /// True for `nil` and for an absent slot
    pub fn is_nil_or_none(self) -> bool {
        matches!(self, LuaType::Nil | LuaType::None)
    }
}

/// View over a runtime handle's value stack.
///
/// # Thread Safety
///
/// `Stack` is neither `Send` nor `Sync`: the runtime handle is driven by the
/// thread that owns it.
#[derive(Debug, Clone, Copy)]
pub struct Stack {
    state: NonNull<ffi::lua_State>,
}

impl Stack {
    /// Wrap a raw runtime handle.
    ///
    /// # Safety
    /// `state` must be a live handle for as long as the returned view (and
    /// its copies) is used, and every index passed to its methods must be
    /// acceptable to the runtime at the time of the call.
    ///
    /// # Panics
    /// A null handle is a fatal precondition violation.
    pub unsafe fn from_raw(state: *mut ffi::lua_State) -> Self {
        assert!(!state.is_null(), "null runtime handle");
        Self {
            state: NonNull::new_unchecked(state),
        }
    }

    /// Raw runtime handle
    #[inline]
    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self.state.as_ptr()
    }

    // ========================================================================
    // Depth
    // ========================================================================

    /// Number of slots in the current frame
    #[inline]
    pub fn top(&self) -> c_int {
        unsafe { ffi::lua_gettop(self.as_ptr()) }
    }

    /// Truncate (or nil-extend) the frame to `index` slots
    #[inline]
    pub fn set_top(&self, index: c_int) {
        unsafe { ffi::lua_settop(self.as_ptr(), index) }
    }

    /// Pop `n` values
    #[inline]
    pub fn pop(&self, n: c_int) {
        self.set_top(-n - 1);
    }

    /// Convert a relative index to an absolute one
    #[inline]
    pub fn abs_index(&self, index: c_int) -> c_int {
        unsafe { ffi::lua_absindex(self.as_ptr(), index) }
    }

    /// Ensure room for `extra` more slots
    pub fn check_space(&self, extra: c_int) -> BridgeResult<()> {
        if unsafe { ffi::lua_checkstack(self.as_ptr(), extra) } != 0 {
            Ok(())
        } else {
            Err(BridgeError::StackOverflow)
        }
    }

    /// Scope guard restoring the current depth on drop
    pub fn guard(&self) -> StackGuard<'_> {
        StackGuard::new(self)
    }

    /// Push a copy of the value at `index`
    #[inline]
    pub fn push_value(&self, index: c_int) {
        unsafe { ffi::lua_pushvalue(self.as_ptr(), index) }
    }

    /// Remove the value at `index`, shifting the ones above it down
    pub fn remove(&self, index: c_int) {
        unsafe { ffi::lua_rotate(self.as_ptr(), index, -1) };
        self.pop(1);
    }

    /// Move the top value into `index`, shifting the ones above it up
    pub fn insert(&self, index: c_int) {
        unsafe { ffi::lua_rotate(self.as_ptr(), index, 1) }
    }

    // ========================================================================
    // Types
    // ========================================================================

    /// Type of the value at `index`
    #[inline]
    pub fn type_of(&self, index: c_int) -> LuaType {
        LuaType::from_raw(unsafe { ffi::lua_type(self.as_ptr(), index) })
    }

    /// Whether the value at `index` is a number with integer subtype
    pub fn is_integer(&self, index: c_int) -> bool {
        unsafe { ffi::lua_isinteger(self.as_ptr(), index) != 0 }
    }

    /// Whether the value at `index` may be used as a table key
    pub fn is_valid_key(&self, index: c_int) -> bool {
        match self.type_of(index) {
            LuaType::Nil | LuaType::None => false,
            LuaType::Number if !self.is_integer(index) => {
                self.to_number(index).map_or(false, |n| !n.is_nan())
            }
            _ => true,
        }
    }

    // ========================================================================
    // Push
    // ========================================================================

    /// Push `nil`
    #[inline]
    pub fn push_nil(&self) {
        unsafe { ffi::lua_pushnil(self.as_ptr()) }
    }

    /// Push a boolean
    #[inline]
    pub fn push_bool(&self, value: bool) {
        unsafe { ffi::lua_pushboolean(self.as_ptr(), value as c_int) }
    }

    /// Push an integer
    #[inline]
    pub fn push_integer(&self, value: i64) {
        unsafe { ffi::lua_pushinteger(self.as_ptr(), value as ffi::lua_Integer) }
    }

    /// Push a float
    #[inline]
    pub fn push_number(&self, value: f64) {
        unsafe { ffi::lua_pushnumber(self.as_ptr(), value as ffi::lua_Number) }
    }

    /// Push a byte string; the length travels explicitly
    pub fn push_bytes(&self, bytes: &[u8]) {
        unsafe {
            ffi::lua_pushlstring(self.as_ptr(), bytes.as_ptr() as *const c_char, bytes.len());
        }
    }

    /// Push a UTF-8 string
    #[inline]
    pub fn push_str(&self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    /// Push a bare pointer
    pub fn push_light_userdata(&self, pointer: *mut c_void) {
        unsafe { ffi::lua_pushlightuserdata(self.as_ptr(), pointer) }
    }

    /// Push a native function closing over the top `upvalues` values
    pub fn push_function(&self, function: ffi::lua_CFunction, upvalues: c_int) {
        unsafe { ffi::lua_pushcclosure(self.as_ptr(), function, upvalues) }
    }

    /// Push a new table with preallocated array and hash parts
    pub fn new_table(&self, array: c_int, records: c_int) {
        unsafe { ffi::lua_createtable(self.as_ptr(), array, records) }
    }

    /// Push a new full userdata block of `size` bytes
    pub fn new_userdata(&self, size: usize) -> *mut c_void {
        unsafe { ffi::lua_newuserdatauv(self.as_ptr(), size, 0) }
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Truthiness of the value at `index`
    #[inline]
    pub fn to_bool(&self, index: c_int) -> bool {
        unsafe { ffi::lua_toboolean(self.as_ptr(), index) != 0 }
    }

    /// Integer value, if the slot holds a number with an exact integer form
    pub fn to_integer(&self, index: c_int) -> Option<i64> {
        if self.type_of(index) != LuaType::Number {
            return None;
        }
        let mut isnum: c_int = 0;
        let value = unsafe { ffi::lua_tointegerx(self.as_ptr(), index, &mut isnum) };
        (isnum != 0).then_some(value as i64)
    }

    /// Float value, if the slot holds a number
    pub fn to_number(&self, index: c_int) -> Option<f64> {
        if self.type_of(index) != LuaType::Number {
            return None;
        }
        let mut isnum: c_int = 0;
        let value = unsafe { ffi::lua_tonumberx(self.as_ptr(), index, &mut isnum) };
        (isnum != 0).then_some(value as f64)
    }

    /// Bytes of a string (numbers are coerced on a copy, never in place)
    pub fn to_bytes(&self, index: c_int) -> Option<Vec<u8>> {
        match self.type_of(index) {
            LuaType::String => Some(self.string_bytes(index)),
            LuaType::Number => {
                self.push_value(index);
                let bytes = self.string_bytes(-1);
                self.pop(1);
                Some(bytes)
            }
            _ => None,
        }
    }

    fn string_bytes(&self, index: c_int) -> Vec<u8> {
        let mut len: usize = 0;
        unsafe {
            let data = ffi::lua_tolstring(self.as_ptr(), index, &mut len);
            if data.is_null() {
                return Vec::new();
            }
            std::slice::from_raw_parts(data as *const u8, len).to_vec()
        }
    }

    /// Address of a userdata block (null for other types)
    pub fn to_userdata(&self, index: c_int) -> *mut c_void {
        unsafe { ffi::lua_touserdata(self.as_ptr(), index) }
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Replace the key on top with `t[key]` for the table at `index`
    pub fn raw_get(&self, index: c_int) -> LuaType {
        LuaType::from_raw(unsafe { ffi::lua_rawget(self.as_ptr(), index) })
    }

    /// Pop key and value and store `t[key] = value`
    pub fn raw_set(&self, index: c_int) {
        unsafe { ffi::lua_rawset(self.as_ptr(), index) }
    }

    /// Push `t[n]`
    pub fn raw_get_index(&self, index: c_int, n: i64) -> LuaType {
        LuaType::from_raw(unsafe { ffi::lua_rawgeti(self.as_ptr(), index, n as ffi::lua_Integer) })
    }

    /// Pop the top value into `t[n]`
    pub fn raw_set_index(&self, index: c_int, n: i64) {
        unsafe { ffi::lua_rawseti(self.as_ptr(), index, n as ffi::lua_Integer) }
    }

    /// Push `t[key]` for a string key
    pub fn raw_get_str(&self, index: c_int, key: &str) -> LuaType {
        let table = self.abs_index(index);
        self.push_str(key);
        self.raw_get(table)
    }

    /// Pop the top value into `t[key]` for a string key
    pub fn raw_set_str(&self, index: c_int, key: &str) {
        let table = self.abs_index(index);
        self.push_str(key);
        self.insert(-2);
        self.raw_set(table);
    }

    /// Push `t[p]` for a light-userdata key
    pub fn raw_get_pointer(&self, index: c_int, key: *const c_void) -> LuaType {
        LuaType::from_raw(unsafe { ffi::lua_rawgetp(self.as_ptr(), index, key) })
    }

    /// Pop the top value into `t[p]` for a light-userdata key
    pub fn raw_set_pointer(&self, index: c_int, key: *const c_void) {
        unsafe { ffi::lua_rawsetp(self.as_ptr(), index, key) }
    }

    /// Length of the array part (border), without metamethods
    pub fn raw_len(&self, index: c_int) -> usize {
        unsafe { ffi::lua_rawlen(self.as_ptr(), index) as usize }
    }

    /// Primitive equality, without metamethods
    pub fn raw_equal(&self, a: c_int, b: c_int) -> bool {
        unsafe { ffi::lua_rawequal(self.as_ptr(), a, b) != 0 }
    }

    /// Traversal step: pops a key, pushes the next key/value pair.
    ///
    /// Returns false (pushing nothing) once the table is exhausted.
    pub fn next(&self, index: c_int) -> bool {
        unsafe { ffi::lua_next(self.as_ptr(), index) != 0 }
    }

    // ========================================================================
    // Globals
    // ========================================================================

    /// Push the globals table
    pub fn push_globals(&self) {
        unsafe {
            ffi::lua_rawgeti(
                self.as_ptr(),
                REGISTRY_INDEX,
                ffi::LUA_RIDX_GLOBALS as ffi::lua_Integer,
            );
        }
    }

    /// Push the global `name`
    pub fn get_global(&self, name: &str) -> LuaType {
        self.push_globals();
        let ty = self.raw_get_str(-1, name);
        self.remove(-2);
        ty
    }

    /// Pop the top value into the global `name`
    pub fn set_global(&self, name: &str) {
        self.push_globals();
        self.insert(-2);
        self.raw_set_str(-2, name);
        self.pop(1);
    }

    // ========================================================================
    // Metatables
    // ========================================================================

    /// Push the registry metatable `name`, creating it if absent.
    ///
    /// Returns true when the table was created by this call.
    pub fn new_metatable(&self, name: &str) -> bool {
        if self.raw_get_str(REGISTRY_INDEX, name) == LuaType::Table {
            return false;
        }
        self.pop(1);
        self.new_table(0, 4);
        self.push_str(name);
        self.raw_set_str(-2, "__name");
        self.push_value(-1);
        self.raw_set_str(REGISTRY_INDEX, name);
        true
    }

    /// Push the metatable of the value at `index`, if it has one
    pub fn get_metatable(&self, index: c_int) -> bool {
        unsafe { ffi::lua_getmetatable(self.as_ptr(), index) != 0 }
    }

    /// Pop a table and make it the metatable of the value at `index`
    pub fn set_metatable(&self, index: c_int) {
        unsafe {
            ffi::lua_setmetatable(self.as_ptr(), index);
        }
    }

    // ========================================================================
    // Registry references
    // ========================================================================

    /// Pop the top value and pin it in the registry
    pub fn reference(&self) -> c_int {
        unsafe { ffi::luaL_ref(self.as_ptr(), REGISTRY_INDEX) }
    }

    /// Push a pinned value
    pub fn push_reference(&self, id: c_int) {
        unsafe {
            ffi::lua_rawgeti(self.as_ptr(), REGISTRY_INDEX, id as ffi::lua_Integer);
        }
    }

    /// Unpin a registry reference
    pub fn unreference(&self, id: c_int) {
        unsafe { ffi::luaL_unref(self.as_ptr(), REGISTRY_INDEX, id) }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Protected call of the function below `nargs` arguments.
    ///
    /// Returns true on success; on failure the error value is on top.
    pub fn pcall(&self, nargs: c_int, nresults: c_int) -> bool {
        unsafe { ffi::lua_pcall(self.as_ptr(), nargs, nresults, 0) == ffi::LUA_OK }
    }

    /// Compile a chunk and push it as a function.
    ///
    /// Returns true on success; on failure the error message is on top.
    pub fn load(&self, chunk: &[u8], name: &CStr) -> bool {
        let status = unsafe {
            ffi::luaL_loadbufferx(
                self.as_ptr(),
                chunk.as_ptr() as *const c_char,
                chunk.len(),
                name.as_ptr(),
                std::ptr::null(),
            )
        };
        status == ffi::LUA_OK
    }

    /// Render an error value as text
    pub fn error_message(&self, index: c_int) -> String {
        match self.to_bytes(index) {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => format!("(error object is a {} value)", self.type_of(index).name()),
        }
    }

    /// Run a full garbage-collection cycle
    pub fn collect_garbage(&self) {
        unsafe {
            ffi::lua_gc(self.as_ptr(), ffi::LUA_GCCOLLECT);
        }
    }

    /// Pseudo-index of upvalue `i` of the running native function
    #[inline]
    pub const fn upvalue_index(i: c_int) -> c_int {
        REGISTRY_INDEX - i
    }
}

/// Scoped restoration of the stack depth.
///
/// Captures the depth on construction and truncates back to it on drop, on
/// every exit path, so callers never observe growth from failed or partial
/// operations.
pub struct StackGuard<'a> {
    stack: &'a Stack,
    top: c_int,
}

impl<'a> StackGuard<'a> {
    /// Capture the current depth of `stack`
    pub fn new(stack: &'a Stack) -> Self {
        Self {
            stack,
            top: stack.top(),
        }
    }

    /// Depth that will be restored
    pub fn depth(&self) -> c_int {
        self.top
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.stack.set_top(self.top);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::State;

    #[test]
    fn test_guard_restores_depth() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let before = stack.top();
        {
            let guard = stack.guard();
            assert_eq!(guard.depth(), before);
            stack.push_integer(1);
            stack.push_str("two");
            stack.new_table(0, 0);
            assert_eq!(stack.top(), before + 3);
        }
        assert_eq!(stack.top(), before);
    }

    #[test]
    fn test_guard_restores_on_early_return() {
        fn failing(stack: &Stack) -> BridgeResult<()> {
            let _guard = stack.guard();
            stack.push_nil();
            stack.push_nil();
            Err(BridgeError::StackOverflow)
        }

        let state = State::new().unwrap();
        let stack = state.stack();
        let before = stack.top();
        assert!(failing(&stack).is_err());
        assert_eq!(stack.top(), before);
    }

    #[test]
    fn test_string_reads_carry_length() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let _guard = stack.guard();
        stack.push_bytes(b"a\0b");
        assert_eq!(stack.to_bytes(-1).unwrap(), b"a\0b".to_vec());
    }

    #[test]
    fn test_number_coercion_does_not_mutate_slot() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let _guard = stack.guard();
        stack.push_integer(42);
        assert_eq!(stack.to_bytes(-1).unwrap(), b"42".to_vec());
        assert_eq!(stack.type_of(-1), LuaType::Number);
    }

    #[test]
    fn test_raw_string_fields() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let _guard = stack.guard();
        stack.new_table(0, 1);
        stack.push_integer(7);
        stack.raw_set_str(-2, "seven");
        assert_eq!(stack.raw_get_str(-1, "seven"), LuaType::Number);
        assert_eq!(stack.to_integer(-1), Some(7));
    }

    #[test]
    fn test_globals_round_trip() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let before = stack.top();
        stack.push_str("hello");
        stack.set_global("greeting");
        assert_eq!(stack.top(), before);
        assert_eq!(stack.get_global("greeting"), LuaType::String);
        assert_eq!(stack.to_bytes(-1).unwrap(), b"hello".to_vec());
        stack.pop(1);
        assert_eq!(stack.get_global("missing"), LuaType::Nil);
        stack.pop(1);
        assert_eq!(stack.top(), before);
    }

    #[test]
    fn test_invalid_keys() {
        let state = State::new().unwrap();
        let stack = state.stack();
        let _guard = stack.guard();
        stack.push_nil();
        assert!(!stack.is_valid_key(-1));
        stack.push_number(f64::NAN);
        assert!(!stack.is_valid_key(-1));
        stack.push_number(1.5);
        assert!(stack.is_valid_key(-1));
    }
}
