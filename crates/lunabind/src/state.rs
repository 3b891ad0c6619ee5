//! The runtime handle owned by native code
//!
//! [`State`] owns one embedded runtime together with its type registry,
//! bound classes and object proxies. It is deliberately `!Send`: a runtime
//! handle is driven only by the thread that created it. Independent states
//! may live on different threads.

use std::ffi::c_int;
use std::fmt;
use std::rc::Rc;

use crate::class::{self, ClassBuilder, ObjectPtr};
use crate::convert::{FromLua, FromLuaMulti, ToLua, ToLuaMulti};
use crate::error::{BridgeError, BridgeResult};
use crate::function::NativeFunction;
use crate::invoke::{self, ExceptionHandler};
use crate::options::BridgeOptions;
use crate::reference::Reference;
use crate::runtime::Runtime;
use crate::stack::Stack;
use crate::table::LuaTable;
use crate::types::ObjectKey;

/// An embedded runtime handle
pub struct State {
    runtime: Rc<Runtime>,
}

impl State {
    /// Create a state with default options
    pub fn new() -> BridgeResult<Self> {
        Self::with_options(BridgeOptions::default())
    }

    /// Create a state with specific options
    pub fn with_options(options: BridgeOptions) -> BridgeResult<Self> {
        options.validate()?;
        Ok(Self {
            runtime: Runtime::open(options)?,
        })
    }

    /// Stack view of the main runtime thread
    pub fn stack(&self) -> Stack {
        self.runtime.stack()
    }

    /// Options the state was created with
    pub fn options(&self) -> &BridgeOptions {
        &self.runtime.context().options
    }

    // ========================================================================
    // Globals
    // ========================================================================

    /// Assign a global (raw; no metamethods)
    pub fn set<V: ToLua>(&self, name: &str, value: V) -> BridgeResult<()> {
        let stack = self.stack();
        let _guard = stack.guard();
        stack.check_space(3)?;
        value.push_lua(&stack)?;
        stack.set_global(name);
        Ok(())
    }

    /// Read a global (raw; no metamethods)
    pub fn get<T: FromLua>(&self, name: &str) -> BridgeResult<T> {
        let stack = self.stack();
        let _guard = stack.guard();
        stack.check_space(2)?;
        stack.get_global(name);
        T::read(&stack, -1)
    }

    /// Bind a native function as a global
    pub fn set_function(&self, name: &str, function: NativeFunction) -> BridgeResult<()> {
        self.set(name, function)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call the global function `function`, binding its results into `rets`.
    ///
    /// Returns false on failure. The error message goes to `handler` when
    /// one is supplied and is otherwise dropped; use
    /// [`try_call`](State::try_call) to get it as a value.
    pub fn call<A, R>(
        &self,
        function: &str,
        handler: Option<ExceptionHandler<'_>>,
        rets: &mut R,
        args: A,
    ) -> bool
    where
        A: ToLuaMulti,
        R: FromLuaMulti,
    {
        invoke::report(self.try_call(function, args), handler, rets)
    }

    /// Call the global function `function`
    pub fn try_call<A, R>(&self, function: &str, args: A) -> BridgeResult<R>
    where
        A: ToLuaMulti,
        R: FromLuaMulti,
    {
        let push_global = |stack: &Stack| {
            stack.get_global(function);
            Ok(())
        };
        invoke::protected_call(&self.stack(), push_global, args)
    }

    /// Run a chunk; returns false on failure, reporting through `handler`
    pub fn run_script(&self, source: &str, handler: Option<ExceptionHandler<'_>>) -> bool {
        invoke::report(self.execute(source), handler, &mut ())
    }

    /// Run a chunk, discarding its results
    pub fn execute(&self, source: &str) -> BridgeResult<()> {
        self.eval(source)
    }

    /// Run a chunk and read its results.
    ///
    /// Compilation failures are [`BridgeError::Script`]; runtime failures
    /// are [`BridgeError::Invocation`].
    pub fn eval<R: FromLuaMulti>(&self, source: &str) -> BridgeResult<R> {
        let load = |stack: &Stack| {
            if stack.load(source.as_bytes(), c"=script") {
                Ok(())
            } else {
                Err(BridgeError::Script(stack.error_message(-1)))
            }
        };
        invoke::protected_call(&self.stack(), load, ())
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Create a table, publishing it as the global `name` if given
    pub fn new_table(&self, name: Option<&str>) -> BridgeResult<LuaTable> {
        let stack = self.stack();
        let _guard = stack.guard();
        stack.check_space(2)?;
        stack.new_table(0, 0);
        if let Some(name) = name {
            stack.push_value(-1);
            stack.set_global(name);
        }
        LuaTable::read(&stack, -1)
    }

    /// Create and populate a table
    pub fn new_table_with<K, V, I>(&self, name: Option<&str>, entries: I) -> BridgeResult<LuaTable>
    where
        K: ToLua,
        V: ToLua,
        I: IntoIterator<Item = (K, V)>,
    {
        let table = self.new_table(name)?;
        for (key, value) in entries {
            table.set(key, value)?;
        }
        Ok(table)
    }

    /// Publish a table of named constants as the global `name`
    pub fn new_enum<V, I>(&self, name: &str, entries: I) -> BridgeResult<LuaTable>
    where
        V: ToLua,
        I: IntoIterator<Item = (&'static str, V)>,
    {
        self.new_table_with(Some(name), entries)
    }

    /// Pin any value
    pub fn new_reference<V: ToLua>(&self, value: V) -> BridgeResult<Reference> {
        let stack = self.stack();
        Reference::pin_with(&stack, || value.push_lua(&stack))
    }

    // ========================================================================
    // Classes and objects
    // ========================================================================

    /// Start a class binding for `T`, exposed to scripts as `name`
    pub fn new_class<T: 'static>(&self, name: &str) -> ClassBuilder<'_, T> {
        ClassBuilder::new(self.stack(), name)
    }

    /// Proxy for `object`: the same proxy for as long as it stays alive
    pub fn wrap_instance<T: 'static>(&self, object: ObjectPtr<T>) -> BridgeResult<Reference> {
        let stack = self.stack();
        Reference::pin_with(&stack, || object.push_lua(&stack))
    }

    /// Evict the proxy for `object`; scripts still holding it get stale
    /// handle errors. Returns false if the object had no live proxy.
    pub fn release_object<T: 'static>(&self, object: ObjectPtr<T>) -> BridgeResult<bool> {
        class::release_object(&self.stack(), object)
    }

    /// Identity key of `pointer` as a `T`
    pub fn identity_key<T: 'static>(&self, pointer: *const T) -> BridgeResult<ObjectKey> {
        self.runtime.context().types.borrow().identity_key(pointer)
    }

    /// Namespace of the class bound to `T`
    pub fn namespace<T: 'static>(&self) -> Option<String> {
        self.runtime
            .context()
            .types
            .borrow()
            .namespace::<T>()
            .map(str::to_string)
    }

    /// Number of objects with a live proxy
    pub fn live_objects(&self) -> usize {
        self.runtime.context().objects.borrow().live_count()
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Current stack depth of the main thread
    pub fn stack_depth(&self) -> c_int {
        self.stack().top()
    }

    /// Run a full collection cycle
    pub fn collect_garbage(&self) {
        self.stack().collect_garbage();
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("handle", &self.stack().as_ptr())
            .field("options", self.options())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_globals() {
        let state = State::new().unwrap();
        state.set("n", 7).unwrap();
        state.set("s", "text").unwrap();
        assert_eq!(state.get::<i64>("n").unwrap(), 7);
        assert_eq!(state.get::<String>("s").unwrap(), "text");
        assert_eq!(state.get::<Option<i64>>("missing").unwrap(), None);
        assert_eq!(state.stack_depth(), 0);
    }

    #[test]
    fn test_eval_errors() {
        let state = State::new().unwrap();
        assert!(matches!(state.execute("this is not lua"), Err(BridgeError::Script(_))));
        assert!(matches!(state.execute("error('boom')"), Err(BridgeError::Invocation(_))));
        assert_eq!(state.stack_depth(), 0);
    }

    #[test]
    fn test_run_script_handler() {
        let state = State::new().unwrap();
        let message = std::cell::RefCell::new(String::new());
        let handler = |m: &str| *message.borrow_mut() = m.to_string();
        assert!(!state.run_script("error('bad thing')", Some(&handler)));
        assert!(message.borrow().contains("bad thing"));
        assert!(state.run_script("x = 1", Some(&handler)));
    }

    #[test]
    fn test_new_enum() {
        let state = State::new().unwrap();
        state.new_enum("Color", vec![("Red", 1), ("Green", 2)]).unwrap();
        assert_eq!(state.eval::<i64>("return Color.Green").unwrap(), 2);
    }

    #[test]
    fn test_without_libs() {
        let options = BridgeOptions {
            open_libs: false,
            ..BridgeOptions::default()
        };
        let state = State::with_options(options).unwrap();
        assert_eq!(state.eval::<Option<String>>("return type").unwrap(), None);
    }
}
