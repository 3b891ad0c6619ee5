//! Native functions and runtime function handles
//!
//! A [`NativeFunction`] is a Rust closure ready to be pushed as a runtime
//! function. Typed closures get their arguments marshalled through
//! [`FromLua`] and their results through [`ToLuaMulti`]; raw closures work
//! on the [`Stack`] directly.
//!
//! Every native function enters through one trampoline, which catches both
//! errors and panics and raises them into the runtime only after the Rust
//! frame has been torn down.

use std::ffi::c_int;
use std::panic::{self, AssertUnwindSafe};

use mlua_sys as ffi;

use crate::convert::{FromLua, FromLuaMulti, ToLua, ToLuaMulti};
use crate::error::{BridgeError, BridgeResult};
use crate::invoke::{self, ExceptionHandler};
use crate::reference::Reference;
use crate::runtime::{boxed_ref, conclude, push_boxed};
use crate::stack::{LuaType, Stack};

/// Boxed native callback; returns the number of results it pushed
pub type Callback = Box<dyn Fn(&Stack) -> BridgeResult<c_int>>;

/// Wrap an argument conversion failure with its position
pub(crate) fn bad_argument(err: BridgeError) -> BridgeError {
    BridgeError::MalformedArgument(format!("bad argument: {}", err.message()))
}

// ============================================================================
// Native functions
// ============================================================================

/// A native closure that can be pushed as a runtime function
pub struct NativeFunction {
    callback: Callback,
}

impl NativeFunction {
    /// Wrap a typed closure.
    ///
    /// ```ignore
    /// let add = NativeFunction::new(|a: i64, b: i64| a + b);
    /// ```
    pub fn new<A, R, F>(f: F) -> Self
    where
        F: IntoCallback<A, R>,
    {
        Self {
            callback: f.into_callback(),
        }
    }

    /// Wrap a closure that reads its arguments and pushes its results itself
    pub fn raw<F>(f: F) -> Self
    where
        F: Fn(&Stack) -> BridgeResult<c_int> + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    pub(crate) fn from_callback(callback: Callback) -> Self {
        Self { callback }
    }
}

impl ToLua for NativeFunction {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        stack.check_space(2)?;
        push_boxed(stack, self.callback)?;
        stack.push_function(call_native, 1);
        Ok(())
    }
}

unsafe extern "C-unwind" fn call_native(l: *mut ffi::lua_State) -> c_int {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let stack = Stack::from_raw(l);
        match boxed_ref::<Callback>(&stack, Stack::upvalue_index(1)) {
            Some(callback) => callback(&stack),
            None => Err(BridgeError::Closed),
        }
    }));
    conclude(l, outcome)
}

/// Conversion of a typed closure into a [`NativeFunction`] callback.
///
/// Implemented for closures of up to six [`FromLua`] arguments returning
/// any [`ToLuaMulti`], including `Result`, whose error is raised into the
/// runtime.
pub trait IntoCallback<A, R> {
    /// Box the closure behind the marshalling shim
    fn into_callback(self) -> Callback;
}

macro_rules! impl_into_callback {
    ($($arg:ident),*) => {
        impl<Func, R, $($arg,)*> IntoCallback<($($arg,)*), R> for Func
        where
            Func: Fn($($arg),*) -> R + 'static,
            R: ToLuaMulti,
            $($arg: FromLua,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn into_callback(self) -> Callback {
                Box::new(move |stack: &Stack| {
                    let top = stack.top();
                    let ($($arg,)*) = <($($arg,)*) as FromLuaMulti>::read_multi(stack, 1, top)
                        .map_err(bad_argument)?;
                    (self)($($arg),*).push_multi(stack)
                })
            }
        }
    };
}

impl_into_callback!();
impl_into_callback!(A1);
impl_into_callback!(A1, A2);
impl_into_callback!(A1, A2, A3);
impl_into_callback!(A1, A2, A3, A4);
impl_into_callback!(A1, A2, A3, A4, A5);
impl_into_callback!(A1, A2, A3, A4, A5, A6);

// ============================================================================
// Runtime functions
// ============================================================================

/// Pinned handle to a runtime function
#[derive(Debug, Clone, PartialEq)]
pub struct LuaFunction(Reference);

impl LuaFunction {
    /// Call the function; failures come back as [`BridgeError::Invocation`]
    pub fn call<A, R>(&self, args: A) -> BridgeResult<R>
    where
        A: ToLuaMulti,
        R: FromLuaMulti,
    {
        let runtime = self.0.runtime()?;
        let stack = runtime.stack();
        invoke::protected_call(&stack, |s| self.0.push_onto(s), args)
    }

    /// Call the function, binding results into `rets`.
    ///
    /// Returns false on failure after handing the message to `handler`; with
    /// no handler the message is dropped.
    pub fn call_with<A, R>(&self, args: A, handler: Option<ExceptionHandler<'_>>, rets: &mut R) -> bool
    where
        A: ToLuaMulti,
        R: FromLuaMulti,
    {
        invoke::report(self.call(args), handler, rets)
    }

    /// Underlying reference
    pub fn reference(&self) -> &Reference {
        &self.0
    }
}

impl ToLua for LuaFunction {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        self.0.push_onto(stack)
    }
}

impl ToLua for &LuaFunction {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        self.0.push_onto(stack)
    }
}

impl FromLua for LuaFunction {
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        match stack.type_of(index) {
            LuaType::Function => Ok(LuaFunction(Reference::pin(stack, index)?)),
            other => Err(BridgeError::marshal("function", other.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::State;

    #[test]
    fn test_typed_function() {
        let state = State::new().unwrap();
        state
            .set_function("add", NativeFunction::new(|a: i64, b: i64| a + b))
            .unwrap();
        assert_eq!(state.eval::<i64>("return add(2, 3)").unwrap(), 5);
    }

    #[test]
    fn test_multiple_returns() {
        let state = State::new().unwrap();
        state
            .set_function("divmod", NativeFunction::new(|a: i64, b: i64| (a / b, a % b)))
            .unwrap();
        let (q, r): (i64, i64) = state.eval("return divmod(17, 5)").unwrap();
        assert_eq!((q, r), (3, 2));
    }

    #[test]
    fn test_error_result_raises() {
        let state = State::new().unwrap();
        state
            .set_function(
                "fail",
                NativeFunction::new(|| -> Result<(), String> { Err("nope".to_string()) }),
            )
            .unwrap();
        let ok: bool = state.eval("return (pcall(fail))").unwrap();
        assert!(!ok);
        let message: String = state.eval("return select(2, pcall(fail))").unwrap();
        assert!(message.contains("nope"));
    }

    #[test]
    fn test_panic_becomes_runtime_error() {
        let state = State::new().unwrap();
        state
            .set_function("explode", NativeFunction::new(|| -> i32 { panic!("kaboom") }))
            .unwrap();
        let message: String = state.eval("return select(2, pcall(explode))").unwrap();
        assert!(message.contains("kaboom"));
    }

    #[test]
    fn test_bad_argument() {
        let state = State::new().unwrap();
        state
            .set_function("square", NativeFunction::new(|x: i64| x * x))
            .unwrap();
        let message: String = state.eval("return select(2, pcall(square, 'x'))").unwrap();
        assert!(message.contains("bad argument"));
    }

    #[test]
    fn test_raw_function() {
        let state = State::new().unwrap();
        state
            .set_function(
                "count",
                NativeFunction::raw(|stack| {
                    let n = stack.top();
                    stack.push_integer(n as i64);
                    Ok(1)
                }),
            )
            .unwrap();
        assert_eq!(state.eval::<i64>("return count(1, nil, 3)").unwrap(), 3);
    }

    #[test]
    fn test_script_function_handle() {
        let state = State::new().unwrap();
        state.execute("function greet(name) return 'hi ' .. name end").unwrap();
        let greet: LuaFunction = state.get("greet").unwrap();
        assert_eq!(greet.call::<_, String>("bob").unwrap(), "hi bob");

        let mut out = String::new();
        assert!(greet.call_with("amy", None, &mut out));
        assert_eq!(out, "hi amy");
    }
}
