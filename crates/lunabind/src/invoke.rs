//! Invocation bridge
//!
//! Calls a runtime function with marshalled arguments under a protected
//! call and marshals its results back. Every call runs inside a
//! [`StackGuard`](crate::stack::StackGuard), so the stack depth afterwards
//! equals the depth before on success and on failure alike.
//!
//! Two reporting styles are offered. [`protected_call`] returns a structured
//! [`BridgeResult`]. [`report`] adapts that into the boolean-plus-handler
//! form: the message goes to the handler when one is supplied and is
//! otherwise dropped, leaving only the `false` return.

use crate::convert::{FromLuaMulti, ToLuaMulti};
use crate::error::{BridgeError, BridgeResult};
use crate::stack::{Stack, MULTRET};

/// Callback receiving the error message of a failed call
pub type ExceptionHandler<'a> = &'a dyn Fn(&str);

/// Push the callee, then `args` in order, call protected, and read every
/// returned value into `R`.
pub fn protected_call<A, R>(
    stack: &Stack,
    push_callee: impl FnOnce(&Stack) -> BridgeResult<()>,
    args: A,
) -> BridgeResult<R>
where
    A: ToLuaMulti,
    R: FromLuaMulti,
{
    let _guard = stack.guard();
    stack.check_space(2)?;
    push_callee(stack)?;
    let base = stack.top();
    let nargs = args.push_multi(stack)?;

    if !stack.pcall(nargs, MULTRET) {
        return Err(BridgeError::Invocation(stack.error_message(-1)));
    }

    // Results replace the callee, starting at its slot.
    let count = stack.top() - base + 1;
    R::read_multi(stack, base, count)
}

/// Bind a call outcome into `rets`, reporting failure through `handler`.
///
/// Returns true when the call succeeded. `rets` is left untouched on
/// failure.
pub fn report<R>(result: BridgeResult<R>, handler: Option<ExceptionHandler<'_>>, rets: &mut R) -> bool {
    match result {
        Ok(values) => {
            *rets = values;
            true
        }
        Err(err) => {
            let message = err.message();
            match handler {
                Some(handler) => handler(&message),
                None => tracing::debug!(error = %message, "call failed with no exception handler"),
            }
            false
        }
    }
}
