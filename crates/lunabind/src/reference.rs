//! Pinned runtime values
//!
//! A [`Reference`] anchors one runtime value in the registry so it survives
//! outside any stack frame. Clones share the pin: the value is unpinned when
//! the last clone drops, or immediately on [`Reference::release`].

use std::cell::Cell;
use std::ffi::c_int;
use std::fmt;
use std::rc::{Rc, Weak};

use mlua_sys as ffi;

use crate::convert::{FromLua, ToLua};
use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{BridgeContext, Runtime};
use crate::stack::{LuaType, Stack};

const RELEASED: c_int = ffi::LUA_NOREF;

struct Pinned {
    runtime: Weak<Runtime>,
    id: Cell<c_int>,
}

impl Pinned {
    fn unpin(&self) {
        let id = self.id.replace(RELEASED);
        if id == RELEASED {
            return;
        }
        // A closed runtime has already dropped every pin with it.
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.stack().unreference(id);
        }
    }
}

impl Drop for Pinned {
    fn drop(&mut self) {
        self.unpin();
    }
}

/// Shared handle to a pinned runtime value.
///
/// Using a reference after [`release`](Reference::release) is a caller
/// error: debug builds assert, release builds push `nil`.
#[derive(Clone)]
pub struct Reference {
    inner: Rc<Pinned>,
}

impl Reference {
    /// Pin a copy of the value at `index`
    pub fn pin(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        let context = BridgeContext::from_stack(stack)?;
        stack.check_space(1)?;
        stack.push_value(index);
        let id = stack.reference();
        Ok(Reference {
            inner: Rc::new(Pinned {
                runtime: context.runtime.clone(),
                id: Cell::new(id),
            }),
        })
    }

    /// Pin a freshly pushed value: runs `push`, then pins and pops its result
    pub(crate) fn pin_with(stack: &Stack, push: impl FnOnce() -> BridgeResult<()>) -> BridgeResult<Self> {
        let _guard = stack.guard();
        push()?;
        Reference::pin(stack, -1)
    }

    /// Push the pinned value
    pub fn push_onto(&self, stack: &Stack) -> BridgeResult<()> {
        debug_assert!(!self.is_released(), "use of released reference");
        let runtime = self.runtime()?;
        let owner = BridgeContext::from_stack(stack)?;
        if !std::ptr::eq(owner, runtime.context()) {
            return Err(BridgeError::Invocation(
                "reference belongs to another runtime".to_string(),
            ));
        }
        stack.check_space(1)?;
        match self.inner.id.get() {
            RELEASED => stack.push_nil(),
            id => stack.push_reference(id),
        }
        Ok(())
    }

    /// Unpin now, for every clone of this reference
    pub fn release(&self) {
        self.inner.unpin();
    }

    /// Whether [`release`](Reference::release) has been called
    pub fn is_released(&self) -> bool {
        self.inner.id.get() == RELEASED
    }

    /// Type of the pinned value
    pub fn type_of(&self) -> BridgeResult<LuaType> {
        self.with_value(|stack, index| Ok(stack.type_of(index)))
    }

    /// Whether both references pin the same runtime value (no metamethods)
    pub fn raw_equal(&self, other: &Reference) -> bool {
        let Ok(runtime) = self.runtime() else {
            return false;
        };
        let stack = runtime.stack();
        let _guard = stack.guard();
        if self.push_onto(&stack).is_err() || other.push_onto(&stack).is_err() {
            return false;
        }
        stack.raw_equal(-1, -2)
    }

    /// Run `f` with the pinned value pushed on the owning runtime's stack.
    ///
    /// The stack is restored afterwards.
    pub fn with_value<R>(&self, f: impl FnOnce(&Stack, c_int) -> BridgeResult<R>) -> BridgeResult<R> {
        let runtime = self.runtime()?;
        let stack = runtime.stack();
        let _guard = stack.guard();
        self.push_onto(&stack)?;
        f(&stack, stack.top())
    }

    /// Read the pinned value as `T`
    pub fn get<T: FromLua>(&self) -> BridgeResult<T> {
        self.with_value(|stack, index| T::read(stack, index))
    }

    pub(crate) fn runtime(&self) -> BridgeResult<Rc<Runtime>> {
        self.inner.runtime.upgrade().ok_or(BridgeError::Closed)
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner) || self.raw_equal(other)
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reference").field(&self.inner.id.get()).finish()
    }
}

impl ToLua for Reference {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        self.push_onto(stack)
    }
}

impl ToLua for &Reference {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        self.push_onto(stack)
    }
}

impl FromLua for Reference {
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        Reference::pin(stack, index)
    }
}
