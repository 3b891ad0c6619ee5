//! Runtime handle ownership and per-handle bridge context
//!
//! A [`Runtime`] owns one embedded runtime handle together with the
//! [`BridgeContext`] that native callbacks reach through the registry: the
//! type registry, bound classes and the object arena. Nothing here is
//! process-global; two runtimes never share identity state.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::ffi::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::rc::{Rc, Weak};

use mlua_sys as ffi;
use rustc_hash::FxHashMap;

use crate::class::{ClassInfo, ObjectArena};
use crate::error::{BridgeError, BridgeResult};
use crate::options::BridgeOptions;
use crate::stack::{Stack, REGISTRY_INDEX};
use crate::types::TypeRegistry;

/// Registry field holding the weak-valued identity cache
pub(crate) const OBJECT_CACHE: &str = "lunabind.objects";

static CONTEXT_KEY: u8 = 0;

fn context_key() -> *const c_void {
    &CONTEXT_KEY as *const u8 as *const c_void
}

// ============================================================================
// Runtime
// ============================================================================

/// Owner of a runtime handle. Closing happens on drop.
pub(crate) struct Runtime {
    state: NonNull<ffi::lua_State>,
    context: NonNull<BridgeContext>,
}

impl Runtime {
    /// Open a fresh runtime handle configured by `options`
    pub(crate) fn open(options: BridgeOptions) -> BridgeResult<Rc<Runtime>> {
        let raw = unsafe { ffi::luaL_newstate() };
        let state = NonNull::new(raw)
            .ok_or_else(|| BridgeError::Invocation("cannot allocate runtime state".to_string()))?;

        if options.open_libs {
            unsafe { ffi::luaL_openlibs(raw) };
        }

        let runtime = Rc::new_cyclic(|weak| {
            let context = Box::new(BridgeContext::new(weak.clone(), options));
            Runtime {
                state,
                context: NonNull::from(Box::leak(context)),
            }
        });

        let stack = runtime.stack();
        let _guard = stack.guard();
        stack.push_light_userdata(runtime.context.as_ptr() as *mut c_void);
        stack.raw_set_pointer(REGISTRY_INDEX, context_key());

        stack.new_table(0, 0);
        stack.new_table(0, 1);
        stack.push_str("v");
        stack.raw_set_str(-2, "__mode");
        stack.set_metatable(-2);
        stack.raw_set_str(REGISTRY_INDEX, OBJECT_CACHE);

        tracing::debug!(open_libs = runtime.context().options.open_libs, "runtime opened");
        Ok(runtime)
    }

    /// Stack view of the owned handle
    pub(crate) fn stack(&self) -> Stack {
        unsafe { Stack::from_raw(self.state.as_ptr()) }
    }

    /// Bridge context attached to the owned handle
    pub(crate) fn context(&self) -> &BridgeContext {
        unsafe { self.context.as_ref() }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        unsafe {
            // Finalizers still reach the context while the handle closes.
            ffi::lua_close(self.state.as_ptr());
            drop(Box::from_raw(self.context.as_ptr()));
        }
        tracing::debug!("runtime closed");
    }
}

// ============================================================================
// Bridge context
// ============================================================================

/// Per-runtime identity and binding state
pub(crate) struct BridgeContext {
    pub(crate) runtime: Weak<Runtime>,
    pub(crate) options: BridgeOptions,
    pub(crate) types: RefCell<TypeRegistry>,
    pub(crate) classes: RefCell<FxHashMap<TypeId, Rc<ClassInfo>>>,
    pub(crate) objects: RefCell<ObjectArena>,
}

impl BridgeContext {
    fn new(runtime: Weak<Runtime>, options: BridgeOptions) -> Self {
        Self {
            runtime,
            types: RefCell::new(TypeRegistry::with_max_key_len(options.max_key_len)),
            classes: RefCell::new(FxHashMap::default()),
            objects: RefCell::new(ObjectArena::new()),
            options,
        }
    }

    /// Context attached to the handle behind `stack`.
    ///
    /// The context lives exactly as long as the handle, so the returned
    /// borrow is valid for any use inside a native callback.
    pub(crate) fn from_stack(stack: &Stack) -> BridgeResult<&BridgeContext> {
        stack.raw_get_pointer(REGISTRY_INDEX, context_key());
        let pointer = stack.to_userdata(-1) as *const BridgeContext;
        stack.pop(1);
        if pointer.is_null() {
            return Err(BridgeError::Closed);
        }
        Ok(unsafe { &*pointer })
    }

    /// Class binding for `T`, if registered
    pub(crate) fn class<T: 'static>(&self) -> Option<Rc<ClassInfo>> {
        self.classes.borrow().get(&TypeId::of::<T>()).cloned()
    }
}

// ============================================================================
// Boxed native values
// ============================================================================

/// Push a userdata owning `value`; the value drops when the runtime
/// collects the userdata (or closes).
pub(crate) fn push_boxed<T: 'static>(stack: &Stack, value: T) -> BridgeResult<()> {
    stack.check_space(3)?;
    let slot = stack.new_userdata(std::mem::size_of::<Option<T>>()) as *mut Option<T>;
    unsafe { ptr::write(slot, Some(value)) };

    if stack.new_metatable(&boxed_metatable_name::<T>()) {
        stack.push_function(drop_boxed::<T>, 0);
        stack.raw_set_str(-2, "__gc");
        stack.push_bool(false);
        stack.raw_set_str(-2, "__metatable");
    }
    stack.set_metatable(-2);
    Ok(())
}

/// Registry name of the metatable shared by every boxed `T`
fn boxed_metatable_name<T: 'static>() -> String {
    format!("lunabind.boxed.{:?}", TypeId::of::<T>())
}

/// Borrow a value pushed by [`push_boxed`].
///
/// # Safety
/// The slot at `index` must be a userdata created by `push_boxed::<T>` and
/// must stay reachable for `'a`.
pub(crate) unsafe fn boxed_ref<'a, T: 'static>(stack: &Stack, index: c_int) -> Option<&'a T> {
    let slot = stack.to_userdata(index) as *const Option<T>;
    if slot.is_null() {
        return None;
    }
    (*slot).as_ref()
}

unsafe extern "C-unwind" fn drop_boxed<T: 'static>(l: *mut ffi::lua_State) -> c_int {
    let slot = ffi::lua_touserdata(l, 1) as *mut Option<T>;
    if !slot.is_null() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| drop((*slot).take())));
        if outcome.is_err() {
            tracing::warn!(value = type_name::<T>(), "panic while dropping boxed value");
        }
    }
    0
}

// ============================================================================
// Trampoline exits
// ============================================================================

/// Finish a native callback: return its result count, or raise its error
/// into the runtime.
///
/// Every owned Rust value is dropped before raising, since the runtime
/// unwinds past this frame without running destructors.
pub(crate) unsafe fn conclude(
    l: *mut ffi::lua_State,
    outcome: std::thread::Result<BridgeResult<c_int>>,
) -> c_int {
    let message = match outcome {
        Ok(Ok(count)) => return count,
        Ok(Err(err)) => err.message(),
        Err(payload) => format!("native panic: {}", panic_message(payload.as_ref())),
    };
    let stack = Stack::from_raw(l);
    stack.push_str(&message);
    drop(message);
    ffi::lua_error(l)
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
