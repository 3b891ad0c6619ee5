//! Object/class binding
//!
//! Native class instances are exposed to scripts as proxies: small userdata
//! blocks holding a [`ProxySlot`] into the runtime's [`ObjectArena`], with a
//! per-class metatable whose `__index`/`__newindex` resolve members by name
//! through the class's member table.
//!
//! # Identity
//!
//! Each wrapped (pointer, type) pair has one identity key. A weak-valued
//! cache maps keys to live proxies, so wrapping the same object twice yields
//! the same proxy. Releasing an object bumps its slot's generation: every
//! proxy still held by scripts becomes detectably stale instead of dangling.
//!
//! # Example
//!
//! ```ignore
//! state
//!     .new_class::<Point>("Point")
//!     .field("x", |p| p.x, |p, v| p.x = v)
//!     .method("norm", |p: &mut Point| (p.x * p.x + p.y * p.y).sqrt())
//!     .register()?;
//! state.set("origin", unsafe { ObjectPtr::new(&mut origin) })?;
//! ```

use std::any::{type_name, TypeId};
use std::ffi::{c_int, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;

use mlua_sys as ffi;
use rustc_hash::FxHashMap;

use crate::convert::{FromLua, FromLuaMulti, ToLua, ToLuaMulti};
use crate::error::{BridgeError, BridgeResult};
use crate::function::{bad_argument, Callback, NativeFunction};
use crate::reference::Reference;
use crate::runtime::{boxed_ref, conclude, push_boxed, BridgeContext, OBJECT_CACHE};
use crate::stack::{LuaType, Stack, REGISTRY_INDEX};

// ============================================================================
// Members
// ============================================================================

/// Pushes a member's current value for the object at the pointer
pub(crate) type Getter = Box<dyn Fn(&Stack, *mut c_void) -> BridgeResult<()>>;

/// Stores the value at the given stack index into the object's member
pub(crate) type Setter = Box<dyn Fn(&Stack, *mut c_void, c_int) -> BridgeResult<()>>;

/// One bound class member
pub struct ClassMember {
    /// Whether the member is a method
    pub is_function: bool,
    pub(crate) getter: Option<Getter>,
    pub(crate) setter: Option<Setter>,
}

impl ClassMember {
    /// Whether scripts can read the member
    pub fn is_readable(&self) -> bool {
        self.getter.is_some()
    }

    /// Whether scripts can assign the member
    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }
}

impl fmt::Debug for ClassMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassMember")
            .field("is_function", &self.is_function)
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// A registered class: its namespace and member table
#[derive(Debug)]
pub struct ClassInfo {
    /// Native type
    pub type_id: TypeId,
    /// Script-facing class name
    pub name: String,
    /// Registry name of the metatable (`name + "__"`)
    pub namespace: String,
    members: FxHashMap<String, ClassMember>,
}

impl ClassInfo {
    /// Look up a member by name
    pub fn member(&self, name: &str) -> Option<&ClassMember> {
        self.members.get(name)
    }

    /// Member names, in no particular order
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }
}

enum PendingMember {
    Field { getter: Getter, setter: Option<Setter> },
    Method(Callback),
}

// ============================================================================
// Class builder
// ============================================================================

/// Declares the members of a class binding for `T`.
///
/// Nothing is installed until [`register`](ClassBuilder::register).
/// Registration is idempotent per type: the first registration wins and
/// later ones return `Ok(())` without changing anything.
pub struct ClassBuilder<'s, T> {
    stack: Stack,
    name: String,
    members: Vec<(String, PendingMember)>,
    _marker: PhantomData<(&'s (), *mut T)>,
}

impl<'s, T: 'static> ClassBuilder<'s, T> {
    pub(crate) fn new(stack: Stack, name: &str) -> Self {
        Self {
            stack,
            name: name.to_string(),
            members: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Read/write field
    pub fn field<V, G, S>(mut self, name: &str, get: G, set: S) -> Self
    where
        V: ToLua + FromLua,
        G: Fn(&T) -> V + 'static,
        S: Fn(&mut T, V) + 'static,
    {
        let setter: Setter = Box::new(move |stack: &Stack, object: *mut c_void, index: c_int| {
            let value = V::read(stack, index).map_err(bad_argument)?;
            set(unsafe { &mut *(object as *mut T) }, value);
            Ok(())
        });
        self.members.push((
            name.to_string(),
            PendingMember::Field {
                getter: field_getter(get),
                setter: Some(setter),
            },
        ));
        self
    }

    /// Read-only field; assigning it from a script raises an error
    pub fn readonly<V, G>(mut self, name: &str, get: G) -> Self
    where
        V: ToLua,
        G: Fn(&T) -> V + 'static,
    {
        self.members.push((
            name.to_string(),
            PendingMember::Field {
                getter: field_getter(get),
                setter: None,
            },
        ));
        self
    }

    /// Method called from scripts as `object:name(args...)`
    pub fn method<A, R, M>(mut self, name: &str, method: M) -> Self
    where
        M: IntoMethod<T, A, R>,
    {
        self.members
            .push((name.to_string(), PendingMember::Method(method.into_method())));
        self
    }

    /// Install the metatable and record the class
    pub fn register(self) -> BridgeResult<()> {
        let stack = self.stack;
        let context = BridgeContext::from_stack(&stack)?;
        if context.types.borrow().is_registered::<T>() {
            return Ok(());
        }
        let namespace = format!("{}__", self.name);
        if context.types.borrow().namespace_in_use(&namespace) {
            return Err(BridgeError::DuplicateClass(self.name));
        }

        let _guard = stack.guard();
        stack.check_space(4)?;

        let mut members = FxHashMap::default();
        for (name, pending) in self.members {
            let member = match pending {
                PendingMember::Field { getter, setter } => ClassMember {
                    is_function: false,
                    getter: Some(getter),
                    setter,
                },
                PendingMember::Method(callback) => {
                    let function = Reference::pin_with(&stack, || {
                        NativeFunction::from_callback(callback).push_lua(&stack)
                    })?;
                    let getter: Getter =
                        Box::new(move |stack: &Stack, _: *mut c_void| function.push_onto(stack));
                    ClassMember {
                        is_function: true,
                        getter: Some(getter),
                        setter: None,
                    }
                }
            };
            members.insert(name, member);
        }

        let info = Rc::new(ClassInfo {
            type_id: TypeId::of::<T>(),
            name: self.name,
            namespace,
            members,
        });

        if !stack.new_metatable(&info.namespace) {
            return Err(BridgeError::DuplicateClass(info.name.clone()));
        }
        let events: [(&str, ffi::lua_CFunction); 3] = [
            ("__index", class_index),
            ("__newindex", class_newindex),
            ("__tostring", class_tostring),
        ];
        for (event, trampoline) in events {
            push_boxed(&stack, info.clone())?;
            stack.push_function(trampoline, 1);
            stack.raw_set_str(-2, event);
        }
        stack.push_function(proxy_gc, 0);
        stack.raw_set_str(-2, "__gc");

        context.types.borrow_mut().register::<T>(&info.name);
        tracing::debug!(
            class = %info.name,
            rust_type = type_name::<T>(),
            members = info.members.len(),
            "class registered"
        );
        context.classes.borrow_mut().insert(TypeId::of::<T>(), info);
        Ok(())
    }
}

fn field_getter<T: 'static, V: ToLua, G: Fn(&T) -> V + 'static>(get: G) -> Getter {
    Box::new(move |stack: &Stack, object: *mut c_void| {
        get(unsafe { &*(object as *const T) }).push_lua(stack)
    })
}

/// Conversion of a closure taking `&mut T` first into a method callback.
///
/// Implemented for closures of up to six further [`FromLua`] arguments.
pub trait IntoMethod<T, A, R> {
    /// Box the closure behind the receiver resolution and marshalling shim
    fn into_method(self) -> Callback;
}

macro_rules! impl_into_method {
    ($($arg:ident),*) => {
        impl<Func, T, R, $($arg,)*> IntoMethod<T, ($($arg,)*), R> for Func
        where
            Func: Fn(&mut T, $($arg),*) -> R + 'static,
            T: 'static,
            R: ToLuaMulti,
            $($arg: FromLua,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn into_method(self) -> Callback {
                Box::new(move |stack: &Stack| {
                    let receiver = resolve_proxy::<T>(stack, 1)?;
                    let count = stack.top() - 1;
                    let ($($arg,)*) = <($($arg,)*) as FromLuaMulti>::read_multi(stack, 2, count)
                        .map_err(bad_argument)?;
                    (self)(unsafe { &mut *receiver }, $($arg),*).push_multi(stack)
                })
            }
        }
    };
}

impl_into_method!();
impl_into_method!(A1);
impl_into_method!(A1, A2);
impl_into_method!(A1, A2, A3);
impl_into_method!(A1, A2, A3, A4);
impl_into_method!(A1, A2, A3, A4, A5);
impl_into_method!(A1, A2, A3, A4, A5, A6);

// ============================================================================
// Object arena
// ============================================================================

/// Payload of a proxy userdata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxySlot {
    /// Arena index
    pub index: u32,
    /// Generation the proxy was created in
    pub generation: u32,
}

#[derive(Debug)]
struct ObjectSlot {
    pointer: *mut c_void,
    type_id: TypeId,
    generation: u32,
    alive: bool,
}

/// Slots for wrapped objects; freed slots are recycled with a new generation
#[derive(Debug, Default)]
pub(crate) struct ObjectArena {
    slots: Vec<ObjectSlot>,
    free: Vec<u32>,
}

impl ObjectArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot for `pointer`
    pub(crate) fn insert(&mut self, pointer: *mut c_void, type_id: TypeId) -> ProxySlot {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.pointer = pointer;
            slot.type_id = type_id;
            slot.alive = true;
            return ProxySlot {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(ObjectSlot {
            pointer,
            type_id,
            generation: 0,
            alive: true,
        });
        ProxySlot { index, generation: 0 }
    }

    /// Pointer behind `slot`, if it is still the live occupant
    pub(crate) fn resolve(&self, slot: ProxySlot, type_id: TypeId) -> Option<*mut c_void> {
        self.slots
            .get(slot.index as usize)
            .filter(|s| s.alive && s.generation == slot.generation && s.type_id == type_id)
            .map(|s| s.pointer)
    }

    /// Free `slot`; false if it was already stale
    pub(crate) fn release(&mut self, slot: ProxySlot) -> bool {
        match self.slots.get_mut(slot.index as usize) {
            Some(s) if s.alive && s.generation == slot.generation => {
                s.alive = false;
                s.pointer = ptr::null_mut();
                s.generation = s.generation.wrapping_add(1);
                self.free.push(slot.index);
                true
            }
            _ => false,
        }
    }

    /// Number of live slots
    pub(crate) fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.alive).count()
    }
}

// ============================================================================
// Object pointers
// ============================================================================

/// Pointer to a native instance of a bound class.
///
/// Converting one to a runtime value wraps it in a proxy (reusing the live
/// proxy for the same object); reading one from a runtime value resolves
/// the proxy back to the pointer.
pub struct ObjectPtr<T> {
    pointer: *mut T,
}

impl<T> ObjectPtr<T> {
    /// Wrap a raw pointer.
    ///
    /// # Safety
    /// The object must stay valid, and must not be moved, until it is
    /// released with [`State::release_object`](crate::State::release_object)
    /// or the state is dropped. Script-side field and method access mutate it
    /// through this pointer while no Rust borrow of it is active.
    pub unsafe fn new(pointer: *mut T) -> Self {
        Self { pointer }
    }

    /// The null object, converted to `nil`
    pub fn null() -> Self {
        Self {
            pointer: ptr::null_mut(),
        }
    }

    /// Raw pointer
    pub fn as_ptr(&self) -> *mut T {
        self.pointer
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        self.pointer.is_null()
    }

    /// Borrow the object.
    ///
    /// # Safety
    /// No mutable borrow of the object may be active for `'a`.
    pub unsafe fn as_ref<'a>(&self) -> Option<&'a T> {
        self.pointer.as_ref()
    }

    /// Borrow the object mutably.
    ///
    /// # Safety
    /// No other borrow of the object may be active for `'a`.
    pub unsafe fn as_mut<'a>(&self) -> Option<&'a mut T> {
        self.pointer.as_mut()
    }
}

impl<T> Clone for ObjectPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectPtr<T> {}

impl<T> PartialEq for ObjectPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.pointer, other.pointer)
    }
}

impl<T> Eq for ObjectPtr<T> {}

impl<T> fmt::Debug for ObjectPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectPtr<{}>({:p})", type_name::<T>(), self.pointer)
    }
}

impl<T: 'static> ToLua for ObjectPtr<T> {
    fn push_lua(self, stack: &Stack) -> BridgeResult<()> {
        push_object(stack, self)
    }
}

impl<T: 'static> FromLua for ObjectPtr<T> {
    fn read(stack: &Stack, index: c_int) -> BridgeResult<Self> {
        if stack.type_of(index).is_nil_or_none() {
            return Ok(ObjectPtr::null());
        }
        resolve_proxy::<T>(stack, index).map(|pointer| ObjectPtr { pointer })
    }
}

// ============================================================================
// Proxies
// ============================================================================

fn class_of<T: 'static>(context: &BridgeContext) -> BridgeResult<Rc<ClassInfo>> {
    context
        .class::<T>()
        .ok_or_else(|| BridgeError::UnregisteredClass(type_name::<T>().to_string()))
}

fn proxy_slot(stack: &Stack, index: c_int) -> Option<ProxySlot> {
    let data = stack.to_userdata(index) as *const ProxySlot;
    if data.is_null() {
        None
    } else {
        Some(unsafe { ptr::read_unaligned(data) })
    }
}

/// Push the proxy for `object`, creating it on first wrap
pub(crate) fn push_object<T: 'static>(stack: &Stack, object: ObjectPtr<T>) -> BridgeResult<()> {
    if object.is_null() {
        stack.push_nil();
        return Ok(());
    }
    let context = BridgeContext::from_stack(stack)?;
    let class = class_of::<T>(context)?;
    let key = context.types.borrow().identity_key(object.as_ptr() as *const T)?;
    let type_id = TypeId::of::<T>();

    stack.check_space(4)?;
    stack.raw_get_str(REGISTRY_INDEX, OBJECT_CACHE);
    let cache = stack.top();

    if stack.raw_get_str(cache, key.as_str()) == LuaType::Userdata {
        let live = proxy_slot(stack, -1)
            .and_then(|slot| context.objects.borrow().resolve(slot, type_id))
            .is_some();
        if live {
            stack.remove(cache);
            return Ok(());
        }
    }
    stack.pop(1);

    let slot = context
        .objects
        .borrow_mut()
        .insert(object.as_ptr() as *mut c_void, type_id);
    let data = stack.new_userdata(mem::size_of::<ProxySlot>()) as *mut ProxySlot;
    unsafe { ptr::write_unaligned(data, slot) };
    stack.raw_get_str(REGISTRY_INDEX, &class.namespace);
    stack.set_metatable(-2);

    stack.push_value(-1);
    stack.raw_set_str(cache, key.as_str());
    stack.remove(cache);

    tracing::trace!(key = %key, slot = slot.index, generation = slot.generation, "proxy created");
    Ok(())
}

/// Resolve the proxy at `index` to a `T` pointer
pub(crate) fn resolve_proxy<T: 'static>(stack: &Stack, index: c_int) -> BridgeResult<*mut T> {
    let context = BridgeContext::from_stack(stack)?;
    let class = class_of::<T>(context)?;
    resolve_with(stack, context, &class, index).map(|pointer| pointer as *mut T)
}

fn resolve_with(
    stack: &Stack,
    context: &BridgeContext,
    class: &ClassInfo,
    index: c_int,
) -> BridgeResult<*mut c_void> {
    let ty = stack.type_of(index);
    if ty != LuaType::Userdata {
        return Err(BridgeError::marshal(&class.name, ty.name()));
    }
    {
        let _guard = stack.guard();
        stack.check_space(2)?;
        if !stack.get_metatable(index) {
            return Err(BridgeError::marshal(&class.name, "userdata"));
        }
        stack.raw_get_str(REGISTRY_INDEX, &class.namespace);
        if !stack.raw_equal(-1, -2) {
            return Err(BridgeError::marshal(&class.name, "foreign userdata"));
        }
    }
    proxy_slot(stack, index)
        .and_then(|slot| context.objects.borrow().resolve(slot, class.type_id))
        .ok_or_else(|| BridgeError::StaleObject(class.name.clone()))
}

/// Evict the proxy for `object`; outstanding proxies become stale.
///
/// Returns false when the object had no live proxy.
pub(crate) fn release_object<T: 'static>(stack: &Stack, object: ObjectPtr<T>) -> BridgeResult<bool> {
    if object.is_null() {
        return Ok(false);
    }
    let context = BridgeContext::from_stack(stack)?;
    let key = context.types.borrow().identity_key(object.as_ptr() as *const T)?;

    let _guard = stack.guard();
    stack.check_space(3)?;
    stack.raw_get_str(REGISTRY_INDEX, OBJECT_CACHE);
    let cache = stack.top();
    if stack.raw_get_str(cache, key.as_str()) != LuaType::Userdata {
        return Ok(false);
    }
    let released = proxy_slot(stack, -1)
        .map(|slot| context.objects.borrow_mut().release(slot))
        .unwrap_or(false);
    stack.push_nil();
    stack.raw_set_str(cache, key.as_str());

    tracing::trace!(key = %key, released, "proxy evicted");
    Ok(released)
}

// ============================================================================
// Metamethods
// ============================================================================

fn class_upvalue<'a>(stack: &Stack) -> BridgeResult<&'a Rc<ClassInfo>> {
    unsafe { boxed_ref::<Rc<ClassInfo>>(stack, Stack::upvalue_index(1)) }.ok_or(BridgeError::Closed)
}

fn member_key(stack: &Stack) -> Option<String> {
    match stack.type_of(2) {
        LuaType::String => String::from_utf8(stack.to_bytes(2)?).ok(),
        _ => None,
    }
}

unsafe extern "C-unwind" fn class_index(l: *mut ffi::lua_State) -> c_int {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let stack = Stack::from_raw(l);
        let class = class_upvalue(&stack)?;
        let context = BridgeContext::from_stack(&stack)?;
        let object = resolve_with(&stack, context, class, 1)?;
        let getter = member_key(&stack)
            .and_then(|name| class.member(&name))
            .and_then(|member| member.getter.as_ref());
        match getter {
            Some(getter) => getter(&stack, object)?,
            None => stack.push_nil(),
        }
        Ok(1)
    }));
    conclude(l, outcome)
}

unsafe extern "C-unwind" fn class_newindex(l: *mut ffi::lua_State) -> c_int {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let stack = Stack::from_raw(l);
        let class = class_upvalue(&stack)?;
        let context = BridgeContext::from_stack(&stack)?;
        let object = resolve_with(&stack, context, class, 1)?;
        let name = member_key(&stack).unwrap_or_else(|| stack.type_of(2).name().to_string());
        match class.member(&name) {
            Some(ClassMember {
                setter: Some(setter),
                ..
            }) => {
                setter(&stack, object, 3)?;
                Ok(0)
            }
            Some(_) => Err(BridgeError::Invocation(format!(
                "member '{}' of {} is read-only",
                name, class.name
            ))),
            None => Err(BridgeError::Invocation(format!(
                "{} has no member '{}'",
                class.name, name
            ))),
        }
    }));
    conclude(l, outcome)
}

unsafe extern "C-unwind" fn class_tostring(l: *mut ffi::lua_State) -> c_int {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let stack = Stack::from_raw(l);
        let class = class_upvalue(&stack)?;
        let context = BridgeContext::from_stack(&stack)?;
        let text = match resolve_with(&stack, context, class, 1) {
            Ok(object) => format!("{}: {:p}", class.name, object),
            Err(_) => format!("{}: released", class.name),
        };
        stack.push_str(&text);
        Ok(1)
    }));
    conclude(l, outcome)
}

unsafe extern "C-unwind" fn proxy_gc(l: *mut ffi::lua_State) -> c_int {
    let stack = Stack::from_raw(l);
    let Some(slot) = proxy_slot(&stack, 1) else {
        return 0;
    };
    let Ok(context) = BridgeContext::from_stack(&stack) else {
        return 0;
    };
    match context.objects.try_borrow_mut() {
        Ok(mut objects) => {
            if objects.release(slot) {
                tracing::trace!(slot = slot.index, "proxy collected");
            }
        }
        Err(_) => tracing::warn!(slot = slot.index, "object arena busy during finalization"),
    }
    0
}
