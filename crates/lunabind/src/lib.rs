//! Lunabind: a bridge between Rust and an embedded Lua runtime
//!
//! This crate provides:
//! - Stack guards restoring the runtime stack depth on every exit path
//! - A per-runtime type registry with bounded object identity keys
//! - Value marshalling for scalars, strings, sequences, maps, objects and
//!   callables
//! - Class binding with typed fields and methods, one proxy per object
//! - Protected calls with structured or handler-based error reporting
//! - Pinned references with shared ownership
//! - Table algorithms over the raw traversal protocol
//! - A spin mutex for native data shared between runtime threads

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod convert;
pub mod error;
pub mod function;
pub mod invoke;
pub mod options;
pub mod reference;
pub mod stack;
pub mod state;
pub mod sync;
pub mod table;
pub mod types;
pub mod value;

mod runtime;

pub use class::{ClassBuilder, ClassInfo, ClassMember, IntoMethod, ObjectPtr, ProxySlot};
pub use convert::{FromLua, FromLuaMulti, ToLua, ToLuaMulti, Variadic};
pub use error::{BridgeError, BridgeResult};
pub use function::{IntoCallback, LuaFunction, NativeFunction};
pub use invoke::ExceptionHandler;
pub use options::BridgeOptions;
pub use reference::Reference;
pub use stack::{LuaType, Stack, StackGuard};
pub use state::State;
pub use sync::{SpinMutex, SpinMutexGuard};
pub use table::LuaTable;
pub use types::{ObjectKey, TypeDescriptor, TypeRegistry};
pub use value::DynamicValue;

/// Raw runtime API
pub use mlua_sys as ffi;
