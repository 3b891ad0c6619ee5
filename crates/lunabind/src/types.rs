//! Type registry for bound native classes
//!
//! The registry maps a native [`TypeId`] to its [`TypeDescriptor`]: the
//! namespace string under which its metatable lives and from which object
//! identity keys are derived. One registry is owned by each runtime handle.

use std::any::{type_name, TypeId};
use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::{BridgeError, BridgeResult};

/// Default bound on identity key length, in bytes
pub const DEFAULT_MAX_KEY_LEN: usize = 128;

/// Registration record for one native type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Type ID
    pub type_id: TypeId,

    /// Whether a class name has been assigned
    pub registered: bool,

    /// Namespace (`name + "__"`), empty until registered
    pub namespace: String,

    /// Rust type name (for diagnostics)
    pub rust_name: &'static str,
}

impl TypeDescriptor {
    /// Create an unregistered descriptor for `T`
    pub fn new<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            registered: false,
            namespace: String::new(),
            rust_name: type_name::<T>(),
        }
    }

    /// Assign the class name. The first call wins; later calls are no-ops.
    pub fn register(&mut self, name: &str) -> bool {
        if self.registered {
            return false;
        }
        self.namespace = format!("{}__", name);
        self.registered = true;
        true
    }
}

/// Textual identity key of a wrapped object: `"<address>@<namespace>"`.
///
/// Deterministic for a given (address, type); only ever used as a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Format the key for `pointer` in `namespace`, failing instead of
    /// truncating when it would exceed `limit` bytes.
    pub fn new<T>(pointer: *const T, namespace: &str, limit: usize) -> BridgeResult<Self> {
        let key = format!("{:p}@{}", pointer, namespace);
        if key.len() > limit {
            return Err(BridgeError::IdentityOverflow {
                namespace: namespace.to_string(),
                len: key.len(),
                limit,
            });
        }
        Ok(ObjectKey(key))
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry of native type descriptors
#[derive(Debug)]
pub struct TypeRegistry {
    descriptors: FxHashMap<TypeId, TypeDescriptor>,
    max_key_len: usize,
}

impl TypeRegistry {
    /// Create an empty registry with the default key bound
    pub fn new() -> Self {
        Self::with_max_key_len(DEFAULT_MAX_KEY_LEN)
    }

    /// Create an empty registry with a custom key bound
    pub fn with_max_key_len(max_key_len: usize) -> Self {
        Self {
            descriptors: FxHashMap::default(),
            max_key_len,
        }
    }

    /// Register `T` under `name`. Idempotent: returns false when `T` was
    /// already registered, keeping the first namespace.
    pub fn register<T: 'static>(&mut self, name: &str) -> bool {
        self.descriptors
            .entry(TypeId::of::<T>())
            .or_insert_with(TypeDescriptor::new::<T>)
            .register(name)
    }

    /// Descriptor for a type id
    pub fn get(&self, type_id: TypeId) -> Option<&TypeDescriptor> {
        self.descriptors.get(&type_id)
    }

    /// Descriptor for `T`
    pub fn descriptor<T: 'static>(&self) -> Option<&TypeDescriptor> {
        self.get(TypeId::of::<T>())
    }

    /// Namespace of `T`, if registered
    pub fn namespace<T: 'static>(&self) -> Option<&str> {
        self.descriptor::<T>()
            .filter(|d| d.registered)
            .map(|d| d.namespace.as_str())
    }

    /// Identity key of `pointer` as a `T`
    pub fn identity_key<T: 'static>(&self, pointer: *const T) -> BridgeResult<ObjectKey> {
        let namespace = self
            .namespace::<T>()
            .ok_or_else(|| BridgeError::UnregisteredClass(type_name::<T>().to_string()))?;
        ObjectKey::new(pointer, namespace, self.max_key_len)
    }

    /// Check if `T` is registered
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.namespace::<T>().is_some()
    }

    /// Check if any type already owns `namespace`
    pub fn namespace_in_use(&self, namespace: &str) -> bool {
        self.descriptors
            .values()
            .any(|d| d.registered && d.namespace == namespace)
    }

    /// Bound on identity key length
    pub fn max_key_len(&self) -> usize {
        self.max_key_len
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
