//! Error types for the bridge

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised while crossing the native/runtime boundary
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// Value has no supported conversion to the requested type
    #[error("Cannot convert {got} to {expected}")]
    Marshal {
        /// Requested type name
        expected: String,
        /// Runtime type (or reason) actually found
        got: String,
    },

    /// Protected call failed; carries the runtime's error message
    #[error("Invocation failed: {0}")]
    Invocation(String),

    /// Identity key would exceed its configured bound
    #[error("Identity key for {namespace} needs {len} bytes, limit is {limit}")]
    IdentityOverflow {
        /// Namespace of the object's class
        namespace: String,
        /// Length the key would have had
        len: usize,
        /// Configured maximum key length
        limit: usize,
    },

    /// Argument shape is unusable (empty delimiter, invalid key, ...)
    #[error("Malformed argument: {0}")]
    MalformedArgument(String),

    /// Table nesting went deeper than the configured limit
    #[error("Table nesting exceeds maximum depth {0}")]
    DepthExceeded(usize),

    /// Proxy refers to an object that was released or collected
    #[error("Stale handle to {0} object")]
    StaleObject(String),

    /// Native type has no class binding in this state
    #[error("Class not registered: {0}")]
    UnregisteredClass(String),

    /// Another native type already owns this class name
    #[error("Class name already bound to another type: {0}")]
    DuplicateClass(String),

    /// Runtime stack could not grow
    #[error("Runtime stack overflow")]
    StackOverflow,

    /// Chunk failed to load or compile
    #[error("Script error: {0}")]
    Script(String),

    /// Options could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The runtime handle behind a reference has been closed
    #[error("Runtime handle is closed")]
    Closed,
}

impl BridgeError {
    /// Build a conversion error
    pub fn marshal(expected: impl Into<String>, got: impl Into<String>) -> Self {
        BridgeError::Marshal {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Text handed to exception handlers and raised into the runtime.
    ///
    /// Runtime-originated messages are passed through untouched.
    pub fn message(&self) -> String {
        match self {
            BridgeError::Invocation(message) | BridgeError::Script(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::Invocation(s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::Invocation(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_passes_runtime_text_through() {
        let err = BridgeError::Invocation("script:1: boom".to_string());
        assert_eq!(err.message(), "script:1: boom");
        assert_eq!(err.to_string(), "Invocation failed: script:1: boom");
    }

    #[test]
    fn test_message_formats_bridge_errors() {
        let err = BridgeError::marshal("i32", "string");
        assert_eq!(err.message(), "Cannot convert string to i32");
    }

    #[test]
    fn test_from_string() {
        let err: BridgeError = "nope".into();
        assert_eq!(err, BridgeError::Invocation("nope".to_string()));
    }
}
