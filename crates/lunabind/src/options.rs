//! Options for creating a [`State`](crate::State)

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::types::DEFAULT_MAX_KEY_LEN;

/// Default bound on table nesting for marshalling and deep copy
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Bridge configuration
///
/// Can be loaded from TOML:
///
/// ```toml
/// open_libs = true
/// max_key_len = 128
/// max_depth = 64
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Open the runtime's standard libraries on creation
    pub open_libs: bool,

    /// Maximum identity key length in bytes
    pub max_key_len: usize,

    /// Maximum table nesting depth
    pub max_depth: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            open_libs: true,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl BridgeOptions {
    /// Parse options from TOML; missing fields keep their defaults
    pub fn from_toml_str(content: &str) -> BridgeResult<Self> {
        let options: BridgeOptions =
            toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Serialize options to TOML
    pub fn to_toml_string(&self) -> BridgeResult<String> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Reject bounds that would make every operation fail
    pub fn validate(&self) -> BridgeResult<()> {
        if self.max_key_len == 0 {
            return Err(BridgeError::Config("max_key_len must be positive".to_string()));
        }
        if self.max_depth == 0 {
            return Err(BridgeError::Config("max_depth must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = BridgeOptions::default();
        assert!(options.open_libs);
        assert_eq!(options.max_key_len, 128);
        assert_eq!(options.max_depth, 64);
    }

    #[test]
    fn test_partial_toml() {
        let options = BridgeOptions::from_toml_str("max_depth = 8\n").unwrap();
        assert_eq!(options.max_depth, 8);
        assert_eq!(options.max_key_len, 128);
        assert!(options.open_libs);
    }

    #[test]
    fn test_invalid_toml() {
        let result = BridgeOptions::from_toml_str("max_depth = \"deep\"");
        assert!(matches!(result, Err(BridgeError::Config(_))));
        let result = BridgeOptions::from_toml_str("max_depth = 0");
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let options = BridgeOptions {
            open_libs: false,
            max_key_len: 64,
            max_depth: 16,
        };
        let text = options.to_toml_string().unwrap();
        assert_eq!(BridgeOptions::from_toml_str(&text).unwrap(), options);
    }
}
