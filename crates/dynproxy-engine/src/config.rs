//! Module scope configuration (dynproxy.toml / JSON)

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, ProxyResult};
use crate::vm::DEFAULT_MAX_CALL_DEPTH;

/// Settings shared by every proxy a [`ModuleScope`](crate::ModuleScope)
/// generates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScopeConfig {
    /// Namespace of generated proxy types
    pub proxy_namespace: String,

    /// Namespace of generated invocation types
    pub invocation_namespace: String,

    /// Treat internal types as accessible to the generated module
    pub internals_visible: bool,

    /// Mark generated proxies serializable when their base type is
    pub serializable_proxies: bool,

    /// Interpreter call depth limit
    pub max_call_depth: usize,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            proxy_namespace: "DynProxy.Proxies".to_string(),
            invocation_namespace: "DynProxy.Proxies.Invocations".to_string(),
            internals_visible: false,
            serializable_proxies: true,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl ScopeConfig {
    /// Parse from JSON
    pub fn from_json_str(content: &str) -> ProxyResult<Self> {
        let config: ScopeConfig =
            serde_json::from_str(content).map_err(|e| ProxyError::Config(e.to_string()))?;
        config.validate()
    }

    /// Parse from TOML
    pub fn from_toml_str(content: &str) -> ProxyResult<Self> {
        let config: ScopeConfig =
            toml::from_str(content).map_err(|e| ProxyError::Config(e.to_string()))?;
        config.validate()
    }

    /// Load a `.json` or `.toml` file
    pub fn load(path: &Path) -> ProxyResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    fn validate(self) -> ProxyResult<Self> {
        if self.proxy_namespace.is_empty() || self.invocation_namespace.is_empty() {
            return Err(ProxyError::Config("namespaces cannot be empty".to_string()));
        }
        if self.max_call_depth == 0 {
            return Err(ProxyError::Config(
                "max_call_depth must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ScopeConfig::default();
        assert_eq!(config.proxy_namespace, "DynProxy.Proxies");
        assert!(config.serializable_proxies);
        assert!(!config.internals_visible);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ScopeConfig::from_toml_str("internals_visible = true\n").unwrap();
        assert!(config.internals_visible);
        assert_eq!(config.invocation_namespace, "DynProxy.Proxies.Invocations");
    }

    #[test]
    fn test_json_and_validation() {
        let config = ScopeConfig::from_json_str(r#"{"proxy_namespace": "Gen"}"#).unwrap();
        assert_eq!(config.proxy_namespace, "Gen");
        assert!(matches!(
            ScopeConfig::from_json_str(r#"{"max_call_depth": 0}"#),
            Err(ProxyError::Config(_))
        ));
        assert!(ScopeConfig::from_json_str("{not json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "proxy_namespace = \"Custom\"").unwrap();
        let config = ScopeConfig::load(file.path()).unwrap();
        assert_eq!(config.proxy_namespace, "Custom");
    }
}
