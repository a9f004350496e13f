//! CLI command implementations.

pub mod check;
pub mod inspect;

use std::path::Path;

use dynproxy_engine::ScopeConfig;

/// Read `--config` when given
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<Option<ScopeConfig>> {
    match path {
        Some(path) => Ok(Some(ScopeConfig::load(path)?)),
        None => Ok(None),
    }
}
