//! Member name allocation

use rustc_hash::FxHashMap;

/// Hands out member names that are unique within one generated type.
///
/// The first request for a suggestion returns it unchanged, later ones get a
/// `_N` suffix.
#[derive(Debug, Default)]
pub struct NamingScope {
    names: FxHashMap<String, usize>,
}

impl NamingScope {
    /// Empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Unique name derived from `suggestion`
    pub fn unique_name(&mut self, suggestion: &str) -> String {
        let Some(mut counter) = self.names.get(suggestion).copied() else {
            self.names.insert(suggestion.to_string(), 0);
            return suggestion.to_string();
        };
        loop {
            counter += 1;
            let candidate = format!("{}_{}", suggestion, counter);
            if !self.names.contains_key(&candidate) {
                self.names.insert(suggestion.to_string(), counter);
                self.names.insert(candidate.clone(), 0);
                return candidate;
            }
        }
    }
}
