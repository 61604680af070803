//! Hierarchical history identifiers

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{HistoryStoreError, StoreResult};

/// Identity of one history, e.g. `callhistory/default/default`
///
/// Components are kept verbatim; [`HistoryId::to_relative_path`] escapes them
/// for use as directory names. A shorter id is a scope that contains every
/// longer id starting with the same components, which is what
/// [`crate::HistoryService::purge_locally_stored_history`] relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HistoryId {
    components: Vec<String>,
}

impl HistoryId {
    /// Build an id from raw components
    ///
    /// Fails when no components are given or one of them is empty.
    pub fn create_from_raw_id<I, S>(raw: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> = raw.into_iter().map(Into::into).collect();

        if components.is_empty() {
            return Err(HistoryStoreError::invalid_id("history id has no components"));
        }
        if let Some(position) = components.iter().position(|c| c.is_empty()) {
            return Err(HistoryStoreError::invalid_id(format!(
                "component {} is empty",
                position
            )));
        }

        Ok(Self { components })
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Whether `other` equals this id or lives below it
    pub fn is_prefix_of(&self, other: &HistoryId) -> bool {
        other.components.len() >= self.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    /// Relative directory path with every component escaped
    pub fn to_relative_path(&self) -> PathBuf {
        self.components.iter().map(|c| escape_component(c)).collect()
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}

/// Percent-escape everything outside `[A-Za-z0-9@._-]` so that addresses such
/// as `sip:alice@example.com` map to a single, collision-free directory name.
fn escape_component(component: &str) -> String {
    let mut escaped = String::with_capacity(component.len());
    for byte in component.bytes() {
        let c = byte as char;
        if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-') {
            escaped.push(c);
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }
    // "." and ".." would escape the history root
    if escaped.chars().all(|c| c == '.') {
        escaped = escaped.replace('.', "%2E");
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_ids() {
        assert!(HistoryId::create_from_raw_id(Vec::<String>::new()).is_err());
        assert!(HistoryId::create_from_raw_id(["callhistory", ""]).is_err());
    }

    #[test]
    fn test_prefix_matching() {
        let scope = HistoryId::create_from_raw_id(["callhistory"]).unwrap();
        let full = HistoryId::create_from_raw_id(["callhistory", "default", "default"]).unwrap();
        let other = HistoryId::create_from_raw_id(["msghistory", "default"]).unwrap();

        assert!(scope.is_prefix_of(&full));
        assert!(full.is_prefix_of(&full));
        assert!(!full.is_prefix_of(&scope));
        assert!(!scope.is_prefix_of(&other));
    }

    #[test]
    fn test_relative_path_escaping() {
        let id = HistoryId::create_from_raw_id(["callhistory", "sip:alice@example.com", ".."]).unwrap();
        let path = id.to_relative_path();
        let parts: Vec<_> = path.iter().map(|p| p.to_string_lossy().into_owned()).collect();

        assert_eq!(parts, vec!["callhistory", "sip%3Aalice@example.com", "%2E%2E"]);
        assert_eq!(id.to_string(), "callhistory/sip:alice@example.com/..");
    }
}
