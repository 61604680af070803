//! History records and record structures

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered property names shared by every record of a history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecordStructure {
    property_names: Vec<String>,
}

impl HistoryRecordStructure {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            property_names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn property_names(&self) -> &[String] {
        &self.property_names
    }

    pub fn property_count(&self) -> usize {
        self.property_names.len()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.property_names.iter().position(|n| n == name)
    }
}

/// One stored entry: named string properties plus the time it was written
///
/// Names and values are parallel vectors. A record written under an older
/// structure simply carries fewer names, so lookups go through
/// [`HistoryRecord::value`] rather than by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub property_names: Vec<String>,
    pub property_values: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    /// Create a record from explicit names and values
    ///
    /// Surplus names or values without a counterpart are dropped.
    pub fn new<N, V>(names: N, values: V, timestamp: DateTime<Utc>) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        let (property_names, property_values): (Vec<String>, Vec<String>) = names
            .into_iter()
            .zip(values)
            .map(|(n, v)| (n.into(), v.into()))
            .unzip();

        Self {
            property_names,
            property_values,
            timestamp,
        }
    }

    /// Create a record whose values line up with the leading structure names
    pub fn from_structure(
        structure: &HistoryRecordStructure,
        values: Vec<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(structure.property_names().iter().cloned(), values, timestamp)
    }

    /// Value of the named property, if the record has it
    pub fn value(&self, name: &str) -> Option<&str> {
        self.property_names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.property_values.get(i))
            .map(String::as_str)
    }

    /// Whether every property name has a value
    pub fn is_consistent(&self) -> bool {
        self.property_names.len() == self.property_values.len()
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.property_names
            .iter()
            .map(String::as_str)
            .zip(self.property_values.iter().map(String::as_str))
    }

    /// Apply field changes to properties the record already has
    ///
    /// Returns whether anything was changed. Unknown names are ignored.
    pub fn apply_changes(&mut self, changes: &HashMap<String, String>) -> bool {
        let mut changed = false;
        for (name, value) in changes {
            let slot = self
                .property_names
                .iter()
                .position(|n| n == name)
                .and_then(|i| self.property_values.get_mut(i));
            if let Some(slot) = slot {
                *slot = value.clone();
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_shorter_value_list() {
        let structure = HistoryRecordStructure::new(["a", "b", "c"]);
        let record = HistoryRecord::from_structure(&structure, vec!["1".into(), "2".into()], Utc::now());

        assert_eq!(record.value("a"), Some("1"));
        assert_eq!(record.value("b"), Some("2"));
        assert_eq!(record.value("c"), None);
        assert_eq!(record.properties().count(), 2);
    }

    #[test]
    fn test_apply_changes_ignores_unknown_fields() {
        let mut record = HistoryRecord::new(["a", "b"], ["1", "2"], Utc::now());
        let mut changes = HashMap::new();
        changes.insert("b".to_string(), "20".to_string());
        changes.insert("z".to_string(), "99".to_string());

        assert!(record.apply_changes(&changes));
        assert_eq!(record.value("b"), Some("20"));
        assert_eq!(record.value("z"), None);
    }

    #[test]
    fn test_missing_value_is_absent_not_a_panic() {
        let mut record = HistoryRecord {
            property_names: vec!["a".into(), "b".into()],
            property_values: vec!["1".into()],
            timestamp: Utc::now(),
        };
        assert!(!record.is_consistent());
        assert_eq!(record.value("a"), Some("1"));
        assert_eq!(record.value("b"), None);

        let changes = HashMap::from([("b".to_string(), "2".to_string())]);
        assert!(!record.apply_changes(&changes));
        assert_eq!(record.property_values, vec!["1".to_string()]);
    }

    #[test]
    fn test_timestamp_serialized_as_millis() {
        let ts = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let record = HistoryRecord::new(["a"], ["1"], ts);
        let json = serde_json::to_string(&record).unwrap();

        assert!(json.contains("1700000000123"));
        let back: HistoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
