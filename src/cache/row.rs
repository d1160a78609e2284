//! One cached record with its refresh instant and dirty flag.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::resolver::ColumnValue;

/// In-memory mirror of one backing-table record, keyed by its selection value.
///
/// Rows are owned by their [`CachedTable`](super::CachedTable); callers
/// receive clones, so mutating a returned row never touches the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRow {
    key: String,
    values: HashMap<String, ColumnValue>,
    refreshed_at: Instant,
    dirty: bool,
}

impl CachedRow {
    pub(crate) fn new(key: impl Into<String>, values: HashMap<String, ColumnValue>) -> Self {
        Self {
            key: key.into(),
            values,
            refreshed_at: Instant::now(),
            dirty: false,
        }
    }

    /// Selection-column value identifying this row
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn values(&self) -> &HashMap<String, ColumnValue> {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.values.get(column).or_else(|| {
            self.values
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, value)| value)
        })
    }

    pub fn refreshed_at(&self) -> Instant {
        self.refreshed_at
    }

    /// `now >= refreshed_at + ttl`; a `None` TTL never expires.
    pub fn is_expired(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => Instant::now() >= self.refreshed_at + ttl,
            None => false,
        }
    }

    /// Holds changes that have not been uploaded
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn replace_values(&mut self, values: HashMap<String, ColumnValue>) {
        self.values = values;
        self.refreshed_at = Instant::now();
    }

    pub(crate) fn refresh(&mut self) {
        self.refreshed_at = Instant::now();
    }

    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_window() {
        let row = CachedRow::new("k", HashMap::new());
        assert!(!row.is_expired(None));
        assert!(!row.is_expired(Some(Duration::from_secs(60))));
        assert!(row.is_expired(Some(Duration::ZERO)));
    }

    #[test]
    fn test_replace_restarts_window() {
        let mut row = CachedRow::new("k", HashMap::new());
        let before = row.refreshed_at();
        std::thread::sleep(Duration::from_millis(5));
        row.replace_values(HashMap::from([("v".to_string(), ColumnValue::Long(1))]));
        assert!(row.refreshed_at() > before);
        assert_eq!(row.get("V"), Some(&ColumnValue::Long(1)));
    }
}
