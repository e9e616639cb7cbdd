use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

/// One exam submission: the submitter's name and the text shown in the detail
/// modal (a blog link in practice).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub display_name: String,
    pub supplementary_text: String,
}

impl Record {
    pub fn new(display_name: impl Into<String>, supplementary_text: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            supplementary_text: supplementary_text.into(),
        }
    }

    /// Name used when the record's name element is empty or never appears.
    pub fn placeholder_name(index: usize) -> String {
        format!("record_{}", index + 1)
    }
}

/// Ordered, append-only records gathered during one run.
#[derive(Debug, Default)]
pub struct CollectedSet {
    records: Mutex<Vec<Record>>,
}

impl CollectedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and returns the new size.
    pub fn push(&self, record: Record) -> usize {
        let mut records = self.lock();
        records.push(record);
        records.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Record> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collected_set_keeps_insertion_order() {
        let set = CollectedSet::new();
        assert!(set.is_empty());
        assert_eq!(set.push(Record::new("Kim", "https://a.example")), 1);
        assert_eq!(set.push(Record::new("Lee", "")), 2);

        let snapshot = set.snapshot();
        assert_eq!(snapshot[0].display_name, "Kim");
        assert_eq!(snapshot[1].supplementary_text, "");

        set.clear();
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn placeholder_is_one_based() {
        assert_eq!(Record::placeholder_name(0), "record_1");
        assert_eq!(Record::placeholder_name(9), "record_10");
    }
}
