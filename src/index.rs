use std::fmt;
use std::time::Instant;

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use tracing::debug;

use crate::error::StoreError;
use crate::extract::PageDocument;

/// Start time of a job, stamped on every record it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// Current time, truncated to the stored microsecond precision.
    pub fn now() -> Self {
        Watermark(Utc::now().trunc_subsecs(6))
    }

    /// Microseconds since the Unix epoch; the stored representation.
    pub fn as_micros(&self) -> i64 {
        self.0.timestamp_micros()
    }

    pub fn from_micros(micros: i64) -> Option<Self> {
        Utc.timestamp_micros(micros).single().map(Watermark)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Unique identity of an index record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub hostname: String,
    pub path: String,
}

impl RecordKey {
    pub fn new(hostname: impl Into<String>, path: impl Into<String>) -> Self {
        RecordKey {
            hostname: hostname.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.hostname, self.path)
    }
}

/// The persisted unit: one page of one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub key: RecordKey,
    pub document: PageDocument,
    /// `None` for records written without a watermark; always swept.
    pub watermark: Option<Watermark>,
}

/// Record-oriented store the reconciler writes to.
pub trait IndexStore {
    fn delete(&mut self, key: &RecordKey) -> Result<(), StoreError>;

    fn create(&mut self, record: &IndexRecord) -> Result<(), StoreError>;

    /// Delete records of `hostname` whose watermark is absent or older than
    /// `watermark`. Returns the number removed.
    fn delete_stale(&mut self, hostname: &str, watermark: Watermark) -> Result<usize, StoreError>;

    /// Delete then create. Stores that can do both atomically should.
    fn replace(&mut self, record: &IndexRecord) -> Result<(), StoreError> {
        self.delete(&record.key)?;
        self.create(record)
    }
}

impl<S: IndexStore + ?Sized> IndexStore for &mut S {
    fn delete(&mut self, key: &RecordKey) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn create(&mut self, record: &IndexRecord) -> Result<(), StoreError> {
        (**self).create(record)
    }

    fn delete_stale(&mut self, hostname: &str, watermark: Watermark) -> Result<usize, StoreError> {
        (**self).delete_stale(hostname, watermark)
    }

    fn replace(&mut self, record: &IndexRecord) -> Result<(), StoreError> {
        (**self).replace(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Indexed,
    /// No extractable content; nothing written, any old record is left for
    /// the sweep.
    SkippedEmpty,
}

/// Upsert one page's record stamped with the job watermark.
pub fn mark<S: IndexStore + ?Sized>(
    store: &mut S,
    hostname: &str,
    path: &str,
    watermark: Watermark,
    document: PageDocument,
) -> Result<MarkOutcome, StoreError> {
    if document.content.is_empty() {
        debug!("No content for \"{}\", not indexing", path);
        return Ok(MarkOutcome::SkippedEmpty);
    }

    let start = Instant::now();
    let record = IndexRecord {
        key: RecordKey::new(hostname, path),
        document,
        watermark: Some(watermark),
    };
    store.replace(&record)?;
    debug!(
        "Took {}ms to index \"{}\"",
        start.elapsed().as_millis(),
        record.key
    );
    Ok(MarkOutcome::Indexed)
}

/// Remove every record of `hostname` not refreshed by the job at `watermark`.
pub fn sweep<S: IndexStore + ?Sized>(
    store: &mut S,
    hostname: &str,
    watermark: Watermark,
) -> Result<usize, StoreError> {
    store.delete_stale(hostname, watermark)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Minimal map-backed store that logs every call.
    #[derive(Default)]
    struct MapStore {
        records: HashMap<RecordKey, IndexRecord>,
        calls: Vec<String>,
    }

    impl IndexStore for MapStore {
        fn delete(&mut self, key: &RecordKey) -> Result<(), StoreError> {
            self.calls.push(format!("delete {}", key.path));
            self.records.remove(key);
            Ok(())
        }

        fn create(&mut self, record: &IndexRecord) -> Result<(), StoreError> {
            self.calls.push(format!("create {}", record.key.path));
            self.records.insert(record.key.clone(), record.clone());
            Ok(())
        }

        fn delete_stale(&mut self, hostname: &str, watermark: Watermark) -> Result<usize, StoreError> {
            self.calls.push(format!("sweep {hostname}"));
            let before = self.records.len();
            self.records.retain(|key, record| {
                key.hostname != hostname || record.watermark.is_some_and(|w| w >= watermark)
            });
            Ok(before - self.records.len())
        }
    }

    fn doc(content: &[&str]) -> PageDocument {
        PageDocument {
            title: "T".into(),
            content: content.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn at(micros: i64) -> Watermark {
        Watermark::from_micros(micros).unwrap()
    }

    #[test]
    fn mark_deletes_before_create() {
        let mut store = MapStore::default();
        let outcome = mark(&mut store, "a.example", "/x", at(10), doc(&["hi"])).unwrap();
        assert_eq!(outcome, MarkOutcome::Indexed);
        assert_eq!(store.calls, vec!["delete /x", "create /x"]);
        let record = &store.records[&RecordKey::new("a.example", "/x")];
        assert_eq!(record.watermark, Some(at(10)));
    }

    #[test]
    fn mark_replaces_rather_than_merges() {
        let mut store = MapStore::default();
        let mut first = doc(&["old"]);
        first.h1 = vec!["Old heading".into()];
        mark(&mut store, "a.example", "/x", at(1), first).unwrap();
        mark(&mut store, "a.example", "/x", at(2), doc(&["new"])).unwrap();

        assert_eq!(store.records.len(), 1);
        let record = &store.records[&RecordKey::new("a.example", "/x")];
        assert!(record.document.h1.is_empty());
        assert_eq!(record.document.content, vec!["new"]);
        assert_eq!(record.watermark, Some(at(2)));
    }

    #[test]
    fn mark_skips_empty_content_without_touching_store() {
        let mut store = MapStore::default();
        let outcome = mark(&mut store, "a.example", "/empty", at(1), doc(&[])).unwrap();
        assert_eq!(outcome, MarkOutcome::SkippedEmpty);
        assert!(store.calls.is_empty());
    }

    #[test]
    fn sweep_is_scoped_to_hostname_and_watermark() {
        let mut store = MapStore::default();
        mark(&mut store, "a.example", "/old", at(1), doc(&["x"])).unwrap();
        mark(&mut store, "a.example", "/current", at(5), doc(&["x"])).unwrap();
        mark(&mut store, "b.example", "/old", at(1), doc(&["x"])).unwrap();
        store
            .create(&IndexRecord {
                key: RecordKey::new("a.example", "/unstamped"),
                document: doc(&["x"]),
                watermark: None,
            })
            .unwrap();

        let removed = sweep(&mut store, "a.example", at(5)).unwrap();
        assert_eq!(removed, 2);
        assert!(store.records.contains_key(&RecordKey::new("a.example", "/current")));
        assert!(store.records.contains_key(&RecordKey::new("b.example", "/old")));
        assert_eq!(store.records.len(), 2);
    }

    #[test]
    fn watermark_round_trips_through_micros() {
        let now = Watermark::now();
        assert_eq!(Watermark::from_micros(now.as_micros()), Some(now));
    }

    #[test]
    fn record_key_display() {
        assert_eq!(
            RecordKey::new("docs.example", "/intro").to_string(),
            "docs.example/intro"
        );
    }
}
