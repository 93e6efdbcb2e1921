use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected during the extraction pass
#[derive(Default)]
pub struct ExtractionStats {
    pub items_processed: AtomicU64,
    pub properties_processed: AtomicU64,
    pub label_rows: AtomicU64,
    pub relation_rows: AtomicU64,
    pub property_rows: AtomicU64,
    pub skipped_values: AtomicU64,
    pub missing_cache_entries: AtomicU64,
    pub write_failures: AtomicU64,
}

/// Plain copy of [`ExtractionStats`] handed back to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub items_processed: u64,
    pub properties_processed: u64,
    pub label_rows: u64,
    pub relation_rows: u64,
    pub property_rows: u64,
    pub skipped_values: u64,
    pub missing_cache_entries: u64,
    pub write_failures: u64,
    /// Dump lines that failed to decode during the scan.
    pub malformed_lines: u64,
}

/// What one scan of a dump saw, filled in by [`crate::source::drive`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub records: u64,
    pub malformed: u64,
    /// Entities of unsupported types, such as lexemes.
    pub skipped: u64,
}

impl ExtractionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the running item count including this one.
    pub fn inc_items(&self) -> u64 {
        self.items_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_properties(&self) -> u64 {
        self.properties_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_label_rows(&self) {
        self.label_rows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_relation_rows(&self, count: u64) {
        self.relation_rows.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_property_rows(&self) {
        self.property_rows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_skipped_values(&self, count: u64) {
        self.skipped_values.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_missing_cache_entries(&self, count: u64) {
        self.missing_cache_entries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_write_failures(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn items(&self) -> u64 {
        self.items_processed.load(Ordering::Relaxed)
    }

    pub fn properties(&self) -> u64 {
        self.properties_processed.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ExtractionSummary {
        ExtractionSummary {
            items_processed: self.items(),
            properties_processed: self.properties(),
            label_rows: self.label_rows.load(Ordering::Relaxed),
            relation_rows: self.relation_rows.load(Ordering::Relaxed),
            property_rows: self.property_rows.load(Ordering::Relaxed),
            skipped_values: self.skipped_values.load(Ordering::Relaxed),
            missing_cache_entries: self.missing_cache_entries.load(Ordering::Relaxed),
            write_failures: self.write_failures(),
            malformed_lines: 0,
        }
    }
}

/// Outcome of edge collection and closure for one relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureSummary {
    pub relation: String,
    pub sources: usize,
    pub direct_edges: u64,
    /// Edges left out because an endpoint is not a plain entity id.
    pub dropped_edges: u64,
    pub closure_edges: u64,
    pub iterations: u32,
    pub truncated_sources: usize,
    pub write_failures: u64,
}

impl ClosureSummary {
    pub fn is_complete(&self) -> bool {
        self.truncated_sources == 0 && self.write_failures == 0
    }
}
