use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use tracing::info;

type ClosureTable = FxHashMap<String, FxHashSet<String>>;

/// Membership checks against closure tables written by the closure pass.
#[derive(Default)]
pub struct ClosureLookup {
    tables: FxHashMap<String, ClosureTable>,
}

impl ClosureLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a closure CSV under `table`, replacing any table of the same name.
    pub fn load(&mut self, table: &str, csv_path: &Path) -> Result<usize> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .from_path(csv_path)
            .with_context(|| format!("Failed to open closure table: {}", csv_path.display()))?;

        let headers = reader.headers()?.clone();
        let entity_col = column(&headers, "entity_id", csv_path)?;
        let closure_col = column(&headers, "transitive_closure_qids", csv_path)?;

        let mut entries = ClosureTable::default();
        for result in reader.records() {
            let record = result
                .with_context(|| format!("Malformed row in: {}", csv_path.display()))?;
            let Some(entity) = record.get(entity_col) else {
                continue;
            };
            let members = record
                .get(closure_col)
                .unwrap_or("")
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            entries.insert(entity.to_string(), members);
        }

        let count = entries.len();
        info!(table, entities = count, path = ?csv_path, "Closure table loaded");
        self.tables.insert(table.to_string(), entries);
        Ok(count)
    }

    /// True when `target` is in the closure of `entity`; unknown tables or entities are false.
    pub fn contains(&self, table: &str, entity: &str, target: &str) -> bool {
        self.tables
            .get(table)
            .and_then(|entries| entries.get(entity))
            .is_some_and(|members| members.contains(target))
    }

    pub fn closure(&self, table: &str, entity: &str) -> Option<&FxHashSet<String>> {
        self.tables.get(table)?.get(entity)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

fn column(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .with_context(|| format!("Missing column '{}' in: {}", name, path.display()))
}
