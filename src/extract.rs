use crate::labels::LabelCache;
use crate::models::{numeric_id, ItemRecord, PropertyRecord, Relation, Terms, TypeRef};
use crate::sink::RowSink;
use crate::source::{drive, DumpSource, RecordHandler};
use crate::stats::{ExtractionStats, ExtractionSummary};
use anyhow::{bail, Result};
use tracing::{debug, info, warn};

/// Sinks written by the extraction pass. `relations` lines up with the relation list.
pub struct ExtractionSinks<'a> {
    pub labels: &'a dyn RowSink,
    pub relations: Vec<&'a dyn RowSink>,
    pub properties: &'a dyn RowSink,
}

impl ExtractionSinks<'_> {
    fn all(&self) -> impl Iterator<Item = (&dyn RowSink, &'static str)> + '_ {
        std::iter::once((self.labels, "labels"))
            .chain(self.relations.iter().map(|sink| (*sink, "relation")))
            .chain(std::iter::once((self.properties, "property_labels")))
    }
}

/// Pass 2: joins every entity against the label cache and writes the relational tables.
///
/// Row writes are best-effort: a failed write is logged and counted in
/// [`ExtractionSummary::write_failures`], and the scan moves on to the next entity.
pub fn run_extraction<S: DumpSource + ?Sized>(
    source: &S,
    cache: &LabelCache,
    relations: &[Relation],
    sinks: ExtractionSinks<'_>,
    batch_size: u64,
) -> Result<ExtractionSummary> {
    if relations.len() != sinks.relations.len() {
        bail!(
            "Got {} relation sinks for {} relations",
            sinks.relations.len(),
            relations.len()
        );
    }

    let extractor = Extractor {
        cache,
        relations,
        sinks,
        batch_size,
        stats: ExtractionStats::new(),
    };

    let scan = drive(source, &extractor, "extract")?;
    extractor.flush_all();

    let mut summary = extractor.stats.snapshot();
    summary.malformed_lines = scan.malformed;
    info!(
        items = summary.items_processed,
        properties = summary.properties_processed,
        relation_rows = summary.relation_rows,
        missing = summary.missing_cache_entries,
        write_failures = summary.write_failures,
        "Extraction pass finished"
    );
    if summary.write_failures > 0 {
        warn!(
            write_failures = summary.write_failures,
            "Some rows could not be written; output is incomplete"
        );
    }
    Ok(summary)
}

/// Relation rows for one entity, one per entity-reference statement in encounter order.
///
/// Every row repeats the full aggregate lists, duplicates included. Returns the rows
/// and the number of targets missing from the cache.
pub fn relation_rows(
    cache: &LabelCache,
    entity_id: &str,
    terms: &Terms,
    property: &str,
) -> (Vec<Vec<String>>, u64) {
    let mut missing = 0;
    let targets: Vec<TypeRef> = terms
        .entity_targets(property)
        .map(|target| {
            cache.resolve(target).unwrap_or_else(|| {
                missing += 1;
                TypeRef::new(target, None)
            })
        })
        .collect();

    if targets.is_empty() {
        return (Vec::new(), 0);
    }

    let ids = join(targets.iter().map(|t| t.id.as_str()));
    let numeric_ids = join(targets.iter().map(|t| t.numeric_id.as_str()));
    let labels = join(targets.iter().map(|t| t.label.as_str()));
    let entity_numeric = numeric_id(entity_id);

    let rows = targets
        .iter()
        .map(|target| {
            vec![
                entity_id.to_string(),
                entity_numeric.to_string(),
                target.id.clone(),
                target.numeric_id.clone(),
                target.label.clone(),
                target.alias.clone(),
                ids.clone(),
                numeric_ids.clone(),
                labels.clone(),
            ]
        })
        .collect();

    (rows, missing)
}

fn join<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<Vec<_>>().join(", ")
}

struct Extractor<'a> {
    cache: &'a LabelCache,
    relations: &'a [Relation],
    sinks: ExtractionSinks<'a>,
    batch_size: u64,
    stats: ExtractionStats,
}

impl Extractor<'_> {
    fn write(&self, sink: &dyn RowSink, rows: &[Vec<String>], table: &str, id: &str) -> bool {
        match sink.write_rows(rows) {
            Ok(()) => true,
            Err(e) => {
                self.stats.inc_write_failures();
                warn!(table, id, error = %e, "Row write failed, continuing");
                false
            }
        }
    }

    fn flush_all(&self) {
        for (sink, table) in self.sinks.all() {
            if let Err(e) = sink.flush() {
                self.stats.inc_write_failures();
                warn!(table, error = %e, "Flush failed");
            }
        }
    }

    fn maybe_flush(&self, processed: u64) {
        if self.batch_size > 0 && processed % self.batch_size == 0 {
            debug!(processed, "Flushing output sinks");
            self.flush_all();
        }
    }
}

impl RecordHandler for Extractor<'_> {
    fn item(&self, item: &ItemRecord) {
        let id = item.id.as_str();
        let info = self.cache.get(id).unwrap_or_else(|| {
            self.stats.add_missing_cache_entries(1);
            Default::default()
        });

        let labels_row = vec![
            id.to_string(),
            numeric_id(id).to_string(),
            info.label.to_string(),
            info.alias.to_string(),
            info.description.to_string(),
        ];
        if self.write(self.sinks.labels, &[labels_row], "labels", id) {
            self.stats.inc_label_rows();
        }

        for (relation, sink) in self.relations.iter().zip(&self.sinks.relations) {
            let skipped = item.terms.non_reference_count(&relation.property);
            self.stats.add_skipped_values(skipped as u64);

            let (rows, missing) = relation_rows(self.cache, id, &item.terms, &relation.property);
            self.stats.add_missing_cache_entries(missing);
            if rows.is_empty() {
                continue;
            }
            if self.write(*sink, &rows, &relation.name, id) {
                self.stats.add_relation_rows(rows.len() as u64);
            }
        }

        let processed = self.stats.inc_items();
        self.maybe_flush(processed);
    }

    fn property(&self, property: &PropertyRecord) {
        let id = property.id.as_str();
        let info = self.cache.info_or_empty(id);
        let row = vec![
            id.to_string(),
            numeric_id(id).to_string(),
            info.label.to_string(),
        ];
        if self.write(self.sinks.properties, &[row], "property_labels", id) {
            self.stats.inc_property_rows();
        }
        self.stats.inc_properties();
    }
}
