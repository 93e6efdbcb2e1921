use crate::closure::{close_graph, closure_sink, write_closure};
use crate::collect::collect_edges;
use crate::config::{
    CLOSURE_RELATIONS, DEFAULT_BATCH_SIZE, DEFAULT_LANGUAGE, DEFAULT_MAX_HOPS,
    LABELS_FILE, LABELS_HEADER, PROPERTY_LABELS_FILE, PROPERTY_LABELS_HEADER, RELATION_HEADER,
    TABLE_RELATIONS,
};
use crate::extract::{run_extraction, ExtractionSinks};
use crate::labels::LabelCache;
use crate::models::Relation;
use crate::sink::{CsvFileSink, RowSink};
use crate::source::DumpSource;
use crate::stats::{ClosureSummary, ExtractionSummary};
use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub language: String,
    pub table_relations: Vec<Relation>,
    pub closure_relations: Vec<Relation>,
    pub batch_size: u64,
    pub max_hops: u32,
}

impl PipelineConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            language: DEFAULT_LANGUAGE.to_string(),
            table_relations: TABLE_RELATIONS
                .iter()
                .map(|(property, name)| Relation::new(*property, *name))
                .collect(),
            closure_relations: CLOSURE_RELATIONS
                .iter()
                .map(|(property, name)| Relation::new(*property, *name))
                .collect(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_table_relations(mut self, relations: Vec<Relation>) -> Self {
        self.table_relations = relations;
        self
    }

    pub fn with_closure_relations(mut self, relations: Vec<Relation>) -> Self {
        self.closure_relations = relations;
        self
    }

    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_max_hops(mut self, hops: u32) -> Self {
        self.max_hops = hops.max(1);
        self
    }

    pub fn table_path(&self, relation: &Relation) -> PathBuf {
        self.output_dir.join(format!("{}.csv", relation.name))
    }

    pub fn closure_path(&self, relation: &Relation) -> PathBuf {
        closure_path(&self.output_dir, &relation.name)
    }
}

pub fn closure_path(output_dir: &Path, relation_name: &str) -> PathBuf {
    output_dir.join(format!("{}_transitive.csv", relation_name))
}

/// Owns the label cache and opens/closes the sinks of each pass.
///
/// Passes must run in order: the label cache is built (or installed) before
/// [`PipelineContext::extract_tables`]. The closure pass depends on neither.
pub struct PipelineContext {
    config: PipelineConfig,
    cache: Option<LabelCache>,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                config.output_dir.display()
            )
        })?;
        Ok(Self {
            config,
            cache: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn label_cache(&self) -> Option<&LabelCache> {
        self.cache.as_ref()
    }

    /// Pass 1.
    pub fn build_label_cache<S: DumpSource + ?Sized>(&mut self, source: &S) -> Result<&LabelCache> {
        let cache = LabelCache::build(source, &self.config.language)?;
        Ok(&*self.cache.insert(cache))
    }

    /// Installs a cache loaded from disk in place of pass 1.
    pub fn set_label_cache(&mut self, cache: LabelCache) {
        self.cache = Some(cache);
    }

    /// Pass 2.
    pub fn extract_tables<S: DumpSource + ?Sized>(&self, source: &S) -> Result<ExtractionSummary> {
        let Some(cache) = self.cache.as_ref() else {
            bail!("Label cache must be built before the extraction pass");
        };
        let config = &self.config;

        let labels = CsvFileSink::create(&config.output_dir.join(LABELS_FILE), &LABELS_HEADER)?;
        let properties = CsvFileSink::create(
            &config.output_dir.join(PROPERTY_LABELS_FILE),
            &PROPERTY_LABELS_HEADER,
        )?;
        let relations = config
            .table_relations
            .iter()
            .map(|relation| CsvFileSink::create(&config.table_path(relation), &RELATION_HEADER))
            .collect::<Result<Vec<_>>>()?;

        let sinks = ExtractionSinks {
            labels: &labels,
            relations: relations.iter().map(|sink| sink as &dyn RowSink).collect(),
            properties: &properties,
        };
        let mut summary = run_extraction(
            source,
            cache,
            &config.table_relations,
            sinks,
            config.batch_size,
        )?;

        for sink in std::iter::once(labels)
            .chain(std::iter::once(properties))
            .chain(relations)
        {
            let path = sink.path().to_path_buf();
            if let Err(e) = sink.close() {
                summary.write_failures += 1;
                warn!(path = ?path, error = %e, "Failed to close output file");
            }
        }

        Ok(summary)
    }

    /// Pass 3: collects every closure relation in one scan, then closes the graphs in parallel.
    pub fn compute_closures<S: DumpSource + ?Sized>(&self, source: &S) -> Result<Vec<ClosureSummary>> {
        let config = &self.config;
        let collected = collect_edges(source, &config.closure_relations)?;

        info!(
            relations = collected.len(),
            max_hops = config.max_hops,
            "Computing transitive closures"
        );

        collected
            .into_par_iter()
            .map(|collected| -> Result<ClosureSummary> {
                let closure = close_graph(&collected.graph, config.max_hops);
                let relation = &collected.relation;
                if closure.is_truncated() {
                    warn!(
                        relation = relation.name,
                        truncated = closure.truncated_sources().len(),
                        max_hops = config.max_hops,
                        "Closure truncated at hop cap; some sets are incomplete"
                    );
                }

                let sink = closure_sink(&config.closure_path(relation))?;
                let mut write_failures = write_closure(&closure, &sink, &relation.name);
                if let Err(e) = sink.close() {
                    write_failures += 1;
                    warn!(relation = relation.name, error = %e, "Failed to close closure file");
                }

                let summary = ClosureSummary {
                    relation: relation.name.clone(),
                    sources: closure.len(),
                    direct_edges: collected.direct_edges,
                    dropped_edges: collected.dropped_edges,
                    closure_edges: closure.edge_count(),
                    iterations: closure.iterations(),
                    truncated_sources: closure.truncated_sources().len(),
                    write_failures,
                };
                info!(
                    relation = summary.relation,
                    sources = summary.sources,
                    closure_edges = summary.closure_edges,
                    iterations = summary.iterations,
                    "Closure written"
                );
                Ok(summary)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityRecord, ItemRecord, PropertyRecord};
    use tempfile::TempDir;

    fn sample_dump() -> Vec<EntityRecord> {
        vec![
            EntityRecord::Item(
                ItemRecord::new("Q1")
                    .with_label("en", "cat")
                    .with_reference("P31", "Q2")
                    .with_reference("P279", "Q2"),
            ),
            EntityRecord::Item(
                ItemRecord::new("Q2")
                    .with_label("en", "mammal")
                    .with_reference("P279", "Q3"),
            ),
            EntityRecord::Item(ItemRecord::new("Q3").with_label("en", "animal")),
            EntityRecord::Property(PropertyRecord::new("P279").with_label("en", "subclass of")),
        ]
    }

    #[test]
    fn extraction_requires_label_cache() {
        let dir = TempDir::new().unwrap();
        let context = PipelineContext::new(PipelineConfig::new(dir.path())).unwrap();
        assert!(context.extract_tables(&sample_dump()).is_err());
    }

    #[test]
    fn config_defaults_and_builders() {
        let config = PipelineConfig::new("/out")
            .with_language("de")
            .with_batch_size(0)
            .with_max_hops(3);
        assert_eq!(config.language, "de");
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_hops, 3);
        assert_eq!(config.table_relations.len(), 2);
        assert_eq!(config.closure_relations.len(), 5);
        assert_eq!(
            config.closure_path(&config.closure_relations[0]),
            PathBuf::from("/out/subclass_of_transitive.csv")
        );
        assert_eq!(
            config.table_path(&config.table_relations[0]),
            PathBuf::from("/out/p31_entity_types.csv")
        );
    }

    #[test]
    fn passes_write_every_table() {
        let dir = TempDir::new().unwrap();
        let mut context = PipelineContext::new(PipelineConfig::new(dir.path())).unwrap();
        let dump = sample_dump();

        context.build_label_cache(&dump).unwrap();
        let summary = context.extract_tables(&dump).unwrap();
        assert_eq!(summary.items_processed, 3);
        assert_eq!(summary.relation_rows, 3);
        assert_eq!(summary.write_failures, 0);

        let closures = context.compute_closures(&dump).unwrap();
        assert_eq!(closures.len(), 5);
        let subclass = closures.iter().find(|c| c.relation == "subclass_of").unwrap();
        assert_eq!(subclass.sources, 2);
        assert_eq!(subclass.closure_edges, 3);
        assert!(subclass.is_complete());

        for name in [
            "entity_labels_alias_description.csv",
            "property_labels.csv",
            "p31_entity_types.csv",
            "p279_entity_types.csv",
            "subclass_of_transitive.csv",
            "part_of_transitive.csv",
            "has_parts_transitive.csv",
            "located_in_transitive.csv",
            "is_metaclass_for_transitive.csv",
        ] {
            assert!(dir.path().join(name).exists(), "{} missing", name);
        }

        let subclass_csv = fs::read_to_string(dir.path().join("subclass_of_transitive.csv")).unwrap();
        let lines: Vec<&str> = subclass_csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "entity_id,entity_id_numeric,transitive_closure_qids,transitive_closure_numeric_ids",
                "Q1,1,\"Q2, Q3\",\"2, 3\"",
                "Q2,2,\"Q3\",\"3\"",
            ]
        );
    }

    #[test]
    fn installed_cache_replaces_pass_one() {
        let dir = TempDir::new().unwrap();
        let mut context = PipelineContext::new(PipelineConfig::new(dir.path())).unwrap();
        context.set_label_cache(LabelCache::new());
        assert!(context.label_cache().unwrap().is_empty());

        let summary = context.extract_tables(&sample_dump()).unwrap();
        // Three unlabeled items plus three unresolved targets
        assert_eq!(summary.missing_cache_entries, 6);
    }
}
