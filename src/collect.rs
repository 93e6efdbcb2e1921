use crate::closure::RelationGraph;
use crate::models::{EntityKey, ItemRecord, Relation};
use crate::source::{drive, DumpSource, RecordHandler};
use anyhow::Result;
use dashmap::DashMap;
use rustc_hash::{FxBuildHasher, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Direct edges of one relation as gathered from the dump.
pub struct CollectedGraph {
    pub relation: Relation,
    pub graph: RelationGraph<EntityKey>,
    pub direct_edges: u64,
    /// Entity-reference statements left out because an endpoint is not a plain entity id.
    pub dropped_edges: u64,
}

/// Pass 3a: one scan of the dump, gathering direct edges for every relation at once.
///
/// Targets are deduplicated per source; statement rank is ignored. Unlike the type
/// tables, which keep every entity-reference value, the closure graphs only hold
/// endpoints that pack into an [`EntityKey`]. Lexeme forms and senses (`L1-F2`) and
/// media ids (`M12`) are dropped here and reported per relation in
/// [`CollectedGraph::dropped_edges`].
pub fn collect_edges<S: DumpSource + ?Sized>(
    source: &S,
    relations: &[Relation],
) -> Result<Vec<CollectedGraph>> {
    let collector = EdgeCollector {
        graphs: relations
            .iter()
            .map(|_| DashMap::with_hasher(FxBuildHasher))
            .collect(),
        relations,
        dropped: relations.iter().map(|_| AtomicU64::new(0)).collect(),
    };

    drive(source, &collector, "edges")?;

    let collected: Vec<CollectedGraph> = relations
        .iter()
        .cloned()
        .zip(collector.graphs)
        .zip(collector.dropped)
        .map(|((relation, edges), dropped)| {
            let graph: RelationGraph<EntityKey> = edges.into_iter().collect();
            let direct_edges = graph.values().map(|targets| targets.len() as u64).sum();
            let dropped_edges = dropped.into_inner();
            info!(
                relation = relation.name,
                sources = graph.len(),
                direct_edges,
                dropped_edges,
                "Collected direct edges"
            );
            CollectedGraph {
                relation,
                graph,
                direct_edges,
                dropped_edges,
            }
        })
        .collect();

    Ok(collected)
}

struct EdgeCollector<'a> {
    graphs: Vec<DashMap<EntityKey, FxHashSet<EntityKey>, FxBuildHasher>>,
    relations: &'a [Relation],
    dropped: Vec<AtomicU64>,
}

impl RecordHandler for EdgeCollector<'_> {
    fn item(&self, item: &ItemRecord) {
        let mut source_key = None;

        for ((relation, graph), dropped) in self
            .relations
            .iter()
            .zip(&self.graphs)
            .zip(&self.dropped)
        {
            let mut targets = FxHashSet::default();
            let mut kept = 0;
            for target in item.terms.entity_targets(&relation.property) {
                match EntityKey::parse(target) {
                    Some(key) => {
                        kept += 1;
                        targets.insert(key);
                    }
                    None => {
                        debug!(id = item.id, target, "Skipping unpackable edge target");
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            if targets.is_empty() {
                continue;
            }

            let key = match source_key {
                Some(key) => key,
                None => match EntityKey::parse(&item.id) {
                    Some(key) => {
                        source_key = Some(key);
                        key
                    }
                    None => {
                        debug!(id = item.id, "Skipping edges of unpackable source");
                        dropped.fetch_add(kept, Ordering::Relaxed);
                        continue;
                    }
                },
            };
            graph.entry(key).or_default().extend(targets);
        }
    }
}
