//! Bounded transitive closure over one relation graph.
//!
//! The closure of a source is every node reachable by following between 1 and
//! `max_hops` direct edges. Each relaxation round extends every source's reach by
//! exactly one hop, expanding only the nodes first reached in the previous round,
//! so the result after `h` rounds is independent of key order. Rounds stop early
//! once a round adds nothing. Sources whose reach is cut off by the hop cap are
//! reported in [`ClosureGraph::truncated_sources`] rather than silently dropped.
//! A truncated source holds exactly the nodes within `max_hops` hops of it, never
//! a partial view of nodes further out.

use crate::config::CLOSURE_HEADER;
use crate::models::EntityKey;
use crate::sink::{quote_always, CsvFileSink, RowSink};
use anyhow::Result;
use csv::QuoteStyle;
use rustc_hash::{FxHashMap, FxHashSet};
use std::hash::Hash;
use std::path::Path;
use tracing::{debug, warn};

/// Source -> set of directly related targets.
pub type RelationGraph<K> = FxHashMap<K, FxHashSet<K>>;

const WRITE_CHUNK: usize = 4096;

#[derive(Debug, Clone)]
pub struct ClosureGraph<K> {
    closure: FxHashMap<K, FxHashSet<K>>,
    iterations: u32,
    truncated: FxHashSet<K>,
}

impl<K: Eq + Hash> ClosureGraph<K> {
    pub fn get(&self, source: &K) -> Option<&FxHashSet<K>> {
        self.closure.get(source)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &FxHashSet<K>)> {
        self.closure.iter()
    }

    /// Number of sources; only nodes with at least one direct edge appear.
    pub fn len(&self) -> usize {
        self.closure.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closure.is_empty()
    }

    /// Total number of (source, reachable) pairs.
    pub fn edge_count(&self) -> u64 {
        self.closure.values().map(|set| set.len() as u64).sum()
    }

    /// Relaxation rounds run, including a final round that found nothing new.
    ///
    /// Not a stable quantity across topologies; only the closure itself is.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn is_truncated(&self) -> bool {
        !self.truncated.is_empty()
    }

    /// Sources with nodes further than `max_hops` away; their sets are true but incomplete.
    pub fn truncated_sources(&self) -> &FxHashSet<K> {
        &self.truncated
    }

    pub fn into_map(self) -> FxHashMap<K, FxHashSet<K>> {
        self.closure
    }
}

/// Computes the closure of `direct` bounded at `max_hops` hops.
///
/// A cap of 0 behaves as 1 (the direct edges themselves).
pub fn close_graph<K>(direct: &RelationGraph<K>, max_hops: u32) -> ClosureGraph<K>
where
    K: Eq + Hash + Clone,
{
    let max_hops = max_hops.max(1);
    let mut transitive: FxHashMap<K, FxHashSet<K>> = direct.clone();
    // Nodes each source reached for the first time in the latest round
    let mut frontier: FxHashMap<K, FxHashSet<K>> = direct.clone();
    let mut iterations = 0;
    let mut hops = 1;

    while hops < max_hops {
        hops += 1;
        iterations += 1;
        let mut changed = false;

        for (source, reachable) in transitive.iter_mut() {
            let Some(front) = frontier.get_mut(source) else {
                continue;
            };
            let next = expand(direct, front, reachable);
            if !next.is_empty() {
                changed = true;
                reachable.extend(next.iter().cloned());
            }
            *front = next;
        }
        frontier.retain(|_, front| !front.is_empty());

        debug!(iteration = iterations, active = frontier.len(), "Closure round");
        if !changed {
            break;
        }
    }

    let truncated = frontier
        .iter()
        .filter(|(source, front)| !expand(direct, front, &transitive[*source]).is_empty())
        .map(|(source, _)| source.clone())
        .collect();

    ClosureGraph {
        closure: transitive,
        iterations,
        truncated,
    }
}

/// Direct successors of `front` not yet in `reachable`.
fn expand<K>(direct: &RelationGraph<K>, front: &FxHashSet<K>, reachable: &FxHashSet<K>) -> FxHashSet<K>
where
    K: Eq + Hash + Clone,
{
    let mut next = FxHashSet::default();
    for node in front {
        let Some(targets) = direct.get(node) else {
            continue;
        };
        for target in targets {
            if !reachable.contains(target) {
                next.insert(target.clone());
            }
        }
    }
    next
}

/// Opens a closure table. List columns arrive quoted from [`write_closure`], so the
/// sink writes every field verbatim.
pub fn closure_sink(path: &Path) -> Result<CsvFileSink> {
    CsvFileSink::with_quote_style(path, &CLOSURE_HEADER, QuoteStyle::Never)
}

/// Writes one row per source, sorted by key, list columns always quoted.
///
/// Returns the number of chunk writes that failed; failures are logged and skipped.
pub fn write_closure(graph: &ClosureGraph<EntityKey>, sink: &dyn RowSink, relation: &str) -> u64 {
    let mut sources: Vec<&EntityKey> = graph.closure.keys().collect();
    sources.sort_unstable();

    let mut failures = 0;
    for chunk in sources.chunks(WRITE_CHUNK) {
        let rows: Vec<Vec<String>> = chunk
            .iter()
            .map(|source| closure_row(source, &graph.closure[*source]))
            .collect();
        if let Err(e) = sink.write_rows(&rows) {
            failures += 1;
            warn!(relation, error = %e, "Closure write failed, continuing");
        }
    }
    if let Err(e) = sink.flush() {
        failures += 1;
        warn!(relation, error = %e, "Closure flush failed");
    }
    failures
}

fn closure_row(source: &EntityKey, reachable: &FxHashSet<EntityKey>) -> Vec<String> {
    let mut members: Vec<&EntityKey> = reachable.iter().collect();
    members.sort_unstable();
    let ids: Vec<String> = members.iter().map(ToString::to_string).collect();
    let numeric: Vec<String> = members.iter().map(|key| key.numeric_str()).collect();
    vec![
        source.to_string(),
        source.numeric_str(),
        quote_always(&ids.join(", ")).into_owned(),
        quote_always(&numeric.join(", ")).into_owned(),
    ]
}
