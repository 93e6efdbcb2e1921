//! Ariadne: Wikidata JSON dump extraction into relational tables and transitive closures
//!
//! The dump is streamed three times, each scan dispatching entities to rayon workers:
//!
//! 1. **Label Pass** -- Build a concurrent id -> (label, first alias, description) cache
//!    for one language, covering both items and properties
//! 2. **Extraction Pass** -- Join every item against the cache and write the labels
//!    table, one type table per configured relation (P31, P279) and the property labels
//! 3. **Closure Pass** -- Collect the direct edges of every closure relation in one scan,
//!    then compute a bounded transitive closure per relation and write it as CSV
//!
//! # Architecture
//!
//! - **Streaming JSON lines** -- One entity per line; multi-stream bz2 is decoded on the fly
//! - **Pluggable sources and sinks** -- [`source::DumpSource`] and [`sink::RowSink`] let
//!   tests run every pass on in-memory entities and rows
//! - **Packed entity keys** -- Closure graphs key on [`models::EntityKey`] (one `u64`)
//! - **Best-effort writes** -- A failed row write is logged and counted, never fatal
//! - **Label cache persistence** -- bincode snapshot validated against the dump's
//!   path, size, mtime and language
//!
//! # Key Modules
//!
//! - [`parser`] -- Dump line decoding into [`models::EntityRecord`]
//! - [`labels`] -- Pass 1 label cache
//! - [`extract`] -- Pass 2 relation tables
//! - [`collect`] -- Pass 3 direct-edge collection
//! - [`closure`] -- Hop-bounded closure and its CSV rows
//! - [`pipeline`] -- Pass ordering and output file layout
//! - [`lookup`] -- Membership checks against written closure tables
//! - [`cache`] -- Label cache persistence
//! - [`stats`] -- Atomic counters and pass summaries
//! - [`config`] -- Defaults, file names and headers
//!
//! # Example Usage
//!
//! ```bash
//! ariadne extract -i latest-all.json.bz2 -o output/ -v
//! ariadne closures -i latest-all.json.bz2 -o output/ --closure-relation P279=subclass_of
//! ariadne check -o output/ -r subclass_of Q146 Q729
//! ```

pub mod cache;
pub mod closure;
pub mod collect;
pub mod config;
pub mod extract;
pub mod labels;
pub mod lookup;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod stats;
