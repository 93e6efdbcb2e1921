//! End-to-end tests for the three-pass Wikidata extraction pipeline.
//!
//! Every test starts from the shared `sample_dump()` fixture, written as a
//! bz2-compressed JSON array with one entity per line, exactly as the public
//! dumps are laid out.
//!
//! # Sample Data
//!
//! - Properties P31 (instance of) and P279 (subclass of)
//! - A small taxonomy: house cat -> pet -> animal -> organism via P279
//! - House cat carries P31 taxon twice, to exercise duplicate statements
//! - Q100 points at an entity missing from the dump and has a novalue P279
//! - A 12-edge P361 chain (Q1000 .. Q1012) that runs past the 10-hop cap
//! - One lexeme line and one malformed line, both skipped

use ariadne::cache;
use ariadne::lookup::ClosureLookup;
use ariadne::models::EntityInfo;
use ariadne::parser::DumpReader;
use ariadne::pipeline::{PipelineConfig, PipelineContext};
use ariadne::source::DumpFile;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::{NamedTempFile, TempDir};

fn compress_dump(lines: &[String]) -> Vec<u8> {
    let mut body = String::from("[\n");
    for line in lines {
        body.push_str(line);
        body.push_str(",\n");
    }
    body.push_str("]\n");

    let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(body.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

fn write_bz2(compressed: &[u8]) -> NamedTempFile {
    let mut tmp = tempfile::Builder::new()
        .suffix(".json.bz2")
        .tempfile()
        .unwrap();
    tmp.write_all(compressed).unwrap();
    tmp.flush().unwrap();
    tmp
}

fn create_bz2_dump(lines: &[String]) -> NamedTempFile {
    write_bz2(&compress_dump(lines))
}

fn term(value: &str) -> Value {
    json!({ "language": "en", "value": value })
}

fn reference(property: &str, target: &str) -> Value {
    let numeric: u64 = target[1..].parse().unwrap();
    json!({
        "mainsnak": {
            "snaktype": "value",
            "property": property,
            "datavalue": {
                "value": { "entity-type": "item", "numeric-id": numeric, "id": target },
                "type": "wikibase-entityid"
            }
        },
        "type": "statement",
        "rank": "normal"
    })
}

fn no_value(property: &str) -> Value {
    json!({
        "mainsnak": { "snaktype": "novalue", "property": property },
        "type": "statement",
        "rank": "normal"
    })
}

fn item(id: &str, label: Option<&str>, claims: Vec<(&str, Value)>) -> String {
    let mut grouped = serde_json::Map::new();
    for (property, statement) in claims {
        grouped
            .entry(property.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .unwrap()
            .push(statement);
    }
    let labels = match label {
        Some(label) => json!({ "en": term(label) }),
        None => json!([]),
    };
    json!({
        "type": "item",
        "id": id,
        "labels": labels,
        "descriptions": [],
        "aliases": [],
        "claims": grouped
    })
    .to_string()
}

fn sample_dump() -> Vec<String> {
    let mut lines = vec![
        json!({
            "type": "property",
            "datatype": "wikibase-item",
            "id": "P31",
            "labels": { "en": term("instance of") },
            "descriptions": { "en": term("that class of which this subject is a particular example") }
        })
        .to_string(),
        json!({
            "type": "property",
            "datatype": "wikibase-item",
            "id": "P279",
            "labels": { "en": term("subclass of") }
        })
        .to_string(),
        json!({
            "type": "item",
            "id": "Q146",
            "labels": { "en": term("house cat") },
            "aliases": { "en": [term("cat"), term("domestic cat")] },
            "descriptions": { "en": term("domesticated feline, mammal") },
            "claims": {
                "P31": [reference("P31", "Q16521"), reference("P31", "Q16521")],
                "P279": [reference("P279", "Q39201")]
            }
        })
        .to_string(),
        item("Q39201", Some("pet"), vec![("P279", reference("P279", "Q729"))]),
        item("Q729", Some("animal"), vec![("P279", reference("P279", "Q7239"))]),
        item("Q7239", Some("organism"), vec![]),
        item("Q16521", Some("taxon"), vec![]),
        item(
            "Q100",
            None,
            vec![
                ("P31", reference("P31", "Q999999")),
                ("P279", no_value("P279")),
            ],
        ),
        json!({ "type": "lexeme", "id": "L1", "lemmas": { "en": term("cat") } }).to_string(),
        "{not json".to_string(),
    ];

    for n in 1000..1012 {
        lines.push(item(
            &format!("Q{}", n),
            None,
            vec![("P361", reference("P361", &format!("Q{}", n + 1)))],
        ));
    }
    lines.push(item("Q1012", None, vec![]));
    lines
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn run_all(dump: &NamedTempFile, output: &TempDir) -> PipelineContext {
    let source = DumpFile::new(dump.path());
    let mut context = PipelineContext::new(PipelineConfig::new(output.path())).unwrap();
    context.build_label_cache(&source).unwrap();
    context.extract_tables(&source).unwrap();
    context
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[test]
fn reader_decodes_compressed_dump() {
    let dump = create_bz2_dump(&sample_dump());
    let mut reader = DumpReader::open(dump.path()).unwrap();
    let records: Vec<_> = reader.by_ref().collect();

    // 2 properties + 19 items; lexeme and malformed line dropped
    assert_eq!(records.len(), 21);
    assert_eq!(reader.malformed(), 1);
    assert_eq!(records[0].id(), "P31");
    assert_eq!(records[2].id(), "Q146");
}

#[test]
fn dump_file_limit_caps_every_pass() {
    let dump = create_bz2_dump(&sample_dump());
    let output = TempDir::new().unwrap();
    let source = DumpFile::new(dump.path()).with_limit(Some(3));

    let mut context = PipelineContext::new(PipelineConfig::new(output.path())).unwrap();
    let cache = context.build_label_cache(&source).unwrap();
    assert_eq!(cache.len(), 3);

    let summary = context.extract_tables(&source).unwrap();
    assert_eq!(summary.properties_processed, 2);
    assert_eq!(summary.items_processed, 1);
}

#[test]
fn truncated_dump_fails_the_label_pass() {
    let compressed = compress_dump(&sample_dump());
    let dump = write_bz2(&compressed[..compressed.len() / 2]);
    let output = TempDir::new().unwrap();
    let source = DumpFile::new(dump.path());

    let mut context = PipelineContext::new(PipelineConfig::new(output.path())).unwrap();
    assert!(context.build_label_cache(&source).is_err());
    assert!(context.label_cache().is_none());
    assert!(context.extract_tables(&source).is_err());
}

// ---------------------------------------------------------------------------
// Label and relation tables
// ---------------------------------------------------------------------------

#[test]
fn label_cache_covers_items_and_properties() {
    let dump = create_bz2_dump(&sample_dump());
    let output = TempDir::new().unwrap();
    let context = run_all(&dump, &output);
    let cache = context.label_cache().unwrap();

    assert_eq!(cache.len(), 21);
    assert_eq!(
        cache.get("Q146"),
        Some(EntityInfo::new(
            "house cat",
            "cat",
            "domesticated feline, mammal"
        ))
    );
    assert_eq!(cache.get("P279").unwrap().label.as_ref(), "subclass of");
    assert_eq!(cache.get("Q100"), Some(EntityInfo::default()));
    assert!(!cache.contains("L1"));
}

#[test]
fn labels_table_has_one_row_per_item() {
    let dump = create_bz2_dump(&sample_dump());
    let output = TempDir::new().unwrap();
    run_all(&dump, &output);

    let lines = read_lines(&output.path().join("entity_labels_alias_description.csv"));
    assert_eq!(lines[0], "qid,numeric_id,label,alias,description");
    assert_eq!(lines.len(), 1 + 19);
    assert!(lines.contains(&"Q146,146,house cat,cat,\"domesticated feline, mammal\"".to_string()));
    assert!(lines.contains(&"Q100,100,,,".to_string()));
    assert!(!lines.iter().any(|line| line.starts_with("P31,")));
}

#[test]
fn type_table_repeats_aggregates_for_duplicate_statements() {
    let dump = create_bz2_dump(&sample_dump());
    let output = TempDir::new().unwrap();
    run_all(&dump, &output);

    let lines = read_lines(&output.path().join("p31_entity_types.csv"));
    assert_eq!(
        lines[0],
        "entity,entity_numeric_id,entity_type,entity_type_numeric_id,label_type,alias,\
         type_qids_list,type_numeric_ids_list,type_labels_list"
    );

    let cat_rows: Vec<_> = lines.iter().filter(|l| l.starts_with("Q146,")).collect();
    assert_eq!(cat_rows.len(), 2);
    for row in cat_rows {
        assert_eq!(
            row,
            "Q146,146,Q16521,16521,taxon,,\"Q16521, Q16521\",\"16521, 16521\",\"taxon, taxon\""
        );
    }

    // Unknown targets keep their id with empty terms
    assert!(lines.contains(&"Q100,100,Q999999,999999,,,Q999999,999999,".to_string()));
}

#[test]
fn subclass_table_skips_non_reference_values() {
    let dump = create_bz2_dump(&sample_dump());
    let output = TempDir::new().unwrap();
    let source = DumpFile::new(dump.path());
    let mut context = PipelineContext::new(PipelineConfig::new(output.path())).unwrap();
    context.build_label_cache(&source).unwrap();
    let summary = context.extract_tables(&source).unwrap();

    let lines = read_lines(&output.path().join("p279_entity_types.csv"));
    assert_eq!(lines.len(), 1 + 3);
    assert!(lines.contains(&"Q39201,39201,Q729,729,animal,,Q729,729,animal".to_string()));
    assert!(!lines.iter().any(|line| line.starts_with("Q100,")));

    assert_eq!(summary.items_processed, 19);
    assert_eq!(summary.properties_processed, 2);
    assert_eq!(summary.skipped_values, 1);
    assert_eq!(summary.missing_cache_entries, 1);
    assert_eq!(summary.write_failures, 0);
    assert_eq!(summary.malformed_lines, 1);
}

#[test]
fn property_labels_table_lists_properties() {
    let dump = create_bz2_dump(&sample_dump());
    let output = TempDir::new().unwrap();
    run_all(&dump, &output);

    let mut lines = read_lines(&output.path().join("property_labels.csv"));
    assert_eq!(lines.remove(0), "property_id,numeric_id,property_label");
    lines.sort();
    assert_eq!(lines, vec!["P279,279,subclass of", "P31,31,instance of"]);
}

// ---------------------------------------------------------------------------
// Closures
// ---------------------------------------------------------------------------

#[test]
fn subclass_closure_follows_the_taxonomy() {
    let dump = create_bz2_dump(&sample_dump());
    let output = TempDir::new().unwrap();
    let context = PipelineContext::new(PipelineConfig::new(output.path())).unwrap();
    let summaries = context.compute_closures(&DumpFile::new(dump.path())).unwrap();

    let subclass = summaries
        .iter()
        .find(|s| s.relation == "subclass_of")
        .unwrap();
    assert_eq!(subclass.sources, 3);
    assert_eq!(subclass.direct_edges, 3);
    assert_eq!(subclass.closure_edges, 6);
    assert!(subclass.is_complete());

    let lines = read_lines(&output.path().join("subclass_of_transitive.csv"));
    assert_eq!(
        lines,
        vec![
            "entity_id,entity_id_numeric,transitive_closure_qids,transitive_closure_numeric_ids",
            "Q146,146,\"Q729, Q7239, Q39201\",\"729, 7239, 39201\"",
            "Q729,729,\"Q7239\",\"7239\"",
            "Q39201,39201,\"Q729, Q7239\",\"729, 7239\"",
        ]
    );
}

#[test]
fn long_part_of_chain_is_truncated_at_ten_hops() {
    let dump = create_bz2_dump(&sample_dump());
    let output = TempDir::new().unwrap();
    let context = PipelineContext::new(PipelineConfig::new(output.path())).unwrap();
    let summaries = context.compute_closures(&DumpFile::new(dump.path())).unwrap();

    let part_of = summaries.iter().find(|s| s.relation == "part_of").unwrap();
    assert_eq!(part_of.sources, 12);
    assert_eq!(part_of.truncated_sources, 2);
    assert!(!part_of.is_complete());

    let mut lookup = ClosureLookup::new();
    lookup
        .load("part_of", &output.path().join("part_of_transitive.csv"))
        .unwrap();
    let head = lookup.closure("part_of", "Q1000").unwrap();
    assert_eq!(head.len(), 10);
    assert!(head.contains("Q1010"));
    assert!(!head.contains("Q1011"));
    assert!(lookup.contains("part_of", "Q1002", "Q1012"));
}

#[test]
fn relations_without_edges_still_get_a_header() {
    let dump = create_bz2_dump(&sample_dump());
    let output = TempDir::new().unwrap();
    let context = PipelineContext::new(PipelineConfig::new(output.path())).unwrap();
    context.compute_closures(&DumpFile::new(dump.path())).unwrap();

    let lines = read_lines(&output.path().join("located_in_transitive.csv"));
    assert_eq!(lines.len(), 1);
}

#[test]
fn lookup_answers_membership_from_written_tables() {
    let dump = create_bz2_dump(&sample_dump());
    let output = TempDir::new().unwrap();
    let context = PipelineContext::new(PipelineConfig::new(output.path())).unwrap();
    context.compute_closures(&DumpFile::new(dump.path())).unwrap();

    let mut lookup = ClosureLookup::new();
    let loaded = lookup
        .load(
            "subclass_of",
            &output.path().join("subclass_of_transitive.csv"),
        )
        .unwrap();
    assert_eq!(loaded, 3);
    assert!(lookup.contains("subclass_of", "Q146", "Q7239"));
    assert!(!lookup.contains("subclass_of", "Q7239", "Q146"));
    assert!(!lookup.contains("subclass_of", "Q16521", "Q729"));
}

// ---------------------------------------------------------------------------
// Label cache persistence
// ---------------------------------------------------------------------------

#[test]
fn saved_label_cache_replaces_the_label_pass() {
    let dump = create_bz2_dump(&sample_dump());
    let output = TempDir::new().unwrap();
    let first = run_all(&dump, &output);
    cache::save_label_cache(
        first.label_cache().unwrap(),
        dump.path(),
        "en",
        output.path(),
    )
    .unwrap();
    let expected = read_lines(&output.path().join("p31_entity_types.csv"));

    let loaded = cache::try_load_label_cache(&cache::cache_path(output.path()), dump.path(), "en")
        .unwrap()
        .unwrap();
    assert_eq!(loaded.len(), 21);

    let rerun = TempDir::new().unwrap();
    let mut context = PipelineContext::new(PipelineConfig::new(rerun.path())).unwrap();
    context.set_label_cache(loaded);
    context.extract_tables(&DumpFile::new(dump.path())).unwrap();

    let mut before = expected;
    let mut after = read_lines(&rerun.path().join("p31_entity_types.csv"));
    before.sort();
    after.sort();
    assert_eq!(before, after);
}
