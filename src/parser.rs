use crate::models::{
    EntityRecord, ItemRecord, PropertyRecord, Rank, Statement, StatementValue, Terms,
};
use crate::stats::ScanReport;
use anyhow::{Context, Result};
use bzip2::read::MultiBzDecoder;
use rustc_hash::FxHashMap;
use serde::de::{Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::marker::PhantomData;
use std::path::Path;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Streams entity records out of a Wikidata JSON dump, one entity per line.
///
/// The dump is a JSON array whose elements sit on their own lines with a trailing
/// comma; `.bz2` files are decoded as multi-stream bzip2. Lexemes and unknown
/// entity types are skipped, as are lines that fail to decode (invalid UTF-8
/// included). An I/O error ends the stream and is reported by [`DumpReader::finish`].
pub struct DumpReader {
    lines: Box<dyn BufRead + Send>,
    buf: Vec<u8>,
    line_no: u64,
    emitted: u64,
    limit: Option<u64>,
    malformed: u64,
    skipped: u64,
    read_error: Option<io::Error>,
}

impl DumpReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open dump file: {}", path.display()))?;
        let compressed = path.extension().is_some_and(|ext| ext == "bz2");
        let inner: Box<dyn Read + Send> = if compressed {
            Box::new(MultiBzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Self::from_reader(inner))
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self {
            lines: Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, reader)),
            buf: Vec::new(),
            line_no: 0,
            emitted: 0,
            limit: None,
            malformed: 0,
            skipped: 0,
            read_error: None,
        }
    }

    /// Stops after `limit` records.
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Consumes the reader, failing if the scan was cut short by a read error.
    pub fn finish(self) -> Result<ScanReport> {
        if let Some(e) = self.read_error {
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to read dump after line {}", self.line_no)));
        }
        Ok(ScanReport {
            records: self.emitted,
            malformed: self.malformed,
            skipped: self.skipped,
        })
    }

    fn decode_line(&mut self) -> Option<EntityRecord> {
        let line = self.buf.trim_ascii();
        let line = line.strip_suffix(b",").unwrap_or(line);
        if matches!(line, b"" | b"[" | b"]") {
            return None;
        }
        match serde_json::from_slice::<RawEntity>(line) {
            Ok(raw) => {
                let record = raw.into_record();
                if record.is_none() {
                    self.skipped += 1;
                }
                record
            }
            Err(e) => {
                self.malformed += 1;
                warn!(line = self.line_no, error = %e, "Skipping undecodable dump line");
                None
            }
        }
    }
}

impl Iterator for DumpReader {
    type Item = EntityRecord;

    fn next(&mut self) -> Option<EntityRecord> {
        if self.read_error.is_some() || self.limit.is_some_and(|limit| self.emitted >= limit) {
            return None;
        }
        loop {
            self.buf.clear();
            match self.lines.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    info!(
                        lines = self.line_no,
                        malformed = self.malformed,
                        skipped = self.skipped,
                        "Reached end of dump"
                    );
                    return None;
                }
                Ok(_) => {
                    self.line_no += 1;
                    if let Some(record) = self.decode_line() {
                        self.emitted += 1;
                        return Some(record);
                    }
                }
                Err(e) => {
                    warn!(line = self.line_no, error = %e, "Dump read failed, stopping scan");
                    self.read_error = Some(e);
                    return None;
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct RawTerm {
    value: String,
}

#[derive(Deserialize)]
struct RawEntity {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "map_or_empty_list")]
    labels: FxHashMap<String, RawTerm>,
    #[serde(default, deserialize_with = "map_or_empty_list")]
    descriptions: FxHashMap<String, RawTerm>,
    #[serde(default, deserialize_with = "map_or_empty_list")]
    aliases: FxHashMap<String, Vec<RawTerm>>,
    #[serde(default, deserialize_with = "map_or_empty_list")]
    claims: FxHashMap<String, Vec<RawStatement>>,
}

#[derive(Deserialize)]
struct RawStatement {
    mainsnak: RawSnak,
    #[serde(default)]
    rank: Option<String>,
}

#[derive(Deserialize)]
struct RawSnak {
    snaktype: String,
    #[serde(default)]
    datavalue: Option<RawDataValue>,
}

#[derive(Deserialize)]
struct RawDataValue {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: serde_json::Value,
}

/// Empty term and claim maps are serialized as `[]` rather than `{}` in the dumps.
fn map_or_empty_list<'de, D, V>(deserializer: D) -> Result<FxHashMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct MapOrList<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for MapOrList<V> {
        type Value = FxHashMap<String, V>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map, or an empty list standing in for one")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut map = FxHashMap::default();
            while let Some((key, value)) = access.next_entry::<String, V>()? {
                map.insert(key, value);
            }
            Ok(map)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            while access.next_element::<IgnoredAny>()?.is_some() {}
            Ok(FxHashMap::default())
        }
    }

    deserializer.deserialize_any(MapOrList(PhantomData))
}

impl RawDataValue {
    fn entity_id(&self) -> Option<String> {
        if self.kind != "wikibase-entityid" {
            return None;
        }
        if let Some(id) = self.value.get("id").and_then(|v| v.as_str()) {
            return Some(id.to_string());
        }
        // Older dumps only carry entity-type + numeric-id
        let numeric = self.value.get("numeric-id")?.as_u64()?;
        let prefix = match self.value.get("entity-type")?.as_str()? {
            "item" => 'Q',
            "property" => 'P',
            "lexeme" => 'L',
            _ => return None,
        };
        Some(format!("{}{}", prefix, numeric))
    }
}

impl RawStatement {
    fn into_statement(self) -> Statement {
        let rank = match self.rank.as_deref() {
            Some("preferred") => Rank::Preferred,
            Some("deprecated") => Rank::Deprecated,
            _ => Rank::Normal,
        };
        let value = match self.mainsnak.snaktype.as_str() {
            "somevalue" => StatementValue::SomeValue,
            "novalue" => StatementValue::NoValue,
            _ => match self.mainsnak.datavalue.as_ref().and_then(RawDataValue::entity_id) {
                Some(id) => StatementValue::Entity(id),
                None => StatementValue::Literal,
            },
        };
        Statement { value, rank }
    }
}

impl RawEntity {
    fn into_record(self) -> Option<EntityRecord> {
        let terms = Terms {
            labels: flatten_terms(self.labels),
            aliases: self
                .aliases
                .into_iter()
                .map(|(lang, list)| (lang, list.into_iter().map(|t| t.value).collect()))
                .collect(),
            descriptions: flatten_terms(self.descriptions),
            statements: self
                .claims
                .into_iter()
                .map(|(pid, group)| {
                    (pid, group.into_iter().map(RawStatement::into_statement).collect())
                })
                .collect(),
        };

        match self.kind.as_str() {
            "item" => Some(EntityRecord::Item(ItemRecord { id: self.id, terms })),
            "property" => Some(EntityRecord::Property(PropertyRecord {
                id: self.id,
                terms: Terms {
                    descriptions: FxHashMap::default(),
                    ..terms
                },
            })),
            other => {
                debug!(id = self.id, kind = other, "Skipping unsupported entity type");
                None
            }
        }
    }
}

fn flatten_terms(terms: FxHashMap<String, RawTerm>) -> FxHashMap<String, String> {
    terms
        .into_iter()
        .map(|(lang, term)| (lang, term.value))
        .collect()
}
