use anyhow::{bail, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Returns the id with its one-letter kind prefix removed (`Q123` -> `123`).
///
/// Ids shorter than two characters have no numeric body and yield `""`.
pub fn numeric_id(id: &str) -> &str {
    let mut chars = id.chars();
    match chars.next() {
        Some(_) => chars.as_str(),
        None => "",
    }
}

const KIND_SHIFT: u32 = 56;
const NUMERIC_MASK: u64 = (1 << KIND_SHIFT) - 1;

/// Compact key for an entity id: the kind letter in the top byte, the numeric body below.
///
/// Only canonical ids pack (`Q42`, `P31`, `L7`, `E3`); anything else, including
/// lexeme forms like `L1-F2` and zero-padded bodies, is rejected by [`EntityKey::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(u64);

impl EntityKey {
    pub fn parse(id: &str) -> Option<Self> {
        let bytes = id.as_bytes();
        let (&kind, body) = bytes.split_first()?;
        if !matches!(kind, b'Q' | b'P' | b'L' | b'E') {
            return None;
        }
        if body.is_empty() || body[0] == b'0' || !body.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let numeric: u64 = std::str::from_utf8(body).ok()?.parse().ok()?;
        if numeric > NUMERIC_MASK {
            return None;
        }
        Some(Self((u64::from(kind) << KIND_SHIFT) | numeric))
    }

    pub fn kind(self) -> char {
        char::from((self.0 >> KIND_SHIFT) as u8)
    }

    pub fn numeric(self) -> u64 {
        self.0 & NUMERIC_MASK
    }

    /// Writes the numeric body without going through `fmt`.
    pub fn numeric_str(self) -> String {
        itoa::Buffer::new().format(self.numeric()).to_string()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind(), itoa::Buffer::new().format(self.numeric()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Preferred,
    Normal,
    Deprecated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementValue {
    /// Reference to another entity (`Q5`, `P31`, ...)
    Entity(String),
    SomeValue,
    NoValue,
    /// Any non-reference datavalue (strings, quantities, times, ...)
    Literal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub value: StatementValue,
    pub rank: Rank,
}

impl Statement {
    pub fn entity(id: impl Into<String>) -> Self {
        Self {
            value: StatementValue::Entity(id.into()),
            rank: Rank::Normal,
        }
    }

    pub fn entity_id(&self) -> Option<&str> {
        match &self.value {
            StatementValue::Entity(id) => Some(id),
            _ => None,
        }
    }
}

/// Terms and statements shared by items and properties.
#[derive(Debug, Clone, Default)]
pub struct Terms {
    pub labels: FxHashMap<String, String>,
    pub aliases: FxHashMap<String, Vec<String>>,
    pub descriptions: FxHashMap<String, String>,
    pub statements: FxHashMap<String, Vec<Statement>>,
}

impl Terms {
    pub fn label(&self, language: &str) -> Option<&str> {
        self.labels.get(language).map(String::as_str)
    }

    pub fn first_alias(&self, language: &str) -> Option<&str> {
        self.aliases
            .get(language)
            .and_then(|list| list.first())
            .map(String::as_str)
    }

    pub fn description(&self, language: &str) -> Option<&str> {
        self.descriptions.get(language).map(String::as_str)
    }

    /// Entity-reference targets of one relation, in statement order, duplicates kept.
    pub fn entity_targets<'a>(&'a self, property: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.statements
            .get(property)
            .into_iter()
            .flatten()
            .filter_map(Statement::entity_id)
    }

    /// Number of statements in a relation group whose value is not an entity reference.
    pub fn non_reference_count(&self, property: &str) -> usize {
        self.statements
            .get(property)
            .map(|group| group.iter().filter(|s| s.entity_id().is_none()).count())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub id: String,
    pub terms: Terms,
}

#[derive(Debug, Clone)]
pub struct PropertyRecord {
    pub id: String,
    pub terms: Terms,
}

macro_rules! record_builders {
    ($ty:ty) => {
        impl $ty {
            pub fn new(id: impl Into<String>) -> Self {
                Self {
                    id: id.into(),
                    terms: Terms::default(),
                }
            }

            pub fn with_label(mut self, language: &str, label: &str) -> Self {
                self.terms.labels.insert(language.to_string(), label.to_string());
                self
            }

            pub fn with_alias(mut self, language: &str, alias: &str) -> Self {
                self.terms
                    .aliases
                    .entry(language.to_string())
                    .or_default()
                    .push(alias.to_string());
                self
            }

            pub fn with_description(mut self, language: &str, description: &str) -> Self {
                self.terms
                    .descriptions
                    .insert(language.to_string(), description.to_string());
                self
            }

            pub fn with_statement(mut self, property: &str, statement: Statement) -> Self {
                self.terms
                    .statements
                    .entry(property.to_string())
                    .or_default()
                    .push(statement);
                self
            }

            pub fn with_reference(self, property: &str, target: &str) -> Self {
                self.with_statement(property, Statement::entity(target))
            }
        }
    };
}

record_builders!(ItemRecord);
record_builders!(PropertyRecord);

/// One decoded unit of the dump.
#[derive(Debug, Clone)]
pub enum EntityRecord {
    Item(ItemRecord),
    Property(PropertyRecord),
}

impl EntityRecord {
    pub fn id(&self) -> &str {
        match self {
            EntityRecord::Item(item) => &item.id,
            EntityRecord::Property(property) => &property.id,
        }
    }
}

/// Cached terms of one entity in the configured language; empty when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub label: Box<str>,
    pub alias: Box<str>,
    pub description: Box<str>,
}

impl EntityInfo {
    pub fn new(label: &str, alias: &str, description: &str) -> Self {
        Self {
            label: label.into(),
            alias: alias.into(),
            description: description.into(),
        }
    }
}

/// Denormalized snapshot of a relation target at extraction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub id: String,
    pub numeric_id: String,
    pub label: String,
    pub alias: String,
}

impl TypeRef {
    /// Builds the snapshot from a cache hit, or with empty terms on a miss.
    pub fn new(id: &str, info: Option<&EntityInfo>) -> Self {
        let (label, alias) = info
            .map(|info| (info.label.to_string(), info.alias.to_string()))
            .unwrap_or_default();
        Self {
            id: id.to_string(),
            numeric_id: numeric_id(id).to_string(),
            label,
            alias,
        }
    }
}

/// A relation property and the name its output table is written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub property: String,
    pub name: String,
}

impl Relation {
    pub fn new(property: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            name: name.into(),
        }
    }
}

impl FromStr for Relation {
    type Err = anyhow::Error;

    /// Parses `P279=subclass_of`.
    fn from_str(s: &str) -> Result<Self> {
        let Some((property, name)) = s.split_once('=') else {
            bail!("Expected PROPERTY=NAME, got: {}", s);
        };
        let (property, name) = (property.trim(), name.trim());
        if !property.starts_with('P') || EntityKey::parse(property).is_none() {
            bail!("Not a property id: {}", property);
        }
        if name.is_empty() {
            bail!("Missing relation name for {}", property);
        }
        Ok(Self::new(property, name))
    }
}
