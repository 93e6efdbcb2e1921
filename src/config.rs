/// Language whose label, first alias and description are read from each entity
pub const DEFAULT_LANGUAGE: &str = "en";

/// Maximum number of hops followed when computing a bounded transitive closure
pub const DEFAULT_MAX_HOPS: u32 = 10;

/// Flush every output sink after this many processed entities
pub const DEFAULT_BATCH_SIZE: u64 = 10_000;

/// Progress update interval (tick every N records)
pub const PROGRESS_INTERVAL: u64 = 100_000;

/// Buffer size for every CSV writer
pub const WRITER_BUFFER_SIZE: usize = 128 * 1024;

/// Bump when the on-disk layout of the label cache changes
pub const CACHE_VERSION: u32 = 1;

pub const LABELS_FILE: &str = "entity_labels_alias_description.csv";
pub const PROPERTY_LABELS_FILE: &str = "property_labels.csv";

pub const LABELS_HEADER: [&str; 5] = ["qid", "numeric_id", "label", "alias", "description"];

pub const RELATION_HEADER: [&str; 9] = [
    "entity",
    "entity_numeric_id",
    "entity_type",
    "entity_type_numeric_id",
    "label_type",
    "alias",
    "type_qids_list",
    "type_numeric_ids_list",
    "type_labels_list",
];

pub const PROPERTY_LABELS_HEADER: [&str; 3] = ["property_id", "numeric_id", "property_label"];

pub const CLOSURE_HEADER: [&str; 4] = [
    "entity_id",
    "entity_id_numeric",
    "transitive_closure_qids",
    "transitive_closure_numeric_ids",
];

/// Relations expanded into one row per target during extraction: (property, file stem)
pub const TABLE_RELATIONS: [(&str, &str); 2] = [("P31", "p31_entity_types"), ("P279", "p279_entity_types")];

/// Relations whose bounded transitive closure is computed: (property, name)
pub const CLOSURE_RELATIONS: [(&str, &str); 5] = [
    ("P279", "subclass_of"),
    ("P361", "part_of"),
    ("P527", "has_parts"),
    ("P131", "located_in"),
    ("P8225", "is_metaclass_for"),
];
