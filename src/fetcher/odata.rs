//! OData path and query building for the metadata endpoints

use std::collections::HashSet;

/// Default number of keys per OR-filter request.
/// Keeps request URLs well below the 32 KB limit even for long logical names.
pub const DEFAULT_CHUNK_SIZE: usize = 25;

/// Entity fields requested by every entity lookup
pub const ENTITY_SELECT_FIELDS: &[&str] = &[
    "LogicalName",
    "SchemaName",
    "DisplayName",
    "Description",
    "PrimaryIdAttribute",
    "PrimaryNameAttribute",
    "EntitySetName",
    "IsCustomEntity",
    "ObjectTypeCode",
    "MetadataId",
];

/// Attribute fields shared by every attribute subtype
pub const ATTRIBUTE_SELECT_FIELDS: &[&str] = &[
    "LogicalName",
    "SchemaName",
    "DisplayName",
    "Description",
    "AttributeType",
    "AttributeTypeName",
    "RequiredLevel",
    "IsPrimaryId",
    "IsPrimaryName",
    "AttributeOf",
];

/// Relationship collections expanded for single-entity lookups
pub const RELATIONSHIP_EXPANSIONS: &[&str] = &[
    "OneToManyRelationships",
    "ManyToOneRelationships",
    "ManyToManyRelationships",
];

/// One OR-filter request worth of keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk in the partition
    pub index: usize,
    /// Keys in input order
    pub keys: Vec<String>,
}

impl Chunk {
    /// Last key of the chunk, reported with progress
    pub fn last_key(&self) -> Option<&str> {
        self.keys.last().map(String::as_str)
    }

    /// `LogicalName eq 'a' or LogicalName eq 'b'` for this chunk's keys
    pub fn filter(&self) -> String {
        or_filter("LogicalName", &self.keys)
    }
}

/// Escape a string literal for an OData filter (single quotes are doubled)
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Partition `keys` into chunks of at most `size` keys.
///
/// Duplicate keys are dropped (first occurrence wins), so every distinct key
/// lands in exactly one chunk and order is preserved.
pub fn chunk_keys(keys: &[String], size: usize) -> Vec<Chunk> {
    let size = size.max(1);
    let mut seen = HashSet::with_capacity(keys.len());
    let distinct: Vec<String> = keys
        .iter()
        .filter(|key| seen.insert(key.as_str()))
        .cloned()
        .collect();

    distinct
        .chunks(size)
        .enumerate()
        .map(|(index, keys)| Chunk {
            index,
            keys: keys.to_vec(),
        })
        .collect()
}

/// Disjunction of equality clauses on `field`
pub fn or_filter(field: &str, values: &[String]) -> String {
    values
        .iter()
        .map(|value| format!("{field} eq '{}'", escape_literal(value)))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// `EntityDefinitions` query for one chunk
pub fn entity_query_path(chunk: &Chunk, select_fields: &[&str]) -> String {
    format!(
        "EntityDefinitions?$select={}&$filter={}",
        select_fields.join(","),
        urlencoding::encode(&chunk.filter())
    )
}

/// Listing of every entity's logical name, optionally only custom ones
pub fn entity_list_path(custom_only: bool) -> String {
    let mut path = String::from("EntityDefinitions?$select=LogicalName,IsCustomEntity");
    if custom_only {
        path.push_str("&$filter=");
        path.push_str(&urlencoding::encode("IsCustomEntity eq true"));
    }
    path
}

fn entity_key_segment(key: &str) -> String {
    format!(
        "EntityDefinitions(LogicalName='{}')",
        urlencoding::encode(&escape_literal(key))
    )
}

/// Single-entity lookup, optionally expanding relationship collections
pub fn entity_path(key: &str, with_relationships: bool) -> String {
    let mut path = format!(
        "{}?$select={}",
        entity_key_segment(key),
        ENTITY_SELECT_FIELDS.join(",")
    );
    if with_relationships {
        path.push_str("&$expand=");
        path.push_str(&RELATIONSHIP_EXPANSIONS.join(","));
    }
    path
}

/// Basic attribute projection of an entity
pub fn attributes_path(key: &str) -> String {
    format!(
        "{}/Attributes?$select={}",
        entity_key_segment(key),
        ATTRIBUTE_SELECT_FIELDS.join(",")
    )
}

/// Attributes of one subtype, cast to `cast_type`
pub fn cast_path(key: &str, cast_type: &str, select_fields: &[&str], expand: &[&str]) -> String {
    let mut path = format!(
        "{}/Attributes/Microsoft.Dynamics.CRM.{}?$select={}",
        entity_key_segment(key),
        cast_type,
        select_fields.join(",")
    );
    if !expand.is_empty() {
        path.push_str("&$expand=");
        path.push_str(&expand.join(","));
    }
    path
}
