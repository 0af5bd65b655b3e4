//! Attribute fetching with type-aware subtype casts
//!
//! The basic attribute projection lacks subtype fields such as option sets and
//! lookup targets. Those come from cast endpoints
//! (`.../Attributes/Microsoft.Dynamics.CRM.PicklistAttributeMetadata`), and only
//! the casts whose type actually occurs on the entity are requested.

use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, warn};

use crate::fetcher::client::MetadataClient;
use crate::fetcher::odata;
use crate::fetcher::{FetchError, FetchResult};
use crate::metrics;
use crate::scheduler::config::CAST_MAX_RETRIES;
use crate::scheduler::{Priority, TaskOptions};
use crate::AttributeMetadata;

/// Raw attribute record as returned by the API
pub type AttributeRecord = Map<String, Value>;

/// Attribute subtype endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeCast {
    /// Lookup, Customer and Owner attributes (`Targets`)
    Lookup,
    /// Choice attributes
    Picklist,
    /// Multi-select choice attributes (Virtual with `MultiSelectPicklistType`)
    MultiSelectPicklist,
    /// Record state
    State,
    /// Status reason
    Status,
    /// Two-option attributes
    Boolean,
}

impl AttributeCast {
    /// Cast needed for an attribute with the given type tag and type name
    pub fn for_attribute(attribute_type: Option<&str>, type_name: Option<&str>) -> Option<Self> {
        match attribute_type? {
            "Lookup" | "Customer" | "Owner" => Some(AttributeCast::Lookup),
            "Picklist" => Some(AttributeCast::Picklist),
            "State" => Some(AttributeCast::State),
            "Status" => Some(AttributeCast::Status),
            "Boolean" => Some(AttributeCast::Boolean),
            "Virtual" if type_name == Some("MultiSelectPicklistType") => {
                Some(AttributeCast::MultiSelectPicklist)
            }
            _ => None,
        }
    }

    /// Cast needed for a raw attribute record
    pub fn for_record(record: &AttributeRecord) -> Option<Self> {
        let attribute_type = record.get("AttributeType").and_then(Value::as_str);
        // Either `{ "Value": "..." }` or a bare string
        let type_name = record
            .get("AttributeTypeName")
            .and_then(|v| v.get("Value").or(Some(v)))
            .and_then(Value::as_str);
        Self::for_attribute(attribute_type, type_name)
    }

    /// Derived type segment of the cast path
    pub fn metadata_type(self) -> &'static str {
        match self {
            AttributeCast::Lookup => "LookupAttributeMetadata",
            AttributeCast::Picklist => "PicklistAttributeMetadata",
            AttributeCast::MultiSelectPicklist => "MultiSelectPicklistAttributeMetadata",
            AttributeCast::State => "StateAttributeMetadata",
            AttributeCast::Status => "StatusAttributeMetadata",
            AttributeCast::Boolean => "BooleanAttributeMetadata",
        }
    }

    /// Fields selected from the cast endpoint
    pub fn select_fields(self) -> &'static [&'static str] {
        match self {
            AttributeCast::Lookup => &["LogicalName", "Targets"],
            AttributeCast::Picklist | AttributeCast::MultiSelectPicklist => {
                &["LogicalName", "DefaultFormValue"]
            }
            AttributeCast::State | AttributeCast::Status => &["LogicalName", "DefaultFormValue"],
            AttributeCast::Boolean => &["LogicalName", "DefaultValue"],
        }
    }

    /// Option set navigation properties expanded for casts carrying option values
    pub fn expand(self) -> &'static [&'static str] {
        match self {
            AttributeCast::Lookup => &[],
            AttributeCast::State | AttributeCast::Status => &["OptionSet"],
            AttributeCast::Picklist
            | AttributeCast::MultiSelectPicklist
            | AttributeCast::Boolean => &["OptionSet", "GlobalOptionSet"],
        }
    }

    /// Request path for `entity`
    pub fn path(self, entity: &str) -> String {
        odata::cast_path(
            entity,
            self.metadata_type(),
            self.select_fields(),
            self.expand(),
        )
    }

    /// Short name used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeCast::Lookup => "lookup",
            AttributeCast::Picklist => "picklist",
            AttributeCast::MultiSelectPicklist => "multi_select_picklist",
            AttributeCast::State => "state",
            AttributeCast::Status => "status",
            AttributeCast::Boolean => "boolean",
        }
    }
}

impl fmt::Display for AttributeCast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The distinct casts needed for `records`
pub fn required_casts(records: &[AttributeRecord]) -> BTreeSet<AttributeCast> {
    records.iter().filter_map(AttributeCast::for_record).collect()
}

/// Shallow-merge `cast` over `base`; cast fields win.
///
/// A pure override, so merging the same cast twice equals merging it once.
pub fn merge_attribute(base: &mut AttributeRecord, cast: &AttributeRecord) {
    for (field, value) in cast {
        base.insert(field.clone(), value.clone());
    }
}

/// Fetches an entity's attributes and merges the subtype casts it needs
#[derive(Clone)]
pub struct AttributeCaster {
    client: MetadataClient,
    cast_max_retries: u32,
}

impl AttributeCaster {
    /// Create a caster with the default cast retry budget
    pub fn new(client: MetadataClient) -> Self {
        Self {
            client,
            cast_max_retries: CAST_MAX_RETRIES,
        }
    }

    /// Set the retry budget for cast requests
    pub fn with_cast_max_retries(mut self, retries: u32) -> Self {
        self.cast_max_retries = retries;
        self
    }

    /// Fetch the attributes of `entity` with cast fields merged in.
    ///
    /// Only a failure of the basic request fails the call. A failed cast is
    /// logged and its attributes keep their basic fields.
    pub async fn fetch_attributes(&self, entity: &str) -> FetchResult<Vec<AttributeMetadata>> {
        let mut records: Vec<AttributeRecord> = self
            .client
            .get_collection(
                &odata::attributes_path(entity),
                "attributes",
                TaskOptions::new(Priority::HIGH),
            )
            .await?;

        let casts = required_casts(&records);
        debug!(
            entity = entity,
            attributes = records.len(),
            casts = casts.len(),
            "Basic attributes fetched"
        );

        // Basic records as fetched, for attributes a cast was merged into
        let mut basics: HashMap<usize, AttributeRecord> = HashMap::new();
        if !casts.is_empty() {
            let results = join_all(casts.iter().map(|&cast| self.fetch_cast(entity, cast))).await;

            let index: HashMap<String, usize> = records
                .iter()
                .enumerate()
                .filter_map(|(i, record)| logical_name(record).map(|name| (name.to_string(), i)))
                .collect();

            for (cast, result) in casts.iter().zip(results) {
                match result {
                    Ok(cast_records) => {
                        for cast_record in &cast_records {
                            let target = logical_name(cast_record).and_then(|name| index.get(name));
                            if let Some(&i) = target {
                                basics.entry(i).or_insert_with(|| records[i].clone());
                                merge_attribute(&mut records[i], cast_record);
                            }
                        }
                    }
                    Err(error) => {
                        warn!(
                            entity = entity,
                            cast = %cast,
                            error = %error,
                            "Attribute cast failed, keeping basic fields"
                        );
                        metrics::record_cast_failure(cast.as_str());
                    }
                }
            }
        }

        records
            .into_iter()
            .enumerate()
            .map(|(i, record)| decode_attribute(entity, record, basics.remove(&i)))
            .collect()
    }

    async fn fetch_cast(
        &self,
        entity: &str,
        cast: AttributeCast,
    ) -> FetchResult<Vec<AttributeRecord>> {
        let options = TaskOptions::new(Priority::LOW).with_max_retries(self.cast_max_retries);
        self.client
            .get_collection(&cast.path(entity), "attribute_casts", options)
            .await
    }
}

/// Decode a merged record. Malformed cast fields fall back to the basic record.
fn decode_attribute(
    entity: &str,
    merged: AttributeRecord,
    basic: Option<AttributeRecord>,
) -> FetchResult<AttributeMetadata> {
    let parse_error =
        |e: serde_json::Error| FetchError::ParseError(format!("Invalid attribute on {entity}: {e}"));

    match serde_json::from_value(Value::Object(merged)) {
        Ok(attribute) => Ok(attribute),
        Err(e) => match basic {
            Some(basic) => {
                warn!(
                    entity = entity,
                    attribute = logical_name(&basic).unwrap_or(""),
                    error = %e,
                    "Malformed cast fields, keeping basic attribute"
                );
                serde_json::from_value(Value::Object(basic)).map_err(parse_error)
            }
            None => Err(parse_error(e)),
        },
    }
}

fn logical_name(record: &AttributeRecord) -> Option<&str> {
    record.get("LogicalName").and_then(Value::as_str)
}
