//! # Dataverse Metadata Fetcher
//!
//! Fetches entity, attribute, option-set and relationship metadata from a
//! Dataverse-style OData Web API and assembles it into enriched records for
//! downstream code generation.
//!
//! ## Features
//!
//! - **Priority scheduling**: A bounded, priority-ordered request scheduler with
//!   retry and exponential backoff for throttled APIs
//! - **OR-filter batching**: Many entity lookups collapsed into a handful of
//!   `$filter=LogicalName eq 'a' or ...` requests
//! - **Attribute casting**: Only the attribute subtype endpoints an entity actually
//!   needs are requested, then merged over the basic attribute list
//! - **Per-item degradation**: One bad entity or cast request never aborts the run
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dataverse_metadata_fetcher::fetcher::http::HttpFetch;
//! use dataverse_metadata_fetcher::orchestrator::{FetchConfig, FetchOptions, FetchOrchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetch = HttpFetch::new("https://org.crm.dynamics.com/api/data/v9.2", "token")?;
//! let orchestrator = FetchOrchestrator::new(Arc::new(fetch), FetchConfig::default());
//!
//! let names = vec!["account".to_string(), "contact".to_string()];
//! let options = FetchOptions::default().with_attributes(true);
//! let report = orchestrator.fetch_entities(&names, &options, None).await?;
//! println!("fetched {} entities", report.stats.fetched);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`scheduler`] - Priority/retry request scheduler
//! - [`fetcher`] - HTTP boundary, OData query building, OR-filter batching and attribute casting
//! - [`orchestrator`] - Strategy selection, batching policy and progress reporting
//! - [`cancel`] - Cancellation shared between the scheduler and batch loops
//! - [`metrics`] - Request and run metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Cancellation shared across scheduler and orchestrator
pub mod cancel;

/// CLI command implementations
pub mod cli;

/// HTTP boundary and metadata fetchers
pub mod fetcher;

/// Metrics collection
pub mod metrics;

/// Fetch strategy selection and batch orchestration
pub mod orchestrator;

/// Priority request scheduling with retry
pub mod scheduler;

pub use fetcher::{FetchError, FetchResult};
pub use orchestrator::{FetchOrchestrator, FetchReport, FetchStrategy};
pub use scheduler::{Priority, RequestScheduler};

/// Progress callback: `(processed, total, current_item)`.
///
/// Invoked synchronously from batch loops, so it should return quickly.
pub type ProgressFn = dyn Fn(usize, usize, Option<&str>) + Send + Sync;

/// Localized label as returned by the metadata API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Label {
    /// Label in the calling user's language
    #[serde(default)]
    pub user_localized_label: Option<LocalizedLabel>,
    /// Labels for every provisioned language
    #[serde(default)]
    pub localized_labels: Vec<LocalizedLabel>,
}

impl Label {
    /// Label text, preferring the user's language over the first localized label
    pub fn text(&self) -> Option<&str> {
        self.user_localized_label
            .as_ref()
            .or_else(|| self.localized_labels.first())
            .map(|l| l.label.as_str())
    }
}

/// Single label in one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LocalizedLabel {
    /// Label text
    pub label: String,
    /// LCID of the language (e.g. 1033)
    #[serde(default)]
    pub language_code: i32,
}

/// Basic entity metadata shared by every fetch strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntityMetadata {
    /// Logical name (e.g. "account")
    pub logical_name: String,
    /// Schema name (e.g. "Account")
    #[serde(default)]
    pub schema_name: Option<String>,
    /// Display name
    #[serde(default)]
    pub display_name: Option<Label>,
    /// Description
    #[serde(default)]
    pub description: Option<Label>,
    /// Logical name of the primary key attribute
    #[serde(default)]
    pub primary_id_attribute: Option<String>,
    /// Logical name of the primary name attribute
    #[serde(default)]
    pub primary_name_attribute: Option<String>,
    /// Web API entity set name (e.g. "accounts")
    #[serde(default)]
    pub entity_set_name: Option<String>,
    /// Whether the entity was created by a customizer
    #[serde(default)]
    pub is_custom_entity: bool,
    /// Numeric entity type code
    #[serde(default)]
    pub object_type_code: Option<i32>,
    /// Metadata record id
    #[serde(default)]
    pub metadata_id: Option<String>,
    /// 1:N relationships, only present when expanded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_to_many_relationships: Option<Vec<OneToManyRelationship>>,
    /// N:1 relationships, only present when expanded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub many_to_one_relationships: Option<Vec<OneToManyRelationship>>,
    /// N:N relationships, only present when expanded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub many_to_many_relationships: Option<Vec<ManyToManyRelationship>>,
}

impl EntityMetadata {
    /// Whether any relationship collection was expanded on this record
    pub fn has_relationships(&self) -> bool {
        self.one_to_many_relationships.is_some()
            || self.many_to_one_relationships.is_some()
            || self.many_to_many_relationships.is_some()
    }
}

/// One-to-many (or, seen from the other side, many-to-one) relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OneToManyRelationship {
    /// Relationship schema name
    pub schema_name: String,
    /// Entity on the "one" side
    pub referenced_entity: String,
    /// Key attribute on the "one" side
    #[serde(default)]
    pub referenced_attribute: Option<String>,
    /// Entity on the "many" side
    pub referencing_entity: String,
    /// Lookup attribute on the "many" side
    #[serde(default)]
    pub referencing_attribute: Option<String>,
    /// Collection-valued navigation property on the referenced entity
    #[serde(default)]
    pub referenced_entity_navigation_property_name: Option<String>,
    /// Single-valued navigation property on the referencing entity
    #[serde(default)]
    pub referencing_entity_navigation_property_name: Option<String>,
}

/// Many-to-many relationship through an intersect entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManyToManyRelationship {
    /// Relationship schema name
    pub schema_name: String,
    /// First entity
    pub entity1_logical_name: String,
    /// Second entity
    pub entity2_logical_name: String,
    /// Intersect entity holding the pairs
    #[serde(default)]
    pub intersect_entity_name: Option<String>,
    /// Navigation property on the first entity
    #[serde(default)]
    pub entity1_navigation_property_name: Option<String>,
    /// Navigation property on the second entity
    #[serde(default)]
    pub entity2_navigation_property_name: Option<String>,
}

/// Attribute type tag reported by the metadata API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    /// 64-bit integer
    BigInt,
    /// Two-option boolean
    Boolean,
    /// Calendar rules
    CalendarRules,
    /// Customer lookup (account or contact)
    Customer,
    /// Date and time
    DateTime,
    /// Decimal number
    Decimal,
    /// Floating point number
    Double,
    /// Entity name
    EntityName,
    /// Integer
    Integer,
    /// Lookup
    Lookup,
    /// Managed property
    ManagedProperty,
    /// Multi-line text
    Memo,
    /// Currency
    Money,
    /// Owner lookup (user or team)
    Owner,
    /// Activity party list
    PartyList,
    /// Choice
    Picklist,
    /// Record state
    State,
    /// Record status reason
    Status,
    /// Single-line text
    String,
    /// GUID
    Uniqueidentifier,
    /// Virtual (multi-select choice, file, image, ...)
    Virtual,
    /// Any tag this crate does not know about
    #[serde(other)]
    Unknown,
}

/// Wrapper for the `AttributeTypeName` complex value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeTypeName {
    /// Type name (e.g. "MultiSelectPicklistType")
    #[serde(rename = "Value")]
    pub value: String,
}

/// Wrapper for the `RequiredLevel` managed property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredLevel {
    /// Level (None, SystemRequired, ApplicationRequired, Recommended)
    #[serde(rename = "Value")]
    pub value: String,
}

/// Single option of a choice, state, status or boolean attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OptionMetadata {
    /// Option value
    pub value: i32,
    /// Option label
    #[serde(default)]
    pub label: Option<Label>,
    /// Display color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Option set attached to a cast attribute record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OptionSetMetadata {
    /// Option set name
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the option set is shared between attributes
    #[serde(default)]
    pub is_global: bool,
    /// Option set kind (Picklist, State, Status, Boolean)
    #[serde(default)]
    pub option_set_type: Option<String>,
    /// Options (choice, state and status option sets)
    #[serde(default)]
    pub options: Vec<OptionMetadata>,
    /// True option (boolean option sets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_option: Option<OptionMetadata>,
    /// False option (boolean option sets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_option: Option<OptionMetadata>,
}

/// Attribute metadata: the basic projection, possibly with cast fields merged in
///
/// Fields the crate does not model explicitly are kept in [`AttributeMetadata::extra`]
/// so nothing the API returned is lost on the way to code generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeMetadata {
    /// Logical name
    pub logical_name: String,
    /// Schema name
    #[serde(default)]
    pub schema_name: Option<String>,
    /// Display name
    #[serde(default)]
    pub display_name: Option<Label>,
    /// Description
    #[serde(default)]
    pub description: Option<Label>,
    /// Attribute type tag
    #[serde(default)]
    pub attribute_type: Option<AttributeType>,
    /// Attribute type name (disambiguates Virtual attributes)
    #[serde(default)]
    pub attribute_type_name: Option<AttributeTypeName>,
    /// Required level
    #[serde(default)]
    pub required_level: Option<RequiredLevel>,
    /// Whether this is the primary key
    #[serde(default)]
    pub is_primary_id: bool,
    /// Whether this is the primary name
    #[serde(default)]
    pub is_primary_name: bool,
    /// Set on auxiliary fields (e.g. `owneridname`) to the attribute they belong to
    #[serde(default)]
    pub attribute_of: Option<String>,
    /// Local option set (cast field)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_set: Option<OptionSetMetadata>,
    /// Global option set (cast field)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_option_set: Option<OptionSetMetadata>,
    /// Lookup targets (cast field)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    /// Everything else the API returned
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AttributeMetadata {
    /// Whether this attribute is an auxiliary field of another attribute
    pub fn is_auxiliary(&self) -> bool {
        self.attribute_of.is_some()
    }

    /// Attribute type name value, if reported
    pub fn type_name(&self) -> Option<&str> {
        self.attribute_type_name.as_ref().map(|t| t.value.as_str())
    }

    /// Option set carrying the values, preferring the local one
    pub fn options(&self) -> Option<&OptionSetMetadata> {
        self.option_set.as_ref().or(self.global_option_set.as_ref())
    }
}

/// How far attribute enrichment got for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeStatus {
    /// Attributes were not requested for this run
    NotRequested,
    /// Basic attributes fetched and casts merged
    Enriched,
    /// Attribute fetch failed; only basic entity fields are available
    Failed,
}

/// Entity record after the attribute enrichment pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnrichedEntity {
    /// Basic entity record
    #[serde(flatten)]
    pub entity: EntityMetadata,
    /// Attributes with cast fields merged in
    #[serde(default)]
    pub attributes: Vec<AttributeMetadata>,
    /// Enrichment outcome
    pub attribute_status: AttributeStatus,
}

impl EnrichedEntity {
    /// Wrap a basic record without attributes
    pub fn basic(entity: EntityMetadata) -> Self {
        Self {
            entity,
            attributes: Vec::new(),
            attribute_status: AttributeStatus::NotRequested,
        }
    }

    /// Upgrade a basic record with its merged attribute list
    pub fn enriched(entity: EntityMetadata, attributes: Vec<AttributeMetadata>) -> Self {
        Self {
            entity,
            attributes,
            attribute_status: AttributeStatus::Enriched,
        }
    }

    /// Keep a basic record whose attribute fetch failed
    pub fn attributes_failed(entity: EntityMetadata) -> Self {
        Self {
            entity,
            attributes: Vec::new(),
            attribute_status: AttributeStatus::Failed,
        }
    }

    /// Logical name of the wrapped entity
    pub fn logical_name(&self) -> &str {
        &self.entity.logical_name
    }
}
