//! Schema description of the collections exposed to the admin panel.
//!
//! Schema introspection happens outside of this crate: whatever loads the models at
//! startup hands a list of [`CollectionSchema`] to [`SchemaRegistry::new`] (or a JSON
//! document to [`SchemaRegistry::from_json`]). The registry normalizes the description
//! and stays immutable for the rest of the process lifetime.

use std::collections::BTreeMap;

use bson::Bson;
use serde::{Deserialize, Serialize};

use crate::{
    condition::ConditionNode,
    error::{AdapterError, AdapterResult},
    record::{IdKind, RecordId},
    temporal::{self, DateOperand},
};

/// Name of the primary key field of every collection.
pub const PRIMARY_KEY: &str = "_id";

/// Storage type of a field.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    /// A record identifier, either an `ObjectId` or a UUID.
    Id,
    /// A string restricted to a set of values.
    Enum,
    /// Free-form nested data.
    Json,
}

/// Kind of a relation between two collections.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// The field stores the id of one record of the referenced collection.
    BelongsTo,
    /// Many records of the referenced collection belong to this record.
    HasMany,
    /// The field stores an inline array of sub-documents.
    Embedded,
}

/// Relation metadata attached to a field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Relation {
    pub kind: RelationKind,
    /// Referenced collection, or the embedded schema name for embedded relations.
    pub collection: String,
    /// For has-many only: the child field storing the parent id. When absent, the parent
    /// stores the child ids as an array in the relation field.
    #[serde(default)]
    pub foreign_key: Option<String>,
    /// For array-stored has-many only: the child field pointing back at the parent.
    #[serde(default)]
    pub back_reference: Option<String>,
}

impl Relation {
    pub fn belongs_to(collection: impl Into<String>) -> Self {
        Self { kind: RelationKind::BelongsTo, collection: collection.into(), foreign_key: None, back_reference: None }
    }

    pub fn has_many(collection: impl Into<String>) -> Self {
        Self { kind: RelationKind::HasMany, collection: collection.into(), foreign_key: None, back_reference: None }
    }

    pub fn embedded(schema: impl Into<String>) -> Self {
        Self { kind: RelationKind::Embedded, collection: schema.into(), foreign_key: None, back_reference: None }
    }

    /// Stores the relation on the child side, in `field`.
    pub fn with_foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }

    /// Declares the child field pointing back at the parent.
    pub fn with_back_reference(mut self, field: impl Into<String>) -> Self {
        self.back_reference = Some(field.into());
        self
    }

    /// Whether the relation has a physical value on the owning record.
    pub fn is_stored_locally(&self) -> bool {
        match self.kind {
            RelationKind::BelongsTo | RelationKind::Embedded => true,
            RelationKind::HasMany => self.foreign_key.is_none(),
        }
    }
}

/// Description of one field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub relation: Option<Relation>,
    /// Allowed values of an enum field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, relation: None, enum_values: Vec::new() }
    }

    /// A field holding relation data. Belongs-to and has-many fields store ids.
    pub fn relation(name: impl Into<String>, relation: Relation) -> Self {
        let field_type = match relation.kind {
            RelationKind::BelongsTo | RelationKind::HasMany => FieldType::Id,
            RelationKind::Embedded => FieldType::Json,
        };

        Self { name: name.into(), field_type, relation: Some(relation), enum_values: Vec::new() }
    }

    pub fn enumeration<S: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Enum,
            relation: None,
            enum_values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }

    pub fn relation_kind(&self) -> Option<RelationKind> {
        self.relation.as_ref().map(|relation| relation.kind)
    }

    /// Coerces a client value into the storage representation of this field.
    ///
    /// `null` is accepted for every type. Strings are parsed for numbers, booleans,
    /// dates and ids.
    pub fn coerce(&self, value: &Bson) -> Result<Bson, String> {
        if matches!(value, Bson::Null) {
            return Ok(Bson::Null);
        }

        let mismatch = || format!("`{}` expects a {:?} value, got {value}", self.name, self.field_type);

        match self.field_type {
            FieldType::String => match value {
                Bson::String(_) => Ok(value.clone()),
                _ => Err(mismatch()),
            },
            FieldType::Enum => match value {
                Bson::String(s) if self.enum_values.is_empty() || self.enum_values.contains(s) => Ok(value.clone()),
                Bson::String(s) => Err(format!("`{s}` is not an allowed value of `{}`", self.name)),
                _ => Err(mismatch()),
            },
            FieldType::Number => match value {
                Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Ok(value.clone()),
                Bson::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .map(Bson::Int64)
                        .or_else(|_| s.parse::<f64>().map(Bson::Double))
                        .map_err(|_| mismatch())
                }
                _ => Err(mismatch()),
            },
            FieldType::Boolean => match value {
                Bson::Boolean(_) => Ok(value.clone()),
                Bson::String(s) if s == "true" => Ok(Bson::Boolean(true)),
                Bson::String(s) if s == "false" => Ok(Bson::Boolean(false)),
                _ => Err(mismatch()),
            },
            FieldType::Date => match value {
                Bson::DateTime(_) => Ok(value.clone()),
                Bson::String(s) => DateOperand::parse(s)
                    .map(|operand| temporal::to_bson(operand.start()))
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            FieldType::Id => match value {
                Bson::ObjectId(_) => Ok(value.clone()),
                Bson::Binary(binary) if binary.bytes.len() == 16 => Ok(value.clone()),
                Bson::String(s) => RecordId::parse_str(s).map(Bson::from).ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            FieldType::Json => Ok(value.clone()),
        }
    }
}

/// Description of one collection (or of one embedded document shape).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    /// Named conditions that scope list views.
    #[serde(default)]
    pub segments: BTreeMap<String, ConditionNode>,
    /// Fields used by free-text search. Defaults to every searchable field.
    #[serde(default)]
    pub search_fields: Option<Vec<String>>,
    /// Embedded shapes describe sub-documents and are not storage collections.
    #[serde(default)]
    pub embedded: bool,
    /// Kind of `_id` generated for new records and embedded elements.
    #[serde(default)]
    pub id_kind: IdKind,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            fields,
            segments: BTreeMap::new(),
            search_fields: None,
            embedded: false,
            id_kind: IdKind::default(),
        }
    }

    /// Marks this schema as the shape of embedded sub-documents.
    pub fn into_embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    pub fn with_segment(mut self, name: impl Into<String>, condition: ConditionNode) -> Self {
        self.segments.insert(name.into(), condition);
        self
    }

    pub fn with_id_kind(mut self, kind: IdKind) -> Self {
        self.id_kind = kind;
        self
    }

    pub fn with_search_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.search_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn segment(&self, name: &str) -> Option<&ConditionNode> {
        self.segments.get(name)
    }

    /// Belongs-to fields, in declaration order.
    pub fn belongs_to_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields
            .iter()
            .filter(|field| field.relation_kind() == Some(RelationKind::BelongsTo))
    }

    fn normalize(mut self) -> Self {
        if self.field(PRIMARY_KEY).is_none() {
            self.fields.insert(0, FieldSchema::new(PRIMARY_KEY, FieldType::Id));
        }
        self
    }
}

/// Source of schema metadata consumed by the compiler and the services.
pub trait SchemaAdapter: Send + Sync + std::fmt::Debug {
    /// Returns the schema of a collection or of an embedded shape.
    fn get_schema(&self, collection: &str) -> Option<&CollectionSchema>;

    /// Lists the storage collections (embedded shapes excluded).
    fn list_collections(&self) -> Vec<String>;

    /// Like [`SchemaAdapter::get_schema`], failing with a schema error when absent.
    fn require(&self, collection: &str) -> AdapterResult<&CollectionSchema> {
        self.get_schema(collection)
            .ok_or_else(|| AdapterError::Schema(format!("unknown collection `{collection}`")))
    }
}

/// In-process schema description.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    collections: BTreeMap<String, CollectionSchema>,
}

impl SchemaRegistry {
    /// Builds a registry, adding the implicit primary key to every schema.
    ///
    /// Fails when a relation references an unknown collection or when a relation is
    /// declared with options that do not apply to its kind.
    pub fn new(collections: impl IntoIterator<Item = CollectionSchema>) -> AdapterResult<Self> {
        let registry = Self {
            collections: collections
                .into_iter()
                .map(|schema| (schema.name.clone(), schema.normalize()))
                .collect(),
        };

        for schema in registry.collections.values() {
            for field in &schema.fields {
                let Some(relation) = &field.relation else { continue };

                if !registry.collections.contains_key(&relation.collection) {
                    return Err(AdapterError::Schema(format!(
                        "`{}.{}` references unknown collection `{}`",
                        schema.name, field.name, relation.collection
                    )));
                }
                if relation.kind != RelationKind::HasMany
                    && (relation.foreign_key.is_some() || relation.back_reference.is_some())
                {
                    return Err(AdapterError::Schema(format!(
                        "`{}.{}`: only has-many relations take a foreign key or back-reference",
                        schema.name, field.name
                    )));
                }
            }
        }

        Ok(registry)
    }

    /// Parses a JSON array of collection schemas.
    pub fn from_json(input: &str) -> AdapterResult<Self> {
        Self::new(serde_json::from_str::<Vec<CollectionSchema>>(input)?)
    }
}

impl SchemaAdapter for SchemaRegistry {
    fn get_schema(&self, collection: &str) -> Option<&CollectionSchema> {
        self.collections.get(collection)
    }

    fn list_collections(&self) -> Vec<String> {
        self.collections
            .values()
            .filter(|schema| !schema.embedded)
            .map(|schema| schema.name.clone())
            .collect()
    }
}
