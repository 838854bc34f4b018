//! Read-only result records.
//!
//! Services never hand driver documents to callers directly. Every document goes
//! through [`Record::from_document`], which extracts the primary key and keeps the
//! remaining fields behind accessors. Hydrated belongs-to documents are kept apart from
//! the record's own fields so a foreign key is never overwritten by its display value.

use std::{collections::BTreeMap, fmt};

use bson::{Bson, Document, Uuid, de::deserialize_from_bson, oid::ObjectId};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::{
    error::{AdapterError, AdapterResult},
    schema::PRIMARY_KEY,
};

/// Kind of primary key generated for new records of a collection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    /// A MongoDB `ObjectId`, as Mongoose models use by default.
    #[default]
    ObjectId,
    /// A UUID stored as BSON binary.
    Uuid,
}

/// Primary key of a record, also the value stored by relation fields.
///
/// Serializes as its textual form for human-readable formats such as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordId {
    ObjectId(ObjectId),
    Uuid(Uuid),
}

impl RecordId {
    /// Generates a fresh id of the given kind.
    pub fn generate(kind: IdKind) -> Self {
        match kind {
            IdKind::ObjectId => RecordId::ObjectId(ObjectId::new()),
            IdKind::Uuid => RecordId::Uuid(Uuid::new()),
        }
    }

    pub fn kind(&self) -> IdKind {
        match self {
            RecordId::ObjectId(_) => IdKind::ObjectId,
            RecordId::Uuid(_) => IdKind::Uuid,
        }
    }

    /// Reads an id from its stored representation: an `ObjectId`, or a 16 byte binary
    /// holding a UUID.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::ObjectId(id) => Some(RecordId::ObjectId(*id)),
            Bson::Binary(binary) => <[u8; 16]>::try_from(binary.bytes.as_slice())
                .ok()
                .map(|bytes| RecordId::Uuid(Uuid::from_bytes(bytes))),
            _ => None,
        }
    }

    /// Parses the textual form of an id: 24 hex digits for an `ObjectId`, a UUID otherwise.
    pub fn parse_str(input: &str) -> Option<Self> {
        let input = input.trim();
        ObjectId::parse_str(input)
            .map(RecordId::ObjectId)
            .ok()
            .or_else(|| Uuid::parse_str(input).map(RecordId::Uuid).ok())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::ObjectId(id) => write!(f, "{}", id.to_hex()),
            RecordId::Uuid(id) => write!(f, "{id}"),
        }
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            _ if serializer.is_human_readable() => serializer.collect_str(self),
            RecordId::ObjectId(id) => id.serialize(serializer),
            RecordId::Uuid(id) => id.serialize(serializer),
        }
    }
}

impl From<ObjectId> for RecordId {
    fn from(id: ObjectId) -> Self {
        RecordId::ObjectId(id)
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        RecordId::Uuid(id)
    }
}

impl From<RecordId> for Bson {
    fn from(id: RecordId) -> Self {
        match id {
            RecordId::ObjectId(id) => Bson::ObjectId(id),
            RecordId::Uuid(id) => Bson::from(id),
        }
    }
}

impl PartialEq<ObjectId> for RecordId {
    fn eq(&self, other: &ObjectId) -> bool {
        matches!(self, RecordId::ObjectId(id) if id == other)
    }
}

impl PartialEq<Uuid> for RecordId {
    fn eq(&self, other: &Uuid) -> bool {
        matches!(self, RecordId::Uuid(id) if id == other)
    }
}

/// One record of a collection.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Record {
    id: RecordId,
    fields: Document,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    related: BTreeMap<String, Document>,
    /// Fields whose value matched the search term of the request, in schema order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    search_matches: Vec<String>,
}

impl Record {
    /// Maps a driver document into a record.
    ///
    /// # Errors
    ///
    /// Fails when the document has no `ObjectId` or UUID primary key.
    pub fn from_document(mut document: Document) -> AdapterResult<Self> {
        let id = document
            .remove(PRIMARY_KEY)
            .as_ref()
            .and_then(RecordId::from_bson)
            .ok_or_else(|| AdapterError::Serialization("document has no ObjectId or UUID `_id`".to_string()))?;

        Ok(Self { id, fields: document, related: BTreeMap::new(), search_matches: Vec::new() })
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    /// The record's own fields, primary key excluded.
    pub fn fields(&self) -> &Document {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Bson> {
        self.fields.get(field)
    }

    /// The hydrated document referenced by a belongs-to field, if any.
    pub fn related(&self, field: &str) -> Option<&Document> {
        self.related.get(field)
    }

    pub(crate) fn attach_related(&mut self, field: &str, document: Document) {
        self.related.insert(field.to_string(), document);
    }

    /// Fields that matched the free-text search of the list request that produced the
    /// record. Empty when the request had no search term.
    pub fn search_matches(&self) -> &[String] {
        &self.search_matches
    }

    pub(crate) fn set_search_matches(&mut self, fields: Vec<String>) {
        self.search_matches = fields;
    }

    /// Rebuilds the stored representation, primary key included.
    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        document.insert(PRIMARY_KEY, self.id);
        for (key, value) in &self.fields {
            document.insert(key.clone(), value.clone());
        }
        document
    }

    /// Deserializes the record into a typed model.
    pub fn deserialize<T>(&self) -> AdapterResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        Ok(deserialize_from_bson(Bson::Document(self.to_document()))?)
    }

    /// Converts the record into JSON, hydrated relations included.
    pub fn to_json(&self) -> AdapterResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
