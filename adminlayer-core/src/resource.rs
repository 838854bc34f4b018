//! Record access services.
//!
//! A [`Resource`] serves one collection: paginated lists, single records, creation,
//! partial updates, embedded element updates and removal. Write payloads are validated
//! against the schema description before anything is sent to the driver, so a rejected
//! payload never persists anything.

use bson::{Bson, Document, doc};
use tracing::debug;

use crate::{
    driver::StoreDriver,
    error::{AdapterError, AdapterResult},
    page::Page,
    record::{Record, RecordId},
    request::{FilterRequest, ListRequest},
    schema::{CollectionSchema, PRIMARY_KEY, RelationKind, SchemaAdapter},
    store::{Context, ids_to_bson, unique_ids},
};

/// Record access for one collection.
#[derive(Debug)]
pub struct Resource<'a, D: StoreDriver> {
    context: Context<'a, D>,
}

impl<'a, D: StoreDriver> Resource<'a, D> {
    pub(crate) fn new(context: Context<'a, D>) -> Self {
        Self { context }
    }

    /// Returns the name of the collection.
    pub fn name(&self) -> &str {
        self.context.name()
    }

    /// Lists one page of records.
    ///
    /// # Arguments
    ///
    /// * `request` - Filter, sort, window, projection and hydration options
    ///
    /// # Returns
    ///
    /// The requested page and the total count of matching records.
    pub async fn list(&self, request: &ListRequest) -> AdapterResult<Page<Record>> {
        let plan = self.context.compiler().compile(self.name(), request)?;
        self.context.list(&plan, request).await
    }

    /// Counts the records matching a filter.
    pub async fn count(&self, filter: &FilterRequest) -> AdapterResult<u64> {
        let request = ListRequest::new().filter(filter.clone());
        let plan = self.context.compiler().compile(self.name(), &request)?;
        self.context.count(&plan).await
    }

    /// Fetches one record, its belongs-to relations hydrated.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::NotFound`] if no record has this id.
    pub async fn get(&self, id: impl Into<RecordId>) -> AdapterResult<Record> {
        let id = id.into();
        let Some(document) = self.context.find_by_id(self.name(), id).await? else {
            debug!(collection = self.name(), %id, "record not found");
            return Err(AdapterError::NotFound(id.to_string(), self.name().to_string()));
        };

        let mut records = vec![Record::from_document(document)?];
        self.context.hydrate(&mut records).await?;
        Ok(records.remove(0))
    }

    /// Creates a record.
    ///
    /// Values are coerced to their field types. A missing `_id` is generated with the
    /// collection's id kind, and so is the `_id` of every embedded element.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Validation`] if the payload references unknown fields or
    /// carries values that do not fit their field types. Nothing is persisted then.
    pub async fn create(&self, payload: Document) -> AdapterResult<Record> {
        let mut document = validate(self.context.schema, self.context.collection, payload, Mode::Create)?;
        if !document.contains_key(PRIMARY_KEY) {
            document.insert(PRIMARY_KEY, RecordId::generate(self.context.collection.id_kind));
        }

        self.context.insert(self.name(), vec![document.clone()]).await?;
        Record::from_document(document)
    }

    /// Applies a partial update: only the supplied fields change.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::Validation`] for unknown fields, `_id`, embedded fields and
    ///   values that do not fit their field types.
    /// - [`AdapterError::NotFound`] if no record has this id.
    pub async fn update(&self, id: impl Into<RecordId>, patch: Document) -> AdapterResult<Record> {
        let id = id.into();
        let patch = validate(self.context.schema, self.context.collection, patch, Mode::Patch)?;

        if !patch.is_empty() {
            let outcome = self
                .context
                .update_one(self.name(), doc! { PRIMARY_KEY: id }, doc! { "$set": patch })
                .await?;
            if outcome.matched == 0 {
                debug!(collection = self.name(), %id, "record not found");
                return Err(AdapterError::NotFound(id.to_string(), self.name().to_string()));
            }
        }

        self.get(id).await
    }

    /// Replaces one element of an embedded array, identified by the element's own id.
    ///
    /// # Arguments
    ///
    /// * `id` - The owning record
    /// * `field` - The embedded field
    /// * `element_id` - The `_id` of the element to replace
    /// * `element` - The new element content
    pub async fn update_embedded(
        &self,
        id: impl Into<RecordId>,
        field: &str,
        element_id: impl Into<RecordId>,
        element: Document,
    ) -> AdapterResult<Record> {
        let (id, element_id) = (id.into(), element_id.into());
        let shape = embedded_shape(self.context.schema, self.context.collection, field)?;
        let mut element = validate(self.context.schema, shape, element, Mode::Create)?;
        element.insert(PRIMARY_KEY, element_id);

        let outcome = self
            .context
            .update_one(
                self.name(),
                doc! { PRIMARY_KEY: id, format!("{field}.{PRIMARY_KEY}"): element_id },
                doc! { "$set": { format!("{field}.$"): element } },
            )
            .await?;
        if outcome.matched == 0 {
            debug!(collection = self.name(), %id, %element_id, field, "embedded element not found");
            return Err(AdapterError::NotFound(
                format!("{id}/{field}/{element_id}"),
                self.name().to_string(),
            ));
        }

        self.get(id).await
    }

    /// Removes records by id and returns how many were actually removed.
    ///
    /// Removing ids that do not exist is not an error.
    pub async fn remove(&self, ids: impl IntoIterator<Item = impl Into<RecordId>>) -> AdapterResult<u64> {
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return Ok(0);
        }

        self.context
            .delete(self.name(), doc! { PRIMARY_KEY: { "$in": ids_to_bson(&ids) } })
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Create,
    Patch,
}

fn embedded_shape<'s>(
    schema: &'s dyn SchemaAdapter,
    collection: &CollectionSchema,
    field: &str,
) -> AdapterResult<&'s CollectionSchema> {
    let relation = collection
        .field(field)
        .and_then(|field| field.relation.as_ref())
        .filter(|relation| relation.kind == RelationKind::Embedded)
        .ok_or_else(|| AdapterError::Validation(format!("`{}.{field}` is not an embedded field", collection.name)))?;

    schema.require(&relation.collection)
}

/// Checks a write payload against a schema and coerces its values.
fn validate(
    schema: &dyn SchemaAdapter,
    collection: &CollectionSchema,
    payload: Document,
    mode: Mode,
) -> AdapterResult<Document> {
    let unknown = payload
        .keys()
        .filter(|key| collection.field(key).is_none())
        .cloned()
        .collect::<Vec<_>>();
    if !unknown.is_empty() {
        return Err(AdapterError::Validation(format!(
            "unknown fields in `{}`: {}",
            collection.name,
            unknown.join(", ")
        )));
    }

    let mut document = Document::new();
    for (key, value) in payload {
        let Some(field) = collection.field(&key) else { continue };
        let invalid = |detail: String| AdapterError::Validation(format!("`{}.{key}`: {detail}", collection.name));

        if key == PRIMARY_KEY && mode == Mode::Patch {
            return Err(invalid("the primary key cannot be updated".to_string()));
        }

        let value = match &field.relation {
            Some(relation) if relation.kind == RelationKind::Embedded => {
                if mode == Mode::Patch {
                    return Err(invalid("embedded documents are updated one element at a time".to_string()));
                }
                let shape = schema.require(&relation.collection)?;
                match value {
                    Bson::Null => Bson::Null,
                    Bson::Array(elements) => Bson::Array(
                        elements
                            .into_iter()
                            .map(|element| match element {
                                Bson::Document(element) => {
                                    let mut element = validate(schema, shape, element, Mode::Create)?;
                                    if !element.contains_key(PRIMARY_KEY) {
                                        element.insert(PRIMARY_KEY, RecordId::generate(shape.id_kind));
                                    }
                                    Ok(Bson::Document(element))
                                }
                                other => Err(invalid(format!("expected an embedded document, got {other}"))),
                            })
                            .collect::<AdapterResult<Vec<_>>>()?,
                    ),
                    other => return Err(invalid(format!("expected an array of documents, got {other}"))),
                }
            }
            Some(relation) if relation.kind == RelationKind::HasMany => {
                if !relation.is_stored_locally() {
                    return Err(invalid(format!(
                        "the relation is stored on `{}` and is edited through associations",
                        relation.collection
                    )));
                }
                match value {
                    Bson::Null => Bson::Array(Vec::new()),
                    Bson::Array(ids) => Bson::Array(
                        unique_values(ids)
                            .iter()
                            .map(|id| field.coerce(id).map_err(&invalid))
                            .collect::<AdapterResult<Vec<_>>>()?,
                    ),
                    other => return Err(invalid(format!("expected an array of ids, got {other}"))),
                }
            }
            _ => field.coerce(&value).map_err(&invalid)?,
        };

        document.insert(key.clone(), value);
    }

    Ok(document)
}

fn unique_values(values: Vec<Bson>) -> Vec<Bson> {
    let mut unique = Vec::with_capacity(values.len());
    for value in values {
        if !unique.contains(&value) {
            unique.push(value);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::shop_schema;

    #[test]
    fn test_validate_rejects_unknown_fields() {
        let schema = shop_schema();
        let orders = schema.require("orders").unwrap();

        let result = validate(&schema, orders, doc! { "total": 3, "colour": "red" }, Mode::Create);
        assert!(matches!(result, Err(AdapterError::Validation(message)) if message.contains("colour")));
    }

    #[test]
    fn test_validate_coerces_and_fills_embedded_ids() {
        let schema = shop_schema();
        let orders = schema.require("orders").unwrap();

        let document = validate(
            &schema,
            orders,
            doc! { "total": "12", "items": [ { "sku": "A-1", "quantity": 2 } ] },
            Mode::Create,
        )
        .unwrap();

        assert_eq!(document.get("total"), Some(&Bson::Int64(12)));
        let items = document.get_array("items").unwrap();
        assert!(items[0].as_document().unwrap().get_object_id("_id").is_ok());
    }

    #[test]
    fn test_patch_rejects_primary_key_and_embedded_fields() {
        let schema = shop_schema();
        let orders = schema.require("orders").unwrap();

        assert!(matches!(
            validate(&schema, orders, doc! { "_id": RecordId::generate(orders.id_kind) }, Mode::Patch),
            Err(AdapterError::Validation(_))
        ));
        assert!(matches!(
            validate(&schema, orders, doc! { "items": [] }, Mode::Patch),
            Err(AdapterError::Validation(_))
        ));
    }

    #[test]
    fn test_foreign_key_relations_are_not_writable() {
        let schema = shop_schema();
        let customers = schema.require("customers").unwrap();

        assert!(matches!(
            validate(&schema, customers, doc! { "orders": [] }, Mode::Create),
            Err(AdapterError::Validation(_))
        ));
    }
}
