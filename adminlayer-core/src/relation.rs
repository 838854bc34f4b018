//! Relation mutation services.
//!
//! Relations are changed with single-document atomic update operators only: ids are
//! added with `$addToSet`/`$each`, removed with `$pull`, and foreign keys are set or
//! unset with `$set`/`$unset`. No relation array is ever read, modified and written back.

use std::collections::HashSet;

use bson::{Bson, Document, doc};
use tracing::debug;

use crate::{
    driver::StoreDriver,
    error::{AdapterError, AdapterResult},
    page::Page,
    record::{Record, RecordId},
    request::ListRequest,
    schema::{FieldSchema, PRIMARY_KEY, Relation},
    store::{Context, ids_to_bson, unique_ids},
};

/// What happens to children removed from a has-many relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DissociateMode {
    /// Only the link is removed, the child records stay.
    Unlink,
    /// The child records are deleted.
    Delete,
}

/// Access to the children of a has-many relation.
#[derive(Debug)]
pub struct HasMany<'a, D: StoreDriver> {
    parent: Context<'a, D>,
    child: Context<'a, D>,
    field: &'a FieldSchema,
    relation: &'a Relation,
}

impl<'a, D: StoreDriver> HasMany<'a, D> {
    pub(crate) fn new(parent: Context<'a, D>, field: &'a FieldSchema) -> AdapterResult<Self> {
        let relation = field
            .relation
            .as_ref()
            .ok_or_else(|| AdapterError::Schema(format!("`{}` is not a relation", field.name)))?;
        let child = parent.switch(&relation.collection)?;

        Ok(Self { parent, child, field, relation })
    }

    /// Lists the children of one parent, with the usual filter, sort and window.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::NotFound`] if the parent does not exist.
    pub async fn list(&self, parent: impl Into<RecordId>, request: &ListRequest) -> AdapterResult<Page<Record>> {
        let parent = parent.into();
        let document = self.require_parent(parent).await?;
        let scope = match &self.relation.foreign_key {
            Some(foreign_key) => doc! { foreign_key.as_str(): parent },
            None => doc! { PRIMARY_KEY: { "$in": ids_to_bson(&self.linked_ids(&document)) } },
        };

        let plan = self
            .child
            .compiler()
            .compile_scoped(self.child.name(), request, Some(scope))?;
        self.child.list(&plan, request).await
    }

    /// Links children to a parent. Ids already linked are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Conflict`] if the parent or one of the children does not exist.
    pub async fn associate(
        &self,
        parent: impl Into<RecordId>,
        children: impl IntoIterator<Item = impl Into<RecordId>>,
    ) -> AdapterResult<()> {
        let parent = parent.into();
        let children = unique_ids(children);
        if children.is_empty() {
            return Ok(());
        }

        if self.parent.find_by_id(self.parent.name(), parent).await?.is_none() {
            return Err(AdapterError::Conflict(format!(
                "cannot associate to missing `{}` record {parent}",
                self.parent.name()
            )));
        }
        let existing = self.child.existing_ids(self.child.name(), &children).await?;
        if let Some(missing) = children.iter().find(|id| !existing.contains(*id)) {
            return Err(AdapterError::Conflict(format!(
                "cannot associate missing `{}` record {missing}",
                self.child.name()
            )));
        }

        let ids = ids_to_bson(&children);
        match &self.relation.foreign_key {
            Some(foreign_key) => {
                self.child
                    .update_many(
                        self.child.name(),
                        doc! { PRIMARY_KEY: { "$in": ids } },
                        doc! { "$set": { foreign_key.as_str(): parent } },
                    )
                    .await?;
            }
            None => {
                self.parent
                    .update_one(
                        self.parent.name(),
                        doc! { PRIMARY_KEY: parent },
                        doc! { "$addToSet": { self.field.name.as_str(): { "$each": ids.clone() } } },
                    )
                    .await?;

                if let Some(back_reference) = &self.relation.back_reference {
                    self.child
                        .update_many(
                            self.child.name(),
                            doc! { PRIMARY_KEY: { "$in": ids } },
                            doc! { "$set": { back_reference.as_str(): parent } },
                        )
                        .await?;
                }
            }
        }

        debug!(
            collection = self.parent.name(),
            field = %self.field.name,
            %parent,
            children = children.len(),
            "associated children"
        );
        Ok(())
    }

    /// Removes children from a parent and returns how many were removed.
    ///
    /// With [`DissociateMode::Unlink`] the children stay in their collection; when the
    /// relation declares a back-reference it is cleared only if
    /// [`AdapterConfig::clear_back_reference_on_dissociate`](crate::config::AdapterConfig)
    /// is set. With [`DissociateMode::Delete`] the children are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Conflict`] if the parent does not exist, or if one of the
    /// children does not exist or is not linked to the parent. Nothing is changed then.
    pub async fn dissociate(
        &self,
        parent: impl Into<RecordId>,
        children: impl IntoIterator<Item = impl Into<RecordId>>,
        mode: DissociateMode,
    ) -> AdapterResult<u64> {
        let parent = parent.into();
        let children = unique_ids(children);
        let Some(document) = self.parent.find_by_id(self.parent.name(), parent).await? else {
            return Err(AdapterError::Conflict(format!(
                "cannot dissociate from missing `{}` record {parent}",
                self.parent.name()
            )));
        };
        if children.is_empty() {
            return Ok(0);
        }

        let linked = match &self.relation.foreign_key {
            Some(foreign_key) => {
                self.child
                    .matching_ids(self.child.name(), &children, doc! { foreign_key.as_str(): parent })
                    .await?
            }
            None => {
                let stored = self.linked_ids(&document).into_iter().collect::<HashSet<_>>();
                let mut existing = self.child.existing_ids(self.child.name(), &children).await?;
                existing.retain(|id| stored.contains(id));
                existing
            }
        };
        if let Some(unlinked) = children.iter().find(|id| !linked.contains(*id)) {
            return Err(AdapterError::Conflict(format!(
                "`{}` record {unlinked} is missing or not linked to `{}` record {parent}",
                self.child.name(),
                self.parent.name()
            )));
        }

        let ids = ids_to_bson(&children);
        let count = match &self.relation.foreign_key {
            Some(foreign_key) => {
                let filter = doc! { PRIMARY_KEY: { "$in": ids }, foreign_key.as_str(): parent };
                match mode {
                    DissociateMode::Unlink => {
                        self.child
                            .update_many(self.child.name(), filter, doc! { "$unset": { foreign_key.as_str(): "" } })
                            .await?
                            .matched
                    }
                    DissociateMode::Delete => self.child.delete(self.child.name(), filter).await?,
                }
            }
            None => {
                self.parent
                    .update_one(
                        self.parent.name(),
                        doc! { PRIMARY_KEY: parent },
                        doc! { "$pull": { self.field.name.as_str(): { "$in": ids.clone() } } },
                    )
                    .await?;

                match mode {
                    DissociateMode::Unlink => {
                        if let Some(back_reference) = &self.relation.back_reference
                            && self.parent.config.clear_back_reference_on_dissociate
                        {
                            self.child
                                .update_many(
                                    self.child.name(),
                                    doc! { PRIMARY_KEY: { "$in": ids }, back_reference.as_str(): parent },
                                    doc! { "$unset": { back_reference.as_str(): "" } },
                                )
                                .await?;
                        }
                        children.len() as u64
                    }
                    DissociateMode::Delete => {
                        self.child
                            .delete(self.child.name(), doc! { PRIMARY_KEY: { "$in": ids } })
                            .await?
                    }
                }
            }
        };

        debug!(
            collection = self.parent.name(),
            field = %self.field.name,
            %parent,
            ?mode,
            count,
            "dissociated children"
        );
        Ok(count)
    }

    async fn require_parent(&self, parent: RecordId) -> AdapterResult<Document> {
        match self.parent.find_by_id(self.parent.name(), parent).await? {
            Some(document) => Ok(document),
            None => {
                debug!(collection = self.parent.name(), id = %parent, "parent record not found");
                Err(AdapterError::NotFound(parent.to_string(), self.parent.name().to_string()))
            }
        }
    }

    fn linked_ids(&self, parent: &Document) -> Vec<RecordId> {
        match parent.get(&self.field.name) {
            Some(Bson::Array(ids)) => ids.iter().filter_map(RecordId::from_bson).collect(),
            _ => Vec::new(),
        }
    }
}

/// Access to one belongs-to field.
#[derive(Debug)]
pub struct BelongsTo<'a, D: StoreDriver> {
    owner: Context<'a, D>,
    field: &'a FieldSchema,
    relation: &'a Relation,
}

impl<'a, D: StoreDriver> BelongsTo<'a, D> {
    pub(crate) fn new(owner: Context<'a, D>, field: &'a FieldSchema) -> AdapterResult<Self> {
        let relation = field
            .relation
            .as_ref()
            .ok_or_else(|| AdapterError::Schema(format!("`{}` is not a relation", field.name)))?;

        Ok(Self { owner, field, relation })
    }

    /// Points the owning record at another record, or clears the reference with `None`.
    ///
    /// Clearing never deletes the previously referenced record.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::Conflict`] if the referenced record does not exist.
    /// - [`AdapterError::NotFound`] if the owning record does not exist.
    pub async fn update(&self, record: impl Into<RecordId>, target: Option<RecordId>) -> AdapterResult<Record> {
        let record = record.into();
        let value = match target {
            Some(target) => {
                if self.owner.find_by_id(&self.relation.collection, target).await?.is_none() {
                    return Err(AdapterError::Conflict(format!(
                        "cannot reference missing `{}` record {target}",
                        self.relation.collection
                    )));
                }
                Bson::from(target)
            }
            None => Bson::Null,
        };

        let outcome = self
            .owner
            .update_one(
                self.owner.name(),
                doc! { PRIMARY_KEY: record },
                doc! { "$set": { self.field.name.as_str(): value } },
            )
            .await?;
        if outcome.matched == 0 {
            debug!(collection = self.owner.name(), id = %record, "record not found");
            return Err(AdapterError::NotFound(record.to_string(), self.owner.name().to_string()));
        }

        let document = self
            .owner
            .find_by_id(self.owner.name(), record)
            .await?
            .ok_or_else(|| AdapterError::NotFound(record.to_string(), self.owner.name().to_string()))?;
        Record::from_document(document)
    }
}
