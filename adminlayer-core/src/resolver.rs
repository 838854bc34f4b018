//! Field path resolution.
//!
//! A field path is a dotted list of field names starting from a root collection:
//! `status`, `customer.country`, `items.product.name`. The resolver walks the path
//! against the schema description. Relation segments switch the active schema to the
//! referenced collection and, for belongs-to and has-many relations, record the join
//! the storage engine needs to see the related documents. The result names the
//! storage path of the terminal field, relative to the joined document.

use crate::{
    error::{AdapterError, AdapterResult},
    schema::{FieldSchema, FieldType, PRIMARY_KEY, RelationKind, SchemaAdapter},
};

/// A cross-collection join needed to reach a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinRequirement {
    /// Top-level field receiving the joined documents.
    pub alias: String,
    /// Collection joined in.
    pub from: String,
    /// Path of the correlated value in the current document.
    pub local_field: String,
    /// Path of the correlated value in the joined documents.
    pub foreign_field: String,
    pub kind: RelationKind,
    /// Whether the chain up to and including this hop yields at most one document.
    pub single_valued: bool,
}

/// Outcome of resolving a field path.
#[derive(Debug, Clone)]
pub struct ResolvedPath<'a> {
    /// Storage path of the terminal field, referencing join aliases where needed.
    pub native_path: String,
    /// Schema of the terminal field.
    pub field: &'a FieldSchema,
    /// Joins needed before the terminal field can be read, in hop order.
    pub joins: Vec<JoinRequirement>,
    /// Number of relation hops crossed.
    pub hops: usize,
    /// Whether the path yields at most one value per root document.
    pub single_valued: bool,
}

/// Resolves dotted field paths against a schema description.
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'a> {
    schema: &'a dyn SchemaAdapter,
    max_depth: usize,
}

impl<'a> PathResolver<'a> {
    pub fn new(schema: &'a dyn SchemaAdapter, max_depth: usize) -> Self {
        Self { schema, max_depth }
    }

    pub fn schema(&self) -> &'a dyn SchemaAdapter {
        self.schema
    }

    /// Resolves `path` starting from `collection`.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::Schema`] when a segment is unknown, when a non-relation field is
    ///   traversed or when the terminal segment has no local value.
    /// - [`AdapterError::RelationDepth`] when the path crosses more relations than allowed.
    pub fn resolve(&self, collection: &str, path: &str) -> AdapterResult<ResolvedPath<'a>> {
        let segments = path.split('.').collect::<Vec<_>>();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(AdapterError::Schema(format!("malformed field path `{path}`")));
        }

        let mut current = self.schema.require(collection)?;
        let mut prefix = String::new();
        let mut alias = String::new();
        let mut joins = Vec::new();
        let mut hops = 0;
        let mut single_valued = true;

        for (position, segment) in segments.iter().enumerate() {
            let field = current.field(segment).ok_or_else(|| {
                AdapterError::Schema(format!("unknown field `{segment}` in `{}` (path `{path}`)", current.name))
            })?;
            let is_last = position + 1 == segments.len();
            alias.push_str("__");
            alias.push_str(segment);

            let Some(relation) = &field.relation else {
                if is_last {
                    return Ok(ResolvedPath {
                        native_path: format!("{prefix}{segment}"),
                        field,
                        joins,
                        hops,
                        single_valued,
                    });
                }
                if field.field_type == FieldType::Json {
                    return Ok(ResolvedPath {
                        native_path: format!("{prefix}{}", segments[position..].join(".")),
                        field,
                        joins,
                        hops,
                        single_valued,
                    });
                }
                return Err(AdapterError::Schema(format!(
                    "`{segment}` in `{}` is not a relation and cannot be traversed (path `{path}`)",
                    current.name
                )));
            };

            if is_last {
                if !relation.is_stored_locally() || relation.kind == RelationKind::Embedded {
                    return Err(AdapterError::Schema(format!(
                        "`{segment}` in `{}` has no local value, target one of its fields (path `{path}`)",
                        current.name
                    )));
                }
                if relation.kind == RelationKind::HasMany {
                    single_valued = false;
                }
                return Ok(ResolvedPath {
                    native_path: format!("{prefix}{segment}"),
                    field,
                    joins,
                    hops,
                    single_valued,
                });
            }

            hops += 1;
            if hops > self.max_depth {
                return Err(AdapterError::RelationDepth {
                    path: path.to_string(),
                    hops: segments.len() - 1,
                    max: self.max_depth,
                });
            }

            match relation.kind {
                RelationKind::Embedded => {
                    single_valued = false;
                    prefix = format!("{prefix}{segment}.");
                }
                RelationKind::BelongsTo => {
                    joins.push(JoinRequirement {
                        alias: alias.clone(),
                        from: relation.collection.clone(),
                        local_field: format!("{prefix}{segment}"),
                        foreign_field: PRIMARY_KEY.to_string(),
                        kind: RelationKind::BelongsTo,
                        single_valued,
                    });
                    prefix = format!("{alias}.");
                }
                RelationKind::HasMany => {
                    single_valued = false;
                    let (local_field, foreign_field) = match &relation.foreign_key {
                        Some(foreign_key) => (format!("{prefix}{PRIMARY_KEY}"), foreign_key.clone()),
                        None => (format!("{prefix}{segment}"), PRIMARY_KEY.to_string()),
                    };
                    joins.push(JoinRequirement {
                        alias: alias.clone(),
                        from: relation.collection.clone(),
                        local_field,
                        foreign_field,
                        kind: RelationKind::HasMany,
                        single_valued,
                    });
                    prefix = format!("{alias}.");
                }
            }

            current = self.schema.require(&relation.collection)?;
        }

        Err(AdapterError::Schema(format!("empty field path `{path}`")))
    }
}
