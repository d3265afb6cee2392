//! Entity metadata: field/association/inheritance descriptors, the `Entity` accessor trait,
//! and the process-wide metadata registry.
//!
//! Rust has no attribute-driven runtime reflection, so metadata is captured one of two ways
//! (per `SPEC_FULL.md`'s redesign note on "attribute-driven metadata"): either generated at
//! compile time by `#[derive(Entity)]` (the normal path, grounded on the teacher's
//! `#[derive(Model)]` in `derive_model.rs`), or assembled by hand at startup with
//! [`EntityBuilder`] for entities that can't carry the derive (e.g. types defined outside the
//! crate). Both paths converge on the same [`EntityDescriptor`] and the same
//! [`MetadataRegistry`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::errors::Error;
use crate::value::{LogicalType, Value};

/// Object-safe accessor trait generated by `#[derive(Entity)]`.
///
/// Realizes the "explicit accessor table" redesign: instead of reaching for `dyn Any` or a
/// runtime property bag, each field is read/written through a `match` arm over its name,
/// emitted directly into the struct's own module where private fields are visible — the same
/// trick the teacher uses to emit `to_map()`/`FromRow` for `#[derive(Model)]`.
pub trait Entity: Any + Send + Sync {
    /// The table this entity maps to.
    fn table_name() -> &'static str
    where
        Self: Sized;

    /// The entity's own descriptor. Derives call [`MetadataRegistry::describe_or_init`] with a
    /// builder closure; hand-written impls may call it directly too.
    fn descriptor() -> Arc<EntityDescriptor>
    where
        Self: Sized;

    fn get_field(&self, name: &str) -> Option<Value>;
    fn set_field(&mut self, name: &str, value: Value) -> Result<(), Error>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Entities directly reachable through an eagerly-held association field, as
    /// `(association_name, boxed entity)` pairs. The Unit of Work walks this to cascade
    /// persist/remove without needing generic graph traversal over unknown field types —
    /// lazy/handle-backed associations (spec.md's redesign note on lazy proxies) are not
    /// walked here since they may not be loaded at all. `#[derive(Entity)]` only emits a
    /// non-empty body for associations whose field actually holds owned entity values.
    fn cascaded_children(&self) -> Vec<(&'static str, Box<dyn Entity>)> {
        Vec::new()
    }
}

/// A single scalar column mapped to one struct field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub column: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_unique: bool,
}

/// A struct field backed by more than one physical column (spec.md's example: a
/// timezone-aware timestamp split into an instant column and a zone-offset column).
#[derive(Debug, Clone)]
pub struct MultiColumnFieldDescriptor {
    pub name: String,
    /// `(column_suffix, logical_type)` pairs, in declaration order. The physical column name
    /// is `{field_name}_{suffix}`.
    pub columns: Vec<(String, LogicalType)>,
}

/// When an association's rows are actually fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Eager,
    Lazy,
}

/// Cascaded operations propagated from an owner entity to its associated entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CascadeSet {
    pub persist: bool,
    pub remove: bool,
}

impl CascadeSet {
    pub const NONE: CascadeSet = CascadeSet { persist: false, remove: false };
    pub const ALL: CascadeSet = CascadeSet { persist: true, remove: true };
}

/// Describes the junction table used by a many-to-many association.
#[derive(Debug, Clone)]
pub struct JoinTableDescriptor {
    pub table_name: String,
    pub owner_column: String,
    pub target_column: String,
}

impl JoinTableDescriptor {
    /// The spec's default naming convention: `ownerTable_targetTable`.
    pub fn default_name(owner_table: &str, target_table: &str) -> String {
        format!("{}_{}", owner_table, target_table)
    }
}

/// The shape of an association, matching spec.md's four relationship kinds.
#[derive(Debug, Clone)]
pub enum AssociationKind {
    ManyToOne {
        foreign_key_column: String,
    },
    OneToMany {
        mapped_by: String,
    },
    OneToOne {
        /// `Some(field)` on the inverse side; `None` on the owning side, which instead carries
        /// `foreign_key_column`.
        mapped_by: Option<String>,
        foreign_key_column: Option<String>,
    },
    ManyToMany {
        mapped_by: Option<String>,
        join_table: JoinTableDescriptor,
    },
}

/// One navigable association from an owner entity to a target entity type.
#[derive(Debug, Clone)]
pub struct AssociationDescriptor {
    pub name: String,
    pub target_table: String,
    pub target_type: TypeId,
    pub kind: AssociationKind,
    pub cascade: CascadeSet,
    pub fetch: FetchMode,
    pub orphan_removal: bool,
}

impl AssociationDescriptor {
    pub fn is_owning_side(&self) -> bool {
        match &self.kind {
            AssociationKind::ManyToOne { .. } => true,
            AssociationKind::OneToMany { .. } => false,
            AssociationKind::OneToOne { mapped_by, .. } => mapped_by.is_none(),
            AssociationKind::ManyToMany { mapped_by, .. } => mapped_by.is_none(),
        }
    }
}

/// Single-table vs. joined-table inheritance, per spec.md §3's inheritance model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InheritanceStrategy {
    SingleTable,
    Joined,
}

/// Describes how an entity participates in an inheritance hierarchy.
#[derive(Debug, Clone)]
pub struct InheritanceDescriptor {
    pub strategy: InheritanceStrategy,
    pub discriminator_column: String,
    /// This concrete entity's own discriminator value. `None` on the abstract root.
    pub discriminator_value: Option<String>,
    /// All discriminator values known to map onto the root (used when a root-level query must
    /// match any concrete subtype: `disc IN (...)`).
    pub discriminator_values: Vec<String>,
    pub parent_table: Option<String>,
}

/// Full metadata for one mapped entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub table_name: String,
    pub fields: Vec<FieldDescriptor>,
    pub multi_column_fields: Vec<MultiColumnFieldDescriptor>,
    pub associations: Vec<AssociationDescriptor>,
    pub primary_key: String,
    pub inheritance: Option<InheritanceDescriptor>,
}

impl EntityDescriptor {
    pub fn column_names(&self) -> Vec<String> {
        let mut cols: Vec<String> = self.fields.iter().map(|f| f.column.clone()).collect();
        for mc in &self.multi_column_fields {
            for (suffix, _) in &mc.columns {
                cols.push(format!("{}_{}", mc.name, suffix));
            }
        }
        if let Some(inh) = &self.inheritance {
            if !cols.contains(&inh.discriminator_column) {
                cols.push(inh.discriminator_column.clone());
            }
        }
        cols
    }

    /// Maps a physical column name back to the struct field name that owns it. Multi-column
    /// fields resolve every `{name}_{suffix}` column back to `{name}`.
    pub fn field_name_for_column(&self, column: &str) -> Option<String> {
        if let Some(f) = self.fields.iter().find(|f| f.column == column) {
            return Some(f.name.clone());
        }
        for mc in &self.multi_column_fields {
            for (suffix, _) in &mc.columns {
                if *column == format!("{}_{}", mc.name, suffix) {
                    return Some(mc.name.clone());
                }
            }
        }
        if let Some(inh) = &self.inheritance {
            if inh.discriminator_column == column {
                return Some("__discriminator".to_string());
            }
        }
        None
    }

    pub fn association(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.associations.iter().find(|a| a.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Incrementally assembles an [`EntityDescriptor`] at either compile time (from the derive
/// macro's generated code) or run time (hand-written registration for types that can't carry
/// the derive). Mirrors the teacher's column-by-column construction in `derive_model.rs`'s
/// `expand()`, but exposed as a chainable builder instead of purely generated code.
pub struct EntityBuilder {
    table_name: String,
    fields: Vec<FieldDescriptor>,
    multi_column_fields: Vec<MultiColumnFieldDescriptor>,
    associations: Vec<AssociationDescriptor>,
    primary_key: Option<String>,
    inheritance: Option<InheritanceDescriptor>,
}

impl EntityBuilder {
    pub fn new(table_name: impl Into<String>) -> Self {
        EntityBuilder {
            table_name: table_name.into(),
            fields: Vec::new(),
            multi_column_fields: Vec::new(),
            associations: Vec::new(),
            primary_key: None,
            inheritance: None,
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        if field.is_primary_key {
            self.primary_key = Some(field.name.clone());
        }
        self.fields.push(field);
        self
    }

    pub fn multi_column_field(mut self, field: MultiColumnFieldDescriptor) -> Self {
        self.multi_column_fields.push(field);
        self
    }

    pub fn association(mut self, assoc: AssociationDescriptor) -> Self {
        self.associations.push(assoc);
        self
    }

    pub fn inheritance(mut self, inheritance: InheritanceDescriptor) -> Self {
        self.inheritance = Some(inheritance);
        self
    }

    /// As [`EntityBuilder::inheritance`], but accepts `None` directly so `#[derive(Entity)]` can
    /// chain it unconditionally instead of branching on whether the struct declared inheritance.
    pub fn inheritance_opt(mut self, inheritance: Option<InheritanceDescriptor>) -> Self {
        self.inheritance = inheritance;
        self
    }

    pub fn build<T: 'static>(self) -> Result<EntityDescriptor, Error> {
        let primary_key = self.primary_key.ok_or_else(|| {
            Error::metadata(format!("entity '{}' has no primary key field", self.table_name))
        })?;
        Ok(EntityDescriptor {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            table_name: self.table_name,
            fields: self.fields,
            multi_column_fields: self.multi_column_fields,
            associations: self.associations,
            primary_key,
            inheritance: self.inheritance,
        })
    }
}

/// Process-wide, append-only cache of entity descriptors.
///
/// Per spec.md's concurrency model: reads are concurrent, but the first `describe::<T>()` for
/// a given type serializes behind the write lock while the descriptor is built; every
/// subsequent call is a cheap `Arc` clone under a read lock.
pub struct MetadataRegistry {
    entries: RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>,
}

static REGISTRY: OnceLock<MetadataRegistry> = OnceLock::new();

impl MetadataRegistry {
    fn global() -> &'static MetadataRegistry {
        REGISTRY.get_or_init(|| MetadataRegistry { entries: RwLock::new(HashMap::new()) })
    }

    /// Returns the cached descriptor for `T`, building it via `init` on first use.
    pub fn describe_or_init<T: 'static>(
        init: impl FnOnce() -> Result<EntityDescriptor, Error>,
    ) -> Result<Arc<EntityDescriptor>, Error> {
        let registry = Self::global();
        let type_id = TypeId::of::<T>();

        if let Some(existing) = registry.entries.read().expect("metadata registry poisoned").get(&type_id) {
            return Ok(existing.clone());
        }

        let mut guard = registry.entries.write().expect("metadata registry poisoned");
        if let Some(existing) = guard.get(&type_id) {
            return Ok(existing.clone());
        }
        let descriptor = Arc::new(init()?);
        guard.insert(type_id, descriptor.clone());
        Ok(descriptor)
    }

    /// Looks up an already-registered descriptor without building it. Used by the join
    /// resolver to describe associated types it only knows by `TypeId`.
    pub fn lookup(type_id: TypeId) -> Option<Arc<EntityDescriptor>> {
        Self::global().entries.read().expect("metadata registry poisoned").get(&type_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    #[test]
    fn builder_requires_primary_key() {
        let result = EntityBuilder::new("dummy").build::<Dummy>();
        assert!(matches!(result, Err(Error::Metadata(_))));
    }

    #[test]
    fn builder_collects_columns() {
        let descriptor = EntityBuilder::new("dummy")
            .field(FieldDescriptor {
                name: "id".into(),
                column: "id".into(),
                logical_type: LogicalType::BigInt,
                nullable: false,
                is_primary_key: true,
                is_unique: true,
            })
            .field(FieldDescriptor {
                name: "name".into(),
                column: "name".into(),
                logical_type: LogicalType::Text,
                nullable: false,
                is_primary_key: false,
                is_unique: false,
            })
            .build::<Dummy>()
            .unwrap();

        assert_eq!(descriptor.primary_key, "id");
        assert_eq!(descriptor.column_names(), vec!["id".to_string(), "name".to_string()]);
        assert_eq!(descriptor.field_name_for_column("name"), Some("name".to_string()));
    }

    #[test]
    fn registry_caches_descriptor() {
        let first = MetadataRegistry::describe_or_init::<Dummy>(|| {
            EntityBuilder::new("dummy")
                .field(FieldDescriptor {
                    name: "id".into(),
                    column: "id".into(),
                    logical_type: LogicalType::BigInt,
                    nullable: false,
                    is_primary_key: true,
                    is_unique: true,
                })
                .build::<Dummy>()
        })
        .unwrap();
        let second = MetadataRegistry::describe_or_init::<Dummy>(|| {
            panic!("init should not run twice")
        })
        .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
