//! Identity map keys, per-entity lifecycle state, and change-set diffing for the Unit of Work.
//!
//! New territory relative to the teacher (`bottle-orm` has no Unit of Work at all — every
//! `QueryBuilder` call goes straight to the pool), grounded directly on spec.md §3/§4.2's
//! description of identity maps and snapshot-diff change detection.

use std::any::TypeId;
use std::collections::HashMap;

use crate::value::Value;

/// Identifies a single managed entity instance: its concrete type plus its primary key value,
/// rendered to a canonical string so it can key a `HashMap` regardless of the key's logical
/// type (integer, UUID, composite...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub type_id: TypeId,
    pub key: String,
}

impl IdentityKey {
    pub fn new(type_id: TypeId, key_value: &Value) -> Self {
        IdentityKey { type_id, key: canonical_key(key_value) }
    }
}

fn canonical_key(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
        Value::Text(v) => v.clone(),
        Value::Uuid(v) => v.hyphenated().to_string(),
        Value::DateTimeUtc(v) => v.to_rfc3339(),
        Value::NaiveDateTime(v) => v.to_string(),
        Value::NaiveDate(v) => v.to_string(),
        Value::NaiveTime(v) => v.to_string(),
    }
}

/// An entity's lifecycle state within a Unit of Work, per spec.md §3's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Not yet known to any Unit of Work.
    New,
    /// Tracked by the identity map; changes are detected and flushed.
    Managed,
    /// Scheduled for deletion on the next flush.
    Removed,
    /// Was managed, but no longer tracked (cleared, or its Unit of Work closed).
    Detached,
}

/// A field-by-field snapshot of a managed entity's scalar column values, taken right after
/// load or right after the last flush. `diff` against a fresh snapshot is how the Unit of Work
/// decides what changed without requiring explicit setter hooks (spec.md's "magic setter
/// hooks" redesign note: mutation is tracked by comparison, not interception).
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    values: HashMap<String, Value>,
}

impl Snapshot {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Snapshot { values }
    }

    /// Returns the fields whose value differs between `self` (the baseline) and `current`.
    pub fn diff(&self, current: &Snapshot) -> ChangeSet {
        let mut changed = HashMap::new();
        for (name, new_value) in &current.values {
            match self.values.get(name) {
                Some(old_value) if old_value == new_value => {}
                _ => {
                    changed.insert(name.clone(), new_value.clone());
                }
            }
        }
        ChangeSet { changed }
    }
}

/// The set of fields that changed between two snapshots, keyed by field name.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changed: HashMap<String, Value>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.changed.iter()
    }
}

/// A single pending mutation to a many-to-many association's junction rows, buffered until
/// flush because junction-table writes have no "snapshot" to diff against — the Unit of Work
/// just needs to know which pairs were added or removed since the association was loaded.
#[derive(Debug, Clone)]
pub enum AssociationChange {
    Add { owner_key: IdentityKey, target_key: IdentityKey },
    Remove { owner_key: IdentityKey, target_key: IdentityKey },
}

/// Accumulates [`AssociationChange`]s for every many-to-many association touched during a
/// Unit of Work's lifetime, drained and applied during `flush`.
#[derive(Debug, Clone, Default)]
pub struct AssociationChangeBuffer {
    changes: Vec<(String, AssociationChange)>,
}

impl AssociationChangeBuffer {
    pub fn record(&mut self, association_name: impl Into<String>, change: AssociationChange) {
        self.changes.push((association_name.into(), change));
    }

    pub fn drain(&mut self) -> Vec<(String, AssociationChange)> {
        std::mem::take(&mut self.changes)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_detects_changed_field_only() {
        let mut before = HashMap::new();
        before.insert("name".to_string(), Value::Text("old".into()));
        before.insert("age".to_string(), Value::I64(1));
        let baseline = Snapshot::new(before);

        let mut after = HashMap::new();
        after.insert("name".to_string(), Value::Text("new".into()));
        after.insert("age".to_string(), Value::I64(1));
        let current = Snapshot::new(after);

        let changes = baseline.diff(&current);
        assert!(!changes.is_empty());
        let fields: Vec<_> = changes.fields().map(|(k, _)| k.clone()).collect();
        assert_eq!(fields, vec!["name".to_string()]);
    }

    #[test]
    fn identity_key_equal_for_equal_keys() {
        let type_id = TypeId::of::<u8>();
        let a = IdentityKey::new(type_id, &Value::I64(42));
        let b = IdentityKey::new(type_id, &Value::I64(42));
        assert_eq!(a, b);
    }
}
