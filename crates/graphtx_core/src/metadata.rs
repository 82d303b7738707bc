//! Kind and reference metadata.
//!
//! Metadata is loaded elsewhere (class descriptors, schema files) and handed
//! to the core through [`MetadataProvider`]. [`Schema`] is an in-memory
//! provider built in code.

use graphtx_store::{Fields, Identity, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Whether a reference field holds one identity or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// 1:1 reference stored as `Value::Ref` or `Value::Null`.
    One,
    /// 1:N or M:N reference stored as a `Value::List` of refs.
    Many,
}

/// Describes one reference field of a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDescriptor {
    /// Field name on the holding kind.
    pub name: String,
    /// Kind of the referenced objects.
    pub target: String,
    /// One or many.
    pub cardinality: Cardinality,
    /// Whether the reference may be null. Collections are always breakable.
    pub nullable: bool,
    /// Deleting the holder also deletes the referenced objects.
    pub cascade_delete: bool,
    /// Persisting the holder also persists transient referenced objects.
    pub cascade_insert: bool,
}

impl ReferenceDescriptor {
    /// A nullable 1:1 reference without cascades.
    pub fn one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::One,
            nullable: true,
            cascade_delete: false,
            cascade_insert: false,
        }
    }

    /// A collection reference without cascades.
    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            cardinality: Cardinality::Many,
            ..Self::one(name, target)
        }
    }

    /// Marks the reference as non-nullable.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the cascade-delete flag.
    #[must_use]
    pub fn cascade_delete(mut self, value: bool) -> Self {
        self.cascade_delete = value;
        self
    }

    /// Sets the cascade-insert flag.
    #[must_use]
    pub fn cascade_insert(mut self, value: bool) -> Self {
        self.cascade_insert = value;
        self
    }

    /// Returns true if removing a reference through this field is legal.
    #[must_use]
    pub fn is_breakable(&self) -> bool {
        self.nullable || self.cardinality == Cardinality::Many
    }
}

/// Describes one object kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindDescriptor {
    /// Kind name.
    pub kind: String,
    /// Primary-key fields, in key order.
    pub key_fields: Vec<String>,
    /// Reference fields.
    pub references: Vec<ReferenceDescriptor>,
}

impl KindDescriptor {
    /// Creates a descriptor with the given key fields and no references.
    pub fn new<I, S>(kind: impl Into<String>, key_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: kind.into(),
            key_fields: key_fields.into_iter().map(Into::into).collect(),
            references: Vec::new(),
        }
    }

    /// Adds a reference field.
    #[must_use]
    pub fn with_reference(mut self, reference: ReferenceDescriptor) -> Self {
        self.references.push(reference);
        self
    }

    /// Looks up a reference field by name.
    #[must_use]
    pub fn reference(&self, name: &str) -> Option<&ReferenceDescriptor> {
        self.references.iter().find(|r| r.name == name)
    }

    /// Returns the objects `fields` holds 1:1 references to.
    ///
    /// These are the foreign keys of the object's row: the referenced rows
    /// must exist before it is inserted and outlive it when deleted.
    /// Collection references are not foreign keys of the holder.
    #[must_use]
    pub fn foreign_keys(&self, fields: &Fields) -> BTreeSet<Identity> {
        self.references
            .iter()
            .filter(|r| r.cardinality == Cardinality::One)
            .filter_map(|r| fields.get(&r.name))
            .filter_map(Value::as_identity)
            .cloned()
            .collect()
    }

    /// Builds the identity of an object from its key fields.
    ///
    /// Returns `None` if a key field is missing or null.
    #[must_use]
    pub fn identity_of(&self, fields: &Fields) -> Option<Identity> {
        let key: Option<Vec<Value>> = self
            .key_fields
            .iter()
            .map(|f| fields.get(f).filter(|v| !v.is_null()).cloned())
            .collect();
        key.filter(|k| !k.is_empty())
            .map(|k| Identity::new(self.kind.clone(), k))
    }
}

/// Supplies per-kind metadata to the core.
pub trait MetadataProvider: Send + Sync {
    /// Returns the descriptor for a kind.
    fn descriptor(&self, kind: &str) -> Option<&KindDescriptor>;

    /// Returns every known descriptor.
    fn descriptors(&self) -> Vec<&KindDescriptor>;

    /// Returns every reference field, on any kind, that targets `kind`.
    fn referrers_of(&self, kind: &str) -> Vec<(&KindDescriptor, &ReferenceDescriptor)> {
        self.descriptors()
            .into_iter()
            .flat_map(|d| {
                d.references
                    .iter()
                    .filter(move |r| r.target == kind)
                    .map(move |r| (d, r))
            })
            .collect()
    }
}

/// An in-memory [`MetadataProvider`].
///
/// # Example
///
/// ```rust
/// use graphtx_core::{KindDescriptor, MetadataProvider, ReferenceDescriptor, Schema};
///
/// let schema = Schema::new()
///     .with_kind(KindDescriptor::new("ProductGroup", ["id"])
///         .with_reference(ReferenceDescriptor::many("articles", "Article")))
///     .with_kind(KindDescriptor::new("Article", ["id"])
///         .with_reference(ReferenceDescriptor::one("group", "ProductGroup").required()));
///
/// assert_eq!(schema.referrers_of("ProductGroup").len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Schema {
    kinds: BTreeMap<String, KindDescriptor>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kind, replacing any previous descriptor of the same name.
    #[must_use]
    pub fn with_kind(mut self, descriptor: KindDescriptor) -> Self {
        self.kinds.insert(descriptor.kind.clone(), descriptor);
        self
    }
}

impl MetadataProvider for Schema {
    fn descriptor(&self, kind: &str) -> Option<&KindDescriptor> {
        self.kinds.get(kind)
    }

    fn descriptors(&self) -> Vec<&KindDescriptor> {
        self.kinds.values().collect()
    }
}
