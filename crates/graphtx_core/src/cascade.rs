//! Referential integrity: cascades and dangling-reference checks.
//!
//! The cascader walks reference fields described by the metadata provider.
//! It never touches the store or the identity map directly; it sees the
//! object graph through [`ObjectGraph`], which the transaction implements
//! as "in-flight state layered over stored state".

use crate::error::{CoreError, CoreResult};
use crate::metadata::MetadataProvider;
use crate::types::ObjectState;
use graphtx_store::{Fields, Identity};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Read access to the object graph as one transaction sees it.
pub trait ObjectGraph {
    /// Returns the current fields of `identity`, from the transaction's cache
    /// if present, else from the store.
    fn fields_of(&self, identity: &Identity) -> CoreResult<Option<Fields>>;

    /// Returns true if `identity` exists now or will exist after the next
    /// flush.
    fn exists(&self, identity: &Identity) -> CoreResult<bool>;

    /// Returns the cached state of `identity`, `None` if not cached.
    fn state_of(&self, identity: &Identity) -> Option<ObjectState>;

    /// Returns the live objects of `kind` whose reference field `field`
    /// currently points at `target`.
    fn referrers(&self, kind: &str, field: &str, target: &Identity) -> CoreResult<Vec<Identity>>;
}

/// A reference that must be removed before a delete is legal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenReference {
    /// Object holding the reference.
    pub referrer: Identity,
    /// Reference field on the referrer.
    pub field: String,
    /// The object being deleted.
    pub target: Identity,
}

/// What deleting one object entails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletePlan {
    /// Objects to delete, the requested one first, in traversal order.
    pub deletes: Vec<Identity>,
    /// References to break on surviving objects.
    pub broken: Vec<BrokenReference>,
}

/// Expands deletes and inserts along reference metadata.
pub struct Cascader<'m> {
    metadata: &'m dyn MetadataProvider,
}

impl<'m> Cascader<'m> {
    /// Creates a cascader over the given metadata.
    pub fn new(metadata: &'m dyn MetadataProvider) -> Self {
        Self { metadata }
    }

    fn references_of(
        &self,
        identity: &Identity,
        graph: &dyn ObjectGraph,
    ) -> CoreResult<Vec<(String, bool, bool, Identity)>> {
        let descriptor = self
            .metadata
            .descriptor(identity.kind())
            .ok_or_else(|| CoreError::unknown_kind(identity.kind()))?;
        let Some(fields) = graph.fields_of(identity)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for reference in &descriptor.references {
            if let Some(value) = fields.get(&reference.name) {
                for target in value.references() {
                    out.push((
                        reference.name.clone(),
                        reference.cascade_delete,
                        reference.cascade_insert,
                        target.clone(),
                    ));
                }
            }
        }
        Ok(out)
    }

    /// Computes the objects and references affected by deleting `root`.
    ///
    /// Follows cascade-delete references breadth first, visiting each
    /// identity once. Every surviving object that refers into the deleted
    /// set must do so through a breakable reference; those references are
    /// returned for the caller to break.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReferentialIntegrityViolation`] if a surviving
    /// object holds a required reference to a deleted one.
    pub fn expand_for_delete(
        &self,
        root: &Identity,
        graph: &dyn ObjectGraph,
    ) -> CoreResult<DeletePlan> {
        let mut plan = DeletePlan::default();
        let mut visited: HashSet<Identity> = HashSet::from([root.clone()]);
        let mut frontier = VecDeque::from([root.clone()]);

        while let Some(identity) = frontier.pop_front() {
            for (_, cascade_delete, _, target) in self.references_of(&identity, graph)? {
                if cascade_delete && !visited.contains(&target) && graph.exists(&target)? {
                    visited.insert(target.clone());
                    frontier.push_back(target);
                }
            }
            plan.deletes.push(identity);
        }

        for deleted in &plan.deletes {
            for (holder, reference) in self.metadata.referrers_of(deleted.kind()) {
                for referrer in graph.referrers(&holder.kind, &reference.name, deleted)? {
                    if visited.contains(&referrer) {
                        continue;
                    }
                    if !reference.is_breakable() {
                        return Err(CoreError::referential_integrity(
                            deleted,
                            &referrer,
                            &reference.name,
                        ));
                    }
                    plan.broken.push(BrokenReference {
                        referrer,
                        field: reference.name.clone(),
                        target: deleted.clone(),
                    });
                }
            }
        }

        debug!(
            %root,
            deletes = plan.deletes.len(),
            broken = plan.broken.len(),
            "expanded delete"
        );
        Ok(plan)
    }

    /// Returns the transient objects reachable from `root` through
    /// cascade-insert references, in breadth-first order.
    pub fn expand_for_insert(
        &self,
        root: &Identity,
        graph: &dyn ObjectGraph,
    ) -> CoreResult<Vec<Identity>> {
        let mut reached = Vec::new();
        let mut visited: HashSet<Identity> = HashSet::from([root.clone()]);
        let mut frontier = VecDeque::from([root.clone()]);

        while let Some(identity) = frontier.pop_front() {
            for (_, _, cascade_insert, target) in self.references_of(&identity, graph)? {
                if !cascade_insert || visited.contains(&target) {
                    continue;
                }
                visited.insert(target.clone());
                if graph.state_of(&target) == Some(ObjectState::Transient) {
                    reached.push(target.clone());
                    frontier.push_back(target);
                }
            }
        }
        Ok(reached)
    }

    /// Checks that every reference held by `identity` points at an object
    /// that exists.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReferentialIntegrityViolation`] naming the first
    /// dangling reference.
    pub fn validate_references(&self, identity: &Identity, graph: &dyn ObjectGraph) -> CoreResult<()> {
        for (field, _, _, target) in self.references_of(identity, graph)? {
            if target != *identity && !graph.exists(&target)? {
                return Err(CoreError::referential_integrity(&target, identity, field));
            }
        }
        Ok(())
    }

    /// Checks that no live object still refers to `identity`, which is about
    /// to be deleted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReferentialIntegrityViolation`] naming the first
    /// remaining referrer.
    pub fn validate_delete(&self, identity: &Identity, graph: &dyn ObjectGraph) -> CoreResult<()> {
        for (holder, reference) in self.metadata.referrers_of(identity.kind()) {
            if let Some(referrer) = graph
                .referrers(&holder.kind, &reference.name, identity)?
                .into_iter()
                .find(|r| r != identity)
            {
                return Err(CoreError::referential_integrity(
                    identity,
                    &referrer,
                    &reference.name,
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{KindDescriptor, ReferenceDescriptor, Schema};
    use graphtx_store::{fields, Value};
    use std::collections::HashMap;

    /// A graph over plain maps: every listed object exists.
    #[derive(Default)]
    struct MapGraph {
        objects: HashMap<Identity, Fields>,
        states: HashMap<Identity, ObjectState>,
    }

    impl MapGraph {
        fn with(mut self, id: &Identity, f: Fields) -> Self {
            self.objects.insert(id.clone(), f);
            self
        }

        fn transient(mut self, id: &Identity, f: Fields) -> Self {
            self.states.insert(id.clone(), ObjectState::Transient);
            self.with(id, f)
        }
    }

    impl ObjectGraph for MapGraph {
        fn fields_of(&self, identity: &Identity) -> CoreResult<Option<Fields>> {
            Ok(self.objects.get(identity).cloned())
        }

        fn exists(&self, identity: &Identity) -> CoreResult<bool> {
            Ok(self.objects.contains_key(identity)
                && self.states.get(identity) != Some(&ObjectState::Transient))
        }

        fn state_of(&self, identity: &Identity) -> Option<ObjectState> {
            self.states.get(identity).copied()
        }

        fn referrers(&self, kind: &str, field: &str, target: &Identity) -> CoreResult<Vec<Identity>> {
            let mut out: Vec<Identity> = self
                .objects
                .iter()
                .filter(|(id, f)| {
                    id.kind() == kind && f.get(field).is_some_and(|v| v.refers_to(target))
                })
                .map(|(id, _)| id.clone())
                .collect();
            out.sort();
            Ok(out)
        }
    }

    fn group(n: i64) -> Identity {
        Identity::of("ProductGroup", n)
    }

    fn article(n: i64) -> Identity {
        Identity::of("Article", n)
    }

    fn schema(cascade_articles: bool) -> Schema {
        Schema::new()
            .with_kind(
                KindDescriptor::new("ProductGroup", ["id"]).with_reference(
                    ReferenceDescriptor::many("articles", "Article")
                        .cascade_delete(cascade_articles)
                        .cascade_insert(true),
                ),
            )
            .with_kind(
                KindDescriptor::new("Article", ["id"])
                    .with_reference(ReferenceDescriptor::one("product_group", "ProductGroup").required())
                    .with_reference(ReferenceDescriptor::one("successor", "Article").cascade_delete(true)),
            )
    }

    fn catalog() -> MapGraph {
        MapGraph::default()
            .with(
                &group(1),
                fields([("articles", Value::List(vec![article(1).into(), article(2).into()]))]),
            )
            .with(&article(1), fields([("product_group", Value::from(group(1)))]))
            .with(&article(2), fields([("product_group", Value::from(group(1)))]))
    }

    #[test]
    fn delete_parent_with_required_children_fails() {
        let schema = schema(false);
        let cascader = Cascader::new(&schema);
        let err = cascader.expand_for_delete(&group(1), &catalog()).unwrap_err();
        match err {
            CoreError::ReferentialIntegrityViolation { identity, referrer, field } => {
                assert_eq!(identity, group(1));
                assert_eq!(referrer, article(1));
                assert_eq!(field, "product_group");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn delete_child_breaks_collection_reference() {
        let schema = schema(false);
        let cascader = Cascader::new(&schema);
        let plan = cascader.expand_for_delete(&article(1), &catalog()).unwrap();
        assert_eq!(plan.deletes, vec![article(1)]);
        assert_eq!(
            plan.broken,
            vec![BrokenReference {
                referrer: group(1),
                field: "articles".into(),
                target: article(1),
            }]
        );
    }

    #[test]
    fn cascade_delete_takes_children_along() {
        let schema = schema(true);
        let cascader = Cascader::new(&schema);
        let plan = cascader.expand_for_delete(&group(1), &catalog()).unwrap();
        assert_eq!(plan.deletes, vec![group(1), article(1), article(2)]);
        assert!(plan.broken.is_empty());
    }

    #[test]
    fn self_reference_is_visited_once() {
        let schema = schema(false);
        let cascader = Cascader::new(&schema);
        let graph = MapGraph::default()
            .with(&group(1), Fields::new())
            .with(
                &article(1),
                fields([
                    ("product_group", Value::from(group(1))),
                    ("successor", Value::from(article(1))),
                ]),
            );
        let plan = cascader.expand_for_delete(&article(1), &graph).unwrap();
        assert_eq!(plan.deletes, vec![article(1)]);
        assert!(plan.broken.is_empty());
    }

    #[test]
    fn cascade_delete_cycle_terminates() {
        let schema = schema(false);
        let cascader = Cascader::new(&schema);
        let graph = MapGraph::default()
            .with(&article(1), fields([("successor", Value::from(article(2)))]))
            .with(&article(2), fields([("successor", Value::from(article(1)))]));
        let plan = cascader.expand_for_delete(&article(1), &graph).unwrap();
        assert_eq!(plan.deletes, vec![article(1), article(2)]);
    }

    #[test]
    fn insert_reaches_transient_objects_only() {
        let schema = schema(false);
        let cascader = Cascader::new(&schema);
        let graph = MapGraph::default()
            .with(
                &group(1),
                fields([("articles", Value::List(vec![article(1).into(), article(2).into()]))]),
            )
            .transient(&article(1), Fields::new())
            .with(&article(2), Fields::new());
        let reached = cascader.expand_for_insert(&group(1), &graph).unwrap();
        assert_eq!(reached, vec![article(1)]);
    }

    #[test]
    fn dangling_reference_is_reported() {
        let schema = schema(false);
        let cascader = Cascader::new(&schema);
        let graph = MapGraph::default().with(&article(1), fields([("product_group", Value::from(group(7)))]));
        let err = cascader.validate_references(&article(1), &graph).unwrap_err();
        assert!(matches!(err, CoreError::ReferentialIntegrityViolation { identity, .. } if identity == group(7)));
    }

    #[test]
    fn validate_delete_sees_remaining_referrers() {
        let schema = schema(false);
        let cascader = Cascader::new(&schema);
        assert!(cascader.validate_delete(&group(1), &catalog()).is_err());
        let lonely = MapGraph::default().with(&group(2), Fields::new());
        cascader.validate_delete(&group(2), &lonely).unwrap();
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let schema = schema(false);
        let cascader = Cascader::new(&schema);
        let graph = MapGraph::default().with(&Identity::of("Ghost", 1), Fields::new());
        let err = cascader.expand_for_delete(&Identity::of("Ghost", 1), &graph).unwrap_err();
        assert!(matches!(err, CoreError::UnknownKind { .. }));
    }
}
