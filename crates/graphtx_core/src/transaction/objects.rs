//! Object operations: locking, reads, writes, navigation, bindings and
//! queries.

use super::Transaction;
use crate::binding::binding_identity;
use crate::cascade::{Cascader, ObjectGraph};
use crate::error::{CoreError, CoreResult, LockFailure};
use crate::lock::LockWait;
use crate::object::{Lazy, ManagedObject, ObjectRef};
use crate::query::{Query, QueryResults, ResultItem};
use crate::types::{LockMode, ObjectState, Operation};
use graphtx_store::{Fields, Identity, Row, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, trace};

impl Transaction {
    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    fn default_wait(&self) -> LockWait {
        LockWait::Timeout(self.shared.config.lock_timeout)
    }

    /// Acquires a lock, waiting up to the configured lock timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockNotGranted`] on timeout, deadlock or
    /// interrupt.
    pub fn lock(&mut self, identity: &Identity, mode: LockMode) -> CoreResult<()> {
        self.lock_with_timeout(identity, mode, self.shared.config.lock_timeout)
    }

    /// Acquires a lock, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockNotGranted`] on timeout, deadlock or
    /// interrupt.
    pub fn lock_with_timeout(
        &mut self,
        identity: &Identity,
        mode: LockMode,
        timeout: Duration,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        self.shared
            .locks
            .acquire(self.id, identity, mode, LockWait::Timeout(timeout))
    }

    /// Attempts a lock without waiting.
    ///
    /// # Errors
    ///
    /// Fails only if the transaction is not active.
    pub fn try_lock(&mut self, identity: &Identity, mode: LockMode) -> CoreResult<bool> {
        self.ensure_active()?;
        Ok(self.shared.locks.try_lock(self.id, identity, mode))
    }

    /// Releases a lock early.
    ///
    /// # Errors
    ///
    /// Refuses while the object has writes waiting for the next flush.
    pub fn unlock(&mut self, identity: &Identity) -> CoreResult<bool> {
        self.ensure_active()?;
        if self.enlisted.contains(identity) {
            return Err(CoreError::invalid_operation(format!(
                "{identity} has unflushed writes"
            )));
        }
        Ok(self.shared.locks.release(self.id, identity))
    }

    /// Returns the lock mode this transaction holds on `identity`.
    #[must_use]
    pub fn lock_mode(&self, identity: &Identity) -> Option<LockMode> {
        self.shared.locks.mode_held(self.id, identity)
    }

    fn read_lock(&self, identity: &Identity) -> CoreResult<()> {
        if self.shared.config.implicit_locking {
            self.shared
                .locks
                .acquire(self.id, identity, LockMode::Read, self.default_wait())?;
        }
        Ok(())
    }

    /// Takes the WRITE lock needed to modify `identity`.
    ///
    /// Objects without a stored row are always locked on demand. Stored
    /// objects need a previously taken lock unless locking is implicit.
    fn write_lock(&self, identity: &Identity, in_store: bool) -> CoreResult<()> {
        if self.shared.config.implicit_locking || !in_store {
            return self
                .shared
                .locks
                .acquire(self.id, identity, LockMode::Write, self.default_wait());
        }
        if self.lock_mode(identity) == Some(LockMode::Write) {
            Ok(())
        } else {
            Err(CoreError::lock_not_granted(
                identity,
                LockMode::Write,
                LockFailure::NotHeld,
            ))
        }
    }

    // ------------------------------------------------------------------
    // Reads and navigation
    // ------------------------------------------------------------------

    /// Resolves an identity to its managed instance.
    ///
    /// Returns the cached instance if there is one, otherwise reads the store
    /// under a READ lock. Returns `None` for unknown identities and objects
    /// deleted in this transaction.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active, the lock is refused or the
    /// store read fails.
    pub fn get(&mut self, identity: &Identity) -> CoreResult<Option<ObjectRef>> {
        self.ensure_active()?;
        if let Some(obj) = self.objects.get(identity) {
            return Ok((obj.state() != ObjectState::MarkedDeleted).then(|| obj.clone()));
        }
        self.read_lock(identity)?;
        self.load(identity)
    }

    /// Like [`get`](Self::get), failing with [`CoreError::ObjectNotFound`]
    /// instead of returning `None`.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub fn fetch(&mut self, identity: &Identity) -> CoreResult<ObjectRef> {
        self.get(identity)?
            .ok_or_else(|| CoreError::object_not_found(identity))
    }

    fn load(&mut self, identity: &Identity) -> CoreResult<Option<ObjectRef>> {
        if let Some(obj) = self.objects.get(identity) {
            return Ok(Some(obj.clone()));
        }
        let Some(fields) = self.shared.store.get(identity)? else {
            return Ok(None);
        };
        trace!(txid = %self.id, %identity, "loaded from store");
        Ok(Some(self.objects.get_or_insert_with(identity, || {
            ManagedObject::loaded(identity.clone(), fields)
        })))
    }

    /// Returns the cached instance without touching the store or locks.
    #[must_use]
    pub fn cached(&self, identity: &Identity) -> Option<ObjectRef> {
        self.objects.get(identity).cloned()
    }

    /// Follows a 1:1 reference field.
    ///
    /// # Errors
    ///
    /// Fails if `identity` does not resolve or the field holds something
    /// other than a reference or null.
    pub fn reference(&mut self, identity: &Identity, field: &str) -> CoreResult<Option<ObjectRef>> {
        match self.fetch(identity)?.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Ref(target)) => self.get(&target),
            Some(other) => Err(CoreError::invalid_operation(format!(
                "{identity}.{field} is not a reference: {other}"
            ))),
        }
    }

    /// Follows a collection reference field, skipping members that no
    /// longer exist.
    ///
    /// # Errors
    ///
    /// Fails if `identity` does not resolve or the field is not a list.
    pub fn collection(&mut self, identity: &Identity, field: &str) -> CoreResult<Vec<ObjectRef>> {
        let value = self.fetch(identity)?.get(field).unwrap_or(Value::Null);
        let targets: Vec<Identity> = match &value {
            Value::Null => Vec::new(),
            Value::List(_) => value.references().into_iter().cloned().collect(),
            other => {
                return Err(CoreError::invalid_operation(format!(
                    "{identity}.{field} is not a collection: {other}"
                )))
            }
        };
        let mut members = Vec::with_capacity(targets.len());
        for target in &targets {
            if let Some(obj) = self.get(target)? {
                members.push(obj);
            }
        }
        Ok(members)
    }

    /// Returns a lazy handle: resolved if cached, unresolved otherwise.
    #[must_use]
    pub fn lazy(&self, identity: &Identity) -> Lazy {
        match self.objects.get(identity) {
            Some(obj) => Lazy::Resolved(obj.clone()),
            None => Lazy::Unresolved(identity.clone()),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub(super) fn foreign_keys(&self, identity: &Identity, fields: &Fields) -> BTreeSet<Identity> {
        self.shared
            .metadata
            .descriptor(identity.kind())
            .map(|d| d.foreign_keys(fields))
            .unwrap_or_default()
    }

    /// READ-locks the targets of `identity`'s 1:1 references.
    ///
    /// Taken whatever the locking mode: a delete of a target needs WRITE and
    /// so waits until this transaction ends.
    pub(super) fn lock_referenced(
        &self,
        identity: &Identity,
        targets: &BTreeSet<Identity>,
    ) -> CoreResult<()> {
        for target in targets.iter().filter(|t| *t != identity) {
            self.shared
                .locks
                .acquire(self.id, target, LockMode::Read, self.default_wait())?;
        }
        Ok(())
    }

    fn require_kind(&self, kind: &str) -> CoreResult<()> {
        self.shared
            .metadata
            .descriptor(kind)
            .map(|_| ())
            .ok_or_else(|| CoreError::unknown_kind(kind))
    }

    /// Registers a transient object with this transaction.
    ///
    /// Transient objects are not written unless made persistent, directly
    /// or by reachability from a persistent object.
    ///
    /// # Errors
    ///
    /// Fails if the kind is unknown or the identity is already managed as a
    /// persistent object.
    pub fn new_object(&mut self, identity: Identity, fields: Fields) -> CoreResult<ObjectRef> {
        self.ensure_active()?;
        self.require_kind(identity.kind())?;
        if let Some(existing) = self.objects.get(&identity) {
            if existing.state() != ObjectState::Transient {
                return Err(CoreError::invalid_operation(format!(
                    "{identity} is already managed"
                )));
            }
            existing.write().set_fields(fields);
            return Ok(existing.clone());
        }
        let key = identity.clone();
        Ok(self
            .objects
            .get_or_insert_with(&key, || ManagedObject::transient(identity, fields)))
    }

    /// Makes a new persistent object, deriving its identity from the key
    /// fields of its kind.
    ///
    /// # Errors
    ///
    /// Fails if the kind is unknown or a key field is missing, and otherwise
    /// as [`make_persistent`](Self::make_persistent).
    pub fn create(&mut self, kind: &str, fields: Fields) -> CoreResult<ObjectRef> {
        let identity = {
            let descriptor = self
                .shared
                .metadata
                .descriptor(kind)
                .ok_or_else(|| CoreError::unknown_kind(kind))?;
            descriptor.identity_of(&fields).ok_or_else(|| {
                CoreError::invalid_operation(format!(
                    "{kind} needs values for its key fields {:?}",
                    descriptor.key_fields
                ))
            })?
        };
        self.make_persistent(&identity, fields)
    }

    /// Makes `identity` persistent with the given field values.
    ///
    /// A transient or unknown identity is enlisted for insert. Calling this
    /// on an object deleted earlier in the same transaction revives it: the
    /// next flush writes one row with these values. On an object that is
    /// already persistent the values replace its fields.
    ///
    /// Transient objects reachable through cascade-insert references become
    /// persistent too.
    ///
    /// # Errors
    ///
    /// Fails if the kind is unknown, the WRITE lock is refused or a READ
    /// lock on a referenced object is refused.
    pub fn make_persistent(&mut self, identity: &Identity, fields: Fields) -> CoreResult<ObjectRef> {
        self.ensure_active()?;
        self.require_kind(identity.kind())?;

        let cached = match self.objects.get(identity).cloned() {
            Some(obj) => Some(obj),
            None => {
                self.read_lock(identity)?;
                self.load(identity)?
            }
        };
        let in_store = cached.as_ref().is_some_and(|obj| obj.read().in_store());
        self.write_lock(identity, in_store)?;
        self.lock_referenced(identity, &self.foreign_keys(identity, &fields))?;
        let obj = match cached {
            Some(obj) => obj,
            None => self.objects.get_or_insert_with(identity, || {
                ManagedObject::transient(identity.clone(), Fields::new())
            }),
        };

        {
            let mut o = obj.write();
            let previous = o.state();
            o.set_fields(fields);
            match previous {
                ObjectState::Transient | ObjectState::MarkedNew => {
                    o.set_state(ObjectState::MarkedNew);
                    let deps = self.foreign_keys(identity, o.fields());
                    self.enlisted.enlist_insert(identity, deps);
                }
                ObjectState::MarkedDeleted => {
                    let revived = if o.in_store() {
                        ObjectState::PersistentDirty
                    } else {
                        ObjectState::MarkedNew
                    };
                    o.set_state(revived);
                    let deps = self.foreign_keys(identity, o.fields());
                    self.enlisted.enlist_insert(identity, deps);
                }
                ObjectState::PersistentClean | ObjectState::PersistentDirty => {
                    o.set_state(ObjectState::PersistentDirty);
                    let deps = self.foreign_keys(identity, o.fields());
                    self.enlisted.enlist_update(identity, deps)?;
                }
            }
        }
        debug!(
            txid = %self.id,
            %identity,
            operation = ?self.enlisted.operation(identity),
            "made persistent"
        );

        self.persist_reachable(identity)?;
        Ok(obj)
    }

    /// Makes a managed object persistent with its current field values.
    ///
    /// # Errors
    ///
    /// See [`make_persistent`](Self::make_persistent).
    pub fn persist(&mut self, obj: &ObjectRef) -> CoreResult<()> {
        let (identity, fields) = {
            let o = obj.read();
            (o.identity().clone(), o.fields().clone())
        };
        self.make_persistent(&identity, fields).map(|_| ())
    }

    /// Enlists the transient objects reachable from `root` for insert.
    pub(super) fn persist_reachable(&mut self, root: &Identity) -> CoreResult<()> {
        let reached = Cascader::new(self.shared.metadata.as_ref()).expand_for_insert(root, &self.graph())?;
        for identity in reached {
            let Some(obj) = self.objects.get(&identity).cloned() else {
                continue;
            };
            self.write_lock(&identity, false)?;
            let deps = self.foreign_keys(&identity, &obj.fields());
            self.lock_referenced(&identity, &deps)?;
            obj.write().set_state(ObjectState::MarkedNew);
            self.enlisted.enlist_insert(&identity, deps);
            trace!(txid = %self.id, %identity, %root, "persisted by reachability");
        }
        Ok(())
    }

    /// Deletes a persistent object.
    ///
    /// Cascade-delete references take their targets along. Breakable
    /// references held by surviving objects are removed from them. Every
    /// lock is taken and every affected object read before anything
    /// changes, so a failure leaves the transaction as it was.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReferentialIntegrityViolation`] if a surviving
    /// object holds a required reference to a deleted one,
    /// [`CoreError::ObjectNotFound`] for unknown identities, or a lock error.
    pub fn delete_persistent(&mut self, identity: &Identity) -> CoreResult<()> {
        let obj = self.fetch(identity)?;
        if obj.state() == ObjectState::Transient {
            return Err(CoreError::invalid_operation(format!(
                "{identity} is not persistent"
            )));
        }

        let plan = Cascader::new(self.shared.metadata.as_ref()).expand_for_delete(identity, &self.graph())?;

        // All locks first, so a refused lock leaves no partial delete.
        for target in &plan.deletes {
            self.write_lock(target, self.is_stored(target))?;
        }
        for broken in &plan.broken {
            self.write_lock(&broken.referrer, self.is_stored(&broken.referrer))?;
        }

        let referrers = plan
            .broken
            .iter()
            .map(|broken| self.fetch(&broken.referrer))
            .collect::<CoreResult<Vec<_>>>()?;
        let targets = plan
            .deletes
            .iter()
            .map(|target| {
                self.load(target)?
                    .ok_or_else(|| CoreError::object_not_found(target))
            })
            .collect::<CoreResult<Vec<_>>>()?;

        for (broken, obj) in plan.broken.iter().zip(&referrers) {
            let mut fields = obj.fields();
            if let Some(value) = fields.get_mut(&broken.field) {
                value.break_reference(&broken.target);
            }
            if obj.state() == ObjectState::Transient {
                obj.write().set_fields(fields);
            } else {
                let deps = self.foreign_keys(&broken.referrer, &fields);
                self.enlist_change(obj, fields, deps)?;
            }
        }
        for (target, obj) in plan.deletes.iter().zip(&targets) {
            let mut o = obj.write();
            let deps = self.foreign_keys(target, o.fields());
            self.enlisted.enlist_delete(target, deps, o.in_store());
            o.set_state(ObjectState::MarkedDeleted);
        }
        debug!(
            txid = %self.id,
            %identity,
            deleted = plan.deletes.len(),
            broken = plan.broken.len(),
            "deleted"
        );
        Ok(())
    }

    fn is_stored(&self, identity: &Identity) -> bool {
        // Anything not cached was found in the store.
        self.objects
            .get(identity)
            .map_or(true, |obj| obj.read().in_store())
    }

    /// Applies `change` to a copy of an object's fields and, once the locks
    /// are held, installs the copy and enlists the update.
    fn modify(
        &mut self,
        identity: &Identity,
        change: impl FnOnce(&mut Fields) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let obj = self.fetch(identity)?;
        let mut fields = obj.fields();
        change(&mut fields)?;
        if obj.state() == ObjectState::Transient {
            obj.write().set_fields(fields);
            return Ok(());
        }

        let in_store = obj.read().in_store();
        self.write_lock(identity, in_store)?;
        let deps = self.foreign_keys(identity, &fields);
        self.lock_referenced(identity, &deps)?;
        self.enlist_change(&obj, fields, deps)
    }

    fn enlist_change(
        &mut self,
        obj: &ObjectRef,
        fields: Fields,
        deps: BTreeSet<Identity>,
    ) -> CoreResult<()> {
        let mut o = obj.write();
        self.enlisted.enlist_update(o.identity(), deps)?;
        o.set_fields(fields);
        if o.state() == ObjectState::PersistentClean {
            o.set_state(ObjectState::PersistentDirty);
        }
        Ok(())
    }

    /// Sets one field.
    ///
    /// # Errors
    ///
    /// Fails if the object does not resolve or the WRITE lock is refused.
    pub fn set(&mut self, identity: &Identity, field: &str, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.modify(identity, |fields| {
            fields.insert(field.to_owned(), value);
            Ok(())
        })
    }

    /// Replaces several fields at once.
    ///
    /// # Errors
    ///
    /// Fails if the object does not resolve or the WRITE lock is refused.
    pub fn update(&mut self, identity: &Identity, changes: Fields) -> CoreResult<()> {
        self.modify(identity, |fields| {
            fields.extend(changes);
            Ok(())
        })
    }

    /// Adds `target` to a collection reference field.
    ///
    /// # Errors
    ///
    /// Fails if the field holds something other than a list or null.
    pub fn add_reference(&mut self, identity: &Identity, field: &str, target: &Identity) -> CoreResult<()> {
        self.modify(identity, |fields| {
            let slot = fields
                .entry(field.to_owned())
                .or_insert_with(|| Value::List(Vec::new()));
            if slot.is_null() {
                *slot = Value::List(Vec::new());
            }
            match slot {
                Value::List(items) => {
                    if !items.iter().any(|v| v.as_identity() == Some(target)) {
                        items.push(Value::from(target));
                    }
                    Ok(())
                }
                other => Err(CoreError::invalid_operation(format!(
                    "{identity}.{field} is not a collection: {other}"
                ))),
            }
        })
    }

    /// Removes every reference to `target` from a reference field.
    ///
    /// # Errors
    ///
    /// Fails if the object does not resolve or the WRITE lock is refused.
    pub fn remove_reference(&mut self, identity: &Identity, field: &str, target: &Identity) -> CoreResult<()> {
        self.modify(identity, |fields| {
            if let Some(value) = fields.get_mut(field) {
                value.break_reference(target);
            }
            Ok(())
        })
    }

    /// Evicts every cached object without pending writes.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active.
    pub fn clear_cache(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        let enlisted = &self.enlisted;
        let before = self.objects.len();
        self.objects.retain(|identity, _| enlisted.contains(identity));
        debug!(txid = %self.id, evicted = before - self.objects.len(), "cache cleared");
        Ok(())
    }

    /// Returns the pending write for `identity`.
    #[must_use]
    pub fn operation(&self, identity: &Identity) -> Option<Operation> {
        self.enlisted.operation(identity)
    }

    /// Returns the number of pending writes.
    #[must_use]
    pub fn enlisted_count(&self) -> usize {
        self.enlisted.len()
    }

    /// Returns the number of cached objects.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.objects.len()
    }

    // ------------------------------------------------------------------
    // Named bindings
    // ------------------------------------------------------------------

    /// Binds `name` to `target`.
    ///
    /// A transient target becomes persistent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NameNotUnique`] if the name is already bound,
    /// [`CoreError::ObjectNotFound`] if the target does not exist, or a lock
    /// error if another transaction holds the name.
    pub fn bind(&mut self, target: &Identity, name: &str) -> CoreResult<()> {
        self.ensure_active()?;
        self.shared.locks.acquire(
            self.id,
            &binding_identity(name),
            LockMode::Write,
            self.default_wait(),
        )?;
        if self.bindings.lookup(name, &self.shared.bindings).is_ok() {
            return Err(CoreError::NameNotUnique {
                name: name.to_owned(),
            });
        }

        if let Some(obj) = self.objects.get(target).cloned() {
            if obj.state() == ObjectState::Transient {
                self.persist(&obj)?;
            }
        }
        if !self.graph().exists(target)? {
            return Err(CoreError::object_not_found(target));
        }

        self.bindings.bind(name, target, &self.shared.bindings)?;
        debug!(txid = %self.id, name, %target, "bound");
        Ok(())
    }

    /// Removes the binding of `name`, returning the identity it pointed at.
    /// The object itself is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NameNotFound`] if the name is not bound.
    pub fn unbind(&mut self, name: &str) -> CoreResult<Identity> {
        self.ensure_active()?;
        self.shared.locks.acquire(
            self.id,
            &binding_identity(name),
            LockMode::Write,
            self.default_wait(),
        )?;
        let target = self.bindings.unbind(name, &self.shared.bindings)?;
        debug!(txid = %self.id, name, %target, "unbound");
        Ok(target)
    }

    /// Returns the identity bound to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NameNotFound`] if the name is not bound.
    pub fn lookup(&mut self, name: &str) -> CoreResult<Identity> {
        self.ensure_active()?;
        self.shared.locks.acquire(
            self.id,
            &binding_identity(name),
            LockMode::Read,
            self.default_wait(),
        )?;
        self.bindings.lookup(name, &self.shared.bindings)
    }

    /// Returns the object bound to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NameNotFound`] if the name is not bound and
    /// [`CoreError::ObjectNotFound`] if its target is gone.
    pub fn lookup_object(&mut self, name: &str) -> CoreResult<ObjectRef> {
        let identity = self.lookup(name)?;
        self.fetch(&identity)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Runs a translated query.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueryInvalid`] for a bad range, before the store
    /// is queried.
    pub fn execute(&mut self, query: Query) -> CoreResult<QueryResults<'_>> {
        QueryResults::open(self, query)
    }

    /// Translates and runs a query string.
    ///
    /// # Errors
    ///
    /// Fails if no translator is configured, translation fails, or as
    /// [`execute`](Self::execute).
    pub fn query(&mut self, text: &str, params: &[Value]) -> CoreResult<QueryResults<'_>> {
        self.ensure_active()?;
        let translator = self
            .shared
            .translator
            .read()
            .clone()
            .ok_or_else(|| CoreError::invalid_operation("no query translator configured"))?;
        let query = translator.translate(text, params)?;
        self.execute(query)
    }

    pub(crate) fn materialize(
        &mut self,
        row: Row,
        projection: Option<&[String]>,
    ) -> CoreResult<Option<ResultItem>> {
        if let Some(columns) = projection {
            let mut values: Vec<Value> = columns
                .iter()
                .map(|c| row.fields.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            return Ok(Some(if values.len() == 1 {
                ResultItem::Scalar(values.remove(0))
            } else {
                ResultItem::Tuple(values)
            }));
        }

        if let Some(obj) = self.objects.get(&row.identity) {
            return Ok(match obj.state() {
                ObjectState::MarkedDeleted | ObjectState::Transient => None,
                _ => Some(ResultItem::Object(obj.clone())),
            });
        }
        if self.shared.config.proxy_query_results {
            return Ok(Some(ResultItem::Proxy(Lazy::Unresolved(row.identity))));
        }

        self.read_lock(&row.identity)?;
        let Row { identity, fields } = row;
        let obj = self
            .objects
            .get_or_insert_with(&identity, || ManagedObject::loaded(identity.clone(), fields));
        Ok(Some(ResultItem::Object(obj)))
    }
}
