//! Inverseless Theo1 — L1 (C5, §4.5).
//!
//! Adds the generalization hierarchy on top of the raw reverse-pointer
//! index: every entity other than `everything` specializes at least one
//! other entity, and `allSlots`/`allContexts` are the transitive
//! specializations of the two other bootstrap entities, `slot` and
//! `context`.

use tracing::instrument;

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::location::{LocElem, Location, LocationKind};
use crate::store_map::StoreMap;
use crate::superstore::SuperStore;
use crate::value::Value;

/// The universal generalization. Every entity but this one specializes
/// something, directly or transitively.
pub const ROOT_ENTITY: &str = "everything";
/// Entities specializing this one are themselves usable as slot names.
pub const SLOT_ENTITY: &str = "slot";
/// Entities specializing this one are usable as contexts.
pub const CONTEXT_ENTITY: &str = "context";
pub const GENERALIZATIONS: &str = "generalizations";

/// The slot names Basic Theo2 (L2, §4.6) hangs metadata off of. Bootstrapped
/// as real slot entities here so L1's "every slot position is in `allSlots`"
/// invariant (§4.5) holds for them too.
const METADATA_SLOTS: &[&str] = &["nrofvalues", "domain", "range", "inverse", "masterinverse"];

/// Inverseless Theo1 — L1.
pub struct Theo1<M: StoreMap> {
    inner: SuperStore<M>,
}

impl<M: StoreMap> Theo1<M> {
    #[instrument(skip(map, config))]
    pub fn open(map: M, config: Config) -> StoreResult<Self> {
        let inner = SuperStore::open(map, config)?;
        let theo1 = Self { inner };
        theo1.ensure_essentials()?;
        Ok(theo1)
    }

    pub fn inner(&self) -> &SuperStore<M> {
        &self.inner
    }

    /// `isOpen()` (§6 entry points).
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// `close()` (§6 entry points).
    pub fn close(&self) -> StoreResult<()> {
        self.inner.close()
    }

    /// `isReadOnly()` (§6 entry points).
    pub fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    /// `setReadOnly()` (§6 entry points).
    pub fn set_read_only(&self, read_only: bool) {
        self.inner.set_read_only(read_only)
    }

    /// `flush()` (§6 entry points).
    pub fn flush(&self, sync: bool) -> StoreResult<()> {
        self.inner.flush(sync)
    }

    /// `createPrimitiveEntity(name, generalizations)` (§6 entry points):
    /// an alias for [`Self::create_entity`] under the spec's literal name.
    pub fn create_primitive_entity(&self, name: &str, generalizations: &[String]) -> StoreResult<()> {
        self.create_entity(name, generalizations)
    }

    /// `createSlot(name)` (§6 entry points): creates an entity generalizing
    /// to the distinguished [`SLOT_ENTITY`], i.e. a slot usable as a
    /// relation name.
    pub fn create_slot(&self, name: &str) -> StoreResult<()> {
        self.create_entity(name, &[SLOT_ENTITY.to_string()])
    }

    /// `valueFromString(token)` (§6 entry points).
    pub fn value_from_string(&self, token: &str) -> StoreResult<Value> {
        self.inner.value_from_string(token)
    }

    fn ensure_essentials(&self) -> StoreResult<()> {
        if self.inner.is_read_only() {
            return Ok(());
        }

        if !self.inner.entity_exists(ROOT_ENTITY) {
            self.inner
                .add(&Location::for_entity(ROOT_ENTITY).with_slot("kind"), Value::Str("root".into()))?;
        }

        for bootstrap in [SLOT_ENTITY, CONTEXT_ENTITY] {
            if !self.inner.entity_exists(bootstrap) {
                self.inner.add(
                    &Location::for_entity(bootstrap).with_slot(GENERALIZATIONS),
                    Value::Pointer(Location::for_entity(ROOT_ENTITY)),
                )?;
            }
        }

        if !self.inner.entity_exists(GENERALIZATIONS) {
            self.inner.add(
                &Location::for_entity(GENERALIZATIONS).with_slot(GENERALIZATIONS),
                Value::Pointer(Location::for_entity(SLOT_ENTITY)),
            )?;
        }

        for slot_name in METADATA_SLOTS {
            if !self.inner.entity_exists(slot_name) {
                self.inner.add(
                    &Location::for_entity(*slot_name).with_slot(GENERALIZATIONS),
                    Value::Pointer(Location::for_entity(SLOT_ENTITY)),
                )?;
            }
        }

        Ok(())
    }

    fn is_essential(entity: &str) -> bool {
        matches!(entity, ROOT_ENTITY | SLOT_ENTITY | CONTEXT_ENTITY | GENERALIZATIONS)
            || METADATA_SLOTS.contains(&entity)
    }

    /// `add(loc, value)`, enforcing §4.5's structural invariants before
    /// delegating to the reverse-pointer layer: the slot position must be a
    /// known slot, `generalizations` values must point at existent
    /// entities, and a write to a not-yet-existent entity is only legal
    /// when it is that entity's first `generalizations` value (the
    /// primitive-entity creation protocol).
    #[instrument(skip(self, value))]
    pub fn add(&self, location: &Location, value: Value) -> StoreResult<()> {
        if location.kind() != LocationKind::Query {
            return Err(StoreError::usage("Theo1::add", "location must end in a Slot"));
        }

        let entity = location.entity_name();
        let slot = location
            .last_slot()
            .expect("Query location always has a slot");

        if entity == ROOT_ENTITY && slot == GENERALIZATIONS {
            return Err(StoreError::usage(
                "Theo1::add",
                "`everything` may never have a generalizations value",
            ));
        }

        let entity_exists = self.inner.entity_exists(entity);

        if !entity_exists && slot != GENERALIZATIONS {
            return Err(StoreError::usage(
                "Theo1::add",
                "a new entity's first write must be to its generalizations slot",
            ));
        }

        if entity_exists {
            self.validate_slot_path(location)?;
        }

        if slot == GENERALIZATIONS {
            let Value::Pointer(target) = &value else {
                return Err(StoreError::usage(
                    "Theo1::add",
                    "generalizations values must be Pointers",
                ));
            };

            if !self.inner.entity_exists(target.entity_name()) {
                return Err(StoreError::not_found(target.clone()));
            }
        }

        self.inner.add(location, value)
    }

    /// Validates every Slot position along `location`'s path against
    /// `allSlots` (§4.5), not just the last one: a multi-element location
    /// like `(bob, livesin, =tokyo, mayor)` has an intermediate slot
    /// (`livesin`) that must itself be a known slot. The single exception is
    /// position 1 of the path, which may instead carry a `context` in place
    /// of an ordinary slot (§4.5: "a location may open with `(contextName,
    /// slotOrNot, …)`").
    fn validate_slot_path(&self, location: &Location) -> StoreResult<()> {
        let known_slots = self.all_slots();
        let known_contexts = self.all_contexts();

        for (index, elem) in location.path().iter().enumerate() {
            let LocElem::Slot(slot) = elem else { continue };

            if slot == GENERALIZATIONS {
                continue;
            }

            let is_known_slot = known_slots.iter().any(|s| s == slot);
            let is_context_prefix = index == 0 && known_contexts.iter().any(|c| c == slot);

            if !is_known_slot && !is_context_prefix {
                return Err(StoreError::usage(
                    "Theo1::add",
                    format!("{slot:?} is not a known slot"),
                ));
            }
        }

        Ok(())
    }

    /// `delete(loc, errIfMissing)`, routing a full removal of an entity's
    /// last `generalizations` value through the entity-deletion protocol
    /// (§3 Lifecycles) rather than allowing the raw value delete.
    #[instrument(skip(self))]
    pub fn delete(&self, location: &Location, err_if_missing: bool) -> StoreResult<()> {
        if location.kind() == LocationKind::Entity {
            return Err(StoreError::usage("Theo1::delete", "location must end in a Slot or an ElementRef"));
        }

        let entity = location.entity_name().to_string();
        let slot = location
            .last_slot()
            .expect("Query/Belief location always has a slot")
            .to_string();

        if slot == GENERALIZATIONS {
            let current = self.generalizations(&entity)?;
            let removes_everything = match location.kind() {
                LocationKind::Query => true,
                LocationKind::Belief => current.len() <= 1,
                LocationKind::Entity => unreachable!(),
            };

            if removes_everything {
                if Self::is_essential(&entity) {
                    return Err(StoreError::usage(
                        "Theo1::delete",
                        format!("{entity:?} is essential and its generalizations cannot be fully removed"),
                    ));
                }

                let other_data = self
                    .inner
                    .get_subslots(&Location::for_entity(entity.clone()))?
                    .unwrap_or_default()
                    .iter()
                    .any(|s| s != GENERALIZATIONS);

                if other_data {
                    return Err(StoreError::usage(
                        "Theo1::delete",
                        "cannot remove an entity's last generalization while it still has other data",
                    ));
                }

                return self.delete_entity(&entity, err_if_missing);
            }
        }

        self.inner.delete(location, err_if_missing, false)
    }

    /// Direct parents (§4.5 `generalizations`).
    pub fn generalizations(&self, entity: &str) -> StoreResult<Vec<String>> {
        let values = self
            .inner
            .get(&Location::for_entity(entity).with_slot(GENERALIZATIONS))?
            .unwrap_or_default();

        Ok(values
            .into_iter()
            .filter_map(Value::into_pointer)
            .map(|location| location.entity_name().to_string())
            .collect())
    }

    /// Every ancestor reachable by following `generalizations`, breadth
    /// first, cycle-safe.
    pub fn all_generalizations(&self, entity: &str) -> StoreResult<Vec<String>> {
        let mut seen = std::collections::HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        let mut out = Vec::new();

        queue.push_back(entity.to_string());
        seen.insert(entity.to_string());

        while let Some(current) = queue.pop_front() {
            for parent in self.generalizations(&current)? {
                if seen.insert(parent.clone()) {
                    out.push(parent.clone());
                    queue.push_back(parent);
                }
            }
        }

        Ok(out)
    }

    pub fn specializes(&self, entity: &str, ancestor: &str) -> StoreResult<bool> {
        if entity == ancestor {
            return Ok(true);
        }
        Ok(self.all_generalizations(entity)?.iter().any(|e| e == ancestor))
    }

    /// Every direct or transitive specialization of `root`, found by
    /// walking the reverse-pointer index (§4.4) instead of scanning.
    fn all_specializations_of(&self, root: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        let mut out = Vec::new();

        queue.push_back(root.to_string());

        while let Some(current) = queue.pop_front() {
            for referring in self.inner.get_pointers(&current, GENERALIZATIONS) {
                let child = referring.entity_name().to_string();
                if seen.insert(child.clone()) {
                    out.push(child.clone());
                    queue.push_back(child);
                }
            }
        }

        out
    }

    /// `allSlots` (§4.5): every entity usable as a slot name.
    pub fn all_slots(&self) -> Vec<String> {
        self.all_specializations_of(SLOT_ENTITY)
    }

    /// `allContexts` (§4.5).
    pub fn all_contexts(&self) -> Vec<String> {
        self.all_specializations_of(CONTEXT_ENTITY)
    }

    /// Creates a new entity specializing every name in `generalizations`,
    /// each of which must already exist.
    #[instrument(skip(self))]
    pub fn create_entity(&self, name: &str, generalizations: &[String]) -> StoreResult<()> {
        if generalizations.is_empty() {
            return Err(StoreError::usage(
                "Theo1::create_entity",
                "a new entity needs at least one generalization",
            ));
        }

        if self.inner.entity_exists(name) {
            return Err(StoreError::usage(
                "Theo1::create_entity",
                format!("entity {name:?} already exists"),
            ));
        }

        for parent in generalizations {
            if !self.inner.entity_exists(parent) {
                return Err(StoreError::not_found(Location::for_entity(parent.clone())));
            }
        }

        let gen_loc = Location::for_entity(name.to_string()).with_slot(GENERALIZATIONS);

        for parent in generalizations {
            self.inner
                .add(&gen_loc, Value::Pointer(Location::for_entity(parent.clone())))?;
        }

        Ok(())
    }

    /// Deletes `name`, re-pointing anything that specialized it directly
    /// at `name`'s own generalizations so the hierarchy above stays
    /// connected, rather than cascading the deletion down to them.
    #[instrument(skip(self))]
    pub fn delete_entity(&self, name: &str, err_if_missing: bool) -> StoreResult<()> {
        if matches!(name, ROOT_ENTITY | SLOT_ENTITY | CONTEXT_ENTITY) {
            return Err(StoreError::usage(
                "Theo1::delete_entity",
                format!("{name:?} is a bootstrap entity and cannot be deleted"),
            ));
        }

        if !self.inner.entity_exists(name) {
            return if err_if_missing {
                Err(StoreError::not_found(Location::for_entity(name.to_string())))
            } else {
                Ok(())
            };
        }

        let parents = self.generalizations(name)?;
        let children: Vec<String> = self
            .inner
            .get_pointers(name, GENERALIZATIONS)
            .into_iter()
            .map(|referring| referring.entity_name().to_string())
            .collect();

        for child in &children {
            let child_gen_loc = Location::for_entity(child.clone()).with_slot(GENERALIZATIONS);

            self.inner.delete(
                &child_gen_loc
                    .clone()
                    .with_element_ref(Value::Pointer(Location::for_entity(name.to_string()))),
                false,
                false,
            )?;

            let child_parents = self.generalizations(child)?;

            for parent in &parents {
                if !child_parents.contains(parent) {
                    self.inner
                        .add(&child_gen_loc, Value::Pointer(Location::for_entity(parent.clone())))?;
                }
            }

            if parents.is_empty() && self.generalizations(child)?.is_empty() && child != ROOT_ENTITY {
                self.inner
                    .add(&child_gen_loc, Value::Pointer(Location::for_entity(ROOT_ENTITY)))?;
            }
        }

        if let Some(slots) = self.inner.get_subslots(&Location::for_entity(name.to_string()))? {
            for slot in slots {
                self.inner
                    .delete(&Location::for_entity(name.to_string()).with_slot(slot), false, true)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_map::InMemoryStoreMap;

    fn store() -> Theo1<InMemoryStoreMap> {
        Theo1::open(InMemoryStoreMap::open("/", false).unwrap(), Config::ram()).unwrap()
    }

    #[test]
    fn opening_creates_bootstrap_entities() {
        let theo1 = store();
        assert!(theo1.inner().entity_exists(ROOT_ENTITY));
        assert!(theo1.inner().entity_exists(SLOT_ENTITY));
        assert!(theo1.inner().entity_exists(CONTEXT_ENTITY));
        assert_eq!(theo1.generalizations(SLOT_ENTITY).unwrap(), vec![ROOT_ENTITY.to_string()]);
    }

    #[test]
    fn create_entity_requires_existing_generalizations() {
        let theo1 = store();
        let err = theo1
            .create_entity("dog", &["mammal".to_string()])
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        theo1
            .create_entity("mammal", &[ROOT_ENTITY.to_string()])
            .unwrap();
        theo1.create_entity("dog", &["mammal".to_string()]).unwrap();

        assert!(theo1.specializes("dog", ROOT_ENTITY).unwrap());
        assert!(theo1.specializes("dog", "mammal").unwrap());
        assert!(!theo1.specializes("mammal", "dog").unwrap());
    }

    #[test]
    fn all_slots_walks_the_specialization_tree() {
        let theo1 = store();
        theo1
            .create_entity("attribute-slot", &[SLOT_ENTITY.to_string()])
            .unwrap();
        theo1
            .create_entity("color", &["attribute-slot".to_string()])
            .unwrap();

        let mut slots = theo1.all_slots();
        slots.sort();
        assert_eq!(slots, vec!["attribute-slot".to_string(), "color".to_string()]);
    }

    #[test]
    fn delete_entity_repoints_children_to_grandparents() {
        let theo1 = store();
        theo1
            .create_entity("mammal", &[ROOT_ENTITY.to_string()])
            .unwrap();
        theo1.create_entity("dog", &["mammal".to_string()]).unwrap();

        theo1.delete_entity("mammal", true).unwrap();

        assert!(!theo1.inner().entity_exists("mammal"));
        assert_eq!(theo1.generalizations("dog").unwrap(), vec![ROOT_ENTITY.to_string()]);
    }

    #[test]
    fn bootstrap_entities_cannot_be_deleted() {
        let theo1 = store();
        let err = theo1.delete_entity(ROOT_ENTITY, true).unwrap_err();
        assert!(matches!(err, StoreError::Usage { .. }));
    }

    #[test]
    fn add_rejects_writes_to_unknown_slots() {
        let theo1 = store();
        theo1
            .create_entity("bob", &[ROOT_ENTITY.to_string()])
            .unwrap();

        let err = theo1
            .add(
                &Location::for_entity("bob").with_slot("nickname"),
                Value::Str("bobby".into()),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Usage { .. }));
    }

    #[test]
    fn add_allows_known_slots_and_entity_creation() {
        let theo1 = store();

        theo1
            .create_entity("nickname", &[SLOT_ENTITY.to_string()])
            .unwrap();

        // First write to a not-yet-existent entity must be its generalizations.
        let err = theo1
            .add(
                &Location::for_entity("bob").with_slot("nickname"),
                Value::Str("bobby".into()),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Usage { .. }));

        theo1
            .add(
                &Location::for_entity("bob").with_slot(GENERALIZATIONS),
                Value::Pointer(Location::for_entity(ROOT_ENTITY)),
            )
            .unwrap();

        theo1
            .add(
                &Location::for_entity("bob").with_slot("nickname"),
                Value::Str("bobby".into()),
            )
            .unwrap();
    }

    #[test]
    fn add_validates_every_slot_position_not_just_the_last() {
        let theo1 = store();
        theo1.create_entity("livesin", &[SLOT_ENTITY.to_string()]).unwrap();
        theo1.create_entity("tokyo", &[ROOT_ENTITY.to_string()]).unwrap();
        theo1.create_entity("bob", &[ROOT_ENTITY.to_string()]).unwrap();

        // `livesin` (the last slot) is known, but the intermediate slot
        // `unregistered-slot` is not — and isn't a registered context either.
        let nested = Location::for_entity("bob")
            .with_slot("unregistered-slot")
            .with_element_ref(Value::Pointer(Location::for_entity("tokyo")))
            .with_slot("livesin");

        let err = theo1.add(&nested, Value::Str("x".into())).unwrap_err();
        assert!(matches!(err, StoreError::Usage { .. }));
    }

    #[test]
    fn add_admits_a_context_prefix_at_position_one() {
        let theo1 = store();
        theo1.create_entity("en-us", &[CONTEXT_ENTITY.to_string()]).unwrap();
        theo1.create_entity("nickname", &[SLOT_ENTITY.to_string()]).unwrap();
        theo1.create_entity("bob", &[ROOT_ENTITY.to_string()]).unwrap();

        // `en-us` is a context, not a slot — only legal at position 1 of the
        // path (§4.5's documented exception).
        let contextual = Location::for_entity("bob")
            .with_slot("en-us")
            .with_element_ref(Value::Pointer(Location::for_entity("bob")))
            .with_slot("nickname");

        theo1.add(&contextual, Value::Str("bobby".into())).unwrap();
    }

    #[test]
    fn delete_last_generalization_with_other_data_is_rejected() {
        let theo1 = store();
        theo1
            .create_entity("nickname", &[SLOT_ENTITY.to_string()])
            .unwrap();
        theo1
            .create_entity("bob", &[ROOT_ENTITY.to_string()])
            .unwrap();
        theo1
            .add(
                &Location::for_entity("bob").with_slot("nickname"),
                Value::Str("bobby".into()),
            )
            .unwrap();

        let err = theo1
            .delete(&Location::for_entity("bob").with_slot(GENERALIZATIONS), true)
            .unwrap_err();
        assert!(matches!(err, StoreError::Usage { .. }));
    }

    #[test]
    fn delete_last_generalization_without_other_data_deletes_entity() {
        let theo1 = store();
        theo1
            .create_entity("bob", &[ROOT_ENTITY.to_string()])
            .unwrap();

        theo1
            .delete(&Location::for_entity("bob").with_slot(GENERALIZATIONS), true)
            .unwrap();

        assert!(!theo1.inner().entity_exists("bob"));
    }

    #[test]
    fn create_slot_and_create_primitive_entity_aliases_work() {
        let theo1 = store();

        theo1.create_slot("nickname").unwrap();
        assert!(theo1.all_slots().iter().any(|s| s == "nickname"));

        theo1
            .create_primitive_entity("bob", &[ROOT_ENTITY.to_string()])
            .unwrap();
        assert!(theo1.inner().entity_exists("bob"));
    }

    #[test]
    fn close_flushes_and_flips_is_open() {
        let theo1 = store();
        assert!(theo1.is_open());

        theo1.close().unwrap();
        assert!(!theo1.is_open());
    }

    #[test]
    fn value_from_string_is_reachable_through_the_layer() {
        let theo1 = store();
        assert_eq!(theo1.value_from_string("42").unwrap(), Value::Int(42));
    }
}
