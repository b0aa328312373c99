//! Reverse-pointer SuperStore — L0+ (C4, §4.4).
//!
//! Wraps [`EncodedStore`] and maintains, for every entity, the set of
//! `(slot, referring-location)` pairs that point *at* it — the index
//! [`Theo1`](crate::theo1::Theo1) needs to compute `generalizations`'
//! inverse (who specializes me?) without a full scan.

use tracing::instrument;

use crate::config::Config;
use crate::encoded_store::EncodedStore;
use crate::error::StoreResult;
use crate::location::Location;
use crate::store_map::{StoreMap, ValueList};
use crate::value::Value;

const SIGIL_POINTER_INDEX: &str = "  P";
const SIGIL_POINTING_SLOTS: &str = "  R";

/// Reverse-pointer SuperStore — L0+.
pub struct SuperStore<M: StoreMap> {
    inner: EncodedStore<M>,
}

impl<M: StoreMap> SuperStore<M> {
    pub fn open(map: M, config: Config) -> StoreResult<Self> {
        Ok(Self {
            inner: EncodedStore::open(map, config)?,
        })
    }

    pub fn inner(&self) -> &EncodedStore<M> {
        &self.inner
    }

    pub fn config(&self) -> &Config {
        self.inner.config()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.inner.set_read_only(read_only)
    }

    pub fn flush(&self, sync: bool) -> StoreResult<()> {
        self.inner.flush(sync)
    }

    /// `isOpen()` (§6 entry points).
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// `close()` (§6 entry points).
    pub fn close(&self) -> StoreResult<()> {
        self.inner.close()
    }

    /// `valueFromString(token)` (§6 entry points).
    pub fn value_from_string(&self, token: &str) -> StoreResult<Value> {
        self.inner.value_from_string(token)
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation()
    }

    pub fn get(&self, location: &Location) -> StoreResult<Option<ValueList>> {
        self.inner.get(location)
    }

    pub fn get_subslots(&self, location: &Location) -> StoreResult<Option<Vec<String>>> {
        self.inner.get_subslots(location)
    }

    pub fn get_num_values(&self, location: &Location) -> StoreResult<usize> {
        self.inner.get_num_values(location)
    }

    pub fn is_promoted(&self, location: &Location) -> StoreResult<bool> {
        self.inner.is_promoted(location)
    }

    pub fn entity_exists(&self, entity: &str) -> bool {
        self.inner.entity_exists(entity)
    }

    pub fn primitive_entities(&self) -> Vec<String> {
        self.inner.primitive_entities()
    }

    /// `getPointers(entity, slot)`: every Query location that stores a
    /// Pointer to `entity` at `slot`, per §4.4 ("a list of locations,
    /// encoded as Pointer values, that reference `destination`") — the full
    /// referring location, not just its entity, so a Pointer buried under a
    /// nested subslot is still addressable.
    pub fn get_pointers(&self, entity: &str, slot: &str) -> Vec<Location> {
        self.inner
            .map()
            .get(&format!("{entity}{SIGIL_POINTER_INDEX}{slot}"))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| match v {
                Value::Pointer(location) => Some(location),
                _ => None,
            })
            .collect()
    }

    /// `getPointingSlots(entity)`: every slot name through which *something*
    /// points at `entity`.
    pub fn get_pointing_slots(&self, entity: &str) -> Vec<String> {
        self.inner
            .map()
            .get(&format!("{entity}{SIGIL_POINTING_SLOTS}"))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v.into_string())
            .collect()
    }

    #[instrument(skip(self, value))]
    pub fn add(&self, location: &Location, value: Value) -> StoreResult<()> {
        if let Value::Pointer(target) = &value {
            if !self.inner.entity_exists(target.entity_name()) {
                return Err(crate::error::StoreError::not_found(target.clone()));
            }
        }

        self.inner.add(location, value.clone())?;

        if let Value::Pointer(target) = &value {
            self.index_pointer(location, target.entity_name())?;
        }

        Ok(())
    }

    fn index_pointer(&self, source: &Location, target_entity: &str) -> StoreResult<()> {
        let slot = source
            .last_slot()
            .expect("add() requires a Query location, which always has a slot")
            .to_string();

        let reverse_key = format!("{target_entity}{SIGIL_POINTER_INDEX}{slot}");
        let mut sources = self.inner.map().get(&reverse_key).unwrap_or_default();
        let source_value = Value::Pointer(source.clone());

        if !sources.contains(&source_value) {
            sources.push(source_value);
            self.inner.map().put(&reverse_key, sources)?;
        }

        let pointing_slots_key = format!("{target_entity}{SIGIL_POINTING_SLOTS}");
        let mut slots = self.inner.map().get(&pointing_slots_key).unwrap_or_default();
        let slot_value = Value::Str(slot);

        if !slots.contains(&slot_value) {
            slots.push(slot_value);
            self.inner.map().put(&pointing_slots_key, slots)?;
        }

        Ok(())
    }

    fn unindex_pointer(&self, source: &Location, target_entity: &str) -> StoreResult<()> {
        let Some(slot) = source.last_slot().map(str::to_string) else {
            return Ok(());
        };

        let reverse_key = format!("{target_entity}{SIGIL_POINTER_INDEX}{slot}");
        let Some(mut sources) = self.inner.map().get(&reverse_key) else {
            return Ok(());
        };

        let source_value = Value::Pointer(source.clone());
        sources.retain(|v| v != &source_value);

        if sources.is_empty() {
            self.inner.map().remove(&reverse_key);

            let pointing_slots_key = format!("{target_entity}{SIGIL_POINTING_SLOTS}");
            if let Some(mut slots) = self.inner.map().get(&pointing_slots_key) {
                slots.retain(|v| v.as_str() != Some(slot.as_str()));

                if slots.is_empty() {
                    self.inner.map().remove(&pointing_slots_key);
                } else {
                    self.inner.map().put(&pointing_slots_key, slots)?;
                }
            }
        } else {
            self.inner.map().put(&reverse_key, sources)?;
        }

        Ok(())
    }

    /// `delete(loc, errIfMissing, recursive)`, keeping the reverse-pointer
    /// index consistent and cascading the deletion of dangling pointer
    /// beliefs once an entity disappears entirely (§4.4's
    /// `signalDeleteSlot`, scoped here to whole-entity pointer targets —
    /// see DESIGN.md).
    #[instrument(skip(self))]
    pub fn delete(
        &self,
        location: &Location,
        err_if_missing: bool,
        recursive: bool,
    ) -> StoreResult<()> {
        let outcome = self.inner.delete(location, err_if_missing, recursive)?;

        for (belief_loc, value) in &outcome.removed_values {
            if let Value::Pointer(target) = value {
                if let Some(query) = belief_loc.parent() {
                    self.unindex_pointer(&query, target.entity_name())?;
                }
            }
        }

        for emptied in &outcome.emptied_slots {
            let entity = emptied.entity_name();
            if !self.inner.entity_exists(entity) {
                self.cascade_delete_pointers_to(entity)?;
            }
        }

        Ok(())
    }

    fn cascade_delete_pointers_to(&self, entity: &str) -> StoreResult<()> {
        for slot in self.get_pointing_slots(entity) {
            for referring in self.get_pointers(entity, &slot) {
                let belief =
                    referring.with_element_ref(Value::Pointer(Location::for_entity(entity.to_string())));

                // Best-effort: the source may already be gone from an
                // earlier step of the same cascade.
                let _ = self.delete(&belief, false, false);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_map::InMemoryStoreMap;

    fn store() -> SuperStore<InMemoryStoreMap> {
        SuperStore::open(InMemoryStoreMap::open("/", false).unwrap(), Config::ram()).unwrap()
    }

    fn pointer_loc(entity: &str, slot: &str) -> Location {
        Location::for_entity(entity).with_slot(slot)
    }

    #[test]
    fn add_pointer_populates_reverse_index() {
        let store = store();
        store
            .add(
                &pointer_loc("bob", "livesin"),
                Value::Pointer(Location::for_entity("tokyo")),
            )
            .unwrap();

        assert_eq!(store.get_pointers("tokyo", "livesin"), vec![pointer_loc("bob", "livesin")]);
        assert_eq!(store.get_pointing_slots("tokyo"), vec!["livesin".to_string()]);
    }

    #[test]
    fn deleting_pointer_value_clears_reverse_index() {
        let store = store();
        let loc = pointer_loc("bob", "livesin");
        let target = Value::Pointer(Location::for_entity("tokyo"));
        store.add(&loc, target.clone()).unwrap();

        let belief = loc.with_element_ref(target);
        store.delete(&belief, true, false).unwrap();

        assert!(store.get_pointers("tokyo", "livesin").is_empty());
        assert!(store.get_pointing_slots("tokyo").is_empty());
    }

    #[test]
    fn deleting_entity_cascades_to_pointing_beliefs() {
        let store = store();
        store
            .add(
                &pointer_loc("mars_rover", "generalizations"),
                Value::Pointer(Location::for_entity("rover")),
            )
            .unwrap();
        store
            .add(
                &pointer_loc("other_rover", "generalizations"),
                Value::Pointer(Location::for_entity("rover")),
            )
            .unwrap();
        store
            .add(
                &pointer_loc("rover", "generalizations"),
                Value::Pointer(Location::for_entity("everything")),
            )
            .unwrap();

        // Deleting the last value of `rover`'s own slot makes the entity
        // disappear, which must cascade to anyone still pointing at it.
        store.delete(&pointer_loc("rover", "generalizations"), true, false).unwrap();

        assert!(!store.entity_exists("mars_rover"));
        assert!(!store.entity_exists("other_rover"));
    }

    #[test]
    fn cascade_finds_pointers_under_nested_subslots() {
        let store = store();
        store
            .add(
                &pointer_loc("tokyo", "generalizations"),
                Value::Pointer(Location::for_entity("everything")),
            )
            .unwrap();
        store
            .add(
                &pointer_loc("alice", "generalizations"),
                Value::Pointer(Location::for_entity("everything")),
            )
            .unwrap();
        store
            .add(&pointer_loc("bob", "livesin"), Value::Pointer(Location::for_entity("tokyo")))
            .unwrap();

        // A Pointer nested under `(bob, livesin, =tokyo, mayor)`, not at the
        // top-level `(bob, mayor)` a name-only index would reconstruct.
        let nested = Location::for_entity("bob")
            .with_slot("livesin")
            .with_element_ref(Value::Pointer(Location::for_entity("tokyo")))
            .with_slot("mayor");
        store.add(&nested, Value::Pointer(Location::for_entity("alice"))).unwrap();

        assert_eq!(store.get_pointers("alice", "mayor"), vec![nested.clone()]);

        store.delete(&pointer_loc("alice", "generalizations"), true, false).unwrap();

        assert!(!store.entity_exists("alice"));
        assert!(store.get_pointers("alice", "mayor").is_empty());
        assert!(store
            .get(&nested)
            .unwrap()
            .map(|values| values.is_empty())
            .unwrap_or(true));
    }

    #[test]
    fn distinct_locations_through_same_entity_and_slot_do_not_collide() {
        let store = store();
        store
            .add(
                &pointer_loc("tokyo", "generalizations"),
                Value::Pointer(Location::for_entity("everything")),
            )
            .unwrap();

        let osaka = pointer_loc("osaka", "generalizations");
        store.add(&osaka, Value::Pointer(Location::for_entity("everything"))).unwrap();
        let kyoto = pointer_loc("kyoto", "generalizations");
        store.add(&kyoto, Value::Pointer(Location::for_entity("everything"))).unwrap();

        // Two distinct beliefs from the same (entity, slot) pair — a
        // name-only index would have collapsed both into one reverse entry.
        let ref_a = Location::for_entity("japan")
            .with_slot("capitalcandidates")
            .with_element_ref(Value::Pointer(Location::for_entity("osaka")))
            .with_slot("backup");
        let ref_b = Location::for_entity("japan")
            .with_slot("capitalcandidates")
            .with_element_ref(Value::Pointer(Location::for_entity("kyoto")))
            .with_slot("backup");

        store.add(&ref_a, Value::Pointer(Location::for_entity("tokyo"))).unwrap();
        store.add(&ref_b, Value::Pointer(Location::for_entity("tokyo"))).unwrap();

        assert_eq!(store.get_pointers("tokyo", "backup").len(), 2);

        store
            .delete(&ref_a.with_element_ref(Value::Pointer(Location::for_entity("tokyo"))), true, false)
            .unwrap();

        assert_eq!(store.get_pointers("tokyo", "backup"), vec![ref_b]);
    }
}
