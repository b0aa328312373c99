//! Entity views — C7 (§4.7).
//!
//! The source models `MyEntity`/`MySlot`/`MyQuery`/`MyBelief`/`MyPrimitiveEntity`
//! as a subclassing hierarchy with double dispatch. Per the REDESIGN FLAGS
//! this collapses into a single [`EntityView`] bound to a `(Layer, Location)`
//! pair, whose behavior is dispatched off [`Location::kind`] rather than off
//! the Rust type. Typed coercions (`to_slot`, `to_query`, ...) return
//! `StoreResult` instead of throwing, and the "RTWBag" contract (§4.7) is a
//! set of inherent methods valid only on Query-kind views.

use std::hash::{Hash, Hasher};

use crate::error::{StoreError, StoreResult};
use crate::location::{Location, LocationKind};
use crate::store_map::StoreMap;
use crate::theo1::GENERALIZATIONS;
use crate::theo2::Theo2;
use crate::value::Value;

/// An immutable view over a location, borrowed from the [`Theo2`] knowledge
/// base it is addressed against (§4.7: "Immutable views over (Layer,
/// Location)").
///
/// Two views are equal iff they are addressed against the same open
/// knowledge base instance and the same location (§4.7 "Equality"); hash is
/// derived from the location alone, matching that equality is a refinement
/// of location equality.
pub struct EntityView<'a, M: StoreMap> {
    kb: &'a Theo2<M>,
    location: Location,
}

impl<'a, M: StoreMap> Clone for EntityView<'a, M> {
    fn clone(&self) -> Self {
        Self {
            kb: self.kb,
            location: self.location.clone(),
        }
    }
}

impl<'a, M: StoreMap> PartialEq for EntityView<'a, M> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.kb, other.kb) && self.location == other.location
    }
}

impl<'a, M: StoreMap> Eq for EntityView<'a, M> {}

impl<'a, M: StoreMap> Hash for EntityView<'a, M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
    }
}

impl<'a, M: StoreMap> std::fmt::Debug for EntityView<'a, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntityView({})", self.location)
    }
}

impl<'a, M: StoreMap> EntityView<'a, M> {
    pub fn new(kb: &'a Theo2<M>, location: Location) -> Self {
        Self { kb, location }
    }

    /// A view over the distinguished entity named by `entity`.
    pub fn entity(kb: &'a Theo2<M>, entity: impl Into<String>) -> Self {
        Self::new(kb, Location::for_entity(entity))
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn kb(&self) -> &'a Theo2<M> {
        self.kb
    }

    /// The Pointer value that refers to this view's location.
    pub fn pointer(&self) -> Value {
        Value::Pointer(self.location.clone())
    }

    // --- kind queries (§4.7: isSlot/isQuery/isBelief/isPrimitiveEntity) --

    pub fn is_primitive_entity(&self) -> bool {
        self.location.kind() == LocationKind::Entity
    }

    pub fn is_query(&self) -> bool {
        self.location.kind() == LocationKind::Query
    }

    pub fn is_belief(&self) -> bool {
        self.location.kind() == LocationKind::Belief
    }

    /// Whether this is a primitive entity that generalizes (transitively)
    /// to `slot` (§3 "Slot").
    pub fn is_slot(&self) -> StoreResult<bool> {
        if !self.is_primitive_entity() {
            return Ok(false);
        }
        Ok(self
            .kb
            .inner()
            .all_slots()
            .iter()
            .any(|s| s == self.location.entity_name()))
    }

    /// Whether this is a primitive entity that generalizes (transitively)
    /// to `context` (§3 "Context").
    pub fn is_context(&self) -> StoreResult<bool> {
        if !self.is_primitive_entity() {
            return Ok(false);
        }
        Ok(self
            .kb
            .inner()
            .all_contexts()
            .iter()
            .any(|c| c == self.location.entity_name()))
    }

    pub fn entity_exists(&self) -> bool {
        self.kb.inner().inner().entity_exists(self.location.entity_name())
    }

    // --- typed coercions (throw on type mismatch, per §4.7) --------------

    pub fn to_slot(&self) -> StoreResult<Self> {
        if self.is_slot()? {
            Ok(self.clone())
        } else {
            Err(StoreError::usage(
                "EntityView::to_slot",
                format!("{:?} is not a slot", self.location.entity_name()),
            ))
        }
    }

    pub fn to_query(&self) -> StoreResult<Self> {
        if self.is_query() {
            Ok(self.clone())
        } else {
            Err(StoreError::usage("EntityView::to_query", "location does not end in a Slot"))
        }
    }

    pub fn to_belief(&self) -> StoreResult<Self> {
        if self.is_belief() {
            Ok(self.clone())
        } else {
            Err(StoreError::usage(
                "EntityView::to_belief",
                "location does not end in an ElementRef",
            ))
        }
    }

    pub fn to_primitive_entity(&self) -> StoreResult<Self> {
        if self.is_primitive_entity() {
            Ok(self.clone())
        } else {
            Err(StoreError::usage(
                "EntityView::to_primitive_entity",
                "location has a non-empty slot/elementref path",
            ))
        }
    }

    // --- delegation into the layer (§4.7) --------------------------------

    /// `addValue(slot, v)`: delegates to `Theo2::add` at `self.location / slot`.
    pub fn add_value(&self, slot: impl Into<String>, value: Value) -> StoreResult<()> {
        let loc = self.location.clone().with_slot(slot.into());
        self.kb.add(&loc, value)
    }

    /// `deleteValue(slot, v)`.
    pub fn delete_value(&self, slot: impl Into<String>, value: Value) -> StoreResult<()> {
        let loc = self.location.clone().with_slot(slot.into()).with_element_ref(value);
        self.kb.delete(&loc, true)
    }

    /// `getQuery(slot)`: a view over `(self, slot)`, regardless of whether
    /// any value is currently stored there.
    pub fn get_query(&self, slot: impl Into<String>) -> Self {
        Self::new(self.kb, self.location.clone().with_slot(slot.into()))
    }

    /// `getBelief(slot, v)`: a view over the specific value `v` inside `slot`.
    pub fn get_belief(&self, slot: impl Into<String>, value: Value) -> Self {
        Self::new(self.kb, self.location.clone().with_slot(slot.into()).with_element_ref(value))
    }

    /// Direct generalizations of this primitive entity, as entity views.
    pub fn generalizations(&self) -> StoreResult<Vec<Self>> {
        Ok(self
            .kb
            .inner()
            .generalizations(self.location.entity_name())?
            .into_iter()
            .map(|name| Self::entity(self.kb, name))
            .collect())
    }

    pub fn specializes(&self, ancestor: &str) -> StoreResult<bool> {
        self.kb.inner().specializes(self.location.entity_name(), ancestor)
    }

    /// Creates this view's entity, generalizing it to `parents`, each of
    /// which must already exist.
    pub fn create(&self, parents: &[String]) -> StoreResult<()> {
        self.kb.inner().create_entity(self.location.entity_name(), parents)
    }

    /// Creates a slot: an entity generalizing (at least) to `slot`.
    pub fn create_slot(kb: &'a Theo2<M>, name: impl Into<String>) -> StoreResult<Self> {
        let name = name.into();
        kb.inner().create_entity(&name, &[crate::theo1::SLOT_ENTITY.to_string()])?;
        Ok(Self::entity(kb, name))
    }

    /// Deletes this view's entity (§3 Lifecycles).
    pub fn delete_entity(&self) -> StoreResult<()> {
        self.kb.inner().delete_entity(self.location.entity_name(), true)
    }

    /// Every location pointing at this entity through `slot` (§4.4
    /// `getPointers`), expressed as views over the exact referring Query
    /// location — including one buried under a nested subslot.
    pub fn get_referring_queries(&self, slot: &str) -> Vec<Self> {
        self.kb
            .inner()
            .inner()
            .get_pointers(self.location.entity_name(), slot)
            .into_iter()
            .map(|location| Self::new(self.kb, location))
            .collect()
    }

    /// Every slot name through which something points at this entity (§4.4
    /// `getPointingSlots`).
    pub fn get_pointing_slots(&self) -> Vec<String> {
        self.kb.inner().inner().get_pointing_slots(self.location.entity_name())
    }

    // --- RTWBag contract (§4.7), valid only for Query-kind views ----------
    //
    // §9's Open Question is resolved here (see SPEC_FULL.md A.4 #1):
    // Belief-ending locations are illegal for bag operations.

    fn require_query(&self) -> StoreResult<()> {
        if self.location.kind() != LocationKind::Query {
            return Err(StoreError::usage(
                "RTWBag",
                "bag operations require a Query-ending location",
            ));
        }
        Ok(())
    }

    /// All stored values, in insertion order (List) or map-defined order
    /// (SetList) — both are set-semantic per §4.3.
    pub fn values(&self) -> StoreResult<Vec<Value>> {
        self.require_query()?;
        Ok(self.kb.inner().inner().get(&self.location)?.unwrap_or_default())
    }

    pub fn size(&self) -> StoreResult<usize> {
        Ok(self.values()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.size()? == 0)
    }

    pub fn contains(&self, value: &Value) -> StoreResult<bool> {
        Ok(self.values()?.iter().any(|v| v == value))
    }

    pub fn int_iter(&self) -> StoreResult<Vec<i64>> {
        Ok(self.values()?.into_iter().filter_map(|v| v.as_int()).collect())
    }

    pub fn string_iter(&self) -> StoreResult<Vec<String>> {
        Ok(self.values()?.into_iter().filter_map(Value::into_string).collect())
    }

    pub fn bool_iter(&self) -> StoreResult<Vec<bool>> {
        Ok(self.values()?.into_iter().filter_map(|v| v.as_bool()).collect())
    }

    pub fn float_iter(&self) -> StoreResult<Vec<f64>> {
        Ok(self.values()?.into_iter().filter_map(|v| v.as_float()).collect())
    }

    /// Pointer values resolved to views over their targets.
    pub fn entity_iter(&self) -> StoreResult<Vec<Self>> {
        Ok(self
            .values()?
            .into_iter()
            .filter_map(Value::into_pointer)
            .map(|location| Self::new(self.kb, location))
            .collect())
    }

    pub fn into1_int(&self) -> StoreResult<Option<i64>> {
        Ok(self.int_iter()?.into_iter().next())
    }

    pub fn need1_int(&self) -> StoreResult<i64> {
        self.into1_int()?
            .ok_or_else(|| StoreError::not_found(self.location.clone()))
    }

    pub fn into1_string(&self) -> StoreResult<Option<String>> {
        Ok(self.string_iter()?.into_iter().next())
    }

    pub fn need1_string(&self) -> StoreResult<String> {
        self.into1_string()?
            .ok_or_else(|| StoreError::not_found(self.location.clone()))
    }

    pub fn into1_bool(&self) -> StoreResult<Option<bool>> {
        Ok(self.bool_iter()?.into_iter().next())
    }

    pub fn need1_bool(&self) -> StoreResult<bool> {
        self.into1_bool()?
            .ok_or_else(|| StoreError::not_found(self.location.clone()))
    }

    pub fn into1_entity(&self) -> StoreResult<Option<Self>> {
        Ok(self.entity_iter()?.into_iter().next())
    }

    pub fn need1_entity(&self) -> StoreResult<Self> {
        self.into1_entity()?
            .ok_or_else(|| StoreError::not_found(self.location.clone()))
    }

    /// Direct generalizations as values rather than views, used by callers
    /// who only need to check/print the hierarchy (e.g. an `fsck`-style tool).
    pub fn generalization_pointers(&self) -> StoreResult<Vec<Value>> {
        let generalizations_query = self.kb.inner().inner().get(
            &Location::for_entity(self.location.entity_name().to_string()).with_slot(GENERALIZATIONS),
        )?;
        Ok(generalizations_query.unwrap_or_default())
    }
}
