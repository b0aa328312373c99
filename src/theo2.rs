//! Basic Theo2 — L2 (C6, §4.6).
//!
//! Wraps [`Theo1`] with per-slot metadata (`nrofvalues`, `domain`, `range`,
//! `inverse`/`masterinverse`) read from the KB itself and enforced at
//! write time, cached per slot name and invalidated on delete.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::instrument;

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::location::{Location, LocationKind};
use crate::store_map::StoreMap;
use crate::theo1::Theo1;
use crate::value::Value;

const NROFVALUES: &str = "nrofvalues";
const DOMAIN: &str = "domain";
const RANGE: &str = "range";
const INVERSE: &str = "inverse";
const MASTERINVERSE: &str = "masterinverse";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NrOfValues {
    One,
    Any,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Domain {
    Entity(String),
    Belief,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Range {
    Any,
    Integer,
    Double,
    String,
    Boolean,
    List,
    Entity(String),
}

#[derive(Clone, Debug, Default)]
struct SlotMetadata {
    nrofvalues: Option<NrOfValues>,
    domain: Option<Domain>,
    range: Option<Range>,
    inverse: Option<String>,
}

/// Basic Theo2 — L2.
pub struct Theo2<M: StoreMap> {
    inner: Theo1<M>,
    metadata_cache: RwLock<HashMap<String, SlotMetadata>>,
}

impl<M: StoreMap> Theo2<M> {
    pub fn open(map: M, config: Config) -> StoreResult<Self> {
        Ok(Self {
            inner: Theo1::open(map, config)?,
            metadata_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn inner(&self) -> &Theo1<M> {
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

    /// `createPrimitiveEntity(name, generalizations)` (§6 entry points).
    pub fn create_primitive_entity(&self, name: &str, generalizations: &[String]) -> StoreResult<()> {
        self.inner.create_primitive_entity(name, generalizations)
    }

    /// `createSlot(name)` (§6 entry points).
    pub fn create_slot(&self, name: &str) -> StoreResult<()> {
        self.inner.create_slot(name)
    }

    /// `valueFromString(token)` (§6 entry points): parses a [`Value`] from
    /// its wire-form literal (see [`crate::wire::value_from_string`]).
    pub fn value_from_string(&self, token: &str) -> StoreResult<Value> {
        crate::wire::value_from_string(token)
    }

    /// `deleteEntity(name, errIfMissing)` (§6 entry points). `name` may be
    /// a slot entity, so its cached [`SlotMetadata`] (if any) is dropped
    /// along with it.
    pub fn delete_entity(&self, name: &str, err_if_missing: bool) -> StoreResult<()> {
        self.inner.delete_entity(name, err_if_missing)?;
        self.metadata_cache.write().remove(name);
        Ok(())
    }

    fn raw_get(&self, slot: &str, metadata_slot: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .inner
            .inner()
            .get(&Location::for_entity(slot.to_string()).with_slot(metadata_slot))?
            .and_then(|mut values| if values.is_empty() { None } else { Some(values.remove(0)) }))
    }

    fn load_metadata(&self, slot: &str) -> StoreResult<SlotMetadata> {
        if let Some(cached) = self.metadata_cache.read().get(slot) {
            return Ok(cached.clone());
        }

        let nrofvalues = match self.raw_get(slot, NROFVALUES)? {
            Some(Value::Int(1)) => Some(NrOfValues::One),
            Some(Value::Str(s)) if s == "any" => Some(NrOfValues::Any),
            _ => None,
        };

        let domain = match self.raw_get(slot, DOMAIN)? {
            Some(Value::Pointer(location)) if location.kind() == LocationKind::Entity => {
                Some(Domain::Entity(location.entity_name().to_string()))
            }
            Some(Value::Str(s)) if s == "belief" => Some(Domain::Belief),
            _ => None,
        };

        let range = match self.raw_get(slot, RANGE)? {
            Some(Value::Str(s)) => match s.as_str() {
                "any" => Some(Range::Any),
                "integer" => Some(Range::Integer),
                "double" => Some(Range::Double),
                "string" => Some(Range::String),
                "boolean" => Some(Range::Boolean),
                "list" => Some(Range::List),
                _ => None,
            },
            Some(Value::Pointer(location)) if location.kind() == LocationKind::Entity => {
                Some(Range::Entity(location.entity_name().to_string()))
            }
            _ => None,
        };

        let inverse = match self.raw_get(slot, INVERSE)? {
            Some(Value::Pointer(location)) if location.kind() == LocationKind::Entity => {
                Some(location.entity_name().to_string())
            }
            _ => None,
        };

        let metadata = SlotMetadata {
            nrofvalues,
            domain,
            range,
            inverse,
        };

        self.metadata_cache
            .write()
            .insert(slot.to_string(), metadata.clone());

        Ok(metadata)
    }

    fn invalidate(&self, slot: &str) {
        self.metadata_cache.write().remove(slot);
    }

    /// `add(loc, value)`: validates `nrofvalues`/`domain`/`range` against
    /// the slot's cached metadata before delegating down, then maintains
    /// `inverse`/`masterinverse` bookkeeping after a successful write.
    #[instrument(skip(self, value))]
    pub fn add(&self, location: &Location, value: Value) -> StoreResult<()> {
        if location.kind() != LocationKind::Query {
            return Err(StoreError::usage("Theo2::add", "location must end in a Slot"));
        }

        let slot = location
            .last_slot()
            .expect("Query location always has a slot")
            .to_string();

        if slot == MASTERINVERSE {
            if let Value::Bool(false) = value {
                let owner = location
                    .parent()
                    .expect("Query location always has a parent");
                let inverse = self.load_metadata(owner.entity_name())?.inverse;
                if inverse.as_deref() == Some(owner.entity_name()) {
                    return Err(StoreError::schema(
                        location.clone(),
                        "masterinverse cannot be set false on a self-inverse slot",
                    ));
                }
            }
        }

        if !matches!(value, Value::None) {
            let owner = location
                .parent()
                .expect("Query location always has a parent");
            let metadata = self.load_metadata(&slot)?;

            if let Some(NrOfValues::One) = metadata.nrofvalues {
                if self.inner.inner().get_num_values(location)? >= 1 {
                    return Err(StoreError::schema(
                        location.clone(),
                        format!("slot {slot:?} allows at most one value"),
                    ));
                }
            }

            if let Some(domain) = &metadata.domain {
                self.check_domain(location, &owner, domain)?;
            }

            if let Some(range) = &metadata.range {
                self.check_range(location, range, &value)?;
            }
        }

        self.inner.add(location, value.clone())?;
        self.invalidate(&slot);

        if slot == INVERSE {
            self.handle_inverse_declaration(location.entity_name(), &value)?;
        } else if let Some(inverse_slot) = self.load_metadata(&slot)?.inverse {
            self.maintain_inverse(location.entity_name(), &inverse_slot, &value)?;
        }

        Ok(())
    }

    fn check_domain(&self, location: &Location, owner: &Location, domain: &Domain) -> StoreResult<()> {
        match domain {
            Domain::Entity(domain_entity) => {
                if owner.kind() != LocationKind::Entity {
                    return Err(StoreError::schema(
                        location.clone(),
                        "domain entity constraint requires the slot to be attached to a primitive entity",
                    ));
                }

                if !self.inner.specializes(owner.entity_name(), domain_entity)? {
                    return Err(StoreError::schema(
                        location.clone(),
                        format!("{:?} is not within domain {domain_entity:?}", owner.entity_name()),
                    ));
                }
            }
            Domain::Belief => {
                if owner.kind() == LocationKind::Entity {
                    return Err(StoreError::schema(
                        location.clone(),
                        "domain \"belief\" requires the slot to be attached to a Query or Belief",
                    ));
                }
            }
        }

        Ok(())
    }

    fn check_range(&self, location: &Location, range: &Range, value: &Value) -> StoreResult<()> {
        let ok = match range {
            Range::Any => true,
            Range::Integer => matches!(value, Value::Int(_)),
            Range::Double => matches!(value, Value::Float(_)),
            Range::String => matches!(value, Value::Str(_)),
            Range::Boolean => matches!(value, Value::Bool(_)),
            Range::List => matches!(value, Value::List(_) | Value::SetList(_)),
            Range::Entity(range_entity) => match value {
                Value::Pointer(target) if target.kind() == LocationKind::Entity => {
                    self.inner.specializes(target.entity_name(), range_entity)?
                }
                _ => false,
            },
        };

        if !ok {
            return Err(StoreError::schema(
                location.clone(),
                format!("value {value:?} is not within range {range:?}"),
            ));
        }

        Ok(())
    }

    fn maintain_inverse(&self, entity: &str, inverse_slot: &str, value: &Value) -> StoreResult<()> {
        let Value::Pointer(target) = value else {
            return Ok(());
        };

        let mirror_loc = Location::for_entity(target.entity_name().to_string()).with_slot(inverse_slot.to_string());
        let existing = self.inner.inner().get(&mirror_loc)?.unwrap_or_default();
        let mirror_value = Value::Pointer(Location::for_entity(entity.to_string()));

        if !existing.contains(&mirror_value) {
            self.inner.inner().add(&mirror_loc, mirror_value)?;
            self.invalidate(inverse_slot);
        }

        Ok(())
    }

    fn handle_inverse_declaration(&self, slot_entity: &str, value: &Value) -> StoreResult<()> {
        let Value::Pointer(other) = value else {
            return Err(StoreError::usage(
                "Theo2::add",
                "inverse value must be a Pointer to a slot entity",
            ));
        };

        let other_slot = other.entity_name().to_string();

        if other_slot == slot_entity {
            self.set_masterinverse_if_unset(slot_entity, true)?;
            return Ok(());
        }

        let other_inverse_loc = Location::for_entity(other_slot.clone()).with_slot(INVERSE);
        let has_other_inverse = self
            .inner
            .inner()
            .get(&other_inverse_loc)?
            .map(|v| !v.is_empty())
            .unwrap_or(false);

        if !has_other_inverse {
            self.inner
                .inner()
                .add(&other_inverse_loc, Value::Pointer(Location::for_entity(slot_entity.to_string())))?;
            self.invalidate(&other_slot);
        }

        let this_has_master = self.has_explicit_masterinverse(slot_entity)?;
        let other_has_master = self.has_explicit_masterinverse(&other_slot)?;

        if !this_has_master && !other_has_master {
            self.set_masterinverse_if_unset(slot_entity, true)?;
            self.set_masterinverse_if_unset(&other_slot, false)?;
        }

        Ok(())
    }

    fn has_explicit_masterinverse(&self, slot: &str) -> StoreResult<bool> {
        Ok(self
            .inner
            .inner()
            .get(&Location::for_entity(slot.to_string()).with_slot(MASTERINVERSE))?
            .map(|v| !v.is_empty())
            .unwrap_or(false))
    }

    fn set_masterinverse_if_unset(&self, slot: &str, value: bool) -> StoreResult<()> {
        if self.has_explicit_masterinverse(slot)? {
            return Ok(());
        }

        self.inner
            .inner()
            .add(&Location::for_entity(slot.to_string()).with_slot(MASTERINVERSE), Value::Bool(value))?;
        self.invalidate(slot);

        Ok(())
    }

    /// `delete(loc, errIfMissing)`, invalidating this slot's metadata cache
    /// when the deletion touches one of the metadata slots themselves.
    #[instrument(skip(self))]
    pub fn delete(&self, location: &Location, err_if_missing: bool) -> StoreResult<()> {
        if let Some(owner) = location.parent() {
            if owner.kind() == LocationKind::Entity {
                if let Some(slot) = location.last_slot() {
                    if matches!(slot, NROFVALUES | DOMAIN | RANGE | INVERSE | MASTERINVERSE) {
                        self.invalidate(owner.entity_name());
                    }
                }
            }
        }

        self.inner.delete(location, err_if_missing)
    }
}
