//! Encoded Store — L0 (C3, §4.3).
//!
//! Compiles [`Location`]s into flat string keys over a [`StoreMap`], and
//! maintains the auxiliary subslot/directory/name-partition keys that make
//! enumeration and value-subslot naming possible without scanning the
//! whole key space.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};

use tracing::{instrument, trace};

use crate::arena::Entry;
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::location::{LocElem, Location, LocationKind};
use crate::store_map::{StoreMap, ValueList};
use crate::value::{h2, Value};

const SIGIL_SUBSLOTS: &str = "  S";
const SIGIL_DIRECTORY: &str = "  D";
const SIGIL_PROMOTED: &str = "  U";
const SIGIL_NAME_PARTITION: &str = "  #";
const SIGIL_VALUE_SUBSLOT: &str = "  =";
const ABBR_PREFIX: &str = " T";
const CONCEPT_ABBR_PREFIX: &str = " C";
const FORMAT_KEY: &str = " ";
const TRANSLATION_TABLE_KEY: &str = " subslotTranslationTable";

/// Slot-name abbreviation table (§4.3). Created once per fresh store and
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct AbbreviationTable {
    to_abbr: std::collections::HashMap<String, String>,
    to_full: std::collections::HashMap<String, String>,
}

impl AbbreviationTable {
    /// Slot names common enough across every Theo2012 store to be worth a
    /// fixed sigil from the start (the metadata slots of §4.6, plus the
    /// bootstrapping relation).
    const BUILTINS: &'static [&'static str] = &[
        "generalizations",
        "nrofvalues",
        "domain",
        "range",
        "inverse",
        "masterinverse",
    ];

    fn bootstrap() -> Self {
        let mut table = Self {
            to_abbr: Default::default(),
            to_full: Default::default(),
        };

        for (index, name) in Self::BUILTINS.iter().enumerate() {
            let sigil = format!("{ABBR_PREFIX}{}", (b'a' + index as u8) as char);
            table.to_abbr.insert((*name).to_string(), sigil.clone());
            table.to_full.insert(sigil, (*name).to_string());
        }

        table
    }

    fn to_value_list(&self) -> ValueList {
        let mut out = vec![Value::Int(0)];
        let mut pairs: Vec<_> = self.to_abbr.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        for (full, abbr) in pairs {
            out.push(Value::Str(full.clone()));
            out.push(Value::Str(abbr.clone()));
        }

        out
    }

    fn from_value_list(values: &[Value]) -> StoreResult<Self> {
        let mut iter = values.iter();

        match iter.next() {
            Some(Value::Int(0)) => {}
            _ => {
                return Err(StoreError::invariant(
                    Location::for_entity(TRANSLATION_TABLE_KEY),
                    "translation table is missing its version header",
                ))
            }
        }

        let mut table = Self {
            to_abbr: Default::default(),
            to_full: Default::default(),
        };

        loop {
            let (full, abbr) = match (iter.next(), iter.next()) {
                (Some(full), Some(abbr)) => (full, abbr),
                (None, None) => break,
                _ => {
                    return Err(StoreError::invariant(
                        Location::for_entity(TRANSLATION_TABLE_KEY),
                        "translation table has an odd number of entries",
                    ))
                }
            };

            let full = full
                .as_str()
                .ok_or_else(|| {
                    StoreError::invariant(
                        Location::for_entity(TRANSLATION_TABLE_KEY),
                        "translation table full name is not a string",
                    )
                })?
                .to_string();
            let abbr = abbr
                .as_str()
                .ok_or_else(|| {
                    StoreError::invariant(
                        Location::for_entity(TRANSLATION_TABLE_KEY),
                        "translation table abbreviation is not a string",
                    )
                })?
                .to_string();

            table.to_abbr.insert(full.clone(), abbr.clone());
            table.to_full.insert(abbr, full);
        }

        Ok(table)
    }

    fn translate(&self, slot: &str) -> String {
        if let Some(sigil) = self.to_abbr.get(slot) {
            return sigil.clone();
        }

        if let Some(rest) = slot.strip_prefix("concept:") {
            return format!("{CONCEPT_ABBR_PREFIX}{rest}");
        }

        slot.to_string()
    }

    fn untranslate(&self, token: &str) -> String {
        if let Some(full) = self.to_full.get(token) {
            return full.clone();
        }

        if let Some(rest) = token.strip_prefix(CONCEPT_ABBR_PREFIX) {
            return format!("concept:{rest}");
        }

        token.to_string()
    }
}

/// The result of an [`EncodedStore::delete`] call: which values actually
/// disappeared, and which slot-address keys were removed entirely in the
/// process (the "final value deletion from a slot" hook point of §4.3,
/// consumed by [`crate::superstore::SuperStore`]'s `signalDeleteSlot`).
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    pub removed_values: Vec<(Location, Value)>,
    pub emptied_slots: Vec<Location>,
}

/// Encoded Store — L0.
pub struct EncodedStore<M: StoreMap> {
    map: M,
    config: Config,
    abbr: AbbreviationTable,
    /// The token of the most recently constructed [`PrimitiveEntityIterator`]
    /// (§4.3: "only one active iterator at a time; constructing a new one
    /// invalidates older ones"). Starts at 0, which no issued `Entry` ever
    /// equals, so the check is trivially satisfied before any iterator has
    /// been constructed.
    latest_iterator: AtomicU64,
    /// §6 entry point `isOpen`: flips false on [`Self::close`]. Purely a
    /// bookkeeping flag — nothing in this layer currently refuses calls
    /// against a closed store, matching §6's silence on that behavior; a
    /// caller that keeps using a closed `EncodedStore` is misusing the API,
    /// not hitting an enforced error path.
    open: AtomicBool,
}

impl<M: StoreMap> EncodedStore<M> {
    #[instrument(skip(map, config))]
    pub fn open(map: M, config: Config) -> StoreResult<Self> {
        // `Config` is the source of truth (no global state, per REDESIGN
        // FLAGS), so the backing map's read-only flag follows it rather
        // than whatever the map happened to be constructed with.
        map.set_read_only(config.read_only);

        let abbr = match map.get(TRANSLATION_TABLE_KEY) {
            Some(values) => AbbreviationTable::from_value_list(&values)?,
            None => {
                let fresh = AbbreviationTable::bootstrap();

                if !map.is_read_only() {
                    map.put(TRANSLATION_TABLE_KEY, fresh.to_value_list())?;
                    map.put(FORMAT_KEY, vec![Value::Int(0)])?;
                }

                fresh
            }
        };

        Ok(Self {
            map,
            config,
            abbr,
            latest_iterator: AtomicU64::new(0),
            open: AtomicBool::new(true),
        })
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `isOpen()` (§6 entry points).
    pub fn is_open(&self) -> bool {
        self.open.load(AtomicOrdering::SeqCst)
    }

    /// `close()` (§6 entry points): flushes and marks the store closed.
    pub fn close(&self) -> StoreResult<()> {
        self.flush(true)?;
        self.open.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.map.is_read_only()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.map.set_read_only(read_only)
    }

    pub fn flush(&self, sync: bool) -> StoreResult<()> {
        self.map.flush(sync)
    }

    /// `valueFromString(token)` (§6 entry points).
    pub fn value_from_string(&self, token: &str) -> StoreResult<Value> {
        crate::wire::value_from_string(token)
    }

    /// `getLoc(location)` (§6 L0 entry points): resolves `location` to its
    /// underlying slot-address key without creating anything, or `None`
    /// when no such key exists yet.
    pub fn get_loc(&self, location: &Location) -> StoreResult<Option<String>> {
        self.resolve_key(location, false)
    }

    pub fn generation(&self) -> u64 {
        self.map.generation()
    }

    // --- key resolution -----------------------------------------------

    /// Resolves `location` to its slot-address key. When `create` is
    /// false, an absent ElementRef subslot yields `None` rather than
    /// allocating one.
    fn resolve_key(&self, location: &Location, create: bool) -> StoreResult<Option<String>> {
        let mut key = location.entity_name().to_string();

        for elem in location.path() {
            match elem {
                LocElem::Slot(name) => {
                    if create {
                        self.ensure_subslot(&key, name)?;
                    }
                    key.push(' ');
                    key.push_str(&self.abbr.translate(name));
                }
                LocElem::ElementRef(value) => {
                    match self.resolve_element_ref(&key, value, create)? {
                        Some(suffix) => key.push_str(&suffix),
                        None => return Ok(None),
                    }
                }
            }
        }

        Ok(Some(key))
    }

    fn ensure_subslot(&self, parent_key: &str, slot_name: &str) -> StoreResult<()> {
        let subslot_key = format!("{parent_key}{SIGIL_SUBSLOTS}");
        let mut list = self.map.get(&subslot_key).unwrap_or_default();

        if !list.iter().any(|v| v.as_str() == Some(slot_name)) {
            list.push(Value::Str(slot_name.to_string()));
            self.map.put(&subslot_key, list)?;
        }

        Ok(())
    }

    fn remove_subslot(&self, parent_key: &str, slot_name: &str) -> StoreResult<()> {
        let subslot_key = format!("{parent_key}{SIGIL_SUBSLOTS}");

        if let Some(mut list) = self.map.get(&subslot_key) {
            list.retain(|v| v.as_str() != Some(slot_name));

            if list.is_empty() {
                self.map.remove(&subslot_key);
            } else {
                self.map.put(&subslot_key, list)?;
            }
        }

        Ok(())
    }

    /// Two-step ElementRef indirection (§4.3): a name-partition keyed by
    /// `h2(value)` holds `(value, subslot_id)` pairs; `subslot_id` is
    /// appended to the key for anything addressed below this ElementRef.
    fn resolve_element_ref(
        &self,
        key_so_far: &str,
        value: &Value,
        create: bool,
    ) -> StoreResult<Option<String>> {
        let hash = h2(value);
        let partition_key = format!("{key_so_far}{SIGIL_NAME_PARTITION}{hash}");
        let partition = self.map.get(&partition_key).unwrap_or_default();

        for entry in &partition {
            if let Value::List(pair) = entry {
                if pair.len() == 2 && &pair[0] == value {
                    if let Value::Str(id) = &pair[1] {
                        return Ok(Some(id.clone()));
                    }
                }
            }
        }

        if !create {
            // No subslot has ever been allocated on this value (§3
            // Lifecycles: allocation happens lazily, on first
            // subslot-on-value write) — but the value may still be a plain
            // member of the slot, which is enough to resolve a read-only
            // key for it (`getLoc` on a Belief that has no subslots of its
            // own). The returned id is not persisted; if a subslot is ever
            // actually written to this value, `create = true` below
            // allocates the real id independently.
            let is_member = self
                .map
                .get(key_so_far)
                .is_some_and(|values| values.contains(value));

            return Ok(is_member.then(|| format!("{SIGIL_VALUE_SUBSLOT}{hash}")));
        }

        let existing_ids: HashSet<&str> = partition
            .iter()
            .filter_map(|entry| match entry {
                Value::List(pair) if pair.len() == 2 => pair[1].as_str(),
                _ => None,
            })
            .collect();

        let base = format!("{SIGIL_VALUE_SUBSLOT}{hash}");
        let mut chosen = None;

        if !existing_ids.contains(base.as_str()) {
            chosen = Some(base.clone());
        } else {
            for byte in 32u8..=126u8 {
                let candidate = format!("{base}{}", byte as char);
                if !existing_ids.contains(candidate.as_str()) {
                    chosen = Some(candidate);
                    break;
                }
            }
        }

        let subslot_id = chosen.ok_or_else(|| {
            StoreError::invariant(
                Location::for_entity(key_so_far.to_string()),
                "name-partition collision overflow: no free collision byte remains",
            )
        })?;

        let mut new_partition = partition;
        new_partition.push(Value::List(vec![value.clone(), Value::Str(subslot_id.clone())]));
        self.map.put(&partition_key, new_partition)?;

        let directory_key = format!("{key_so_far}{SIGIL_DIRECTORY}");
        let mut directory = self.map.get(&directory_key).unwrap_or_default();
        if !directory.iter().any(|v| v.as_str() == Some(hash.as_str())) {
            directory.push(Value::Str(hash));
            self.map.put(&directory_key, directory)?;
        }

        Ok(Some(subslot_id))
    }

    fn cleanup_element_ref(&self, key_so_far: &str, value: &Value) -> StoreResult<()> {
        let hash = h2(value);
        let partition_key = format!("{key_so_far}{SIGIL_NAME_PARTITION}{hash}");

        let Some(mut partition) = self.map.get(&partition_key) else {
            return Ok(());
        };

        let before = partition.len();
        partition.retain(|entry| match entry {
            Value::List(pair) if pair.len() == 2 => &pair[0] != value,
            _ => true,
        });

        if partition.len() == before {
            return Ok(());
        }

        if partition.is_empty() {
            self.map.remove(&partition_key);

            let directory_key = format!("{key_so_far}{SIGIL_DIRECTORY}");
            if let Some(mut directory) = self.map.get(&directory_key) {
                directory.retain(|v| v.as_str() != Some(hash.as_str()));

                if directory.is_empty() {
                    self.map.remove(&directory_key);
                } else {
                    self.map.put(&directory_key, directory)?;
                }
            }
        } else {
            self.map.put(&partition_key, partition)?;
        }

        Ok(())
    }

    // --- public operations ----------------------------------------------

    /// `get(loc)`: the stored values for a Query location.
    pub fn get(&self, location: &Location) -> StoreResult<Option<ValueList>> {
        if location.kind() != LocationKind::Query {
            return Err(StoreError::usage(
                "EncodedStore::get",
                "location must end in a Slot",
            ));
        }

        let Some(key) = self.resolve_key(location, false)? else {
            return Ok(None);
        };

        Ok(self.map.get(&key))
    }

    /// `getSubslots(loc)`.
    pub fn get_subslots(&self, location: &Location) -> StoreResult<Option<Vec<String>>> {
        let Some(key) = self.resolve_key(location, false)? else {
            return Ok(None);
        };

        let subslot_key = format!("{key}{SIGIL_SUBSLOTS}");

        Ok(self.map.get(&subslot_key).map(|values| {
            values
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| self.abbr.untranslate(s)))
                .collect()
        }))
    }

    pub fn entity_exists(&self, entity: &str) -> bool {
        self.map
            .get(&format!("{entity}{SIGIL_SUBSLOTS}"))
            .is_some_and(|list| !list.is_empty())
    }

    pub fn get_num_values(&self, location: &Location) -> StoreResult<usize> {
        Ok(self.get(location)?.map(|v| v.len()).unwrap_or(0))
    }

    /// True once a slot's stored container has been promoted from List to
    /// SetList by crossing `max_list_size` (§4.3). Purely an internal
    /// bookkeeping marker: both representations behave identically to
    /// every caller (§8 property "List/set invisibility").
    pub fn is_promoted(&self, location: &Location) -> StoreResult<bool> {
        let Some(key) = self.resolve_key(location, false)? else {
            return Ok(false);
        };

        Ok(self.map.get(&format!("{key}{SIGIL_PROMOTED}")).is_some())
    }

    /// `add(loc, value)`.
    #[instrument(skip(self, value))]
    pub fn add(&self, location: &Location, value: Value) -> StoreResult<()> {
        if self.is_read_only() {
            return Err(StoreError::read_only("EncodedStore::add"));
        }

        if location.kind() != LocationKind::Query {
            return Err(StoreError::usage(
                "EncodedStore::add",
                "location must end in a Slot",
            ));
        }

        if location.len() < 2 {
            return Err(StoreError::usage(
                "EncodedStore::add",
                "location must have at least an entity and a slot",
            ));
        }

        let key = self
            .resolve_key(location, true)?
            .expect("resolve_key(create=true) always succeeds");

        let mut values = self.map.get(&key).unwrap_or_default();

        if values.contains(&value) {
            return Err(StoreError::usage(
                "EncodedStore::add",
                format!("value already present in slot (setness): {value:?}"),
            ));
        }

        values.push(value);

        if values.len() > self.config.max_list_size {
            self.map.put(&format!("{key}{SIGIL_PROMOTED}"), vec![Value::Bool(true)])?;
        }

        self.map.put(&key, values)?;

        trace!(key, "added value");

        Ok(())
    }

    /// `delete(loc, errIfMissing, recursive)`.
    #[instrument(skip(self))]
    pub fn delete(
        &self,
        location: &Location,
        err_if_missing: bool,
        recursive: bool,
    ) -> StoreResult<DeleteOutcome> {
        if self.is_read_only() {
            return Err(StoreError::read_only("EncodedStore::delete"));
        }

        let mut outcome = DeleteOutcome::default();

        match location.kind() {
            LocationKind::Query => {
                self.delete_query(location, err_if_missing, recursive, &mut outcome)?;
            }
            LocationKind::Belief => {
                self.delete_belief(location, err_if_missing, &mut outcome)?;
            }
            LocationKind::Entity => {
                return Err(StoreError::usage(
                    "EncodedStore::delete",
                    "location must end in a Slot or an ElementRef",
                ));
            }
        }

        Ok(outcome)
    }

    fn delete_query(
        &self,
        location: &Location,
        err_if_missing: bool,
        recursive: bool,
        outcome: &mut DeleteOutcome,
    ) -> StoreResult<()> {
        let Some(key) = self.resolve_key(location, false)? else {
            if err_if_missing {
                return Err(StoreError::not_found(location.clone()));
            }
            return Ok(());
        };

        let Some(values) = self.map.get(&key) else {
            if err_if_missing {
                return Err(StoreError::not_found(location.clone()));
            }
            return Ok(());
        };

        if recursive {
            if let Some(children) = self.get_subslots(location)? {
                for child in children {
                    let child_loc = location.clone().with_slot(child);
                    self.delete_query(&child_loc, false, true, outcome)?;
                }
            }

            // Subslots hung directly off individual values (ElementRef
            // children) must also be torn down before we can drop the
            // partitions/directory that track them.
            let directory_key = format!("{key}{SIGIL_DIRECTORY}");
            if let Some(directory) = self.map.get(&directory_key) {
                for hash in directory.iter().filter_map(Value::as_str) {
                    let partition_key = format!("{key}{SIGIL_NAME_PARTITION}{hash}");
                    if let Some(partition) = self.map.get(&partition_key) {
                        for entry in partition {
                            if let Value::List(pair) = entry {
                                if pair.len() == 2 {
                                    let value_loc =
                                        location.clone().with_element_ref(pair[0].clone());
                                    if let Some(grandchildren) =
                                        self.get_subslots(&value_loc)?
                                    {
                                        for grandchild in grandchildren {
                                            let child_loc =
                                                value_loc.clone().with_slot(grandchild);
                                            self.delete_query(&child_loc, false, true, outcome)?;
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        for value in values.iter() {
            outcome
                .removed_values
                .push((location.clone().with_element_ref(value.clone()), value.clone()));
            self.cleanup_element_ref(&key, value)?;
        }

        self.map.remove(&key);
        self.map.remove(&format!("{key}{SIGIL_PROMOTED}"));
        outcome.emptied_slots.push(location.clone());

        if let Some(parent) = location.parent() {
            if let Some(slot_name) = location.last_slot() {
                self.cull_if_empty(&parent, slot_name)?;
            }
        }

        Ok(())
    }

    fn delete_belief(
        &self,
        location: &Location,
        err_if_missing: bool,
        outcome: &mut DeleteOutcome,
    ) -> StoreResult<()> {
        let value = location
            .element_value()
            .expect("Belief location always has an element value")
            .clone();
        let query = location
            .parent()
            .expect("Belief location always has a Query parent");

        let Some(query_key) = self.resolve_key(&query, false)? else {
            if err_if_missing {
                return Err(StoreError::not_found(location.clone()));
            }
            return Ok(());
        };

        let Some(mut values) = self.map.get(&query_key) else {
            if err_if_missing {
                return Err(StoreError::not_found(location.clone()));
            }
            return Ok(());
        };

        let position = values.iter().position(|v| v == &value);

        let Some(position) = position else {
            if err_if_missing {
                return Err(StoreError::not_found(location.clone()));
            }
            return Ok(());
        };

        values.remove(position);
        outcome.removed_values.push((location.clone(), value.clone()));

        if values.is_empty() {
            self.map.remove(&query_key);
            self.map.remove(&format!("{query_key}{SIGIL_PROMOTED}"));
            outcome.emptied_slots.push(query.clone());

            if let Some(parent) = query.parent() {
                if let Some(slot_name) = query.last_slot() {
                    self.cull_if_empty(&parent, slot_name)?;
                }
            }
        } else {
            self.map.put(&query_key, values)?;
        }

        // The value's own subslot position (if any) no longer has a
        // containing partition entry; garbage-collect it.
        self.cleanup_element_ref(&query_key, &value)?;

        // And if that value position had subslots of its own that are now
        // orphaned data with no referent above them, those were already
        // required to be torn down by a recursive delete of the Query; a
        // bare Belief delete does not cascade into them (§4.3 leaves that
        // to the caller, matching `deleteEntity`'s own recursive use).

        Ok(())
    }

    fn cull_if_empty(&self, parent: &Location, slot_name: &str) -> StoreResult<()> {
        let Some(parent_key) = self.resolve_key(parent, false)? else {
            return Ok(());
        };

        let slot_loc = parent.clone().with_slot(slot_name.to_string());
        let Some(slot_key) = self.resolve_key(&slot_loc, false)? else {
            return Ok(());
        };

        let has_values = self.map.get(&slot_key).is_some();
        let has_subslots = self
            .get_subslots(&slot_loc)?
            .map(|s| !s.is_empty())
            .unwrap_or(false);

        if !has_values && !has_subslots {
            self.remove_subslot(&parent_key, slot_name)?;
        }

        Ok(())
    }

    /// A snapshot of every primitive-entity name currently present, in
    /// map order (§4.3: iterate underlying keys; a key `E  S` with no
    /// space in `E` is a primitive entity). Unlike
    /// [`get_primitive_entity_iterator`](Self::get_primitive_entity_iterator)
    /// this has no staleness contract at all — it is a plain one-shot
    /// listing for callers (and tests) that do not need the "one active
    /// iterator" discipline of §4.3.
    pub fn primitive_entities(&self) -> Vec<String> {
        self.map
            .keys()
            .into_iter()
            .filter_map(|key| {
                let name = key.strip_suffix(SIGIL_SUBSLOTS)?;
                if name.contains(' ') {
                    None
                } else {
                    Some(name.to_string())
                }
            })
            .collect()
    }

    /// `getPrimitiveEntityIterator()` (§6 L0 entry points).
    ///
    /// §4.3: "Only one active iterator at a time; constructing a new one
    /// invalidates older ones". Rather than threading that rule through
    /// every caller, the returned [`PrimitiveEntityIterator`] is stamped
    /// with a token; constructing a fresh iterator bumps the store's
    /// notion of "latest issued token", and any older iterator's `next()`
    /// call observes the mismatch and returns `Usage` instead of silently
    /// returning stale data.
    pub fn get_primitive_entity_iterator(&self) -> PrimitiveEntityIterator<'_, M> {
        let token = self.latest_iterator.fetch_add(1, AtomicOrdering::SeqCst) + 1;

        PrimitiveEntityIterator {
            store: self,
            entries: self.primitive_entities(),
            position: 0,
            token: Entry::of(token),
        }
    }
}

/// A generation-checked iterator over primitive-entity names (§4.3, §6
/// `getPrimitiveEntityIterator`). See [`EncodedStore::get_primitive_entity_iterator`].
pub struct PrimitiveEntityIterator<'a, M: StoreMap> {
    store: &'a EncodedStore<M>,
    entries: Vec<String>,
    position: usize,
    token: Entry,
}

impl<'a, M: StoreMap> PrimitiveEntityIterator<'a, M> {
    fn current_token(&self) -> u64 {
        self.store.latest_iterator.load(AtomicOrdering::SeqCst)
    }

    /// True while this iterator is still the most recently constructed one
    /// for its store; once a newer iterator has been constructed this
    /// permanently becomes `false`.
    pub fn is_valid(&self) -> bool {
        self.token.is_current(self.current_token())
    }

    /// Advances the iterator, yielding `Usage` if a newer iterator has since
    /// been constructed (§4.3's "constructing a new one invalidates older
    /// ones", REDESIGN FLAGS "Iterator invalidation").
    pub fn next(&mut self) -> StoreResult<Option<String>> {
        if !self.is_valid() {
            return Err(StoreError::usage(
                "PrimitiveEntityIterator::next",
                "this iterator was invalidated by a newer primitive-entity iterator",
            ));
        }

        let next = self.entries.get(self.position).cloned();
        if next.is_some() {
            self.position += 1;
        }

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_map::InMemoryStoreMap;

    fn store() -> EncodedStore<InMemoryStoreMap> {
        EncodedStore::open(InMemoryStoreMap::open("/", false).unwrap(), Config::ram()).unwrap()
    }

    fn loc(entity: &str, slot: &str) -> Location {
        Location::for_entity(entity).with_slot(slot)
    }

    #[test]
    fn add_then_get_round_trips() {
        let store = store();
        let l = loc("bob", "generalizations");

        store.add(&l, Value::Str("everything".into())).unwrap();

        assert_eq!(
            store.get(&l).unwrap(),
            Some(vec![Value::Str("everything".into())])
        );
        assert!(store.entity_exists("bob"));
    }

    #[test]
    fn add_rejects_duplicate_value() {
        let store = store();
        let l = loc("bob", "generalizations");

        store.add(&l, Value::Str("x".into())).unwrap();
        let err = store.add(&l, Value::Str("x".into())).unwrap_err();
        assert!(matches!(err, StoreError::Usage { .. }));
    }

    #[test]
    fn delete_last_value_removes_entity_and_signals() {
        let store = store();
        let l = loc("bob", "generalizations");

        store.add(&l, Value::Str("x".into())).unwrap();
        let outcome = store.delete(&l, true, false).unwrap();

        assert_eq!(outcome.removed_values.len(), 1);
        assert_eq!(outcome.emptied_slots, vec![l.clone()]);
        assert!(!store.entity_exists("bob"));
        assert_eq!(store.get(&l).unwrap(), None);
    }

    #[test]
    fn belief_delete_leaves_sibling_values() {
        let store = store();
        let l = loc("bob", "nicknames");

        store.add(&l, Value::Str("bobby".into())).unwrap();
        store.add(&l, Value::Str("rob".into())).unwrap();

        let belief = l.clone().with_element_ref(Value::Str("bobby".into()));
        let outcome = store.delete(&belief, true, false).unwrap();

        assert_eq!(outcome.removed_values.len(), 1);
        assert!(outcome.emptied_slots.is_empty());
        assert_eq!(store.get(&l).unwrap(), Some(vec![Value::Str("rob".into())]));
    }

    #[test]
    fn subslots_on_values_round_trip() {
        let store = store();
        let livesin = loc("bob", "livesin");
        store.add(&livesin, Value::Str("tokyo".into())).unwrap();

        let value_loc = livesin.clone().with_element_ref(Value::Str("tokyo".into()));
        let since = value_loc.clone().with_slot("since");
        store.add(&since, Value::Int(2020)).unwrap();

        assert_eq!(store.get(&since).unwrap(), Some(vec![Value::Int(2020)]));
        assert_eq!(
            store.get_subslots(&value_loc).unwrap(),
            Some(vec!["since".to_string()])
        );
    }

    #[test]
    fn recursive_delete_removes_value_subslots() {
        let store = store();
        let livesin = loc("bob", "livesin");
        store.add(&livesin, Value::Str("tokyo".into())).unwrap();

        let value_loc = livesin.clone().with_element_ref(Value::Str("tokyo".into()));
        let since = value_loc.clone().with_slot("since");
        store.add(&since, Value::Int(2020)).unwrap();

        store.delete(&livesin, true, true).unwrap();

        assert_eq!(store.get(&since).unwrap(), None);
        assert_eq!(store.get_subslots(&value_loc).unwrap(), None);
    }

    #[test]
    fn promotion_marker_flips_once_past_threshold() {
        let mut config = Config::ram();
        config.max_list_size = 2;
        let store = EncodedStore::open(InMemoryStoreMap::open("/", false).unwrap(), config).unwrap();
        let l = loc("bob", "tags");

        store.add(&l, Value::Int(1)).unwrap();
        store.add(&l, Value::Int(2)).unwrap();
        assert!(!store.is_promoted(&l).unwrap());

        store.add(&l, Value::Int(3)).unwrap();
        assert!(store.is_promoted(&l).unwrap());

        // Observable semantics are unchanged across the promotion (§8.8).
        assert_eq!(
            store.get(&l).unwrap(),
            Some(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn primitive_entity_iteration_finds_live_entities() {
        let store = store();
        store.add(&loc("bob", "generalizations"), Value::Str("x".into())).unwrap();
        store.add(&loc("alice", "generalizations"), Value::Str("y".into())).unwrap();

        let mut entities = store.primitive_entities();
        entities.sort();
        assert_eq!(entities, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn abbreviation_table_persists_across_reopen() {
        let map = std::sync::Arc::new(InMemoryStoreMap::open("/", false).unwrap());

        // Opening once writes the bootstrap translation table; opening
        // again against the same map must reuse it rather than re-bootstrap.
        let first = EncodedStore::open(map.clone(), Config::ram()).unwrap();
        drop(first);

        let reopened = EncodedStore::open(map, Config::ram()).unwrap();
        reopened
            .add(&loc("bob", "generalizations"), Value::Str("x".into()))
            .unwrap();
        assert!(reopened.entity_exists("bob"));
    }

    #[test]
    fn primitive_entity_iterator_yields_every_entity_once() {
        let store = store();
        store.add(&loc("bob", "generalizations"), Value::Str("x".into())).unwrap();
        store.add(&loc("alice", "generalizations"), Value::Str("y".into())).unwrap();

        let mut iter = store.get_primitive_entity_iterator();
        let mut seen = Vec::new();
        while let Some(name) = iter.next().unwrap() {
            seen.push(name);
        }
        seen.sort();

        assert_eq!(seen, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(iter.next().unwrap(), None);
    }

    #[test]
    fn constructing_a_new_iterator_invalidates_the_old_one() {
        let store = store();
        store.add(&loc("bob", "generalizations"), Value::Str("x".into())).unwrap();

        let mut stale = store.get_primitive_entity_iterator();
        let _fresh = store.get_primitive_entity_iterator();

        assert!(!stale.is_valid());
        let err = stale.next().unwrap_err();
        assert!(matches!(err, StoreError::Usage { .. }));
    }

    #[test]
    fn get_loc_resolves_an_existing_belief_and_is_none_for_absent_ones() {
        let store = store();
        let livesin = loc("bob", "livesin");
        store.add(&livesin, Value::Str("tokyo".into())).unwrap();

        let query = loc("bob", "livesin");
        assert!(store.get_loc(&query).unwrap().is_some());

        let existing_belief = livesin.clone().with_element_ref(Value::Str("tokyo".into()));
        assert!(store.get_loc(&existing_belief).unwrap().is_some());

        let absent_belief = livesin.with_element_ref(Value::Str("osaka".into()));
        assert!(store.get_loc(&absent_belief).unwrap().is_none());
    }
}
