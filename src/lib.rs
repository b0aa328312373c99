//! A persistent, layered, schema-enforced Theo2012 knowledge base.
//!
//! A Theo2012 KB stores *beliefs* — assertions of the form `(Entity Slot) =
//! Value` — over a self-describing graph in which entities, slots, queries,
//! and beliefs are themselves addressable, so metadata (a slot's
//! cardinality, domain, range, inverse) is stored the same way as ordinary
//! data.
//!
//! This crate implements the three-layer core that turns a flat
//! key/value map into a full KB:
//!
//! 1. [`encoded_store`] (L0) — deterministic encoding of locations into
//!    string keys, subslot indexing, list/set promotion.
//! 2. [`superstore`] (L0+) — a reverse-pointer index answering "who points
//!    at X through slot S?" without a scan.
//! 3. [`theo1`] (L1) — the generalizations hierarchy and the distinguished
//!    `slot`/`context`/`everything` entities.
//! 4. [`theo2`] (L2) — per-slot metadata (`nrofvalues`, `domain`, `range`,
//!    `inverse`) enforced at write time.
//!
//! [`entity`] layers thin, immutable views on top for application code that
//! wants to talk about entities/slots/queries/beliefs directly rather than
//! raw locations.
//!
//! The underlying persistent map, the typed-value codec's primitive byte
//! layouts beyond framing, a CLI, GraphViz export, and cross-node
//! replication are out of scope; see each module's documentation for the
//! external contracts this crate consumes instead of implementing.

#![allow(clippy::module_inception)]

/// The error kinds shared by every layer (§7), and the crate-wide
/// [`error::StoreResult`] alias every fallible API returns.
pub mod error;

/// Explicit, caller-constructed configuration threaded into every layer's
/// `open` (no process-wide singleton).
pub mod config;

/// The tagged value algebra and its canonical byte encoding (C1).
pub mod value;

/// Addresses into the knowledge base: entity/query/belief locations and
/// their wire-form grammar.
pub mod location;

/// The persistent-map contract this crate consumes (C2), plus an
/// in-memory reference implementation.
pub mod store_map;

/// Small generation-tagged handles shared by the iterator-invalidation and
/// metadata-cache-invalidation rules above.
pub mod arena;

/// Encoded Store — L0 (C3): location-to-key encoding, subslot indexing,
/// list/set promotion, recursive delete.
pub mod encoded_store;

/// SuperStore — the reverse-pointer index (C4).
pub mod superstore;

/// Inverseless Theo1 — L1 (C5): the generalizations hierarchy and
/// bootstrap entities.
pub mod theo1;

/// Basic Theo2 — L2 (C6): per-slot metadata enforcement.
pub mod theo2;

/// Entity views (C7): typed, immutable views over `(Layer, Location)`.
pub mod entity;

/// The `<entity, slot, =value>` location wire form and `valueFromString`.
pub mod wire;

pub use config::Config;
pub use entity::EntityView;
pub use error::{StoreError, StoreResult};
pub use location::{LocElem, Location, LocationKind};
pub use store_map::{InMemoryStoreMap, StoreMap};
pub use theo2::Theo2;
pub use value::Value;

/// The top of the layer stack: a fully schema-enforced Theo2012 knowledge
/// base generic over its backing [`StoreMap`]. Opening one bootstraps (on
/// a writable, fresh backing map) the `everything`/`slot`/`context`/
/// `generalizations` essentials described in §4.5.
pub type Kb<M> = theo2::Theo2<M>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_a_ram_kb_bootstraps_essentials() {
        let kb: Kb<InMemoryStoreMap> =
            Theo2::open(InMemoryStoreMap::open("/", false).unwrap(), Config::ram()).unwrap();

        let everything = EntityView::entity(&kb, theo1::ROOT_ENTITY);
        let slot = EntityView::entity(&kb, theo1::SLOT_ENTITY);
        let context = EntityView::entity(&kb, theo1::CONTEXT_ENTITY);

        assert!(everything.entity_exists());
        assert!(slot.entity_exists());
        assert!(context.entity_exists());
        assert!(slot.specializes(theo1::ROOT_ENTITY).unwrap());
    }
}
