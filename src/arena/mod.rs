//! Small arena-style helpers shared by the layers above the store.
//!
//! [`Entry`]/[`EntryVersion`] give the primitive-entity iterator (§4.3) a
//! cheap way to detect that the map's generation it was built against has
//! moved on.

mod entry;

pub use crate::arena::entry::{Entry, EntryVersion};
