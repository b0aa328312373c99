use std::fmt::{Debug, Formatter, Result as FmtResult};

/// A generation counter paired with the underlying map's own generation.
///
/// The primitive-entity iterator (§4.3: "only one active iterator at a
/// time; constructing a new one invalidates older ones") and the per-slot
/// metadata caches (§4.6) both need to notice that the map moved on under
/// them. Rather than threading a `Usage` error through every cache read,
/// each of them stamps the map's generation at construction time and
/// compares it against [`crate::store_map::StoreMap::generation`] before
/// trusting what they are holding.
pub type EntryVersion = u64;

/// A weak, generation-checked handle into a map-backed collection.
///
/// `Entry::nil()` never compares equal to any entry produced by a live
/// generation, so a default-constructed `Entry` is always safely "stale".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entry {
    pub generation: EntryVersion,
}

impl Default for Entry {
    #[inline(always)]
    fn default() -> Self {
        Self::nil()
    }
}

impl Debug for Entry {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        if self.is_nil() {
            return formatter.write_str("Entry(nil)");
        }

        formatter.write_fmt(format_args!("Entry({})", self.generation))
    }
}

impl Entry {
    #[inline(always)]
    pub const fn nil() -> Self {
        Self {
            generation: EntryVersion::MAX,
        }
    }

    #[inline(always)]
    pub const fn is_nil(&self) -> bool {
        self.generation == EntryVersion::MAX
    }

    #[inline(always)]
    pub const fn of(generation: EntryVersion) -> Self {
        Self { generation }
    }

    /// True when this entry was taken against the generation currently
    /// reported by the map it came from.
    #[inline(always)]
    pub const fn is_current(&self, current_generation: EntryVersion) -> bool {
        !self.is_nil() && self.generation == current_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_entry_is_never_current() {
        let nil = Entry::nil();
        assert!(!nil.is_current(0));
        assert!(!nil.is_current(EntryVersion::MAX));
    }

    #[test]
    fn entry_is_current_only_for_matching_generation() {
        let entry = Entry::of(3);
        assert!(entry.is_current(3));
        assert!(!entry.is_current(4));
    }
}
