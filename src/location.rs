//! Addresses into the knowledge base (§3 "Entities" / "Location").

use std::fmt;

use crate::value::Value;

/// One element of a [`Location`] past the leading entity name: either a
/// slot name or a reference to a specific value stored inside a slot.
#[derive(Clone, Debug)]
pub enum LocElem {
    Slot(String),
    ElementRef(Value),
}

impl PartialEq for LocElem {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LocElem::Slot(a), LocElem::Slot(b)) => a == b,
            (LocElem::ElementRef(a), LocElem::ElementRef(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for LocElem {}

impl std::hash::Hash for LocElem {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            LocElem::Slot(name) => name.hash(state),
            LocElem::ElementRef(value) => value.hash(state),
        }
    }
}

/// Whether a [`Location`] names a primitive entity, a query (entity, slot),
/// or a belief (entity, slot, value).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationKind {
    Entity,
    Query,
    Belief,
}

/// A non-empty address: a primitive-entity name followed by zero or more
/// [`LocElem`]s (§3). The empty tail addresses the entity itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    entity: String,
    path: Vec<LocElem>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.entity)?;
        for elem in &self.path {
            match elem {
                LocElem::Slot(name) => write!(f, ", {name}")?,
                LocElem::ElementRef(value) => write!(f, ", ={value:?}")?,
            }
        }
        write!(f, ">")
    }
}

impl Location {
    pub fn for_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            path: Vec::new(),
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    pub fn path(&self) -> &[LocElem] {
        &self.path
    }

    pub fn kind(&self) -> LocationKind {
        match self.path.last() {
            None => LocationKind::Entity,
            Some(LocElem::Slot(_)) => LocationKind::Query,
            Some(LocElem::ElementRef(_)) => LocationKind::Belief,
        }
    }

    pub fn is_query(&self) -> bool {
        self.kind() == LocationKind::Query
    }

    pub fn is_belief(&self) -> bool {
        self.kind() == LocationKind::Belief
    }

    pub fn push_slot(&mut self, slot: impl Into<String>) -> &mut Self {
        self.path.push(LocElem::Slot(slot.into()));
        self
    }

    pub fn push_element_ref(&mut self, value: Value) -> &mut Self {
        self.path.push(LocElem::ElementRef(value));
        self
    }

    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.push_slot(slot);
        self
    }

    pub fn with_element_ref(mut self, value: Value) -> Self {
        self.push_element_ref(value);
        self
    }

    /// The name of the slot this location is a query or belief for, i.e.
    /// the most recent [`LocElem::Slot`] on the path (walking from the
    /// tail, skipping any trailing `ElementRef`).
    pub fn last_slot(&self) -> Option<&str> {
        self.path.iter().rev().find_map(|elem| match elem {
            LocElem::Slot(name) => Some(name.as_str()),
            LocElem::ElementRef(_) => None,
        })
    }

    /// The value this location addresses, when it is a Belief.
    pub fn element_value(&self) -> Option<&Value> {
        match self.path.last() {
            Some(LocElem::ElementRef(value)) => Some(value),
            _ => None,
        }
    }

    /// The location one element shorter than `self` (the Query a Belief
    /// belongs to, or the Entity a single-slot Query belongs to).
    pub fn parent(&self) -> Option<Location> {
        if self.path.is_empty() {
            return None;
        }

        Some(Location {
            entity: self.entity.clone(),
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// All slot names appearing anywhere along the path, in order.
    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.path.iter().filter_map(|elem| match elem {
            LocElem::Slot(name) => Some(name.as_str()),
            LocElem::ElementRef(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        1 + self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_entity_query_belief() {
        let entity = Location::for_entity("bob");
        assert_eq!(entity.kind(), LocationKind::Entity);

        let query = Location::for_entity("bob").with_slot("livesin");
        assert_eq!(query.kind(), LocationKind::Query);

        let belief = Location::for_entity("bob")
            .with_slot("livesin")
            .with_element_ref(Value::Str("tokyo".into()));
        assert_eq!(belief.kind(), LocationKind::Belief);
    }

    #[test]
    fn parent_strips_last_element() {
        let belief = Location::for_entity("bob")
            .with_slot("livesin")
            .with_element_ref(Value::Str("tokyo".into()));

        let query = belief.parent().unwrap();
        assert_eq!(query.kind(), LocationKind::Query);
        assert_eq!(query.last_slot(), Some("livesin"));

        let entity = query.parent().unwrap();
        assert_eq!(entity.kind(), LocationKind::Entity);
        assert!(entity.parent().is_none());
    }
}
