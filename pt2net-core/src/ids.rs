//! Interned identifiers for network and schedule entities.
//!
//! Identifiers arrive from input artifacts (CSV/GTFS rows, config) as plain
//! strings, but routing and candidate generation look them up constantly in
//! their inner loops. We intern each kind of identifier to a small integer
//! once at construction time and keep the string form only for I/O
//! boundaries (loaders, reports, GeoJSON export) and for the deterministic
//! lexicographic tie-break the router needs.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use ahash::HashMap;

/// Marker trait distinguishing one identifier namespace from another so
/// `Id<Node>` and `Id<Link>` can't be mixed up at compile time.
pub trait IdKind: 'static {
    const KIND: &'static str;
}

pub struct NodeKind;
pub struct LinkKind;
pub struct StopFacilityKind;
pub struct RouteKind;
pub struct LineKind;
pub struct ShapeKind;

impl IdKind for NodeKind {
    const KIND: &'static str = "node";
}
impl IdKind for LinkKind {
    const KIND: &'static str = "link";
}
impl IdKind for StopFacilityKind {
    const KIND: &'static str = "stop facility";
}
impl IdKind for RouteKind {
    const KIND: &'static str = "route";
}
impl IdKind for LineKind {
    const KIND: &'static str = "line";
}
impl IdKind for ShapeKind {
    const KIND: &'static str = "shape";
}

/// An interned identifier. Cheap to copy, hash and compare; the numeric
/// value is only meaningful relative to the `Interner<K>` that produced it.
pub struct Id<K: IdKind>(u32, PhantomData<K>);

impl<K: IdKind> Id<K> {
    #[must_use]
    pub(crate) const fn from_raw(value: u32) -> Self {
        Self(value, PhantomData)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl<K: IdKind> Clone for Id<K> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K: IdKind> Copy for Id<K> {}
impl<K: IdKind> PartialEq for Id<K> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<K: IdKind> Eq for Id<K> {}
impl<K: IdKind> Hash for Id<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}
impl<K: IdKind> PartialOrd for Id<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<K: IdKind> Ord for Id<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}
impl<K: IdKind> fmt::Debug for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", K::KIND, self.0)
    }
}

pub type NodeId = Id<NodeKind>;
pub type LinkId = Id<LinkKind>;
pub type StopFacilityId = Id<StopFacilityKind>;
pub type RouteId = Id<RouteKind>;
pub type LineId = Id<LineKind>;
pub type ShapeId = Id<ShapeKind>;

/// Bidirectional string <-> small-integer mapping for one identifier kind.
#[derive(Debug, Default)]
pub struct Interner<K: IdKind> {
    to_id: HashMap<Arc<str>, Id<K>>,
    to_str: Vec<Arc<str>>,
}

impl<K: IdKind> Interner<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            to_id: HashMap::default(),
            to_str: Vec::new(),
        }
    }

    /// Interns `value`, returning its id. Re-interning the same string
    /// always returns the same id.
    pub fn intern(&mut self, value: &str) -> Id<K> {
        if let Some(id) = self.to_id.get(value) {
            return *id;
        }
        let id = Id::from_raw(u32::try_from(self.to_str.len()).expect("id space exhausted"));
        let arc: Arc<str> = Arc::from(value);
        self.to_str.push(arc.clone());
        self.to_id.insert(arc, id);
        id
    }

    #[must_use]
    pub fn get(&self, value: &str) -> Option<Id<K>> {
        self.to_id.get(value).copied()
    }

    /// Resolves an id back to its original string form. Panics if `id` was
    /// not produced by this interner, which would indicate a bug rather
    /// than bad input.
    #[must_use]
    pub fn resolve(&self, id: Id<K>) -> &str {
        &self.to_str[id.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.to_str.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_str.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = Id<K>> + '_ {
        (0..self.to_str.len()).map(|i| Id::from_raw(u32::try_from(i).unwrap()))
    }

    /// Deterministic tie-break used by the router: lower identifier
    /// *string*, not lower interned integer (insertion order is an
    /// implementation detail and must not leak into routing outcomes).
    #[must_use]
    pub fn lexicographic_order(&self, a: Id<K>, b: Id<K>) -> std::cmp::Ordering {
        self.resolve(a).cmp(self.resolve(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let mut interner: Interner<LinkKind> = Interner::new();
        let a = interner.intern("link_1");
        let b = interner.intern("link_1");
        let c = interner.intern("link_2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.resolve(a), "link_1");
    }

    #[test]
    fn lexicographic_tie_break_ignores_insertion_order() {
        let mut interner: Interner<LinkKind> = Interner::new();
        // interned first, so its raw id is smaller, but "link_b" > "link_a"
        let link_b = interner.intern("link_b");
        // interned second, larger raw id, but lexicographically smaller
        let link_a = interner.intern("link_a");
        assert_eq!(
            interner.lexicographic_order(link_a, link_b),
            std::cmp::Ordering::Less
        );
    }
}
