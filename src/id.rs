//! `ClassId` and `PatternId` — the two integer keys the constraint solver
//! reasons about. Unlike a typical scene-graph node id these are never
//! string-interned: names are advisory display data, ids are the semantic
//! key (see the database invariants in the data model).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an object class (e.g. "wall-corner"). Advisory names live in
/// `ObjectDatabase`; the id is what patterns and domains actually compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub i64);

impl ClassId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Identifies a `Pattern`. Independent of `ClassId` — many patterns may
/// share a `class_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(pub i64);

impl PatternId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pattern#{}", self.0)
    }
}

/// Monotone id allocator. `ObjectDatabase` keeps one of these per id space
/// so freshly created classes/patterns never collide with loaded ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdAllocator {
    next: i64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Restore the allocator after a database load: the next id must be
    /// strictly greater than every id already in use.
    pub fn resume_after(max_seen: i64) -> Self {
        Self {
            next: max_seen + 1,
        }
    }

    pub fn alloc(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn peek_next(&self) -> i64 {
        self.next
    }
}

/// Allocates fresh, process-unique placement node ids for the scene-placement
/// host contract. Kept separate from `IdAllocator` because placement ids
/// share no namespace with `ClassId`/`PatternId`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeIdAllocator {
    next: i64,
}

impl NodeIdAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn alloc(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        id
    }
}
