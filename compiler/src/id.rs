// id.rs — Stable identifiers for optimizer artifacts
//
// AccessIds name one field or scalar variable within a stencil
// instantiation. StageIds and StencilIds are assigned once by the upstream
// access computation and survive every reordering, so stage-level
// dependencies can be queried after stages move between multi-stages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one field or scalar variable within an instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessId(pub u32);

/// Identity of a stage; stable across multi-stage reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub u32);

/// Identity of a stencil within an instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StencilId(pub u32);

impl fmt::Display for AccessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Allocator for fresh AccessIds. Produces monotonically increasing IDs so
/// that repeated runs over identical input mint identical identities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdAllocator {
    next_access: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start allocating after `id`, which must already be in use.
    pub fn reserve(&mut self, id: AccessId) {
        self.next_access = self.next_access.max(id.0 + 1);
    }

    pub fn alloc_access(&mut self) -> AccessId {
        let id = AccessId(self.next_access);
        self.next_access += 1;
        id
    }
}
