// metadata.rs — AccessId table shared by every stencil of an instantiation
//
// Maps AccessIds to names and kinds, and tracks version groups created by
// field versioning. A version group is ordered `[original, v1, v2, ...]`;
// only the first and the last version of a field are backed by allocated
// storage, the ones in between are demoted to temporaries.
//
// Preconditions: every AccessId referenced by the IR is registered here.
// Postconditions: minted AccessIds are never reused.
// Failure modes: minting a version of an unregistered AccessId panics
//                (an upstream pass produced a dangling identity).
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::id::{AccessId, IdAllocator};

/// What an AccessId names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    /// Field passed in by the caller.
    Field,
    /// Field allocated by the stencil itself.
    TemporaryField,
    LocalVariable,
    GlobalVariable,
}

impl AccessKind {
    pub fn is_field(self) -> bool {
        matches!(self, AccessKind::Field | AccessKind::TemporaryField)
    }
}

/// Registered name and kind of one AccessId.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessInfo {
    pub id: AccessId,
    pub name: String,
    pub kind: AccessKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct VariableVersions {
    groups: Vec<Vec<AccessId>>,
    group_of: BTreeMap<AccessId, usize>,
}

impl VariableVersions {
    fn group(&self, id: AccessId) -> Option<&Vec<AccessId>> {
        self.group_of.get(&id).map(|&g| &self.groups[g])
    }

    fn insert_group(&mut self, group: Vec<AccessId>) {
        let idx = self.groups.len();
        for &id in &group {
            self.group_of.insert(id, idx);
        }
        self.groups.push(group);
    }

    fn push_version(&mut self, of: AccessId, new: AccessId) {
        let idx = self.group_of[&of];
        self.groups[idx].push(new);
        self.group_of.insert(new, idx);
    }
}

/// Name/kind/version table for one stencil instantiation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "MetadataRepr", into = "MetadataRepr")]
pub struct StencilMetadata {
    pub stencil_name: String,
    pub file_name: String,
    accesses: BTreeMap<AccessId, AccessInfo>,
    versions: VariableVersions,
    /// Intermediate versions that no longer need allocated storage.
    temporaries: BTreeSet<AccessId>,
    ids: IdAllocator,
}

impl StencilMetadata {
    pub fn new(stencil_name: impl Into<String>) -> Self {
        StencilMetadata {
            stencil_name: stencil_name.into(),
            ..Default::default()
        }
    }

    pub fn add_field(&mut self, name: impl Into<String>) -> AccessId {
        self.add_access(name, AccessKind::Field)
    }

    pub fn add_temporary(&mut self, name: impl Into<String>) -> AccessId {
        self.add_access(name, AccessKind::TemporaryField)
    }

    pub fn add_variable(&mut self, name: impl Into<String>) -> AccessId {
        self.add_access(name, AccessKind::LocalVariable)
    }

    pub fn add_access(&mut self, name: impl Into<String>, kind: AccessKind) -> AccessId {
        let id = self.ids.alloc_access();
        self.register(AccessInfo {
            id,
            name: name.into(),
            kind,
        });
        id
    }

    fn register(&mut self, info: AccessInfo) {
        self.ids.reserve(info.id);
        self.accesses.insert(info.id, info);
    }

    pub fn contains(&self, id: AccessId) -> bool {
        self.accesses.contains_key(&id)
    }

    pub fn name(&self, id: AccessId) -> Option<&str> {
        self.accesses.get(&id).map(|info| info.name.as_str())
    }

    /// Name for messages; falls back to the raw id.
    pub fn display_name(&self, id: AccessId) -> String {
        self.name(id)
            .map(str::to_string)
            .unwrap_or_else(|| id.to_string())
    }

    pub fn kind(&self, id: AccessId) -> Option<AccessKind> {
        self.accesses.get(&id).map(|info| info.kind)
    }

    pub fn access_id_of(&self, name: &str) -> Option<AccessId> {
        self.accesses
            .values()
            .find(|info| info.name == name)
            .map(|info| info.id)
    }

    pub fn accesses(&self) -> impl Iterator<Item = &AccessInfo> {
        self.accesses.values()
    }

    // ── Versions ────────────────────────────────────────────────────────

    pub fn is_version(&self, id: AccessId) -> bool {
        self.versions
            .group(id)
            .is_some_and(|g| g.first() != Some(&id))
    }

    pub fn is_multi_versioned(&self, id: AccessId) -> bool {
        self.versions.group(id).is_some()
    }

    pub fn original_version_of(&self, id: AccessId) -> AccessId {
        self.versions
            .group(id)
            .and_then(|g| g.first().copied())
            .unwrap_or(id)
    }

    /// The version group containing `id`, original first.
    pub fn versions_of(&self, id: AccessId) -> Option<&[AccessId]> {
        self.versions.group(id).map(|g| g.as_slice())
    }

    /// Does `id` need allocated storage?
    pub fn is_allocated(&self, id: AccessId) -> bool {
        match self.kind(id) {
            Some(kind) => kind.is_field() && !self.temporaries.contains(&id),
            None => false,
        }
    }

    /// Mint a fresh version of `old` and register it under a derived name.
    ///
    /// The new identity is `<original>_<n>`, where `n` is the number of
    /// versions that exist before this call. The callers are responsible for
    /// rewriting references (see `rename::create_version_and_rename`).
    pub fn create_version(&mut self, old: AccessId) -> AccessId {
        let kind = self
            .kind(old)
            .unwrap_or_else(|| panic!("cannot version unregistered access {old}"));
        let new = self.ids.alloc_access();

        let name = match self.versions.group(old).cloned() {
            Some(group) => {
                let last = *group.last().expect("version groups are never empty");
                if kind.is_field() && group.first() != Some(&last) {
                    self.temporaries.insert(last);
                }
                let original = self.display_name(group[0]);
                self.versions.push_version(old, new);
                format!("{}_{}", original, group.len())
            }
            None => {
                self.versions.insert_group(vec![old, new]);
                format!("{}_1", self.display_name(old))
            }
        };

        self.accesses.insert(new, AccessInfo { id: new, name, kind });
        new
    }
}

// ── Serialized form ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MetadataRepr {
    #[serde(default)]
    stencil_name: String,
    #[serde(default)]
    file_name: String,
    #[serde(default)]
    accesses: Vec<AccessInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    versions: Vec<Vec<AccessId>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    temporaries: Vec<AccessId>,
}

impl From<MetadataRepr> for StencilMetadata {
    fn from(repr: MetadataRepr) -> Self {
        let mut md = StencilMetadata {
            stencil_name: repr.stencil_name,
            file_name: repr.file_name,
            ..Default::default()
        };
        for info in repr.accesses {
            md.register(info);
        }
        for group in repr.versions.into_iter().filter(|g| !g.is_empty()) {
            md.versions.insert_group(group);
        }
        md.temporaries = repr.temporaries.into_iter().collect();
        md
    }
}

impl From<StencilMetadata> for MetadataRepr {
    fn from(md: StencilMetadata) -> Self {
        MetadataRepr {
            stencil_name: md.stencil_name,
            file_name: md.file_name,
            accesses: md.accesses.into_values().collect(),
            versions: md.versions.groups,
            temporaries: md.temporaries.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_version_gets_suffix_one() {
        let mut md = StencilMetadata::new("hd");
        let u = md.add_field("u");
        let u1 = md.create_version(u);
        assert_eq!(md.name(u1), Some("u_1"));
        assert!(md.is_version(u1));
        assert!(!md.is_version(u));
        assert!(md.is_multi_versioned(u));
        assert_eq!(md.original_version_of(u1), u);
        assert_eq!(md.versions_of(u), Some(&[u, u1][..]));
    }

    #[test]
    fn later_versions_demote_intermediate_storage() {
        let mut md = StencilMetadata::new("hd");
        let u = md.add_field("u");
        let u1 = md.create_version(u);
        let u2 = md.create_version(u1);
        assert_eq!(md.name(u2), Some("u_2"));
        assert!(md.is_allocated(u));
        assert!(!md.is_allocated(u1));
        assert!(md.is_allocated(u2));
        assert_eq!(md.versions_of(u2), Some(&[u, u1, u2][..]));
    }

    #[test]
    fn variables_are_versioned_without_storage() {
        let mut md = StencilMetadata::new("hd");
        let t = md.add_variable("t");
        let t1 = md.create_version(t);
        assert_eq!(md.kind(t1), Some(AccessKind::LocalVariable));
        assert!(!md.is_allocated(t1));
    }

    #[test]
    fn minted_ids_follow_deserialized_ids() {
        let json = r#"{
            "stencil_name": "s",
            "accesses": [
                {"id": 4, "name": "a", "kind": "field"},
                {"id": 9, "name": "b", "kind": "temporary_field"}
            ]
        }"#;
        let mut md: StencilMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(md.access_id_of("b"), Some(AccessId(9)));
        let a1 = md.create_version(AccessId(4));
        assert_eq!(a1, AccessId(10));

        let back: StencilMetadata =
            serde_json::from_str(&serde_json::to_string(&md).unwrap()).unwrap();
        assert_eq!(back.versions_of(a1), Some(&[AccessId(4), a1][..]));
    }

    #[test]
    #[should_panic(expected = "unregistered")]
    fn versioning_unknown_access_panics() {
        StencilMetadata::new("s").create_version(AccessId(3));
    }
}
