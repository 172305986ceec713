//! Node identity registry.
//!
//! Interns canonical descriptor strings into [`NodeId`]s. The registry is
//! persisted in id order and reloaded at session start, so a descriptor maps
//! to the same id in every session that shares a cache directory.

use lasso::ThreadedRodeo;

use kiln_common::{InternalError, KilnResult, NodeId};

use crate::descriptor::{Descriptor, NodeKind};
use crate::error::CacheError;

/// Thread-safe descriptor interner.
///
/// Interning takes `&self`, so steps running in parallel can create nodes
/// lazily the first time they reference them.
pub struct NodeRegistry {
    rodeo: ThreadedRodeo<NodeId>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            rodeo: ThreadedRodeo::new(),
        }
    }

    /// Rebuilds a registry from persisted descriptors, in id order.
    ///
    /// Fails if a descriptor is malformed or appears twice, either of which
    /// means the cache was not written by this registry.
    pub fn from_descriptors(descriptors: &[String]) -> Result<Self, CacheError> {
        let registry = Self::new();
        for (index, text) in descriptors.iter().enumerate() {
            if Descriptor::parse(text).is_none() {
                return Err(CacheError::Corrupt {
                    reason: format!("malformed descriptor `{text}`"),
                });
            }
            let id = registry.rodeo.get_or_intern(text);
            if id.as_raw() as usize != index {
                return Err(CacheError::Corrupt {
                    reason: format!("descriptor `{text}` registered twice"),
                });
            }
        }
        Ok(registry)
    }

    /// Returns the id for `descriptor`, creating it on first use.
    pub fn intern(&self, descriptor: &Descriptor) -> NodeId {
        self.rodeo.get_or_intern(descriptor.to_string())
    }

    /// Returns the id for `descriptor` if it has been interned.
    pub fn get(&self, descriptor: &Descriptor) -> Option<NodeId> {
        self.rodeo.get(descriptor.to_string())
    }

    /// Resolves an id back to its descriptor.
    pub fn resolve(&self, id: NodeId) -> KilnResult<Descriptor> {
        self.rodeo
            .try_resolve(&id)
            .and_then(Descriptor::parse)
            .ok_or_else(|| InternalError::new(format!("unknown node {id}")))
    }

    /// Returns the canonical descriptor text for `id`, or the raw id when
    /// unknown. Intended for messages and logs.
    pub fn describe(&self, id: NodeId) -> String {
        self.rodeo
            .try_resolve(&id)
            .map(str::to_string)
            .unwrap_or_else(|| id.to_string())
    }

    /// Returns the kind of `id`, or `None` if the id is unknown.
    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        let text = self.rodeo.try_resolve(&id)?;
        if text.starts_with("input:") {
            Some(NodeKind::Input)
        } else {
            Some(NodeKind::Derived)
        }
    }

    /// Returns `true` if `id` was issued by this registry.
    pub fn contains_id(&self, id: NodeId) -> bool {
        (id.as_raw() as usize) < self.rodeo.len()
    }

    /// Returns the number of interned descriptors.
    pub fn len(&self) -> usize {
        self.rodeo.len()
    }

    /// Returns `true` if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.rodeo.is_empty()
    }

    /// Returns every descriptor in id order, for persistence.
    pub fn descriptors(&self) -> Vec<String> {
        (0..self.rodeo.len())
            .filter_map(|i| {
                let id = NodeId::from_raw(i as u32);
                self.rodeo.try_resolve(&id).map(str::to_string)
            })
            .collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_descriptor_same_id() {
        let registry = NodeRegistry::new();
        let a = registry.intern(&Descriptor::derived("value", "x"));
        let b = registry.intern(&Descriptor::derived("value", "x"));
        assert_eq!(a, b);
    }

    #[test]
    fn kind_distinguishes_ids() {
        let registry = NodeRegistry::new();
        let input = registry.intern(&Descriptor::input("item", "x"));
        let derived = registry.intern(&Descriptor::derived("item", "x"));
        assert_ne!(input, derived);
        assert_eq!(registry.kind(input), Some(NodeKind::Input));
        assert_eq!(registry.kind(derived), Some(NodeKind::Derived));
    }

    #[test]
    fn colon_in_query_does_not_collide() {
        let registry = NodeRegistry::new();
        let a = Descriptor::derived("parse", "file:x");
        let b = Descriptor::derived("parse:file", "x");
        let (ia, ib) = (registry.intern(&a), registry.intern(&b));
        assert_ne!(ia, ib);
        assert_eq!(registry.resolve(ib).unwrap(), b);
    }

    #[test]
    fn resolve_roundtrip() {
        let registry = NodeRegistry::new();
        let d = Descriptor::derived("emit", "total");
        let id = registry.intern(&d);
        assert_eq!(registry.resolve(id).unwrap(), d);
        assert_eq!(registry.describe(id), "derived:emit:total");
    }

    #[test]
    fn resolve_unknown_is_internal_error() {
        let registry = NodeRegistry::new();
        assert!(registry.resolve(NodeId::from_raw(3)).is_err());
        assert_eq!(registry.describe(NodeId::from_raw(3)), "n3");
        assert!(registry.kind(NodeId::from_raw(3)).is_none());
    }

    #[test]
    fn get_does_not_intern() {
        let registry = NodeRegistry::new();
        assert!(registry.get(&Descriptor::input("file", "a")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn ids_survive_reload() {
        let first = NodeRegistry::new();
        let a = first.intern(&Descriptor::input("file", "a.calc"));
        let b = first.intern(&Descriptor::derived("parse", "a.calc"));

        let second = NodeRegistry::from_descriptors(&first.descriptors()).unwrap();
        assert_eq!(second.intern(&Descriptor::input("file", "a.calc")), a);
        assert_eq!(second.intern(&Descriptor::derived("parse", "a.calc")), b);
        let c = second.intern(&Descriptor::derived("value", "x"));
        assert_eq!(c.as_raw(), 2);
    }

    #[test]
    fn reload_rejects_duplicates() {
        let descriptors = vec!["input:file:a".to_string(), "input:file:a".to_string()];
        assert!(NodeRegistry::from_descriptors(&descriptors).is_err());
    }

    #[test]
    fn reload_rejects_malformed() {
        let descriptors = vec!["nonsense".to_string()];
        assert!(NodeRegistry::from_descriptors(&descriptors).is_err());
    }
}
