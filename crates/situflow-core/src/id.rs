use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::sync::atomic::{AtomicU64, Ordering};

new_key_type! {
    /// Identifies a situation in a container's arena.
    pub struct SituationId;
}

/// Identifies a container. Situations remember the container they were
/// bound to so they cannot be driven by two containers at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub u64);

impl ContainerId {
    /// Allocate a fresh, process-unique container id.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_ids_are_unique() {
        let a = ContainerId::next();
        let b = ContainerId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn situation_ids_are_hashable() {
        use slotmap::SlotMap;
        use std::collections::HashMap;
        let mut sm = SlotMap::<SituationId, ()>::with_key();
        let a = sm.insert(());
        let mut map = HashMap::new();
        map.insert(a, "home");
        assert_eq!(map[&a], "home");
    }
}
