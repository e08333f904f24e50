//! Lazy, exactly-once policy-node creation.
//!
//! Nodes are created on first access per controller identifier and cached for
//! the registry's lifetime. Creation is guarded by a single mutex so two
//! requests racing on the same controller's first access cannot produce
//! divergent duplicate nodes. The registry holds the strong references; the
//! weak parent handles inside [`PolicyNode`] stay valid as long as the
//! registry (or any other owner of the parent `Arc`) is alive.

use crate::policy::PolicyNode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Keyed store of per-controller policy nodes.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    nodes: Mutex<HashMap<String, Arc<PolicyNode>>>,
}

impl PolicyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The node for `controller`, if one was created already.
    #[must_use]
    pub fn get(&self, controller: &str) -> Option<Arc<PolicyNode>> {
        self.lock().get(controller).cloned()
    }

    /// The node for `controller`, created on first access.
    ///
    /// The parent handle is only consulted at creation time; later calls for
    /// the same controller return the existing node unchanged, whatever
    /// parent they pass.
    pub fn get_or_create(
        &self,
        controller: &str,
        parent: Option<&Arc<PolicyNode>>,
    ) -> Arc<PolicyNode> {
        let mut nodes = self.lock();
        if let Some(existing) = nodes.get(controller) {
            return Arc::clone(existing);
        }
        let node = PolicyNode::new(parent);
        nodes.insert(controller.to_string(), Arc::clone(&node));
        node
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<PolicyNode>>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::policy::SkipOptions;

    #[test]
    fn test_first_access_creates_and_caches() {
        let registry = PolicyRegistry::new();

        let first = registry.get_or_create("posts", None);
        let second = registry.get_or_create("posts", None);

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_get_before_creation_is_none() {
        let registry = PolicyRegistry::new();

        assert!(registry.get("posts").is_none());
        registry.get_or_create("posts", None);
        assert!(registry.get("posts").is_some());
    }

    #[test]
    fn test_registry_keeps_parent_alive_for_children() {
        let registry = PolicyRegistry::new();

        {
            let app = registry.get_or_create("application", None);
            app.skip_authentication(SkipOptions::only(["health"])).unwrap();
            let _posts = registry.get_or_create("posts", Some(&app));
            // `app` goes out of scope here; the registry still owns it.
        }

        let posts = registry.get("posts").expect("cached node");
        assert!(posts.is_skipped("health"));
    }

    #[test]
    fn test_concurrent_first_access_creates_one_node() {
        let registry = Arc::new(PolicyRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_or_create("posts", None))
            })
            .collect();

        let nodes: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread join"))
            .collect();

        let first = nodes.first().expect("at least one node");
        assert!(nodes.iter().all(|node| Arc::ptr_eq(first, node)));
    }
}
