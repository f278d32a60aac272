//! Owner-identity resolution
//!
//! Maps an ephemeral UI window back to the logical owner it belongs to. The
//! mapping is persisted (`ownerMap:` namespace) because a coordinator restart
//! must not orphan an open panel; everything else in the chain is a fallback
//! for requests whose window has no remembered owner.

use std::sync::Arc;

use async_trait::async_trait;
use statestore::{KvStore, StoreResult};
use tracing::{debug, warn};

use crate::domain::{OwnerId, WindowId};

const OWNER_MAP_NS: &str = "ownerMap:";

/// Where a request physically came from
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    /// Owner implied by the originating window, when the host supplies it
    pub origin_owner: Option<OwnerId>,

    /// Originating tab, for diagnostics only
    pub tab_id: Option<i64>,
}

/// Host view of the eligible top-level containers
#[async_trait]
pub trait ContainerDirectory: Send + Sync {
    /// The most recently focused eligible container
    async fn focused(&self) -> Option<OwnerId>;

    /// All eligible containers in enumeration order
    async fn enumerate(&self) -> Vec<OwnerId>;
}

/// Fixed directory, for single-container hosts and tests
#[derive(Default)]
pub struct StaticDirectory {
    pub focused: Option<OwnerId>,
    pub containers: Vec<OwnerId>,
}

#[async_trait]
impl ContainerDirectory for StaticDirectory {
    async fn focused(&self) -> Option<OwnerId> {
        self.focused.clone()
    }

    async fn enumerate(&self) -> Vec<OwnerId> {
        self.containers.clone()
    }
}

/// Resolves request identity through the persisted mapping and fallbacks
#[derive(Clone)]
pub struct OwnerResolver {
    store: KvStore,
    directory: Arc<dyn ContainerDirectory>,
}

impl OwnerResolver {
    pub fn new(store: KvStore, directory: Arc<dyn ContainerDirectory>) -> Self {
        Self { store, directory }
    }

    fn key(window: &WindowId) -> String {
        format!("{OWNER_MAP_NS}{window}")
    }

    /// Remember which owner an ephemeral window belongs to
    pub async fn register_window(&self, window: &WindowId, owner: &OwnerId) -> StoreResult<()> {
        debug!(window = %window, owner = %owner, "Registering window mapping");
        self.store.put_json(&Self::key(window), owner).await
    }

    /// Drop the mapping for a closed window, returning its owner if known
    pub async fn window_closed(&self, window: &WindowId) -> StoreResult<Option<OwnerId>> {
        let key = Self::key(window);
        let owner = self.store.get_json::<OwnerId>(&key).await?;
        if owner.is_some() {
            self.store.delete(&key).await?;
            debug!(window = %window, "Removed window mapping");
        }
        Ok(owner)
    }

    /// Remove every mapping pointing at an owner
    ///
    /// Used after hydrate resets a stale phase: the windows remembered for
    /// that owner belonged to a coordinator instance that no longer exists.
    pub async fn forget_owner(&self, owner: &OwnerId) -> StoreResult<usize> {
        let mut removed = 0;
        for key in self.store.keys(OWNER_MAP_NS).await? {
            if self.store.get_json::<OwnerId>(&key).await?.as_ref() == Some(owner) {
                self.store.delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// The owner mapped to a window, if any
    pub async fn lookup_window(&self, window: &WindowId) -> StoreResult<Option<OwnerId>> {
        self.store.get_json(&Self::key(window)).await
    }

    /// Resolve the owner a request is about
    ///
    /// Order: persisted window mapping, the candidate itself, the caller's
    /// originating owner, the focused container, the first enumerable
    /// container. `None` only when no container exists at all.
    pub async fn resolve(&self, candidate: Option<&str>, ctx: &CallerContext) -> Option<OwnerId> {
        if let Some(candidate) = candidate {
            match self.lookup_window(&WindowId::new(candidate)).await {
                Ok(Some(owner)) => return Some(owner),
                Ok(None) => {}
                Err(e) => {
                    warn!(%candidate, error = %e, "Window mapping lookup failed, treating candidate as owner");
                }
            }
            return Some(OwnerId::new(candidate));
        }

        if let Some(owner) = &ctx.origin_owner {
            return Some(owner.clone());
        }

        if let Some(owner) = self.directory.focused().await {
            return Some(owner);
        }

        self.directory.enumerate().await.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(directory: StaticDirectory) -> OwnerResolver {
        OwnerResolver::new(KvStore::in_memory(), Arc::new(directory))
    }

    #[tokio::test]
    async fn test_mapping_lifecycle() {
        let resolver = resolver(StaticDirectory::default());
        let window = WindowId::new("panel-7");
        let owner = OwnerId::new("owner-1");

        resolver.register_window(&window, &owner).await.unwrap();
        let resolved = resolver.resolve(Some("panel-7"), &CallerContext::default()).await;
        assert_eq!(resolved, Some(owner.clone()));

        let closed = resolver.window_closed(&window).await.unwrap();
        assert_eq!(closed, Some(owner));

        // Stale window id falls through to "candidate is the owner"
        let resolved = resolver.resolve(Some("panel-7"), &CallerContext::default()).await;
        assert_eq!(resolved, Some(OwnerId::new("panel-7")));
    }

    #[tokio::test]
    async fn test_caller_origin_fallback() {
        let resolver = resolver(StaticDirectory::default());
        let ctx = CallerContext {
            origin_owner: Some(OwnerId::new("origin")),
            tab_id: None,
        };

        assert_eq!(resolver.resolve(None, &ctx).await, Some(OwnerId::new("origin")));
    }

    #[tokio::test]
    async fn test_focused_then_first_container() {
        let with_focus = resolver(StaticDirectory {
            focused: Some(OwnerId::new("focused")),
            containers: vec![OwnerId::new("first"), OwnerId::new("second")],
        });
        assert_eq!(
            with_focus.resolve(None, &CallerContext::default()).await,
            Some(OwnerId::new("focused"))
        );

        let without_focus = resolver(StaticDirectory {
            focused: None,
            containers: vec![OwnerId::new("first"), OwnerId::new("second")],
        });
        assert_eq!(
            without_focus.resolve(None, &CallerContext::default()).await,
            Some(OwnerId::new("first"))
        );
    }

    #[tokio::test]
    async fn test_no_container_at_all() {
        let resolver = resolver(StaticDirectory::default());
        assert_eq!(resolver.resolve(None, &CallerContext::default()).await, None);
    }

    #[tokio::test]
    async fn test_forget_owner_sweeps_mappings() {
        let resolver = resolver(StaticDirectory::default());
        let owner = OwnerId::new("owner-1");

        resolver.register_window(&WindowId::new("w1"), &owner).await.unwrap();
        resolver.register_window(&WindowId::new("w2"), &owner).await.unwrap();
        resolver
            .register_window(&WindowId::new("w3"), &OwnerId::new("other"))
            .await
            .unwrap();

        let removed = resolver.forget_owner(&owner).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(resolver.lookup_window(&WindowId::new("w1")).await.unwrap(), None);
        assert!(resolver.lookup_window(&WindowId::new("w3")).await.unwrap().is_some());
    }
}
