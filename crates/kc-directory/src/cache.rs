//! Client role cache.
//!
//! Caches each client's role list per `(cluster, clientKey)`. An entry is
//! loaded at most once until it is invalidated, and concurrent loads of the
//! same key share a single fetch.
//!
//! Each key maps to a shared `OnceCell`. Callers racing on an empty cell
//! wait on the one initializer; [`RoleCache::invalidate`] detaches the cell
//! from the map, so a fetch still in flight is delivered to its waiters but
//! never becomes visible to later readers.

use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio::sync::OnceCell;

use crate::cancel::CancellationToken;
use crate::cluster::ClusterStore;
use crate::config::DirectorySettings;
use crate::error::{DirectoryError, DirectoryResult};
use crate::gateway::Gateways;
use crate::model::{ClientKey, ClusterId, Role};

/// Roles of one client, in the server's order.
pub type Roles = Arc<[Role]>;

type Slot = Arc<OnceCell<DirectoryResult<Roles>>>;

/// State of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// Never loaded, invalidated, or a first load is still in flight.
    NotLoaded,
    /// Loaded; possibly empty.
    Loaded(Roles),
    /// The load failed; stays failed until invalidated.
    LoadFailed(DirectoryError),
}

/// Outcome of a bulk prime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimeReport {
    /// Keys whose roles are loaded.
    pub loaded: Vec<ClientKey>,
    /// Keys whose load failed.
    pub failed: Vec<(ClientKey, DirectoryError)>,
    /// Keys not issued because the prime was cancelled.
    pub skipped: Vec<ClientKey>,
}

/// Per-cluster, per-client role cache.
pub struct RoleCache {
    gateways: Arc<Gateways>,
    prime_parallelism: usize,
    entries: DashMap<(ClusterId, ClientKey), Slot>,
}

impl RoleCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(gateways: Arc<Gateways>, settings: &DirectorySettings) -> Self {
        Self {
            gateways,
            prime_parallelism: settings.prime_parallelism(),
            entries: DashMap::new(),
        }
    }

    /// Reads an entry without any I/O.
    #[must_use]
    pub fn get(&self, cluster_id: ClusterId, client_key: &str) -> CacheEntry {
        let Some(slot) = self
            .entries
            .get(&(cluster_id, client_key.to_string()))
            .map(|s| Arc::clone(s.value()))
        else {
            return CacheEntry::NotLoaded;
        };
        match slot.get() {
            Some(Ok(roles)) => CacheEntry::Loaded(Arc::clone(roles)),
            Some(Err(err)) => CacheEntry::LoadFailed(err.clone()),
            None => CacheEntry::NotLoaded,
        }
    }

    /// Returns the cached roles, fetching them on first use.
    ///
    /// A stored failure is returned as-is without a new fetch.
    ///
    /// ## Errors
    ///
    /// Returns the error of the (possibly shared) fetch.
    pub async fn ensure_loaded(
        &self,
        cluster_id: ClusterId,
        client_key: &str,
    ) -> DirectoryResult<Roles> {
        let slot = Arc::clone(
            self.entries
                .entry((cluster_id, client_key.to_string()))
                .or_default()
                .value(),
        );

        if slot.initialized() {
            tracing::trace!(cluster = %cluster_id, client = client_key, "Role cache hit");
        }
        slot.get_or_init(|| self.fetch(cluster_id, client_key))
            .await
            .clone()
    }

    async fn fetch(&self, cluster_id: ClusterId, client_key: &str) -> DirectoryResult<Roles> {
        tracing::debug!(cluster = %cluster_id, client = client_key, "Loading client roles");
        let result = match self.gateways.for_cluster(cluster_id) {
            Ok(gateway) => gateway.list_client_roles(client_key).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(roles) => Ok(roles.into()),
            Err(err) => {
                tracing::warn!(
                    cluster = %cluster_id,
                    client = client_key,
                    error = %err,
                    "Failed to load client roles"
                );
                Err(err)
            }
        }
    }

    /// Resets an entry to `NotLoaded`.
    pub fn invalidate(&self, cluster_id: ClusterId, client_key: &str) {
        if self
            .entries
            .remove(&(cluster_id, client_key.to_string()))
            .is_some()
        {
            tracing::debug!(cluster = %cluster_id, client = client_key, "Client roles invalidated");
        }
    }

    /// Drops every entry of a cluster.
    pub fn clear_cluster(&self, cluster_id: ClusterId) {
        let before = self.entries.len();
        self.entries.retain(|(id, _), _| *id != cluster_id);
        tracing::debug!(
            cluster = %cluster_id,
            dropped = before.saturating_sub(self.entries.len()),
            "Cluster role cache cleared"
        );
    }

    /// Disconnects a cluster: its entries are dropped along with its gateway.
    pub fn disconnect(&self, cluster_id: ClusterId) {
        self.clear_cluster(cluster_id);
        self.gateways.disconnect(cluster_id);
    }

    /// Reloads the cluster registry from a store and disconnects every
    /// cluster that was removed or retargeted.
    ///
    /// Returns the stale ids.
    ///
    /// ## Errors
    ///
    /// Propagates the store's error; the cache is left untouched then.
    pub async fn reload(&self, store: &dyn ClusterStore) -> DirectoryResult<Vec<ClusterId>> {
        let stale = self.gateways.reload(store).await?;
        for id in &stale {
            self.clear_cluster(*id);
        }
        Ok(stale)
    }

    /// Loads many clients' roles with bounded parallelism.
    ///
    /// Individual failures are recorded per key and do not fail the batch.
    /// After cancellation no further key is issued.
    pub async fn bulk_prime<I>(
        &self,
        cluster_id: ClusterId,
        client_keys: I,
        cancel: &CancellationToken,
    ) -> PrimeReport
    where
        I: IntoIterator<Item = ClientKey>,
    {
        let outcomes: Vec<(ClientKey, Option<DirectoryResult<Roles>>)> = stream::iter(client_keys)
            .map(|key| async move {
                if cancel.is_cancelled() {
                    return (key, None);
                }
                let result = self.ensure_loaded(cluster_id, &key).await;
                (key, Some(result))
            })
            .buffer_unordered(self.prime_parallelism)
            .collect()
            .await;

        let mut report = PrimeReport::default();
        for (key, outcome) in outcomes {
            match outcome {
                Some(Ok(_)) => report.loaded.push(key),
                Some(Err(err)) => report.failed.push((key, err)),
                None => report.skipped.push(key),
            }
        }
        report.loaded.sort();
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));
        report.skipped.sort();

        tracing::info!(
            cluster = %cluster_id,
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Client roles primed"
        );
        report
    }

    /// Number of keys with an entry (loaded, failed or in flight).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for RoleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleCache")
            .field("entries", &self.entries.len())
            .field("prime_parallelism", &self.prime_parallelism)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;
    use crate::cluster::{test_cluster, FileClusterStore};
    use crate::gateway::{memory_gateways, MemoryDirectory};
    use crate::model::Client;

    const C1: ClusterId = ClusterId(1);

    fn setup() -> (RoleCache, Arc<MemoryDirectory>) {
        let dir = Arc::new(MemoryDirectory::new());
        dir.seed_client(Client::new("app1"), &["read", "write"]);
        dir.seed_client(Client::new("app2"), &[]);
        let gateways = memory_gateways(vec![(test_cluster(1, "a"), Arc::clone(&dir))]);
        (RoleCache::new(gateways, &DirectorySettings::default()), dir)
    }

    #[tokio::test]
    async fn sequential_loads_fetch_once() {
        let (cache, dir) = setup();
        assert_eq!(cache.get(C1, "app1"), CacheEntry::NotLoaded);

        let first = cache.ensure_loaded(C1, "app1").await.unwrap();
        let second = cache.ensure_loaded(C1, "app1").await.unwrap();

        assert_eq!(first.len(), 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(dir.calls("list_client_roles"), 1);
        assert!(matches!(cache.get(C1, "app1"), CacheEntry::Loaded(r) if r.len() == 2));
    }

    #[tokio::test]
    async fn loaded_empty_is_distinct_from_not_loaded() {
        let (cache, _dir) = setup();

        cache.ensure_loaded(C1, "app2").await.unwrap();
        assert!(matches!(cache.get(C1, "app2"), CacheEntry::Loaded(r) if r.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_loads_coalesce() {
        let (cache, dir) = setup();
        dir.set_latency(Some(Duration::from_millis(50)));

        let results = join_all((0..8).map(|_| cache.ensure_loaded(C1, "app1"))).await;

        assert_eq!(dir.calls("list_client_roles"), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
    }

    #[tokio::test]
    async fn failures_are_sticky_until_invalidated() {
        let (cache, dir) = setup();
        dir.fail("list_client_roles:app1", DirectoryError::unreachable("down"));

        assert!(cache.ensure_loaded(C1, "app1").await.is_err());
        assert!(cache.ensure_loaded(C1, "app1").await.is_err());
        assert_eq!(dir.calls("list_client_roles"), 1);
        assert!(matches!(cache.get(C1, "app1"), CacheEntry::LoadFailed(e) if e.is_unreachable()));

        dir.clear_failures();
        cache.invalidate(C1, "app1");
        assert!(cache.ensure_loaded(C1, "app1").await.is_ok());
        assert_eq!(dir.calls("list_client_roles"), 2);
    }

    #[tokio::test]
    async fn invalidate_triggers_exactly_one_refetch() {
        let (cache, dir) = setup();
        cache.ensure_loaded(C1, "app1").await.unwrap();

        cache.invalidate(C1, "app1");
        assert_eq!(cache.get(C1, "app1"), CacheEntry::NotLoaded);
        cache.ensure_loaded(C1, "app1").await.unwrap();
        cache.ensure_loaded(C1, "app1").await.unwrap();

        assert_eq!(dir.calls("list_client_roles"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_during_flight_does_not_store() {
        let (cache, dir) = setup();
        dir.set_latency(Some(Duration::from_millis(50)));

        let load = cache.ensure_loaded(C1, "app1");
        let invalidate = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.invalidate(C1, "app1");
        };
        let (loaded, ()) = tokio::join!(load, invalidate);

        assert!(loaded.is_ok());
        assert_eq!(cache.get(C1, "app1"), CacheEntry::NotLoaded);
    }

    #[tokio::test]
    async fn bulk_prime_records_failures_per_key() {
        let (cache, dir) = setup();
        let keys = vec!["app1".to_string(), "app2".to_string(), "missing".to_string()];

        let report = cache.bulk_prime(C1, keys, &CancellationToken::new()).await;

        assert_eq!(report.loaded, vec!["app1", "app2"]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.is_not_found());
        assert_eq!(dir.calls("list_client_roles"), 3);
        assert!(matches!(cache.get(C1, "missing"), CacheEntry::LoadFailed(_)));
    }

    #[tokio::test]
    async fn cancelled_prime_issues_nothing() {
        let (cache, dir) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = cache
            .bulk_prime(C1, vec!["app1".to_string(), "app2".to_string()], &cancel)
            .await;

        assert_eq!(report.skipped.len(), 2);
        assert_eq!(dir.total_calls(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn clear_cluster_drops_entries() {
        let (cache, dir) = setup();
        cache.ensure_loaded(C1, "app1").await.unwrap();
        cache.ensure_loaded(C1, "app2").await.unwrap();

        cache.clear_cluster(C1);
        assert!(cache.is_empty());
        cache.ensure_loaded(C1, "app1").await.unwrap();
        assert_eq!(dir.calls("list_client_roles"), 3);
    }

    #[tokio::test]
    async fn disconnect_drops_entries_of_that_cluster_only() {
        let a = Arc::new(MemoryDirectory::new());
        let b = Arc::new(MemoryDirectory::new());
        for dir in [&a, &b] {
            dir.seed_client(Client::new("app1"), &["read"]);
        }
        let gateways = memory_gateways(vec![
            (test_cluster(1, "a"), Arc::clone(&a)),
            (test_cluster(2, "b"), Arc::clone(&b)),
        ]);
        let cache = RoleCache::new(gateways, &DirectorySettings::default());
        cache.ensure_loaded(C1, "app1").await.unwrap();
        cache.ensure_loaded(ClusterId(2), "app1").await.unwrap();

        cache.disconnect(C1);
        assert_eq!(cache.get(C1, "app1"), CacheEntry::NotLoaded);
        assert!(matches!(cache.get(ClusterId(2), "app1"), CacheEntry::Loaded(_)));

        cache.ensure_loaded(C1, "app1").await.unwrap();
        assert_eq!(a.calls("list_client_roles"), 2);
        assert_eq!(b.calls("list_client_roles"), 1);
    }

    #[tokio::test]
    async fn reload_clears_removed_clusters() {
        let (cache, dir) = setup();
        cache.ensure_loaded(C1, "app1").await.unwrap();

        let unchanged = FileClusterStore::from_clusters(vec![test_cluster(1, "a")]);
        assert!(cache.reload(&unchanged).await.unwrap().is_empty());
        assert!(matches!(cache.get(C1, "app1"), CacheEntry::Loaded(_)));

        let emptied = FileClusterStore::from_clusters(Vec::new());
        assert_eq!(cache.reload(&emptied).await.unwrap(), vec![C1]);
        assert_eq!(cache.get(C1, "app1"), CacheEntry::NotLoaded);
        assert!(cache.ensure_loaded(C1, "app1").await.unwrap_err().is_not_found());
        assert_eq!(dir.calls("list_client_roles"), 1);
    }
}
