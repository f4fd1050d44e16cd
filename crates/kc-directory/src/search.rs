//! Federated search across clusters.
//!
//! One query fans out to every target cluster with bounded parallelism and
//! a per-cluster timeout. A cluster that errors or times out contributes no
//! results and is reported in [`SearchOutcome::failed`]; it never empties
//! the results of the clusters that answered. Results keep the order of the
//! cluster set, and within a cluster the server's native order.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::cluster::Cluster;
use crate::config::DirectorySettings;
use crate::error::{DirectoryError, DirectoryResult};
use crate::gateway::{DirectoryGateway, Gateways};
use crate::model::{Client, ClusterId, Role, SearchType, User};

/// Matched entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SearchData {
    /// A user.
    User(User),
    /// A client.
    Client(Client),
    /// A realm role.
    Role(Role),
}

impl SearchData {
    /// Display label of the matched entity.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::User(u) => &u.username,
            Self::Client(c) => &c.client_key,
            Self::Role(r) => &r.name,
        }
    }
}

/// One match, tagged with the cluster it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    /// Source cluster.
    pub cluster_id: ClusterId,
    /// Source cluster display name.
    pub cluster_name: String,
    /// Source realm.
    pub realm: String,
    /// Type searched for.
    pub entity_type: SearchType,
    /// The matched entity.
    #[serde(flatten)]
    pub data: SearchData,
}

/// A cluster that contributed no results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterFailure {
    /// The cluster.
    pub cluster_id: ClusterId,
    /// Why it failed.
    pub error: DirectoryError,
}

/// Merged outcome of a federated search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Matches in cluster-set order.
    pub results: Vec<SearchResult>,
    /// Clusters that errored, timed out, were unknown or were not queried
    /// because the search was cancelled.
    pub failed: Vec<ClusterFailure>,
}

impl SearchOutcome {
    /// Ids of the failed clusters.
    #[must_use]
    pub fn failed_clusters(&self) -> Vec<ClusterId> {
        self.failed.iter().map(|f| f.cluster_id).collect()
    }
}

/// Health of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason")]
pub enum HealthStatus {
    /// The realm answered.
    Healthy,
    /// The cluster answered with an error.
    Unhealthy(String),
    /// The cluster could not be reached in time.
    Unreachable(String),
}

/// Health probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterHealth {
    /// The cluster.
    pub cluster_id: ClusterId,
    /// Display name (empty for unknown ids).
    pub cluster_name: String,
    /// Probe outcome.
    pub status: HealthStatus,
}

/// Fans queries out to clusters.
#[derive(Debug)]
pub struct FederatedSearch {
    gateways: Arc<Gateways>,
    timeout: Duration,
    parallelism: usize,
}

impl FederatedSearch {
    /// Creates a search over the gateways' registry.
    #[must_use]
    pub fn new(gateways: Arc<Gateways>, settings: &DirectorySettings) -> Self {
        Self {
            gateways,
            timeout: settings.search_timeout(),
            parallelism: settings.search_parallelism(),
        }
    }

    /// Searches `term` (case-insensitive substring) across clusters.
    ///
    /// `cluster_ids` defaults to every registered cluster. Users match on
    /// username or email, clients on key or name, roles on realm role name.
    pub async fn search(
        &self,
        term: &str,
        search_type: SearchType,
        cluster_ids: Option<&[ClusterId]>,
        cancel: &CancellationToken,
    ) -> SearchOutcome {
        let (clusters, missing) = self.gateways.registry().resolve(cluster_ids);
        let needle = term.to_lowercase();

        let per_cluster: Vec<(ClusterId, DirectoryResult<Vec<SearchResult>>)> =
            stream::iter(clusters)
                .map(|cluster| {
                    let needle = needle.as_str();
                    async move {
                        let result =
                            self.query_cluster(&cluster, needle, search_type, cancel).await;
                        (cluster.id, result)
                    }
                })
                .buffered(self.parallelism)
                .collect()
                .await;

        let mut outcome = SearchOutcome::default();
        for (cluster_id, result) in per_cluster {
            match result {
                Ok(results) => outcome.results.extend(results),
                Err(error) => {
                    tracing::warn!(
                        cluster = %cluster_id,
                        %search_type,
                        error = %error,
                        "Cluster search failed"
                    );
                    outcome.failed.push(ClusterFailure { cluster_id, error });
                }
            }
        }
        for cluster_id in missing {
            outcome.failed.push(ClusterFailure {
                cluster_id,
                error: DirectoryError::not_found("Cluster", cluster_id.to_string()),
            });
        }

        tracing::info!(
            %search_type,
            results = outcome.results.len(),
            failed = outcome.failed.len(),
            "Federated search complete"
        );
        outcome
    }

    async fn query_cluster(
        &self,
        cluster: &Cluster,
        needle: &str,
        search_type: SearchType,
        cancel: &CancellationToken,
    ) -> DirectoryResult<Vec<SearchResult>> {
        crate::cancel::check(cancel)?;
        let gateway = self.gateways.connect(cluster)?;
        let matches = self
            .with_timeout(fetch_matches(gateway.as_ref(), needle, search_type))
            .await?;

        Ok(matches
            .into_iter()
            .map(|data| SearchResult {
                cluster_id: cluster.id,
                cluster_name: cluster.name.clone(),
                realm: cluster.realm.clone(),
                entity_type: search_type,
                data,
            })
            .collect())
    }

    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = DirectoryResult<T>>,
    ) -> DirectoryResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                DirectoryError::unreachable(format!("timed out after {:?}", self.timeout))
            })?
    }

    /// Probes the health of clusters, with the same fan-out rules as search.
    pub async fn probe_health(
        &self,
        cluster_ids: Option<&[ClusterId]>,
        cancel: &CancellationToken,
    ) -> Vec<ClusterHealth> {
        let (clusters, missing) = self.gateways.registry().resolve(cluster_ids);

        let mut report: Vec<ClusterHealth> = stream::iter(clusters)
            .map(|cluster| async move {
                let result = match crate::cancel::check(cancel) {
                    Ok(()) => match self.gateways.connect(&cluster) {
                        Ok(gateway) => self.with_timeout(gateway.health()).await,
                        Err(err) => Err(err),
                    },
                    Err(err) => Err(err),
                };
                let status = match result {
                    Ok(()) => HealthStatus::Healthy,
                    Err(err) if err.is_unreachable() => HealthStatus::Unreachable(err.to_string()),
                    Err(err) => HealthStatus::Unhealthy(err.to_string()),
                };
                tracing::debug!(cluster = %cluster.id, ?status, "Cluster probed");
                ClusterHealth {
                    cluster_id: cluster.id,
                    cluster_name: cluster.name,
                    status,
                }
            })
            .buffered(self.parallelism)
            .collect()
            .await;

        report.extend(missing.into_iter().map(|cluster_id| ClusterHealth {
            cluster_id,
            cluster_name: String::new(),
            status: HealthStatus::Unhealthy(format!("cluster {cluster_id} is not registered")),
        }));
        report
    }
}

async fn fetch_matches(
    gateway: &dyn DirectoryGateway,
    needle: &str,
    search_type: SearchType,
) -> DirectoryResult<Vec<SearchData>> {
    let hit = |value: &str| value.to_lowercase().contains(needle);
    Ok(match search_type {
        SearchType::User => gateway
            .list_users()
            .await?
            .into_iter()
            .filter(|u| hit(&u.username) || u.email.as_deref().is_some_and(hit))
            .map(SearchData::User)
            .collect(),
        SearchType::Client => gateway
            .list_clients()
            .await?
            .into_iter()
            .filter(|c| hit(&c.client_key) || c.name.as_deref().is_some_and(hit))
            .map(SearchData::Client)
            .collect(),
        SearchType::Role => gateway
            .list_realm_roles()
            .await?
            .into_iter()
            .filter(|r| hit(&r.name))
            .map(SearchData::Role)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::test_cluster;
    use crate::gateway::{memory_gateways, MemoryDirectory};

    fn user(name: &str, email: Option<&str>) -> User {
        User {
            username: name.to_string(),
            email: email.map(str::to_string),
            enabled: true,
            ..User::default()
        }
    }

    fn three_clusters() -> (FederatedSearch, Vec<Arc<MemoryDirectory>>) {
        let dirs: Vec<Arc<MemoryDirectory>> =
            (0..3).map(|_| Arc::new(MemoryDirectory::new())).collect();
        dirs[0].seed_user(user("alice", Some("alice@a.example")));
        dirs[0].seed_user(user("bob", None));
        dirs[1].seed_user(user("Alicia", None));
        dirs[2].seed_user(user("carol", Some("ALICE.backup@c.example")));

        let gateways = memory_gateways(vec![
            (test_cluster(1, "a"), Arc::clone(&dirs[0])),
            (test_cluster(2, "b"), Arc::clone(&dirs[1])),
            (test_cluster(3, "c"), Arc::clone(&dirs[2])),
        ]);
        (FederatedSearch::new(gateways, &DirectorySettings::default()), dirs)
    }

    fn names(outcome: &SearchOutcome) -> Vec<(u32, &str)> {
        outcome
            .results
            .iter()
            .map(|r| (r.cluster_id.0, r.data.label()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_cluster_order() {
        let (search, dirs) = three_clusters();
        dirs[0].set_latency(Some(Duration::from_millis(300)));
        dirs[1].set_latency(Some(Duration::from_millis(100)));

        let outcome = search
            .search("ALI", SearchType::User, None, &CancellationToken::new())
            .await;

        assert_eq!(names(&outcome), vec![(1, "alice"), (2, "Alicia"), (3, "carol")]);
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_cluster_does_not_hide_others() {
        let (search, dirs) = three_clusters();
        dirs[1].set_latency(Some(Duration::from_secs(60)));

        let outcome = search
            .search(
                "ali",
                SearchType::User,
                Some(&[ClusterId(1), ClusterId(2)]),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(names(&outcome), vec![(1, "alice")]);
        assert_eq!(outcome.failed_clusters(), vec![ClusterId(2)]);
        assert!(outcome.failed[0].error.is_unreachable());
    }

    #[tokio::test]
    async fn unknown_and_failing_clusters_are_reported() {
        let (search, dirs) = three_clusters();
        dirs[2].set_unreachable(true);

        let outcome = search
            .search(
                "",
                SearchType::User,
                Some(&[ClusterId(3), ClusterId(1), ClusterId(42)]),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failed_clusters(), vec![ClusterId(3), ClusterId(42)]);
        assert!(outcome.failed[1].error.is_not_found());
    }

    #[tokio::test]
    async fn clients_match_key_or_name() {
        let (search, dirs) = three_clusters();
        let mut named = Client::new("svc-7");
        named.name = Some("Billing Portal".to_string());
        dirs[0].seed_client(named, &[]);
        dirs[0].seed_client(Client::new("billing-api"), &[]);
        dirs[0].seed_client(Client::new("crm"), &[]);
        dirs[1].seed_realm_roles(&["billing-admin"]);

        let clients = search
            .search("billing", SearchType::Client, Some(&[ClusterId(1)]), &CancellationToken::new())
            .await;
        assert_eq!(names(&clients), vec![(1, "svc-7"), (1, "billing-api")]);

        let roles = search
            .search("Billing", SearchType::Role, None, &CancellationToken::new())
            .await;
        assert_eq!(names(&roles), vec![(2, "billing-admin")]);
        assert_eq!(roles.results[0].cluster_name, "b");
    }

    #[tokio::test]
    async fn cancelled_search_queries_nothing() {
        let (search, dirs) = three_clusters();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = search.search("a", SearchType::User, None, &cancel).await;

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.failed.len(), 3);
        assert!(outcome.failed.iter().all(|f| f.error == DirectoryError::Cancelled));
        assert!(dirs.iter().all(|d| d.total_calls() == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_classifies_clusters() {
        let (search, dirs) = three_clusters();
        dirs[1].set_unreachable(true);
        dirs[2].fail("health", DirectoryError::Unauthorized("bad credentials".to_string()));

        let report = search
            .probe_health(
                Some(&[ClusterId(1), ClusterId(2), ClusterId(3), ClusterId(9)]),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.len(), 4);
        assert_eq!(report[0].status, HealthStatus::Healthy);
        assert!(matches!(report[1].status, HealthStatus::Unreachable(_)));
        assert!(matches!(report[2].status, HealthStatus::Unhealthy(_)));
        assert_eq!(report[3].cluster_id, ClusterId(9));
    }
}
