//! Operator session state for one cluster view.
//!
//! At most one dialog is open at a time; the open dialog carries its own
//! draft state, so e.g. an assignment draft cannot outlive its dialog.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::assignment::{needs_refresh, AssignmentCoordinator, AssignmentOutcome, AssignmentRequest};
use crate::cache::{RoleCache, Roles};
use crate::error::{DirectoryError, DirectoryResult};
use crate::model::{ClientKey, ClusterId, EntityType, PrincipalRef};

/// The dialog currently shown, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "dialog", rename_all = "snake_case")]
pub enum DialogMode {
    /// No dialog.
    #[default]
    Closed,
    /// Editing a principal's desired roles.
    AssignRoles {
        /// The request being edited.
        draft: AssignmentRequest,
    },
    /// Creating an entity.
    Create {
        /// Type being created.
        entity_type: EntityType,
    },
    /// Picking entities to export.
    Export {
        /// Type being exported.
        entity_type: EntityType,
        /// Selected ids.
        selected: BTreeSet<String>,
    },
    /// Importing a payload.
    Import {
        /// Type being imported.
        entity_type: EntityType,
    },
    /// Showing a client secret.
    ClientSecret {
        /// The client.
        client_key: ClientKey,
    },
}

impl DialogMode {
    /// Checks whether a dialog is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// State of one cluster view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSession {
    cluster_id: ClusterId,
    active_tab: EntityType,
    search_term: String,
    expanded_clients: BTreeSet<ClientKey>,
    stale_principals: BTreeSet<PrincipalRef>,
    dialog: DialogMode,
}

impl ClusterSession {
    /// Creates a session showing users.
    #[must_use]
    pub fn new(cluster_id: ClusterId) -> Self {
        Self {
            cluster_id,
            active_tab: EntityType::User,
            search_term: String::new(),
            expanded_clients: BTreeSet::new(),
            stale_principals: BTreeSet::new(),
            dialog: DialogMode::Closed,
        }
    }

    /// Cluster of this view.
    #[must_use]
    pub const fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    /// Current tab.
    #[must_use]
    pub const fn active_tab(&self) -> EntityType {
        self.active_tab
    }

    /// Switches tab; the filter term is per tab and is cleared.
    pub fn select_tab(&mut self, tab: EntityType) {
        if self.active_tab != tab {
            self.active_tab = tab;
            self.search_term.clear();
        }
    }

    /// Filter term of the current tab.
    #[must_use]
    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    /// Sets the filter term.
    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search_term = term.into();
    }

    /// The open dialog.
    #[must_use]
    pub const fn dialog(&self) -> &DialogMode {
        &self.dialog
    }

    /// Opens a dialog.
    ///
    /// ## Errors
    ///
    /// Returns `Invalid` if another dialog is already open.
    pub fn open(&mut self, mode: DialogMode) -> DirectoryResult<()> {
        if self.dialog.is_open() {
            return Err(DirectoryError::invalid("another dialog is already open"));
        }
        self.dialog = mode;
        Ok(())
    }

    /// Closes the open dialog, returning it.
    pub fn close(&mut self) -> DialogMode {
        std::mem::take(&mut self.dialog)
    }

    /// Opens the assignment dialog seeded with the roles the principal
    /// holds on the cluster.
    ///
    /// ## Errors
    ///
    /// Returns `Invalid` if another dialog is already open (nothing is
    /// fetched then), or the error of loading the mappings.
    pub async fn begin_assignment(
        &mut self,
        coordinator: &AssignmentCoordinator,
        principal: PrincipalRef,
    ) -> DirectoryResult<()> {
        if self.dialog.is_open() {
            return Err(DirectoryError::invalid("another dialog is already open"));
        }
        let draft = coordinator.load_draft(self.cluster_id, principal).await?;
        self.open(DialogMode::AssignRoles { draft })
    }

    /// The assignment draft, while the assignment dialog is open.
    pub fn assignment_draft(&mut self) -> Option<&mut AssignmentRequest> {
        match &mut self.dialog {
            DialogMode::AssignRoles { draft } => Some(draft),
            _ => None,
        }
    }

    /// Closes the assignment dialog after submission, marking the principal
    /// stale if anything was applied. The dialog stays open when the
    /// submission failed entirely so the operator can retry.
    pub fn finish_assignment(&mut self, result: &DirectoryResult<AssignmentOutcome>) {
        let DialogMode::AssignRoles { draft } = &self.dialog else {
            return;
        };
        if needs_refresh(result) {
            self.stale_principals.insert(draft.principal().clone());
        }
        if result.is_ok() || needs_refresh(result) {
            self.dialog = DialogMode::Closed;
        }
    }

    /// Takes the principals whose role view must be reloaded.
    pub fn take_stale_principals(&mut self) -> BTreeSet<PrincipalRef> {
        std::mem::take(&mut self.stale_principals)
    }

    /// Toggles an id in the export selection.
    ///
    /// Returns whether the id is selected afterwards, or `None` if the export
    /// dialog is not open.
    pub fn toggle_export_selection(&mut self, id: &str) -> Option<bool> {
        let DialogMode::Export { selected, .. } = &mut self.dialog else {
            return None;
        };
        if selected.remove(id) {
            Some(false)
        } else {
            selected.insert(id.to_string());
            Some(true)
        }
    }

    /// Expands a client row, loading its roles through the cache.
    ///
    /// ## Errors
    ///
    /// Returns the cache's load error; the row stays expanded.
    pub async fn expand_client(
        &mut self,
        cache: &RoleCache,
        client_key: &str,
    ) -> DirectoryResult<Roles> {
        self.expanded_clients.insert(client_key.to_string());
        cache.ensure_loaded(self.cluster_id, client_key).await
    }

    /// Collapses a client row.
    pub fn collapse_client(&mut self, client_key: &str) {
        self.expanded_clients.remove(client_key);
    }

    /// Expanded client rows.
    #[must_use]
    pub const fn expanded_clients(&self) -> &BTreeSet<ClientKey> {
        &self.expanded_clients
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cluster::test_cluster;
    use crate::config::DirectorySettings;
    use crate::error::{FailedTarget, PartialFailure};
    use crate::gateway::{memory_gateways, MemoryDirectory};
    use crate::model::{Client, User};

    struct Fixture {
        dir: Arc<MemoryDirectory>,
        cache: Arc<RoleCache>,
        coordinator: AssignmentCoordinator,
        alice: PrincipalRef,
    }

    fn fixture() -> Fixture {
        let dir = Arc::new(MemoryDirectory::new());
        dir.seed_realm_roles(&["viewer", "editor"]);
        dir.seed_client(Client::new("app1"), &["read"]);
        let mut alice = User {
            username: "alice".to_string(),
            ..User::default()
        };
        alice.realm_roles.insert("editor".to_string());
        let alice = PrincipalRef::User(dir.seed_user(alice));

        let gateways = memory_gateways(vec![(test_cluster(1, "a"), Arc::clone(&dir))]);
        let cache = Arc::new(RoleCache::new(Arc::clone(&gateways), &DirectorySettings::default()));
        let coordinator = AssignmentCoordinator::new(gateways, Arc::clone(&cache));
        Fixture {
            dir,
            cache,
            coordinator,
            alice,
        }
    }

    #[tokio::test]
    async fn only_one_dialog_at_a_time() {
        let f = fixture();
        let mut session = ClusterSession::new(ClusterId(1));
        session
            .open(DialogMode::Create {
                entity_type: EntityType::Client,
            })
            .unwrap();

        assert!(session.begin_assignment(&f.coordinator, f.alice.clone()).await.is_err());
        assert!(session.assignment_draft().is_none());
        assert_eq!(f.dir.calls("role_mappings"), 0);

        session.close();
        session.begin_assignment(&f.coordinator, f.alice.clone()).await.unwrap();
        let draft = session.assignment_draft().unwrap();
        assert!(draft.realm_role_names().contains("editor"));
        assert!(draft.add_realm_role("viewer"));
    }

    #[tokio::test]
    async fn failed_load_leaves_dialog_closed() {
        let f = fixture();
        let mut session = ClusterSession::new(ClusterId(1));

        let result = session
            .begin_assignment(&f.coordinator, PrincipalRef::Group("ghost".to_string()))
            .await;
        assert!(result.unwrap_err().is_not_found());
        assert!(!session.dialog().is_open());
    }

    #[tokio::test]
    async fn finishing_assignment_marks_principal_stale() {
        let f = fixture();
        let mut session = ClusterSession::new(ClusterId(1));
        session.begin_assignment(&f.coordinator, f.alice.clone()).await.unwrap();

        let failed: DirectoryResult<AssignmentOutcome> = Err(DirectoryError::unreachable("down"));
        session.finish_assignment(&failed);
        assert!(session.dialog().is_open());

        let partial = Err(DirectoryError::PartialFailure(PartialFailure {
            succeeded: vec!["realm".to_string()],
            failed: vec![FailedTarget {
                target: "client:app1".to_string(),
                error: DirectoryError::unreachable("down"),
            }],
        }));
        session.finish_assignment(&partial);
        assert!(!session.dialog().is_open());

        let stale = session.take_stale_principals();
        assert!(stale.contains(&f.alice));
        assert!(session.take_stale_principals().is_empty());
    }

    #[test]
    fn export_selection_toggles() {
        let mut session = ClusterSession::new(ClusterId(1));
        assert_eq!(session.toggle_export_selection("a"), None);

        session
            .open(DialogMode::Export {
                entity_type: EntityType::User,
                selected: BTreeSet::new(),
            })
            .unwrap();
        assert_eq!(session.toggle_export_selection("a"), Some(true));
        assert_eq!(session.toggle_export_selection("a"), Some(false));
    }

    #[tokio::test]
    async fn expanding_a_client_loads_its_roles_once() {
        let f = fixture();
        let mut session = ClusterSession::new(ClusterId(1));

        assert_eq!(session.expand_client(&f.cache, "app1").await.unwrap().len(), 1);
        session.collapse_client("app1");
        session.expand_client(&f.cache, "app1").await.unwrap();

        assert_eq!(f.dir.calls("list_client_roles"), 1);
        assert!(session.expanded_clients().contains("app1"));
    }

    #[test]
    fn switching_tab_clears_filter() {
        let mut session = ClusterSession::new(ClusterId(1));
        session.set_search_term("ali");
        session.select_tab(EntityType::User);
        assert_eq!(session.search_term(), "ali");

        session.select_tab(EntityType::Role);
        assert_eq!(session.search_term(), "");
        assert_eq!(session.active_tab(), EntityType::Role);
    }
}
