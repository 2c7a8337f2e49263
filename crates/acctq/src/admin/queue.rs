use std::collections::VecDeque;

use crate::cache::AssocCache;
use crate::common::error::AcctqError;
use crate::records::{Cluster, ROOT_ACCOUNT};
use crate::store::{AssocFilter, ClusterCond, ClusterUpdate, Store};

/// One staged administrative mutation.
#[derive(Debug, Clone)]
pub enum AdminAction {
    CreateCluster(Cluster),
    ModifyClusters {
        cond: ClusterCond,
        update: ClusterUpdate,
    },
    DeleteClusters {
        cond: ClusterCond,
    },
    /// Cache-side cascade of a cluster deletion; the store cascades on its
    /// own inside `remove_clusters`.
    DeleteAssociations {
        clusters: Vec<String>,
    },
}

fn cond_names(cond: &ClusterCond) -> String {
    match &cond.names {
        Some(names) => names.join(","),
        None => "<all>".to_string(),
    }
}

impl AdminAction {
    pub fn describe(&self) -> String {
        match self {
            AdminAction::CreateCluster(cluster) => format!("create cluster {}", cluster.name),
            AdminAction::ModifyClusters { cond, .. } => {
                format!("modify cluster(s) {}", cond_names(cond))
            }
            AdminAction::DeleteClusters { cond } => {
                format!("delete cluster(s) {}", cond_names(cond))
            }
            AdminAction::DeleteAssociations { clusters } => {
                format!("delete associations of cluster(s) {}", clusters.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Empty,
    Staged,
    Committed,
    RolledBack,
}

/// The ordered list of pending admin actions.
///
/// Actions drain in FIFO order; the ordering is a correctness requirement
/// (modify-then-delete of the same cluster must apply in that order). The
/// drain is not atomic across actions: on a store error the failing action
/// and everything behind it stay queued and the caller learns how far the
/// drain got.
pub struct CommitQueue {
    actions: VecDeque<AdminAction>,
    state: QueueState,
}

impl Default for CommitQueue {
    fn default() -> Self {
        CommitQueue::new()
    }
}

impl CommitQueue {
    pub fn new() -> CommitQueue {
        CommitQueue {
            actions: VecDeque::new(),
            state: QueueState::Empty,
        }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &AdminAction> {
        self.actions.iter()
    }

    pub fn push(&mut self, action: AdminAction) {
        log::debug!("Staging action: {}", action.describe());
        self.actions.push_back(action);
        self.state = QueueState::Staged;
    }

    /// Discards every staged action without touching the store or the
    /// cache. Returns how many were dropped.
    pub fn rollback(&mut self) -> usize {
        let discarded = self.actions.len();
        self.actions.clear();
        self.finish(QueueState::RolledBack);
        discarded
    }

    /// Applies the staged actions in FIFO order, each against the store and
    /// then mirrored into the cache. Stops at the first store error; the
    /// failing action and the remainder stay queued.
    pub fn drain(&mut self, store: &dyn Store, cache: &AssocCache) -> crate::Result<usize> {
        let mut applied = 0;
        while let Some(action) = self.actions.front() {
            match apply_action(action, store, cache) {
                Ok(()) => {
                    self.actions.pop_front();
                    applied += 1;
                }
                Err(error) => {
                    return Err(AcctqError::PartialCommit {
                        index: applied,
                        applied,
                        remaining: self.actions.len(),
                        reason: error.to_string(),
                    });
                }
            }
        }
        self.finish(QueueState::Committed);
        Ok(applied)
    }

    // Terminal states revert to Empty once the queue is drained.
    fn finish(&mut self, terminal: QueueState) {
        log::debug!("Commit queue: {:?} -> {:?} -> Empty", self.state, terminal);
        self.state = QueueState::Empty;
    }
}

fn apply_action(action: &AdminAction, store: &dyn Store, cache: &AssocCache) -> crate::Result<()> {
    match action {
        AdminAction::CreateCluster(cluster) => {
            // A previous drain attempt may have persisted the cluster and
            // then faulted before the root fetch; a retried action must not
            // trip over its own earlier half.
            match store.add_clusters(vec![cluster.clone()]) {
                Ok(()) => {}
                Err(AcctqError::AlreadyExists(name)) => {
                    log::debug!("Cluster {name} is already persisted, resuming");
                }
                Err(error) => return Err(error),
            }
            // Pick up the root association id the store assigned
            let root = store
                .get_associations(&AssocFilter {
                    clusters: Some(vec![cluster.name.clone()]),
                    accounts: Some(vec![ROOT_ACCOUNT.to_string()]),
                    ..Default::default()
                })?
                .into_iter()
                .find(|a| a.is_root());
            match root {
                Some(root) => cache.add_cluster(cluster.clone(), root),
                None => {
                    log::warn!(
                        "Store did not report a root association for new cluster {}",
                        cluster.name
                    );
                }
            }
            log::info!("Added cluster {}", cluster.name);
            Ok(())
        }
        AdminAction::ModifyClusters { cond, update } => {
            let affected = store.modify_clusters(cond, update)?;
            cache.modify_clusters(&affected, update);
            if affected.is_empty() {
                log::info!("Modify matched no cluster");
            } else {
                log::info!("Modified cluster(s) {}", affected.join(","));
            }
            Ok(())
        }
        AdminAction::DeleteClusters { cond } => {
            let removed = store.remove_clusters(cond)?;
            for name in &removed {
                cache.remove_cluster_record(name);
            }
            if removed.is_empty() {
                log::info!("Delete matched no cluster");
            } else {
                log::info!("Deleted cluster(s) {}", removed.join(","));
            }
            Ok(())
        }
        AdminAction::DeleteAssociations { clusters } => {
            for name in clusters {
                cache.remove_cluster_associations(name);
            }
            Ok(())
        }
    }
}
