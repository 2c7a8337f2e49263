use std::sync::Mutex;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::AssocId;
use crate::common::Map;
use crate::common::error::AcctqError;
use crate::common::strutils::name_key;
use crate::records::{Association, Cluster, User};
use crate::store::{AssocFilter, ClusterCond, ClusterUpdate, Store, UserFilter};

/// Serializable image of a whole store; also the snapshot format of the
/// file-backed store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreDump {
    pub clusters: Vec<Cluster>,
    pub associations: Vec<Association>,
    pub users: Vec<User>,
    pub next_assoc_id: u64,
}

struct Inner {
    clusters: Map<String, Cluster>,
    /// Insertion order is kept so reads are deterministic.
    assocs: Vec<Association>,
    users: Map<String, User>,
    next_assoc_id: u64,
    available: bool,
    /// Countdown used by tests to inject a transport fault mid-sequence.
    ops_until_failure: Option<u32>,
}

impl Inner {
    fn check_available(&mut self) -> crate::Result<()> {
        if !self.available {
            return Err(AcctqError::StoreUnavailable(
                "store transport is down".to_string(),
            ));
        }
        if let Some(remaining) = self.ops_until_failure {
            if remaining == 0 {
                self.available = false;
                self.ops_until_failure = None;
                return Err(AcctqError::StoreUnavailable(
                    "store transport is down".to_string(),
                ));
            }
            self.ops_until_failure = Some(remaining - 1);
        }
        Ok(())
    }

    fn alloc_assoc_id(&mut self) -> AssocId {
        self.next_assoc_id += 1;
        AssocId::new(self.next_assoc_id)
    }
}

/// An in-process implementation of the store façade. It backs the
/// file-backed store and serves as the store double in tests.
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl Default for MemStore {
    fn default() -> Self {
        MemStore::new()
    }
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::from_dump(StoreDump::default())
    }

    pub fn from_dump(dump: StoreDump) -> MemStore {
        let mut inner = Inner {
            clusters: Map::new(),
            assocs: dump.associations,
            users: Map::new(),
            next_assoc_id: dump.next_assoc_id,
            available: true,
            ops_until_failure: None,
        };
        for cluster in dump.clusters {
            inner.clusters.insert(name_key(&cluster.name), cluster);
        }
        for user in dump.users {
            inner.users.insert(name_key(&user.name), user);
        }
        // The id counter must dominate every stored association id
        let max_id = inner.assocs.iter().map(|a| a.id.as_num()).max();
        if let Some(max_id) = max_id {
            inner.next_assoc_id = inner.next_assoc_id.max(max_id);
        }
        MemStore {
            inner: Mutex::new(inner),
        }
    }

    pub fn dump(&self) -> StoreDump {
        let inner = self.inner.lock().unwrap();
        StoreDump {
            clusters: inner
                .clusters
                .values()
                .cloned()
                .sorted_by(|a, b| a.name.cmp(&b.name))
                .collect(),
            associations: inner.assocs.clone(),
            users: inner
                .users
                .values()
                .cloned()
                .sorted_by(|a, b| a.name.cmp(&b.name))
                .collect(),
            next_assoc_id: inner.next_assoc_id,
        }
    }

    /// Replaces the whole content, keeping availability toggles intact.
    pub fn reset_to(&self, dump: StoreDump) {
        let fresh = MemStore::from_dump(dump);
        let mut fresh_inner = fresh.inner.into_inner().unwrap();
        let mut inner = self.inner.lock().unwrap();
        fresh_inner.available = inner.available;
        fresh_inner.ops_until_failure = inner.ops_until_failure;
        *inner = fresh_inner;
    }

    /// Test hook: makes every subsequent call fail with `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.inner.lock().unwrap().available = available;
    }

    /// Test hook: the next `ops` calls succeed, after that the store goes
    /// down.
    pub fn fail_after_ops(&self, ops: u32) {
        self.inner.lock().unwrap().ops_until_failure = Some(ops);
    }

    /// Seeds an association directly, bypassing the façade. Ids of 0 get a
    /// fresh id assigned.
    pub fn seed_association(&self, mut assoc: Association) -> AssocId {
        let mut inner = self.inner.lock().unwrap();
        if assoc.id.as_num() == 0 {
            assoc.id = inner.alloc_assoc_id();
        } else {
            inner.next_assoc_id = inner.next_assoc_id.max(assoc.id.as_num());
        }
        let id = assoc.id;
        inner.assocs.push(assoc);
        id
    }

    pub fn seed_user(&self, user: User) {
        let mut inner = self.inner.lock().unwrap();
        inner.users.insert(name_key(&user.name), user);
    }
}

impl Store for MemStore {
    fn get_associations(&self, filter: &AssocFilter) -> crate::Result<Vec<Association>> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_available()?;
        let mut result: Vec<Association> = inner
            .assocs
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        if !filter.with_usage {
            for assoc in &mut result {
                assoc.usage.clear();
            }
        }
        Ok(result)
    }

    fn get_users(&self, filter: &UserFilter) -> crate::Result<Vec<User>> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_available()?;
        Ok(inner
            .users
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect())
    }

    fn add_clusters(&self, clusters: Vec<Cluster>) -> crate::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_available()?;
        for cluster in &clusters {
            if inner.clusters.contains_key(&name_key(&cluster.name)) {
                return Err(AcctqError::AlreadyExists(cluster.name.clone()));
            }
        }
        for cluster in clusters {
            let root_id = inner.alloc_assoc_id();
            inner
                .assocs
                .push(Association::root_for_cluster(root_id, &cluster.name));
            log::debug!("Store: added cluster {} (root assoc {root_id})", cluster.name);
            inner.clusters.insert(name_key(&cluster.name), cluster);
        }
        Ok(())
    }

    fn modify_clusters(
        &self,
        cond: &ClusterCond,
        update: &ClusterUpdate,
    ) -> crate::Result<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_available()?;
        let mut affected = Vec::new();
        for cluster in inner.clusters.values_mut() {
            if cond.matches(&cluster.name) {
                update.apply(cluster);
                affected.push(cluster.name.clone());
            }
        }
        affected.sort();
        Ok(affected)
    }

    fn remove_clusters(&self, cond: &ClusterCond) -> crate::Result<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_available()?;
        let mut removed = Vec::new();
        inner.clusters.retain(|_, cluster| {
            if cond.matches(&cluster.name) {
                removed.push(cluster.name.clone());
                false
            } else {
                true
            }
        });
        // Cascade to every association on the removed clusters
        inner
            .assocs
            .retain(|a| !removed.iter().any(|r| r.eq_ignore_ascii_case(&a.cluster)));
        removed.sort();
        Ok(removed)
    }

    fn get_clusters(&self, cond: &ClusterCond) -> crate::Result<Vec<Cluster>> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_available()?;
        Ok(inner
            .clusters
            .values()
            .filter(|c| cond.matches(&c.name))
            .cloned()
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect())
    }

    fn commit(&self) -> crate::Result<()> {
        // Mutations take effect immediately in the in-memory store; there is
        // nothing batched to flush.
        self.inner.lock().unwrap().check_available()
    }

    fn rollback(&self) -> crate::Result<()> {
        self.inner.lock().unwrap().check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::limits::{Fairshare, Limit};

    fn store_with_cluster(name: &str) -> MemStore {
        let store = MemStore::new();
        store.add_clusters(vec![Cluster::new(name)]).unwrap();
        store
    }

    #[test]
    fn test_add_cluster_creates_root_association() {
        let store = store_with_cluster("c1");
        let assocs = store
            .get_associations(&AssocFilter::for_cluster("c1"))
            .unwrap();
        assert_eq!(assocs.len(), 1);
        assert!(assocs[0].is_root());
    }

    #[test]
    fn test_add_cluster_collision() {
        let store = store_with_cluster("c1");
        let result = store.add_clusters(vec![Cluster::new("C1")]);
        assert!(matches!(result, Err(AcctqError::AlreadyExists(_))));
        // Nothing was added
        assert_eq!(store.get_clusters(&ClusterCond::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_modify_no_match_is_ok() {
        let store = store_with_cluster("c1");
        let update = ClusterUpdate {
            max_jobs: Some(Limit::Exact(5)),
            ..Default::default()
        };
        let affected = store
            .modify_clusters(&ClusterCond::with_names(vec!["nope".to_string()]), &update)
            .unwrap();
        assert!(affected.is_empty());
    }

    #[test]
    fn test_modify_applies_and_reports_sorted() {
        let store = MemStore::new();
        store
            .add_clusters(vec![Cluster::new("b"), Cluster::new("a")])
            .unwrap();
        let update = ClusterUpdate {
            fairshare: Some(Fairshare::Exact(4)),
            ..Default::default()
        };
        let affected = store.modify_clusters(&ClusterCond::default(), &update).unwrap();
        assert_eq!(affected, vec!["a", "b"]);
        for cluster in store.get_clusters(&ClusterCond::default()).unwrap() {
            assert_eq!(cluster.fairshare, Fairshare::Exact(4));
        }
    }

    #[test]
    fn test_remove_cascades_to_associations() {
        let store = store_with_cluster("c1");
        store.seed_association(Association {
            user: Some("alice".to_string()),
            ..Association::root_for_cluster(AssocId::new(0), "c1")
        });
        let removed = store
            .remove_clusters(&ClusterCond::with_names(vec!["c1".to_string()]))
            .unwrap();
        assert_eq!(removed, vec!["c1"]);
        assert!(
            store
                .get_associations(&AssocFilter::default())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_unavailable_store() {
        let store = store_with_cluster("c1");
        store.set_available(false);
        assert!(matches!(
            store.get_users(&UserFilter::default()),
            Err(AcctqError::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_fail_after_ops() {
        let store = store_with_cluster("c1");
        store.fail_after_ops(1);
        assert!(store.get_clusters(&ClusterCond::default()).is_ok());
        assert!(store.get_clusters(&ClusterCond::default()).is_err());
    }

    #[test]
    fn test_usage_stripped_without_flag() {
        let store = store_with_cluster("c1");
        store.seed_association(Association {
            user: Some("alice".to_string()),
            usage: vec![crate::records::UsageRecord {
                period_start: 100,
                alloc_cpu_secs: 7,
            }],
            ..Association::root_for_cluster(AssocId::new(0), "c1")
        });
        let plain = store.get_associations(&AssocFilter::default()).unwrap();
        assert!(plain.iter().all(|a| a.usage.is_empty()));
        let with_usage = store
            .get_associations(&AssocFilter::for_cluster("c1"))
            .unwrap();
        assert!(with_usage.iter().any(|a| !a.usage.is_empty()));
    }
}
