use std::sync::Mutex;

use crate::AssocId;
use crate::common::Map;
use crate::common::error::not_found;
use crate::common::strutils::{name_key, names_equal};
use crate::records::limits::{self, EffectiveLimits};
use crate::records::{Association, Cluster, User};
use crate::store::{AssocFilter, ClusterCond, ClusterUpdate, Store, UserFilter};

/// A partially-filled association lookup. Unset fields are filled in from
/// the winning cache record by [`AssocCache::get_assoc_id`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssocQuery {
    pub id: Option<AssocId>,
    pub cluster: Option<String>,
    pub acct: Option<String>,
    pub user: Option<String>,
    pub partition: Option<String>,
}

#[derive(Default)]
struct AssocState {
    by_id: Map<AssocId, Association>,
    /// Insertion order of association ids; the tuple-match walk follows it
    /// so concurrent identical lookups resolve identically.
    order: Vec<AssocId>,
    /// Cluster records keyed by lowercase name; the limit resolver reads
    /// the defaults from here.
    clusters: Map<String, Cluster>,
}

impl AssocState {
    fn remove(&mut self, id: AssocId) -> bool {
        if self.by_id.remove(&id).is_some() {
            self.order.retain(|o| *o != id);
            true
        } else {
            false
        }
    }

    fn remove_user_associations(&mut self, user: &str) -> usize {
        let doomed: Vec<AssocId> = self
            .by_id
            .values()
            .filter(|a| a.belongs_to_user(user))
            .map(|a| a.id)
            .collect();
        for id in &doomed {
            self.by_id.remove(id);
        }
        self.order.retain(|id| !doomed.contains(id));
        doomed.len()
    }
}

#[derive(Default)]
struct UserState {
    by_name: Map<String, User>,
}

/// The process-wide accounting association cache.
///
/// Holds the associations relevant to the local cluster plus the full user
/// set, behind two independent mutexes. Lock order, in the single place
/// both are needed (`remove_user`): user lock before assoc lock. Neither
/// lock is ever held across a store façade call; `init` fetches into
/// temporaries first and swaps the full state in afterwards, so the cache
/// is always either fully populated or empty.
pub struct AssocCache {
    local_cluster: String,
    assoc_lock: Mutex<Option<AssocState>>,
    user_lock: Mutex<Option<UserState>>,
}

impl AssocCache {
    pub fn new(local_cluster: &str) -> AssocCache {
        AssocCache {
            local_cluster: local_cluster.to_string(),
            assoc_lock: Mutex::new(None),
            user_lock: Mutex::new(None),
        }
    }

    pub fn local_cluster(&self) -> &str {
        &self.local_cluster
    }

    pub fn is_initialized(&self) -> bool {
        self.assoc_lock.lock().unwrap().is_some() && self.user_lock.lock().unwrap().is_some()
    }

    /// Populates the cache from the store: associations scoped to the local
    /// cluster, all users, all cluster records. A no-op when already
    /// populated. On any fetch failure nothing is swapped in and the cache
    /// stays empty.
    pub fn init(&self, store: &dyn Store) -> crate::Result<()> {
        if self.is_initialized() {
            log::debug!("Association cache is already populated, skipping init");
            return Ok(());
        }

        let assocs = store.get_associations(&AssocFilter::for_cluster(&self.local_cluster))?;
        let users = store.get_users(&UserFilter::default())?;
        let clusters = store.get_clusters(&ClusterCond::default())?;

        let mut assoc_state = AssocState::default();
        for assoc in assocs {
            assoc_state.order.push(assoc.id);
            assoc_state.by_id.insert(assoc.id, assoc);
        }
        for cluster in clusters {
            assoc_state.clusters.insert(name_key(&cluster.name), cluster);
        }
        let mut user_state = UserState::default();
        for user in users {
            user_state.by_name.insert(name_key(&user.name), user);
        }

        log::debug!(
            "Association cache initialized for cluster {}: {} association(s), {} user(s)",
            self.local_cluster,
            assoc_state.order.len(),
            user_state.by_name.len()
        );

        *self.user_lock.lock().unwrap() = Some(user_state);
        *self.assoc_lock.lock().unwrap() = Some(assoc_state);
        Ok(())
    }

    /// Releases both sides of the cache. Idempotent.
    pub fn fini(&self) {
        self.user_lock.lock().unwrap().take();
        self.assoc_lock.lock().unwrap().take();
    }

    /// Returns an owned copy of the user's default account name, matching
    /// the user case-insensitively.
    pub fn get_default_account(&self, user: &str) -> crate::Result<String> {
        let guard = self.user_lock.lock().unwrap();
        let state = match guard.as_ref() {
            Some(state) => state,
            None => return not_found("association cache is not populated".to_string()),
        };
        let record = match state.by_name.get(&name_key(user)) {
            Some(record) => record,
            None => return not_found(format!("user {user} is not known")),
        };
        match &record.default_acct {
            Some(acct) => Ok(acct.clone()),
            None => not_found(format!("user {user} has no default account")),
        }
    }

    pub fn get_user(&self, name: &str) -> Option<User> {
        let guard = self.user_lock.lock().unwrap();
        guard
            .as_ref()
            .and_then(|state| state.by_name.get(&name_key(name)).cloned())
    }

    /// The scheduler hot path: resolves a partially-filled query to an
    /// association id and fills the unset query fields from the winning
    /// record.
    ///
    /// Resolution order: direct id lookup; otherwise the account is
    /// required (filled from the user's default account when only a user is
    /// given), the cluster defaults to the local one, and the association
    /// list is walked in insertion order. An exact partition match wins; a
    /// request for a partition with no specialized record falls back to the
    /// non-specialized one.
    pub fn get_assoc_id(&self, query: &mut AssocQuery) -> crate::Result<AssocId> {
        if let Some(id) = query.id {
            let guard = self.assoc_lock.lock().unwrap();
            let state = match guard.as_ref() {
                Some(state) => state,
                None => return not_found("association cache is not populated".to_string()),
            };
            return match state.by_id.get(&id) {
                Some(assoc) => {
                    fill_query(query, assoc);
                    Ok(assoc.id)
                }
                None => not_found(format!("association {id} is not in the cache")),
            };
        }

        // The default-account resolution takes the user lock; it must be
        // finished before the assoc lock is acquired.
        let acct = match query.acct.clone() {
            Some(acct) => acct,
            None => match &query.user {
                Some(user) => self.get_default_account(user)?,
                None => {
                    return not_found(
                        "association query carries neither an account nor a user".to_string(),
                    );
                }
            },
        };
        let cluster = query
            .cluster
            .clone()
            .unwrap_or_else(|| self.local_cluster.clone());
        query.acct = Some(acct.clone());
        query.cluster = Some(cluster.clone());

        let guard = self.assoc_lock.lock().unwrap();
        let state = match guard.as_ref() {
            Some(state) => state,
            None => return not_found("association cache is not populated".to_string()),
        };

        // One walk, three ranks: exact partition match, the non-specialized
        // record, and (for a partition-less request) any specialized one.
        let mut exact: Option<&Association> = None;
        let mut plain: Option<&Association> = None;
        let mut specialized: Option<&Association> = None;
        for id in &state.order {
            let Some(assoc) = state.by_id.get(id) else {
                continue;
            };
            if !names_equal(&assoc.acct, &acct) || !names_equal(&assoc.cluster, &cluster) {
                continue;
            }
            let user_matches = match (assoc.user.as_deref(), query.user.as_deref()) {
                (None, None) => true,
                (Some(cached), Some(requested)) => {
                    names_equal(cached, requested) || names_equal(cached, "none")
                }
                (Some(cached), None) => names_equal(cached, "none"),
                (None, Some(_)) => false,
            };
            if !user_matches {
                continue;
            }
            match (assoc.partition.as_deref(), query.partition.as_deref()) {
                (Some(candidate), Some(requested)) if names_equal(candidate, requested) => {
                    exact = Some(assoc);
                    break;
                }
                (Some(_), Some(_)) => {}
                (Some(_), None) => {
                    if specialized.is_none() {
                        specialized = Some(assoc);
                    }
                }
                (None, _) => {
                    if plain.is_none() {
                        plain = Some(assoc);
                    }
                }
            }
        }

        match exact.or(plain).or(specialized) {
            Some(winner) => {
                fill_query(query, winner);
                Ok(winner.id)
            }
            None => not_found(format!(
                "no association for account {acct} on cluster {cluster}"
            )),
        }
    }

    /// True iff an association with this id is currently cached. The
    /// scheduler uses this to invalidate long-lived job records whose
    /// association has been revoked.
    pub fn validate_assoc_id(&self, id: AssocId) -> bool {
        let guard = self.assoc_lock.lock().unwrap();
        guard
            .as_ref()
            .is_some_and(|state| state.by_id.contains_key(&id))
    }

    /// Returns an owned copy of the association record.
    pub fn get_association(&self, id: AssocId) -> Option<Association> {
        let guard = self.assoc_lock.lock().unwrap();
        guard.as_ref().and_then(|state| state.by_id.get(&id).cloned())
    }

    /// Materializes the effective limits of a cached association,
    /// substituting its cluster's defaults for inherited fields.
    pub fn resolve_limits(&self, id: AssocId) -> crate::Result<EffectiveLimits> {
        let guard = self.assoc_lock.lock().unwrap();
        let state = match guard.as_ref() {
            Some(state) => state,
            None => return not_found("association cache is not populated".to_string()),
        };
        let assoc = match state.by_id.get(&id) {
            Some(assoc) => assoc,
            None => return not_found(format!("association {id} is not in the cache")),
        };
        let (cluster_fairshare, cluster_limits) =
            match state.clusters.get(&name_key(&assoc.cluster)) {
                Some(cluster) => (cluster.fairshare, cluster.limits),
                None => Default::default(),
            };
        Ok(limits::resolve(
            assoc.fairshare,
            &assoc.limits,
            cluster_fairshare,
            &cluster_limits,
        ))
    }

    /// Removes at most one association. Removing an absent id succeeds
    /// silently.
    pub fn remove_association(&self, id: AssocId) {
        let mut guard = self.assoc_lock.lock().unwrap();
        if let Some(state) = guard.as_mut() {
            if state.remove(id) {
                log::debug!("Removed association {id} from the cache");
            }
        }
    }

    /// Removes the user record and every association of that user
    /// (case-insensitive). Idempotent.
    pub fn remove_user(&self, name: &str) {
        // Lock order: user before assoc. This is the only path holding both.
        let mut user_guard = self.user_lock.lock().unwrap();
        let mut assoc_guard = self.assoc_lock.lock().unwrap();
        if let Some(state) = user_guard.as_mut() {
            state.by_name.remove(&name_key(name));
        }
        if let Some(state) = assoc_guard.as_mut() {
            let removed = state.remove_user_associations(name);
            if removed > 0 {
                log::debug!("Removed {removed} association(s) of user {name}");
            }
        }
    }

    /// Merges a pushed association list into the cache by id. Existing
    /// records are overwritten, unknown ids are appended; records absent
    /// from the list are left alone (removal goes through the explicit
    /// entry points).
    pub fn update_associations(&self, list: Vec<Association>) {
        let mut guard = self.assoc_lock.lock().unwrap();
        let Some(state) = guard.as_mut() else {
            log::debug!("Ignoring association update: the cache is not populated");
            return;
        };
        for assoc in list {
            let id = assoc.id;
            if state.by_id.insert(id, assoc).is_none() {
                state.order.push(id);
            }
        }
    }

    /// Merges a pushed user list by name. An incoming record overwrites the
    /// cached one, except that an unknown (unset) uid does not clobber a
    /// known one.
    pub fn update_users(&self, list: Vec<User>) {
        let mut guard = self.user_lock.lock().unwrap();
        let Some(state) = guard.as_mut() else {
            log::debug!("Ignoring user update: the cache is not populated");
            return;
        };
        for mut user in list {
            let key = name_key(&user.name);
            if let Some(existing) = state.by_name.get(&key) {
                if user.uid.is_none() {
                    user.uid = existing.uid;
                }
            }
            state.by_name.insert(key, user);
        }
    }

    // Admin mirror entry points

    /// Inserts a cluster together with its implicit root association in one
    /// lock scope, so no observer can see a cluster without its root.
    pub fn add_cluster(&self, cluster: Cluster, root: Association) {
        let mut guard = self.assoc_lock.lock().unwrap();
        let Some(state) = guard.as_mut() else {
            log::debug!(
                "Ignoring cluster {} insert: the cache is not populated",
                cluster.name
            );
            return;
        };
        state.clusters.insert(name_key(&cluster.name), cluster);
        let root_id = root.id;
        if state.by_id.insert(root_id, root).is_none() {
            state.order.push(root_id);
        }
    }

    /// Applies a field update to the named cached clusters.
    pub fn modify_clusters(&self, names: &[String], update: &ClusterUpdate) {
        let mut guard = self.assoc_lock.lock().unwrap();
        let Some(state) = guard.as_mut() else {
            return;
        };
        for name in names {
            if let Some(cluster) = state.clusters.get_mut(&name_key(name)) {
                update.apply(cluster);
            }
        }
    }

    /// Drops the cluster record. The association cascade is a separate
    /// mirror step ([`AssocCache::remove_cluster_associations`]).
    pub fn remove_cluster_record(&self, name: &str) {
        let mut guard = self.assoc_lock.lock().unwrap();
        if let Some(state) = guard.as_mut() {
            state.clusters.remove(&name_key(name));
        }
    }

    /// Drops every cached association living on the given cluster.
    pub fn remove_cluster_associations(&self, name: &str) {
        let mut guard = self.assoc_lock.lock().unwrap();
        let Some(state) = guard.as_mut() else {
            return;
        };
        let doomed: Vec<AssocId> = state
            .by_id
            .values()
            .filter(|a| names_equal(&a.cluster, name))
            .map(|a| a.id)
            .collect();
        for id in &doomed {
            state.by_id.remove(id);
        }
        state.order.retain(|id| !doomed.contains(id));
        if !doomed.is_empty() {
            log::debug!(
                "Removed {} association(s) of cluster {name} from the cache",
                doomed.len()
            );
        }
    }

    pub fn find_cluster(&self, name: &str) -> Option<Cluster> {
        let guard = self.assoc_lock.lock().unwrap();
        guard
            .as_ref()
            .and_then(|state| state.clusters.get(&name_key(name)).cloned())
    }

    /// Number of cached associations (0 when unpopulated).
    pub fn association_count(&self) -> usize {
        let guard = self.assoc_lock.lock().unwrap();
        guard.as_ref().map(|state| state.by_id.len()).unwrap_or(0)
    }
}

fn fill_query(query: &mut AssocQuery, assoc: &Association) {
    query.id = Some(assoc.id);
    if query.acct.is_none() {
        query.acct = Some(assoc.acct.clone());
    }
    if query.cluster.is_none() {
        query.cluster = Some(assoc.cluster.clone());
    }
    if query.user.is_none() {
        query.user = assoc.user.clone();
    }
    if query.partition.is_none() {
        query.partition = assoc.partition.clone();
    }
}
