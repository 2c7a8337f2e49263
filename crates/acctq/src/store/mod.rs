pub mod file;
pub mod mem;

use crate::AssocId;
use crate::records::limits::{Fairshare, Limit};
use crate::records::{Association, Cluster, User};

/// Filter for [`Store::get_associations`]. `None` fields do not constrain
/// the result; an empty result is a valid answer.
#[derive(Debug, Clone, Default)]
pub struct AssocFilter {
    pub clusters: Option<Vec<String>>,
    pub users: Option<Vec<String>>,
    pub accounts: Option<Vec<String>>,
    pub ids: Option<Vec<AssocId>>,
    /// When false, the returned records carry no usage entries.
    pub with_usage: bool,
    pub with_deleted: bool,
}

fn name_list_matches(list: &Option<Vec<String>>, value: &str) -> bool {
    match list {
        None => true,
        Some(names) => names.iter().any(|n| n.eq_ignore_ascii_case(value)),
    }
}

fn opt_name_list_matches(list: &Option<Vec<String>>, value: Option<&str>) -> bool {
    match (list, value) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(names), Some(value)) => names.iter().any(|n| n.eq_ignore_ascii_case(value)),
    }
}

impl AssocFilter {
    /// Everything relevant to one cluster, usage included. This is the
    /// filter the cache init uses.
    pub fn for_cluster(cluster: &str) -> AssocFilter {
        AssocFilter {
            clusters: Some(vec![cluster.to_string()]),
            with_usage: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, assoc: &Association) -> bool {
        name_list_matches(&self.clusters, &assoc.cluster)
            && name_list_matches(&self.accounts, &assoc.acct)
            && opt_name_list_matches(&self.users, assoc.user.as_deref())
            && self
                .ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&assoc.id))
    }
}

/// Filter for [`Store::get_users`]; the empty filter returns all users.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub names: Option<Vec<String>>,
    pub with_deleted: bool,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        name_list_matches(&self.names, &user.name)
    }
}

/// Condition selecting clusters by name; `None` selects all of them.
#[derive(Debug, Clone, Default)]
pub struct ClusterCond {
    pub names: Option<Vec<String>>,
}

impl ClusterCond {
    pub fn with_names(names: Vec<String>) -> ClusterCond {
        ClusterCond { names: Some(names) }
    }

    pub fn matches(&self, name: &str) -> bool {
        name_list_matches(&self.names, name)
    }
}

/// Field-wise update applied to matching clusters; `None` leaves the field
/// alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterUpdate {
    pub fairshare: Option<Fairshare>,
    pub max_jobs: Option<Limit>,
    pub max_nodes_per_job: Option<Limit>,
    pub max_wall_minutes: Option<Limit>,
    pub max_cpu_secs_per_job: Option<Limit>,
}

impl ClusterUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ClusterUpdate::default()
    }

    pub fn apply(&self, cluster: &mut Cluster) {
        if let Some(fairshare) = self.fairshare {
            cluster.fairshare = fairshare;
        }
        if let Some(limit) = self.max_jobs {
            cluster.limits.max_jobs = limit;
        }
        if let Some(limit) = self.max_nodes_per_job {
            cluster.limits.max_nodes_per_job = limit;
        }
        if let Some(limit) = self.max_wall_minutes {
            cluster.limits.max_wall_minutes = limit;
        }
        if let Some(limit) = self.max_cpu_secs_per_job {
            cluster.limits.max_cpu_secs_per_job = limit;
        }
    }
}

/// The façade over the backing accounting store. This is the only place in
/// the crate that is allowed to block on I/O; whether the store is local or
/// remote, and whether operations are transactional on the wire, is hidden
/// behind it.
pub trait Store: Send + Sync {
    /// Returns a newly owned list; an empty list is a valid answer.
    fn get_associations(&self, filter: &AssocFilter) -> crate::Result<Vec<Association>>;

    /// The empty filter returns all users.
    fn get_users(&self, filter: &UserFilter) -> crate::Result<Vec<User>>;

    /// Persists the clusters and their implicit root associations. Fails
    /// with `AlreadyExists` if any name collides; nothing is added in that
    /// case.
    fn add_clusters(&self, clusters: Vec<Cluster>) -> crate::Result<()>;

    /// Returns the names actually affected, in deterministic (sorted)
    /// order. An empty list means no rows matched; this is not an error.
    fn modify_clusters(
        &self,
        cond: &ClusterCond,
        update: &ClusterUpdate,
    ) -> crate::Result<Vec<String>>;

    /// Removes matching clusters and cascades to all of their associations
    /// inside the store. Returns the removed names, sorted; the
    /// cascade-affected associations are not enumerated.
    fn remove_clusters(&self, cond: &ClusterCond) -> crate::Result<Vec<String>>;

    /// Reads cluster records. The admin `list` verb needs the full set, not
    /// just the local cluster the cache is scoped to.
    fn get_clusters(&self, cond: &ClusterCond) -> crate::Result<Vec<Cluster>>;

    /// The façade is allowed to batch mutations until `commit`.
    fn commit(&self) -> crate::Result<()>;

    /// Discards batched mutations, where the implementation batches at all.
    fn rollback(&self) -> crate::Result<()>;
}
