pub mod filter;
pub mod output;
pub mod queue;

use std::io::Write;

use crate::cache::AssocCache;
use crate::common::error::{AcctqError, invalid_argument};
use crate::records::Cluster;
use crate::records::limits::{Fairshare, Limit};
use crate::store::{ClusterCond, ClusterUpdate, Store};
use filter::{Token, TokenOp, match_key, split_clauses};
use queue::{AdminAction, CommitQueue};

/// Source of interactive yes/no answers, so tests can script the prompts.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Reads the answer from stdin; anything but `y`/`yes` declines.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        print!("{prompt} (y/N) ");
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        let answer = answer.trim();
        answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminMode {
    /// Every verb applies to the store and cache right away.
    Immediate,
    /// Mutations accumulate in the commit queue until `commit`.
    Staged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClusterField {
    Name,
    Fairshare,
    MaxJobs,
    MaxNodes,
    MaxWall,
    MaxCpuSecs,
}

const CLUSTER_KEYS: &[(&str, ClusterField)] = &[
    ("Name", ClusterField::Name),
    ("Names", ClusterField::Name),
    ("Fairshare", ClusterField::Fairshare),
    ("MaxJobs", ClusterField::MaxJobs),
    ("MaxNodes", ClusterField::MaxNodes),
    ("MaxWall", ClusterField::MaxWall),
    ("MaxCPUSecs", ClusterField::MaxCpuSecs),
];

/// Implements the administrative verbs on clusters and their implicit root
/// associations. Mutations either apply immediately or stage into the
/// commit queue; on commit they hit the store (through the façade) and the
/// cache in the same FIFO order.
pub struct AdminController<'a> {
    store: &'a dyn Store,
    cache: &'a AssocCache,
    mode: AdminMode,
    queue: CommitQueue,
    confirm: Box<dyn Confirm + 'a>,
}

impl<'a> AdminController<'a> {
    pub fn new(
        store: &'a dyn Store,
        cache: &'a AssocCache,
        mode: AdminMode,
        confirm: Box<dyn Confirm + 'a>,
    ) -> AdminController<'a> {
        AdminController {
            store,
            cache,
            mode,
            queue: CommitQueue::new(),
            confirm,
        }
    }

    pub fn mode(&self) -> AdminMode {
        self.mode
    }

    pub fn queue(&self) -> &CommitQueue {
        &self.queue
    }

    pub fn has_staged_changes(&self) -> bool {
        !self.queue.is_empty()
    }

    /// `add cluster Name=<n> [limit defaults...]`
    ///
    /// Exactly one cluster name; the name collision check runs against the
    /// cache before anything is staged.
    pub fn add_cluster(&mut self, args: &[String]) -> crate::Result<()> {
        let clauses = split_clauses(args)?;
        if !clauses.modification.is_empty() {
            return invalid_argument("`add cluster` does not take a Set clause".to_string());
        }

        let mut name: Option<String> = None;
        let mut settings: Vec<Token> = Vec::new();
        for token in clauses.condition {
            let field = match &token.key {
                None => ClusterField::Name,
                Some(key) => match_key(key, CLUSTER_KEYS)?,
            };
            if field == ClusterField::Name {
                require_eq_op(&token)?;
                for value in &token.values {
                    if name.is_some() {
                        return invalid_argument(
                            "only one cluster can be added at a time".to_string(),
                        );
                    }
                    name = Some(value.clone());
                }
            } else {
                settings.push(token);
            }
        }
        let name = match name {
            Some(name) => name,
            None => return invalid_argument("`add cluster` needs a Name=".to_string()),
        };
        let update = parse_cluster_update(&settings)?;

        if self.cache.find_cluster(&name).is_some() {
            return Err(AcctqError::AlreadyExists(name));
        }

        let mut cluster = Cluster::new(&name);
        update.apply(&mut cluster);
        println!(" Adding cluster {name}");
        self.submit(vec![AdminAction::CreateCluster(cluster)])
    }

    /// `list cluster [Names=<n>,...]` — reads the store directly, because
    /// the cache is scoped to the local cluster and `list` reports the full
    /// set.
    pub fn list_clusters(&self, args: &[String]) -> crate::Result<Vec<Cluster>> {
        let clauses = split_clauses(args)?;
        if !clauses.modification.is_empty() {
            return invalid_argument("`list cluster` does not take a Set clause".to_string());
        }
        let names = collect_names(&clauses.condition)?;
        let cond = if names.is_empty() {
            ClusterCond::default()
        } else {
            ClusterCond::with_names(names)
        };
        self.store.get_clusters(&cond)
    }

    /// `modify cluster Where Names=<n>,... Set <limits...>`
    pub fn modify_clusters(&mut self, args: &[String]) -> crate::Result<()> {
        let clauses = split_clauses(args)?;
        if clauses.modification.is_empty() {
            return invalid_argument("`modify cluster` needs a Set clause".to_string());
        }
        let update = parse_cluster_update(&clauses.modification)?;
        if update.is_empty() {
            return invalid_argument("the Set clause did not change anything".to_string());
        }

        let names = collect_names(&clauses.condition)?;
        let cond = if names.is_empty() {
            if !self
                .confirm
                .confirm("No Where clause given: this would modify every cluster. Continue?")
            {
                return invalid_argument("operation canceled".to_string());
            }
            ClusterCond::default()
        } else {
            ClusterCond::with_names(names)
        };
        self.submit(vec![AdminAction::ModifyClusters { cond, update }])
    }

    /// `delete cluster Where Names=<n>,...` — refuses an empty filter.
    pub fn delete_clusters(&mut self, args: &[String]) -> crate::Result<()> {
        let clauses = split_clauses(args)?;
        if !clauses.modification.is_empty() {
            return invalid_argument("`delete cluster` does not take a Set clause".to_string());
        }
        let names = collect_names(&clauses.condition)?;
        if names.is_empty() {
            return invalid_argument(
                "`delete cluster` needs a Where clause naming the clusters".to_string(),
            );
        }
        self.submit(vec![
            AdminAction::DeleteClusters {
                cond: ClusterCond::with_names(names.clone()),
            },
            AdminAction::DeleteAssociations { clusters: names },
        ])
    }

    fn submit(&mut self, actions: Vec<AdminAction>) -> crate::Result<()> {
        for action in actions {
            self.queue.push(action);
        }
        match self.mode {
            AdminMode::Staged => Ok(()),
            AdminMode::Immediate => self.commit(),
        }
    }

    /// Drains the queue in FIFO order against the store and the cache, then
    /// commits the façade's batch.
    pub fn commit(&mut self) -> crate::Result<()> {
        let applied = self.queue.drain(self.store, self.cache)?;
        self.store.commit()?;
        log::debug!("Committed {applied} action(s)");
        Ok(())
    }

    /// Discards the staged actions; neither the store nor the cache is
    /// touched.
    pub fn rollback(&mut self) -> crate::Result<()> {
        let discarded = self.queue.rollback();
        self.store.rollback()?;
        log::debug!("Rolled back {discarded} staged action(s)");
        Ok(())
    }
}

fn require_eq_op(token: &Token) -> crate::Result<()> {
    if token.op != TokenOp::Eq {
        let key = token.key.as_deref().unwrap_or("<value>");
        return invalid_argument(format!("field `{key}` only supports `=`"));
    }
    Ok(())
}

fn single_value<'t>(token: &'t Token) -> crate::Result<&'t str> {
    let key = token.key.as_deref().unwrap_or("<value>");
    match token.values.as_slice() {
        [value] => Ok(value),
        [] => invalid_argument(format!("field `{key}` needs a value")),
        _ => invalid_argument(format!("field `{key}` takes a single value")),
    }
}

fn parse_limit(token: &Token) -> crate::Result<Limit> {
    require_eq_op(token)?;
    Limit::parse(single_value(token)?).map_err(|e| AcctqError::InvalidArgument(e.to_string()))
}

/// Turns `Set` clause tokens into a cluster field update.
fn parse_cluster_update(tokens: &[Token]) -> crate::Result<ClusterUpdate> {
    let mut update = ClusterUpdate::default();
    for token in tokens {
        let key = match &token.key {
            Some(key) => key,
            None => {
                return invalid_argument(format!(
                    "`{}` is not a KEY=value token",
                    token.values.join(",")
                ));
            }
        };
        match match_key(key, CLUSTER_KEYS)? {
            ClusterField::Name => {
                return invalid_argument("the cluster name cannot be modified".to_string());
            }
            ClusterField::Fairshare => {
                require_eq_op(token)?;
                let fairshare = Fairshare::parse(single_value(token)?)
                    .map_err(|e| AcctqError::InvalidArgument(e.to_string()))?;
                update.fairshare = Some(fairshare);
            }
            ClusterField::MaxJobs => update.max_jobs = Some(parse_limit(token)?),
            ClusterField::MaxNodes => update.max_nodes_per_job = Some(parse_limit(token)?),
            ClusterField::MaxWall => update.max_wall_minutes = Some(parse_limit(token)?),
            ClusterField::MaxCpuSecs => update.max_cpu_secs_per_job = Some(parse_limit(token)?),
        }
    }
    Ok(update)
}

/// Collects cluster names from `Where` clause tokens; only the primary key
/// (`Name`/`Names`, or bare values) is accepted there.
fn collect_names(tokens: &[Token]) -> crate::Result<Vec<String>> {
    let mut names = Vec::new();
    for token in tokens {
        if let Some(key) = &token.key {
            if match_key(key, CLUSTER_KEYS)? != ClusterField::Name {
                return invalid_argument(format!("field `{key}` cannot be used as a filter here"));
            }
        }
        require_eq_op(token)?;
        names.extend(token.values.iter().cloned());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AssocId;
    use crate::cache::AssocQuery;
    use crate::records::limits::{Limit, LimitSet, ResolvedLimit};
    use crate::store::AssocFilter;
    use crate::store::mem::MemStore;

    struct Scripted(bool);
    impl Confirm for Scripted {
        fn confirm(&mut self, _prompt: &str) -> bool {
            self.0
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn setup() -> (MemStore, AssocCache) {
        let store = MemStore::new();
        store
            .add_clusters(vec![Cluster {
                fairshare: crate::records::limits::Fairshare::Exact(10),
                limits: LimitSet {
                    max_jobs: Limit::Exact(100),
                    ..Default::default()
                },
                ..Cluster::new("c1")
            }])
            .unwrap();
        let cache = AssocCache::new("c1");
        cache.init(&store).unwrap();
        (store, cache)
    }

    fn controller<'a>(
        store: &'a MemStore,
        cache: &'a AssocCache,
        mode: AdminMode,
    ) -> AdminController<'a> {
        AdminController::new(store, cache, mode, Box::new(Scripted(true)))
    }

    #[test]
    fn test_add_then_resolve() {
        let (store, cache) = setup();
        let mut admin = controller(&store, &cache, AdminMode::Immediate);

        admin
            .add_cluster(&args(&["Name=c2", "FairShare=5"]))
            .unwrap();

        let mut query = AssocQuery {
            acct: Some("root".to_string()),
            cluster: Some("c2".to_string()),
            ..Default::default()
        };
        let id = cache.get_assoc_id(&mut query).unwrap();
        assert_eq!(cache.resolve_limits(id).unwrap().fairshare, 5);
    }

    #[test]
    fn test_add_rejects_second_cluster() {
        let (store, cache) = setup();
        let mut admin = controller(&store, &cache, AdminMode::Staged);

        for bad in [
            args(&["Name=c2", "Name=c3"]),
            args(&["Name=c2,c3"]),
            args(&["c2", "c3"]),
        ] {
            assert!(matches!(
                admin.add_cluster(&bad),
                Err(AcctqError::InvalidArgument(_))
            ));
        }
        assert!(!admin.has_staged_changes());
    }

    #[test]
    fn test_add_requires_name() {
        let (store, cache) = setup();
        let mut admin = controller(&store, &cache, AdminMode::Staged);
        assert!(matches!(
            admin.add_cluster(&args(&["FairShare=5"])),
            Err(AcctqError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_add_collision_against_cache() {
        let (store, cache) = setup();
        let mut admin = controller(&store, &cache, AdminMode::Staged);
        assert!(matches!(
            admin.add_cluster(&args(&["Name=C1"])),
            Err(AcctqError::AlreadyExists(_))
        ));
        assert!(!admin.has_staged_changes());
    }

    #[test]
    fn test_list_accepts_only_name_filters() {
        let (store, cache) = setup();
        let admin = controller(&store, &cache, AdminMode::Staged);

        let all = admin.list_clusters(&[]).unwrap();
        assert_eq!(all.len(), 1);

        let named = admin.list_clusters(&args(&["Names=c1,nope"])).unwrap();
        assert_eq!(named.len(), 1);

        assert!(matches!(
            admin.list_clusters(&args(&["MaxJobs=5"])),
            Err(AcctqError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_modify_requires_set() {
        let (store, cache) = setup();
        let mut admin = controller(&store, &cache, AdminMode::Staged);
        assert!(matches!(
            admin.modify_clusters(&args(&["Where", "Names=c1"])),
            Err(AcctqError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_modify_affects_live_lookups() {
        let (store, cache) = setup();
        let mut admin = controller(&store, &cache, AdminMode::Staged);

        admin
            .modify_clusters(&args(&["Where", "Names=c1", "Set", "FairShare=8"]))
            .unwrap();
        admin.commit().unwrap();

        let mut query = AssocQuery {
            acct: Some("root".to_string()),
            cluster: Some("c1".to_string()),
            ..Default::default()
        };
        let id = cache.get_assoc_id(&mut query).unwrap();
        let effective = cache.resolve_limits(id).unwrap();
        assert_eq!(effective.fairshare, 8);
        assert_eq!(effective.max_jobs, ResolvedLimit::Exact(100));
    }

    #[test]
    fn test_modify_without_where_asks_first() {
        let (store, cache) = setup();
        let mut admin =
            AdminController::new(&store, &cache, AdminMode::Staged, Box::new(Scripted(false)));
        assert!(matches!(
            admin.modify_clusters(&args(&["Set", "FairShare=8"])),
            Err(AcctqError::InvalidArgument(_))
        ));
        assert!(!admin.has_staged_changes());

        let mut admin =
            AdminController::new(&store, &cache, AdminMode::Staged, Box::new(Scripted(true)));
        admin.modify_clusters(&args(&["Set", "FairShare=8"])).unwrap();
        assert!(admin.has_staged_changes());
    }

    #[test]
    fn test_delete_refuses_empty_where() {
        let (store, cache) = setup();
        let mut admin = controller(&store, &cache, AdminMode::Staged);
        assert!(matches!(
            admin.delete_clusters(&[]),
            Err(AcctqError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_staged_delete_with_rollback() {
        let (store, cache) = setup();
        let mut admin = controller(&store, &cache, AdminMode::Staged);

        admin
            .delete_clusters(&args(&["Where", "Names=c1"]))
            .unwrap();
        assert_eq!(admin.queue().len(), 2);

        admin.rollback().unwrap();
        assert!(!admin.has_staged_changes());
        // Store and cache are unchanged
        assert_eq!(store.get_clusters(&ClusterCond::default()).unwrap().len(), 1);
        assert!(cache.find_cluster("c1").is_some());
        assert_eq!(cache.association_count(), 1);
    }

    #[test]
    fn test_staged_delete_commit_cascades() {
        let (store, cache) = setup();
        store.seed_association(crate::records::Association {
            user: Some("alice".to_string()),
            ..crate::records::Association::root_for_cluster(AssocId::new(0), "c1")
        });
        cache.fini();
        cache.init(&store).unwrap();
        let mut admin = controller(&store, &cache, AdminMode::Staged);

        admin
            .delete_clusters(&args(&["Where", "Names=c1"]))
            .unwrap();
        admin.commit().unwrap();

        assert!(store.get_clusters(&ClusterCond::default()).unwrap().is_empty());
        assert!(
            store
                .get_associations(&AssocFilter::default())
                .unwrap()
                .is_empty()
        );
        assert!(cache.find_cluster("c1").is_none());
        assert_eq!(cache.association_count(), 0);
    }

    #[test]
    fn test_add_then_delete_restores_state() {
        let (store, cache) = setup();
        let before_clusters = store.get_clusters(&ClusterCond::default()).unwrap();
        let before_count = cache.association_count();

        let mut admin = controller(&store, &cache, AdminMode::Immediate);
        admin.add_cluster(&args(&["Name=c2"])).unwrap();
        admin
            .delete_clusters(&args(&["Where", "Names=c2"]))
            .unwrap();

        assert_eq!(
            store.get_clusters(&ClusterCond::default()).unwrap(),
            before_clusters
        );
        assert_eq!(cache.association_count(), before_count);
        assert!(cache.find_cluster("c2").is_none());
    }

    #[test]
    fn test_unknown_field_diagnostic() {
        let (store, cache) = setup();
        let mut admin = controller(&store, &cache, AdminMode::Staged);
        assert!(matches!(
            admin.add_cluster(&args(&["Name=c2", "Wall=60"])),
            Err(AcctqError::InvalidArgument(_))
        ));
        // Shortest-unambiguous prefix works
        admin
            .add_cluster(&args(&["Name=c2", "MaxW=60"]))
            .unwrap();
    }
}
