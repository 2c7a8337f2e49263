use std::fs::File;
use std::path::{Path, PathBuf};

use crate::common::error::AcctqError;
use crate::records::{Association, Cluster, User};
use crate::store::mem::{MemStore, StoreDump};
use crate::store::{AssocFilter, ClusterCond, ClusterUpdate, Store, UserFilter};

/// A store façade backed by a JSON snapshot on disk.
///
/// All reads and mutations run against an in-memory image; `commit` rewrites
/// the snapshot atomically (write-to-temp plus rename) and `rollback`
/// re-reads it, discarding everything batched since the last commit. This
/// realizes the façade's batching allowance.
pub struct FileStore {
    path: PathBuf,
    mem: MemStore,
}

impl FileStore {
    pub fn open(path: &Path) -> crate::Result<FileStore> {
        let dump = load_dump(path)?;
        Ok(FileStore {
            path: path.to_path_buf(),
            mem: MemStore::from_dump(dump),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_dump(path: &Path) -> crate::Result<StoreDump> {
    if !path.exists() {
        log::debug!("Store file {} does not exist yet", path.display());
        return Ok(StoreDump::default());
    }
    let file = File::open(path)
        .map_err(|e| AcctqError::StoreUnavailable(format!("{}: {e}", path.display())))?;
    Ok(serde_json::from_reader(file)?)
}

fn write_dump(path: &Path, dump: &StoreDump) -> crate::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let file = File::create(&tmp_path)
        .map_err(|e| AcctqError::StoreUnavailable(format!("{}: {e}", tmp_path.display())))?;
    serde_json::to_writer_pretty(file, dump)?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| AcctqError::StoreUnavailable(format!("{}: {e}", path.display())))?;
    Ok(())
}

impl Store for FileStore {
    fn get_associations(&self, filter: &AssocFilter) -> crate::Result<Vec<Association>> {
        self.mem.get_associations(filter)
    }

    fn get_users(&self, filter: &UserFilter) -> crate::Result<Vec<User>> {
        self.mem.get_users(filter)
    }

    fn add_clusters(&self, clusters: Vec<Cluster>) -> crate::Result<()> {
        self.mem.add_clusters(clusters)
    }

    fn modify_clusters(
        &self,
        cond: &ClusterCond,
        update: &ClusterUpdate,
    ) -> crate::Result<Vec<String>> {
        self.mem.modify_clusters(cond, update)
    }

    fn remove_clusters(&self, cond: &ClusterCond) -> crate::Result<Vec<String>> {
        self.mem.remove_clusters(cond)
    }

    fn get_clusters(&self, cond: &ClusterCond) -> crate::Result<Vec<Cluster>> {
        self.mem.get_clusters(cond)
    }

    fn commit(&self) -> crate::Result<()> {
        let dump = self.mem.dump();
        write_dump(&self.path, &dump)?;
        log::debug!(
            "Committed {} cluster(s), {} association(s), {} user(s) to {}",
            dump.clusters.len(),
            dump.associations.len(),
            dump.users.len(),
            self.path.display()
        );
        Ok(())
    }

    fn rollback(&self) -> crate::Result<()> {
        self.mem.reset_to(load_dump(&self.path)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::limits::Fairshare;

    #[test]
    fn test_missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("acct.json")).unwrap();
        assert!(store.get_clusters(&ClusterCond::default()).unwrap().is_empty());
    }

    #[test]
    fn test_commit_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acct.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.add_clusters(vec![Cluster::new("c1")]).unwrap();
            store.commit().unwrap();
        }
        let reopened = FileStore::open(&path).unwrap();
        let clusters = reopened.get_clusters(&ClusterCond::default()).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name, "c1");
        // The implicit root association survived the roundtrip as well
        let assocs = reopened
            .get_associations(&AssocFilter::for_cluster("c1"))
            .unwrap();
        assert_eq!(assocs.len(), 1);
        assert!(assocs[0].is_root());
    }

    #[test]
    fn test_rollback_discards_batched_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acct.json");
        let store = FileStore::open(&path).unwrap();
        store.add_clusters(vec![Cluster::new("c1")]).unwrap();
        store.commit().unwrap();

        let update = ClusterUpdate {
            fairshare: Some(Fairshare::Exact(9)),
            ..Default::default()
        };
        store.modify_clusters(&ClusterCond::default(), &update).unwrap();
        store.rollback().unwrap();

        let clusters = store.get_clusters(&ClusterCond::default()).unwrap();
        assert_eq!(clusters[0].fairshare, Fairshare::Inherit);
    }
}
