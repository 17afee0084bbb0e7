//! Commit graph queries
//!
//! The commit DAG lives in the object store: commits are nodes keyed by
//! their ID and parent IDs are the edges. `History` answers ancestry,
//! merge-base and tree-diff questions over it.
//!
//! Commits listed in the shallow file are treated as roots: their parents
//! were never transferred.
//!
//! - `rev_list`: reachability walks (log, packing, negotiation)

pub mod rev_list;

use crate::areas::database::Database;
use crate::artifacts::diff::tree_diff::ChangeSet;
use crate::artifacts::merge::bca_finder::BCAFinder;
use crate::artifacts::objects::commit::SlimCommit;
use crate::artifacts::objects::object_id::ObjectId;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

pub struct History<'r> {
    database: &'r Database,
    shallow: BTreeSet<ObjectId>,
    cache: Mutex<HashMap<ObjectId, SlimCommit>>,
}

impl<'r> History<'r> {
    pub fn new(database: &'r Database, shallow: BTreeSet<ObjectId>) -> Self {
        Self {
            database,
            shallow,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn database(&self) -> &'r Database {
        self.database
    }

    pub fn is_shallow(&self, oid: &ObjectId) -> bool {
        self.shallow.contains(oid)
    }

    /// Parents and commit time, cached for the lifetime of this value
    pub fn slim_commit(&self, oid: &ObjectId) -> anyhow::Result<SlimCommit> {
        if let Some(commit) = self.cache.lock().unwrap_or_else(PoisonError::into_inner).get(oid) {
            return Ok(commit.clone());
        }

        let mut commit = self.database.load_commit(oid)?.to_slim(oid.clone());
        if self.shallow.contains(oid) {
            commit.parents.clear();
        }

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(oid.clone(), commit.clone());
        Ok(commit)
    }

    pub fn parents(&self, oid: &ObjectId) -> anyhow::Result<Vec<ObjectId>> {
        Ok(self.slim_commit(oid)?.parents)
    }

    /// Whether `ancestor` is reachable from `descendant` through at least
    /// one parent edge; a commit is never its own ancestor
    pub fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> anyhow::Result<bool> {
        if ancestor == descendant {
            return Ok(false);
        }

        let mut visited = HashSet::new();
        let mut queue = BinaryHeap::new();
        for parent in self.parents(descendant)? {
            queue.push(self.slim_commit(&parent)?);
        }

        while let Some(commit) = queue.pop() {
            if &commit.oid == ancestor {
                return Ok(true);
            }
            if !visited.insert(commit.oid.clone()) {
                continue;
            }
            for parent in &commit.parents {
                if !visited.contains(parent) {
                    queue.push(self.slim_commit(parent)?);
                }
            }
        }

        tracing::trace!(%ancestor, %descendant, "not an ancestor");
        Ok(false)
    }

    /// An update from `old` to `new` loses no history
    pub fn is_fast_forward(&self, old: &ObjectId, new: &ObjectId) -> anyhow::Result<bool> {
        Ok(old == new || self.is_ancestor(old, new)?)
    }

    /// Every best common ancestor, sorted by ID
    pub fn merge_bases(&self, a: &ObjectId, b: &ObjectId) -> anyhow::Result<Vec<ObjectId>> {
        BCAFinder::new(|oid: &ObjectId| self.slim_commit(oid)).find_best_common_ancestors(a, b)
    }

    pub fn merge_base(&self, a: &ObjectId, b: &ObjectId) -> anyhow::Result<Option<ObjectId>> {
        Ok(self.merge_bases(a, b)?.into_iter().next())
    }

    /// File-level changes between two trees or commits
    pub fn diff(&self, old: Option<&ObjectId>, new: Option<&ObjectId>) -> anyhow::Result<ChangeSet> {
        Ok(self.database.tree_diff(old, new)?.into_changes())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{Graph, graph};
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    fn ancestry_is_strict_and_transitive(mut graph: Graph) {
        let a = graph.commit(&[], "a");
        let b = graph.commit(&[&a], "b");
        let c = graph.commit(&[&b], "c");
        let history = History::new(&graph.database, BTreeSet::new());

        assert!(history.is_ancestor(&a, &b).unwrap());
        assert!(history.is_ancestor(&b, &c).unwrap());
        assert!(history.is_ancestor(&a, &c).unwrap());
        assert!(!history.is_ancestor(&c, &a).unwrap());
        assert!(!history.is_ancestor(&b, &b).unwrap());
        assert!(history.is_fast_forward(&b, &b).unwrap());
        assert!(history.is_fast_forward(&a, &c).unwrap());
        assert!(!history.is_fast_forward(&c, &a).unwrap());
    }

    #[rstest]
    fn merge_base_is_symmetric(mut graph: Graph) {
        let root = graph.commit(&[], "root");
        let base = graph.commit(&[&root], "base");
        let left = graph.commit(&[&base], "left");
        let right = graph.commit(&[&base], "right");
        let right2 = graph.commit(&[&right], "right2");
        let history = History::new(&graph.database, BTreeSet::new());

        assert_eq!(history.merge_base(&left, &right2).unwrap(), Some(base.clone()));
        assert_eq!(history.merge_base(&right2, &left).unwrap(), Some(base));
    }

    #[rstest]
    fn shallow_commits_have_no_parents(mut graph: Graph) {
        let a = graph.commit(&[], "a");
        let b = graph.commit(&[&a], "b");
        let history = History::new(&graph.database, BTreeSet::from([b.clone()]));

        assert_eq!(history.parents(&b).unwrap(), Vec::<ObjectId>::new());
        assert!(!history.is_ancestor(&a, &b).unwrap());
    }

    #[rstest]
    fn diff_reports_changed_file(mut graph: Graph) {
        let a = graph.commit(&[], "one");
        let b = graph.commit(&[&a], "two");
        let history = History::new(&graph.database, BTreeSet::new());

        let changes = history.diff(Some(&a), Some(&b)).unwrap();

        assert_eq!(
            changes
                .iter()
                .map(|(path, change)| (path.display().to_string(), change.status_char()))
                .collect::<Vec<_>>(),
            vec![("file.txt".to_string(), 'M')]
        );
    }
}
