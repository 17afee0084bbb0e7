//! Commit-level merge with a recursive virtual base
//!
//! When two commits have several best common ancestors, the ancestors are
//! merged with each other first, in ascending ID order, and the result
//! (conflict markers included) serves as the base. Each intermediate result
//! is stored as a commit whose parents are the two commits it joins, so the
//! ancestor search sees the same graph on every run.

use crate::areas::database::Database;
use crate::artifacts::history::History;
use crate::artifacts::merge::diff3::MergeLabels;
use crate::artifacts::merge::tree_merge::{FlatTree, TreeMerge, TreeMergeResult};
use crate::artifacts::objects::commit::{Author, Commit};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::Tree;

const VIRTUAL_AUTHOR: &str = "knot";
const VIRTUAL_EMAIL: &str = "knot@localhost";

pub struct RecursiveMerge<'h, 'r> {
    history: &'h History<'r>,
}

impl<'h, 'r> RecursiveMerge<'h, 'r> {
    pub fn new(history: &'h History<'r>) -> Self {
        Self { history }
    }

    fn database(&self) -> &'r Database {
        self.history.database()
    }

    /// Merge `theirs` into `ours`
    pub fn merge_commits(
        &self,
        ours: &ObjectId,
        theirs: &ObjectId,
        labels: MergeLabels,
    ) -> anyhow::Result<(TreeMergeResult, Option<ObjectId>)> {
        let bases = self.history.merge_bases(ours, theirs)?;
        let base = self.virtual_base(&bases)?;

        let base_tree = match &base {
            Some(base) => self.flatten_commit(base)?,
            None => FlatTree::new(),
        };
        let result = TreeMerge::new(self.database(), labels).merge(
            &base_tree,
            &self.flatten_commit(ours)?,
            &self.flatten_commit(theirs)?,
        )?;

        Ok((result, base))
    }

    /// A single commit standing for every base; `None` for unrelated histories
    fn virtual_base(&self, bases: &[ObjectId]) -> anyhow::Result<Option<ObjectId>> {
        let Some((first, rest)) = bases.split_first() else {
            return Ok(None);
        };

        let mut current = first.clone();
        for (round, next) in rest.iter().enumerate() {
            let labels = MergeLabels {
                ours: format!("Temporary merge branch {}", round + 1),
                theirs: format!("Temporary merge branch {}", round + 2),
            };
            let (result, _) = self.merge_commits(&current, next, labels)?;
            current = self.store_virtual_commit(&current, next, &result.virtual_tree())?;
        }

        if !rest.is_empty() {
            tracing::debug!(
                bases = bases.len(),
                virtual_base = %current,
                "merged multiple bases into a virtual base"
            );
        }
        Ok(Some(current))
    }

    fn store_virtual_commit(&self, ours: &ObjectId, theirs: &ObjectId, tree: &FlatTree) -> anyhow::Result<ObjectId> {
        let database = self.database();
        let tree_oid = store_flat_tree(database, tree)?;

        let timestamp = [ours, theirs]
            .into_iter()
            .map(|oid| database.load_commit(oid).map(|commit| commit.timestamp()))
            .collect::<anyhow::Result<Vec<_>>>()?
            .into_iter()
            .max()
            .unwrap_or_else(|| chrono::Local::now().fixed_offset());

        let author = Author::new_with_timestamp(VIRTUAL_AUTHOR.to_string(), VIRTUAL_EMAIL.to_string(), timestamp);
        let commit = Commit::new(
            vec![ours.clone(), theirs.clone()],
            tree_oid,
            author,
            "merged common ancestors".to_string(),
        );
        database.store(&commit)
    }

    fn flatten_commit(&self, oid: &ObjectId) -> anyhow::Result<FlatTree> {
        let tree = self.database().peel_to_tree(oid)?;
        self.database().flatten_tree(Some(&tree))
    }
}

/// Build and store a tree, with every subtree, from a flat path map
pub fn store_flat_tree(database: &Database, tree: &FlatTree) -> anyhow::Result<ObjectId> {
    let tree = Tree::build(tree.iter().map(|(path, entry)| (path.clone(), entry.clone())))?;
    tree.traverse(&mut |subtree| database.store(subtree).map(|_| ()))?;
    database.store(&tree)
}
