use crate::areas::index::Index;
use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::RefName;
use crate::artifacts::objects::commit::{Author, Commit};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::Tree;
use crate::errors::RepositoryError;

impl Repository {
    /// Store the index as a tree, with every subtree
    pub fn write_tree(&self, index: &Index) -> anyhow::Result<ObjectId> {
        if index.is_conflicted() {
            return Err(RepositoryError::UnmergedIndex(index.conflicted_paths().into_iter().collect()).into());
        }

        let tree = Tree::build(index.tree_entries())?;
        tree.traverse(&mut |subtree| self.database().store(subtree).map(|_| ()))?;
        self.database().store(&tree)
    }

    /// Identity for new commits and tags
    pub fn author(&self) -> anyhow::Result<Author> {
        let config = self.config();
        Author::resolve(config.user.name.as_deref(), config.user.email.as_deref())
    }

    /// Write a commit and move `HEAD` (or the branch it names) from `expected` to it
    pub fn write_commit(
        &self,
        parents: Vec<ObjectId>,
        tree_oid: ObjectId,
        message: String,
        expected: Option<&ObjectId>,
    ) -> anyhow::Result<ObjectId> {
        let commit = Commit::new(parents, tree_oid, self.author()?, message);
        let commit_oid = self.database().store(&commit)?;

        self.refs().update(&RefName::head(), expected, Some(&commit_oid))?;
        tracing::info!(oid = %commit_oid, parents = commit.parents().len(), "commit written");

        Ok(commit_oid)
    }
}
