//! Reachability walks
//!
//! A `RevList` selects the commits reachable from a set of tips and not
//! reachable from an exclusion set, newest first. It optionally stops at a
//! depth, reporting the commits where it stopped as the shallow boundary.
//!
//! `objects()` extends the selection to everything a pack must carry:
//! the commits plus every tree and blob they reference that the excluded
//! side does not already have.

use crate::artifacts::history::History;
use crate::artifacts::objects::object::ObjectBox;
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::RepositoryError;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Walk {
    /// Selected commits, newest first
    pub commits: Vec<ObjectId>,
    /// Selected commits whose parents were cut off by the depth limit
    pub boundary: BTreeSet<ObjectId>,
}

pub struct RevList<'h, 'r> {
    history: &'h History<'r>,
    include: Vec<ObjectId>,
    exclude: Vec<ObjectId>,
    depth: Option<usize>,
}

impl<'h, 'r> RevList<'h, 'r> {
    pub fn new(history: &'h History<'r>, include: impl IntoIterator<Item = ObjectId>) -> Self {
        Self {
            history,
            include: include.into_iter().collect(),
            exclude: Vec::new(),
            depth: None,
        }
    }

    /// Hide everything reachable from `exclude`; unknown IDs are ignored
    pub fn excluding(mut self, exclude: impl IntoIterator<Item = ObjectId>) -> Self {
        self.exclude.extend(exclude);
        self
    }

    /// Keep only the first `depth` generations below each tip
    pub fn with_depth(mut self, depth: Option<usize>) -> Self {
        self.depth = depth.filter(|depth| *depth > 0);
        self
    }

    fn commit_tips(&self, oids: &[ObjectId]) -> anyhow::Result<Vec<ObjectId>> {
        let database = self.history.database();
        let mut tips = Vec::new();

        for oid in oids {
            if !database.contains(oid) {
                continue;
            }
            if let Ok(commit) = database.peel_to_commit(oid) {
                tips.push(commit);
            }
        }

        Ok(tips)
    }

    fn excluded_commits(&self) -> anyhow::Result<HashSet<ObjectId>> {
        let mut excluded = HashSet::new();
        let mut pending = self.commit_tips(&self.exclude)?;

        while let Some(oid) = pending.pop() {
            if !excluded.insert(oid.clone()) {
                continue;
            }
            pending.extend(self.history.parents(&oid)?);
        }

        Ok(excluded)
    }

    pub fn walk(&self) -> anyhow::Result<Walk> {
        let excluded = self.excluded_commits()?;
        let mut depths = HashMap::<ObjectId, usize>::new();
        let mut queue = BinaryHeap::new();
        let mut seen = HashSet::new();
        let mut walk = Walk::default();

        for tip in self.commit_tips(&self.include)? {
            if excluded.contains(&tip) {
                continue;
            }
            depths.insert(tip.clone(), 1);
            queue.push(self.history.slim_commit(&tip)?);
        }

        while let Some(commit) = queue.pop() {
            if !seen.insert(commit.oid.clone()) {
                continue;
            }
            walk.commits.push(commit.oid.clone());

            let depth = depths.get(&commit.oid).copied().unwrap_or(1);
            if self.depth.is_some_and(|limit| depth >= limit) {
                if !commit.parents.is_empty() {
                    walk.boundary.insert(commit.oid.clone());
                }
                continue;
            }

            for parent in &commit.parents {
                if excluded.contains(parent) || seen.contains(parent) {
                    continue;
                }
                let parent_depth = depths.entry(parent.clone()).or_insert(depth + 1);
                *parent_depth = (*parent_depth).min(depth + 1);
                queue.push(self.history.slim_commit(parent)?);
            }
        }

        tracing::debug!(
            commits = walk.commits.len(),
            boundary = walk.boundary.len(),
            excluded = excluded.len(),
            "revision walk finished"
        );
        Ok(walk)
    }

    /// Commits, annotated tags, trees and blobs the excluded side lacks
    pub fn objects(&self) -> anyhow::Result<(Vec<ObjectId>, Walk)> {
        let walk = self.walk()?;
        let database = self.history.database();

        // trees already present on the excluded side: those of the excluded
        // tips and of the excluded parents of selected commits
        let mut edge = self.commit_tips(&self.exclude)?;
        for oid in &walk.commits {
            for parent in self.history.parents(oid)? {
                if !walk.commits.contains(&parent) && database.contains(&parent) {
                    edge.push(parent);
                }
            }
        }
        let mut uninteresting = HashSet::new();
        for oid in edge {
            let tree = database.peel_to_tree(&oid)?;
            self.collect_tree(&tree, &mut uninteresting, &HashSet::new(), &mut Vec::new())?;
        }

        let mut objects = Vec::new();
        let mut seen = HashSet::new();

        for tip in &self.include {
            if let ObjectBox::Tag(_) = database.parse_object(tip)? {
                self.collect_tag(tip, &mut seen, &uninteresting, &mut objects)?;
            }
        }

        for oid in &walk.commits {
            if seen.insert(oid.clone()) {
                objects.push(oid.clone());
            }
        }
        for oid in &walk.commits {
            let tree = database.load_commit(oid)?.tree_oid().clone();
            self.collect_tree(&tree, &mut seen, &uninteresting, &mut objects)?;
        }

        tracing::debug!(objects = objects.len(), "object closure computed");
        Ok((objects, walk))
    }

    fn collect_tag(
        &self,
        oid: &ObjectId,
        seen: &mut HashSet<ObjectId>,
        uninteresting: &HashSet<ObjectId>,
        objects: &mut Vec<ObjectId>,
    ) -> anyhow::Result<()> {
        if !seen.insert(oid.clone()) {
            return Ok(());
        }
        objects.push(oid.clone());

        match self.history.database().parse_object(oid)? {
            ObjectBox::Tag(tag) => self.collect_tag(tag.target(), seen, uninteresting, objects),
            ObjectBox::Tree(_) => {
                seen.remove(oid);
                objects.pop();
                self.collect_tree(oid, seen, uninteresting, objects)
            }
            // commits are covered by the walk, blobs are complete as they are
            _ => Ok(()),
        }
    }

    fn collect_tree(
        &self,
        tree_oid: &ObjectId,
        seen: &mut HashSet<ObjectId>,
        uninteresting: &HashSet<ObjectId>,
        objects: &mut Vec<ObjectId>,
    ) -> anyhow::Result<()> {
        if uninteresting.contains(tree_oid) || !seen.insert(tree_oid.clone()) {
            return Ok(());
        }
        objects.push(tree_oid.clone());

        for (_, entry) in self.history.database().load_tree(tree_oid)?.into_entries() {
            if entry.is_tree() {
                self.collect_tree(&entry.oid, seen, uninteresting, objects)?;
            } else if !uninteresting.contains(&entry.oid) && seen.insert(entry.oid.clone()) {
                objects.push(entry.oid);
            }
        }

        Ok(())
    }

    /// Fail unless every object reachable from the tips is present
    ///
    /// The walk stops at commits in `known`, whose closure is assumed
    /// complete.
    pub fn check_connectivity(&self, known: &HashSet<ObjectId>) -> anyhow::Result<()> {
        let database = self.history.database();
        let mut pending = self.include.clone();
        let mut seen = HashSet::new();

        while let Some(oid) = pending.pop() {
            if known.contains(&oid) || !seen.insert(oid.clone()) {
                continue;
            }
            if !database.contains(&oid) {
                return Err(RepositoryError::ObjectNotFound(oid).into());
            }

            match database.parse_object(&oid)? {
                ObjectBox::Commit(commit) => {
                    pending.push(commit.tree_oid().clone());
                    if !self.history.is_shallow(&oid) {
                        pending.extend(commit.parents().iter().cloned());
                    }
                }
                ObjectBox::Tree(tree) => {
                    pending.extend(tree.into_entries().map(|(_, entry)| entry.oid));
                }
                ObjectBox::Tag(tag) => pending.push(tag.target().clone()),
                ObjectBox::Blob(_) => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::history::fixtures::{Graph, graph};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    fn walk_is_newest_first_and_stops_at_exclusions(mut graph: Graph) {
        let a = graph.commit(&[], "a");
        let b = graph.commit(&[&a], "b");
        let c = graph.commit(&[&b], "c");
        let d = graph.commit(&[&b], "d");
        let merge = graph.commit(&[&c, &d], "merge");
        let history = History::new(&graph.database, BTreeSet::new());

        let walk = RevList::new(&history, [merge.clone()])
            .excluding([b.clone()])
            .walk()
            .unwrap();

        assert_eq!(walk.commits, vec![merge, d, c]);
        assert!(walk.boundary.is_empty());
    }

    #[rstest]
    fn depth_limit_reports_boundary(mut graph: Graph) {
        let a = graph.commit(&[], "a");
        let b = graph.commit(&[&a], "b");
        let c = graph.commit(&[&b], "c");
        let history = History::new(&graph.database, BTreeSet::new());

        let walk = RevList::new(&history, [c.clone()]).with_depth(Some(2)).walk().unwrap();

        assert_eq!(walk.commits, vec![c, b.clone()]);
        assert_eq!(walk.boundary, BTreeSet::from([b]));
    }

    #[rstest]
    fn objects_skip_content_the_other_side_has(mut graph: Graph) {
        let a = graph.commit_files(&[], &[("same.txt", "shared"), ("dir/x.txt", "x")]);
        let b = graph.commit_files(&[&a], &[("same.txt", "shared"), ("dir/x.txt", "x2")]);
        let history = History::new(&graph.database, BTreeSet::new());

        let (objects, walk) = RevList::new(&history, [b.clone()])
            .excluding([a.clone()])
            .objects()
            .unwrap();

        assert_eq!(walk.commits, vec![b.clone()]);
        // commit, root tree, dir tree, new blob
        assert_eq!(objects.len(), 4);
        assert_eq!(objects[0], b);
        let shared = crate::artifacts::objects::object::hash_object(
            crate::artifacts::objects::object_type::ObjectType::Blob,
            b"shared",
        );
        assert!(!objects.contains(&shared));
    }

    #[rstest]
    fn unknown_exclusions_are_ignored(mut graph: Graph) {
        let a = graph.commit(&[], "a");
        let history = History::new(&graph.database, BTreeSet::new());

        let walk = RevList::new(&history, [a.clone()])
            .excluding([ObjectId::digest(b"elsewhere")])
            .walk()
            .unwrap();

        assert_eq!(walk.commits, vec![a]);
    }

    #[rstest]
    fn connectivity_check_finds_missing_parent(mut graph: Graph) {
        let a = graph.commit(&[], "a");
        let b = graph.commit(&[&a], "b");
        let history = History::new(&graph.database, BTreeSet::new());
        assert!(RevList::new(&history, [b.clone()]).check_connectivity(&HashSet::new()).is_ok());

        std::fs::remove_file(graph.database.objects_path().join(a.to_path())).unwrap();
        let history = History::new(&graph.database, BTreeSet::new());

        let error = RevList::new(&history, [b]).check_connectivity(&HashSet::new()).unwrap_err();
        assert!(matches!(
            crate::errors::classify(&error),
            Some(RepositoryError::ObjectNotFound(_))
        ));
    }
}
