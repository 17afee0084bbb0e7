//! Best common ancestor search
//!
//! Finds every best common ancestor (merge base) of two commits. A best
//! common ancestor of X and Y is a common ancestor of X and Y that is not an
//! ancestor of any other common ancestor.
//!
//! ## Algorithm
//!
//! ### Phase 1: paint
//!
//! Both tips are pushed on a priority queue ordered by commit time, newest
//! first. Each popped commit passes its flags (reached from source, reached
//! from target) down to its parents. A commit reached from both sides is a
//! candidate; its parents are marked STALE so that the walk stops descending
//! below it.
//!
//! ### Phase 2: redundancy filter
//!
//! Clock skew can let the paint phase report a candidate that is itself an
//! ancestor of another candidate. Every candidate reachable from another
//! candidate is dropped, which leaves exactly the best common ancestors.
//!
//! The loader is a closure so the same code runs over the object database
//! and over the in-memory graphs used by the tests.

use crate::artifacts::objects::commit::SlimCommit;
use crate::artifacts::objects::object_id::ObjectId;
use bitflags::bitflags;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    struct VisitState: u8 {
        const NONE = 0b00;
        const VISITED_FROM_SOURCE = 0b01;
        const VISITED_FROM_TARGET = 0b10;
        const VISITED_FROM_BOTH = Self::VISITED_FROM_SOURCE.bits() | Self::VISITED_FROM_TARGET.bits();
        const STALE = 0b100;
        const RESULT = 0b1000;
    }
}

impl fmt::Debug for VisitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.contains(VisitState::VISITED_FROM_SOURCE) {
            flags.push("SOURCE");
        }
        if self.contains(VisitState::VISITED_FROM_TARGET) {
            flags.push("TARGET");
        }
        if self.contains(VisitState::STALE) {
            flags.push("STALE");
        }
        if self.contains(VisitState::RESULT) {
            flags.push("RESULT");
        }
        if flags.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", flags.join("|"))
        }
    }
}

/// Finds the best common ancestors of two commits
///
/// `CommitLoaderFn` maps a commit ID to its parents and commit time. Any
/// error it returns (a missing or corrupt commit) aborts the search.
pub struct BCAFinder<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> anyhow::Result<SlimCommit>,
{
    commit_loader: CommitLoaderFn,
}

impl<CommitLoaderFn> BCAFinder<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> anyhow::Result<SlimCommit>,
{
    pub fn new(commit_loader: CommitLoaderFn) -> Self {
        Self { commit_loader }
    }

    /// All best common ancestors of the two commits, sorted by ID
    ///
    /// Empty when the histories are unrelated. A single element for ordinary
    /// histories; several for criss-cross merges.
    pub fn find_best_common_ancestors(
        &self,
        source_commit_id: &ObjectId,
        target_commit_id: &ObjectId,
    ) -> anyhow::Result<Vec<ObjectId>> {
        let candidates = self.find_common_ancestors(source_commit_id, target_commit_id)?;
        tracing::trace!(count = candidates.len(), "common ancestor candidates");

        let mut redundant = HashSet::new();
        for candidate in &candidates {
            if redundant.contains(candidate) {
                continue;
            }

            let others = candidates
                .iter()
                .filter(|other| *other != candidate && !redundant.contains(*other))
                .collect::<HashSet<_>>();

            for reached in self.reachable_among(candidate, &others)? {
                redundant.insert(reached.clone());
            }
        }

        let mut best = candidates
            .into_iter()
            .filter(|candidate| !redundant.contains(candidate))
            .collect::<Vec<_>>();
        best.sort();

        tracing::debug!(
            source = %source_commit_id,
            target = %target_commit_id,
            bases = ?best.iter().map(ObjectId::to_short_oid).collect::<Vec<_>>(),
            "best common ancestors"
        );

        Ok(best)
    }

    /// One best common ancestor: the first in ID order
    pub fn find_best_common_ancestor(
        &self,
        source_commit_id: &ObjectId,
        target_commit_id: &ObjectId,
    ) -> anyhow::Result<Option<ObjectId>> {
        Ok(self
            .find_best_common_ancestors(source_commit_id, target_commit_id)?
            .into_iter()
            .next())
    }

    fn find_common_ancestors(
        &self,
        source_commit_id: &ObjectId,
        target_commit_id: &ObjectId,
    ) -> anyhow::Result<Vec<ObjectId>> {
        if source_commit_id == target_commit_id {
            return Ok(vec![source_commit_id.clone()]);
        }

        let mut ancestors_states = HashMap::<ObjectId, VisitState>::new();
        let mut priority_queue = BinaryHeap::new();

        for (commit_id, state) in [
            (source_commit_id, VisitState::VISITED_FROM_SOURCE),
            (target_commit_id, VisitState::VISITED_FROM_TARGET),
        ] {
            let commit = (self.commit_loader)(commit_id)?;
            ancestors_states.insert(commit.oid.clone(), state);
            priority_queue.push((commit.timestamp, commit.oid));
        }

        while let Some((_, commit_id)) = priority_queue.pop() {
            let current_state = ancestors_states
                .get(&commit_id)
                .copied()
                .unwrap_or(VisitState::NONE);

            if current_state.contains(VisitState::STALE) {
                continue;
            }

            let is_common_ancestor = current_state.contains(VisitState::VISITED_FROM_BOTH);
            if is_common_ancestor {
                ancestors_states
                    .entry(commit_id.clone())
                    .and_modify(|state| *state |= VisitState::RESULT);
            }

            let current_commit = (self.commit_loader)(&commit_id)?;
            for parent_id in &current_commit.parents {
                let parent_state = ancestors_states
                    .get(parent_id)
                    .copied()
                    .unwrap_or(VisitState::NONE);

                let mut new_state = parent_state | current_state;
                if is_common_ancestor {
                    new_state |= VisitState::STALE;
                }

                if !parent_state.contains(new_state) {
                    let parent_commit = (self.commit_loader)(parent_id)?;
                    ancestors_states.insert(parent_id.clone(), new_state);
                    priority_queue.push((parent_commit.timestamp, parent_id.clone()));
                }
            }
        }

        tracing::trace!(states = ?ancestors_states, "paint finished");

        Ok(ancestors_states
            .into_iter()
            .filter(|(_, state)| !state.contains(VisitState::STALE) && state.contains(VisitState::RESULT))
            .map(|(oid, _)| oid)
            .collect())
    }

    /// Members of `targets` reachable by walking parents from `start`
    fn reachable_among<'t>(
        &self,
        start: &ObjectId,
        targets: &HashSet<&'t ObjectId>,
    ) -> anyhow::Result<Vec<&'t ObjectId>> {
        let mut found = Vec::new();
        if targets.is_empty() {
            return Ok(found);
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start.clone()]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }

            for parent in (self.commit_loader)(&current)?.parents {
                if let Some(target) = targets.get(&parent) {
                    found.push(*target);
                }
                queue.push_back(parent);
            }
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[derive(Debug, Clone, Default)]
    struct InMemoryCommitStore {
        commits: HashMap<ObjectId, (Vec<ObjectId>, DateTime<FixedOffset>)>,
    }

    impl InMemoryCommitStore {
        fn add_commit(&mut self, name: &str, parents: &[&str]) {
            // one hour apart, in insertion order
            let offset = self.commits.len() as i64 * 3600;
            let timestamp = FixedOffset::east_opt(0)
                .unwrap()
                .timestamp_opt(1_640_995_200 + offset, 0)
                .unwrap();
            self.add_commit_with_timestamp(name, parents, timestamp);
        }

        fn add_commit_with_timestamp(&mut self, name: &str, parents: &[&str], timestamp: DateTime<FixedOffset>) {
            let parents = parents.iter().map(|parent| oid(parent)).collect();
            self.commits.insert(oid(name), (parents, timestamp));
        }

        fn load(&self, commit_id: &ObjectId) -> anyhow::Result<SlimCommit> {
            let (parents, timestamp) = self
                .commits
                .get(commit_id)
                .ok_or_else(|| anyhow::anyhow!("commit {commit_id} not in store"))?;
            Ok(SlimCommit {
                oid: commit_id.clone(),
                parents: parents.clone(),
                timestamp: *timestamp,
            })
        }

        fn bases(&self, source: &str, target: &str) -> Vec<ObjectId> {
            BCAFinder::new(|commit_id| self.load(commit_id))
                .find_best_common_ancestors(&oid(source), &oid(target))
                .unwrap()
        }
    }

    /// Deterministic ID that encodes the commit name
    fn oid(name: &str) -> ObjectId {
        let mut hex = name.bytes().map(|byte| format!("{byte:02x}")).collect::<String>();
        hex.truncate(40);
        while hex.len() < 40 {
            hex.push('0');
        }
        ObjectId::try_parse(hex).unwrap()
    }

    fn sorted(names: &[&str]) -> Vec<ObjectId> {
        let mut oids = names.iter().map(|name| oid(name)).collect::<Vec<_>>();
        oids.sort();
        oids
    }

    #[fixture]
    fn linear_history() -> InMemoryCommitStore {
        // A <- B <- C <- D
        let mut store = InMemoryCommitStore::default();
        store.add_commit("a", &[]);
        store.add_commit("b", &["a"]);
        store.add_commit("c", &["b"]);
        store.add_commit("d", &["c"]);
        store
    }

    #[fixture]
    fn criss_cross() -> InMemoryCommitStore {
        //     A
        //    / \
        //   B   C
        //   |\ /|
        //   | X |
        //   |/ \|
        //   D   E
        //   |   |
        //   F   G
        let mut store = InMemoryCommitStore::default();
        store.add_commit("a", &[]);
        store.add_commit("b", &["a"]);
        store.add_commit("c", &["a"]);
        store.add_commit("d", &["b", "c"]);
        store.add_commit("e", &["c", "b"]);
        store.add_commit("f", &["d"]);
        store.add_commit("g", &["e"]);
        store
    }

    #[rstest]
    #[case("b", "d", &["b"])]
    #[case("d", "b", &["b"])]
    #[case("c", "c", &["c"])]
    fn ancestor_is_its_own_base(
        linear_history: InMemoryCommitStore,
        #[case] source: &str,
        #[case] target: &str,
        #[case] expected: &[&str],
    ) {
        assert_eq!(linear_history.bases(source, target), sorted(expected));
    }

    #[rstest]
    fn forked_branches_meet_at_fork_point() {
        //     A
        //    / \
        //   B   C
        //   |
        //   D
        let mut store = InMemoryCommitStore::default();
        store.add_commit("a", &[]);
        store.add_commit("b", &["a"]);
        store.add_commit("c", &["a"]);
        store.add_commit("d", &["b"]);

        assert_eq!(store.bases("d", "c"), sorted(&["a"]));
    }

    #[rstest]
    fn criss_cross_yields_both_bases(criss_cross: InMemoryCommitStore) {
        assert_eq!(criss_cross.bases("f", "g"), sorted(&["b", "c"]));
    }

    #[rstest]
    fn unrelated_histories_have_no_base() {
        let mut store = InMemoryCommitStore::default();
        store.add_commit("a", &[]);
        store.add_commit("b", &["a"]);
        store.add_commit("x", &[]);
        store.add_commit("y", &["x"]);

        assert!(store.bases("b", "y").is_empty());
    }

    #[rstest]
    fn merge_commit_can_be_the_base() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   M
        //  / \
        // D   E
        let mut store = InMemoryCommitStore::default();
        store.add_commit("a", &[]);
        store.add_commit("b", &["a"]);
        store.add_commit("c", &["a"]);
        store.add_commit("m", &["b", "c"]);
        store.add_commit("d", &["m"]);
        store.add_commit("e", &["m"]);

        assert_eq!(store.bases("d", "e"), sorted(&["m"]));
    }

    #[rstest]
    fn skewed_clocks_do_not_leak_redundant_bases() {
        // B claims to be older than its parent A
        let mut store = InMemoryCommitStore::default();
        let at = |seconds| FixedOffset::east_opt(0).unwrap().timestamp_opt(seconds, 0).unwrap();
        store.add_commit_with_timestamp("a", &[], at(5_000));
        store.add_commit_with_timestamp("b", &["a"], at(1_000));
        store.add_commit_with_timestamp("c", &["b"], at(6_000));
        store.add_commit_with_timestamp("d", &["b"], at(7_000));

        assert_eq!(store.bases("c", "d"), sorted(&["b"]));
    }

    #[rstest]
    fn missing_commit_is_an_error() {
        let mut store = InMemoryCommitStore::default();
        store.add_commit("b", &["a"]);
        store.add_commit("c", &[]);

        let result = BCAFinder::new(|commit_id| store.load(commit_id))
            .find_best_common_ancestors(&oid("b"), &oid("c"));

        assert!(result.is_err());
    }
}
