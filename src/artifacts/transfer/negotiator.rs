//! Client side of have/ACK negotiation
//!
//! The negotiator walks local history newest first from the local tips and
//! offers commits to the server in batches. Each round is an explicit value:
//! the negotiator hands out a [`Round`], the caller sends its haves and
//! feeds the server's acknowledgements back through [`Negotiator::receive`].
//! Commits below an acknowledged one are not offered again, since the server
//! already knows their closure.
//!
//! Negotiation ends when local history is exhausted or after the configured
//! number of rounds, whichever comes first. Nothing persists between
//! attempts: a dropped connection starts over with a fresh negotiator.

use crate::artifacts::history::History;
use crate::artifacts::objects::commit::SlimCommit;
use crate::artifacts::objects::object_id::ObjectId;
use std::collections::{BTreeSet, BinaryHeap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub number: usize,
    pub haves: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send these haves and wait for the server's reply
    Send(Round),
    /// Send `done`
    Done,
}

pub struct Negotiator<'h, 'r> {
    history: &'h History<'r>,
    queue: BinaryHeap<SlimCommit>,
    seen: HashSet<ObjectId>,
    /// Acknowledged commits and the parents they imply
    common: HashSet<ObjectId>,
    acknowledged: BTreeSet<ObjectId>,
    rounds: usize,
    max_rounds: usize,
    haves_per_round: usize,
}

impl<'h, 'r> Negotiator<'h, 'r> {
    pub fn new(
        history: &'h History<'r>,
        tips: impl IntoIterator<Item = ObjectId>,
        max_rounds: usize,
        haves_per_round: usize,
    ) -> anyhow::Result<Self> {
        let mut negotiator = Self {
            history,
            queue: BinaryHeap::new(),
            seen: HashSet::new(),
            common: HashSet::new(),
            acknowledged: BTreeSet::new(),
            rounds: 0,
            max_rounds,
            haves_per_round: haves_per_round.max(1),
        };

        let database = history.database();
        for tip in tips {
            // tags may point at trees or blobs; only commits carry history
            if let Ok(commit) = database.peel_to_commit(&tip) {
                negotiator.enqueue(&commit)?;
            }
        }

        Ok(negotiator)
    }

    fn enqueue(&mut self, oid: &ObjectId) -> anyhow::Result<()> {
        if self.seen.insert(oid.clone()) {
            self.queue.push(self.history.slim_commit(oid)?);
        }
        Ok(())
    }

    pub fn step(&mut self) -> anyhow::Result<Step> {
        if self.rounds >= self.max_rounds {
            tracing::debug!(rounds = self.rounds, "negotiation round limit reached");
            return Ok(Step::Done);
        }

        let mut haves = Vec::with_capacity(self.haves_per_round);
        while haves.len() < self.haves_per_round {
            let Some(commit) = self.queue.pop() else {
                break;
            };
            if self.common.contains(&commit.oid) {
                continue;
            }
            for parent in &commit.parents {
                self.enqueue(parent)?;
            }
            haves.push(commit.oid);
        }

        if haves.is_empty() {
            return Ok(Step::Done);
        }

        self.rounds += 1;
        tracing::debug!(round = self.rounds, haves = haves.len(), "negotiation round");
        Ok(Step::Send(Round {
            number: self.rounds,
            haves,
        }))
    }

    /// Record the server's acknowledgements for `round`
    pub fn receive(&mut self, round: &Round, acks: &[ObjectId]) -> anyhow::Result<()> {
        for oid in acks {
            if !round.haves.contains(oid) {
                tracing::warn!(%oid, round = round.number, "server acknowledged a commit we never offered");
                continue;
            }
            self.acknowledged.insert(oid.clone());
            self.common.insert(oid.clone());
            for parent in self.history.parents(oid)? {
                self.common.insert(parent);
            }
        }
        Ok(())
    }

    pub fn acknowledged(&self) -> &BTreeSet<ObjectId> {
        &self.acknowledged
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }
}
