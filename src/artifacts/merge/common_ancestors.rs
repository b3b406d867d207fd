//! Common ancestor discovery
//!
//! A bidirectional walk over the commit graph finds the commits reachable
//! from both sides of a merge. Commits are processed newest-first; a commit
//! discovered from the first side carries `PARENT1`, from the second side
//! `PARENT2`, and one carrying both is a candidate ancestor. `STALE`
//! propagates from candidates to their ancestors so the walk stops once the
//! whole frontier is stale.
//!
//! A second pass ([`Bases`]) filters the candidates down to the minimal set:
//! a best common ancestor is any common ancestor that is not an ancestor of
//! another common ancestor.

use crate::artifacts::objects::commit::SlimCommit;
use crate::artifacts::objects::object_id::ObjectId;
use bitflags::bitflags;
use chrono::{DateTime, FixedOffset};
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Anything that can produce the slim form of a commit by ID
///
/// Implemented by the object database; tests use in-memory graphs.
pub trait CommitSource {
    fn slim_commit(&self, oid: &ObjectId) -> anyhow::Result<SlimCommit>;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct ParentFlags: u8 {
        const PARENT1 = 0b0001;
        const PARENT2 = 0b0010;
        const STALE = 0b0100;
        const RESULT = 0b1000;
        const BOTH_PARENTS = Self::PARENT1.bits() | Self::PARENT2.bits();
    }
}

pub struct CommonAncestors<'s, S: CommitSource> {
    source: &'s S,
    cache: HashMap<ObjectId, SlimCommit>,
    flags: HashMap<ObjectId, ParentFlags>,
    /// Frontier, popped newest-first
    queue: BinaryHeap<(DateTime<FixedOffset>, ObjectId)>,
    results: Vec<(DateTime<FixedOffset>, ObjectId)>,
}

impl<'s, S: CommitSource> CommonAncestors<'s, S> {
    pub fn new(source: &'s S, one: &ObjectId, twos: &[ObjectId]) -> anyhow::Result<Self> {
        let mut walk = CommonAncestors {
            source,
            cache: HashMap::new(),
            flags: HashMap::new(),
            queue: BinaryHeap::new(),
            results: Vec::new(),
        };

        walk.insert(ParentFlags::PARENT1, one)?;
        for two in twos {
            walk.insert(ParentFlags::PARENT2, two)?;
        }

        Ok(walk)
    }

    /// Run the walk and report candidate ancestors, newest first
    pub fn find(&mut self) -> anyhow::Result<Vec<ObjectId>> {
        while !self.all_stale() {
            self.process_queue()?;
        }

        let mut results = self.results.clone();
        results.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(results
            .into_iter()
            .map(|(_, oid)| oid)
            .filter(|oid| !self.marked(oid, ParentFlags::STALE))
            .collect())
    }

    /// Whether the walk discovered this commit from the first side
    pub fn reachable_from_one(&self, oid: &ObjectId) -> bool {
        self.marked(oid, ParentFlags::PARENT1)
    }

    /// Whether the walk discovered this commit from the second side
    pub fn reachable_from_two(&self, oid: &ObjectId) -> bool {
        self.marked(oid, ParentFlags::PARENT2)
    }

    /// The committer timestamp of a commit visited by this walk
    pub fn timestamp_of(&self, oid: &ObjectId) -> Option<DateTime<FixedOffset>> {
        self.cache.get(oid).map(|slim| slim.timestamp)
    }

    fn insert(&mut self, flag: ParentFlags, oid: &ObjectId) -> anyhow::Result<()> {
        let commit = self.load(oid)?;
        let timestamp = commit.timestamp;

        *self.flags.entry(oid.clone()).or_default() |= flag;
        self.queue.push((timestamp, oid.clone()));

        Ok(())
    }

    fn load(&mut self, oid: &ObjectId) -> anyhow::Result<&SlimCommit> {
        if !self.cache.contains_key(oid) {
            let slim = self.source.slim_commit(oid)?;
            self.cache.insert(oid.clone(), slim);
        }

        Ok(&self.cache[oid])
    }

    fn process_queue(&mut self) -> anyhow::Result<()> {
        let Some((timestamp, oid)) = self.queue.pop() else {
            return Ok(());
        };

        let flags = self.flags.get(&oid).copied().unwrap_or_default();

        // Exact equality: once RESULT or STALE is set the commit cannot be
        // (re)reported
        if flags == ParentFlags::BOTH_PARENTS {
            let flags = flags | ParentFlags::RESULT;
            self.flags.insert(oid.clone(), flags);
            self.results.push((timestamp, oid.clone()));
            self.add_parents(&oid, flags | ParentFlags::STALE)?;
        } else {
            self.add_parents(&oid, flags)?;
        }

        Ok(())
    }

    fn add_parents(&mut self, oid: &ObjectId, flags: ParentFlags) -> anyhow::Result<()> {
        let parents = self.load(oid)?.parents.clone();

        for parent in parents {
            let existing = self.flags.get(&parent).copied().unwrap_or_default();
            if existing.contains(flags) {
                continue;
            }

            self.flags.insert(parent.clone(), existing | flags);
            let timestamp = self.load(&parent)?.timestamp;
            self.queue.push((timestamp, parent));
        }

        Ok(())
    }

    fn all_stale(&self) -> bool {
        self.queue
            .iter()
            .all(|(_, oid)| self.marked(oid, ParentFlags::STALE))
    }

    fn marked(&self, oid: &ObjectId, flag: ParentFlags) -> bool {
        self.flags
            .get(oid)
            .map(|flags| flags.contains(flag))
            .unwrap_or(false)
    }
}

/// The minimal set of best common ancestors of two commits
pub struct Bases;

impl Bases {
    /// Find the merge bases of `one` and `two`, oldest first
    ///
    /// Candidates reachable from another candidate are filtered out. When
    /// several independent bases remain (criss-cross histories) all are
    /// returned; the caller picks its policy.
    pub fn find<S: CommitSource>(
        source: &S,
        one: &ObjectId,
        two: &ObjectId,
    ) -> anyhow::Result<Vec<ObjectId>> {
        let mut common = CommonAncestors::new(source, one, std::slice::from_ref(two))?;
        let commits = common.find()?;

        if commits.len() <= 1 {
            return Ok(commits);
        }

        let mut redundant = HashSet::new();

        for commit in &commits {
            if redundant.contains(commit) {
                continue;
            }

            let others: Vec<ObjectId> = commits
                .iter()
                .filter(|other| *other != commit && !redundant.contains(*other))
                .cloned()
                .collect();

            let mut probe = CommonAncestors::new(source, commit, &others)?;
            probe.find()?;

            if probe.reachable_from_two(commit) {
                redundant.insert(commit.clone());
            }
            for other in &others {
                if probe.reachable_from_one(other) {
                    redundant.insert(other.clone());
                }
            }
        }

        let mut bases: Vec<(Option<DateTime<FixedOffset>>, ObjectId)> = commits
            .into_iter()
            .filter(|commit| !redundant.contains(commit))
            .map(|commit| (common.timestamp_of(&commit), commit))
            .collect();
        bases.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(bases.into_iter().map(|(_, oid)| oid).collect())
    }
}
