//! Commit-graph traversal
//!
//! Enumerates commits reachable from a set of inclusion roots but not from
//! exclusion roots, in reverse chronological order, optionally restricted to
//! commits that change at least one path in a filter set.
//!
//! Revision inputs take four forms:
//! - a plain name includes the tip of that revision
//! - `^R` excludes `R` and its ancestors
//! - `A..B` is shorthand for `^A B`
//! - a workspace path narrows the walk to commits touching it
//!
//! With `objects` enabled the walk also yields the unique trees and blobs
//! reachable from the result commits, skipping anything reachable from an
//! excluded commit; this feeds the pack writer. With `walk` disabled only
//! the input commits themselves are yielded, which is what fetch negotiation
//! needs.

use crate::areas::repository::Repository;
use crate::artifacts::branch::revision::Revision;
use crate::artifacts::diff::tree_diff::ChangeSet;
use crate::artifacts::log::path_filter::PathFilter;
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::objects::object_id::ObjectId;
use bitflags::bitflags;
use chrono::{DateTime, FixedOffset};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct CommitFlags: u8 {
        /// The commit has been enqueued at least once
        const SEEN = 0b0001;
        /// The commit's parents have been enqueued
        const ADDED = 0b0010;
        /// The commit (or object) is reachable from an exclusion root
        const UNINTERESTING = 0b0100;
        /// Some parent has an identical filtered tree
        const TREESAME = 0b1000;
    }
}

/// Walk configuration
#[derive(Debug, Clone, Copy)]
pub struct RevListOptions {
    /// Follow parents; disabled for fetch negotiation input lists
    pub walk: bool,
    /// Also yield trees and blobs reachable from the result commits
    pub objects: bool,
}

impl Default for RevListOptions {
    fn default() -> Self {
        RevListOptions {
            walk: true,
            objects: false,
        }
    }
}

type QueueEntry = (DateTime<FixedOffset>, ObjectId);

pub struct RevList<'r> {
    repository: &'r Repository,
    commits: HashMap<ObjectId, Commit>,
    flags: HashMap<ObjectId, CommitFlags>,
    /// Commits to visit, newest first
    queue: VecDeque<QueueEntry>,
    output: Vec<QueueEntry>,
    prune: Vec<PathBuf>,
    filter: PathFilter,
    diffs: HashMap<(Option<ObjectId>, ObjectId), ChangeSet>,
    /// Root trees of yielded commits, traversed after the commit walk
    pending: Vec<(ObjectId, PathBuf)>,
    limited: bool,
    primed: bool,
    walk: bool,
    objects: bool,
}

impl<'r> RevList<'r> {
    pub fn new(
        repository: &'r Repository,
        revs: &[String],
        options: RevListOptions,
    ) -> anyhow::Result<Self> {
        let mut list = RevList {
            repository,
            commits: HashMap::new(),
            flags: HashMap::new(),
            queue: VecDeque::new(),
            output: Vec::new(),
            prune: Vec::new(),
            filter: PathFilter::empty(),
            diffs: HashMap::new(),
            pending: Vec::new(),
            limited: false,
            primed: false,
            walk: options.walk,
            objects: options.objects,
        };

        let mut has_interesting_start = false;
        for rev in revs {
            has_interesting_start |= list.handle_revision(rev)?;
        }
        if !has_interesting_start {
            list.set_start_point("HEAD", true)?;
        }

        list.filter = PathFilter::build(list.prune.clone());

        Ok(list)
    }

    /// Process one input; returns whether it contributed an inclusion root
    fn handle_revision(&mut self, rev: &str) -> anyhow::Result<bool> {
        if self.repository.workspace().contains(rev) {
            self.prune.push(PathBuf::from(rev));
            Ok(false)
        } else if let Some((a, b)) = rev.split_once("..") {
            self.set_start_point(a, false)?;
            self.set_start_point(b, true)?;
            Ok(true)
        } else if let Some(stripped) = rev.strip_prefix('^') {
            self.set_start_point(stripped, false)?;
            Ok(false)
        } else {
            self.set_start_point(rev, true)?;
            Ok(true)
        }
    }

    fn set_start_point(&mut self, rev: &str, interesting: bool) -> anyhow::Result<()> {
        let rev = if rev.is_empty() { "HEAD" } else { rev };

        let oid = Revision::parse(rev)?.resolve(self.repository)?;
        let Some(oid) = oid else {
            if rev == "HEAD" {
                // Unborn HEAD: an empty walk
                return Ok(());
            }
            anyhow::bail!("not a valid revision: '{}'", rev);
        };

        self.load_commit(&oid)?;
        self.enqueue_commit(&oid);

        if !interesting {
            self.limited = true;
            self.mark(&oid, CommitFlags::UNINTERESTING);
            self.mark_parents_uninteresting(&oid);
        }

        Ok(())
    }

    fn load_commit(&mut self, oid: &ObjectId) -> anyhow::Result<&Commit> {
        if !self.commits.contains_key(oid) {
            let commit = self
                .repository
                .database()
                .parse_object_as_commit(oid)?
                .ok_or_else(|| anyhow::anyhow!("object {} is not a commit", oid))?;
            self.commits.insert(oid.clone(), commit);
        }

        Ok(&self.commits[oid])
    }

    fn enqueue_commit(&mut self, oid: &ObjectId) {
        if !self.mark(oid, CommitFlags::SEEN) {
            return;
        }

        let timestamp = self.commits[oid].timestamp();

        if self.walk {
            // Insertion sort keeps the queue in reverse date order
            let index = self
                .queue
                .iter()
                .position(|(date, _)| *date < timestamp)
                .unwrap_or(self.queue.len());
            self.queue.insert(index, (timestamp, oid.clone()));
        } else {
            self.queue.push_back((timestamp, oid.clone()));
        }
    }

    fn add_parents(&mut self, oid: &ObjectId) -> anyhow::Result<()> {
        if !self.walk || !self.mark(oid, CommitFlags::ADDED) {
            return Ok(());
        }

        let parent_oids = if self.marked(oid, CommitFlags::UNINTERESTING) {
            let parents = self.commits[oid].parents().to_vec();
            for parent in &parents {
                self.load_commit(parent)?;
            }
            self.mark_parents_uninteresting(oid);
            parents
        } else {
            let simplified = self.simplify_commit(oid)?;
            for parent in &simplified {
                self.load_commit(parent)?;
            }
            simplified
        };

        for parent in parent_oids {
            self.enqueue_commit(&parent);
        }

        Ok(())
    }

    /// Propagate UNINTERESTING to ancestors through the loaded commit map
    fn mark_parents_uninteresting(&mut self, oid: &ObjectId) {
        let mut queue: VecDeque<ObjectId> = match self.commits.get(oid) {
            Some(commit) => commit.parents().to_vec().into(),
            None => return,
        };

        while let Some(oid) = queue.pop_front() {
            if !self.mark(&oid, CommitFlags::UNINTERESTING) {
                continue;
            }
            if let Some(commit) = self.commits.get(&oid) {
                queue.extend(commit.parents().iter().cloned());
            }
        }
    }

    /// Drain the queue until every remaining entry is excluded
    fn limit_list(&mut self) -> anyhow::Result<()> {
        while self.still_interesting() {
            let Some((timestamp, oid)) = self.queue.pop_front() else {
                break;
            };

            self.add_parents(&oid)?;

            if !self.marked(&oid, CommitFlags::UNINTERESTING) {
                self.output.push((timestamp, oid));
            }
        }

        self.queue = std::mem::take(&mut self.output).into();

        Ok(())
    }

    fn still_interesting(&self) -> bool {
        let Some((newest_in_date, _)) = self.queue.front() else {
            return false;
        };

        if let Some((oldest_out_date, _)) = self.output.last()
            && oldest_out_date <= newest_in_date
        {
            return true;
        }

        self.queue
            .iter()
            .any(|(_, oid)| !self.marked(oid, CommitFlags::UNINTERESTING))
    }

    /// Pick the parents to follow under the active path filter
    ///
    /// The first parent whose filtered diff against the commit is empty wins:
    /// the commit is TREESAME and only that parent is followed. Root commits
    /// are treated as having a single nil parent.
    fn simplify_commit(&mut self, oid: &ObjectId) -> anyhow::Result<Vec<ObjectId>> {
        let parents = self.commits[oid].parents().to_vec();

        if self.prune.is_empty() {
            return Ok(parents);
        }

        let candidates: Vec<Option<ObjectId>> = if parents.is_empty() {
            vec![None]
        } else {
            parents.iter().cloned().map(Some).collect()
        };

        for parent in &candidates {
            if !self.tree_diff_is_empty(parent.clone(), oid.clone())? {
                continue;
            }
            self.mark(oid, CommitFlags::TREESAME);
            return Ok(parent.clone().into_iter().collect());
        }

        Ok(parents)
    }

    fn tree_diff_is_empty(
        &mut self,
        old: Option<ObjectId>,
        new: ObjectId,
    ) -> anyhow::Result<bool> {
        Ok(self.tree_diff(old, new)?.is_empty())
    }

    /// The memoized filtered diff between a commit and one of its parents
    pub fn tree_diff(
        &mut self,
        old: Option<ObjectId>,
        new: ObjectId,
    ) -> anyhow::Result<&ChangeSet> {
        let key = (old.clone(), new.clone());

        if !self.diffs.contains_key(&key) {
            let diff = self.repository.database().tree_diff(
                old.as_ref(),
                Some(&new),
                &self.filter,
            )?;
            self.diffs.insert(key.clone(), diff.into_changes());
        }

        Ok(&self.diffs[&key])
    }

    /// Mark every object reachable from excluded edges as uninteresting
    fn mark_edges_uninteresting(&mut self) -> anyhow::Result<()> {
        let queue: Vec<ObjectId> = self.queue.iter().map(|(_, oid)| oid.clone()).collect();

        for oid in queue {
            if self.marked(&oid, CommitFlags::UNINTERESTING) {
                let tree = self.commits[&oid].tree_oid().clone();
                self.mark_tree_uninteresting(&tree)?;
                continue;
            }

            let parents = self.commits[&oid].parents().to_vec();
            for parent_oid in parents {
                if !self.marked(&parent_oid, CommitFlags::UNINTERESTING) {
                    continue;
                }
                let tree = self.load_commit(&parent_oid)?.tree_oid().clone();
                self.mark_tree_uninteresting(&tree)?;
            }
        }

        Ok(())
    }

    fn mark_tree_uninteresting(&mut self, tree_oid: &ObjectId) -> anyhow::Result<()> {
        if !self.mark(tree_oid, CommitFlags::UNINTERESTING) {
            return Ok(());
        }

        let Some(tree) = self.repository.database().parse_object_as_tree(tree_oid)? else {
            return Ok(());
        };

        for (_, entry) in tree.entries() {
            if entry.is_tree() {
                self.mark_tree_uninteresting(&entry.oid)?;
            } else {
                self.mark(&entry.oid, CommitFlags::UNINTERESTING);
            }
        }

        Ok(())
    }

    fn prime(&mut self) -> anyhow::Result<()> {
        if self.primed {
            return Ok(());
        }
        self.primed = true;

        if self.limited {
            self.limit_list()?;
        }
        if self.objects {
            self.mark_edges_uninteresting()?;
        }

        Ok(())
    }

    fn step(&mut self) -> anyhow::Result<Option<(ObjectId, Commit)>> {
        self.prime()?;

        loop {
            let Some((_, oid)) = self.queue.pop_front() else {
                return Ok(None);
            };

            if !self.limited {
                self.add_parents(&oid)?;
            }

            if self.marked(&oid, CommitFlags::UNINTERESTING)
                || self.marked(&oid, CommitFlags::TREESAME)
            {
                continue;
            }

            let commit = self.commits[&oid].clone();
            if self.objects {
                self.pending.push((commit.tree_oid().clone(), PathBuf::new()));
            }

            return Ok(Some((oid, commit)));
        }
    }

    /// Drain the walk into every reachable object: commits first, then the
    /// unique trees and blobs below them, each with a path hint for delta
    /// clustering
    pub fn all_objects(mut self) -> anyhow::Result<Vec<(ObjectId, Option<PathBuf>)>> {
        let mut result = Vec::new();

        while let Some((oid, _)) = self.step()? {
            result.push((oid, None));
        }

        let pending = std::mem::take(&mut self.pending);
        for (tree_oid, path) in pending {
            self.traverse_tree(&tree_oid, path, &mut result)?;
        }

        Ok(result)
    }

    fn traverse_tree(
        &mut self,
        tree_oid: &ObjectId,
        path: PathBuf,
        result: &mut Vec<(ObjectId, Option<PathBuf>)>,
    ) -> anyhow::Result<()> {
        if self.marked(tree_oid, CommitFlags::UNINTERESTING) {
            return Ok(());
        }
        if !self.mark(tree_oid, CommitFlags::SEEN) {
            return Ok(());
        }

        result.push((tree_oid.clone(), Some(path.clone())));

        let Some(tree) = self.repository.database().parse_object_as_tree(tree_oid)? else {
            return Ok(());
        };

        for (name, entry) in tree
            .entries()
            .map(|(n, e)| (n.clone(), e.clone()))
            .collect::<Vec<_>>()
        {
            let child_path = path.join(&name);

            if entry.is_tree() {
                self.traverse_tree(&entry.oid, child_path, result)?;
            } else {
                if self.marked(&entry.oid, CommitFlags::UNINTERESTING) {
                    continue;
                }
                if !self.mark(&entry.oid, CommitFlags::SEEN) {
                    continue;
                }
                result.push((entry.oid.clone(), Some(child_path)));
            }
        }

        Ok(())
    }

    fn mark(&mut self, oid: &ObjectId, flag: CommitFlags) -> bool {
        let flags = self.flags.entry(oid.clone()).or_default();
        if flags.contains(flag) {
            false
        } else {
            *flags |= flag;
            true
        }
    }

    fn marked(&self, oid: &ObjectId, flag: CommitFlags) -> bool {
        self.flags
            .get(oid)
            .map(|flags| flags.contains(flag))
            .unwrap_or(false)
    }
}

impl Iterator for RevList<'_> {
    type Item = anyhow::Result<(ObjectId, Commit)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}
